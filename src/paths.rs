use std::env;
use std::ffi::OsString;
use std::path::PathBuf;

use anyhow::{Context, Result};

pub fn data_dir() -> Result<PathBuf> {
    let base = dirs::data_dir().context("unable to resolve data directory")?;
    Ok(base.join("looptube"))
}

pub fn database_file_path() -> Result<PathBuf> {
    database_file_path_from_env(env::var_os("LOOPTUBE_DB"))
}

pub fn database_file_path_from_env(env_value: Option<OsString>) -> Result<PathBuf> {
    match env_value {
        Some(value) if !value.is_empty() => Ok(PathBuf::from(value)),
        _ => Ok(data_dir()?.join("looptube.db")),
    }
}

pub fn log_file_path() -> Result<PathBuf> {
    Ok(data_dir()?.join("looptube.log"))
}
