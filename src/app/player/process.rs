use std::env;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::{Child, Command as ProcessCommand, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use tracing::{debug, info};

#[cfg(unix)]
use std::os::unix::process::CommandExt;

use super::super::youtube::watch_url;
use super::{CreateRequest, EventSink, MediaPlayer, PlayerError, PlayerFactory};

pub(crate) const DEFAULT_PLAYER_BIN: &str = "mpv";

pub(crate) fn resolve_player_bin() -> PathBuf {
    resolve_player_bin_from_env(env::var_os("LOOPTUBE_PLAYER_BIN"))
}

pub(crate) fn resolve_player_bin_from_env(env_value: Option<OsString>) -> PathBuf {
    match env_value {
        Some(value) if !value.is_empty() => PathBuf::from(value),
        _ => PathBuf::from(DEFAULT_PLAYER_BIN),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PlayerStdio {
    Inherit,
    Null,
}

impl PlayerStdio {
    fn stdio(self) -> Stdio {
        match self {
            Self::Inherit => Stdio::inherit(),
            Self::Null => Stdio::null(),
        }
    }
}

pub(crate) struct ProcessPlayerFactory {
    bin: PathBuf,
    stdio: PlayerStdio,
}

impl ProcessPlayerFactory {
    pub(crate) fn new(bin: PathBuf, stdio: PlayerStdio) -> Self {
        Self { bin, stdio }
    }
}

impl PlayerFactory for ProcessPlayerFactory {
    type Player = ProcessPlayer;

    fn create(&mut self, request: CreateRequest<'_>) -> Result<ProcessPlayer, PlayerError> {
        debug!(
            container = request.container,
            requested_id = request.requested_id,
            bin = %self.bin.display(),
            "creating process player"
        );
        if self.bin.as_os_str().is_empty() {
            return Err(PlayerError::Create("no player executable configured".to_string()));
        }
        let player = ProcessPlayer {
            bin: self.bin.clone(),
            stdio: self.stdio,
            events: request.events,
            clock: Arc::new(Mutex::new(PlayClock::default())),
            running: Arc::new(Mutex::new(None)),
        };
        // Nothing to boot: the process only starts on play().
        player.events.ready();
        Ok(player)
    }
}

/// Tracks how far into the current video playback has got. Wall time only
/// counts while the process runs unpaused.
#[derive(Debug, Default)]
struct PlayClock {
    media_id: Option<String>,
    offset: Duration,
    since: Option<Instant>,
}

impl PlayClock {
    fn load(&mut self, media_id: &str, start_seconds: u32) {
        self.media_id = Some(media_id.to_string());
        self.offset = Duration::from_secs(u64::from(start_seconds));
        self.since = None;
    }

    fn run(&mut self) {
        if self.since.is_none() {
            self.since = Some(Instant::now());
        }
    }

    fn halt(&mut self) {
        if let Some(since) = self.since.take() {
            self.offset += since.elapsed();
        }
    }

    fn position(&self) -> Duration {
        self.offset + self.since.map_or(Duration::ZERO, |since| since.elapsed())
    }

    fn position_seconds(&self) -> u32 {
        u32::try_from(self.position().as_secs()).unwrap_or(u32::MAX)
    }

    /// Settles the clock once the run for `media_id` exits on its own.
    /// A completed video starts over next time.
    fn exited(&mut self, media_id: &str, completed: bool) {
        if self.media_id.as_deref() != Some(media_id) {
            return;
        }
        self.halt();
        if completed {
            self.offset = Duration::ZERO;
        }
    }
}

#[derive(Debug)]
struct RunningChild {
    pid: u32,
    stopped: Arc<AtomicBool>,
    paused: bool,
}

/// Plays one video at a time by running the player executable on its
/// watch URL. A waiter thread reports how each run ended.
pub(crate) struct ProcessPlayer {
    bin: PathBuf,
    stdio: PlayerStdio,
    events: EventSink,
    clock: Arc<Mutex<PlayClock>>,
    running: Arc<Mutex<Option<RunningChild>>>,
}

impl ProcessPlayer {
    fn with_clock<T>(&self, f: impl FnOnce(&mut PlayClock) -> T) -> Option<T> {
        self.clock.lock().ok().map(|mut clock| f(&mut *clock))
    }

    fn current(&self) -> Option<String> {
        self.with_clock(|clock| clock.media_id.clone()).flatten()
    }

    fn spawn(&self, media_id: &str, start_seconds: u32) -> Result<(), PlayerError> {
        let mut cmd = ProcessCommand::new(&self.bin);
        if start_seconds > 0 {
            cmd.arg(format!("--start={start_seconds}"));
        }
        cmd.arg(watch_url(media_id))
            .stdin(self.stdio.stdio())
            .stdout(self.stdio.stdio())
            .stderr(self.stdio.stdio());
        restore_default_signals(&mut cmd);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                let bin = self.bin.display().to_string();
                self.events.error(format!("failed to launch {bin}: {source}"));
                return Err(PlayerError::Launch { bin, source });
            }
        };

        let stopped = Arc::new(AtomicBool::new(false));
        if let Ok(mut running) = self.running.lock() {
            *running = Some(RunningChild {
                pid: child.id(),
                stopped: Arc::clone(&stopped),
                paused: false,
            });
        }
        self.with_clock(PlayClock::run);
        info!(media_id, start_seconds, pid = child.id(), "player process started");
        self.events.playing();

        let exit = ExitWatch {
            media_id: media_id.to_string(),
            stopped,
            running: Arc::clone(&self.running),
            clock: Arc::clone(&self.clock),
            events: self.events.clone(),
        };
        thread::spawn(move || exit.wait(child));
        Ok(())
    }

    fn signal_running(&self, signal: ProcessSignal) -> Result<bool, PlayerError> {
        let mut running = self
            .running
            .lock()
            .map_err(|_| PlayerError::Signal(io::Error::other("player state poisoned")))?;
        let Some(child) = running.as_mut() else {
            return Ok(false);
        };
        if matches!(signal, ProcessSignal::Terminate) {
            child.stopped.store(true, Ordering::SeqCst);
        }
        send_signal(child.pid, signal)?;
        match signal {
            ProcessSignal::Pause => {
                child.paused = true;
                self.with_clock(PlayClock::halt);
            }
            ProcessSignal::Resume => {
                child.paused = false;
                self.with_clock(PlayClock::run);
            }
            ProcessSignal::Terminate => {
                *running = None;
                self.with_clock(PlayClock::halt);
            }
        }
        Ok(true)
    }

    fn is_paused(&self) -> bool {
        self.running
            .lock()
            .map(|running| running.as_ref().is_some_and(|child| child.paused))
            .unwrap_or(false)
    }

    fn is_running(&self) -> bool {
        self.running
            .lock()
            .map(|running| running.is_some())
            .unwrap_or(false)
    }
}

impl MediaPlayer for ProcessPlayer {
    fn load_by_id(&self, media_id: &str, start_seconds: u32) -> Result<(), PlayerError> {
        self.signal_running(ProcessSignal::Terminate)?;
        self.with_clock(|clock| clock.load(media_id, start_seconds));
        Ok(())
    }

    fn play(&self) -> Result<(), PlayerError> {
        if self.is_paused() {
            self.signal_running(ProcessSignal::Resume)?;
            return Ok(());
        }
        if self.is_running() {
            return Ok(());
        }
        let (media_id, start_seconds) = self
            .with_clock(|clock| {
                let position = clock.position_seconds();
                clock.media_id.clone().map(|media_id| (media_id, position))
            })
            .flatten()
            .ok_or(PlayerError::NothingLoaded)?;
        self.spawn(&media_id, start_seconds)
    }

    fn pause(&self) -> Result<(), PlayerError> {
        if self.is_paused() {
            return Ok(());
        }
        self.signal_running(ProcessSignal::Pause).map(|_| ())
    }

    fn stop(&self) -> Result<(), PlayerError> {
        self.signal_running(ProcessSignal::Terminate).map(|_| ())
    }

    fn current_id(&self) -> Result<Option<String>, PlayerError> {
        Ok(self.current())
    }

    fn position_seconds(&self) -> Result<u32, PlayerError> {
        Ok(self
            .with_clock(|clock| clock.position_seconds())
            .unwrap_or(0))
    }

    fn destroy(&self) -> Result<(), PlayerError> {
        self.stop()
    }
}

/// Everything the waiter thread needs to report how one run ended.
struct ExitWatch {
    media_id: String,
    stopped: Arc<AtomicBool>,
    running: Arc<Mutex<Option<RunningChild>>>,
    clock: Arc<Mutex<PlayClock>>,
    events: EventSink,
}

impl ExitWatch {
    fn wait(self, mut child: Child) {
        let pid = child.id();
        let status = child.wait();
        if let Ok(mut running) = self.running.lock()
            && running.as_ref().is_some_and(|entry| entry.pid == pid)
        {
            *running = None;
        }
        if self.stopped.load(Ordering::SeqCst) {
            debug!(pid, media_id = %self.media_id, "player process stopped");
            return;
        }
        let completed = status.as_ref().is_ok_and(|status| status.success());
        if let Ok(mut clock) = self.clock.lock() {
            clock.exited(&self.media_id, completed);
        }
        match status {
            Ok(status) if status.success() => self.events.ended_with(&self.media_id),
            Ok(status) => self
                .events
                .error(format!("player exited with status: {status}")),
            Err(err) => self.events.error(format!("failed waiting on player: {err}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessSignal {
    Pause,
    Resume,
    Terminate,
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: ProcessSignal) -> Result<(), PlayerError> {
    let signum = match signal {
        ProcessSignal::Pause => libc::SIGSTOP,
        ProcessSignal::Resume => libc::SIGCONT,
        ProcessSignal::Terminate => libc::SIGTERM,
    };
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| PlayerError::Signal(io::Error::other("pid out of range")))?;
    if unsafe { libc::kill(pid, signum) } != 0 {
        let err = io::Error::last_os_error();
        // Already exited; the waiter thread clears it shortly.
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        return Err(PlayerError::Signal(err));
    }
    if matches!(signal, ProcessSignal::Terminate) {
        // A stopped process ignores SIGTERM until it is continued.
        unsafe {
            let _ = libc::kill(pid, libc::SIGCONT);
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn send_signal(pid: u32, signal: ProcessSignal) -> Result<(), PlayerError> {
    let _ = pid;
    Err(PlayerError::Unsupported(match signal {
        ProcessSignal::Pause | ProcessSignal::Resume => "pause",
        ProcessSignal::Terminate => "stop",
    }))
}

#[cfg(unix)]
fn restore_default_signals(cmd: &mut ProcessCommand) {
    unsafe {
        cmd.pre_exec(|| {
            libc::signal(libc::SIGINT, libc::SIG_DFL);
            libc::signal(libc::SIGQUIT, libc::SIG_DFL);
            libc::signal(libc::SIGTSTP, libc::SIG_DFL);
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn restore_default_signals(cmd: &mut ProcessCommand) {
    let _ = cmd;
}

#[cfg(unix)]
struct ScopedSigaction {
    signum: libc::c_int,
    old_action: libc::sigaction,
}

#[cfg(unix)]
impl ScopedSigaction {
    fn ignore(signum: libc::c_int) -> Result<Self> {
        unsafe {
            let mut new_action: libc::sigaction = std::mem::zeroed();
            new_action.sa_sigaction = libc::SIG_IGN;
            libc::sigemptyset(&mut new_action.sa_mask);
            new_action.sa_flags = 0;

            let mut old_action: libc::sigaction = std::mem::zeroed();
            if libc::sigaction(signum, &new_action, &mut old_action) != 0 {
                return Err(anyhow!("failed to update signal action for {signum}"));
            }

            Ok(Self { signum, old_action })
        }
    }
}

#[cfg(unix)]
impl Drop for ScopedSigaction {
    fn drop(&mut self) {
        unsafe {
            let _ = libc::sigaction(self.signum, &self.old_action, std::ptr::null_mut());
        }
    }
}

/// Runs `f` with SIGINT ignored in this process, so Ctrl-C only reaches
/// the player child (which restores the default handler before exec).
#[cfg(unix)]
pub(crate) fn with_sigint_ignored<F, R>(f: F) -> Result<R>
where
    F: FnOnce() -> Result<R>,
{
    let _sigint_guard = ScopedSigaction::ignore(libc::SIGINT)?;
    f()
}

#[cfg(not(unix))]
pub(crate) fn with_sigint_ignored<F, R>(f: F) -> Result<R>
where
    F: FnOnce() -> Result<R>,
{
    f()
}
