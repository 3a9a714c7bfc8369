use std::io::{self, Stdout};

use anyhow::{Context, Result};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;

pub(super) type TuiTerminal = Terminal<CrosstermBackend<Stdout>>;

/// Raw mode plus alternate screen for as long as the session lives.
pub(super) struct TuiSession {
    terminal: TuiTerminal,
    active: bool,
}

impl TuiSession {
    pub(super) fn enter() -> Result<Self> {
        let terminal = Terminal::new(CrosstermBackend::new(io::stdout()))
            .context("failed to initialize terminal backend")?;
        enable_raw_mode().context("failed to enable raw mode")?;
        let mut session = Self {
            terminal,
            active: true,
        };
        execute!(io::stdout(), EnterAlternateScreen).context("failed to enter alternate screen")?;
        session.terminal.clear()?;
        Ok(session)
    }

    pub(super) fn terminal(&mut self) -> &mut TuiTerminal {
        &mut self.terminal
    }

    pub(super) fn leave(mut self) -> Result<()> {
        self.restore()
    }

    fn restore(&mut self) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        disable_raw_mode().context("failed to disable raw mode")?;
        execute!(io::stdout(), LeaveAlternateScreen).context("failed to leave alternate screen")?;
        self.terminal.show_cursor()?;
        Ok(())
    }
}

impl Drop for TuiSession {
    fn drop(&mut self) {
        let _ = self.restore();
    }
}
