//! Cooperative quit requests.
//!
//! The OS signal handlers only flip a [`QuitToken`]. The coordinator polls the
//! token between tests, so a signal never interrupts a running test or a
//! blocking receive.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};

/// One-way quit flag shared between the signal handler and the coordinator.
#[derive(Debug, Clone, Default)]
pub struct QuitToken(Arc<AtomicBool>);

impl QuitToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. Never cleared once set.
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Install handlers for SIGINT/SIGTERM/SIGHUP (and SIGQUIT on unix) that request a quit.
///
/// Can only be called once per process.
pub fn install_quit_handler(token: &QuitToken) -> Result<()> {
    #[cfg(unix)]
    register_sigquit(token)?;
    let token = token.clone();
    ctrlc::set_handler(move || token.request()).context("install quit signal handler")
}

/// `ctrlc` does not cover SIGQUIT, the signal the master sends to stop a worker.
#[cfg(unix)]
fn register_sigquit(token: &QuitToken) -> Result<()> {
    signal_hook::flag::register(signal_hook::consts::SIGQUIT, Arc::clone(&token.0))
        .context("install SIGQUIT handler")?;
    Ok(())
}
