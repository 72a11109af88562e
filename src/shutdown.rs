//! Cooperative shutdown requested from a signal handler or the UI

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

/// Cloneable stop request flag. Once set it stays set.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken(Arc<AtomicBool>);

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Route SIGINT (Ctrl+C) to `token`. The handler only stores the flag.
pub fn install_interrupt_handler(token: &ShutdownToken) -> Result<(), ctrlc::Error> {
    let handler_token = token.clone();
    ctrlc::set_handler(move || handler_token.request())?;
    info!("Interrupt handler installed");
    Ok(())
}

/// Like [`install_interrupt_handler`], but a failure only loses Ctrl+C handling
pub fn try_install_interrupt_handler(token: &ShutdownToken) {
    if let Err(err) = install_interrupt_handler(token) {
        warn!("Failed to install Ctrl+C handler: {err}");
    }
}
