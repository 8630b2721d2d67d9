/*!
 * Termination signal handling
 *
 * SIGINT, SIGTERM and SIGQUIT set a shared flag instead of killing the
 * process. The pipeline checks the flag between subprocesses and returns
 * `RestoreError::Interrupted`, so the scratch guard unwinds normally. A
 * second signal while the flag is set terminates immediately.
 */

use std::os::raw::c_int;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use signal_hook::consts::TERM_SIGNALS;
use signal_hook::flag;
use tracing::warn;

use crate::error::{Phase, RestoreError, Result};

/// Shared "stop at the next step" flag
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    /// Flag that is only ever set by `trigger`
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag set by the usual termination signals
    pub fn install() -> Result<Self> {
        let interrupt = Self::new();
        interrupt.register(TERM_SIGNALS)?;
        Ok(interrupt)
    }

    fn register(&self, signals: &[c_int]) -> Result<()> {
        for &signal in signals {
            // Registered first so it sees the flag before this signal sets it
            flag::register_conditional_shutdown(signal, 1, Arc::clone(&self.flag))?;
            flag::register(signal, Arc::clone(&self.flag))?;
        }
        Ok(())
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Fail with `Interrupted` if a signal has arrived
    pub fn check(&self, phase: Phase) -> Result<()> {
        if self.is_set() {
            warn!("Interrupted, stopping before further {} work", phase);
            return Err(RestoreError::Interrupted { phase });
        }
        Ok(())
    }
}
