//! The process wide interrupt flag.
//!
//! Cancellation in krait is cooperative: a signal handler (or a test) sets an
//! atomic flag, and worker code polls it at I/O boundaries and at the top of
//! loop iterations via [`InterruptFlag::checkpoint`]. In-flight work stops at
//! the next poll, partial artifacts are cleaned up by their owners, and the
//! interruption propagates as the [`Interrupted`] error.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use thiserror::Error;

/// The error returned from a checkpoint once the flag has been set.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Error)]
#[error("the operation was interrupted")]
pub struct Interrupted;

/// A cloneable handle to a cancellation flag. The default value is a fresh,
/// unset flag; clones share their flag with the value they were cloned from.
#[derive(Debug, Default, Clone)]
pub struct InterruptFlag {
    flag: Arc<AtomicBool>,
}

impl InterruptFlag {
    /// Constructs a new, unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag. All holders of a clone observe the interruption at
    /// their next checkpoint.
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns true if the flag has been set.
    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Returns an error if the flag has been set. Call this at suspension
    /// points and loop heads.
    pub fn checkpoint(&self) -> Result<(), Interrupted> {
        if self.is_interrupted() {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }

    /// Spawns a task that sets this flag when the process receives ctrl-c.
    /// This is the only place krait hooks a signal; the flag itself is always
    /// passed around explicitly.
    pub fn attach_ctrl_c_handler(&self) {
        let flag = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, stopping at the next checkpoint");
                flag.interrupt();
            }
        });
    }
}

#[cfg(test)]
mod test {
    use super::{InterruptFlag, Interrupted};

    #[test]
    fn checkpoints_observe_the_flag() {
        let flag = InterruptFlag::new();
        assert_eq!(flag.checkpoint(), Ok(()));

        let clone = flag.clone();
        clone.interrupt();
        assert_eq!(flag.checkpoint(), Err(Interrupted));
    }

    #[test]
    fn fresh_flags_are_independent() {
        let a = InterruptFlag::new();
        let b = InterruptFlag::new();
        a.interrupt();
        assert!(b.checkpoint().is_ok());
    }
}
