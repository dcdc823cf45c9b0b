// Progress reporting and cooperative cancellation

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Receives task labels and progress, and tells long loops when to stop.
/// Implementations are polled once per loop iteration; stopping never
/// interrupts work already in progress.
pub trait ProgressSink {
    fn report(&mut self, label: &str, done: usize, total: usize);
    fn should_stop(&self) -> bool;
}

/// Shared stop request, set from a signal handler or another thread
#[derive(Clone, Debug, Default)]
pub struct CancelFlag {
    flag: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Cancel on Ctrl-C
    pub fn install_ctrlc_handler(&self) -> anyhow::Result<()> {
        let flag = self.clone();
        ctrlc::set_handler(move || {
            tracing::info!("Received shutdown signal, stopping after the current tile");
            flag.cancel();
        })?;
        Ok(())
    }
}

/// Progress sink that logs through tracing
pub struct LogProgress {
    cancel: CancelFlag,
    last_label: String,
}

impl LogProgress {
    pub fn new(cancel: CancelFlag) -> Self {
        Self {
            cancel,
            last_label: String::new(),
        }
    }
}

impl ProgressSink for LogProgress {
    fn report(&mut self, label: &str, done: usize, total: usize) {
        if label != self.last_label {
            tracing::info!("{} ({}/{})", label, done, total);
            self.last_label = label.to_string();
        } else {
            tracing::debug!("{} ({}/{})", label, done, total);
        }
    }

    fn should_stop(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
