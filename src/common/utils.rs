//! Common utilities and helper functions

use crate::error::{ReassemblerError, Result};
use crate::logging::Logger;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Await a remote call unless the run is cancelled first
///
/// The call future is dropped as soon as the token fires, so whatever the remote
/// side already acknowledged stays acknowledged and nothing further is sent.
pub async fn cancellable<T, F>(cancel: &CancellationToken, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ReassemblerError::Cancelled),
        result = call => result,
    }
}

/// Timing utilities
pub struct Timer {
    start: Instant,
    description: String,
}

impl Timer {
    /// Start a new timer
    pub fn start(description: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            description: description.into(),
        }
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Log elapsed time using provided logger
    pub fn log_elapsed(&self, logger: &Logger) {
        logger.info(&format!(
            "{} completed in {}",
            self.description,
            logger.format_duration(self.elapsed())
        ));
    }
}
