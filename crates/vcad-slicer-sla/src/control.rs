//! Progress reporting and cooperative cancellation.

use std::fmt;

use crate::error::{Result, SupportError};

type StatusFn = dyn Fn(u32, &str) + Send + Sync;
type CancelFn = dyn Fn() -> bool + Send + Sync;

/// Hooks through which a caller observes and stops a running job.
///
/// Both hooks are optional; the default controller reports nothing and
/// never cancels. The hooks may be called from worker threads.
#[derive(Default)]
pub struct JobController {
    status: Option<Box<StatusFn>>,
    cancel: Option<Box<CancelFn>>,
}

impl JobController {
    /// A controller without hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `(percent, label)` on every phase change.
    pub fn with_status<F>(mut self, f: F) -> Self
    where
        F: Fn(u32, &str) + Send + Sync + 'static,
    {
        self.status = Some(Box::new(f));
        self
    }

    /// Poll `f` to find out whether the job should stop.
    pub fn with_cancel<F>(mut self, f: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.cancel = Some(Box::new(f));
        self
    }

    /// Forward a progress update to the status hook.
    pub fn update_status(&self, percent: u32, label: &str) {
        if let Some(status) = &self.status {
            status(percent, label);
        }
    }

    /// Whether cancellation was requested.
    pub fn stopped(&self) -> bool {
        self.cancel.as_ref().is_some_and(|cancel| cancel())
    }

    /// Fail with [`SupportError::Cancelled`] if cancellation was requested.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.stopped() {
            Err(SupportError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for JobController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobController")
            .field("status", &self.status.is_some())
            .field("cancel", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_default_never_cancels() {
        let ctl = JobController::new();
        ctl.update_status(50, "Classification");
        assert!(!ctl.stopped());
        assert!(ctl.check_cancelled().is_ok());
    }

    #[test]
    fn test_status_and_cancel_hooks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let ctl = {
            let seen = Arc::clone(&seen);
            let stop = Arc::clone(&stop);
            JobController::new()
                .with_status(move |pct, label| seen.lock().unwrap().push((pct, label.to_string())))
                .with_cancel(move || stop.load(Ordering::Relaxed))
        };

        ctl.update_status(30, "Generate pinheads");
        assert_eq!(seen.lock().unwrap()[0], (30, "Generate pinheads".to_string()));

        assert!(ctl.check_cancelled().is_ok());
        stop.store(true, Ordering::Relaxed);
        assert_eq!(ctl.check_cancelled(), Err(SupportError::Cancelled));
    }
}
