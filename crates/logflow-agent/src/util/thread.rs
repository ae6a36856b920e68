//! Thread wrapper.
//!
//! Reader threads are plain OS threads doing blocking file I/O. The wrapper
//! gives them join-on-drop semantics with a configurable grace period: a
//! dropped handle waits up to the grace period for the thread to observe its
//! stop flag, then detaches with a warning instead of hanging shutdown.

use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::warn;

/// A named OS thread that joins on drop, bounded by a grace period.
#[derive(Debug)]
pub struct GracefulThread {
    name: String,
    grace: Duration,
    handle: Option<JoinHandle<()>>,
}

impl GracefulThread {
    /// Spawns a named thread.
    pub fn spawn<F>(name: impl Into<String>, grace: Duration, f: F) -> std::io::Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        let handle = std::thread::Builder::new().name(name.clone()).spawn(f)?;
        Ok(GracefulThread {
            name,
            grace,
            handle: Some(handle),
        })
    }

    /// Waits for the thread until `deadline`. Returns `true` once joined.
    pub fn try_join(&mut self, deadline: Instant) -> bool {
        let Some(handle) = self.handle.as_ref() else {
            return true;
        };
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        true
    }

    /// Blocks until the thread exits.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for GracefulThread {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let deadline = Instant::now() + self.grace;
            if !self.try_join(deadline) {
                warn!(
                    "thread {} did not stop within {:?}, detaching",
                    self.name, self.grace
                );
                self.handle = None;
            }
        }
    }
}
