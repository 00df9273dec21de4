//! Per-conversion bookkeeping: transcript, progress and cancellation.
//!
//! A `Session` is threaded through every pipeline stage. Each line logged to
//! it is timestamped, kept in an in-memory transcript (so a failed run can be
//! inspected after the fact) and forwarded to the `log` facade.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

type ProgressHandler = Box<dyn Fn(f32, Option<&str>) + Send>;

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Session {
    lines: Vec<String>,
    progress: Option<ProgressHandler>,
    cancel: CancelToken,
    started: Instant,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            lines: Vec::new(),
            progress: None,
            cancel: CancelToken::new(),
            started: Instant::now(),
        }
    }

    /// Register a callback receiving progress in `0.0..=1.0` and an optional status message.
    pub fn with_progress<F>(mut self, cb: F) -> Self
    where
        F: Fn(f32, Option<&str>) + Send + 'static,
    {
        self.progress = Some(Box::new(cb));
        self
    }

    /// Share an externally owned cancellation token.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Append a timestamped line to the transcript.
    pub fn log(&mut self, message: impl AsRef<str>) {
        let message = message.as_ref();
        let stamp = chrono::Local::now().format("%H:%M:%S%.3f");
        log::debug!("{}", message);
        self.lines.push(format!("[{}] {}", stamp, message));
    }

    pub fn progress(&self, value: f32, message: Option<&str>) {
        if let Some(cb) = &self.progress {
            cb(value.clamp(0.0, 1.0), message);
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// The full transcript, one line per entry
    pub fn transcript(&self) -> String {
        self.lines.join("\n")
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn elapsed_display(&self) -> String {
        format!("{:.2}s", self.elapsed().as_secs_f64())
    }
}
