//! Error sink: where swallowed failures are reported.
//!
//! Nothing in the steering loop propagates errors to the host. Genuine
//! failures are handed to an [`ErrorSink`] instead; reporting must never fail.

use crate::error::Error;

/// Receives diagnostic reports for failures the steering loop swallows.
pub trait ErrorSink: Send + Sync {
    fn report(&self, label: &str, error: &Error);
}

/// Reports through `tracing` at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn report(&self, label: &str, error: &Error) {
        tracing::error!(error = %error, "{label}");
    }
}
