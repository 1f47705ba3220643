// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # System context
//!
//! The `system` module provides the `SystemContext`: the small amount of
//! state shared by every supervisor of a tree. It holds the error sink for
//! unrecoverable supervisor-level events and the cancellation token that
//! stops the whole tree. There is no global registry and no global state
//! beyond this; supervisors find each other only through addresses.
//!

use crate::error::ExtendedError;

use tokio_util::sync::CancellationToken;

use tracing::{debug, error};

use std::sync::Arc;

/// Sink for unrecoverable supervisor-level events, e.g. a child reporting a
/// shutdown error its parent does not handle.
pub trait ErrorSink: Send + Sync + 'static {
    /// Handles an unrecoverable error. Invoked on the supervisor's pump;
    /// keep it cheap.
    ///
    /// # Arguments
    ///
    /// * `error` - The error being surfaced.
    ///
    fn on_error(&self, error: &ExtendedError);
}

/// Default sink: log and carry on.
struct LogSink;

impl ErrorSink for LogSink {
    fn on_error(&self, error: &ExtendedError) {
        error!("Unhandled supervisor error: {}", error);
    }
}

/// Shared context of a supervisor tree.
#[derive(Clone)]
pub struct SystemContext {
    sink: Arc<dyn ErrorSink>,
    token: CancellationToken,
}

impl SystemContext {
    /// Creates a context with the logging error sink.
    ///
    /// # Returns
    ///
    /// Returns a new system context.
    ///
    pub fn new() -> Self {
        Self::with_sink(LogSink)
    }

    /// Creates a context with a custom error sink.
    ///
    /// # Arguments
    ///
    /// * `sink` - The sink receiving unrecoverable supervisor errors.
    ///
    /// # Returns
    ///
    /// Returns a new system context.
    ///
    pub fn with_sink(sink: impl ErrorSink) -> Self {
        Self {
            sink: Arc::new(sink),
            token: CancellationToken::new(),
        }
    }

    /// The cancellation token observed by every supervisor of the tree.
    ///
    /// # Returns
    ///
    /// Returns the shared cancellation token.
    ///
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Stops the tree: every running supervisor begins a shutdown cascade
    /// with reason `SupervisorShutdown`.
    pub fn stop(&self) {
        debug!("Stopping supervisor tree.");
        self.token.cancel();
    }

    pub(crate) fn on_error(&self, error: &ExtendedError) {
        self.sink.on_error(error);
    }
}

impl Default for SystemContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::error::{ErrorCode, ExtendedError};

    use std::sync::Mutex;

    struct Capture(Mutex<Vec<String>>);

    impl ErrorSink for Arc<Capture> {
        fn on_error(&self, error: &ExtendedError) {
            self.0.lock().unwrap().push(error.to_string());
        }
    }

    #[test]
    fn test_custom_sink_receives_errors() {
        let capture = Arc::new(Capture(Mutex::new(Vec::new())));
        let system = SystemContext::with_sink(capture.clone());
        system.on_error(&ExtendedError::code(ErrorCode::Cancelled));
        assert_eq!(
            capture.0.lock().unwrap().as_slice(),
            ["request has been cancelled"]
        );
    }

    #[test]
    fn test_stop_cancels_token() {
        let system = SystemContext::new();
        assert!(!system.token().is_cancelled());
        system.stop();
        assert!(system.token().is_cancelled());
    }
}
