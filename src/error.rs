// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Runtime Error Types
//!
//! This module provides the error handling for the actor runtime. Two small code
//! enums cover the two families of failures the runtime distinguishes: request
//! and configuration outcomes (`ErrorCode`) and shutdown reasons
//! (`ShutdownCode`). `ExtendedError` wraps either code together with an
//! optional chain of causes, so a failure can be traced back through the
//! supervision tree that produced it.
//!
//! Errors never cross handler boundaries as panics or exceptions. A failed
//! request is answered with exactly one error response; a failed actor proceeds
//! deterministically to shutdown carrying its reason; a supervisor that cannot
//! absorb a child failure escalates it as `FailureEscalation` with the child's
//! error attached as the cause.

use thiserror::Error;

use std::fmt;
use std::sync::Arc;

/// Request and configuration error codes.
///
/// These are the terminal outcomes a request or a configuration operation can
/// produce. Request outcomes (`Cancelled`, `RequestTimeout`) are delivered
/// through the response handler of the request that failed; configuration
/// outcomes surface at the call site that misused the runtime.
///
/// # Examples
///
/// ```ignore
/// use arbor::{ErrorCode, ExtendedError};
///
/// // A timed out request is reported through its response:
/// if response.result.as_ref().is_err_and(|e| e.is_code(ErrorCode::RequestTimeout)) {
///     // retry, discard, or shut down
/// }
/// ```
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ErrorCode {
    /// The request was cancelled before completion.
    #[error("request has been cancelled")]
    Cancelled,

    /// No response arrived within the request's timeout.
    ///
    /// Timeout responses are synthesised by the requester's supervisor; the
    /// responder may still be processing the original request.
    #[error("request timeout")]
    RequestTimeout,

    /// An actor attempted to attach to a second supervisor.
    #[error("supervisor is already defined")]
    SupervisorDefined,

    /// A service name was registered twice.
    #[error("service name is already registered")]
    AlreadyRegistered,

    /// The actor declared an inconsistent configuration during activation.
    #[error("actor is misconfigured")]
    ActorMisconfigured,

    /// The target actor does not accept links.
    #[error("actor is not linkable")]
    ActorNotLinkable,

    /// The link already exists.
    #[error("already linked")]
    AlreadyLinked,

    /// A child's failure became the parent's failure.
    ///
    /// Emitted when a supervisor with the `ShutdownSelf` policy answers its own
    /// pending init request after a child failed to initialise. The child's
    /// error is attached as the cause.
    #[error("failure escalation (child actor died)")]
    FailureEscalation,

    /// The requested service name is not registered.
    #[error("the requested service name is not registered")]
    UnknownService,
}

/// Shutdown reasons.
///
/// Every actor that shuts down carries exactly one primary reason; the first
/// assigned reason wins and later reasons may be chained as causes. User code
/// can introduce its own reasons through `Custom`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ShutdownCode {
    /// Regular, requested shutdown.
    #[error("normal shutdown")]
    Normal,

    /// A child failed to initialise and the policy escalated it.
    #[error("child actor failed to initialize")]
    ChildInitFailed,

    /// The actor's own initialisation failed.
    #[error("actor initialization failed")]
    InitFailed,

    /// The owning supervisor is going down.
    #[error("supervisor shutdown")]
    SupervisorShutdown,

    /// A user-defined shutdown reason.
    #[error("{0}")]
    Custom(String),
}

/// The two code families an [`ExtendedError`] can carry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A request or configuration outcome.
    Code(ErrorCode),
    /// A shutdown reason.
    Shutdown(ShutdownCode),
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Code(code) => write!(f, "{}", code),
            ErrorKind::Shutdown(code) => write!(f, "{}", code),
        }
    }
}

/// An error with a primary code and an optional chain of causes.
///
/// Extended errors are cheap to clone and safe to ship inside messages: the
/// cause chain is reference counted and immutable. `Display` walks the chain so
/// diagnostics read as a single line, outermost code first:
///
/// ```text
/// failure escalation (child actor died) <- actor initialization failed <- request timeout
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct ExtendedError {
    kind: ErrorKind,
    cause: Option<Arc<ExtendedError>>,
}

impl ExtendedError {
    /// Creates an error from a request/configuration code.
    ///
    /// # Arguments
    ///
    /// * `code` - The primary code.
    ///
    /// # Returns
    ///
    /// Returns a new error without a cause.
    ///
    pub fn code(code: ErrorCode) -> Self {
        Self {
            kind: ErrorKind::Code(code),
            cause: None,
        }
    }

    /// Creates an error from a shutdown reason.
    ///
    /// # Arguments
    ///
    /// * `code` - The shutdown reason.
    ///
    /// # Returns
    ///
    /// Returns a new error without a cause.
    ///
    pub fn shutdown(code: ShutdownCode) -> Self {
        Self {
            kind: ErrorKind::Shutdown(code),
            cause: None,
        }
    }

    /// Attaches a cause, consuming and returning the error.
    ///
    /// # Arguments
    ///
    /// * `cause` - The error that led to this one.
    ///
    /// # Returns
    ///
    /// Returns the error with the cause attached.
    ///
    pub fn with_cause(mut self, cause: ExtendedError) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Returns the primary code.
    ///
    /// # Returns
    ///
    /// Returns the code family and value of this error.
    ///
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Returns the direct cause, if any.
    ///
    /// # Returns
    ///
    /// Returns the next error in the chain.
    ///
    pub fn cause(&self) -> Option<&ExtendedError> {
        self.cause.as_deref()
    }

    /// Walks the chain to its innermost error.
    ///
    /// # Returns
    ///
    /// Returns the last error of the cause chain.
    ///
    pub fn root_cause(&self) -> &ExtendedError {
        let mut current = self;
        while let Some(cause) = current.cause() {
            current = cause;
        }
        current
    }

    /// Checks the primary code.
    ///
    /// # Returns
    ///
    /// Returns true if the primary code is the given
    /// request/configuration code.
    ///
    pub fn is_code(&self, code: ErrorCode) -> bool {
        self.kind == ErrorKind::Code(code)
    }

    /// Checks the primary code.
    ///
    /// # Returns
    ///
    /// Returns true if the primary code is the given shutdown reason.
    ///
    pub fn is_shutdown(&self, code: &ShutdownCode) -> bool {
        matches!(&self.kind, ErrorKind::Shutdown(c) if c == code)
    }
}

impl fmt::Display for ExtendedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        let mut cause = self.cause();
        while let Some(current) = cause {
            write!(f, " <- {}", current.kind)?;
            cause = current.cause();
        }
        Ok(())
    }
}

impl std::error::Error for ExtendedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause().map(|c| c as &(dyn std::error::Error + 'static))
    }
}

impl From<ErrorCode> for ExtendedError {
    fn from(code: ErrorCode) -> Self {
        ExtendedError::code(code)
    }
}

impl From<ShutdownCode> for ExtendedError {
    fn from(code: ShutdownCode) -> Self {
        ExtendedError::shutdown(code)
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_display_walks_chain() {
        let inner = ExtendedError::code(ErrorCode::RequestTimeout);
        let mid = ExtendedError::shutdown(ShutdownCode::InitFailed)
            .with_cause(inner);
        let outer =
            ExtendedError::code(ErrorCode::FailureEscalation).with_cause(mid);
        assert_eq!(
            outer.to_string(),
            "failure escalation (child actor died) <- actor initialization failed <- request timeout"
        );
    }

    #[test]
    fn test_root_cause() {
        let inner = ExtendedError::code(ErrorCode::Cancelled);
        let outer = ExtendedError::shutdown(ShutdownCode::Normal)
            .with_cause(inner.clone());
        assert_eq!(outer.root_cause(), &inner);
        assert!(outer.is_shutdown(&ShutdownCode::Normal));
        assert!(outer.root_cause().is_code(ErrorCode::Cancelled));
    }

    #[test]
    fn test_custom_shutdown_code() {
        let error =
            ExtendedError::shutdown(ShutdownCode::Custom("drained".to_owned()));
        assert_eq!(error.to_string(), "drained");
    }
}
