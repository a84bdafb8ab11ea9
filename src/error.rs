//! Error handling for the client runtime.
//!
//! Errors fall into the taxonomy the pipeline cares about: contract and
//! configuration errors fail fast at proxy construction, retryable errors
//! drive the retry loop, HTTP and decode errors surface directly to the
//! caller. Constructor helpers keep call sites terse and messages uniform.

use std::fmt;
use std::time::SystemTime;

use thiserror::Error;

/// How exhausted retries surface their failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPropagation {
    /// Re-raise the retryable error as-is.
    #[default]
    None,
    /// Unwrap to the root cause when one exists.
    Unwrap,
}

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed operation declaration, raised at parse time only.
    #[error("contract violation: {0}")]
    Contract(String),

    /// Invalid runtime configuration (URI rules, duplicate map arguments).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Invalid argument supplied at invocation time.
    #[error("invalid argument: {0}")]
    Argument(String),

    /// Operation attempted in the wrong lifecycle state.
    #[error("illegal state: {0}")]
    State(String),

    /// A failure the retryer may recover from.
    #[error(transparent)]
    Retryable(Box<RetryableError>),

    /// Non-2xx response surfaced by the error decoder.
    #[error("HTTP {status} for {config_key}{}", format_body(.body))]
    Http {
        status: u16,
        config_key: String,
        body: Option<String>,
    },

    /// Response body could not be parsed into the declared return shape.
    #[error("failed to decode response with status {status}: {message}")]
    Decode { status: u16, message: String },

    /// Response body could not be read; never retried.
    #[error("failed to read response: {0}")]
    Read(String),

    /// Transport-level failure (connect, TLS, timeout).
    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Wraps a failure that the retry loop is allowed to recover from. Carries
/// an optional server-supplied deadline (`Retry-After`).
#[derive(Debug)]
pub struct RetryableError {
    message: String,
    retry_after: Option<SystemTime>,
    cause: Option<Error>,
}

fn format_body(body: &Option<String>) -> String {
    match body {
        Some(body) if !body.is_empty() && body.len() <= 200 => format!(": {body}"),
        _ => String::new(),
    }
}

impl RetryableError {
    #[must_use]
    pub fn new(
        message: impl Into<String>,
        retry_after: Option<SystemTime>,
        cause: Option<Error>,
    ) -> Self {
        Self {
            message: message.into(),
            retry_after,
            cause,
        }
    }

    /// Server-requested earliest retry instant, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<SystemTime> {
        self.retry_after
    }

    /// The wrapped failure, if any.
    #[must_use]
    pub fn cause(&self) -> Option<&Error> {
        self.cause.as_ref()
    }

    /// Consume the wrapper, returning the cause when present.
    #[must_use]
    pub fn into_cause(self) -> Option<Error> {
        self.cause
    }
}

impl fmt::Display for RetryableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RetryableError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl Error {
    /// Create a contract parse error.
    pub fn contract(message: impl Into<String>) -> Self {
        Self::Contract(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an invalid-argument error.
    pub fn argument(message: impl Into<String>) -> Self {
        Self::Argument(message.into())
    }

    /// Create an expression constraint mismatch error.
    pub fn expression_mismatch(name: &str, value: &str, pattern: &str) -> Self {
        Self::Argument(format!(
            "value '{value}' for '{name}' does not match the expression pattern {pattern}"
        ))
    }

    /// Create a transport error around `source`.
    pub fn transport(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Transport {
            message: message.into(),
            source,
        }
    }

    /// Wrap `cause` as retryable, as after a transport I/O failure.
    #[must_use]
    pub fn retryable(message: impl Into<String>, cause: Error) -> Self {
        Self::Retryable(Box::new(RetryableError::new(message, None, Some(cause))))
    }

    /// Wrap `cause` as retryable with a server-requested retry instant.
    #[must_use]
    pub fn retryable_after(
        message: impl Into<String>,
        retry_after: Option<SystemTime>,
        cause: Error,
    ) -> Self {
        Self::Retryable(Box::new(RetryableError::new(
            message,
            retry_after,
            Some(cause),
        )))
    }

    /// True when the retry loop may act on this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }

    /// Apply the propagation policy to an error that exhausted its retries.
    #[must_use]
    pub fn propagate(self, policy: ErrorPropagation) -> Self {
        match (policy, self) {
            (ErrorPropagation::Unwrap, Self::Retryable(retryable)) => {
                match retryable.into_cause() {
                    Some(cause) => cause,
                    None => Self::Retryable(Box::new(RetryableError::new(
                        "retries exhausted",
                        None,
                        None,
                    ))),
                }
            }
            (_, error) => error,
        }
    }
}
