//! Load-balanced client support: retryable status conversion.
//!
//! Wraps any transport and converts configured status codes into retryable
//! errors before the pipeline sees them, so the retry loop (with a
//! load-balanced target) sends the next attempt to another endpoint.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::codec::parse_retry_after;
use crate::error::Error;
use crate::request::{Options, Request};
use crate::transport::{Response, Transport};

/// Parse a comma-separated list of status codes (`"503,502"`).
///
/// # Errors
/// Non-numeric entries are configuration errors.
pub fn parse_status_codes(value: &str) -> Result<HashSet<u16>, Error> {
    let mut codes = HashSet::new();
    for part in value.split(',').map(str::trim).filter(|part| !part.is_empty()) {
        let code = part.parse::<u16>().map_err(|_| {
            Error::config(format!("invalid retryable status code '{part}'"))
        })?;
        codes.insert(code);
    }
    Ok(codes)
}

/// Transport wrapper converting matching responses to retryable failures.
pub struct RetryableStatusTransport<T> {
    inner: T,
    retryable_status_codes: HashSet<u16>,
}

impl<T: Transport> RetryableStatusTransport<T> {
    #[must_use]
    pub fn new(inner: T, retryable_status_codes: HashSet<u16>) -> Self {
        Self {
            inner,
            retryable_status_codes,
        }
    }

    /// Construct from the comma-separated configuration form.
    ///
    /// # Errors
    /// Invalid status code lists are configuration errors.
    pub fn from_config(inner: T, retryable_status_codes: &str) -> Result<Self, Error> {
        Ok(Self::new(inner, parse_status_codes(retryable_status_codes)?))
    }
}

#[async_trait]
impl<T: Transport> Transport for RetryableStatusTransport<T> {
    async fn execute(&self, request: &Request, options: &Options) -> Result<Response, Error> {
        let response = self.inner.execute(request, options).await?;
        if !self.retryable_status_codes.contains(&response.status()) {
            return Ok(response);
        }

        let status = response.status();
        let retry_after = response
            .header("Retry-After")
            .and_then(parse_retry_after)
            .map(|delay| std::time::SystemTime::now() + delay);
        Err(Error::retryable_after(
            format!("status {status} from {} marked retryable", request.url()),
            retry_after,
            Error::Http {
                status,
                config_key: request.url().to_string(),
                body: None,
            },
        ))
    }
}

impl<T> std::fmt::Debug for RetryableStatusTransport<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryableStatusTransport")
            .field("retryable_status_codes", &self.retryable_status_codes)
            .finish_non_exhaustive()
    }
}
