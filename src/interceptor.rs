//! Request interceptors.
//!
//! Interceptors mutate the resolved template before every transport attempt,
//! in registration order. Because they run again on each retry they must be
//! idempotent with respect to the mutations they perform; guard with an
//! already-applied check when appending.

use base64::Engine as _;

use crate::error::Error;
use crate::request::RequestTemplate;

/// Hook applied to the template before each attempt.
pub trait RequestInterceptor: Send + Sync {
    /// Mutate `template` in place.
    ///
    /// # Errors
    /// Invalid header or query mutations surface as configuration errors.
    fn apply(&self, template: &mut RequestTemplate) -> Result<(), Error>;
}

/// Sets a header to a fixed value, replacing any previous value. Replacing
/// rather than appending keeps repeated application idempotent.
#[derive(Debug, Clone)]
pub struct HeaderInterceptor {
    name: String,
    value: String,
}

impl HeaderInterceptor {
    #[must_use]
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

impl RequestInterceptor for HeaderInterceptor {
    fn apply(&self, template: &mut RequestTemplate) -> Result<(), Error> {
        template.replace_header(&self.name, [self.value.as_str()])?;
        Ok(())
    }
}

/// Adds a `Basic` authorization header from a user and password.
#[derive(Debug, Clone)]
pub struct BasicAuthInterceptor {
    header_value: String,
}

impl BasicAuthInterceptor {
    #[must_use]
    pub fn new(user: &str, password: &str) -> Self {
        let encoded =
            base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"));
        Self {
            header_value: format!("Basic {encoded}"),
        }
    }
}

impl RequestInterceptor for BasicAuthInterceptor {
    fn apply(&self, template: &mut RequestTemplate) -> Result<(), Error> {
        template.replace_header("Authorization", [self.header_value.as_str()])?;
        Ok(())
    }
}
