//! Target strategies: how a relative template becomes an absolute request.
//!
//! A target is applied per attempt, never cached across retries, so a
//! load-balanced target may send each retry to a different endpoint.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::Error;
use crate::request::{Request, RequestTemplate};

/// Strategy that rewrites a resolved template's URL and freezes it.
pub trait Target: Send + Sync {
    /// Stable name, used as the command group key and in logs.
    fn name(&self) -> &str;

    /// The base URL, when the strategy has a fixed one.
    fn url(&self) -> Option<&str>;

    /// Apply this target to a resolved template, producing the request.
    ///
    /// # Errors
    /// Configuration errors for URL rule violations.
    fn apply(&self, template: &mut RequestTemplate) -> Result<Request, Error>;
}

/// Injects a fixed base URL into any template that is not already absolute.
#[derive(Debug, Clone)]
pub struct HardCodedTarget {
    name: String,
    url: String,
}

impl HardCodedTarget {
    /// Target named after its URL.
    #[must_use]
    pub fn new(url: &str) -> Self {
        Self::named(url, url)
    }

    #[must_use]
    pub fn named(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
        }
    }
}

impl Target for HardCodedTarget {
    fn name(&self) -> &str {
        &self.name
    }

    fn url(&self) -> Option<&str> {
        Some(&self.url)
    }

    fn apply(&self, template: &mut RequestTemplate) -> Result<Request, Error> {
        if !template.url().starts_with("http") {
            template.target(&self.url)?;
        }
        template.request()
    }
}

/// Requires every template to already carry an absolute URL, as when each
/// call supplies its own URI argument.
#[derive(Debug, Clone)]
pub struct EmptyTarget {
    name: String,
}

impl EmptyTarget {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

impl Target for EmptyTarget {
    fn name(&self) -> &str {
        &self.name
    }

    fn url(&self) -> Option<&str> {
        None
    }

    fn apply(&self, template: &mut RequestTemplate) -> Result<Request, Error> {
        if !template.url().starts_with("http") {
            return Err(Error::config(
                "request with non-absolute URL not supported with an empty target",
            ));
        }
        template.request()
    }
}

/// Chooses a concrete endpoint for one attempt.
pub trait EndpointPicker: Send + Sync {
    /// The base URL for the next attempt, if any endpoint is available.
    fn pick(&self) -> Option<String>;
}

/// Round-robin over a fixed server list.
#[derive(Debug)]
pub struct RoundRobin {
    servers: Vec<String>,
    next: AtomicUsize,
}

impl RoundRobin {
    #[must_use]
    pub fn new<I, S>(servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            servers: servers.into_iter().map(Into::into).collect(),
            next: AtomicUsize::new(0),
        }
    }
}

impl EndpointPicker for RoundRobin {
    fn pick(&self) -> Option<String> {
        if self.servers.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.servers.len();
        Some(self.servers[index].clone())
    }
}

/// Picks a base URL from an [`EndpointPicker`] on every application, so
/// consecutive retry attempts may hit different endpoints.
pub struct LoadBalancedTarget {
    name: String,
    picker: Arc<dyn EndpointPicker>,
}

impl LoadBalancedTarget {
    #[must_use]
    pub fn new(name: &str, picker: Arc<dyn EndpointPicker>) -> Self {
        Self {
            name: name.to_string(),
            picker,
        }
    }
}

impl Target for LoadBalancedTarget {
    fn name(&self) -> &str {
        &self.name
    }

    fn url(&self) -> Option<&str> {
        None
    }

    fn apply(&self, template: &mut RequestTemplate) -> Result<Request, Error> {
        let endpoint = self.picker.pick().ok_or_else(|| {
            Error::config(format!("no endpoint available for target '{}'", self.name))
        })?;
        template.target(&endpoint)?;
        template.request()
    }
}

impl std::fmt::Debug for LoadBalancedTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadBalancedTarget")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
