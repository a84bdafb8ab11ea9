//! Request and response logging with credential redaction.
//!
//! Each proxy carries a [`Logger`]: a [`LogLevel`] deciding how much of a
//! request is logged, plus a [`Redaction`] policy deciding which header and
//! query parameter values are masked first. The default policy is
//! marker-based: any name that looks credential-bearing (contains
//! `authorization`, `token`, `secret`, ...) is masked, which covers the
//! `Authorization` headers this crate's own interceptors emit as well as
//! whatever API-key headers a declared interface carries. Operation-specific
//! names can be added through the runtime builder.

use tracing::{debug, info, trace};

use crate::request::Request;
use crate::transport::Response;

/// Body bytes logged at `Full` before truncation.
const MAX_LOGGED_BODY: usize = 1000;

const MASK: &str = "[REDACTED]";

/// Name fragments that mark a header or query parameter as
/// credential-bearing.
const SENSITIVE_MARKERS: &[&str] = &[
    "authorization",
    "token",
    "secret",
    "password",
    "credential",
    "cookie",
    "session",
    "signature",
    "api-key",
    "api_key",
    "apikey",
];

/// How much of each request is logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    /// Nothing is logged.
    #[default]
    None,
    /// Request line and response status with timing.
    Basic,
    /// `Basic` plus request and response headers.
    Headers,
    /// `Headers` plus request and response bodies.
    Full,
}

/// Decides which header and query parameter values are masked in logs.
#[derive(Debug, Clone, Default)]
pub struct Redaction {
    /// Exact names (lowercased) declared sensitive by the user, on top of
    /// the marker heuristic.
    extra: Vec<String>,
}

impl Redaction {
    /// Also mask values of `name` (header or query parameter), compared
    /// case-insensitively.
    #[must_use]
    pub fn mask_name(mut self, name: &str) -> Self {
        self.extra.push(name.to_ascii_lowercase());
        self
    }

    /// True when values under `name` must not reach a log sink.
    #[must_use]
    pub fn is_sensitive(&self, name: &str) -> bool {
        let name = name.to_ascii_lowercase();
        self.extra.contains(&name)
            || SENSITIVE_MARKERS.iter().any(|marker| name.contains(marker))
    }
}

/// Level-gated, redaction-aware logger shared by all handlers of a proxy.
#[derive(Debug, Clone, Default)]
pub struct Logger {
    level: LogLevel,
    redaction: Redaction,
}

impl Logger {
    #[must_use]
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            redaction: Redaction::default(),
        }
    }

    #[must_use]
    pub fn with_redaction(mut self, redaction: Redaction) -> Self {
        self.redaction = redaction;
        self
    }

    #[must_use]
    pub fn level(&self) -> LogLevel {
        self.level
    }

    /// Mask the values of sensitive query parameters in `url`.
    #[must_use]
    pub fn redact_url(&self, url: &str) -> String {
        let Some((base, rest)) = url.split_once('?') else {
            return url.to_string();
        };
        let (query, fragment) = match rest.split_once('#') {
            Some((query, fragment)) => (query, Some(fragment)),
            None => (rest, None),
        };

        let mut out = String::with_capacity(url.len());
        out.push_str(base);
        out.push('?');
        for (position, pair) in query.split('&').enumerate() {
            if position > 0 {
                out.push('&');
            }
            match pair.split_once('=') {
                Some((name, _)) if self.redaction.is_sensitive(name) => {
                    out.push_str(name);
                    out.push('=');
                    out.push_str(MASK);
                }
                _ => out.push_str(pair),
            }
        }
        if let Some(fragment) = fragment {
            out.push('#');
            out.push_str(fragment);
        }
        out
    }

    fn display_value<'a>(&self, name: &str, value: &'a str) -> &'a str {
        if self.redaction.is_sensitive(name) {
            MASK
        } else {
            value
        }
    }

    /// Log an outgoing request.
    pub(crate) fn request(&self, config_key: &str, request: &Request) {
        if self.level == LogLevel::None {
            return;
        }
        info!(
            target: "legate::pipeline",
            "[{}] → {} {}",
            config_key,
            request.method(),
            self.redact_url(request.url())
        );
        if self.level >= LogLevel::Headers {
            for (name, value) in request.headers() {
                debug!(
                    target: "legate::pipeline",
                    "[{}]   {}: {}",
                    config_key,
                    name,
                    self.display_value(name, value)
                );
            }
        }
        if self.level >= LogLevel::Full && !request.body().is_empty() {
            let body = String::from_utf8_lossy(request.body());
            trace!(
                target: "legate::pipeline",
                "[{}] request body: {}",
                config_key,
                truncate(&body)
            );
        }
    }

    /// Log a received response.
    pub(crate) fn response(&self, config_key: &str, response: &Response, elapsed_ms: u128) {
        if self.level == LogLevel::None {
            return;
        }
        info!(
            target: "legate::pipeline",
            "[{}] ← {} ({}ms)",
            config_key,
            response.status(),
            elapsed_ms
        );
        if self.level >= LogLevel::Headers {
            for (name, value) in response.headers() {
                debug!(
                    target: "legate::pipeline",
                    "[{}]   {}: {}",
                    config_key,
                    name,
                    self.display_value(name, value)
                );
            }
        }
        if self.level >= LogLevel::Full {
            let body = response.body_text();
            if !body.is_empty() {
                trace!(
                    target: "legate::pipeline",
                    "[{}] response body: {}",
                    config_key,
                    truncate(&body)
                );
            }
        }
    }

    /// Log a transport failure before the retry decision.
    pub(crate) fn io_error(&self, config_key: &str, error: &crate::error::Error, elapsed_ms: u128) {
        if self.level == LogLevel::None {
            return;
        }
        info!(
            target: "legate::pipeline",
            "[{}] ✗ {} ({}ms)",
            config_key,
            error,
            elapsed_ms
        );
    }

    /// Log that the retryer permitted another attempt.
    pub(crate) fn retry(&self, config_key: &str) {
        if self.level == LogLevel::None {
            return;
        }
        info!(target: "legate::pipeline", "[{}] retrying", config_key);
    }
}

fn truncate(body: &str) -> &str {
    if body.len() <= MAX_LOGGED_BODY {
        return body;
    }
    let mut end = MAX_LOGGED_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
