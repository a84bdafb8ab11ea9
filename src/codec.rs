//! Body encoders, response decoders and the error decoder.
//!
//! These are the pluggable edges of the pipeline: encoders serialize a body
//! or form argument into the request template, decoders turn a buffered
//! response into the declared return shape, and the error decoder converts a
//! non-2xx response into an error (possibly a retryable one, when the server
//! said when to come back).

use std::time::{Duration, SystemTime};

use serde_json::Value;

use crate::error::Error;
use crate::metadata::ReturnType;
use crate::request::{Body, RequestTemplate};
use crate::template::encoding::{self, FragmentType};
use crate::transport::Response;

/// Serializes a value into the request template body.
pub trait Encoder: Send + Sync {
    /// Encode `value` into `template`.
    ///
    /// # Errors
    /// Serialization failures are [`Error::Argument`].
    fn encode(&self, value: &Value, template: &mut RequestTemplate) -> Result<(), Error>;
}

/// JSON body encoder; sets `Content-Type: application/json` unless one is
/// already declared.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEncoder;

impl Encoder for JsonEncoder {
    fn encode(&self, value: &Value, template: &mut RequestTemplate) -> Result<(), Error> {
        let data = serde_json::to_vec(value)
            .map_err(|e| Error::argument(format!("failed to encode JSON body: {e}")))?;
        if template.header_value("Content-Type").is_none() {
            template.header("Content-Type", ["application/json"])?;
        }
        template.body(Body::bytes(data));
        Ok(())
    }
}

/// `application/x-www-form-urlencoded` encoder for form parameter maps.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormEncoder;

impl Encoder for FormEncoder {
    fn encode(&self, value: &Value, template: &mut RequestTemplate) -> Result<(), Error> {
        let Value::Object(map) = value else {
            return Err(Error::argument(
                "form encoding requires a map of parameter names to values",
            ));
        };
        let mut pairs = Vec::new();
        for (name, value) in map {
            let name = encoding::encode(name, FragmentType::Query);
            match value {
                Value::Array(items) => {
                    for item in items {
                        pairs.push(format!(
                            "{name}={}",
                            encoding::encode(&crate::template::stringify(item), FragmentType::Query)
                        ));
                    }
                }
                other => pairs.push(format!(
                    "{name}={}",
                    encoding::encode(&crate::template::stringify(other), FragmentType::Query)
                )),
            }
        }
        if template.header_value("Content-Type").is_none() {
            template.header("Content-Type", ["application/x-www-form-urlencoded"])?;
        }
        template.body(Body::bytes(pairs.join("&")));
        Ok(())
    }
}

/// Turns a buffered response into the declared return shape.
pub trait Decoder: Send + Sync {
    /// Decode the (already buffered) `response` body.
    ///
    /// # Errors
    /// Parse failures are [`Error::Decode`].
    fn decode(&self, response: &Response, return_type: ReturnType) -> Result<Value, Error>;
}

/// Default decoder: JSON for `Json`/`Optional`, raw text for `Text`.
/// An empty body decodes to null.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDecoder;

impl Decoder for JsonDecoder {
    fn decode(&self, response: &Response, return_type: ReturnType) -> Result<Value, Error> {
        let body = response.body_bytes();
        match return_type {
            ReturnType::Text => Ok(Value::String(
                String::from_utf8_lossy(&body).into_owned(),
            )),
            ReturnType::Unit | ReturnType::Response => Ok(Value::Null),
            ReturnType::Json | ReturnType::Optional => {
                if return_type == ReturnType::Optional && response.status() == 404 {
                    return Ok(Value::Null);
                }
                if body.is_empty() {
                    return Ok(Value::Null);
                }
                serde_json::from_slice(&body).map_err(|e| Error::Decode {
                    status: response.status(),
                    message: e.to_string(),
                })
            }
        }
    }
}

/// Plain-text decoder for APIs that never speak JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringDecoder;

impl Decoder for StringDecoder {
    fn decode(&self, response: &Response, _return_type: ReturnType) -> Result<Value, Error> {
        Ok(Value::String(response.body_text()))
    }
}

/// Converts a query-map argument into a name-to-value map before it is
/// merged into the query string.
pub trait QueryMapEncoder: Send + Sync {
    /// Produce the map for `value`.
    ///
    /// # Errors
    /// Values that cannot be viewed as a map are [`Error::Argument`].
    fn encode(&self, value: &Value) -> Result<serde_json::Map<String, Value>, Error>;
}

/// Default query-map encoder: accepts JSON objects as-is, so any
/// serializable struct works after `serde_json::to_value`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldQueryMapEncoder;

impl QueryMapEncoder for FieldQueryMapEncoder {
    fn encode(&self, value: &Value) -> Result<serde_json::Map<String, Value>, Error> {
        match value {
            Value::Object(map) => Ok(map.clone()),
            other => Err(Error::argument(format!(
                "query map parameter must be a map with string keys, got {other}"
            ))),
        }
    }
}

/// Converts a non-2xx response into an error.
pub trait ErrorDecoder: Send + Sync {
    /// Decode an error response for the operation identified by `config_key`.
    fn decode(&self, config_key: &str, response: &Response) -> Error;
}

/// Default error decoder: builds an HTTP error carrying status and a body
/// snippet. A `Retry-After` header upgrades the error to retryable with the
/// server-requested deadline.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultErrorDecoder;

impl ErrorDecoder for DefaultErrorDecoder {
    fn decode(&self, config_key: &str, response: &Response) -> Error {
        let status = response.status();
        let body = response.body_text();
        let error = Error::Http {
            status,
            config_key: config_key.to_string(),
            body: (!body.is_empty()).then_some(body),
        };

        match response.header("Retry-After").and_then(parse_retry_after) {
            Some(delay) => Error::retryable_after(
                format!("HTTP {status} for {config_key}, server asked to retry"),
                Some(SystemTime::now() + delay),
                error,
            ),
            None => error,
        }
    }
}

/// Parse a `Retry-After` value: delay-seconds or HTTP-date. A date in the
/// past yields a zero delay.
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    if let Ok(seconds) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let date = httpdate::parse_http_date(value).ok()?;
    Some(
        date.duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO),
    )
}
