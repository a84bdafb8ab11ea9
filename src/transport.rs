//! The transport seam and its reqwest-backed default.
//!
//! The pipeline hands a concrete [`Request`] plus per-attempt [`Options`] to
//! a [`Transport`] and gets back a [`Response`] whose body is either fully
//! buffered or still streaming. Transport failures are `Error::Transport`;
//! the pipeline decides what is retryable.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{Stream, StreamExt, TryStreamExt};
use tokio::sync::Mutex;

use crate::error::Error;
use crate::request::{Options, Request};

/// Responses at or under this size are buffered before being handed to a
/// caller that asked for the raw response.
pub const MAX_RESPONSE_BUFFER_SIZE: u64 = 8192;

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, Error>> + Send>>;

/// Response body in one of its two lifecycles.
pub enum ResponseBody {
    Buffered(Bytes),
    /// Still attached to the connection; whoever holds it owns the close.
    Streaming {
        stream: ByteStream,
        length: Option<u64>,
    },
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buffered(data) => f.debug_tuple("Buffered").field(&data.len()).finish(),
            Self::Streaming { length, .. } => {
                f.debug_struct("Streaming").field("length", length).finish()
            }
        }
    }
}

/// A received HTTP response.
#[derive(Debug)]
pub struct Response {
    status: u16,
    headers: Vec<(String, String)>,
    body: ResponseBody,
}

impl Response {
    #[must_use]
    pub fn new(status: u16, headers: Vec<(String, String)>, body: ResponseBody) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Buffered response from literal parts, mostly for tests and fallbacks.
    #[must_use]
    pub fn buffered(status: u16, headers: Vec<(String, String)>, body: impl Into<Bytes>) -> Self {
        Self::new(status, headers, ResponseBody::Buffered(body.into()))
    }

    #[must_use]
    pub fn status(&self) -> u16 {
        self.status
    }

    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// First value of `name`, compared case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Body length when known up front.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        match &self.body {
            ResponseBody::Buffered(data) => Some(data.len() as u64),
            ResponseBody::Streaming { length, .. } => *length,
        }
    }

    #[must_use]
    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    /// Take ownership of the body, leaving an empty buffer behind.
    #[must_use]
    pub fn into_body(self) -> ResponseBody {
        self.body
    }

    /// Drain the body into memory. Read failures are `Error::Read` and are
    /// never retried.
    pub async fn buffer(&mut self) -> Result<&Bytes, Error> {
        if let ResponseBody::Streaming { stream, .. } = &mut self.body {
            let mut collected = Vec::new();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| Error::Read(e.to_string()))?;
                collected.extend_from_slice(&chunk);
            }
            self.body = ResponseBody::Buffered(Bytes::from(collected));
        }
        match &self.body {
            ResponseBody::Buffered(data) => Ok(data),
            ResponseBody::Streaming { .. } => unreachable!("body was just buffered"),
        }
    }

    /// Buffered body bytes; empty until [`Response::buffer`] has run.
    #[must_use]
    pub fn body_bytes(&self) -> Bytes {
        match &self.body {
            ResponseBody::Buffered(data) => data.clone(),
            ResponseBody::Streaming { .. } => Bytes::new(),
        }
    }

    /// Body as UTF-8 text; empty until buffered.
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body_bytes()).into_owned()
    }
}

/// Sends one concrete request. Implementations must be safe to share across
/// concurrently running invocations.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute `request` with the per-attempt `options`.
    ///
    /// # Errors
    /// I/O level failures surface as [`Error::Transport`].
    async fn execute(&self, request: &Request, options: &Options) -> Result<Response, Error>;
}

/// Default transport backed by a shared [`reqwest::Client`].
///
/// The client is rebuilt when per-call options differ from the ones it was
/// built with, since connect timeout and redirect policy live on the client.
pub struct ReqwestTransport {
    client: Mutex<(Options, reqwest::Client)>,
}

impl ReqwestTransport {
    /// Build a transport for the default [`Options`].
    ///
    /// # Errors
    /// Fails when the TLS backend cannot be initialized.
    pub fn new() -> Result<Self, Error> {
        let options = Options::default();
        let client = Self::build_client(&options)?;
        Ok(Self {
            client: Mutex::new((options, client)),
        })
    }

    fn build_client(options: &Options) -> Result<reqwest::Client, Error> {
        let redirect = if options.follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        };
        reqwest::Client::builder()
            .connect_timeout(options.connect_timeout)
            .redirect(redirect)
            .build()
            .map_err(|e| Error::transport(format!("failed to build HTTP client: {e}"), Some(Box::new(e))))
    }

    async fn client_for(&self, options: &Options) -> Result<reqwest::Client, Error> {
        let mut guard = self.client.lock().await;
        if guard.0 != *options {
            let client = Self::build_client(options)?;
            *guard = (options.clone(), client);
        }
        Ok(guard.1.clone())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: &Request, options: &Options) -> Result<Response, Error> {
        let client = self.client_for(options).await?;

        let mut builder = client
            .request(request.method().clone(), request.url())
            .timeout(options.read_timeout);
        for (name, value) in request.headers() {
            builder = builder.header(name, value);
        }
        if !request.body().is_empty() {
            builder = builder.body(request.body().clone());
        }

        let response = builder.send().await.map_err(|e| {
            let message = if e.is_timeout() {
                format!("request timed out: {e}")
            } else if e.is_connect() {
                format!("connection failed: {e}")
            } else {
                format!("request failed: {e}")
            };
            Error::transport(message, Some(Box::new(e)))
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let length = response.content_length();
        let stream = response
            .bytes_stream()
            .map_err(|e| Error::Read(format!("failed to read response body: {e}")))
            .boxed();

        Ok(Response::new(
            status,
            headers,
            ResponseBody::Streaming { stream, length },
        ))
    }
}

impl std::fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestTransport").finish_non_exhaustive()
    }
}

/// Sleep helper honoring tokio timers; isolated so tests can observe it.
pub(crate) async fn sleep(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    #[tokio::test]
    async fn buffer_collects_stream_chunks() {
        let chunks: Vec<Result<Bytes, Error>> =
            vec![Ok(Bytes::from("hello ")), Ok(Bytes::from("world"))];
        let mut response = Response::new(
            200,
            vec![],
            ResponseBody::Streaming {
                stream: stream::iter(chunks).boxed(),
                length: Some(11),
            },
        );
        let body = response.buffer().await.unwrap();
        assert_eq!(body, &Bytes::from("hello world"));
        assert_eq!(response.content_length(), Some(11));
    }

    #[tokio::test]
    async fn read_failures_are_read_errors() {
        let chunks: Vec<Result<Bytes, Error>> = vec![
            Ok(Bytes::from("partial")),
            Err(Error::Read("connection reset".into())),
        ];
        let mut response = Response::new(
            200,
            vec![],
            ResponseBody::Streaming {
                stream: stream::iter(chunks).boxed(),
                length: None,
            },
        );
        let err = response.buffer().await.unwrap_err();
        assert!(matches!(err, Error::Read(_)));
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let response = Response::buffered(
            200,
            vec![("Retry-After".to_string(), "2".to_string())],
            "",
        );
        assert_eq!(response.header("retry-after"), Some("2"));
        assert_eq!(response.header("RETRY-AFTER"), Some("2"));
    }
}
