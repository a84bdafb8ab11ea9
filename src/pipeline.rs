//! The per-operation invocation pipeline.
//!
//! Per call: build the template from arguments, then loop applying the
//! interceptor chain, the target strategy and the transport send, retrying
//! while the retryer permits a failed attempt. The retryer is
//! cloned per invocation and the target is applied per attempt, so retries
//! may reach different endpoints.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;

use crate::args::ArgValue;
use crate::bind::TemplateFactory;
use crate::codec::{Decoder, ErrorDecoder};
use crate::error::{Error, ErrorPropagation};
use crate::interceptor::RequestInterceptor;
use crate::logging::Logger;
use crate::metadata::{MethodMetadata, ReturnType};
use crate::request::{Options, RequestTemplate};
use crate::retry::Retryer;
use crate::target::Target;
use crate::transport::{Response, Transport, MAX_RESPONSE_BUFFER_SIZE};

/// What one invocation produced.
#[derive(Debug)]
pub enum InvocationResult {
    /// A decoded value (null for unit returns and empty 404s).
    Value(Value),
    /// The raw response, requested via [`ReturnType::Response`]. Streaming
    /// bodies transfer close ownership to the caller.
    Response(Response),
}

impl InvocationResult {
    /// The decoded value; raw responses yield null.
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::Value(value) => value,
            Self::Response(_) => Value::Null,
        }
    }

    /// Deserialize the decoded value into `T`.
    ///
    /// # Errors
    /// Mismatched shapes are [`Error::Decode`].
    pub fn json<T: serde::de::DeserializeOwned>(self) -> Result<T, Error> {
        serde_json::from_value(self.into_value()).map_err(|e| Error::Decode {
            status: 0,
            message: format!("result does not match the requested type: {e}"),
        })
    }
}

/// Everything shared by all invocations of one operation. Shared state is
/// immutable; per-call state (retryer, template, options) is cloned out.
pub struct MethodHandler {
    metadata: Arc<MethodMetadata>,
    factory: TemplateFactory,
    target: Arc<dyn Target>,
    transport: Arc<dyn Transport>,
    retryer: Box<dyn Retryer>,
    interceptors: Vec<Arc<dyn RequestInterceptor>>,
    logger: Logger,
    options: Options,
    decoder: Arc<dyn Decoder>,
    error_decoder: Arc<dyn ErrorDecoder>,
    decode404: bool,
    propagation_policy: ErrorPropagation,
}

#[allow(clippy::too_many_arguments)]
impl MethodHandler {
    #[must_use]
    pub(crate) fn new(
        metadata: Arc<MethodMetadata>,
        factory: TemplateFactory,
        target: Arc<dyn Target>,
        transport: Arc<dyn Transport>,
        retryer: Box<dyn Retryer>,
        interceptors: Vec<Arc<dyn RequestInterceptor>>,
        logger: Logger,
        options: Options,
        decoder: Arc<dyn Decoder>,
        error_decoder: Arc<dyn ErrorDecoder>,
        decode404: bool,
        propagation_policy: ErrorPropagation,
    ) -> Self {
        Self {
            metadata,
            factory,
            target,
            transport,
            retryer,
            interceptors,
            logger,
            options,
            decoder,
            error_decoder,
            decode404,
            propagation_policy,
        }
    }

    #[must_use]
    pub fn config_key(&self) -> &str {
        &self.metadata.config_key
    }

    /// Run one invocation to completion or final failure.
    ///
    /// # Errors
    /// The last retryable error once retries exhaust (optionally unwrapped),
    /// or any non-retryable pipeline error.
    pub async fn invoke(&self, argv: &[ArgValue]) -> Result<InvocationResult, Error> {
        let template = self.factory.create(argv)?;
        let options = find_options(argv).unwrap_or_else(|| self.options.clone());
        let mut retryer = self.retryer.clone_boxed();

        loop {
            match self.execute_and_decode(template.clone(), &options).await {
                Ok(result) => return Ok(result),
                Err(error) if error.is_retryable() => {
                    let interval = match retryer.continue_or_propagate(error) {
                        Ok(interval) => interval,
                        Err(exhausted) => {
                            return Err(exhausted.propagate(self.propagation_policy));
                        }
                    };
                    self.logger.retry(self.config_key());
                    crate::transport::sleep(interval).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    async fn execute_and_decode(
        &self,
        mut template: RequestTemplate,
        options: &Options,
    ) -> Result<InvocationResult, Error> {
        for interceptor in &self.interceptors {
            interceptor.apply(&mut template)?;
        }
        let request = self.target.apply(&mut template)?;

        self.logger.request(self.config_key(), &request);

        let start = Instant::now();
        let response = match self.transport.execute(&request, options).await {
            Ok(response) => response,
            Err(error) => {
                self.logger
                    .io_error(self.config_key(), &error, start.elapsed().as_millis());
                if error.is_retryable() {
                    return Err(error);
                }
                return Err(Error::retryable(
                    format!("{} {} failed: {error}", request.method(), request.url()),
                    error,
                ));
            }
        };
        let elapsed = start.elapsed().as_millis();

        if self.metadata.return_type == ReturnType::Response {
            return self.raw_response(response, elapsed).await;
        }

        let status = response.status();
        if (200..300).contains(&status) {
            if self.metadata.return_type == ReturnType::Unit {
                self.logger.response(self.config_key(), &response, elapsed);
                return Ok(InvocationResult::Value(Value::Null));
            }
            let response = self.buffered(response, elapsed).await?;
            return Ok(InvocationResult::Value(
                self.decoder.decode(&response, self.metadata.return_type)?,
            ));
        }

        if status == 404 && self.decode404 && self.metadata.return_type != ReturnType::Unit {
            let response = self.buffered(response, elapsed).await?;
            return Ok(InvocationResult::Value(
                self.decoder.decode(&response, self.metadata.return_type)?,
            ));
        }

        let response = self.buffered(response, elapsed).await?;
        Err(self.error_decoder.decode(self.config_key(), &response))
    }

    /// Raw return: small bodies are buffered so the connection is released;
    /// large or unsized bodies stream and the caller owns the close.
    async fn raw_response(
        &self,
        mut response: Response,
        elapsed: u128,
    ) -> Result<InvocationResult, Error> {
        let buffer = response
            .content_length()
            .is_some_and(|length| length <= MAX_RESPONSE_BUFFER_SIZE);
        if buffer {
            response.buffer().await?;
        }
        self.logger.response(self.config_key(), &response, elapsed);
        Ok(InvocationResult::Response(response))
    }

    async fn buffered(&self, mut response: Response, elapsed: u128) -> Result<Response, Error> {
        response.buffer().await?;
        self.logger.response(self.config_key(), &response, elapsed);
        Ok(response)
    }
}

impl std::fmt::Debug for MethodHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodHandler")
            .field("config_key", &self.metadata.config_key)
            .field("log_level", &self.logger.level())
            .field("decode404", &self.decode404)
            .finish_non_exhaustive()
    }
}

/// A dedicated options argument overrides the operation defaults for this
/// call only.
fn find_options(argv: &[ArgValue]) -> Option<Options> {
    argv.iter().find_map(|arg| match arg {
        ArgValue::Options(options) => Some(options.clone()),
        _ => None,
    })
}
