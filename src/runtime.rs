//! The runtime factory and the service proxies it manufactures.
//!
//! [`Legate::builder`] collects the pluggable pieces (transport, retryer,
//! codecs, interceptors, options), parses the interface contract and yields
//! an immutable [`ServiceProxy`]: a dispatch table with one prebuilt handler
//! per operation. The proxy is cheap to share across tasks; nothing on it
//! mutates after construction.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::args::ArgValue;
use crate::bind::TemplateFactory;
use crate::codec::{
    Decoder, DefaultErrorDecoder, Encoder, ErrorDecoder, FieldQueryMapEncoder, JsonDecoder,
    JsonEncoder, QueryMapEncoder,
};
use crate::contract::{Contract, DefaultContract, DefaultHandler, InterfaceDef, OperationKind};
use crate::error::{Error, ErrorPropagation};
use crate::interceptor::RequestInterceptor;
use crate::logging::{LogLevel, Logger, Redaction};
use crate::pipeline::{InvocationResult, MethodHandler};
use crate::request::Options;
use crate::retry::{ExponentialBackoff, Retryer};
use crate::target::{HardCodedTarget, Target};
use crate::transport::{ReqwestTransport, Transport};

/// Entry point: `Legate::builder()…target(...)`.
#[derive(Debug, Clone, Copy)]
pub struct Legate;

impl Legate {
    #[must_use]
    pub fn builder() -> Builder {
        Builder::new()
    }
}

/// Configuration collected before proxy construction. Builder-style: every
/// setter consumes and returns the builder.
pub struct Builder {
    contract: Arc<dyn Contract>,
    transport: Option<Arc<dyn Transport>>,
    retryer: Box<dyn Retryer>,
    interceptors: Vec<Arc<dyn RequestInterceptor>>,
    encoder: Arc<dyn Encoder>,
    decoder: Arc<dyn Decoder>,
    error_decoder: Arc<dyn ErrorDecoder>,
    query_map_encoder: Arc<dyn QueryMapEncoder>,
    log_level: LogLevel,
    redaction: Redaction,
    options: Options,
    decode404: bool,
    propagation_policy: ErrorPropagation,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            contract: Arc::new(DefaultContract),
            transport: None,
            retryer: Box::new(ExponentialBackoff::default()),
            interceptors: Vec::new(),
            encoder: Arc::new(JsonEncoder),
            decoder: Arc::new(JsonDecoder),
            error_decoder: Arc::new(DefaultErrorDecoder),
            query_map_encoder: Arc::new(FieldQueryMapEncoder),
            log_level: LogLevel::None,
            redaction: Redaction::default(),
            options: Options::default(),
            decode404: false,
            propagation_policy: ErrorPropagation::None,
        }
    }

    #[must_use]
    pub fn contract(mut self, contract: impl Contract + 'static) -> Self {
        self.contract = Arc::new(contract);
        self
    }

    #[must_use]
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    #[must_use]
    pub fn shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn retryer(mut self, retryer: impl Retryer + 'static) -> Self {
        self.retryer = Box::new(retryer);
        self
    }

    #[must_use]
    pub fn interceptor(mut self, interceptor: impl RequestInterceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    #[must_use]
    pub fn encoder(mut self, encoder: impl Encoder + 'static) -> Self {
        self.encoder = Arc::new(encoder);
        self
    }

    #[must_use]
    pub fn decoder(mut self, decoder: impl Decoder + 'static) -> Self {
        self.decoder = Arc::new(decoder);
        self
    }

    #[must_use]
    pub fn error_decoder(mut self, error_decoder: impl ErrorDecoder + 'static) -> Self {
        self.error_decoder = Arc::new(error_decoder);
        self
    }

    #[must_use]
    pub fn query_map_encoder(mut self, encoder: impl QueryMapEncoder + 'static) -> Self {
        self.query_map_encoder = Arc::new(encoder);
        self
    }

    #[must_use]
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    /// Also mask `name` (header or query parameter) in logs, on top of the
    /// default credential-marker policy.
    #[must_use]
    pub fn mask_in_logs(mut self, name: &str) -> Self {
        self.redaction = std::mem::take(&mut self.redaction).mask_name(name);
        self
    }

    #[must_use]
    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Treat 404 as an empty value rather than an error (non-unit returns).
    #[must_use]
    pub fn decode404(mut self, decode404: bool) -> Self {
        self.decode404 = decode404;
        self
    }

    #[must_use]
    pub fn propagation_policy(mut self, policy: ErrorPropagation) -> Self {
        self.propagation_policy = policy;
        self
    }

    /// Build a proxy against a fixed base URL.
    ///
    /// # Errors
    /// Contract violations and transport construction failures.
    pub fn target(self, interface: &InterfaceDef, url: &str) -> Result<ServiceProxy, Error> {
        let target = Arc::new(HardCodedTarget::new(url));
        self.target_strategy(interface, target)
    }

    /// Build a proxy with an explicit target strategy.
    ///
    /// # Errors
    /// Contract violations and transport construction failures.
    pub fn target_strategy(
        self,
        interface: &InterfaceDef,
        target: Arc<dyn Target>,
    ) -> Result<ServiceProxy, Error> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };
        let logger = Logger::new(self.log_level).with_redaction(self.redaction.clone());

        let mut dispatch: IndexMap<String, OperationHandler> = IndexMap::new();
        for metadata in self.contract.parse(interface)? {
            let metadata = Arc::new(metadata);
            let factory = TemplateFactory::new(
                Arc::clone(&metadata),
                Arc::clone(&self.encoder),
                Arc::clone(&self.query_map_encoder),
            );
            let handler = MethodHandler::new(
                Arc::clone(&metadata),
                factory,
                Arc::clone(&target),
                Arc::clone(&transport),
                self.retryer.clone_boxed(),
                self.interceptors.clone(),
                logger.clone(),
                self.options.clone(),
                Arc::clone(&self.decoder),
                Arc::clone(&self.error_decoder),
                self.decode404,
                self.propagation_policy,
            );
            dispatch.insert(
                metadata.config_key.clone(),
                OperationHandler::Http(Arc::new(handler)),
            );
        }

        // default operations bypass the pipeline entirely
        let inherited = interface
            .parent
            .iter()
            .flat_map(|parent| parent.operations.iter());
        for operation in inherited.chain(interface.operations.iter()) {
            if let OperationKind::Default(handler) = &operation.kind {
                dispatch.insert(
                    interface.config_key(operation),
                    OperationHandler::Default(Arc::clone(handler)),
                );
            }
        }

        Ok(ServiceProxy {
            name: target.name().to_string(),
            interface: interface.name.clone(),
            dispatch,
        })
    }
}

impl std::fmt::Debug for Builder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder")
            .field("log_level", &self.log_level)
            .field("decode404", &self.decode404)
            .field("propagation_policy", &self.propagation_policy)
            .finish_non_exhaustive()
    }
}

enum OperationHandler {
    Http(Arc<MethodHandler>),
    Default(DefaultHandler),
}

/// An immutable, concurrently shareable client for one interface. Dispatch
/// is keyed by operation identity; bare operation names resolve when
/// unambiguous.
pub struct ServiceProxy {
    name: String,
    interface: String,
    dispatch: IndexMap<String, OperationHandler>,
}

impl ServiceProxy {
    /// Target name this proxy was built for.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All operation config keys, in declaration order.
    #[must_use]
    pub fn operations(&self) -> Vec<&str> {
        self.dispatch.keys().map(String::as_str).collect()
    }

    fn resolve(&self, operation: &str) -> Result<&OperationHandler, Error> {
        if let Some(handler) = self.dispatch.get(operation) {
            return Ok(handler);
        }
        let prefix = format!("{}#{operation}(", self.interface);
        let mut matches = self
            .dispatch
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix));
        match (matches.next(), matches.next()) {
            (Some((_, handler)), None) => Ok(handler),
            (Some(_), Some(_)) => Err(Error::argument(format!(
                "operation name '{operation}' is ambiguous, use the full config key"
            ))),
            (None, _) => Err(Error::argument(format!(
                "unknown operation '{operation}' on {}",
                self.interface
            ))),
        }
    }

    /// Invoke an operation by config key or unambiguous bare name.
    ///
    /// # Errors
    /// Unknown operations, argument mismatches and pipeline failures.
    pub async fn invoke(
        &self,
        operation: &str,
        argv: &[ArgValue],
    ) -> Result<InvocationResult, Error> {
        match self.resolve(operation)? {
            OperationHandler::Http(handler) => handler.invoke(argv).await,
            OperationHandler::Default(handler) => {
                handler(argv).map(InvocationResult::Value)
            }
        }
    }

    /// Invoke and deserialize the decoded value into `T`.
    ///
    /// # Errors
    /// Same as [`ServiceProxy::invoke`], plus shape mismatches.
    pub async fn invoke_json<T: serde::de::DeserializeOwned>(
        &self,
        operation: &str,
        argv: &[ArgValue],
    ) -> Result<T, Error> {
        self.invoke(operation, argv).await?.json()
    }
}

impl std::fmt::Debug for ServiceProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceProxy")
            .field("name", &self.name)
            .field("interface", &self.interface)
            .field("operations", &self.dispatch.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{OperationDef, ParamDef};
    use serde_json::json;

    fn interface() -> InterfaceDef {
        InterfaceDef::new("GitHub")
            .operation(
                OperationDef::new("contributors", "GET /repos/{owner}/{repo}/contributors")
                    .param(ParamDef::named("owner"))
                    .param(ParamDef::named("repo")),
            )
            .operation(OperationDef::passthrough("api_version", |_| {
                Ok(json!("2022-11-28"))
            }))
    }

    #[test]
    fn proxy_registers_http_and_default_operations() {
        let proxy = Legate::builder()
            .target(&interface(), "https://api.github.com")
            .unwrap();
        let operations = proxy.operations();
        assert!(operations.contains(&"GitHub#contributors(owner,repo)"));
        assert!(operations.contains(&"GitHub#api_version()"));
    }

    #[tokio::test]
    async fn default_operations_bypass_the_pipeline() {
        let proxy = Legate::builder()
            .target(&interface(), "https://api.github.com")
            .unwrap();
        let value = proxy.invoke("api_version", &[]).await.unwrap().into_value();
        assert_eq!(value, json!("2022-11-28"));
    }

    #[tokio::test]
    async fn unknown_operations_are_rejected() {
        let proxy = Legate::builder()
            .target(&interface(), "https://api.github.com")
            .unwrap();
        let err = proxy.invoke("nope", &[]).await.unwrap_err();
        assert!(matches!(err, Error::Argument(_)));
    }

    #[test]
    fn contract_errors_fail_at_construction() {
        let broken = InterfaceDef::new("Api").operation(
            OperationDef::new("create", "POST /users")
                .param(ParamDef::named("x"))
                .param(ParamDef::Body),
        );
        let err = Legate::builder()
            .target(&broken, "https://api.example.com")
            .unwrap_err();
        assert!(matches!(err, Error::Contract(_)));
    }
}
