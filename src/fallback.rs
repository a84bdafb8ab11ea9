//! Circuit-breaker style fallback wrapper.
//!
//! Wraps a [`ServiceProxy`] so that every operation becomes a command: a
//! group key (the target name), a command key (the operation identity), a
//! run block delegating to the pipeline and a fallback block consulting a
//! user-supplied factory. The factory receives the execution error and
//! produces an instance satisfying the same interface; fallback values are
//! materialized to plain values since all supported return shapes are
//! synchronous.

use std::sync::Arc;

use serde_json::Value;

use crate::args::ArgValue;
use crate::error::Error;
use crate::pipeline::InvocationResult;
use crate::runtime::ServiceProxy;

/// An alternative implementation of the interface, consulted on failure.
pub trait Fallback: Send + Sync {
    /// Handle `operation` with the original arguments.
    ///
    /// # Errors
    /// A fallback may itself fail; that error is surfaced to the caller.
    fn invoke(&self, operation: &str, argv: &[ArgValue]) -> Result<Value, Error>;
}

/// Produces a [`Fallback`] from the error that broke the primary call.
pub trait FallbackFactory: Send + Sync {
    fn create(&self, error: &Error) -> Arc<dyn Fallback>;
}

impl<F> FallbackFactory for F
where
    F: Fn(&Error) -> Arc<dyn Fallback> + Send + Sync,
{
    fn create(&self, error: &Error) -> Arc<dyn Fallback> {
        self(error)
    }
}

/// Identifies one command execution for metrics and breaker state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandKey {
    /// Target name shared by all operations of the proxy.
    pub group: String,
    /// Operation identity.
    pub command: String,
}

/// A proxy whose operations run as commands with optional fallbacks.
pub struct CommandProxy {
    inner: Arc<ServiceProxy>,
    fallback_factory: Option<Arc<dyn FallbackFactory>>,
}

impl CommandProxy {
    #[must_use]
    pub fn new(inner: Arc<ServiceProxy>) -> Self {
        Self {
            inner,
            fallback_factory: None,
        }
    }

    #[must_use]
    pub fn with_fallback(mut self, factory: impl FallbackFactory + 'static) -> Self {
        self.fallback_factory = Some(Arc::new(factory));
        self
    }

    /// The command identity for `operation`.
    #[must_use]
    pub fn command_key(&self, operation: &str) -> CommandKey {
        CommandKey {
            group: self.inner.name().to_string(),
            command: operation.to_string(),
        }
    }

    /// Run the operation; on failure, consult the fallback factory.
    ///
    /// # Errors
    /// The primary error when no fallback is configured, or the fallback's
    /// own error.
    pub async fn invoke(
        &self,
        operation: &str,
        argv: &[ArgValue],
    ) -> Result<InvocationResult, Error> {
        match self.inner.invoke(operation, argv).await {
            Ok(result) => Ok(result),
            Err(error) => match &self.fallback_factory {
                Some(factory) => factory
                    .create(&error)
                    .invoke(operation, argv)
                    .map(InvocationResult::Value),
                None => Err(error),
            },
        }
    }
}

impl std::fmt::Debug for CommandProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandProxy")
            .field("inner", &self.inner)
            .field("has_fallback", &self.fallback_factory.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{InterfaceDef, OperationDef};
    use crate::runtime::Legate;
    use serde_json::json;
    use std::sync::Mutex;

    struct StaticFallback(Value);

    impl Fallback for StaticFallback {
        fn invoke(&self, _operation: &str, _argv: &[ArgValue]) -> Result<Value, Error> {
            Ok(self.0.clone())
        }
    }

    fn failing_interface() -> InterfaceDef {
        InterfaceDef::new("Api").operation(OperationDef::passthrough("always_fails", |_| {
            Err(Error::Read("wire cut".into()))
        }))
    }

    #[tokio::test]
    async fn fallback_receives_the_execution_error() {
        let proxy = Legate::builder()
            .target(&failing_interface(), "https://api.example.com")
            .unwrap();
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = Arc::clone(&seen);

        let wrapped = CommandProxy::new(Arc::new(proxy)).with_fallback(
            move |error: &Error| -> Arc<dyn Fallback> {
                *seen_clone.lock().unwrap() = Some(error.to_string());
                Arc::new(StaticFallback(json!("fallback value")))
            },
        );

        let value = wrapped
            .invoke("always_fails", &[])
            .await
            .unwrap()
            .into_value();
        assert_eq!(value, json!("fallback value"));
        assert!(seen.lock().unwrap().as_deref().unwrap().contains("wire cut"));
    }

    #[tokio::test]
    async fn without_fallback_the_error_surfaces() {
        let proxy = Legate::builder()
            .target(&failing_interface(), "https://api.example.com")
            .unwrap();
        let wrapped = CommandProxy::new(Arc::new(proxy));
        assert!(wrapped.invoke("always_fails", &[]).await.is_err());
    }

    #[test]
    fn command_key_combines_group_and_operation() {
        let proxy = Legate::builder()
            .target(&failing_interface(), "https://api.example.com")
            .unwrap();
        let wrapped = CommandProxy::new(Arc::new(proxy));
        let key = wrapped.command_key("Api#always_fails()");
        assert_eq!(key.group, "https://api.example.com");
        assert_eq!(key.command, "Api#always_fails()");
    }
}
