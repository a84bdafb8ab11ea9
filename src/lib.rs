//! Declarative HTTP client runtime.
//!
//! Describe an interface, each operation tagged with its method, URI
//! template, headers and body shape, and the runtime manufactures a
//! callable proxy. Each invocation builds a request from the argument
//! vector, runs the interceptor chain, resolves a target, sends through the
//! transport, retries per policy and decodes the response.
//!
//! ```no_run
//! use legate::{ArgValue, InterfaceDef, Legate, OperationDef, ParamDef};
//!
//! # async fn run() -> Result<(), legate::Error> {
//! let github = InterfaceDef::new("GitHub").operation(
//!     OperationDef::new("contributors", "GET /repos/{owner}/{repo}/contributors")
//!         .param(ParamDef::named("owner"))
//!         .param(ParamDef::named("repo")),
//! );
//!
//! let proxy = Legate::builder().target(&github, "https://api.github.com")?;
//! let contributors = proxy
//!     .invoke("contributors", &[ArgValue::from("rust-lang"), ArgValue::from("regex")])
//!     .await?
//!     .into_value();
//! # Ok(())
//! # }
//! ```

pub mod args;
pub mod bind;
pub mod codec;
pub mod contract;
pub mod error;
pub mod fallback;
pub mod interceptor;
pub mod lb;
pub mod logging;
pub mod metadata;
pub mod pipeline;
pub mod request;
pub mod retry;
pub mod runtime;
pub mod target;
pub mod template;
pub mod transport;

pub use args::{ArgValue, Expander, ToStringExpander};
pub use codec::{
    Decoder, DefaultErrorDecoder, Encoder, ErrorDecoder, FieldQueryMapEncoder, FormEncoder,
    JsonDecoder, JsonEncoder, QueryMapEncoder, StringDecoder,
};
pub use contract::{Contract, DefaultContract, InterfaceDef, OperationDef, ParamDef};
pub use error::{Error, ErrorPropagation, RetryableError};
pub use fallback::{CommandProxy, Fallback, FallbackFactory};
pub use interceptor::{BasicAuthInterceptor, HeaderInterceptor, RequestInterceptor};
pub use logging::{LogLevel, Logger, Redaction};
pub use metadata::{MethodMetadata, ReturnType};
pub use pipeline::InvocationResult;
pub use request::{Body, Options, Request, RequestTemplate};
pub use retry::{ExponentialBackoff, NeverRetry, Retryer};
pub use runtime::{Builder, Legate, ServiceProxy};
pub use target::{
    EmptyTarget, EndpointPicker, HardCodedTarget, LoadBalancedTarget, RoundRobin, Target,
};
pub use template::query::CollectionFormat;
pub use transport::{ReqwestTransport, Response, ResponseBody, Transport};
