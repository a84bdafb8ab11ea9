//! Template builders: argument vector in, resolved request template out.
//!
//! The contract parser picks one of three variants per operation: plain
//! (path/query/header bindings only), form-encoded (named parameters outside
//! the template become a form body) or body-encoded (a designated body
//! argument is serialized into the body). All three share the binding
//! algorithm; they differ only in what happens right before resolution.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::args::ArgValue;
use crate::codec::{Encoder, QueryMapEncoder};
use crate::error::Error;
use crate::metadata::MethodMetadata;
use crate::request::RequestTemplate;
use crate::template::encoding::{self, FragmentType};

/// Which variant of the shared algorithm an operation uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuilderKind {
    Plain,
    FormEncoded,
    BodyEncoded,
}

/// Builds one operation's request template from an argument vector.
pub struct TemplateFactory {
    metadata: Arc<MethodMetadata>,
    kind: BuilderKind,
    encoder: Arc<dyn Encoder>,
    query_map_encoder: Arc<dyn QueryMapEncoder>,
}

impl TemplateFactory {
    #[must_use]
    pub fn new(
        metadata: Arc<MethodMetadata>,
        encoder: Arc<dyn Encoder>,
        query_map_encoder: Arc<dyn QueryMapEncoder>,
    ) -> Self {
        let kind = if !metadata.form_params.is_empty()
            && !matches!(metadata.template.body_ref(), crate::request::Body::Template(_))
        {
            BuilderKind::FormEncoded
        } else if metadata.body_index.is_some() {
            BuilderKind::BodyEncoded
        } else {
            BuilderKind::Plain
        };
        Self {
            metadata,
            kind,
            encoder,
            query_map_encoder,
        }
    }

    /// Instantiate the operation's template for one call.
    ///
    /// # Errors
    /// Missing or mistyped arguments are [`Error::Argument`].
    pub fn create(&self, argv: &[ArgValue]) -> Result<RequestTemplate, Error> {
        let metadata = &self.metadata;
        let mut template = metadata.template.clone();

        if let Some(url_index) = metadata.url_index {
            let target = match argv.get(url_index) {
                Some(ArgValue::Uri(uri)) => uri.clone(),
                Some(ArgValue::Value(Value::String(uri))) => uri.clone(),
                _ => {
                    return Err(Error::argument(format!(
                        "URI parameter {url_index} was missing or not a string"
                    )));
                }
            };
            template.target(&target)?;
        }

        let vars = self.build_vars(argv)?;

        let mut template = match self.kind {
            BuilderKind::Plain => template.resolve(&vars)?,
            BuilderKind::FormEncoded => {
                let mut form = serde_json::Map::new();
                for name in &metadata.form_params {
                    if let Some(value) = vars.get(name) {
                        form.insert(name.clone(), value.clone());
                    }
                }
                self.encoder.encode(&Value::Object(form), &mut template)?;
                template.resolve(&vars)?
            }
            BuilderKind::BodyEncoded => {
                let body_index = metadata.body_index.unwrap_or_default();
                let body = argv
                    .get(body_index)
                    .and_then(ArgValue::as_value)
                    .filter(|value| !value.is_null())
                    .ok_or_else(|| {
                        Error::argument(format!("body parameter {body_index} was null"))
                    })?;
                self.encoder.encode(body, &mut template)?;
                template.resolve(&vars)?
            }
        };

        // map arguments merge after resolution so their entries win over
        // declared defaults
        if let Some(query_map_index) = metadata.query_map_index {
            let value = argv
                .get(query_map_index)
                .and_then(ArgValue::as_value)
                .ok_or_else(|| {
                    Error::argument(format!("query map parameter {query_map_index} was missing"))
                })?;
            if !value.is_null() {
                let map = self.query_map_encoder.encode(value)?;
                self.merge_query_map(&map, &mut template);
            }
        }

        if let Some(header_map_index) = metadata.header_map_index {
            let value = argv
                .get(header_map_index)
                .and_then(ArgValue::as_value)
                .ok_or_else(|| {
                    Error::argument(format!("header map parameter {header_map_index} was missing"))
                })?;
            if let Value::Object(map) = value {
                for (name, entry) in map {
                    let values = collect_values(entry);
                    template.header(name, values)?;
                }
            } else if !value.is_null() {
                return Err(Error::argument(
                    "header map parameter must be a map with string keys",
                ));
            }
        }

        Ok(template)
    }

    /// Bind declared names to (expanded) argument values. Null arguments are
    /// skipped so their expressions stay unresolved.
    fn build_vars(&self, argv: &[ArgValue]) -> Result<HashMap<String, Value>, Error> {
        let metadata = &self.metadata;
        let mut vars = HashMap::new();
        for (&index, names) in &metadata.index_to_name {
            let Some(arg) = argv.get(index) else {
                return Err(Error::argument(format!(
                    "expected argument at index {index} for {}",
                    metadata.config_key
                )));
            };
            let Some(value) = arg.as_value() else {
                return Err(Error::argument(format!(
                    "argument {index} of {} cannot supply a template variable",
                    metadata.config_key
                )));
            };
            if value.is_null() {
                continue;
            }
            let value = match metadata.index_to_expander.get(&index) {
                Some(expander) => match value {
                    Value::Array(items) => Value::Array(
                        items
                            .iter()
                            .map(|item| Value::String(expander.expand(item)))
                            .collect(),
                    ),
                    other => Value::String(expander.expand(other)),
                },
                None => value.clone(),
            };
            // a parameter not declared pre-encoded carries literal percent
            // signs; protect them so expansion does not treat them as
            // existing triplets
            let value = if metadata.index_to_encoded.get(&index).copied().unwrap_or(false) {
                value
            } else {
                protect_literal_percents(&value)
            };
            for name in names {
                vars.insert(name.clone(), value.clone());
            }
        }
        Ok(vars)
    }

    fn merge_query_map(&self, map: &serde_json::Map<String, Value>, template: &mut RequestTemplate) {
        let encoded = self.metadata.query_map_encoded;
        for (name, entry) in map {
            let values: Vec<String> = collect_values(entry)
                .into_iter()
                .map(|value| {
                    if encoded {
                        value
                    } else {
                        encoding::encode(&value.replace('%', "%25"), FragmentType::Query)
                    }
                })
                .collect();
            let name = if encoded {
                name.clone()
            } else {
                encoding::encode(name, FragmentType::Query)
            };
            template.query(&name, values);
        }
    }
}

/// Escape literal `%` in values that were not declared pre-encoded, so the
/// percent-triplet passthrough cannot misread them.
fn protect_literal_percents(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.replace('%', "%25")),
        Value::Array(items) => Value::Array(items.iter().map(protect_literal_percents).collect()),
        other => other.clone(),
    }
}

/// Flatten a map entry into its value strings; iterables become repeated
/// values, null contributes nothing.
fn collect_values(entry: &Value) -> Vec<String> {
    match entry {
        Value::Null => Vec::new(),
        Value::Array(items) => items
            .iter()
            .filter(|item| !item.is_null())
            .map(crate::template::stringify)
            .collect(),
        other => vec![crate::template::stringify(other)],
    }
}

impl std::fmt::Debug for TemplateFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateFactory")
            .field("config_key", &self.metadata.config_key)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::Expander;
    use crate::codec::{FieldQueryMapEncoder, JsonEncoder};
    use crate::contract::{Contract, DefaultContract, InterfaceDef, OperationDef, ParamDef};
    use serde_json::json;

    fn factory_for(interface: InterfaceDef) -> TemplateFactory {
        let metadata = DefaultContract
            .parse(&interface)
            .unwrap()
            .into_iter()
            .next()
            .unwrap();
        TemplateFactory::new(
            Arc::new(metadata),
            Arc::new(JsonEncoder),
            Arc::new(FieldQueryMapEncoder),
        )
    }

    #[test]
    fn plain_builder_binds_path_variables() {
        let factory = factory_for(InterfaceDef::new("GitHub").operation(
            OperationDef::new("contributors", "GET /repos/{owner}/{repo}/contributors")
                .param(ParamDef::named("owner"))
                .param(ParamDef::named("repo")),
        ));
        let template = factory
            .create(&[ArgValue::from("rust-lang"), ArgValue::from("regex")])
            .unwrap();
        let request = template.request().unwrap();
        assert_eq!(request.url(), "/repos/rust-lang/regex/contributors");
    }

    #[test]
    fn one_argument_can_feed_multiple_expressions() {
        let interface = InterfaceDef::new("Api").operation(
            OperationDef::new("mirror", "GET /{name}/copies/{name}").param(ParamDef::named("name")),
        );
        let factory = factory_for(interface);
        let template = factory.create(&[ArgValue::from("octo")]).unwrap();
        assert_eq!(template.request().unwrap().url(), "/octo/copies/octo");
    }

    #[test]
    fn uri_argument_replaces_target() {
        let interface = InterfaceDef::new("Api")
            .operation(OperationDef::new("ping", "GET /ping").param(ParamDef::Uri));
        let factory = factory_for(interface);
        let template = factory
            .create(&[ArgValue::Uri("https://host.example".into())])
            .unwrap();
        assert_eq!(template.request().unwrap().url(), "https://host.example/ping");
    }

    #[test]
    fn body_encoded_builder_serializes_body_argument() {
        let interface = InterfaceDef::new("Api")
            .operation(OperationDef::new("create", "POST /users").param(ParamDef::Body));
        let factory = factory_for(interface);
        let template = factory
            .create(&[ArgValue::from(json!({"login": "denden"}))])
            .unwrap();
        let request = template.request().unwrap();
        assert_eq!(request.header("Content-Type"), Some("application/json"));
        assert_eq!(
            String::from_utf8_lossy(request.body()),
            "{\"login\":\"denden\"}"
        );
    }

    #[test]
    fn null_body_argument_is_rejected() {
        let interface = InterfaceDef::new("Api")
            .operation(OperationDef::new("create", "POST /users").param(ParamDef::Body));
        let factory = factory_for(interface);
        let err = factory
            .create(&[ArgValue::from(Value::Null)])
            .unwrap_err();
        assert!(matches!(err, Error::Argument(_)));
    }

    #[test]
    fn form_encoded_builder_uses_form_params() {
        let interface = InterfaceDef::new("Api").operation(
            OperationDef::new("login", "POST /login")
                .param(ParamDef::named("user"))
                .param(ParamDef::named("password")),
        );
        let metadata = DefaultContract
            .parse(&interface)
            .unwrap()
            .into_iter()
            .next()
            .unwrap();
        let factory = TemplateFactory::new(
            Arc::new(metadata),
            Arc::new(crate::codec::FormEncoder),
            Arc::new(FieldQueryMapEncoder),
        );
        let template = factory
            .create(&[ArgValue::from("denden"), ArgValue::from("hunter2")])
            .unwrap();
        let request = template.request().unwrap();
        assert_eq!(
            String::from_utf8_lossy(request.body()),
            "user=denden&password=hunter2"
        );
        assert_eq!(
            request.header("Content-Type"),
            Some("application/x-www-form-urlencoded")
        );
    }

    #[test]
    fn query_map_merges_after_resolution() {
        let interface = InterfaceDef::new("Api").operation(
            OperationDef::new("search", "GET /search?sort=stars")
                .param(ParamDef::QueryMap { encoded: false }),
        );
        let factory = factory_for(interface);
        let template = factory
            .create(&[ArgValue::from(json!({"q": "http client", "page": 2}))])
            .unwrap();
        let request = template.request().unwrap();
        assert_eq!(request.url(), "/search?sort=stars&q=http%20client&page=2");
    }

    #[test]
    fn encoded_query_map_values_pass_through() {
        let interface = InterfaceDef::new("Api").operation(
            OperationDef::new("search", "GET /search")
                .param(ParamDef::QueryMap { encoded: true }),
        );
        let factory = factory_for(interface);
        let template = factory
            .create(&[ArgValue::from(json!({"q": "a%20b"}))])
            .unwrap();
        assert_eq!(template.request().unwrap().url(), "/search?q=a%20b");
    }

    #[test]
    fn header_map_merges_with_repeats() {
        let interface = InterfaceDef::new("Api").operation(
            OperationDef::new("fetch", "GET /fetch").param(ParamDef::HeaderMap),
        );
        let factory = factory_for(interface);
        let template = factory
            .create(&[ArgValue::from(json!({"X-Tag": ["a", "b"], "X-One": "1"}))])
            .unwrap();
        let request = template.request().unwrap();
        let tags: Vec<&str> = request
            .headers()
            .iter()
            .filter(|(name, _)| name == "X-Tag")
            .map(|(_, value)| value.as_str())
            .collect();
        assert_eq!(tags, vec!["a", "b"]);
        assert_eq!(request.header("X-One"), Some("1"));
    }

    #[test]
    fn null_arguments_leave_expressions_unresolved() {
        let interface = InterfaceDef::new("Api").operation(
            OperationDef::new("search", "GET /x?q={q}&r={r}")
                .param(ParamDef::named("q"))
                .param(ParamDef::named("r")),
        );
        let factory = factory_for(interface);
        let template = factory
            .create(&[ArgValue::from(json!(1)), ArgValue::from(Value::Null)])
            .unwrap();
        assert_eq!(template.request().unwrap().url(), "/x?q=1");
    }

    #[test]
    fn unencoded_percent_signs_stay_literal() {
        let interface = InterfaceDef::new("Api").operation(
            OperationDef::new("discount", "GET /sales?off={off}").param(ParamDef::named("off")),
        );
        let factory = factory_for(interface);
        let template = factory.create(&[ArgValue::from("20%")]).unwrap();
        assert_eq!(template.request().unwrap().url(), "/sales?off=20%25");
    }

    #[test]
    fn pre_encoded_params_pass_through() {
        let interface = InterfaceDef::new("Api").operation(
            OperationDef::new("search", "GET /search?q={q}").param(ParamDef::named_encoded("q")),
        );
        let factory = factory_for(interface);
        let template = factory.create(&[ArgValue::from("a%20b")]).unwrap();
        assert_eq!(template.request().unwrap().url(), "/search?q=a%20b");
    }

    #[test]
    fn custom_expander_applies_per_element() {
        #[derive(Debug)]
        struct Upper;
        impl Expander for Upper {
            fn expand(&self, value: &Value) -> String {
                crate::template::stringify(value).to_uppercase()
            }
        }
        let interface = InterfaceDef::new("Api").operation(
            OperationDef::new("tags", "GET /tags?tag={tags}").param(
                ParamDef::named_with_expander("tags", Arc::new(Upper)),
            ),
        );
        let factory = factory_for(interface);
        let template = factory
            .create(&[ArgValue::from(json!(["a", "b"]))])
            .unwrap();
        assert_eq!(template.request().unwrap().url(), "/tags?tag=A&tag=B");
    }
}
