//! Interface descriptions and the contract parser.
//!
//! An [`InterfaceDef`] is the declarative surface: operations tagged with a
//! request line, headers and a body shape, parameters tagged with their
//! binding. The parser walks a definition and produces one
//! [`MethodMetadata`] record per HTTP operation, enforcing the declaration
//! invariants up front so proxy construction fails fast.
//!
//! The definition model is deliberately plain data, so alternative
//! front-ends (macros, config files) can produce the same records.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::args::{ArgValue, Expander};
use crate::error::Error;
use crate::metadata::{MethodMetadata, ReturnType};
use crate::request::Body;
use crate::template::query::CollectionFormat;

/// Handler for a default (non-HTTP) operation.
pub type DefaultHandler = Arc<dyn Fn(&[ArgValue]) -> Result<Value, Error> + Send + Sync>;

/// How an operation is carried out.
#[derive(Clone, Default)]
pub enum OperationKind {
    /// Declared HTTP endpoint; goes through the pipeline.
    #[default]
    Http,
    /// Carries its own implementation; routed around the pipeline.
    Default(DefaultHandler),
    /// Skipped entirely by the parser.
    Static,
}

impl fmt::Debug for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => f.write_str("Http"),
            Self::Default(_) => f.write_str("Default"),
            Self::Static => f.write_str("Static"),
        }
    }
}

/// One declared parameter.
#[derive(Clone)]
pub enum ParamDef {
    /// Named template variable (`Param`).
    Param {
        name: String,
        expander: Option<Arc<dyn Expander>>,
        encoded: bool,
    },
    /// Map merged into the query string (`QueryMap`).
    QueryMap { encoded: bool },
    /// Map merged into the headers (`HeaderMap`).
    HeaderMap,
    /// Absolute base URI for the call.
    Uri,
    /// Per-call transport options holder.
    Options,
    /// Untagged payload: becomes the request body.
    Body,
}

impl ParamDef {
    /// Named parameter with default stringification.
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self::Param {
            name: name.to_string(),
            expander: None,
            encoded: false,
        }
    }

    /// Named parameter with a custom expander.
    #[must_use]
    pub fn named_with_expander(name: &str, expander: Arc<dyn Expander>) -> Self {
        Self::Param {
            name: name.to_string(),
            expander: Some(expander),
            encoded: false,
        }
    }

    /// Named parameter whose values arrive already percent-encoded.
    #[must_use]
    pub fn named_encoded(name: &str) -> Self {
        Self::Param {
            name: name.to_string(),
            expander: None,
            encoded: true,
        }
    }

    fn signature_token(&self) -> &str {
        match self {
            Self::Param { name, .. } => name,
            Self::QueryMap { .. } => "queryMap",
            Self::HeaderMap => "headerMap",
            Self::Uri => "uri",
            Self::Options => "options",
            Self::Body => "body",
        }
    }
}

impl fmt::Debug for ParamDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Param { name, encoded, .. } => f
                .debug_struct("Param")
                .field("name", name)
                .field("encoded", encoded)
                .finish_non_exhaustive(),
            Self::QueryMap { encoded } => {
                f.debug_struct("QueryMap").field("encoded", encoded).finish()
            }
            Self::HeaderMap => f.write_str("HeaderMap"),
            Self::Uri => f.write_str("Uri"),
            Self::Options => f.write_str("Options"),
            Self::Body => f.write_str("Body"),
        }
    }
}

/// One declared operation.
#[derive(Debug, Clone, Default)]
pub struct OperationDef {
    pub name: String,
    pub kind: OperationKind,
    /// `METHOD /path?query` request line; required for HTTP operations.
    pub request_line: Option<String>,
    pub decode_slash: bool,
    pub collection_format: CollectionFormat,
    /// Operation-scoped `Name: value` header lines.
    pub headers: Vec<String>,
    /// Body template with embedded expressions, or a literal body.
    pub body: Option<String>,
    pub params: Vec<ParamDef>,
    pub return_type: ReturnType,
}

impl OperationDef {
    /// New HTTP operation with the given request line.
    #[must_use]
    pub fn new(name: &str, request_line: &str) -> Self {
        Self {
            name: name.to_string(),
            request_line: Some(request_line.to_string()),
            decode_slash: true,
            ..Self::default()
        }
    }

    /// New default (non-HTTP) operation carrying its own implementation.
    #[must_use]
    pub fn passthrough(
        name: &str,
        handler: impl Fn(&[ArgValue]) -> Result<Value, Error> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            kind: OperationKind::Default(Arc::new(handler)),
            decode_slash: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn param(mut self, param: ParamDef) -> Self {
        self.params.push(param);
        self
    }

    #[must_use]
    pub fn header(mut self, line: &str) -> Self {
        self.headers.push(line.to_string());
        self
    }

    #[must_use]
    pub fn body(mut self, template: &str) -> Self {
        self.body = Some(template.to_string());
        self
    }

    #[must_use]
    pub fn returns(mut self, return_type: ReturnType) -> Self {
        self.return_type = return_type;
        self
    }

    #[must_use]
    pub fn decode_slash(mut self, decode_slash: bool) -> Self {
        self.decode_slash = decode_slash;
        self
    }

    #[must_use]
    pub fn collection_format(mut self, format: CollectionFormat) -> Self {
        self.collection_format = format;
        self
    }
}

/// A declared interface: operations plus interface-scoped headers, with at
/// most one level of inheritance.
#[derive(Debug, Clone, Default)]
pub struct InterfaceDef {
    pub name: String,
    /// Number of generic type parameters; must be zero.
    pub type_params: usize,
    /// Interface-scoped `Name: value` header lines.
    pub headers: Vec<String>,
    pub parent: Option<Box<InterfaceDef>>,
    pub operations: Vec<OperationDef>,
}

impl InterfaceDef {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn header(mut self, line: &str) -> Self {
        self.headers.push(line.to_string());
        self
    }

    #[must_use]
    pub fn parent(mut self, parent: InterfaceDef) -> Self {
        self.parent = Some(Box::new(parent));
        self
    }

    #[must_use]
    pub fn operation(mut self, operation: OperationDef) -> Self {
        self.operations.push(operation);
        self
    }

    /// Stable identity for one operation of this interface.
    #[must_use]
    pub fn config_key(&self, operation: &OperationDef) -> String {
        let params = operation
            .params
            .iter()
            .map(ParamDef::signature_token)
            .collect::<Vec<_>>()
            .join(",");
        format!("{}#{}({params})", self.name, operation.name)
    }
}

fn request_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^([A-Z]+)[ ]*(.*)$").expect("request line pattern"))
}

/// Parses interface definitions into per-operation metadata.
pub trait Contract: Send + Sync {
    /// Walk `interface` and produce one metadata record per HTTP operation.
    ///
    /// # Errors
    /// Any violated declaration invariant is a [`Error::Contract`].
    fn parse(&self, interface: &InterfaceDef) -> Result<Vec<MethodMetadata>, Error>;
}

/// The standard tag dialect described in the module docs.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultContract;

impl Contract for DefaultContract {
    fn parse(&self, interface: &InterfaceDef) -> Result<Vec<MethodMetadata>, Error> {
        if interface.type_params != 0 {
            return Err(Error::contract(format!(
                "parameterized types unsupported: {}",
                interface.name
            )));
        }
        if let Some(parent) = &interface.parent {
            if parent.parent.is_some() {
                return Err(Error::contract(format!(
                    "only single-level inheritance supported: {}",
                    interface.name
                )));
            }
        }

        // interface-scoped headers: parent first, interface overrides by name
        let class_headers = merge_header_lines(
            interface
                .parent
                .as_ref()
                .map(|parent| parent.headers.as_slice())
                .unwrap_or_default(),
            &interface.headers,
        )?;

        let mut seen = HashSet::new();
        let mut result = Vec::new();
        let inherited = interface
            .parent
            .iter()
            .flat_map(|parent| parent.operations.iter());
        for operation in inherited.chain(interface.operations.iter()) {
            match operation.kind {
                OperationKind::Static | OperationKind::Default(_) => continue,
                OperationKind::Http => {}
            }
            let metadata = self.parse_operation(interface, operation, &class_headers)?;
            if !seen.insert(metadata.config_key.clone()) {
                return Err(Error::contract(format!(
                    "overrides unsupported: {}",
                    metadata.config_key
                )));
            }
            result.push(metadata);
        }
        Ok(result)
    }
}

impl DefaultContract {
    fn parse_operation(
        self,
        interface: &InterfaceDef,
        operation: &OperationDef,
        class_headers: &[(String, Vec<String>)],
    ) -> Result<MethodMetadata, Error> {
        let mut data = MethodMetadata {
            config_key: interface.config_key(operation),
            return_type: operation.return_type,
            ..MethodMetadata::default()
        };

        let request_line = operation.request_line.as_deref().ok_or_else(|| {
            Error::contract(format!(
                "operation {} not annotated with an HTTP method (ex. GET, POST)",
                operation.name
            ))
        })?;
        let captures = request_line_pattern()
            .captures(request_line)
            .filter(|captures| !captures[1].is_empty())
            .ok_or_else(|| {
                Error::contract(format!(
                    "request line of {} does not start with an HTTP verb: '{request_line}'",
                    operation.name
                ))
            })?;

        data.template.collection_format(operation.collection_format);
        data.template
            .method_str(&captures[1])
            .map_err(|e| Error::contract(e.to_string()))?;
        data.template
            .uri(&captures[2])
            .map_err(|e| Error::contract(e.to_string()))?;
        data.template
            .decode_slash(operation.decode_slash)
            .map_err(|e| Error::contract(e.to_string()))?;

        // class-level headers first, then method-level overriding by name
        for (name, values) in class_headers {
            data.template
                .header(name, values.clone())
                .map_err(|e| Error::contract(e.to_string()))?;
        }
        for (name, values) in parse_header_lines(&operation.headers)? {
            data.template
                .replace_header(&name, values)
                .map_err(|e| Error::contract(e.to_string()))?;
        }

        if let Some(body) = &operation.body {
            if body.is_empty() {
                return Err(Error::contract(format!(
                    "body tag was empty on operation {}",
                    operation.name
                )));
            }
            if body.contains('{') {
                data.template
                    .body_template(body)
                    .map_err(|e| Error::contract(e.to_string()))?;
            } else {
                data.template.body(Body::bytes(body.clone()));
            }
        }

        self.parse_params(operation, &mut data)?;
        self.check_variable_coverage(operation, &data)?;
        Ok(data)
    }

    fn parse_params(self, operation: &OperationDef, data: &mut MethodMetadata) -> Result<(), Error> {
        for (index, param) in operation.params.iter().enumerate() {
            match param {
                ParamDef::Param {
                    name,
                    expander,
                    encoded,
                } => {
                    if name.is_empty() {
                        return Err(Error::contract(format!(
                            "Param tag was empty on parameter {index} of {}",
                            operation.name
                        )));
                    }
                    data.name_param(name, index);
                    if let Some(expander) = expander {
                        data.index_to_expander.insert(index, Arc::clone(expander));
                    }
                    data.index_to_encoded.insert(index, *encoded);
                    if !data.template.has_request_variable(name) {
                        data.form_params.push(name.clone());
                    }
                }
                ParamDef::QueryMap { encoded } => {
                    if data.query_map_index.is_some() {
                        return Err(Error::contract(
                            "QueryMap tag was present on multiple parameters".to_string(),
                        ));
                    }
                    data.query_map_index = Some(index);
                    data.query_map_encoded = *encoded;
                }
                ParamDef::HeaderMap => {
                    if data.header_map_index.is_some() {
                        return Err(Error::contract(
                            "HeaderMap tag was present on multiple parameters".to_string(),
                        ));
                    }
                    data.header_map_index = Some(index);
                }
                ParamDef::Uri => {
                    data.url_index = Some(index);
                }
                ParamDef::Options => {}
                ParamDef::Body => {
                    if !data.form_params.is_empty() {
                        return Err(Error::contract(
                            "Body parameters cannot be used with form parameters".to_string(),
                        ));
                    }
                    if data.body_index.is_some() {
                        return Err(Error::contract(format!(
                            "operation {} has too many Body parameters",
                            operation.name
                        )));
                    }
                    data.body_index = Some(index);
                }
            }
        }
        // a body parameter declared before form parameters is the same error
        if data.body_index.is_some() && !data.form_params.is_empty() {
            return Err(Error::contract(
                "Body parameters cannot be used with form parameters".to_string(),
            ));
        }
        Ok(())
    }

    /// Every expression in the path and query must be fed by a named
    /// parameter, unless a query-map argument can supply arbitrary names.
    fn check_variable_coverage(
        self,
        operation: &OperationDef,
        data: &MethodMetadata,
    ) -> Result<(), Error> {
        if data.query_map_index.is_some() {
            return Ok(());
        }
        let supplied: HashSet<&str> = data
            .index_to_name
            .values()
            .flatten()
            .map(String::as_str)
            .collect();
        let mut uri_vars: Vec<String> = data
            .template
            .variables()
            .into_iter()
            .filter(|name| !supplied.contains(name.as_str()))
            .collect();
        // header and body expressions may legitimately stay unresolved
        let header_and_body: HashSet<String> = data
            .template
            .headers_ref()
            .values()
            .flatten()
            .flat_map(|value| {
                crate::template::Template::new(
                    value,
                    crate::template::FragmentType::Query,
                    crate::template::OnUnresolved::Keep,
                    false,
                    false,
                )
                .variables()
                .into_iter()
                .map(str::to_string)
                .collect::<Vec<_>>()
            })
            .chain(data.template.body_ref().variables())
            .collect();
        uri_vars.retain(|name| !header_and_body.contains(name));
        if let Some(missing) = uri_vars.first() {
            return Err(Error::contract(format!(
                "expression '{{{missing}}}' in {} is not supplied by any parameter",
                operation.name
            )));
        }
        Ok(())
    }
}

/// Parse `Name: value` lines into ordered (name, values) pairs, grouping
/// repeated names.
fn parse_header_lines(lines: &[String]) -> Result<Vec<(String, Vec<String>)>, Error> {
    let mut parsed: Vec<(String, Vec<String>)> = Vec::new();
    for line in lines {
        let colon = line.find(':').ok_or_else(|| {
            Error::contract(format!("malformed header line '{line}', expected 'Name: value'"))
        })?;
        let name = line[..colon].trim();
        if name.is_empty() {
            return Err(Error::contract(format!(
                "malformed header line '{line}', header name is empty"
            )));
        }
        let value = line[colon + 1..].trim().to_string();
        match parsed
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
        {
            Some((_, values)) => values.push(value),
            None => parsed.push((name.to_string(), vec![value])),
        }
    }
    Ok(parsed)
}

/// Merge class-scoped header lines: `overriding` entries replace `base`
/// entries with the same name, case-insensitively.
fn merge_header_lines(
    base: &[String],
    overriding: &[String],
) -> Result<Vec<(String, Vec<String>)>, Error> {
    let mut merged = parse_header_lines(base)?;
    for (name, values) in parse_header_lines(overriding)? {
        match merged
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = values,
            None => merged.push((name, values)),
        }
    }
    Ok(merged)
}
