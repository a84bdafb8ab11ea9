//! Per-operation metadata, produced once by the contract parser and cached
//! in the dispatch table. A passive record: the template builder and the
//! method handler read it, nothing mutates it after parsing.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::args::Expander;
use crate::request::RequestTemplate;

/// Declared return shape of an operation, driving response handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnType {
    /// No decoded result.
    Unit,
    /// The raw response is handed to the caller.
    Response,
    /// Body decoded as JSON.
    #[default]
    Json,
    /// Body returned as text.
    Text,
    /// Like `Json`, but a 404 may produce an empty value under `decode404`.
    Optional,
}

/// Everything the pipeline needs to know about one declared operation.
#[derive(Clone, Default)]
pub struct MethodMetadata {
    /// Stable identity: `Interface#operation(param,...)`.
    pub config_key: String,
    pub return_type: ReturnType,
    /// Seed template; cloned per invocation.
    pub template: RequestTemplate,
    /// Index of the argument carrying the absolute base URI.
    pub url_index: Option<usize>,
    /// Index of the argument providing the body.
    pub body_index: Option<usize>,
    /// Index of the header-map argument.
    pub header_map_index: Option<usize>,
    /// Index of the query-map argument.
    pub query_map_index: Option<usize>,
    /// Whether query-map values arrive already percent-encoded.
    pub query_map_encoded: bool,
    /// Names participating in form encoding.
    pub form_params: Vec<String>,
    /// Argument index to the template variable names it supplies.
    pub index_to_name: IndexMap<usize, Vec<String>>,
    /// Argument index to its custom stringifier.
    pub index_to_expander: HashMap<usize, Arc<dyn Expander>>,
    /// Argument index to whether its values are already encoded.
    pub index_to_encoded: HashMap<usize, bool>,
}

impl MethodMetadata {
    /// Register `name` as supplied by the argument at `index`; one argument
    /// may feed multiple expressions.
    pub fn name_param(&mut self, name: &str, index: usize) {
        self.index_to_name
            .entry(index)
            .or_default()
            .push(name.to_string());
    }
}

impl fmt::Debug for MethodMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodMetadata")
            .field("config_key", &self.config_key)
            .field("return_type", &self.return_type)
            .field("url_index", &self.url_index)
            .field("body_index", &self.body_index)
            .field("header_map_index", &self.header_map_index)
            .field("query_map_index", &self.query_map_index)
            .field("form_params", &self.form_params)
            .field("index_to_name", &self.index_to_name)
            .finish_non_exhaustive()
    }
}
