//! Request templates and resolved requests.
//!
//! A [`RequestTemplate`] is the partially-resolved plan for one HTTP request:
//! a path template, ordered query templates, case-insensitive header
//! templates and a body. It is cloned per invocation, mutated by the template
//! builder and the interceptor chain, resolved against a variable map and
//! finally frozen into a concrete [`Request`].

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use http::Method;
use indexmap::IndexMap;
use serde_json::Value;
use url::Url;

use crate::error::Error;
use crate::template::encoding::{self, FragmentType};
use crate::template::header::HeaderTemplate;
use crate::template::query::{CollectionFormat, QueryTemplate};
use crate::template::{OnUnresolved, Template};

/// Per-call transport options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub follow_redirects: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(60),
            follow_redirects: true,
        }
    }
}

impl Options {
    #[must_use]
    pub fn new(connect_timeout: Duration, read_timeout: Duration, follow_redirects: bool) -> Self {
        Self {
            connect_timeout,
            read_timeout,
            follow_redirects,
        }
    }
}

/// Request body: absent, literal bytes, or a template with expressions.
#[derive(Debug, Clone, Default)]
pub enum Body {
    #[default]
    Empty,
    Bytes(Bytes),
    /// Unresolved body template. Literal `{`/`}` may be written as `%7B`/`%7D`;
    /// the expanded result is percent-decoded.
    Template(String),
}

impl Body {
    #[must_use]
    pub fn bytes(data: impl Into<Bytes>) -> Self {
        Self::Bytes(data.into())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Empty | Self::Template(_) => 0,
            Self::Bytes(data) => data.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Bytes(data) => data.is_empty(),
            Self::Template(_) => false,
        }
    }

    /// Template variables referenced by the body, if it is a template.
    #[must_use]
    pub fn variables(&self) -> Vec<String> {
        match self {
            Self::Template(text) => {
                Template::new(text, FragmentType::Query, OnUnresolved::Keep, false, false)
                    .variables()
                    .into_iter()
                    .map(str::to_string)
                    .collect()
            }
            _ => Vec::new(),
        }
    }

    fn expand(&self, vars: &HashMap<String, Value>) -> Result<Self, Error> {
        match self {
            Self::Template(text) => {
                let template =
                    Template::new(text, FragmentType::Query, OnUnresolved::Keep, false, false);
                let expanded = encoding::decode(&template.expand(vars)?);
                Ok(Self::Bytes(Bytes::from(expanded)))
            }
            other => Ok(other.clone()),
        }
    }
}

/// A concrete, immutable HTTP request produced by a resolved template.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: String,
    headers: Vec<(String, String)>,
    body: Bytes,
}

impl Request {
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Ordered header pairs; repeated names produce repeated entries.
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

    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

impl std::fmt::Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} {} HTTP/1.1", self.method, self.url)?;
        for (name, value) in &self.headers {
            writeln!(f, "{name}: {value}")?;
        }
        if !self.body.is_empty() {
            writeln!(f)?;
            writeln!(f, "{}", String::from_utf8_lossy(&self.body))?;
        }
        Ok(())
    }
}

/// First `?` that is not immediately preceded by `{`, i.e. a real query
/// string separator rather than part of an expression.
fn find_query_split(uri: &str) -> Option<usize> {
    let bytes = uri.as_bytes();
    bytes.iter().enumerate().position(|(idx, &byte)| {
        byte == b'?' && (idx == 0 || bytes[idx - 1] != b'{')
    })
}

/// Mutable request plan; frozen by [`RequestTemplate::resolve`].
#[derive(Debug, Clone, Default)]
pub struct RequestTemplate {
    target: Option<String>,
    fragment: Option<String>,
    uri: Option<Template>,
    raw_uri: Option<String>,
    method: Option<Method>,
    /// Keyed by declared name, insertion-ordered.
    queries: IndexMap<String, QueryTemplate>,
    /// Keyed by lowercased name, insertion-ordered; display case lives in the
    /// header template itself.
    headers: IndexMap<String, HeaderTemplate>,
    body: Body,
    decode_slash: bool,
    collection_format: CollectionFormat,
    resolved: bool,
}

impl RequestTemplate {
    #[must_use]
    pub fn new() -> Self {
        Self {
            decode_slash: true,
            ..Self::default()
        }
    }

    fn ensure_unresolved(&self, what: &str) -> Result<(), Error> {
        if self.resolved {
            return Err(Error::State(format!(
                "cannot change {what} after the template has been resolved"
            )));
        }
        Ok(())
    }

    /// Set the HTTP method.
    pub fn method(&mut self, method: Method) -> &mut Self {
        self.method = Some(method);
        self
    }

    /// Set the HTTP method from its textual name.
    pub fn method_str(&mut self, method: &str) -> Result<&mut Self, Error> {
        let parsed = method
            .parse::<Method>()
            .map_err(|_| Error::config(format!("invalid HTTP method: {method}")))?;
        Ok(self.method(parsed))
    }

    #[must_use]
    pub fn method_ref(&self) -> Option<&Method> {
        self.method.as_ref()
    }

    /// Set the relative URI, replacing any existing one. Rejects absolute
    /// URIs; a query string in `uri` is extracted into query templates and a
    /// `#fragment` is kept aside.
    pub fn uri(&mut self, uri: &str) -> Result<&mut Self, Error> {
        self.uri_internal(uri, false)
    }

    /// Append to the existing relative URI.
    pub fn uri_append(&mut self, uri: &str) -> Result<&mut Self, Error> {
        self.uri_internal(uri, true)
    }

    fn uri_internal(&mut self, uri: &str, append: bool) -> Result<&mut Self, Error> {
        self.ensure_unresolved("the uri")?;
        if encoding::is_absolute(uri) {
            return Err(Error::config("uri values must not be absolute"));
        }

        let mut uri = uri.to_string();
        if !uri.is_empty()
            && !uri.starts_with('/')
            && !uri.starts_with('{')
            && !uri.starts_with('?')
            && !uri.starts_with(';')
        {
            uri.insert(0, '/');
        }

        if let Some(split) = find_query_split(&uri) {
            let query = uri[split + 1..].to_string();
            uri.truncate(split);
            self.extract_query_templates(&query, append);
        }

        if let Some(hash) = uri.find('#') {
            self.fragment = Some(uri[hash..].to_string());
            uri.truncate(hash);
        }

        let combined = if append {
            format!("{}{uri}", self.raw_uri.as_deref().unwrap_or_default())
        } else {
            uri
        };
        self.uri = Some(Template::path(&combined, self.decode_slash));
        self.raw_uri = Some(combined);
        Ok(self)
    }

    /// Set the absolute base URL. A query string on the target is merged
    /// into the query templates; a fragment is kept aside.
    pub fn target(&mut self, target: &str) -> Result<&mut Self, Error> {
        if target.trim().is_empty() {
            return Ok(self);
        }
        if !encoding::is_absolute(target) {
            return Err(Error::config("target values must be absolute"));
        }
        let trimmed = target.strip_suffix('/').unwrap_or(target);
        let parsed = Url::parse(trimmed)
            .map_err(|e| Error::config(format!("target is not a valid URI: {e}")))?;

        if let Some(query) = parsed.query() {
            if !query.is_empty() {
                self.extract_query_templates(query, true);
            }
        }
        if let Some(fragment) = parsed.fragment() {
            self.fragment = Some(format!("#{fragment}"));
        }

        let authority = &trimmed[parsed.scheme().len() + 3..];
        let authority_end = authority
            .find(['/', '?', '#'])
            .unwrap_or(authority.len());
        let path = parsed.path().trim_end_matches('/');
        self.target = Some(format!(
            "{}://{}{}",
            parsed.scheme(),
            &authority[..authority_end],
            path
        ));
        Ok(self)
    }

    #[must_use]
    pub fn target_ref(&self) -> Option<&str> {
        self.target.as_deref()
    }

    fn extract_query_templates(&mut self, query_string: &str, append: bool) {
        let mut pairs: IndexMap<String, Vec<String>> = IndexMap::new();
        for pair in query_string.split('&').filter(|pair| !pair.is_empty()) {
            let (name, value) = match pair.find('=') {
                Some(eq) if eq > 0 => (&pair[..eq], Some(&pair[eq + 1..])),
                _ => (pair, None),
            };
            let entry = pairs.entry(name.to_string()).or_default();
            if let Some(value) = value {
                entry.push(value.to_string());
            }
        }
        if !append {
            self.queries.clear();
        }
        for (name, values) in pairs {
            if values.is_empty() {
                // bare parameter (`?watch`): keep it as a pure template
                let format = self.collection_format;
                self.queries
                    .insert(name.clone(), QueryTemplate::new(&name, Vec::<String>::new(), format));
            } else {
                self.query(&name, values);
            }
        }
    }

    /// Append query values for `name`; an empty iterator removes the
    /// parameter entirely.
    pub fn query<I, S>(&mut self, name: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let values: Vec<String> = values
            .into_iter()
            .map(|value| value.as_ref().to_string())
            .collect();
        if values.is_empty() {
            self.queries.shift_remove(name);
            return self;
        }
        let format = self.collection_format;
        match self.queries.get(name) {
            Some(existing) => {
                let appended = existing.append(values, format);
                self.queries.insert(name.to_string(), appended);
            }
            None => {
                self.queries
                    .insert(name.to_string(), QueryTemplate::new(name, values, format));
            }
        }
        self
    }

    /// Replace all query parameters; an empty map clears them.
    pub fn queries(&mut self, queries: IndexMap<String, Vec<String>>) -> &mut Self {
        if queries.is_empty() {
            self.queries.clear();
            return self;
        }
        for (name, values) in queries {
            self.query(&name, values);
        }
        self
    }

    /// Declared query parameters and their unexpanded values.
    #[must_use]
    pub fn queries_ref(&self) -> IndexMap<String, Vec<String>> {
        self.queries
            .iter()
            .map(|(name, template)| (name.clone(), template.values().to_vec()))
            .collect()
    }

    /// Append header values for `name` (case-insensitive); an empty iterator
    /// removes the header.
    pub fn header<I, S>(&mut self, name: &str, values: I) -> Result<&mut Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if name.is_empty() {
            return Err(Error::config("header name is required"));
        }
        let key = name.to_ascii_lowercase();
        let values: Vec<String> = values
            .into_iter()
            .map(|value| value.as_ref().to_string())
            .collect();
        if values.is_empty() {
            self.headers.shift_remove(&key);
            return Ok(self);
        }
        match self.headers.get(&key) {
            Some(existing) => {
                let appended = existing.append(values);
                self.headers.insert(key, appended);
            }
            None => {
                self.headers.insert(key, HeaderTemplate::new(name, values));
            }
        }
        Ok(self)
    }

    /// Replace a header's values, discarding any existing ones.
    pub fn replace_header<I, S>(&mut self, name: &str, values: I) -> Result<&mut Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.headers.shift_remove(&name.to_ascii_lowercase());
        self.header(name, values)
    }

    /// Declared headers and their unexpanded values, keyed by display name.
    #[must_use]
    pub fn headers_ref(&self) -> IndexMap<String, Vec<String>> {
        self.headers
            .values()
            .map(|template| (template.name().to_string(), template.values().to_vec()))
            .collect()
    }

    /// First declared value of header `name`, compared case-insensitively.
    #[must_use]
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .and_then(|template| template.values().first())
            .map(String::as_str)
    }

    /// Set the body. `Content-Length` is populated from literal bytes.
    pub fn body(&mut self, body: Body) -> &mut Self {
        let length = body.len();
        self.body = body;
        let _ = self.header("Content-Length", Vec::<String>::new());
        if length > 0 {
            let _ = self.replace_header("Content-Length", [length.to_string()]);
        }
        self
    }

    /// Set an unresolved body template.
    pub fn body_template(&mut self, template: &str) -> Result<&mut Self, Error> {
        self.ensure_unresolved("the body template")?;
        self.body = Body::Template(template.to_string());
        Ok(self)
    }

    #[must_use]
    pub fn body_ref(&self) -> &Body {
        &self.body
    }

    /// Set whether `/` in expanded path values stays literal.
    pub fn decode_slash(&mut self, decode_slash: bool) -> Result<&mut Self, Error> {
        self.ensure_unresolved("slash decoding")?;
        self.decode_slash = decode_slash;
        if let Some(raw) = &self.raw_uri {
            self.uri = Some(Template::path(raw, decode_slash));
        }
        Ok(self)
    }

    #[must_use]
    pub fn decode_slash_ref(&self) -> bool {
        self.decode_slash
    }

    /// Set the collection format used for subsequently added queries.
    pub fn collection_format(&mut self, format: CollectionFormat) -> &mut Self {
        self.collection_format = format;
        self
    }

    #[must_use]
    pub fn collection_format_ref(&self) -> CollectionFormat {
        self.collection_format
    }

    #[must_use]
    pub fn resolved(&self) -> bool {
        self.resolved
    }

    /// All template variables across uri, queries, headers and body.
    #[must_use]
    pub fn variables(&self) -> Vec<String> {
        let mut variables: Vec<String> = self
            .uri
            .iter()
            .flat_map(Template::variables)
            .map(str::to_string)
            .collect();
        for query in self.queries.values() {
            variables.extend(query.variables().into_iter().map(str::to_string));
        }
        for header in self.headers.values() {
            variables.extend(header.variables().into_iter().map(str::to_string));
        }
        variables.extend(self.body.variables());
        variables
    }

    /// True if `variable` appears anywhere in the template.
    #[must_use]
    pub fn has_request_variable(&self, variable: &str) -> bool {
        self.variables().iter().any(|name| name == variable)
    }

    /// The (possibly unresolved) URL: target + path + query line + fragment.
    #[must_use]
    pub fn url(&self) -> String {
        let mut url = self.path();
        url.push_str(&self.query_line());
        if let Some(fragment) = &self.fragment {
            url.push_str(fragment);
        }
        url
    }

    /// The final URL of a resolved template, with query parameters joined
    /// per their collection format.
    fn resolved_url(&self) -> Result<String, Error> {
        let mut url = self.path();
        let no_vars = HashMap::new();
        let mut query_string = String::new();
        for query in self.queries.values() {
            if let Some(expanded) = query.expand(&no_vars)? {
                if !query_string.is_empty() {
                    query_string.push('&');
                }
                query_string.push_str(&expanded);
            }
        }
        if !query_string.is_empty() {
            url.push(if find_query_split(&url).is_some() { '&' } else { '?' });
            url.push_str(&query_string);
        }
        if let Some(fragment) = &self.fragment {
            url.push_str(fragment);
        }
        Ok(url)
    }

    /// Target plus path portion; `/` when neither is set.
    #[must_use]
    pub fn path(&self) -> String {
        let mut path = String::new();
        if let Some(target) = &self.target {
            path.push_str(target);
        }
        if let Some(uri) = &self.uri {
            path.push_str(&uri.to_string());
        }
        if path.is_empty() {
            path.push('/');
        }
        path
    }

    /// Unresolved query string for diagnostics (`?a={a}&tag={v1};{v2}`).
    #[must_use]
    pub fn query_line(&self) -> String {
        let joined = self
            .queries
            .values()
            .map(QueryTemplate::to_string)
            .filter(|query| !query.is_empty())
            .collect::<Vec<_>>()
            .join("&");
        if joined.is_empty() {
            String::new()
        } else {
            format!("?{joined}")
        }
    }

    /// Resolve all expressions against `vars`, producing a new template
    /// marked resolved. Query parameters whose values all stay unresolved
    /// are omitted; headers that expand to nothing are dropped.
    pub fn resolve(&self, vars: &HashMap<String, Value>) -> Result<Self, Error> {
        let mut resolved = self.clone();

        let uri = match &self.uri {
            Some(template) => template.expand(vars)?,
            None => String::new(),
        };
        let mut uri = uri;

        if !self.queries.is_empty() {
            let mut query_string = String::new();
            for query in self.queries.values() {
                if let Some(expanded) = query.expand(vars)? {
                    if !query_string.is_empty() {
                        query_string.push('&');
                    }
                    query_string.push_str(&expanded);
                }
            }
            resolved.queries.clear();
            if !query_string.is_empty() {
                uri.push(if find_query_split(&uri).is_some() { '&' } else { '?' });
                uri.push_str(&query_string);
            }
        }

        // re-seed the resolved template from the expanded uri; this re-parses
        // the query string into literal query templates
        resolved.resolved = false;
        resolved.raw_uri = None;
        resolved.uri = None;
        resolved.uri_internal(&uri, false)?;

        resolved.headers.clear();
        for header in self.headers.values() {
            let values = header.expand(vars)?;
            if !values.is_empty() {
                resolved.header(header.name(), values)?;
            }
        }

        let body = self.body.expand(vars)?;
        resolved.body(body);

        resolved.resolved = true;
        Ok(resolved)
    }

    /// Freeze into a concrete [`Request`].
    ///
    /// # Errors
    /// Fails when the template has not been resolved or has no HTTP method.
    pub fn request(&self) -> Result<Request, Error> {
        if !self.resolved {
            return Err(Error::State("template has not been resolved".into()));
        }
        let method = self
            .method
            .clone()
            .ok_or_else(|| Error::config("template has no HTTP method"))?;

        let no_vars = HashMap::new();
        let mut headers = Vec::new();
        for header in self.headers.values() {
            for value in header.expand(&no_vars)? {
                headers.push((header.name().to_string(), value));
            }
        }
        if !headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("accept"))
        {
            headers.push(("Accept".to_string(), "*/*".to_string()));
        }

        let body = match &self.body {
            Body::Bytes(data) => data.clone(),
            Body::Empty => Bytes::new(),
            Body::Template(_) => {
                return Err(Error::State("body template has not been resolved".into()));
            }
        };

        Ok(Request {
            method,
            url: self.resolved_url()?,
            headers,
            body,
        })
    }
}
