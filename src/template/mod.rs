//! Chunk-based string templates with RFC 6570 §3.2.2 simple expansion.
//!
//! A template is parsed into literal and expression chunks. Expressions are
//! `{name}` or `{name:regex}`; only the outermost braces delimit, so nested
//! braces become part of the expression text. Expansion substitutes values
//! from a variable map, percent-encoding per fragment type.

pub mod encoding;
pub mod header;
pub mod query;

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::error::Error;
pub use encoding::FragmentType;

/// Delimiter used to join iterable values during expansion so they can be
/// re-split downstream. Semicolon is reserved and never appears unencoded in
/// an expanded value.
pub(crate) const COLLECTION_DELIMITER: &str = ";";

/// Sentinel emitted for variables that stay unresolved under
/// [`OnUnresolved::Undef`]; query templates drop values equal to it.
pub(crate) const UNDEF: &str = "undef";

/// What to emit for an expression whose variable is missing from the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnUnresolved {
    /// Keep the `{name}` text as a literal.
    Keep,
    /// Emit nothing.
    Drop,
    /// Emit the [`UNDEF`] sentinel (query value semantics).
    Undef,
}

/// One parsed piece of a template.
#[derive(Debug, Clone)]
enum Chunk {
    Literal(String),
    Expression {
        name: String,
        constraint: Option<Regex>,
        /// Raw `{...}` text, kept for unresolved output.
        raw: String,
    },
}

fn expression_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\w[-\w.\[\]]*) *(?::(.+))?$").expect("expression pattern"))
}

/// A resolvable template string.
#[derive(Debug, Clone)]
pub struct Template {
    chunks: Vec<Chunk>,
    fragment: FragmentType,
    on_unresolved: OnUnresolved,
    encode: bool,
    encode_slash: bool,
}

impl Template {
    /// Parse `value` into a template.
    ///
    /// `encode` controls percent-encoding of literals and expanded values;
    /// `encode_slash` additionally replaces `/` in expanded values with
    /// `%2F` (used when `decodeSlash` is off).
    #[must_use]
    pub fn new(
        value: &str,
        fragment: FragmentType,
        on_unresolved: OnUnresolved,
        encode: bool,
        encode_slash: bool,
    ) -> Self {
        let mut template = Self {
            chunks: Vec::new(),
            fragment,
            on_unresolved,
            encode,
            encode_slash,
        };
        for token in tokenize(value) {
            template.push_token(&token);
        }
        template
    }

    /// Shorthand for a path template honoring the `decode_slash` flag.
    #[must_use]
    pub fn path(value: &str, decode_slash: bool) -> Self {
        Self::new(
            value,
            FragmentType::PathSegment,
            OnUnresolved::Keep,
            true,
            !decode_slash,
        )
    }

    fn push_token(&mut self, token: &str) {
        if token.starts_with('{') {
            let inner = token
                .strip_prefix('{')
                .and_then(|t| t.strip_suffix('}'))
                .unwrap_or(token);
            if let Some(caps) = expression_pattern().captures(inner) {
                let name = caps[1].trim().to_string();
                let constraint = caps
                    .get(2)
                    .and_then(|m| Regex::new(&format!("^(?:{})$", m.as_str())).ok());
                self.chunks.push(Chunk::Expression {
                    name,
                    constraint,
                    raw: token.to_string(),
                });
                return;
            }
            // braced content that is not a valid expression stays literal
        }
        self.chunks.push(Chunk::Literal(self.encode_literal(token)));
    }

    fn encode_literal(&self, value: &str) -> String {
        if self.encode {
            encoding::encode(value, self.fragment)
        } else {
            value.to_string()
        }
    }

    /// Names of all expressions in this template, in order.
    #[must_use]
    pub fn variables(&self) -> Vec<&str> {
        self.chunks
            .iter()
            .filter_map(|chunk| match chunk {
                Chunk::Expression { name, .. } => Some(name.as_str()),
                Chunk::Literal(_) => None,
            })
            .collect()
    }

    /// True when the template contains no expressions.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        self.variables().is_empty()
    }

    /// Expand the template against `vars`.
    ///
    /// Iterable values are joined with the collection delimiter so callers
    /// can re-split them. A regex-constrained expression whose expanded value
    /// does not match the constraint is an error.
    pub fn expand(&self, vars: &HashMap<String, Value>) -> Result<String, Error> {
        let mut resolved = String::new();
        for chunk in &self.chunks {
            match chunk {
                Chunk::Literal(literal) => resolved.push_str(literal),
                Chunk::Expression {
                    name,
                    constraint,
                    raw,
                } => {
                    if let Some(expanded) = self.resolve(name, constraint.as_ref(), raw, vars)? {
                        resolved.push_str(&expanded);
                    }
                }
            }
        }
        Ok(resolved)
    }

    fn resolve(
        &self,
        name: &str,
        constraint: Option<&Regex>,
        raw: &str,
        vars: &HashMap<String, Value>,
    ) -> Result<Option<String>, Error> {
        let value = match vars.get(name) {
            Some(Value::Null) | None if self.on_unresolved == OnUnresolved::Undef => {
                return Ok(Some(UNDEF.to_string()));
            }
            None | Some(Value::Null) => {
                return Ok(match self.on_unresolved {
                    OnUnresolved::Keep => Some(self.encode_literal(raw)),
                    _ => None,
                });
            }
            Some(value) => value,
        };

        let expanded = match value {
            Value::Array(items) => items
                .iter()
                .map(|item| self.encode_value(&stringify(item)))
                .collect::<Vec<_>>()
                .join(COLLECTION_DELIMITER),
            other => self.encode_value(&stringify(other)),
        };

        if let Some(constraint) = constraint {
            if !constraint.is_match(&expanded) {
                return Err(Error::expression_mismatch(name, &expanded, constraint.as_str()));
            }
        }

        if expanded.is_empty() {
            return Ok(None);
        }
        if self.encode_slash {
            return Ok(Some(expanded.replace('/', "%2F")));
        }
        Ok(Some(expanded))
    }

    fn encode_value(&self, value: &str) -> String {
        if self.encode {
            encoding::encode(value, self.fragment)
        } else {
            value.to_string()
        }
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for chunk in &self.chunks {
            match chunk {
                Chunk::Literal(literal) => f.write_str(literal)?,
                Chunk::Expression { raw, .. } => f.write_str(raw)?,
            }
        }
        Ok(())
    }
}

/// Render a variable value as a string.
pub(crate) fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Split a template into tokens inside and outside of `{...}` expressions.
/// Only the outermost braces delimit; nested braces stay inside the token.
fn tokenize(template: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut outside = true;
    let mut level = 0usize;
    let mut last = 0usize;
    let bytes = template.as_bytes();

    for (idx, &byte) in bytes.iter().enumerate() {
        match byte {
            b'{' => {
                if outside {
                    if last < idx {
                        tokens.push(template[last..idx].to_string());
                    }
                    last = idx;
                    outside = false;
                } else {
                    level += 1;
                }
            }
            b'}' if !outside => {
                if level > 0 {
                    level -= 1;
                } else {
                    tokens.push(template[last..=idx].to_string());
                    last = idx + 1;
                    outside = true;
                }
            }
            _ => {}
        }
    }
    if last < template.len() {
        tokens.push(template[last..].to_string());
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn literal_template_has_no_variables() {
        let template = Template::path("/repos/all", true);
        assert!(template.is_literal());
        assert_eq!(template.expand(&HashMap::new()).unwrap(), "/repos/all");
    }

    #[test]
    fn expands_path_variables() {
        let template = Template::path("/repos/{owner}/{repo}", true);
        assert_eq!(template.variables(), vec!["owner", "repo"]);
        let result = template
            .expand(&vars(&[("owner", json!("rust-lang")), ("repo", json!("regex"))]))
            .unwrap();
        assert_eq!(result, "/repos/rust-lang/regex");
    }

    #[test]
    fn unresolved_keeps_expression_encoded() {
        let template = Template::path("/repos/{owner}", true);
        let result = template.expand(&HashMap::new()).unwrap();
        assert_eq!(result, "/repos/%7Bowner%7D");
    }

    #[test]
    fn nested_braces_delimit_at_outermost() {
        let tokens = tokenize("foo{bar{baz}}tail");
        assert_eq!(tokens, vec!["foo", "{bar{baz}}", "tail"]);
    }

    #[test]
    fn invalid_expression_becomes_literal() {
        let template = Template::new(
            "/x/{ not valid}",
            FragmentType::PathSegment,
            OnUnresolved::Keep,
            true,
            false,
        );
        assert!(template.is_literal());
    }

    #[test]
    fn iterable_joined_with_delimiter() {
        let template = Template::new(
            "{tags}",
            FragmentType::Query,
            OnUnresolved::Undef,
            true,
            true,
        );
        let result = template
            .expand(&vars(&[("tags", json!(["a", "b"]))]))
            .unwrap();
        assert_eq!(result, "a;b");
    }

    #[test]
    fn regex_constraint_enforced() {
        let template = Template::path("/versions/{major:\\d+}", true);
        assert_eq!(template.variables(), vec!["major"]);
        let ok = template.expand(&vars(&[("major", json!("12"))])).unwrap();
        assert_eq!(ok, "/versions/12");

        let err = template
            .expand(&vars(&[("major", json!("latest"))]))
            .unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn encode_slash_replaces_in_values_only() {
        let template = Template::path("/files/{path}", false);
        let result = template
            .expand(&vars(&[("path", json!("a/b"))]))
            .unwrap();
        assert_eq!(result, "/files/a%2Fb");
    }

    #[test]
    fn undef_mode_marks_missing_and_null() {
        let template = Template::new(
            "{q}",
            FragmentType::Query,
            OnUnresolved::Undef,
            true,
            true,
        );
        assert_eq!(template.expand(&HashMap::new()).unwrap(), UNDEF);
        assert_eq!(template.expand(&vars(&[("q", Value::Null)])).unwrap(), UNDEF);
    }

    #[test]
    fn numbers_and_booleans_stringify() {
        let template = Template::path("/page/{n}/{flag}", true);
        let result = template
            .expand(&vars(&[("n", json!(3)), ("flag", json!(true))]))
            .unwrap();
        assert_eq!(result, "/page/3/true");
    }
}
