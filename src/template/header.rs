//! Header value templates.
//!
//! Header values may contain expressions but are never percent-encoded.
//! Unresolved values are dropped; a header whose values all drop disappears
//! from the resolved request.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use super::{FragmentType, OnUnresolved, Template, COLLECTION_DELIMITER};
use crate::error::Error;

/// Template for one header's values.
#[derive(Debug, Clone)]
pub struct HeaderTemplate {
    name: String,
    values: Vec<Template>,
    raw_values: Vec<String>,
}

impl HeaderTemplate {
    /// Create a header template. Blank values are discarded.
    #[must_use]
    pub fn new<I, S>(name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let raw_values: Vec<String> = values
            .into_iter()
            .map(|value| value.as_ref().to_string())
            .filter(|value| !value.trim().is_empty())
            .collect();
        Self {
            name: name.to_string(),
            values: raw_values
                .iter()
                .map(|value| {
                    Template::new(value, FragmentType::Query, OnUnresolved::Drop, false, false)
                })
                .collect(),
            raw_values,
        }
    }

    /// New template with `values` appended after the existing ones.
    #[must_use]
    pub fn append<I, S>(&self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut combined = self.raw_values.clone();
        combined.extend(
            values
                .into_iter()
                .map(|value| value.as_ref().to_string())
                .filter(|value| !value.trim().is_empty()),
        );
        Self::new(&self.name, combined)
    }

    /// Header name as declared.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declared (unexpanded) values.
    #[must_use]
    pub fn values(&self) -> &[String] {
        &self.raw_values
    }

    /// Template variables referenced by any value.
    #[must_use]
    pub fn variables(&self) -> Vec<&str> {
        self.values
            .iter()
            .flat_map(Template::variables)
            .collect()
    }

    /// Expand against `vars`, returning one string per surviving value.
    pub fn expand(&self, vars: &HashMap<String, Value>) -> Result<Vec<String>, Error> {
        let mut resolved = Vec::new();
        for value in &self.values {
            let expanded = value.expand(vars)?;
            for part in expanded.split(COLLECTION_DELIMITER) {
                if !part.is_empty() {
                    resolved.push(part.to_string());
                }
            }
        }
        Ok(resolved)
    }
}

impl fmt::Display for HeaderTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.raw_values.join(", "))
    }
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
    fn literal_header_passes_through() {
        let header = HeaderTemplate::new("Accept", ["application/json"]);
        let values = header.expand(&HashMap::new()).unwrap();
        assert_eq!(values, vec!["application/json"]);
    }

    #[test]
    fn expression_resolves_without_encoding() {
        let header = HeaderTemplate::new("Authorization", ["Bearer {token}"]);
        let values = header
            .expand(&vars(&[("token", json!("abc/def=="))]))
            .unwrap();
        assert_eq!(values, vec!["Bearer abc/def=="]);
    }

    #[test]
    fn unresolved_value_is_dropped() {
        let header = HeaderTemplate::new("X-Trace", ["{trace_id}"]);
        let values = header.expand(&HashMap::new()).unwrap();
        assert!(values.is_empty());
    }

    #[test]
    fn iterable_produces_repeated_values() {
        let header = HeaderTemplate::new("X-Tag", ["{tags}"]);
        let values = header
            .expand(&vars(&[("tags", json!(["a", "b"]))]))
            .unwrap();
        assert_eq!(values, vec!["a", "b"]);
    }

    #[test]
    fn append_keeps_existing_values() {
        let header = HeaderTemplate::new("X-Flags", ["one"]);
        let header = header.append(["two"]);
        let values = header.expand(&HashMap::new()).unwrap();
        assert_eq!(values, vec!["one", "two"]);
    }
}
