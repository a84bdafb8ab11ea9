//! Query parameter templates.
//!
//! A query parameter owns a name template (names may themselves contain
//! expressions), an ordered list of value templates and a collection format.
//! Expansion drops unresolved values; a parameter whose values all stay
//! unresolved disappears from the final URL.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use super::{FragmentType, OnUnresolved, Template, COLLECTION_DELIMITER, UNDEF};
use crate::error::Error;

/// How iterable query values are joined into the query string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectionFormat {
    /// `k=v1&k=v2`
    #[default]
    Exploded,
    /// `k=v1,v2`
    Csv,
    /// `k=v1 v2`
    Ssv,
    /// `k=v1\tv2`
    Tsv,
    /// `k=v1|v2`
    Pipes,
}

impl CollectionFormat {
    /// Join resolved `values` under `name` per this format.
    #[must_use]
    pub fn join(self, name: &str, values: &[String]) -> String {
        match self {
            Self::Exploded => values
                .iter()
                .map(|value| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("&"),
            Self::Csv => format!("{name}={}", values.join(",")),
            Self::Ssv => format!("{name}={}", values.join(" ")),
            Self::Tsv => format!("{name}={}", values.join("\t")),
            Self::Pipes => format!("{name}={}", values.join("|")),
        }
    }
}

/// Template for one query string parameter.
#[derive(Debug, Clone)]
pub struct QueryTemplate {
    name: Template,
    raw_name: String,
    values: Vec<Template>,
    raw_values: Vec<String>,
    collection_format: CollectionFormat,
    /// A parameter declared with no values renders as a bare `name`.
    pure: bool,
}

impl QueryTemplate {
    /// Create a query template. Blank values are discarded; a parameter with
    /// no remaining values is *pure* and renders as its bare name.
    #[must_use]
    pub fn new<I, S>(name: &str, values: I, collection_format: CollectionFormat) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let raw_values: Vec<String> = values
            .into_iter()
            .map(|value| value.as_ref().to_string())
            .filter(|value| !value.trim().is_empty())
            .collect();
        let pure = raw_values.is_empty();
        Self {
            name: Template::new(name, FragmentType::Query, OnUnresolved::Drop, true, false),
            raw_name: name.to_string(),
            values: raw_values
                .iter()
                .map(|value| {
                    Template::new(value, FragmentType::Query, OnUnresolved::Undef, true, true)
                })
                .collect(),
            raw_values,
            collection_format,
            pure,
        }
    }

    /// New template with `values` appended after the existing ones.
    #[must_use]
    pub fn append<I, S>(&self, values: I, collection_format: CollectionFormat) -> Self
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
        Self::new(&self.raw_name, combined, collection_format)
    }

    /// The parameter name as declared.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.raw_name
    }

    /// The declared (unexpanded) values.
    #[must_use]
    pub fn values(&self) -> &[String] {
        &self.raw_values
    }

    /// Template variables referenced by the name or any value.
    #[must_use]
    pub fn variables(&self) -> Vec<&str> {
        let mut variables = self.name.variables();
        for value in &self.values {
            variables.extend(value.variables());
        }
        variables
    }

    /// Expand against `vars`. `None` means the parameter is omitted: either
    /// its name stayed unresolved or every value did.
    pub fn expand(&self, vars: &HashMap<String, Value>) -> Result<Option<String>, Error> {
        let name = self.name.expand(vars)?;
        if name.is_empty() {
            return Ok(None);
        }
        if self.pure {
            return Ok(Some(name));
        }

        let mut resolved = Vec::new();
        for value in &self.values {
            let expanded = value.expand(vars)?;
            // iterables were joined with the reserved delimiter; re-split
            for part in expanded.split(COLLECTION_DELIMITER) {
                if !part.is_empty() && !part.eq_ignore_ascii_case(UNDEF) {
                    resolved.push(part.to_string());
                }
            }
        }

        if resolved.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.collection_format.join(&name, &resolved)))
    }
}

impl fmt::Display for QueryTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.pure {
            return f.write_str(&self.raw_name);
        }
        write!(f, "{}={}", self.raw_name, self.raw_values.join(COLLECTION_DELIMITER))
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
    fn literal_value_expands() {
        let query = QueryTemplate::new("sort", ["stars"], CollectionFormat::Exploded);
        let result = query.expand(&HashMap::new()).unwrap();
        assert_eq!(result.as_deref(), Some("sort=stars"));
    }

    #[test]
    fn unresolved_value_drops_parameter() {
        let query = QueryTemplate::new("q", ["{q}"], CollectionFormat::Exploded);
        assert_eq!(query.expand(&HashMap::new()).unwrap(), None);
    }

    #[test]
    fn explicit_null_drops_parameter() {
        let query = QueryTemplate::new("q", ["{q}"], CollectionFormat::Exploded);
        let result = query.expand(&vars(&[("q", Value::Null)])).unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn exploded_iterable() {
        let query = QueryTemplate::new("tag", ["{tags}"], CollectionFormat::Exploded);
        let result = query
            .expand(&vars(&[("tags", json!(["a", "b"]))]))
            .unwrap();
        assert_eq!(result.as_deref(), Some("tag=a&tag=b"));
    }

    #[test]
    fn csv_iterable() {
        let query = QueryTemplate::new("tag", ["{tags}"], CollectionFormat::Csv);
        let result = query
            .expand(&vars(&[("tags", json!(["a", "b"]))]))
            .unwrap();
        assert_eq!(result.as_deref(), Some("tag=a,b"));
    }

    #[test]
    fn pure_parameter_renders_bare_name() {
        let query = QueryTemplate::new("watch", Vec::<String>::new(), CollectionFormat::Exploded);
        let result = query.expand(&HashMap::new()).unwrap();
        assert_eq!(result.as_deref(), Some("watch"));
    }

    #[test]
    fn append_concatenates_values() {
        let query = QueryTemplate::new("tag", ["a"], CollectionFormat::Exploded);
        let query = query.append(["b"], CollectionFormat::Exploded);
        let result = query.expand(&HashMap::new()).unwrap();
        assert_eq!(result.as_deref(), Some("tag=a&tag=b"));
    }

    #[test]
    fn values_are_query_encoded() {
        let query = QueryTemplate::new("q", ["{q}"], CollectionFormat::Exploded);
        let result = query.expand(&vars(&[("q", json!("a&b=c"))])).unwrap();
        assert_eq!(result.as_deref(), Some("q=a%26b%3Dc"));
    }

    #[test]
    fn unresolved_form_for_diagnostics() {
        let query = QueryTemplate::new("tag", ["{v1}", "{v2}"], CollectionFormat::Exploded);
        assert_eq!(query.to_string(), "tag={v1};{v2}");
    }
}
