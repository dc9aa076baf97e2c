//! Structured message filters and their translation to Gmail search syntax
//!
//! A [`Filter`] maps field names to required values, with two reserved keys:
//! `not` (a nested filter whose terms are all negated) and `any` (free text
//! with no field qualifier). A third reserved key, `snippet`, selects the
//! store-provided snippet as message body and never reaches the query string.
//!
//! ```
//! use gmail_batch::query::Filter;
//!
//! let filter = Filter::new()
//!     .with_term("from", "billing@example.com")
//!     .with_term("subject", "Your receipt")
//!     .with_not(Filter::new().with_term("label", "Processed"));
//!
//! assert_eq!(
//!     filter.to_query(),
//!     "from:billing@example.com subject:\"Your receipt\" -label:Processed"
//! );
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{BatchError, Result};

/// Field used for label terms and for the processed-label exclusion
pub const LABEL_FIELD: &str = "label";

/// Value of a single filter term
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TermValue {
    Text(String),
    /// Emits one term per non-empty element
    List(Vec<String>),
    Integer(i64),
    Float(f64),
    Flag(bool),
    Null,
}

impl TermValue {
    /// Rendered values for this term; falsy values render to nothing
    fn rendered(&self) -> Vec<String> {
        match self {
            TermValue::Text(s) if !s.is_empty() => vec![s.clone()],
            TermValue::List(items) => items.iter().filter(|s| !s.is_empty()).cloned().collect(),
            TermValue::Integer(n) if *n != 0 => vec![n.to_string()],
            TermValue::Float(f) if *f != 0.0 && !f.is_nan() => vec![f.to_string()],
            TermValue::Flag(true) => vec!["true".to_string()],
            _ => Vec::new(),
        }
    }

    fn is_truthy(&self) -> bool {
        !self.rendered().is_empty()
    }

    fn texts(&self) -> Vec<&str> {
        match self {
            TermValue::Text(s) => vec![s.as_str()],
            TermValue::List(items) => items.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }
}

impl From<&str> for TermValue {
    fn from(value: &str) -> Self {
        TermValue::Text(value.to_string())
    }
}

impl From<String> for TermValue {
    fn from(value: String) -> Self {
        TermValue::Text(value)
    }
}

impl From<Vec<String>> for TermValue {
    fn from(value: Vec<String>) -> Self {
        TermValue::List(value)
    }
}

impl From<i64> for TermValue {
    fn from(value: i64) -> Self {
        TermValue::Integer(value)
    }
}

impl From<bool> for TermValue {
    fn from(value: bool) -> Self {
        TermValue::Flag(value)
    }
}

/// Structured, field-keyed search criteria
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Terms that must NOT match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not: Option<Box<Filter>>,

    /// Free-text term with no field qualifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub any: Option<String>,

    /// Use the store snippet as message body instead of the content parts
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub snippet: bool,

    /// `field -> value` terms, translated in key order
    #[serde(flatten)]
    pub terms: BTreeMap<String, TermValue>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_term(mut self, field: impl Into<String>, value: impl Into<TermValue>) -> Self {
        self.terms.insert(field.into(), value.into());
        self
    }

    pub fn with_any(mut self, text: impl Into<String>) -> Self {
        self.any = Some(text.into());
        self
    }

    pub fn with_not(mut self, not: Filter) -> Self {
        self.not = Some(Box::new(not));
        self
    }

    pub fn with_snippet(mut self) -> Self {
        self.snippet = true;
        self
    }

    /// Translate into a Gmail search query string
    ///
    /// Plain terms come first in key order, then `any`, then the negated
    /// terms of `not`. Falsy values are skipped.
    pub fn to_query(&self) -> String {
        let mut parts = Vec::new();
        self.collect_terms(false, &mut parts);
        parts.join(" ")
    }

    fn collect_terms(&self, negate: bool, out: &mut Vec<String>) {
        for (field, value) in &self.terms {
            for rendered in value.rendered() {
                out.push(format_term(Some(field), &rendered, negate));
            }
        }

        if let Some(any) = self.any.as_deref().filter(|a| !a.is_empty()) {
            out.push(format_term(None, any, negate));
        }

        // Nested `not` inside `not` stays negated
        if let Some(not) = &self.not {
            not.collect_terms(true, out);
        }
    }

    /// Whether translation would produce an empty query
    pub fn is_empty(&self) -> bool {
        self.to_query().is_empty()
    }

    /// Check that every term can be quoted safely
    pub fn validate(&self) -> Result<()> {
        for (field, value) in &self.terms {
            if field.is_empty() {
                return Err(BatchError::ConfigError(
                    "Filter field names cannot be empty".to_string(),
                ));
            }
            if field.chars().any(|c| c.is_whitespace() || c == ':' || c == '"') {
                return Err(BatchError::ConfigError(format!(
                    "Invalid filter field name '{}': must not contain whitespace, ':' or '\"'",
                    field
                )));
            }
            if value.texts().iter().any(|v| v.contains('"')) {
                return Err(BatchError::ConfigError(format!(
                    "Invalid value for filter field '{}': must not contain '\"'",
                    field
                )));
            }
        }

        if self.any.as_deref().is_some_and(|a| a.contains('"')) {
            return Err(BatchError::ConfigError(
                "Invalid value for filter field 'any': must not contain '\"'".to_string(),
            ));
        }

        match &self.not {
            Some(not) => not.validate(),
            None => Ok(()),
        }
    }

    /// Clone with `name` added to the excluded labels
    ///
    /// An existing `not.label` is kept; both labels end up excluded.
    pub fn with_excluded_label(&self, name: &str) -> Filter {
        let mut filter = self.clone();
        let not = filter.not.get_or_insert_with(Box::default);

        let merged = match not.terms.remove(LABEL_FIELD) {
            Some(TermValue::Text(existing)) if !existing.is_empty() && existing != name => {
                TermValue::List(vec![existing, name.to_string()])
            }
            Some(TermValue::List(mut existing)) => {
                if !existing.iter().any(|l| l == name) {
                    existing.push(name.to_string());
                }
                TermValue::List(existing)
            }
            _ => TermValue::Text(name.to_string()),
        };
        not.terms.insert(LABEL_FIELD.to_string(), merged);

        filter
    }

    /// Clone with `after: date` when neither `after` nor `before` is set
    pub fn with_default_after(&self, date: &str) -> Filter {
        let bounded = ["after", "before"]
            .iter()
            .any(|k| self.terms.get(*k).is_some_and(TermValue::is_truthy));
        if bounded || date.is_empty() {
            return self.clone();
        }
        self.clone().with_term("after", date)
    }

    /// Parse the `key=value,key2="value two"` syntax used on the command line
    ///
    /// Surrounding double quotes are stripped from values; entries without
    /// exactly one `=` are ignored. `any` and `snippet` map to their reserved
    /// fields.
    pub fn parse_pairs(input: &str) -> Filter {
        let mut filter = Filter::new();

        for pair in input.split(',') {
            let parts: Vec<&str> = pair.split('=').collect();
            if parts.len() != 2 {
                continue;
            }
            let key = parts[0].trim();
            let mut value = parts[1].trim();
            if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
                value = &value[1..value.len() - 1];
            }

            match key {
                "" => {}
                "any" => filter.any = Some(value.to_string()),
                "snippet" => filter.snippet = value.eq_ignore_ascii_case("true"),
                _ => {
                    filter.terms.insert(key.to_string(), TermValue::from(value));
                }
            }
        }

        filter
    }
}

fn format_term(field: Option<&str>, value: &str, negate: bool) -> String {
    let mut term = String::new();
    if negate {
        term.push('-');
    }
    if let Some(field) = field {
        term.push_str(field);
        term.push(':');
    }
    if value.chars().any(char::is_whitespace) {
        term.push('"');
        term.push_str(value);
        term.push('"');
    } else {
        term.push_str(value);
    }
    term
}

/// Query accepted by the fetcher: pre-built string or structured filter
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Raw(String),
    Filter(Filter),
}

impl Query {
    /// Snippet mode requested by a structured filter
    pub fn wants_snippet(&self) -> bool {
        matches!(self, Query::Filter(f) if f.snippet)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::Raw(raw) => f.write_str(raw),
            Query::Filter(filter) => f.write_str(&filter.to_query()),
        }
    }
}

impl From<Filter> for Query {
    fn from(filter: Filter) -> Self {
        Query::Filter(filter)
    }
}

impl From<&str> for Query {
    fn from(raw: &str) -> Self {
        Query::Raw(raw.to_string())
    }
}

impl From<String> for Query {
    fn from(raw: String) -> Self {
        Query::Raw(raw)
    }
}
