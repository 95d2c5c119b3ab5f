//! Search parameter and query types.
//!
//! This module defines the query side of search: parameter types, modifiers,
//! comparison prefixes and the [`SearchQuery`] accepted by search providers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SearchError;

/// Search parameter value kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchParamType {
    /// A simple string, like a name or description.
    String,
    /// A search against a URI.
    Uri,
    /// A search for a number.
    Number,
    /// A search for a date, dateTime, or period.
    Date,
    /// A quantity, with a number and units.
    Quantity,
    /// A code from a code system or value set.
    Token,
    /// A reference to another resource.
    Reference,
    /// Geographic coordinates (latitude/longitude).
    Special,
}

impl fmt::Display for SearchParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchParamType::String => write!(f, "string"),
            SearchParamType::Uri => write!(f, "uri"),
            SearchParamType::Number => write!(f, "number"),
            SearchParamType::Date => write!(f, "date"),
            SearchParamType::Quantity => write!(f, "quantity"),
            SearchParamType::Token => write!(f, "token"),
            SearchParamType::Reference => write!(f, "reference"),
            SearchParamType::Special => write!(f, "special"),
        }
    }
}

impl FromStr for SearchParamType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "string" => Ok(SearchParamType::String),
            "uri" => Ok(SearchParamType::Uri),
            "number" => Ok(SearchParamType::Number),
            "date" => Ok(SearchParamType::Date),
            "quantity" => Ok(SearchParamType::Quantity),
            "token" => Ok(SearchParamType::Token),
            "reference" => Ok(SearchParamType::Reference),
            "special" => Ok(SearchParamType::Special),
            _ => Err(format!("unknown search parameter type: {}", s)),
        }
    }
}

/// Modifiers that can follow a parameter name (`name:modifier`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchModifier {
    /// Exact string match (string parameters).
    Exact,
    /// Contains substring (string parameters).
    Contains,
    /// Match on display text (token parameters).
    Text,
    /// Negation - exclude matches.
    Not,
    /// Match if value is missing (`true`) or present (`false`).
    Missing,
    /// Match URIs that the value starts with.
    Above,
    /// Match URIs that start with the value.
    Below,
    /// Restrict reference targets to a resource type.
    Type(String),
}

impl fmt::Display for SearchModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchModifier::Exact => write!(f, "exact"),
            SearchModifier::Contains => write!(f, "contains"),
            SearchModifier::Text => write!(f, "text"),
            SearchModifier::Not => write!(f, "not"),
            SearchModifier::Missing => write!(f, "missing"),
            SearchModifier::Above => write!(f, "above"),
            SearchModifier::Below => write!(f, "below"),
            SearchModifier::Type(t) => write!(f, "{}", t),
        }
    }
}

impl SearchModifier {
    /// Parses a modifier string, returning None for unknown modifiers.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "exact" => Some(SearchModifier::Exact),
            "contains" => Some(SearchModifier::Contains),
            "text" => Some(SearchModifier::Text),
            "not" => Some(SearchModifier::Not),
            "missing" => Some(SearchModifier::Missing),
            "above" => Some(SearchModifier::Above),
            "below" => Some(SearchModifier::Below),
            _ => {
                // Resource type modifier, e.g. subject:Patient
                if s.chars().next().map(|c| c.is_uppercase()).unwrap_or(false) {
                    Some(SearchModifier::Type(s.to_string()))
                } else {
                    None
                }
            }
        }
    }

    /// Returns true if this modifier is valid for the given parameter type.
    pub fn is_valid_for(&self, param_type: SearchParamType) -> bool {
        match self {
            SearchModifier::Exact | SearchModifier::Contains => {
                param_type == SearchParamType::String
            }
            SearchModifier::Text => param_type == SearchParamType::Token,
            SearchModifier::Not => param_type == SearchParamType::Token,
            SearchModifier::Missing => true,
            SearchModifier::Above | SearchModifier::Below => param_type == SearchParamType::Uri,
            SearchModifier::Type(_) => param_type == SearchParamType::Reference,
        }
    }
}

/// Comparison prefixes for ordered parameter types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchPrefix {
    /// Equal (default).
    #[default]
    Eq,
    /// Not equal.
    Ne,
    /// Greater than.
    Gt,
    /// Less than.
    Lt,
    /// Greater than or equal.
    Ge,
    /// Less than or equal.
    Le,
    /// Starts after.
    Sa,
    /// Ends before.
    Eb,
    /// Approximately equal.
    Ap,
}

impl fmt::Display for SearchPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchPrefix::Eq => write!(f, "eq"),
            SearchPrefix::Ne => write!(f, "ne"),
            SearchPrefix::Gt => write!(f, "gt"),
            SearchPrefix::Lt => write!(f, "lt"),
            SearchPrefix::Ge => write!(f, "ge"),
            SearchPrefix::Le => write!(f, "le"),
            SearchPrefix::Sa => write!(f, "sa"),
            SearchPrefix::Eb => write!(f, "eb"),
            SearchPrefix::Ap => write!(f, "ap"),
        }
    }
}

impl FromStr for SearchPrefix {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "eq" => Ok(SearchPrefix::Eq),
            "ne" => Ok(SearchPrefix::Ne),
            "gt" => Ok(SearchPrefix::Gt),
            "lt" => Ok(SearchPrefix::Lt),
            "ge" => Ok(SearchPrefix::Ge),
            "le" => Ok(SearchPrefix::Le),
            "sa" => Ok(SearchPrefix::Sa),
            "eb" => Ok(SearchPrefix::Eb),
            "ap" => Ok(SearchPrefix::Ap),
            _ => Err(format!("unknown search prefix: {}", s)),
        }
    }
}

impl SearchPrefix {
    /// Extracts a prefix from the beginning of a value string.
    ///
    /// Only strips the prefix when what follows could start a number or date,
    /// so token codes such as "eq1" survive untouched.
    pub fn extract(value: &str) -> (Self, &str) {
        if value.len() > 2 && value.is_char_boundary(2) {
            let (prefix, rest) = value.split_at(2);
            let starts_numeric = rest
                .chars()
                .next()
                .map(|c| c.is_ascii_digit() || c == '-' || c == '.')
                .unwrap_or(false);
            if starts_numeric {
                if let Ok(p) = prefix.parse() {
                    return (p, rest);
                }
            }
        }
        (SearchPrefix::Eq, value)
    }

    /// Returns true if this prefix is valid for the given parameter type.
    pub fn is_valid_for(&self, param_type: SearchParamType) -> bool {
        match self {
            SearchPrefix::Eq => true,
            SearchPrefix::Ne
            | SearchPrefix::Gt
            | SearchPrefix::Lt
            | SearchPrefix::Ge
            | SearchPrefix::Le
            | SearchPrefix::Ap => matches!(
                param_type,
                SearchParamType::Number | SearchParamType::Date | SearchParamType::Quantity
            ),
            SearchPrefix::Sa | SearchPrefix::Eb => param_type == SearchParamType::Date,
        }
    }
}

/// A single search value with optional prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchValue {
    /// The comparison prefix.
    pub prefix: SearchPrefix,

    /// The value to search for.
    pub value: String,

    /// The text as received, before prefix extraction.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    raw: String,
}

impl SearchValue {
    /// Creates a new search value with the given prefix and value.
    pub fn new(prefix: SearchPrefix, value: impl Into<String>) -> Self {
        Self {
            prefix,
            value: value.into(),
            raw: String::new(),
        }
    }

    /// Creates a search value with the default (eq) prefix.
    pub fn eq(value: impl Into<String>) -> Self {
        Self::new(SearchPrefix::Eq, value)
    }

    /// Parses a value string, extracting any prefix.
    pub fn parse(s: &str) -> Self {
        let (prefix, value) = SearchPrefix::extract(s);
        Self {
            raw: s.to_string(),
            ..Self::new(prefix, value)
        }
    }

    /// Returns the value as written, with any prefix text put back.
    ///
    /// Token, string, uri and reference values never carry prefixes, so
    /// `eq5` there is the literal code "eq5".
    pub fn as_written(&self) -> String {
        match (self.raw.is_empty(), self.prefix) {
            (false, _) => self.raw.clone(),
            (true, SearchPrefix::Eq) => self.value.clone(),
            (true, prefix) => format!("{}{}", prefix, self.value),
        }
    }
}

/// One search constraint. Its values are ORed together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchParameter {
    /// The parameter name (e.g., "name", "identifier").
    pub name: String,

    /// Modifier, if any.
    pub modifier: Option<SearchModifier>,

    /// The search value(s).
    pub values: Vec<SearchValue>,
}

impl SearchParameter {
    /// Creates a constraint with a single value.
    pub fn new(name: impl Into<String>, value: SearchValue) -> Self {
        Self {
            name: name.into(),
            modifier: None,
            values: vec![value],
        }
    }

    /// Sets the modifier.
    pub fn with_modifier(mut self, modifier: SearchModifier) -> Self {
        self.modifier = Some(modifier);
        self
    }

    /// Adds another ORed value.
    pub fn or(mut self, value: SearchValue) -> Self {
        self.values.push(value);
        self
    }

    /// Parses a `name[:modifier]` key and a comma-separated value list.
    pub fn parse(key: &str, raw: &str) -> Result<Self, SearchError> {
        let (name, modifier) = match key.split_once(':') {
            Some((name, m)) => {
                let modifier =
                    SearchModifier::parse(m).ok_or_else(|| SearchError::UnsupportedModifier {
                        modifier: m.to_string(),
                        param_type: "any".to_string(),
                    })?;
                (name, Some(modifier))
            }
            None => (key, None),
        };

        let values = split_or_values(raw)
            .into_iter()
            .map(|v| SearchValue::parse(&v))
            .collect();

        Ok(Self {
            name: name.to_string(),
            modifier,
            values,
        })
    }
}

/// Splits a value list on unescaped commas and unescapes `\,`.
fn split_or_values(raw: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut current = String::new();
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&',') => {
                current.push(',');
                chars.next();
            }
            ',' => values.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    values.push(current);
    values
}

/// An `include` directive: follow a reference parameter to its targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncludeDirective {
    /// The source resource type.
    pub source_type: String,

    /// The reference search parameter to follow.
    pub search_param: String,

    /// Optional target resource type filter.
    pub target_type: Option<String>,
}

impl IncludeDirective {
    /// Parses `Source:param[:Target]`.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.split(':');
        let source_type = parts.next().filter(|p| !p.is_empty())?;
        let search_param = parts.next().filter(|p| !p.is_empty())?;
        let target_type = parts.next().map(String::from);

        Some(Self {
            source_type: source_type.to_string(),
            search_param: search_param.to_string(),
            target_type,
        })
    }
}

/// A complete search query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchQuery {
    /// The resource type being searched.
    pub resource_type: String,

    /// Constraints, ANDed together.
    pub parameters: Vec<SearchParameter>,

    /// Include directives.
    pub includes: Vec<IncludeDirective>,

    /// Full-text constraint handled by the external index (`_content`).
    pub content: Option<String>,

    /// Result count limit (`_count`).
    pub count: Option<u32>,

    /// Cursor for keyset pagination.
    pub cursor: Option<String>,
}

impl SearchQuery {
    /// Creates a new search query for the given resource type.
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            ..Default::default()
        }
    }

    /// Builds a query from raw `key=value` pairs.
    ///
    /// Recognizes `_count`, `_cursor`, `_include` and `_content`; every other
    /// key is parsed as a search parameter.
    pub fn from_pairs<K, V>(
        resource_type: impl Into<String>,
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Self, SearchError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut query = Self::new(resource_type);

        for (key, value) in pairs {
            let (key, value) = (key.as_ref(), value.as_ref());
            match key {
                "_count" => {
                    let count = value.parse().map_err(|_| SearchError::InvalidValue {
                        parameter: "_count".to_string(),
                        value: value.to_string(),
                        message: "expected a non-negative integer".to_string(),
                    })?;
                    query.count = Some(count);
                }
                "_cursor" => query.cursor = Some(value.to_string()),
                "_content" => query.content = Some(value.to_string()),
                "_include" => {
                    let include =
                        IncludeDirective::parse(value).ok_or_else(|| SearchError::InvalidValue {
                            parameter: "_include".to_string(),
                            value: value.to_string(),
                            message: "expected Type:parameter".to_string(),
                        })?;
                    query.includes.push(include);
                }
                _ => query.parameters.push(SearchParameter::parse(key, value)?),
            }
        }

        Ok(query)
    }

    /// Adds a search parameter.
    pub fn with_parameter(mut self, param: SearchParameter) -> Self {
        self.parameters.push(param);
        self
    }

    /// Adds an include directive.
    pub fn with_include(mut self, include: IncludeDirective) -> Self {
        self.includes.push(include);
        self
    }

    /// Sets the full-text constraint.
    pub fn with_content(mut self, text: impl Into<String>) -> Self {
        self.content = Some(text.into());
        self
    }

    /// Sets the count limit.
    pub fn with_count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    /// Sets the cursor for keyset pagination.
    pub fn with_cursor(mut self, cursor: String) -> Self {
        self.cursor = Some(cursor);
        self
    }
}
