//! Search parameter value extractor.
//!
//! Evaluates each parameter's path expression against a resource and converts
//! the selected nodes into [`IndexValue`]s. Paths are dotted element names
//! with optional `|` alternatives; `ofType(T)` selects a choice variant and
//! other function calls are skipped.

use std::sync::Arc;

use serde_json::Value;

use crate::registry::{ResourceTypeRegistry, SearchParameterDefinition};
use crate::types::SearchParamType;

use super::converters::{IndexValue, ValueConverter};
use super::errors::ExtractionError;

/// A value extracted from a resource for indexing.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedValue {
    /// The parameter name (e.g., "name", "identifier").
    pub param_name: String,

    /// The parameter type.
    pub param_type: SearchParamType,

    /// The extracted and converted value.
    pub value: IndexValue,
}

impl ExtractedValue {
    /// Creates a new extracted value.
    pub fn new(param_name: impl Into<String>, param_type: SearchParamType, value: IndexValue) -> Self {
        Self {
            param_name: param_name.into(),
            param_type,
            value,
        }
    }
}

/// Extracts searchable values from resources.
pub struct SearchParameterExtractor {
    registry: Arc<ResourceTypeRegistry>,
}

impl SearchParameterExtractor {
    /// Creates a new extractor with the given registry.
    pub fn new(registry: Arc<ResourceTypeRegistry>) -> Self {
        Self { registry }
    }

    /// Extracts all searchable values from a resource.
    ///
    /// A parameter whose value cannot be converted is logged and skipped; the
    /// remaining parameters are still indexed.
    pub fn extract(
        &self,
        resource: &Value,
        resource_type: &str,
    ) -> Result<Vec<ExtractedValue>, ExtractionError> {
        let obj = resource
            .as_object()
            .ok_or_else(|| ExtractionError::InvalidResource {
                message: "Resource must be a JSON object".to_string(),
            })?;

        if let Some(rt) = obj.get("resourceType").and_then(|v| v.as_str()) {
            if rt != resource_type {
                return Err(ExtractionError::InvalidResource {
                    message: format!(
                        "Resource type mismatch: expected {}, got {}",
                        resource_type, rt
                    ),
                });
            }
        }

        let mut results = Vec::new();
        for param in self.registry.active_params(resource_type) {
            match Self::extract_for_param(resource, &param) {
                Ok(values) => results.extend(values),
                Err(e) => {
                    tracing::warn!(
                        resource_type,
                        "Failed to extract values for parameter '{}': {}",
                        param.code,
                        e
                    );
                }
            }
        }

        Ok(results)
    }

    /// Extracts values for a specific parameter from a resource.
    pub fn extract_for_param(
        resource: &Value,
        param: &SearchParameterDefinition,
    ) -> Result<Vec<ExtractedValue>, ExtractionError> {
        let mut results = Vec::new();

        for path in param.paths() {
            for node in evaluate_path(resource, path) {
                for value in ValueConverter::convert(node, param.param_type, &param.code)? {
                    results.push(ExtractedValue::new(&param.code, param.param_type, value));
                }
            }
        }

        Ok(results)
    }
}

impl std::fmt::Debug for SearchParameterExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchParameterExtractor").finish()
    }
}

/// Evaluates a single dotted path against a resource, returning every node
/// it selects. Arrays along the way are flattened.
pub fn evaluate_path<'a>(resource: &'a Value, path: &str) -> Vec<&'a Value> {
    let segments = parse_path(path);
    if segments.is_empty() {
        return Vec::new();
    }

    let mut results = Vec::new();
    navigate(resource, &segments, &mut results);
    results
}

/// A segment of a parsed path expression.
#[derive(Debug, Clone, PartialEq)]
enum PathSegment {
    /// A field name to navigate to. Also matches `name[x]` choice variants.
    Field(String),
    /// A concrete choice variant, e.g. `valueQuantity`.
    Exact(String),
}

/// Splits a path on dots outside parentheses.
fn split_segments(path: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in path.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            '.' if depth == 0 => {
                parts.push(&path[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&path[start..]);
    parts
}

fn parse_path(expression: &str) -> Vec<PathSegment> {
    let mut parts = split_segments(expression.trim());

    // Skip the resource type prefix (e.g., "Patient.")
    if parts
        .first()
        .and_then(|p| p.chars().next())
        .is_some_and(|c| c.is_uppercase())
    {
        parts.remove(0);
    }

    let mut segments = Vec::new();
    for part in parts {
        if let Some(type_name) = part
            .strip_prefix("ofType(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            if let Some(PathSegment::Field(name)) = segments.pop() {
                segments.push(PathSegment::Exact(format!("{}{}", name, type_name.trim())));
            }
        } else if part.contains('(') || part.is_empty() {
            // where(), resolve() and similar are not evaluated
            continue;
        } else {
            segments.push(PathSegment::Field(part.to_string()));
        }
    }

    segments
}

fn navigate<'a>(value: &'a Value, segments: &[PathSegment], out: &mut Vec<&'a Value>) {
    let Some((segment, remaining)) = segments.split_first() else {
        out.push(value);
        return;
    };

    match value {
        Value::Array(arr) => {
            for item in arr {
                navigate(item, segments, out);
            }
        }
        Value::Object(obj) => match segment {
            PathSegment::Exact(name) => {
                if let Some(child) = obj.get(name) {
                    navigate(child, remaining, out);
                }
            }
            PathSegment::Field(name) => {
                if let Some(child) = obj.get(name) {
                    navigate(child, remaining, out);
                } else {
                    // Choice element, e.g. "effective" -> "effectiveDateTime"
                    for (key, child) in obj {
                        if is_choice_variant(key, name) {
                            navigate(child, remaining, out);
                        }
                    }
                }
            }
        },
        _ => {}
    }
}

/// Returns true if `key` is `name` followed by a capitalized type suffix.
pub(crate) fn is_choice_variant(key: &str, name: &str) -> bool {
    key.strip_prefix(name)
        .and_then(|suffix| suffix.chars().next())
        .is_some_and(|c| c.is_ascii_uppercase())
}
