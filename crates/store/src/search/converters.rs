//! Value Converters for Search Index.
//!
//! Converts the JSON nodes selected by a parameter path into index-friendly
//! values. Each data type is mapped to the columns of one index table.

use serde_json::Value;

use crate::types::SearchParamType;

use super::errors::ExtractionError;
use super::normalize::{
    DateRange, canonicalize_quantity, decimal_to_f64, normalize_string, parse_decimal,
};

/// A value extracted and converted for the search index.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexValue {
    /// String value, stored normalized for matching and as written for `:exact`.
    String {
        /// Lowercased, accent-folded form.
        normalized: String,
        /// The original text.
        exact: String,
    },

    /// Token value (code with optional system).
    Token {
        /// Code system URI (e.g., "http://loinc.org").
        system: Option<String>,
        /// Code value. Empty for display-only entries.
        code: String,
        /// Display text (Coding.display or CodeableConcept.text) for `:text`.
        display: Option<String>,
    },

    /// Numeric value.
    Number(f64),

    /// Quantity value with its canonical form when the unit is known.
    Quantity {
        /// Numeric value as written.
        value: f64,
        /// Unit system URI (e.g., "http://unitsofmeasure.org").
        system: Option<String>,
        /// Unit code (e.g., "mg").
        code: Option<String>,
        /// Human readable unit.
        unit: Option<String>,
        /// Value converted to the canonical unit.
        canonical_value: Option<f64>,
        /// The canonical unit code.
        canonical_code: Option<String>,
    },

    /// Date, dateTime, instant or Period as an inclusive millisecond range.
    Date(DateRange),

    /// URI value.
    Uri(String),

    /// Geographic position.
    Coordinates {
        /// Latitude in degrees.
        latitude: f64,
        /// Longitude in degrees.
        longitude: f64,
    },
}

impl IndexValue {
    /// Creates a string index value.
    pub fn string(s: impl Into<String>) -> Self {
        let exact = s.into();
        IndexValue::String {
            normalized: normalize_string(&exact),
            exact,
        }
    }

    /// Creates a token index value with system and code.
    pub fn token(system: Option<String>, code: impl Into<String>) -> Self {
        IndexValue::Token {
            system,
            code: code.into(),
            display: None,
        }
    }

    /// Creates a token index value with display text for `:text`.
    pub fn token_with_display(
        system: Option<String>,
        code: impl Into<String>,
        display: Option<String>,
    ) -> Self {
        IndexValue::Token {
            system,
            code: code.into(),
            display,
        }
    }

    /// Creates a URI index value.
    pub fn uri(uri: impl Into<String>) -> Self {
        IndexValue::Uri(uri.into())
    }

    /// Returns the parameter type this value is appropriate for.
    pub fn param_type(&self) -> SearchParamType {
        match self {
            IndexValue::String { .. } => SearchParamType::String,
            IndexValue::Token { .. } => SearchParamType::Token,
            IndexValue::Number(_) => SearchParamType::Number,
            IndexValue::Quantity { .. } => SearchParamType::Quantity,
            IndexValue::Date(_) => SearchParamType::Date,
            IndexValue::Uri(_) => SearchParamType::Uri,
            IndexValue::Coordinates { .. } => SearchParamType::Special,
        }
    }
}

/// Converter for transforming JSON values to index values.
pub struct ValueConverter;

impl ValueConverter {
    /// Converts a JSON value to index values based on the target parameter type.
    ///
    /// May return multiple values for arrays or complex types. Reference
    /// parameters produce nothing here; they are tracked as links.
    pub fn convert(
        value: &Value,
        target_type: SearchParamType,
        param_name: &str,
    ) -> Result<Vec<IndexValue>, ExtractionError> {
        match value {
            Value::Array(arr) => {
                let mut results = Vec::new();
                for item in arr {
                    results.extend(Self::convert_single(item, target_type, param_name)?);
                }
                Ok(results)
            }
            _ => Self::convert_single(value, target_type, param_name),
        }
    }

    fn convert_single(
        value: &Value,
        target_type: SearchParamType,
        param_name: &str,
    ) -> Result<Vec<IndexValue>, ExtractionError> {
        match target_type {
            SearchParamType::String => Ok(Self::convert_to_string(value)),
            SearchParamType::Token => Ok(Self::convert_to_token(value)),
            SearchParamType::Date => Self::convert_to_date(value, param_name),
            SearchParamType::Number => Self::convert_to_number(value, param_name),
            SearchParamType::Quantity => Self::convert_to_quantity(value, param_name),
            SearchParamType::Uri => Ok(Self::convert_to_uri(value)),
            SearchParamType::Special => Ok(Self::convert_to_coordinates(value)),
            SearchParamType::Reference => Ok(Vec::new()),
        }
    }

    fn convert_to_string(value: &Value) -> Vec<IndexValue> {
        let mut results = Vec::new();

        match value {
            Value::String(s) => results.push(IndexValue::string(s.as_str())),
            Value::Object(obj) => {
                // HumanName and Address parts
                for key in ["family", "text", "city", "district", "state", "postalCode", "country"]
                {
                    if let Some(s) = obj.get(key).and_then(|v| v.as_str()) {
                        results.push(IndexValue::string(s));
                    }
                }
                for key in ["given", "prefix", "suffix", "line"] {
                    if let Some(parts) = obj.get(key).and_then(|v| v.as_array()) {
                        results.extend(parts.iter().filter_map(|p| p.as_str()).map(IndexValue::string));
                    }
                }
            }
            _ => {}
        }

        results
    }

    fn convert_to_token(value: &Value) -> Vec<IndexValue> {
        let mut results = Vec::new();
        let text = |obj: &serde_json::Map<String, Value>, key: &str| {
            obj.get(key).and_then(|v| v.as_str()).map(String::from)
        };

        match value {
            Value::String(s) => results.push(IndexValue::token(None, s.as_str())),
            Value::Bool(b) => results.push(IndexValue::token(None, b.to_string())),
            Value::Object(obj) => {
                if let Some(coding) = obj.get("coding").and_then(|v| v.as_array()) {
                    // CodeableConcept
                    for c in coding.iter().filter_map(|c| c.as_object()) {
                        if let Some(code) = c.get("code").and_then(|v| v.as_str()) {
                            results.push(IndexValue::token_with_display(
                                text(c, "system"),
                                code,
                                text(c, "display"),
                            ));
                        }
                    }
                    if let Some(t) = text(obj, "text").filter(|t| !t.is_empty()) {
                        results.push(IndexValue::token_with_display(None, "", Some(t)));
                    }
                } else if let Some(code) = obj.get("code").and_then(|v| v.as_str()) {
                    // Coding
                    results.push(IndexValue::token_with_display(
                        text(obj, "system"),
                        code,
                        text(obj, "display"),
                    ));
                } else if let Some(v) = obj.get("value").and_then(|v| v.as_str()) {
                    // Identifier or ContactPoint
                    if !v.is_empty() {
                        results.push(IndexValue::token(text(obj, "system"), v));
                    }
                }
            }
            _ => {}
        }

        results
    }

    fn convert_to_date(value: &Value, param_name: &str) -> Result<Vec<IndexValue>, ExtractionError> {
        let range = match value {
            Value::String(s) => Some(DateRange::parse(s).ok_or_else(|| {
                ExtractionError::ConversionFailed {
                    param_name: param_name.to_string(),
                    expected_type: "date".to_string(),
                    actual_value: s.clone(),
                }
            })?),
            Value::Object(obj) => {
                // Period, or Timing.repeat.boundsPeriod
                let period = obj
                    .get("repeat")
                    .and_then(|r| r.get("boundsPeriod"))
                    .unwrap_or(value);
                DateRange::from_period(
                    period.get("start").and_then(|v| v.as_str()),
                    period.get("end").and_then(|v| v.as_str()),
                )
            }
            _ => None,
        };

        Ok(range.map(IndexValue::Date).into_iter().collect())
    }

    fn convert_to_number(
        value: &Value,
        param_name: &str,
    ) -> Result<Vec<IndexValue>, ExtractionError> {
        let text = match value {
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            _ => return Ok(Vec::new()),
        };

        let number = parse_decimal(&text)
            .and_then(decimal_to_f64)
            .ok_or_else(|| ExtractionError::ConversionFailed {
                param_name: param_name.to_string(),
                expected_type: "number".to_string(),
                actual_value: text.clone(),
            })?;
        Ok(vec![IndexValue::Number(number)])
    }

    fn convert_to_quantity(
        value: &Value,
        param_name: &str,
    ) -> Result<Vec<IndexValue>, ExtractionError> {
        let Value::Object(obj) = value else {
            return Ok(Vec::new());
        };
        let Some(raw) = obj.get("value") else {
            return Ok(Vec::new());
        };

        let raw_text = match raw {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let decimal =
            parse_decimal(&raw_text).ok_or_else(|| ExtractionError::ConversionFailed {
                param_name: param_name.to_string(),
                expected_type: "quantity".to_string(),
                actual_value: raw_text.clone(),
            })?;

        let system = obj.get("system").and_then(|v| v.as_str()).map(String::from);
        let code = obj.get("code").and_then(|v| v.as_str()).map(String::from);
        let unit = obj.get("unit").and_then(|v| v.as_str()).map(String::from);

        let canonical = canonicalize_quantity(
            decimal,
            system.as_deref(),
            code.as_deref().or(unit.as_deref()),
        );

        Ok(vec![IndexValue::Quantity {
            value: decimal_to_f64(decimal).unwrap_or_default(),
            system,
            code,
            unit,
            canonical_value: canonical.and_then(|(v, _)| decimal_to_f64(v)),
            canonical_code: canonical.map(|(_, c)| c.to_string()),
        }])
    }

    fn convert_to_uri(value: &Value) -> Vec<IndexValue> {
        match value {
            Value::String(s) => vec![IndexValue::uri(s.as_str())],
            _ => Vec::new(),
        }
    }

    fn convert_to_coordinates(value: &Value) -> Vec<IndexValue> {
        let latitude = value.get("latitude").and_then(|v| v.as_f64());
        let longitude = value.get("longitude").and_then(|v| v.as_f64());
        match (latitude, longitude) {
            (Some(latitude), Some(longitude)) => vec![IndexValue::Coordinates {
                latitude,
                longitude,
            }],
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_convert_string() {
        let results = ValueConverter::convert(&json!("Smïth"), SearchParamType::String, "name")
            .unwrap();
        assert_eq!(
            results,
            vec![IndexValue::String {
                normalized: "smith".to_string(),
                exact: "Smïth".to_string()
            }]
        );
    }

    #[test]
    fn test_convert_human_name() {
        let value = json!({
            "family": "Smith",
            "given": ["John", "Jane"]
        });
        let results = ValueConverter::convert(&value, SearchParamType::String, "name").unwrap();
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn test_convert_codeable_concept() {
        let value = json!({
            "coding": [
                {"system": "http://loinc.org", "code": "8867-4", "display": "Heart rate"},
                {"system": "http://snomed.info/sct", "code": "364075005"}
            ],
            "text": "Pulse"
        });
        let results = ValueConverter::convert(&value, SearchParamType::Token, "code").unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(
            results[0],
            IndexValue::token_with_display(
                Some("http://loinc.org".to_string()),
                "8867-4",
                Some("Heart rate".to_string())
            )
        );
        assert_eq!(
            results[2],
            IndexValue::token_with_display(None, "", Some("Pulse".to_string()))
        );
    }

    #[test]
    fn test_convert_identifier_and_boolean() {
        let value = json!([{"system": "http://hospital.org/mrn", "value": "12345"}]);
        let results =
            ValueConverter::convert(&value, SearchParamType::Token, "identifier").unwrap();
        assert_eq!(
            results,
            vec![IndexValue::token(Some("http://hospital.org/mrn".to_string()), "12345")]
        );

        let results = ValueConverter::convert(&json!(true), SearchParamType::Token, "active")
            .unwrap();
        assert_eq!(results, vec![IndexValue::token(None, "true")]);
    }

    #[test]
    fn test_convert_date_and_period() {
        let results =
            ValueConverter::convert(&json!("2024-01-15"), SearchParamType::Date, "date").unwrap();
        assert_eq!(results.len(), 1);

        let period = json!({"start": "2024-01-01", "end": "2024-01-31"});
        let results = ValueConverter::convert(&period, SearchParamType::Date, "date").unwrap();
        let IndexValue::Date(range) = results[0] else {
            panic!("expected a date");
        };
        assert!(DateRange::parse("2024-01-15").unwrap().within(&range));

        let err = ValueConverter::convert(&json!("soon"), SearchParamType::Date, "date");
        assert!(matches!(err, Err(ExtractionError::ConversionFailed { .. })));
    }

    #[test]
    fn test_convert_number() {
        let results =
            ValueConverter::convert(&json!(0.25), SearchParamType::Number, "probability").unwrap();
        assert_eq!(results, vec![IndexValue::Number(0.25)]);

        let err = ValueConverter::convert(&json!("high"), SearchParamType::Number, "probability");
        assert!(err.is_err());
    }

    #[test]
    fn test_convert_quantity_canonical() {
        let value = json!({
            "value": 1500,
            "unit": "milligram",
            "system": "http://unitsofmeasure.org",
            "code": "mg"
        });
        let results =
            ValueConverter::convert(&value, SearchParamType::Quantity, "value-quantity").unwrap();

        let IndexValue::Quantity {
            value,
            canonical_value,
            canonical_code,
            ..
        } = &results[0]
        else {
            panic!("expected a quantity");
        };
        assert!((value - 1500.0).abs() < f64::EPSILON);
        assert!((canonical_value.unwrap() - 1.5).abs() < 1e-9);
        assert_eq!(canonical_code.as_deref(), Some("g"));
    }

    #[test]
    fn test_reference_produces_no_index_value() {
        let value = json!({"reference": "Patient/123"});
        let results =
            ValueConverter::convert(&value, SearchParamType::Reference, "subject").unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_convert_coordinates() {
        let value = json!({"latitude": 42.25, "longitude": -83.7});
        let results = ValueConverter::convert(&value, SearchParamType::Special, "near").unwrap();
        assert_eq!(
            results,
            vec![IndexValue::Coordinates {
                latitude: 42.25,
                longitude: -83.7
            }]
        );
    }
}
