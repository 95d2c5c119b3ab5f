//! Value set membership.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StorageResult;

/// Resolves StructureDefinitions by canonical URL.
#[async_trait]
pub trait ProfileResolver: Send + Sync {
    /// Returns the StructureDefinition with this URL, or `None` if unknown.
    async fn resolve_profile(&self, url: &str) -> StorageResult<Option<Value>>;
}

/// Answers value set membership questions.
#[async_trait]
pub trait TerminologyResolver: Send + Sync {
    /// Checks whether a code is a member of a value set.
    ///
    /// Returns `None` when the value set is unknown or cannot be evaluated.
    async fn validate_code(
        &self,
        value_set: &str,
        system: Option<&str>,
        code: &str,
    ) -> StorageResult<Option<bool>>;
}

/// Strips a `|version` suffix from a canonical URL.
pub fn canonical_url(url: &str) -> &str {
    url.split('|').next().unwrap_or(url)
}

/// Evaluates membership against a ValueSet resource.
///
/// The expansion is used when present. Otherwise each `compose.include`
/// entry is checked: enumerated concepts must match the code, and an
/// include naming only a system admits every code from it. Returns `None`
/// if the value set has neither.
pub fn value_set_contains(value_set: &Value, system: Option<&str>, code: &str) -> Option<bool> {
    if let Some(contains) = value_set
        .get("expansion")
        .and_then(|e| e.get("contains"))
        .and_then(|c| c.as_array())
    {
        return Some(expansion_contains(contains, system, code));
    }

    let includes = value_set
        .get("compose")
        .and_then(|c| c.get("include"))
        .and_then(|i| i.as_array())?;

    let system_matches = |include: &Value| match (system, include.get("system").and_then(|s| s.as_str())) {
        (Some(wanted), Some(actual)) => wanted == actual,
        _ => true,
    };

    let found = includes.iter().filter(|inc| system_matches(inc)).any(|include| {
        match include.get("concept").and_then(|c| c.as_array()) {
            Some(concepts) => concepts
                .iter()
                .any(|c| c.get("code").and_then(|v| v.as_str()) == Some(code)),
            None => include.get("system").is_some(),
        }
    });

    Some(found)
}

fn expansion_contains(entries: &[Value], system: Option<&str>, code: &str) -> bool {
    entries.iter().any(|entry| {
        let code_matches = entry.get("code").and_then(|v| v.as_str()) == Some(code);
        let system_matches = match system {
            Some(wanted) => entry.get("system").and_then(|v| v.as_str()) == Some(wanted),
            None => true,
        };
        (code_matches && system_matches)
            || entry
                .get("contains")
                .and_then(|c| c.as_array())
                .is_some_and(|nested| expansion_contains(nested, system, code))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_compose_concepts() {
        let vs = json!({
            "resourceType": "ValueSet",
            "url": "http://hl7.org/fhir/ValueSet/observation-status",
            "compose": {"include": [{
                "system": "http://hl7.org/fhir/observation-status",
                "concept": [{"code": "final"}, {"code": "amended"}]
            }]}
        });

        assert_eq!(value_set_contains(&vs, None, "final"), Some(true));
        assert_eq!(
            value_set_contains(&vs, Some("http://hl7.org/fhir/observation-status"), "amended"),
            Some(true)
        );
        assert_eq!(value_set_contains(&vs, None, "bogus"), Some(false));
        assert_eq!(value_set_contains(&vs, Some("http://other"), "final"), Some(false));
    }

    #[test]
    fn test_whole_system_include() {
        let vs = json!({"compose": {"include": [{"system": "http://loinc.org"}]}});
        assert_eq!(value_set_contains(&vs, Some("http://loinc.org"), "1234-5"), Some(true));
        assert_eq!(value_set_contains(&vs, Some("http://snomed.info/sct"), "1"), Some(false));
    }

    #[test]
    fn test_nested_expansion() {
        let vs = json!({"expansion": {"contains": [
            {"system": "s", "code": "parent", "contains": [{"system": "s", "code": "child"}]}
        ]}});
        assert_eq!(value_set_contains(&vs, Some("s"), "child"), Some(true));
        assert_eq!(value_set_contains(&vs, None, "other"), Some(false));
        assert_eq!(value_set_contains(&json!({"resourceType": "ValueSet"}), None, "x"), None);
    }

    #[test]
    fn test_canonical_url() {
        assert_eq!(canonical_url("http://a/b|4.0.1"), "http://a/b");
        assert_eq!(canonical_url("http://a/b"), "http://a/b");
    }
}
