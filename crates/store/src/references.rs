//! Outbound reference extraction.
//!
//! Every `Reference` element in a resource becomes a [`ReferenceLink`] keyed
//! by the element path it was found at (array positions are not part of the
//! path, so `Observation.performer` covers every performer). References to
//! contained resources (`#id`) are not links.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One outbound reference from a resource's current version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceLink {
    /// Type of the referring resource.
    pub source_type: String,
    /// Logical id of the referring resource.
    pub source_id: String,
    /// Forced id of the referring resource, when it has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_forced_id: Option<String>,
    /// Element path of the reference, e.g. `Patient.managingOrganization`.
    pub source_path: String,
    /// Target type, when the reference names one.
    pub target_type: Option<String>,
    /// Logical id of the target, when it resolved to a stored resource.
    pub target_id: Option<String>,
    /// The reference as written, when it did not resolve.
    pub target_uri: Option<String>,
}

impl ReferenceLink {
    /// Returns true if the link points at a stored resource.
    pub fn is_resolved(&self) -> bool {
        self.target_id.is_some()
    }

    /// Returns the id clients use for the referring resource: its forced id
    /// when present, else its logical id.
    pub fn source_public_id(&self) -> &str {
        self.source_forced_id.as_deref().unwrap_or(&self.source_id)
    }

    /// Returns `Type/id` for resolved links, else the unresolved URI.
    pub fn target(&self) -> String {
        match (&self.target_type, &self.target_id, &self.target_uri) {
            (Some(t), Some(id), _) => format!("{}/{}", t, id),
            (_, _, Some(uri)) => uri.clone(),
            _ => String::new(),
        }
    }
}

/// A reference found in content, before resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReference {
    /// Element path of the reference.
    pub path: String,
    /// The reference string as written.
    pub reference: String,
}

/// How a reference string should be resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedReference {
    /// A reference to a resource on this server.
    Local {
        /// Target resource type.
        resource_type: String,
        /// Target id as written (logical or forced id).
        id: String,
    },
    /// Anything else: another server, a URN, a logical URI.
    External(String),
}

impl ParsedReference {
    /// Classifies a reference string.
    ///
    /// `Type/id`, `Type/id/_history/n` and absolute URLs under `base_url` are
    /// local. Everything else is external.
    pub fn parse(reference: &str, base_url: Option<&str>) -> Self {
        let relative = match base_url {
            Some(base) => reference
                .strip_prefix(base)
                .and_then(|r| r.strip_prefix('/'))
                .unwrap_or(reference),
            None => reference,
        };

        if relative.contains("://") || relative.starts_with("urn:") {
            return ParsedReference::External(reference.to_string());
        }

        let mut parts = relative.split('/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(resource_type), Some(id), rest)
                if is_type_name(resource_type)
                    && !id.is_empty()
                    && matches!(rest, None | Some("_history")) =>
            {
                ParsedReference::Local {
                    resource_type: resource_type.to_string(),
                    id: id.to_string(),
                }
            }
            _ => ParsedReference::External(reference.to_string()),
        }
    }
}

fn is_type_name(s: &str) -> bool {
    s.chars().next().is_some_and(|c| c.is_ascii_uppercase())
        && s.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Collects every reference in a resource with the path it was found at.
pub fn extract_references(resource_type: &str, content: &Value) -> Vec<RawReference> {
    let mut found = Vec::new();
    if let Value::Object(obj) = content {
        for (key, value) in obj {
            if key != "contained" {
                walk(value, &format!("{}.{}", resource_type, key), &mut found);
            }
        }
    }
    found
}

fn walk(value: &Value, path: &str, found: &mut Vec<RawReference>) {
    match value {
        Value::Array(arr) => {
            for item in arr {
                walk(item, path, found);
            }
        }
        Value::Object(obj) => {
            if let Some(reference) = obj.get("reference").and_then(|r| r.as_str()) {
                if !reference.starts_with('#') && !reference.is_empty() {
                    found.push(RawReference {
                        path: path.to_string(),
                        reference: reference.to_string(),
                    });
                }
            }
            for (key, child) in obj {
                if key != "reference" {
                    walk(child, &format!("{}.{}", path, key), found);
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_references() {
        let observation = json!({
            "resourceType": "Observation",
            "subject": {"reference": "Patient/p1"},
            "performer": [
                {"reference": "Practitioner/dr1"},
                {"reference": "Organization/org1", "display": "Acme"}
            ],
            "specimen": {"reference": "#spec1"},
            "contained": [{"resourceType": "Specimen", "id": "spec1",
                           "subject": {"reference": "Patient/other"}}],
            "extension": [{"url": "http://example.com/ext",
                           "valueReference": {"reference": "Device/d1"}}]
        });

        let refs = extract_references("Observation", &observation);
        let mut pairs: Vec<(&str, &str)> = refs
            .iter()
            .map(|r| (r.path.as_str(), r.reference.as_str()))
            .collect();
        pairs.sort();

        assert_eq!(
            pairs,
            vec![
                ("Observation.extension.valueReference", "Device/d1"),
                ("Observation.performer", "Organization/org1"),
                ("Observation.performer", "Practitioner/dr1"),
                ("Observation.subject", "Patient/p1"),
            ]
        );
    }

    #[test]
    fn test_parse_reference() {
        assert_eq!(
            ParsedReference::parse("Patient/123", None),
            ParsedReference::Local {
                resource_type: "Patient".to_string(),
                id: "123".to_string()
            }
        );
        assert_eq!(
            ParsedReference::parse("Patient/123/_history/2", None),
            ParsedReference::Local {
                resource_type: "Patient".to_string(),
                id: "123".to_string()
            }
        );
        assert_eq!(
            ParsedReference::parse("http://example.com/fhir/Patient/9", Some("http://example.com/fhir")),
            ParsedReference::Local {
                resource_type: "Patient".to_string(),
                id: "9".to_string()
            }
        );
        assert!(matches!(
            ParsedReference::parse("http://other.org/fhir/Patient/9", Some("http://example.com/fhir")),
            ParsedReference::External(_)
        ));
        assert!(matches!(
            ParsedReference::parse("urn:uuid:0c3151bd", None),
            ParsedReference::External(_)
        ));
        assert!(matches!(
            ParsedReference::parse("patient/1", None),
            ParsedReference::External(_)
        ));
    }

    #[test]
    fn test_link_target() {
        let link = ReferenceLink {
            source_type: "Patient".to_string(),
            source_id: "p1".to_string(),
            source_forced_id: None,
            source_path: "Patient.managingOrganization".to_string(),
            target_type: Some("Organization".to_string()),
            target_id: Some("o1".to_string()),
            target_uri: None,
        };
        assert!(link.is_resolved());
        assert_eq!(link.target(), "Organization/o1");
        assert_eq!(link.source_public_id(), "p1");

        let forced = ReferenceLink {
            source_forced_id: Some("mrn-7".to_string()),
            ..link
        };
        assert_eq!(forced.source_public_id(), "mrn-7");
    }
}
