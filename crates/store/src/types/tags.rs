//! Resource-level tags, profiles and security labels.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which `meta` list a tag came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TagScheme {
    /// `meta.tag`
    Tag,
    /// `meta.profile`
    Profile,
    /// `meta.security`
    SecurityLabel,
}

impl TagScheme {
    /// Returns the string stored in the tag catalog.
    pub fn as_str(&self) -> &'static str {
        match self {
            TagScheme::Tag => "tag",
            TagScheme::Profile => "profile",
            TagScheme::SecurityLabel => "security-label",
        }
    }

    /// Parses a stored scheme string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tag" => Some(TagScheme::Tag),
            "profile" => Some(TagScheme::Profile),
            "security-label" => Some(TagScheme::SecurityLabel),
            _ => None,
        }
    }
}

/// A (scheme, system, code, display) tuple.
///
/// Profiles carry their canonical URL in `code` and leave `system` empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    /// The meta list this tag belongs to.
    pub scheme: TagScheme,
    /// Coding system.
    pub system: Option<String>,
    /// Code, or profile URL.
    pub code: Option<String>,
    /// Display text.
    pub display: Option<String>,
}

impl Tag {
    /// Creates a `meta.tag` entry.
    pub fn tag(system: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            scheme: TagScheme::Tag,
            system: Some(system.into()),
            code: Some(code.into()),
            display: None,
        }
    }

    /// Creates a `meta.security` entry.
    pub fn security(system: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            scheme: TagScheme::SecurityLabel,
            system: Some(system.into()),
            code: Some(code.into()),
            display: None,
        }
    }

    /// Creates a `meta.profile` entry.
    pub fn profile(url: impl Into<String>) -> Self {
        Self {
            scheme: TagScheme::Profile,
            system: None,
            code: Some(url.into()),
            display: None,
        }
    }

    /// Sets the display text.
    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }

    /// Reads every tag, security label and profile from a resource's `meta`.
    ///
    /// Duplicates within one resource are collapsed.
    pub fn extract_from(resource: &Value) -> Vec<Tag> {
        let mut tags = Vec::new();
        let Some(meta) = resource.get("meta") else {
            return tags;
        };

        for (key, scheme) in [("tag", TagScheme::Tag), ("security", TagScheme::SecurityLabel)] {
            if let Some(codings) = meta.get(key).and_then(|v| v.as_array()) {
                for coding in codings {
                    let tag = Tag {
                        scheme,
                        system: str_field(coding, "system"),
                        code: str_field(coding, "code"),
                        display: str_field(coding, "display"),
                    };
                    if (tag.system.is_some() || tag.code.is_some()) && !tags.contains(&tag) {
                        tags.push(tag);
                    }
                }
            }
        }

        if let Some(profiles) = meta.get("profile").and_then(|v| v.as_array()) {
            for url in profiles.iter().filter_map(|v| v.as_str()) {
                let tag = Tag::profile(url);
                if !tags.contains(&tag) {
                    tags.push(tag);
                }
            }
        }

        tags
    }
}

fn str_field(value: &Value, name: &str) -> Option<String> {
    value
        .get(name)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_from_meta() {
        let resource = json!({
            "resourceType": "Patient",
            "meta": {
                "tag": [
                    {"system": "http://acme/tags", "code": "vip", "display": "VIP"},
                    {"system": "http://acme/tags", "code": "vip", "display": "VIP"}
                ],
                "security": [{"system": "http://terminology.hl7.org/CodeSystem/v3-Confidentiality", "code": "R"}],
                "profile": ["http://example.com/profile/a"]
            }
        });

        let tags = Tag::extract_from(&resource);
        assert_eq!(tags.len(), 3);
        assert_eq!(tags[0], Tag::tag("http://acme/tags", "vip").with_display("VIP"));
        assert_eq!(tags[1].scheme, TagScheme::SecurityLabel);
        assert_eq!(tags[2], Tag::profile("http://example.com/profile/a"));
    }

    #[test]
    fn test_extract_without_meta() {
        assert!(Tag::extract_from(&json!({"resourceType": "Patient"})).is_empty());
    }

    #[test]
    fn test_scheme_round_trip() {
        for scheme in [TagScheme::Tag, TagScheme::Profile, TagScheme::SecurityLabel] {
            assert_eq!(TagScheme::parse(scheme.as_str()), Some(scheme));
        }
    }
}
