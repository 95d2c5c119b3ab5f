//! Resource type registry.
//!
//! The registry maps each resource type name to its [`ResourceTypeDescriptor`]
//! (search parameters and required elements). It is built once at startup and
//! handed to the backend explicitly:
//!
//! ```
//! use helios_store::registry::ResourceTypeRegistry;
//!
//! let registry = ResourceTypeRegistry::with_defaults();
//! assert!(registry.contains("Patient"));
//! assert!(registry.search_param("Patient", "_id").is_some());
//! assert!(registry.search_param("Patient", "family").is_some());
//! ```
//!
//! Parameters whose base is `Resource` apply to every registered type.

mod definition;
mod embedded;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::SearchParamType;

pub use definition::{ResourceTypeDescriptor, SearchParameterDefinition};

/// Error during registry operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RegistryError {
    /// A descriptor for this type is already registered.
    DuplicateType {
        /// The resource type name.
        resource_type: String,
    },

    /// The resource type is not registered.
    NotFound {
        /// The resource type name.
        resource_type: String,
    },

    /// A definition could not be read.
    InvalidDefinition {
        /// Description of the problem.
        message: String,
        /// URL of the definition, if known.
        url: Option<String>,
    },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicateType { resource_type } => {
                write!(f, "Resource type '{}' is already registered", resource_type)
            }
            RegistryError::NotFound { resource_type } => {
                write!(f, "Resource type '{}' is not registered", resource_type)
            }
            RegistryError::InvalidDefinition { message, url } => {
                if let Some(url) = url {
                    write!(f, "Invalid SearchParameter '{}': {}", url, message)
                } else {
                    write!(f, "Invalid SearchParameter: {}", message)
                }
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Registry of resource type descriptors.
pub struct ResourceTypeRegistry {
    /// Descriptors indexed by type name.
    types: HashMap<String, ResourceTypeDescriptor>,

    /// Parameters that apply to every type.
    common: Vec<Arc<SearchParameterDefinition>>,
}

impl ResourceTypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            types: HashMap::new(),
            common: Vec::new(),
        }
    }

    /// Creates a registry holding the built-in resource types and the
    /// parameters common to all resources.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.common = embedded::common_search_parameters()
            .into_iter()
            .map(Arc::new)
            .collect();
        for descriptor in embedded::builtin_descriptors() {
            registry
                .types
                .insert(descriptor.name().to_string(), descriptor);
        }

        tracing::info!(
            resource_types = registry.types.len(),
            common_params = registry.common.len(),
            "Loaded built-in resource type registry"
        );
        registry
    }

    /// Returns the number of registered resource types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns true if no resource types are registered.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Registers a resource type descriptor.
    pub fn register(&mut self, descriptor: ResourceTypeDescriptor) -> Result<(), RegistryError> {
        if self.types.contains_key(descriptor.name()) {
            return Err(RegistryError::DuplicateType {
                resource_type: descriptor.name().to_string(),
            });
        }

        let name = descriptor.name().to_string();
        tracing::debug!(resource_type = %name, "Registered resource type");
        self.types.insert(name, descriptor);
        Ok(())
    }

    /// Adds a search parameter to every type named in its base.
    ///
    /// A base of `Resource` or `DomainResource` makes the parameter common to
    /// all types. Other base types must already be registered.
    pub fn register_search_param(
        &mut self,
        definition: SearchParameterDefinition,
    ) -> Result<(), RegistryError> {
        if definition.base.is_empty() {
            return Err(RegistryError::InvalidDefinition {
                message: "base must name at least one resource type".to_string(),
                url: Some(definition.url),
            });
        }

        if let Some(unknown) = definition
            .base
            .iter()
            .find(|b| !is_common_base(b) && !self.types.contains_key(b.as_str()))
        {
            return Err(RegistryError::NotFound {
                resource_type: unknown.clone(),
            });
        }

        let url = definition.url.clone();
        if definition.base.iter().any(|b| is_common_base(b)) {
            self.common.retain(|p| p.code != definition.code);
            self.common.push(Arc::new(definition));
        } else {
            for base in definition.base.clone() {
                if let Some(descriptor) = self.types.get_mut(&base) {
                    descriptor.add_definition(definition.clone());
                }
            }
        }

        tracing::debug!(url = %url, "Registered search parameter");
        Ok(())
    }

    /// Loads SearchParameter resources from JSON.
    ///
    /// Accepts a single SearchParameter resource or a Bundle of them. Base
    /// types that are not yet registered get an empty descriptor, so a JSON
    /// document can introduce new resource types. Returns the number of
    /// parameters loaded.
    pub fn load_from_json(&mut self, json: &Value) -> Result<usize, RegistryError> {
        let resources: Vec<&Value> = match json.get("resourceType").and_then(|v| v.as_str()) {
            Some("Bundle") => json
                .get("entry")
                .and_then(|e| e.as_array())
                .map(|entries| {
                    entries
                        .iter()
                        .filter_map(|entry| entry.get("resource"))
                        .filter(|r| {
                            r.get("resourceType").and_then(|t| t.as_str())
                                == Some("SearchParameter")
                        })
                        .collect()
                })
                .unwrap_or_default(),
            Some("SearchParameter") => vec![json],
            other => {
                return Err(RegistryError::InvalidDefinition {
                    message: format!(
                        "expected SearchParameter or Bundle, found {}",
                        other.unwrap_or("no resourceType")
                    ),
                    url: None,
                });
            }
        };

        let mut count = 0;
        for resource in resources {
            let definition = parse_search_parameter(resource)?;
            for base in &definition.base {
                if !is_common_base(base) && !self.types.contains_key(base) {
                    self.register(ResourceTypeDescriptor::new(base.clone()))?;
                }
            }
            self.register_search_param(definition)?;
            count += 1;
        }

        tracing::info!(count, "Loaded search parameters from JSON");
        Ok(count)
    }

    /// Gets the descriptor for a resource type.
    pub fn get(&self, resource_type: &str) -> Option<&ResourceTypeDescriptor> {
        self.types.get(resource_type)
    }

    /// Returns true if the resource type is registered.
    pub fn contains(&self, resource_type: &str) -> bool {
        self.types.contains_key(resource_type)
    }

    /// Looks up a parameter by type and code, falling back to common parameters.
    pub fn search_param(
        &self,
        resource_type: &str,
        code: &str,
    ) -> Option<Arc<SearchParameterDefinition>> {
        self.types
            .get(resource_type)
            .and_then(|d| d.search_param(code))
            .or_else(|| self.common.iter().find(|p| p.code == code))
            .cloned()
    }

    /// Returns every parameter indexed for a resource type, common ones first.
    pub fn active_params(&self, resource_type: &str) -> Vec<Arc<SearchParameterDefinition>> {
        let Some(descriptor) = self.types.get(resource_type) else {
            return Vec::new();
        };

        self.common
            .iter()
            .filter(|c| descriptor.search_param(&c.code).is_none())
            .chain(descriptor.search_params())
            .cloned()
            .collect()
    }

    /// Returns the registered type names, sorted.
    pub fn resource_types(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ResourceTypeRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for ResourceTypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceTypeRegistry")
            .field("resource_types", &self.resource_types())
            .field("common_params", &self.common.len())
            .finish()
    }
}

fn is_common_base(base: &str) -> bool {
    base == "Resource" || base == "DomainResource"
}

/// Reads a FHIR SearchParameter resource into a definition.
fn parse_search_parameter(resource: &Value) -> Result<SearchParameterDefinition, RegistryError> {
    let url = resource
        .get("url")
        .and_then(|v| v.as_str())
        .ok_or_else(|| RegistryError::InvalidDefinition {
            message: "missing required field 'url'".to_string(),
            url: None,
        })?
        .to_string();

    let field = |name: &str| -> Result<String, RegistryError> {
        resource
            .get(name)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(String::from)
            .ok_or_else(|| RegistryError::InvalidDefinition {
                message: format!("missing required field '{}'", name),
                url: Some(url.clone()),
            })
    };

    let code = field("code")?;
    let type_str = field("type")?;
    let expression = field("expression")?;

    let param_type =
        type_str
            .parse::<SearchParamType>()
            .map_err(|e| RegistryError::InvalidDefinition {
                message: e,
                url: Some(url.clone()),
            })?;

    let strings = |name: &str| -> Vec<String> {
        resource
            .get(name)
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    };

    let mut definition = SearchParameterDefinition::new(url.clone(), code, param_type, expression)
        .with_base(strings("base"));
    let targets = strings("target");
    if !targets.is_empty() {
        definition = definition.with_targets(targets);
    }
    Ok(definition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_include_common_params() {
        let registry = ResourceTypeRegistry::with_defaults();

        for type_name in ["Patient", "Observation", "StructureDefinition", "ValueSet"] {
            assert!(registry.contains(type_name), "{} missing", type_name);
            let params = registry.active_params(type_name);
            assert!(params.iter().any(|p| p.code == "_id"));
            assert!(params.iter().any(|p| p.code == "_lastUpdated"));
        }

        let subject = registry.search_param("Observation", "subject").unwrap();
        assert_eq!(subject.param_type, SearchParamType::Reference);
        assert!(subject.allows_target("Patient"));
        assert!(registry.search_param("Observation", "nonexistent").is_none());
        assert!(registry.active_params("Unknown").is_empty());
    }

    #[test]
    fn test_register_duplicate_type() {
        let mut registry = ResourceTypeRegistry::new();
        registry
            .register(ResourceTypeDescriptor::new("Basic"))
            .unwrap();

        let result = registry.register(ResourceTypeDescriptor::new("Basic"));
        assert!(matches!(result, Err(RegistryError::DuplicateType { .. })));
    }

    #[test]
    fn test_register_search_param_requires_known_type() {
        let mut registry = ResourceTypeRegistry::new();
        let def = SearchParameterDefinition::new(
            "http://example.org/sp/basic-code",
            "code",
            SearchParamType::Token,
            "Basic.code",
        )
        .with_base(["Basic"]);

        assert!(matches!(
            registry.register_search_param(def.clone()),
            Err(RegistryError::NotFound { .. })
        ));

        registry
            .register(ResourceTypeDescriptor::new("Basic"))
            .unwrap();
        registry.register_search_param(def).unwrap();
        assert!(registry.search_param("Basic", "code").is_some());
    }

    #[test]
    fn test_load_from_bundle() {
        let mut registry = ResourceTypeRegistry::with_defaults();

        let bundle = json!({
            "resourceType": "Bundle",
            "entry": [
                {"resource": {
                    "resourceType": "SearchParameter",
                    "url": "http://example.org/sp/patient-nickname",
                    "code": "nickname",
                    "type": "string",
                    "expression": "Patient.extension.valueString",
                    "base": ["Patient"]
                }},
                {"resource": {
                    "resourceType": "SearchParameter",
                    "url": "http://example.org/sp/widget-owner",
                    "code": "owner",
                    "type": "reference",
                    "expression": "Widget.owner",
                    "base": ["Widget"],
                    "target": ["Organization"]
                }},
                {"resource": {"resourceType": "Patient"}}
            ]
        });

        assert_eq!(registry.load_from_json(&bundle).unwrap(), 2);
        assert!(registry.search_param("Patient", "nickname").is_some());
        assert!(registry.contains("Widget"));
        let owner = registry.search_param("Widget", "owner").unwrap();
        assert!(!owner.allows_target("Patient"));
    }

    #[test]
    fn test_load_rejects_missing_fields() {
        let mut registry = ResourceTypeRegistry::with_defaults();
        let param = json!({
            "resourceType": "SearchParameter",
            "url": "http://example.org/sp/broken",
            "type": "token",
            "base": ["Patient"]
        });

        let err = registry.load_from_json(&param).unwrap_err();
        assert!(err.to_string().contains("code"));
        assert!(err.to_string().contains("http://example.org/sp/broken"));

        assert!(registry.load_from_json(&json!({"resourceType": "Patient"})).is_err());
    }
}
