//! Resource validation.
//!
//! The [`Validator`] runs a fixed sequence of rules selected by
//! [`ValidationMode`]. The first failing request-level rule ends validation
//! with an error; content rules collect findings into an
//! [`OperationOutcome`], and any error-severity finding fails the whole
//! operation with [`ValidationError::PreconditionFailed`].
//!
//! Validation only reads the store. Delete mode reports whether a delete
//! would be allowed; it never performs one.

mod profile;
mod terminology;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::ReferenceGraph;
use crate::error::{
    ConcurrencyError, ResourceError, StorageError, StorageResult, ValidationError,
};
use crate::outcome::{Issue, IssueType, OperationOutcome};
use crate::references::ReferenceLink;
use crate::registry::ResourceTypeRegistry;

pub use profile::{BoundValue, ElementRule, StructureProfile};
pub use terminology::{canonical_url, value_set_contains, ProfileResolver, TerminologyResolver};

/// The operation a resource is being validated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    /// Content intended for a create; must not carry an id.
    Create,
    /// Content intended for an update; must carry an id.
    Update,
    /// An existing resource about to be deleted.
    Delete,
}

impl fmt::Display for ValidationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationMode::Create => write!(f, "create"),
            ValidationMode::Update => write!(f, "update"),
            ValidationMode::Delete => write!(f, "delete"),
        }
    }
}

impl FromStr for ValidationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" => Ok(ValidationMode::Create),
            "update" => Ok(ValidationMode::Update),
            "delete" => Ok(ValidationMode::Delete),
            _ => Err(format!("unknown validation mode: {}", s)),
        }
    }
}

/// Builds the outcome reported when live references block a delete.
pub fn delete_conflict_outcome(
    resource_type: &str,
    id: &str,
    first: &ReferenceLink,
) -> OperationOutcome {
    OperationOutcome::new().with_issue(
        Issue::error(
            IssueType::Processing,
            format!(
                "Unable to delete {}/{} because at least one resource has a reference to this \
                 resource. First reference found was resource {}/{} in path {}",
                resource_type,
                id,
                first.source_type,
                first.source_public_id(),
                first.source_path
            ),
        )
        .with_expression(first.source_path.clone()),
    )
}

/// Validates resources against registry rules, declared profiles and the
/// live reference graph.
pub struct Validator<'a> {
    registry: &'a ResourceTypeRegistry,
    profiles: &'a dyn ProfileResolver,
    terminology: &'a dyn TerminologyResolver,
    references: &'a dyn ReferenceGraph,
}

impl<'a> Validator<'a> {
    /// Creates a validator over the given resolvers.
    pub fn new(
        registry: &'a ResourceTypeRegistry,
        profiles: &'a dyn ProfileResolver,
        terminology: &'a dyn TerminologyResolver,
        references: &'a dyn ReferenceGraph,
    ) -> Self {
        Self {
            registry,
            profiles,
            terminology,
            references,
        }
    }

    /// Runs the validate operation.
    ///
    /// # Arguments
    ///
    /// * `resource_type` - The resource type being validated
    /// * `resource` - The content; required for create and update
    /// * `id` - The target id; required for delete, optional for update
    /// * `mode` - Which rule set applies
    ///
    /// # Returns
    ///
    /// The outcome when no error-severity finding exists. An outcome with
    /// only warnings is a success.
    ///
    /// # Errors
    ///
    /// * `StorageError::Validation(InvalidRequest)` - Identifier-presence rule failed
    /// * `StorageError::Resource(NotFound)` - Delete mode on an unknown resource
    /// * `StorageError::Concurrency(ReferentialConflict)` - Delete mode with live inbound references
    /// * `StorageError::Validation(PreconditionFailed)` - Content rules produced errors
    pub async fn validate(
        &self,
        resource_type: &str,
        resource: Option<&Value>,
        id: Option<&str>,
        mode: ValidationMode,
    ) -> StorageResult<OperationOutcome> {
        let resource = match mode {
            ValidationMode::Delete => return self.validate_delete(resource_type, id).await,
            ValidationMode::Create => {
                let resource = require_content(resource)?;
                if content_id(resource).is_some() {
                    return Err(invalid_request("ID must not be populated"));
                }
                resource
            }
            ValidationMode::Update => {
                let resource = require_content(resource)?;
                if id.filter(|s| !s.is_empty()).is_none() && content_id(resource).is_none() {
                    return Err(invalid_request("ID must be populated"));
                }
                resource
            }
        };

        let outcome = self.validate_content(resource_type, resource).await?;
        if outcome.has_errors() {
            tracing::debug!(resource_type, %mode, "Validation failed: {}", outcome.summary());
            return Err(ValidationError::PreconditionFailed { outcome }.into());
        }

        if outcome.is_empty() {
            Ok(OperationOutcome::information("No issues detected during validation"))
        } else {
            Ok(outcome)
        }
    }

    /// Applies the content rules and returns every finding.
    ///
    /// Unlike [`validate`](Self::validate) this never fails on findings; the
    /// caller decides what an error-severity finding means. Only resolver
    /// failures are returned as errors.
    pub async fn validate_content(
        &self,
        resource_type: &str,
        resource: &Value,
    ) -> StorageResult<OperationOutcome> {
        let mut outcome = OperationOutcome::new();

        if !resource.is_object() {
            outcome.push(Issue::error(
                IssueType::Structure,
                "Resource must be a JSON object",
            ));
            return Ok(outcome);
        }

        match resource.get("resourceType").and_then(|v| v.as_str()) {
            Some(rt) if rt == resource_type => {}
            Some(rt) => {
                outcome.push(Issue::error(
                    IssueType::Invalid,
                    format!("Resource type mismatch: expected {}, got {}", resource_type, rt),
                ));
                return Ok(outcome);
            }
            None => {
                outcome.push(Issue::error(
                    IssueType::Required,
                    "Resource is missing resourceType",
                ));
                return Ok(outcome);
            }
        }

        match self.registry.get(resource_type) {
            Some(descriptor) => {
                for element in descriptor.required_elements() {
                    let found = profile::count_children(resource, element);
                    if found == 0 {
                        outcome.push(
                            Issue::error(
                                IssueType::Required,
                                profile::min_message("", element, 1, found),
                            )
                            .with_expression(format!("{}.{}", resource_type, element)),
                        );
                    }
                }
            }
            None => {
                outcome.push(Issue::error(
                    IssueType::NotSupported,
                    format!("Resource type '{}' is not supported", resource_type),
                ));
                return Ok(outcome);
            }
        }

        for url in declared_profiles(resource) {
            self.apply_profile(resource_type, resource, url, &mut outcome)
                .await?;
        }

        Ok(outcome)
    }

    async fn apply_profile(
        &self,
        resource_type: &str,
        resource: &Value,
        url: &str,
        outcome: &mut OperationOutcome,
    ) -> StorageResult<()> {
        let Some(definition) = self.profiles.resolve_profile(url).await? else {
            outcome.push(
                Issue::error(
                    IssueType::NotFound,
                    format!("StructureDefinition reference \"{}\" could not be resolved", url),
                )
                .with_expression("meta.profile"),
            );
            return Ok(());
        };

        let profile = match StructureProfile::parse(&definition) {
            Ok(profile) => profile,
            Err(message) => {
                outcome.push(Issue::error(IssueType::Invalid, message));
                return Ok(());
            }
        };

        if profile.type_name() != resource_type {
            outcome.push(Issue::error(
                IssueType::Invalid,
                format!(
                    "Profile '{}' constrains {}, not {}",
                    url,
                    profile.type_name(),
                    resource_type
                ),
            ));
            return Ok(());
        }

        profile.check_cardinality(resource, outcome);

        let mut unknown_value_sets: Vec<String> = Vec::new();
        for bound in profile.bound_values(resource) {
            let mut member = Some(false);
            for (system, code) in &bound.codings {
                match self
                    .terminology
                    .validate_code(&bound.value_set, system.as_deref(), code)
                    .await?
                {
                    Some(true) => {
                        member = Some(true);
                        break;
                    }
                    Some(false) => {}
                    None => member = None,
                }
            }

            match member {
                Some(true) => {}
                Some(false) => outcome.push(
                    Issue::error(
                        IssueType::CodeInvalid,
                        format!(
                            "Code '{}' is not in value set '{}'",
                            display_codes(&bound),
                            bound.value_set
                        ),
                    )
                    .with_expression(bound.expression.clone()),
                ),
                None => {
                    if !unknown_value_sets.contains(&bound.value_set) {
                        outcome.push(
                            Issue::warning(
                                IssueType::NotFound,
                                format!(
                                    "ValueSet '{}' could not be resolved; codes were not checked",
                                    bound.value_set
                                ),
                            )
                            .with_expression(bound.expression.clone()),
                        );
                        unknown_value_sets.push(bound.value_set.clone());
                    }
                }
            }
        }

        Ok(())
    }

    async fn validate_delete(
        &self,
        resource_type: &str,
        id: Option<&str>,
    ) -> StorageResult<OperationOutcome> {
        let id = id
            .filter(|s| !s.is_empty())
            .ok_or_else(|| invalid_request("ID must be populated"))?;

        if self.references.resolve_id(resource_type, id).await?.is_none() {
            return Err(ResourceError::NotFound {
                resource_type: resource_type.to_string(),
                id: id.to_string(),
            }
            .into());
        }

        let inbound = self.references.inbound_references(resource_type, id).await?;
        if let Some(first) = inbound.first() {
            return Err(ConcurrencyError::ReferentialConflict {
                resource_type: resource_type.to_string(),
                id: id.to_string(),
                outcome: delete_conflict_outcome(resource_type, id, first),
            }
            .into());
        }

        Ok(OperationOutcome::information("Ok to delete"))
    }
}

impl fmt::Debug for Validator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator").finish_non_exhaustive()
    }
}

fn require_content(resource: Option<&Value>) -> StorageResult<&Value> {
    resource.ok_or_else(|| invalid_request("A resource must be supplied for this validation mode"))
}

fn content_id(resource: &Value) -> Option<&str> {
    resource
        .get("id")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
}

fn declared_profiles(resource: &Value) -> Vec<&str> {
    resource
        .get("meta")
        .and_then(|m| m.get("profile"))
        .and_then(|p| p.as_array())
        .map(|urls| urls.iter().filter_map(|u| u.as_str()).collect())
        .unwrap_or_default()
}

fn display_codes(bound: &BoundValue) -> String {
    bound
        .codings
        .iter()
        .map(|(system, code)| match system {
            Some(system) => format!("{}|{}", system, code),
            None => code.clone(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn invalid_request(message: &str) -> StorageError {
    ValidationError::InvalidRequest {
        message: message.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;

    #[derive(Default)]
    struct Fixtures {
        profiles: HashMap<String, Value>,
        value_sets: HashMap<String, Value>,
        ids: Vec<(String, String)>,
        inbound: Vec<ReferenceLink>,
    }

    #[async_trait]
    impl ProfileResolver for Fixtures {
        async fn resolve_profile(&self, url: &str) -> StorageResult<Option<Value>> {
            Ok(self.profiles.get(url).cloned())
        }
    }

    #[async_trait]
    impl TerminologyResolver for Fixtures {
        async fn validate_code(
            &self,
            value_set: &str,
            system: Option<&str>,
            code: &str,
        ) -> StorageResult<Option<bool>> {
            Ok(self
                .value_sets
                .get(value_set)
                .and_then(|vs| value_set_contains(vs, system, code)))
        }
    }

    #[async_trait]
    impl ReferenceGraph for Fixtures {
        async fn resolve_id(&self, resource_type: &str, id: &str) -> StorageResult<Option<String>> {
            Ok(self
                .ids
                .iter()
                .find(|(t, i)| t == resource_type && i == id)
                .map(|(_, i)| i.clone()))
        }

        async fn inbound_references(
            &self,
            _resource_type: &str,
            _id: &str,
        ) -> StorageResult<Vec<ReferenceLink>> {
            Ok(self.inbound.clone())
        }

        async fn outbound_references(
            &self,
            _resource_type: &str,
            _id: &str,
        ) -> StorageResult<Vec<ReferenceLink>> {
            Ok(Vec::new())
        }
    }

    async fn run(
        fixtures: &Fixtures,
        resource_type: &str,
        resource: Option<&Value>,
        id: Option<&str>,
        mode: ValidationMode,
    ) -> StorageResult<OperationOutcome> {
        let registry = ResourceTypeRegistry::with_defaults();
        Validator::new(&registry, fixtures, fixtures, fixtures)
            .validate(resource_type, resource, id, mode)
            .await
    }

    #[tokio::test]
    async fn test_create_requires_no_id() {
        let fixtures = Fixtures::default();
        let mut patient = json!({
            "resourceType": "Patient",
            "id": "123",
            "name": [{"family": "testValidateForCreate"}]
        });

        let err = run(&fixtures, "Patient", Some(&patient), None, ValidationMode::Create)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ID must not be populated"));

        patient["id"] = json!("");
        let outcome = run(&fixtures, "Patient", Some(&patient), None, ValidationMode::Create)
            .await
            .unwrap();
        assert!(!outcome.has_errors());
    }

    #[tokio::test]
    async fn test_update_requires_id() {
        let fixtures = Fixtures::default();
        let mut patient = json!({"resourceType": "Patient", "id": "123"});

        assert!(run(&fixtures, "Patient", Some(&patient), None, ValidationMode::Update)
            .await
            .is_ok());

        patient.as_object_mut().unwrap().remove("id");
        let err = run(&fixtures, "Patient", Some(&patient), None, ValidationMode::Update)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::Validation(ValidationError::InvalidRequest { ref message })
                if message.contains("ID must be populated")
        ));

        // An explicit id satisfies the rule
        assert!(run(&fixtures, "Patient", Some(&patient), Some("123"), ValidationMode::Update)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_unresolved_profile_fails() {
        let fixtures = Fixtures::default();
        let observation = json!({
            "resourceType": "Observation",
            "meta": {"profile": ["http://example.com/missing"]},
            "status": "final",
            "code": {"coding": [{"system": "http://loinc.org", "code": "12345"}]}
        });

        let err = run(&fixtures, "Observation", Some(&observation), None, ValidationMode::Create)
            .await
            .unwrap_err();
        let outcome = err.outcome().unwrap();
        assert!(outcome.contains_text(
            "StructureDefinition reference \"http://example.com/missing\" could not be resolved"
        ));
    }

    #[tokio::test]
    async fn test_required_binding() {
        let mut fixtures = Fixtures::default();
        fixtures.profiles.insert(
            "http://example.com/p".to_string(),
            json!({
                "url": "http://example.com/p",
                "type": "Observation",
                "snapshot": {"element": [
                    {"path": "Observation.status", "min": 1, "max": "1",
                     "binding": {"strength": "required", "valueSet": "http://example.com/vs"}},
                    {"path": "Observation.category", "min": 0, "max": "*",
                     "binding": {"strength": "required", "valueSet": "http://example.com/unknown"}}
                ]}
            }),
        );
        fixtures.value_sets.insert(
            "http://example.com/vs".to_string(),
            json!({"compose": {"include": [{"system": "s", "concept": [{"code": "final"}]}]}}),
        );

        let mut observation = json!({
            "resourceType": "Observation",
            "meta": {"profile": ["http://example.com/p"]},
            "status": "final",
            "code": {"text": "x"},
            "category": [{"coding": [{"system": "c", "code": "vital"}]}]
        });

        let outcome = run(&fixtures, "Observation", Some(&observation), None, ValidationMode::Create)
            .await
            .unwrap();
        assert!(!outcome.has_errors());
        assert!(outcome.contains_text("ValueSet 'http://example.com/unknown' could not be resolved"));

        observation["status"] = json!("bogus");
        let err = run(&fixtures, "Observation", Some(&observation), None, ValidationMode::Create)
            .await
            .unwrap_err();
        assert!(err
            .outcome()
            .unwrap()
            .contains_text("Code 'bogus' is not in value set 'http://example.com/vs'"));
    }

    #[tokio::test]
    async fn test_required_elements_and_type_mismatch() {
        let fixtures = Fixtures::default();

        let err = run(
            &fixtures,
            "Observation",
            Some(&json!({"resourceType": "Observation", "status": "final"})),
            None,
            ValidationMode::Create,
        )
        .await
        .unwrap_err();
        assert!(err
            .outcome()
            .unwrap()
            .contains_text("Element '.code': minimum required = 1, but only found 0"));

        let err = run(
            &fixtures,
            "Observation",
            Some(&json!({"resourceType": "Patient"})),
            None,
            ValidationMode::Create,
        )
        .await
        .unwrap_err();
        assert!(err.outcome().unwrap().contains_text("Resource type mismatch"));
    }

    #[tokio::test]
    async fn test_delete_mode() {
        let mut fixtures = Fixtures::default();
        fixtures.ids.push(("Organization".to_string(), "org1".to_string()));

        let outcome = run(&fixtures, "Organization", None, Some("org1"), ValidationMode::Delete)
            .await
            .unwrap();
        assert!(outcome.contains_text("Ok to delete"));

        fixtures.inbound.push(ReferenceLink {
            source_type: "Patient".to_string(),
            source_id: "abc".to_string(),
            source_forced_id: None,
            source_path: "Patient.managingOrganization".to_string(),
            target_type: Some("Organization".to_string()),
            target_id: Some("org1".to_string()),
            target_uri: None,
        });
        let err = run(&fixtures, "Organization", None, Some("org1"), ValidationMode::Delete)
            .await
            .unwrap_err();
        let outcome = err.outcome().unwrap();
        assert!(outcome.contains_text("Unable to delete Organization/org1"));
        assert!(outcome.contains_text(
            "First reference found was resource Patient/abc in path Patient.managingOrganization"
        ));

        let err = run(&fixtures, "Organization", None, Some("nope"), ValidationMode::Delete)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Resource(ResourceError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_validation_is_repeatable() {
        let fixtures = Fixtures::default();
        let observation = json!({"resourceType": "Observation"});

        let first = run(&fixtures, "Observation", Some(&observation), None, ValidationMode::Create)
            .await
            .unwrap_err();
        let second = run(&fixtures, "Observation", Some(&observation), None, ValidationMode::Create)
            .await
            .unwrap_err();
        assert_eq!(first.outcome(), second.outcome());
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("DELETE".parse::<ValidationMode>(), Ok(ValidationMode::Delete));
        assert!("patch".parse::<ValidationMode>().is_err());
        assert_eq!(ValidationMode::Create.to_string(), "create");
    }
}
