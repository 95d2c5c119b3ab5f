//! Search parameter and resource type definitions.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::SearchParamType;

/// Complete definition of a search parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchParameterDefinition {
    /// Canonical URL (unique identifier).
    pub url: String,

    /// Parameter code (the query name, e.g., "name", "identifier").
    pub code: String,

    /// The parameter type.
    pub param_type: SearchParamType,

    /// Path expression; alternatives are separated by `|`.
    pub expression: String,

    /// Resource types this parameter applies to.
    pub base: Vec<String>,

    /// Target resource types (for reference parameters).
    pub target: Option<Vec<String>>,
}

impl SearchParameterDefinition {
    /// Creates a new definition.
    pub fn new(
        url: impl Into<String>,
        code: impl Into<String>,
        param_type: SearchParamType,
        expression: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            code: code.into(),
            param_type,
            expression: expression.into(),
            base: Vec::new(),
            target: None,
        }
    }

    /// Sets the base resource types.
    pub fn with_base<I, S>(mut self, base: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base = base.into_iter().map(Into::into).collect();
        self
    }

    /// Sets target types for reference parameters.
    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.target = Some(targets.into_iter().map(Into::into).collect());
        self
    }

    /// Returns the individual path alternatives of the expression.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.expression
            .split('|')
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }

    /// Returns whether this parameter applies to the given resource type.
    pub fn applies_to(&self, resource_type: &str) -> bool {
        self.base
            .iter()
            .any(|b| b == resource_type || b == "Resource" || b == "DomainResource")
    }

    /// Returns whether a reference parameter may point at the given type.
    pub fn allows_target(&self, resource_type: &str) -> bool {
        match &self.target {
            Some(targets) => targets.iter().any(|t| t == resource_type),
            None => true,
        }
    }
}

/// Everything the store needs to know about one resource type.
#[derive(Debug, Clone)]
pub struct ResourceTypeDescriptor {
    name: String,
    search_params: Vec<Arc<SearchParameterDefinition>>,
    required_elements: Vec<String>,
}

impl ResourceTypeDescriptor {
    /// Creates an empty descriptor for a resource type.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            search_params: Vec::new(),
            required_elements: Vec::new(),
        }
    }

    /// Adds a search parameter of the given type and path.
    ///
    /// The canonical URL is derived from the type name and code.
    pub fn with_param(
        self,
        code: &str,
        param_type: SearchParamType,
        expression: &str,
    ) -> Self {
        let url = format!("http://hl7.org/fhir/SearchParameter/{}-{}", self.name, code);
        let definition = SearchParameterDefinition::new(url, code, param_type, expression)
            .with_base([self.name.clone()]);
        self.with_definition(definition)
    }

    /// Adds a reference search parameter restricted to target types.
    pub fn with_reference(self, code: &str, expression: &str, targets: &[&str]) -> Self {
        let url = format!("http://hl7.org/fhir/SearchParameter/{}-{}", self.name, code);
        let definition =
            SearchParameterDefinition::new(url, code, SearchParamType::Reference, expression)
                .with_base([self.name.clone()])
                .with_targets(targets.iter().copied());
        self.with_definition(definition)
    }

    /// Adds a fully specified search parameter definition.
    ///
    /// A later definition with the same code replaces the earlier one.
    pub fn with_definition(mut self, definition: SearchParameterDefinition) -> Self {
        self.add_definition(definition);
        self
    }

    /// Declares top-level elements that must be present (minimum cardinality 1).
    pub fn with_required<I, S>(mut self, elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_elements
            .extend(elements.into_iter().map(Into::into));
        self
    }

    pub(crate) fn add_definition(&mut self, definition: SearchParameterDefinition) {
        self.search_params.retain(|p| p.code != definition.code);
        self.search_params.push(Arc::new(definition));
    }

    /// Returns the resource type name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the type-specific search parameters.
    pub fn search_params(&self) -> &[Arc<SearchParameterDefinition>] {
        &self.search_params
    }

    /// Returns a type-specific search parameter by code.
    pub fn search_param(&self, code: &str) -> Option<&Arc<SearchParameterDefinition>> {
        self.search_params.iter().find(|p| p.code == code)
    }

    /// Returns the elements that must be present in every instance.
    pub fn required_elements(&self) -> &[String] {
        &self.required_elements
    }
}
