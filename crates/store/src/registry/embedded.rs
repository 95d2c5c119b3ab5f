//! Built-in resource type descriptors.
//!
//! Expressions are simple dotted paths with optional `|` alternatives. A path
//! segment naming a choice element (e.g. `Observation.effective`) matches
//! every `effective[x]` variant.

use crate::types::SearchParamType;

use super::definition::{ResourceTypeDescriptor, SearchParameterDefinition};

/// Parameters that apply to every resource type.
pub(crate) fn common_search_parameters() -> Vec<SearchParameterDefinition> {
    vec![
        SearchParameterDefinition::new(
            "http://hl7.org/fhir/SearchParameter/Resource-id",
            "_id",
            SearchParamType::Token,
            "id",
        )
        .with_base(["Resource"]),
        SearchParameterDefinition::new(
            "http://hl7.org/fhir/SearchParameter/Resource-lastUpdated",
            "_lastUpdated",
            SearchParamType::Date,
            "meta.lastUpdated",
        )
        .with_base(["Resource"]),
        SearchParameterDefinition::new(
            "http://hl7.org/fhir/SearchParameter/Resource-tag",
            "_tag",
            SearchParamType::Token,
            "meta.tag",
        )
        .with_base(["Resource"]),
        SearchParameterDefinition::new(
            "http://hl7.org/fhir/SearchParameter/Resource-security",
            "_security",
            SearchParamType::Token,
            "meta.security",
        )
        .with_base(["Resource"]),
        SearchParameterDefinition::new(
            "http://hl7.org/fhir/SearchParameter/Resource-profile",
            "_profile",
            SearchParamType::Uri,
            "meta.profile",
        )
        .with_base(["Resource"]),
    ]
}

/// Descriptors for the resource types known out of the box.
pub(crate) fn builtin_descriptors() -> Vec<ResourceTypeDescriptor> {
    vec![
        ResourceTypeDescriptor::new("Patient")
            .with_param("identifier", SearchParamType::Token, "Patient.identifier")
            .with_param("name", SearchParamType::String, "Patient.name")
            .with_param("family", SearchParamType::String, "Patient.name.family")
            .with_param("given", SearchParamType::String, "Patient.name.given")
            .with_param("birthdate", SearchParamType::Date, "Patient.birthDate")
            .with_param("gender", SearchParamType::Token, "Patient.gender")
            .with_param("active", SearchParamType::Token, "Patient.active")
            .with_param("telecom", SearchParamType::Token, "Patient.telecom")
            .with_param("address-city", SearchParamType::String, "Patient.address.city")
            .with_reference("organization", "Patient.managingOrganization", &["Organization"])
            .with_reference(
                "general-practitioner",
                "Patient.generalPractitioner",
                &["Practitioner", "Organization"],
            ),
        ResourceTypeDescriptor::new("Practitioner")
            .with_param("identifier", SearchParamType::Token, "Practitioner.identifier")
            .with_param("name", SearchParamType::String, "Practitioner.name")
            .with_param("family", SearchParamType::String, "Practitioner.name.family"),
        ResourceTypeDescriptor::new("Organization")
            .with_param("identifier", SearchParamType::Token, "Organization.identifier")
            .with_param("name", SearchParamType::String, "Organization.name | Organization.alias")
            .with_param("type", SearchParamType::Token, "Organization.type")
            .with_reference("partof", "Organization.partOf", &["Organization"]),
        ResourceTypeDescriptor::new("Observation")
            .with_param("identifier", SearchParamType::Token, "Observation.identifier")
            .with_param("code", SearchParamType::Token, "Observation.code")
            .with_param("category", SearchParamType::Token, "Observation.category")
            .with_param("status", SearchParamType::Token, "Observation.status")
            .with_param("date", SearchParamType::Date, "Observation.effective")
            .with_param("value-quantity", SearchParamType::Quantity, "Observation.valueQuantity")
            .with_param("value-string", SearchParamType::String, "Observation.valueString")
            .with_reference(
                "subject",
                "Observation.subject",
                &["Patient", "Group", "Device", "Location"],
            )
            .with_reference("patient", "Observation.subject", &["Patient"])
            .with_reference("encounter", "Observation.encounter", &["Encounter"])
            .with_reference("device", "Observation.device", &["Device"])
            .with_reference(
                "performer",
                "Observation.performer",
                &["Practitioner", "Organization", "Patient"],
            )
            .with_required(["status", "code"]),
        ResourceTypeDescriptor::new("Encounter")
            .with_param("identifier", SearchParamType::Token, "Encounter.identifier")
            .with_param("status", SearchParamType::Token, "Encounter.status")
            .with_param("date", SearchParamType::Date, "Encounter.period")
            .with_param("length", SearchParamType::Quantity, "Encounter.length")
            .with_reference("subject", "Encounter.subject", &["Patient", "Group"])
            .with_reference("patient", "Encounter.subject", &["Patient"])
            .with_required(["status"]),
        ResourceTypeDescriptor::new("Device")
            .with_param("identifier", SearchParamType::Token, "Device.identifier")
            .with_param("type", SearchParamType::Token, "Device.type")
            .with_reference("patient", "Device.patient", &["Patient"])
            .with_reference("organization", "Device.owner", &["Organization"]),
        ResourceTypeDescriptor::new("Location")
            .with_param("identifier", SearchParamType::Token, "Location.identifier")
            .with_param("name", SearchParamType::String, "Location.name | Location.alias")
            .with_param("address-city", SearchParamType::String, "Location.address.city")
            .with_param("near", SearchParamType::Special, "Location.position")
            .with_reference("partof", "Location.partOf", &["Location"])
            .with_reference("organization", "Location.managingOrganization", &["Organization"]),
        ResourceTypeDescriptor::new("RiskAssessment")
            .with_param("probability", SearchParamType::Number, "RiskAssessment.prediction.probability")
            .with_param("date", SearchParamType::Date, "RiskAssessment.occurrence")
            .with_reference("subject", "RiskAssessment.subject", &["Patient", "Group"])
            .with_required(["status", "subject"]),
        ResourceTypeDescriptor::new("Questionnaire")
            .with_param("url", SearchParamType::Uri, "Questionnaire.url")
            .with_param("name", SearchParamType::String, "Questionnaire.name")
            .with_param("title", SearchParamType::String, "Questionnaire.title")
            .with_param("status", SearchParamType::Token, "Questionnaire.status")
            .with_required(["status"]),
        ResourceTypeDescriptor::new("StructureDefinition")
            .with_param("url", SearchParamType::Uri, "StructureDefinition.url")
            .with_param("name", SearchParamType::String, "StructureDefinition.name")
            .with_param("type", SearchParamType::Token, "StructureDefinition.type")
            .with_param("base", SearchParamType::Uri, "StructureDefinition.baseDefinition")
            .with_param("status", SearchParamType::Token, "StructureDefinition.status")
            .with_required(["url"]),
        ResourceTypeDescriptor::new("ValueSet")
            .with_param("url", SearchParamType::Uri, "ValueSet.url")
            .with_param("name", SearchParamType::String, "ValueSet.name")
            .with_param("status", SearchParamType::Token, "ValueSet.status")
            .with_param("version", SearchParamType::Token, "ValueSet.version"),
    ]
}
