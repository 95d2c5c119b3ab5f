//! Shared helpers for the store integration tests.

#![allow(dead_code)]

use helios_store::backends::sqlite::SqliteBackend;
use helios_store::config::StoreConfig;
use serde_json::{Value, json};

pub fn create_backend() -> SqliteBackend {
    let backend = SqliteBackend::in_memory().expect("Failed to create SQLite backend");
    backend.init_schema().expect("Failed to initialize schema");
    backend
}

pub fn create_backend_with(config: StoreConfig) -> SqliteBackend {
    let backend = SqliteBackend::in_memory()
        .expect("Failed to create SQLite backend")
        .with_store_config(config)
        .expect("Invalid store config");
    backend.init_schema().expect("Failed to initialize schema");
    backend
}

pub fn patient(family: &str) -> Value {
    json!({
        "resourceType": "Patient",
        "name": [{"family": family, "given": ["Test"]}]
    })
}

pub fn organization(name: &str) -> Value {
    json!({"resourceType": "Organization", "name": name})
}

pub fn observation_for(patient_ref: &str) -> Value {
    json!({
        "resourceType": "Observation",
        "status": "final",
        "code": {"coding": [{"system": "http://loinc.org", "code": "8867-4"}]},
        "subject": {"reference": patient_ref},
        "valueQuantity": {
            "value": 72,
            "unit": "beats/minute",
            "system": "http://unitsofmeasure.org",
            "code": "/min"
        }
    })
}
