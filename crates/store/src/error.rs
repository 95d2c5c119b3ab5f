//! Error types for the resource store.
//!
//! This module defines all error types used throughout the store, following a
//! hierarchy that separates resource state errors, concurrency errors,
//! validation errors, search errors and backend errors.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

use crate::outcome::OperationOutcome;

/// The primary error type for all storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Resource state errors
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Concurrency, versioning and referential conflicts
    #[error(transparent)]
    Concurrency(#[from] ConcurrencyError),

    /// Validation errors
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Search operation errors
    #[error(transparent)]
    Search(#[from] SearchError),

    /// Backend-specific errors
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl StorageError {
    /// Returns the structured outcome carried by this error, if any.
    pub fn outcome(&self) -> Option<&OperationOutcome> {
        match self {
            StorageError::Concurrency(ConcurrencyError::ReferentialConflict { outcome, .. }) => {
                Some(outcome)
            }
            StorageError::Validation(ValidationError::PreconditionFailed { outcome })
            | StorageError::Validation(ValidationError::ValidationFailed { outcome }) => {
                Some(outcome)
            }
            _ => None,
        }
    }

    /// Returns true for errors the caller may resolve by re-reading and retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageError::Concurrency(ConcurrencyError::VersionConflict { .. })
        )
    }
}

/// Errors related to resource state.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// The requested resource was not found.
    #[error("resource not found: {resource_type}/{id}")]
    NotFound { resource_type: String, id: String },

    /// The current version of the resource is a tombstone.
    #[error("resource deleted: {resource_type}/{id}")]
    Gone {
        resource_type: String,
        id: String,
        deleted_at: Option<chrono::DateTime<chrono::Utc>>,
    },

    /// The requested version of the resource was not found.
    #[error("version not found: {resource_type}/{id}/_history/{version}")]
    VersionNotFound {
        resource_type: String,
        id: String,
        version: u64,
    },

    /// A client-supplied identifier is already in use for this type.
    #[error("identifier conflict: {resource_type}/{forced_id} is already in use")]
    IdentifierConflict {
        resource_type: String,
        forced_id: String,
    },

    /// The resource type has no registered descriptor.
    #[error("unsupported resource type: {resource_type}")]
    UnsupportedResourceType { resource_type: String },
}

/// Errors related to concurrency control and referential integrity.
#[derive(Error, Debug)]
pub enum ConcurrencyError {
    /// Version conflict detected during optimistic locking.
    #[error("version conflict on {resource_type}/{id}: expected {expected_version}, found {actual_version}")]
    VersionConflict {
        resource_type: String,
        id: String,
        expected_version: u64,
        actual_version: u64,
    },

    /// Delete blocked because live resources still refer to the target.
    #[error("unable to delete {resource_type}/{id}: resource is still referenced")]
    ReferentialConflict {
        resource_type: String,
        id: String,
        outcome: OperationOutcome,
    },
}

/// Errors related to request and resource validation.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// The request itself is malformed.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// The validate operation produced error findings.
    #[error("precondition failed: {}", outcome.summary())]
    PreconditionFailed { outcome: OperationOutcome },

    /// A write was rejected by the validator before reaching the store.
    #[error("validation failed: {}", outcome.summary())]
    ValidationFailed { outcome: OperationOutcome },
}

/// Errors related to search operations.
#[derive(Error, Debug)]
pub enum SearchError {
    /// The search parameter is not defined for the resource type.
    #[error("unknown search parameter '{parameter}' for {resource_type}")]
    UnknownParameter {
        resource_type: String,
        parameter: String,
    },

    /// The search modifier is not supported for this parameter type.
    #[error("unsupported modifier '{modifier}' for parameter type '{param_type}'")]
    UnsupportedModifier {
        modifier: String,
        param_type: String,
    },

    /// The prefix is not valid for this parameter type.
    #[error("unsupported prefix '{prefix}' for parameter type '{param_type}'")]
    UnsupportedPrefix { prefix: String, param_type: String },

    /// The search value could not be parsed.
    #[error("invalid value '{value}' for parameter '{parameter}': {message}")]
    InvalidValue {
        parameter: String,
        value: String,
        message: String,
    },

    /// Invalid cursor for pagination.
    #[error("invalid pagination cursor: {cursor}")]
    InvalidCursor { cursor: String },
}

/// Errors originating from the database backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Connection to the backend failed.
    #[error("connection failed to {backend_name}: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    /// Connection pool exhausted.
    #[error("connection pool exhausted for {backend_name}")]
    PoolExhausted { backend_name: String },

    /// Internal backend error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {message}")]
    SerializationError { message: String },
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for search operations.
pub type SearchResult<T> = Result<T, SearchError>;

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Backend(BackendError::SerializationError {
            message: err.to_string(),
        })
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Backend(BackendError::Internal {
            backend_name: "sqlite".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        })
    }
}

#[cfg(feature = "sqlite")]
impl From<r2d2::Error> for StorageError {
    fn from(_err: r2d2::Error) -> Self {
        StorageError::Backend(BackendError::PoolExhausted {
            backend_name: "sqlite".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{Issue, IssueType};

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::Resource(ResourceError::NotFound {
            resource_type: "Patient".to_string(),
            id: "123".to_string(),
        });
        assert_eq!(err.to_string(), "resource not found: Patient/123");
    }

    #[test]
    fn test_version_conflict_display() {
        let err = ConcurrencyError::VersionConflict {
            resource_type: "Patient".to_string(),
            id: "123".to_string(),
            expected_version: 1,
            actual_version: 2,
        };
        assert_eq!(
            err.to_string(),
            "version conflict on Patient/123: expected 1, found 2"
        );
        assert!(StorageError::from(err).is_retryable());
    }

    #[test]
    fn test_outcome_accessor() {
        let outcome = OperationOutcome::new()
            .with_issue(Issue::error(IssueType::Processing, "Unable to delete Organization/1"));
        let err = StorageError::Concurrency(ConcurrencyError::ReferentialConflict {
            resource_type: "Organization".to_string(),
            id: "1".to_string(),
            outcome,
        });
        assert!(!err.is_retryable());
        let outcome = err.outcome().unwrap();
        assert!(outcome.contains_text("Unable to delete"));

        let err = StorageError::Resource(ResourceError::UnsupportedResourceType {
            resource_type: "Foo".to_string(),
        });
        assert!(err.outcome().is_none());
    }

    #[test]
    fn test_precondition_failed_display_includes_findings() {
        let outcome = OperationOutcome::new().with_issue(Issue::error(
            IssueType::Structure,
            "Element '.subject': minimum required = 1, but only found 0",
        ));
        let err = ValidationError::PreconditionFailed { outcome };
        assert!(err.to_string().contains("minimum required = 1"));
    }

    #[test]
    fn test_search_error_display() {
        let err = SearchError::UnsupportedModifier {
            modifier: "contains".to_string(),
            param_type: "token".to_string(),
        };
        assert!(err.to_string().contains("unsupported modifier"));
    }
}
