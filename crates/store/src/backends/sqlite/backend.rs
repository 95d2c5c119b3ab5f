//! SQLite backend implementation.

use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use regex::Regex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{ConfigError, StoreConfig};
use crate::error::{BackendError, StorageError, StorageResult};
use crate::outcome::OperationOutcome;
use crate::registry::ResourceTypeRegistry;
use crate::search::{FullTextIndex, NoopFullTextIndex, SearchParameterExtractor};
use crate::validation::{ValidationMode, Validator};

use super::schema;

pub(crate) fn internal_error(message: String) -> StorageError {
    StorageError::Backend(BackendError::Internal {
        backend_name: "sqlite".to_string(),
        message,
        source: None,
    })
}

pub(crate) fn serialization_error(message: String) -> StorageError {
    StorageError::Backend(BackendError::SerializationError { message })
}

/// SQLite backend for versioned resource storage.
pub struct SqliteBackend {
    pool: Pool<SqliteConnectionManager>,
    config: SqliteBackendConfig,
    is_memory: bool,
    store_config: StoreConfig,
    /// Compiled `store_config.forced_id_pattern`.
    forced_id_pattern: Regex,
    /// Resource types and their search parameters.
    registry: Arc<ResourceTypeRegistry>,
    /// Extractor for deriving searchable values from resources.
    extractor: SearchParameterExtractor,
    full_text: Arc<dyn FullTextIndex>,
}

impl Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("config", &self.config)
            .field("is_memory", &self.is_memory)
            .field("store_config", &self.store_config)
            .field("registry_len", &self.registry.len())
            .finish_non_exhaustive()
    }
}

/// Configuration for the SQLite connection pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqliteBackendConfig {
    /// Maximum number of connections in the pool. In-memory databases always
    /// use a single connection.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of idle connections.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u32,

    /// Enable WAL mode for file databases.
    #[serde(default = "default_true")]
    pub enable_wal: bool,

    /// Enable foreign key constraints.
    #[serde(default = "default_true")]
    pub enable_foreign_keys: bool,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connection_timeout_ms() -> u64 {
    30000
}

fn default_busy_timeout_ms() -> u32 {
    5000
}

fn default_true() -> bool {
    true
}

impl Default for SqliteBackendConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connection_timeout_ms: default_connection_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            enable_wal: true,
            enable_foreign_keys: true,
        }
    }
}

impl SqliteBackend {
    /// Creates a new in-memory SQLite backend.
    pub fn in_memory() -> StorageResult<Self> {
        Self::with_config(":memory:", SqliteBackendConfig::default())
    }

    /// Opens or creates a file-based SQLite database.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        Self::with_config(path, SqliteBackendConfig::default())
    }

    /// Creates a backend with custom pool configuration, the embedded
    /// resource type registry and default store settings.
    pub fn with_config<P: AsRef<Path>>(
        path: P,
        config: SqliteBackendConfig,
    ) -> StorageResult<Self> {
        let is_memory = path.as_ref().to_string_lossy() == ":memory:";

        let busy_timeout_ms = config.busy_timeout_ms;
        let enable_foreign_keys = config.enable_foreign_keys;
        let enable_wal = config.enable_wal && !is_memory;
        let manager = SqliteConnectionManager::file(path.as_ref()).with_init(move |conn| {
            configure_connection(conn, busy_timeout_ms, enable_foreign_keys, enable_wal)
        });

        // Every connection to ":memory:" is a separate database, so the pool
        // must hold exactly one connection and never recycle it.
        let builder = if is_memory {
            Pool::builder()
                .max_size(1)
                .min_idle(Some(1))
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            Pool::builder()
                .max_size(config.max_connections)
                .min_idle(Some(config.min_connections))
        };

        let pool = builder
            .connection_timeout(Duration::from_millis(config.connection_timeout_ms))
            .build(manager)
            .map_err(|e| {
                StorageError::Backend(BackendError::ConnectionFailed {
                    backend_name: "sqlite".to_string(),
                    message: e.to_string(),
                })
            })?;

        let store_config = StoreConfig::default();
        let forced_id_pattern = Regex::new(&store_config.forced_id_pattern)
            .map_err(|e| internal_error(format!("Invalid forced id pattern: {}", e)))?;

        let registry = Arc::new(ResourceTypeRegistry::with_defaults());
        tracing::info!(
            "Loaded {} resource types into registry",
            registry.len()
        );

        Ok(Self {
            pool,
            config,
            is_memory,
            store_config,
            forced_id_pattern,
            extractor: SearchParameterExtractor::new(registry.clone()),
            registry,
            full_text: Arc::new(NoopFullTextIndex),
        })
    }

    /// Replaces the resource type registry.
    pub fn with_registry(mut self, registry: Arc<ResourceTypeRegistry>) -> Self {
        self.extractor = SearchParameterExtractor::new(registry.clone());
        self.registry = registry;
        self
    }

    /// Replaces the store configuration after validating it.
    pub fn with_store_config(mut self, store_config: StoreConfig) -> Result<Self, ConfigError> {
        store_config.validate()?;
        self.forced_id_pattern =
            Regex::new(&store_config.forced_id_pattern).map_err(|e| ConfigError::InvalidValue {
                field: "forced_id_pattern".to_string(),
                message: e.to_string(),
            })?;
        self.store_config = store_config;
        Ok(self)
    }

    /// Sets the external full-text index.
    pub fn with_full_text(mut self, full_text: Arc<dyn FullTextIndex>) -> Self {
        self.full_text = full_text;
        self
    }

    /// Initialize the database schema.
    pub fn init_schema(&self) -> StorageResult<()> {
        let conn = self.get_connection()?;
        schema::initialize_schema(&conn)
    }

    /// Get a connection from the pool.
    pub(crate) fn get_connection(
        &self,
    ) -> StorageResult<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| {
            StorageError::Backend(BackendError::ConnectionFailed {
                backend_name: "sqlite".to_string(),
                message: e.to_string(),
            })
        })
    }

    /// Returns whether this is an in-memory database.
    pub fn is_memory(&self) -> bool {
        self.is_memory
    }

    /// Returns the pool configuration.
    pub fn config(&self) -> &SqliteBackendConfig {
        &self.config
    }

    /// Returns the store configuration.
    pub fn store_config(&self) -> &StoreConfig {
        &self.store_config
    }

    /// Returns the resource type registry.
    pub fn registry(&self) -> &Arc<ResourceTypeRegistry> {
        &self.registry
    }

    pub(crate) fn extractor(&self) -> &SearchParameterExtractor {
        &self.extractor
    }

    pub(crate) fn full_text(&self) -> &Arc<dyn FullTextIndex> {
        &self.full_text
    }

    pub(crate) fn is_valid_forced_id(&self, forced_id: &str) -> bool {
        self.forced_id_pattern.is_match(forced_id)
    }

    /// Returns a validator backed by this store's profiles, value sets and
    /// reference links.
    pub fn validator(&self) -> Validator<'_> {
        Validator::new(&self.registry, self, self, self)
    }

    /// Runs the validate operation against this store.
    ///
    /// See [`Validator::validate`] for the rules applied in each mode.
    pub async fn validate(
        &self,
        resource_type: &str,
        resource: Option<&Value>,
        id: Option<&str>,
        mode: ValidationMode,
    ) -> StorageResult<OperationOutcome> {
        self.validator()
            .validate(resource_type, resource, id, mode)
            .await
    }
}

/// Applies per-connection settings. Runs for every connection the pool opens.
fn configure_connection(
    conn: &mut Connection,
    busy_timeout_ms: u32,
    enable_foreign_keys: bool,
    enable_wal: bool,
) -> Result<(), rusqlite::Error> {
    conn.busy_timeout(Duration::from_millis(busy_timeout_ms as u64))?;

    if enable_foreign_keys {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    }

    if enable_wal {
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    }

    Ok(())
}
