//! SurrealDB connection handling
//!
//! `StoreConfig` locates a database; `open` connects, authenticates,
//! selects the namespace/database, runs migrations and checks the schema
//! version. Supports in-memory (`mem://`), embedded file (`surrealkv://`)
//! and remote (`ws://`, `wss://`) endpoints.

use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::Surreal;
use tracing::{info, instrument};

use crate::error::StateError;
use crate::migrations;
use crate::Result;

/// Default namespace for dbcopy stores
pub const DEFAULT_NAMESPACE: &str = "openm";

/// Default database name
pub const DEFAULT_DATABASE: &str = "main";

/// Credentials for a remote store
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// Root user (true) or database user (false)
    pub is_root: bool,
}

/// Location of a model store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Endpoint URL, e.g. `mem://`, `surrealkv://models.db`, `wss://host`
    pub endpoint: String,
    /// Namespace (default: "openm")
    pub namespace: String,
    /// Database name (default: "main")
    pub database: String,
    /// Optional sign-in credentials
    pub credentials: Option<Credentials>,
}

impl StoreConfig {
    /// Create a configuration for an endpoint with default namespace/database
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            credentials: None,
        }
    }

    /// In-memory store
    pub fn memory() -> Self {
        Self::new("mem://")
    }

    /// Set custom namespace
    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = ns.into();
        self
    }

    /// Set custom database
    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.database = db.into();
        self
    }

    /// Sign in with the given credentials after connecting
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
        is_root: bool,
    ) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
            is_root,
        });
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - DBCOPY_DB_URL (required)
    /// - DBCOPY_DB_USERNAME / DBCOPY_DB_PASSWORD (optional, both or neither)
    /// - DBCOPY_DB_ROOT (optional, default: "false")
    /// - DBCOPY_DB_NAMESPACE (optional, default: "openm")
    /// - DBCOPY_DB_DATABASE (optional, default: "main")
    pub fn from_env() -> std::result::Result<Self, String> {
        let endpoint = std::env::var("DBCOPY_DB_URL").map_err(|_| "DBCOPY_DB_URL not set")?;
        let mut config = Self::new(endpoint);

        if let Ok(ns) = std::env::var("DBCOPY_DB_NAMESPACE") {
            config = config.with_namespace(ns);
        }
        if let Ok(db) = std::env::var("DBCOPY_DB_DATABASE") {
            config = config.with_database(db);
        }
        if let (Ok(username), Ok(password)) = (
            std::env::var("DBCOPY_DB_USERNAME"),
            std::env::var("DBCOPY_DB_PASSWORD"),
        ) {
            let is_root = std::env::var("DBCOPY_DB_ROOT")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false);
            config = config.with_credentials(username, password, is_root);
        }
        Ok(config)
    }
}

/// Connect to the configured store and prepare its schema.
///
/// Fails with `StateError::SchemaVersion` if the store was created by an
/// incompatible version; nothing is written to such a store.
#[instrument(skip(config), fields(endpoint = %config.endpoint, namespace = %config.namespace, database = %config.database))]
pub async fn open(config: &StoreConfig) -> Result<Surreal<Any>> {
    info!("Connecting to model store");

    let db = surrealdb::engine::any::connect(config.endpoint.as_str())
        .await
        .map_err(|e| {
            StateError::Connection(format!("Failed to connect to {}: {}", config.endpoint, e))
        })?;

    if let Some(creds) = &config.credentials {
        if creds.is_root {
            db.signin(Root {
                username: &creds.username,
                password: &creds.password,
            })
            .await
            .map_err(|e| StateError::Connection(format!("Root authentication failed: {}", e)))?;
        } else {
            db.signin(Database {
                namespace: &config.namespace,
                database: &config.database,
                username: &creds.username,
                password: &creds.password,
            })
            .await
            .map_err(|e| {
                StateError::Connection(format!("Database authentication failed: {}", e))
            })?;
        }
    }

    db.use_ns(&config.namespace)
        .use_db(&config.database)
        .await
        .map_err(|e| {
            StateError::Connection(format!("Failed to select namespace/database: {}", e))
        })?;

    migrations::init_schema(&db).await?;
    migrations::check_schema_version(&db).await?;

    info!("Model store connected and schema verified");
    Ok(db)
}
