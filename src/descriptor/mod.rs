//! Connection Descriptors
//!
//! `ConnectionConfig` is raw caller input: every field optional, serde-friendly.
//! `ConnectionDescriptor` is what the rest of the crate accepts: a config that passed
//! engine-specific validation, frozen, with its signature computed once.
//!
//! # Signatures
//! A signature is the SHA-256 of a canonical JSON encoding of every descriptor field in
//! a fixed order. It is stable across restarts and changes whenever any field changes,
//! so it can scope the schema cache and the history ledger.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;

use crate::engine::{EngineFamily, EngineKind};
use crate::error::ValidationError;

/// Connection parameters as supplied by a caller
///
/// Fields are engine-specific (e.g., `file` only applies to `SQLite`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Database engine type
    pub engine: EngineKind,

    /// Hostname (for postgres/redis)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Port number (for postgres/redis)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Username (postgres, optional ACL user for redis)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Password
    /// WARNING: Sensitive data, do not log or include in error messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Database name (postgres) or logical database index (redis)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    /// Database file path (for sqlite)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl ConnectionConfig {
    /// Create a new `PostgreSQL` connection config
    #[must_use]
    pub fn postgres(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            engine: EngineKind::Postgres,
            host: Some(host.into()),
            port: Some(port),
            user: Some(user.into()),
            password: Some(password.into()),
            database: Some(database.into()),
            file: None,
        }
    }

    /// Create a new `SQLite` connection config
    #[must_use]
    pub fn sqlite(file: impl Into<PathBuf>) -> Self {
        Self {
            engine: EngineKind::Sqlite,
            host: None,
            port: None,
            user: None,
            password: None,
            database: None,
            file: Some(file.into()),
        }
    }

    /// Create a new Redis connection config (no password, logical database 0)
    #[must_use]
    pub fn redis(host: impl Into<String>, port: u16) -> Self {
        Self {
            engine: EngineKind::Redis,
            host: Some(host.into()),
            port: Some(port),
            user: None,
            password: None,
            database: None,
            file: None,
        }
    }

    /// Set the password, consuming the config
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

/// Stable digest of a descriptor's fields
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionSignature(String);

impl ConnectionSignature {
    /// Hex-encoded digest
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validated, immutable connection descriptor
///
/// Construct with [`ConnectionDescriptor::validate`]. There are no setters: a changed
/// field means a new descriptor, and therefore a new signature.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    config: ConnectionConfig,
    signature: ConnectionSignature,
}

impl ConnectionDescriptor {
    /// Validate caller input against the engine's required fields
    ///
    /// # Errors
    /// `MissingField` when a required field is absent, empty, or a zero port.
    /// `InvalidField` when a redis logical database is not a number.
    pub fn validate(config: ConnectionConfig) -> Result<Self, ValidationError> {
        let engine = config.engine.as_str();

        let require_text = |field: &'static str, value: &Option<String>| match value {
            Some(v) if !v.trim().is_empty() => Ok(()),
            _ => Err(ValidationError::MissingField { engine, field }),
        };
        let require_port = || match config.port {
            Some(port) if port != 0 => Ok(()),
            _ => Err(ValidationError::MissingField { engine, field: "port" }),
        };

        match config.engine {
            EngineKind::Postgres => {
                require_text("host", &config.host)?;
                require_port()?;
                require_text("user", &config.user)?;
                require_text("database", &config.database)?;
            }
            EngineKind::Sqlite => match &config.file {
                Some(path) if !path.as_os_str().is_empty() => {}
                _ => return Err(ValidationError::MissingField { engine, field: "file" }),
            },
            EngineKind::Redis => {
                require_text("host", &config.host)?;
                require_port()?;
                if let Some(db) = config.database.as_deref().filter(|db| !db.is_empty()) {
                    db.parse::<i64>().map_err(|_| ValidationError::InvalidField {
                        engine,
                        field: "database",
                        reason: format!("expected a logical database index, got '{db}'"),
                    })?;
                }
            }
        }

        let signature = compute_signature(&config);
        Ok(Self { config, signature })
    }

    /// Engine kind
    #[must_use]
    pub const fn engine(&self) -> EngineKind {
        self.config.engine
    }

    /// Engine family (relational or key-value)
    #[must_use]
    pub const fn family(&self) -> EngineFamily {
        self.config.engine.family()
    }

    /// Read-only view of the validated fields
    #[must_use]
    pub const fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Host, present for network engines
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.config.host.as_deref()
    }

    /// Port, present for network engines
    #[must_use]
    pub const fn port(&self) -> Option<u16> {
        self.config.port
    }

    /// User name
    #[must_use]
    pub fn user(&self) -> Option<&str> {
        self.config.user.as_deref()
    }

    /// Password
    #[must_use]
    pub fn password(&self) -> Option<&str> {
        self.config.password.as_deref()
    }

    /// Database name or namespace
    #[must_use]
    pub fn database(&self) -> Option<&str> {
        self.config.database.as_deref()
    }

    /// Database file
    #[must_use]
    pub fn file(&self) -> Option<&std::path::Path> {
        self.config.file.as_deref()
    }

    /// Signature computed at validation time
    #[must_use]
    pub const fn signature(&self) -> &ConnectionSignature {
        &self.signature
    }

    /// Credential-free rendering for logs and error messages
    #[must_use]
    pub fn redacted(&self) -> String {
        let c = &self.config;
        match c.engine {
            EngineKind::Sqlite => {
                format!("sqlite:{}", c.file.as_deref().map(|p| p.display().to_string()).unwrap_or_default())
            }
            EngineKind::Postgres | EngineKind::Redis => {
                let user = c.user.as_deref().map(|u| format!("{u}@")).unwrap_or_default();
                let db = c.database.as_deref().map(|d| format!("/{d}")).unwrap_or_default();
                format!(
                    "{}://{user}{}:{}{db}",
                    c.engine,
                    c.host.as_deref().unwrap_or_default(),
                    c.port.unwrap_or_default()
                )
            }
        }
    }
}

impl TryFrom<ConnectionConfig> for ConnectionDescriptor {
    type Error = ValidationError;

    fn try_from(config: ConnectionConfig) -> Result<Self, Self::Error> {
        Self::validate(config)
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("target", &self.redacted())
            .field("signature", &self.signature.as_str())
            .finish()
    }
}

/// Canonical field layout hashed into a signature
///
/// Field order is part of the signature format; do not reorder.
#[derive(Serialize)]
struct CanonicalFields<'a> {
    engine: &'a str,
    host: Option<&'a str>,
    port: Option<u16>,
    user: Option<&'a str>,
    password: Option<&'a str>,
    database: Option<&'a str>,
    file: Option<String>,
}

fn compute_signature(config: &ConnectionConfig) -> ConnectionSignature {
    let canonical = CanonicalFields {
        engine: config.engine.as_str(),
        host: config.host.as_deref(),
        port: config.port,
        user: config.user.as_deref(),
        password: config.password.as_deref(),
        database: config.database.as_deref(),
        file: config.file.as_ref().map(|p| p.to_string_lossy().into_owned()),
    };

    // Serializing a struct of strings and integers cannot fail
    let encoded = serde_json::to_vec(&canonical).unwrap_or_default();
    ConnectionSignature(hex::encode(Sha256::digest(&encoded)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pg() -> ConnectionConfig {
        ConnectionConfig::postgres("localhost", 5432, "admin", "secret", "app")
    }

    #[test]
    fn test_identical_fields_identical_signature() {
        let a = ConnectionDescriptor::validate(pg()).unwrap();
        let b = ConnectionDescriptor::validate(pg()).unwrap();
        assert_eq!(a.signature(), b.signature());
        assert_eq!(a.signature().as_str().len(), 64);
    }

    #[test]
    fn test_field_perturbations_change_signature() {
        let base = ConnectionDescriptor::validate(pg()).unwrap();

        let perturbed = [
            ConnectionConfig { host: Some("db.internal".into()), ..pg() },
            ConnectionConfig { port: Some(5433), ..pg() },
            ConnectionConfig { user: Some("reader".into()), ..pg() },
            ConnectionConfig { password: Some("other".into()), ..pg() },
            ConnectionConfig { password: None, ..pg() },
            ConnectionConfig { database: Some("app2".into()), ..pg() },
        ];

        for config in perturbed {
            let d = ConnectionDescriptor::validate(config.clone()).unwrap();
            assert_ne!(base.signature(), d.signature(), "signature unchanged for {config:?}");
        }
    }

    #[test]
    fn test_empty_and_absent_password_differ() {
        let empty = ConnectionDescriptor::validate(pg().with_password("")).unwrap();
        let absent = ConnectionDescriptor::validate(ConnectionConfig { password: None, ..pg() }).unwrap();
        assert_ne!(empty.signature(), absent.signature());
    }

    #[test]
    fn test_redis_password_changes_signature() {
        let open = ConnectionDescriptor::validate(ConnectionConfig::redis("localhost", 6379)).unwrap();
        let locked = ConnectionDescriptor::validate(
            ConnectionConfig::redis("localhost", 6379).with_password("pw"),
        )
        .unwrap();
        assert_ne!(open.signature(), locked.signature());
    }

    #[test]
    fn test_postgres_missing_fields() {
        let cases = [
            (ConnectionConfig { host: None, ..pg() }, "host"),
            (ConnectionConfig { host: Some("  ".into()), ..pg() }, "host"),
            (ConnectionConfig { port: None, ..pg() }, "port"),
            (ConnectionConfig { port: Some(0), ..pg() }, "port"),
            (ConnectionConfig { user: Some(String::new()), ..pg() }, "user"),
            (ConnectionConfig { database: None, ..pg() }, "database"),
        ];

        for (config, expected) in cases {
            let err = ConnectionDescriptor::validate(config).unwrap_err();
            assert_eq!(err, ValidationError::MissingField { engine: "postgres", field: expected });
        }
    }

    #[test]
    fn test_postgres_password_optional() {
        let config = ConnectionConfig { password: None, ..pg() };
        assert!(ConnectionDescriptor::validate(config).is_ok());
    }

    #[test]
    fn test_sqlite_requires_file() {
        let config = ConnectionConfig { file: None, ..ConnectionConfig::sqlite("x.db") };
        let err = ConnectionDescriptor::validate(config).unwrap_err();
        assert_eq!(err, ValidationError::MissingField { engine: "sqlite", field: "file" });

        let err = ConnectionDescriptor::validate(ConnectionConfig::sqlite("")).unwrap_err();
        assert_eq!(err, ValidationError::MissingField { engine: "sqlite", field: "file" });
    }

    #[test]
    fn test_redis_database_must_be_numeric() {
        let mut config = ConnectionConfig::redis("localhost", 6379);
        config.database = Some("sessions".into());
        let err = ConnectionDescriptor::validate(config).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidField { field: "database", .. }));

        let mut config = ConnectionConfig::redis("localhost", 6379);
        config.database = Some("2".into());
        assert!(ConnectionDescriptor::validate(config).is_ok());
    }

    #[test]
    fn test_redacted_hides_password() {
        let d = ConnectionDescriptor::validate(pg()).unwrap();
        let shown = d.redacted();
        assert_eq!(shown, "postgres://admin@localhost:5432/app");
        assert!(!shown.contains("secret"));
        assert!(!format!("{d:?}").contains("secret"));
    }

    #[test]
    fn test_config_deserializes_from_request_fields() {
        let config: ConnectionConfig = serde_json::from_str(
            r#"{"engine":"redis","host":"127.0.0.1","port":6379}"#,
        )
        .unwrap();
        assert_eq!(config, ConnectionConfig::redis("127.0.0.1", 6379));
    }
}
