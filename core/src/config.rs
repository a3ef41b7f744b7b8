//! Fixture configuration for the remote replication endpoint.
//!
//! Settings are layered: `replication.toml`, then `local-replication.toml`
//! (meant to stay out of version control), then `TOUCHDB_REPLICATION_*`
//! environment variables. Every field is optional; an incomplete
//! configuration simply yields no endpoint.

use std::fs;
use std::io;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::remote::{Credentials, ReplicationEndpoint};

pub const BASE_FILE: &str = "replication.toml";
pub const LOCAL_FILE: &str = "local-replication.toml";
const ENV_PREFIX: &str = "TOUCHDB_REPLICATION_";

/// Errors loading fixture configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read { path: String, source: io::Error },

    #[error("failed to parse {path}: {source}")]
    Parse { path: String, source: toml::de::Error },

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Layered replication settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReplicationConfig {
    pub protocol: Option<String>,
    pub server: Option<String>,
    pub port: Option<u16>,
    pub admin_user: Option<String>,
    pub admin_password: Option<String>,
    pub database: Option<String>,
}

impl ReplicationConfig {
    /// Loads both files from `dir` (each optional), then applies the process
    /// environment.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for name in [BASE_FILE, LOCAL_FILE] {
            if let Some(layer) = Self::from_file(&dir.join(name))? {
                config.merge(layer);
            }
        }
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Reads one TOML layer. A missing file is `Ok(None)`.
    pub fn from_file(path: &Path) -> Result<Option<Self>, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        toml::from_str(&text).map(Some).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Fields set in `other` override fields in `self`.
    pub fn merge(&mut self, other: Self) {
        let Self {
            protocol,
            server,
            port,
            admin_user,
            admin_password,
            database,
        } = other;
        self.protocol = protocol.or(self.protocol.take());
        self.server = server.or(self.server.take());
        self.port = port.or(self.port.take());
        self.admin_user = admin_user.or(self.admin_user.take());
        self.admin_password = admin_password.or(self.admin_password.take());
        self.database = database.or(self.database.take());
    }

    /// Overrides fields from `lookup`, keyed by `TOUCHDB_REPLICATION_<FIELD>`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let var = |field: &str| lookup(&format!("{ENV_PREFIX}{field}"));
        if let Some(v) = var("PROTOCOL") {
            self.protocol = Some(v);
        }
        if let Some(v) = var("SERVER") {
            self.server = Some(v);
        }
        if let Some(v) = var("PORT") {
            let port = v.parse().map_err(|_| ConfigError::InvalidValue {
                key: format!("{ENV_PREFIX}PORT"),
                value: v.clone(),
            })?;
            self.port = Some(port);
        }
        if let Some(v) = var("ADMIN_USER") {
            self.admin_user = Some(v);
        }
        if let Some(v) = var("ADMIN_PASSWORD") {
            self.admin_password = Some(v);
        }
        if let Some(v) = var("DATABASE") {
            self.database = Some(v);
        }
        Ok(())
    }

    /// The configured endpoint, or `None` when protocol, server, port or
    /// database is missing. Credentials are attached only when a user is set.
    pub fn endpoint(&self) -> Option<ReplicationEndpoint> {
        let credentials = self.admin_user.as_ref().map(|user| Credentials {
            user: user.clone(),
            password: self.admin_password.clone().unwrap_or_default(),
        });
        Some(ReplicationEndpoint {
            protocol: self.protocol.clone()?,
            host: self.server.clone()?,
            port: self.port?,
            database: self.database.clone()?,
            credentials,
        })
    }
}
