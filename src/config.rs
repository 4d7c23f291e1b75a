//! Configuration manager.

use std::fs::File;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const DEFAULT_ADDRESS: &str = "0.0.0.0:8080";

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("cannot open `{path}`: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse `{path}`: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Instance name.
    #[serde(default)]
    pub name: String,
    /// Socket address the HTTP server listens on.
    #[serde(default = "default_address")]
    pub address: String,
    /// Related to PostgreSQL configuration.
    #[serde(skip_serializing)]
    pub postgres: Option<Postgres>,
    /// Related to Argon2 configuration.
    #[serde(skip_serializing)]
    pub argon2: Option<Argon2>,
    /// Path to the LDAP configuration document.
    /// Accounts are checked against PostgreSQL when missing.
    pub ldap: Option<PathBuf>,
    /// Related to telemetry export.
    pub telemetry: Option<Telemetry>,
    #[serde(skip)]
    path: PathBuf,
}

fn default_address() -> String {
    DEFAULT_ADDRESS.into()
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: String::default(),
            address: default_address(),
            postgres: None,
            argon2: None,
            ldap: None,
            telemetry: None,
            path: PathBuf::from(DEFAULT_CONFIG_PATH),
        }
    }
}

/// PostgreSQL configuration.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Postgres {
    /// Hostname:(?port) for PostgreSQL instance.
    pub address: String,
    /// Database name.
    pub database: Option<String>,
    /// Username credential to connect.
    pub username: Option<String>,
    /// Password credential to connect.
    pub password: Option<String>,
    /// Maximum pool connections.
    pub pool_size: Option<u32>,
}

/// Argon2 configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Argon2 {
    /// Memory used while hashing.
    pub memory_cost: u32,
    /// Iterations of hash.
    pub iterations: u32,
    /// Parallelism degree.
    pub parallelism: u32,
    /// Output hash length.
    pub hash_length: usize,
}

impl Default for Argon2 {
    fn default() -> Self {
        Self {
            memory_cost: 1024 * 64, // 64 MiB.
            iterations: 4,
            parallelism: 2,
            hash_length: 32,
        }
    }
}

/// OpenTelemetry export.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Telemetry {
    /// gRPC endpoint of an OTLP collector receiving logs.
    pub otlp_endpoint: Option<String>,
}

impl Configuration {
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Reads the YAML file from the configured path.
    ///
    /// Relative `ldap` paths are resolved from the configuration file
    /// directory.
    pub fn read(self) -> Result<Self, ConfigurationError> {
        let file = File::open(&self.path).map_err(|source| {
            ConfigurationError::Io {
                path: self.path.clone(),
                source,
            }
        })?;

        let mut config: Configuration = serde_yaml::from_reader(file)
            .map_err(|source| ConfigurationError::Yaml {
                path: self.path.clone(),
                source,
            })?;

        config.ldap = config
            .ldap
            .map(|ldap| resolve(self.path.parent(), ldap));
        config.path = self.path;

        Ok(config)
    }
}

fn resolve(base: Option<&Path>, path: PathBuf) -> PathBuf {
    match base {
        Some(base) if path.is_relative() => base.join(path),
        _ => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read() {
        let dir = std::env::temp_dir().join("shiori-auth-config");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.yaml");
        std::fs::write(
            &path,
            r#"
name: shiori
postgres:
  address: localhost:5432
  database: shiori
argon2:
  memory_cost: 2048
  iterations: 2
  parallelism: 1
  hash_length: 32
ldap: ldap.toml
"#,
        )
        .unwrap();

        let config = Configuration::default().path(&path).read().unwrap();

        assert_eq!(config.name, "shiori");
        assert_eq!(config.address, DEFAULT_ADDRESS);
        assert_eq!(config.ldap, Some(dir.join("ldap.toml")));
        assert_eq!(
            config.postgres.map(|p| p.database),
            Some(Some("shiori".into()))
        );
        assert_eq!(config.argon2.map(|a| a.memory_cost), Some(2048));
        assert!(config.telemetry.is_none());
    }

    #[test]
    fn test_missing_file() {
        let err = Configuration::default()
            .path("/nonexistent/config.yaml")
            .read()
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::Io { .. }));
    }

    #[test]
    fn test_absolute_ldap_path() {
        assert_eq!(
            resolve(Some(Path::new("/etc/shiori")), "/etc/ldap.toml".into()),
            PathBuf::from("/etc/ldap.toml")
        );
    }
}
