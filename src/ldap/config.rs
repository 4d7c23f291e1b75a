//! Directory (LDAP) configuration document.
//!
//! The document is TOML:
//!
//! ```toml
//! version = 1
//! host = "ldap.example.org"
//! port = 389
//!
//! [tls]
//! enabled = true
//! trustedCertificates = ["/etc/ssl/ldap-ca.pem"]
//!
//! [bind]
//! userDN = "cn=svcuser,ou=users,dc=example,dc=org"
//! password = "PASSWORD"
//!
//! [search]
//! base = "ou=users,dc=example,dc=org"
//! filter = "(&(memberOf={{.Group}})(uid={{.Login}}))"
//! ownerGroupDN = "cn=owners,ou=group,dc=example,dc=org"
//! visitorGroupDN = "cn=visitors,ou=group,dc=example,dc=org"
//! loginField = "uid"
//! ```
//!
//! Decoding goes through a permissive representation first, then every field
//! is checked and all violations are returned at once.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use validator::{ValidateIp, ValidateRange, ValidationError, ValidationErrors};

use super::filter::FilterTemplate;

pub const SUPPORTED_VERSION: i64 = 1;
const MAX_HOSTNAME_LENGTH: usize = 253;

static HOSTNAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*\.?$",
    )
    .expect("hostname pattern is valid")
});

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Failure to load a [`DirectoryConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read LDAP configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse LDAP configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid LDAP configuration fields: {}", fields(.0).join(", "))]
    Validation(ValidationErrors),
}

impl ConfigError {
    /// Field paths rejected by validation, sorted.
    pub fn fields(&self) -> Vec<String> {
        match self {
            ConfigError::Validation(errors) => fields(errors),
            _ => Vec::new(),
        }
    }
}

fn fields(errors: &ValidationErrors) -> Vec<String> {
    let mut fields = errors
        .field_errors()
        .keys()
        .map(|field| field.to_string())
        .collect::<Vec<_>>();
    fields.sort();
    fields
}

/// Validated configuration to reach the directory server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectoryConfig {
    pub version: i64,
    pub host: String,
    pub port: u16,
    pub tls: TlsConfig,
    pub bind: BindConfig,
    pub search: SearchConfig,
}

/// Transport security.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TlsConfig {
    pub enabled: bool,
    #[serde(rename = "skipCertVerification")]
    pub skip_cert_verification: bool,
    #[serde(rename = "trustedCertificates")]
    pub trusted_certificates: Vec<String>,
}

/// Service account used for lookups.
#[derive(Clone, PartialEq, Serialize)]
pub struct BindConfig {
    #[serde(rename = "userDN")]
    pub user_dn: String,
    pub password: String,
}

impl std::fmt::Debug for BindConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindConfig")
            .field("user_dn", &self.user_dn)
            .field("password", &"***")
            .finish()
    }
}

/// Where and how users are looked up.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchConfig {
    pub base: String,
    pub filter: String,
    #[serde(rename = "ownerGroupDN", skip_serializing_if = "Option::is_none")]
    pub owner_group_dn: Option<String>,
    #[serde(
        rename = "visitorGroupDN",
        skip_serializing_if = "Option::is_none"
    )]
    pub visitor_group_dn: Option<String>,
    #[serde(rename = "loginField", skip_serializing_if = "Option::is_none")]
    pub login_field: Option<String>,
}

impl SearchConfig {
    /// Group an account must belong to for the requested privilege.
    pub fn group_dn(&self, owner: bool) -> &str {
        let group = if owner {
            &self.owner_group_dn
        } else {
            &self.visitor_group_dn
        };

        group.as_deref().unwrap_or_default()
    }
}

impl DirectoryConfig {
    /// Read and validate the document at `path`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    /// Read and validate a document from any byte stream.
    pub fn from_reader(mut reader: impl Read) -> Result<Self> {
        let mut document = String::new();
        reader.read_to_string(&mut document)?;
        document.parse()
    }

    /// Canonical TOML form.
    pub fn to_toml(&self) -> std::result::Result<String, toml::ser::Error> {
        toml::to_string(self)
    }

    /// `ldap://` URL of the server.
    pub fn url(&self) -> std::result::Result<url::Url, url::ParseError> {
        let host = if self.host.validate_ipv6() {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };

        url::Url::parse(&format!("ldap://{host}:{}", self.port))
    }
}

impl std::str::FromStr for DirectoryConfig {
    type Err = ConfigError;

    fn from_str(document: &str) -> Result<Self> {
        toml::from_str::<RawConfig>(document)?
            .validate()
            .map_err(ConfigError::Validation)
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    version: Option<i64>,
    host: Option<String>,
    port: Option<i64>,
    tls: Option<RawTls>,
    bind: Option<RawBind>,
    search: Option<RawSearch>,
}

#[derive(Debug, Default, Deserialize)]
struct RawTls {
    #[serde(default)]
    enabled: bool,
    #[serde(
        default,
        rename = "skipCertVerification",
        alias = "SkipCertVerification"
    )]
    skip_cert_verification: bool,
    #[serde(
        default,
        rename = "trustedCertificates",
        alias = "trustedCertificatePaths"
    )]
    trusted_certificates: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawBind {
    #[serde(rename = "userDN")]
    user_dn: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSearch {
    base: Option<String>,
    #[serde(alias = "filterTemplate")]
    filter: Option<String>,
    #[serde(rename = "ownerGroupDN")]
    owner_group_dn: Option<String>,
    #[serde(rename = "visitorGroupDN")]
    visitor_group_dn: Option<String>,
    #[serde(rename = "loginField")]
    login_field: Option<String>,
}

fn violation(
    errors: &mut ValidationErrors,
    field: &'static str,
    code: &'static str,
    message: &'static str,
) {
    errors.add(field, ValidationError::new(code).with_message(message.into()));
}

/// Keep a required string, recording a violation when missing or blank.
fn required(
    errors: &mut ValidationErrors,
    field: &'static str,
    value: Option<String>,
) -> String {
    match value {
        Some(value) if !value.trim().is_empty() => value,
        _ => {
            violation(errors, field, "required", "Field is required.");
            String::default()
        },
    }
}

/// Empty strings mean "not set".
fn optional(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn is_host(host: &str) -> bool {
    if host.validate_ip() {
        return true;
    }

    // A numeric top label would be read as an IPv4 address.
    let numeric_tld = host
        .trim_end_matches('.')
        .rsplit('.')
        .next()
        .is_some_and(|label| label.bytes().all(|b| b.is_ascii_digit()));

    host.len() <= MAX_HOSTNAME_LENGTH && HOSTNAME.is_match(host) && !numeric_tld
}

impl RawConfig {
    fn validate(self) -> std::result::Result<DirectoryConfig, ValidationErrors> {
        let mut errors = ValidationErrors::new();

        let version = self.version.unwrap_or_default();
        if !version.validate_range(
            Some(SUPPORTED_VERSION),
            Some(SUPPORTED_VERSION),
            None,
            None,
        ) {
            violation(
                &mut errors,
                "version",
                "version",
                "Only version 1 is supported.",
            );
        }

        let host = required(&mut errors, "host", self.host);
        if !host.is_empty() && !is_host(&host) {
            violation(
                &mut errors,
                "host",
                "host",
                "Must be an IP address, a hostname or a FQDN.",
            );
        }

        let port = match self.port {
            Some(port) if port.validate_range(Some(1), Some(65535), None, None) => {
                port as u16
            },
            _ => {
                violation(
                    &mut errors,
                    "port",
                    "range",
                    "Must be between 1 and 65535.",
                );
                0
            },
        };

        let tls = match self.tls {
            Some(tls) => {
                if !tls.skip_cert_verification
                    && tls.trusted_certificates.is_empty()
                {
                    violation(
                        &mut errors,
                        "tls.trustedCertificates",
                        "required_without",
                        "Required unless `skipCertVerification` is set.",
                    );
                }

                TlsConfig {
                    enabled: tls.enabled,
                    skip_cert_verification: tls.skip_cert_verification,
                    trusted_certificates: tls.trusted_certificates,
                }
            },
            None => {
                violation(&mut errors, "tls", "required", "Section is required.");
                TlsConfig::default()
            },
        };

        let bind = match self.bind {
            Some(bind) => BindConfig {
                user_dn: required(&mut errors, "bind.userDN", bind.user_dn),
                password: required(&mut errors, "bind.password", bind.password),
            },
            None => {
                violation(&mut errors, "bind", "required", "Section is required.");
                BindConfig {
                    user_dn: String::default(),
                    password: String::default(),
                }
            },
        };

        let search = match self.search {
            Some(search) => {
                let filter =
                    required(&mut errors, "search.filter", search.filter);
                if !filter.is_empty() && FilterTemplate::parse(&filter).is_err()
                {
                    violation(
                        &mut errors,
                        "search.filter",
                        "template",
                        "Invalid template, only {{.Login}} and {{.Group}} are allowed.",
                    );
                }

                SearchConfig {
                    base: required(&mut errors, "search.base", search.base),
                    filter,
                    owner_group_dn: optional(search.owner_group_dn),
                    visitor_group_dn: optional(search.visitor_group_dn),
                    login_field: optional(search.login_field),
                }
            },
            None => {
                violation(&mut errors, "search", "required", "Section is required.");
                SearchConfig {
                    base: String::default(),
                    filter: String::default(),
                    owner_group_dn: None,
                    visitor_group_dn: None,
                    login_field: None,
                }
            },
        };

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(DirectoryConfig {
            version,
            host,
            port,
            tls,
            bind,
            search,
        })
    }
}
