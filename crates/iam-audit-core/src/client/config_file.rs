//! Reader for the OCI CLI configuration file (`~/.oci/config`).
//!
//! The file is INI-style. Every named profile inherits keys from the
//! `[DEFAULT]` section unless it overrides them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::AuditError;

use super::{AuthMode, Session, SessionProvider};

pub(crate) const DEFAULT_PROFILE: &str = "DEFAULT";

/// Parsed configuration file: section name to key/value pairs.
#[derive(Debug, Clone, Default)]
pub struct OciConfigFile {
    sections: HashMap<String, HashMap<String, String>>,
}

/// The keys needed to sign requests, after `DEFAULT` inheritance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OciProfile {
    pub user: String,
    pub fingerprint: String,
    pub key_file: PathBuf,
    pub tenancy: String,
    pub region: String,
}

impl OciConfigFile {
    /// `~/.oci/config`.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".oci").join("config"))
    }

    pub fn load(path: &Path) -> Result<Self, AuditError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AuditError::configuration(format!("Cannot read {}: {e}", path.display()))
        })?;
        Self::parse(&content)
    }

    /// Parse INI text the way the OCI CLI reads it.
    ///
    /// - `#` and `;` start a comment line; there are no inline comments
    /// - keys are case-insensitive and split from values by `=` or `:`
    /// - an indented line continues the previous value
    pub fn parse(content: &str) -> Result<Self, AuditError> {
        let content = content.strip_prefix('\u{feff}').unwrap_or(content);
        let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
        let mut current: Option<String> = None;
        let mut last_key: Option<String> = None;

        for (lineno, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if raw.starts_with([' ', '\t'])
                && let (Some(section), Some(key)) = (&current, &last_key)
                && let Some(value) = sections.get_mut(section).and_then(|s| s.get_mut(key))
            {
                if !value.is_empty() {
                    value.push('\n');
                }
                value.push_str(line);
                continue;
            }

            if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                let name = name.trim().to_string();
                sections.entry(name.clone()).or_default();
                current = Some(name);
                last_key = None;
                continue;
            }
            let Some((key, value)) = line
                .find(['=', ':'])
                .map(|at| (line[..at].trim(), line[at + 1..].trim()))
            else {
                return Err(AuditError::configuration(format!(
                    "Line {}: expected 'key=value', found '{line}'",
                    lineno + 1
                )));
            };
            let Some(section) = &current else {
                return Err(AuditError::configuration(format!(
                    "Line {}: key '{key}' appears before any [profile] header",
                    lineno + 1
                )));
            };
            let key = key.to_ascii_lowercase();
            sections
                .entry(section.clone())
                .or_default()
                .insert(key.clone(), value.to_string());
            last_key = Some(key);
        }

        Ok(Self { sections })
    }

    /// Look up a key in `profile`, falling back to `[DEFAULT]`.
    #[must_use]
    pub fn get(&self, profile: &str, key: &str) -> Option<&str> {
        self.sections
            .get(profile)
            .and_then(|s| s.get(key))
            .or_else(|| self.sections.get(DEFAULT_PROFILE).and_then(|s| s.get(key)))
            .map(String::as_str)
    }

    pub fn profile(&self, name: &str) -> Result<OciProfile, AuditError> {
        if !self.sections.contains_key(name) {
            return Err(AuditError::configuration(format!(
                "Profile '{name}' not found in OCI config file"
            )));
        }
        let require = |key: &str| {
            self.get(name, key).map(str::to_string).ok_or_else(|| {
                AuditError::configuration(format!("Profile '{name}' is missing '{key}'"))
            })
        };
        Ok(OciProfile {
            user: require("user")?,
            fingerprint: require("fingerprint")?,
            key_file: expand_home(&require("key_file")?),
            tenancy: require("tenancy")?,
            region: require("region")?,
        })
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(path)
}

// =============================================================================
// Provider
// =============================================================================

/// [`SessionProvider`] backed by an OCI config file.
#[derive(Debug, Clone)]
pub struct OciConfigProvider {
    path: Option<PathBuf>,
}

impl OciConfigProvider {
    /// Read `~/.oci/config`.
    pub fn new() -> Self {
        Self { path: None }
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    fn config_path(&self) -> Result<PathBuf, AuditError> {
        self.path
            .clone()
            .or_else(OciConfigFile::default_path)
            .ok_or_else(|| AuditError::configuration("Cannot determine home directory"))
    }
}

impl Default for OciConfigProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionProvider for OciConfigProvider {
    fn establish_session(&self, mode: &AuthMode) -> Result<Session, AuditError> {
        let name = match mode {
            AuthMode::Profile(name) => name,
            AuthMode::InstancePrincipal => {
                return Err(AuditError::auth(
                    "Instance principal authentication is not supported; use a config profile",
                ));
            }
        };

        let path = self.config_path()?;
        let file = OciConfigFile::load(&path)?;
        let profile = file.profile(name)?;

        let private_key_pem = std::fs::read_to_string(&profile.key_file).map_err(|e| {
            AuditError::auth(format!(
                "Cannot read key file {}: {e}",
                profile.key_file.display()
            ))
        })?;

        tracing::debug!(
            profile = %name,
            region = %profile.region,
            tenancy = %profile.tenancy,
            "Loaded OCI config profile"
        );

        Ok(Session {
            tenancy_id: profile.tenancy,
            region: profile.region,
            user_id: profile.user,
            fingerprint: profile.fingerprint,
            private_key_pem,
            key_file: Some(profile.key_file),
        })
    }
}
