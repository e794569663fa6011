//! Project configuration loaded from `.ecclesia/config.toml`.

use crate::core::error::SchoolError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct EcclesiaConfig {
    #[serde(default)]
    pub school: SchoolSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchoolSection {
    /// Passing score applied to modules that do not declare their own.
    #[serde(default = "default_passing_score")]
    pub default_passing_score: u32,
    /// Leading segment of certificate numbers (`FS-2026-000001`).
    #[serde(default = "default_certificate_prefix")]
    pub certificate_prefix: String,
    /// Users allowed to write the curriculum catalog, on top of owners and
    /// admins of top-level organizations.
    #[serde(default)]
    pub registrars: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingSection {
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_passing_score() -> u32 {
    70
}

fn default_certificate_prefix() -> String {
    "FS".to_string()
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for SchoolSection {
    fn default() -> Self {
        Self {
            default_passing_score: default_passing_score(),
            certificate_prefix: default_certificate_prefix(),
            registrars: Vec::new(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl EcclesiaConfig {
    fn validate(self) -> Result<Self, SchoolError> {
        if self.school.default_passing_score > 100 {
            return Err(SchoolError::ConfigError(format!(
                "school.default_passing_score must be within 0..=100, got {}",
                self.school.default_passing_score
            )));
        }
        if self.school.certificate_prefix.trim().is_empty() {
            return Err(SchoolError::ConfigError(
                "school.certificate_prefix must not be empty".to_string(),
            ));
        }
        if self.school.registrars.iter().any(|r| r.trim().is_empty()) {
            return Err(SchoolError::ConfigError(
                "school.registrars must not contain blank entries".to_string(),
            ));
        }
        Ok(self)
    }
}

/// Load config for a store.
///
/// Accepts either the project root (parent of `.ecclesia`) or the store
/// root (`.ecclesia/data`). A missing file yields defaults.
pub fn load_config(dir: &Path) -> Result<EcclesiaConfig, SchoolError> {
    let candidates = [
        dir.join(".ecclesia").join(CONFIG_FILE_NAME),
        dir.parent()
            .filter(|p| p.file_name().is_some_and(|n| n == ".ecclesia"))
            .map(|p| p.join(CONFIG_FILE_NAME))
            .unwrap_or_default(),
    ];

    for path in candidates.iter().filter(|p| p.is_file()) {
        let content = fs::read_to_string(path).map_err(SchoolError::IoError)?;
        let config: EcclesiaConfig = toml::from_str(&content)
            .map_err(|e| SchoolError::ConfigError(format!("{}: {}", path.display(), e)))?;
        return config.validate();
    }

    Ok(EcclesiaConfig::default())
}
