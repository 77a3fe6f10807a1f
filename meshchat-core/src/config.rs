//! Session configuration: defaults, optional TOML file, environment overrides.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::core::DEFAULT_TRANSFER_TIMEOUT_TICKS;
use crate::identity::MAX_DISPLAY_NAME_LEN;

/// Longest service type the mesh layer advertises.
pub const MAX_SERVICE_TYPE_LEN: usize = 15;

/// Session configuration. File: ~/.config/meshchat/config.toml or /etc/meshchat/config.toml.
/// Env overrides: MESHCHAT_DISPLAY_NAME, MESHCHAT_SERVICE_TYPE, MESHCHAT_TRANSFER_TIMEOUT_TICKS.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Name shown to other peers (default: $HOSTNAME, else "meshchat").
    #[serde(default = "default_display_name")]
    pub display_name: String,
    /// Mesh service type that peers advertise and browse for (default "meshchat").
    #[serde(default = "default_service_type")]
    pub service_type: String,
    /// Idle ticks before an in-flight transfer is failed; 0 disables eviction (default 30).
    #[serde(default = "default_transfer_timeout_ticks")]
    pub transfer_timeout_ticks: u64,
}

fn default_display_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty() && h.len() <= MAX_DISPLAY_NAME_LEN)
        .unwrap_or_else(|| "meshchat".to_string())
}
fn default_service_type() -> String {
    "meshchat".to_string()
}
fn default_transfer_timeout_ticks() -> u64 {
    DEFAULT_TRANSFER_TIMEOUT_TICKS
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            display_name: default_display_name(),
            service_type: default_service_type(),
            transfer_timeout_ticks: default_transfer_timeout_ticks(),
        }
    }
}

impl SessionConfig {
    pub fn new(display_name: impl Into<String>, service_type: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            service_type: service_type.into(),
            transfer_timeout_ticks: default_transfer_timeout_ticks(),
        }
    }

    /// Check the names against the mesh layer's rules.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_display_name(&self.display_name)?;
        validate_service_type(&self.service_type)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("display name is empty")]
    EmptyDisplayName,
    #[error("display name is {0} bytes; limit is 63")]
    DisplayNameTooLong(usize),
    #[error("invalid service type {service_type:?}: {reason}")]
    InvalidServiceType {
        service_type: String,
        reason: &'static str,
    },
}

pub fn validate_display_name(name: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::EmptyDisplayName);
    }
    if name.len() > MAX_DISPLAY_NAME_LEN {
        return Err(ConfigError::DisplayNameTooLong(name.len()));
    }
    Ok(())
}

/// 1-15 chars of lowercase ASCII letters, digits and hyphens; at least one letter;
/// no hyphen at either end and no two hyphens in a row.
pub fn validate_service_type(service_type: &str) -> Result<(), ConfigError> {
    let invalid = |reason| ConfigError::InvalidServiceType {
        service_type: service_type.to_string(),
        reason,
    };
    if service_type.is_empty() || service_type.len() > MAX_SERVICE_TYPE_LEN {
        return Err(invalid("must be 1-15 characters"));
    }
    if !service_type
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        return Err(invalid("only lowercase letters, digits and hyphens allowed"));
    }
    if !service_type.bytes().any(|b| b.is_ascii_lowercase()) {
        return Err(invalid("must contain a letter"));
    }
    if service_type.starts_with('-') || service_type.ends_with('-') {
        return Err(invalid("must not start or end with a hyphen"));
    }
    if service_type.contains("--") {
        return Err(invalid("must not contain consecutive hyphens"));
    }
    Ok(())
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> SessionConfig {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut c = load_file(&config_paths_in(home)).unwrap_or_default();
    apply_overrides(&mut c, |key| std::env::var(key).ok());
    c
}

fn apply_overrides(c: &mut SessionConfig, var: impl Fn(&str) -> Option<String>) {
    if let Some(s) = var("MESHCHAT_DISPLAY_NAME") {
        c.display_name = s;
    }
    if let Some(s) = var("MESHCHAT_SERVICE_TYPE") {
        c.service_type = s;
    }
    if let Some(s) = var("MESHCHAT_TRANSFER_TIMEOUT_TICKS") {
        match s.parse::<u64>() {
            Ok(t) => c.transfer_timeout_ticks = t,
            Err(e) => tracing::warn!("ignoring MESHCHAT_TRANSFER_TIMEOUT_TICKS={:?}: {}", s, e),
        }
    }
}

/// Candidate config files, most specific first.
fn config_paths_in(home: Option<PathBuf>) -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/meshchat/config.toml"));
    }
    out.push(PathBuf::from("/etc/meshchat/config.toml"));
    out
}

/// First existing file wins; a file that fails to parse is skipped with a warning and does not
/// fall through to the next one.
fn load_file(paths: &[PathBuf]) -> Option<SessionConfig> {
    let p = paths.iter().find(|p| p.exists())?;
    match read_file(p) {
        Ok(c) => Some(c),
        Err(e) => {
            tracing::warn!("ignoring config: {:#}", e);
            None
        }
    }
}

/// Parse one config file.
pub fn read_file(path: &Path) -> anyhow::Result<SessionConfig> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    toml::from_str(&s).with_context(|| format!("parsing {}", path.display()))
}
