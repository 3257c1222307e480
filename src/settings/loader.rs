//! Reading `settings.toml`.
//!
//! String values written as `$VAR` or `${VAR}` are replaced by the variable's
//! value at load time. On first run the embedded template is written out so
//! users have a commented file to edit.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::schema::EngramSettings;

const TEMPLATE: &str = include_str!("template.toml");

/// `~/.engram/settings.toml`, or `./.engram/settings.toml` without a home.
pub fn settings_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".engram")
        .join("settings.toml")
}

/// Locates, seeds and loads the settings file.
pub struct SettingsManager {
    path: PathBuf,
}

impl SettingsManager {
    /// Manager for the global settings file.
    pub fn new() -> Self {
        Self::with_path(settings_path())
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the template if no settings file exists yet.
    ///
    /// Returns `true` if the file was created.
    pub async fn ensure_settings_file(&self) -> Result<bool> {
        if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(false);
        }
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        tokio::fs::write(&self.path, TEMPLATE)
            .await
            .with_context(|| format!("Failed to write settings template to {:?}", self.path))?;
        tracing::info!("Generated settings template at {:?}", self.path);
        Ok(true)
    }

    /// Parse the file with environment references resolved. A missing file
    /// yields the defaults.
    pub async fn load(&self) -> Result<EngramSettings> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No settings at {:?}, using defaults", self.path);
                return Ok(EngramSettings::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {:?}", self.path));
            }
        };

        let mut settings: EngramSettings = toml::from_str(&contents)
            .with_context(|| format!("Invalid settings in {:?}", self.path))?;
        interpolate_env(&mut settings);
        tracing::debug!("Loaded settings from {:?}", self.path);
        Ok(settings)
    }
}

impl Default for SettingsManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Replace `$VAR` references in the fields that commonly hold secrets or
/// machine-specific paths. Unset variables leave the reference as written.
fn interpolate_env(settings: &mut EngramSettings) {
    let required = [&mut settings.llm.base_url, &mut settings.llm.model];
    for value in required {
        if let Some(resolved) = resolve_env_ref(value) {
            *value = resolved;
        }
    }

    let optional = [
        &mut settings.llm.api_key,
        &mut settings.memory.storage_dir,
        &mut settings.memory.embedding_cache_dir,
    ];
    for value in optional.into_iter().flatten() {
        if let Some(resolved) = resolve_env_ref(value) {
            *value = resolved;
        }
    }
}

/// Value of the variable named by `$VAR` or `${VAR}`, if set.
fn resolve_env_ref(value: &str) -> Option<String> {
    let reference = value.trim().strip_prefix('$')?;
    let name = reference
        .strip_prefix('{')
        .and_then(|r| r.strip_suffix('}'))
        .unwrap_or(reference);
    std::env::var(name).ok()
}

/// First non-empty of: the setting, the listed environment variables, `default`.
pub fn get_with_env_fallback(
    setting: &Option<String>,
    env_vars: &[&str],
    default: Option<String>,
) -> Option<String> {
    setting
        .as_ref()
        .filter(|v| !v.is_empty())
        .cloned()
        .or_else(|| {
            env_vars
                .iter()
                .filter_map(|name| std::env::var(name).ok())
                .find(|v| !v.is_empty())
        })
        .or(default)
}
