//! Configuration handling

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::syntax::{DEFAULT_THEME, ResourceKey};
use crate::view::ViewMode;

/// Workers started when no pool size is configured never exceed this.
const MAX_DEFAULT_POOL: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchviewConfig {
    pub scheduler: SchedulerConfig,
    pub theme: ThemeSelection,
    pub default_view: ViewMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker threads; zero runs every request synchronously.
    pub pool_size: usize,
    /// Resources warmed on every worker at initialization.
    pub preload: Vec<ResourceKey>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            preload: Vec::new(),
        }
    }
}

/// One less than the available parallelism, capped.
#[must_use]
pub fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map_or(1, std::num::NonZeroUsize::get)
        .saturating_sub(1)
        .min(MAX_DEFAULT_POOL)
}

/// A single theme, or one per color scheme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThemeSelection {
    Single(String),
    Pair { dark: String, light: String },
}

impl Default for ThemeSelection {
    fn default() -> Self {
        Self::Single(DEFAULT_THEME.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorScheme {
    #[default]
    Dark,
    Light,
}

impl ThemeSelection {
    /// Theme name to use under `scheme`.
    #[must_use]
    pub fn resolve(&self, scheme: ColorScheme) -> &str {
        match (self, scheme) {
            (Self::Single(name), _) => name,
            (Self::Pair { dark, .. }, ColorScheme::Dark) => dark,
            (Self::Pair { light, .. }, ColorScheme::Light) => light,
        }
    }
}

impl PatchviewConfig {
    /// Parse a JSON config; absent fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid JSON for this schema.
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        serde_json::from_str(text).context("Failed to parse config")
    }
}

/// Load configuration from an explicit path.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &Path) -> anyhow::Result<PatchviewConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    let config = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse config: {}", path.display()))?;
    Ok(config)
}

/// Write configuration as pretty JSON, creating parent directories.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the file cannot be written.
pub fn save_config(path: &Path, config: &PatchviewConfig) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config dir: {}", parent.display()))?;
    }
    let contents = serde_json::to_string_pretty(config)?;
    std::fs::write(path, contents)
        .with_context(|| format!("Failed to write config: {}", path.display()))?;
    Ok(())
}
