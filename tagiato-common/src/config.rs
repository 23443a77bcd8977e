//! Configuration loading and working-directory layout
//!
//! Resolution priority for every setting:
//! 1. Environment variable (highest priority)
//! 2. TOML config file (`<photos>/.tagiato/settings.toml`, then the user
//!    config dir `tagiato/config.toml`)
//! 3. Compiled default (fallback)
//!
//! A missing TOML file is not an error: defaults are used and a note is logged.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Name of the hidden working directory inside a photo directory
pub const WORK_DIR_NAME: &str = ".tagiato";

/// Upper bound for the batch worker pool
pub const MAX_WORKERS: usize = 16;

/// External AI backend kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Claude,
    Gemini,
    #[serde(rename = "openai")]
    OpenAi,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [ProviderKind::Claude, ProviderKind::Gemini, ProviderKind::OpenAi];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Claude => "claude",
            ProviderKind::Gemini => "gemini",
            ProviderKind::OpenAi => "openai",
        }
    }

    /// Model used when configuration names none
    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::Claude => "sonnet",
            ProviderKind::Gemini => "flash",
            ProviderKind::OpenAi => "o3",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" => Ok(ProviderKind::Claude),
            "gemini" => Ok(ProviderKind::Gemini),
            "openai" | "codex" => Ok(ProviderKind::OpenAi),
            other => Err(Error::Config(format!("Unknown AI provider: {}", other))),
        }
    }
}

/// Backend selection for one AI operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub provider: ProviderKind,
    /// Model name passed to the backend; provider default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Prompt template override; built-in template when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

impl ProviderSettings {
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            model: None,
            prompt: None,
        }
    }

    /// Effective model name
    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.provider.default_model())
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self::new(ProviderKind::Claude)
    }
}

/// Nearby-description context for describe prompts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSettings {
    pub enabled: bool,
    pub radius_km: f64,
    pub max_count: usize,
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            radius_km: 5.0,
            max_count: 5,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is not set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Enrichment pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichConfig {
    /// Maximum photo/waypoint time difference accepted by the matcher
    pub max_time_gap_minutes: u32,
    /// Batch worker pool size
    pub worker_count: usize,
    /// Rate limit for the external geocoding collaborator
    pub geocode_requests_per_second: u32,
    pub describe: ProviderSettings,
    pub locate: ProviderSettings,
    pub context: ContextSettings,
    pub logging: LoggingConfig,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            max_time_gap_minutes: 30,
            worker_count: 4,
            geocode_requests_per_second: 1,
            describe: ProviderSettings::default(),
            locate: ProviderSettings::default(),
            context: ContextSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EnrichConfig {
    /// Parse TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EnrichConfig = toml::from_str(content)?;
        config.validated()
    }

    /// Apply `TAGIATO_*` environment overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(value) = env_value("TAGIATO_DESCRIBE_PROVIDER") {
            self.describe.provider = value.parse()?;
        }
        if let Some(value) = env_value("TAGIATO_DESCRIBE_MODEL") {
            self.describe.model = Some(value);
        }
        if let Some(value) = env_value("TAGIATO_LOCATE_PROVIDER") {
            self.locate.provider = value.parse()?;
        }
        if let Some(value) = env_value("TAGIATO_LOCATE_MODEL") {
            self.locate.model = Some(value);
        }
        if let Some(value) = env_value("TAGIATO_WORKERS") {
            self.worker_count = value
                .parse()
                .map_err(|_| Error::Config(format!("TAGIATO_WORKERS is not a number: {}", value)))?;
        }
        if let Some(value) = env_value("TAGIATO_MAX_TIME_GAP") {
            self.max_time_gap_minutes = value.parse().map_err(|_| {
                Error::Config(format!("TAGIATO_MAX_TIME_GAP is not a number: {}", value))
            })?;
        }
        if let Some(value) = env_value("TAGIATO_LOG_LEVEL") {
            self.logging.level = value;
        }
        Ok(())
    }

    /// Clamp ranges and reject values the pipeline cannot run with
    pub fn validated(mut self) -> Result<Self> {
        if self.worker_count == 0 {
            tracing::warn!("worker_count 0 is invalid, using 1");
            self.worker_count = 1;
        }
        if self.worker_count > MAX_WORKERS {
            tracing::warn!(
                requested = self.worker_count,
                max = MAX_WORKERS,
                "worker_count clamped"
            );
            self.worker_count = MAX_WORKERS;
        }
        if self.geocode_requests_per_second == 0 {
            return Err(Error::Config(
                "geocode_requests_per_second must be at least 1".to_string(),
            ));
        }
        if !(self.context.radius_km.is_finite() && self.context.radius_km >= 0.0) {
            return Err(Error::Config(format!(
                "context.radius_km must be a non-negative number, got {}",
                self.context.radius_km
            )));
        }
        Ok(self)
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Fixed on-disk layout under `<photos_dir>/.tagiato/`
#[derive(Debug, Clone)]
pub struct WorkDir {
    photos_dir: PathBuf,
}

impl WorkDir {
    pub fn new(photos_dir: impl Into<PathBuf>) -> Self {
        Self {
            photos_dir: photos_dir.into(),
        }
    }

    pub fn photos_dir(&self) -> &Path {
        &self.photos_dir
    }

    pub fn root(&self) -> PathBuf {
        self.photos_dir.join(WORK_DIR_NAME)
    }

    pub fn state_file(&self) -> PathBuf {
        self.root().join("state.json")
    }

    pub fn geocode_cache_file(&self) -> PathBuf {
        self.root().join("geocode_cache.json")
    }

    pub fn thumbnails_dir(&self) -> PathBuf {
        self.root().join("thumbnails")
    }

    pub fn settings_file(&self) -> PathBuf {
        self.root().join("settings.toml")
    }

    pub fn descriptions_file(&self) -> PathBuf {
        self.photos_dir.join("descriptions.md")
    }

    /// Create the working and thumbnail directories if missing
    pub async fn ensure_dirs(&self) -> Result<()> {
        tokio::fs::create_dir_all(self.thumbnails_dir()).await?;
        Ok(())
    }
}

/// Resolves [`EnrichConfig`] for one photo directory
pub struct ConfigResolver {
    work_dir: WorkDir,
    user_config: Option<PathBuf>,
}

impl ConfigResolver {
    pub fn new(work_dir: WorkDir) -> Self {
        Self {
            work_dir,
            user_config: dirs::config_dir().map(|d| d.join("tagiato").join("config.toml")),
        }
    }

    /// Override the user-level config file location
    pub fn with_user_config(mut self, path: Option<PathBuf>) -> Self {
        self.user_config = path;
        self
    }

    /// First existing TOML file in priority order
    fn toml_source(&self) -> Option<PathBuf> {
        std::iter::once(self.work_dir.settings_file())
            .chain(self.user_config.clone())
            .find(|p| p.exists())
    }

    /// Resolve configuration: ENV → TOML → defaults
    pub fn resolve(&self) -> Result<EnrichConfig> {
        let mut config = match self.toml_source() {
            Some(path) => {
                let content = std::fs::read_to_string(&path)?;
                let config = EnrichConfig::from_toml_str(&content).map_err(|e| {
                    Error::Config(format!("Invalid config file {}: {}", path.display(), e))
                })?;
                tracing::info!(config_file = %path.display(), "Configuration loaded from TOML");
                config
            }
            None => {
                tracing::info!("No config file found, using compiled defaults");
                EnrichConfig::default()
            }
        };

        config.apply_env_overrides()?;
        config.validated()
    }
}

/// Write a config file with the atomic persistence discipline
pub async fn write_config(config: &EnrichConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;
    crate::persist::write_atomic(path, content.as_bytes()).await
}
