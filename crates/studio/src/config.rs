use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{info, warn};

/// Highest temperature the settings panel allows.
pub const MAX_TEMPERATURE: f32 = 1.5;

#[derive(Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub preview: PreviewConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyFilter {
    /// Block nothing (BLOCK_NONE) -- least restrictive
    Off,
    /// Block only high-probability harmful content
    BlockHigh,
    /// Block medium and above
    BlockMedium,
    /// Block low and above -- most restrictive
    BlockLow,
}

impl SafetyFilter {
    /// Returns the Gemini API threshold string.
    pub fn as_api_str(self) -> &'static str {
        match self {
            Self::Off => "BLOCK_NONE",
            Self::BlockHigh => "BLOCK_ONLY_HIGH",
            Self::BlockMedium => "BLOCK_MEDIUM_AND_ABOVE",
            Self::BlockLow => "BLOCK_LOW_AND_ABOVE",
        }
    }
}

fn default_safety_filter() -> SafetyFilter { SafetyFilter::Off }

#[derive(Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default)]
    pub key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub thinking_mode: bool,
    #[serde(default = "default_thinking_budget")]
    pub thinking_budget: u32,
    #[serde(default = "default_safety_filter")]
    pub safety_filter: SafetyFilter,
    /// Declare the preview introspection tools to the model.
    #[serde(default = "default_preview_tools")]
    pub preview_tools: bool,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Deserialize, Clone)]
pub struct PreviewConfig {
    /// Inject the Tailwind CDN script into every preview document.
    #[serde(default = "default_tailwind")]
    pub tailwind: bool,
    /// Characters of markup returned by the HTML snapshot tool.
    #[serde(default = "default_snapshot_limit")]
    pub snapshot_limit: usize,
}

#[derive(Deserialize, Clone, Default)]
pub struct StorageConfig {
    /// Override the history directory. Default: "<data dir>/studio".
    pub directory: Option<String>,
}

#[derive(Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,
    /// Override log directory. Default: "logs/" under the storage directory.
    pub directory: Option<String>,
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_model() -> String { "gemini-3-pro-preview".into() }
fn default_system_prompt() -> String {
    "You are a senior web developer. When asked to build an app, provide the complete HTML code \
     including Tailwind CSS classes. Use the structure: <html><head><script \
     src='https://cdn.tailwindcss.com'></script></head><body>...</body></html>. \
     Only provide the code in a single block."
        .into()
}
fn default_temperature() -> f32 { 0.7 }
fn default_top_p() -> f32 { 0.95 }
fn default_top_k() -> u32 { 64 }
fn default_max_tokens() -> u32 { 8192 }
fn default_thinking_budget() -> u32 { 8192 }
fn default_preview_tools() -> bool { true }
fn default_base_url() -> String { "https://generativelanguage.googleapis.com/v1beta".into() }
fn default_timeout_secs() -> u64 { 120 }
fn default_tailwind() -> bool { true }
fn default_snapshot_limit() -> usize { 2000 }
fn default_logging_enabled() -> bool { true }
fn default_log_level() -> String { "info".into() }

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            key: String::new(),
            model: default_model(),
            system_prompt: default_system_prompt(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: default_top_k(),
            max_tokens: default_max_tokens(),
            thinking_mode: false,
            thinking_budget: default_thinking_budget(),
            safety_filter: default_safety_filter(),
            preview_tools: default_preview_tools(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            tailwind: default_tailwind(),
            snapshot_limit: default_snapshot_limit(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            directory: None,
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Read `config.toml` from `path`. A missing or unparsable file falls
    /// back to defaults; neither is fatal.
    pub fn load(path: &Path) -> Self {
        let (config, warning) = Self::load_with_warning(path);
        if let Some(warning) = warning {
            warn!("{warning}");
        }
        config
    }

    /// Like [`Config::load`], but hands a parse failure back to the caller
    /// instead of logging it, for hosts that load config before tracing.
    pub fn load_with_warning(path: &Path) -> (Self, Option<String>) {
        let (mut config, warning) = match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", path.display());
                    (config, None)
                }
                Err(e) => (
                    Config::default(),
                    Some(format!("Failed to parse {}: {e}", path.display())),
                ),
            },
            Err(_) => {
                info!("{} not found, using defaults", path.display());
                (Config::default(), None)
            }
        };
        config.api.apply_env_key();
        config.api.temperature = config.api.temperature.clamp(0.0, MAX_TEMPERATURE);
        (config, warning)
    }

    /// Where the session history file lives.
    pub fn storage_directory(&self) -> PathBuf {
        match self.storage.directory {
            Some(ref custom) => PathBuf::from(custom),
            None => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("studio"),
        }
    }

    pub fn log_directory(&self) -> PathBuf {
        match self.logging.directory {
            Some(ref custom) => PathBuf::from(custom),
            None => self.storage_directory().join("logs"),
        }
    }
}

impl ApiConfig {
    fn apply_env_key(&mut self) {
        if !self.key.is_empty() {
            return;
        }
        for var in ["GEMINI_API_KEY", "API_KEY"] {
            if let Ok(key) = std::env::var(var) {
                if !key.is_empty() {
                    self.key = key;
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_file() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.api.model, "gemini-3-pro-preview");
        assert_eq!(config.api.top_k, 64);
        assert!(!config.api.thinking_mode);
        assert!(config.api.preview_tools);
        assert_eq!(config.preview.snapshot_limit, 2000);
        assert_eq!(config.api.safety_filter, SafetyFilter::Off);
    }

    #[test]
    fn test_partial_sections() {
        let config: Config = toml::from_str(
            r#"
            [api]
            model = "gemini-3-flash-preview"
            thinking_mode = true
            safety_filter = "block_high"

            [storage]
            directory = "/tmp/studio-test"
            "#,
        )
        .unwrap();
        assert_eq!(config.api.model, "gemini-3-flash-preview");
        assert!(config.api.thinking_mode);
        assert_eq!(config.api.temperature, 0.7);
        assert_eq!(config.api.safety_filter.as_api_str(), "BLOCK_ONLY_HIGH");
        assert_eq!(config.storage_directory(), PathBuf::from("/tmp/studio-test"));
        assert_eq!(config.log_directory(), PathBuf::from("/tmp/studio-test/logs"));
    }

    #[test]
    fn test_load_missing_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("config.toml"));
        assert_eq!(config.api.model, default_model());
    }

    #[test]
    fn test_load_clamps_temperature() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[api]\ntemperature = 3.0\n").unwrap();
        assert_eq!(Config::load(&path).api.temperature, MAX_TEMPERATURE);
    }

    #[test]
    fn test_load_invalid_toml_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[api\nmodel = ").unwrap();
        assert_eq!(Config::load(&path).api.model, default_model());

        let (config, warning) = Config::load_with_warning(&path);
        assert_eq!(config.api.model, default_model());
        assert!(warning.unwrap().starts_with("Failed to parse"));
    }

    #[test]
    fn test_valid_file_has_no_warning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[api]\nmodel = \"gemini-3-flash-preview\"\n").unwrap();
        let (config, warning) = Config::load_with_warning(&path);
        assert_eq!(config.api.model, "gemini-3-flash-preview");
        assert!(warning.is_none());
        assert!(Config::load_with_warning(&dir.path().join("absent.toml")).1.is_none());
    }
}
