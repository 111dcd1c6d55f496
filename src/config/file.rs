//! TOML configuration file loading
//!
//! Supports `~/.config/magi/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct MagiConfigFile {
    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Wake word detection
    #[serde(default)]
    pub wake_word: WakeWordFileConfig,

    /// Calibration and phrase capture
    #[serde(default)]
    pub listen: ListenFileConfig,

    /// Speech-to-text
    #[serde(default)]
    pub stt: SttFileConfig,

    /// Text-to-speech
    #[serde(default)]
    pub tts: TtsFileConfig,

    /// Remote assistant
    #[serde(default)]
    pub assistant: AssistantFileConfig,

    /// Filesystem locations
    #[serde(default)]
    pub paths: PathsFileConfig,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub google: Option<String>,
    pub deepgram: Option<String>,
    pub openweathermap: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WakeWordFileConfig {
    /// Spoken wake phrase, for logs
    pub keyword: Option<String>,
    /// Trained keyword model file
    pub model_path: Option<String>,
    /// Detection score threshold
    pub threshold: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListenFileConfig {
    pub calibration_secs: Option<f32>,
    pub command_timeout_secs: Option<f32>,
    pub pause_threshold: Option<f32>,
    pub phrase_threshold: Option<f32>,
    pub non_speaking_duration: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// "whisper" or "deepgram"
    pub provider: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    /// "google" or "openai"
    pub provider: Option<String>,
    pub voice: Option<String>,
    pub model: Option<String>,
    pub language_code: Option<String>,
    pub pitch: Option<f32>,
    pub speaking_rate: Option<f32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AssistantFileConfig {
    pub name: Option<String>,
    pub model: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub max_run_secs: Option<u64>,
    pub code_interpreter: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PathsFileConfig {
    pub data_dir: Option<String>,
    pub sounds_dir: Option<String>,
    pub system_prompt: Option<String>,
}

/// Load the TOML config file from `MAGI_CONFIG` or the standard path
///
/// Returns `MagiConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> MagiConfigFile {
    let path = std::env::var("MAGI_CONFIG")
        .ok()
        .map(PathBuf::from)
        .or_else(config_file_path);

    match path {
        Some(path) if path.exists() => load_config_file_from(&path),
        _ => MagiConfigFile::default(),
    }
}

/// Load a specific config file, falling back to defaults on any error
pub fn load_config_file_from(path: &Path) -> MagiConfigFile {
    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                MagiConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            MagiConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/magi/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("magi").join("config.toml"))
}
