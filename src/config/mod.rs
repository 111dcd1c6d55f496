//! Configuration for Magi
//!
//! Values resolve as environment variable, then `config.toml`, then built-in
//! default.

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::assistant::SessionSettings;
use crate::voice::{ListenSettings, SttProvider, TtsProvider, VoiceSettings};
use crate::{Error, Result};

use file::MagiConfigFile;

/// Prompt used when the system prompt file is missing
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are an AI assistant. Please help the user with their queries.";

/// Main configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub api_keys: ApiKeys,
    pub wake_word: WakeWordConfig,
    pub listen: ListenConfig,
    pub stt: SttConfig,
    pub tts: TtsConfig,
    pub assistant: AssistantConfig,

    /// Recordings and id registries live here
    pub data_dir: PathBuf,

    /// Directory of feedback cue WAV files
    pub sounds_dir: PathBuf,

    /// File holding the assistant's instructions
    pub system_prompt_path: PathBuf,
}

/// API keys for external services
#[derive(Clone, Default)]
pub struct ApiKeys {
    pub openai: Option<String>,
    pub google: Option<String>,
    pub deepgram: Option<String>,
    pub openweathermap: Option<String>,
}

impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |k: &Option<String>| k.as_ref().map(|_| "<set>");
        f.debug_struct("ApiKeys")
            .field("openai", &redact(&self.openai))
            .field("google", &redact(&self.google))
            .field("deepgram", &redact(&self.deepgram))
            .field("openweathermap", &redact(&self.openweathermap))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct WakeWordConfig {
    pub keyword: String,
    pub model_path: PathBuf,
    pub threshold: f32,
}

#[derive(Debug, Clone)]
pub struct ListenConfig {
    pub calibration_secs: f32,
    pub command_timeout_secs: f32,
    pub pause_threshold: f32,
    pub phrase_threshold: f32,
    pub non_speaking_duration: f32,
}

#[derive(Debug, Clone)]
pub struct SttConfig {
    pub provider: SttProvider,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub provider: TtsProvider,
    pub voice: String,
    pub model: String,
    pub language_code: String,
    pub pitch: f32,
    pub speaking_rate: f32,
}

#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub name: String,
    pub model: String,
    pub poll_interval: Duration,
    pub max_run: Duration,
    pub code_interpreter: bool,
}

impl Config {
    /// Load configuration from the environment and config file
    #[must_use]
    pub fn load() -> Self {
        let fc = file::load_config_file();
        Self::from_sources(fc, |key| std::env::var(key).ok())
    }

    /// Resolve configuration from a parsed file and an environment lookup
    #[must_use]
    #[allow(clippy::too_many_lines)]
    pub fn from_sources(fc: MagiConfigFile, env: impl Fn(&str) -> Option<String>) -> Self {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY").or(fc.api_keys.openai),
            google: env("GOOGLE_API_KEY").or(fc.api_keys.google),
            deepgram: env("DEEPGRAM_API_KEY").or(fc.api_keys.deepgram),
            openweathermap: env("OPENWEATHERMAP_API_KEY").or(fc.api_keys.openweathermap),
        };

        let wake_word = WakeWordConfig {
            keyword: env("MAGI_KEYWORD")
                .or(fc.wake_word.keyword)
                .unwrap_or_else(|| "Hey Magi".to_string()),
            model_path: env("MAGI_WAKE_MODEL")
                .or(fc.wake_word.model_path)
                .map_or_else(|| PathBuf::from("Magi-wake.rpw"), PathBuf::from),
            threshold: fc.wake_word.threshold.unwrap_or(0.5),
        };

        let listen = ListenConfig {
            calibration_secs: fc.listen.calibration_secs.unwrap_or(2.0),
            command_timeout_secs: parse_env(&env, "MAGI_COMMAND_TIMEOUT")
                .or(fc.listen.command_timeout_secs)
                .unwrap_or(10.0),
            pause_threshold: fc.listen.pause_threshold.unwrap_or(0.5),
            phrase_threshold: fc.listen.phrase_threshold.unwrap_or(0.3),
            non_speaking_duration: fc.listen.non_speaking_duration.unwrap_or(0.2),
        };

        let stt_provider = fc
            .stt
            .provider
            .as_deref()
            .map_or(SttProvider::Whisper, SttProvider::from_name);
        let stt = SttConfig {
            provider: stt_provider,
            model: env("MAGI_STT_MODEL")
                .or(fc.stt.model)
                .unwrap_or_else(|| match stt_provider {
                    SttProvider::Whisper => "whisper-1".to_string(),
                    SttProvider::Deepgram => "nova-2".to_string(),
                }),
        };

        let tts_provider = env("MAGI_TTS_PROVIDER")
            .or(fc.tts.provider)
            .map_or_else(
                || {
                    if api_keys.google.is_some() {
                        TtsProvider::Google
                    } else {
                        TtsProvider::OpenAI
                    }
                },
                |name| TtsProvider::from_name(&name),
            );
        let tts = TtsConfig {
            provider: tts_provider,
            voice: env("MAGI_TTS_VOICE")
                .or(fc.tts.voice)
                .unwrap_or_else(|| match tts_provider {
                    TtsProvider::Google => "en-US-Polyglot-1".to_string(),
                    TtsProvider::OpenAI => "alloy".to_string(),
                }),
            model: fc.tts.model.unwrap_or_else(|| "tts-1".to_string()),
            language_code: fc.tts.language_code.unwrap_or_else(|| "en-US".to_string()),
            pitch: fc.tts.pitch.unwrap_or(-5.0),
            speaking_rate: fc.tts.speaking_rate.unwrap_or(1.15),
        };

        let assistant = AssistantConfig {
            name: fc.assistant.name.unwrap_or_else(|| "Magi".to_string()),
            model: env("MAGI_MODEL")
                .or(fc.assistant.model)
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            poll_interval: Duration::from_millis(fc.assistant.poll_interval_ms.unwrap_or(1000)),
            max_run: Duration::from_secs(fc.assistant.max_run_secs.unwrap_or(120)),
            code_interpreter: fc.assistant.code_interpreter.unwrap_or(true),
        };

        // ~/.local/share/magi on Linux
        let data_dir = env("MAGI_DATA_DIR")
            .or(fc.paths.data_dir)
            .map_or_else(
                || {
                    directories::BaseDirs::new()
                        .map_or_else(|| PathBuf::from("."), |d| d.data_dir().join("magi"))
                },
                PathBuf::from,
            );

        let sounds_dir = env("MAGI_SOUNDS_DIR")
            .or(fc.paths.sounds_dir)
            .map_or_else(|| PathBuf::from("Sounds"), PathBuf::from);

        let system_prompt_path = env("MAGI_SYSTEM_PROMPT")
            .or(fc.paths.system_prompt)
            .map_or_else(|| PathBuf::from("system.txt"), PathBuf::from);

        Self {
            api_keys,
            wake_word,
            listen,
            stt,
            tts,
            assistant,
            data_dir,
            sounds_dir,
            system_prompt_path,
        }
    }

    /// Check everything needed before entering the main loop
    ///
    /// # Errors
    ///
    /// Returns error naming the first missing credential or file
    pub fn validate(&self) -> Result<()> {
        if self.api_keys.openai.is_none() {
            return Err(Error::Config("OPENAI_API_KEY is not set".to_string()));
        }
        if self.tts.provider == TtsProvider::Google && self.api_keys.google.is_none() {
            return Err(Error::Config(
                "GOOGLE_API_KEY is required for Google TTS".to_string(),
            ));
        }
        if self.stt.provider == SttProvider::Deepgram && self.api_keys.deepgram.is_none() {
            return Err(Error::Config(
                "DEEPGRAM_API_KEY is required for Deepgram STT".to_string(),
            ));
        }
        if self.api_keys.openweathermap.is_none() {
            tracing::warn!("OPENWEATHERMAP_API_KEY is not set, weather lookups will fail");
        }
        if cfg!(feature = "rustpotter") && !self.wake_word.model_path.exists() {
            return Err(Error::Config(format!(
                "wake word model not found: {}",
                self.wake_word.model_path.display()
            )));
        }
        Ok(())
    }

    /// Where captured utterances are archived
    #[must_use]
    pub fn recordings_dir(&self) -> PathBuf {
        self.data_dir.join("recordings")
    }

    /// Registry of live thread ids
    #[must_use]
    pub fn thread_registry_path(&self) -> PathBuf {
        self.data_dir.join("active.treg")
    }

    /// Registry of live assistant ids
    #[must_use]
    pub fn assistant_registry_path(&self) -> PathBuf {
        self.data_dir.join("active.areg")
    }

    /// Read the system prompt, falling back to the default
    #[must_use]
    pub fn system_prompt(&self) -> String {
        read_system_prompt(&self.system_prompt_path)
    }

    /// Phrase capture timing
    #[must_use]
    pub fn listen_settings(&self) -> ListenSettings {
        ListenSettings {
            pause_threshold: self.listen.pause_threshold,
            phrase_threshold: self.listen.phrase_threshold,
            non_speaking_duration: self.listen.non_speaking_duration,
            ..ListenSettings::default()
        }
    }

    /// Voice used for synthesis
    #[must_use]
    pub fn voice_settings(&self) -> VoiceSettings {
        VoiceSettings {
            voice: self.tts.voice.clone(),
            language: self.tts.language_code.clone(),
            pitch: self.tts.pitch,
            speaking_rate: self.tts.speaking_rate,
        }
    }

    /// Assistant registration and polling
    #[must_use]
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            name: self.assistant.name.clone(),
            model: self.assistant.model.clone(),
            code_interpreter: self.assistant.code_interpreter,
            poll_interval: self.assistant.poll_interval,
            max_run: self.assistant.max_run,
        }
    }
}

fn parse_env(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<f32> {
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring non-numeric value");
            None
        }
    }
}

fn read_system_prompt(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(prompt) if !prompt.trim().is_empty() => prompt,
        Ok(_) => {
            tracing::warn!(path = %path.display(), "system prompt file is empty, using default");
            DEFAULT_SYSTEM_PROMPT.to_string()
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "system prompt not found, using default");
            DEFAULT_SYSTEM_PROMPT.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn resolve(fc: MagiConfigFile, vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_sources(fc, |k| vars.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = resolve(MagiConfigFile::default(), &[]);

        assert_eq!(config.wake_word.keyword, "Hey Magi");
        assert_eq!(config.wake_word.model_path, PathBuf::from("Magi-wake.rpw"));
        assert!((config.listen.command_timeout_secs - 10.0).abs() < f32::EPSILON);
        assert!((config.listen.calibration_secs - 2.0).abs() < f32::EPSILON);
        assert_eq!(config.stt.provider, SttProvider::Whisper);
        assert_eq!(config.stt.model, "whisper-1");
        assert_eq!(config.tts.provider, TtsProvider::OpenAI);
        assert_eq!(config.tts.voice, "alloy");
        assert_eq!(config.assistant.model, "gpt-4o-mini");
        assert_eq!(config.assistant.poll_interval, Duration::from_secs(1));
        assert_eq!(config.assistant.max_run, Duration::from_secs(120));
        assert_eq!(config.sounds_dir, PathBuf::from("Sounds"));
    }

    #[test]
    fn test_google_key_selects_google_voice() {
        let config = resolve(MagiConfigFile::default(), &[("GOOGLE_API_KEY", "g-key")]);
        assert_eq!(config.tts.provider, TtsProvider::Google);
        assert_eq!(config.tts.voice, "en-US-Polyglot-1");
        assert!((config.tts.pitch + 5.0).abs() < f32::EPSILON);
        assert!((config.tts.speaking_rate - 1.15).abs() < f32::EPSILON);
    }

    #[test]
    fn test_env_overrides_file() {
        let fc: MagiConfigFile = toml::from_str(
            r#"
            [api_keys]
            openai = "sk-file"

            [assistant]
            model = "from-file"

            [listen]
            command_timeout_secs = 4.0
            "#,
        )
        .unwrap();

        let config = resolve(
            fc,
            &[
                ("OPENAI_API_KEY", "sk-env"),
                ("MAGI_COMMAND_TIMEOUT", "7"),
                ("MAGI_DATA_DIR", "/tmp/magi-test"),
            ],
        );

        assert_eq!(config.api_keys.openai.as_deref(), Some("sk-env"));
        assert_eq!(config.assistant.model, "from-file");
        assert!((config.listen.command_timeout_secs - 7.0).abs() < f32::EPSILON);
        assert_eq!(
            config.thread_registry_path(),
            PathBuf::from("/tmp/magi-test/active.treg")
        );
        assert_eq!(
            config.assistant_registry_path(),
            PathBuf::from("/tmp/magi-test/active.areg")
        );
        assert_eq!(
            config.recordings_dir(),
            PathBuf::from("/tmp/magi-test/recordings")
        );
    }

    #[test]
    fn test_empty_env_is_ignored() {
        let config = resolve(MagiConfigFile::default(), &[("OPENAI_API_KEY", "  ")]);
        assert!(config.api_keys.openai.is_none());
    }

    #[test]
    fn test_validate_requires_keys() {
        let config = resolve(MagiConfigFile::default(), &[]);
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = resolve(
            MagiConfigFile::default(),
            &[("OPENAI_API_KEY", "sk"), ("MAGI_TTS_PROVIDER", "google")],
        );
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    #[cfg(feature = "rustpotter")]
    fn test_missing_wake_model_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.rpw").to_string_lossy().into_owned();
        let config = resolve(
            MagiConfigFile::default(),
            &[("OPENAI_API_KEY", "sk"), ("MAGI_WAKE_MODEL", missing.as_str())],
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("wake word model not found"));

        let present = dir.path().join("Magi-wake.rpw");
        std::fs::write(&present, b"model").unwrap();
        let present = present.to_string_lossy().into_owned();
        let config = resolve(
            MagiConfigFile::default(),
            &[("OPENAI_API_KEY", "sk"), ("MAGI_WAKE_MODEL", present.as_str())],
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_system_prompt_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.txt");
        assert_eq!(read_system_prompt(&missing), DEFAULT_SYSTEM_PROMPT);

        let present = dir.path().join("system.txt");
        std::fs::write(&present, "Be brief.").unwrap();
        assert_eq!(read_system_prompt(&present), "Be brief.");
    }

    #[test]
    fn test_api_keys_debug_redacts() {
        let keys = ApiKeys {
            openai: Some("sk-secret".to_string()),
            ..ApiKeys::default()
        };
        let dbg = format!("{keys:?}");
        assert!(!dbg.contains("sk-secret"));
    }
}
