//! Text-to-speech (TTS) processing

use async_trait::async_trait;
use base64::Engine;

use crate::{Error, Result};

/// Turns text into playable audio bytes
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text`, returning encoded audio (WAV or MP3)
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// TTS provider backend
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TtsProvider {
    Google,
    OpenAI,
}

impl TtsProvider {
    /// Parse a provider name, defaulting to `OpenAI`
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("google") {
            Self::Google
        } else {
            Self::OpenAI
        }
    }
}

/// Voice parameters shared by both providers
#[derive(Debug, Clone)]
pub struct VoiceSettings {
    pub voice: String,
    pub language: String,
    pub pitch: f32,
    pub speaking_rate: f32,
}

/// Synthesizes speech from text over HTTP
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: String,
    voice: VoiceSettings,
    model: String,
    provider: TtsProvider,
}

impl TextToSpeech {
    /// Create a TTS instance using Google Cloud Text-to-Speech
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_google(api_key: String, voice: VoiceSettings) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("Google API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice,
            model: String::new(),
            provider: TtsProvider::Google,
        })
    }

    /// Create a TTS instance using `OpenAI`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_openai(api_key: String, voice: VoiceSettings, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice,
            model,
            provider: TtsProvider::OpenAI,
        })
    }

    /// Active backend
    #[must_use]
    pub const fn provider(&self) -> TtsProvider {
        self.provider
    }

    /// Synthesize using Google TTS, returning 16-bit PCM WAV
    async fn synthesize_google(&self, text: &str) -> Result<Vec<u8>> {
        let request = google_request(text, &self.voice);
        let url = format!(
            "https://texttospeech.googleapis.com/v1/text:synthesize?key={}",
            urlencoding::encode(&self.api_key)
        );

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("Google TTS error {status}: {body}")));
        }

        let body: serde_json::Value = response.json().await?;
        decode_google_audio(&body)
    }

    /// Synthesize using `OpenAI` TTS
    async fn synthesize_openai(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
            response_format: &'a str,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice.voice,
            speed: self.voice.speaking_rate,
            response_format: "wav",
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }
}

#[async_trait]
impl Synthesizer for TextToSpeech {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        tracing::debug!(chars = text.len(), provider = ?self.provider, "synthesizing speech");
        match self.provider {
            TtsProvider::Google => self.synthesize_google(text).await,
            TtsProvider::OpenAI => self.synthesize_openai(text).await,
        }
    }
}

fn google_request(text: &str, voice: &VoiceSettings) -> serde_json::Value {
    serde_json::json!({
        "input": { "text": text },
        "voice": {
            "languageCode": voice.language,
            "name": voice.voice,
        },
        "audioConfig": {
            "audioEncoding": "LINEAR16",
            "pitch": voice.pitch,
            "speakingRate": voice.speaking_rate,
        },
    })
}

fn decode_google_audio(body: &serde_json::Value) -> Result<Vec<u8>> {
    let content = body
        .get("audioContent")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| Error::Tts("Google TTS response missing audioContent".to_string()))?;

    base64::engine::general_purpose::STANDARD
        .decode(content)
        .map_err(|e| Error::Tts(format!("invalid audioContent: {e}")))
}
