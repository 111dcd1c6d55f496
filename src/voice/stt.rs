//! Speech-to-text (STT) processing

use async_trait::async_trait;

use crate::{Error, Result};

/// Turns recorded speech into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe WAV audio
    ///
    /// An empty string means the service heard nothing it could understand.
    ///
    /// # Errors
    ///
    /// Returns error if the service cannot be reached or rejects the request
    async fn transcribe(&self, wav: &[u8]) -> Result<String>;
}

/// Response from OpenAI Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// STT provider backend
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SttProvider {
    Whisper,
    Deepgram,
}

impl SttProvider {
    /// Parse a provider name, defaulting to Whisper
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("deepgram") {
            Self::Deepgram
        } else {
            Self::Whisper
        }
    }
}

/// Transcribes speech to text over HTTP
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: String,
    model: String,
    provider: SttProvider,
}

impl SpeechToText {
    /// Create a new STT instance using `OpenAI` Whisper
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_whisper(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for Whisper".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            provider: SttProvider::Whisper,
        })
    }

    /// Create a new STT instance using Deepgram
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_deepgram(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("Deepgram API key required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            provider: SttProvider::Deepgram,
        })
    }

    /// Active backend
    #[must_use]
    pub const fn provider(&self) -> SttProvider {
        self.provider
    }

    /// Transcribe using OpenAI Whisper
    async fn transcribe_whisper(&self, audio: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await?;
        Ok(result.text)
    }

    /// Transcribe using Deepgram
    async fn transcribe_deepgram(&self, audio: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Deepgram transcription");

        let url = format!(
            "https://api.deepgram.com/v1/listen?model={}&punctuate=true",
            urlencoding::encode(&self.model)
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/wav")
            .body(audio.to_vec())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Stt(format!("Deepgram API error {status}: {body}")));
        }

        let result: DeepgramResponse = response.json().await?;
        Ok(result
            .results
            .channels
            .first()
            .and_then(|c| c.alternatives.first())
            .map(|a| a.transcript.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl Transcriber for SpeechToText {
    async fn transcribe(&self, wav: &[u8]) -> Result<String> {
        let transcript = match self.provider {
            SttProvider::Whisper => self.transcribe_whisper(wav).await,
            SttProvider::Deepgram => self.transcribe_deepgram(wav).await,
        }?;
        tracing::debug!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_is_config_error() {
        assert!(matches!(
            SpeechToText::new_whisper(String::new(), "whisper-1".to_string()),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            SpeechToText::new_deepgram(String::new(), "nova-2".to_string()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_provider_from_name() {
        assert_eq!(SttProvider::from_name("Deepgram"), SttProvider::Deepgram);
        assert_eq!(SttProvider::from_name("whisper"), SttProvider::Whisper);
        assert_eq!(SttProvider::from_name("anything"), SttProvider::Whisper);
    }
}
