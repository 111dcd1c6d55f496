//! Capture of a single spoken command

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};

use super::capture::FrameSource;
use super::clip::samples_to_wav;
use super::listen::{
    DEFAULT_ENERGY_THRESHOLD, EnergyCalibrator, ListenEvent, ListenSettings, PhraseDetector,
};
use super::recordings::RecordingStore;
use super::stt::Transcriber;
use crate::shutdown::ShutdownSignal;
use crate::{Error, Result};

/// Longest wait for the next audio buffer before the device is considered stalled
const STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// A transcribed utterance
#[derive(Debug, Clone)]
pub struct Utterance {
    pub audio: Vec<f32>,
    pub sample_rate: u32,
    pub transcript: String,
    pub captured_at: DateTime<Local>,
}

/// Result of one capture attempt
#[derive(Debug)]
pub enum CaptureOutcome {
    /// Speech was recorded and transcribed to non-empty text
    Heard(Utterance),
    /// Nothing was said before the timeout
    NoSpeech,
    /// Speech was recorded but no text came back
    Unintelligible,
    /// The device or transcription service failed
    Failed(Error),
}

impl CaptureOutcome {
    /// The utterance, if one was heard
    #[must_use]
    pub fn into_utterance(self) -> Option<Utterance> {
        match self {
            Self::Heard(u) => Some(u),
            _ => None,
        }
    }
}

/// Records one phrase after the wake word and transcribes it
pub struct SpeechCapture {
    source: Box<dyn FrameSource>,
    transcriber: Arc<dyn Transcriber>,
    recordings: Option<RecordingStore>,
    settings: ListenSettings,
    threshold: Option<f32>,
    shutdown: ShutdownSignal,
}

impl SpeechCapture {
    /// Create a capture over `source`
    #[must_use]
    pub fn new(
        source: Box<dyn FrameSource>,
        transcriber: Arc<dyn Transcriber>,
        settings: ListenSettings,
        shutdown: ShutdownSignal,
    ) -> Self {
        let settings = ListenSettings {
            sample_rate: source.sample_rate(),
            ..settings
        };
        Self {
            source,
            transcriber,
            recordings: None,
            settings,
            threshold: None,
            shutdown,
        }
    }

    /// Archive every transcribed utterance in `store`
    #[must_use]
    pub fn with_recordings(mut self, store: RecordingStore) -> Self {
        self.recordings = Some(store);
        self
    }

    /// Energy threshold in use, if calibrated
    #[must_use]
    pub const fn threshold(&self) -> Option<f32> {
        self.threshold
    }

    /// Measure ambient noise for `duration_secs` and set the speech threshold
    ///
    /// # Errors
    ///
    /// Returns error if the device fails or shutdown interrupts calibration
    pub async fn calibrate(&mut self, duration_secs: f32) -> Result<f32> {
        self.source.start().await?;
        let result = self.calibrate_inner(duration_secs).await;
        self.source.stop().await;

        let threshold = result?;
        tracing::info!(threshold, "ambient noise calibrated");
        self.threshold = Some(threshold);
        Ok(threshold)
    }

    async fn calibrate_inner(&mut self, duration_secs: f32) -> Result<f32> {
        let spb = self.settings.seconds_per_buffer();
        let mut calibrator = EnergyCalibrator::new(DEFAULT_ENERGY_THRESHOLD, spb);
        let mut chunker = Rechunker::new(self.settings.chunk_size);
        let mut elapsed = 0.0;

        while elapsed < duration_secs {
            if self.shutdown.is_triggered() {
                return Err(Error::Cancelled("calibration interrupted".to_string()));
            }
            let chunk = self.next_chunk().await?;
            for buffer in chunker.push(&chunk) {
                calibrator.observe(&buffer);
                elapsed += spb;
            }
        }

        Ok(calibrator.threshold())
    }

    /// Listen for one phrase, waiting up to `timeout_secs` for speech to begin
    pub async fn capture(&mut self, timeout_secs: f32) -> CaptureOutcome {
        if let Err(e) = self.source.start().await {
            return CaptureOutcome::Failed(e);
        }
        let recorded = self.record_phrase(timeout_secs).await;
        self.source.stop().await;

        let audio = match recorded {
            Ok(Some(audio)) => audio,
            Ok(None) => {
                tracing::info!("no speech before timeout");
                return CaptureOutcome::NoSpeech;
            }
            Err(e) => {
                tracing::error!(error = %e, "audio capture failed");
                return CaptureOutcome::Failed(e);
            }
        };

        let captured_at = Local::now();
        let wav = match samples_to_wav(&audio, self.settings.sample_rate) {
            Ok(wav) => wav,
            Err(e) => return CaptureOutcome::Failed(e),
        };

        let transcript = match self.transcriber.transcribe(&wav).await {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                tracing::error!(error = %e, "transcription failed");
                return CaptureOutcome::Failed(e);
            }
        };

        if transcript.is_empty() {
            tracing::info!("speech was not understood");
            return CaptureOutcome::Unintelligible;
        }

        tracing::info!(transcript = %transcript, "heard");
        let utterance = Utterance {
            audio,
            sample_rate: self.settings.sample_rate,
            transcript,
            captured_at,
        };

        if let Some(store) = &self.recordings
            && let Err(e) = store.save(&utterance)
        {
            tracing::warn!(error = %e, "failed to archive recording");
        }

        CaptureOutcome::Heard(utterance)
    }

    async fn record_phrase(&mut self, timeout_secs: f32) -> Result<Option<Vec<f32>>> {
        let threshold = self.threshold.unwrap_or(DEFAULT_ENERGY_THRESHOLD);
        let mut detector = PhraseDetector::new(&self.settings, threshold, Some(timeout_secs));
        let mut chunker = Rechunker::new(self.settings.chunk_size);

        loop {
            if self.shutdown.is_triggered() {
                return Err(Error::Cancelled("capture interrupted".to_string()));
            }
            let chunk = self.next_chunk().await?;
            for buffer in chunker.push(&chunk) {
                match detector.push(buffer) {
                    ListenEvent::Pending => {}
                    ListenEvent::Complete(samples) => return Ok(Some(samples)),
                    ListenEvent::TimedOut => return Ok(None),
                }
            }
        }
    }

    async fn next_chunk(&mut self) -> Result<Vec<f32>> {
        match tokio::time::timeout(STALL_TIMEOUT, self.source.next_chunk()).await {
            Ok(Some(chunk)) => Ok(chunk),
            Ok(None) => Err(Error::Audio("audio stream closed".to_string())),
            Err(_) => Err(Error::Timeout("no audio from input device".to_string())),
        }
    }
}

/// Regroups arbitrarily sized chunks into fixed-size buffers
struct Rechunker {
    size: usize,
    pending: Vec<f32>,
}

impl Rechunker {
    fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            pending: Vec::with_capacity(size),
        }
    }

    fn push(&mut self, chunk: &[f32]) -> Vec<Vec<f32>> {
        self.pending.extend_from_slice(chunk);
        let mut out = Vec::new();
        while self.pending.len() >= self.size {
            let rest = self.pending.split_off(self.size);
            out.push(std::mem::replace(&mut self.pending, rest));
        }
        out
    }
}
