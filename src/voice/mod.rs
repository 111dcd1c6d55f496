//! Voice processing module
//!
//! Handles wake word detection, command capture, transcription, synthesis
//! and serialized playback of cues and replies.

mod capture;
mod clip;
pub mod listen;
mod playback;
mod recordings;
mod speech;
mod stt;
mod tts;
mod wake_word;

pub use capture::{FrameSource, Microphone, SAMPLE_RATE};
pub use clip::{AudioClip, f32_to_i16, samples_to_wav};
pub use listen::ListenSettings;
pub use playback::{
    AudioSink, AudioSource, CpalSink, PlaybackRequest, PlaybackService, StopToken,
};
pub use recordings::RecordingStore;
pub use speech::{CaptureOutcome, SpeechCapture, Utterance};
pub use stt::{SpeechToText, SttProvider, Transcriber};
pub use tts::{Synthesizer, TextToSpeech, TtsProvider, VoiceSettings};
#[cfg(feature = "rustpotter")]
pub use wake_word::RustpotterClassifier;
pub use wake_word::{
    FrameProcessor, KeywordClassifier, WakeControl, WakeEvent, WakeWordDetector,
    strip_wake_phrase,
};
