//! Magi - wake-word voice assistant
//!
//! This library provides the pieces of a hands-free assistant:
//! - Wake word detection on a dedicated audio thread
//! - Ambient noise calibration, phrase capture and transcription
//! - A remote assistant session with tool calls and crash cleanup
//! - Serialized playback of cues and synthesized replies
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  WakeEvent   ┌──────────────────────────────────────┐
//! │ WakeWord     │─────────────▶│            CommandRouter             │
//! │ Detector     │              │  capture ─▶ local | remote ─▶ speak  │
//! └──────────────┘              └──────┬──────────────┬─────────┬──────┘
//!                                      │              │         │
//!                        ┌─────────────▼──┐ ┌─────────▼───┐ ┌───▼─────────────┐
//!                        │ SpeechCapture  │ │Conversation │ │ PlaybackService │
//!                        │ mic + STT      │ │Session      │ │ single worker   │
//!                        └────────────────┘ └─────────────┘ └─────────────────┘
//! ```

pub mod assistant;
pub mod config;
pub mod error;
pub mod router;
pub mod shutdown;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use router::{CommandAction, CommandRouter, Cue, RouterSettings, RouterState, WakeMode};
pub use shutdown::ShutdownSignal;
