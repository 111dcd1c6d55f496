//! Wake → capture → route → speak cycle
//!
//! ```text
//! Idle ──wake──▶ WakeDetected ──▶ Capturing ──┬─ none ─────────────▶ Idle
//!                                              ├─ local command ────▶ LocalCommand ─▶ Idle | ShuttingDown
//!                                              └─ text ─▶ RemoteQuery ─▶ Synthesizing ─▶ Playing ─▶ Idle
//! ```
//!
//! Commands are handled one at a time on the router task; the detector only
//! feeds the wake channel and stays suspended from the wake until the router
//! is idle again, so neither the command nor the reply can retrigger it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::assistant::{ConversationSession, Session};
use crate::shutdown::ShutdownSignal;
use crate::voice::{
    AudioSource, CaptureOutcome, PlaybackService, SpeechCapture, Synthesizer, WakeControl,
    WakeEvent, strip_wake_phrase,
};
use crate::{Error, Result};

/// Built-in voice commands that never reach the assistant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandAction {
    /// Halt current playback
    Stop,
    /// Drop the command
    Cancel,
    /// Exit the process
    Shutdown,
}

impl CommandAction {
    /// Match a transcript against the command table (trimmed, case-insensitive)
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_lowercase().as_str() {
            "stop" => Some(Self::Stop),
            "nevermind" | "never mind" | "cancel" => Some(Self::Cancel),
            "shutdown" | "shut down" => Some(Self::Shutdown),
            _ => None,
        }
    }
}

/// Feedback sounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cue {
    Wake,
    Heard,
    Request,
    Received,
    NoSpeech,
    Error,
    NoResult,
    Cancel,
    Shutdown,
}

impl Cue {
    pub const ALL: [Self; 9] = [
        Self::Wake,
        Self::Heard,
        Self::Request,
        Self::Received,
        Self::NoSpeech,
        Self::Error,
        Self::NoResult,
        Self::Cancel,
        Self::Shutdown,
    ];

    /// File name inside the sounds directory
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Wake => "Wake.wav",
            Self::Heard => "Heard.wav",
            Self::Request => "Request.wav",
            Self::Received => "Received.wav",
            Self::NoSpeech => "NoSpeech.wav",
            Self::Error => "Error.wav",
            Self::NoResult => "NoResult.wav",
            Self::Cancel => "Cancel.wav",
            Self::Shutdown => "Shutdown.wav",
        }
    }

    /// Feedback for a capture that produced no command
    #[must_use]
    pub const fn for_capture(outcome: &CaptureOutcome) -> Option<Self> {
        match outcome {
            CaptureOutcome::Heard(_) => None,
            CaptureOutcome::NoSpeech | CaptureOutcome::Unintelligible => Some(Self::NoSpeech),
            CaptureOutcome::Failed(_) => Some(Self::Error),
        }
    }
}

/// Where the router is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    Idle,
    WakeDetected,
    Capturing,
    LocalCommand,
    RemoteQuery,
    Synthesizing,
    Playing,
    ShuttingDown,
}

/// Pause after a failed listen in transcript mode before trying again
const LISTEN_RETRY: Duration = Duration::from_secs(1);

/// How the router learns that the wake phrase was spoken
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakeMode {
    /// A keyword classifier feeds the wake channel
    Detector,
    /// Every phrase is transcribed and checked for the wake phrase
    Transcript { phrase: String },
}

/// Router tunables
#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub sounds_dir: PathBuf,
    pub command_timeout_secs: f32,
    pub wake_mode: WakeMode,
}

/// Owns every component and runs the command cycle
pub struct CommandRouter {
    state: RouterState,
    events: mpsc::Receiver<WakeEvent>,
    detector: Option<Box<dyn WakeControl>>,
    capture: SpeechCapture,
    conversation: ConversationSession,
    session: Option<Session>,
    synthesizer: Arc<dyn Synthesizer>,
    playback: PlaybackService,
    settings: RouterSettings,
    shutdown: ShutdownSignal,
}

impl CommandRouter {
    #[must_use]
    pub fn new(
        events: mpsc::Receiver<WakeEvent>,
        capture: SpeechCapture,
        conversation: ConversationSession,
        synthesizer: Arc<dyn Synthesizer>,
        playback: PlaybackService,
        settings: RouterSettings,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            state: RouterState::Idle,
            events,
            detector: None,
            capture,
            conversation,
            session: None,
            synthesizer,
            playback,
            settings,
            shutdown,
        }
    }

    /// Hand the router the detector feeding its wake channel
    pub fn attach_detector(&mut self, detector: Box<dyn WakeControl>) {
        self.detector = Some(detector);
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> RouterState {
        self.state
    }

    /// Active remote session, if opened
    #[must_use]
    pub const fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Sweep leftovers from an earlier run, then open a fresh session
    ///
    /// # Errors
    ///
    /// Returns error if the session cannot be created
    pub async fn open_session(&mut self, system_prompt: &str) -> Result<()> {
        if let Err(e) = self.conversation.reconcile().await {
            tracing::warn!(error = %e, "failed to reconcile registries");
        }

        let session = self.conversation.create(system_prompt).await?;
        tracing::info!(
            thread_id = %session.thread_id,
            assistant_id = %session.assistant_id,
            "session opened"
        );
        self.session = Some(session);
        Ok(())
    }

    /// Measure ambient noise for the capture threshold
    ///
    /// # Errors
    ///
    /// Returns error if the microphone fails; an interrupted calibration is not an error
    pub async fn calibrate(&mut self, duration_secs: f32) -> Result<()> {
        tracing::info!(duration_secs, "calibrating for ambient noise");
        match self.capture.calibrate(duration_secs).await {
            Ok(_) | Err(Error::Cancelled(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Process wake events until shutdown, then release everything
    pub async fn run(&mut self) {
        tracing::info!(mode = ?self.settings.wake_mode, "entering main loop");

        loop {
            if self.shutdown.is_triggered() {
                break;
            }

            match self.settings.wake_mode.clone() {
                WakeMode::Detector => {
                    tokio::select! {
                        event = self.events.recv() => {
                            if event.is_none() {
                                tracing::warn!("wake channel closed");
                                break;
                            }
                        }
                        () = self.shutdown.wait() => break,
                    }
                    self.handle_wake().await;
                }
                WakeMode::Transcript { phrase } => self.listen_for_phrase(&phrase).await,
            }
        }

        tracing::info!("leaving main loop");
        self.shutdown().await;
    }

    /// Acknowledge a wake, capture one command and act on it
    pub async fn handle_wake(&mut self) {
        self.transition(RouterState::WakeDetected);
        tracing::info!("wake word detected, listening for command");
        self.suspend_detector().await;
        self.playback.play_and_wait(self.cue_path(Cue::Wake)).await;

        self.transition(RouterState::Capturing);
        let outcome = self.capture.capture(self.settings.command_timeout_secs).await;

        match Cue::for_capture(&outcome) {
            Some(_) if self.shutdown.is_triggered() => self.transition(RouterState::Idle),
            Some(cue) => {
                self.cue(cue);
                self.transition(RouterState::Idle);
            }
            None => {
                if let Some(utterance) = outcome.into_utterance() {
                    self.handle_transcript(&utterance.transcript).await;
                }
            }
        }

        self.resume_detector().await;
    }

    /// Capture one phrase and act on it only if it contains the wake phrase
    ///
    /// Words after the wake phrase are routed as the command. The wake phrase
    /// on its own is acknowledged and a separate command is captured.
    pub async fn listen_for_phrase(&mut self, phrase: &str) {
        let outcome = self.capture.capture(self.settings.command_timeout_secs).await;

        let utterance = match outcome {
            CaptureOutcome::Heard(utterance) => utterance,
            CaptureOutcome::Failed(_) => {
                tokio::select! {
                    () = tokio::time::sleep(LISTEN_RETRY) => {}
                    () = self.shutdown.wait() => {}
                }
                return;
            }
            CaptureOutcome::NoSpeech | CaptureOutcome::Unintelligible => return,
        };

        let Some(command) = strip_wake_phrase(&utterance.transcript, phrase) else {
            tracing::debug!(transcript = %utterance.transcript, "no wake phrase, ignoring");
            return;
        };

        if command.is_empty() {
            self.handle_wake().await;
            return;
        }

        self.transition(RouterState::WakeDetected);
        tracing::info!(command = %command, "wake phrase heard with command");
        self.playback.play_and_wait(self.cue_path(Cue::Wake)).await;
        self.handle_transcript(&command).await;
    }

    /// Route a transcript to a local command or the assistant
    pub async fn handle_transcript(&mut self, text: &str) {
        if let Some(action) = CommandAction::parse(text) {
            self.transition(RouterState::LocalCommand);
            self.run_local(action).await;
            if self.state != RouterState::ShuttingDown {
                self.transition(RouterState::Idle);
            }
            return;
        }

        self.transition(RouterState::RemoteQuery);
        let reply = self.query(text).await;

        match reply {
            Some(reply) if !reply.trim().is_empty() => self.speak(&reply).await,
            _ if self.shutdown.is_triggered() => {}
            _ => self.cue(Cue::NoResult),
        }
        if self.state != RouterState::ShuttingDown {
            self.transition(RouterState::Idle);
        }
    }

    async fn run_local(&mut self, action: CommandAction) {
        tracing::info!(?action, "local command");
        match action {
            CommandAction::Stop => {
                self.playback.stop_all();
                self.cue(Cue::Cancel);
            }
            CommandAction::Cancel => self.cue(Cue::Cancel),
            CommandAction::Shutdown => {
                self.playback.play_and_wait(self.cue_path(Cue::Shutdown)).await;
                self.transition(RouterState::ShuttingDown);
                self.shutdown.trigger();
            }
        }
    }

    async fn query(&self, text: &str) -> Option<String> {
        let Some(session) = self.session.as_ref() else {
            tracing::error!("no session open, dropping command");
            return None;
        };

        self.playback.play_and_wait(self.cue_path(Cue::Heard)).await;

        let pending = match self.conversation.start_run(session, text).await {
            Ok(pending) => pending,
            Err(e) => {
                tracing::error!(error = %e, "failed to start run");
                return None;
            }
        };
        self.playback.play(self.cue_path(Cue::Request));

        match self.conversation.wait_for_reply(session, pending).await {
            Ok(reply) => {
                self.playback.play(self.cue_path(Cue::Received));
                Some(reply)
            }
            Err(Error::Cancelled(reason)) => {
                tracing::info!(reason, "run abandoned");
                None
            }
            Err(e) => {
                tracing::error!(error = %e, "command processing failed");
                None
            }
        }
    }

    async fn speak(&mut self, reply: &str) {
        self.transition(RouterState::Synthesizing);
        let audio = match self.synthesizer.synthesize(reply).await {
            Ok(audio) => audio,
            Err(e) => {
                tracing::error!(error = %e, "speech synthesis failed");
                return;
            }
        };

        self.transition(RouterState::Playing);
        let playing = self.playback.play_and_wait(AudioSource::Encoded(audio));
        tokio::select! {
            () = playing => {}
            () = self.shutdown.wait() => {}
        }
    }

    async fn suspend_detector(&self) {
        if let Some(detector) = &self.detector {
            detector.suspend().await;
        }
    }

    /// Reopen the detector and discard anything it raised before the pause
    async fn resume_detector(&mut self) {
        if self.shutdown.is_triggered() {
            return;
        }
        if let Some(detector) = &self.detector
            && let Err(e) = detector.resume().await
        {
            tracing::error!(error = %e, "failed to resume wake word detector");
        }
        while self.events.try_recv().is_ok() {}
    }

    /// Stop the detector, delete the session, then drain playback
    pub async fn shutdown(&mut self) {
        self.transition(RouterState::ShuttingDown);

        if let Some(mut detector) = self.detector.take() {
            detector.shutdown().await;
        }
        if let Some(session) = self.session.take() {
            self.conversation.destroy(&session).await;
        }
        self.playback.shutdown().await;

        tracing::info!("shutdown complete");
    }

    fn cue(&self, cue: Cue) {
        self.playback.play(self.cue_path(cue));
    }

    fn cue_path(&self, cue: Cue) -> PathBuf {
        self.settings.sounds_dir.join(cue.file_name())
    }

    fn transition(&mut self, next: RouterState) {
        if self.state != next {
            tracing::debug!(from = ?self.state, to = ?next, "router state");
            self.state = next;
        }
    }
}
