//! Wake word detection
//!
//! A [`WakeWordDetector`] owns a microphone stream on its own thread. The
//! audio callback only converts samples to 16-bit PCM, cuts them into frames
//! of the classifier's block size and runs inference; a hit pushes a
//! [`WakeEvent`] into a bounded channel that the router drains.
//!
//! While the router captures a command or plays a reply the detector is
//! suspended, which closes its stream outright so the capture owns the
//! input device alone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, Stream, StreamConfig};
use tokio::sync::{mpsc, oneshot};

use super::clip::f32_to_i16;
use crate::{Error, Result};

/// Momentary "wake word heard" signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeEvent;

/// Streaming keyword classifier
///
/// Consumes fixed-size frames of 16-bit mono PCM and reports which keyword,
/// if any, ended in that frame.
pub trait KeywordClassifier: Send {
    /// Samples per frame the classifier expects
    fn frame_length(&self) -> usize;

    /// Sample rate the classifier expects
    fn sample_rate(&self) -> u32;

    /// Classify one frame; returns the keyword index or -1 for none
    ///
    /// # Errors
    ///
    /// Returns error if inference fails
    fn process(&mut self, frame: &[i16]) -> Result<i32>;
}

/// Assembles callback buffers into classifier frames and raises wake events
///
/// Allocates only in [`FrameProcessor::new`]; the push methods are safe to call
/// from a realtime audio callback.
pub struct FrameProcessor {
    classifier: Box<dyn KeywordClassifier>,
    frame: Vec<i16>,
    frame_length: usize,
    events: mpsc::Sender<WakeEvent>,
}

impl FrameProcessor {
    /// Wrap a classifier
    #[must_use]
    pub fn new(classifier: Box<dyn KeywordClassifier>, events: mpsc::Sender<WakeEvent>) -> Self {
        let frame_length = classifier.frame_length().max(1);
        Self {
            classifier,
            frame: Vec::with_capacity(frame_length),
            frame_length,
            events,
        }
    }

    /// Drop a partially assembled frame
    pub fn reset(&mut self) {
        self.frame.clear();
    }

    /// Feed floating-point samples, scaling them to the 16-bit range
    ///
    /// Returns the number of detections raised.
    pub fn push_f32(&mut self, samples: &[f32]) -> usize {
        let mut detections = 0;
        for &s in samples {
            self.frame.push(f32_to_i16(s));
            if self.frame.len() == self.frame_length && self.run_frame() {
                detections += 1;
            }
        }
        detections
    }

    /// Feed samples that are already 16-bit
    ///
    /// Returns the number of detections raised.
    pub fn push_i16(&mut self, samples: &[i16]) -> usize {
        let mut detections = 0;
        for &s in samples {
            self.frame.push(s);
            if self.frame.len() == self.frame_length && self.run_frame() {
                detections += 1;
            }
        }
        detections
    }

    fn run_frame(&mut self) -> bool {
        let result = self.classifier.process(&self.frame);
        self.frame.clear();

        match result {
            Ok(index) if index >= 0 => {
                // A full channel means a detection is already outstanding
                if let Err(mpsc::error::TrySendError::Full(_)) = self.events.try_send(WakeEvent) {
                    tracing::trace!("wake event already pending");
                }
                true
            }
            Ok(_) => false,
            Err(e) => {
                tracing::warn!(error = %e, "keyword classifier failed on frame");
                false
            }
        }
    }
}

/// Pause and resume control over a running wake word source
#[async_trait]
pub trait WakeControl: Send + Sync {
    /// Release the input device and stop raising events
    async fn suspend(&self);

    /// Reopen the input device after [`WakeControl::suspend`]
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be reopened
    async fn resume(&self) -> Result<()>;

    /// Close the device for good and release the classifier
    async fn shutdown(&mut self);
}

/// Requests handled by the detector thread
enum Control {
    Pause(oneshot::Sender<()>),
    Resume(oneshot::Sender<Result<()>>),
    Shutdown,
}

/// Listens on the default input device and raises [`WakeEvent`]s
pub struct WakeWordDetector {
    keyword: String,
    control: std::sync::mpsc::Sender<Control>,
    suspended: AtomicBool,
    thread: Option<JoinHandle<()>>,
}

impl WakeWordDetector {
    /// Open the microphone and start classifying
    ///
    /// # Arguments
    ///
    /// * `classifier` - Initialized keyword classifier; released on shutdown
    /// * `keyword` - Human-readable wake phrase, for logging
    /// * `events` - Bounded channel that receives detections
    ///
    /// # Errors
    ///
    /// Returns error if the input device cannot be opened at the classifier's format
    pub async fn start(
        classifier: Box<dyn KeywordClassifier>,
        keyword: impl Into<String>,
        events: mpsc::Sender<WakeEvent>,
    ) -> Result<Self> {
        let keyword = keyword.into();
        let sample_rate = classifier.sample_rate();
        let processor = Arc::new(Mutex::new(FrameProcessor::new(classifier, events)));
        let (control, control_rx) = std::sync::mpsc::channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let thread = std::thread::Builder::new()
            .name("magi-wake-word".to_string())
            .spawn(move || detector_thread(&processor, sample_rate, ready_tx, &control_rx))?;

        ready_rx
            .await
            .map_err(|_| Error::WakeWord("detector thread exited during startup".to_string()))??;

        tracing::info!(keyword = %keyword, "listening for wake word");

        Ok(Self {
            keyword,
            control,
            suspended: AtomicBool::new(false),
            thread: Some(thread),
        })
    }

    /// Whether the stream is currently closed by [`WakeControl::suspend`]
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    /// Configured wake phrase
    #[must_use]
    pub fn keyword(&self) -> &str {
        &self.keyword
    }
}

#[async_trait]
impl WakeControl for WakeWordDetector {
    async fn suspend(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.control.send(Control::Pause(ack_tx)).is_err() {
            return;
        }
        // The stream is gone once the thread acknowledges
        let _ = ack_rx.await;
        self.suspended.store(true, Ordering::SeqCst);
        tracing::debug!("wake word detector suspended");
    }

    async fn resume(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.control
            .send(Control::Resume(ack_tx))
            .map_err(|_| Error::WakeWord("detector thread not running".to_string()))?;
        ack_rx
            .await
            .map_err(|_| Error::WakeWord("detector thread exited".to_string()))??;

        self.suspended.store(false, Ordering::SeqCst);
        tracing::debug!("wake word detector resumed");
        Ok(())
    }

    async fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.control.send(Control::Shutdown);

        match tokio::task::spawn_blocking(move || thread.join()).await {
            Ok(Ok(())) => tracing::debug!("wake word detector stopped"),
            Ok(Err(_)) => tracing::error!("wake word thread panicked"),
            Err(e) => tracing::error!(error = %e, "failed to join wake word thread"),
        }
    }
}

/// Owns the stream: closes it on pause, rebuilds it on resume
fn detector_thread(
    processor: &Arc<Mutex<FrameProcessor>>,
    sample_rate: u32,
    ready: oneshot::Sender<Result<()>>,
    control: &std::sync::mpsc::Receiver<Control>,
) {
    let mut stream = match open_stream(Arc::clone(processor), sample_rate) {
        Ok(stream) => {
            let _ = ready.send(Ok(()));
            Some(stream)
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    // A closed channel means the detector handle was dropped
    while let Ok(command) = control.recv() {
        match command {
            Control::Pause(ack) => {
                if stream.take().is_some() {
                    tracing::debug!("wake word stream released");
                }
                let _ = ack.send(());
            }
            Control::Resume(ack) => {
                let result = if stream.is_some() {
                    Ok(())
                } else {
                    if let Ok(mut frames) = processor.lock() {
                        frames.reset();
                    }
                    open_stream(Arc::clone(processor), sample_rate).map(|s| stream = Some(s))
                };
                let _ = ack.send(result);
            }
            Control::Shutdown => break,
        }
    }

    drop(stream);
    tracing::debug!("wake word stream closed");
}

/// Build the input stream, matching the device's native sample format
fn open_stream(processor: Arc<Mutex<FrameProcessor>>, sample_rate: u32) -> Result<Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

    let range = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(sample_rate)
                && c.max_sample_rate() >= SampleRate(sample_rate)
        })
        .find(|c| matches!(c.sample_format(), SampleFormat::I16 | SampleFormat::F32))
        .ok_or_else(|| Error::Audio("no suitable audio config for wake word".to_string()))?;

    let format = range.sample_format();
    let config: StreamConfig = range.with_sample_rate(SampleRate(sample_rate)).config();

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        ?format,
        "wake word stream initialized"
    );

    let on_error = |err: cpal::StreamError| tracing::error!(error = %err, "wake word stream error");

    // The lock is only contended while the control thread resets a frame;
    // the callback skips that buffer rather than block
    let stream = if format == SampleFormat::I16 {
        device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                if let Ok(mut frames) = processor.try_lock() {
                    frames.push_i16(data);
                }
            },
            on_error,
            None,
        )
    } else {
        device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if let Ok(mut frames) = processor.try_lock() {
                    frames.push_f32(data);
                }
            },
            on_error,
            None,
        )
    }
    .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok(stream)
}

/// Check a transcript for the wake phrase and return what followed it
///
/// Matching ignores case and punctuation. `None` means the phrase was not
/// said; an empty string means nothing came after it.
#[must_use]
pub fn strip_wake_phrase(transcript: &str, phrase: &str) -> Option<String> {
    let normalize = |word: &str| {
        word.trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase()
    };

    let wanted: Vec<String> = phrase
        .split_whitespace()
        .map(normalize)
        .filter(|w| !w.is_empty())
        .collect();
    if wanted.is_empty() {
        return None;
    }

    let words: Vec<&str> = transcript.split_whitespace().collect();
    let heard: Vec<String> = words.iter().copied().map(normalize).collect();

    let start = heard
        .windows(wanted.len())
        .position(|window| window == wanted.as_slice())?;

    Some(words[start + wanted.len()..].join(" "))
}

#[cfg(feature = "rustpotter")]
pub use trained::RustpotterClassifier;

#[cfg(feature = "rustpotter")]
mod trained {
    use std::path::Path;

    use rustpotter::{Rustpotter, RustpotterConfig, SampleFormat};

    use super::KeywordClassifier;
    use crate::{Error, Result};

    /// Classifier backed by a trained rustpotter wake word model
    pub struct RustpotterClassifier {
        detector: Rustpotter,
        sample_rate: u32,
    }

    impl RustpotterClassifier {
        /// Load a `.rpw` model
        ///
        /// # Errors
        ///
        /// Returns error if the detector cannot be built or the model fails to load
        pub fn new(model_path: &Path, sample_rate: u32, threshold: f32) -> Result<Self> {
            let mut config = RustpotterConfig::default();
            config.fmt.sample_rate = sample_rate as usize;
            config.fmt.channels = 1;
            config.fmt.sample_format = SampleFormat::I16;
            config.detector.threshold = threshold;

            let mut detector = Rustpotter::new(&config)
                .map_err(|e| Error::WakeWord(format!("failed to create detector: {e}")))?;
            detector
                .add_wakeword_from_file("wake", &model_path.to_string_lossy())
                .map_err(|e| Error::WakeWord(format!("failed to load wake word model: {e}")))?;

            tracing::info!(model = %model_path.display(), "wake word model loaded");
            Ok(Self {
                detector,
                sample_rate,
            })
        }
    }

    impl KeywordClassifier for RustpotterClassifier {
        fn frame_length(&self) -> usize {
            self.detector.get_samples_per_frame()
        }

        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }

        fn process(&mut self, frame: &[i16]) -> Result<i32> {
            Ok(if self.detector.process_samples(frame.to_vec()).is_some() {
                0
            } else {
                -1
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fires on every Nth frame
    struct EveryNth {
        n: usize,
        seen: usize,
        frame_len: usize,
        last_frame: Vec<i16>,
    }

    impl KeywordClassifier for EveryNth {
        fn frame_length(&self) -> usize {
            self.frame_len
        }

        fn sample_rate(&self) -> u32 {
            16000
        }

        fn process(&mut self, frame: &[i16]) -> Result<i32> {
            assert_eq!(frame.len(), self.frame_len);
            self.last_frame = frame.to_vec();
            self.seen += 1;
            Ok(if self.seen % self.n == 0 { 0 } else { -1 })
        }
    }

    fn processor(n: usize, capacity: usize) -> (FrameProcessor, mpsc::Receiver<WakeEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        let classifier = EveryNth {
            n,
            seen: 0,
            frame_len: 4,
            last_frame: Vec::new(),
        };
        (FrameProcessor::new(Box::new(classifier), tx), rx)
    }

    #[test]
    fn test_frames_assembled_across_callbacks() {
        let (mut frames, mut rx) = processor(2, 1);

        // 3 + 5 samples = two full frames, second one fires
        assert_eq!(frames.push_f32(&[0.0; 3]), 0);
        assert_eq!(frames.push_f32(&[0.0; 5]), 1);
        assert_eq!(rx.try_recv().unwrap(), WakeEvent);
    }

    #[test]
    fn test_at_most_one_outstanding_event() {
        let (mut frames, mut rx) = processor(1, 1);

        assert_eq!(frames.push_i16(&[0; 12]), 3);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_detection_resumes_after_event_consumed() {
        let (mut frames, mut rx) = processor(1, 1);

        frames.push_i16(&[0; 4]);
        assert!(rx.try_recv().is_ok());
        frames.push_i16(&[0; 4]);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_reset_discards_partial_frame() {
        let (mut frames, mut rx) = processor(1, 1);

        // Three samples from before a pause must not join the next frame
        assert_eq!(frames.push_i16(&[0; 3]), 0);
        frames.reset();
        assert_eq!(frames.push_i16(&[0; 3]), 0);
        assert!(rx.try_recv().is_err());

        assert_eq!(frames.push_i16(&[0; 1]), 1);
    }

    #[test]
    fn test_wake_phrase_at_start() {
        assert_eq!(
            strip_wake_phrase("Hey Magi, what's the weather in Boston?", "hey magi").as_deref(),
            Some("what's the weather in Boston?")
        );
    }

    #[test]
    fn test_wake_phrase_alone() {
        assert_eq!(strip_wake_phrase("Hey, Magi.", "hey magi").as_deref(), Some(""));
    }

    #[test]
    fn test_wake_phrase_mid_sentence() {
        assert_eq!(
            strip_wake_phrase("okay hey magi stop", "Hey Magi").as_deref(),
            Some("stop")
        );
    }

    #[test]
    fn test_missing_wake_phrase() {
        assert_eq!(strip_wake_phrase("what's the weather", "hey magi"), None);
        assert_eq!(strip_wake_phrase("hey there magi", "hey magi"), None);
        assert_eq!(strip_wake_phrase("", "hey magi"), None);
        assert_eq!(strip_wake_phrase("hey magi", "  "), None);
    }
}
