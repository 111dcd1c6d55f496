//! Speech/silence segmentation
//!
//! Pure, clock-free logic behind [`super::SpeechCapture`]: ambient-noise
//! calibration and the phrase detector that decides where an utterance starts
//! and ends. Time is measured in buffers, so the same audio always produces
//! the same result.

use std::collections::VecDeque;

/// Starting energy threshold before any calibration (16-bit RMS units)
pub const DEFAULT_ENERGY_THRESHOLD: f32 = 300.0;

/// Per-second damping applied when adapting the threshold
const DYNAMIC_DAMPING: f32 = 0.15;

/// Ambient energy is multiplied by this to get the speech threshold
const DYNAMIC_RATIO: f32 = 1.5;

/// Timing parameters for phrase detection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ListenSettings {
    /// Seconds of silence that end a phrase
    pub pause_threshold: f32,
    /// Minimum seconds of speech for a phrase to count
    pub phrase_threshold: f32,
    /// Seconds of silence kept on either side of a phrase
    pub non_speaking_duration: f32,
    /// Upper bound on a single phrase, in seconds
    pub max_phrase_secs: f32,
    /// Samples per analysis buffer
    pub chunk_size: usize,
    /// Sample rate of the analysed audio
    pub sample_rate: u32,
}

impl Default for ListenSettings {
    fn default() -> Self {
        Self {
            pause_threshold: 0.5,
            phrase_threshold: 0.3,
            non_speaking_duration: 0.2,
            max_phrase_secs: 30.0,
            chunk_size: 1024,
            sample_rate: super::SAMPLE_RATE,
        }
    }
}

impl ListenSettings {
    /// Duration of one analysis buffer
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn seconds_per_buffer(&self) -> f32 {
        self.chunk_size as f32 / self.sample_rate.max(1) as f32
    }

    /// Whole buffers needed to cover `secs`
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn buffers_for(&self, secs: f32) -> usize {
        (secs / self.seconds_per_buffer()).ceil().max(0.0) as usize
    }
}

/// RMS of f32 samples expressed on the 16-bit scale
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples
        .iter()
        .map(|s| {
            let v = s * 32768.0;
            v * v
        })
        .sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Adapts an energy threshold towards the ambient noise floor
#[derive(Debug, Clone)]
pub struct EnergyCalibrator {
    threshold: f32,
    seconds_per_buffer: f32,
}

impl EnergyCalibrator {
    /// Start from `initial` with buffers of the given duration
    #[must_use]
    pub const fn new(initial: f32, seconds_per_buffer: f32) -> Self {
        Self {
            threshold: initial,
            seconds_per_buffer,
        }
    }

    /// Fold one buffer of ambient audio into the threshold
    pub fn observe(&mut self, buffer: &[f32]) {
        let damping = DYNAMIC_DAMPING.powf(self.seconds_per_buffer);
        let target = rms_energy(buffer) * DYNAMIC_RATIO;
        self.threshold = self.threshold.mul_add(damping, target * (1.0 - damping));
    }

    /// Current threshold
    #[must_use]
    pub const fn threshold(&self) -> f32 {
        self.threshold
    }
}

/// Outcome of feeding one buffer to a [`PhraseDetector`]
#[derive(Debug, Clone, PartialEq)]
pub enum ListenEvent {
    /// Need more audio
    Pending,
    /// A phrase ended; carries its samples including retained silence
    Complete(Vec<f32>),
    /// No speech started before the timeout
    TimedOut,
}

#[derive(Debug)]
enum Phase {
    Waiting,
    Phrase {
        pause_count: usize,
        phrase_count: usize,
        started_at: f32,
    },
}

/// Buffer-driven phrase endpointing
///
/// Before speech it keeps a short ring of leading silence; once a buffer
/// crosses the threshold it records until enough consecutive quiet buffers
/// pass. Phrases shorter than the phrase threshold are discarded and waiting
/// resumes, with the timeout clock still running.
#[derive(Debug)]
pub struct PhraseDetector {
    threshold: f32,
    timeout_secs: Option<f32>,
    seconds_per_buffer: f32,
    pause_buffers: usize,
    phrase_buffers: usize,
    non_speaking_buffers: usize,
    max_phrase_secs: f32,
    elapsed: f32,
    frames: VecDeque<Vec<f32>>,
    phase: Phase,
}

impl PhraseDetector {
    /// Create a detector for one capture
    #[must_use]
    pub fn new(settings: &ListenSettings, threshold: f32, timeout_secs: Option<f32>) -> Self {
        Self {
            threshold,
            timeout_secs,
            seconds_per_buffer: settings.seconds_per_buffer(),
            pause_buffers: settings.buffers_for(settings.pause_threshold),
            phrase_buffers: settings.buffers_for(settings.phrase_threshold),
            non_speaking_buffers: settings.buffers_for(settings.non_speaking_duration),
            max_phrase_secs: settings.max_phrase_secs,
            elapsed: 0.0,
            frames: VecDeque::new(),
            phase: Phase::Waiting,
        }
    }

    /// Seconds of audio consumed so far
    #[must_use]
    pub const fn elapsed(&self) -> f32 {
        self.elapsed
    }

    /// Feed the next analysis buffer
    pub fn push(&mut self, buffer: Vec<f32>) -> ListenEvent {
        self.elapsed += self.seconds_per_buffer;
        let is_speech = rms_energy(&buffer) > self.threshold;

        match &mut self.phase {
            Phase::Waiting => {
                if self.timeout_secs.is_some_and(|t| self.elapsed > t) {
                    return ListenEvent::TimedOut;
                }

                self.frames.push_back(buffer);
                if self.frames.len() > self.non_speaking_buffers {
                    self.frames.pop_front();
                }

                if is_speech {
                    self.phase = Phase::Phrase {
                        pause_count: 0,
                        phrase_count: 0,
                        started_at: self.elapsed,
                    };
                }
                ListenEvent::Pending
            }
            Phase::Phrase {
                pause_count,
                phrase_count,
                started_at,
            } => {
                self.frames.push_back(buffer);
                *phrase_count += 1;

                if is_speech {
                    *pause_count = 0;
                } else {
                    *pause_count += 1;
                }

                let too_long = self.elapsed - *started_at > self.max_phrase_secs;
                if *pause_count <= self.pause_buffers && !too_long {
                    return ListenEvent::Pending;
                }

                let voiced = *phrase_count - *pause_count;
                let pauses = *pause_count;
                if voiced < self.phrase_buffers && !too_long {
                    // Too short to be speech; keep listening
                    tracing::trace!(voiced, "discarding short phrase");
                    self.frames.clear();
                    self.phase = Phase::Waiting;
                    return ListenEvent::Pending;
                }

                // Trim trailing silence down to the retained amount
                for _ in 0..pauses.saturating_sub(self.non_speaking_buffers) {
                    self.frames.pop_back();
                }

                let samples = self.frames.drain(..).flatten().collect();
                self.phase = Phase::Waiting;
                ListenEvent::Complete(samples)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ListenSettings {
        // 0.125s buffers
        ListenSettings {
            chunk_size: 2000,
            sample_rate: 16000,
            ..ListenSettings::default()
        }
    }

    fn loud() -> Vec<f32> {
        vec![0.2; 2000]
    }

    fn quiet() -> Vec<f32> {
        vec![0.0; 2000]
    }

    #[test]
    fn test_rms_energy_scale() {
        assert!(rms_energy(&[]).abs() < f32::EPSILON);
        let e = rms_energy(&[0.5; 10]);
        assert!((e - 16384.0).abs() < 1.0);
    }

    #[test]
    fn test_calibration_tracks_ambient_noise() {
        let mut cal = EnergyCalibrator::new(DEFAULT_ENERGY_THRESHOLD, 0.1);
        // ambient ~ 0.05 -> 1638 rms -> target ~2457
        for _ in 0..50 {
            cal.observe(&[0.05; 1600]);
        }
        let t = cal.threshold();
        assert!(t > 2300.0 && t < 2500.0, "threshold {t}");
    }

    #[test]
    fn test_calibration_in_silence_decays() {
        let mut cal = EnergyCalibrator::new(DEFAULT_ENERGY_THRESHOLD, 0.1);
        for _ in 0..20 {
            cal.observe(&quiet());
        }
        assert!(cal.threshold() < DEFAULT_ENERGY_THRESHOLD);
    }

    #[test]
    fn test_timeout_without_speech() {
        let mut det = PhraseDetector::new(&settings(), DEFAULT_ENERGY_THRESHOLD, Some(1.0));
        let mut events = Vec::new();
        for _ in 0..20 {
            let ev = det.push(quiet());
            let done = ev == ListenEvent::TimedOut;
            events.push(ev);
            if done {
                break;
            }
        }
        assert_eq!(events.last(), Some(&ListenEvent::TimedOut));
        // timeout once more than 1.0s has elapsed
        assert_eq!(events.len(), 9);
    }

    #[test]
    fn test_phrase_completes_after_pause() {
        let mut det = PhraseDetector::new(&settings(), DEFAULT_ENERGY_THRESHOLD, Some(5.0));

        assert_eq!(det.push(quiet()), ListenEvent::Pending);
        assert_eq!(det.push(quiet()), ListenEvent::Pending);
        for _ in 0..6 {
            assert_eq!(det.push(loud()), ListenEvent::Pending);
        }

        let mut result = None;
        for _ in 0..10 {
            if let ListenEvent::Complete(samples) = det.push(quiet()) {
                result = Some(samples);
                break;
            }
        }

        let samples = result.expect("phrase should complete");
        // 1 leading quiet + 6 loud + 2 retained trailing quiet
        assert_eq!(samples.len(), 9 * 2000);
    }

    #[test]
    fn test_short_blip_is_discarded() {
        let mut det = PhraseDetector::new(&settings(), DEFAULT_ENERGY_THRESHOLD, Some(3.0));

        // a single loud buffer is below the 0.3s phrase threshold
        assert_eq!(det.push(loud()), ListenEvent::Pending);
        let mut last = ListenEvent::Pending;
        for _ in 0..40 {
            last = det.push(quiet());
            if last != ListenEvent::Pending {
                break;
            }
        }
        assert_eq!(last, ListenEvent::TimedOut);
    }

    #[test]
    fn test_no_timeout_while_speaking() {
        let mut det = PhraseDetector::new(&settings(), DEFAULT_ENERGY_THRESHOLD, Some(0.5));
        for _ in 0..20 {
            assert_eq!(det.push(loud()), ListenEvent::Pending);
        }
        assert!(det.elapsed() > 0.5);
    }
}
