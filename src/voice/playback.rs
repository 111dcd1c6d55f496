//! Serialized audio playback
//!
//! [`PlaybackService`] owns a single worker thread that drains a FIFO of
//! [`PlaybackRequest`]s and plays each one to completion on an [`AudioSink`],
//! so two sources never play at once.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig};
use tokio::sync::{mpsc, oneshot};

use super::clip::AudioClip;
use crate::{Error, Result};

/// Poll interval while waiting for the device to drain a clip
const DRAIN_POLL: Duration = Duration::from_millis(20);

/// Extra wait past the nominal clip length before giving up on the device
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Where a playback request gets its audio from
#[derive(Debug, Clone)]
pub enum AudioSource {
    /// WAV or MP3 file on disk
    File(PathBuf),
    /// Encoded WAV or MP3 bytes
    Encoded(Vec<u8>),
    /// Already-decoded PCM
    Clip(AudioClip),
}

impl AudioSource {
    /// Decode into PCM
    ///
    /// # Errors
    ///
    /// Returns error if the source cannot be read or decoded
    pub fn load(self) -> Result<AudioClip> {
        match self {
            Self::File(path) => AudioClip::from_file(&path),
            Self::Encoded(bytes) => AudioClip::decode(&bytes),
            Self::Clip(clip) => Ok(clip),
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Encoded(bytes) => format!("<{} encoded bytes>", bytes.len()),
            Self::Clip(clip) => format!("<{} samples>", clip.samples.len()),
        }
    }
}

impl From<PathBuf> for AudioSource {
    fn from(path: PathBuf) -> Self {
        Self::File(path)
    }
}

/// A single item in the playback queue
#[derive(Debug, Clone)]
pub struct PlaybackRequest {
    /// Audio to play
    pub source: AudioSource,
    /// Whether the caller waits for playback to finish
    pub blocking: bool,
}

impl PlaybackRequest {
    /// Fire-and-forget request
    #[must_use]
    pub fn background(source: impl Into<AudioSource>) -> Self {
        Self {
            source: source.into(),
            blocking: false,
        }
    }

    /// Request the caller waits on
    #[must_use]
    pub fn blocking(source: impl Into<AudioSource>) -> Self {
        Self {
            source: source.into(),
            blocking: true,
        }
    }
}

/// An output device that plays one clip at a time
pub trait AudioSink: Send + Sync {
    /// Play a clip, returning once it has finished or been stopped
    ///
    /// # Errors
    ///
    /// Returns error if the device is unavailable or rejects the stream
    fn play(&self, clip: &AudioClip, stop: &StopToken) -> Result<()>;
}

/// Halt flag for a single clip
///
/// Each clip taken off the queue gets a fresh token, so a stop only ever
/// reaches the clip it was aimed at and never leaks into the next one.
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    /// Create an untripped token
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the clip holding this token to halt
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether a stop has been requested
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Hands out tokens to the worker and trips the one in use
#[derive(Debug, Default)]
struct StopSwitch {
    current: Mutex<StopToken>,
}

impl StopSwitch {
    /// Install a fresh token for the clip about to be loaded
    fn arm(&self) -> StopToken {
        let token = StopToken::new();
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = token.clone();
        token
    }

    /// Stop the clip holding the most recently armed token
    fn trip(&self) {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stop();
    }
}

enum Job {
    Play {
        source: AudioSource,
        done: Option<oneshot::Sender<()>>,
    },
    Shutdown,
}

/// Single-consumer playback queue
pub struct PlaybackService {
    tx: mpsc::UnboundedSender<Job>,
    switch: Arc<StopSwitch>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackService {
    /// Spawn the playback worker over a sink
    ///
    /// # Errors
    ///
    /// Returns error if the worker thread cannot be spawned
    pub fn new(sink: Arc<dyn AudioSink>) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let switch = Arc::new(StopSwitch::default());
        let worker_switch = Arc::clone(&switch);

        let worker = std::thread::Builder::new()
            .name("magi-playback".to_string())
            .spawn(move || playback_worker(&*sink, &worker_switch, rx))?;

        tracing::debug!("playback worker started");

        Ok(Self {
            tx,
            switch,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queue a request; blocking requests resolve once playback completes or fails
    pub async fn enqueue(&self, request: PlaybackRequest) {
        if request.blocking {
            let (done_tx, done_rx) = oneshot::channel();
            if self.submit(request.source, Some(done_tx)) {
                // Sender dropped means the worker went away; nothing left to wait for
                let _ = done_rx.await;
            }
        } else {
            self.submit(request.source, None);
        }
    }

    /// Queue a source without waiting
    pub fn play(&self, source: impl Into<AudioSource>) {
        self.submit(source.into(), None);
    }

    /// Queue a source and wait for it to finish
    pub async fn play_and_wait(&self, source: impl Into<AudioSource>) {
        self.enqueue(PlaybackRequest::blocking(source)).await;
    }

    /// Halt the clip currently playing; queued clips still play afterwards
    ///
    /// A clip the worker has dequeued but not yet started counts as current.
    /// With nothing in flight this is a no-op.
    pub fn stop_all(&self) {
        tracing::debug!("stopping current playback");
        self.switch.trip();
    }

    /// Let the in-flight clip finish, then stop the worker. Later calls are no-ops.
    pub async fn shutdown(&self) {
        let Some(worker) = self.worker.lock().ok().and_then(|mut w| w.take()) else {
            return;
        };

        let _ = self.tx.send(Job::Shutdown);
        match tokio::task::spawn_blocking(move || worker.join()).await {
            Ok(Ok(())) => tracing::debug!("playback worker stopped"),
            Ok(Err(_)) => tracing::error!("playback worker panicked"),
            Err(e) => tracing::error!(error = %e, "failed to join playback worker"),
        }
    }

    fn submit(&self, source: AudioSource, done: Option<oneshot::Sender<()>>) -> bool {
        tracing::trace!(source = %source.describe(), "queueing playback");
        if self.tx.send(Job::Play { source, done }).is_err() {
            tracing::warn!("playback worker not running, dropping request");
            return false;
        }
        true
    }
}

fn playback_worker(
    sink: &dyn AudioSink,
    switch: &StopSwitch,
    mut rx: mpsc::UnboundedReceiver<Job>,
) {
    while let Some(job) = rx.blocking_recv() {
        match job {
            Job::Play { source, done } => {
                let label = source.describe();
                let stop = switch.arm();
                match source.load() {
                    Ok(_) if stop.is_stopped() => {
                        tracing::debug!(source = %label, "stopped before playback started");
                    }
                    Ok(clip) => {
                        if let Err(e) = sink.play(&clip, &stop) {
                            tracing::error!(source = %label, error = %e, "playback failed");
                        }
                    }
                    Err(e) => tracing::error!(source = %label, error = %e, "failed to load audio"),
                }
                if let Some(done) = done {
                    let _ = done.send(());
                }
            }
            Job::Shutdown => break,
        }
    }
}

/// Plays clips on the default output device
pub struct CpalSink;

impl CpalSink {
    /// Create a sink bound to the default output device
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            "audio playback initialized"
        );

        Ok(Self)
    }

    /// Pick a stream config for the clip, resampling when the device can't match its rate
    fn prepare(device: &Device, clip: &AudioClip) -> Result<(StreamConfig, Vec<f32>)> {
        let mono = clip.clone().into_mono();
        let rate = SampleRate(mono.sample_rate);

        let supported = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .filter(|c| c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
            .filter(|c| c.channels() == 1 || c.channels() == 2)
            .min_by_key(cpal::SupportedStreamConfigRange::channels);

        if let Some(range) = supported {
            return Ok((range.with_sample_rate(rate).config(), mono.samples));
        }

        let default = device
            .default_output_config()
            .map_err(|e| Error::Audio(e.to_string()))?;
        let target = default.sample_rate().0;
        tracing::debug!(from = mono.sample_rate, to = target, "resampling for output device");
        let resampled = mono.resample(target)?;
        Ok((default.config(), resampled.samples))
    }
}

impl AudioSink for CpalSink {
    fn play(&self, clip: &AudioClip, stop: &StopToken) -> Result<()> {
        if clip.samples.is_empty() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device".to_string()))?;

        let (config, samples) = Self::prepare(&device, clip)?;
        let channels = usize::from(config.channels);
        let sample_count = samples.len();

        let finished = Arc::new(AtomicBool::new(false));
        let finished_cb = Arc::clone(&finished);
        let stop_cb = stop.clone();
        let mut pos = 0usize;

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let stopped = stop_cb.is_stopped();
                    for frame in data.chunks_mut(channels) {
                        let sample = if !stopped && pos < samples.len() {
                            pos += 1;
                            samples[pos - 1]
                        } else {
                            finished_cb.store(true, Ordering::Relaxed);
                            0.0
                        };
                        frame.fill(sample);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        let duration_ms = (sample_count as u64 * 1000) / u64::from(config.sample_rate.0.max(1));
        let timeout = Duration::from_millis(duration_ms) + DRAIN_GRACE;
        let start = Instant::now();

        while !finished.load(Ordering::Relaxed) && !stop.is_stopped() {
            if start.elapsed() > timeout {
                tracing::warn!("playback did not drain in time");
                break;
            }
            std::thread::sleep(DRAIN_POLL);
        }

        drop(stream);
        tracing::debug!(samples = sample_count, "playback complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trip_reaches_armed_token() {
        let switch = StopSwitch::default();
        let token = switch.arm();
        assert!(!token.is_stopped());

        switch.trip();
        assert!(token.is_stopped());
    }

    #[test]
    fn test_stop_between_dequeue_and_play_is_kept() {
        let switch = StopSwitch::default();
        let previous = switch.arm();

        // Worker has taken the next clip and is still decoding it
        let next = switch.arm();
        switch.trip();

        assert!(next.is_stopped());
        assert!(!previous.is_stopped());
    }

    #[test]
    fn test_idle_stop_does_not_reach_next_clip() {
        let switch = StopSwitch::default();
        let finished = switch.arm();

        switch.trip();
        let next = switch.arm();

        assert!(finished.is_stopped());
        assert!(!next.is_stopped());
    }
}
