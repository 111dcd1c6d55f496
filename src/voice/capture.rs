//! Audio capture from microphone

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::{mpsc, oneshot};

use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Callback buffers held before the consumer falls behind and audio is dropped
const CHANNEL_DEPTH: usize = 256;

/// How often the capture thread checks for stop
const STOP_POLL: Duration = Duration::from_millis(20);

/// A stream of mono f32 audio chunks
#[async_trait]
pub trait FrameSource: Send {
    /// Rate of the delivered samples
    fn sample_rate(&self) -> u32;

    /// Open the underlying device; no-op if already open
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened
    async fn start(&mut self) -> Result<()>;

    /// Next chunk of samples, or `None` once the stream has closed
    async fn next_chunk(&mut self) -> Option<Vec<f32>>;

    /// Release the device
    async fn stop(&mut self);
}

/// Captures audio from the default input device
///
/// The cpal stream lives on a dedicated thread (streams aren't `Send`) and
/// hands callback buffers over a bounded channel.
pub struct Microphone {
    rx: Option<mpsc::Receiver<Vec<f32>>>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Microphone {
    /// Create a microphone handle, checking that an input device exists
    ///
    /// # Errors
    ///
    /// Returns error if no input device is available
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            "audio capture initialized"
        );

        Ok(Self {
            rx: None,
            stop: Arc::new(AtomicBool::new(false)),
            thread: None,
        })
    }

    /// Check if currently capturing
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.thread.is_some()
    }
}

#[async_trait]
impl FrameSource for Microphone {
    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
    }

    async fn start(&mut self) -> Result<()> {
        if self.thread.is_some() {
            return Ok(());
        }

        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        let (ready_tx, ready_rx) = oneshot::channel();
        self.stop.store(false, Ordering::SeqCst);
        let stop = Arc::clone(&self.stop);

        let thread = std::thread::Builder::new()
            .name("magi-capture".to_string())
            .spawn(move || {
                let stream = match open_input_stream(tx) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                while !stop.load(Ordering::SeqCst) {
                    std::thread::sleep(STOP_POLL);
                }
                drop(stream);
            })?;

        ready_rx
            .await
            .map_err(|_| Error::Audio("capture thread exited during startup".to_string()))??;

        self.rx = Some(rx);
        self.thread = Some(thread);
        tracing::debug!("audio capture started");
        Ok(())
    }

    async fn next_chunk(&mut self) -> Option<Vec<f32>> {
        self.rx.as_mut()?.recv().await
    }

    async fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.stop.store(true, Ordering::SeqCst);
        self.rx = None;

        if tokio::task::spawn_blocking(move || thread.join()).await.is_err() {
            tracing::error!("failed to join capture thread");
        }
        tracing::debug!("audio capture stopped");
    }
}

fn open_input_stream(tx: mpsc::Sender<Vec<f32>>) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device".to_string()))?;

    let supported_config = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        })
        .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?;

    let config: StreamConfig = supported_config
        .with_sample_rate(SampleRate(SAMPLE_RATE))
        .config();

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if tx.try_send(data.to_vec()).is_err() {
                    tracing::trace!("capture consumer behind, dropping buffer");
                }
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok(stream)
}
