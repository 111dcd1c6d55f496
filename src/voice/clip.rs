//! Decoded PCM audio and format helpers

use std::io::Cursor;
use std::path::Path;

use rubato::{FftFixedIn, Resampler};

use crate::{Error, Result};

/// Frames fed to the resampler per call
const RESAMPLE_CHUNK: usize = 1024;

/// Interleaved f32 PCM ready for an output device
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    /// Interleaved samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Frames per second
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
}

impl AudioClip {
    /// Wrap mono samples
    #[must_use]
    pub const fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            channels: 1,
        }
    }

    /// Decode a WAV or MP3 payload, sniffing the container from its header
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are neither valid WAV nor MP3
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
            decode_wav(bytes)
        } else {
            decode_mp3(bytes)
        }
    }

    /// Read and decode an audio file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or decoded
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::decode(&bytes)
            .map_err(|e| Error::Audio(format!("{}: {e}", path.display())))
    }

    /// Number of frames (samples per channel)
    #[must_use]
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels.max(1))
    }

    /// Playback length in milliseconds
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.frames() as u64 * 1000) / u64::from(self.sample_rate)
    }

    /// Average all channels down to one
    #[must_use]
    pub fn into_mono(self) -> Self {
        if self.channels <= 1 {
            return self;
        }
        let channels = usize::from(self.channels);
        #[allow(clippy::cast_precision_loss)]
        let samples = self
            .samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();
        Self::mono(samples, self.sample_rate)
    }

    /// Convert to another sample rate
    ///
    /// # Errors
    ///
    /// Returns error if the resampler cannot be constructed or fails
    pub fn resample(self, target_rate: u32) -> Result<Self> {
        if self.sample_rate == target_rate || self.samples.is_empty() {
            return Ok(Self {
                sample_rate: target_rate,
                ..self
            });
        }

        let channels = usize::from(self.channels.max(1));
        let frames = self.frames();
        let mut planar: Vec<Vec<f32>> = vec![Vec::with_capacity(frames); channels];
        for frame in self.samples.chunks(channels) {
            for (ch, &s) in frame.iter().enumerate() {
                planar[ch].push(s);
            }
        }

        let mut resampler = FftFixedIn::<f32>::new(
            self.sample_rate as usize,
            target_rate as usize,
            RESAMPLE_CHUNK,
            2,
            channels,
        )
        .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

        let delay = resampler.output_delay();
        let expected = frames * target_rate as usize / self.sample_rate as usize;
        let mut out: Vec<Vec<f32>> = vec![Vec::with_capacity(expected + delay); channels];

        let mut pos = 0;
        while out[0].len() < expected + delay {
            let need = resampler.input_frames_next();
            let chunk: Vec<Vec<f32>> = planar
                .iter()
                .map(|ch| {
                    let mut c: Vec<f32> = ch.iter().skip(pos).take(need).copied().collect();
                    c.resize(need, 0.0);
                    c
                })
                .collect();
            let processed = resampler
                .process(&chunk, None)
                .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
            for (dst, src) in out.iter_mut().zip(processed) {
                dst.extend(src);
            }
            pos += need;
        }

        let mut samples = Vec::with_capacity(expected * channels);
        for i in delay..delay + expected {
            for ch in &out {
                samples.push(ch[i]);
            }
        }

        Ok(Self {
            samples,
            sample_rate: target_rate,
            channels: self.channels,
        })
    }
}

/// Decode WAV bytes of any integer or float sample format
fn decode_wav(bytes: &[u8]) -> Result<AudioClip> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
        hound::SampleFormat::Int => {
            #[allow(clippy::cast_precision_loss)]
            let scale = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| {
                    #[allow(clippy::cast_precision_loss)]
                    let v = v as f32;
                    v / scale
                }))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    Ok(AudioClip {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

/// Decode MP3 bytes, downmixing stereo frames to mono
fn decode_mp3(mp3_data: &[u8]) -> Result<AudioClip> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                #[allow(clippy::cast_sign_loss)]
                {
                    sample_rate = frame.sample_rate as u32;
                }
                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    if sample_rate == 0 {
        return Err(Error::Audio("no decodable audio frames".to_string()));
    }

    Ok(AudioClip::mono(samples, sample_rate))
}

/// Convert f32 samples to 16-bit mono WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            writer.write_sample(f32_to_i16(sample))?;
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

/// Linear scaling from [-1.0, 1.0] to the 16-bit range
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}
