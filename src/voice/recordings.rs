//! Archive of captured utterances

use std::path::{Path, PathBuf};

use super::clip::samples_to_wav;
use super::speech::Utterance;
use crate::Result;

/// Writes one WAV file per utterance, named by capture time
#[derive(Debug, Clone)]
pub struct RecordingStore {
    dir: PathBuf,
}

impl RecordingStore {
    /// Use `dir` as the archive, creating it if needed
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Archive directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write an utterance, returning the file path
    ///
    /// # Errors
    ///
    /// Returns error if encoding or writing fails
    pub fn save(&self, utterance: &Utterance) -> Result<PathBuf> {
        let stem = format!(
            "audio_{}",
            utterance.captured_at.format("%Y-%m-%d_%H-%M-%S")
        );

        let mut path = self.dir.join(format!("{stem}.wav"));
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("{stem}-{n}.wav"));
            n += 1;
        }

        let wav = samples_to_wav(&utterance.audio, utterance.sample_rate)?;
        std::fs::write(&path, wav)?;

        tracing::debug!(path = %path.display(), "utterance archived");
        Ok(path)
    }
}
