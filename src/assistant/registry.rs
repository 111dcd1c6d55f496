//! Durable record of live remote ids
//!
//! One id per line, newline terminated. Ids are appended when created and the
//! file is rewritten without them once deleted, so anything left over at
//! startup belongs to a process that never cleaned up.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::Result;

/// Line-oriented id file
#[derive(Debug, Clone)]
pub struct IdRegistry {
    path: PathBuf,
}

impl IdRegistry {
    /// Use the file at `path`; it is created on first write
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All recorded ids; a missing file is empty
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read
    pub fn ids(&self) -> Result<Vec<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(contents
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether no ids are recorded
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.ids()?.is_empty())
    }

    /// Append an id
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written
    pub fn record(&self, id: &str) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{id}")?;
        file.sync_all()?;

        tracing::debug!(id, path = %self.path.display(), "id recorded");
        Ok(())
    }

    /// Drop an id, rewriting the file; absent ids are a no-op
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or rewritten
    pub fn remove(&self, id: &str) -> Result<()> {
        let ids = self.ids()?;
        if !ids.iter().any(|i| i == id) {
            tracing::warn!(id, path = %self.path.display(), "id not in registry");
            return Ok(());
        }

        let contents: String = ids
            .iter()
            .filter(|i| *i != id)
            .map(|i| format!("{i}\n"))
            .collect();
        std::fs::write(&self.path, contents)?;

        tracing::debug!(id, path = %self.path.display(), "id removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let reg = IdRegistry::new(dir.path().join("active.treg"));
        assert!(reg.ids().unwrap().is_empty());
        assert!(reg.is_empty().unwrap());
    }

    #[test]
    fn test_record_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let reg = IdRegistry::new(dir.path().join("nested").join("active.areg"));

        reg.record("asst_1").unwrap();
        reg.record("asst_2").unwrap();
        assert_eq!(reg.ids().unwrap(), vec!["asst_1", "asst_2"]);
        assert_eq!(
            std::fs::read_to_string(reg.path()).unwrap(),
            "asst_1\nasst_2\n"
        );

        reg.remove("asst_1").unwrap();
        assert_eq!(reg.ids().unwrap(), vec!["asst_2"]);
        assert_eq!(std::fs::read_to_string(reg.path()).unwrap(), "asst_2\n");
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let reg = IdRegistry::new(dir.path().join("active.treg"));
        reg.remove("thread_missing").unwrap();
        reg.record("thread_1").unwrap();
        reg.remove("thread_missing").unwrap();
        assert_eq!(reg.ids().unwrap(), vec!["thread_1"]);
    }
}
