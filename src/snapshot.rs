//! Latest-state-per-vehicle snapshot kept as a JSON file.
//!
//! A new snapshot is written to a temporary file in the same directory and
//! renamed over the old one, so a concurrent [`SnapshotCache::load`] sees
//! either the previous file or the new one, never a truncated mix.

use std::fs;
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::SnapshotError;
use crate::record::Snapshot;

#[derive(Debug, Clone)]
pub struct SnapshotCache {
    path: PathBuf,
}

impl SnapshotCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the current snapshot. `None` means no snapshot has been written
    /// yet.
    pub fn load(&self) -> Result<Option<Snapshot>, SnapshotError> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let snapshot = serde_json::from_reader(BufReader::new(file))?;
        Ok(Some(snapshot))
    }

    /// Atomically installs `snapshot` as the current state.
    pub fn replace(&self, snapshot: &Snapshot) -> Result<(), SnapshotError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer(&mut writer, snapshot)?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)?;

        debug!(path = %self.path.display(), vehicles = snapshot.len(), "Snapshot replaced");
        Ok(())
    }
}
