//! # Batch Progress
//!
//! Resumable batches: trails already handled in an earlier run are skipped. The
//! store is injected into the batch driver so resumability does not depend on any
//! particular file format.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::error::Result;
use crate::repair::TrailReport;

/// Records which trails a batch has finished.
pub trait ProgressStore {
    fn is_done(&self, trail_id: &str) -> bool;

    fn mark_done(&mut self, trail_id: &str, report: &TrailReport) -> Result<()>;
}

/// Progress kept for the lifetime of the process only.
#[derive(Debug, Default)]
pub struct InMemoryProgress {
    done: HashMap<String, TrailReport>,
}

impl InMemoryProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self, trail_id: &str) -> Option<&TrailReport> {
        self.done.get(trail_id)
    }

    pub fn len(&self) -> usize {
        self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }
}

impl ProgressStore for InMemoryProgress {
    fn is_done(&self, trail_id: &str) -> bool {
        self.done.contains_key(trail_id)
    }

    fn mark_done(&mut self, trail_id: &str, report: &TrailReport) -> Result<()> {
        self.done.insert(trail_id.to_string(), report.clone());
        Ok(())
    }
}

/// Progress checkpointed to a JSON file of `trail_id -> report`.
///
/// The file is rewritten after every mark via a sibling temp file and a rename, so
/// an interrupted run leaves either the old or the new checkpoint.
#[derive(Debug)]
pub struct JsonFileProgress {
    path: PathBuf,
    done: BTreeMap<String, TrailReport>,
}

impl JsonFileProgress {
    /// Open a checkpoint, starting empty if the file does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let done = if path.exists() {
            let bytes = fs::read(&path)?;
            serde_json::from_slice(&bytes)?
        } else {
            BTreeMap::new()
        };
        info!("[Progress] {} trails already done in {}", done.len(), path.display());
        Ok(Self { path, done })
    }

    pub fn report(&self, trail_id: &str) -> Option<&TrailReport> {
        self.done.get(trail_id)
    }

    fn flush(&self) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&self.done)?)?;
        fs::rename(&tmp, &self.path)?;
        debug!("[Progress] checkpoint written ({} trails)", self.done.len());
        Ok(())
    }
}

impl ProgressStore for JsonFileProgress {
    fn is_done(&self, trail_id: &str) -> bool {
        self.done.contains_key(trail_id)
    }

    fn mark_done(&mut self, trail_id: &str, report: &TrailReport) -> Result<()> {
        self.done.insert(trail_id.to_string(), report.clone());
        self.flush()
    }
}
