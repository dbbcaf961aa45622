//! Output of finished documents
//!
//! Encoding pages into a real file is left to an [`OutputSink`]
//! implementation. [`ManifestSink`] records what would be written as a JSON
//! manifest, which is enough for dry runs and for tooling that performs the
//! encoding in a separate step.

use crate::document::{CompositionSnapshot, SnapshotPage};
use crate::error::{ComposeError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Everything a sink needs to write one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRequest {
    pub file_name: String,
    pub pages: Vec<SnapshotPage>,
    /// Pages are untouched source pages; the source can be copied as-is
    pub fast_copy: bool,
    pub summary: String,
    pub send_for_reprocessing: Option<bool>,
}

impl OutputRequest {
    pub fn from_snapshot(
        snapshot: CompositionSnapshot,
        summary: String,
        send_for_reprocessing: Option<bool>,
    ) -> Self {
        Self {
            file_name: snapshot.file_name,
            pages: snapshot.pages,
            fast_copy: snapshot.in_original_form,
            summary,
            send_for_reprocessing,
        }
    }
}

/// Writes finished documents
pub trait OutputSink {
    /// Write the document and return where it went
    fn write(&self, request: &OutputRequest) -> Result<PathBuf>;
}

/// Manifest written by [`ManifestSink`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputManifest {
    pub file_name: String,
    pub created_at: DateTime<Utc>,
    pub fast_copy: bool,
    pub summary: String,
    pub send_for_reprocessing: Option<bool>,
    pub pages: Vec<SnapshotPage>,
}

/// Sink that writes `<file_name>.json` manifests into a directory
#[derive(Debug, Clone)]
pub struct ManifestSink {
    dir: PathBuf,
}

impl ManifestSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn manifest_path(&self, file_name: &str) -> Result<PathBuf> {
        let name = Path::new(file_name);
        if file_name.is_empty() || name.components().count() != 1 || name.is_absolute() {
            return Err(ComposeError::InvalidArgument(format!(
                "output file name '{file_name}' must be a plain file name"
            )));
        }
        Ok(self.dir.join(format!("{file_name}.json")))
    }
}

impl OutputSink for ManifestSink {
    fn write(&self, request: &OutputRequest) -> Result<PathBuf> {
        let path = self.manifest_path(&request.file_name)?;
        fs::create_dir_all(&self.dir)?;

        let manifest = OutputManifest {
            file_name: request.file_name.clone(),
            created_at: Utc::now(),
            fast_copy: request.fast_copy,
            summary: request.summary.clone(),
            send_for_reprocessing: request.send_for_reprocessing,
            pages: request.pages.clone(),
        };

        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut writer, &manifest)?;
        writer.flush()?;
        Ok(path)
    }
}
