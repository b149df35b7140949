use crate::error::{FilerError, ParkReason};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const RECORD_SUFFIX: &str = ".error.json";

/// Why a document was left behind. The document itself stays in the input
/// directory untouched; only this record is written to the parked directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParkedRecord {
    pub id: Uuid,
    pub document: PathBuf,
    pub reason: ParkReason,
    pub detail: String,
    pub parked_at: DateTime<Utc>,
    pub attempts: u32,
}

impl ParkedRecord {
    pub fn new(document: &Path, reason: ParkReason, detail: impl Into<String>, attempts: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            document: document.to_path_buf(),
            reason,
            detail: detail.into(),
            parked_at: Utc::now(),
            attempts,
        }
    }

    /// `None` for errors that are not scoped to a document
    pub fn from_error(document: &Path, error: &FilerError) -> Option<Self> {
        Some(Self::new(
            document,
            error.park_reason()?,
            error.to_string(),
            error.attempts(),
        ))
    }
}

/// Directory of parked-document records for manual review
pub struct ParkingLot {
    dir: PathBuf,
}

impl ParkingLot {
    /// Nothing is created until the first record is stored or
    /// [`ParkingLot::ensure_dir`] is called.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating parked directory {}", self.dir.display()))
    }

    fn record_path(&self, record: &ParkedRecord) -> PathBuf {
        let name = record
            .document
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let short_id = &record.id.simple().to_string()[..8];
        self.dir.join(format!(
            "{name}.{}.{short_id}{RECORD_SUFFIX}",
            record.parked_at.format("%Y%m%dT%H%M%S%3f")
        ))
    }

    /// Persist `record` and return where it was written
    pub fn store(&self, record: &ParkedRecord) -> Result<PathBuf> {
        self.ensure_dir()?;
        let path = self.record_path(record);
        let json = serde_json::to_string_pretty(record)?;
        fs::write(&path, json)
            .with_context(|| format!("writing parked record {}", path.display()))?;
        Ok(path)
    }

    /// All readable records, oldest first. Unparseable files are skipped.
    pub fn list(&self) -> Result<Vec<ParkedRecord>> {
        let mut records = Vec::new();
        if !self.dir.is_dir() {
            return Ok(records);
        }
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_record = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(RECORD_SUFFIX));
            if !is_record {
                continue;
            }
            if let Some(record) = fs::read_to_string(&path)
                .ok()
                .and_then(|json| serde_json::from_str::<ParkedRecord>(&json).ok())
            {
                records.push(record);
            }
        }
        records.sort_by_key(|r| r.parked_at);
        Ok(records)
    }

    /// Records for one document, oldest first
    pub fn records_for(&self, document: &Path) -> Result<Vec<ParkedRecord>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|r| r.document == document)
            .collect())
    }
}
