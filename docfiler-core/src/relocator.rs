//! Deterministic naming and collision-safe relocation.
//!
//! A relocation is one logical step. The target name is reserved with
//! create-new semantics (so two workers can never pick the same name), then
//! the source is renamed over the reservation. When the rename crosses
//! volumes the bytes are copied into the reservation, checked by SHA-256 and
//! only then is the source removed. Any failure removes the reservation and
//! leaves the source where it was.

use crate::classifier::DealerClassifier;
use crate::config::RelocationConfig;
use crate::error::{FilerError, FilerResult};
use crate::sanitizer::sanitize;
use crate::types::{RelocatedPath, RelocationPlan, SanitizedFields};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use tracing::debug;

#[cfg(unix)]
const CROSS_DEVICE_OS_ERROR: i32 = 18; // EXDEV
#[cfg(windows)]
const CROSS_DEVICE_OS_ERROR: i32 = 17; // ERROR_NOT_SAME_DEVICE

/// Build the relocation plan for a document. Pure: `now` is only used for the
/// fallback token when OCR produced neither an order number nor a job name.
pub fn plan_relocation(
    source: &Path,
    fields: &SanitizedFields,
    classifier: &DealerClassifier,
    output_root: &Path,
    max_segment_len: usize,
    now: DateTime<Utc>,
) -> RelocationPlan {
    let order = truncate_segment(&fields.order_number, max_segment_len);
    let job = truncate_segment(&fields.job_name, max_segment_len);

    let composed = match (order.is_empty(), job.is_empty()) {
        (false, false) => format!("{order}_{job}"),
        (false, true) => order.to_string(),
        (true, false) => job.to_string(),
        (true, true) => String::new(),
    };
    // A leading dot would hide the file; a bare run of dots is no name at all
    let composed = composed.trim_start_matches(['.', ' ']).to_string();

    let used_fallback_name = composed.is_empty();
    let stem = if used_fallback_name {
        fallback_token(source, max_segment_len, now)
    } else {
        composed
    };

    let extension = source
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| sanitize(e).to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| "pdf".to_string());

    let destination_key =
        classifier.classify(truncate_segment(&fields.dealer_name, max_segment_len));

    RelocationPlan {
        new_file_name: format!("{stem}.{extension}"),
        destination_folder: output_root.join(&destination_key),
        destination_key,
        used_fallback_name,
    }
}

fn truncate_segment(segment: &str, max_len: usize) -> &str {
    // Sanitized text is ASCII, so byte slicing is char-safe
    let end = segment.len().min(max_len);
    segment[..end].trim_end()
}

/// `<original stem>_<timestamp>`, traceable back to the file that arrived.
fn fallback_token(source: &Path, max_segment_len: usize, now: DateTime<Utc>) -> String {
    let original = source
        .file_stem()
        .map(|s| sanitize(&s.to_string_lossy()))
        .unwrap_or_default();
    let original = truncate_segment(original.trim_start_matches(['.', ' ']), max_segment_len);
    let original = if original.is_empty() {
        "document"
    } else {
        original
    };
    format!("{original}_{}", now.format("%Y%m%dT%H%M%S"))
}

/// Destination folders known to exist. Shared by all workers.
#[derive(Debug, Default)]
pub struct FolderCache {
    known: Mutex<HashSet<PathBuf>>,
}

impl FolderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, dir: &Path) -> bool {
        self.lock().contains(dir)
    }

    /// Create `dir` unless it is already known. Concurrent creation of the
    /// same folder by another worker counts as success.
    pub fn ensure(&self, dir: &Path) -> io::Result<()> {
        if self.contains(dir) {
            return Ok(());
        }

        // Lock is not held across the syscall; create_dir_all is idempotent
        match fs::create_dir_all(dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && dir.is_dir() => {}
            Err(e) => return Err(e),
        }

        if self.lock().insert(dir.to_path_buf()) {
            debug!(dir = %dir.display(), "Destination folder ready");
        }
        Ok(())
    }

    /// Drop a folder that turned out to be missing (removed out from under us).
    pub fn forget(&self, dir: &Path) {
        self.lock().remove(dir);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<PathBuf>> {
        self.known.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct FileRelocator {
    config: RelocationConfig,
    folders: Arc<FolderCache>,
}

impl FileRelocator {
    pub fn new(config: RelocationConfig, folders: Arc<FolderCache>) -> Self {
        Self { config, folders }
    }

    /// Move `source` according to `plan`, retrying transient failures with
    /// exponential backoff. On error the source is still in place.
    pub fn relocate(&self, source: &Path, plan: &RelocationPlan) -> FilerResult<RelocatedPath> {
        let max_attempts = self.config.max_retries.saturating_add(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.attempt(source, plan, attempt) {
                Ok((path, used_copy)) => {
                    return Ok(RelocatedPath {
                        path,
                        attempts: attempt,
                        used_copy,
                    })
                }
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.config.backoff(attempt);
                    debug!(
                        path = %source.display(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Relocation attempt failed, retrying"
                    );
                    thread::sleep(delay);
                }
                Err(FilerError::RelocationTransient { source: io_err, .. }) => {
                    return Err(failed(source, attempt, io_err.to_string()));
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn attempt(
        &self,
        source: &Path,
        plan: &RelocationPlan,
        attempt: u32,
    ) -> FilerResult<(PathBuf, bool)> {
        if !source.is_file() {
            return Err(failed(source, attempt, "source document no longer exists"));
        }

        self.folders
            .ensure(&plan.destination_folder)
            .map_err(|e| FilerError::RelocationTransient { attempt, source: e })?;

        let target = self.reserve_name(source, plan, attempt)?;

        match move_into(source, &target) {
            Ok(used_copy) => Ok((target, used_copy)),
            Err(e) => {
                let _ = fs::remove_file(&target);
                if e.kind() == io::ErrorKind::NotFound && !source.exists() {
                    Err(failed(source, attempt, "source document disappeared during move"))
                } else {
                    Err(FilerError::RelocationTransient { attempt, source: e })
                }
            }
        }
    }

    /// Claim the first free name among `name.ext`, `name (1).ext`, … by
    /// creating it empty.
    fn reserve_name(
        &self,
        source: &Path,
        plan: &RelocationPlan,
        attempt: u32,
    ) -> FilerResult<PathBuf> {
        let (stem, extension) = match plan.new_file_name.rsplit_once('.') {
            Some((stem, ext)) => (stem, format!(".{ext}")),
            None => (plan.new_file_name.as_str(), String::new()),
        };

        for n in 0..=self.config.max_collision_suffix {
            let name = if n == 0 {
                plan.new_file_name.clone()
            } else {
                format!("{stem} ({n}){extension}")
            };
            let candidate = plan.destination_folder.join(name);

            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&candidate)
            {
                Ok(_) => {
                    if n > 0 {
                        debug!(target = %candidate.display(), suffix = n, "Name collision resolved");
                    }
                    return Ok(candidate);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    if e.kind() == io::ErrorKind::NotFound {
                        self.folders.forget(&plan.destination_folder);
                    }
                    return Err(FilerError::RelocationTransient { attempt, source: e });
                }
            }
        }

        Err(failed(
            source,
            attempt,
            format!(
                "no free name for {} in {} after {} suffixes",
                plan.new_file_name,
                plan.destination_folder.display(),
                self.config.max_collision_suffix
            ),
        ))
    }
}

fn failed(source: &Path, attempts: u32, reason: impl Into<String>) -> FilerError {
    FilerError::RelocationFailed {
        path: source.to_path_buf(),
        attempts,
        reason: reason.into(),
    }
}

/// Rename `source` over the reserved `target`, falling back to a verified
/// copy when the two live on different volumes. Returns whether the copy path
/// was taken.
fn move_into(source: &Path, target: &Path) -> io::Result<bool> {
    match fs::rename(source, target) {
        Ok(()) => Ok(false),
        Err(e) if is_cross_device(&e) => {
            copy_verified(source, target)?;
            Ok(true)
        }
        Err(e) => Err(e),
    }
}

fn is_cross_device(e: &io::Error) -> bool {
    e.raw_os_error() == Some(CROSS_DEVICE_OS_ERROR)
}

/// Copy into `target`, flush it, compare checksums, then delete `source`.
/// If the source cannot be deleted the copy is removed again so the document
/// never exists twice.
pub(crate) fn copy_verified(source: &Path, target: &Path) -> io::Result<()> {
    {
        let mut reader = File::open(source)?;
        let mut writer = OpenOptions::new().write(true).truncate(true).open(target)?;
        io::copy(&mut reader, &mut writer)?;
        writer.sync_all()?;
    }

    if file_digest(source)? != file_digest(target)? {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "copy verification failed: checksum mismatch",
        ));
    }

    if let Err(e) = fs::remove_file(source) {
        let _ = fs::remove_file(target);
        return Err(e);
    }
    Ok(())
}

fn file_digest(path: &Path) -> io::Result<Vec<u8>> {
    let mut hasher = Sha256::new();
    io::copy(&mut File::open(path)?, &mut hasher)?;
    Ok(hasher.finalize().to_vec())
}
