//! Settle detection for files that may still be written.
//!
//! A notifier can fire the moment a producer opens a file. Before a document
//! is queued its size and modification time must match across two consecutive
//! polls. If that never happens within the configured maximum wait the file
//! is reported as `WriteTimedOut` rather than processed half-written.

use crate::config::SettleConfig;
use crate::error::{FilerError, FilerResult};
use std::io;
use std::path::Path;
use std::time::{Duration, Instant, SystemTime};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Snapshot {
    len: u64,
    modified: Option<SystemTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleOutcome {
    /// Size and mtime held steady across two polls
    Stable { len: u64, waited: Duration },
    /// The file disappeared while we were watching it
    Vanished,
}

async fn snapshot(path: &Path) -> io::Result<Option<Snapshot>> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some(Snapshot {
            len: meta.len(),
            modified: meta.modified().ok(),
        })),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Poll `path` until it stops changing. Suspends between polls; never blocks
/// the runtime.
pub async fn wait_until_stable(path: &Path, config: &SettleConfig) -> FilerResult<SettleOutcome> {
    let started = Instant::now();
    let interval = config.poll_interval();
    let max_wait = config.max_wait();

    let unreadable = |e: io::Error| FilerError::DocumentUnreadable {
        path: path.to_path_buf(),
        reason: format!("cannot stat file: {e}"),
    };

    let Some(mut previous) = snapshot(path).await.map_err(unreadable)? else {
        return Ok(SettleOutcome::Vanished);
    };

    loop {
        if started.elapsed() >= max_wait {
            return Err(FilerError::WriteTimedOut {
                path: path.to_path_buf(),
                waited_ms: started.elapsed().as_millis() as u64,
            });
        }

        tokio::time::sleep(interval).await;

        let Some(current) = snapshot(path).await.map_err(unreadable)? else {
            return Ok(SettleOutcome::Vanished);
        };

        if current == previous {
            return Ok(SettleOutcome::Stable {
                len: current.len,
                waited: started.elapsed(),
            });
        }

        trace!(path = %path.display(), len = current.len, "Still being written");
        previous = current;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use tempfile::TempDir;

    fn config(poll_ms: u64, max_ms: u64) -> SettleConfig {
        SettleConfig {
            poll_interval_ms: poll_ms,
            max_wait_ms: max_ms,
        }
    }

    #[tokio::test]
    async fn test_finished_file_is_stable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("done.pdf");
        fs::write(&path, b"%PDF complete").unwrap();

        let outcome = wait_until_stable(&path, &config(10, 1000)).await.unwrap();
        assert!(matches!(outcome, SettleOutcome::Stable { len: 13, .. }));
    }

    #[tokio::test]
    async fn test_missing_file_vanishes() {
        let dir = TempDir::new().unwrap();
        let outcome = wait_until_stable(&dir.path().join("nope.pdf"), &config(10, 1000))
            .await
            .unwrap();
        assert_eq!(outcome, SettleOutcome::Vanished);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_growing_file_waits_for_writer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("growing.pdf");
        fs::write(&path, b"%PDF").unwrap();

        let writer_path = path.clone();
        let writer = std::thread::spawn(move || {
            for _ in 0..20 {
                let mut file = OpenOptions::new().append(true).open(&writer_path).unwrap();
                file.write_all(b"0123456789").unwrap();
                std::thread::sleep(Duration::from_millis(5));
            }
        });

        let outcome = wait_until_stable(&path, &config(100, 10_000)).await.unwrap();
        writer.join().unwrap();

        // Only declared stable once the writer stopped appending
        match outcome {
            SettleOutcome::Stable { len, .. } => assert_eq!(len, 4 + 20 * 10),
            other => panic!("expected Stable, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_never_settling_file_times_out() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("endless.pdf");
        fs::write(&path, b"%PDF").unwrap();

        let writer_path = path.clone();
        let stop = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let writer_stop = stop.clone();
        let writer = std::thread::spawn(move || {
            while !writer_stop.load(std::sync::atomic::Ordering::SeqCst) {
                let mut file = OpenOptions::new().append(true).open(&writer_path).unwrap();
                file.write_all(b"x").unwrap();
                std::thread::sleep(Duration::from_millis(5));
            }
        });

        let err = wait_until_stable(&path, &config(40, 300)).await.unwrap_err();
        stop.store(true, std::sync::atomic::Ordering::SeqCst);
        writer.join().unwrap();

        assert!(matches!(err, FilerError::WriteTimedOut { .. }));
    }
}
