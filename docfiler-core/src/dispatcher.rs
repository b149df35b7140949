//! Watcher and worker pool.
//!
//! Per-path lifecycle:
//!
//! ```text
//! Detected → Settling → Stable → Enqueued → Processing → Relocated | Parked
//!                ↘ WriteTimedOut → Parked
//!                ↘ Vanished (discarded)
//! ```
//!
//! The notify callback only forwards paths into a channel. Everything else
//! happens on the runtime: settle polling as async tasks, processing on
//! `spawn_blocking` from a fixed set of worker tasks.

use crate::config::{resolve_path, FilerConfig};
use crate::processor::{DocumentProcessor, Outcome};
use crate::queue::IngestionQueue;
use crate::settle::{wait_until_stable, SettleOutcome};
use crate::types::IngestEvent;
use anyhow::{Context, Result};
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// Terminal outcome counts for one `run`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub relocated: usize,
    pub parked: usize,
    /// Files that disappeared while settling
    pub discarded: usize,
}

#[derive(Debug, Default)]
struct Counters {
    relocated: AtomicUsize,
    parked: AtomicUsize,
    discarded: AtomicUsize,
}

impl Counters {
    fn record(&self, outcome: &Outcome) {
        match outcome {
            Outcome::Relocated(_) => self.relocated.fetch_add(1, Ordering::SeqCst),
            Outcome::Parked(_) => self.parked.fetch_add(1, Ordering::SeqCst),
        };
    }

    fn summary(&self) -> RunSummary {
        RunSummary {
            relocated: self.relocated.load(Ordering::SeqCst),
            parked: self.parked.load(Ordering::SeqCst),
            discarded: self.discarded.load(Ordering::SeqCst),
        }
    }
}

/// Event kinds that may mean a new document arrived
fn is_arrival(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(CreateKind::File | CreateKind::Any)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Name(
                RenameMode::To | RenameMode::Both | RenameMode::Any
            ))
    )
}

fn start_watcher(dir: &Path, tx: mpsc::UnboundedSender<IngestEvent>) -> Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if !is_arrival(&event.kind) {
                return;
            }
            for path in event.paths {
                // Receiver gone means we are shutting down
                let _ = tx.send(IngestEvent::new(path));
            }
        }
        Err(e) => warn!(error = %e, "Watcher error"),
    })
    .context("creating filesystem watcher")?;

    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("watching {}", dir.display()))?;
    Ok(watcher)
}

pub struct Dispatcher {
    config: Arc<FilerConfig>,
    /// Absolute, symlink-free input directory; every tracked path is built on it
    input_dir: PathBuf,
    processor: Arc<DocumentProcessor>,
    queue: Arc<IngestionQueue>,
    counters: Arc<Counters>,
}

impl Dispatcher {
    pub fn new(config: FilerConfig, processor: Arc<DocumentProcessor>) -> Self {
        Self {
            input_dir: resolve_path(&config.input_dir),
            config: Arc::new(config),
            processor,
            queue: Arc::new(IngestionQueue::new()),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    pub fn queue(&self) -> &Arc<IngestionQueue> {
        &self.queue
    }

    /// Outcome counts so far
    pub fn summary(&self) -> RunSummary {
        self.counters.summary()
    }

    /// Regular, visible file directly in the input directory with an
    /// accepted extension. Directories and symlinks are never candidates.
    pub fn is_candidate(&self, path: &Path) -> bool {
        let visible = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| !n.starts_with('.'));
        if !visible || !self.config.accepts_extension(path) {
            return false;
        }
        // symlink_metadata so a link is seen as a link, not its target
        std::fs::symlink_metadata(path)
            .map(|m| m.file_type().is_file())
            .unwrap_or(false)
    }

    /// Watch the input directory until `shutdown` resolves, then stop
    /// accepting work, let workers finish their current document and return
    /// the outcome counts.
    pub async fn run<F>(&self, shutdown: F) -> Result<RunSummary>
    where
        F: Future<Output = ()>,
    {
        self.processor.prepare()?;

        let input_dir = self.input_dir.clone();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let watcher = start_watcher(&input_dir, tx)?;

        let workers = self.spawn_workers();
        let mut settling: HashSet<PathBuf> = HashSet::new();
        let mut settle_tasks: JoinSet<PathBuf> = JoinSet::new();

        info!(
            input = %input_dir.display(),
            output = %self.config.output_root.display(),
            parked = %self.processor.parking().dir().display(),
            workers = workers.len(),
            "Watching for documents"
        );

        // Subscribed first so nothing dropped in during the scan is missed;
        // a file seen by both is deduplicated below
        if self.config.rescan_on_startup {
            for path in self.existing_files(&input_dir)? {
                self.detect(path, &mut settling, &mut settle_tasks);
            }
        }

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                Some(event) = rx.recv() => {
                    self.detect(event.path, &mut settling, &mut settle_tasks);
                }
                Some(joined) = settle_tasks.join_next(), if !settle_tasks.is_empty() => {
                    match joined {
                        Ok(path) => {
                            settling.remove(&path);
                        }
                        Err(e) => error!(error = %e, "Settle task failed"),
                    }
                }
            }
        }

        drop(watcher);
        // No dequeues past this point; pending and settling files stay in the
        // input directory for the next start
        self.queue.close();
        settle_tasks.shutdown().await;

        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "Worker task failed");
            }
        }

        let summary = self.counters.summary();
        info!(
            relocated = summary.relocated,
            parked = summary.parked,
            discarded = summary.discarded,
            "Dispatcher stopped"
        );
        Ok(summary)
    }

    fn existing_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for entry in
            std::fs::read_dir(dir).with_context(|| format!("scanning {}", dir.display()))?
        {
            paths.push(entry?.path());
        }
        paths.sort();
        debug!(count = paths.len(), "Startup rescan");
        Ok(paths)
    }

    /// `Detected → Settling`. No-op for non-candidates and for paths already
    /// settling or in flight. Paths are re-rooted on the resolved input
    /// directory so every spelling of one file shares a key.
    fn detect(
        &self,
        path: PathBuf,
        settling: &mut HashSet<PathBuf>,
        settle_tasks: &mut JoinSet<PathBuf>,
    ) {
        let Some(name) = path.file_name() else {
            return;
        };
        let path = self.input_dir.join(name);
        if !self.is_candidate(&path) {
            return;
        }
        if settling.contains(&path) || self.queue.is_in_flight(&path) {
            debug!(path = %path.display(), "Already being handled, ignoring event");
            return;
        }

        debug!(path = %path.display(), "Detected, settling");
        settling.insert(path.clone());

        let settle = self.config.settle.clone();
        let queue = self.queue.clone();
        let processor = self.processor.clone();
        let counters = self.counters.clone();

        settle_tasks.spawn(async move {
            match wait_until_stable(&path, &settle).await {
                Ok(SettleOutcome::Stable { len, waited }) => {
                    debug!(
                        path = %path.display(),
                        len,
                        waited_ms = waited.as_millis() as u64,
                        "Stable, enqueuing"
                    );
                    queue.enqueue(path.clone());
                }
                Ok(SettleOutcome::Vanished) => {
                    debug!(path = %path.display(), "Vanished while settling, discarded");
                    counters.discarded.fetch_add(1, Ordering::SeqCst);
                }
                Err(err) => {
                    let document = path.clone();
                    match tokio::task::spawn_blocking(move || processor.park(&document, &err)).await {
                        Ok(outcome) => counters.record(&outcome),
                        Err(e) => error!(path = %path.display(), error = %e, "Parking task failed"),
                    }
                }
            }
            path
        });
    }

    fn spawn_workers(&self) -> Vec<JoinHandle<()>> {
        (0..self.config.workers.count)
            .map(|worker| {
                let queue = self.queue.clone();
                let processor = self.processor.clone();
                let counters = self.counters.clone();

                tokio::spawn(async move {
                    while let Some(mut item) = queue.dequeue().await {
                        let path = item.path.clone();
                        debug!(worker, path = %path.display(), "Processing");

                        let processor = processor.clone();
                        let processed = tokio::task::spawn_blocking(move || {
                            let outcome = processor.process(&mut item);
                            (outcome, item.attempt_count)
                        })
                        .await;
                        match processed {
                            Ok((outcome, attempts)) => {
                                debug!(worker, path = %path.display(), attempts, "Finished");
                                counters.record(&outcome);
                            }
                            Err(e) => error!(
                                worker,
                                path = %path.display(),
                                error = %e,
                                "Processing task failed, document left in place"
                            ),
                        }
                        queue.complete(&path);
                    }
                    debug!(worker, "Worker stopped");
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::backends::{FakeRasterizer, ScriptedOcr};
    use notify::event::{AccessKind, DataChange, RemoveKind};
    use std::fs;
    use tempfile::TempDir;

    fn dispatcher(dir: &TempDir) -> Dispatcher {
        let config = FilerConfig {
            input_dir: dir.path().join("in"),
            output_root: dir.path().join("out"),
            ..FilerConfig::default()
        };
        fs::create_dir_all(&config.input_dir).unwrap();
        let processor = DocumentProcessor::new_with_dependencies(
            &config,
            Arc::new(FakeRasterizer::new(1700, 2200)),
            Arc::new(ScriptedOcr::new("a", "b", "c")),
        )
        .unwrap();
        Dispatcher::new(config, Arc::new(processor))
    }

    #[test]
    fn test_arrival_event_kinds() {
        assert!(is_arrival(&EventKind::Create(CreateKind::File)));
        assert!(is_arrival(&EventKind::Modify(ModifyKind::Data(DataChange::Content))));
        assert!(is_arrival(&EventKind::Modify(ModifyKind::Name(RenameMode::To))));

        assert!(!is_arrival(&EventKind::Create(CreateKind::Folder)));
        assert!(!is_arrival(&EventKind::Modify(ModifyKind::Name(RenameMode::From))));
        assert!(!is_arrival(&EventKind::Remove(RemoveKind::File)));
        assert!(!is_arrival(&EventKind::Access(AccessKind::Any)));
    }

    #[test]
    fn test_candidate_filtering() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir);
        let input = dir.path().join("in");

        for name in ["scan.pdf", "SCAN2.PDF", "notes.txt", ".hidden.pdf"] {
            fs::write(input.join(name), b"%PDF").unwrap();
        }
        fs::create_dir(input.join("folder.pdf")).unwrap();

        assert!(dispatcher.is_candidate(&input.join("scan.pdf")));
        assert!(dispatcher.is_candidate(&input.join("SCAN2.PDF")));
        assert!(!dispatcher.is_candidate(&input.join("notes.txt")));
        assert!(!dispatcher.is_candidate(&input.join(".hidden.pdf")));
        assert!(!dispatcher.is_candidate(&input.join("folder.pdf")));
        assert!(!dispatcher.is_candidate(&input.join("missing.pdf")));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_not_candidates() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir);
        let target = dir.path().join("elsewhere.pdf");
        fs::write(&target, b"%PDF").unwrap();
        let link = dir.path().join("in").join("link.pdf");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        assert!(!dispatcher.is_candidate(&link));
    }

    #[tokio::test]
    async fn test_detect_keys_on_resolved_input_dir() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir);
        fs::write(dir.path().join("in").join("scan.pdf"), b"%PDF").unwrap();

        let mut settling = HashSet::new();
        let mut settle_tasks = JoinSet::new();
        // The same file spelled two ways
        let detour = dir.path().join("in").join("..").join("in").join("scan.pdf");
        dispatcher.detect(detour, &mut settling, &mut settle_tasks);
        dispatcher.detect(
            dispatcher.input_dir().join("scan.pdf"),
            &mut settling,
            &mut settle_tasks,
        );
        settle_tasks.shutdown().await;

        assert!(dispatcher.input_dir().is_absolute());
        assert_eq!(settling.len(), 1);
        assert!(settling.contains(&dispatcher.input_dir().join("scan.pdf")));
    }

    #[tokio::test]
    async fn test_immediate_shutdown_with_empty_inbox() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir);

        let summary = dispatcher.run(async {}).await.unwrap();
        assert_eq!(summary, RunSummary::default());
        assert!(dispatcher.queue().is_closed());
    }
}
