use crate::classifier::DealerClassifier;
use crate::config::FilerConfig;
use crate::error::{FilerError, FilerResult, ParkReason};
use crate::extraction::backends::{PopplerRasterizer, TesseractOcr};
use crate::extraction::{OcrEngine, PageRasterizer, RegionExtractor};
use crate::parking::{ParkedRecord, ParkingLot};
use crate::relocator::{plan_relocation, FileRelocator, FolderCache};
use crate::types::*;
use anyhow::{Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How a document's run ended. Every document ends in exactly one of these.
#[derive(Debug, Clone)]
pub enum Outcome {
    Relocated(RelocatedPath),
    Parked(ParkedRecord),
}

impl Outcome {
    pub fn is_relocated(&self) -> bool {
        matches!(self, Outcome::Relocated(_))
    }

    pub fn is_parked(&self) -> bool {
        matches!(self, Outcome::Parked(_))
    }
}

/// Collects timings for pipeline steps and reports them at debug level
pub struct StepProfiler {
    timings: Vec<(&'static str, Duration)>,
}

impl StepProfiler {
    pub fn new() -> Self {
        Self {
            timings: Vec::new(),
        }
    }

    pub fn time_step<F, R>(&mut self, step_name: &'static str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let start = Instant::now();
        let result = f();
        self.timings.push((step_name, start.elapsed()));
        result
    }

    pub fn total(&self) -> Duration {
        self.timings.iter().map(|(_, d)| *d).sum()
    }

    pub fn log_summary(&self, path: &Path) {
        for (step, duration) in &self.timings {
            debug!(
                path = %path.display(),
                step,
                elapsed_ms = duration.as_millis() as u64,
                "Step finished"
            );
        }
    }
}

impl Default for StepProfiler {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs one document from extraction to its terminal outcome.
///
/// Shared by every worker behind an `Arc`; all methods take `&self` and block,
/// so callers on an async runtime go through `spawn_blocking`.
pub struct DocumentProcessor {
    extractor: RegionExtractor,
    classifier: DealerClassifier,
    relocator: FileRelocator,
    parking: ParkingLot,
    output_root: PathBuf,
    max_segment_len: usize,
}

impl DocumentProcessor {
    /// Create DocumentProcessor with full dependency injection
    pub fn new_with_dependencies(
        config: &FilerConfig,
        rasterizer: Arc<dyn PageRasterizer>,
        ocr: Arc<dyn OcrEngine>,
    ) -> Result<Self> {
        let classifier = DealerClassifier::new(config.fallback_key.clone())
            .with_reserved(config.reserved_keys());

        Ok(Self {
            extractor: RegionExtractor::new(rasterizer, ocr, config.regions.clone()),
            classifier,
            relocator: FileRelocator::new(config.relocation.clone(), Arc::new(FolderCache::new())),
            parking: ParkingLot::new(config.parked_dir()),
            output_root: config.output_root.clone(),
            max_segment_len: config.relocation.max_segment_len,
        })
    }

    /// Convenience constructor for CLI usage: poppler rasterizer + tesseract OCR
    pub fn new_cli(config: &FilerConfig) -> Result<Self> {
        let rasterizer = Arc::new(PopplerRasterizer::new(&config.backends.rasterizer));
        let ocr = Arc::new(TesseractOcr::new(&config.backends.ocr));
        Self::new_with_dependencies(config, rasterizer, ocr)
    }

    pub fn parking(&self) -> &ParkingLot {
        &self.parking
    }

    /// Create the output root and parked directory. Called before watching
    /// so permission problems surface at startup; `inspect` never calls it.
    pub fn prepare(&self) -> Result<()> {
        std::fs::create_dir_all(&self.output_root).with_context(|| {
            format!("creating output root {}", self.output_root.display())
        })?;
        self.parking.ensure_dir()
    }

    /// Fails if either backend reports itself unusable
    pub fn check_backends(&self) -> Result<()> {
        let unhealthy = self.extractor.unhealthy_backends();
        if !unhealthy.is_empty() {
            anyhow::bail!("backend(s) not available: {}", unhealthy.join(", "));
        }
        Ok(())
    }

    /// Extract, sanitize and plan without touching the filesystem.
    pub fn inspect(&self, path: &Path) -> FilerResult<Inspection> {
        let extracted = self.extractor.extract(path)?;
        let sanitized = extracted.sanitize();
        let plan = self.plan(path, &sanitized);
        Ok(Inspection {
            document: path.to_path_buf(),
            extracted,
            sanitized,
            plan,
        })
    }

    fn plan(&self, path: &Path, sanitized: &SanitizedFields) -> RelocationPlan {
        plan_relocation(
            path,
            sanitized,
            &self.classifier,
            &self.output_root,
            self.max_segment_len,
            Utc::now(),
        )
    }

    /// Process one claimed work item to completion. Never fails: anything
    /// that goes wrong parks the document instead. The move attempts made
    /// are recorded on `item`.
    pub fn process(&self, item: &mut WorkItem) -> Outcome {
        let path = item.path.as_path();
        let mut profiler = StepProfiler::new();

        let result = self.run_pipeline(path, &mut profiler);
        profiler.log_summary(path);
        let elapsed_ms = profiler.total().as_millis() as u64;

        match result {
            Ok(relocated) => {
                item.attempt_count = relocated.attempts;
                info!(
                    path = %path.display(),
                    destination = %relocated.path.display(),
                    attempts = relocated.attempts,
                    used_copy = relocated.used_copy,
                    elapsed_ms,
                    "Document relocated"
                );
                Outcome::Relocated(relocated)
            }
            Err(err) => {
                let outcome = self.park(path, &err);
                if matches!(err, FilerError::RelocationFailed { .. }) {
                    item.attempt_count = err.attempts();
                }
                outcome
            }
        }
    }

    fn run_pipeline(&self, path: &Path, profiler: &mut StepProfiler) -> FilerResult<RelocatedPath> {
        let extracted = profiler.time_step("extract", || self.extractor.extract(path))?;

        let sanitized = profiler.time_step("sanitize", || extracted.sanitize());
        let empty = sanitized.empty_fields();
        if !empty.is_empty() {
            let fields: Vec<&str> = empty.iter().map(|f| f.label()).collect();
            warn!(
                path = %path.display(),
                empty_fields = %fields.join(","),
                "Extraction degraded, using fallback naming"
            );
        }

        let plan = self.plan(path, &sanitized);
        debug!(
            path = %path.display(),
            destination_key = %plan.destination_key,
            file_name = %plan.new_file_name,
            "Relocation planned"
        );

        profiler.time_step("relocate", || self.relocator.relocate(path, &plan))
    }

    /// Record `error` against `path` in the parking lot. The document is left
    /// where it is.
    pub fn park(&self, path: &Path, err: &FilerError) -> Outcome {
        let record = ParkedRecord::from_error(path, err).unwrap_or_else(|| {
            ParkedRecord::new(path, ParkReason::DocumentUnreadable, err.to_string(), 1)
        });

        match self.parking.store(&record) {
            Ok(written) => warn!(
                path = %path.display(),
                reason = %record.reason,
                attempts = record.attempts,
                record = %written.display(),
                detail = %record.detail,
                "Document parked"
            ),
            Err(e) => {
                let store_error = format!("{e:#}");
                error!(
                    path = %path.display(),
                    reason = %record.reason,
                    detail = %record.detail,
                    error = %store_error,
                    "Document parked but its record could not be written"
                );
            }
        }

        Outcome::Parked(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::backends::{FakeRasterizer, ScriptedOcr};
    use std::fs;
    use tempfile::TempDir;

    fn setup(ocr: ScriptedOcr) -> (TempDir, FilerConfig, DocumentProcessor) {
        let dir = TempDir::new().unwrap();
        let config = FilerConfig {
            input_dir: dir.path().join("in"),
            output_root: dir.path().join("out"),
            ..FilerConfig::default()
        };
        fs::create_dir_all(&config.input_dir).unwrap();
        let processor = DocumentProcessor::new_with_dependencies(
            &config,
            Arc::new(FakeRasterizer::new(1700, 2200)),
            Arc::new(ocr),
        )
        .unwrap();
        (dir, config, processor)
    }

    fn drop_file(config: &FilerConfig, name: &str, bytes: &[u8]) -> PathBuf {
        let path = config.input_dir.join(name);
        fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_process_relocates_document() {
        let (_dir, config, processor) =
            setup(ScriptedOcr::new("ORD-4521★", "Cabinet Job #2", "O'Brien & Sons"));
        let doc = drop_file(&config, "scan001.pdf", b"%PDF-1.7 body");

        let outcome = processor.process(&mut WorkItem::new(doc.clone()));
        let Outcome::Relocated(relocated) = outcome else {
            panic!("expected relocation");
        };

        let expected = config.output_root.join("OBrien Sons").join("ORD-4521_Cabinet Job 2.pdf");
        assert_eq!(relocated.path, expected);
        assert_eq!(fs::read(&expected).unwrap(), b"%PDF-1.7 body");
        assert!(!doc.exists());
    }

    #[test]
    fn test_unreadable_document_is_parked_in_place() {
        let (_dir, config, processor) = setup(ScriptedOcr::new("a", "b", "c"));
        let doc = drop_file(&config, "broken.pdf", b"not a pdf at all");

        let outcome = processor.process(&mut WorkItem::new(doc.clone()));
        let Outcome::Parked(record) = outcome else {
            panic!("expected parking");
        };

        assert_eq!(record.reason, ParkReason::DocumentUnreadable);
        assert_eq!(fs::read(&doc).unwrap(), b"not a pdf at all");
        assert_eq!(processor.parking().records_for(&doc).unwrap().len(), 1);
    }

    #[test]
    fn test_degraded_extraction_uses_fallbacks() {
        let (_dir, config, processor) = setup(ScriptedOcr::new("", "", "★★★"));
        let doc = drop_file(&config, "scan 7.pdf", b"%PDF");

        let Outcome::Relocated(relocated) = processor.process(&mut WorkItem::new(doc)) else {
            panic!("expected relocation");
        };

        assert_eq!(
            relocated.path.parent().unwrap(),
            config.output_root.join("unclassified")
        );
        let name = relocated.path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("scan 7_"), "{name}");
        assert!(name.ends_with(".pdf"), "{name}");
    }

    #[test]
    fn test_inspect_moves_nothing() {
        let (_dir, config, processor) = setup(ScriptedOcr::new("ORD-1", "Job", "Acme"));
        let doc = drop_file(&config, "scan.PDF", b"%PDF");

        let inspection = processor.inspect(&doc).unwrap();
        assert_eq!(inspection.sanitized.dealer_name, "Acme");
        assert_eq!(inspection.plan.new_file_name, "ORD-1_Job.pdf");
        assert_eq!(inspection.plan.destination_folder, config.output_root.join("Acme"));
        assert!(doc.exists());
        assert!(!config.output_root.exists());
        assert!(!config.parked_dir().exists());
    }

    #[test]
    fn test_prepare_creates_output_and_parked_dirs() {
        let (_dir, config, processor) = setup(ScriptedOcr::new("a", "b", "c"));
        assert!(!config.output_root.exists());

        processor.prepare().unwrap();
        assert!(config.output_root.is_dir());
        assert!(config.parked_dir().is_dir());
    }

    #[test]
    fn test_attempts_recorded_on_item() {
        let (_dir, config, processor) = setup(ScriptedOcr::new("ORD-1", "Job", "Acme"));
        let mut item = WorkItem::new(drop_file(&config, "scan.pdf", b"%PDF"));
        assert_eq!(item.attempt_count, 0);

        assert!(processor.process(&mut item).is_relocated());
        assert_eq!(item.attempt_count, 1);
    }

    #[test]
    fn test_dealer_named_like_parked_dir_goes_to_fallback() {
        let (_dir, config, processor) = setup(ScriptedOcr::new("ORD-1", "Job", "parked"));
        let doc = drop_file(&config, "scan.pdf", b"%PDF");

        let Outcome::Relocated(relocated) = processor.process(&mut WorkItem::new(doc)) else {
            panic!("expected relocation");
        };
        assert_eq!(
            relocated.path,
            config.output_root.join("unclassified").join("ORD-1_Job.pdf")
        );
        assert!(processor.parking().list().unwrap().is_empty());
    }

    #[test]
    fn test_vanished_document_is_parked() {
        let (_dir, config, processor) = setup(ScriptedOcr::new("a", "b", "c"));
        let doc = config.input_dir.join("gone.pdf");

        let outcome = processor.process(&mut WorkItem::new(doc));
        assert!(outcome.is_parked());
    }

    #[test]
    fn test_check_backends_with_fakes() {
        let (_dir, _config, processor) = setup(ScriptedOcr::new("a", "b", "c"));
        assert!(processor.check_backends().is_ok());
    }

    #[test]
    fn test_profiler_accumulates() {
        let mut profiler = StepProfiler::new();
        let value = profiler.time_step("one", || 41 + 1);
        profiler.time_step("two", || ());
        assert_eq!(value, 42);
        assert_eq!(profiler.timings.len(), 2);
        assert!(profiler.total() >= profiler.timings[0].1);
    }
}
