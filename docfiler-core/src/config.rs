use crate::error::{FilerError, FilerResult};
use crate::sanitizer::sanitize;
use crate::types::Field;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("inbox")
}

fn default_output_root() -> PathBuf {
    PathBuf::from("filed")
}

fn default_extensions() -> Vec<String> {
    vec!["pdf".to_string()]
}

fn default_fallback_key() -> String {
    "unclassified".to_string()
}

/// Top-level configuration, loaded once at startup and validated before the
/// watcher starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilerConfig {
    /// Directory the external producer drops documents into
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,
    /// Root under which `<destination_key>/` folders are created
    #[serde(default = "default_output_root")]
    pub output_root: PathBuf,
    /// Where parked-document records go (default: `<output_root>/parked`)
    #[serde(default)]
    pub parked_dir: Option<PathBuf>,
    /// Accepted file extensions, compared case-insensitively
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Destination key used when the dealer region yields nothing usable
    #[serde(default = "default_fallback_key")]
    pub fallback_key: String,
    /// Feed files already sitting in the input directory through the pipeline on startup
    #[serde(default = "default_true")]
    pub rescan_on_startup: bool,
    #[serde(default)]
    pub regions: RegionsConfig,
    #[serde(default)]
    pub settle: SettleConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub relocation: RelocationConfig,
    #[serde(default)]
    pub backends: BackendConfig,
}

/// A rectangle in the rasterized page's pixel space. `x2`/`y2` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl Region {
    pub const fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }

    pub fn is_degenerate(&self) -> bool {
        self.x1 >= self.x2 || self.y1 >= self.y2
    }

    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        !self.is_degenerate() && self.x2 <= width && self.y2 <= height
    }

    pub fn overlaps(&self, other: &Region) -> bool {
        self.x1 < other.x2 && other.x1 < self.x2 && self.y1 < other.y2 && other.y1 < self.y2
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {}, {})", self.x1, self.y1, self.x2, self.y2)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionsConfig {
    /// Expected width of the rendered first page in pixels
    pub page_width: u32,
    /// Expected height of the rendered first page in pixels
    pub page_height: u32,
    pub order_number: Region,
    pub job_name: Region,
    pub dealer_name: Region,
}

impl RegionsConfig {
    pub fn region(&self, field: Field) -> Region {
        match field {
            Field::OrderNumber => self.order_number,
            Field::JobName => self.job_name,
            Field::DealerName => self.dealer_name,
        }
    }

    /// Regions in extraction order.
    pub fn fields(&self) -> [(Field, Region); 3] {
        Field::ALL.map(|field| (field, self.region(field)))
    }
}

impl Default for RegionsConfig {
    fn default() -> Self {
        // Letter-size intake form rendered at 200 DPI
        Self {
            page_width: 1700,
            page_height: 2200,
            order_number: Region::new(1300, 250, 1500, 400),
            job_name: Region::new(250, 760, 600, 800),
            dealer_name: Region::new(90, 500, 600, 557),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettleConfig {
    /// Interval between size/mtime checks
    pub poll_interval_ms: u64,
    /// Give up and park the file after this long without two matching checks
    pub max_wait_ms: u64,
}

impl SettleConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            max_wait_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of documents processed concurrently
    pub count: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { count: 2 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelocationConfig {
    /// Retries after the first failed move attempt
    pub max_retries: u32,
    /// Backoff before retry n is `backoff_base_ms * 2^(n-1)`
    pub backoff_base_ms: u64,
    /// Highest ` (n)` suffix tried before giving up on a name
    pub max_collision_suffix: u32,
    /// Longest order-number or job-name segment kept in a filename
    pub max_segment_len: usize,
}

impl RelocationConfig {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }
}

impl Default for RelocationConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 200,
            max_collision_suffix: 9999,
            max_segment_len: 100,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub rasterizer: RasterizerConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasterizerConfig {
    /// Poppler `pdftoppm` binary
    pub program: String,
    /// Must match the DPI the region coordinates were measured at
    pub dpi: u32,
}

impl Default for RasterizerConfig {
    fn default() -> Self {
        Self {
            program: "pdftoppm".to_string(),
            dpi: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    /// Tesseract binary
    pub program: String,
    pub language: String,
    /// Tesseract page segmentation mode; 7 treats each region as one text line
    pub psm: u32,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            program: "tesseract".to_string(),
            language: "eng".to_string(),
            psm: 7,
        }
    }
}

impl Default for FilerConfig {
    fn default() -> Self {
        Self {
            input_dir: default_input_dir(),
            output_root: default_output_root(),
            parked_dir: None,
            extensions: default_extensions(),
            fallback_key: default_fallback_key(),
            rescan_on_startup: true,
            regions: RegionsConfig::default(),
            settle: SettleConfig::default(),
            workers: WorkerConfig::default(),
            relocation: RelocationConfig::default(),
            backends: BackendConfig::default(),
        }
    }
}

impl FilerConfig {
    /// Load config from a YAML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: FilerConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Load and validate in one step, folding any failure into `ConfigInvalid`.
    pub fn load_validated(path: &Path) -> FilerResult<Self> {
        let config =
            Self::load_from_file(path).map_err(|e| FilerError::ConfigInvalid(format!("{e:#}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn parked_dir(&self) -> PathBuf {
        self.parked_dir
            .clone()
            .unwrap_or_else(|| self.output_root.join("parked"))
    }

    /// Folder names under `output_root` that no dealer may be filed into
    pub fn reserved_keys(&self) -> Vec<String> {
        let parked = resolve_path(&self.parked_dir());
        match (parked.parent(), parked.file_name()) {
            (Some(parent), Some(name)) if parent == resolve_path(&self.output_root) => {
                vec![name.to_string_lossy().into_owned()]
            }
            _ => Vec::new(),
        }
    }

    /// True if `path` carries one of the accepted extensions.
    pub fn accepts_extension(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.extensions
            .iter()
            .any(|accepted| accepted.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }

    /// Check everything that can be checked before watching begins. All
    /// problems are reported together.
    pub fn validate(&self) -> FilerResult<()> {
        let mut problems = Vec::new();

        if !self.input_dir.is_dir() {
            problems.push(format!(
                "input_dir {} is not an existing directory",
                self.input_dir.display()
            ));
        }
        problems.extend(self.layout_problems());
        if self.extensions.is_empty() {
            problems.push("extensions must list at least one extension".to_string());
        }
        let key = sanitize(&self.fallback_key);
        if key.is_empty() || key != self.fallback_key || key.chars().all(|c| c == '.') {
            problems.push(format!(
                "fallback_key {:?} must be a non-empty, already-safe folder name",
                self.fallback_key
            ));
        }
        if self.workers.count == 0 {
            problems.push("workers.count must be at least 1".to_string());
        }
        if self.settle.poll_interval_ms == 0 {
            problems.push("settle.poll_interval_ms must be greater than 0".to_string());
        } else if self.settle.poll_interval_ms > self.settle.max_wait_ms {
            problems.push("settle.poll_interval_ms must not exceed settle.max_wait_ms".to_string());
        }
        if self.relocation.max_segment_len == 0 {
            problems.push("relocation.max_segment_len must be greater than 0".to_string());
        }
        if self.backends.rasterizer.dpi == 0 {
            problems.push("backends.rasterizer.dpi must be greater than 0".to_string());
        }

        problems.extend(self.region_problems());

        if problems.is_empty() {
            Ok(())
        } else {
            Err(FilerError::ConfigInvalid(problems.join("; ")))
        }
    }

    /// Filed documents and parked records must never land where the watcher
    /// picks up new arrivals.
    fn layout_problems(&self) -> Vec<String> {
        let input = resolve_path(&self.input_dir);
        let output = resolve_path(&self.output_root);
        let parked = resolve_path(&self.parked_dir());
        let mut problems = Vec::new();

        if input == output {
            problems.push("output_root must differ from input_dir".to_string());
        } else if input.starts_with(&output) {
            problems.push(format!(
                "input_dir {} must not be inside output_root {}",
                self.input_dir.display(),
                self.output_root.display()
            ));
        }
        if parked == input {
            problems.push("parked_dir must differ from input_dir".to_string());
        }
        if self
            .reserved_keys()
            .iter()
            .any(|key| key.eq_ignore_ascii_case(&self.fallback_key))
        {
            problems.push(format!(
                "fallback_key {:?} names the parked directory",
                self.fallback_key
            ));
        }

        problems
    }

    fn region_problems(&self) -> Vec<String> {
        let regions = &self.regions;
        let mut problems = Vec::new();

        for (field, region) in regions.fields() {
            if region.is_degenerate() {
                problems.push(format!("regions.{field} {region} is empty or inverted"));
            } else if !region.fits_within(regions.page_width, regions.page_height) {
                problems.push(format!(
                    "regions.{field} {region} lies outside the {}x{} page",
                    regions.page_width, regions.page_height
                ));
            }
        }

        let all = regions.fields();
        for (i, (field_a, a)) in all.iter().enumerate() {
            for (field_b, b) in &all[i + 1..] {
                if a.overlaps(b) {
                    problems.push(format!("regions.{field_a} overlaps regions.{field_b}"));
                }
            }
        }

        problems
    }
}

/// Absolute form of `path` with symlinks resolved for the part that exists.
/// Components that do not exist yet are appended as written.
pub(crate) fn resolve_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    };

    let mut existing = absolute.as_path();
    let mut missing = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            return missing
                .iter()
                .rev()
                .fold(canonical, |resolved, part| resolved.join(part));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return absolute,
        }
    }
}
