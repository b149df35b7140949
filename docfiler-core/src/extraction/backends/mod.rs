//! Rasterizer and OCR backend traits
//!
//! The extractor only ever talks to these two traits. Concrete backends shell
//! out to poppler and tesseract; the fakes render blank pages and return
//! scripted text so the pipeline can be exercised without either installed.

use crate::types::Field;
use anyhow::Result;
use image::DynamicImage;
use std::path::Path;

/// Turns one page of a document into a raster image.
///
/// Implementations fail when the document is unreadable, corrupt or has no
/// page at the requested index.
pub trait PageRasterizer: Send + Sync {
    /// Render page `page` (1-indexed) of the document at `path`
    fn render_page(&self, path: &Path, page: u32) -> Result<DynamicImage>;

    /// Backend identifier for logging/debugging
    fn name(&self) -> &str;

    /// Check if backend is ready (binary present, library loaded)
    fn is_healthy(&self) -> bool;
}

/// Best-effort text recognition over an image region.
///
/// Garbage input yields empty or noisy text, not an error. Errors are reserved
/// for the engine itself being unusable for this region.
pub trait OcrEngine: Send + Sync {
    /// Recognize text in `region`; `field` names which region this is
    fn recognize(&self, region: &DynamicImage, field: Field) -> Result<String>;

    /// Backend identifier for logging/debugging
    fn name(&self) -> &str;

    /// Check if backend is ready
    fn is_healthy(&self) -> bool;
}

pub mod fake;
pub mod poppler;
pub mod tesseract;

pub use fake::{FakeRasterizer, ScriptedOcr};
pub use poppler::PopplerRasterizer;
pub use tesseract::TesseractOcr;

/// True if `program <version_flag>` runs and exits successfully.
pub(crate) fn program_available(program: &str, version_flag: &str) -> bool {
    std::process::Command::new(program)
        .arg(version_flag)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}
