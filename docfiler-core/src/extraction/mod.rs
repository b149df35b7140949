//! Region Extraction
//!
//! Reads the three identifying fields off page one of a document.
//!
//! ## Architecture
//!
//! ```text
//! Document (PDF)
//!     ↓
//! [PageRasterizer]   page 1 → raster image
//!     ↓
//! crop order_number / job_name / dealer_name regions
//!     ↓
//! [OcrEngine] × 3    one call per region
//!     ↓
//! ExtractedFields (raw text)
//! ```
//!
//! ## Available Backends
//!
//! - `PopplerRasterizer` - `pdftoppm` from poppler-utils
//! - `TesseractOcr` - the `tesseract` CLI
//! - `FakeRasterizer` / `ScriptedOcr` - in-memory doubles for tests

pub mod backends;

pub use backends::{OcrEngine, PageRasterizer};

use crate::config::RegionsConfig;
use crate::error::{FilerError, FilerResult};
use crate::types::ExtractedFields;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct RegionExtractor {
    rasterizer: Arc<dyn PageRasterizer>,
    ocr: Arc<dyn OcrEngine>,
    regions: RegionsConfig,
}

impl RegionExtractor {
    pub fn new(
        rasterizer: Arc<dyn PageRasterizer>,
        ocr: Arc<dyn OcrEngine>,
        regions: RegionsConfig,
    ) -> Self {
        Self {
            rasterizer,
            ocr,
            regions,
        }
    }

    /// Names of backends that report themselves unusable
    pub fn unhealthy_backends(&self) -> Vec<&str> {
        let mut unhealthy = Vec::new();
        if !self.rasterizer.is_healthy() {
            unhealthy.push(self.rasterizer.name());
        }
        if !self.ocr.is_healthy() {
            unhealthy.push(self.ocr.name());
        }
        unhealthy
    }

    /// Render page one and OCR each configured region.
    ///
    /// Rendering failures and pages too small for the configured regions are
    /// `DocumentUnreadable`. OCR failures on a single region leave that field
    /// empty; they never fail the extraction.
    pub fn extract(&self, path: &Path) -> FilerResult<ExtractedFields> {
        let page = self
            .rasterizer
            .render_page(path, 1)
            .map_err(|e| FilerError::DocumentUnreadable {
                path: path.to_path_buf(),
                reason: format!("{e:#}"),
            })?;

        let (width, height) = (page.width(), page.height());
        debug!(path = %path.display(), width, height, "Rendered first page");

        for (field, region) in self.regions.fields() {
            if !region.fits_within(width, height) {
                return Err(FilerError::DocumentUnreadable {
                    path: path.to_path_buf(),
                    reason: format!(
                        "page rendered at {width}x{height}, {field} region {region} is out of bounds"
                    ),
                });
            }
        }

        let mut fields = ExtractedFields::default();
        for (field, region) in self.regions.fields() {
            let crop = page.crop_imm(region.x1, region.y1, region.width(), region.height());
            let text = match self.ocr.recognize(&crop, field) {
                Ok(text) => text,
                Err(e) => {
                    let error = format!("{e:#}");
                    warn!(
                        path = %path.display(),
                        %field,
                        %error,
                        "OCR failed on region, treating field as empty"
                    );
                    String::new()
                }
            };
            fields.set(field, text);
        }

        Ok(fields)
    }
}
