//! In-memory backends for tests and dry runs
//!
//! `FakeRasterizer` treats any file starting with the `%PDF` magic as a
//! one-page document and renders a blank page; anything else is unreadable.
//! `ScriptedOcr` returns fixed text per field regardless of pixels, optionally
//! after a fixed delay.

use super::{OcrEngine, PageRasterizer};
use crate::types::Field;
use anyhow::{bail, Context, Result};
use image::DynamicImage;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const PDF_MAGIC: &[u8] = b"%PDF";

pub struct FakeRasterizer {
    width: u32,
    height: u32,
}

impl FakeRasterizer {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl PageRasterizer for FakeRasterizer {
    fn render_page(&self, path: &Path, page: u32) -> Result<DynamicImage> {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        if !bytes.starts_with(PDF_MAGIC) {
            bail!("not a PDF document");
        }
        if page != 1 {
            bail!("document has 1 page, page {page} requested");
        }
        Ok(DynamicImage::new_rgb8(self.width, self.height))
    }

    fn name(&self) -> &str {
        "fake-rasterizer"
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

#[derive(Default)]
pub struct ScriptedOcr {
    texts: HashMap<Field, String>,
    failing: HashSet<Field>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedOcr {
    pub fn new(order_number: &str, job_name: &str, dealer_name: &str) -> Self {
        let texts = HashMap::from([
            (Field::OrderNumber, order_number.to_string()),
            (Field::JobName, job_name.to_string()),
            (Field::DealerName, dealer_name.to_string()),
        ]);
        Self {
            texts,
            ..Self::default()
        }
    }

    /// Make recognition of `field` fail outright.
    pub fn failing_on(mut self, field: Field) -> Self {
        self.failing.insert(field);
        self
    }

    /// Sleep this long on every call, standing in for a slow engine.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OcrEngine for ScriptedOcr {
    fn recognize(&self, region: &DynamicImage, field: Field) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if region.width() == 0 || region.height() == 0 {
            bail!("{field} region is empty");
        }
        if self.failing.contains(&field) {
            bail!("scripted failure for {field}");
        }
        Ok(self.texts.get(&field).cloned().unwrap_or_default())
    }

    fn name(&self) -> &str {
        "scripted-ocr"
    }

    fn is_healthy(&self) -> bool {
        true
    }
}
