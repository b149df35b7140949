//! Tesseract OCR backend
//!
//! Writes the cropped region to a temporary PNG and runs
//! `tesseract <png> stdout -l <lang> --psm <n>`.

use super::{program_available, OcrEngine};
use crate::config::OcrConfig;
use crate::types::Field;
use anyhow::{bail, Context, Result};
use image::{DynamicImage, ImageFormat};
use std::process::Command;
use tracing::trace;

pub struct TesseractOcr {
    program: String,
    language: String,
    psm: u32,
}

impl TesseractOcr {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            program: config.program.clone(),
            language: config.language.clone(),
            psm: config.psm,
        }
    }
}

impl OcrEngine for TesseractOcr {
    fn recognize(&self, region: &DynamicImage, field: Field) -> Result<String> {
        if region.width() == 0 || region.height() == 0 {
            bail!("{field} region is empty");
        }

        let scratch = tempfile::Builder::new()
            .prefix(field.label())
            .suffix(".png")
            .tempfile()
            .context("creating OCR scratch file")?;
        region
            .save_with_format(scratch.path(), ImageFormat::Png)
            .context("writing OCR scratch image")?;

        let output = Command::new(&self.program)
            .arg(scratch.path())
            .arg("stdout")
            .args(["-l", &self.language])
            .args(["--psm", &self.psm.to_string()])
            .output()
            .with_context(|| {
                format!(
                    "failed to run {} (is tesseract installed?)",
                    self.program
                )
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} exited with code {}: {}",
                self.program,
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        trace!(%field, text = %text.trim(), "OCR result");
        Ok(text)
    }

    fn name(&self) -> &str {
        "tesseract"
    }

    fn is_healthy(&self) -> bool {
        program_available(&self.program, "--version")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn missing() -> TesseractOcr {
        TesseractOcr::new(&OcrConfig {
            program: "/nonexistent/tesseract".to_string(),
            ..OcrConfig::default()
        })
    }

    #[test]
    fn test_missing_binary_is_unhealthy() {
        assert!(!missing().is_healthy());
    }

    #[test]
    fn test_empty_region_rejected() {
        let empty = DynamicImage::new_luma8(0, 0);
        assert!(missing().recognize(&empty, Field::JobName).is_err());
    }

    #[test]
    fn test_missing_binary_errors() {
        let region = DynamicImage::new_luma8(20, 10);
        let err = missing().recognize(&region, Field::OrderNumber).unwrap_err();
        assert!(format!("{err:#}").contains("tesseract"));
    }
}
