//! Poppler rasterizer backend
//!
//! Runs `pdftoppm` for a single page into a scratch directory and loads the
//! resulting PNG. Each call gets its own scratch directory, so concurrent
//! workers never share output files.

use super::{program_available, PageRasterizer};
use crate::config::RasterizerConfig;
use anyhow::{bail, Context, Result};
use image::DynamicImage;
use std::path::Path;
use std::process::Command;
use tracing::debug;

pub struct PopplerRasterizer {
    program: String,
    dpi: u32,
}

impl PopplerRasterizer {
    pub fn new(config: &RasterizerConfig) -> Self {
        Self {
            program: config.program.clone(),
            dpi: config.dpi,
        }
    }
}

impl PageRasterizer for PopplerRasterizer {
    fn render_page(&self, path: &Path, page: u32) -> Result<DynamicImage> {
        let scratch = tempfile::tempdir().context("creating rasterizer scratch directory")?;
        let prefix = scratch.path().join("page");
        let page_arg = page.to_string();

        debug!(path = %path.display(), page, dpi = self.dpi, "Rasterizing page");

        let output = Command::new(&self.program)
            .args(["-f", &page_arg, "-l", &page_arg])
            .args(["-r", &self.dpi.to_string()])
            .args(["-png", "-singlefile"])
            .arg(path)
            .arg(&prefix)
            .output()
            .with_context(|| {
                format!(
                    "failed to run {} (is poppler-utils installed?)",
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

        let rendered = prefix.with_extension("png");
        image::open(&rendered)
            .with_context(|| format!("loading rendered page {page} from {}", rendered.display()))
    }

    fn name(&self) -> &str {
        "pdftoppm"
    }

    fn is_healthy(&self) -> bool {
        program_available(&self.program, "-v")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_binary_is_unhealthy() {
        let rasterizer = PopplerRasterizer::new(&RasterizerConfig {
            program: "/nonexistent/pdftoppm".to_string(),
            dpi: 200,
        });
        assert!(!rasterizer.is_healthy());
    }

    #[test]
    fn test_missing_binary_errors_instead_of_panicking() {
        let rasterizer = PopplerRasterizer::new(&RasterizerConfig {
            program: "/nonexistent/pdftoppm".to_string(),
            dpi: 200,
        });
        let err = rasterizer
            .render_page(Path::new("/tmp/whatever.pdf"), 1)
            .unwrap_err();
        assert!(format!("{err:#}").contains("poppler-utils"));
    }
}
