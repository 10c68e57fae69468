use crate::traits::TextRecognizer;
use crate::types::Result;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Rasterises pages with `pdftoppm` and reads them with `tesseract`.
/// Missing tools yield empty text rather than an error.
pub struct TesseractRecognizer {
    language: String,
    resolution_dpi: u32,
    timeout: Duration,
}

impl TesseractRecognizer {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            resolution_dpi: 300,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, program: &str, args: &[&str]) -> Option<Vec<u8>> {
        let output = Command::new(program).args(args).kill_on_drop(true).output();
        match tokio::time::timeout(self.timeout, output).await {
            Ok(Ok(output)) if output.status.success() => Some(output.stdout),
            Ok(Ok(output)) => {
                warn!(
                    "{} exited with {}: {}",
                    program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                None
            }
            Ok(Err(e)) => {
                warn!("{} unavailable: {}", program, e);
                None
            }
            Err(_) => {
                warn!("{} timed out after {:?}", program, self.timeout);
                None
            }
        }
    }
}

#[async_trait]
impl TextRecognizer for TesseractRecognizer {
    fn recognizer_name(&self) -> String {
        format!("tesseract ({})", self.language)
    }

    async fn recognize_pdf(&self, pdf_bytes: &[u8]) -> Result<String> {
        let workdir = tempfile::tempdir()?;
        let input = workdir.path().join("input.pdf");
        tokio::fs::write(&input, pdf_bytes).await?;

        let prefix = workdir.path().join("page");
        let dpi = self.resolution_dpi.to_string();
        let rendered = self
            .run(
                "pdftoppm",
                &["-r", &dpi, "-png", &path_arg(&input), &path_arg(&prefix)],
            )
            .await;
        if rendered.is_none() {
            return Ok(String::new());
        }

        let mut images = Vec::new();
        let mut entries = tokio::fs::read_dir(workdir.path()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "png") {
                images.push(path);
            }
        }
        // pdftoppm zero-pads page numbers, so lexical order is page order
        images.sort();
        debug!("Recognising {} rendered page(s)", images.len());

        let mut text = String::new();
        for image in &images {
            if let Some(stdout) = self
                .run("tesseract", &[&path_arg(image), "stdout", "-l", &self.language])
                .await
            {
                text.push_str(&String::from_utf8_lossy(&stdout));
                text.push('\n');
            }
        }

        Ok(text.trim().to_string())
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
