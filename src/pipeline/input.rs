//! Input resolution: turn a user-supplied path or URL into PDF bytes.
//!
//! The rasterizer works on an in-memory buffer, so both local files and
//! downloads end up as a [`PdfUpload`]: the raw bytes plus a display name.
//! The `%PDF` magic bytes are checked here so callers get a meaningful
//! error instead of a pdfium failure.

use crate::error::PdfChatError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// An uploaded document: a single PDF-shaped blob.
#[derive(Debug, Clone)]
pub struct PdfUpload {
    /// File name or URL, used in logs and error messages.
    pub name: String,
    pub bytes: Vec<u8>,
}

impl PdfUpload {
    /// Wrap an in-memory upload, validating that it looks like a PDF.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, PdfChatError> {
        let name = name.into();
        validate_pdf(&name, &bytes)?;
        Ok(Self { name, bytes })
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve a local path or HTTP(S) URL to a validated upload.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<PdfUpload, PdfChatError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(PdfChatError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        read_local(Path::new(input)).await
    }
}

async fn read_local(path: &Path) -> Result<PdfUpload, PdfChatError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => PdfChatError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => PdfChatError::FileNotFound {
            path: PathBuf::from(path),
        },
    })?;

    debug!("Read local PDF: {} ({} bytes)", path.display(), bytes.len());
    PdfUpload::from_bytes(path.display().to_string(), bytes)
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<PdfUpload, PdfChatError> {
    info!("Downloading PDF from {}", url);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| PdfChatError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            PdfChatError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            PdfChatError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(PdfChatError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| PdfChatError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    info!("Downloaded {} bytes", bytes.len());
    PdfUpload::from_bytes(url, bytes.to_vec())
}

/// Reject buffers that do not start with the `%PDF` magic bytes.
pub fn validate_pdf(name: &str, bytes: &[u8]) -> Result<(), PdfChatError> {
    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        return Err(PdfChatError::NotAPdf {
            source_name: name.to_string(),
            magic: bytes.iter().take(4).copied().collect(),
        });
    }
    Ok(())
}
