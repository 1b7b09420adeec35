//! Error types for the edgequake-pdfchat library.
//!
//! Three error types map onto three failure scopes:
//!
//! * [`PdfChatError`] — the requested *operation* cannot proceed (bad input
//!   file, provider not configured, no document uploaded yet). The session
//!   itself stays usable; nothing here is fatal to the process.
//!
//! * [`PageError`] — **Non-fatal**: one model request of an evidence scan
//!   failed (transient API error, timeout). The page or batch is skipped and
//!   the scan carries on. Collected in [`crate::output::ScanReport`].
//!
//! * [`ModelError`] — raw failure reported by the model collaborator. Never
//!   surfaces to callers as-is: the collector turns it into a `PageError`,
//!   the synthesizer into a "could not generate a combined answer" reply.

use edgequake_llm::LlmError;
use std::path::PathBuf;
use thiserror::Error;

/// Operation-level errors returned by the edgequake-pdfchat library.
#[derive(Debug, Error)]
pub enum PdfChatError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The upload was read, but is not a PDF.
    #[error("'{source_name}' is not a valid PDF (first bytes: {magic:?})")]
    NotAPdf { source_name: String, magic: Vec<u8> },

    // ── PDF errors ────────────────────────────────────────────────────────
    #[error("PDF '{source_name}' is corrupt: {detail}")]
    CorruptPdf { source_name: String, detail: String },

    #[error("PDF '{source_name}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { source_name: String },

    #[error("Wrong password for PDF '{source_name}'")]
    WrongPassword { source_name: String },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Model errors ──────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Conversation errors ───────────────────────────────────────────────
    /// A query arrived before any document was ingested.
    #[error("No document has been uploaded yet. Upload a PDF first; processing it may take a while.")]
    NoDocument,

    /// The user query was empty or whitespace only.
    #[error("Query is empty")]
    EmptyQuery,

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Reading or writing the evidence dump file failed.
    #[error("Evidence file '{path}': {source}")]
    EvidenceIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal failure of a single collector request.
///
/// `page` is the 1-indexed first page covered by the request and `pages` the
/// number of pages it carried (1 in per-page mode).
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The model request failed after retries.
    #[error("Page {page} (+{} more): model request failed after {retries} retries: {detail}", .pages.saturating_sub(1))]
    ModelFailed {
        page: usize,
        pages: usize,
        retries: u32,
        detail: String,
    },

    /// The model request was cancelled because it exceeded the timeout.
    #[error("Page {page} (+{} more): model request timed out after {secs}s", .pages.saturating_sub(1))]
    Timeout { page: usize, pages: usize, secs: u64 },
}

impl PageError {
    /// 1-indexed first page covered by the failed request.
    pub fn page(&self) -> usize {
        match self {
            PageError::ModelFailed { page, .. } | PageError::Timeout { page, .. } => *page,
        }
    }
}

/// Failure reported by the external model service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// HTTP-level or provider error.
    #[error("model API error: {message}")]
    Api { message: String },

    /// The request did not complete in time.
    #[error("model request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The provider answered with no usable text (empty choice list).
    #[error("model returned an empty response")]
    EmptyResponse,

    /// The provider answered with something that could not be decoded.
    #[error("malformed model response: {0}")]
    Malformed(String),

    /// The provider does not offer the requested delivery mode.
    #[error("not supported by the model provider: {0}")]
    Unsupported(String),
}

impl From<LlmError> for ModelError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::SerializationError(inner) => ModelError::Malformed(inner.to_string()),
            LlmError::NotSupported(what) => ModelError::Unsupported(what),
            other => ModelError::Api {
                message: other.to_string(),
            },
        }
    }
}
