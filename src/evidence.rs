//! Evidence store: the per-document corpus of collected model answers.
//!
//! Every collector request that succeeds appends one [`EvidenceRecord`].
//! Records are first-class (page span, scan number, creation order), so
//! retrieval works on records directly instead of re-splitting a flat
//! string. The flat form still exists for the evidence dump file: records
//! joined with a literal marker, split back on that marker when loaded.
//!
//! The corpus is append-only. The only way to drop records is ingesting a
//! new document, which the session does through [`EvidenceCorpus::reset`].

use crate::error::PdfChatError;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::ops::Range;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// One collected model answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    /// Position in collection order, starting at 0.
    pub seq: usize,
    /// Scan that produced the record (1 = bootstrap scan).
    pub scan: u32,
    /// 0-based pages the request carried. `None` for records loaded from a
    /// dump file, where page attribution is not kept.
    pub pages: Option<Range<usize>>,
    /// Raw model response text.
    pub text: String,
    /// Wall-clock creation time, milliseconds since the Unix epoch.
    pub collected_at_ms: u64,
}

/// A retrievable slice of evidence, attributable to one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    /// Position of the source record in the corpus.
    pub position: usize,
    pub pages: Option<Range<usize>>,
    pub text: String,
}

impl Fragment {
    pub fn new(position: usize, pages: Option<Range<usize>>, text: impl Into<String>) -> Self {
        Self {
            position,
            pages,
            text: text.into(),
        }
    }

    /// Human-readable, 1-indexed page span: "page 3" or "pages 1-13".
    pub fn page_label(&self) -> Option<String> {
        let pages = self.pages.as_ref()?;
        match pages.len() {
            0 => None,
            1 => Some(format!("page {}", pages.start + 1)),
            _ => Some(format!("pages {}-{}", pages.start + 1, pages.end)),
        }
    }
}

/// The ordered evidence collected for the current document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvidenceCorpus {
    records: Vec<EvidenceRecord>,
    scans: u32,
}

impl EvidenceCorpus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new scan and return its number.
    pub fn begin_scan(&mut self) -> u32 {
        self.scans += 1;
        self.scans
    }

    /// Number of scans opened since the last reset.
    pub fn scan_count(&self) -> u32 {
        self.scans
    }

    /// Append one record. Existing records are never touched.
    pub fn append(
        &mut self,
        scan: u32,
        pages: Option<Range<usize>>,
        text: impl Into<String>,
    ) -> &EvidenceRecord {
        let record = EvidenceRecord {
            seq: self.records.len(),
            scan,
            pages,
            text: text.into(),
            collected_at_ms: now_ms(),
        };
        debug!(
            "Evidence #{} appended (scan {}, {} chars)",
            record.seq,
            record.scan,
            record.text.len()
        );
        self.records.push(record);
        &self.records[self.records.len() - 1]
    }

    pub fn records(&self) -> &[EvidenceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop all records and scan numbers. Called only when a new document
    /// replaces the current one.
    pub(crate) fn reset(&mut self) {
        self.records.clear();
        self.scans = 0;
    }

    /// Every non-blank record as a fragment, in collection order.
    pub fn fragments(&self) -> Vec<Fragment> {
        self.records
            .iter()
            .filter(|r| !r.text.trim().is_empty())
            .map(|r| Fragment::new(r.seq, r.pages.clone(), r.text.clone()))
            .collect()
    }

    /// Flatten the corpus: each record prefixed with `marker`.
    pub fn to_tagged_text(&self, marker: &str) -> String {
        let mut out = String::new();
        for record in &self.records {
            out.push_str(marker);
            out.push_str(record.text.trim_end());
            out.push('\n');
        }
        out
    }

    /// Rebuild a corpus from flattened text. Page spans are not recoverable;
    /// each non-blank piece between markers becomes one record of scan 1.
    pub fn from_tagged_text(text: &str, marker: &str) -> Self {
        let mut corpus = Self::new();
        let pieces = split_tagged(text, marker);
        if pieces.is_empty() {
            return corpus;
        }
        let scan = corpus.begin_scan();
        for piece in pieces {
            corpus.append(scan, None, piece);
        }
        corpus
    }

    /// Write the flattened corpus to `path`, atomically.
    pub async fn dump_to_file(&self, path: &Path, marker: &str) -> Result<(), PdfChatError> {
        let text = self.to_tagged_text(marker);
        let target = path.to_path_buf();
        let count = self.records.len();

        tokio::task::spawn_blocking(move || write_atomic(&target, &text))
            .await
            .map_err(|e| PdfChatError::Internal(format!("Dump task panicked: {e}")))??;

        info!("Wrote {} evidence records to {}", count, path.display());
        Ok(())
    }

    /// Load a corpus previously written by [`EvidenceCorpus::dump_to_file`].
    pub async fn load_from_file(path: &Path, marker: &str) -> Result<Self, PdfChatError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PdfChatError::EvidenceIo {
                path: path.to_path_buf(),
                source: e,
            })?;
        let corpus = Self::from_tagged_text(&text, marker);
        info!(
            "Loaded {} evidence records from {}",
            corpus.len(),
            path.display()
        );
        Ok(corpus)
    }
}

/// Split flattened evidence on `marker`, trimming each piece and dropping
/// blank ones. Text without any marker yields a single piece.
pub fn split_tagged(text: &str, marker: &str) -> Vec<String> {
    let marker = if marker.is_empty() { "\u{0}" } else { marker };
    text.split(marker)
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .map(str::to_string)
        .collect()
}

fn write_atomic(path: &Path, text: &str) -> Result<(), PdfChatError> {
    let io_err = |source: std::io::Error| PdfChatError::EvidenceIo {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent).map_err(io_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&parent).map_err(io_err)?;
    tmp.write_all(text.as_bytes()).map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
