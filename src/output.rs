//! Result types returned by a chat session.

use crate::error::PageError;
use serde::Serialize;

/// Statistics for one evidence scan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    /// Scan number within the current document (1 = bootstrap scan).
    pub scan: u32,
    /// Query the pages were scanned with.
    pub query: String,
    /// Pages in the document.
    pub pages: usize,
    /// Requests the scan was planned to issue (excluding retries).
    pub requests: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Evidence records added to the corpus by this scan.
    pub records_appended: usize,
    /// One entry per skipped page or batch.
    pub errors: Vec<PageError>,
    pub duration_ms: u64,
}

impl ScanReport {
    /// True when no request of the scan failed.
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// How the answer text came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerOutcome {
    /// The model merged the evidence into an answer.
    Answered,
    /// There was no evidence to merge; the text is the canned no-data reply.
    NoData,
    /// The consolidation request failed; the text is the canned apology.
    Failed,
}

/// Which path of the session produced a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerPath {
    /// Automatic first scan after a document was ingested.
    BootstrapScan,
    /// Normal question answered from retrieved evidence.
    Retrieval,
    /// Deep-analysis question: fresh scan, then the whole corpus.
    DeepScan,
}

/// One assistant reply.
#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    /// Text shown to the user and stored in the conversation history.
    pub text: String,
    pub outcome: AnswerOutcome,
    pub path: AnswerPath,
    /// Evidence fragments handed to the synthesizer.
    pub fragments_used: usize,
    /// Present when the reply triggered a scan.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan: Option<ScanReport>,
    /// Parsed JSON report, in JSON report mode when the model complied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<serde_json::Value>,
}
