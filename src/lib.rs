//! # edgequake-pdfchat
//!
//! Chat with multi-page PDF documents (construction plans, drawings, specs)
//! through Vision Language Models.
//!
//! ## Why this crate?
//!
//! A plan set is dozens of raster-heavy sheets; text extraction loses the
//! dimensions written on the drawings. Instead every page is rasterised and
//! shown to a VLM, once per page, and the many partial answers are merged
//! into one. Follow-up questions reuse the evidence already collected
//! instead of paying for another full pass over the document.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input      resolve local file or download from URL
//!  ├─ 2. Render     rasterise pages via pdfium (spawn_blocking) → PNG
//!  ├─ 3. Collect    one throttled VLM request per page (or batch) → evidence
//!  ├─ 4. Retrieve   fuzzy-rank cached evidence against a follow-up query
//!  ├─ 5. Synthesize one consolidation request → single answer
//!  └─ 6. Session    bootstrap once, then normal / deep-analysis questions
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdfchat::{ChatConfig, ChatSession, QueryMode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let mut session = ChatSession::new(ChatConfig::default())?;
//!
//!     let report = session.open("plans.pdf").await?;
//!     println!("{}", report.text);
//!
//!     let answer = session.ask("How much concrete?", QueryMode::Normal).await?;
//!     println!("{}", answer.text);
//!
//!     let deep = session.ask("List every roofing type", QueryMode::DeepAnalysis).await?;
//!     println!("{}", deep.text);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfchat` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-pdfchat = { version = "0.1", default-features = false }
//! ```
//!
//! ## Cost and Rate Limits
//!
//! The bootstrap and every deep-analysis question cost one request per page
//! (or per batch with [`ScanMode::Batched`]) plus one consolidation request.
//! Normal questions cost a single request. All requests of a session go
//! through one throttle (`request_delay_ms`, default 1s between starts).

// ── Modules ──────────────────────────────────────────────────────────────

pub mod collector;
pub mod config;
pub mod context;
pub mod document;
pub mod error;
pub mod evidence;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod retriever;
pub mod session;
pub mod synthesizer;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use collector::EvidenceCollector;
pub use config::{ChatConfig, ChatConfigBuilder, ReportFormat, ScanMode};
pub use context::{ConversationTurn, Role, SessionContext};
pub use document::{Document, Page};
pub use error::{ModelError, PageError, PdfChatError};
pub use evidence::{EvidenceCorpus, EvidenceRecord, Fragment};
pub use output::{AnswerOutcome, AnswerPath, Reply, ScanReport};
pub use pipeline::input::PdfUpload;
pub use pipeline::model::{ModelClient, ModelRequest, ProviderModel, TextStream};
pub use pipeline::render::{PdfiumRasterizer, Rasterizer};
pub use pipeline::throttle::Throttle;
pub use progress::{NoopProgressCallback, ProgressCallback, ScanProgressCallback};
pub use retriever::{EvidenceRetriever, FuzzyRetriever, ScoredFragment};
pub use session::{ChatSession, QueryMode, SessionState};
pub use synthesizer::{AnswerSynthesizer, Synthesis};
