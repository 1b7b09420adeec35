//! Configuration types for a document chat session.
//!
//! All session behaviour is controlled through [`ChatConfig`], built via its
//! [`ChatConfigBuilder`]. One struct holds every knob (rendering, model,
//! throttling, retrieval) so a config can be logged or diffed as a whole.

use crate::error::PdfChatError;
use crate::progress::ProgressCallback;
use crate::prompts::DEFAULT_EVIDENCE_MARKER;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default number of pages per request in [`ScanMode::Batched`].
pub const DEFAULT_BATCH_SIZE: usize = 13;

/// Configuration for a document chat session.
///
/// # Example
/// ```rust
/// use edgequake_pdfchat::{ChatConfig, ScanMode};
///
/// let config = ChatConfig::builder()
///     .request_delay_ms(2_000)
///     .scan_mode(ScanMode::Batched { batch_size: 5 })
///     .top_k(8)
///     .build()
///     .unwrap();
/// assert_eq!(config.top_k, 8);
/// ```
#[derive(Clone)]
pub struct ChatConfig {
    /// Rendering DPI used when rasterising each PDF page. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// LLM model identifier, e.g. "gpt-4o". If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the model may generate per request. Default: 3000.
    pub max_tokens: usize,

    /// Minimum interval between two model requests, in milliseconds. Default: 1000.
    ///
    /// This is the external service's rate limit expressed as policy: every
    /// request of the session (page scans, retries and consolidation) goes
    /// through one [`crate::pipeline::throttle::Throttle`] with this interval.
    pub request_delay_ms: u64,

    /// One request per page, or one per fixed-size batch. Default: per page.
    pub scan_mode: ScanMode,

    /// Number of evidence fragments handed to the synthesizer on a normal
    /// (non-deep) query. Default: 10.
    pub top_k: usize,

    /// Retry attempts for a failed page request. Default: 0.
    ///
    /// Each retry is one more request and waits for the throttle like any
    /// other; with the default every page costs exactly one request.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-request timeout in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Custom system prompt for page requests. If None, uses the built-in one.
    pub system_prompt: Option<String>,

    /// Custom bootstrap query. If None, uses the built-in takeoff report query.
    pub bootstrap_query: Option<String>,

    /// Tag prefixed to each evidence record when the corpus is flattened to
    /// text; also the delimiter of the evidence dump file.
    pub evidence_marker: String,

    /// When set, the corpus is written to this file after every scan.
    pub evidence_dump: Option<PathBuf>,

    /// Shape of synthesized answers. Default: prose.
    pub report_format: ReportFormat,

    /// Receives per-request progress events during evidence scans.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            dpi: 150,
            max_rendered_pixels: 2000,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 3000,
            request_delay_ms: 1000,
            scan_mode: ScanMode::default(),
            top_k: 10,
            max_retries: 0,
            retry_backoff_ms: 500,
            api_timeout_secs: 60,
            download_timeout_secs: 120,
            password: None,
            system_prompt: None,
            bootstrap_query: None,
            evidence_marker: DEFAULT_EVIDENCE_MARKER.to_string(),
            evidence_dump: None,
            report_format: ReportFormat::default(),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ChatConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatConfig")
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("request_delay_ms", &self.request_delay_ms)
            .field("scan_mode", &self.scan_mode)
            .field("top_k", &self.top_k)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("evidence_dump", &self.evidence_dump)
            .field("report_format", &self.report_format)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ScanProgressCallback>"),
            )
            .finish()
    }
}

impl ChatConfig {
    /// Create a new builder for `ChatConfig`.
    pub fn builder() -> ChatConfigBuilder {
        ChatConfigBuilder {
            config: Self::default(),
        }
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }
}

/// Builder for [`ChatConfig`].
pub struct ChatConfigBuilder {
    config: ChatConfig,
}

impl fmt::Debug for ChatConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ChatConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn request_delay_ms(mut self, ms: u64) -> Self {
        self.config.request_delay_ms = ms;
        self
    }

    pub fn scan_mode(mut self, mode: ScanMode) -> Self {
        self.config.scan_mode = mode;
        self
    }

    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn bootstrap_query(mut self, query: impl Into<String>) -> Self {
        self.config.bootstrap_query = Some(query.into());
        self
    }

    pub fn evidence_marker(mut self, marker: impl Into<String>) -> Self {
        self.config.evidence_marker = marker.into();
        self
    }

    pub fn evidence_dump(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.evidence_dump = Some(path.into());
        self
    }

    pub fn report_format(mut self, format: ReportFormat) -> Self {
        self.config.report_format = format;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ChatConfig, PdfChatError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 400 {
            return Err(PdfChatError::InvalidConfig(format!(
                "DPI must be 72–400, got {}",
                c.dpi
            )));
        }
        if c.top_k == 0 {
            return Err(PdfChatError::InvalidConfig("top_k must be ≥ 1".into()));
        }
        if let ScanMode::Batched { batch_size: 0 } = c.scan_mode {
            return Err(PdfChatError::InvalidConfig(
                "Batch size must be ≥ 1".into(),
            ));
        }
        if c.evidence_marker.trim().is_empty() {
            return Err(PdfChatError::InvalidConfig(
                "Evidence marker must contain visible characters".into(),
            ));
        }
        if c.api_timeout_secs == 0 {
            return Err(PdfChatError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How the collector groups pages into model requests.
///
/// | Mode | Requests for N pages | Evidence granularity |
/// |------|----------------------|----------------------|
/// | `PerPage` | N | one record per page |
/// | `Batched { batch_size }` | ⌈N / batch_size⌉ | one record per batch |
///
/// Batched mode is the cheap flat scan: fewer, larger requests, at the cost
/// of coarser page attribution during retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScanMode {
    #[default]
    PerPage,
    Batched { batch_size: usize },
}

impl ScanMode {
    /// Pages carried by one request.
    pub fn pages_per_request(&self) -> usize {
        match self {
            ScanMode::PerPage => 1,
            ScanMode::Batched { batch_size } => (*batch_size).max(1),
        }
    }

    /// Number of requests a scan of `page_count` pages issues.
    pub fn request_count(&self, page_count: usize) -> usize {
        page_count.div_ceil(self.pages_per_request())
    }
}

/// Shape of synthesized answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReportFormat {
    /// Free text that merges the evidence (default).
    #[default]
    Prose,
    /// A strict JSON object layered on top of the merged answer.
    Json,
}
