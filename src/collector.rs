//! Page evidence collector: one model request per page (or per batch).
//!
//! A scan walks the document in page order. Each request carries the query,
//! the conversation so far and the page image(s); a successful answer is
//! appended to the session corpus as one evidence record. A failed request
//! (API error, empty answer, timeout) is logged and skipped — one bad page
//! never aborts the scan, and nothing is ever raised to the caller.
//!
//! Requests are strictly sequential and every one of them, retries
//! included, waits for the session throttle first. That keeps the session
//! under the external service's rate limit no matter how many pages the
//! document has.
//!
//! ## Retry Strategy
//!
//! Retries are off by default (`max_retries = 0`). When enabled, attempt
//! `n` waits `retry_backoff_ms * 2^(n-1)` on top of the throttle interval,
//! capped at [`MAX_RETRY_BACKOFF`].

use crate::config::{ChatConfig, ScanMode};
use crate::context::SessionContext;
use crate::document::Document;
use crate::error::{ModelError, PageError};
use crate::output::ScanReport;
use crate::pipeline::model::{ModelClient, ModelRequest};
use crate::progress::{progress_fraction, ProgressCallback};
use crate::prompts::DEFAULT_SYSTEM_PROMPT;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

/// Upper bound on a single retry wait.
pub const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(60);

/// Wait before retry `attempt` (1-based). Saturates instead of overflowing.
fn retry_backoff(base_ms: u64, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    Duration::from_millis(base_ms.saturating_mul(factor)).min(MAX_RETRY_BACKOFF)
}

/// Drives evidence scans against the model.
pub struct EvidenceCollector {
    client: Arc<dyn ModelClient>,
    scan_mode: ScanMode,
    system_prompt: String,
    request_timeout: Duration,
    max_retries: u32,
    retry_backoff_ms: u64,
    progress: Option<ProgressCallback>,
}

impl EvidenceCollector {
    pub fn new(client: Arc<dyn ModelClient>, config: &ChatConfig) -> Self {
        Self {
            client,
            scan_mode: config.scan_mode,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            request_timeout: config.api_timeout(),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            progress: config.progress_callback.clone(),
        }
    }

    /// Scan every page of `document` with `query`, appending evidence to
    /// `ctx.corpus`.
    ///
    /// Issues exactly `scan_mode.request_count(pages)` requests when retries
    /// are disabled. Existing evidence is kept; a deep-analysis scan adds
    /// to the corpus, it never replaces it.
    pub async fn collect(
        &self,
        document: &Document,
        query: &str,
        ctx: &mut SessionContext,
    ) -> ScanReport {
        let start = Instant::now();
        let scan = ctx.corpus.begin_scan();
        let total = self.scan_mode.request_count(document.page_count());
        let records_before = ctx.corpus.len();

        info!(
            "Scan {} of '{}': {} pages, {} requests",
            scan,
            document.name(),
            document.page_count(),
            total
        );
        if let Some(ref cb) = self.progress {
            cb.on_scan_start(total, document.page_count());
        }

        let mut report = ScanReport {
            scan,
            query: query.to_string(),
            pages: document.page_count(),
            requests: total,
            ..Default::default()
        };

        let batch_size = self.scan_mode.pages_per_request();
        for (i, (pages, batch)) in document.batches(batch_size).enumerate() {
            let done = i + 1;
            if let Some(ref cb) = self.progress {
                cb.on_request_start(done, total, &pages);
            }

            let request = ModelRequest::new(query)
                .with_system(self.system_prompt.as_str())
                .with_history(ctx.history())
                .with_images(batch.iter().map(|p| p.image.clone()).collect());

            match self.request_with_retries(&request, &pages, ctx).await {
                Ok(text) => {
                    ctx.corpus.append(scan, Some(pages.clone()), text);
                    report.succeeded += 1;
                    if let Some(ref cb) = self.progress {
                        cb.on_request_complete(done, total, progress_fraction(done, total));
                    }
                }
                Err(e) => {
                    warn!("Skipping {}: {}", page_span(&pages), e);
                    if let Some(ref cb) = self.progress {
                        cb.on_request_error(
                            done,
                            total,
                            progress_fraction(done, total),
                            &e.to_string(),
                        );
                    }
                    report.failed += 1;
                    report.errors.push(e);
                }
            }
        }

        report.records_appended = ctx.corpus.len() - records_before;
        report.duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Scan {} complete: {}/{} requests succeeded, {}ms",
            scan, report.succeeded, total, report.duration_ms
        );
        if let Some(ref cb) = self.progress {
            cb.on_scan_complete(total, report.succeeded);
        }

        report
    }

    /// One page request, retried with backoff. Each attempt passes the
    /// throttle and is cancelled when it exceeds the timeout.
    async fn request_with_retries(
        &self,
        request: &ModelRequest,
        pages: &Range<usize>,
        ctx: &mut SessionContext,
    ) -> Result<String, PageError> {
        let mut last_err = ModelError::EmptyResponse;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = retry_backoff(self.retry_backoff_ms, attempt);
                warn!(
                    "{}: retry {}/{} after {}ms",
                    page_span(pages),
                    attempt,
                    self.max_retries,
                    backoff.as_millis()
                );
                sleep(backoff).await;
            }

            ctx.throttle.acquire().await;
            debug!(
                "{}: request attempt {} to {}",
                page_span(pages),
                attempt + 1,
                self.client.name()
            );

            let outcome = match timeout(self.request_timeout, self.client.complete(request)).await
            {
                Ok(result) => result,
                Err(_) => Err(ModelError::Timeout {
                    secs: self.request_timeout.as_secs(),
                }),
            };

            match outcome {
                Ok(text) if !text.trim().is_empty() => return Ok(text),
                Ok(_) => last_err = ModelError::EmptyResponse,
                Err(e) => last_err = e,
            }
        }

        let page = pages.start + 1;
        let count = pages.len();
        Err(match last_err {
            ModelError::Timeout { secs } => PageError::Timeout {
                page,
                pages: count,
                secs,
            },
            other => PageError::ModelFailed {
                page,
                pages: count,
                retries: self.max_retries,
                detail: other.to_string(),
            },
        })
    }
}

fn page_span(pages: &Range<usize>) -> String {
    if pages.len() == 1 {
        format!("page {}", pages.start + 1)
    } else {
        format!("pages {}-{}", pages.start + 1, pages.end)
    }
}
