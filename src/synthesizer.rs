//! Answer synthesizer: merge evidence fragments into one answer.
//!
//! One consolidation request per answer. The request is a single user
//! message (no history, no images) listing the fragments and the query, so
//! the model sees exactly the evidence it is asked to merge.
//!
//! Delivery is a stream of text deltas. [`AnswerSynthesizer::synthesize`]
//! is the blocking form: it sends the same request but waits for the whole
//! text. Either way the caller gets a [`Synthesis`]; a failed request is an
//! explicit `Failed` outcome carrying the apology text, never the raw
//! fragments. A stream that breaks after some deltas were delivered keeps
//! that partial text, followed by a paragraph break and the apology, so the
//! synthesis text always equals what the sink received.

use crate::config::{ChatConfig, ReportFormat};
use crate::error::ModelError;
use crate::evidence::Fragment;
use crate::output::AnswerOutcome;
use crate::pipeline::model::{ModelClient, ModelRequest};
use crate::pipeline::throttle::Throttle;
use crate::prompts::{
    consolidation_prompt, JSON_REPORT_SUFFIX, NO_DATA_RESPONSE, SYNTHESIS_FAILED_RESPONSE,
};
use futures::StreamExt;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

/// Put between partial streamed text and the failure reply.
const FAILURE_SEPARATOR: &str = "\n\n";

static JSON_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json)?\s*(\{.*\})\s*```")
        .unwrap_or_else(|e| panic!("invalid fence regex: {e}"))
});

/// Result of one synthesis.
#[derive(Debug, Clone, PartialEq)]
pub struct Synthesis {
    pub outcome: AnswerOutcome,
    /// Answer text, or the canned reply for `NoData` / `Failed`.
    pub text: String,
    /// Parsed report in JSON mode.
    pub report: Option<serde_json::Value>,
    /// Why the request failed, for `Failed`.
    pub failure: Option<String>,
}

impl Synthesis {
    fn answered(text: String, report: Option<serde_json::Value>) -> Self {
        Self {
            outcome: AnswerOutcome::Answered,
            text,
            report,
            failure: None,
        }
    }

    fn no_data() -> Self {
        Self {
            outcome: AnswerOutcome::NoData,
            text: NO_DATA_RESPONSE.to_string(),
            report: None,
            failure: None,
        }
    }

    fn failed(reason: String) -> Self {
        Self {
            outcome: AnswerOutcome::Failed,
            text: SYNTHESIS_FAILED_RESPONSE.to_string(),
            report: None,
            failure: Some(reason),
        }
    }
}

pub struct AnswerSynthesizer {
    client: Arc<dyn ModelClient>,
    request_timeout: Duration,
    report_format: ReportFormat,
}

impl AnswerSynthesizer {
    pub fn new(client: Arc<dyn ModelClient>, config: &ChatConfig) -> Self {
        Self {
            client,
            request_timeout: config.api_timeout(),
            report_format: config.report_format,
        }
    }

    /// Merge `fragments` into one answer to `query`, waiting for the full
    /// text.
    pub async fn synthesize(
        &self,
        throttle: &mut Throttle,
        query: &str,
        fragments: &[Fragment],
    ) -> Synthesis {
        self.run(throttle, query, fragments, None).await
    }

    /// Like [`synthesize`](Self::synthesize), forwarding each text delta to
    /// `on_delta` as it arrives. Canned replies are forwarded as one delta.
    pub async fn synthesize_streaming(
        &self,
        throttle: &mut Throttle,
        query: &str,
        fragments: &[Fragment],
        on_delta: &mut (dyn FnMut(&str) + Send),
    ) -> Synthesis {
        self.run(throttle, query, fragments, Some(on_delta)).await
    }

    async fn run(
        &self,
        throttle: &mut Throttle,
        query: &str,
        fragments: &[Fragment],
        mut on_delta: Option<&mut (dyn FnMut(&str) + Send)>,
    ) -> Synthesis {
        if fragments.iter().all(|f| f.text.trim().is_empty()) {
            info!("No evidence for query; skipping consolidation request");
            let synthesis = Synthesis::no_data();
            if let Some(sink) = on_delta.as_mut() {
                sink(&synthesis.text);
            }
            return synthesis;
        }

        let mut prompt = consolidation_prompt(query, fragments);
        if self.report_format == ReportFormat::Json {
            prompt.push_str(JSON_REPORT_SUFFIX);
        }
        let request = ModelRequest::new(prompt);

        throttle.acquire().await;
        debug!(
            "Consolidating {} fragments via {}",
            fragments.len(),
            self.client.name()
        );

        // Deltas already handed to the sink, kept if the stream breaks.
        let mut streamed = String::new();
        let delivery = async {
            match on_delta.as_mut() {
                None => self.client.complete(&request).await,
                Some(sink) => {
                    drain(self.client.as_ref(), &request, &mut **sink, &mut streamed)
                        .await
                        .map(|()| std::mem::take(&mut streamed))
                }
            }
        };

        let result = match timeout(self.request_timeout, delivery).await {
            Ok(r) => r,
            Err(_) => Err(ModelError::Timeout {
                secs: self.request_timeout.as_secs(),
            }),
        };

        let mut synthesis = match result {
            Ok(text) if !text.trim().is_empty() => {
                let report = match self.report_format {
                    ReportFormat::Prose => None,
                    ReportFormat::Json => {
                        let parsed = extract_json(&text);
                        if parsed.is_none() {
                            warn!("JSON report requested but the answer is not valid JSON");
                        }
                        parsed
                    }
                };
                return Synthesis::answered(text, report);
            }
            Ok(blank) => {
                if on_delta.is_some() {
                    streamed = blank;
                }
                Synthesis::failed(ModelError::EmptyResponse.to_string())
            }
            Err(e) => Synthesis::failed(e.to_string()),
        };

        warn!(
            "Consolidation failed: {}",
            synthesis.failure.as_deref().unwrap_or_default()
        );
        if streamed.is_empty() {
            if let Some(sink) = on_delta.as_mut() {
                sink(&synthesis.text);
            }
        } else {
            let tail = format!("{FAILURE_SEPARATOR}{}", synthesis.text);
            if let Some(sink) = on_delta.as_mut() {
                sink(&tail);
            }
            streamed.push_str(&tail);
            synthesis.text = streamed;
        }
        synthesis
    }
}

async fn drain(
    client: &dyn ModelClient,
    request: &ModelRequest,
    sink: &mut (dyn FnMut(&str) + Send),
    text: &mut String,
) -> Result<(), ModelError> {
    let mut stream = client.stream(request).await?;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        sink(&chunk);
        text.push_str(&chunk);
    }
    Ok(())
}

/// Pull a JSON object out of a model answer: the whole text, a fenced
/// block, or the outermost braces.
pub fn extract_json(text: &str) -> Option<serde_json::Value> {
    let trimmed = text.trim();
    if let Ok(v @ serde_json::Value::Object(_)) = serde_json::from_str(trimmed) {
        return Some(v);
    }
    if let Some(caps) = JSON_FENCE.captures(trimmed) {
        if let Ok(v) = serde_json::from_str(&caps[1]) {
            return Some(v);
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::model::testing::ScriptedModel;
    use crate::pipeline::model::TextStream;

    fn fragments() -> Vec<Fragment> {
        vec![
            Fragment::new(0, Some(0..1), "Concrete: 500 sqft"),
            Fragment::new(1, Some(2..3), "Concrete: 500 sqft"),
        ]
    }

    fn synthesizer(client: Arc<dyn ModelClient>, format: ReportFormat) -> AnswerSynthesizer {
        let config = ChatConfig::builder().report_format(format).build().unwrap();
        AnswerSynthesizer::new(client, &config)
    }

    #[tokio::test]
    async fn merges_fragments_in_one_request() {
        let model = ScriptedModel::echo();
        let synth = synthesizer(model.clone(), ReportFormat::Prose);
        let mut throttle = Throttle::unlimited();

        let out = synth.synthesize(&mut throttle, "concrete?", &fragments()).await;

        assert_eq!(out.outcome, AnswerOutcome::Answered);
        assert!(out.text.contains("500"));
        assert_eq!(model.call_count(), 1);
        let request = &model.requests()[0];
        assert!(request.is_plain_prompt());
        assert!(request.text.contains("Response 2 (page 3)"));
        assert_eq!(throttle.dispatched(), 1);
    }

    #[tokio::test]
    async fn no_fragments_means_no_data_without_model_call() {
        let model = ScriptedModel::echo();
        let synth = synthesizer(model.clone(), ReportFormat::Prose);
        let mut throttle = Throttle::unlimited();

        let out = synth.synthesize(&mut throttle, "concrete?", &[]).await;
        assert_eq!(out.outcome, AnswerOutcome::NoData);
        assert_eq!(out.text, NO_DATA_RESPONSE);

        let blank = vec![Fragment::new(0, None, "  ")];
        let out = synth.synthesize(&mut throttle, "concrete?", &blank).await;
        assert_eq!(out.outcome, AnswerOutcome::NoData);
        assert_eq!(model.call_count(), 0);
        assert_eq!(throttle.dispatched(), 0);
    }

    #[tokio::test]
    async fn failure_is_explicit() {
        let model = ScriptedModel::new(|_| {
            Err(ModelError::Api {
                message: "HTTP 429".into(),
            })
        });
        let synth = synthesizer(model, ReportFormat::Prose);
        let out = synth
            .synthesize(&mut Throttle::unlimited(), "q", &fragments())
            .await;
        assert_eq!(out.outcome, AnswerOutcome::Failed);
        assert_eq!(out.text, SYNTHESIS_FAILED_RESPONSE);
        assert!(out.failure.unwrap().contains("HTTP 429"));
    }

    #[tokio::test]
    async fn streaming_forwards_deltas() {
        struct Chunked;

        #[async_trait::async_trait]
        impl ModelClient for Chunked {
            fn name(&self) -> &str {
                "chunked"
            }

            async fn complete(&self, _request: &ModelRequest) -> Result<String, ModelError> {
                Ok("Concrete totals 500 sqft.".into())
            }

            async fn stream(&self, _request: &ModelRequest) -> Result<TextStream, ModelError> {
                let chunks = vec![
                    Ok("Concrete ".to_string()),
                    Ok("totals ".to_string()),
                    Ok("500 sqft.".to_string()),
                ];
                Ok(Box::pin(futures::stream::iter(chunks)))
            }
        }

        let synth = synthesizer(Arc::new(Chunked), ReportFormat::Prose);
        let mut seen = Vec::new();
        let mut sink = |delta: &str| seen.push(delta.to_string());
        let out = synth
            .synthesize_streaming(&mut Throttle::unlimited(), "q", &fragments(), &mut sink)
            .await;

        assert_eq!(seen, vec!["Concrete ", "totals ", "500 sqft."]);
        assert_eq!(out.text, "Concrete totals 500 sqft.");
    }

    struct BrokenStream;

    #[async_trait::async_trait]
    impl ModelClient for BrokenStream {
        fn name(&self) -> &str {
            "broken-stream"
        }

        async fn complete(&self, _request: &ModelRequest) -> Result<String, ModelError> {
            Ok("unused".into())
        }

        async fn stream(&self, _request: &ModelRequest) -> Result<TextStream, ModelError> {
            let chunks = vec![
                Ok("Concrete totals 9".to_string()),
                Err(ModelError::Api {
                    message: "connection reset".into(),
                }),
            ];
            Ok(Box::pin(futures::stream::iter(chunks)))
        }
    }

    #[tokio::test]
    async fn broken_stream_text_matches_what_was_shown() {
        let synth = synthesizer(Arc::new(BrokenStream), ReportFormat::Prose);
        let mut seen = String::new();
        let mut sink = |delta: &str| seen.push_str(delta);
        let out = synth
            .synthesize_streaming(&mut Throttle::unlimited(), "q", &fragments(), &mut sink)
            .await;

        assert_eq!(out.outcome, AnswerOutcome::Failed);
        assert_eq!(
            out.text,
            format!("Concrete totals 9\n\n{SYNTHESIS_FAILED_RESPONSE}")
        );
        assert_eq!(seen, out.text);
        assert!(out.failure.unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn streaming_no_data_emits_canned_reply() {
        let synth = synthesizer(ScriptedModel::echo(), ReportFormat::Prose);
        let mut seen = String::new();
        let mut sink = |delta: &str| seen.push_str(delta);
        synth
            .synthesize_streaming(&mut Throttle::unlimited(), "q", &[], &mut sink)
            .await;
        assert_eq!(seen, NO_DATA_RESPONSE);
    }

    #[tokio::test]
    async fn json_mode_parses_fenced_report() {
        let model = ScriptedModel::new(|_| {
            Ok("Here you go:\n```json\n{\"materials\": [{\"name\": \"Concrete\", \"square_feet\": 500}], \"summary\": \"slab\", \"unavailable\": []}\n```".into())
        });
        let synth = synthesizer(model.clone(), ReportFormat::Json);
        let out = synth
            .synthesize(&mut Throttle::unlimited(), "q", &fragments())
            .await;

        assert!(model.requests()[0].text.contains("\"materials\""));
        let report = out.report.unwrap();
        assert_eq!(report["materials"][0]["square_feet"], 500);
    }

    #[tokio::test]
    async fn json_mode_keeps_text_when_not_json() {
        let model = ScriptedModel::new(|_| Ok("Concrete: 500 sqft".into()));
        let synth = synthesizer(model, ReportFormat::Json);
        let out = synth
            .synthesize(&mut Throttle::unlimited(), "q", &fragments())
            .await;
        assert_eq!(out.outcome, AnswerOutcome::Answered);
        assert!(out.report.is_none());
        assert_eq!(out.text, "Concrete: 500 sqft");
    }

    #[test]
    fn extract_json_variants() {
        assert!(extract_json(r#"{"a": 1}"#).is_some());
        assert!(extract_json("prefix {\"a\": 1} suffix").is_some());
        assert!(extract_json("no json here").is_none());
        assert!(extract_json("[1, 2]").is_none());
    }
}
