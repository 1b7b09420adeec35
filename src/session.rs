//! Conversation controller: the chat session state machine.
//!
//! ```text
//!  AwaitingDocument ──ingest──▶ FirstScanPending ──bootstrap──▶ Ready ◀─┐
//!                                                                 │    │
//!                                                 ask(Normal | DeepAnalysis)
//! ```
//!
//! Ingesting a document immediately runs the bootstrap query: a full
//! evidence scan, then one synthesis over the whole corpus, stored as an
//! assistant turn. The session then answers follow-ups from cached evidence
//! ([`QueryMode::Normal`]) or re-scans every page for the question
//! ([`QueryMode::DeepAnalysis`]), which appends to the corpus.
//!
//! The bootstrap runs exactly once per ingested document. If it was
//! interrupted (the future dropped mid-scan), the session is still in
//! `FirstScanPending` and the next `ask` completes it first. A bootstrap
//! seeded with caller-supplied evidence never scans, resumed or not.

use crate::collector::EvidenceCollector;
use crate::config::ChatConfig;
use crate::context::{ConversationTurn, SessionContext};
use crate::document::Document;
use crate::error::PdfChatError;
use crate::evidence::{EvidenceCorpus, Fragment};
use crate::output::{AnswerPath, Reply, ScanReport};
use crate::pipeline::input::{resolve_input, PdfUpload};
use crate::pipeline::model::{ModelClient, ProviderModel};
use crate::pipeline::render::{PdfiumRasterizer, Rasterizer};
use crate::prompts::BOOTSTRAP_QUERY;
use crate::retriever::{EvidenceRetriever, FuzzyRetriever};
use crate::synthesizer::{AnswerSynthesizer, Synthesis};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No document yet; questions are refused with guidance.
    AwaitingDocument,
    /// A document was ingested but its bootstrap has not completed.
    FirstScanPending,
    /// Bootstrap done; follow-up questions are answered.
    Ready,
}

/// How a question is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryMode {
    /// Retrieve the closest cached evidence and synthesize from it.
    #[default]
    Normal,
    /// Scan every page again with this question, then synthesize from the
    /// whole corpus.
    DeepAnalysis,
}

type DeltaSink<'a> = Option<&'a mut (dyn FnMut(&str) + Send)>;

/// One conversation about one document at a time.
pub struct ChatSession {
    config: ChatConfig,
    collector: EvidenceCollector,
    synthesizer: AnswerSynthesizer,
    retriever: Box<dyn EvidenceRetriever>,
    rasterizer: Box<dyn Rasterizer>,
    ctx: SessionContext,
    document: Option<Document>,
    state: SessionState,
    /// The corpus of the current document was supplied by the caller; its
    /// bootstrap only synthesizes.
    seeded: bool,
}

impl ChatSession {
    /// Session talking to the provider resolved from `config`.
    pub fn new(config: ChatConfig) -> Result<Self, PdfChatError> {
        let client = Arc::new(ProviderModel::from_config(&config)?);
        Ok(Self::with_client(client, config))
    }

    /// Session talking to an explicit model client.
    pub fn with_client(client: Arc<dyn ModelClient>, config: ChatConfig) -> Self {
        Self {
            collector: EvidenceCollector::new(Arc::clone(&client), &config),
            synthesizer: AnswerSynthesizer::new(client, &config),
            retriever: Box::new(FuzzyRetriever::new(
                config.top_k,
                config.evidence_marker.clone(),
            )),
            rasterizer: Box::new(PdfiumRasterizer::new(&config)),
            ctx: SessionContext::new(config.request_delay()),
            document: None,
            state: SessionState::AwaitingDocument,
            seeded: false,
            config,
        }
    }

    /// Replace the fuzzy retriever (e.g. with an embedding-based one).
    pub fn with_retriever(mut self, retriever: Box<dyn EvidenceRetriever>) -> Self {
        self.retriever = retriever;
        self
    }

    /// Replace the pdfium rasteriser.
    pub fn with_rasterizer(mut self, rasterizer: Box<dyn Rasterizer>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn history(&self) -> &[ConversationTurn] {
        self.ctx.history()
    }

    pub fn corpus(&self) -> &EvidenceCorpus {
        &self.ctx.corpus
    }

    pub fn document(&self) -> Option<&Document> {
        self.document.as_ref()
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    // ── Document intake ──────────────────────────────────────────────────

    /// Resolve a path or URL, rasterise it and ingest it.
    pub async fn open(&mut self, input: &str) -> Result<Reply, PdfChatError> {
        let upload = resolve_input(input, self.config.download_timeout_secs).await?;
        self.upload(upload).await
    }

    /// Rasterise an uploaded PDF and ingest it.
    pub async fn upload(&mut self, upload: PdfUpload) -> Result<Reply, PdfChatError> {
        let document = self.rasterizer.rasterize(upload).await?;
        Ok(self.ingest(document).await)
    }

    /// Make `document` current and run its bootstrap.
    ///
    /// Evidence of any previous document is dropped; the conversation
    /// history is kept.
    pub async fn ingest(&mut self, document: Document) -> Reply {
        self.replace_document(document);
        self.bootstrap(None).await
    }

    /// [`ingest`](Self::ingest) with the bootstrap answer streamed to
    /// `on_delta`.
    pub async fn ingest_streaming(
        &mut self,
        document: Document,
        on_delta: &mut (dyn FnMut(&str) + Send),
    ) -> Reply {
        self.replace_document(document);
        self.bootstrap(Some(on_delta)).await
    }

    /// Make `document` current with evidence collected earlier (see
    /// [`dump_evidence`](Self::dump_evidence)) instead of a fresh scan. The
    /// bootstrap answer is still synthesized, from the loaded corpus.
    pub async fn ingest_with_evidence(
        &mut self,
        document: Document,
        corpus: EvidenceCorpus,
    ) -> Reply {
        self.replace_document(document);
        self.ctx.corpus = corpus;
        self.seeded = true;
        info!(
            "Reusing {} evidence records; skipping the bootstrap scan",
            self.ctx.corpus.len()
        );
        self.bootstrap(None).await
    }

    fn replace_document(&mut self, document: Document) {
        info!(
            "Ingested '{}' ({} pages)",
            document.name(),
            document.page_count()
        );
        self.ctx.corpus.reset();
        self.document = Some(document);
        self.seeded = false;
        self.state = SessionState::FirstScanPending;
    }

    fn bootstrap_query(&self) -> String {
        self.config
            .bootstrap_query
            .clone()
            .unwrap_or_else(|| BOOTSTRAP_QUERY.to_string())
    }

    async fn bootstrap(&mut self, on_delta: DeltaSink<'_>) -> Reply {
        let query = self.bootstrap_query();

        let report = if self.seeded {
            None
        } else {
            // A bootstrap that was interrupted may have left partial evidence.
            self.ctx.corpus.reset();
            let report = match self.document.as_ref() {
                Some(document) => {
                    self.collector
                        .collect(document, &query, &mut self.ctx)
                        .await
                }
                None => ScanReport::default(),
            };
            self.dump_after_scan().await;
            Some(report)
        };

        let fragments = self.ctx.corpus.fragments();
        let synthesis = self.run_synthesis(&query, &fragments, on_delta).await;
        self.finish_bootstrap(synthesis, fragments.len(), report)
    }

    fn finish_bootstrap(
        &mut self,
        synthesis: Synthesis,
        fragments_used: usize,
        scan: Option<ScanReport>,
    ) -> Reply {
        self.ctx
            .push_turn(ConversationTurn::assistant(synthesis.text.clone()));
        self.state = SessionState::Ready;
        info!(
            "Bootstrap complete: {:?} from {} fragments",
            synthesis.outcome, fragments_used
        );
        reply(synthesis, AnswerPath::BootstrapScan, fragments_used, scan)
    }

    // ── Questions ────────────────────────────────────────────────────────

    /// Answer a question about the current document.
    ///
    /// Fails with [`PdfChatError::NoDocument`] before any document has been
    /// ingested and with [`PdfChatError::EmptyQuery`] for blank input;
    /// neither makes a model request. Every other outcome, including a
    /// failed synthesis, is a reply appended to the history.
    pub async fn ask(&mut self, query: &str, mode: QueryMode) -> Result<Reply, PdfChatError> {
        self.answer(query, mode, None).await
    }

    /// [`ask`](Self::ask) with the answer streamed to `on_delta`.
    pub async fn ask_streaming(
        &mut self,
        query: &str,
        mode: QueryMode,
        on_delta: &mut (dyn FnMut(&str) + Send),
    ) -> Result<Reply, PdfChatError> {
        self.answer(query, mode, Some(on_delta)).await
    }

    async fn answer(
        &mut self,
        query: &str,
        mode: QueryMode,
        on_delta: DeltaSink<'_>,
    ) -> Result<Reply, PdfChatError> {
        if self.state == SessionState::AwaitingDocument {
            return Err(PdfChatError::NoDocument);
        }
        let query = query.trim();
        if query.is_empty() {
            return Err(PdfChatError::EmptyQuery);
        }
        if self.state == SessionState::FirstScanPending {
            info!("Completing the interrupted bootstrap first");
            self.bootstrap(None).await;
        }

        let (path, fragments, scan) = match mode {
            QueryMode::Normal => {
                let fragments: Vec<Fragment> = self
                    .retriever
                    .retrieve(query, &self.ctx.corpus)
                    .into_iter()
                    .map(|scored| scored.fragment)
                    .collect();
                (AnswerPath::Retrieval, fragments, None)
            }
            QueryMode::DeepAnalysis => {
                let report = match self.document.as_ref() {
                    Some(document) => {
                        self.collector
                            .collect(document, query, &mut self.ctx)
                            .await
                    }
                    None => ScanReport::default(),
                };
                self.dump_after_scan().await;
                (AnswerPath::DeepScan, self.ctx.corpus.fragments(), Some(report))
            }
        };

        let synthesis = self.run_synthesis(query, &fragments, on_delta).await;

        self.ctx.push_turn(ConversationTurn::user(query));
        self.ctx
            .push_turn(ConversationTurn::assistant(synthesis.text.clone()));
        info!(
            "Answered via {:?}: {:?} from {} fragments",
            path,
            synthesis.outcome,
            fragments.len()
        );

        Ok(reply(synthesis, path, fragments.len(), scan))
    }

    async fn run_synthesis(
        &mut self,
        query: &str,
        fragments: &[Fragment],
        on_delta: DeltaSink<'_>,
    ) -> Synthesis {
        match on_delta {
            Some(sink) => {
                self.synthesizer
                    .synthesize_streaming(&mut self.ctx.throttle, query, fragments, sink)
                    .await
            }
            None => {
                self.synthesizer
                    .synthesize(&mut self.ctx.throttle, query, fragments)
                    .await
            }
        }
    }

    // ── Evidence persistence ─────────────────────────────────────────────

    /// Write the current corpus to `path` as marker-separated text.
    pub async fn dump_evidence(&self, path: &Path) -> Result<(), PdfChatError> {
        self.ctx
            .corpus
            .dump_to_file(path, &self.config.evidence_marker)
            .await
    }

    async fn dump_after_scan(&self) {
        if let Some(ref path) = self.config.evidence_dump {
            if let Err(e) = self.dump_evidence(path).await {
                warn!("Evidence dump failed: {}", e);
            }
        }
    }
}

fn reply(
    synthesis: Synthesis,
    path: AnswerPath,
    fragments_used: usize,
    scan: Option<ScanReport>,
) -> Reply {
    Reply {
        text: synthesis.text,
        outcome: synthesis.outcome,
        path,
        fragments_used,
        scan,
        report: synthesis.report,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Role;
    use crate::output::AnswerOutcome;
    use crate::pipeline::model::testing::ScriptedModel;
    use crate::prompts::NO_DATA_RESPONSE;
    use async_trait::async_trait;
    use edgequake_llm::ImageData;

    fn document(pages: usize) -> Document {
        Document::new(
            "plan.pdf",
            (0..pages)
                .map(|i| ImageData::new(format!("page-{i}"), "image/png"))
                .collect(),
        )
    }

    fn config() -> ChatConfig {
        ChatConfig::builder().request_delay_ms(0).build().unwrap()
    }

    /// Consolidation requests carry no images.
    fn page_requests(model: &ScriptedModel) -> usize {
        model
            .requests()
            .iter()
            .filter(|r| !r.images.is_empty())
            .count()
    }

    #[tokio::test]
    async fn ask_without_document_gives_guidance_and_no_request() {
        let model = ScriptedModel::echo();
        let mut session = ChatSession::with_client(model.clone(), config());

        let err = session.ask("concrete?", QueryMode::Normal).await.unwrap_err();
        assert!(matches!(err, PdfChatError::NoDocument));
        assert!(err.to_string().contains("Upload a PDF"));
        assert_eq!(model.call_count(), 0);
        assert_eq!(session.state(), SessionState::AwaitingDocument);
    }

    #[tokio::test]
    async fn ingest_runs_bootstrap_once() {
        let model = ScriptedModel::echo();
        let mut session = ChatSession::with_client(model.clone(), config());

        let reply = session.ingest(document(3)).await;
        assert_eq!(reply.path, AnswerPath::BootstrapScan);
        assert_eq!(reply.outcome, AnswerOutcome::Answered);
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(page_requests(&model), 3);
        assert_eq!(model.requests()[0].text, BOOTSTRAP_QUERY);

        for q in ["concrete?", "roofing?", "steel?"] {
            session.ask(q, QueryMode::Normal).await.unwrap();
        }
        let bootstrap_requests = model
            .requests()
            .iter()
            .filter(|r| r.text == BOOTSTRAP_QUERY)
            .count();
        assert_eq!(bootstrap_requests, 3);
        assert_eq!(page_requests(&model), 3);
    }

    #[tokio::test]
    async fn history_order_is_bootstrap_then_user_assistant_pairs() {
        let mut session = ChatSession::with_client(ScriptedModel::echo(), config());
        session.ingest(document(2)).await;
        session.ask("concrete?", QueryMode::Normal).await.unwrap();

        let roles: Vec<Role> = session.history().iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::Assistant, Role::User, Role::Assistant]);
        assert_eq!(session.history()[1].content, "concrete?");
    }

    #[tokio::test]
    async fn blank_query_is_rejected() {
        let mut session = ChatSession::with_client(ScriptedModel::echo(), config());
        session.ingest(document(1)).await;
        let err = session.ask("   ", QueryMode::Normal).await.unwrap_err();
        assert!(matches!(err, PdfChatError::EmptyQuery));
        assert_eq!(session.history().len(), 1);
    }

    #[tokio::test]
    async fn deep_analysis_appends_a_full_scan() {
        let model = ScriptedModel::echo();
        let mut session = ChatSession::with_client(model.clone(), config());
        session.ingest(document(4)).await;
        assert_eq!(session.corpus().len(), 4);

        let reply = session
            .ask("roofing?", QueryMode::DeepAnalysis)
            .await
            .unwrap();
        assert_eq!(reply.path, AnswerPath::DeepScan);
        assert_eq!(session.corpus().len(), 8);
        assert_eq!(reply.fragments_used, 8);
        assert_eq!(reply.scan.as_ref().map(|s| s.scan), Some(2));
        assert_eq!(page_requests(&model), 8);
    }

    #[tokio::test]
    async fn normal_mode_uses_at_most_top_k_fragments() {
        let config = ChatConfig::builder()
            .request_delay_ms(0)
            .top_k(2)
            .build()
            .unwrap();
        let mut session = ChatSession::with_client(ScriptedModel::echo(), config);
        session.ingest(document(5)).await;

        let reply = session.ask("page-3", QueryMode::Normal).await.unwrap();
        assert_eq!(reply.path, AnswerPath::Retrieval);
        assert_eq!(reply.fragments_used, 2);
        assert!(reply.scan.is_none());
    }

    #[tokio::test]
    async fn empty_document_gives_no_data() {
        let model = ScriptedModel::echo();
        let mut session = ChatSession::with_client(model.clone(), config());

        let reply = session.ingest(document(0)).await;
        assert_eq!(reply.outcome, AnswerOutcome::NoData);
        assert_eq!(reply.text, NO_DATA_RESPONSE);
        assert_eq!(model.call_count(), 0);
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn new_document_resets_corpus_keeps_history() {
        let model = ScriptedModel::echo();
        let mut session = ChatSession::with_client(model.clone(), config());
        session.ingest(document(3)).await;
        session.ask("concrete?", QueryMode::Normal).await.unwrap();

        session.ingest(document(2)).await;
        assert_eq!(session.corpus().len(), 2);
        assert_eq!(session.corpus().scan_count(), 1);
        assert_eq!(session.history().len(), 4);
        assert_eq!(page_requests(&model), 5);
    }

    #[tokio::test]
    async fn interrupted_bootstrap_completes_on_next_ask() {
        let model = ScriptedModel::echo();
        let mut session = ChatSession::with_client(model.clone(), config());
        session.replace_document(document(2));
        session.ctx.corpus.append(1, Some(0..1), "partial");
        assert_eq!(session.state(), SessionState::FirstScanPending);

        session.ask("concrete?", QueryMode::Normal).await.unwrap();

        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.corpus().len(), 2);
        assert_eq!(session.history().len(), 3);
        assert_eq!(page_requests(&model), 2);
    }

    #[tokio::test]
    async fn streaming_ask_forwards_answer() {
        let mut session = ChatSession::with_client(ScriptedModel::echo(), config());
        session.ingest(document(1)).await;

        let mut streamed = String::new();
        let mut sink = |delta: &str| streamed.push_str(delta);
        let reply = session
            .ask_streaming("concrete?", QueryMode::Normal, &mut sink)
            .await
            .unwrap();
        assert_eq!(streamed, reply.text);
        assert!(streamed.starts_with("merged: "));
    }

    #[tokio::test]
    async fn scans_are_dumped_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("evidence.txt");
        let config = ChatConfig::builder()
            .request_delay_ms(0)
            .evidence_dump(&path)
            .build()
            .unwrap();
        let mut session = ChatSession::with_client(ScriptedModel::echo(), config);
        session.ingest(document(3)).await;

        let loaded = EvidenceCorpus::load_from_file(&path, &session.config().evidence_marker)
            .await
            .unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.records()[1].text, "evidence for page-1");
    }

    #[tokio::test]
    async fn loaded_evidence_skips_the_scan() {
        let model = ScriptedModel::echo();
        let mut session = ChatSession::with_client(model.clone(), config());
        let corpus = EvidenceCorpus::from_tagged_text(
            "=== page evidence ===\nConcrete: 500 sqft\n",
            "=== page evidence ===\n",
        );

        let reply = session.ingest_with_evidence(document(3), corpus).await;
        assert_eq!(page_requests(&model), 0);
        assert_eq!(model.call_count(), 1);
        assert!(reply.text.contains("500"));
        assert_eq!(session.state(), SessionState::Ready);
    }

    /// Page requests succeed; the first consolidation request never
    /// returns, later ones merge normally.
    struct StallsFirstConsolidation {
        inner: Arc<ScriptedModel>,
        stalled: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl ModelClient for StallsFirstConsolidation {
        fn name(&self) -> &str {
            "stalls-first-consolidation"
        }

        async fn complete(
            &self,
            request: &crate::pipeline::model::ModelRequest,
        ) -> Result<String, crate::error::ModelError> {
            use std::sync::atomic::Ordering;
            if request.images.is_empty() && !self.stalled.swap(true, Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            self.inner.complete(request).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn interrupted_seeded_bootstrap_keeps_loaded_evidence() {
        let inner = ScriptedModel::echo();
        let model = Arc::new(StallsFirstConsolidation {
            inner: inner.clone(),
            stalled: std::sync::atomic::AtomicBool::new(false),
        });
        let mut session = ChatSession::with_client(model, config());
        let corpus = EvidenceCorpus::from_tagged_text(
            "=== page evidence ===\nConcrete: 500 sqft\n",
            "=== page evidence ===\n",
        );

        let interrupted = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            session.ingest_with_evidence(document(3), corpus),
        )
        .await;
        assert!(interrupted.is_err());
        assert_eq!(session.state(), SessionState::FirstScanPending);

        let reply = session.ask("concrete?", QueryMode::Normal).await.unwrap();

        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(page_requests(&inner), 0);
        assert_eq!(session.corpus().len(), 1);
        assert_eq!(session.corpus().records()[0].text, "Concrete: 500 sqft");
        assert_eq!(session.history().len(), 3);
        assert!(reply.text.contains("500"));
    }

    #[tokio::test]
    async fn upload_goes_through_rasterizer() {
        struct ThreePages;

        #[async_trait]
        impl Rasterizer for ThreePages {
            async fn rasterize(&self, upload: PdfUpload) -> Result<Document, PdfChatError> {
                Ok(Document::new(
                    upload.name,
                    (0..3)
                        .map(|i| ImageData::new(format!("page-{i}"), "image/png"))
                        .collect(),
                ))
            }
        }

        let model = ScriptedModel::echo();
        let mut session = ChatSession::with_client(model.clone(), config())
            .with_rasterizer(Box::new(ThreePages));
        let upload = PdfUpload::from_bytes("plan.pdf", b"%PDF-1.7\n".to_vec()).unwrap();

        session.upload(upload).await.unwrap();
        assert_eq!(session.document().map(Document::page_count), Some(3));
        assert_eq!(page_requests(&model), 3);
    }
}
