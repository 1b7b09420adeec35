//! CLI binary for edgequake-pdfchat.
//!
//! A thin shim over the library crate: maps CLI flags to `ChatConfig`,
//! ingests one PDF, then answers questions from flags or an interactive
//! prompt.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdfchat::pipeline::input::resolve_input;
use edgequake_pdfchat::{
    ChatConfig, ChatSession, EvidenceCorpus, PdfiumRasterizer, ProgressCallback, QueryMode,
    Rasterizer, ReportFormat, Reply, Role, ScanMode, ScanProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io::{self, Write};
use std::ops::Range;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one progress bar per evidence scan plus a
/// log line per request.
struct CliProgressCallback {
    bar: Mutex<Option<ProgressBar>>,
    request_started: Mutex<Option<Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            bar: Mutex::new(None),
            request_started: Mutex::new(None),
        })
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(ref bar) = *guard {
                f(bar);
            }
        }
    }

    fn elapsed_secs(&self) -> f64 {
        self.request_started
            .lock()
            .ok()
            .and_then(|mut t| t.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ScanProgressCallback for CliProgressCallback {
    fn on_scan_start(&self, total_requests: usize, total_pages: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} requests  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        let bar = ProgressBar::new(total_requests as u64);
        bar.set_style(style);
        bar.set_prefix("Scanning");
        bar.enable_steady_tick(Duration::from_millis(80));
        bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!(
                "Scanning {total_pages} pages in {total_requests} requests…"
            ))
        ));

        if let Ok(mut guard) = self.bar.lock() {
            *guard = Some(bar);
        }
    }

    fn on_request_start(&self, _request: usize, _total: usize, pages: &Range<usize>) {
        if let Ok(mut t) = self.request_started.lock() {
            *t = Some(Instant::now());
        }
        self.with_bar(|bar| bar.set_message(page_label(pages)));
    }

    fn on_request_complete(&self, done: usize, total: usize, _fraction: f32) {
        let secs = self.elapsed_secs();
        self.with_bar(|bar| {
            bar.println(format!(
                "  {} Request {:>3}/{:<3}  {}",
                green("✓"),
                done,
                total,
                dim(&format!("{secs:.1}s")),
            ));
            bar.inc(1);
        });
    }

    fn on_request_error(&self, done: usize, total: usize, _fraction: f32, error: &str) {
        let secs = self.elapsed_secs();
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.with_bar(|bar| {
            bar.println(format!(
                "  {} Request {:>3}/{:<3}  {}  {}",
                red("✗"),
                done,
                total,
                red(&msg),
                dim(&format!("{secs:.1}s")),
            ));
            bar.inc(1);
        });
    }

    fn on_scan_complete(&self, total_requests: usize, succeeded: usize) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(bar) = guard.take() {
                bar.finish_and_clear();
            }
        }
        let failed = total_requests.saturating_sub(succeeded);
        if failed == 0 {
            eprintln!(
                "{} {} requests answered",
                green("✔"),
                bold(&succeeded.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} requests answered  ({} skipped)",
                if failed == total_requests {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&succeeded.to_string()),
                total_requests,
                red(&failed.to_string()),
            );
        }
    }
}

fn page_label(pages: &Range<usize>) -> String {
    if pages.len() == 1 {
        format!("page {}", pages.start + 1)
    } else {
        format!("pages {}-{}", pages.start + 1, pages.end)
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Bootstrap report, then an interactive prompt
  pdfchat plans.pdf

  # One-shot questions
  pdfchat plans.pdf --query "How much concrete?" --deep-query "List every roofing type"

  # Cheaper flat scan: 13 pages per request
  pdfchat --batch-size 13 plans.pdf

  # Keep the evidence, reuse it later without re-scanning
  pdfchat plans.pdf --dump-evidence plans.evidence.txt
  pdfchat plans.pdf --load-evidence plans.evidence.txt --query "Steel tonnage?"

  # Whole transcript as JSON, strict JSON reports
  pdfchat --json --report json plans.pdf --query "Roofing?"

INTERACTIVE COMMANDS:
  <question>        answer from cached evidence
  /deep <question>  re-scan every page for this question
  /history          print the conversation so far
  /dump <path>      write the evidence corpus to a file
  /quit             leave

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (otherwise the system library)
"#;

/// Chat with a PDF document using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "pdfchat",
    version,
    about = "Chat with PDF documents using Vision LLMs",
    long_about = "Ask questions about a multi-page PDF (local file or URL). Every page is shown \
to a Vision Language Model once; follow-up questions are answered from the collected evidence, \
or from a fresh scan with /deep.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Question answered from cached evidence (repeatable). Skips the prompt.
    #[arg(long = "query", value_name = "QUESTION")]
    queries: Vec<String>,

    /// Question answered with a full re-scan (repeatable). Skips the prompt.
    #[arg(long = "deep-query", value_name = "QUESTION")]
    deep_queries: Vec<String>,

    /// LLM model ID (e.g. gpt-4o, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Rendering DPI (72–400).
    #[arg(long, env = "PDFCHAT_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Minimum milliseconds between two model requests.
    #[arg(long, env = "PDFCHAT_REQUEST_DELAY_MS", default_value_t = 1000)]
    request_delay_ms: u64,

    /// Pages per request; omit for one request per page.
    #[arg(long, env = "PDFCHAT_BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Evidence fragments used for a normal question.
    #[arg(long, env = "PDFCHAT_TOP_K", default_value_t = 10)]
    top_k: usize,

    /// Answer shape: prose or json.
    #[arg(long, env = "PDFCHAT_REPORT", value_enum, default_value = "prose")]
    report: ReportArg,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDFCHAT_PASSWORD")]
    password: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "PDFCHAT_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Path to a text file containing a custom bootstrap query.
    #[arg(long, env = "PDFCHAT_BOOTSTRAP_QUERY")]
    bootstrap_query: Option<PathBuf>,

    /// Max LLM output tokens per request.
    #[arg(long, env = "PDFCHAT_MAX_TOKENS", default_value_t = 3000)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PDFCHAT_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Retries per page request.
    #[arg(long, env = "PDFCHAT_MAX_RETRIES", default_value_t = 0)]
    max_retries: u32,

    /// Write the evidence corpus to this file after every scan.
    #[arg(long, env = "PDFCHAT_DUMP_EVIDENCE")]
    dump_evidence: Option<PathBuf>,

    /// Reuse evidence from a previous dump instead of the bootstrap scan.
    #[arg(long, env = "PDFCHAT_LOAD_EVIDENCE")]
    load_evidence: Option<PathBuf>,

    /// Print the transcript as JSON instead of text.
    #[arg(long, env = "PDFCHAT_JSON")]
    json: bool,

    /// Print answers only once complete.
    #[arg(long, env = "PDFCHAT_NO_STREAM")]
    no_stream: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDFCHAT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDFCHAT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except answers and errors.
    #[arg(short, long, env = "PDFCHAT_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDFCHAT_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Per-request LLM call timeout in seconds.
    #[arg(long, env = "PDFCHAT_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum ReportArg {
    Prose,
    Json,
}

impl From<ReportArg> for ReportFormat {
    fn from(v: ReportArg) -> Self {
        match v {
            ReportArg::Prose => ReportFormat::Prose,
            ReportArg::Json => ReportFormat::Json,
        }
    }
}

/// JSON transcript printed with `--json`.
#[derive(Serialize)]
struct Transcript {
    document: String,
    pages: usize,
    replies: Vec<TranscriptEntry>,
}

#[derive(Serialize)]
struct TranscriptEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    question: Option<String>,
    reply: Reply,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs while it is active.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build session ────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ScanProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb).await?;
    let stream = !cli.no_stream && !cli.json;

    let upload = resolve_input(&cli.input, config.download_timeout_secs)
        .await
        .context("Failed to read PDF")?;
    let document = PdfiumRasterizer::new(&config)
        .rasterize(upload)
        .await
        .context("Failed to rasterise PDF")?;
    let mut transcript = Transcript {
        document: document.name().to_string(),
        pages: document.page_count(),
        replies: Vec::new(),
    };

    let mut session = ChatSession::new(config).context("Failed to configure LLM provider")?;

    // ── Bootstrap ────────────────────────────────────────────────────────
    let bootstrap = if let Some(ref path) = cli.load_evidence {
        let corpus = EvidenceCorpus::load_from_file(path, &session.config().evidence_marker)
            .await
            .context("Failed to load evidence")?;
        session.ingest_with_evidence(document, corpus).await
    } else if stream {
        session.ingest_streaming(document, &mut print_delta).await
    } else {
        session.ingest(document).await
    };
    print_reply(&cli, &bootstrap, stream && cli.load_evidence.is_none());
    transcript.replies.push(TranscriptEntry {
        question: None,
        reply: bootstrap,
    });

    // ── Questions ────────────────────────────────────────────────────────
    let scripted: Vec<(String, QueryMode)> = cli
        .queries
        .iter()
        .map(|q| (q.clone(), QueryMode::Normal))
        .chain(
            cli.deep_queries
                .iter()
                .map(|q| (q.clone(), QueryMode::DeepAnalysis)),
        )
        .collect();

    if !scripted.is_empty() {
        for (question, mode) in scripted {
            let reply = ask(&mut session, &question, mode, stream).await?;
            print_reply(&cli, &reply, stream);
            transcript.replies.push(TranscriptEntry {
                question: Some(question),
                reply,
            });
        }
    } else if !cli.json {
        repl(&cli, &mut session, stream).await?;
    }

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&transcript).context("Failed to serialise transcript")?
        );
    }

    Ok(())
}

/// Interactive prompt. Ends on `/quit` or end of input.
async fn repl(cli: &Cli, session: &mut ChatSession, stream: bool) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        eprint!("{} ", cyan("❯"));
        io::stderr().flush().ok();

        let Some(line) = lines.next_line().await.context("Failed to read stdin")? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (question, mode) = match line.split_once(' ').unwrap_or((line, "")) {
            ("/quit", _) | ("/exit", _) => break,
            ("/history", _) => {
                for turn in session.history() {
                    let who = match turn.role {
                        Role::User => bold("you"),
                        Role::Assistant => cyan("assistant"),
                    };
                    println!("{who}: {}\n", turn.content);
                }
                continue;
            }
            ("/dump", path) if !path.trim().is_empty() => {
                match session.dump_evidence(PathBuf::from(path.trim()).as_path()).await {
                    Ok(()) => eprintln!("{} evidence written to {}", green("✔"), path.trim()),
                    Err(e) => eprintln!("{} {}", red("✘"), e),
                }
                continue;
            }
            ("/deep", rest) => (rest.to_string(), QueryMode::DeepAnalysis),
            (cmd, _) if cmd.starts_with('/') => {
                eprintln!("{}", dim("Commands: /deep <question>, /history, /dump <path>, /quit"));
                continue;
            }
            _ => (line.to_string(), QueryMode::Normal),
        };

        match ask(session, &question, mode, stream).await {
            Ok(reply) => print_reply(cli, &reply, stream),
            Err(e) => eprintln!("{} {}", red("✘"), e),
        }
    }

    Ok(())
}

async fn ask(
    session: &mut ChatSession,
    question: &str,
    mode: QueryMode,
    stream: bool,
) -> Result<Reply> {
    let reply = if stream {
        session
            .ask_streaming(question, mode, &mut print_delta)
            .await
    } else {
        session.ask(question, mode).await
    };
    Ok(reply?)
}

fn print_delta(delta: &str) {
    print!("{delta}");
    io::stdout().flush().ok();
}

fn print_reply(cli: &Cli, reply: &Reply, streamed: bool) {
    if cli.json {
        return;
    }
    if streamed {
        println!("\n");
    } else {
        println!("{}\n", reply.text);
    }
    if !cli.quiet {
        let mut summary = format!(
            "{:?} · {:?} · {} fragments",
            reply.path, reply.outcome, reply.fragments_used
        );
        if let Some(ref scan) = reply.scan {
            summary.push_str(&format!(
                " · scan {} {}/{} in {}ms",
                scan.scan, scan.succeeded, scan.requests, scan.duration_ms
            ));
        }
        eprintln!("{}", dim(&summary));
    }
}

/// Map CLI args to `ChatConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ChatConfig> {
    let mut builder = ChatConfig::builder()
        .dpi(cli.dpi)
        .request_delay_ms(cli.request_delay_ms)
        .top_k(cli.top_k)
        .report_format(cli.report.clone().into())
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .max_retries(cli.max_retries)
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout);

    if let Some(batch_size) = cli.batch_size {
        builder = builder.scan_mode(ScanMode::Batched { batch_size });
    }
    if let Some(ref path) = cli.system_prompt {
        builder = builder.system_prompt(read_text(path).await?);
    }
    if let Some(ref path) = cli.bootstrap_query {
        builder = builder.bootstrap_query(read_text(path).await?);
    }
    if let Some(ref path) = cli.dump_evidence {
        builder = builder.evidence_dump(path.clone());
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref password) = cli.password {
        builder = builder.password(password.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

async fn read_text(path: &PathBuf) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {:?}", path))
}
