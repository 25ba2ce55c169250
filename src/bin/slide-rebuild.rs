//! CLI binary for slide-rebuild.
//!
//! A thin shim over the library crate: maps CLI flags to an
//! `OrchestratorConfig` plus one `TaskOptions`, submits every input as a
//! task, and renders each task's progress stream as a bar.

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use slide_rebuild::{
    Collaborators, LlmVisionAnalyzer, LlmVisionConfig, Orchestrator, OrchestratorConfig,
    OutputFormat, ProgressSnapshot, ProgressStatus, TaskId, TaskOptions, TaskRequest,
};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

const AFTER_HELP: &str = r#"EXAMPLES:
  # Rebuild one slide (HTML + slide deck JSON under ./output/single/<task-id>/)
  slide-rebuild slide.png

  # Several slides, two at a time, grouped in one batch folder
  slide-rebuild -c 2 --batch deck_01 s1.png s2.png s3.png

  # Render over a clean background you already have
  slide-rebuild --background clean.png slide.png

  # Drop footer text and use another model
  slide-rebuild --exclude "Confidential, Draft" --model gpt-4.1 slide.png

  # Machine-readable result
  slide-rebuild --json slide.png > result.json

OUTPUT (per task):
  background.png         text-free background
  layout.json            every detected text block
  layout_filtered.json   blocks that are rendered (exclusions removed)
  slide.html             absolutely positioned live text over the background
  slide.deck.json        16:9 slide deck description (inches, points, hex colours)

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)

Press Ctrl-C once to cancel every running task; outputs already written stay.
"#;

/// Rebuild slide images into editable slides using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "slide-rebuild",
    version,
    about = "Rebuild slide images into editable HTML and slide decks using Vision LLMs",
    long_about = "Detect the text on slide images with a Vision Language Model, erase it from \
the image, and lay it back out as live text over the clean background. Local files and \
HTTP/HTTPS URLs are accepted; several inputs run concurrently under a shared cap.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Slide images: local paths or HTTP/HTTPS URLs.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Root directory for task outputs.
    #[arg(short, long, env = "SLIDE_REBUILD_OUTPUT", default_value = "output")]
    output: PathBuf,

    /// Clean background to render over instead of inpainting (one input only).
    #[arg(long, env = "SLIDE_REBUILD_BACKGROUND")]
    background: Option<PathBuf>,

    /// Vision model ID (e.g. gpt-4.1-nano, gpt-4.1, gemini-2.0-flash).
    #[arg(long, env = "EDGEQUAKE_MODEL", default_value = "gpt-4.1-nano")]
    model: String,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Inpainting backend.
    #[arg(long, env = "SLIDE_REBUILD_INPAINTER", default_value = "diffusion")]
    inpainter: String,

    /// Which outputs to render.
    #[arg(long, env = "SLIDE_REBUILD_FORMAT", value_enum, default_value = "both")]
    format: FormatArg,

    /// Number of tasks processed at once.
    #[arg(short, long, env = "SLIDE_REBUILD_CONCURRENCY", default_value_t = 3,
          value_parser = clap::value_parser!(u64).range(1..=64))]
    concurrency: u64,

    /// Comma-separated keywords; text blocks containing one are not rendered.
    #[arg(long, env = "SLIDE_REBUILD_EXCLUDE")]
    exclude: Option<String>,

    /// Font family for the rendered text.
    #[arg(long, env = "SLIDE_REBUILD_FONT", default_value = "Malgun Gothic")]
    font: String,

    /// Skip the second layout pass.
    #[arg(long, env = "SLIDE_REBUILD_NO_REFINE")]
    no_refine: bool,

    /// Sub-folder of the output directory grouping these tasks.
    #[arg(long = "batch", env = "SLIDE_REBUILD_BATCH", default_value = "single")]
    batch_folder: String,

    /// Upper bound on a single model or image call, in seconds. 0 disables.
    #[arg(long, env = "SLIDE_REBUILD_STAGE_TIMEOUT", default_value_t = 300)]
    stage_timeout: u64,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "SLIDE_REBUILD_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Retries per vision call on LLM failure.
    #[arg(long, env = "SLIDE_REBUILD_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Print final snapshots as JSON instead of a summary.
    #[arg(long, env = "SLIDE_REBUILD_JSON")]
    json: bool,

    /// Disable progress bars.
    #[arg(long, env = "SLIDE_REBUILD_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "SLIDE_REBUILD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "SLIDE_REBUILD_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Html,
    Deck,
    Both,
}

impl From<FormatArg> for OutputFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Html => OutputFormat::Markup,
            FormatArg::Deck => OutputFormat::Document,
            FormatArg::Both => OutputFormat::Both,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The bars carry the feedback; library INFO logs would tear them.
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

    // ── Build orchestrator ───────────────────────────────────────────────
    let config = OrchestratorConfig::builder()
        .max_concurrent(cli.concurrency as usize)
        .output_dir(&cli.output)
        .stage_timeout_secs((cli.stage_timeout > 0).then_some(cli.stage_timeout))
        .build()
        .context("Invalid configuration")?;

    let mut vision = LlmVisionConfig::builder()
        .temperature(cli.temperature)
        .max_retries(cli.max_retries);
    if let Some(ref p) = cli.provider {
        vision = vision.provider_name(p);
    }
    let analyzer = Arc::new(LlmVisionAnalyzer::new(vision.build()));
    let orch = Arc::new(
        Orchestrator::new(config, Collaborators::with_defaults(analyzer))
            .context("Failed to start orchestrator")?,
    );

    let options = build_options(&cli)?;
    if cli.background.is_some() && cli.inputs.len() > 1 {
        anyhow::bail!("--background pairs with exactly one input image");
    }

    // ── Submit ───────────────────────────────────────────────────────────
    let mut submitted: Vec<(String, TaskId)> = Vec::with_capacity(cli.inputs.len());
    for input in &cli.inputs {
        let request = match cli.background {
            Some(ref bg) => TaskRequest::combine(input.as_str(), bg.clone(), options.clone()),
            None => TaskRequest::reconstruct(input.as_str(), options.clone()),
        };
        let id = orch
            .submit(request)
            .with_context(|| format!("Failed to submit {input}"))?;
        submitted.push((input.clone(), id));
    }

    // ── Watch ────────────────────────────────────────────────────────────
    let bars = show_progress.then(MultiProgress::new);
    let watchers = submitted.iter().map(|(input, id)| {
        let bar = bars.as_ref().map(|m| m.add(task_bar(input)));
        watch_task(Arc::clone(&orch), id.clone(), bar)
    });
    let mut all = Box::pin(futures::future::join_all(watchers));

    let finals = tokio::select! {
        finals = &mut all => finals,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("{} cancelling {} task(s)…", yellow("■"), submitted.len());
            for (_, id) in &submitted {
                // A task that already finished stays finished.
                let _ = orch.cancel(id);
            }
            all.await
        }
    };

    // ── Report ───────────────────────────────────────────────────────────
    let mut failed = 0usize;
    let mut results = Vec::with_capacity(finals.len());
    for ((input, id), snapshot) in submitted.iter().zip(finals) {
        let snapshot = snapshot.with_context(|| format!("Lost track of task {id}"))?;
        if snapshot.status == ProgressStatus::Error {
            failed += 1;
        }
        results.push((input, id, snapshot));
    }

    if cli.json {
        let json: Vec<_> = results
            .iter()
            .map(|(input, id, snap)| {
                serde_json::json!({ "input": input, "task_id": id, "result": snap })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&json).context("Failed to serialise results")?
        );
    } else if !cli.quiet {
        for (input, id, snap) in &results {
            print_summary(&cli.output, input, id, snap);
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} task(s) failed", results.len());
    }
    Ok(())
}

/// Map CLI args to per-task options.
fn build_options(cli: &Cli) -> Result<TaskOptions> {
    let mut builder = TaskOptions::builder()
        .vision_backend(&cli.model)
        .inpainting_backend(&cli.inpainter)
        .output_format(cli.format.into())
        .font_family(&cli.font)
        .refine_layout(!cli.no_refine)
        .batch_folder(&cli.batch_folder);
    if let Some(ref kw) = cli.exclude {
        builder = builder.exclude_keywords(kw);
    }
    builder.build().context("Invalid task options")
}

fn task_bar(input: &str) -> ProgressBar {
    let style = ProgressStyle::with_template(
        "{spinner:.cyan} {prefix:.bold:<24}  [{bar:30.green/238}] {pos:>3}%  {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("█▉▊▋▌▍▎▏  ")
    .tick_strings(TICKS);

    let bar = ProgressBar::new(100);
    bar.set_style(style);
    bar.set_prefix(short_name(input));
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

/// Follow one task to its terminal snapshot, mirroring it on `bar`.
async fn watch_task(
    orch: Arc<Orchestrator>,
    id: TaskId,
    bar: Option<ProgressBar>,
) -> Result<ProgressSnapshot, slide_rebuild::SlideError> {
    let mut stream = orch.stream_progress(&id)?;
    let mut last = None;
    while let Some(snap) = stream.next().await {
        if let Some(ref bar) = bar {
            bar.set_position(u64::from(snap.percent));
            bar.set_message(match snap.status {
                ProgressStatus::Paused => yellow(&snap.message),
                ProgressStatus::Error => red(&snap.message),
                _ => snap.message.clone(),
            });
        }
        last = Some(snap);
    }
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }
    match last {
        Some(s) if s.is_terminal() => Ok(s),
        _ => orch.snapshot(&id),
    }
}

fn print_summary(root: &std::path::Path, input: &str, id: &TaskId, snap: &ProgressSnapshot) {
    match snap.status {
        ProgressStatus::Complete => {
            eprintln!("{} {}  {}", green("✔"), bold(input), dim(id.as_str()));
            if let Some(ref m) = snap.data {
                eprintln!(
                    "   {} blocks ({} rendered)  {}×{}px",
                    m.items, m.rendered_items, m.width, m.height
                );
                for path in [Some(&m.background), m.markup.as_ref(), m.document.as_ref()]
                    .into_iter()
                    .flatten()
                {
                    eprintln!("   → {}", root.join(path).display());
                }
            }
        }
        ProgressStatus::Cancelled => {
            eprintln!("{} {}  {}", yellow("■"), bold(input), dim(&snap.message));
        }
        _ => {
            eprintln!("{} {}  {}", red("✘"), bold(input), red(&snap.message));
        }
    }
}

/// Last path segment, truncated for the bar prefix.
fn short_name(input: &str) -> String {
    let name = input
        .trim_end_matches('/')
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(input);
    if name.chars().count() > 24 {
        let head: String = name.chars().take(23).collect();
        format!("{head}\u{2026}")
    } else {
        name.to_string()
    }
}
