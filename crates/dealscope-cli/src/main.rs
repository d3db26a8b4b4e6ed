use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tracing::info;

use dealscope_core::{
    BackendSettings, BatchOrchestrator, BatchReport, ChatCompletionsBackend, ClientId,
    DEFAULT_CONCURRENCY, ExecutiveReport, InferenceAdapter, ItemOutcome, ItemStatus,
    OverviewEntry, Pipeline, Provider, RecordStore, RetryPolicy, Rubric, Temperature,
    discover_transcripts, format_coaching, format_executive_report, format_scorecard,
    format_summary,
};

/// Invalid rubric, missing credential, missing input directory.
const EXIT_CONFIG: i32 = 1;
/// Every backend call failed, or the overview could not be written.
const EXIT_BACKEND: i32 = 2;

/// CLI wrapper for Provider enum (needed for clap ValueEnum)
#[derive(Clone, Default, ValueEnum)]
enum CliProvider {
    #[default]
    Openai,
    Grok,
    Gemini,
}

impl From<CliProvider> for Provider {
    fn from(cli: CliProvider) -> Self {
        match cli {
            CliProvider::Openai => Provider::Openai,
            CliProvider::Grok => Provider::Grok,
            CliProvider::Gemini => Provider::Gemini,
        }
    }
}

#[derive(Parser)]
#[command(name = "dealscope")]
#[command(about = "Analyze sales meeting transcripts and generate scored lead reports")]
struct Cli {
    /// More log output on stderr (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze every .txt transcript in a directory
    Run(RunArgs),
    /// Rebuild and print the overview from stored analyses
    Overview {
        #[command(flatten)]
        output: OutputArgs,
    },
    /// Print the stored summary and scorecard of one client
    Show {
        /// Client id (the transcript's file name without extension)
        client: String,

        #[command(flatten)]
        output: OutputArgs,

        /// Rubric used to label score bands
        #[arg(long, env = "DEALSCOPE_RUBRIC")]
        rubric: Option<PathBuf>,
    },
    /// Validate and print the rubric as JSON
    Rubric {
        /// Rubric JSON file (defaults to the built-in rubric)
        #[arg(long, env = "DEALSCOPE_RUBRIC")]
        rubric: Option<PathBuf>,
    },
}

#[derive(Args)]
struct OutputArgs {
    /// Directory holding one folder per client plus the overview files
    #[arg(short, long, env = "DEALSCOPE_OUTPUT_DIR")]
    output: Option<PathBuf>,
}

impl OutputArgs {
    fn dir(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .map(|d| d.join("dealscope").join("analyses"))
                .unwrap_or_else(|| PathBuf::from("analyses"))
        })
    }
}

#[derive(Args)]
struct RunArgs {
    /// Directory with one transcript per client
    input: PathBuf,

    #[command(flatten)]
    output: OutputArgs,

    /// AI provider for the analysis
    #[arg(short, long, env = "DEALSCOPE_PROVIDER", default_value = "openai")]
    provider: CliProvider,

    /// Model name (defaults to the provider's model)
    #[arg(short, long, env = "DEALSCOPE_MODEL")]
    model: Option<String>,

    /// Chat-completions endpoint, e.g. a local model server
    #[arg(long, env = "DEALSCOPE_BASE_URL")]
    base_url: Option<String>,

    /// Rubric JSON file (defaults to the built-in rubric)
    #[arg(long, env = "DEALSCOPE_RUBRIC")]
    rubric: Option<PathBuf>,

    /// Extra analyst notes added to every prompt
    #[arg(short, long, env = "DEALSCOPE_INSTRUCTIONS")]
    instructions: Option<String>,

    /// Transcripts analyzed in parallel
    #[arg(short, long, env = "DEALSCOPE_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Timeout for a single backend call, in seconds
    #[arg(long, env = "DEALSCOPE_TIMEOUT_SECS", default_value_t = 90)]
    timeout_secs: u64,

    /// Retries for timeouts, transport errors and rate limits
    #[arg(long, env = "DEALSCOPE_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn create_spinner(msg: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
            .template("{spinner:.cyan} {msg}")?,
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    Ok(pb)
}

fn create_progress_bar(len: usize) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("█▉▊▋▌▍▎▏ "),
    );
    pb.enable_steady_tick(Duration::from_millis(80));
    Ok(pb)
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}

fn fail(message: impl std::fmt::Display, code: i32) -> ! {
    eprintln!("{} {}", style("Error:").red().bold(), message);
    std::process::exit(code);
}

fn load_rubric(path: Option<&PathBuf>) -> Rubric {
    match path {
        Some(path) => Rubric::from_json_file(path).unwrap_or_else(|e| fail(e, EXIT_CONFIG)),
        None => Rubric::standard(),
    }
}

fn styled_temperature(temperature: &str) -> String {
    let label = temperature.trim();
    if label == Temperature::Hot.as_str() {
        style(temperature).red().bold().to_string()
    } else if label == Temperature::Warm.as_str() {
        style(temperature).yellow().to_string()
    } else {
        style(temperature).blue().to_string()
    }
}

fn outcome_line(outcome: &ItemOutcome) -> String {
    match &outcome.status {
        ItemStatus::Succeeded {
            temperature,
            priority,
            diagnostics,
            ..
        } => {
            let notes = if *diagnostics > 0 {
                style(format!(" ({} diagnostics)", diagnostics)).dim().to_string()
            } else {
                String::new()
            };
            format!(
                "{} {}  {} priority {:.2}{}",
                style("✓").green().bold(),
                outcome.label(),
                styled_temperature(temperature),
                priority,
                notes
            )
        }
        ItemStatus::Failed { kind, message } => format!(
            "{} {}  {} {}",
            style("✗").red().bold(),
            outcome.label(),
            style(kind).red(),
            style(message).dim()
        ),
    }
}

fn print_overview(entries: &[OverviewEntry]) {
    println!(
        "{}",
        style(format!(
            "{:<28} {:<15} {:>5} {:>5} {:>5}  {:<5} {}",
            "Client", "Priority", "Urg", "Need", "Fit", "Temp", "Next action"
        ))
        .bold()
    );
    for entry in entries {
        let priority = format!("{:.2} {}", entry.priority, entry.priority_class);
        println!(
            "{:<28} {:<15} {:>5.2} {:>5.2} {:>5.2}  {} {}",
            entry.client_id.as_str(),
            priority,
            entry.urgency,
            entry.need,
            entry.fit,
            styled_temperature(&format!("{:<5}", entry.temperature)),
            entry.next_action
        );
    }
}

fn print_summary(report: &BatchReport, elapsed: Duration, output_dir: &std::path::Path) {
    println!("\n{}", style("─".repeat(60)).dim());
    println!(
        "{} analyzed, {} failed in {}",
        style(report.succeeded()).green().bold(),
        style(report.failed()).red().bold(),
        format_duration(elapsed)
    );
    for (kind, count) in report.failures_by_kind() {
        println!("  {} {}", style(count).red(), kind);
    }
    println!(
        "\n{} {}",
        style("Saved:").dim(),
        style(output_dir.display()).cyan()
    );
}

async fn run(args: RunArgs) -> Result<()> {
    let rubric = Arc::new(load_rubric(args.rubric.as_ref()));
    let provider: Provider = args.provider.into();

    // Validate API key early
    let api_key = provider
        .validate_api_key()
        .unwrap_or_else(|e| fail(e, EXIT_CONFIG));

    let paths = discover_transcripts(&args.input)
        .await
        .unwrap_or_else(|e| fail(e, EXIT_CONFIG));
    if paths.is_empty() {
        println!(
            "{} No .txt transcripts in {}",
            style("!").yellow().bold(),
            args.input.display()
        );
        return Ok(());
    }

    let mut settings = BackendSettings::new(provider);
    settings.model = args.model;
    settings.api_url = args.base_url;
    settings.request_timeout = Duration::from_secs(args.timeout_secs.max(1));
    let call_timeout = settings.request_timeout + Duration::from_secs(5);

    println!(
        "\n{}  {}\n",
        style("dealscope").cyan().bold(),
        style(format!(
            "{} transcripts · {} {} · rubric {}",
            paths.len(),
            provider.name(),
            settings.model(),
            rubric.version
        ))
        .dim()
    );

    let backend = ChatCompletionsBackend::new(settings, api_key)
        .context("Failed to set up the inference backend")?;
    let adapter = InferenceAdapter::new(
        Arc::new(backend),
        RetryPolicy::new(args.max_retries),
        call_timeout,
    );
    let output_dir = args.output.dir();
    let store = Arc::new(RecordStore::new(&output_dir, rubric.clone()));
    info!(
        input = %args.input.display(),
        output = %output_dir.display(),
        concurrency = args.concurrency,
        "Batch configured"
    );
    let mut pipeline = Pipeline::new(rubric, adapter, store);
    if let Some(instructions) = args.instructions {
        pipeline = pipeline.with_instructions(instructions);
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let orchestrator = BatchOrchestrator::new(pipeline)
        .with_concurrency(args.concurrency)
        .with_progress(tx);

    let started = std::time::Instant::now();
    let pb = create_progress_bar(paths.len())?;
    let batch = tokio::spawn(async move { orchestrator.run(paths).await });

    while let Some(outcome) = rx.recv().await {
        pb.println(outcome_line(&outcome));
        pb.set_message(outcome.label());
        pb.inc(1);
    }
    pb.finish_and_clear();
    let report = batch.await.context("Batch task failed")?;

    print_summary(&report, started.elapsed(), &output_dir);

    if let Some(e) = &report.overview_error {
        fail(format!("Failed to write overview: {}", e), EXIT_BACKEND);
    }
    if report.backend_unreachable() {
        fail(
            format!("{} could not be reached for any transcript", provider.name()),
            EXIT_BACKEND,
        );
    }
    Ok(())
}

async fn overview(output: OutputArgs) -> Result<()> {
    let output_dir = output.dir();
    // Views are not re-rendered here, so the built-in rubric is enough
    let store = RecordStore::new(&output_dir, Arc::new(Rubric::standard()));

    let spinner = create_spinner("Rebuilding overview...")?;
    let entries = match store.rebuild_overview().await {
        Ok(entries) => entries,
        Err(e) => {
            spinner.finish_and_clear();
            fail(format!("Failed to write overview: {}", e), EXIT_BACKEND);
        }
    };
    spinner.finish_with_message(format!(
        "{} Overview rebuilt: {} clients",
        style("✓").green().bold(),
        entries.len()
    ));

    println!("\n{}", style("─".repeat(60)).dim());
    print_overview(&entries);
    println!("\n{}", style("─".repeat(60)).dim());
    print!(
        "{}",
        format_executive_report(&ExecutiveReport::build(&entries, Utc::now()))
    );
    println!(
        "\n{} {}",
        style("Saved:").dim(),
        style(output_dir.display()).cyan()
    );
    Ok(())
}

async fn show(client: String, output: OutputArgs, rubric: Option<PathBuf>) -> Result<()> {
    let rubric = Arc::new(load_rubric(rubric.as_ref()));
    let client_id = ClientId::new(client).unwrap_or_else(|e| fail(e, EXIT_CONFIG));
    let store = RecordStore::new(output.dir(), rubric.clone());

    let Some(record) = store.load(&client_id).await? else {
        fail(
            format!("No analysis stored for {} in {}", client_id, store.root().display()),
            EXIT_CONFIG,
        );
    };

    println!("{}", format_summary(&record));
    println!("{}", style("─".repeat(60)).dim());
    println!("{}", format_scorecard(&record, &rubric));
    println!("{}", style("─".repeat(60)).dim());
    println!("{}", format_coaching(&record));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Overview { output } => overview(output).await,
        Command::Show {
            client,
            output,
            rubric,
        } => show(client, output, rubric).await,
        Command::Rubric { rubric } => {
            let rubric = load_rubric(rubric.as_ref());
            rubric.validate().unwrap_or_else(|e| fail(e, EXIT_CONFIG));
            println!("{}", serde_json::to_string_pretty(&rubric)?);
            Ok(())
        }
    }
}
