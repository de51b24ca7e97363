//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::info;

use studykit_core::assessment::{AssessmentEngine, QuizOutcome, QuizPhase};
use studykit_core::pipeline::{Orchestrator, ProgressReporter, RunOutcome, RunReport};
use studykit_core::session::{Session, Stage};
use studykit_reasoning::{GeminiService, ReasoningClient, RetryPolicy};
use studykit_shared::{
    AppConfig, Artifacts, StudyKitError, init_config, load_config, load_config_from,
    resolve_api_key,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// StudyKit — turn study material into summaries, knowledge graphs and quizzes.
#[derive(Parser)]
#[command(
    name = "studykit",
    version,
    about = "Analyze a document into a summary, knowledge graph and study topics, then quiz yourself.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.studykit/studykit.toml.
    #[arg(long, global = true, env = "STUDYKIT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the reasoning model from the config file.
    #[arg(long, global = true)]
    pub model: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Report output format.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Analyze a document and print its summary, topics and knowledge graph.
    Analyze {
        /// Text or Markdown file to analyze.
        file: PathBuf,

        /// Output format.
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Analyze a document, then take an adaptive quiz on one of its topics.
    Quiz {
        /// Text or Markdown file to analyze.
        file: PathBuf,

        /// Topic number (as listed after analysis); prompts if omitted.
        #[arg(short, long)]
        topic: Option<usize>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "studykit=warn",
        1 => "studykit=info",
        2 => "studykit=debug",
        _ => "studykit=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = resolve_config(cli.config.as_deref(), cli.model)?;
    match cli.command {
        Command::Analyze { file, format } => cmd_analyze(&config, &file, format).await,
        Command::Quiz { file, topic } => cmd_quiz(&config, &file, topic).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&config).await,
        },
    }
}

fn resolve_config(path: Option<&Path>, model: Option<String>) -> Result<AppConfig> {
    let config = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    Ok(resolve_config_with(config, model))
}

/// Apply command-line overrides on top of the loaded config.
fn resolve_config_with(mut config: AppConfig, model: Option<String>) -> AppConfig {
    if let Some(model) = model {
        config.reasoning.model = model;
    }
    config
}

fn build_client(config: &AppConfig) -> Result<ReasoningClient> {
    let api_key = resolve_api_key(config)?;
    let service = GeminiService::new(&config.reasoning, api_key)?;
    Ok(ReasoningClient::new(
        Arc::new(service),
        config.reasoning.model.clone(),
        RetryPolicy::from(&config.retry),
    ))
}

/// Attach the user-facing message for the error's classification.
fn explain(e: StudyKitError) -> color_eyre::Report {
    let message = e.classification().user_message();
    color_eyre::Report::new(e).wrap_err(message)
}

/// Run the pipeline over `file` with a spinner.
async fn analyze(
    orchestrator: &Orchestrator,
    session: &Session,
    file: &Path,
) -> Result<RunReport> {
    info!(file = %file.display(), model = orchestrator.client().model(), "analyzing document");

    let reporter = CliProgress::new();
    let outcome = orchestrator.analyze_file(session, file, &reporter).await;
    reporter.clear();

    match outcome.map_err(explain)? {
        RunOutcome::Ready(report) => Ok(report),
        RunOutcome::Superseded => Err(eyre!("analysis was superseded by a newer run")),
    }
}

// ---------------------------------------------------------------------------
// analyze
// ---------------------------------------------------------------------------

async fn cmd_analyze(config: &AppConfig, file: &Path, format: OutputFormat) -> Result<()> {
    let client = build_client(config)?;
    let orchestrator = Orchestrator::new(client, config.pipeline.clone());
    let session = Session::new();

    let report = analyze(&orchestrator, &session, file).await?;

    match format {
        OutputFormat::Json => {
            let out = serde_json::json!({
                "run_id": report.run_id.to_string(),
                "elapsed_ms": report.elapsed.as_millis() as u64,
                "retries": report
                    .stages
                    .iter()
                    .map(|s| serde_json::json!({ "stage": s.stage, "retries": s.retries }))
                    .collect::<Vec<_>>(),
                "artifacts": report.artifacts.as_ref(),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            print_artifacts(&report.artifacts);
            println!(
                "  Run {} finished in {:.1}s ({} retries)",
                report.run_id,
                report.elapsed.as_secs_f64(),
                report.total_retries()
            );
            println!();
        }
    }

    Ok(())
}

fn print_artifacts(artifacts: &Artifacts) {
    let summary = &artifacts.summary;
    println!();
    println!("  Overview");
    println!("  {}", summary.overview);
    println!();
    println!("  Key takeaways");
    for takeaway in &summary.key_takeaways {
        println!("  - {takeaway}");
    }
    println!();
    println!("  Summary");
    println!("  {}", summary.detailed_summary);
    println!();

    print_topics(artifacts);

    let graph = &artifacts.knowledge_graph;
    println!(
        "  Knowledge graph ({} entities, {} relationships)",
        graph.entities.len(),
        graph.relationships.len()
    );
    for entity in &graph.entities {
        let mut edges = graph.outgoing(&entity.id).peekable();
        if edges.peek().is_none() {
            continue;
        }
        println!("  {} ({})", entity.name, entity.entity_type.as_str());
        for rel in edges {
            let target = graph
                .entity(&rel.target)
                .map_or(rel.target.as_str(), |e| e.name.as_str());
            println!("    --{}--> {target}", rel.relation);
        }
    }
    println!();
}

fn print_topics(artifacts: &Artifacts) {
    println!("  Topics");
    for (i, topic) in artifacts.topics.iter().enumerate() {
        println!(
            "  {:>2}. {} (difficulty {}/5, importance {}/10)",
            i + 1,
            topic.title,
            topic.difficulty_level,
            topic.importance_score
        );
        println!("      {}", topic.summary);
    }
    println!();
}

// ---------------------------------------------------------------------------
// quiz
// ---------------------------------------------------------------------------

type Input = Lines<BufReader<Stdin>>;

async fn cmd_quiz(config: &AppConfig, file: &Path, topic: Option<usize>) -> Result<()> {
    let client = build_client(config)?;
    let orchestrator = Orchestrator::new(client.clone(), config.pipeline.clone());
    let engine = AssessmentEngine::new(
        client,
        config.quiz.question_count,
        config.pipeline.stage_timeout(),
    );
    let session = Session::new();
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    let report = analyze(&orchestrator, &session, file).await?;
    let artifacts = report.artifacts;
    print_topics(&artifacts);

    let index = match topic {
        Some(n) => n,
        None => prompt_number(&mut input, "Pick a topic", artifacts.topics.len()).await?,
    };
    let chosen = index
        .checked_sub(1)
        .and_then(|i| artifacts.topics.get(i))
        .ok_or_else(|| eyre!("topic {index} does not exist (1..={})", artifacts.topics.len()))?;

    let generating = start_spinner(format!("Generating quiz on {}", chosen.title));
    let outcome = engine.start_quiz(&session, &chosen.topic_id).await;
    generating.finish_and_clear();
    report_generation(outcome.map_err(explain)?)?;

    loop {
        play_quiz(&engine, &session, &mut input).await?;

        let answer = prompt_line(&mut input, "Retake with adapted difficulty? [y/N]").await?;
        if !matches!(answer.trim(), "y" | "Y" | "yes") {
            break;
        }

        let generating = start_spinner("Generating a new quiz".to_string());
        let outcome = engine.adaptive_retake(&session).await;
        generating.finish_and_clear();
        match outcome {
            Ok(outcome) => report_generation(outcome)?,
            Err(e) => {
                // the completed quiz is still intact, so let the user try again
                eprintln!("  {}", e.classification().user_message());
                info!(error = %e, "retake failed");
            }
        }
    }

    Ok(())
}

fn report_generation(outcome: QuizOutcome) -> Result<()> {
    match outcome {
        QuizOutcome::Installed {
            questions,
            directive,
        } => {
            match directive {
                Some(d) => println!("  {questions} new questions ({d:?} mode)"),
                None => println!("  {questions} questions"),
            }
            println!();
            Ok(())
        }
        QuizOutcome::Superseded => Err(eyre!("quiz generation was superseded")),
    }
}

async fn play_quiz(engine: &AssessmentEngine, session: &Session, input: &mut Input) -> Result<()> {
    loop {
        let quiz = session
            .quiz()
            .await
            .ok_or_else(|| eyre!("no active quiz"))?;

        let (index, question) = match (quiz.current_index(), quiz.current_question()) {
            (Some(i), Some(q)) => (i, q.clone()),
            _ => break,
        };

        if let QuizPhase::Presenting { .. } = quiz.phase() {
            println!("  Question {}/{}: {}", index + 1, quiz.total(), question.question);
            for (n, option) in question.options.iter().enumerate() {
                println!("    {}) {option}", n + 1);
            }
            let choice = prompt_number(input, "Your answer", question.options.len()).await?;
            engine
                .select(session, &question.options[choice - 1])
                .await
                .map_err(explain)?;

            let feedback = engine.submit(session).await.map_err(explain)?;
            if feedback.correct {
                println!("  Correct! {}", feedback.explanation);
            } else {
                println!(
                    "  Incorrect. The answer is \"{}\". {}",
                    feedback.correct_answer, feedback.explanation
                );
            }
            println!();
        }

        if let QuizPhase::Completed { score } = engine.advance(session).await.map_err(explain)? {
            println!("  Quiz complete: {score}/{} correct", quiz.total());
            println!();
            break;
        }
    }
    Ok(())
}

async fn prompt_line(input: &mut Input, prompt: &str) -> Result<String> {
    eprint!("  {prompt}: ");
    input
        .next_line()
        .await
        .wrap_err("failed to read from stdin")?
        .ok_or_else(|| eyre!("stdin closed"))
}

/// Ask until the user enters a number in `1..=max`.
async fn prompt_number(input: &mut Input, prompt: &str, max: usize) -> Result<usize> {
    loop {
        let line = prompt_line(input, &format!("{prompt} [1-{max}]")).await?;
        match line.trim().parse::<usize>() {
            Ok(n) if (1..=max).contains(&n) => return Ok(n),
            _ => eprintln!("  Please enter a number between 1 and {max}."),
        }
    }
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

fn start_spinner(message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        spinner.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    spinner.set_message(message);
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    spinner
}

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        Self {
            spinner: start_spinner(Stage::Ingesting.label().to_string()),
        }
    }

    fn clear(&self) {
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, stage: Stage) {
        self.spinner.set_message(stage.label().to_string());
    }

    fn stage_retried(&self, stage: Stage, retries: u32) {
        self.spinner
            .println(format!("  {} succeeded after {retries} rate-limit retries", stage.label()));
    }

    fn done(&self, _report: &RunReport) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_analyze_with_global_flags() {
        let cli = Cli::try_parse_from([
            "studykit",
            "analyze",
            "notes.md",
            "--format",
            "json",
            "-vv",
            "--model",
            "gemini-2.5-pro",
        ])
        .expect("parse");
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.model.as_deref(), Some("gemini-2.5-pro"));
        assert!(matches!(
            cli.command,
            Command::Analyze {
                format: OutputFormat::Json,
                ..
            }
        ));
    }

    #[test]
    fn parses_quiz_topic() {
        let cli = Cli::try_parse_from(["studykit", "quiz", "notes.txt", "--topic", "2"])
            .expect("parse");
        assert!(matches!(cli.command, Command::Quiz { topic: Some(2), .. }));
    }

    #[test]
    fn model_flag_overrides_config() {
        let config = resolve_config_with(AppConfig::default(), Some("override".into()));
        assert_eq!(config.reasoning.model, "override");
        let config = resolve_config_with(AppConfig::default(), None);
        assert_eq!(config.reasoning.model, AppConfig::default().reasoning.model);
    }
}
