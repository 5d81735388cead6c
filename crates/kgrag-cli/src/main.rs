//! kgrag CLI - build a knowledge graph from topics and ask questions over it

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use kgrag_core::application::{KnowledgeGraph, registry};
use kgrag_core::config::Config;
use kgrag_core::deadline::CallBudget;
use kgrag_core::domain::knowledge::{IngestReport, TopicStatus, render_context};
use kgrag_core::domain::ontology::OntologyProfile;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "kgrag")]
#[command(author, version, about = "Knowledge-graph construction and GraphRAG question answering", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Ontology profile (defaults to the configured one)
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Deadline for each external call, in seconds (0 disables it)
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Check configuration, API key and graph store
    Doctor,

    /// Fetch topics, extract entities and persist them
    Ingest {
        /// Topics to ingest (defaults to `ingest.topics`)
        topics: Vec<String>,
    },

    /// Answer a question from the knowledge graph
    Ask {
        /// Question text
        question: String,
    },

    /// Print the context retrieved for a query
    Context {
        /// Query text
        query: String,
        /// Maximum number of matches
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Extract entities from text without persisting them
    Extract {
        /// Source text
        text: String,
    },

    /// Inspect ontology profiles
    Profiles {
        #[command(subcommand)]
        action: Option<ProfileAction>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ProfileAction {
    /// List available profiles
    List,
    /// Show labels and relationship rules of a profile
    Show { id: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("kgrag=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let result = run(cli).await;
    if let Err(e) = &result {
        if let Some(core) = e.downcast_ref::<kgrag_core::Error>() {
            eprintln!("Error [{}]: {}", core.code(), core);
            if let Some(hint) = core.suggestion() {
                eprintln!("  Hint: {}", hint);
            }
            std::process::exit(1);
        }
    }
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let format = cli.format;
    let profile = cli.profile.as_deref();

    match cli.command {
        Commands::Config { action } => cmd_config(action),
        Commands::Profiles { action } => {
            cmd_profiles(action.unwrap_or(ProfileAction::List), format)
        }
        Commands::Doctor => cmd_doctor(profile, cli.timeout_secs).await,
        Commands::Ingest { topics } => {
            let graph = open_graph(profile, cli.timeout_secs).await?;
            cmd_ingest(&graph, topics, format).await
        }
        Commands::Ask { question } => {
            let graph = open_graph(profile, cli.timeout_secs).await?;
            cmd_ask(&graph, &question, format).await
        }
        Commands::Context { query, limit } => {
            let graph = open_graph(profile, cli.timeout_secs).await?;
            cmd_context(&graph, &query, limit).await
        }
        Commands::Extract { text } => {
            let graph = open_graph(profile, cli.timeout_secs).await?;
            cmd_extract(&graph, &text, format).await
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Call budget from config, overridden by `--timeout-secs`, cancelled on Ctrl-C
fn call_budget(config: &Config, timeout_secs: Option<u64>) -> CallBudget {
    let budget = match timeout_secs {
        Some(0) => CallBudget::unbounded(),
        Some(secs) => CallBudget::unbounded().with_timeout(Duration::from_secs(secs)),
        None => KnowledgeGraph::budget_from_config(config),
    };

    let token = CancellationToken::new();
    let on_interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling in-flight calls");
            on_interrupt.cancel();
        }
    });
    budget.with_cancellation(token)
}

async fn open_graph(profile: Option<&str>, timeout_secs: Option<u64>) -> anyhow::Result<KnowledgeGraph> {
    let config = Config::load()?;
    let budget = call_budget(&config, timeout_secs);
    Ok(KnowledgeGraph::open(config, profile, budget).await?)
}

fn print_section(title: &str, body: &str) {
    println!("{}", title);
    println!("{}", "-".repeat(title.chars().count()));
    println!("{}", body);
    println!();
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Characters of a topic preview shown in the ingest report
const PREVIEW_DISPLAY_CHARS: usize = 800;

fn display_preview(preview: &str) -> &str {
    match preview.char_indices().nth(PREVIEW_DISPLAY_CHARS) {
        Some((end, _)) => &preview[..end],
        None => preview,
    }
}

fn describe_profile(profile: &OntologyProfile) -> String {
    let mut lines = vec![format!("Labels: {}", profile.label_names().join(", "))];
    lines.push("Rules:".to_string());
    for (source, target, relationship) in profile.rules() {
        lines.push(format!("  {} -[{}]-> {}", source, relationship, target));
    }
    lines.join("\n")
}

// ============================================================================
// Command Implementations
// ============================================================================

async fn cmd_ingest(
    graph: &KnowledgeGraph,
    topics: Vec<String>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let topics = if topics.is_empty() {
        graph.config().ingest.topics.clone()
    } else {
        topics
    };
    if topics.is_empty() {
        anyhow::bail!("No topics given and `ingest.topics` is empty");
    }

    let service = graph.ingestion(graph.model()?)?;
    info!(count = topics.len(), profile = %graph.profile().id(), "Starting ingestion");
    let report = service.ingest_topics(&topics).await;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => print_ingest_report(&report),
    }

    if !report.topics.is_empty() && report.failed() == report.topics.len() {
        anyhow::bail!("All {} topics failed", report.failed());
    }
    Ok(())
}

fn print_ingest_report(report: &IngestReport) {
    for topic in &report.topics {
        print_section(&format!("Topic: {}", topic.topic), "");
        if let Some(preview) = &topic.preview {
            print_section("Preview", display_preview(preview));
        }

        match &topic.status {
            TopicStatus::Ingested { summary } => {
                let entities: Vec<String> = topic.entities.iter().map(|e| e.to_string()).collect();
                print_section("Extracted entities", &entities.join("\n"));
                println!(
                    "Persisted {} nodes and {} relationships",
                    summary.nodes, summary.relationships
                );
            }
            TopicStatus::NoEntities => {
                print_section(
                    "No entities extracted, raw model output",
                    topic.raw_output.as_deref().unwrap_or(""),
                );
            }
            TopicStatus::Skipped { reason } => println!("Skipped: {}", reason),
            TopicStatus::Failed { code, error } => println!("Failed [{}]: {}", code, error),
        }
        println!();
    }

    let totals = report.totals();
    println!(
        "Done: {} ingested, {} without entities, {} skipped, {} failed ({} nodes, {} relationships)",
        report.ingested(),
        report.empty(),
        report.skipped(),
        report.failed(),
        totals.nodes,
        totals.relationships
    );
}

async fn cmd_ask(graph: &KnowledgeGraph, question: &str, format: OutputFormat) -> anyhow::Result<()> {
    let synthesizer = graph.synthesizer(graph.model()?);
    let answer = synthesizer.answer(question).await?;

    match format {
        OutputFormat::Json => print_json(&json!({ "question": question, "answer": answer }))?,
        OutputFormat::Text => print_section(&format!("Q: {}", question), &answer),
    }
    Ok(())
}

async fn cmd_context(graph: &KnowledgeGraph, query: &str, limit: Option<usize>) -> anyhow::Result<()> {
    let limit = limit.unwrap_or(graph.config().graph.retrieval_limit);
    let records = graph.retriever().retrieve_context(query, limit).await?;
    println!("{}", render_context(&records));
    Ok(())
}

async fn cmd_extract(graph: &KnowledgeGraph, text: &str, format: OutputFormat) -> anyhow::Result<()> {
    let extractor = graph.extractor(graph.model()?);
    let raw = extractor.extract(text).await?;
    let entities = extractor.parse(&raw);

    match format {
        OutputFormat::Json => print_json(&entities)?,
        OutputFormat::Text if entities.is_empty() => {
            print_section("No entities extracted, raw model output", &raw);
        }
        OutputFormat::Text => {
            for entity in &entities {
                println!("{}", entity);
            }
        }
    }
    Ok(())
}

fn cmd_profiles(action: ProfileAction, format: OutputFormat) -> anyhow::Result<()> {
    let config = Config::load()?;
    let registry = registry(&config)?;

    match action {
        ProfileAction::List => match format {
            OutputFormat::Json => {
                let ids: Vec<_> = registry
                    .profiles()
                    .map(|p| json!({ "id": p.id(), "description": p.description() }))
                    .collect();
                print_json(&ids)?;
            }
            OutputFormat::Text => {
                println!("Profiles:");
                for profile in registry.profiles() {
                    let marker = if profile.id() == config.ontology.profile {
                        " (default)"
                    } else {
                        ""
                    };
                    println!("  {}{} - {}", profile.id(), marker, profile.description());
                }
            }
        },
        ProfileAction::Show { id } => {
            let profile = registry.require(&id)?;
            match format {
                OutputFormat::Json => print_json(&profile.to_definition())?,
                OutputFormat::Text => {
                    print_section(
                        &format!("{} - {}", profile.id(), profile.description()),
                        &describe_profile(&profile),
                    );
                }
            }
        }
    }
    Ok(())
}

fn cmd_config(action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            println!("Set {} = {}", key, value);
        }
        ConfigAction::List => {
            let config = Config::load()?;
            for (key, value) in config.list()? {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

async fn cmd_doctor(profile: Option<&str>, timeout_secs: Option<u64>) -> anyhow::Result<()> {
    println!("kgrag Health Check");
    println!("==================");
    println!();

    let mut all_ok = true;

    let config = match Config::load() {
        Ok(config) => {
            println!("[OK] Configuration: Valid");
            config
        }
        Err(e) => {
            println!("[!!] Configuration: Error - {:#}", e);
            println!();
            println!("Some checks failed. See above for details.");
            return Ok(());
        }
    };

    match Config::config_path() {
        Ok(path) if path.exists() => println!("[OK] Config file: {}", path.display()),
        Ok(path) => println!("[--] Config file: {} (using defaults)", path.display()),
        Err(e) => println!("[!!] Config file: Error - {}", e),
    }

    match config.llm.resolved_api_key() {
        Ok(Some(_)) => {
            let redacted = config.llm.redacted_api_key()?.unwrap_or_default();
            println!("[OK] API Key: Configured ({})", redacted);
        }
        Ok(None) => {
            all_ok = false;
            warn!("API key not configured");
            println!("[!!] API Key: Not configured");
            println!("     Set KGRAG_API_KEY or OPENROUTER_API_KEY environment variable");
        }
        Err(e) => {
            all_ok = false;
            println!("[!!] API Key: Error - {}", e);
        }
    }

    let budget = call_budget(&config, timeout_secs);
    match KnowledgeGraph::open(config, profile, budget.clone()).await {
        Ok(graph) => {
            println!("[OK] Profile: {}", graph.profile().id());
            let store = Arc::clone(graph.store());
            match budget.run("health check", store.ping()).await {
                Ok(true) => {
                    println!("[OK] Graph store: {} reachable", store.backend());
                    if let Ok(stats) = budget.run("stats", store.stats()).await {
                        println!(
                            "     Nodes: {}, relationships: {}",
                            stats.nodes, stats.relationships
                        );
                    }
                }
                Ok(false) => {
                    all_ok = false;
                    println!("[!!] Graph store: {} did not answer", store.backend());
                }
                Err(e) => {
                    all_ok = false;
                    println!("[!!] Graph store: Health check failed - {}", e);
                }
            }
        }
        Err(e) => {
            all_ok = false;
            println!("[!!] Graph store: Failed to open - {}", e);
            if let Some(hint) = e.suggestion() {
                println!("     {}", hint);
            }
        }
    }

    println!();
    if all_ok {
        println!("All checks passed!");
    } else {
        println!("Some checks failed. See above for details.");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "kgrag",
            "context",
            "Apple",
            "--limit",
            "3",
            "--profile",
            "legal",
            "--format",
            "json",
            "--timeout-secs",
            "5",
        ])
        .unwrap();

        assert_eq!(cli.profile.as_deref(), Some("legal"));
        assert!(cli.format == OutputFormat::Json);
        assert_eq!(cli.timeout_secs, Some(5));
        match cli.command {
            Commands::Context { query, limit } => {
                assert_eq!(query, "Apple");
                assert_eq!(limit, Some(3));
            }
            _ => panic!("expected context command"),
        }
    }

    #[test]
    fn test_ingest_topics_are_optional() {
        let cli = Cli::try_parse_from(["kgrag", "ingest"]).unwrap();
        assert!(matches!(cli.command, Commands::Ingest { topics } if topics.is_empty()));
    }

    #[test]
    fn test_profiles_action_defaults_to_list() {
        let cli = Cli::try_parse_from(["kgrag", "profiles"]).unwrap();
        assert!(matches!(cli.command, Commands::Profiles { action: None }));
    }

    #[test]
    fn test_display_preview_is_truncated() {
        let long = "é".repeat(2000);
        let shown = display_preview(&long);
        assert_eq!(shown.chars().count(), PREVIEW_DISPLAY_CHARS);

        assert_eq!(display_preview("short page"), "short page");
    }

    #[test]
    fn test_describe_profile_lists_rules() {
        let registry = kgrag_core::domain::ontology::OntologyRegistry::builtin();
        let profile = registry.require("customer-commerce").unwrap();
        let text = describe_profile(&profile);
        assert!(text.contains("Product -[OFFERED_BY]-> Brand"));
        assert!(text.starts_with("Labels: Customer"));
    }
}
