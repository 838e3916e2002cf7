//! docket: plain-language explanations of public criminal court records
//!
//! Subcommands:
//! - `serve`: HTTP API for the chat UI (`/health`, `/explain-case`, `/chat`)
//! - `explain`: one-shot explanation of a case
//! - `pack`: the deterministic context pack, no LLM call
//! - `stats`: outcome statistics for a cohort
//! - `sample`: pick a recent open case for a demo

mod server;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use docket_core::build_context_pack;
use docket_runtime::{
    fetch_case_record, find_open_case, ComparisonStatsService, Orchestrator, ProviderRegistry,
    RuntimeConfig, SocrataClient, StatsCache,
};

#[derive(Parser, Debug)]
#[command(name = "docket")]
#[command(about = "Explain public criminal court records in plain language")]
#[command(version)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "DOCKET_CONFIG")]
    config: Option<PathBuf>,

    /// LLM model (overrides config file)
    #[arg(long, env = "DOCKET_MODEL")]
    model: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API
    Serve {
        #[arg(long, env = "DOCKET_BIND", default_value = "127.0.0.1:8000")]
        bind: SocketAddr,
    },

    /// Explain a case (JSON to stdout)
    Explain {
        /// Case participant id or case id
        id: String,
    },

    /// Print the context pack for a case
    Pack {
        /// Case participant id or case id
        id: String,
    },

    /// Outcome statistics for similar closed cases
    Stats {
        /// Stage id, e.g. POST_ARRAIGNMENT_PRETRIAL
        #[arg(long)]
        stage: String,

        #[arg(long)]
        offense: Option<String>,

        #[arg(long)]
        class: Option<String>,
    },

    /// Find a recent open case and print its context pack
    Sample {
        /// Recent initiations to scan
        #[arg(long, default_value_t = 50)]
        candidates: usize,

        /// Print the full explanation instead of the pack
        #[arg(long)]
        explain: bool,
    },
}

fn load_config(cli: &Cli) -> anyhow::Result<RuntimeConfig> {
    let mut config = match &cli.config {
        Some(path) => RuntimeConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => {
            info!("No config file given, using defaults");
            RuntimeConfig::default()
        }
    };

    if let Some(model) = &cli.model {
        config.llm.model = model.clone();
    }

    config.validate()?;
    Ok(config)
}

fn build_orchestrator(config: RuntimeConfig) -> anyhow::Result<Orchestrator> {
    let provider = ProviderRegistry::with_defaults().create(&config.llm)?;
    let source = Arc::new(SocrataClient::new(config.socrata.clone())?);

    Ok(Orchestrator::builder()
        .provider(provider)
        .source(source)
        .config(config)
        .build()?)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("docket=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Command::Serve { bind } => {
            info!(model = %config.llm.model, provider = %config.llm.provider, "Starting docket API");
            let orchestrator = Arc::new(build_orchestrator(config)?);
            let app = server::create_router(orchestrator)?;

            info!("Listening on http://{}", bind);
            let listener = tokio::net::TcpListener::bind(bind).await?;
            axum::serve(listener, app).await?;
        }

        Command::Explain { id } => {
            let orchestrator = build_orchestrator(config)?;
            print_json(&orchestrator.explain_case(&id).await)?;
        }

        Command::Pack { id } => {
            let client = SocrataClient::new(config.socrata)?;
            let record = fetch_case_record(&client, &id)
                .await
                .with_context(|| format!("Case not found: {}", id))?;
            print_json(&build_context_pack(&record))?;
        }

        Command::Stats {
            stage,
            offense,
            class,
        } => {
            let client = Arc::new(SocrataClient::new(config.socrata.clone())?);
            let service = ComparisonStatsService::new(
                client,
                StatsCache::from_config(&config.stats),
                config.socrata.page_size,
            );
            let stats = service
                .compute_for_user_context(Some(&stage), offense.as_deref(), class.as_deref())
                .await;
            print_json(&stats)?;
        }

        Command::Sample {
            candidates,
            explain,
        } => {
            let client = SocrataClient::new(config.socrata.clone())?;
            let id = find_open_case(&client, candidates)
                .await?
                .and_then(|row| row.text("case_participant_id"))
                .with_context(|| format!("No open case among the {} newest initiations", candidates))?;
            info!(case_participant_id = %id, "sample case");

            if explain {
                let orchestrator = build_orchestrator(config)?;
                print_json(&orchestrator.explain_case(&id).await)?;
            } else {
                let record = fetch_case_record(&client, &id)
                    .await
                    .with_context(|| format!("Case not found: {}", id))?;
                print_json(&build_context_pack(&record))?;
            }
        }
    }

    Ok(())
}
