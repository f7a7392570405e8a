use std::process::ExitCode;
use std::sync::Arc;

use ai_client::OpenAi;
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use noir_common::{Config, RoleClass};
use noir_graph::{
    BundleStatus, CancellationToken, EvidenceReader, EvidenceStore, GraphClient,
    InvestigationRequest, Investigator, RetrievalOptions,
};
use noir_profiler::{load_taxonomy, LlmNarrator, NarrativeRenderer};

#[derive(Parser)]
#[command(name = "noir")]
#[command(about = "Rank suspects from a case knowledge graph")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Investigate a question such as "Who killed Tupac?"
    Ask {
        question: String,

        /// Name fragment of the entity under investigation (skips extraction from the question)
        #[arg(long)]
        target: Option<String>,

        /// Name fragment of a suspect whose own relations should be surfaced (repeatable)
        #[arg(long = "suspect")]
        suspects: Vec<String>,

        /// Longest chain to follow (clamped to 2..=6)
        #[arg(long)]
        max_hops: Option<usize>,

        /// Print the evidence bundle as JSON
        #[arg(long)]
        json: bool,

        /// Have the language model narrate the bundle
        #[arg(long)]
        narrate: bool,
    },

    /// Ping the graph store and print node and relationship counts
    Check,

    /// Print the effective relation taxonomy
    Taxonomy {
        /// Print in the JSON format NOIR_TAXONOMY_PATH accepts
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    if let Err(e) = init_tracing() {
        eprintln!("Error: {:#}", e);
        return ExitCode::from(1);
    }

    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("noir=info".parse()?))
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Ask {
            question,
            target,
            suspects,
            max_hops,
            json,
            narrate,
        } => {
            let request = InvestigationRequest {
                question,
                target,
                suspects,
                max_hops,
            };
            cmd_ask(request, json, narrate).await
        }
        Commands::Check => cmd_check().await,
        Commands::Taxonomy { json } => cmd_taxonomy(json),
    }
}

async fn connect(config: &Config) -> Result<EvidenceReader> {
    let client =
        GraphClient::connect(&config.neo4j_uri, &config.neo4j_user, &config.neo4j_password)
            .await?;
    Ok(EvidenceReader::new(client))
}

async fn cmd_ask(request: InvestigationRequest, json: bool, narrate: bool) -> Result<ExitCode> {
    let config = Config::from_env()?;
    config.log_redacted();

    // Fail before touching the graph if narration cannot run.
    let narrate_key = if narrate {
        let api_key = config
            .openai_api_key
            .clone()
            .ok_or_else(|| anyhow!("--narrate requires OPENAI_API_KEY"))?;
        Some(api_key)
    } else {
        None
    };

    let taxonomy = Arc::new(load_taxonomy(config.taxonomy_path.as_deref())?);
    let store: Arc<dyn EvidenceStore> = Arc::new(connect(&config).await?);
    let options = RetrievalOptions::builder()
        .max_hops(config.max_hops)
        .query_timeout(config.query_timeout)
        .build();
    let investigator = Investigator::new(store, taxonomy.clone(), options);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling investigation");
            on_interrupt.cancel();
        }
    });

    let bundle = investigator
        .investigate_with_cancel(&request, cancel)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&bundle)?);
    } else {
        print!("{}", bundle.render_text());
    }

    if let Some(api_key) = narrate_key {
        let narrator = LlmNarrator::new(OpenAi::new(api_key, &config.model), taxonomy)
            .with_temperature(config.temperature);
        info!(model = config.model.as_str(), "Requesting narrative");
        let text = narrator.narrate(&bundle).await?;
        println!("\n{text}");
    }

    Ok(match bundle.status {
        BundleStatus::Ranked => ExitCode::SUCCESS,
        BundleStatus::NoSuchEntity | BundleStatus::NoEvidence => ExitCode::from(2),
    })
}

async fn cmd_check() -> Result<ExitCode> {
    let config = Config::from_env()?;
    config.log_redacted();

    let client =
        GraphClient::connect(&config.neo4j_uri, &config.neo4j_user, &config.neo4j_password)
            .await?;
    client.ping().await?;
    println!("Connected to {}", config.neo4j_uri);

    let stats = EvidenceReader::new(client).stats().await?;
    println!("Nodes: {}", stats.nodes);
    println!("Relationships: {}", stats.relationships);
    if !stats.top_relations.is_empty() {
        println!("Top relationship types:");
        for (label, count) in &stats.top_relations {
            println!("  {label}: {count}");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_taxonomy(json: bool) -> Result<ExitCode> {
    let path = std::env::var("NOIR_TAXONOMY_PATH")
        .ok()
        .filter(|p| !p.trim().is_empty());
    let taxonomy = load_taxonomy(path.as_deref())?;

    if json {
        println!("{}", taxonomy.to_json_string()?);
        return Ok(ExitCode::SUCCESS);
    }
    for role in RoleClass::ALL {
        let labels = taxonomy.labels_for(role);
        if labels.is_empty() {
            continue;
        }
        println!("{role}:");
        for label in labels {
            println!("  {label} {:.2}", taxonomy.weight(label));
        }
    }
    Ok(ExitCode::SUCCESS)
}
