mod output;
mod repl;

use clap::{CommandFactory, Parser, Subcommand};
use smartquery_common::Config;
use smartquery_core::{column_statistics, Dataset, QueryEngine, QueryFailure};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "smartquery", version, about = "Ask questions of a table in plain language")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Resolve queries locally only, even when a provider key is configured
    #[arg(long, global = true)]
    heuristic_only: bool,
    /// Print rows as JSON instead of a table
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single query and print the result
    Query {
        source: String,
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
    /// Interactive session; each line is a query
    Repl { source: String },
    /// Print the dataset's columns, types and row count
    Schema { source: String },
    /// Per-column counts, nulls, distinct values and numeric ranges
    Stats { source: String },
    /// Generate shell completions
    Completions { shell: clap_complete::Shell },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "ignoring unreadable config");
        Config::default()
    });
    let style = output::Style { json: cli.json, max_rows: config.display.max_rows_preview };

    match cli.command {
        Commands::Query { source, text } => {
            let engine = open_engine(&source, &config, cli.heuristic_only)?;
            run_query(&engine, &text.join(" "), &style).await?;
        }
        Commands::Repl { source } => {
            let engine = open_engine(&source, &config, cli.heuristic_only)?;
            repl::run(&engine, &style).await?;
        }
        Commands::Schema { source } => {
            let dataset = load(&source)?;
            output::print_schema(dataset.columns(), dataset.len(), &style)?;
        }
        Commands::Stats { source } => {
            let dataset = load(&source)?;
            output::print_stats(&column_statistics(&dataset), &style)?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "smartquery", &mut std::io::stdout());
        }
    }
    Ok(())
}

fn load(source: &str) -> anyhow::Result<Dataset> {
    Dataset::load(source).map_err(|e| anyhow::anyhow!("{source}: {e}"))
}

fn open_engine(source: &str, config: &Config, heuristic_only: bool) -> anyhow::Result<QueryEngine> {
    let dataset = load(source)?;
    let engine = QueryEngine::from_config(dataset, config, heuristic_only)?;
    if !engine.remote_available() && !heuristic_only {
        tracing::info!("no provider key configured; resolving queries locally only");
    }
    Ok(engine)
}

pub(crate) async fn run_query(engine: &QueryEngine, text: &str, style: &output::Style) -> anyhow::Result<()> {
    match engine.submit_query(text).await {
        Ok(outcome) => {
            if let Some(analysis) = &outcome.analysis {
                println!("{analysis}");
            }
            output::print_rows(engine.dataset().columns(), &outcome.rows, style)?;
        }
        Err(QueryFailure::Resolution { error, fallback }) => {
            eprintln!("{}", error.user_message());
            output::print_rows(engine.dataset().columns(), &fallback, style)?;
        }
        Err(other) => eprintln!("{other}"),
    }
    Ok(())
}
