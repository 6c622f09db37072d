//! metamapper - command line entry point.
//!
//! Connects to one database and runs a single command: hand out sequence
//! ids, run a query, or count the rows of a table.

use clap::{Parser, Subcommand};
use metamapper::config::Config;
use metamapper::db::{CrudEngine, DbPool, DbSequenceSource, QueryExecutor, SequenceAllocator};
use metamapper::models::{QueryParam, TableMetadata};
use serde_json::Value as JsonValue;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Debug, Parser)]
#[command(
    name = "metamapper",
    about = "Metadata-driven CRUD, batched transactions and cached sequence ids for SQL databases",
    version
)]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print ids from the sequence allocator
    NextId {
        /// Number of ids to print
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
    /// Run a query and print each row as a JSON line
    Query {
        sql: String,
        /// Positional parameter; JSON literals are bound as typed values
        #[arg(long = "param", value_name = "VALUE")]
        params: Vec<String>,
    },
    /// Print the number of rows in a table
    Count {
        table: String,
        /// Equality filter, repeatable
        #[arg(long = "filter", value_name = "COL=VALUE", value_parser = parse_filter)]
        filters: Vec<(String, String)>,
    },
}

fn parse_filter(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected COL=VALUE, got '{}'", s))
}

/// `42` binds as an integer, `true` as a boolean, anything unparsable as text.
fn parse_value(s: &str) -> QueryParam {
    let json = serde_json::from_str(s).unwrap_or_else(|_| JsonValue::String(s.to_string()));
    QueryParam::from_json(&json)
}

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

async fn run(
    engine: &CrudEngine,
    config: &Config,
    command: Command,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::NextId { count } => {
            let source = DbSequenceSource::new(engine.clone(), &config.sequence_name)?;
            let allocator = SequenceAllocator::with_settings(
                source,
                config.id_batch_size,
                config.id_low_water_mark,
            )?;
            for _ in 0..count {
                println!("{}", allocator.get_id().await?);
            }
        }
        Command::Query { sql, params } => {
            let params: Vec<QueryParam> = params.iter().map(|p| parse_value(p)).collect();
            for row in engine.query(&sql, &params).await? {
                println!("{}", serde_json::to_string(&row)?);
            }
        }
        Command::Count { table, filters } => {
            // Only the table name matters for a count
            let metadata = TableMetadata::new(table, "id");
            let filters: Vec<(&str, QueryParam)> = filters
                .iter()
                .map(|(column, value)| (column.as_str(), parse_value(value)))
                .collect();
            println!("{}", engine.get_entities_count(&metadata, &filters).await?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = cli.config;

    init_tracing(&config);
    config.validate()?;

    let db_config = config.parse_database()?;
    info!(
        db_type = %db_config.db_type,
        verbose = config.verbose,
        "Starting metamapper v{}",
        env!("CARGO_PKG_VERSION")
    );

    let pool = DbPool::connect(&db_config).await?;
    let executor = QueryExecutor::with_defaults(config.query_timeout, config.verbose);
    let engine = CrudEngine::new(pool.clone(), executor);

    let result = run(&engine, &config, cli.command).await;
    pool.close().await;

    if let Err(e) = result {
        if let Some(db_err) = e.downcast_ref::<metamapper::DbError>() {
            error!(error = %db_err, suggestion = ?db_err.suggestion(), "Command failed");
        } else {
            error!(error = %e, "Command failed");
        }
        return Err(e);
    }
    Ok(())
}
