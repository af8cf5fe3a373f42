//! bulkload command-line tool
//!
//! Provisions a table in a local store and streams newline-delimited JSON
//! records into it.
//!
//! # Examples
//!
//! ```bash
//! # Create the standard table (truncates it if it already exists)
//! bulkload init --db data.db
//!
//! # Load a file, print the summary as JSON
//! bulkload load --db data.db --input records.ndjson
//!
//! # Load from stdin with a smaller in-flight window
//! cat records.ndjson | bulkload load --db data.db --queue-capacity 64
//!
//! # Print the CQL that provisions the same table on a cluster
//! bulkload ddl --schema schema.json --replication-factor 3
//! ```
//!
//! Log verbosity follows `RUST_LOG` (default `bulkload=info`).

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncRead, BufReader};
use tracing::info;

use bulkload::schema::{create_keyspace_cql, create_table_cql, standard_schema};
use bulkload::{BulkLoader, Error, LoaderConfig, LocalSession, Result, TableInfo, TableSchema};

#[derive(Parser, Debug)]
#[command(name = "bulkload", version, about = "Conditional bulk ingestion into a column store")]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a table, or empty it if it already exists.
    Init(InitArgs),
    /// Stream NDJSON records into a table.
    Load(LoadArgs),
    /// Print the CQL that creates a table's keyspace and table.
    Ddl(DdlArgs),
}

#[derive(Parser, Debug)]
struct InitArgs {
    /// Local store file.
    #[arg(long, env = "BULKLOAD_DB")]
    db: PathBuf,

    #[arg(long, env = "BULKLOAD_TENANT", default_value = bulkload::config::DEFAULT_TENANT)]
    tenant: String,

    #[arg(long, env = "BULKLOAD_TABLE", default_value = bulkload::config::DEFAULT_TABLE)]
    table: String,

    /// JSON table schema; defaults to `{id: S, indexed_attr: S}` indexed on `indexed_attr`.
    #[arg(long)]
    schema: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct DdlArgs {
    #[arg(long, env = "BULKLOAD_TENANT", default_value = bulkload::config::DEFAULT_TENANT)]
    tenant: String,

    #[arg(long, env = "BULKLOAD_TABLE", default_value = bulkload::config::DEFAULT_TABLE)]
    table: String,

    /// JSON table schema; defaults to the standard table.
    #[arg(long)]
    schema: Option<PathBuf>,

    #[arg(long, default_value_t = 1)]
    replication_factor: u32,
}

#[derive(Parser, Debug)]
struct LoadArgs {
    /// Local store file.
    #[arg(long, env = "BULKLOAD_DB")]
    db: PathBuf,

    /// NDJSON input; stdin when omitted.
    #[arg(long)]
    input: Option<PathBuf>,

    #[arg(long)]
    tenant: Option<String>,

    #[arg(long)]
    table: Option<String>,

    #[arg(long)]
    queue_capacity: Option<usize>,

    #[arg(long)]
    max_retries: Option<u32>,

    #[arg(long)]
    op_timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bulkload=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match args.cmd {
        Command::Init(args) => init(args).await,
        Command::Load(args) => load(args).await,
        Command::Ddl(args) => ddl(args).await,
    }
}

async fn read_schema(path: Option<&PathBuf>) -> Result<TableSchema> {
    match path {
        Some(path) => {
            let json = tokio::fs::read_to_string(path).await?;
            let schema: TableSchema = serde_json::from_str(&json)?;
            schema.validate()?;
            Ok(schema)
        }
        None => standard_schema(),
    }
}

async fn init(args: InitArgs) -> Result<ExitCode> {
    let schema = read_schema(args.schema.as_ref()).await?;
    let session = LocalSession::open(&args.db)?;
    let info = TableInfo::new(&args.tenant, &args.table, schema);

    match session.create_table(info).await {
        Ok(()) => {}
        Err(Error::TableAlreadyExists { tenant, table }) => {
            let removed = session.truncate(&tenant, &table).await?;
            info!(%tenant, %table, removed, "table exists, truncated");
        }
        Err(e) => return Err(e),
    }
    Ok(ExitCode::SUCCESS)
}

async fn ddl(args: DdlArgs) -> Result<ExitCode> {
    let schema = read_schema(args.schema.as_ref()).await?;
    let info = TableInfo::new(&args.tenant, &args.table, schema);

    println!("{};", create_keyspace_cql(&info.keyspace, args.replication_factor));
    println!("{};", create_table_cql(&info));
    Ok(ExitCode::SUCCESS)
}

async fn load(args: LoadArgs) -> Result<ExitCode> {
    let mut config = LoaderConfig::from_env()?;
    if let Some(tenant) = args.tenant {
        config.tenant = tenant;
    }
    if let Some(table) = args.table {
        config.table = table;
    }
    if let Some(capacity) = args.queue_capacity {
        config.queue_capacity = capacity;
    }
    if let Some(retries) = args.max_retries {
        config.retry.max_retries = retries;
    }
    if let Some(ms) = args.op_timeout_ms {
        config.retry.op_timeout = Duration::from_millis(ms);
    }

    let session = Arc::new(LocalSession::open(&args.db)?);
    let loader = BulkLoader::open(session, config).await?;

    let input: Box<dyn AsyncRead + Unpin + Send> = match &args.input {
        Some(path) => Box::new(tokio::fs::File::open(path).await?),
        None => Box::new(tokio::io::stdin()),
    };
    let summary = loader.load(BufReader::new(input)).await?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
