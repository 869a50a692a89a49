//! mssql-bulk-sync CLI - bulk synchronization of records with SQL Server tables.

use clap::{Parser, Subcommand};
use mssql_bulk_sync::core::identifier::temp_table_name;
use mssql_bulk_sync::sql::{self, DELETE_TABLE_SUFFIX};
use mssql_bulk_sync::{
    plan_capture, Config, DynamicRecord, MssqlConnection, RecordState, RefreshPolicy,
    SchemaCatalog, StagingPipeline, StaticCatalog, SyncConnection, SyncError, SysCatalog,
    TableSchema, TdsBulkProvider, Tracked,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "mssql-bulk-sync")]
#[command(about = "Bulk synchronization of records with SQL Server tables")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the statements a synchronization would run for a table manifest
    Render {
        /// Table manifest (YAML)
        #[arg(long)]
        manifest: PathBuf,

        /// Refresh policy: none, identity or all
        #[arg(long, default_value = "all")]
        refresh: String,

        /// Batch contains inserts
        #[arg(long)]
        inserts: bool,

        /// Batch contains updates
        #[arg(long)]
        updates: bool,

        /// Batch contains deletes
        #[arg(long)]
        deletes: bool,
    },

    /// Print a table's schema as a manifest
    Describe {
        /// Table name, optionally schema-qualified (schema.table)
        #[arg(long)]
        table: String,
    },

    /// Synchronize tracked rows from a JSON file
    Sync {
        /// Table manifest (YAML)
        #[arg(long)]
        manifest: PathBuf,

        /// Rows file: [{"state": "added", "values": {...}}, ...]
        #[arg(long)]
        rows: PathBuf,

        /// Override the configured refresh policy
        #[arg(long)]
        refresh: Option<String>,
    },

    /// Test the database connection
    HealthCheck,
}

/// One line of a rows file.
#[derive(Deserialize)]
struct RowEntry {
    state: RecordState,
    values: serde_json::Value,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), SyncError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format).map_err(SyncError::Config)?;

    // Rendering works from the manifest alone
    if let Commands::Render {
        manifest,
        refresh,
        inserts,
        updates,
        deletes,
    } = &cli.command
    {
        let schema = load_manifest(manifest)?;
        let policy: RefreshPolicy = refresh.parse()?;
        return render(&schema, policy, *inserts, *updates, *deletes, cli.output_json);
    }

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        // Handled above
        Commands::Render { .. } => {}

        Commands::Describe { table } => {
            let mut conn = MssqlConnection::connect(config.target.clone()).await?;
            let catalog = SysCatalog::new(config.target.schema.clone());
            let result = catalog.table_schema(&mut conn, &table).await;
            conn.close().await?;
            let schema = result?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&schema)?);
            } else {
                print!("{}", serde_yaml::to_string(&schema)?);
            }
        }

        Commands::Sync {
            manifest,
            rows,
            refresh,
        } => {
            let schema = load_manifest(&manifest)?;
            let policy = match refresh {
                Some(value) => value.parse()?,
                None => config.sync.refresh_mode,
            };
            let mut entries = load_rows(&schema, &rows)?;

            let entity = schema.name.clone();
            let mut catalog = StaticCatalog::new();
            catalog.register(entity.clone(), schema.clone())?;
            let pipeline = StagingPipeline::new(Arc::new(catalog), Arc::new(TdsBulkProvider::new()))
                .with_options(config.sync.options());

            let mut conn = MssqlConnection::new(config.target.clone());
            let summary = pipeline
                .synchronize_tracked(&mut conn, &entity, &mut entries, policy)
                .await?;

            let refreshed: Vec<serde_json::Value> = entries
                .iter()
                .filter(|e| e.state() != RecordState::Detached)
                .map(|e| e.record().to_json(&schema))
                .collect();

            if cli.output_json {
                let result = serde_json::json!({
                    "summary": summary,
                    "rows": refreshed,
                });
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Synchronization completed!");
                println!("  Table: {}", summary.table);
                println!("  Inserted: {}", summary.inserted);
                println!("  Updated: {}", summary.updated);
                println!("  Deleted: {}", summary.deleted);
                println!("  Refreshed: {}", summary.refreshed);
                println!("  Duration: {}ms", summary.elapsed_ms);
                for row in &refreshed {
                    println!("  {}", row);
                }
            }
        }

        Commands::HealthCheck => {
            let started = Instant::now();
            let mut conn = MssqlConnection::connect(config.target.clone()).await?;
            let result = conn.health_check().await;
            conn.close().await?;
            result?;
            let latency_ms = started.elapsed().as_millis() as u64;

            if cli.output_json {
                let result = serde_json::json!({
                    "target": config.target.display_target(),
                    "connected": true,
                    "latency_ms": latency_ms,
                });
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Target (SQL Server): OK ({}ms) {}",
                    latency_ms,
                    config.target.display_target()
                );
            }
        }
    }

    Ok(())
}

fn load_manifest(path: &Path) -> Result<TableSchema, SyncError> {
    let content = std::fs::read_to_string(path)?;
    let schema: TableSchema = serde_yaml::from_str(&content)?;
    schema.validate()?;
    Ok(schema)
}

fn load_rows(schema: &TableSchema, path: &Path) -> Result<Vec<Tracked<DynamicRecord>>, SyncError> {
    let content = std::fs::read_to_string(path)?;
    let entries: Vec<RowEntry> = serde_json::from_str(&content)?;
    entries
        .into_iter()
        .map(|entry| {
            let record = DynamicRecord::from_json(schema, &entry.values)?;
            Ok(Tracked::new(entry.state, record))
        })
        .collect()
}

/// Print the statements of one synchronization call without connecting.
///
/// With no batch flags the batch is assumed to hold all three kinds.
fn render(
    schema: &TableSchema,
    policy: RefreshPolicy,
    inserts: bool,
    updates: bool,
    deletes: bool,
    output_json: bool,
) -> Result<(), SyncError> {
    let (inserts, updates, deletes) = if inserts || updates || deletes {
        (inserts, updates, deletes)
    } else {
        (true, true, true)
    };
    let entity = schema.name.as_str();
    let mut statements: Vec<(&str, String)> = Vec::new();

    if inserts || updates {
        let staging = temp_table_name(entity);
        let columns: Vec<_> = schema.columns.iter().collect();
        statements.push(("staging", sql::staging_table_ddl(&staging, schema, &columns)?));

        let capture = plan_capture(schema, entity, inserts, updates, policy)?;
        if let Some(capture) = &capture {
            statements.push(("output", capture.ddl.clone()));
        }
        statements.push(("merge", sql::merge_sql(schema, &staging, capture.as_ref())?));
        if let Some(capture) = &capture {
            statements.push(("refresh", capture.select_sql()?));
            statements.push(("drop_output", capture.drop_sql()?));
        }
        statements.push(("drop_staging", sql::drop_table_sql(&staging)?));
    }

    if deletes {
        let staging = format!("{}{}", temp_table_name(entity), DELETE_TABLE_SUFFIX);
        let keys = schema.key_columns();
        statements.push(("delete_staging", sql::staging_table_ddl(&staging, schema, &keys)?));
        statements.push(("delete", sql::delete_sql(schema, &staging)?));
        statements.push(("drop_delete_staging", sql::drop_table_sql(&staging)?));
    }

    if output_json {
        let list: Vec<serde_json::Value> = statements
            .iter()
            .map(|(step, text)| serde_json::json!({ "step": step, "sql": text }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&list)?);
    } else {
        println!("-- {} (refresh: {})", schema.full_name(), policy);
        for (step, text) in &statements {
            println!("\n-- {}\n{}", step, text);
        }
    }
    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so rendered SQL and JSON stay clean on stdout
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}
