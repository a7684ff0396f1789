//! fhir-sink CLI - PostgreSQL table setup and NDJSON loading for FHIR resources.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use fhir_sink::config::split_resource_list;
use fhir_sink::{
    ErrorKind, PoolConfig, Record, ResourceWriter, SchemaMaterializer, SetupOptions, SinkConfig,
    SinkError, SinkPool, ViewApplicator, ViewCatalog, WriteSummary,
};
use futures::stream::{self, StreamExt};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Exit code when the load finished but some records were not written.
const EXIT_PARTIAL_FAILURE: u8 = 5;

#[derive(Parser)]
#[command(name = "fhir-sink")]
#[command(about = "Persist FHIR resources into PostgreSQL as documents or flattened views")]
#[command(version)]
struct Cli {
    /// Output JSON result to stdout
    #[arg(long, global = true)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text", global = true)]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info", global = true)]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create document or view tables for a list of resource types
    CreateTables {
        /// Path to the sink database configuration (YAML or JSON)
        #[arg(long)]
        sink_db_config: PathBuf,

        /// Comma-separated resource types, e.g. Patient,Observation
        #[arg(long)]
        resource_list: String,

        /// Directory of ViewDefinition JSON files (view mode)
        #[arg(long)]
        view_definitions_dir: Option<PathBuf>,

        /// Connections opened up front
        #[arg(long)]
        jdbc_initial_pool_size: Option<usize>,

        /// Maximum pool size
        #[arg(long)]
        jdbc_max_pool_size: Option<usize>,
    },

    /// Write resources from an NDJSON file
    Load {
        /// Path to the sink database configuration (YAML or JSON)
        #[arg(long)]
        sink_db_config: PathBuf,

        /// NDJSON file with one FHIR resource per line
        #[arg(long)]
        input: PathBuf,

        /// Directory of ViewDefinition JSON files (view mode)
        #[arg(long)]
        view_definitions_dir: Option<PathBuf>,

        /// Concurrent writes [default: max_pool_size]
        #[arg(long)]
        workers: Option<usize>,

        /// Create tables before loading
        #[arg(long)]
        create_tables: bool,

        /// Resource types for --create-tables [default: types in the view catalog]
        #[arg(long)]
        resource_list: Option<String>,
    },

    /// Test the sink database connection
    HealthCheck {
        /// Path to the sink database configuration (YAML or JSON)
        #[arg(long)]
        sink_db_config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, SinkError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format).map_err(SinkError::Config)?;

    match cli.command {
        Commands::CreateTables {
            sink_db_config,
            resource_list,
            view_definitions_dir,
            jdbc_initial_pool_size,
            jdbc_max_pool_size,
        } => {
            let options = SetupOptions {
                sink_db_config_path: sink_db_config,
                resource_list,
                view_definitions_dir,
                jdbc_initial_pool_size,
                jdbc_max_pool_size,
            };
            let start = Instant::now();
            fhir_sink::create_tables(&options).await?;
            let mode = if options.view_definitions_dir.is_some() {
                "view"
            } else {
                "document"
            };

            if cli.output_json {
                println!(
                    "{}",
                    serde_json::json!({
                        "resource_types": options.resource_types(),
                        "mode": mode,
                        "duration_seconds": start.elapsed().as_secs_f64(),
                    })
                );
            } else {
                println!("Tables ready for: {}", options.resource_types().join(", "));
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Load {
            sink_db_config,
            input,
            view_definitions_dir,
            workers,
            create_tables,
            resource_list,
        } => {
            let args = LoadArgs {
                config_path: sink_db_config,
                input,
                view_dir: view_definitions_dir,
                workers,
                create_tables,
                resource_list,
            };
            let cancel_token = setup_signal_handler();
            let stats = load(&args, cancel_token).await?;

            if cli.output_json {
                println!("{}", stats.to_json());
            } else {
                println!("\nLoad completed!");
                println!("  Records: {}", stats.records);
                println!("  Failed: {}", stats.failed);
                println!("  Statements: {}", stats.summary.statements);
                println!("  Rows: {}", stats.summary.rows);
                println!("  Duration: {:.2}s", stats.duration_seconds);
                if stats.cancelled {
                    println!("  Interrupted before end of input");
                }
            }

            if stats.failed > 0 {
                Ok(ExitCode::from(EXIT_PARTIAL_FAILURE))
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }

        Commands::HealthCheck { sink_db_config } => {
            let config = SinkConfig::load(&sink_db_config)?;
            let sizing = PoolConfig {
                initial_pool_size: 1,
                max_pool_size: 1,
            };
            let pool = SinkPool::new(&config.database, &sizing).await?;
            let result = pool.health_check().await;
            pool.close();

            if cli.output_json {
                println!(
                    "{}",
                    serde_json::json!({
                        "connected": result.connected,
                        "latency_ms": result.latency_ms,
                        "error": result.error,
                    })
                );
            } else {
                println!("Health Check Results:");
                println!(
                    "  Sink (PostgreSQL {}): {} ({}ms)",
                    config.database.display_url(),
                    if result.connected { "OK" } else { "FAILED" },
                    result.latency_ms
                );
                if let Some(ref err) = result.error {
                    println!("    Error: {}", err);
                }
            }

            if !result.connected {
                return Err(SinkError::pool(
                    result.error.unwrap_or_default(),
                    "health check",
                ));
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

struct LoadArgs {
    config_path: PathBuf,
    input: PathBuf,
    view_dir: Option<PathBuf>,
    workers: Option<usize>,
    create_tables: bool,
    resource_list: Option<String>,
}

#[derive(Debug, Default)]
struct LoadStats {
    records: usize,
    failed: usize,
    summary: WriteSummary,
    duration_seconds: f64,
    cancelled: bool,
}

impl LoadStats {
    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "records": self.records,
            "failed": self.failed,
            "statements": self.summary.statements,
            "rows": self.summary.rows,
            "duration_seconds": self.duration_seconds,
            "cancelled": self.cancelled,
        })
    }
}

#[tracing::instrument(name = "sink.load", skip_all, fields(input = %args.input.display()))]
async fn load(args: &LoadArgs, cancel: CancellationToken) -> Result<LoadStats, SinkError> {
    let start = Instant::now();
    let config = SinkConfig::load(&args.config_path)?;
    let catalog = args
        .view_dir
        .as_deref()
        .map(ViewCatalog::load_dir)
        .transpose()?
        .map(Arc::new);

    let workers = args.workers.unwrap_or(config.pool.max_pool_size);
    if workers == 0 {
        return Err(SinkError::Config("--workers must be at least 1".to_string()));
    }

    let pool = SinkPool::new(&config.database, &config.pool).await?;

    if args.create_tables {
        let resource_types = match (&args.resource_list, &catalog) {
            (Some(list), _) => split_resource_list(list),
            (None, Some(catalog)) => catalog.resource_types().into_iter().map(String::from).collect(),
            (None, None) => {
                return Err(SinkError::Config(
                    "--resource-list is required with --create-tables in document mode".to_string(),
                ))
            }
        };
        SchemaMaterializer::new(pool.clone())
            .create_tables(&resource_types, catalog.as_deref())
            .await?;
    }

    let writer = match catalog {
        Some(catalog) => ResourceWriter::views(pool.clone(), catalog, Arc::new(ViewApplicator)),
        None => ResourceWriter::document(pool.clone()),
    };
    info!(
        "Loading {} in {} mode with {} workers",
        args.input.display(),
        writer.mode(),
        workers
    );

    let result = write_all(&writer, &args.input, workers, &cancel).await;
    pool.close();

    let mut stats = result?;
    stats.duration_seconds = start.elapsed().as_secs_f64();
    stats.cancelled = cancel.is_cancelled();
    Ok(stats)
}

#[tracing::instrument(name = "sink.write_all", skip_all, fields(workers = workers))]
async fn write_all(
    writer: &ResourceWriter<SinkPool>,
    input: &Path,
    workers: usize,
    cancel: &CancellationToken,
) -> Result<LoadStats, SinkError> {
    let file = tokio::fs::File::open(input).await?;
    let lines = BufReader::new(file).lines();

    let numbered = stream::unfold((lines, 0usize), |(mut lines, n)| async move {
        match lines.next_line().await {
            Ok(Some(line)) => Some((Ok((n + 1, line)), (lines, n + 1))),
            Ok(None) => None,
            Err(e) => Some((Err(e), (lines, n + 1))),
        }
    });

    let results = numbered
        .take_while(|_| futures::future::ready(!cancel.is_cancelled()))
        .filter(|item| {
            futures::future::ready(!matches!(item, Ok((_, line)) if line.trim().is_empty()))
        })
        .map(|item| async move {
            let (line_no, line) = item?;
            let outcome = match Record::from_json(&line) {
                Ok(record) => writer.write(&record).await,
                Err(e) => Err(e),
            };
            Ok::<_, SinkError>((line_no, outcome))
        })
        .buffer_unordered(workers);
    futures::pin_mut!(results);

    let mut stats = LoadStats::default();
    while let Some(item) = results.next().await {
        let (line_no, outcome) = item?;
        stats.records += 1;
        match outcome {
            Ok(summary) => stats.summary += summary,
            Err(e) if e.kind() == ErrorKind::Configuration => {
                error!("Line {}: {}", line_no, e);
                return Err(e);
            }
            Err(e) => {
                stats.failed += 1;
                warn!("Line {}: {}", line_no, e);
            }
        }
    }

    Ok(stats)
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => "debug",
        "info" => "info",
        "warn" => "warn",
        "error" => "error",
        other => return Err(format!("Invalid verbosity '{}'", other)),
    };

    // RUST_LOG, when set, overrides --verbosity.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false);

    match format {
        "json" => subscriber.json().init(),
        "text" => subscriber.init(),
        other => return Err(format!("Invalid log format '{}'", other)),
    }

    Ok(())
}

/// Cancel the returned token on SIGINT or SIGTERM. Records already being
/// written finish; no further lines are read.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        match signal(kind) {
            Ok(mut stream) => {
                tokio::spawn(async move {
                    stream.recv().await;
                    eprintln!("\nReceived {}. Finishing in-flight records...", name);
                    token.cancel();
                });
            }
            Err(e) => warn!("Failed to install {} handler: {}", name, e),
        }
    }

    cancel_token
}

#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Finishing in-flight records...");
            token.cancel();
        }
    });

    cancel_token
}
