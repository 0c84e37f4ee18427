//! mariadb-pg-migrate CLI - bulk MariaDB to PostgreSQL migration.

use clap::{Args, Parser, Subcommand};
use mariadb_pg_migrate::{Config, MigrateError, MigrationResult, Orchestrator};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "mariadb-pg-migrate")]
#[command(about = "Bulk MariaDB to PostgreSQL migration")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file (environment variables are used when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Load environment variables from this file instead of ./.env
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Seconds to wait for in-flight work after a shutdown signal
    #[arg(long, default_value = "60")]
    shutdown_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct DatabaseArgs {
    /// Logical source database (a `sources` key, or the env var prefix)
    #[arg(long)]
    database: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate tables from a source database
    Run {
        #[command(flatten)]
        db: DatabaseArgs,

        /// Comma-separated table list (overrides the configured list or pattern)
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,

        /// Tables migrated concurrently
        #[arg(long)]
        table_workers: Option<usize>,

        /// Chunks of large tables migrated concurrently
        #[arg(long)]
        chunk_workers: Option<usize>,

        /// Rows per COPY batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Row count at which a table is split into yearly chunks
        #[arg(long)]
        large_table_threshold: Option<i64>,

        /// Row count at which a table is created UNLOGGED
        #[arg(long)]
        fast_load_threshold: Option<i64>,

        /// Create foreign keys after load
        #[arg(long)]
        create_foreign_keys: bool,

        /// Drop and recreate the sink schema first
        #[arg(long)]
        reset_schema: bool,

        /// Dry run: discover tables and show the plan without writing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate row counts between source and target
    Validate {
        #[command(flatten)]
        db: DatabaseArgs,

        /// Comma-separated table list
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,
    },

    /// Test database connections
    HealthCheck {
        #[command(flatten)]
        db: DatabaseArgs,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::FAILURE
        }
    }
}

/// Returns whether the command succeeded.
async fn run() -> Result<bool, MigrateError> {
    let cli = Cli::parse();

    load_env_file(cli.env_file.as_ref())?;
    setup_logging(&cli.verbosity, &cli.log_format);

    match cli.command {
        Commands::Run {
            db,
            tables,
            table_workers,
            chunk_workers,
            batch_size,
            large_table_threshold,
            fast_load_threshold,
            create_foreign_keys,
            reset_schema,
            dry_run,
        } => {
            let mut config = load_config(cli.config.as_ref(), &db.database)?;

            // Apply overrides before auto-tuning so explicit values win
            let migration = &mut config.migration;
            if table_workers.is_some() {
                migration.table_workers = table_workers;
            }
            if chunk_workers.is_some() {
                migration.chunk_workers = chunk_workers;
            }
            if batch_size.is_some() {
                migration.batch_size = batch_size;
            }
            if large_table_threshold.is_some() {
                migration.large_table_threshold = large_table_threshold;
            }
            if fast_load_threshold.is_some() {
                migration.fast_load_threshold = fast_load_threshold;
            }
            migration.create_foreign_keys |= create_foreign_keys;
            migration.reset_schema |= reset_schema;
            config.validate()?;

            let config = config.with_auto_tuning();
            let orchestrator = Orchestrator::new(config, &db.database)
                .await?
                .with_tables(tables);

            if dry_run {
                let plan = orchestrator.plan().await?;
                if cli.output_json {
                    println!("{}", plan.to_json()?);
                } else {
                    println!("\nDry run: {} -> {}", plan.database, plan.schema);
                    for table in &plan.tables {
                        match &table.error {
                            Some(err) => println!("  {}: ERROR {}", table.table, err),
                            None => println!(
                                "  {}: {} rows, {} chunks, {:?}",
                                table.table,
                                table.row_count,
                                table.chunks.len(),
                                table.provision_mode
                            ),
                        }
                    }
                }
                return Ok(plan.tables.iter().all(|t| t.error.is_none()));
            }

            let cancel_token = setup_signal_handler(cli.shutdown_timeout);
            let result = orchestrator.run(cancel_token).await?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                print_summary(&result);
            }
            Ok(result.success())
        }

        Commands::Validate { db, tables } => {
            let config = load_config(cli.config.as_ref(), &db.database)?;
            let orchestrator = Orchestrator::new(config, &db.database)
                .await?
                .with_tables(tables);
            let report = orchestrator.validate().await?;

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                println!("Row count validation ({}):", report.schema);
                for t in &report.tables {
                    let sink = t
                        .sink_rows
                        .map(|r| r.to_string())
                        .unwrap_or_else(|| "missing".to_string());
                    println!(
                        "  {:<40} source={:<12} sink={:<12} {:?}",
                        t.table, t.source_rows, sink, t.check
                    );
                }
                println!(
                    "\n  Overall: {}",
                    if report.passed() { "PASSED" } else { "FAILED" }
                );
            }
            Ok(report.passed())
        }

        Commands::HealthCheck { db } => {
            let config = load_config(cli.config.as_ref(), &db.database)?;
            let orchestrator = Orchestrator::new(config, &db.database).await?;
            let result = orchestrator.health_check().await;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source (MariaDB): {} ({}ms)",
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Target (PostgreSQL): {} ({}ms)",
                    if result.target_connected { "OK" } else { "FAILED" },
                    result.target_latency_ms
                );
                if let Some(ref err) = result.target_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }
            Ok(result.healthy)
        }
    }
}

/// YAML file when given, the environment otherwise.
fn load_config(path: Option<&PathBuf>, database: &str) -> Result<Config, MigrateError> {
    let config = match path {
        Some(path) => {
            let config = Config::load(path)?;
            info!("Loaded configuration from {:?}", path);
            config
        }
        None => {
            let config = Config::from_env(database)?;
            info!("Loaded configuration for '{}' from environment", database);
            config
        }
    };
    // Fail early on an unknown --database
    config.source(database)?;
    Ok(config)
}

fn load_env_file(path: Option<&PathBuf>) -> Result<(), MigrateError> {
    match path {
        Some(path) => dotenv::from_path(path)
            .map(|_| ())
            .map_err(|e| MigrateError::Config(format!("cannot load env file {:?}: {}", path, e))),
        None => {
            // A missing ./.env is fine
            dotenv::dotenv().ok();
            Ok(())
        }
    }
}

fn print_summary(result: &MigrationResult) {
    println!(
        "\n{}",
        if result.cancelled {
            "Migration cancelled."
        } else {
            "Migration completed!"
        }
    );
    println!("  Run ID: {}", result.run_id);
    println!("  Schema: {}", result.schema);
    println!("  Duration: {:.2}s", result.duration_seconds);
    println!(
        "  Tables: {}/{} ({} failed, {} skipped)",
        result.tables_success, result.tables_total, result.tables_failed, result.tables_skipped
    );
    println!("  Rows: {}", result.rows_loaded);
    println!("  Throughput: {} rows/sec", result.rows_per_second);
    println!("  Defects: {}", result.defect_count());
    for table in result.tables.iter().filter(|t| t.rows_skipped() > 0) {
        println!(
            "  {}: {} rows in rejected batches",
            table.table,
            table.rows_skipped()
        );
    }
    let failed = result.failed_tables();
    if !failed.is_empty() {
        println!("  Not loaded: {:?}", failed);
    }
}

/// Logs go to stderr so `--output-json` keeps stdout clean.
fn setup_logging(verbosity: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.to_lowercase()));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Force the process down if in-flight work outlives the shutdown timeout.
fn arm_shutdown_timer(shutdown_timeout: u64) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(shutdown_timeout)).await;
        eprintln!(
            "Shutdown timeout of {}s exceeded, exiting",
            shutdown_timeout
        );
        std::process::exit(1);
    });
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM (Kubernetes/Airflow shutdown).
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
fn setup_signal_handler(shutdown_timeout: u64) -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        tokio::spawn(async move {
            let mut stream = match signal(kind) {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("Failed to setup {} handler: {}", name, e);
                    return;
                }
            };
            stream.recv().await;
            eprintln!(
                "\nReceived {}. Finishing in-flight work, no new tables or chunks (timeout: {}s)...",
                name, shutdown_timeout
            );
            token.cancel();
            arm_shutdown_timer(shutdown_timeout);
        });
    }

    cancel_token
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler(shutdown_timeout: u64) -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            eprintln!("Failed to setup Ctrl-C handler: {}", e);
            return;
        }
        eprintln!("\nReceived Ctrl-C. Shutting down gracefully...");
        token.cancel();
        arm_shutdown_timer(shutdown_timeout);
    });

    cancel_token
}
