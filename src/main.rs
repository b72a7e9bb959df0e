// sql-parquet-export CLI
// export, batch and check subcommands over the library pipeline

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use sql_parquet_export::db::{ConnectionConfig, ConnectionProfiles, DatabaseType};
use sql_parquet_export::pipeline::{self, BatchPlan};
use sql_parquet_export::{ExportOptions, ParquetCompression, ParquetExporter};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "sql-parquet-export",
    version,
    about = "Run SQL queries against a database and write each result set to a Parquet file"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Export the result of one query to a Parquet file
    Export {
        #[command(flatten)]
        connection: ConnectionArgs,

        /// SQL statement to run
        #[arg(short, long, conflicts_with = "query_file", required_unless_present = "query_file")]
        query: Option<String>,

        /// File containing the SQL statement to run
        #[arg(long, value_name = "FILE")]
        query_file: Option<PathBuf>,

        /// Destination Parquet file
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        #[command(flatten)]
        output_options: OutputArgs,
    },

    /// Export a JSON plan of named queries into a timestamped directory
    Batch {
        #[command(flatten)]
        connection: ConnectionArgs,

        /// JSON file: {"queries": [{"name": ..., "sql": ...}], "options": {...}}
        #[arg(long, value_name = "FILE")]
        plan: PathBuf,

        /// Base directory for export_<timestamp> run directories
        #[arg(long, default_value = "parquetFiles", value_name = "DIR")]
        output_dir: PathBuf,

        #[command(flatten)]
        output_options: OutputArgs,
    },

    /// Connect, probe the server and print its version
    Check {
        #[command(flatten)]
        connection: ConnectionArgs,
    },
}

#[derive(Debug, Args)]
struct ConnectionArgs {
    /// Backend whose environment variables hold the connection settings
    #[arg(short, long, value_name = "BACKEND", required_unless_present = "profile")]
    backend: Option<DatabaseType>,

    /// Named connection from the profiles file
    #[arg(short, long, value_name = "NAME", conflicts_with = "backend")]
    profile: Option<String>,

    /// Profiles file (defaults to profiles.json in the user config directory)
    #[arg(long, value_name = "FILE", requires = "profile")]
    profiles: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct OutputArgs {
    /// Compression codec: none, snappy, gzip, lz4 or zstd
    #[arg(long, default_value = "snappy", value_name = "CODEC")]
    compression: ParquetCompression,

    /// Maximum rows per row group
    #[arg(long, value_name = "ROWS")]
    row_group_size: Option<usize>,
}

impl OutputArgs {
    fn export_options(&self) -> ExportOptions {
        let options = ExportOptions::default().with_compression(self.compression);
        match self.row_group_size {
            Some(rows) => options.with_max_row_group_size(rows),
            None => options,
        }
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose)?;

    // Extraction is strictly sequential, one task drives everything
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create async runtime")?;

    runtime.block_on(run_command(cli.command))
}

async fn run_command(command: Command) -> Result<()> {
    match command {
        Command::Export {
            connection,
            query,
            query_file,
            output,
            output_options,
        } => {
            let config = resolve_connection(&connection)?;
            let sql = match (query, query_file) {
                (Some(sql), _) => sql,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read query file {}", path.display()))?,
                (None, None) => bail!("pass --query or --query-file"),
            };

            let exporter = ParquetExporter::new(output_options.export_options());
            let summary = pipeline::extract_to_parquet(&config, &sql, &output, &exporter)
                .await
                .context("Export failed")?;

            println!(
                "Exported {} rows to {} ({} bytes)",
                summary.rows_exported,
                summary.path.display(),
                summary.bytes_written
            );
        }

        Command::Batch {
            connection,
            plan,
            output_dir,
            output_options,
        } => {
            let config = resolve_connection(&connection)?;
            let plan = BatchPlan::load(&plan)
                .with_context(|| format!("Failed to load batch plan {}", plan.display()))?;

            // Options in the plan file take precedence over command-line flags
            let options = plan
                .options
                .clone()
                .unwrap_or_else(|| output_options.export_options());
            let exporter = ParquetExporter::new(options);

            info!(queries = plan.queries.len(), "starting batch export");
            let report = pipeline::run_batch(&config, &plan, &output_dir, &exporter)
                .await
                .context("Batch export failed")?;

            println!("Batch export to {}", report.output_dir.display());
            for entry in &report.entries {
                println!(
                    "  {:<24} {:>10} rows  {}",
                    entry.name,
                    entry.summary.rows_exported,
                    entry.summary.path.display()
                );
            }
            if let Some(summary) = &report.summary_file {
                println!("  {:<24} {:>10}       {}", "(run summary)", "", summary.path.display());
            }
            println!(
                "{} files, {} rows total",
                report.entries.len(),
                report.total_rows()
            );
        }

        Command::Check { connection } => {
            let config = resolve_connection(&connection)?;
            let report = pipeline::check_connection(&config)
                .await
                .context("Connection check failed")?;

            println!("{} at {}", report.database_type, report.target);
            println!("  alive:   {}", if report.alive { "yes" } else { "no" });
            if let Some(version) = report.server_version {
                println!("  version: {}", version.lines().next().unwrap_or_default());
            }
            if !report.alive {
                bail!("connection opened but the liveness probe failed");
            }
        }
    }

    Ok(())
}

/// Build the connection configuration from a profile or the environment
fn resolve_connection(args: &ConnectionArgs) -> Result<ConnectionConfig> {
    let config = match (&args.profile, args.backend) {
        (Some(name), _) => {
            let path = match &args.profiles {
                Some(path) => path.clone(),
                None => ConnectionProfiles::default_path()
                    .context("Could not determine the user config directory; pass --profiles")?,
            };
            let profiles = ConnectionProfiles::load(&path)
                .with_context(|| format!("Failed to load profiles from {}", path.display()))?;
            profiles.get(name)?.clone()
        }
        (None, Some(backend)) => ConnectionConfig::from_env(backend)
            .with_context(|| format!("Incomplete {}_* environment", backend.env_prefix()))?,
        (None, None) => bail!("pass --backend or --profile"),
    };

    config.validate().context("Invalid connection configuration")?;
    info!(backend = %config.database_type(), server = %config.target(), "using connection");
    Ok(config)
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("sql_parquet_export=debug,warn")
    } else {
        EnvFilter::new("sql_parquet_export=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}
