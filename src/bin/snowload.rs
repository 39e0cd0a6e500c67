//! snowload: load exported databases into the warehouse
//!
//! # Usage
//!
//! ```bash
//! # Load everything under ./output_csv
//! snowload run
//!
//! # Show the DDL that would be executed
//! snowload plan
//!
//! # Retry only the tables that failed last time
//! snowload run --only SCHOOL_TABLE_ORDER --only SHOP_TABLE_ITEMS
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::*;
use serde::Serialize;
use snowload::catalog::SourceDatabase;
use snowload::prelude::*;
use snowload::report::{ConsoleReporter, print_summary};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "snowload")]
#[command(version)]
#[command(about = "Idempotent loader for exported databases", long_about = None)]
#[command(after_help = "EXAMPLES:
    snowload run --csv-dir output_csv --sql-dir output_sql
    snowload run --database-url sqlite://staging.db --batch-size 1000
    snowload plan --only FINANCIAL_TABLE_ORDER")]
struct Cli {
    /// Config file (default: ./snowload.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Load into a sqlx database instead of Snowflake
    #[arg(long, global = true, env = "SNOWLOAD_DATABASE_URL")]
    database_url: Option<String>,

    /// Snowflake SQL API token
    #[arg(long, global = true, env = "SNOWLOAD_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Directory with one subdirectory of CSV files per database
    #[arg(long, global = true)]
    csv_dir: Option<PathBuf>,

    /// Directory with exported <TARGET>.sql files
    #[arg(long, global = true)]
    sql_dir: Option<PathBuf>,

    /// CSV files have no header row
    #[arg(long, global = true)]
    no_header: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Args)]
struct Selection {
    /// Only process these target tables (repeatable)
    #[arg(long, value_name = "TARGET")]
    only: Vec<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    format: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Create and load every table not loaded yet
    Run {
        #[command(flatten)]
        selection: Selection,

        /// Rows per INSERT batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// CREATE attempts per table
        #[arg(long)]
        max_attempts: Option<usize>,

        /// Create tables from the exported .sql files when present
        #[arg(long)]
        use_exported_ddl: bool,

        /// Don't touch the warehouse, just show the DDL
        #[arg(short, long)]
        dry_run: bool,
    },
    /// Show the DDL generated for each table
    Plan {
        #[command(flatten)]
        selection: Selection,
    },
    /// Show which tables are absent, empty or loaded
    Status {
        #[command(flatten)]
        selection: Selection,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match dispatch(&cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            2
        }
    };
    std::process::exit(code);
}

fn init_logging(verbose: bool) {
    let default = if verbose { "snowload=debug" } else { "warn" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn dispatch(cli: &Cli) -> Result<i32> {
    match &cli.command {
        Commands::Run {
            selection,
            batch_size,
            max_attempts,
            use_exported_ddl,
            dry_run,
        } => {
            let mut builder = resolve_config(cli)?.into_builder();
            if let Some(rows) = batch_size {
                builder = builder.batch_size(*rows);
            }
            if let Some(attempts) = max_attempts {
                builder = builder.max_attempts(*attempts);
            }
            if *use_exported_ddl {
                builder = builder.use_exported_ddl(true);
            }
            let config = builder.build()?;

            if *dry_run {
                return show_plan(cli, &config, selection);
            }
            run(cli, &config, selection).await
        }
        Commands::Plan { selection } => show_plan(cli, &resolve_config(cli)?, selection),
        Commands::Status { selection } => status(&resolve_config(cli)?, selection).await,
    }
}

/// File settings with command-line overrides applied.
fn resolve_config(cli: &Cli) -> Result<LoaderConfig> {
    let config = LoaderConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let mut builder = config.into_builder();
    if let Some(url) = &cli.database_url {
        builder = builder.database_url(url);
    }
    if let Some(token) = &cli.token {
        builder = builder.token(token);
    }
    if let Some(dir) = &cli.csv_dir {
        builder = builder.csv_dir(dir);
    }
    if let Some(dir) = &cli.sql_dir {
        builder = builder.sql_dir(dir);
    }
    if cli.no_header {
        builder = builder.has_header(false);
    }
    Ok(builder.build()?)
}

fn scan(config: &LoaderConfig) -> Result<Vec<SourceDatabase>> {
    let sql_dir = Some(config.loader.sql_dir.as_path()).filter(|p| p.is_dir());
    scan_export(&config.loader.csv_dir, sql_dir)
        .with_context(|| format!("scanning {}", config.loader.csv_dir.display()))
}

fn selected(selection: &Selection, target: &TargetTableName) -> bool {
    selection.only.is_empty() || selection.only.iter().any(|o| o.eq_ignore_ascii_case(target.as_str()))
}

async fn connect(config: &LoaderConfig, verbose: bool) -> Result<WarehouseClient> {
    let warehouse = WarehouseClient::connect(&config.warehouse)
        .await
        .context("connecting to the warehouse")?;
    if verbose {
        println!("{} {}", "Connected to:".dimmed(), warehouse.describe());
    }
    Ok(warehouse)
}

async fn run(cli: &Cli, config: &LoaderConfig, selection: &Selection) -> Result<i32> {
    let databases = scan(config)?;
    let warehouse = connect(config, cli.verbose).await?;

    let mut options = LoadOptions::from_settings(&config.loader);
    options.only = selection.only.clone();
    let orchestrator = LoadOrchestrator::new(
        &warehouse,
        DdlGenerator::new(config.schema_overrides()),
        ErrorPatterns::with_rules(&config.error_patterns),
        options,
    );

    let stats = match selection.format {
        OutputFormat::Table => {
            let mut reporter = ConsoleReporter::new(cli.verbose);
            let stats = orchestrator.run(&databases, &mut reporter).await;
            print_summary(&stats);
            stats
        }
        OutputFormat::Json => {
            let stats = orchestrator.run(&databases, &mut ()).await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            stats
        }
    };
    warehouse.close().await;

    Ok(stats.exit_code())
}

#[derive(Serialize)]
struct PlanEntry {
    database: String,
    table: String,
    target: TargetTableName,
    ddl: Option<String>,
    error: Option<String>,
    warnings: Vec<String>,
}

fn show_plan(cli: &Cli, config: &LoaderConfig, selection: &Selection) -> Result<i32> {
    let databases = scan(config)?;
    let generator = DdlGenerator::new(config.schema_overrides());
    let scan_options = config.loader.scan_options();

    let mut entries = Vec::new();
    for table in databases.iter().flat_map(|db| db.tables.iter()) {
        let target = table.target();
        if !selected(selection, &target) {
            continue;
        }
        let planned = table
            .describe(&scan_options)
            .and_then(|cols| generator.plan(&table.database, &table.name, &cols));
        let (ddl, error, warnings) = match planned {
            Ok(plan) => (Some(plan.ddl), None, plan.warnings),
            Err(e) => (None, Some(e.to_string()), Vec::new()),
        };
        entries.push(PlanEntry {
            database: table.database.clone(),
            table: table.name.clone(),
            target,
            ddl,
            error,
            warnings,
        });
    }

    if let OutputFormat::Json = selection.format {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for entry in &entries {
            println!("{} {}", "--".dimmed(), format!("{}.{}", entry.database, entry.table).cyan());
            if let Some(ddl) = &entry.ddl {
                println!("{};", ddl);
            }
            if let Some(error) = &entry.error {
                println!("{} {}", "✗".red(), error.red());
            }
            if cli.verbose {
                for warning in &entry.warnings {
                    println!("{} {}", "⚠".yellow(), warning.dimmed());
                }
            }
            println!();
        }
    }

    let failed = entries.iter().any(|e| e.error.is_some());
    Ok(if failed { 1 } else { 0 })
}

#[derive(Serialize)]
struct StatusEntry {
    target: TargetTableName,
    state: TableState,
}

async fn status(config: &LoaderConfig, selection: &Selection) -> Result<i32> {
    let databases = scan(config)?;
    let warehouse = connect(config, false).await?;

    let mut entries = Vec::new();
    for table in databases.iter().flat_map(|db| db.tables.iter()) {
        let target = table.target();
        if !selected(selection, &target) {
            continue;
        }
        let state = table_exists_and_has_data(&warehouse, &target)
            .await
            .with_context(|| format!("probing {}", target))?;
        entries.push(StatusEntry { target, state });
    }
    warehouse.close().await;

    match selection.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Table => {
            for entry in &entries {
                match entry.state {
                    TableState::Absent => println!("  {} {}", "·".dimmed(), entry.target),
                    TableState::ExistsEmpty => {
                        println!("  {} {} {}", "○".yellow(), entry.target, "(empty)".dimmed())
                    }
                    TableState::ExistsWithData(rows) => {
                        println!("  {} {} {}", "✓".green(), entry.target, format!("({} rows)", rows).dimmed())
                    }
                }
            }
        }
    }

    Ok(0)
}
