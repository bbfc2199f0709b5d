use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing::info;

use ans_expenses::export::{self, AGGREGATED_FILE, CONSOLIDATED_FILE};
use ans_expenses::{
    cnpj, db, logging, AggregatedStat, BundleSource, ExpenseRecord, Pipeline, PipelineConfig,
    Registry, RunReport,
};

const DEFAULT_OUTPUT_DIR: &str = "output";

#[derive(Parser)]
#[command(name = "ans-expenses")]
#[command(about = "Consolidates, validates and aggregates ANS quarterly expense bundles")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Operator registry file (overrides config)
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    /// Output directory (overrides config)
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Bundle archive named like 3T2024.zip (repeatable, replaces configured bundles)
    #[arg(long = "bundle", global = true)]
    bundles: Vec<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stage 1: bundles → consolidado_despesas.csv (+ zip)
    Consolidate,
    /// Stage 2: consolidated CSV + registry → despesas_agregadas.csv (+ zip)
    Aggregate {
        /// Consolidated CSV (default: <output_dir>/consolidado_despesas.csv)
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Stage 3: consolidated CSV + registry + aggregates → SQLite
    BuildDb {
        #[arg(long)]
        input: Option<PathBuf>,
        /// Database file (overrides config)
        #[arg(long)]
        database: Option<PathBuf>,
    },
    /// All stages in one run
    Run {
        #[arg(long)]
        database: Option<PathBuf>,
    },
    /// Check a single CNPJ
    Cnpj { value: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.json_logs);

    if let Commands::Cnpj { value } = &cli.command {
        return check_cnpj(value);
    }

    let config = resolve_config(&cli)?;

    match &cli.command {
        Commands::Consolidate => {
            run_consolidate(&config)?;
        }
        Commands::Aggregate { input } => {
            run_aggregate(&config, input.as_deref())?;
        }
        Commands::BuildDb { input, database } => {
            run_build_db(&config, input.as_deref(), database.as_deref())?;
        }
        Commands::Run { database } => {
            run_all(&config, database.as_deref())?;
        }
        Commands::Cnpj { .. } => {}
    }

    Ok(())
}

/// Config file (if any) with command-line overrides applied
fn resolve_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    if let Some(registry) = &cli.registry {
        config.registry_path = registry.clone();
    }
    if let Some(output_dir) = &cli.output_dir {
        config.output_dir = output_dir.clone();
    }
    if config.output_dir.as_os_str().is_empty() {
        config.output_dir = PathBuf::from(DEFAULT_OUTPUT_DIR);
    }

    if !cli.bundles.is_empty() {
        config.bundles = cli
            .bundles
            .iter()
            .map(|path| {
                BundleSource::from_path(path).with_context(|| {
                    format!("Bundle name must contain a quarter label like 3T2024: {}", path.display())
                })
            })
            .collect::<Result<Vec<_>>>()?;
        config.bundle_dir = None;
    }

    config.validate()?;
    Ok(config)
}

fn require_registry(config: &PipelineConfig) -> Result<&Path> {
    if config.registry_path.as_os_str().is_empty() {
        bail!("No registry file configured (use --registry or registry_path in the config)");
    }
    Ok(&config.registry_path)
}

fn check_cnpj(value: &str) -> Result<()> {
    let normalized = cnpj::normalize_identifier(value);
    if cnpj::validate(value) {
        println!("✅ {} is valid", normalized);
    } else {
        println!("❌ {} is not a valid CNPJ", normalized);
    }
    Ok(())
}

fn run_consolidate(config: &PipelineConfig) -> Result<PathBuf> {
    println!("📦 Stage 1: bundles → {}", CONSOLIDATED_FILE);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let bundles = config.resolve_bundles()?;
    let mut report = RunReport::new();
    let records = Pipeline::new().consolidate(&bundles, &mut report)?;

    let path = config.output_dir.join(CONSOLIDATED_FILE);
    export::write_expenses_csv(&path, &records)?;
    let archive = export::zip_file(&path, None)?;

    println!("✓ Bundles processed: {} ({} failed)", report.bundles.len(), report.failed_bundles());
    println!("✓ Records: {}", records.len());
    println!("✓ Written: {}", path.display());
    println!("✓ Archive: {}", archive.display());
    Ok(path)
}

fn load_consolidated(config: &PipelineConfig, input: Option<&Path>) -> Result<Vec<ExpenseRecord>> {
    let path = input
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.output_dir.join(CONSOLIDATED_FILE));

    let records = export::read_expenses_csv(&path)
        .with_context(|| format!("Run `consolidate` first or pass --input ({})", path.display()))?;
    info!(path = %path.display(), records = records.len(), "consolidated records loaded");
    Ok(records)
}

fn run_aggregate(config: &PipelineConfig, input: Option<&Path>) -> Result<PathBuf> {
    println!("📊 Stage 2: validate, enrich, aggregate");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let records = load_consolidated(config, input)?;
    let registry = Registry::load(require_registry(config)?)?;

    let mut report = RunReport::new();
    let stats = Pipeline::new().aggregate(&records, &registry, &mut report);

    let path = config.output_dir.join(AGGREGATED_FILE);
    export::write_aggregates_csv(&path, &stats)?;
    let archive = export::zip_file(&path, None)?;

    if let Some(validation) = &report.validation {
        println!("✓ Valid records: {} of {}", validation.passed, validation.checked);
        println!("✓ Dropped: {}", validation.dropped);
    }
    println!("✓ Operators: {} ({} unmatched records)", stats.len(), report.unmatched_records);
    println!("✓ Archive: {}", archive.display());
    Ok(path)
}

fn open_database(config: &PipelineConfig, database: Option<&Path>) -> Result<(Connection, PathBuf)> {
    let path = database
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.database_path());

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(&path).with_context(|| format!("Failed to open {}", path.display()))?;
    db::setup_database(&conn)?;
    Ok((conn, path))
}

/// The aggregated file on disk only matches the default consolidated file;
/// an explicit `--input` always gets fresh aggregates.
fn load_or_compute_aggregates(
    config: &PipelineConfig,
    input: Option<&Path>,
    records: &[ExpenseRecord],
    registry: &Registry,
) -> Result<Vec<AggregatedStat>> {
    let aggregated_path = config.output_dir.join(AGGREGATED_FILE);
    if input.is_none() && aggregated_path.exists() {
        info!(path = %aggregated_path.display(), "reusing aggregated file");
        return export::read_aggregates_csv(&aggregated_path);
    }

    let mut report = RunReport::new();
    Ok(Pipeline::new().aggregate(records, registry, &mut report))
}

fn run_build_db(config: &PipelineConfig, input: Option<&Path>, database: Option<&Path>) -> Result<()> {
    println!("🗄️  Stage 3: load SQLite");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let records = load_consolidated(config, input)?;
    let registry = Registry::load(require_registry(config)?)?;

    let stats = load_or_compute_aggregates(config, input, &records, &registry)?;

    let (conn, path) = open_database(config, database)?;
    db::replace_operators(&conn, registry.entries())?;
    db::replace_expenses(&conn, &records)?;
    db::replace_aggregates(&conn, &stats)?;

    println!("✓ Database: {}", path.display());
    println!("✓ Operators: {}", registry.len());
    println!("✓ Expenses: {}", db::verify_count(&conn)?);
    Ok(())
}

fn run_all(config: &PipelineConfig, database: Option<&Path>) -> Result<()> {
    println!("🔄 Full run: consolidate → aggregate → SQLite");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let bundles = config.resolve_bundles()?;
    let output = Pipeline::new().run(&bundles, require_registry(config)?)?;

    let consolidated = config.output_dir.join(CONSOLIDATED_FILE);
    export::write_expenses_csv(&consolidated, &output.records)?;
    export::zip_file(&consolidated, None)?;

    let aggregated = config.output_dir.join(AGGREGATED_FILE);
    export::write_aggregates_csv(&aggregated, &output.stats)?;
    export::zip_file(&aggregated, None)?;

    let (conn, path) = open_database(config, database)?;
    db::replace_operators(&conn, output.registry.entries())?;
    db::replace_expenses(&conn, &output.records)?;
    db::replace_aggregates(&conn, &output.stats)?;
    db::insert_run_report(&conn, &output.report)?;

    let report = &output.report;
    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✓ Run: {}", report.run_id);
    println!("✓ Bundles: {} ({} failed)", report.bundles.len(), report.failed_bundles());
    println!("✓ Records: {}", output.records.len());
    if let Some(validation) = &report.validation {
        println!("✓ Dropped by validation: {}", validation.dropped);
    }
    println!("✓ Operators aggregated: {}", output.stats.len());
    println!("✓ Database: {}", path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stale_stat() -> AggregatedStat {
        AggregatedStat {
            identifier: "99999999999999".to_string(),
            legal_name: "ANTIGA".to_string(),
            registry_code: "N/A".to_string(),
            category: "N/A".to_string(),
            region: "N/A".to_string(),
            total: 1.0,
            mean: 1.0,
            std_dev: None,
        }
    }

    fn config_in(dir: &Path) -> PipelineConfig {
        let toml = format!(
            "registry_path = \"{}\"\noutput_dir = \"{}\"\n",
            dir.join("Relatorio_cadop.csv").display(),
            dir.display()
        );
        PipelineConfig::from_toml(&toml).unwrap()
    }

    #[test]
    fn test_explicit_input_recomputes_aggregates() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        export::write_aggregates_csv(&config.output_dir.join(AGGREGATED_FILE), &[stale_stat()]).unwrap();

        let other = dir.path().join("outro_consolidado.csv");
        let stats =
            load_or_compute_aggregates(&config, Some(&other), &[], &Registry::default()).unwrap();
        assert!(stats.is_empty());
    }

    #[test]
    fn test_default_input_reuses_aggregated_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        export::write_aggregates_csv(&config.output_dir.join(AGGREGATED_FILE), &[stale_stat()]).unwrap();

        let stats = load_or_compute_aggregates(&config, None, &[], &Registry::default()).unwrap();
        assert_eq!(stats, vec![stale_stat()]);
    }
}
