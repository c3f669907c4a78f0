// ==============================================================================
// main.rs - GenomeForge CLI
// ==============================================================================
// Description: Command-line entry point for genome analysis and custom
//              database management
// Author: Matt Barham
// Created: 2026-03-06
// Modified: 2026-07-21
// Version: 1.1.0
// ==============================================================================

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};

use genomeforge_core::batch::{BatchConfig, BatchEvent, BatchProcessor, JobPriority};
use genomeforge_core::database::{
    DatabaseManager, DbAnnotationSource, ExportFormat, ExportOptions, FileStorage, ImportOptions,
    Query, QueryFilter, QueryOperator, SchemaSpec,
};
use genomeforge_core::parsers::detect_format;
use genomeforge_core::processor::JobProcessor;

#[derive(Parser)]
#[command(name = "genomeforge", version, about = "GenomeForge analysis core")]
struct Cli {
    /// Directory holding the custom database files
    #[arg(long, env = "GENOMEFORGE_DATA_DIR", default_value = "genomeforge-data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Parse and match one or more raw genome files
    Analyze {
        /// Raw data files (23andMe, AncestryDNA, MyHeritage, FTDNA, LivingDNA, VCF)
        files: Vec<PathBuf>,

        /// Maximum concurrently processed files
        #[arg(long, default_value_t = 4)]
        concurrency: usize,

        /// Retries per failing file
        #[arg(long, default_value_t = 2)]
        max_retries: u32,

        /// Stop the whole batch on the first failed file
        #[arg(long)]
        stop_on_error: bool,
    },

    /// Import an annotation file as a named custom database
    ImportDb {
        /// Database name
        name: String,

        /// CSV/TSV/JSON/VCF annotation file
        file: PathBuf,

        /// Predefined schema (clinvar, pharmgkb, gwas, frequency); auto-detected when omitted
        #[arg(long)]
        schema: Option<String>,

        /// Drop invalid records instead of rejecting the import
        #[arg(long)]
        skip_invalid: bool,
    },

    /// Export a custom database
    ExportDb {
        /// Database name
        name: String,

        /// Output format: json, csv, or tsv
        #[arg(long, default_value = "json")]
        format: String,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,

        /// Output file (stdout when omitted)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Query one field of a custom database
    QueryDb {
        /// Database name
        name: String,

        /// Field to filter on
        field: String,

        /// Value the field must contain
        value: String,

        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Detect the format of a raw data file without parsing it
    Detect { file: PathBuf },

    /// Show the status of all custom databases
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    let manager = Arc::new(DatabaseManager::new(Arc::new(FileStorage::new(
        &cli.data_dir,
    )?)));
    manager.load_persisted()?;

    match cli.command {
        Command::Analyze {
            files,
            concurrency,
            max_retries,
            stop_on_error,
        } => analyze(manager, files, concurrency, max_retries, stop_on_error).await,
        Command::ImportDb {
            name,
            file,
            schema,
            skip_invalid,
        } => import_db(&manager, &name, &file, schema, skip_invalid).await,
        Command::ExportDb {
            name,
            format,
            pretty,
            output,
        } => export_db(&manager, &name, &format, pretty, output).await,
        Command::QueryDb {
            name,
            field,
            value,
            limit,
        } => query_db(&manager, &name, &field, &value, limit),
        Command::Detect { file } => detect(&file).await,
        Command::Status => {
            for status in manager.status() {
                println!(
                    "{}\t{} record(s)\t{}\tupdated {}",
                    status.name,
                    status.record_count,
                    if status.enabled { "enabled" } else { "disabled" },
                    status.last_updated.format("%Y-%m-%d %H:%M:%S")
                );
            }
            Ok(())
        }
    }
}

async fn analyze(
    manager: Arc<DatabaseManager>,
    files: Vec<PathBuf>,
    concurrency: usize,
    max_retries: u32,
    stop_on_error: bool,
) -> Result<()> {
    if files.is_empty() {
        anyhow::bail!("No input files given");
    }

    let source = Arc::new(DbAnnotationSource::discover(Arc::clone(&manager)));
    let processor = Arc::new(JobProcessor::new(source));

    let batch = BatchProcessor::new(BatchConfig {
        concurrency,
        max_retries,
        continue_on_error: !stop_on_error,
        job_timeout: Duration::from_secs(600),
        ..Default::default()
    });

    batch.subscribe(Box::new(|event| match event {
        BatchEvent::JobStarted { file, .. } => info!("Started {}", file),
        BatchEvent::JobCompleted { job_id, .. } => info!("Completed job {}", job_id),
        BatchEvent::JobFailed { job_id, error, .. } => info!("Job {} failed: {}", job_id, error),
        BatchEvent::JobRetrying {
            job_id,
            retry_count,
            ..
        } => info!("Retrying job {} (attempt {})", job_id, retry_count),
        _ => {}
    }));

    let file_refs: Vec<String> = files
        .iter()
        .map(|p| p.to_string_lossy().to_string())
        .collect();
    let batch_id = batch.submit_batch(
        file_refs,
        JobPriority::Normal,
        JobProcessor::handler(processor),
    );

    batch.run_until_idle().await;

    let summary = batch
        .batch_summary(batch_id)
        .context("Batch summary unavailable")?;
    println!(
        "Batch {:?}: {} complete, {} failed, {} cancelled",
        summary.status, summary.completed, summary.failed, summary.cancelled
    );
    println!(
        "Variants: {}  Findings: {}",
        summary.total_variants, summary.total_findings
    );

    for job in batch.batch_jobs(batch_id) {
        if let Some(result) = &job.result {
            println!(
                "{}: {} variants, {} clinical, {} drug, {} traits",
                job.file,
                result.variant_count,
                result.clinical_findings,
                result.drug_responses,
                result.trait_associations
            );
        } else if let Some(error) = &job.error {
            println!("{}: {:?} ({})", job.file, job.status, error);
        }
    }

    Ok(())
}

async fn import_db(
    manager: &DatabaseManager,
    name: &str,
    file: &PathBuf,
    schema: Option<String>,
    skip_invalid: bool,
) -> Result<()> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {:?}", file))?;

    let options = ImportOptions {
        schema: match schema {
            Some(name) => SchemaSpec::Named(name),
            None => SchemaSpec::Auto {
                name: name.to_string(),
            },
        },
        skip_invalid,
        mapping: None,
    };

    let filename = file.file_name().map(|n| n.to_string_lossy().to_string());
    let report = manager.import_text(name, &content, filename.as_deref(), &options)?;

    println!(
        "Imported {} record(s) into '{}' ({} skipped)",
        report.imported, name, report.skipped
    );
    if !report.duplicate_keys.is_empty() {
        println!(
            "Warning: {} duplicate primary key(s), e.g. {}",
            report.duplicate_keys.len(),
            report.duplicate_keys[0]
        );
    }
    Ok(())
}

async fn export_db(
    manager: &DatabaseManager,
    name: &str,
    format: &str,
    pretty: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    let database = manager
        .find_by_name(name)
        .with_context(|| format!("Database '{}' not found", name))?;

    let format = match format.to_lowercase().as_str() {
        "json" => ExportFormat::Json,
        "csv" => ExportFormat::Csv,
        "tsv" => ExportFormat::Tsv,
        other => anyhow::bail!("Unknown export format '{}'", other),
    };

    let rendered = manager.export(
        &database.id,
        &ExportOptions {
            format,
            pretty,
            include_header: true,
        },
    )?;

    match output {
        Some(path) => {
            tokio::fs::write(&path, rendered).await?;
            println!("Exported '{}' to {:?}", name, path);
        }
        None => println!("{}", rendered),
    }
    Ok(())
}

fn query_db(
    manager: &DatabaseManager,
    name: &str,
    field: &str,
    value: &str,
    limit: usize,
) -> Result<()> {
    let database = manager
        .find_by_name(name)
        .with_context(|| format!("Database '{}' not found", name))?;

    let query = Query {
        filters: vec![QueryFilter {
            field: field.to_string(),
            operator: QueryOperator::Contains,
            value: serde_json::Value::String(value.to_string()),
            case_sensitive: false,
        }],
        limit: Some(limit),
        ..Default::default()
    };

    let hits = manager.query(&database.id, &query)?;
    println!("{} match(es)", hits.len());
    for record in hits {
        let rendered = serde_json::to_string(&record.values)?;
        println!("{}", rendered);
    }
    Ok(())
}

async fn detect(file: &PathBuf) -> Result<()> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {:?}", file))?;

    match detect_format(&content) {
        Some(format) => println!("{}", format.as_str()),
        None => println!("unknown"),
    }
    Ok(())
}
