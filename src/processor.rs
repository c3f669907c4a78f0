// ==============================================================================
// processor.rs - Reference Job Processing Pipeline
// ==============================================================================
// Description: Composes validation, parsing, and matching into the job
//              handler driven by the batch scheduler
// Author: Matt Barham
// Created: 2026-03-06
// Modified: 2026-07-21
// Version: 1.1.0
// ==============================================================================

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::annotations::AnnotationSource;
use crate::batch::{job_handler, BatchJobResult, JobContext, JobHandler};
use crate::matcher::{match_genome, MatchOptions, MatchResult};
use crate::models::ParsedGenome;
use crate::parsers::{GenomeParser, ParseOptions, ParsePhase, ParseProgress};
use crate::validator::FileValidator;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Reference pipeline: validate file -> parse -> match. The batch scheduler
/// is agnostic to this; it only sees the JobHandler.
pub struct JobProcessor<S: AnnotationSource> {
    source: Arc<S>,
    parse_options: ParseOptions,
    match_options: MatchOptions,
    validator: FileValidator,
}

impl<S: AnnotationSource + 'static> JobProcessor<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self {
            source,
            parse_options: ParseOptions::default(),
            match_options: MatchOptions::default(),
            validator: FileValidator::new(),
        }
    }

    pub fn with_options(
        source: Arc<S>,
        parse_options: ParseOptions,
        match_options: MatchOptions,
    ) -> Self {
        Self {
            source,
            parse_options,
            match_options,
            validator: FileValidator::new(),
        }
    }

    /// Read a raw genome file, decompressing transparently when gzipped
    pub async fn read_file(&self, path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {:?}", path))?;

        if bytes.starts_with(&GZIP_MAGIC) {
            let mut decoder = GzDecoder::new(bytes.as_slice());
            let mut text = String::new();
            decoder
                .read_to_string(&mut text)
                .with_context(|| format!("Failed to decompress {:?}", path))?;
            Ok(text)
        } else {
            String::from_utf8(bytes).with_context(|| format!("{:?} is not valid UTF-8", path))
        }
    }

    /// Process one file end to end, outside any scheduler
    pub async fn process_file(&self, path: &Path) -> Result<(ParsedGenome, MatchResult)> {
        let validated = self.validator.validate(path)?;
        info!(
            "Processing {} ({} bytes, sha256 {})",
            validated.safe_name, validated.size, validated.hash_sha256
        );

        let text = self.read_file(path).await?;

        let parse_options = self.parse_options.clone();
        let genome = tokio::task::spawn_blocking(move || {
            GenomeParser::with_options(parse_options).parse(&text)
        })
        .await
        .context("Parser task failed")??;

        let result = match_genome(&genome, self.source.as_ref(), &self.match_options).await?;
        Ok((genome, result))
    }

    /// Wrap the pipeline as the scheduler's job handler. The job's file
    /// reference is interpreted as a filesystem path; parse progress maps to
    /// 5-45% and matching to 50-95% so the analyzing transition fires at the
    /// parse/match boundary.
    pub fn handler(processor: Arc<Self>) -> JobHandler {
        job_handler(move |ctx: JobContext| {
            let processor = Arc::clone(&processor);
            async move {
                let path = PathBuf::from(&ctx.job.file);

                let validated = processor.validator.validate(&path)?;
                ctx.report_progress(5.0);

                if ctx.is_cancelled() {
                    anyhow::bail!("Job cancelled");
                }

                let text = processor.read_file(&path).await?;
                ctx.report_progress(10.0);

                let parse_options = processor.parse_options.clone();
                let progress = ctx.progress_handle();
                let genome = tokio::task::spawn_blocking(move || {
                    let callback = Arc::new(move |report: ParseProgress| {
                        let pct = match report.phase {
                            ParsePhase::Detecting => 12.0,
                            ParsePhase::Parsing => 15.0,
                            ParsePhase::Validating => 40.0,
                            ParsePhase::Complete => 45.0,
                        };
                        progress.report(pct);
                    });
                    GenomeParser::with_options(parse_options)
                        .on_progress(callback)
                        .parse(&text)
                })
                .await
                .context("Parser task failed")??;

                if ctx.is_cancelled() {
                    anyhow::bail!("Job cancelled");
                }
                ctx.report_progress(55.0);

                let result =
                    match_genome(&genome, processor.source.as_ref(), &processor.match_options)
                        .await?;
                ctx.report_progress(95.0);

                info!(
                    "Job {} processed {}: {} variants, {} matched",
                    ctx.job.id,
                    validated.safe_name,
                    genome.len(),
                    result.total_matched
                );

                let clinical_findings = result
                    .variants
                    .iter()
                    .filter(|v| v.clinical.is_some())
                    .count();
                let drug_responses = result
                    .variants
                    .iter()
                    .filter(|v| v.drug.is_some())
                    .count();
                let trait_associations =
                    result.variants.iter().map(|v| v.traits.len()).sum();

                Ok(BatchJobResult {
                    variant_count: genome.len(),
                    clinical_findings,
                    drug_responses,
                    trait_associations,
                })
            }
        })
    }
}
