// ==============================================================================
// parsers/genome.rs - Multi-Format Genome Parser
// ==============================================================================
// Description: Parses raw consumer genotype text into a canonical genome
// Author: Matt Barham
// Created: 2026-02-10
// Modified: 2026-07-21
// Version: 1.2.0
// ==============================================================================
// Example (23andMe):
//   # rsid    chromosome    position    genotype
//   rs548049170    1    69869    TT
//   rs13328684    1    74792    --
// ==============================================================================

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{
    is_valid_allele, is_valid_rsid, normalize_chromosome, GenomeFormat, ParsedGenome, Snp,
    ValidationSummary,
};
use crate::parsers::build_inference::{infer_build, MIN_BUILD_CONFIDENCE};
use crate::parsers::formats::{detect_format, LineLayout};

/// Lines between progress reports while parsing
pub const PROGRESS_LINE_INTERVAL: usize = 10_000;

/// Cap on stored warning/error strings; counts are always exact
const MAX_STORED_ISSUES: usize = 100;

/// Parse phase reported through the progress callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsePhase {
    Detecting,
    Parsing,
    Validating,
    Complete,
}

/// A coarse progress report
#[derive(Debug, Clone, Copy)]
pub struct ParseProgress {
    pub phase: ParsePhase,
    pub lines_processed: usize,
}

/// Callback invoked at phase boundaries and every PROGRESS_LINE_INTERVAL lines
pub type ProgressCallback = Arc<dyn Fn(ParseProgress) + Send + Sync>;

/// Parser behavior flags
#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Enforce the allele alphabet on genotype characters
    pub validate_genotypes: bool,
    /// Count invalid lines as skipped instead of aborting on the first one
    pub skip_invalid_lines: bool,
    /// Fatal cap on invalid lines, enforced regardless of the skip flag
    pub max_errors: usize,
    /// Chromosomes to include; empty includes all. Filtered lines are not
    /// counted as skipped.
    pub include_chromosomes: Vec<String>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            validate_genotypes: true,
            skip_invalid_lines: true,
            max_errors: 1000,
            include_chromosomes: Vec::new(),
        }
    }
}

/// Fatal parsing errors. Skipped lines, duplicates, and unknown builds are
/// recorded on the ValidationSummary instead.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Unable to detect raw data format")]
    UnknownFormat,

    #[error("Invalid line {line_number}: {content}")]
    InvalidLine { line_number: usize, content: String },

    #[error("Invalid line count {count} exceeds configured maximum {max}")]
    TooManyErrors { count: usize, max: usize },
}

/// Multi-format raw genome parser
#[derive(Default)]
pub struct GenomeParser {
    options: ParseOptions,
    progress: Option<ProgressCallback>,
}

impl GenomeParser {
    /// Create a parser with default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a parser with explicit options
    pub fn with_options(options: ParseOptions) -> Self {
        Self {
            options,
            progress: None,
        }
    }

    /// Attach a progress callback
    pub fn on_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Parse raw file text into a canonical genome.
    ///
    /// # Returns
    /// * `Ok(ParsedGenome)` - detected format, inferred build, variant map
    /// * `Err(ParseError)` - undetected format, abort on invalid line, or
    ///   the invalid-line cap was exceeded
    pub fn parse(&self, text: &str) -> Result<ParsedGenome, ParseError> {
        self.report(ParsePhase::Detecting, 0);

        let format = detect_format(text).ok_or(ParseError::UnknownFormat)?;
        let layout = format.layout();
        info!("Detected raw data format: {}", format.as_str());

        self.report(ParsePhase::Parsing, 0);

        let mut snps: HashMap<String, Snp> = HashMap::new();
        let mut summary = ValidationSummary::default();

        for (index, raw_line) in text.lines().enumerate() {
            let line_number = index + 1;
            // Strip carriage returns only; a trailing tab marks an empty
            // genotype field and must survive splitting.
            let line = raw_line.trim_end_matches('\r');

            // Comments and blanks (covers VCF meta/header lines too)
            if line.trim().is_empty() || line.trim_start().starts_with('#') {
                continue;
            }
            if is_header_line(line) {
                continue;
            }

            summary.total_lines += 1;

            match self.parse_data_line(line, layout) {
                Ok(snp) => {
                    if !self.options.include_chromosomes.is_empty()
                        && !self.options.include_chromosomes.contains(&snp.chromosome)
                    {
                        continue;
                    }

                    if snps.insert(snp.rsid.clone(), snp.clone()).is_some() {
                        summary.duplicate_count += 1;
                        if summary.warnings.len() < MAX_STORED_ISSUES {
                            summary.warnings.push(format!(
                                "Duplicate rsid {} at line {} overwrote earlier entry",
                                snp.rsid, line_number
                            ));
                        }
                        debug!("Duplicate rsid {} at line {}", snp.rsid, line_number);
                    }
                    summary.parsed_count += 1;
                }
                Err(reason) => {
                    summary.skipped_count += 1;
                    if summary.errors.len() < MAX_STORED_ISSUES {
                        summary
                            .errors
                            .push(format!("Line {}: {}", line_number, reason));
                    }

                    if summary.skipped_count > self.options.max_errors {
                        return Err(ParseError::TooManyErrors {
                            count: summary.skipped_count,
                            max: self.options.max_errors,
                        });
                    }
                    if !self.options.skip_invalid_lines {
                        return Err(ParseError::InvalidLine {
                            line_number,
                            content: line.to_string(),
                        });
                    }
                }
            }

            if summary.total_lines % PROGRESS_LINE_INTERVAL == 0 {
                self.report(ParsePhase::Parsing, summary.total_lines);
            }
        }

        self.report(ParsePhase::Validating, summary.total_lines);

        let inference = infer_build(&snps);
        if inference.markers_checked == 0 {
            summary
                .warnings
                .push("Build inference: no reference markers present in genome".to_string());
            warn!("No reference markers present, build is unknown");
        } else if inference.confidence < MIN_BUILD_CONFIDENCE {
            summary.warnings.push(format!(
                "Build inference confidence {:.2} below {:.2}, build is unknown",
                inference.confidence, MIN_BUILD_CONFIDENCE
            ));
            warn!(
                "Build confidence {:.2} over {} markers, build is unknown",
                inference.confidence, inference.markers_checked
            );
        }

        info!(
            "Parsed {} variants ({} skipped, {} duplicates), build {} at {:.2} confidence",
            snps.len(),
            summary.skipped_count,
            summary.duplicate_count,
            inference.build.as_str(),
            inference.confidence
        );

        self.report(ParsePhase::Complete, summary.total_lines);

        Ok(ParsedGenome {
            id: Uuid::new_v4(),
            format,
            build: inference.build,
            build_confidence: inference.confidence,
            snps,
            summary,
            parsed_at: Utc::now(),
        })
    }

    fn report(&self, phase: ParsePhase, lines_processed: usize) {
        if let Some(callback) = &self.progress {
            callback(ParseProgress {
                phase,
                lines_processed,
            });
        }
    }

    /// Parse one data line according to the format's column layout.
    /// Errors here are line-scoped reasons, not fatal conditions.
    fn parse_data_line(&self, line: &str, layout: LineLayout) -> Result<Snp, String> {
        match layout {
            LineLayout::Tab4 => {
                let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
                if fields.len() != 4 {
                    return Err(format!(
                        "expected 4 tab-delimited fields, found {}",
                        fields.len()
                    ));
                }
                self.build_snp(fields[0], fields[1], fields[2], fields[3])
            }
            LineLayout::Comma4 | LineLayout::QuotedComma4 => {
                let fields = split_quoted(line, ',');
                if fields.len() != 4 {
                    return Err(format!(
                        "expected 4 comma-delimited fields, found {}",
                        fields.len()
                    ));
                }
                self.build_snp(&fields[0], &fields[1], &fields[2], &fields[3])
            }
            LineLayout::Comma5 => {
                let fields = split_quoted(line, ',');
                if fields.len() != 5 {
                    return Err(format!(
                        "expected 5 comma-delimited fields, found {}",
                        fields.len()
                    ));
                }
                let allele1 = fields[3].trim();
                let allele2 = fields[4].trim();
                if allele1.chars().count() != 1 || allele2.chars().count() != 1 {
                    return Err(format!(
                        "alleles must be single characters, found '{}'/'{}'",
                        allele1, allele2
                    ));
                }
                // AncestryDNA encodes a no-call as 0/0
                let genotype = if allele1 == "0" && allele2 == "0" {
                    String::new()
                } else {
                    format!("{}{}", allele1, allele2)
                };
                self.build_snp(&fields[0], &fields[1], &fields[2], &genotype)
            }
            LineLayout::Vcf => {
                let fields: Vec<&str> = line.split('\t').map(str::trim).collect();
                if fields.len() < 8 {
                    return Err(format!(
                        "expected at least 8 VCF columns, found {}",
                        fields.len()
                    ));
                }
                let genotype = decode_vcf_genotype(&fields);
                self.build_snp(fields[2], fields[0], fields[1], &genotype)
            }
        }
    }

    /// Shared validation and normalization for all layouts
    fn build_snp(
        &self,
        id_raw: &str,
        chromosome_raw: &str,
        position_raw: &str,
        genotype_raw: &str,
    ) -> Result<Snp, String> {
        let rsid = id_raw.trim().to_lowercase();
        if !is_valid_rsid(&rsid) {
            return Err(format!("invalid rsid '{}'", id_raw.trim()));
        }

        let chromosome = normalize_chromosome(chromosome_raw)
            .ok_or_else(|| format!("invalid chromosome '{}'", chromosome_raw.trim()))?;

        let position = position_raw
            .trim()
            .parse::<u64>()
            .map_err(|_| format!("invalid position '{}'", position_raw.trim()))?;

        let genotype = genotype_raw.trim().to_uppercase();
        let normalized = match genotype.as_str() {
            "" | "--" | "00" => String::new(),
            other => {
                if other.chars().count() != 2 {
                    return Err(format!(
                        "genotype '{}' must be two characters or a no-call",
                        other
                    ));
                }
                if self.options.validate_genotypes
                    && !other.chars().all(is_valid_allele)
                {
                    return Err(format!("invalid genotype characters '{}'", other));
                }
                other.to_string()
            }
        };

        Ok(Snp::new(rsid, chromosome, position, &normalized))
    }
}

/// Whether a line is a recognized column header for any delimited layout
fn is_header_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower.starts_with("rsid,") || lower.starts_with("\"rsid\"") || lower.starts_with("rsid\t")
}

/// Split one delimited line, honoring quoted fields and doubled quotes
fn split_quoted(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(c);
            }
        } else if c == '"' {
            in_quotes = true;
        } else if c == delimiter {
            fields.push(current.trim().to_string());
            current.clear();
        } else {
            current.push(c);
        }
    }
    fields.push(current.trim().to_string());
    fields
}

/// Decode the first sample's GT into a two-character genotype.
/// Returns an empty string (no-call) when no usable GT is present.
fn decode_vcf_genotype(fields: &[&str]) -> String {
    if fields.len() < 10 {
        return String::new();
    }

    let format_keys: Vec<&str> = fields[8].split(':').collect();
    let gt_index = match format_keys.iter().position(|k| *k == "GT") {
        Some(index) => index,
        None => return String::new(),
    };
    let gt = match fields[9].split(':').nth(gt_index) {
        Some(gt) => gt,
        None => return String::new(),
    };

    let reference = fields[3];
    let alternates: Vec<&str> = fields[4].split(',').collect();

    let indices: Vec<&str> = gt.split(['/', '|']).collect();
    if indices.len() != 2 {
        return String::new();
    }

    let mut genotype = String::new();
    for index_str in indices {
        if index_str == "." {
            return String::new();
        }
        let allele = match index_str.parse::<usize>() {
            Ok(0) => reference,
            Ok(n) => match alternates.get(n - 1) {
                Some(alt) => alt,
                None => return String::new(),
            },
            Err(_) => return String::new(),
        };
        // Multi-base alleles collapse to the insertion code
        if allele.chars().count() == 1 {
            genotype.push(allele.chars().next().unwrap_or('-'));
        } else {
            genotype.push('I');
        }
    }
    genotype
}
