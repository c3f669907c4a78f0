// ==============================================================================
// models.rs - Core Genome Data Models
// ==============================================================================
// Description: Canonical variant, genome, and validation data structures
// Author: Matt Barham
// Created: 2026-02-09
// Modified: 2026-06-30
// Version: 1.1.0
// ==============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Sentinel genotype for no-calls ("--", "00", empty all normalize to this)
pub const NO_CALL_GENOTYPE: &str = "--";

/// Sentinel allele for no-calls
pub const NO_CALL_ALLELE: char = '-';

/// Detected raw-data file format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenomeFormat {
    TwentyThreeAndMeV3,
    TwentyThreeAndMeV4,
    TwentyThreeAndMeV5,
    AncestryDna,
    MyHeritage,
    FamilyTreeDna,
    LivingDna,
    Vcf,
}

impl GenomeFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenomeFormat::TwentyThreeAndMeV3 => "23andMe v3",
            GenomeFormat::TwentyThreeAndMeV4 => "23andMe v4",
            GenomeFormat::TwentyThreeAndMeV5 => "23andMe v5",
            GenomeFormat::AncestryDna => "AncestryDNA",
            GenomeFormat::MyHeritage => "MyHeritage",
            GenomeFormat::FamilyTreeDna => "FamilyTreeDNA",
            GenomeFormat::LivingDna => "LivingDNA",
            GenomeFormat::Vcf => "VCF",
        }
    }
}

/// Reference genome build the coordinates were reported against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceBuild {
    Build36,
    Build37,
    Build38,
    Unknown,
}

impl ReferenceBuild {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceBuild::Build36 => "GRCh36",
            ReferenceBuild::Build37 => "GRCh37",
            ReferenceBuild::Build38 => "GRCh38",
            ReferenceBuild::Unknown => "unknown",
        }
    }
}

/// A single observed variant (SNP) from a raw data file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snp {
    /// SNP identifier (e.g., "rs548049170" or "i3000001")
    pub rsid: String,
    /// Normalized chromosome ("1"-"22", "X", "Y", "MT")
    pub chromosome: String,
    /// Base pair position
    pub position: u64,
    /// Two-character genotype ("TT", "AG", "--" for no-call)
    pub genotype: String,
    /// First allele
    pub allele1: char,
    /// Second allele
    pub allele2: char,
}

impl Snp {
    /// Build a variant from a combined two-character genotype string.
    /// Empty genotypes normalize to the no-call sentinel pair.
    pub fn new(rsid: String, chromosome: String, position: u64, genotype: &str) -> Self {
        let mut chars = genotype.chars();
        let allele1 = chars.next().unwrap_or(NO_CALL_ALLELE);
        let allele2 = chars.next().unwrap_or(NO_CALL_ALLELE);
        let genotype = if genotype.is_empty() {
            NO_CALL_GENOTYPE.to_string()
        } else {
            genotype.to_string()
        };
        Self {
            rsid,
            chromosome,
            position,
            genotype,
            allele1,
            allele2,
        }
    }

    /// Whether this variant was reported as a no-call
    pub fn is_no_call(&self) -> bool {
        self.genotype == NO_CALL_GENOTYPE
    }
}

/// Per-parse validation accounting (counts, warnings, errors)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationSummary {
    /// Total data lines seen (comments and blanks excluded)
    pub total_lines: usize,
    /// Lines that produced a variant
    pub parsed_count: usize,
    /// Lines rejected as invalid
    pub skipped_count: usize,
    /// Later occurrences of an rsid that overwrote an earlier one
    pub duplicate_count: usize,
    /// Recoverable issues (duplicates, unknown build, ...)
    pub warnings: Vec<String>,
    /// Collected line-level error descriptions
    pub errors: Vec<String>,
}

/// A fully parsed genome: detected format, inferred build, and variant map
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedGenome {
    pub id: Uuid,
    pub format: GenomeFormat,
    pub build: ReferenceBuild,
    /// Fraction of reference markers agreeing with the declared build (0.0-1.0)
    pub build_confidence: f64,
    /// Variant map keyed by rsid; later duplicates overwrite earlier entries
    pub snps: HashMap<String, Snp>,
    pub summary: ValidationSummary,
    pub parsed_at: DateTime<Utc>,
}

impl ParsedGenome {
    /// Number of distinct variants in the genome
    pub fn len(&self) -> usize {
        self.snps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snps.is_empty()
    }

    /// Look up a variant by rsid
    pub fn snp(&self, rsid: &str) -> Option<&Snp> {
        self.snps.get(rsid)
    }

    /// All rsids present in the genome
    pub fn rsids(&self) -> Vec<String> {
        self.snps.keys().cloned().collect()
    }
}

/// Whether a character is a legal allele (bases, no-call, insertion/deletion
/// codes, or the AncestryDNA zero no-call)
pub fn is_valid_allele(c: char) -> bool {
    matches!(c, 'A' | 'T' | 'C' | 'G' | '-' | 'I' | 'D' | '0')
}

/// Whether a string is a legal SNP identifier ("rs123..." or "i123...")
pub fn is_valid_rsid(id: &str) -> bool {
    let digits = if let Some(rest) = id.strip_prefix("rs") {
        rest
    } else if let Some(rest) = id.strip_prefix('i') {
        rest
    } else {
        return false;
    };
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

/// Normalize a chromosome name: strip a leading "chr", map "M" to "MT",
/// uppercase. Returns None for anything outside 1-22, X, Y, MT.
pub fn normalize_chromosome(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let stripped = trimmed
        .strip_prefix("chr")
        .or_else(|| trimmed.strip_prefix("Chr"))
        .or_else(|| trimmed.strip_prefix("CHR"))
        .unwrap_or(trimmed);

    let upper = stripped.to_ascii_uppercase();
    let mapped = if upper == "M" { "MT".to_string() } else { upper };

    match mapped.as_str() {
        "X" | "Y" | "MT" => Some(mapped),
        _ => match mapped.parse::<u8>() {
            Ok(n) if (1..=22).contains(&n) => Some(n.to_string()),
            _ => None,
        },
    }
}
