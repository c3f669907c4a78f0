// ==============================================================================
// parsers/formats.rs - Format Signatures and Detection
// ==============================================================================
// Description: Ordered signature table for consumer raw-data formats
// Author: Matt Barham
// Created: 2026-02-10
// Modified: 2026-05-14
// Version: 1.0.1
// ==============================================================================
// Format references:
//   23andMe:      tab-delimited, 4 columns, '#' comments, no-call "--"/"00"
//   AncestryDNA:  comma-delimited, 5 columns (split alleles), no-call "0"
//   MyHeritage:   quoted CSV, 4 columns, combined genotype
//   FamilyTreeDNA: bare CSV, 4 columns, combined genotype
//   LivingDNA:    tab-delimited, 4 columns (same layout as 23andMe)
//   VCF:          ##fileformat header, #CHROM column line
// ==============================================================================

use crate::models::GenomeFormat;
use regex::Regex;

/// Number of leading lines scanned during format detection
pub const DETECTION_SCAN_LINES: usize = 20;

/// Column layout a detected format parses with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineLayout {
    /// rsid \t chromosome \t position \t genotype
    Tab4,
    /// rsid,chromosome,position,allele1,allele2
    Comma5,
    /// "rsid","chromosome","position","genotype"
    QuotedComma4,
    /// rsid,chromosome,position,genotype
    Comma4,
    /// #CHROM POS ID REF ALT ... [FORMAT SAMPLE]
    Vcf,
}

impl GenomeFormat {
    /// The column layout used to parse data lines of this format
    pub fn layout(&self) -> LineLayout {
        match self {
            GenomeFormat::TwentyThreeAndMeV3
            | GenomeFormat::TwentyThreeAndMeV4
            | GenomeFormat::TwentyThreeAndMeV5
            | GenomeFormat::LivingDna => LineLayout::Tab4,
            GenomeFormat::AncestryDna => LineLayout::Comma5,
            GenomeFormat::MyHeritage => LineLayout::QuotedComma4,
            GenomeFormat::FamilyTreeDna => LineLayout::Comma4,
            GenomeFormat::Vcf => LineLayout::Vcf,
        }
    }
}

/// One entry of the ordered signature table
struct FormatSignature {
    format: GenomeFormat,
    pattern: Regex,
}

/// Build the signature table, most specific first. The quoted MyHeritage
/// header must be tested before the bare FamilyTreeDNA comma header, and the
/// versioned 23andMe markers before the generic 23andMe comment; the generic
/// tab-separated data line is the final fallback.
fn signature_table() -> Vec<FormatSignature> {
    let entry = |format: GenomeFormat, pattern: &str| FormatSignature {
        format,
        // Patterns are fixed string literals, so compilation cannot fail.
        pattern: Regex::new(pattern).unwrap(),
    };

    vec![
        entry(GenomeFormat::Vcf, r"^##fileformat=VCF"),
        entry(
            GenomeFormat::TwentyThreeAndMeV5,
            r"(?i)^#.*23andme.*(?:v5|version 5)",
        ),
        entry(
            GenomeFormat::TwentyThreeAndMeV4,
            r"(?i)^#.*23andme.*(?:v4|version 4)",
        ),
        entry(GenomeFormat::TwentyThreeAndMeV3, r"(?i)^#.*23andme"),
        entry(
            GenomeFormat::AncestryDna,
            r"(?i)(?:^#.*ancestrydna|^rsid,chromosome,position,allele1,allele2\s*$)",
        ),
        entry(
            GenomeFormat::MyHeritage,
            r#"(?i)(?:^#.*myheritage|^"rsid","chromosome","position","result")"#,
        ),
        entry(
            GenomeFormat::FamilyTreeDna,
            r"(?i)^rsid,chromosome,position,result\s*$",
        ),
        entry(GenomeFormat::LivingDna, r"(?i)^#.*living ?dna"),
        // Bare tab-separated data line: treated as the 23andMe v3 layout.
        entry(
            GenomeFormat::TwentyThreeAndMeV3,
            r"^(?:rs|i)\d+\t\S+\t\d+\t[ACGTDI0-]{1,2}\s*$",
        ),
    ]
}

/// Detect the raw-data format by scanning the first lines of the file
/// against the ordered signature table. The first signature whose pattern
/// matches any scanned line wins.
pub fn detect_format(text: &str) -> Option<GenomeFormat> {
    let lines: Vec<&str> = text.lines().take(DETECTION_SCAN_LINES).collect();

    for signature in signature_table() {
        if lines.iter().any(|line| signature.pattern.is_match(line)) {
            return Some(signature.format);
        }
    }

    None
}
