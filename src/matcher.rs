// ==============================================================================
// matcher.rs - Variant Matching and Impact Scoring
// ==============================================================================
// Description: Matches a parsed genome against annotation sources, scores
//              impact, assigns categories, and ranks results
// Author: Matt Barham
// Created: 2026-02-12
// Modified: 2026-07-02
// Version: 1.2.0
// ==============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

use crate::annotations::{
    AnnotationSource, ClinicalRecord, DrugRecord, EvidenceLevel, FrequencyRecord, LookupError,
    SourceVersion, TraitRecord,
};
use crate::models::{ParsedGenome, Snp};

/// Impact scores are clamped to this ceiling
pub const MAX_IMPACT_SCORE: f64 = 6.0;

/// Default genome-wide significance threshold for trait associations
pub const DEFAULT_P_VALUE_THRESHOLD: f64 = 5e-8;

/// Default cap on ranked results
pub const DEFAULT_MAX_RESULTS: usize = 1000;

/// Single category assigned to each annotated variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantCategory {
    Pathogenic,
    Protective,
    Drug,
    Carrier,
    Neutral,
}

impl VariantCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            VariantCategory::Pathogenic => "pathogenic",
            VariantCategory::Protective => "protective",
            VariantCategory::Drug => "drug",
            VariantCategory::Carrier => "carrier",
            VariantCategory::Neutral => "neutral",
        }
    }
}

/// A trait association attached to a variant, annotated with the user's
/// observed genotype
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraitMatch {
    pub record: TraitRecord,
    pub observed_genotype: String,
    pub has_risk_allele: bool,
    /// Risk allele copies present (0-2, diploid clamped)
    pub risk_allele_copies: u8,
}

/// One variant present in both the genome and at least one annotation source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotatedVariant {
    pub snp: Snp,
    pub clinical: Option<ClinicalRecord>,
    pub drug: Option<DrugRecord>,
    pub frequency: Option<FrequencyRecord>,
    pub traits: Vec<TraitMatch>,
    pub impact_score: f64,
    pub category: VariantCategory,
}

/// Ranked digest of a match run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchSummary {
    /// Top "gene: condition" strings with impact score >= 4 (max 10)
    pub high_impact: Vec<String>,
    /// Deduplicated gene symbols with score in [2,4) (max 20)
    pub moderate_genes: Vec<String>,
    /// Unique pharmacogenes (max 20)
    pub pharmacogenes: Vec<String>,
    /// Carrier-status strings (max 10)
    pub carrier_status: Vec<String>,
    /// Trait names ranked by number of matched variants (max 20)
    pub top_traits: Vec<String>,
}

/// Aggregate of annotated variants for one genome against one source set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub genome_id: Uuid,
    pub source_version: SourceVersion,
    pub variants: Vec<AnnotatedVariant>,
    pub summary: MatchSummary,
    /// Matched variants before truncation
    pub total_matched: usize,
    pub matched_at: DateTime<Utc>,
}

/// Matcher configuration
#[derive(Debug, Clone)]
pub struct MatchOptions {
    pub max_results: usize,
    pub p_value_threshold: f64,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            max_results: DEFAULT_MAX_RESULTS,
            p_value_threshold: DEFAULT_P_VALUE_THRESHOLD,
        }
    }
}

fn clinical_weight(record: &ClinicalRecord) -> f64 {
    use crate::annotations::ClinicalSignificance::*;
    let base = match record.significance {
        Pathogenic => 4.0,
        LikelyPathogenic => 3.0,
        UncertainSignificance => 1.0,
        Conflicting => 0.5,
        Benign | LikelyBenign => 0.0,
    };
    base + f64::from(record.review_stars) * 0.25
}

fn evidence_weight(level: EvidenceLevel) -> f64 {
    match level {
        EvidenceLevel::OneA => 2.0,
        EvidenceLevel::OneB => 1.5,
        EvidenceLevel::TwoA => 1.0,
        EvidenceLevel::TwoB => 0.75,
        EvidenceLevel::Three => 0.5,
        EvidenceLevel::Four => 0.25,
    }
}

fn drug_weight(record: &DrugRecord) -> f64 {
    let best = record
        .interactions
        .iter()
        .map(|i| evidence_weight(i.evidence_level))
        .fold(0.0, f64::max);
    let label_bonus = if record.interactions.iter().any(|i| i.has_regulatory_label) {
        0.5
    } else {
        0.0
    };
    best + label_bonus
}

/// Deterministic impact score in [0, MAX_IMPACT_SCORE]
pub fn impact_score(clinical: Option<&ClinicalRecord>, drug: Option<&DrugRecord>) -> f64 {
    let score = clinical.map(clinical_weight).unwrap_or(0.0)
        + drug.map(drug_weight).unwrap_or(0.0);
    score.clamp(0.0, MAX_IMPACT_SCORE)
}

/// Assign the single category for a variant. Rules are evaluated in priority
/// order and the first match wins; genotype is never consulted.
pub fn categorize_variant(
    clinical: Option<&ClinicalRecord>,
    drug: Option<&DrugRecord>,
) -> VariantCategory {
    if let Some(record) = clinical {
        if record.significance.is_pathogenic() {
            return VariantCategory::Pathogenic;
        }
    }
    if let Some(record) = clinical {
        if record.significance.is_benign()
            && record.condition.to_lowercase().contains("protective")
        {
            return VariantCategory::Protective;
        }
    }
    if drug.is_some() {
        return VariantCategory::Drug;
    }
    if let Some(record) = clinical {
        // Carrier status would need zygosity, which is not computed here;
        // this arm reports potential carriers only.
        if record.significance.is_pathogenic() {
            return VariantCategory::Carrier;
        }
    }
    VariantCategory::Neutral
}

/// Count copies of the risk allele in a two-character genotype (clamped to 2)
fn risk_allele_copies(genotype: &str, risk_allele: char) -> u8 {
    let copies = genotype
        .chars()
        .filter(|c| c.eq_ignore_ascii_case(&risk_allele))
        .count();
    copies.min(2) as u8
}

/// Match a parsed genome against an annotation source.
///
/// All four lookups are fanned out concurrently over the full rsid set; a
/// variant with no hit in any source is dropped silently.
pub async fn match_genome<S: AnnotationSource>(
    genome: &ParsedGenome,
    source: &S,
    options: &MatchOptions,
) -> Result<MatchResult, LookupError> {
    let rsids = genome.rsids();

    let (clinical, drugs, frequencies, traits) = tokio::join!(
        source.clinical_by_ids(&rsids),
        source.drugs_by_ids(&rsids),
        source.frequencies_by_ids(&rsids),
        source.traits_by_ids(&rsids),
    );
    let mut clinical = clinical?;
    let mut drugs = drugs?;
    let mut frequencies = frequencies?;
    let mut traits = traits?;

    let mut variants: Vec<AnnotatedVariant> = Vec::new();

    for snp in genome.snps.values() {
        let clinical_hit = clinical.remove(&snp.rsid);
        let drug_hit = drugs.remove(&snp.rsid);
        let frequency_hit = frequencies.remove(&snp.rsid);
        let trait_hits: Vec<TraitMatch> = traits
            .remove(&snp.rsid)
            .unwrap_or_default()
            .into_iter()
            .filter(|t| t.p_value <= options.p_value_threshold)
            .map(|record| {
                let copies = if snp.is_no_call() {
                    0
                } else {
                    risk_allele_copies(&snp.genotype, record.risk_allele)
                };
                TraitMatch {
                    observed_genotype: snp.genotype.clone(),
                    has_risk_allele: copies > 0,
                    risk_allele_copies: copies,
                    record,
                }
            })
            .collect();

        // No database hit at all: not an error, just not a finding
        if clinical_hit.is_none()
            && drug_hit.is_none()
            && frequency_hit.is_none()
            && trait_hits.is_empty()
        {
            continue;
        }

        let impact_score = impact_score(clinical_hit.as_ref(), drug_hit.as_ref());
        let category = categorize_variant(clinical_hit.as_ref(), drug_hit.as_ref());

        variants.push(AnnotatedVariant {
            snp: snp.clone(),
            clinical: clinical_hit,
            drug: drug_hit,
            frequency: frequency_hit,
            traits: trait_hits,
            impact_score,
            category,
        });
    }

    variants.sort_by(|a, b| {
        b.impact_score
            .partial_cmp(&a.impact_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let total_matched = variants.len();
    variants.truncate(options.max_results);

    let summary = summarize(&variants);

    info!(
        "Matched {} of {} variants against {} ({} ranked)",
        total_matched,
        genome.len(),
        source.version().name,
        variants.len()
    );

    Ok(MatchResult {
        genome_id: genome.id,
        source_version: source.version(),
        variants,
        summary,
        total_matched,
        matched_at: Utc::now(),
    })
}

/// Extract the ranked digest from the sorted, truncated result set
fn summarize(variants: &[AnnotatedVariant]) -> MatchSummary {
    let mut summary = MatchSummary::default();

    for variant in variants {
        if summary.high_impact.len() < 10 && variant.impact_score >= 4.0 {
            if let Some(clinical) = &variant.clinical {
                let gene = clinical.gene.clone().unwrap_or_else(|| variant.snp.rsid.clone());
                summary.high_impact.push(format!("{}: {}", gene, clinical.condition));
            }
        }

        if summary.moderate_genes.len() < 20
            && variant.impact_score >= 2.0
            && variant.impact_score < 4.0
        {
            let gene = variant
                .clinical
                .as_ref()
                .and_then(|c| c.gene.clone())
                .or_else(|| variant.drug.as_ref().map(|d| d.gene.clone()));
            if let Some(gene) = gene {
                if !summary.moderate_genes.contains(&gene) {
                    summary.moderate_genes.push(gene);
                }
            }
        }

        if summary.pharmacogenes.len() < 20 {
            if let Some(drug) = &variant.drug {
                if !summary.pharmacogenes.contains(&drug.gene) {
                    summary.pharmacogenes.push(drug.gene.clone());
                }
            }
        }

        if summary.carrier_status.len() < 10 && variant.category == VariantCategory::Carrier {
            if let Some(clinical) = &variant.clinical {
                let gene = clinical.gene.clone().unwrap_or_else(|| variant.snp.rsid.clone());
                summary.carrier_status.push(format!("{}: {}", gene, clinical.condition));
            }
        }
    }

    let mut trait_counts: HashMap<&str, usize> = HashMap::new();
    for variant in variants {
        for trait_match in &variant.traits {
            *trait_counts
                .entry(trait_match.record.trait_name.as_str())
                .or_insert(0) += 1;
        }
    }
    let mut ranked: Vec<(&str, usize)> = trait_counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    summary.top_traits = ranked
        .into_iter()
        .take(20)
        .map(|(name, _)| name.to_string())
        .collect();

    summary
}
