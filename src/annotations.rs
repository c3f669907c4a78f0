// ==============================================================================
// annotations.rs - Annotation Records and Lookup Contract
// ==============================================================================
// Description: Record types for reference annotation sources and the
//              batched-by-id lookup contract consumed by the matcher
// Author: Matt Barham
// Created: 2026-02-12
// Modified: 2026-06-30
// Version: 1.1.0
// ==============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use thiserror::Error;

/// Clinical significance classification of a variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClinicalSignificance {
    Pathogenic,
    LikelyPathogenic,
    UncertainSignificance,
    Conflicting,
    LikelyBenign,
    Benign,
}

impl ClinicalSignificance {
    /// Parse a normalized significance string (lowercase, underscores)
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pathogenic" => Some(Self::Pathogenic),
            "likely_pathogenic" => Some(Self::LikelyPathogenic),
            "uncertain_significance" => Some(Self::UncertainSignificance),
            "conflicting" | "conflicting_interpretations" => Some(Self::Conflicting),
            "likely_benign" => Some(Self::LikelyBenign),
            "benign" => Some(Self::Benign),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pathogenic => "pathogenic",
            Self::LikelyPathogenic => "likely_pathogenic",
            Self::UncertainSignificance => "uncertain_significance",
            Self::Conflicting => "conflicting",
            Self::LikelyBenign => "likely_benign",
            Self::Benign => "benign",
        }
    }

    /// Pathogenic or likely pathogenic
    pub fn is_pathogenic(&self) -> bool {
        matches!(self, Self::Pathogenic | Self::LikelyPathogenic)
    }

    /// Benign or likely benign
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::Benign | Self::LikelyBenign)
    }
}

/// Clinical-significance annotation for one variant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClinicalRecord {
    pub rsid: String,
    pub gene: Option<String>,
    pub condition: String,
    pub significance: ClinicalSignificance,
    /// Review confidence (0-4 stars)
    pub review_stars: u8,
}

/// PharmGKB-style evidence level for a drug-gene interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvidenceLevel {
    #[serde(rename = "1A")]
    OneA,
    #[serde(rename = "1B")]
    OneB,
    #[serde(rename = "2A")]
    TwoA,
    #[serde(rename = "2B")]
    TwoB,
    #[serde(rename = "3")]
    Three,
    #[serde(rename = "4")]
    Four,
}

impl EvidenceLevel {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "1A" => Some(Self::OneA),
            "1B" => Some(Self::OneB),
            "2A" => Some(Self::TwoA),
            "2B" => Some(Self::TwoB),
            "3" => Some(Self::Three),
            "4" => Some(Self::Four),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneA => "1A",
            Self::OneB => "1B",
            Self::TwoA => "2A",
            Self::TwoB => "2B",
            Self::Three => "3",
            Self::Four => "4",
        }
    }
}

/// One drug attached to a drug-interaction record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrugInteraction {
    pub drug: String,
    pub evidence_level: EvidenceLevel,
    /// Whether an official regulatory label covers this interaction
    pub has_regulatory_label: bool,
    pub recommendation: Option<String>,
}

/// Drug-interaction annotation for one variant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrugRecord {
    pub rsid: String,
    pub gene: String,
    pub interactions: Vec<DrugInteraction>,
}

/// Population allele-frequency annotation for one variant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrequencyRecord {
    pub rsid: String,
    pub allele: String,
    /// Global allele frequency in [0,1]
    pub frequency: f64,
}

/// GWAS trait association for one variant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraitRecord {
    pub rsid: String,
    pub trait_name: String,
    pub risk_allele: char,
    pub p_value: f64,
    pub effect_size: Option<f64>,
}

/// Version descriptor for an annotation source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceVersion {
    pub name: String,
    pub version: String,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Lookup failures surfaced by an annotation backend
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("Annotation backend error: {0}")]
    Backend(String),
}

/// Batched-by-id lookup contract the matcher fans out over. Implementations
/// may be backed by the database manager or by bundled reference data.
///
/// Methods are declared in the desugared `impl Future + Send` form so the
/// lookup futures stay spawnable from generic callers; implementations can
/// still write plain `async fn`.
pub trait AnnotationSource: Send + Sync {
    fn version(&self) -> SourceVersion;

    fn clinical_by_ids(
        &self,
        rsids: &[String],
    ) -> impl Future<Output = Result<HashMap<String, ClinicalRecord>, LookupError>> + Send;

    fn drugs_by_ids(
        &self,
        rsids: &[String],
    ) -> impl Future<Output = Result<HashMap<String, DrugRecord>, LookupError>> + Send;

    fn frequencies_by_ids(
        &self,
        rsids: &[String],
    ) -> impl Future<Output = Result<HashMap<String, FrequencyRecord>, LookupError>> + Send;

    fn traits_by_ids(
        &self,
        rsids: &[String],
    ) -> impl Future<Output = Result<HashMap<String, Vec<TraitRecord>>, LookupError>> + Send;
}

/// In-memory annotation source for bundled reference data and tests
#[derive(Debug, Default, Clone)]
pub struct StaticAnnotationSource {
    pub clinical: HashMap<String, ClinicalRecord>,
    pub drugs: HashMap<String, DrugRecord>,
    pub frequencies: HashMap<String, FrequencyRecord>,
    pub traits: HashMap<String, Vec<TraitRecord>>,
    pub source_version: Option<SourceVersion>,
}

impl StaticAnnotationSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clinical(mut self, record: ClinicalRecord) -> Self {
        self.clinical.insert(record.rsid.clone(), record);
        self
    }

    pub fn with_drugs(mut self, record: DrugRecord) -> Self {
        self.drugs.insert(record.rsid.clone(), record);
        self
    }

    pub fn with_frequency(mut self, record: FrequencyRecord) -> Self {
        self.frequencies.insert(record.rsid.clone(), record);
        self
    }

    pub fn with_trait(mut self, record: TraitRecord) -> Self {
        self.traits
            .entry(record.rsid.clone())
            .or_default()
            .push(record);
        self
    }
}

impl AnnotationSource for StaticAnnotationSource {
    fn version(&self) -> SourceVersion {
        self.source_version.clone().unwrap_or(SourceVersion {
            name: "bundled".to_string(),
            version: "0".to_string(),
            updated_at: None,
        })
    }

    async fn clinical_by_ids(
        &self,
        rsids: &[String],
    ) -> Result<HashMap<String, ClinicalRecord>, LookupError> {
        Ok(select_by_ids(&self.clinical, rsids))
    }

    async fn drugs_by_ids(
        &self,
        rsids: &[String],
    ) -> Result<HashMap<String, DrugRecord>, LookupError> {
        Ok(select_by_ids(&self.drugs, rsids))
    }

    async fn frequencies_by_ids(
        &self,
        rsids: &[String],
    ) -> Result<HashMap<String, FrequencyRecord>, LookupError> {
        Ok(select_by_ids(&self.frequencies, rsids))
    }

    async fn traits_by_ids(
        &self,
        rsids: &[String],
    ) -> Result<HashMap<String, Vec<TraitRecord>>, LookupError> {
        Ok(select_by_ids(&self.traits, rsids))
    }
}

fn select_by_ids<V: Clone>(map: &HashMap<String, V>, rsids: &[String]) -> HashMap<String, V> {
    rsids
        .iter()
        .filter_map(|rsid| map.get(rsid).map(|v| (rsid.clone(), v.clone())))
        .collect()
}
