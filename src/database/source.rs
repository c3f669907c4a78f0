// ==============================================================================
// database/source.rs - Manager-Backed Annotation Source
// ==============================================================================
// Description: Exposes custom databases through the matcher's batched
//              lookup contract
// Author: Matt Barham
// Created: 2026-03-04
// Modified: 2026-06-11
// Version: 1.1.0
// ==============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::annotations::{
    AnnotationSource, ClinicalRecord, ClinicalSignificance, DrugInteraction, DrugRecord,
    EvidenceLevel, FrequencyRecord, LookupError, SourceVersion, TraitRecord,
};
use crate::database::{DatabaseError, DatabaseManager, DatabaseRecord};

/// Adapter mapping manager-held databases (shaped like the predefined
/// clinvar/pharmgkb/gwas/frequency schemas) onto the lookup contract.
/// Databases are discovered by tag first, then by name.
pub struct DbAnnotationSource {
    manager: Arc<DatabaseManager>,
    clinical_db: Option<String>,
    drug_db: Option<String>,
    frequency_db: Option<String>,
    trait_db: Option<String>,
}

impl DbAnnotationSource {
    /// Discover the four source databases by tag or name
    pub fn discover(manager: Arc<DatabaseManager>) -> Self {
        let find = |label: &str| {
            manager
                .find_by_tag(label)
                .or_else(|| manager.find_by_name(label))
                .map(|db| db.id)
        };
        let clinical_db = find("clinvar");
        let drug_db = find("pharmgkb");
        let frequency_db = find("frequency");
        let trait_db = find("gwas");
        debug!(
            "Annotation source discovery: clinvar={:?} pharmgkb={:?} frequency={:?} gwas={:?}",
            clinical_db, drug_db, frequency_db, trait_db
        );
        Self {
            manager,
            clinical_db,
            drug_db,
            frequency_db,
            trait_db,
        }
    }

    /// Wire explicit database ids
    pub fn with_databases(
        manager: Arc<DatabaseManager>,
        clinical_db: Option<String>,
        drug_db: Option<String>,
        frequency_db: Option<String>,
        trait_db: Option<String>,
    ) -> Self {
        Self {
            manager,
            clinical_db,
            drug_db,
            frequency_db,
            trait_db,
        }
    }

    fn lookup(
        &self,
        database_id: &Option<String>,
        rsids: &[String],
    ) -> Result<HashMap<String, Vec<DatabaseRecord>>, LookupError> {
        let id = match database_id {
            Some(id) => id,
            None => return Ok(HashMap::new()),
        };
        self.manager
            .lookup_rsids(id, rsids)
            .map_err(|e: DatabaseError| LookupError::Backend(e.to_string()))
    }
}

fn f64_value(record: &DatabaseRecord, field: &str) -> Option<f64> {
    match record.value(field)? {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn bool_value(record: &DatabaseRecord, field: &str) -> bool {
    match record.value(field) {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::String(s)) => matches!(s.as_str(), "true" | "yes" | "1"),
        _ => false,
    }
}

impl AnnotationSource for DbAnnotationSource {
    fn version(&self) -> SourceVersion {
        let statuses = self.manager.status();
        let updated_at = statuses.iter().map(|s| s.last_updated).max();
        SourceVersion {
            name: "custom-databases".to_string(),
            version: format!("{} database(s)", statuses.len()),
            updated_at,
        }
    }

    async fn clinical_by_ids(
        &self,
        rsids: &[String],
    ) -> Result<HashMap<String, ClinicalRecord>, LookupError> {
        let hits = self.lookup(&self.clinical_db, rsids)?;
        let mut records = HashMap::new();
        for (rsid, rows) in hits {
            // One clinical assertion per variant; first row wins
            let Some(row) = rows.first() else { continue };
            let significance = match row
                .value_str("significance")
                .and_then(|s| ClinicalSignificance::parse(&s))
            {
                Some(significance) => significance,
                None => continue,
            };
            records.insert(
                rsid.clone(),
                ClinicalRecord {
                    rsid,
                    gene: row.value_str("gene"),
                    condition: row.value_str("condition").unwrap_or_default(),
                    significance,
                    review_stars: f64_value(row, "review_stars").unwrap_or(0.0) as u8,
                },
            );
        }
        Ok(records)
    }

    async fn drugs_by_ids(
        &self,
        rsids: &[String],
    ) -> Result<HashMap<String, DrugRecord>, LookupError> {
        let hits = self.lookup(&self.drug_db, rsids)?;
        let mut records = HashMap::new();
        for (rsid, rows) in hits {
            let mut interactions = Vec::new();
            let mut gene = String::new();
            for row in &rows {
                let Some(level) = row
                    .value_str("evidence_level")
                    .and_then(|l| EvidenceLevel::parse(&l))
                else {
                    continue;
                };
                let Some(drug) = row.value_str("drug") else { continue };
                if gene.is_empty() {
                    gene = row.value_str("gene").unwrap_or_default();
                }
                interactions.push(DrugInteraction {
                    drug,
                    evidence_level: level,
                    has_regulatory_label: bool_value(row, "has_regulatory_label"),
                    recommendation: row.value_str("recommendation"),
                });
            }
            if !interactions.is_empty() {
                records.insert(
                    rsid.clone(),
                    DrugRecord {
                        rsid,
                        gene,
                        interactions,
                    },
                );
            }
        }
        Ok(records)
    }

    async fn frequencies_by_ids(
        &self,
        rsids: &[String],
    ) -> Result<HashMap<String, FrequencyRecord>, LookupError> {
        let hits = self.lookup(&self.frequency_db, rsids)?;
        let mut records = HashMap::new();
        for (rsid, rows) in hits {
            let Some(row) = rows.first() else { continue };
            let Some(frequency) = f64_value(row, "frequency") else {
                continue;
            };
            records.insert(
                rsid.clone(),
                FrequencyRecord {
                    rsid,
                    allele: row.value_str("allele").unwrap_or_default(),
                    frequency,
                },
            );
        }
        Ok(records)
    }

    async fn traits_by_ids(
        &self,
        rsids: &[String],
    ) -> Result<HashMap<String, Vec<TraitRecord>>, LookupError> {
        let hits = self.lookup(&self.trait_db, rsids)?;
        let mut records: HashMap<String, Vec<TraitRecord>> = HashMap::new();
        for (rsid, rows) in hits {
            for row in &rows {
                let Some(trait_name) = row.value_str("trait") else {
                    continue;
                };
                let Some(p_value) = f64_value(row, "p_value") else {
                    continue;
                };
                let risk_allele = row
                    .value_str("risk_allele")
                    .and_then(|a| a.chars().next())
                    .unwrap_or('-');
                records.entry(rsid.clone()).or_default().push(TraitRecord {
                    rsid: rsid.clone(),
                    trait_name,
                    risk_allele,
                    p_value,
                    effect_size: f64_value(row, "effect_size"),
                });
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::ImportOptions;

    fn seeded_manager() -> Arc<DatabaseManager> {
        let manager = Arc::new(DatabaseManager::in_memory());

        let clinvar = "rsid,gene,condition,significance,review_stars\n\
                       rs1,CFTR,Cystic fibrosis,Pathogenic,4\n";
        manager
            .import_text("clinvar", clinvar, None, &ImportOptions::named("clinvar"))
            .unwrap();

        let pharmgkb = "rsid,gene,drug,evidence_level,has_regulatory_label\n\
                        rs2,CYP2C19,clopidogrel,1A,true\n\
                        rs2,CYP2C19,omeprazole,3,false\n";
        manager
            .import_text("pharmgkb", pharmgkb, None, &ImportOptions::named("pharmgkb"))
            .unwrap();

        let gwas = "rsid,trait,risk_allele,p_value\n\
                    rs3,Height,A,0.000000001\n";
        manager
            .import_text("gwas", gwas, None, &ImportOptions::named("gwas"))
            .unwrap();

        let frequency = "rsid,allele,frequency\nrs1,A,0.01\n";
        manager
            .import_text(
                "frequency",
                frequency,
                None,
                &ImportOptions::named("frequency"),
            )
            .unwrap();

        manager
    }

    #[tokio::test]
    async fn test_discovery_and_clinical_mapping() {
        let manager = seeded_manager();
        let source = DbAnnotationSource::discover(manager);

        let rsids = vec!["rs1".to_string(), "rs2".to_string(), "rs3".to_string()];
        let clinical = source.clinical_by_ids(&rsids).await.unwrap();
        assert_eq!(clinical.len(), 1);
        let record = &clinical["rs1"];
        assert_eq!(record.gene.as_deref(), Some("CFTR"));
        assert_eq!(record.significance, ClinicalSignificance::Pathogenic);
        assert_eq!(record.review_stars, 4);
    }

    #[tokio::test]
    async fn test_drug_rows_group_into_interactions() {
        let manager = seeded_manager();
        let source = DbAnnotationSource::discover(manager);

        let drugs = source.drugs_by_ids(&["rs2".to_string()]).await.unwrap();
        let record = &drugs["rs2"];
        assert_eq!(record.gene, "CYP2C19");
        assert_eq!(record.interactions.len(), 2);
        assert!(record
            .interactions
            .iter()
            .any(|i| i.evidence_level == EvidenceLevel::OneA && i.has_regulatory_label));
    }

    #[tokio::test]
    async fn test_traits_and_frequencies() {
        let manager = seeded_manager();
        let source = DbAnnotationSource::discover(manager);

        let traits = source.traits_by_ids(&["rs3".to_string()]).await.unwrap();
        assert_eq!(traits["rs3"].len(), 1);
        assert_eq!(traits["rs3"][0].trait_name, "Height");
        assert_eq!(traits["rs3"][0].risk_allele, 'A');

        let frequencies = source
            .frequencies_by_ids(&["rs1".to_string()])
            .await
            .unwrap();
        assert!((frequencies["rs1"].frequency - 0.01).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_missing_databases_return_empty() {
        let manager = Arc::new(DatabaseManager::in_memory());
        let source = DbAnnotationSource::discover(manager);

        let clinical = source
            .clinical_by_ids(&["rs1".to_string()])
            .await
            .unwrap();
        assert!(clinical.is_empty());
    }
}
