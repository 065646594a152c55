//! Session dataset model
//!
//! A [`SessionDataset`] is the unit stored in both cache tiers: the ordered
//! gene summaries of one case plus the rollups announced by the upstream
//! metadata record.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque identifier of one analysis case
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Variant counts per ACMG classification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcmgCounts {
    pub pathogenic: u32,
    pub likely_pathogenic: u32,
    #[serde(alias = "vus")]
    pub uncertain_significance: u32,
    pub likely_benign: u32,
    pub benign: u32,
}

impl AcmgCounts {
    pub fn total(&self) -> u64 {
        [
            self.pathogenic,
            self.likely_pathogenic,
            self.uncertain_significance,
            self.likely_benign,
            self.benign,
        ]
        .iter()
        .map(|&n| u64::from(n))
        .sum()
    }
}

/// One variant of a gene, as returned by the gene-detail endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    #[serde(alias = "variant_id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chrom: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_allele: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_allele: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hgvs_c: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hgvs_p: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acmg_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consequence: Option<String>,
}

/// Per-gene rollup
///
/// `variants` is either empty (detail not loaded) or the complete list for
/// the gene. It is only ever replaced wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneSummaryRecord {
    #[serde(alias = "symbol")]
    pub gene: String,
    #[serde(default)]
    pub counts: AcmgCounts,
    #[serde(default)]
    pub variants: Vec<Variant>,
}

impl GeneSummaryRecord {
    pub fn new(gene: impl Into<String>, counts: AcmgCounts) -> Self {
        Self {
            gene: gene.into(),
            counts,
            variants: Vec::new(),
        }
    }

    pub fn detail_loaded(&self) -> bool {
        !self.variants.is_empty()
    }

    pub fn set_variants(&mut self, variants: Vec<Variant>) {
        self.variants = variants;
    }
}

/// ACMG classification -> impact -> variant count
pub type ImpactMatrix = BTreeMap<String, BTreeMap<String, u64>>;

/// Leading record of a summary stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamMetadata {
    #[serde(alias = "total")]
    pub total_genes: u64,
    #[serde(default)]
    pub total_variants: u64,
    #[serde(default)]
    pub impact_matrix: ImpactMatrix,
}

/// All summary data of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDataset {
    pub session_id: SessionId,
    /// Insertion order as produced by the upstream stream
    pub genes: Vec<GeneSummaryRecord>,
    pub total_genes: u64,
    pub total_variants: u64,
    #[serde(default)]
    pub impact_matrix: ImpactMatrix,
}

impl SessionDataset {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            genes: Vec::new(),
            total_genes: 0,
            total_variants: 0,
            impact_matrix: ImpactMatrix::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.genes.is_empty()
    }

    pub fn apply_metadata(&mut self, metadata: &StreamMetadata) {
        self.total_genes = metadata.total_genes;
        self.total_variants = metadata.total_variants;
        self.impact_matrix = metadata.impact_matrix.clone();
    }

    pub fn gene(&self, symbol: &str) -> Option<&GeneSummaryRecord> {
        self.genes.iter().find(|g| g.gene == symbol)
    }

    pub fn gene_mut(&mut self, symbol: &str) -> Option<&mut GeneSummaryRecord> {
        self.genes.iter_mut().find(|g| g.gene == symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gene_record_accepts_vus_alias_and_missing_fields() {
        let gene: GeneSummaryRecord = serde_json::from_str(
            r#"{"gene":"TP53","counts":{"pathogenic":2,"vus":5}}"#,
        )
        .unwrap();

        assert_eq!(gene.gene, "TP53");
        assert_eq!(gene.counts.pathogenic, 2);
        assert_eq!(gene.counts.uncertain_significance, 5);
        assert_eq!(gene.counts.total(), 7);
        assert!(!gene.detail_loaded());
    }

    #[test]
    fn test_dataset_gene_lookup_by_symbol() {
        let mut dataset = SessionDataset::new(SessionId::new("abc123"));
        dataset.genes.push(GeneSummaryRecord::new("BRCA1", AcmgCounts::default()));
        dataset.genes.push(GeneSummaryRecord::new("BRCA2", AcmgCounts::default()));

        assert!(dataset.gene("BRCA2").is_some());
        assert!(dataset.gene("ATM").is_none());

        dataset.gene_mut("BRCA1").unwrap().set_variants(vec![Variant {
            id: "v1".to_string(),
            chrom: Some("17".to_string()),
            pos: Some(43_044_295),
            ref_allele: None,
            alt_allele: None,
            hgvs_c: None,
            hgvs_p: None,
            acmg_class: Some("pathogenic".to_string()),
            impact: Some("HIGH".to_string()),
            consequence: None,
        }]);
        assert!(dataset.gene("BRCA1").unwrap().detail_loaded());
        assert!(!dataset.gene("BRCA2").unwrap().detail_loaded());
    }

    #[test]
    fn test_apply_metadata_copies_rollups() {
        let metadata: StreamMetadata = serde_json::from_str(
            r#"{"total_genes":3,"total_variants":12,"impact_matrix":{"pathogenic":{"HIGH":4}}}"#,
        )
        .unwrap();
        let mut dataset = SessionDataset::new(SessionId::new("abc123"));
        dataset.apply_metadata(&metadata);

        assert_eq!(dataset.total_genes, 3);
        assert_eq!(dataset.total_variants, 12);
        assert_eq!(dataset.impact_matrix["pathogenic"]["HIGH"], 4);
    }
}
