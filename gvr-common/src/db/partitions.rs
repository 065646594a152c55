//! Persistent store partition catalogue
//!
//! Each partition is an independent SQLite table keyed by session
//! identifier. Partitions are fixed; new ones are only ever added through a
//! schema migration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Named slot in the persistent store, one per dataset kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Partition {
    VariantSummaries,
    PhenotypeSummaries,
    ScreeningSummaries,
    ClinicalProfiles,
    ClinicalInterpretations,
}

impl Partition {
    pub const ALL: [Partition; 5] = [
        Partition::VariantSummaries,
        Partition::PhenotypeSummaries,
        Partition::ScreeningSummaries,
        Partition::ClinicalProfiles,
        Partition::ClinicalInterpretations,
    ];

    /// External partition name
    pub fn name(self) -> &'static str {
        match self {
            Partition::VariantSummaries => "variant-summaries",
            Partition::PhenotypeSummaries => "phenotype-summaries",
            Partition::ScreeningSummaries => "screening-summaries",
            Partition::ClinicalProfiles => "clinical-profiles",
            Partition::ClinicalInterpretations => "clinical-interpretations",
        }
    }

    /// Backing SQLite table
    ///
    /// Always one of a closed set of literals, so it is safe to splice into SQL.
    pub fn table_name(self) -> &'static str {
        match self {
            Partition::VariantSummaries => "cache_variant_summaries",
            Partition::PhenotypeSummaries => "cache_phenotype_summaries",
            Partition::ScreeningSummaries => "cache_screening_summaries",
            Partition::ClinicalProfiles => "cache_clinical_profiles",
            Partition::ClinicalInterpretations => "cache_clinical_interpretations",
        }
    }

    /// Schema version whose migration creates this partition
    pub fn introduced_in(self) -> i32 {
        match self {
            Partition::VariantSummaries | Partition::PhenotypeSummaries => 1,
            Partition::ScreeningSummaries => 2,
            Partition::ClinicalProfiles | Partition::ClinicalInterpretations => 3,
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Partition {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Partition::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| crate::Error::Config(format!("Unknown partition: {}", s)))
    }
}
