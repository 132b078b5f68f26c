//! Genome and phenotype records.
//!
//! A genome is a set of binary features (e.g. protein family accessions). Records are
//! immutable once loaded; simulations derive new feature sets instead of mutating them.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

mod loader;
pub use loader::{
    RecordLoadError, load_genotype_file, load_groups_file, load_phenotype_file,
    load_training_files,
};

/// Feature set of a single genome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenotypeRecord {
    pub identifier: String,
    pub features: BTreeSet<String>,
}

/// Trait sign of a single genome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhenotypeRecord {
    pub identifier: String,
    pub trait_name: String,
    /// `0` = trait absent, `1` = trait present.
    pub trait_sign: u8,
}

/// Group (e.g. taxonomic clade) a genome belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub identifier: String,
    pub group_name: String,
    pub group_id: usize,
}

/// Labeled genome used for training and validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingRecord {
    pub identifier: String,
    pub trait_name: String,
    pub trait_sign: u8,
    pub group_name: String,
    pub group_id: usize,
    pub features: BTreeSet<String>,
}

impl TrainingRecord {
    /// Class index of the record (`0` or `1`).
    pub fn label(&self) -> usize {
        usize::from(self.trait_sign)
    }

    /// Borrow the record as a genotype-only view for prediction.
    pub fn to_genotype(&self) -> GenotypeRecord {
        GenotypeRecord {
            identifier: self.identifier.clone(),
            features: self.features.clone(),
        }
    }
}

/// Class labels aligned with `records`.
pub fn labels(records: &[TrainingRecord]) -> Vec<usize> {
    records.iter().map(TrainingRecord::label).collect()
}

/// Group ids aligned with `records`.
pub fn group_ids(records: &[TrainingRecord]) -> Vec<usize> {
    records.iter().map(|record| record.group_id).collect()
}

/// Trait name shared by `records`, if any record is present.
pub fn trait_name(records: &[TrainingRecord]) -> Option<&str> {
    records.first().map(|record| record.trait_name.as_str())
}

/// Borrow the feature sets of `records` in order.
pub fn feature_sets(records: &[TrainingRecord]) -> Vec<&BTreeSet<String>> {
    records.iter().map(|record| &record.features).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, sign: u8, group: usize) -> TrainingRecord {
        TrainingRecord {
            identifier: id.to_string(),
            trait_name: "Sulfate_reducer".to_string(),
            trait_sign: sign,
            group_name: format!("g{group}"),
            group_id: group,
            features: ["PF00001".to_string()].into_iter().collect(),
        }
    }

    #[test]
    fn helpers_follow_record_order() {
        let records = vec![record("a", 1, 0), record("b", 0, 1), record("c", 1, 1)];
        assert_eq!(labels(&records), vec![1, 0, 1]);
        assert_eq!(group_ids(&records), vec![0, 1, 1]);
        assert_eq!(trait_name(&records), Some("Sulfate_reducer"));
        assert_eq!(feature_sets(&records).len(), 3);
        assert_eq!(records[0].to_genotype().identifier, "a");
    }

    #[test]
    fn trait_name_of_empty_slice_is_none() {
        assert_eq!(trait_name(&[]), None);
    }
}
