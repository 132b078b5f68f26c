use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use genotrait::records::TrainingRecord;

pub const TRAIT: &str = "Sulfate_reducer";

/// `n` genomes alternating between trait-positive and trait-negative.
///
/// Positives carry the `dsrA`/`dsrB` markers, negatives carry `catalase`; every genome
/// carries a few core genes and a deterministic pseudo-random subset of accessory genes.
pub fn synthetic_records(n: usize) -> Vec<TrainingRecord> {
    (0..n)
        .map(|i| {
            let positive = i % 2 == 0;
            let mut features: BTreeSet<String> =
                ["rpoB", "gyrA", "recA"].iter().map(|s| s.to_string()).collect();
            if positive {
                features.insert("dsrA".to_string());
                features.insert("dsrB".to_string());
            } else {
                features.insert("catalase".to_string());
            }
            for gene in 0..12 {
                if (i * 7 + gene * 13) % 5 < 2 {
                    features.insert(format!("acc{gene:02}"));
                }
            }
            TrainingRecord {
                identifier: format!("GCA_{i:06}"),
                trait_name: TRAIT.to_string(),
                trait_sign: u8::from(positive),
                group_name: format!("clade{}", i % 5),
                group_id: i % 5,
                features,
            }
        })
        .collect()
}

/// Write `.genotype`, `.phenotype` and groups files for `records` into `dir`.
pub fn write_training_files(dir: &Path, records: &[TrainingRecord]) -> (PathBuf, PathBuf, PathBuf) {
    let genotype = dir.join("train.genotype");
    let phenotype = dir.join("train.phenotype");
    let groups = dir.join("train.groups");

    let mut geno = String::from("#version: 1\n");
    let mut pheno = format!("Identifier\t{TRAIT}\n");
    let mut group = String::from("Identifier\tGroup\n");
    for record in records {
        geno.push_str(&record.identifier);
        for feature in &record.features {
            geno.push('\t');
            geno.push_str(feature);
        }
        geno.push('\n');
        pheno.push_str(&format!("{}\t{}\n", record.identifier, record.trait_sign));
        group.push_str(&format!("{}\t{}\n", record.identifier, record.group_name));
    }
    std::fs::write(&genotype, geno).expect("write genotype file");
    std::fs::write(&phenotype, pheno).expect("write phenotype file");
    std::fs::write(&groups, group).expect("write groups file");
    (genotype, phenotype, groups)
}
