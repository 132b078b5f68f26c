//! Loaders for `.genotype`, `.phenotype` and groups files.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use super::{GenotypeRecord, GroupRecord, PhenotypeRecord, TrainingRecord};

#[derive(Debug, Error)]
pub enum RecordLoadError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path}:{line}: {message}")]
    Malformed {
        path: PathBuf,
        line: usize,
        message: String,
    },
    #[error("{path}: duplicate identifier {identifier}")]
    DuplicateIdentifier { path: PathBuf, identifier: String },
    #[error("{path}: no records found")]
    Empty { path: PathBuf },
    #[error("No identifiers shared between genotype and phenotype files")]
    NoOverlap,
}

/// Load a `.genotype` file: `identifier<TAB>feature<TAB>feature...` per line.
///
/// Blank lines and `#` comments are skipped; a `#version:` line is logged.
pub fn load_genotype_file(path: &Path) -> Result<Vec<GenotypeRecord>, RecordLoadError> {
    let mut seen = BTreeSet::new();
    let mut records = Vec::new();
    for (line_no, line) in read_lines(path)? {
        if let Some(meta) = line.strip_prefix('#') {
            if let Some(version) = meta.trim().strip_prefix("version:") {
                debug!("{}: genotype format version {}", path.display(), version.trim());
            }
            continue;
        }
        let mut fields = line.split('\t');
        let identifier = fields.next().unwrap_or_default().trim();
        if identifier.is_empty() {
            return Err(malformed(path, line_no, "missing identifier"));
        }
        if !seen.insert(identifier.to_string()) {
            return Err(RecordLoadError::DuplicateIdentifier {
                path: path.to_path_buf(),
                identifier: identifier.to_string(),
            });
        }
        let features = fields
            .map(str::trim)
            .filter(|feature| !feature.is_empty())
            .map(str::to_string)
            .collect();
        records.push(GenotypeRecord {
            identifier: identifier.to_string(),
            features,
        });
    }
    if records.is_empty() {
        return Err(RecordLoadError::Empty {
            path: path.to_path_buf(),
        });
    }
    Ok(records)
}

/// Load a `.phenotype` file: header `Identifier<TAB><trait>`, then `identifier<TAB>0|1`.
pub fn load_phenotype_file(path: &Path) -> Result<Vec<PhenotypeRecord>, RecordLoadError> {
    let mut lines = read_lines(path)?.into_iter();
    let (header_no, header) = lines.next().ok_or_else(|| RecordLoadError::Empty {
        path: path.to_path_buf(),
    })?;
    let trait_name = header
        .split('\t')
        .nth(1)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| malformed(path, header_no, "header must name the trait in column 2"))?
        .to_string();

    let mut seen = BTreeSet::new();
    let mut records = Vec::new();
    for (line_no, line) in lines {
        let mut fields = line.split('\t').map(str::trim);
        let identifier = fields.next().unwrap_or_default();
        if identifier.is_empty() {
            return Err(malformed(path, line_no, "missing identifier"));
        }
        let sign = fields
            .next()
            .ok_or_else(|| malformed(path, line_no, "missing trait sign"))?;
        let trait_sign = match sign {
            "0" => 0,
            "1" => 1,
            other => {
                return Err(malformed(
                    path,
                    line_no,
                    &format!("trait sign must be 0 or 1, got {other:?}"),
                ));
            }
        };
        if !seen.insert(identifier.to_string()) {
            return Err(RecordLoadError::DuplicateIdentifier {
                path: path.to_path_buf(),
                identifier: identifier.to_string(),
            });
        }
        records.push(PhenotypeRecord {
            identifier: identifier.to_string(),
            trait_name: trait_name.clone(),
            trait_sign,
        });
    }
    if records.is_empty() {
        return Err(RecordLoadError::Empty {
            path: path.to_path_buf(),
        });
    }
    Ok(records)
}

/// Load a groups file: `identifier<TAB>group name` per line, optional `Identifier` header.
///
/// Group ids are assigned in order of first appearance.
pub fn load_groups_file(path: &Path) -> Result<Vec<GroupRecord>, RecordLoadError> {
    let mut group_ids: HashMap<String, usize> = HashMap::new();
    let mut records = Vec::new();
    for (idx, (line_no, line)) in read_lines(path)?.into_iter().enumerate() {
        if idx == 0 && line.to_ascii_lowercase().starts_with("identifier") {
            continue;
        }
        let mut fields = line.split('\t').map(str::trim);
        let identifier = fields.next().unwrap_or_default();
        let group_name = fields
            .next()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| malformed(path, line_no, "missing group name"))?;
        let next_id = group_ids.len();
        let group_id = *group_ids.entry(group_name.to_string()).or_insert(next_id);
        records.push(GroupRecord {
            identifier: identifier.to_string(),
            group_name: group_name.to_string(),
            group_id,
        });
    }
    Ok(records)
}

/// Join genotype, phenotype and optional groups files into training records.
///
/// Records are sorted by identifier. Identifiers present in only one of the genotype and
/// phenotype files are dropped with a warning. Without a groups file each record forms
/// its own group.
pub fn load_training_files(
    genotype_file: &Path,
    phenotype_file: &Path,
    groups_file: Option<&Path>,
) -> Result<Vec<TrainingRecord>, RecordLoadError> {
    let genotypes = load_genotype_file(genotype_file)?;
    let phenotypes = load_phenotype_file(phenotype_file)?;
    let groups: BTreeMap<String, GroupRecord> = match groups_file {
        Some(path) => load_groups_file(path)?
            .into_iter()
            .map(|group| (group.identifier.clone(), group))
            .collect(),
        None => BTreeMap::new(),
    };

    let mut genotype_by_id: BTreeMap<String, GenotypeRecord> = genotypes
        .into_iter()
        .map(|record| (record.identifier.clone(), record))
        .collect();

    let mut records = Vec::with_capacity(phenotypes.len());
    let mut missing_genotype = 0usize;
    for phenotype in phenotypes {
        let Some(genotype) = genotype_by_id.remove(&phenotype.identifier) else {
            missing_genotype += 1;
            continue;
        };
        records.push((phenotype, genotype));
    }
    if missing_genotype > 0 {
        warn!("{missing_genotype} phenotype identifiers have no genotype and were dropped");
    }
    if !genotype_by_id.is_empty() {
        warn!(
            "{} genotype identifiers have no phenotype and were dropped",
            genotype_by_id.len()
        );
    }
    if records.is_empty() {
        return Err(RecordLoadError::NoOverlap);
    }

    records.sort_by(|a, b| a.0.identifier.cmp(&b.0.identifier));
    let mut next_group = groups
        .values()
        .map(|group| group.group_id + 1)
        .max()
        .unwrap_or(0);
    let training = records
        .into_iter()
        .map(|(phenotype, genotype)| {
            let (group_name, group_id) = match groups.get(&phenotype.identifier) {
                Some(group) => (group.group_name.clone(), group.group_id),
                None => {
                    let id = next_group;
                    next_group += 1;
                    (phenotype.identifier.clone(), id)
                }
            };
            TrainingRecord {
                identifier: phenotype.identifier,
                trait_name: phenotype.trait_name,
                trait_sign: phenotype.trait_sign,
                group_name,
                group_id,
                features: genotype.features,
            }
        })
        .collect::<Vec<_>>();
    debug!(
        "Loaded {} training records for trait {}",
        training.len(),
        training[0].trait_name
    );
    Ok(training)
}

fn read_lines(path: &Path) -> Result<Vec<(usize, String)>, RecordLoadError> {
    let read_err = |source| RecordLoadError::Read {
        path: path.to_path_buf(),
        source,
    };
    let reader = BufReader::new(File::open(path).map_err(read_err)?);
    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(read_err)?;
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.trim().is_empty() {
            continue;
        }
        out.push((idx + 1, trimmed.to_string()));
    }
    Ok(out)
}

fn malformed(path: &Path, line: usize, message: &str) -> RecordLoadError {
    RecordLoadError::Malformed {
        path: path.to_path_buf(),
        line,
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn joins_genotype_and_phenotype_by_identifier() {
        let dir = tempdir().unwrap();
        let genotype = write(
            dir.path(),
            "t.genotype",
            "#version:1.0\nGCA_2\tPF1\tPF2\nGCA_1\tPF2\nGCA_9\tPF3\n",
        );
        let phenotype = write(
            dir.path(),
            "t.phenotype",
            "Identifier\tAerobe\nGCA_1\t1\nGCA_2\t0\nGCA_3\t1\n",
        );

        let records = load_training_files(&genotype, &phenotype, None).unwrap();
        let ids: Vec<_> = records.iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(ids, vec!["GCA_1", "GCA_2"]);
        assert_eq!(records[0].trait_name, "Aerobe");
        assert_eq!(records[0].trait_sign, 1);
        assert_eq!(records[1].features.len(), 2);
        assert_ne!(records[0].group_id, records[1].group_id);
    }

    #[test]
    fn groups_file_assigns_shared_ids() {
        let dir = tempdir().unwrap();
        let genotype = write(dir.path(), "g", "a\tX\nb\tY\nc\tZ\n");
        let phenotype = write(dir.path(), "p", "Identifier\tT\na\t1\nb\t0\nc\t0\n");
        let groups = write(
            dir.path(),
            "groups",
            "Identifier\tGroup\na\tBacillota\nb\tPseudomonadota\nc\tBacillota\n",
        );
        let records = load_training_files(&genotype, &phenotype, Some(&groups)).unwrap();
        assert_eq!(records[0].group_id, records[2].group_id);
        assert_eq!(records[0].group_name, "Bacillota");
        assert_ne!(records[0].group_id, records[1].group_id);
    }

    #[test]
    fn rejects_invalid_sign() {
        let dir = tempdir().unwrap();
        let phenotype = write(dir.path(), "p", "Identifier\tT\na\tyes\n");
        let err = load_phenotype_file(&phenotype).unwrap_err();
        assert!(matches!(err, RecordLoadError::Malformed { line: 2, .. }));
    }

    #[test]
    fn rejects_phenotype_line_without_identifier() {
        let dir = tempdir().unwrap();
        let phenotype = write(dir.path(), "p", "Identifier\tT\na\t0\n\t1\n");
        let err = load_phenotype_file(&phenotype).unwrap_err();
        assert!(matches!(
            err,
            RecordLoadError::Malformed { line: 3, ref message, .. } if message == "missing identifier"
        ));
    }

    #[test]
    fn rejects_duplicate_genotype_identifier() {
        let dir = tempdir().unwrap();
        let genotype = write(dir.path(), "g", "a\tX\na\tY\n");
        let err = load_genotype_file(&genotype).unwrap_err();
        assert!(matches!(err, RecordLoadError::DuplicateIdentifier { .. }));
    }

    #[test]
    fn disjoint_files_fail() {
        let dir = tempdir().unwrap();
        let genotype = write(dir.path(), "g", "a\tX\n");
        let phenotype = write(dir.path(), "p", "Identifier\tT\nb\t1\n");
        let err = load_training_files(&genotype, &phenotype, None).unwrap_err();
        assert!(matches!(err, RecordLoadError::NoOverlap));
    }
}
