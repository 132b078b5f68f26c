//! Binary bag-of-features vectorizer.
//!
//! Maps feature names to matrix columns. A vocabulary may map several feature names to the
//! same column once it has been compressed or reduced by feature selection.

use std::collections::{BTreeMap, BTreeSet};

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VectorizerError {
    #[error("Vocabulary is empty")]
    EmptyVocabulary,
    #[error("Vocabulary columns must cover 0..{n_columns} without gaps (column {missing} unused)")]
    ColumnGap { n_columns: usize, missing: usize },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BinaryVectorizer {
    vocabulary: BTreeMap<String, usize>,
    n_columns: usize,
    /// A fixed vocabulary survives calls to [`BinaryVectorizer::fit`].
    fixed: bool,
}

impl BinaryVectorizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a vectorizer with a fixed feature → column mapping.
    pub fn with_vocabulary(vocabulary: BTreeMap<String, usize>) -> Result<Self, VectorizerError> {
        if vocabulary.is_empty() {
            return Err(VectorizerError::EmptyVocabulary);
        }
        let columns: BTreeSet<usize> = vocabulary.values().copied().collect();
        let n_columns = columns.iter().next_back().map_or(0, |max| max + 1);
        if let Some(missing) = (0..n_columns).find(|col| !columns.contains(col)) {
            return Err(VectorizerError::ColumnGap { n_columns, missing });
        }
        Ok(Self {
            vocabulary,
            n_columns,
            fixed: true,
        })
    }

    pub fn is_fitted(&self) -> bool {
        self.n_columns > 0
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    pub fn n_columns(&self) -> usize {
        self.n_columns
    }

    /// Learn a one-feature-per-column vocabulary. No-op for fixed vocabularies.
    pub fn fit<'a, I>(&mut self, feature_sets: I)
    where
        I: IntoIterator<Item = &'a BTreeSet<String>>,
    {
        if self.fixed {
            return;
        }
        let mut names = BTreeSet::new();
        for set in feature_sets {
            names.extend(set.iter().cloned());
        }
        self.vocabulary = names
            .into_iter()
            .enumerate()
            .map(|(col, name)| (name, col))
            .collect();
        self.n_columns = self.vocabulary.len();
    }

    /// Dense presence matrix (rows follow `feature_sets`). Unknown features are ignored.
    pub fn transform<'a, I>(&self, feature_sets: I) -> Array2<f32>
    where
        I: IntoIterator<Item = &'a BTreeSet<String>>,
    {
        let sets: Vec<&BTreeSet<String>> = feature_sets.into_iter().collect();
        let mut x = Array2::<f32>::zeros((sets.len(), self.n_columns));
        for (row, set) in sets.iter().enumerate() {
            for feature in set.iter() {
                if let Some(&col) = self.vocabulary.get(feature) {
                    x[[row, col]] = 1.0;
                }
            }
        }
        x
    }

    /// `(feature name, column)` pairs in feature-name order.
    pub fn feature_names(&self) -> Vec<(String, usize)> {
        self.vocabulary
            .iter()
            .map(|(name, &col)| (name.clone(), col))
            .collect()
    }

    /// All known feature names, sorted.
    pub fn vocabulary_names(&self) -> Vec<String> {
        self.vocabulary.keys().cloned().collect()
    }

    /// One display name per column; merged columns join their features with `|`.
    pub fn column_names(&self) -> Vec<String> {
        let mut members: Vec<Vec<&str>> = vec![Vec::new(); self.n_columns];
        for (name, &col) in &self.vocabulary {
            members[col].push(name);
        }
        members.into_iter().map(|names| names.join("|")).collect()
    }

    pub fn vocabulary(&self) -> &BTreeMap<String, usize> {
        &self.vocabulary
    }

    /// Fixed vectorizer keeping only `columns`, renumbered in the given order.
    pub fn restrict(&self, columns: &[usize]) -> Result<Self, VectorizerError> {
        let renumber: BTreeMap<usize, usize> = columns
            .iter()
            .enumerate()
            .map(|(new, &old)| (old, new))
            .collect();
        let vocabulary = self
            .vocabulary
            .iter()
            .filter_map(|(name, col)| renumber.get(col).map(|&new| (name.clone(), new)))
            .collect();
        Self::with_vocabulary(vocabulary)
    }
}
