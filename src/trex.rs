//! Trait classifier: vectorizer, estimator and fitted model bundled together.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use ndarray::{Array2, Axis};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::cccv::{CccvError, CccvGrid, CccvOptions, CompleContaCv};
use crate::config::GenotraitSettings;
use crate::cv::{self, CvError, CvOptions, CvReport};
use crate::ml::classifier::{ClassifierError, Estimator, TraitModel, check_columns};
use crate::ml::feature_select::{
    RfeOptions, compress_vocabulary as compress_columns, recursive_feature_elimination,
};
use crate::ml::gbdt::GradientBoosting;
use crate::ml::svm::LinearSvm;
use crate::ml::vectorizer::{BinaryVectorizer, VectorizerError};
use crate::records::{self, GenotypeRecord, TrainingRecord};
use crate::shap::{ShapError, ShapHandler, ShapValues};

/// Saved model format version.
const MODEL_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum TrexError {
    #[error("Classifier failed: {0}")]
    Classifier(#[from] ClassifierError),
    #[error(transparent)]
    Cv(#[from] CvError),
    #[error(transparent)]
    Cccv(#[from] CccvError),
    #[error(transparent)]
    Shap(#[from] ShapError),
    #[error("Vectorizer error: {0}")]
    Vectorizer(#[from] VectorizerError),
    #[error("Classifier is not fitted")]
    NotFitted,
    #[error("Classifier is already fitted")]
    AlreadyFitted,
    #[error("No records given")]
    EmptyRecords,
    #[error("Failed to access model file {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("Invalid model JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Model file holds a {found:?} classifier, expected {expected:?}")]
    IdentifierMismatch { expected: String, found: String },
    #[error("Unsupported model version {0}")]
    UnsupportedVersion(u32),
}

/// Prediction for one genome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub identifier: String,
    pub trait_name: String,
    /// `1` when the trait is predicted present.
    pub sign: u8,
    /// Probability of the trait being present.
    pub probability: f64,
}

impl Prediction {
    /// Probability of the predicted sign.
    pub fn confidence(&self) -> f64 {
        if self.sign == 1 {
            self.probability
        } else {
            1.0 - self.probability
        }
    }
}

/// Shapley values of a batch of genomes, aligned with the vectorizer columns.
#[derive(Debug, Clone)]
pub struct ShapBatch {
    pub sample_names: Vec<String>,
    pub features: Array2<f64>,
    pub shap_values: Array2<f64>,
    pub base_value: f64,
}

/// A binary trait classifier over genome feature sets.
#[derive(Debug, Clone)]
pub struct TrexClassifier<E: Estimator> {
    estimator: E,
    vectorizer: BinaryVectorizer,
    model: Option<E::Model>,
    trait_name: Option<String>,
    cccv_result: Option<CccvGrid>,
    random_state: u64,
}

#[derive(Serialize, Deserialize)]
#[serde(bound(serialize = "E: Serialize, M: Serialize"))]
#[serde(bound(deserialize = "E: DeserializeOwned, M: DeserializeOwned"))]
struct SavedClassifier<E, M> {
    identifier: String,
    model_version: u32,
    trait_name: Option<String>,
    random_state: u64,
    estimator: E,
    vectorizer: BinaryVectorizer,
    model: M,
    #[serde(default)]
    cccv_result: Option<CccvGrid>,
}

#[derive(Deserialize)]
struct SavedHeader {
    identifier: String,
}

impl<E: Estimator> TrexClassifier<E> {
    pub fn new(estimator: E, random_state: u64) -> Self {
        Self {
            estimator,
            vectorizer: BinaryVectorizer::new(),
            model: None,
            trait_name: None,
            cccv_result: None,
            random_state,
        }
    }

    pub fn identifier(&self) -> &'static str {
        E::IDENTIFIER
    }

    pub fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    pub fn trait_name(&self) -> Option<&str> {
        self.trait_name.as_deref()
    }

    pub fn vectorizer(&self) -> &BinaryVectorizer {
        &self.vectorizer
    }

    pub fn model(&self) -> Option<&E::Model> {
        self.model.as_ref()
    }

    pub fn cccv_result(&self) -> Option<&CccvGrid> {
        self.cccv_result.as_ref()
    }

    /// Fit vectorizer and model on `records`.
    ///
    /// Returns `false` without touching the classifier if it is already fitted. With
    /// `feature_selection` the vocabulary is reduced by recursive feature elimination first
    /// and the surviving columns with identical presence patterns are merged.
    pub fn train(
        &mut self,
        records: &[TrainingRecord],
        feature_selection: Option<&RfeOptions>,
    ) -> Result<bool, TrexError> {
        if self.is_fitted() {
            warn!("Classifier is already fitted; refusing to train again");
            return Ok(false);
        }
        if records.is_empty() {
            return Err(TrexError::EmptyRecords);
        }
        let y = records::labels(records);
        let mut vectorizer = self.vectorizer.clone();
        vectorizer.fit(records::feature_sets(records));
        let mut x = vectorizer.transform(records::feature_sets(records));

        if let Some(options) = feature_selection {
            let options = RfeOptions {
                random_state: self.random_state,
                ..options.clone()
            };
            let selection = recursive_feature_elimination(&self.estimator, x.view(), &y, &options)?;
            let reduced = vectorizer.restrict(&selection.columns)?;
            let x_reduced = x.select(Axis(1), &selection.columns);
            vectorizer = compress_columns(&reduced, x_reduced.view())?;
            x = vectorizer.transform(records::feature_sets(records));
            info!(
                "Feature selection kept {} columns, {} after compression",
                reduced.n_columns(),
                vectorizer.n_columns()
            );
        }

        info!(
            "Training {} classifier on {} records with {} feature columns",
            E::IDENTIFIER,
            records.len(),
            x.ncols()
        );
        let model = self.estimator.fit(x.view(), &y)?;
        self.vectorizer = vectorizer;
        self.model = Some(model);
        self.trait_name = records::trait_name(records).map(str::to_string);
        Ok(true)
    }

    /// Fix the vocabulary so features with identical presence patterns share a column.
    pub fn compress_vocabulary(&mut self, records: &[TrainingRecord]) -> Result<(), TrexError> {
        if self.is_fitted() {
            return Err(TrexError::AlreadyFitted);
        }
        let mut vectorizer = BinaryVectorizer::new();
        vectorizer.fit(records::feature_sets(records));
        let x = vectorizer.transform(records::feature_sets(records));
        self.vectorizer = compress_columns(&vectorizer, x.view())?;
        info!(
            "Compressed {} features into {} columns",
            vectorizer.n_columns(),
            self.vectorizer.n_columns()
        );
        Ok(())
    }

    fn fitted_vectorizer_for(&self, records: &[TrainingRecord]) -> BinaryVectorizer {
        let mut vectorizer = self.vectorizer.clone();
        vectorizer.fit(records::feature_sets(records));
        vectorizer
    }

    /// Replicated cross-validation; with `use_groups` leave-one-group-out over record groups.
    pub fn crossvalidate(
        &self,
        records: &[TrainingRecord],
        options: &CvOptions,
        use_groups: bool,
        feature_selection: Option<&RfeOptions>,
    ) -> Result<CvReport, TrexError> {
        if records.is_empty() {
            return Err(TrexError::EmptyRecords);
        }
        let vectorizer = self.fitted_vectorizer_for(records);
        let x = vectorizer.transform(records::feature_sets(records));
        let y = records::labels(records);
        let groups = use_groups.then(|| records::group_ids(records));
        let report = cv::crossvalidate(
            &self.estimator,
            x.view(),
            &y,
            groups.as_deref(),
            options,
            feature_selection,
        )?;
        info!(
            "Cross-validation {}: {:.4} +/- {:.4}",
            options.scoring.name(),
            report.score_mean,
            report.score_sd
        );
        Ok(report)
    }

    /// Completeness/contamination cross-validation; the grid is also kept on the classifier.
    ///
    /// With `feature_selection` every training fold is reduced by recursive feature
    /// elimination before fitting, and the degraded test genomes use the same columns.
    pub fn crossvalidate_cc(
        &mut self,
        records: &[TrainingRecord],
        options: &CccvOptions,
        feature_selection: Option<&RfeOptions>,
    ) -> Result<CccvGrid, TrexError> {
        let vectorizer = self.fitted_vectorizer_for(records);
        let grid = CompleContaCv::new(&self.estimator, &vectorizer, options.clone())
            .with_feature_selection(feature_selection)
            .run(records)?;
        self.cccv_result = Some(grid.clone());
        Ok(grid)
    }

    fn fitted(&self) -> Result<&E::Model, TrexError> {
        self.model.as_ref().ok_or(TrexError::NotFitted)
    }

    fn transform_genotypes(&self, genotypes: &[GenotypeRecord]) -> Result<Array2<f32>, TrexError> {
        let model = self.fitted()?;
        let sets: Vec<&BTreeSet<String>> = genotypes.iter().map(|g| &g.features).collect();
        let x = self.vectorizer.transform(sets);
        check_columns(model.n_columns(), x.view())?;
        Ok(x)
    }

    pub fn predict(&self, genotypes: &[GenotypeRecord]) -> Result<Vec<Prediction>, TrexError> {
        let model = self.fitted()?;
        let x = self.transform_genotypes(genotypes)?;
        let signs = model.predict(x.view());
        let probabilities = model.predict_proba(x.view());
        let trait_name = self.trait_name.clone().unwrap_or_default();
        Ok(genotypes
            .iter()
            .zip(signs)
            .zip(probabilities.iter())
            .map(|((genotype, sign), &probability)| Prediction {
                identifier: genotype.identifier.clone(),
                trait_name: trait_name.clone(),
                sign: u8::from(sign == 1),
                probability,
            })
            .collect())
    }

    /// Column names with their weights, sorted by absolute weight (descending).
    ///
    /// An unfitted classifier logs an error and yields no weights.
    pub fn get_feature_weights(&self) -> Vec<(String, f64)> {
        let Some(model) = &self.model else {
            error!("Weights are only available for fitted classifiers");
            return Vec::new();
        };
        let mut weights: Vec<(String, f64)> = self
            .vectorizer
            .column_names()
            .into_iter()
            .zip(model.feature_weights())
            .collect();
        weights.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
        weights
    }

    /// Feature values, Shapley values and base value for `genotypes`.
    pub fn get_shap(&self, genotypes: &[GenotypeRecord]) -> Result<ShapBatch, TrexError> {
        let model = self.fitted()?;
        let x = self.transform_genotypes(genotypes)?;
        let explanation = model.explain(x.view());
        Ok(ShapBatch {
            sample_names: genotypes.iter().map(|g| g.identifier.clone()).collect(),
            features: x.mapv(f64::from),
            shap_values: explanation.shap_values,
            base_value: explanation.base_value,
        })
    }

    /// Empty handler over the columns this classifier uses.
    pub fn shap_handler(&self) -> Result<ShapHandler, TrexError> {
        let model = self.fitted()?;
        let weights = model.feature_weights().to_vec();
        Ok(ShapHandler::from_weights(
            self.vectorizer.column_names(),
            &weights,
        )?)
    }

    /// Handler filled with the explanations of `genotypes`.
    pub fn explain(&self, genotypes: &[GenotypeRecord]) -> Result<ShapHandler, TrexError> {
        let mut handler = self.shap_handler()?;
        let batch = self.get_shap(genotypes)?;
        handler.add_feature_data(
            &batch.sample_names,
            batch.features.view(),
            ShapValues::Binary(batch.shap_values),
            Some(batch.base_value),
        )?;
        Ok(handler)
    }
}

impl<E> TrexClassifier<E>
where
    E: Estimator + Serialize + DeserializeOwned,
{
    pub fn save_json(&self, path: &Path) -> Result<(), TrexError> {
        let model = self.fitted()?;
        let saved = SavedClassifier {
            identifier: E::IDENTIFIER.to_string(),
            model_version: MODEL_VERSION,
            trait_name: self.trait_name.clone(),
            random_state: self.random_state,
            estimator: &self.estimator,
            vectorizer: self.vectorizer.clone(),
            model,
            cccv_result: self.cccv_result.clone(),
        };
        let json = serde_json::to_vec_pretty(&saved)?;
        std::fs::write(path, json).map_err(|source| TrexError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Saved {} classifier to {}", E::IDENTIFIER, path.display());
        Ok(())
    }

    pub fn load_json(path: &Path) -> Result<Self, TrexError> {
        let bytes = read_model_file(path)?;
        let header: SavedHeader = serde_json::from_slice(&bytes)?;
        if header.identifier != E::IDENTIFIER {
            return Err(TrexError::IdentifierMismatch {
                expected: E::IDENTIFIER.to_string(),
                found: header.identifier,
            });
        }
        let saved: SavedClassifier<E, E::Model> = serde_json::from_slice(&bytes)?;
        if saved.model_version != MODEL_VERSION {
            return Err(TrexError::UnsupportedVersion(saved.model_version));
        }
        Ok(Self {
            estimator: saved.estimator,
            vectorizer: saved.vectorizer,
            model: Some(saved.model),
            trait_name: saved.trait_name,
            cccv_result: saved.cccv_result,
            random_state: saved.random_state,
        })
    }
}

fn read_model_file(path: &Path) -> Result<Vec<u8>, TrexError> {
    std::fs::read(path).map_err(|source| TrexError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Shipped classifier families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClassifierKind {
    #[default]
    Svm,
    Xgb,
}

impl ClassifierKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "svm" => Some(Self::Svm),
            "xgb" => Some(Self::Xgb),
            _ => None,
        }
    }

    /// Unfitted classifier configured from `settings`.
    pub fn build(self, settings: &GenotraitSettings) -> AnyClassifier {
        match self {
            Self::Svm => AnyClassifier::Svm(TrexClassifier::new(
                LinearSvm::new(settings.svm.clone(), settings.random_state),
                settings.random_state,
            )),
            Self::Xgb => AnyClassifier::Xgb(TrexClassifier::new(
                GradientBoosting::new(settings.gbdt.clone()),
                settings.random_state,
            )),
        }
    }
}

/// A classifier of either shipped family, for tools that pick one at runtime.
#[derive(Debug, Clone)]
pub enum AnyClassifier {
    Svm(TrexClassifier<LinearSvm>),
    Xgb(TrexClassifier<GradientBoosting>),
}

macro_rules! dispatch {
    ($self:expr, $clf:ident => $body:expr) => {
        match $self {
            AnyClassifier::Svm($clf) => $body,
            AnyClassifier::Xgb($clf) => $body,
        }
    };
}

impl AnyClassifier {
    /// Load a saved classifier of whichever family the file holds.
    pub fn load_json(path: &Path) -> Result<Self, TrexError> {
        let bytes = read_model_file(path)?;
        let header: SavedHeader = serde_json::from_slice(&bytes)?;
        match header.identifier.as_str() {
            id if id == LinearSvm::IDENTIFIER => Ok(Self::Svm(TrexClassifier::load_json(path)?)),
            id if id == GradientBoosting::IDENTIFIER => {
                Ok(Self::Xgb(TrexClassifier::load_json(path)?))
            }
            _ => Err(TrexError::IdentifierMismatch {
                expected: format!("{} or {}", LinearSvm::IDENTIFIER, GradientBoosting::IDENTIFIER),
                found: header.identifier,
            }),
        }
    }

    pub fn identifier(&self) -> &'static str {
        dispatch!(self, clf => clf.identifier())
    }

    pub fn trait_name(&self) -> Option<&str> {
        dispatch!(self, clf => clf.trait_name())
    }

    pub fn train(
        &mut self,
        records: &[TrainingRecord],
        feature_selection: Option<&RfeOptions>,
    ) -> Result<bool, TrexError> {
        dispatch!(self, clf => clf.train(records, feature_selection))
    }

    pub fn compress_vocabulary(&mut self, records: &[TrainingRecord]) -> Result<(), TrexError> {
        dispatch!(self, clf => clf.compress_vocabulary(records))
    }

    pub fn crossvalidate(
        &self,
        records: &[TrainingRecord],
        options: &CvOptions,
        use_groups: bool,
        feature_selection: Option<&RfeOptions>,
    ) -> Result<CvReport, TrexError> {
        dispatch!(self, clf => clf.crossvalidate(records, options, use_groups, feature_selection))
    }

    pub fn crossvalidate_cc(
        &mut self,
        records: &[TrainingRecord],
        options: &CccvOptions,
        feature_selection: Option<&RfeOptions>,
    ) -> Result<CccvGrid, TrexError> {
        dispatch!(self, clf => clf.crossvalidate_cc(records, options, feature_selection))
    }

    pub fn predict(&self, genotypes: &[GenotypeRecord]) -> Result<Vec<Prediction>, TrexError> {
        dispatch!(self, clf => clf.predict(genotypes))
    }

    pub fn get_feature_weights(&self) -> Vec<(String, f64)> {
        dispatch!(self, clf => clf.get_feature_weights())
    }

    pub fn explain(&self, genotypes: &[GenotypeRecord]) -> Result<ShapHandler, TrexError> {
        dispatch!(self, clf => clf.explain(genotypes))
    }

    pub fn save_json(&self, path: &Path) -> Result<(), TrexError> {
        dispatch!(self, clf => clf.save_json(path))
    }
}
