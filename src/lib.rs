//! Library exports for the genotrait tools, benchmarks and tests.
/// Application directory helpers.
pub mod app_dirs;
/// Completeness/contamination cross-validation.
pub mod cccv;
/// Argument helpers for the command-line tools.
pub mod cli;
/// TOML-backed tool defaults.
pub mod config;
/// Fold splitting and replicated cross-validation.
pub mod cv;
/// Tracing setup.
pub mod logging;
/// Classifiers, metrics and feature handling.
pub mod ml;
/// Genome and phenotype records.
pub mod records;
/// Shapley value aggregation.
pub mod shap;
/// Trait classifiers tying vectorizer and model together.
pub mod trex;
