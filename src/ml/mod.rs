//! Machine learning building blocks for trait prediction.
//!
//! Genomes become presence matrices through [`vectorizer`]; the classifiers in [`svm`] and
//! [`gbdt`] implement the [`classifier`] traits consumed by cross-validation and the
//! completeness/contamination simulation.

pub mod classifier;
pub mod feature_select;
pub mod gbdt;
pub mod metrics;
pub mod svm;
pub mod vectorizer;
