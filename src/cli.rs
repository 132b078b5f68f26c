//! Argument helpers shared by the `genotrait-*` tools.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::{self, GenotraitSettings};
use crate::logging;
use crate::ml::metrics::Scoring;
use crate::trex::ClassifierKind;

/// Value following the flag at `args[*idx]`; advances `idx`.
pub fn next_value<'a>(args: &'a [String], idx: &mut usize, flag: &str) -> Result<&'a str, String> {
    *idx += 1;
    args.get(*idx)
        .map(String::as_str)
        .ok_or_else(|| format!("{flag} requires a value"))
}

/// Parsed value following the flag at `args[*idx]`; advances `idx`.
pub fn parse_value<T: FromStr>(args: &[String], idx: &mut usize, flag: &str) -> Result<T, String> {
    let value = next_value(args, idx, flag)?;
    value
        .parse::<T>()
        .map_err(|_| format!("Invalid {flag} value: {value}"))
}

pub fn parse_path(args: &[String], idx: &mut usize, flag: &str) -> Result<PathBuf, String> {
    next_value(args, idx, flag).map(PathBuf::from)
}

pub fn parse_classifier(args: &[String], idx: &mut usize) -> Result<ClassifierKind, String> {
    let value = next_value(args, idx, "--classifier")?;
    ClassifierKind::parse(value).ok_or_else(|| format!("Invalid --classifier value: {value}"))
}

pub fn parse_scoring(args: &[String], idx: &mut usize) -> Result<Scoring, String> {
    let value = next_value(args, idx, "--scoring")?;
    Scoring::parse(value).ok_or_else(|| format!("Invalid --scoring value: {value}"))
}

/// Settings from `--config`, or from the app config file when no path is given.
pub fn load_settings(path: Option<&Path>) -> Result<GenotraitSettings, String> {
    match path {
        Some(path) => config::load_from(path),
        None => config::load_or_default(),
    }
    .map_err(|err| err.to_string())
}

/// Start logging for `tool`; the tool keeps running without a log file on failure.
pub fn init_logging(tool: &str) {
    if let Err(err) = logging::init(tool) {
        eprintln!("Logging disabled: {err}");
    }
}

pub fn required<T>(value: Option<T>, flag: &str) -> Result<T, String> {
    value.ok_or_else(|| format!("{flag} is required"))
}
