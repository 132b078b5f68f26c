//! Replicated cross-validation of a trait classifier.

use std::path::PathBuf;

use genotrait::cli::{self, parse_path, parse_value};
use genotrait::records::load_training_files;
use genotrait::trex::ClassifierKind;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

#[derive(Debug, Clone, Default)]
struct CliOptions {
    genotype: PathBuf,
    phenotype: PathBuf,
    groups: Option<PathBuf>,
    config: Option<PathBuf>,
    classifier: ClassifierKind,
    use_groups: bool,
    feature_selection: bool,
    splits: Option<usize>,
    replicates: Option<usize>,
    jobs: Option<i32>,
    scoring: Option<genotrait::ml::metrics::Scoring>,
    random_state: Option<u64>,
    top_misclassified: usize,
}

fn run() -> Result<(), String> {
    let options = parse_args(std::env::args().skip(1).collect())?;
    cli::init_logging("genotrait-cv");
    let mut settings = cli::load_settings(options.config.as_deref())?;
    if let Some(seed) = options.random_state {
        settings.set_random_state(seed);
    }
    let mut cv = settings.cv.clone();
    if let Some(splits) = options.splits {
        cv.n_splits = splits;
    }
    if let Some(replicates) = options.replicates {
        cv.n_replicates = replicates;
    }
    if let Some(jobs) = options.jobs {
        cv.n_jobs = jobs;
    }
    if let Some(scoring) = options.scoring {
        cv.scoring = scoring;
    }

    let training = load_training_files(
        &options.genotype,
        &options.phenotype,
        options.groups.as_deref(),
    )
    .map_err(|err| err.to_string())?;
    let classifier = options.classifier.build(&settings);
    let rfe = options.feature_selection.then_some(&settings.rfe);
    let report = classifier
        .crossvalidate(&training, &cv, options.use_groups, rfe)
        .map_err(|err| err.to_string())?;

    println!(
        "{} {}: {:.4} +/- {:.4} over {} folds",
        classifier.identifier(),
        cv.scoring.name(),
        report.score_mean,
        report.score_sd,
        report.fold_scores.len()
    );
    if options.top_misclassified > 0 {
        let mut ranked: Vec<(&str, f64)> = training
            .iter()
            .map(|record| record.identifier.as_str())
            .zip(report.misclassifications.iter().copied())
            .filter(|(_, rate)| *rate > 0.0)
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        if !ranked.is_empty() {
            println!("Most often misclassified:");
        }
        for (identifier, rate) in ranked.into_iter().take(options.top_misclassified) {
            println!("  {rate:.2}  {identifier}");
        }
    }
    Ok(())
}

fn parse_args(args: Vec<String>) -> Result<CliOptions, String> {
    let mut options = CliOptions {
        top_misclassified: 10,
        ..CliOptions::default()
    };
    let mut genotype = None;
    let mut phenotype = None;

    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => return Err(help_text()),
            "--genotype" => genotype = Some(parse_path(&args, &mut idx, "--genotype")?),
            "--phenotype" => phenotype = Some(parse_path(&args, &mut idx, "--phenotype")?),
            "--groups" => options.groups = Some(parse_path(&args, &mut idx, "--groups")?),
            "--config" => options.config = Some(parse_path(&args, &mut idx, "--config")?),
            "--classifier" => options.classifier = cli::parse_classifier(&args, &mut idx)?,
            "--leave-one-group-out" => options.use_groups = true,
            "--feature-selection" => options.feature_selection = true,
            "--splits" => options.splits = Some(parse_value(&args, &mut idx, "--splits")?),
            "--replicates" => {
                options.replicates = Some(parse_value(&args, &mut idx, "--replicates")?)
            }
            "--jobs" => options.jobs = Some(parse_value(&args, &mut idx, "--jobs")?),
            "--scoring" => options.scoring = Some(cli::parse_scoring(&args, &mut idx)?),
            "--random-state" => {
                options.random_state = Some(parse_value(&args, &mut idx, "--random-state")?)
            }
            "--top" => options.top_misclassified = parse_value(&args, &mut idx, "--top")?,
            unknown => return Err(format!("Unknown argument: {unknown}\n\n{}", help_text())),
        }
        idx += 1;
    }

    options.genotype = cli::required(genotype, "--genotype")?;
    options.phenotype = cli::required(phenotype, "--phenotype")?;
    if options.use_groups && options.groups.is_none() {
        return Err("--leave-one-group-out requires --groups".to_string());
    }
    Ok(options)
}

fn help_text() -> String {
    [
        "genotrait-cv",
        "",
        "Usage:",
        "  genotrait-cv --genotype <file> --phenotype <file> [options]",
        "",
        "Options:",
        "  --groups <file>           Taxonomic groups (identifier, group name).",
        "  --leave-one-group-out     Hold out one group per fold instead of k-fold.",
        "  --classifier <svm|xgb>    Classifier family (default: svm).",
        "  --config <config.toml>    Settings file (default: app config).",
        "  --feature-selection       Run recursive elimination inside every fold.",
        "  --splits <k>              Folds per replicate.",
        "  --replicates <n>          Number of replicates.",
        "  --jobs <n>                Worker threads (0 = all cores).",
        "  --scoring <balanced_accuracy|f1>",
        "  --random-state <seed>     Seed for fold assignment and training.",
        "  --top <n>                 Most often misclassified genomes to list (default: 10).",
    ]
    .join("\n")
}
