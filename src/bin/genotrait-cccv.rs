//! Completeness/contamination cross-validation over a grid of simulated genome qualities.

use std::path::PathBuf;

use genotrait::cli::{self, parse_path, parse_value};
use genotrait::records::load_training_files;
use genotrait::trex::ClassifierKind;
use tracing::info;

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
    out: Option<PathBuf>,
    config: Option<PathBuf>,
    classifier: ClassifierKind,
    comple_steps: Option<usize>,
    conta_steps: Option<usize>,
    splits: Option<usize>,
    replicates: Option<usize>,
    jobs: Option<i32>,
    feature_selection: bool,
    n_features: Option<usize>,
    random_state: Option<u64>,
}

fn run() -> Result<(), String> {
    let options = parse_args(std::env::args().skip(1).collect())?;
    cli::init_logging("genotrait-cccv");
    let mut settings = cli::load_settings(options.config.as_deref())?;
    if let Some(seed) = options.random_state {
        settings.set_random_state(seed);
    }
    if let Some(n_features) = options.n_features {
        settings.rfe.n_features = n_features;
    }
    let mut cccv = settings.cccv.clone();
    if let Some(steps) = options.comple_steps {
        cccv.comple_steps = steps;
    }
    if let Some(steps) = options.conta_steps {
        cccv.conta_steps = steps;
    }
    if let Some(splits) = options.splits {
        cccv.n_splits = splits;
    }
    if let Some(replicates) = options.replicates {
        cccv.n_replicates = replicates;
    }
    if let Some(jobs) = options.jobs {
        cccv.n_jobs = jobs;
    }

    let training = load_training_files(&options.genotype, &options.phenotype, None)
        .map_err(|err| err.to_string())?;
    let mut classifier = options.classifier.build(&settings);
    let rfe = options.feature_selection.then_some(&settings.rfe);
    let grid = classifier
        .crossvalidate_cc(&training, &cccv, rfe)
        .map_err(|err| err.to_string())?;

    print!("{:>8}", "comple");
    for conta in &grid.conta_levels {
        print!("{conta:>8.3}");
    }
    println!();
    for (i, comple) in grid.comple_levels.iter().enumerate() {
        print!("{comple:>8.3}");
        for j in 0..grid.conta_levels.len() {
            match grid.cell(i, j) {
                Some(cell) => print!("{:>8.3}", cell.score_mean),
                None => print!("{:>8}", "NA"),
            }
        }
        println!();
    }

    if let Some(out) = &options.out {
        grid.save_json(out).map_err(|err| err.to_string())?;
        info!("Wrote CCCV grid to {}", out.display());
    }
    Ok(())
}

fn parse_args(args: Vec<String>) -> Result<CliOptions, String> {
    let mut options = CliOptions::default();
    let mut genotype = None;
    let mut phenotype = None;

    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => return Err(help_text()),
            "--genotype" => genotype = Some(parse_path(&args, &mut idx, "--genotype")?),
            "--phenotype" => phenotype = Some(parse_path(&args, &mut idx, "--phenotype")?),
            "--out" => options.out = Some(parse_path(&args, &mut idx, "--out")?),
            "--config" => options.config = Some(parse_path(&args, &mut idx, "--config")?),
            "--classifier" => options.classifier = cli::parse_classifier(&args, &mut idx)?,
            "--comple-steps" => {
                options.comple_steps = Some(parse_value(&args, &mut idx, "--comple-steps")?)
            }
            "--conta-steps" => {
                options.conta_steps = Some(parse_value(&args, &mut idx, "--conta-steps")?)
            }
            "--splits" => options.splits = Some(parse_value(&args, &mut idx, "--splits")?),
            "--replicates" => {
                options.replicates = Some(parse_value(&args, &mut idx, "--replicates")?)
            }
            "--jobs" => options.jobs = Some(parse_value(&args, &mut idx, "--jobs")?),
            "--feature-selection" => options.feature_selection = true,
            "--n-features" => {
                options.n_features = Some(parse_value(&args, &mut idx, "--n-features")?);
                options.feature_selection = true;
            }
            "--random-state" => {
                options.random_state = Some(parse_value(&args, &mut idx, "--random-state")?)
            }
            unknown => return Err(format!("Unknown argument: {unknown}\n\n{}", help_text())),
        }
        idx += 1;
    }

    options.genotype = cli::required(genotype, "--genotype")?;
    options.phenotype = cli::required(phenotype, "--phenotype")?;
    Ok(options)
}

fn help_text() -> String {
    [
        "genotrait-cccv",
        "",
        "Usage:",
        "  genotrait-cccv --genotype <file> --phenotype <file> [options]",
        "",
        "Options:",
        "  --out <grid.json>         Write the score grid as JSON.",
        "  --classifier <svm|xgb>    Classifier family (default: svm).",
        "  --config <config.toml>    Settings file (default: app config).",
        "  --comple-steps <n>        Completeness levels between 1.0 and 0.0.",
        "  --conta-steps <n>         Contamination levels between 0.0 and 1.0.",
        "  --splits <k>              Folds per replicate.",
        "  --replicates <n>          Number of replicates.",
        "  --jobs <n>                Worker threads (0 = all cores).",
        "  --feature-selection       Run recursive elimination inside every training fold.",
        "  --n-features <n>          Minimum features kept by elimination (implies selection).",
        "  --random-state <seed>     Seed for folds and degradation.",
    ]
    .join("\n")
}
