//! Train a trait classifier from genotype and phenotype files and save it as JSON.

use std::path::PathBuf;

use genotrait::cli::{self, parse_path, parse_value};
use genotrait::ml::metrics::{ConfusionMatrix, accuracy, precision_recall_by_class};
use genotrait::records::{self, GenotypeRecord, load_training_files};
use genotrait::trex::ClassifierKind;
use tracing::info;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

#[derive(Debug, Clone)]
struct CliOptions {
    genotype: PathBuf,
    phenotype: PathBuf,
    groups: Option<PathBuf>,
    out: Option<PathBuf>,
    config: Option<PathBuf>,
    classifier: ClassifierKind,
    feature_selection: bool,
    n_features: Option<usize>,
    compress: bool,
    top_weights: usize,
    random_state: Option<u64>,
}

fn run() -> Result<(), String> {
    let options = parse_args(std::env::args().skip(1).collect())?;
    cli::init_logging("genotrait-train");
    let mut settings = cli::load_settings(options.config.as_deref())?;
    if let Some(seed) = options.random_state {
        settings.set_random_state(seed);
    }
    if let Some(n_features) = options.n_features {
        settings.rfe.n_features = n_features;
    }

    let training = load_training_files(
        &options.genotype,
        &options.phenotype,
        options.groups.as_deref(),
    )
    .map_err(|err| err.to_string())?;
    let mut classifier = options.classifier.build(&settings);
    if options.compress {
        classifier
            .compress_vocabulary(&training)
            .map_err(|err| err.to_string())?;
    }
    let rfe = options.feature_selection.then_some(&settings.rfe);
    classifier
        .train(&training, rfe)
        .map_err(|err| err.to_string())?;

    let genotypes: Vec<GenotypeRecord> = training.iter().map(|r| r.to_genotype()).collect();
    let predictions = classifier.predict(&genotypes).map_err(|err| err.to_string())?;
    let predicted: Vec<usize> = predictions.iter().map(|p| usize::from(p.sign)).collect();
    let cm = ConfusionMatrix::from_labels(2, &records::labels(&training), &predicted);
    println!(
        "trait: {}  records: {}  training accuracy: {:.4}",
        classifier.trait_name().unwrap_or("?"),
        training.len(),
        accuracy(&cm)
    );
    for (idx, stats) in precision_recall_by_class(&cm).iter().enumerate() {
        println!(
            "class {idx}  precision={:.3}  recall={:.3}  support={}",
            stats.precision, stats.recall, stats.support
        );
    }

    let weights = classifier.get_feature_weights();
    if options.top_weights > 0 {
        println!("Top feature weights:");
        for (name, weight) in weights.iter().take(options.top_weights) {
            println!("  {weight:>10.5}  {name}");
        }
    }

    let out = match options.out {
        Some(path) => path,
        None => {
            let dir = settings.resolve_models_dir().map_err(|err| err.to_string())?;
            let name = classifier.trait_name().unwrap_or("trait");
            dir.join(format!("{name}.{}.json", classifier.identifier()))
        }
    };
    classifier.save_json(&out).map_err(|err| err.to_string())?;
    info!("Wrote model to {}", out.display());
    println!("model: {}", out.display());
    Ok(())
}

fn parse_args(args: Vec<String>) -> Result<CliOptions, String> {
    let mut genotype = None;
    let mut phenotype = None;
    let mut groups = None;
    let mut out = None;
    let mut config = None;
    let mut classifier = ClassifierKind::default();
    let mut feature_selection = false;
    let mut n_features = None;
    let mut compress = false;
    let mut top_weights = 10usize;
    let mut random_state = None;

    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => return Err(help_text()),
            "--genotype" => genotype = Some(parse_path(&args, &mut idx, "--genotype")?),
            "--phenotype" => phenotype = Some(parse_path(&args, &mut idx, "--phenotype")?),
            "--groups" => groups = Some(parse_path(&args, &mut idx, "--groups")?),
            "--out" => out = Some(parse_path(&args, &mut idx, "--out")?),
            "--config" => config = Some(parse_path(&args, &mut idx, "--config")?),
            "--classifier" => classifier = cli::parse_classifier(&args, &mut idx)?,
            "--feature-selection" => feature_selection = true,
            "--n-features" => {
                n_features = Some(parse_value(&args, &mut idx, "--n-features")?);
                feature_selection = true;
            }
            "--compress" => compress = true,
            "--top-weights" => top_weights = parse_value(&args, &mut idx, "--top-weights")?,
            "--random-state" => random_state = Some(parse_value(&args, &mut idx, "--random-state")?),
            unknown => return Err(format!("Unknown argument: {unknown}\n\n{}", help_text())),
        }
        idx += 1;
    }

    Ok(CliOptions {
        genotype: cli::required(genotype, "--genotype")?,
        phenotype: cli::required(phenotype, "--phenotype")?,
        groups,
        out,
        config,
        classifier,
        feature_selection,
        n_features,
        compress,
        top_weights,
        random_state,
    })
}

fn help_text() -> String {
    [
        "genotrait-train",
        "",
        "Usage:",
        "  genotrait-train --genotype <file> --phenotype <file> [options]",
        "",
        "Options:",
        "  --groups <file>          Taxonomic groups (identifier, group name).",
        "  --classifier <svm|xgb>   Classifier family (default: svm).",
        "  --out <model.json>       Output path (default: <models dir>/<trait>.<kind>.json).",
        "  --config <config.toml>   Settings file (default: app config).",
        "  --feature-selection      Reduce features by recursive elimination.",
        "  --n-features <n>         Minimum features kept by elimination (implies selection).",
        "  --compress               Merge features with identical presence patterns.",
        "  --top-weights <n>        Print the n strongest feature weights (default: 10).",
        "  --random-state <seed>    Seed for all randomized steps.",
    ]
    .join("\n")
}
