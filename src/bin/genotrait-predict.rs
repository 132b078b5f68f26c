//! Predict a trait for genomes with a saved classifier, optionally explaining the calls.

use std::path::PathBuf;

use genotrait::cli::{self, parse_path, parse_value};
use genotrait::records::load_genotype_file;
use genotrait::shap::table::{force_table, summary_table};
use genotrait::trex::AnyClassifier;
use serde::Serialize;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

#[derive(Debug, Clone)]
struct CliOptions {
    model: PathBuf,
    genotype: PathBuf,
    explain: bool,
    sample: Option<String>,
    n_features: Option<usize>,
    json: bool,
}

#[derive(Serialize)]
struct JsonReport<'a, P, S, F> {
    predictions: &'a [P],
    #[serde(skip_serializing_if = "Option::is_none")]
    shap_summary: Option<S>,
    #[serde(skip_serializing_if = "Option::is_none")]
    shap_force: Option<F>,
}

fn run() -> Result<(), String> {
    let options = parse_args(std::env::args().skip(1).collect())?;
    cli::init_logging("genotrait-predict");
    let classifier = AnyClassifier::load_json(&options.model).map_err(|err| err.to_string())?;
    let genotypes = load_genotype_file(&options.genotype).map_err(|err| err.to_string())?;
    let predictions = classifier
        .predict(&genotypes)
        .map_err(|err| err.to_string())?;

    let (summary, force) = if options.explain {
        let handler = classifier
            .explain(&genotypes)
            .map_err(|err| err.to_string())?;
        let summary = handler
            .get_shap_summary(options.n_features)
            .map_err(|err| err.to_string())?;
        let force = match &options.sample {
            Some(sample) => Some(
                handler
                    .get_shap_force(sample, options.n_features)
                    .map_err(|err| err.to_string())?,
            ),
            None => None,
        };
        (Some(summary), force)
    } else {
        (None, None)
    };

    if options.json {
        let report = JsonReport {
            predictions: &predictions,
            shap_summary: summary,
            shap_force: force,
        };
        let json = serde_json::to_string_pretty(&report).map_err(|err| err.to_string())?;
        println!("{json}");
        return Ok(());
    }

    println!("identifier\ttrait\tsign\tconfidence");
    for prediction in &predictions {
        println!(
            "{}\t{}\t{}\t{:.4}",
            prediction.identifier,
            prediction.trait_name,
            prediction.sign,
            prediction.confidence()
        );
    }
    if let Some(summary) = summary {
        println!();
        print!("{}", summary_table(&summary));
    }
    if let Some(force) = force {
        println!();
        print!("{}", force_table(&force));
    }
    Ok(())
}

fn parse_args(args: Vec<String>) -> Result<CliOptions, String> {
    let mut model = None;
    let mut genotype = None;
    let mut explain = false;
    let mut sample = None;
    let mut n_features = None;
    let mut json = false;

    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => return Err(help_text()),
            "--model" => model = Some(parse_path(&args, &mut idx, "--model")?),
            "--genotype" => genotype = Some(parse_path(&args, &mut idx, "--genotype")?),
            "--explain" => explain = true,
            "--sample" => {
                sample = Some(cli::next_value(&args, &mut idx, "--sample")?.to_string());
                explain = true;
            }
            "--n-features" => n_features = Some(parse_value(&args, &mut idx, "--n-features")?),
            "--json" => json = true,
            unknown => return Err(format!("Unknown argument: {unknown}\n\n{}", help_text())),
        }
        idx += 1;
    }

    Ok(CliOptions {
        model: cli::required(model, "--model")?,
        genotype: cli::required(genotype, "--genotype")?,
        explain,
        sample,
        n_features,
        json,
    })
}

fn help_text() -> String {
    [
        "genotrait-predict",
        "",
        "Usage:",
        "  genotrait-predict --model <model.json> --genotype <file> [options]",
        "",
        "Options:",
        "  --explain                 Print a SHAP summary over all genomes.",
        "  --sample <identifier>     Also print the SHAP breakdown of one genome.",
        "  --n-features <n>          Limit SHAP rows to the n most influential features.",
        "  --json                    Emit predictions and explanations as JSON.",
    ]
    .join("\n")
}
