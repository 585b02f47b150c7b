//! Assign train/valid/test stages to the ingested dataset and log the `split_data` artifact.

use std::path::PathBuf;

use segprep::artifacts::ArtifactStore;
use segprep::dataset::split::{self, SplitOptions};
use segprep::params::Params;
use segprep::{app_dirs, logging};

#[derive(Debug, Default)]
struct Options {
    config: Option<PathBuf>,
    split: SplitOptions,
    folds: Option<usize>,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let Some(options) = parse_args(std::env::args().skip(1).collect())? else {
        return Ok(());
    };
    if let Err(err) = logging::init() {
        eprintln!("Logging disabled: {err}");
    }
    let mut params =
        Params::load_or_default(options.config.as_deref()).map_err(|err| err.to_string())?;
    if let Some(folds) = options.folds {
        params.n_splits = folds;
        params.validate().map_err(|err| err.to_string())?;
    }

    let base = match &params.store_dir {
        Some(dir) => dir.clone(),
        None => app_dirs::artifacts_dir().map_err(|err| err.to_string())?,
    };
    let store = ArtifactStore::open(&base, params.entity.as_deref(), &params.project)
        .map_err(|err| err.to_string())?;
    let summary =
        split::split_dataset(&params, &store, &options.split).map_err(|err| err.to_string())?;

    println!(
        "Split {} files from {} into {}",
        summary.rows,
        summary.source_artifact,
        summary.csv_path.display()
    );
    for (stage, count) in &summary.stage_counts {
        println!("  {stage}: {count}");
    }
    println!("Logged {} (run {})", summary.artifact, summary.run_id);
    Ok(())
}

fn parse_args(args: Vec<String>) -> Result<Option<Options>, String> {
    let mut options = Options::default();

    let mut idx = 0usize;
    while idx < args.len() {
        match args[idx].as_str() {
            "-h" | "--help" => {
                println!("{}", help_text());
                return Ok(None);
            }
            "--config" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--config requires a value".to_string())?;
                options.config = Some(PathBuf::from(value));
            }
            "--out" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--out requires a value".to_string())?;
                options.split.output_dir = PathBuf::from(value);
            }
            "--artifact" => {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| "--artifact requires a value".to_string())?;
                options.split.artifact = Some(value.to_string());
            }
            "--folds" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--folds requires a value".to_string())?;
                options.folds = Some(
                    value
                        .parse::<usize>()
                        .map_err(|_| format!("Invalid --folds value: {value}"))?,
                );
            }
            unknown => {
                return Err(format!("Unknown argument: {unknown}\n\n{}", help_text()));
            }
        }
        idx += 1;
    }

    if options.split.output_dir.as_os_str().is_empty() {
        return Err("--out requires a non-empty path".to_string());
    }

    Ok(Some(options))
}

fn help_text() -> String {
    [
        "segprep-split",
        "",
        "Assigns train/valid/test stages with a grouped stratified k-fold and logs a split_data artifact.",
        "",
        "Usage:",
        "  segprep-split [--config <path>] [--out <dir>] [--artifact <ref>] [--folds <k>]",
        "",
        "Options:",
        "  --config <path>    TOML parameters file (defaults built in).",
        "  --out <dir>        Output directory (default: output).",
        "  --artifact <ref>   Source artifact, e.g. bdd_simple_1k:v3 (default: <raw_data_artifact>:latest).",
        "  --folds <k>        Number of folds; fold 0 is test, fold 1 valid (default: 10).",
    ]
    .join("\n")
}
