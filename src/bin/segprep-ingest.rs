//! Fetch the segmentation dataset, build its EDA table and log the `raw_data` artifact.

use std::io::Write;
use std::path::PathBuf;

use segprep::artifacts::ArtifactStore;
use segprep::dataset::ingest::{self, IngestProgress};
use segprep::dataset::source::{self, DatasetLayout, FetchOptions};
use segprep::params::Params;
use segprep::{app_dirs, logging};

#[derive(Debug, Default)]
struct Options {
    config: Option<PathBuf>,
    out_dir: Option<PathBuf>,
    dataset_dir: Option<PathBuf>,
    url: Option<String>,
    force: bool,
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
    if let Some(url) = options.url {
        params.dataset_url = url;
    }

    let layout = match options.dataset_dir {
        Some(dir) => DatasetLayout::locate(&dir).map_err(|err| err.to_string())?,
        None => {
            let cache_dir = app_dirs::datasets_dir().map_err(|err| err.to_string())?;
            println!("Fetching {}", params.dataset_url);
            source::fetch_dataset(&FetchOptions {
                url: params.dataset_url.clone(),
                cache_dir,
                force: options.force,
            })
            .map_err(|err| err.to_string())?
        }
    };
    println!("Dataset root: {}", layout.root.display());

    let store = open_store(&params)?;
    let out_dir = options.out_dir.unwrap_or_else(|| PathBuf::from("output"));
    let mut last_percent = None;
    let mut report = |progress: IngestProgress| {
        let percent = if progress.total == 0 {
            100
        } else {
            progress.processed * 100 / progress.total
        };
        if last_percent != Some(percent) {
            last_percent = Some(percent);
            print!(
                "\r{}: {}/{} ({percent}%)",
                progress.stage, progress.processed, progress.total
            );
            let _ = std::io::stdout().flush();
        }
    };
    let summary = ingest::ingest_dataset(&params, &store, &layout, &out_dir, Some(&mut report))
        .map_err(|err| err.to_string())?;
    println!();
    println!(
        "Logged {} with {} images (run {})",
        summary.artifact, summary.images, summary.run_id
    );
    println!("EDA table copy: {}", summary.table_path.display());
    println!("Images per class:");
    for (class, count) in &summary.class_counts {
        println!("  {class}: {count}");
    }
    Ok(())
}

fn open_store(params: &Params) -> Result<ArtifactStore, String> {
    let base = match &params.store_dir {
        Some(dir) => dir.clone(),
        None => app_dirs::artifacts_dir().map_err(|err| err.to_string())?,
    };
    ArtifactStore::open(&base, params.entity.as_deref(), &params.project)
        .map_err(|err| err.to_string())
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
                options.out_dir = Some(PathBuf::from(value));
            }
            "--dataset-dir" => {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| "--dataset-dir requires a value".to_string())?;
                options.dataset_dir = Some(PathBuf::from(value));
            }
            "--url" => {
                idx += 1;
                let value = args.get(idx).ok_or_else(|| "--url requires a value".to_string())?;
                options.url = Some(value.to_string());
            }
            "--force" => {
                options.force = true;
            }
            unknown => {
                return Err(format!("Unknown argument: {unknown}\n\n{}", help_text()));
            }
        }
        idx += 1;
    }

    Ok(Some(options))
}

fn help_text() -> String {
    [
        "segprep-ingest",
        "",
        "Fetches the segmentation dataset, records per-image class presence and logs a raw_data artifact.",
        "",
        "Usage:",
        "  segprep-ingest [--config <path>] [--out <dir>] [--dataset-dir <dir> | --url <url>] [--force]",
        "",
        "Options:",
        "  --config <path>       TOML parameters file (defaults built in).",
        "  --out <dir>           Output directory (default: output).",
        "  --dataset-dir <dir>   Use an already extracted dataset instead of downloading.",
        "  --url <url>           Dataset archive URL (overrides the config).",
        "  --force               Re-download and re-extract even if cached.",
    ]
    .join("\n")
}
