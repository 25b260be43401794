//! Run join, embedding extraction and plotting in one go.

use std::path::PathBuf;

use birdmap::{config, extraction, logging, metadata_join, visualization};

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
    let config = config::load(options.config.as_deref()).map_err(|err| err.to_string())?;
    if let Err(err) = logging::init_in(config.paths.log_dir.as_deref()) {
        eprintln!("Logging disabled: {err}");
    }
    let report =
        metadata_join::run_join(&config, options.reuse_map).map_err(|err| err.to_string())?;
    println!(
        "Joined {} of {} rows",
        report.matched_rows, report.total_rows
    );
    let matrix = extraction::run_extraction(&config).map_err(|err| err.to_string())?;
    println!("Extracted {} embeddings (dim={})", matrix.len(), matrix.dim());
    let images = visualization::run_visualization(&config, &config.plot.stages)
        .map_err(|err| err.to_string())?;
    for image in images {
        println!("Wrote {}", image.display());
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
struct Options {
    config: Option<PathBuf>,
    reuse_map: bool,
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
                let value = args
                    .get(idx)
                    .ok_or_else(|| "--config requires a value".to_string())?;
                options.config = Some(PathBuf::from(value));
            }
            "--reuse-map" => options.reuse_map = true,
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
        "birdmap",
        "",
        "Join metadata to audio, extract AVES embeddings and render the projections.",
        "",
        "Usage:",
        "  birdmap [--config <path>] [--reuse-map]",
        "",
        "Options:",
        "  --config <path>   Pipeline config (defaults to birdmap.toml in the app directory).",
        "  --reuse-map       Load an existing mp3dict.json instead of rescanning.",
    ]
    .join("\n")
}
