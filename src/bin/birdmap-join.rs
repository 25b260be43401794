//! Join the metadata table to the audio files on disk.

use std::path::PathBuf;

use birdmap::{config, logging, metadata_join};

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
        "Joined {} of {} rows into {}",
        report.matched_rows,
        report.total_rows,
        config.paths.enriched_table().display()
    );
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
        "birdmap-join",
        "",
        "Scan the audio tree, save mp3dict.json and write final_data.csv.",
        "",
        "Usage:",
        "  birdmap-join [--config <path>] [--reuse-map]",
        "",
        "Options:",
        "  --config <path>   Pipeline config (defaults to birdmap.toml in the app directory).",
        "  --reuse-map       Load an existing mp3dict.json instead of rescanning.",
    ]
    .join("\n")
}
