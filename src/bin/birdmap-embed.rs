//! Extract AVES embeddings for every joined recording.

use std::path::PathBuf;

use birdmap::{config, extraction, logging};

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
    let matrix = extraction::run_extraction(&config).map_err(|err| err.to_string())?;
    println!(
        "Wrote {} embeddings (dim={}) to {}",
        matrix.len(),
        matrix.dim(),
        config.paths.embeddings().display()
    );
    Ok(())
}

#[derive(Debug, Clone, Default)]
struct Options {
    config: Option<PathBuf>,
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
        "birdmap-embed",
        "",
        "Embed every row of final_data.csv with the AVES encoder.",
        "",
        "Usage:",
        "  birdmap-embed [--config <path>]",
        "",
        "Options:",
        "  --config <path>   Pipeline config (defaults to birdmap.toml in the app directory).",
        "",
        "Environment:",
        "  BIRDMAP_BACKEND   Override the encoder backend (auto, cpu, wgpu).",
    ]
    .join("\n")
}
