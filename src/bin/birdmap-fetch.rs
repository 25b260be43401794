//! Search the archive and download audio for every configured query.

use std::path::PathBuf;

use birdmap::{acquisition, config, logging};

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
    let runs = acquisition::run_acquisition(&config).map_err(|err| err.to_string())?;
    for run in &runs {
        println!(
            "{}: {} recordings ({} already listed), {} downloaded, {} skipped, {} bytes",
            run.metadata_csv.display(),
            run.recordings,
            run.duplicate_ids,
            run.downloads.downloaded,
            run.downloads.skipped,
            run.downloads.bytes
        );
    }
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
        "birdmap-fetch",
        "",
        "Run the configured archive queries, append their metadata CSVs and download audio.",
        "",
        "Usage:",
        "  birdmap-fetch [--config <path>]",
        "",
        "Options:",
        "  --config <path>   Pipeline config (defaults to birdmap.toml in the app directory).",
    ]
    .join("\n")
}
