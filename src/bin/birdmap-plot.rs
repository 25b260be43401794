//! Project the embedding table and render 3-D scatter plots.

use std::path::PathBuf;

use birdmap::visualization::{self, ProjectionKind};
use birdmap::{config, logging};

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
    let mut config = config::load(options.config.as_deref()).map_err(|err| err.to_string())?;
    if let Err(err) = logging::init_in(config.paths.log_dir.as_deref()) {
        eprintln!("Logging disabled: {err}");
    }
    if options.show {
        config.plot.show = true;
    }
    let stages = options.stages.unwrap_or_else(|| config.plot.stages.clone());
    let images =
        visualization::run_visualization(&config, &stages).map_err(|err| err.to_string())?;
    for image in images {
        println!("Wrote {}", image.display());
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
struct Options {
    config: Option<PathBuf>,
    stages: Option<Vec<ProjectionKind>>,
    show: bool,
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
            "--stage" => {
                idx += 1;
                let value = args
                    .get(idx)
                    .ok_or_else(|| "--stage requires a value".to_string())?;
                let stages = options.stages.get_or_insert_with(Vec::new);
                if value == "all" {
                    stages.extend(ProjectionKind::ALL);
                } else {
                    let kind = ProjectionKind::parse(value)
                        .ok_or_else(|| format!("Invalid --stage value: {value}"))?;
                    stages.push(kind);
                }
            }
            "--show" => options.show = true,
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
        "birdmap-plot",
        "",
        "Reduce LS_embeddings.csv with PCA (then t-SNE/UMAP) and render 3-D scatter plots.",
        "",
        "Usage:",
        "  birdmap-plot [--config <path>] [--stage pca|tsne|umap|all]... [--show]",
        "",
        "Options:",
        "  --config <path>   Pipeline config (defaults to birdmap.toml in the app directory).",
        "  --stage <kind>    Projection to render; repeatable (default: plot.stages).",
        "  --show            Open each image in the system viewer.",
    ]
    .join("\n")
}
