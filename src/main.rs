use std::path::PathBuf;

use anyhow::{ensure, Context, Result};
use clap::Parser;
use log::info;

use promo_gen_rs::{apply_background, compose, matting, Pipeline, RunConfig, Workspace};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Run configuration with the target audience and canvas size.
    #[arg(default_value = "config.json")]
    config: PathBuf,

    /// Composite this already-matted file onto the canvas and exit.
    #[arg(long, value_name = "NAME")]
    compose: Option<String>,

    /// Canvas fill, `#RRGGBB` or `#RRGGBBAA`.
    #[arg(long, default_value = "#0000ff")]
    background_color: String,

    /// Directory with local diffusion weights; missing files come from the
    /// Hugging Face hub.
    #[arg(long, default_value = "weights")]
    weights_dir: PathBuf,

    /// Path to u2net.onnx. Defaults to ~/.u2net/u2net.onnx.
    #[arg(long)]
    matting_model: Option<PathBuf>,

    #[arg(long, default_value_t = 0)]
    device_id: u32,

    /// Stay on the CPU even when CUDA is available.
    #[arg(long)]
    cpu: bool,

    /// Fixed RNG seed for reproducible sampling.
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = RunConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    let color = compose::parse_color(&cli.background_color)?;
    let workspace = Workspace::default();

    if let Some(name) = cli.compose.as_deref() {
        let name = apply_background(&workspace, name, config.size_x, config.size_y, color)?;
        println!("{name}");
        return Ok(());
    }

    let matting_model = match cli.matting_model {
        Some(path) => path,
        None => matting::default_model_path()?,
    };
    ensure!(
        matting_model.is_file(),
        "matting model not found at {}; download u2net.onnx there or pass --matting-model",
        matting_model.display()
    );

    info!("loading models");
    let pipeline =
        Pipeline::with_default_models(&cli.weights_dir, &matting_model, cli.device_id, cli.cpu)?
            .with_seed(cli.seed);

    let names = pipeline.run(&config)?;
    for name in &names {
        println!("{name}");
    }
    Ok(())
}
