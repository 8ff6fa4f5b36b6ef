pub mod compose;
pub mod config;
pub mod diffusion;
pub mod errors;
pub mod matting;
pub mod prompts;
pub mod traits;
pub mod workspace;

pub mod mocks;

use std::fs;
use std::path::Path;

use image::Rgba;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;

pub use config::{RunConfig, UserProfile};
pub use diffusion::{DiffusionWeights, GenerationRequest, StableDiffusion};
pub use errors::{PromoGenError, Result};
pub use matting::{MattingConfig, U2NetMatting};
pub use prompts::{Gender, ProductFormat};
pub use traits::*;
pub use workspace::Workspace;

#[cfg(test)]
pub use mocks::*;

/// The promo flow from prompt to matted cutouts, generic over both model
/// backends so tests can swap them out.
pub struct Pipeline<G: TextToImage, M: ForegroundMatting> {
    generator: G,
    matting: M,
    workspace: Workspace,
    seed: Option<u64>,
}

impl<G: TextToImage, M: ForegroundMatting> Pipeline<G, M> {
    pub const fn new(generator: G, matting: M, workspace: Workspace) -> Self {
        Self {
            generator,
            matting,
            workspace,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Look up the prompt for the configured audience, regenerate the stage
    /// directories, then sample and cut out every image. Returns the stage
    /// filenames in generation order.
    pub fn run(&self, config: &RunConfig) -> Result<Vec<String>> {
        config.validate()?;
        let prompt = config.prompt();
        info!("prompt: {prompt}");

        self.workspace.reset()?;

        let mut request = GenerationRequest::new(prompt);
        request.seed = self.seed;
        let images = self.generator.generate(&request)?;
        info!("generated {} images", images.len());

        let progress = ProgressBar::new(images.len() as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                )
                .unwrap()
                .progress_chars("#>-"),
        );

        let mut names = Vec::with_capacity(images.len());
        for (index, image) in images.iter().enumerate() {
            let name = workspace::image_name(index + 1);

            let raw_path = self.workspace.model_path(&name);
            image
                .save(&raw_path)
                .map_err(|e| PromoGenError::ImageProcessing {
                    path: raw_path.display().to_string(),
                    operation: "save generated image".to_string(),
                    source: Box::new(e),
                })?;

            let cutout = self.matting.remove_background(image)?;
            let matted_path = self.workspace.matted_path(&name);
            cutout
                .save(&matted_path)
                .map_err(|e| PromoGenError::ImageProcessing {
                    path: matted_path.display().to_string(),
                    operation: "save matted image".to_string(),
                    source: Box::new(e),
                })?;

            progress.inc(1);
            names.push(name);
        }
        progress.finish_and_clear();
        Ok(names)
    }
}

impl Pipeline<StableDiffusion, U2NetMatting> {
    /// Wire up the real backends: v1.5 diffusion weights from `weights_dir`
    /// and the u2net matting model, both on the same device.
    pub fn with_default_models(
        weights_dir: &Path,
        matting_model: &Path,
        device_id: u32,
        cpu: bool,
    ) -> Result<Self> {
        let generator = StableDiffusion::with_defaults(weights_dir, device_id as usize, cpu)?;
        let matting = U2NetMatting::with_defaults(matting_model, device_id as i32)?;
        Ok(Self::new(generator, matting, Workspace::default()))
    }
}

/// Composite one matted cutout onto a fresh solid-color canvas and write it
/// to the final stage. Runs standalone, no models involved.
pub fn apply_background(
    workspace: &Workspace,
    name: &str,
    width: u32,
    height: u32,
    color: Rgba<u8>,
) -> Result<String> {
    let matted_path = workspace.matted_path(name);
    let foreground = image::open(&matted_path)
        .map_err(|e| PromoGenError::ImageProcessing {
            path: matted_path.display().to_string(),
            operation: "load matted image".to_string(),
            source: Box::new(e),
        })?
        .to_rgba8();

    let canvas = compose::onto_canvas(&foreground, width, height, color);

    fs::create_dir_all(&workspace.composed_dir).map_err(|e| PromoGenError::FileSystem {
        path: workspace.composed_dir.clone(),
        operation: "create output directory".to_string(),
        source: e,
    })?;
    let composed_path = workspace.composed_path(name);
    canvas
        .save(&composed_path)
        .map_err(|e| PromoGenError::ImageProcessing {
            path: composed_path.display().to_string(),
            operation: "save composited image".to_string(),
            source: Box::new(e),
        })?;

    info!("composited {name} onto {width}x{height} canvas");
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn run_config() -> RunConfig {
        RunConfig {
            size_x: 640,
            size_y: 480,
            user: UserProfile {
                gender: Gender::Female,
            },
            format: ProductFormat::Tc,
        }
    }

    #[test]
    fn run_writes_both_stages_and_reports_names() -> Result<()> {
        let root = TempDir::new().unwrap();
        let workspace = Workspace::under(root.path());
        let pipeline = Pipeline::new(MockGenerator::new(), MockMatting::new(), workspace.clone());

        let names = pipeline.run(&run_config())?;

        assert_eq!(names, ["image_1.png", "image_2.png", "image_3.png"]);
        for name in &names {
            assert!(workspace.model_path(name).is_file());
            assert!(workspace.matted_path(name).is_file());
        }
        Ok(())
    }

    #[test]
    fn run_sends_the_configured_prompt_to_the_generator() -> Result<()> {
        let root = TempDir::new().unwrap();
        let generator = MockGenerator::new();
        let config = run_config();
        let expected = config.prompt();

        Pipeline::new(&generator, MockMatting::new(), Workspace::under(root.path()))
            .run(&config)?;

        assert_eq!(generator.last_request().map(|r| r.prompt), Some(expected.to_string()));
        Ok(())
    }

    #[test]
    fn compositing_a_missing_cutout_fails_cleanly() {
        let root = TempDir::new().unwrap();
        let workspace = Workspace::under(root.path());
        let result = apply_background(&workspace, "image_9.png", 100, 100, Rgba([0, 0, 255, 255]));
        assert!(matches!(result, Err(PromoGenError::ImageProcessing { .. })));
    }
}
