use std::io;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device, IndexOp, Module, Tensor};
use candle_transformers::models::stable_diffusion::{
    self, clip::ClipTextTransformer, unet_2d::UNet2DConditionModel, vae::AutoEncoderKL,
    StableDiffusionConfig,
};
use hf_hub::api::sync::Api;
use image::{ImageBuffer, RgbImage};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use tokenizers::Tokenizer;

use crate::{
    errors::{PromoGenError, Result},
    prompts::NEGATIVE_PROMPT,
    traits::TextToImage,
};

pub const DEFAULT_IMAGE_SIZE: u32 = 512;
pub const DEFAULT_IMAGE_COUNT: usize = 3;
pub const DEFAULT_STEPS: usize = 25;
pub const DEFAULT_GUIDANCE_SCALE: f64 = 7.5;

const VAE_SCALE: f64 = 0.18215;
const WEIGHTS_REPO: &str = "stable-diffusion-v1-5/stable-diffusion-v1-5";
const TOKENIZER_REPO: &str = "openai/clip-vit-base-patch32";

/// One text-to-image job: what to draw, how large, how many samples.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub count: usize,
    pub steps: usize,
    pub guidance_scale: f64,
    pub seed: Option<u64>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: NEGATIVE_PROMPT.to_string(),
            width: DEFAULT_IMAGE_SIZE,
            height: DEFAULT_IMAGE_SIZE,
            count: DEFAULT_IMAGE_COUNT,
            steps: DEFAULT_STEPS,
            guidance_scale: DEFAULT_GUIDANCE_SCALE,
            seed: None,
        }
    }

    /// The latent space works on eighth-resolution planes, so sample sizes
    /// must divide evenly.
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [("width", self.width), ("height", self.height)] {
            if value == 0 || value % 8 != 0 {
                return Err(PromoGenError::validation(
                    field,
                    format!("must be a non-zero multiple of 8, got {value}"),
                ));
            }
        }
        if self.count == 0 {
            return Err(PromoGenError::validation("count", "must be at least 1"));
        }
        if self.steps == 0 {
            return Err(PromoGenError::validation("steps", "must be at least 1"));
        }
        if !self.guidance_scale.is_finite() || self.guidance_scale <= 0.0 {
            return Err(PromoGenError::validation(
                "guidance_scale",
                format!("must be a positive number, got {}", self.guidance_scale),
            ));
        }
        Ok(())
    }
}

/// Resolved weight files for the v1.5 checkpoint.
///
/// Files already sitting in the weights directory win; anything missing is
/// pulled from the Hugging Face hub into its cache.
#[derive(Debug, Clone)]
pub struct DiffusionWeights {
    pub tokenizer: PathBuf,
    pub clip: PathBuf,
    pub unet: PathBuf,
    pub vae: PathBuf,
}

impl DiffusionWeights {
    pub fn resolve(weights_dir: &Path, use_f16: bool) -> Result<Self> {
        let local = Self {
            tokenizer: weights_dir.join("tokenizer.json"),
            clip: weights_dir.join("clip.safetensors"),
            unet: weights_dir.join("unet.safetensors"),
            vae: weights_dir.join("vae.safetensors"),
        };
        if [&local.tokenizer, &local.clip, &local.unet, &local.vae]
            .iter()
            .all(|path| path.is_file())
        {
            info!("using local weights from {}", weights_dir.display());
            return Ok(local);
        }

        let variant = if use_f16 { ".fp16" } else { "" };
        let api = Api::new().map_err(|e| PromoGenError::Model {
            operation: "hub client initialization".to_string(),
            source: Box::new(e),
        })?;
        let pick = |cached: PathBuf, repo: &str, file: String| -> Result<PathBuf> {
            if cached.is_file() {
                return Ok(cached);
            }
            api.model(repo.to_string())
                .get(&file)
                .map_err(|e| PromoGenError::Model {
                    operation: format!("download {file} from {repo}"),
                    source: Box::new(e),
                })
        };

        Ok(Self {
            tokenizer: pick(local.tokenizer, TOKENIZER_REPO, "tokenizer.json".to_string())?,
            clip: pick(
                local.clip,
                WEIGHTS_REPO,
                format!("text_encoder/model{variant}.safetensors"),
            )?,
            unet: pick(
                local.unet,
                WEIGHTS_REPO,
                format!("unet/diffusion_pytorch_model{variant}.safetensors"),
            )?,
            vae: pick(
                local.vae,
                WEIGHTS_REPO,
                format!("vae/diffusion_pytorch_model{variant}.safetensors"),
            )?,
        })
    }
}

/// Stable Diffusion v1.5 with classifier-free guidance, held in memory for
/// the whole run.
pub struct StableDiffusion {
    sd_config: StableDiffusionConfig,
    device: Device,
    dtype: DType,
    tokenizer: Tokenizer,
    text_model: ClipTextTransformer,
    unet: UNet2DConditionModel,
    vae: AutoEncoderKL,
}

impl StableDiffusion {
    pub fn load(weights: &DiffusionWeights, device: Device, dtype: DType) -> Result<Self> {
        let sd_config = StableDiffusionConfig::v1_5(None, None, None);

        let tokenizer = Tokenizer::from_file(&weights.tokenizer).map_err(|e| {
            PromoGenError::Model {
                operation: format!("tokenizer loading: {}", weights.tokenizer.display()),
                source: e,
            }
        })?;

        debug!("building text encoder from {}", weights.clip.display());
        // The text encoder stays in f32; half precision degrades it.
        let text_model = stable_diffusion::build_clip_transformer(
            &sd_config.clip,
            &weights.clip,
            &device,
            DType::F32,
        )?;
        debug!("building unet from {}", weights.unet.display());
        let unet = sd_config.build_unet(
            &weights.unet,
            &device,
            4,
            cfg!(feature = "flash-attn"),
            dtype,
        )?;
        debug!("building vae from {}", weights.vae.display());
        let vae = sd_config.build_vae(&weights.vae, &device, dtype)?;

        Ok(Self {
            sd_config,
            device,
            dtype,
            tokenizer,
            text_model,
            unet,
            vae,
        })
    }

    /// Load from a weights directory, on CUDA when available unless `cpu`
    /// forces it off. CUDA runs in f16, the CPU in f32.
    pub fn with_defaults(weights_dir: &Path, device_id: usize, cpu: bool) -> Result<Self> {
        let device = if cpu {
            Device::Cpu
        } else {
            Device::cuda_if_available(device_id)?
        };
        let dtype = if device.is_cuda() {
            DType::F16
        } else {
            DType::F32
        };
        info!("diffusion device {device:?}, dtype {dtype:?}");
        let weights = DiffusionWeights::resolve(weights_dir, dtype == DType::F16)?;
        Self::load(&weights, device, dtype)
    }

    fn token_id(&self, token: &str) -> Result<u32> {
        self.tokenizer
            .get_vocab(true)
            .get(token)
            .copied()
            .ok_or_else(|| PromoGenError::Model {
                operation: format!("look up token `{token}`"),
                source: Box::new(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "token missing from the tokenizer vocabulary",
                )),
            })
    }

    fn tokenize(&self, text: &str) -> Result<Vec<u32>> {
        let pad_id = match &self.sd_config.clip.pad_with {
            Some(padding) => self.token_id(padding)?,
            None => self.token_id("<|endoftext|>")?,
        };
        let mut tokens = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| PromoGenError::Model {
                operation: "prompt tokenization".to_string(),
                source: e,
            })?
            .get_ids()
            .to_vec();

        let limit = self.sd_config.clip.max_position_embeddings;
        if tokens.len() > limit {
            return Err(PromoGenError::validation(
                "prompt",
                format!(
                    "too long: {} tokens, the text encoder takes at most {limit}",
                    tokens.len()
                ),
            ));
        }
        while tokens.len() < limit {
            tokens.push(pad_id);
        }
        Ok(tokens)
    }

    /// Unconditional and prompt embeddings stacked along the batch axis, in
    /// that order, ready for one guided unet pass.
    fn text_embeddings(&self, prompt: &str, negative_prompt: &str) -> Result<Tensor> {
        let tokens = self.tokenize(prompt)?;
        let uncond_tokens = self.tokenize(negative_prompt)?;
        let tokens = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
        let uncond_tokens = Tensor::new(uncond_tokens.as_slice(), &self.device)?.unsqueeze(0)?;

        let text_embeddings = self.text_model.forward(&tokens)?;
        let uncond_embeddings = self.text_model.forward(&uncond_tokens)?;
        Ok(Tensor::cat(&[uncond_embeddings, text_embeddings], 0)?.to_dtype(self.dtype)?)
    }

    fn decode_latents(&self, latents: &Tensor) -> Result<RgbImage> {
        let image = self.vae.decode(&(latents / VAE_SCALE)?)?;
        let image = ((image / 2.)? + 0.5)?.to_device(&Device::Cpu)?;
        let image = (image.clamp(0f32, 1.)? * 255.)?.to_dtype(DType::U8)?;

        let image = image.i(0)?;
        let (channels, height, width) = image.dims3()?;
        if channels != 3 {
            return Err(PromoGenError::model(
                "vae decoding",
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("expected 3 channels, got {channels}"),
                ),
            ));
        }
        let pixels = image.permute((1, 2, 0))?.flatten_all()?.to_vec1::<u8>()?;
        ImageBuffer::from_raw(width as u32, height as u32, pixels).ok_or_else(|| {
            PromoGenError::model(
                "vae decoding",
                io::Error::new(io::ErrorKind::InvalidData, "decoded buffer has the wrong size"),
            )
        })
    }
}

impl TextToImage for StableDiffusion {
    fn generate(&self, request: &GenerationRequest) -> Result<Vec<RgbImage>> {
        request.validate()?;
        if let Some(seed) = request.seed {
            self.device.set_seed(seed)?;
        }

        let mut scheduler = self.sd_config.build_scheduler(request.steps)?;
        let embeddings = self.text_embeddings(&request.prompt, &request.negative_prompt)?;
        let timesteps = scheduler.timesteps().to_vec();
        let latent_height = (request.height / 8) as usize;
        let latent_width = (request.width / 8) as usize;

        let progress = ProgressBar::new((request.count * request.steps) as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                )
                .unwrap()
                .progress_chars("#>-"),
        );

        let mut images = Vec::with_capacity(request.count);
        for index in 0..request.count {
            debug!("sampling image {} of {}", index + 1, request.count);
            let latents = Tensor::randn(
                0f32,
                1f32,
                (1, 4, latent_height, latent_width),
                &self.device,
            )?;
            let mut latents = (latents * scheduler.init_noise_sigma())?.to_dtype(self.dtype)?;

            for &timestep in &timesteps {
                let input = Tensor::cat(&[&latents, &latents], 0)?;
                let input = scheduler.scale_model_input(input, timestep)?;
                let pred = self.unet.forward(&input, timestep as f64, &embeddings)?;
                let pred = pred.chunk(2, 0)?;
                let guided = (&pred[0] + ((&pred[1] - &pred[0])? * request.guidance_scale)?)?;
                latents = scheduler.step(&guided, timestep, &latents)?;
                progress.inc(1);
            }
            images.push(self.decode_latents(&latents)?);
        }
        progress.finish_and_clear();
        Ok(images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn request_defaults_match_the_promo_profile() {
        let request = GenerationRequest::new("a house");
        assert_eq!(request.width, 512);
        assert_eq!(request.height, 512);
        assert_eq!(request.count, 3);
        assert_eq!(request.steps, 25);
        assert_eq!(request.guidance_scale, 7.5);
        assert_eq!(request.negative_prompt, NEGATIVE_PROMPT);
        assert_eq!(request.seed, None);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn rejects_sizes_off_the_latent_grid() {
        let mut request = GenerationRequest::new("a house");
        request.width = 500;
        assert!(request.validate().is_err());

        let mut request = GenerationRequest::new("a house");
        request.height = 0;
        assert!(request.validate().is_err());
    }

    #[test]
    fn rejects_empty_runs() {
        let mut request = GenerationRequest::new("a house");
        request.count = 0;
        assert!(request.validate().is_err());

        let mut request = GenerationRequest::new("a house");
        request.steps = 0;
        assert!(request.validate().is_err());
    }

    #[test]
    fn rejects_non_positive_guidance() {
        let mut request = GenerationRequest::new("a house");
        request.guidance_scale = 0.0;
        assert!(request.validate().is_err());
        request.guidance_scale = f64::NAN;
        assert!(request.validate().is_err());
    }

    #[test]
    fn text_encoder_forward_comes_from_module() {
        // Method-call syntax on the encoder needs the trait in scope.
        let _: fn(&ClipTextTransformer, &Tensor) -> candle_core::Result<Tensor> = Module::forward;
    }

    #[test]
    fn one_scheduler_drives_the_whole_batch() {
        let sd_config = StableDiffusionConfig::v1_5(None, None, None);
        let mut scheduler = sd_config.build_scheduler(4).unwrap();
        let timesteps = scheduler.timesteps().to_vec();

        let device = Device::Cpu;
        // DDIM keeps no per-image state, so one scheduler serves every sample.
        for _ in 0..2 {
            let latents = Tensor::randn(0f32, 1f32, (1, 4, 8, 8), &device).unwrap();
            let mut latents = (latents * scheduler.init_noise_sigma()).unwrap();
            for &timestep in &timesteps {
                let guess = scheduler
                    .scale_model_input(latents.clone(), timestep)
                    .unwrap();
                latents = scheduler.step(&guess, timestep, &latents).unwrap();
            }
            assert_eq!(latents.dims(), &[1, 4, 8, 8]);
        }
    }

    #[test]
    fn local_weights_win_over_the_hub() {
        let dir = TempDir::new().unwrap();
        for name in ["tokenizer.json", "clip.safetensors", "unet.safetensors", "vae.safetensors"] {
            fs::write(dir.path().join(name), b"stub").unwrap();
        }

        let weights = DiffusionWeights::resolve(dir.path(), false).unwrap();

        assert_eq!(weights.tokenizer, dir.path().join("tokenizer.json"));
        assert_eq!(weights.clip, dir.path().join("clip.safetensors"));
        assert_eq!(weights.unet, dir.path().join("unet.safetensors"));
        assert_eq!(weights.vae, dir.path().join("vae.safetensors"));
    }
}
