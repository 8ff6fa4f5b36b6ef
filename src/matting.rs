use std::io;
use std::path::{Path, PathBuf};

use image::{imageops, imageops::FilterType, GrayImage, ImageBuffer, Luma, RgbImage, RgbaImage};
use log::debug;
use ndarray::prelude::*;
use nshare::AsNdarray3;
use ort::value::TensorRef;
use ort::{
    execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::SessionBuilder, Session},
};
use parking_lot::Mutex;

use crate::{
    compose::apply_matte,
    errors::{PromoGenError, Result},
    traits::ForegroundMatting,
};

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Tuning knobs for the matting stage.
///
/// `input_size` must match the network; the stock u2net.onnx takes 320.
/// Matte values scaled above `foreground_threshold` snap to fully opaque,
/// values below `background_threshold` to fully transparent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MattingConfig {
    pub input_size: u32,
    pub foreground_threshold: u8,
    pub background_threshold: u8,
}

impl Default for MattingConfig {
    fn default() -> Self {
        Self {
            input_size: 320,
            foreground_threshold: 240,
            background_threshold: 10,
        }
    }
}

/// Where the stock model lives when no path is given on the command line.
pub fn default_model_path() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".u2net").join("u2net.onnx"))
        .ok_or_else(|| PromoGenError::Configuration {
            message: "home directory unavailable, pass an explicit matting model path".to_string(),
        })
}

/// U2-Net salient object matting through an ONNX Runtime session.
pub struct U2NetMatting {
    config: MattingConfig,
    input_name: String,
    output_name: String,
    session: Mutex<Session>,
}

impl U2NetMatting {
    pub fn new(model_path: &Path, device_id: i32, config: MattingConfig) -> Result<Self> {
        if !model_path.is_file() {
            return Err(PromoGenError::model(
                format!("load matting model from {}", model_path.display()),
                io::Error::new(
                    io::ErrorKind::NotFound,
                    "model file not found; place u2net.onnx there or pass --matting-model",
                ),
            ));
        }

        let mut session = SessionBuilder::new()
            .map_err(|e| PromoGenError::Model {
                operation: "session builder initialization".to_string(),
                source: Box::new(e),
            })?
            .with_execution_providers([
                TensorRTExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
            ])
            .map_err(|e| PromoGenError::Model {
                operation: "execution provider registration".to_string(),
                source: Box::new(e),
            })?
            .with_memory_pattern(true)
            .map_err(|e| PromoGenError::Model {
                operation: "memory pattern configuration".to_string(),
                source: Box::new(e),
            })?
            .commit_from_file(model_path)
            .map_err(|e| PromoGenError::Model {
                operation: format!("model file loading: {}", model_path.display()),
                source: Box::new(e),
            })?;

        let input_name = session.inputs[0].name.clone();
        let output_name = session.outputs[0].name.clone();
        debug!("matting session ready, input `{input_name}`, output `{output_name}`");

        // initialize model
        let size = config.input_size as usize;
        let data = Array4::<f32>::zeros((1, 3, size, size));
        session
            .run(ort::inputs![input_name.as_str() => TensorRef::from_array_view(&data).map_err(|e| PromoGenError::Model {
                operation: "warmup tensor creation".to_string(),
                source: Box::new(e),
            })?])
            .map_err(|e| PromoGenError::Model {
                operation: "model warmup run".to_string(),
                source: Box::new(e),
            })?;

        Ok(Self {
            config,
            input_name,
            output_name,
            session: Mutex::new(session),
        })
    }

    pub fn with_defaults(model_path: &Path, device_id: i32) -> Result<Self> {
        Self::new(model_path, device_id, MattingConfig::default())
    }

    pub fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>> {
        let mut binding = self.session.lock();
        let outputs = binding.run(
            ort::inputs![self.input_name.as_str() => TensorRef::from_array_view(&tensor.as_standard_layout())?],
        )?;
        Ok(outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?
            .to_owned())
    }
}

impl ForegroundMatting for U2NetMatting {
    fn remove_background(&self, image: &RgbImage) -> Result<RgbaImage> {
        let tensor = preprocess(image, self.config.input_size)?;
        let mask = self.predict(tensor.view())?;
        let (width, height) = image.dimensions();
        let matte = postprocess(mask, width, height, &self.config)?;
        apply_matte(image, &matte)
    }
}

/// Resize to the network size and normalize: scale by the image peak, then
/// shift by the ImageNet channel statistics.
pub fn preprocess(image: &RgbImage, input_size: u32) -> Result<Array4<f32>> {
    let resized = imageops::resize(image, input_size, input_size, FilterType::Lanczos3);
    let tensor = resized.as_ndarray3().mapv(f32::from);

    let peak = tensor.fold(0.0f32, |max, &v| max.max(v));
    let tensor = if peak > 0.0 { tensor / peak } else { tensor };

    let mean = Array3::from_shape_vec((3, 1, 1), IMAGENET_MEAN.to_vec())?;
    let std = Array3::from_shape_vec((3, 1, 1), IMAGENET_STD.to_vec())?;
    Ok(((tensor - mean) / std).insert_axis(Axis(0)))
}

/// Turn the raw network output into an 8-bit matte at the original image
/// size: min-max normalize, resize back, then snap the near-certain pixels.
pub fn postprocess(
    mask: Array4<f32>,
    width: u32,
    height: u32,
    config: &MattingConfig,
) -> Result<GrayImage> {
    let (min, max) = mask
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = if max > min { max - min } else { 1.0 };
    let mask = mask.mapv(|v| (v - min) / range);

    let size = config.input_size;
    let mask: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_raw(size, size, mask.into_raw_vec_and_offset().0).ok_or_else(|| {
            PromoGenError::Model {
                operation: "matte buffer construction".to_string(),
                source: Box::new(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "output tensor does not match the configured input size",
                )),
            }
        })?;
    let mask = imageops::resize(&mask, width, height, FilterType::Lanczos3);

    Ok(shape_matte(&mask, config))
}

fn shape_matte(mask: &ImageBuffer<Luma<f32>, Vec<f32>>, config: &MattingConfig) -> GrayImage {
    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        let Luma([alpha]) = *mask.get_pixel(x, y);
        let scaled = (alpha * 255.0).clamp(0.0, 255.0) as u8;
        if scaled >= config.foreground_threshold {
            Luma([255])
        } else if scaled <= config.background_threshold {
            Luma([0])
        } else {
            Luma([scaled])
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn preprocess_yields_a_batched_chw_tensor() {
        let image: RgbImage = ImageBuffer::from_pixel(64, 32, Rgb([128, 128, 128]));
        let tensor = preprocess(&image, 32).unwrap();
        assert_eq!(tensor.shape(), &[1, 3, 32, 32]);
    }

    #[test]
    fn preprocess_applies_imagenet_statistics() {
        let image: RgbImage = ImageBuffer::from_pixel(8, 8, Rgb([255, 255, 255]));
        let tensor = preprocess(&image, 8).unwrap();
        // Peak scaling maps white to 1.0 before the channel shift.
        for (channel, (mean, std)) in IMAGENET_MEAN.iter().zip(&IMAGENET_STD).enumerate() {
            let expected = (1.0 - mean) / std;
            assert!((tensor[[0, channel, 4, 4]] - expected).abs() < 1e-5);
        }
    }

    #[test]
    fn preprocess_survives_an_all_black_image() {
        let image: RgbImage = ImageBuffer::from_pixel(8, 8, Rgb([0, 0, 0]));
        let tensor = preprocess(&image, 8).unwrap();
        assert!(tensor.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn uniform_network_output_becomes_an_empty_matte() {
        let mask = Array4::from_elem((1, 1, 4, 4), 0.7f32);
        let matte = postprocess(mask, 4, 4, &MattingConfig {
            input_size: 4,
            ..MattingConfig::default()
        })
        .unwrap();
        assert!(matte.pixels().all(|p| p.0 == [0]));
    }

    #[test]
    fn matte_shaping_snaps_confident_pixels() {
        let config = MattingConfig::default();
        let raw = ImageBuffer::from_fn(4, 1, |x, _| match x {
            0 => Luma([0.0f32]),
            1 => Luma([0.03]),
            2 => Luma([0.5]),
            _ => Luma([0.97]),
        });

        let shaped = shape_matte(&raw, &config);

        assert_eq!(shaped.get_pixel(0, 0).0, [0]);
        assert_eq!(shaped.get_pixel(1, 0).0, [0], "7 is under the background threshold");
        assert_eq!(shaped.get_pixel(2, 0).0, [127]);
        assert_eq!(shaped.get_pixel(3, 0).0, [255], "247 is over the foreground threshold");
    }

    #[test]
    fn default_model_path_points_into_the_home_directory() {
        if dirs::home_dir().is_none() {
            return;
        }
        let path = default_model_path().unwrap();
        assert!(path.ends_with(Path::new(".u2net").join("u2net.onnx")));
    }
}
