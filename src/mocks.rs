use image::{GrayImage, Luma, Rgb, RgbImage, RgbaImage};
use parking_lot::Mutex;

use crate::compose::apply_matte;
use crate::diffusion::GenerationRequest;
use crate::errors::Result;
use crate::traits::{ForegroundMatting, TextToImage};

/// Test double that paints solid frames instead of sampling a diffusion
/// model. Remembers the last request so tests can inspect what the caller
/// asked for.
#[derive(Debug, Default)]
pub struct MockGenerator {
    last_request: Mutex<Option<GenerationRequest>>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.last_request.lock().clone()
    }
}

impl TextToImage for MockGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<Vec<RgbImage>> {
        request.validate()?;
        *self.last_request.lock() = Some(request.clone());
        let images = (0..request.count)
            .map(|index| {
                // Distinct shade per frame so callers can tell them apart.
                let shade = (40 + index * 40 % 200) as u8;
                RgbImage::from_pixel(request.width, request.height, Rgb([shade, shade, shade]))
            })
            .collect();
        Ok(images)
    }
}

/// Test double that stamps a fully opaque matte onto the input.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockMatting;

impl MockMatting {
    pub const fn new() -> Self {
        Self
    }
}

impl ForegroundMatting for MockMatting {
    fn remove_background(&self, image: &RgbImage) -> Result<RgbaImage> {
        let matte = GrayImage::from_pixel(image.width(), image.height(), Luma([255]));
        apply_matte(image, &matte)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn generator_honors_the_requested_count_and_size() -> Result<()> {
        let mock = MockGenerator::new();
        let mut request = GenerationRequest::new("a house");
        request.width = 64;
        request.height = 32;

        let images = mock.generate(&request)?;

        assert_eq!(images.len(), request.count);
        assert!(images.iter().all(|i| i.dimensions() == (64, 32)));
        assert_eq!(mock.last_request().map(|r| r.prompt), Some("a house".to_string()));
        Ok(())
    }

    #[test]
    fn generator_still_validates_requests() {
        let mock = MockGenerator::new();
        let mut request = GenerationRequest::new("a house");
        request.count = 0;
        assert!(mock.generate(&request).is_err());
        assert!(mock.last_request().is_none());
    }

    #[test]
    fn matting_mock_produces_an_opaque_cutout() -> Result<()> {
        let image = RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]));
        let cutout = MockMatting::new().remove_background(&image)?;
        assert_eq!(*cutout.get_pixel(2, 2), Rgba([1, 2, 3, 255]));
        Ok(())
    }
}
