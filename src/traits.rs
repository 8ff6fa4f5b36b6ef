use image::{RgbImage, RgbaImage};

use crate::diffusion::GenerationRequest;
use crate::errors::Result;

/// Text-to-image model boundary.
///
/// Generation stays behind this seam so the pipeline and its tests never
/// depend on model weights being present; the real implementation wires the
/// diffusion library, the mock returns synthetic bitmaps.
pub trait TextToImage: Send + Sync {
    /// Render `request.count` bitmaps for the request's prompt.
    fn generate(&self, request: &GenerationRequest) -> Result<Vec<RgbImage>>;
}

/// Background-removal model boundary.
///
/// Implementations extract the salient foreground and return the source
/// pixels with a matte attached as the alpha channel.
pub trait ForegroundMatting: Send + Sync {
    fn remove_background(&self, image: &RgbImage) -> Result<RgbaImage>;
}

impl<G: TextToImage + ?Sized> TextToImage for &G {
    fn generate(&self, request: &GenerationRequest) -> Result<Vec<RgbImage>> {
        (**self).generate(request)
    }
}

impl<M: ForegroundMatting + ?Sized> ForegroundMatting for &M {
    fn remove_background(&self, image: &RgbImage) -> Result<RgbaImage> {
        (**self).remove_background(image)
    }
}
