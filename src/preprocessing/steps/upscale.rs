use image::{imageops::FilterType, DynamicImage, GenericImageView};

/// Upper bound on the upscaled image side
const MAX_DIMENSION: u32 = 4000;

/// Upscale by a whole factor using cubic interpolation.
///
/// The factor is reduced when the result would exceed `MAX_DIMENSION`.
pub fn apply(image: DynamicImage, factor: u32) -> DynamicImage {
    let (width, height) = image.dimensions();
    let longest = width.max(height).max(1);
    let factor = factor.min(MAX_DIMENSION / longest);

    if factor <= 1 {
        return image;
    }

    image.resize_exact(width * factor, height * factor, FilterType::CatmullRom)
}
