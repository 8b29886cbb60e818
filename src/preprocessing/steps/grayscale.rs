use image::DynamicImage;

/// Collapse to a single 8-bit intensity channel, dropping color and alpha
pub fn apply(image: DynamicImage) -> DynamicImage {
    match image {
        DynamicImage::ImageLuma8(_) => image,
        other => DynamicImage::ImageLuma8(other.to_luma8()),
    }
}
