use image::DynamicImage;
use imageproc::filter::filter3x3;

/// 3x3 sharpening kernel: center 32, neighbours -2, normalized by 16
const KERNEL: [f32; 9] = [
    -0.125, -0.125, -0.125, //
    -0.125, 2.0, -0.125, //
    -0.125, -0.125, -0.125,
];

/// Restore the edge contrast lost when upscaling
pub fn apply(image: DynamicImage) -> DynamicImage {
    let gray = image.to_luma8();
    let sharpened = filter3x3(&gray, &KERNEL);
    DynamicImage::ImageLuma8(sharpened)
}
