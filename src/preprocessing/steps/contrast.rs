use image::{DynamicImage, GrayImage, Luma};

/// Scale every pixel's distance from the mean intensity by `factor`
pub fn apply(image: DynamicImage, factor: f32) -> DynamicImage {
    let gray = image.to_luma8();
    let mean = mean_intensity(&gray);

    let enhanced = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let pixel = gray.get_pixel(x, y).0[0] as f32;
        let value = mean + factor * (pixel - mean);
        Luma([value.round().clamp(0.0, 255.0) as u8])
    });

    DynamicImage::ImageLuma8(enhanced)
}

/// Mean pixel value, rounded to the nearest intensity level
fn mean_intensity(img: &GrayImage) -> f32 {
    let count = img.width() as u64 * img.height() as u64;
    if count == 0 {
        return 0.0;
    }
    let sum: u64 = img.pixels().map(|p| p.0[0] as u64).sum();
    (sum as f64 / count as f64).round() as f32
}
