use image::{DynamicImage, GrayImage, Luma};

/// Side of the square neighbourhood used for the local mean
const BLOCK_SIZE: u32 = 11;
/// Subtracted from the local mean before comparing
const C: f64 = 3.0;

/// Mean-based adaptive thresholding with inverted output.
///
/// A pixel brighter than `local_mean - C` becomes black, everything else
/// white, so dark glyphs on a light background come out white on black.
pub fn apply(image: DynamicImage) -> DynamicImage {
    let gray = image.to_luma8();
    DynamicImage::ImageLuma8(mean_threshold_inv(&gray, BLOCK_SIZE, C))
}

fn mean_threshold_inv(img: &GrayImage, block_size: u32, c: f64) -> GrayImage {
    let (width, height) = img.dimensions();
    let half = block_size as i64 / 2;
    let integral = compute_integral_image(img);

    GrayImage::from_fn(width, height, |x, y| {
        let x1 = (x as i64 - half).max(0) as usize;
        let y1 = (y as i64 - half).max(0) as usize;
        let x2 = (x as i64 + half).min(width as i64 - 1) as usize + 1;
        let y2 = (y as i64 + half).min(height as i64 - 1) as usize + 1;

        let area = ((x2 - x1) * (y2 - y1)) as f64;
        let sum = integral[y2][x2] - integral[y1][x2] - integral[y2][x1] + integral[y1][x1];
        let threshold = sum / area - c;

        if img.get_pixel(x, y).0[0] as f64 > threshold {
            Luma([0u8])
        } else {
            Luma([255u8])
        }
    })
}

/// Summed-area table with a zero first row and column
fn compute_integral_image(img: &GrayImage) -> Vec<Vec<f64>> {
    let (width, height) = img.dimensions();
    let mut integral = vec![vec![0.0f64; width as usize + 1]; height as usize + 1];

    for y in 0..height as usize {
        for x in 0..width as usize {
            let val = img.get_pixel(x as u32, y as u32).0[0] as f64;
            integral[y + 1][x + 1] = val + integral[y][x + 1] + integral[y + 1][x] - integral[y][x];
        }
    }

    integral
}
