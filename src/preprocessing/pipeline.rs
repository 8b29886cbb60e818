use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::steps;

/// Upscale factor ahead of classical OCR
const CONTRAST_UPSCALE: u32 = 2;
/// Upscale factor ahead of learned OCR
const THRESHOLD_UPSCALE: u32 = 3;
/// Multiplier applied around the mean intensity
const CONTRAST_FACTOR: f32 = 3.0;

/// Normalization preset names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// Grayscale only
    None,
    /// Steps: grayscale, upscale x2, sharpen, contrast x3
    Contrast,
    /// Steps: grayscale, upscale x3, sharpen, inverse mean threshold
    Threshold,
}

impl Preset {
    /// Parse from a query parameter or config value
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "none" => Some(Self::None),
            "contrast" => Some(Self::Contrast),
            "threshold" => Some(Self::Threshold),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Contrast => "contrast",
            Self::Threshold => "threshold",
        }
    }

    pub fn all() -> [Preset; 3] {
        [Self::None, Self::Contrast, Self::Threshold]
    }
}

/// Timing information for a single normalization step
#[derive(Debug, Clone, Serialize)]
pub struct StepTiming {
    pub name: String,
    pub time_ms: u64,
}

/// Normalized image with timing stats
#[derive(Debug, Clone)]
pub struct Normalized {
    pub image: DynamicImage,
    pub preset: Preset,
    pub total_time_ms: u64,
    pub steps: Vec<StepTiming>,
}

/// Applies the steps of a preset in a fixed order
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    preset: Preset,
}

impl Normalizer {
    pub fn new(preset: Preset) -> Self {
        Self { preset }
    }

    pub fn process(&self, image: DynamicImage) -> Normalized {
        let start = Instant::now();
        let mut timings = Vec::new();

        let mut img = run_step("grayscale", image, &mut timings, steps::grayscale::apply);

        let upscale = match self.preset {
            Preset::None => {
                return Normalized {
                    image: img,
                    preset: self.preset,
                    total_time_ms: start.elapsed().as_millis() as u64,
                    steps: timings,
                };
            }
            Preset::Contrast => CONTRAST_UPSCALE,
            Preset::Threshold => THRESHOLD_UPSCALE,
        };

        img = run_step("upscale", img, &mut timings, |i| {
            steps::upscale::apply(i, upscale)
        });
        img = run_step("sharpen", img, &mut timings, steps::sharpen::apply);

        img = match self.preset {
            Preset::Threshold => run_step("threshold", img, &mut timings, steps::threshold::apply),
            _ => run_step("contrast", img, &mut timings, |i| {
                steps::contrast::apply(i, CONTRAST_FACTOR)
            }),
        };

        Normalized {
            image: img,
            preset: self.preset,
            total_time_ms: start.elapsed().as_millis() as u64,
            steps: timings,
        }
    }
}

fn run_step<F>(name: &str, img: DynamicImage, timings: &mut Vec<StepTiming>, step_fn: F) -> DynamicImage
where
    F: FnOnce(DynamicImage) -> DynamicImage,
{
    let step_start = Instant::now();
    let result = step_fn(img);
    timings.push(StepTiming {
        name: name.to_string(),
        time_ms: step_start.elapsed().as_millis() as u64,
    });
    result
}
