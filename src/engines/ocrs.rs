//! OCRS engine implementation
//!
//! Pure Rust learned OCR engine using the ocrs library. No system
//! dependencies required. Downloads neural network models on first use.

use crate::config::Config;
use crate::engine::OcrEngine;
use crate::error::OcrError;
use crate::expression::GlyphMap;
use crate::preprocessing::Preset;
use image::DynamicImage;
use ocrs::{DecodeMethod, ImageSource, OcrEngine as OcrsOcrEngine, OcrEngineParams};
use rten::Model;

pub const NAME: &str = "ocrs";
pub const DESCRIPTION: &str = "Pure Rust learned OCR engine - no system dependencies required";

/// Default model URLs from the ocrs project
const DETECTION_MODEL_URL: &str =
    "https://ocrs-models.s3-accelerate.amazonaws.com/text-detection.rten";
const RECOGNITION_MODEL_URL: &str =
    "https://ocrs-models.s3-accelerate.amazonaws.com/text-recognition.rten";

/// OCR Engine wrapping the ocrs library
pub struct OcrsEngine {
    engine: OcrsOcrEngine,
}

impl OcrsEngine {
    /// Load the detection and recognition models, downloading them if needed
    pub fn new(_config: &Config) -> Result<Self, OcrError> {
        let engine = OcrsOcrEngine::new(OcrEngineParams {
            detection_model: Some(load_model(DETECTION_MODEL_URL, "text-detection.rten")?),
            recognition_model: Some(load_model(RECOGNITION_MODEL_URL, "text-recognition.rten")?),
            decode_method: DecodeMethod::Greedy,
            ..Default::default()
        })
        .map_err(|e| OcrError::InitializationError(format!("Failed to create ocrs engine: {}", e)))?;

        tracing::info!("ocrs engine initialized");

        Ok(Self { engine })
    }
}

fn load_model(url: &str, filename: &str) -> Result<Model, OcrError> {
    let path = super::ensure_downloaded(url, &super::cache_dir(), filename)?;
    Model::load_file(&path)
        .map_err(|e| OcrError::InitializationError(format!("Failed to load {}: {}", filename, e)))
}

impl OcrEngine for OcrsEngine {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        DESCRIPTION
    }

    fn preferred_preset(&self) -> Preset {
        Preset::Threshold
    }

    fn preferred_glyph_map(&self) -> GlyphMap {
        GlyphMap::Learned
    }

    /// Read the whole image; detected lines are joined with spaces
    fn recognize(&self, image: &DynamicImage) -> Result<String, OcrError> {
        let rgb = image.to_rgb8();
        let source = ImageSource::from_bytes(rgb.as_raw(), rgb.dimensions())
            .map_err(|e| OcrError::ProcessingError(format!("Invalid image layout: {}", e)))?;

        let input = self
            .engine
            .prepare_input(source)
            .map_err(|e| OcrError::ProcessingError(format!("Failed to prepare input: {}", e)))?;

        let text = self
            .engine
            .get_text(&input)
            .map_err(|e| OcrError::ProcessingError(format!("Failed to read text: {}", e)))?;

        Ok(text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" "))
    }
}
