//! Leptess/Tesseract engine implementation
//!
//! Classical OCR through a statically linked Tesseract, run in single text
//! line mode. Downloads tessdata on first use unless a tessdata directory
//! is configured.

use crate::config::Config;
use crate::engine::OcrEngine;
use crate::error::OcrError;
use crate::expression::GlyphMap;
use crate::preprocessing::Preset;
use image::DynamicImage;
use tesseract_static::tesseract::Tesseract;

pub const NAME: &str = "leptess";
pub const DESCRIPTION: &str = "Tesseract OCR engine in single-line mode";

/// Tesseract page segmentation mode 7: treat the image as one text line
const SINGLE_LINE_PSM: &str = "7";

/// Tesseract OCR Engine
pub struct LeptessEngine {
    /// Path to tessdata directory
    tessdata_path: String,
    language: String,
}

impl LeptessEngine {
    pub fn new(config: &Config) -> Result<Self, OcrError> {
        let language = config.default_language.clone();

        let tessdata_path = match &config.tessdata_path {
            Some(path) => path.clone(),
            None => ensure_tessdata_available(&language)?,
        };

        // Fail at startup rather than on the first request
        Tesseract::new(Some(&tessdata_path), Some(&language)).map_err(|e| {
            OcrError::InitializationError(format!("Failed to initialize Tesseract: {}", e))
        })?;

        tracing::info!(
            "Leptess engine initialized (tessdata: {}, language: {})",
            tessdata_path,
            language
        );

        Ok(Self {
            tessdata_path,
            language,
        })
    }
}

impl OcrEngine for LeptessEngine {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        DESCRIPTION
    }

    fn preferred_preset(&self) -> Preset {
        Preset::Contrast
    }

    fn preferred_glyph_map(&self) -> GlyphMap {
        GlyphMap::Classic
    }

    fn recognize(&self, image: &DynamicImage) -> Result<String, OcrError> {
        let (width, height) = (image.width(), image.height());

        // BMP is always supported by leptonica
        let mut bmp_data = Vec::new();
        image
            .to_rgb8()
            .write_to(&mut std::io::Cursor::new(&mut bmp_data), image::ImageFormat::Bmp)
            .map_err(|e| OcrError::ProcessingError(format!("Failed to convert to BMP: {}", e)))?;

        tracing::debug!(
            "Recognizing image: {}x{}, BMP size: {} bytes",
            width,
            height,
            bmp_data.len()
        );

        let tess = Tesseract::new(Some(&self.tessdata_path), Some(&self.language))
            .map_err(|e| OcrError::ProcessingError(format!("Failed to create Tesseract: {}", e)))?
            .set_variable("tessedit_pageseg_mode", SINGLE_LINE_PSM)
            .map_err(|e| OcrError::ProcessingError(format!("Failed to set page mode: {}", e)))?;

        let mut tess = tess.set_image_from_mem(&bmp_data).map_err(|e| {
            OcrError::ProcessingError(format!(
                "Failed to set image ({}x{}, {} bytes): {}",
                width,
                height,
                bmp_data.len(),
                e
            ))
        })?;

        tess = tess
            .recognize()
            .map_err(|e| OcrError::ProcessingError(format!("Failed to recognize text: {}", e)))?;

        tess.get_text()
            .map_err(|e| OcrError::ProcessingError(format!("Failed to get text: {}", e)))
    }
}

/// Ensure tessdata is available in the cache, downloading if needed
fn ensure_tessdata_available(language: &str) -> Result<String, OcrError> {
    let cache_dir = super::cache_dir().join("tessdata");
    let filename = format!("{}.traineddata", language);

    // Use tessdata_fast for smaller, faster downloads
    let url = format!(
        "https://github.com/tesseract-ocr/tessdata_fast/raw/main/{}",
        filename
    );
    super::ensure_downloaded(&url, &cache_dir, &filename)?;

    // Tesseract expects the directory, not the file
    cache_dir
        .to_str()
        .map(|s| s.to_string())
        .ok_or_else(|| OcrError::InitializationError("Invalid tessdata path".to_string()))
}
