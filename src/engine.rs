use crate::error::OcrError;
use crate::expression::GlyphMap;
use crate::preprocessing::Preset;
use image::DynamicImage;

/// Trait that all OCR engines must implement
pub trait OcrEngine: Send + Sync {
    /// Returns the engine identifier (e.g., "ocrs", "leptess")
    fn name(&self) -> &'static str;

    /// Returns a human-readable description of the engine
    fn description(&self) -> &'static str;

    /// Normalization preset this engine reads best
    fn preferred_preset(&self) -> Preset;

    /// Confusion table matching this engine's typical misreads
    fn preferred_glyph_map(&self) -> GlyphMap;

    /// Recognize the single line of text in a normalized image
    fn recognize(&self, image: &DynamicImage) -> Result<String, OcrError>;
}
