//! Image normalization ahead of OCR
//!
//! CAPTCHA images are tiny and noisy. Every preset decodes to a single
//! intensity channel; the OCR presets then upscale, sharpen and either boost
//! contrast or binarize, depending on the engine that follows.

pub mod pipeline;
pub mod steps;

pub use pipeline::{Normalizer, Preset};
