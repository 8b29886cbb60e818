//! Individual normalization steps

pub mod contrast;
pub mod grayscale;
pub mod sharpen;
pub mod threshold;
pub mod upscale;
