//! Recovery of an arithmetic expression from noisy OCR text
//!
//! Recognized text is coerced onto the alphabet `0-9 + - * /` through a
//! fixed confusion table, the first binary operation is extracted, and a
//! closed-form two-operand evaluator computes its value.

pub mod eval;
pub mod glyph;
pub mod parser;

pub use eval::{evaluate, EvalError, Value};
pub use glyph::GlyphMap;

use parser::find_expression;

/// Text after correction, with the extracted expression if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovery {
    pub cleaned: String,
    pub expression: Option<String>,
}

/// Correct `raw` with `map` and extract the first binary operation
pub fn recover(raw: &str, map: GlyphMap) -> Recovery {
    let cleaned = map.correct(raw);
    let expression = find_expression(&cleaned).map(str::to_string);
    Recovery {
        cleaned,
        expression,
    }
}
