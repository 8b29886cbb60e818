use regex::Regex;
use std::sync::OnceLock;

fn binary_expression() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"[0-9]+[-+*/][0-9]+").expect("invalid regex"))
}

/// Find the first `<digits><operator><digits>` substring.
///
/// Digit runs are greedy on both sides; anything after the right operand
/// (further operators included) is ignored.
pub fn find_expression(cleaned: &str) -> Option<&str> {
    binary_expression().find(cleaned).map(|m| m.as_str())
}
