use serde::{Deserialize, Serialize};

/// Characters that survive the allow-list filter besides ASCII digits
const OPERATORS: [char; 4] = ['+', '-', '*', '/'];

/// Confusions seen with classical single-line OCR.
///
/// Hyphens and dashes are deleted, so this table never yields a subtraction.
const CLASSIC: &[(char, &str)] = &[
    ('{', "2"),
    ('(', "2"),
    ('[', "2"),
    ('|', "1"),
    ('i', "1"),
    ('l', "1"),
    ('o', "0"),
    ('O', "0"),
    ('s', "5"),
    ('z', "2"),
    ('S', "8"),
    ('B', "8"),
    ('g', "9"),
    ('G', "9"),
    ('x', "*"),
    ('×', "*"),
    ('=', ""),
    ('—', ""),
    ('-', ""),
    ('y', ""),
    ('Y', ""),
];

/// Confusions seen with learned captioning OCR, which keeps real minus signs
const LEARNED: &[(char, &str)] = &[
    ('×', "*"),
    ('x', "*"),
    ('X', "*"),
    ('–', "-"),
    ('—', "-"),
    ('÷', "/"),
    ('=', ""),
];

/// Fixed table mapping confusable recognized characters onto the
/// arithmetic alphabet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GlyphMap {
    /// Table for classical engines (Tesseract)
    #[default]
    Classic,
    /// Table for learned engines (ocrs, captioning models)
    Learned,
}

impl GlyphMap {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "classic" => Some(Self::Classic),
            "learned" => Some(Self::Learned),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classic => "classic",
            Self::Learned => "learned",
        }
    }

    pub fn substitutions(&self) -> &'static [(char, &'static str)] {
        match self {
            Self::Classic => CLASSIC,
            Self::Learned => LEARNED,
        }
    }

    /// Substitute, filter and collapse `text` into the arithmetic alphabet
    pub fn correct(&self, text: &str) -> String {
        collapse_operators(&filter_allowed(&self.substitute(text)))
    }

    /// Replace every mapped character by its canonical form.
    ///
    /// Lookup is by exact character, so `S` and `s` map independently.
    pub fn substitute(&self, text: &str) -> String {
        let table = self.substitutions();
        let mut out = String::with_capacity(text.len());
        for c in text.chars() {
            match table.iter().find(|(from, _)| *from == c) {
                Some((_, to)) => out.push_str(to),
                None => out.push(c),
            }
        }
        out
    }
}

/// Keep only ASCII digits and the four operators
pub fn filter_allowed(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii_digit() || OPERATORS.contains(c))
        .collect()
}

/// Collapse runs of `*` into a single `*`
pub fn collapse_operators(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c == '*' && out.ends_with('*') {
            continue;
        }
        out.push(c);
    }
    out
}
