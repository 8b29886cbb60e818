//! Per-site CAPTCHA targets
//!
//! Each deployment target is one record in a TOML file: where its CAPTCHA
//! lives, which headers to send, how to read it and where to submit the
//! solved code. `${VAR}` references in header values and static form fields
//! are resolved from the environment at load time, so cookies and tokens
//! never live in the file itself.

use crate::error::PipelineError;
use crate::expression::GlyphMap;
use crate::preprocessing::Preset;
use crate::solver::SolveOptions;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read targets file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse targets file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Target {target}: environment variable {var} is not set")]
    MissingEnv { target: String, var: String },

    #[error("Target {target}: invalid pattern {pattern:?}: {message}")]
    Pattern {
        target: String,
        pattern: String,
        message: String,
    },

    #[error("Target {target}: invalid URL {url:?}: {source}")]
    Url {
        target: String,
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Target {target}: needs either captcha_url or page.captcha_pattern")]
    MissingCaptchaSource { target: String },
}

#[derive(Debug, Deserialize)]
struct TargetsFile {
    #[serde(default)]
    targets: BTreeMap<String, TargetConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct TargetConfig {
    captcha_url: Option<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    glyph_map: Option<GlyphMap>,
    preset: Option<Preset>,
    engine: Option<String>,
    page: Option<PageConfig>,
    submit: Option<SubmitConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct PageConfig {
    url: String,
    csrf_pattern: Option<String>,
    captcha_pattern: Option<String>,
    #[serde(default = "default_csrf_field")]
    csrf_field: String,
}

fn default_csrf_field() -> String {
    "_csrf".to_string()
}

/// How a target's submit endpoint answers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    /// `{"status": true, "result": ...}` style JSON
    #[default]
    Json,
    /// A PDF document on success, anything else on failure
    Pdf,
}

/// Form submission settings of a target
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmitConfig {
    pub url: String,
    /// Form field receiving the solved code
    pub code_field: String,
    #[serde(default)]
    pub response: ResponseKind,
    /// Caller identity key -> form field name
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    /// Form fields sent as-is on every submission
    #[serde(default)]
    pub static_fields: BTreeMap<String, String>,
    /// Attachment name for PDF replies
    pub filename: Option<String>,
}

/// Page fetched before the CAPTCHA to scrape a CSRF token and the image URL
#[derive(Debug, Clone)]
pub struct Page {
    pub url: Url,
    pub csrf_field: String,
    csrf: Option<Regex>,
    captcha: Option<Regex>,
}

/// Values scraped from a target's page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTokens {
    pub csrf: Option<String>,
    pub captcha_url: Option<String>,
}

impl Page {
    /// Extract the CSRF token and CAPTCHA URL from the page's HTML.
    ///
    /// A configured CSRF pattern that matches nothing is an error.
    pub fn scrape(&self, html: &str) -> Result<PageTokens, PipelineError> {
        let capture = |re: &Option<Regex>| {
            re.as_ref()
                .and_then(|re| re.captures(html))
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().replace("&amp;", "&"))
        };

        let csrf = capture(&self.csrf);
        if self.csrf.is_some() && csrf.is_none() {
            return Err(PipelineError::Download(format!(
                "CSRF token not found on page {}",
                self.url
            )));
        }

        let captcha_url = capture(&self.captcha)
            .map(|src| {
                self.url.join(&src).map(String::from).map_err(|e| {
                    PipelineError::Download(format!("Invalid CAPTCHA src {:?}: {}", src, e))
                })
            })
            .transpose()?;

        Ok(PageTokens { csrf, captcha_url })
    }
}

/// A validated target with secrets resolved
#[derive(Debug, Clone)]
pub struct Target {
    pub name: String,
    pub captcha_url: Option<String>,
    pub headers: Vec<(String, String)>,
    pub glyph_map: Option<GlyphMap>,
    pub preset: Option<Preset>,
    pub engine: Option<String>,
    pub page: Option<Page>,
    pub submit: Option<SubmitConfig>,
}

impl Target {
    pub fn solve_options(&self) -> SolveOptions {
        SolveOptions {
            engine: self.engine.clone(),
            preset: self.preset,
            glyph_map: self.glyph_map,
        }
    }

    fn compile(
        name: &str,
        config: TargetConfig,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let headers = config
            .headers
            .into_iter()
            .map(|(k, v)| Ok((k, interpolate(&v, name, lookup)?)))
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let page = config
            .page
            .map(|page| -> Result<Page, ConfigError> {
                let url = Url::parse(&page.url).map_err(|source| ConfigError::Url {
                    target: name.to_string(),
                    url: page.url.clone(),
                    source,
                })?;
                Ok(Page {
                    url,
                    csrf_field: page.csrf_field,
                    csrf: compile_pattern(name, page.csrf_pattern)?,
                    captcha: compile_pattern(name, page.captcha_pattern)?,
                })
            })
            .transpose()?;

        let has_page_captcha = page.as_ref().map(|p| p.captcha.is_some()).unwrap_or(false);
        if config.captcha_url.is_none() && !has_page_captcha {
            return Err(ConfigError::MissingCaptchaSource {
                target: name.to_string(),
            });
        }

        let submit = config
            .submit
            .map(|mut submit| -> Result<SubmitConfig, ConfigError> {
                for value in submit.static_fields.values_mut() {
                    *value = interpolate(value, name, lookup)?;
                }
                Ok(submit)
            })
            .transpose()?;

        Ok(Self {
            name: name.to_string(),
            captcha_url: config.captcha_url,
            headers,
            glyph_map: config.glyph_map,
            preset: config.preset,
            engine: config.engine,
            page,
            submit,
        })
    }
}

/// All configured targets, by name
#[derive(Debug, Default)]
pub struct TargetRegistry {
    targets: BTreeMap<String, Target>,
}

impl TargetRegistry {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content, &|var: &str| std::env::var(var).ok())
    }

    pub fn from_toml(
        content: &str,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let file: TargetsFile = toml::from_str(content)?;

        let targets = file
            .targets
            .into_iter()
            .map(|(name, config)| Ok((name.clone(), Target::compile(&name, config, lookup)?)))
            .collect::<Result<BTreeMap<_, _>, ConfigError>>()?;

        Ok(Self { targets })
    }

    pub fn get(&self, name: &str) -> Option<&Target> {
        self.targets.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.targets.keys().cloned().collect()
    }
}

fn env_reference() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("invalid regex"))
}

/// Replace `${VAR}` references with their values
fn interpolate(
    value: &str,
    target: &str,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(value.len());
    let mut last = 0;

    for caps in env_reference().captures_iter(value) {
        let whole = caps.get_match();
        let var = &caps[1];
        let resolved = lookup(var).ok_or_else(|| ConfigError::MissingEnv {
            target: target.to_string(),
            var: var.to_string(),
        })?;
        out.push_str(&value[last..whole.start()]);
        out.push_str(&resolved);
        last = whole.end();
    }

    out.push_str(&value[last..]);
    Ok(out)
}

fn compile_pattern(target: &str, pattern: Option<String>) -> Result<Option<Regex>, ConfigError> {
    let Some(pattern) = pattern else {
        return Ok(None);
    };

    let re = Regex::new(&pattern).map_err(|e| ConfigError::Pattern {
        target: target.to_string(),
        pattern: pattern.clone(),
        message: e.to_string(),
    })?;

    if re.captures_len() < 2 {
        return Err(ConfigError::Pattern {
            target: target.to_string(),
            pattern,
            message: "needs one capture group".to_string(),
        });
    }

    Ok(Some(re))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGETS: &str = r#"
[targets.pm]
captcha_url = "https://portal.example/site/captcha"
glyph_map = "learned"
preset = "threshold"
headers = { Referer = "https://portal.example/uz", Cookie = "session=${PM_SESSION}" }

[targets.pm.submit]
url = "https://portal.example/api/person-data"
code_field = "verify_code"
fields = { passport_serial = "person_passport_seria", birth_date = "person_birth_date" }
static_fields = { document_type = "passport", is_consent = "1" }

[targets.exam]
headers = { "User-Agent" = "Mozilla/5.0" }

[targets.exam.page]
url = "https://exam.example/allow/answer"
csrf_pattern = 'name="_csrf" value="([^"]+)"'
captcha_pattern = '<img id="my-captcha-image" src="([^"]+)"'

[targets.exam.submit]
url = "https://exam.example/allow/answer"
code_field = "Allow[verifyCode]"
response = "pdf"
filename = "dtm-result.pdf"
"#;

    fn env(var: &str) -> Option<String> {
        match var {
            "PM_SESSION" => Some("abc123".to_string()),
            _ => None,
        }
    }

    #[test]
    fn test_load_targets() {
        let registry = TargetRegistry::from_toml(TARGETS, &env).unwrap();
        assert_eq!(registry.names(), vec!["exam", "pm"]);

        let pm = registry.get("pm").unwrap();
        assert_eq!(pm.glyph_map, Some(GlyphMap::Learned));
        assert_eq!(pm.preset, Some(Preset::Threshold));
        assert!(pm
            .headers
            .contains(&("Cookie".to_string(), "session=abc123".to_string())));

        let submit = pm.submit.as_ref().unwrap();
        assert_eq!(submit.response, ResponseKind::Json);
        assert_eq!(submit.fields["passport_serial"], "person_passport_seria");

        let exam = registry.get("exam").unwrap();
        assert!(exam.captcha_url.is_none());
        assert_eq!(exam.page.as_ref().unwrap().csrf_field, "_csrf");
        assert_eq!(exam.submit.as_ref().unwrap().response, ResponseKind::Pdf);
        assert_eq!(exam.submit.as_ref().unwrap().filename.as_deref(), Some("dtm-result.pdf"));
        assert!(pm.submit.as_ref().unwrap().filename.is_none());
    }

    #[test]
    fn test_missing_env_is_rejected() {
        let result = TargetRegistry::from_toml(TARGETS, &|_: &str| None);
        assert!(matches!(
            result,
            Err(ConfigError::MissingEnv { ref target, ref var }) if target == "pm" && var == "PM_SESSION"
        ));
    }

    #[test]
    fn test_target_needs_captcha_source() {
        let result = TargetRegistry::from_toml("[targets.empty]\n", &env);
        assert!(matches!(result, Err(ConfigError::MissingCaptchaSource { .. })));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let result = TargetRegistry::from_toml(
            "[targets.x]\ncaptcha_url = \"http://x/c\"\ncaptcha_ur1 = \"typo\"\n",
            &env,
        );
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_pattern_without_group_is_rejected() {
        let toml = "[targets.x]\n[targets.x.page]\nurl = \"http://x/\"\ncaptcha_pattern = \"<img>\"\n";
        assert!(matches!(
            TargetRegistry::from_toml(toml, &env),
            Err(ConfigError::Pattern { .. })
        ));
    }

    #[test]
    fn test_interpolate() {
        assert_eq!(interpolate("a=${PM_SESSION}; b=1", "t", &env).unwrap(), "a=abc123; b=1");
        assert_eq!(interpolate("no refs $HOME", "t", &env).unwrap(), "no refs $HOME");
    }

    fn exam_page() -> Page {
        let registry = TargetRegistry::from_toml(TARGETS, &env).unwrap();
        registry.get("exam").unwrap().page.clone().unwrap()
    }

    fn with_captcha(src: &str) -> String {
        format!(
            r#"<input type="hidden" name="_csrf" value="tok-1=="/><img id="my-captcha-image" src="{}">"#,
            src
        )
    }

    #[test]
    fn test_scrape_page() {
        let tokens = exam_page()
            .scrape(&with_captcha("/site/captcha?v=1&amp;r=2"))
            .unwrap();

        assert_eq!(tokens.csrf.as_deref(), Some("tok-1=="));
        assert_eq!(
            tokens.captcha_url.as_deref(),
            Some("https://exam.example/site/captcha?v=1&r=2")
        );
    }

    #[test]
    fn test_scrape_requires_configured_csrf() {
        let result = exam_page().scrape(r#"<img id="my-captcha-image" src="/site/captcha">"#);
        assert!(matches!(result, Err(PipelineError::Download(message)) if message.contains("CSRF")));
    }

    #[test]
    fn test_scrape_without_csrf_pattern() {
        let toml = r#"
[targets.x.page]
url = "https://x.example/form"
captcha_pattern = '<img src="([^"]+)"'
"#;
        let registry = TargetRegistry::from_toml(toml, &env).unwrap();
        let page = registry.get("x").unwrap().page.clone().unwrap();

        let tokens = page.scrape("<html></html>").unwrap();
        assert_eq!(tokens, PageTokens { csrf: None, captcha_url: None });
    }

    #[test]
    fn test_captcha_src_is_resolved_against_page() {
        let toml = r#"
[targets.x.page]
url = "https://exam.example/allow/answer?next=/a/b"
captcha_pattern = '<img id="my-captcha-image" src="([^"]+)"'
"#;
        let registry = TargetRegistry::from_toml(toml, &env).unwrap();
        let page = registry.get("x").unwrap().page.clone().unwrap();
        let resolve = |src: &str| page.scrape(&with_captcha(src)).unwrap().captcha_url.unwrap();

        assert_eq!(resolve("captcha.png"), "https://exam.example/allow/captcha.png");
        assert_eq!(resolve("../site/captcha"), "https://exam.example/site/captcha");
        assert_eq!(resolve("?v=2"), "https://exam.example/allow/answer?v=2");
        assert_eq!(resolve("//cdn.example/c.png"), "https://cdn.example/c.png");
        assert_eq!(resolve("https://cdn.example/c.png"), "https://cdn.example/c.png");
    }

    #[test]
    fn test_unresolvable_captcha_src() {
        let result = exam_page().scrape(&with_captcha("http://[broken/c.png"));
        assert!(matches!(result, Err(PipelineError::Download(_))));
    }

    #[test]
    fn test_invalid_page_url_is_rejected() {
        let toml = "[targets.x.page]\nurl = \"not a url\"\ncaptcha_pattern = '<img src=\"([^\"]+)\"'\n";
        assert!(matches!(
            TargetRegistry::from_toml(toml, &env),
            Err(ConfigError::Url { .. })
        ));
    }
}
