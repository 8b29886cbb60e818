//! Expression recovery pipeline
//!
//! download -> decode -> normalize -> recognize -> correct -> extract -> evaluate
//!
//! Every failure is converted into a `SolveOutcome` here; callers never see
//! a `PipelineError` directly.

use crate::acquire::{HttpSession, RawImage};
use crate::debug;
use crate::engine::OcrEngine;
use crate::engines::EngineRegistry;
use crate::error::{OcrError, PipelineError};
use crate::expression::{self, GlyphMap, Value};
use crate::preprocessing::{Normalizer, Preset};
use axum::{
    response::{IntoResponse, Response},
    Json,
};
use image::DynamicImage;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Result of one solve invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SolveOutcome {
    Found {
        expression: String,
        result: Value,
        raw_text: String,
        cleaned_text: String,
    },
    NotFound {
        raw_text: String,
        cleaned_text: String,
    },
    Error {
        kind: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        expression: Option<String>,
        #[serde(skip)]
        http_status: u16,
    },
}

impl SolveOutcome {
    fn failed(error: PipelineError, expression: Option<String>) -> Self {
        tracing::warn!("Solve failed: {}", error);
        SolveOutcome::Error {
            kind: error.kind().to_string(),
            message: error.to_string(),
            expression,
            http_status: error.status_code().as_u16(),
        }
    }

    /// The code to type into the CAPTCHA field, when one was found
    pub fn code(&self) -> Option<String> {
        match self {
            SolveOutcome::Found { result, .. } => Some(result.to_string()),
            _ => None,
        }
    }
}

impl From<PipelineError> for SolveOutcome {
    fn from(error: PipelineError) -> Self {
        Self::failed(error, None)
    }
}

impl IntoResponse for SolveOutcome {
    fn into_response(self) -> Response {
        let status = match &self {
            SolveOutcome::Error { http_status, .. } => {
                axum::http::StatusCode::from_u16(*http_status)
                    .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR)
            }
            _ => axum::http::StatusCode::OK,
        };
        (status, Json(self)).into_response()
    }
}

/// Per-request overrides; unset values follow the engine's preferences
#[derive(Debug, Clone, Default)]
pub struct SolveOptions {
    pub engine: Option<String>,
    pub preset: Option<Preset>,
    pub glyph_map: Option<GlyphMap>,
}

pub struct Solver {
    engines: Arc<EngineRegistry>,
    ocr_timeout: Duration,
    debug_dir: Option<PathBuf>,
}

impl Solver {
    pub fn new(engines: Arc<EngineRegistry>, ocr_timeout: Duration, debug_dir: Option<PathBuf>) -> Self {
        Self {
            engines,
            ocr_timeout,
            debug_dir,
        }
    }

    /// Download the image at `url` with `session` and solve it
    pub async fn solve_url(&self, session: &HttpSession, url: &str, options: &SolveOptions) -> SolveOutcome {
        let session = session.clone();
        let owned_url = url.to_string();
        let decoded = tokio::task::spawn_blocking(move || session.fetch_image(&owned_url)?.decode()).await;

        match decoded {
            Ok(Ok(image)) => self.solve_image(image, options).await,
            Ok(Err(e)) => e.into(),
            Err(e) => PipelineError::Download(format!("Download task failed: {}", e)).into(),
        }
    }

    /// Solve an image that is already in memory (e.g. uploaded)
    pub async fn solve_raw(&self, raw: RawImage, options: &SolveOptions) -> SolveOutcome {
        match tokio::task::spawn_blocking(move || raw.decode()).await {
            Ok(Ok(image)) => self.solve_image(image, options).await,
            Ok(Err(e)) => e.into(),
            Err(e) => PipelineError::Download(format!("Decode task failed: {}", e)).into(),
        }
    }

    async fn solve_image(&self, image: DynamicImage, options: &SolveOptions) -> SolveOutcome {
        let engine = match self.engine(options.engine.clone()).await {
            Ok(engine) => engine,
            Err(e) => return PipelineError::from(e).into(),
        };

        let preset = options.preset.unwrap_or_else(|| engine.preferred_preset());
        let glyph_map = options.glyph_map.unwrap_or_else(|| engine.preferred_glyph_map());
        let debug_dir = self.debug_dir.clone();

        let task = tokio::task::spawn_blocking(move || recognize(engine, image, preset, debug_dir));

        let raw_text = match tokio::time::timeout(self.ocr_timeout, task).await {
            Ok(Ok(Ok(text))) => text,
            Ok(Ok(Err(e))) => return PipelineError::from(e).into(),
            Ok(Err(e)) => {
                return PipelineError::from(OcrError::ProcessingError(format!("OCR task failed: {}", e)))
                    .into()
            }
            Err(_) => return PipelineError::from(OcrError::Timeout(self.ocr_timeout)).into(),
        };

        solve_text(&raw_text, glyph_map)
    }

    /// Look up (and on first use initialize) an engine off the async runtime
    async fn engine(&self, name: Option<String>) -> Result<Arc<dyn OcrEngine>, OcrError> {
        let engines = self.engines.clone();
        tokio::task::spawn_blocking(move || match name {
            Some(name) => engines.get(&name),
            None => engines.default(),
        })
        .await
        .map_err(|e| OcrError::InitializationError(format!("Engine task failed: {}", e)))?
    }
}

/// Normalize, optionally persist, and recognize one image
fn recognize(
    engine: Arc<dyn OcrEngine>,
    image: DynamicImage,
    preset: Preset,
    debug_dir: Option<PathBuf>,
) -> Result<String, OcrError> {
    let normalized = Normalizer::new(preset).process(image);
    tracing::debug!(
        "Normalized with {} preset in {}ms: {:?}",
        normalized.preset.as_str(),
        normalized.total_time_ms,
        normalized.steps
    );

    if let Some(dir) = debug_dir {
        match debug::persist(&dir, &normalized.image) {
            Ok(path) => tracing::info!("Saved normalized CAPTCHA to {:?}", path),
            Err(e) => tracing::warn!("Failed to save debug image: {}", e),
        }
    }

    let start = Instant::now();
    let text = engine.recognize(&normalized.image)?;
    tracing::debug!("{} recognized text in {}ms", engine.name(), start.elapsed().as_millis());

    Ok(text)
}

/// Recover and evaluate the expression in recognized text
pub fn solve_text(raw: &str, glyph_map: GlyphMap) -> SolveOutcome {
    let raw_text = raw.trim().to_lowercase();
    let recovery = expression::recover(&raw_text, glyph_map);

    tracing::info!(
        "OCR read {:?}, cleaned to {:?} ({} table)",
        raw_text,
        recovery.cleaned,
        glyph_map.as_str()
    );

    let Some(found) = recovery.expression else {
        return SolveOutcome::NotFound {
            raw_text,
            cleaned_text: recovery.cleaned,
        };
    };

    match expression::evaluate(&found) {
        Ok(result) => SolveOutcome::Found {
            expression: found,
            result,
            raw_text,
            cleaned_text: recovery.cleaned,
        },
        Err(e) => SolveOutcome::failed(e.into(), Some(found)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquire::testing::png_bytes;
    use crate::config::Config;
    use crate::engines::testing::ScriptedEngine;
    use axum::{http::StatusCode, routing::get, Router};
    use tokio_test::assert_ok;

    fn solver_with(engine: Arc<ScriptedEngine>) -> Solver {
        let registry = EngineRegistry::from_engines(&Config::default(), vec![engine]);
        Solver::new(Arc::new(registry), Duration::from_secs(5), None)
    }

    fn session() -> HttpSession {
        HttpSession::new(Duration::from_secs(5), 1024 * 1024, Vec::new())
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_solve_text_found() {
        let outcome = solve_text("  1O+5z\n", GlyphMap::Classic);
        assert_eq!(
            outcome,
            SolveOutcome::Found {
                expression: "10+52".to_string(),
                result: Value::Integer(62),
                raw_text: "1o+5z".to_string(),
                cleaned_text: "10+52".to_string(),
            }
        );
        assert_eq!(outcome.code().as_deref(), Some("62"));
    }

    #[test]
    fn test_solve_text_collapses_multiplication() {
        let outcome = solve_text("7x x3", GlyphMap::Classic);
        assert!(matches!(
            outcome,
            SolveOutcome::Found { ref expression, result: Value::Integer(21), .. } if expression == "7*3"
        ));
    }

    #[test]
    fn test_solve_text_not_found() {
        let outcome = solve_text("error", GlyphMap::Classic);
        assert!(matches!(outcome, SolveOutcome::NotFound { .. }));
        assert_eq!(outcome.code(), None);
    }

    #[test]
    fn test_solve_text_division_by_zero() {
        let outcome = solve_text("8/0", GlyphMap::Classic);
        match outcome {
            SolveOutcome::Error {
                kind,
                expression,
                http_status,
                ..
            } => {
                assert_eq!(kind, "evaluation");
                assert_eq!(expression.as_deref(), Some("8/0"));
                assert_eq!(http_status, 422);
            }
            other => panic!("expected evaluation error, got {:?}", other),
        }
    }

    #[test]
    fn test_outcome_json_shape() {
        let found = serde_json::to_value(solve_text("7+3", GlyphMap::Classic)).unwrap();
        assert_eq!(found["status"], "found");
        assert_eq!(found["expression"], "7+3");
        assert_eq!(found["result"], 10);

        let missing = serde_json::to_value(solve_text("??", GlyphMap::Classic)).unwrap();
        assert_eq!(missing["status"], "not_found");
        assert_eq!(missing["cleaned_text"], "");

        let failed = serde_json::to_value(SolveOutcome::from(PipelineError::Download(
            "HTTP 500".to_string(),
        )))
        .unwrap();
        assert_eq!(failed["status"], "error");
        assert_eq!(failed["kind"], "download");
        assert!(failed.get("http_status").is_none());
        assert!(failed.get("expression").is_none());
    }

    #[tokio::test]
    async fn test_solve_raw_runs_ocr() {
        let engine = ScriptedEngine::reading("1O+5z");
        let solver = solver_with(engine.clone());

        let raw = RawImage::new(png_bytes(), Some("image/png".to_string()));
        let outcome = solver.solve_raw(raw, &SolveOptions::default()).await;

        assert_eq!(outcome.code().as_deref(), Some("62"));
        assert_eq!(engine.calls(), 1);
    }

    #[tokio::test]
    async fn test_undecodable_upload_skips_ocr() {
        let engine = ScriptedEngine::reading("1+1");
        let solver = solver_with(engine.clone());

        let raw = RawImage::new(b"not an image".to_vec(), None);
        let outcome = solver.solve_raw(raw, &SolveOptions::default()).await;

        assert!(matches!(outcome, SolveOutcome::Error { ref kind, .. } if kind == "download"));
        assert_eq!(engine.calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_non_2xx_download_skips_ocr() {
        let base = serve(Router::new().route(
            "/captcha",
            get(|| async { StatusCode::NOT_FOUND }),
        ))
        .await;

        let engine = ScriptedEngine::reading("1+1");
        let solver = solver_with(engine.clone());

        let outcome = solver
            .solve_url(&session(), &format!("{}/captcha", base), &SolveOptions::default())
            .await;

        match &outcome {
            SolveOutcome::Error { kind, http_status, .. } => {
                assert_eq!(kind, "download");
                assert_eq!(*http_status, 502);
            }
            other => panic!("expected download error, got {:?}", other),
        }
        assert_eq!(engine.calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_html_instead_of_image_skips_ocr() {
        let base = serve(Router::new().route(
            "/captcha",
            get(|| async { ([("content-type", "text/html")], "<html>rate limited</html>") }),
        ))
        .await;

        let engine = ScriptedEngine::reading("1+1");
        let solver = solver_with(engine.clone());

        let outcome = solver
            .solve_url(&session(), &format!("{}/captcha", base), &SolveOptions::default())
            .await;

        assert!(matches!(outcome, SolveOutcome::Error { ref kind, .. } if kind == "download"));
        assert_eq!(engine.calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_solve_url_end_to_end() {
        let base = serve(Router::new().route(
            "/captcha",
            get(|| async { ([("content-type", "image/png")], png_bytes()) }),
        ))
        .await;

        let engine = ScriptedEngine::reading("7x x3");
        let solver = solver_with(engine.clone());

        let outcome = solver
            .solve_url(&session(), &format!("{}/captcha", base), &SolveOptions::default())
            .await;

        assert_eq!(outcome.code().as_deref(), Some("21"));
        assert_eq!(engine.calls(), 1);
    }

    #[tokio::test]
    async fn test_ocr_failure_is_reported() {
        let solver = solver_with(ScriptedEngine::failing("model exploded"));

        let raw = RawImage::new(png_bytes(), None);
        let outcome = solver.solve_raw(raw, &SolveOptions::default()).await;

        match outcome {
            SolveOutcome::Error { kind, message, http_status, .. } => {
                assert_eq!(kind, "ocr");
                assert!(message.contains("model exploded"));
                assert_eq!(http_status, 500);
            }
            other => panic!("expected OCR error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_options_override_engine_preferences() {
        let solver = solver_with(ScriptedEngine::reading("9 – 4"));

        let raw = RawImage::new(png_bytes(), None);
        let options = SolveOptions {
            glyph_map: Some(GlyphMap::Learned),
            preset: Some(Preset::Threshold),
            ..SolveOptions::default()
        };
        let outcome = solver.solve_raw(raw.clone(), &options).await;
        assert_eq!(outcome.code().as_deref(), Some("5"));

        // the classic table drops the dash
        let outcome = solver.solve_raw(raw, &SolveOptions::default()).await;
        assert!(matches!(outcome, SolveOutcome::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_unknown_engine_is_ocr_error() {
        let solver = solver_with(ScriptedEngine::reading("1+1"));
        let options = SolveOptions {
            engine: Some("nope".to_string()),
            ..SolveOptions::default()
        };

        let outcome = solver.solve_raw(RawImage::new(png_bytes(), None), &options).await;
        assert!(matches!(outcome, SolveOutcome::Error { ref kind, .. } if kind == "ocr"));
    }

    #[tokio::test]
    async fn test_debug_images_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let registry = EngineRegistry::from_engines(&Config::default(), vec![ScriptedEngine::reading("1+2")]);
        let solver = Solver::new(
            Arc::new(registry),
            Duration::from_secs(5),
            Some(dir.path().to_path_buf()),
        );

        let outcome = solver
            .solve_raw(RawImage::new(png_bytes(), None), &SolveOptions::default())
            .await;
        assert_eq!(outcome.code().as_deref(), Some("3"));

        let saved = assert_ok!(std::fs::read_dir(dir.path())).count();
        assert_eq!(saved, 1);
    }
}
