use crate::acquire::{HttpSession, RawImage};
use crate::config::Config;
use crate::engines::{EngineInfo, EngineRegistry};
use crate::error::{ApiError, PipelineError};
use crate::expression::GlyphMap;
use crate::preprocessing::Preset;
use crate::solver::{SolveOptions, SolveOutcome, Solver};
use crate::submit::{self, Submission};
use crate::target::{Target, TargetRegistry};
use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

/// Room for multipart framing on top of the image itself
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub solver: Arc<Solver>,
    pub engines: Arc<EngineRegistry>,
    pub targets: Arc<TargetRegistry>,
    pub config: Arc<Config>,
}

/// Optional per-request overrides
#[derive(Debug, Default, Deserialize)]
pub struct SolveQuery {
    pub image_url: Option<String>,
    pub engine: Option<String>,
    pub preset: Option<String>,
    pub glyph_map: Option<String>,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Server info response
#[derive(Serialize)]
pub struct InfoResponse {
    pub version: String,
    pub default_engine: String,
    pub available_engines: Vec<EngineInfo>,
    pub presets: Vec<&'static str>,
    pub glyph_maps: Vec<&'static str>,
    pub targets: Vec<String>,
    pub max_image_size_bytes: usize,
}

/// Run the HTTP server
pub async fn run(config: Config) -> anyhow::Result<()> {
    let engines = Arc::new(EngineRegistry::new(&config)?);

    let targets = match &config.targets_path {
        Some(path) => {
            let targets = TargetRegistry::load(path)?;
            tracing::info!("Loaded {} targets from {:?}", targets.names().len(), path);
            targets
        }
        None => TargetRegistry::default(),
    };

    if config.preload {
        let registry = engines.clone();
        let engine = tokio::task::spawn_blocking(move || registry.default()).await??;
        tracing::info!("Preloaded {} engine", engine.name());
    } else {
        tracing::info!(
            "Default engine: {} (initialized on first request)",
            engines.default_name()
        );
    }

    let addr = format!("{}:{}", config.host, config.port);

    let solver = Solver::new(engines.clone(), config.ocr_timeout, config.debug_dir.clone());
    let state = AppState {
        solver: Arc::new(solver),
        engines,
        targets: Arc::new(targets),
        config: Arc::new(config),
    };

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, router(state)).await?;

    Ok(())
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.config.max_image_size + MULTIPART_OVERHEAD;

    Router::new()
        .route("/solve", get(handle_solve_url).post(handle_solve_upload))
        .route("/targets/:name/solve", get(handle_target_solve))
        .route("/targets/:name/submit", post(handle_target_submit))
        .route("/health", get(handle_health))
        .route("/info", get(handle_info))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl AppState {
    fn session(&self, headers: Vec<(String, String)>) -> HttpSession {
        HttpSession::new(self.config.fetch_timeout, self.config.max_image_size, headers)
    }

    /// Validate query overrides and lay them over `base`
    fn options(&self, query: &SolveQuery, base: SolveOptions) -> Result<SolveOptions, ApiError> {
        let mut options = base;

        if let Some(name) = &query.engine {
            if !self.engines.info().iter().any(|e| e.name == name.as_str()) {
                return Err(ApiError::InvalidRequest(format!("Unknown engine: {}", name)));
            }
            options.engine = Some(name.clone());
        }

        if let Some(preset) = &query.preset {
            options.preset = Some(
                Preset::from_str(preset)
                    .ok_or_else(|| ApiError::InvalidRequest(format!("Unknown preset: {}", preset)))?,
            );
        }

        if let Some(map) = &query.glyph_map {
            options.glyph_map = Some(
                GlyphMap::from_str(map)
                    .ok_or_else(|| ApiError::InvalidRequest(format!("Unknown glyph map: {}", map)))?,
            );
        }

        Ok(options)
    }

    fn target(&self, name: &str) -> Result<&Target, ApiError> {
        self.targets
            .get(name)
            .ok_or_else(|| ApiError::UnknownTarget(name.to_string()))
    }
}

/// Solve the CAPTCHA at `image_url`
async fn handle_solve_url(
    State(state): State<AppState>,
    Query(query): Query<SolveQuery>,
) -> Result<SolveOutcome, ApiError> {
    let start = Instant::now();

    let url = query
        .image_url
        .clone()
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| ApiError::InvalidRequest("Missing image_url parameter".to_string()))?;
    let options = state.options(&query, SolveOptions::default())?;

    let outcome = state
        .solver
        .solve_url(&state.session(Vec::new()), &url, &options)
        .await;

    tracing::info!("Solved {} in {}ms", url, start.elapsed().as_millis());

    Ok(outcome)
}

/// Solve an uploaded CAPTCHA image
async fn handle_solve_upload(
    State(state): State<AppState>,
    Query(query): Query<SolveQuery>,
    mut multipart: Multipart,
) -> Result<SolveOutcome, ApiError> {
    let start = Instant::now();
    let options = state.options(&query, SolveOptions::default())?;

    let max = state.config.max_image_size;
    let mut file_data: Option<Vec<u8>> = None;
    let mut content_type: Option<String> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, max))?
    {
        if field.name() != Some("file") {
            continue;
        }

        content_type = field.content_type().map(|s| s.to_string());

        // Stop reading as soon as the image outgrows the limit
        let mut data = Vec::new();
        while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(e, max))? {
            if data.len() + chunk.len() > max {
                return Err(ApiError::ImageTooLarge { max });
            }
            data.extend_from_slice(&chunk);
        }
        file_data = Some(data);
    }

    let data = file_data.ok_or(ApiError::MissingFile)?;
    let size = data.len();

    let outcome = state
        .solver
        .solve_raw(RawImage::new(data, content_type), &options)
        .await;

    tracing::info!(
        "Solved uploaded image ({} bytes) in {}ms",
        size,
        start.elapsed().as_millis()
    );

    Ok(outcome)
}

/// A body over the router's limit is reported like any oversized image
fn multipart_error(error: MultipartError, max: usize) -> ApiError {
    if error.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::ImageTooLarge { max }
    } else {
        ApiError::InvalidRequest(format!("Failed to parse multipart: {}", error))
    }
}

/// Fetch a target's page if it has one, then download and solve its CAPTCHA.
///
/// Returns the outcome along with the scraped CSRF token.
async fn solve_target(
    state: &AppState,
    session: &HttpSession,
    target: &Target,
    options: &SolveOptions,
) -> (SolveOutcome, Option<String>) {
    let mut captcha_url = target.captcha_url.clone();
    let mut csrf = None;

    if let Some(page) = target.page.clone() {
        let page_session = session.clone();
        let fetched = tokio::task::spawn_blocking(move || {
            let html = page_session.fetch_page(page.url.as_str())?;
            page.scrape(&html)
        })
        .await;

        let tokens = match fetched {
            Ok(Ok(tokens)) => tokens,
            Ok(Err(e)) => return (e.into(), None),
            Err(e) => {
                return (
                    PipelineError::Download(format!("Page task failed: {}", e)).into(),
                    None,
                )
            }
        };

        csrf = tokens.csrf;
        captcha_url = tokens.captcha_url.or(captcha_url);
    }

    let Some(url) = captcha_url else {
        let error = PipelineError::Download(format!(
            "Target {}: CAPTCHA image not found on page",
            target.name
        ));
        return (error.into(), csrf);
    };

    (state.solver.solve_url(session, &url, options).await, csrf)
}

/// Solve the configured target's CAPTCHA
async fn handle_target_solve(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<SolveQuery>,
) -> Result<SolveOutcome, ApiError> {
    let target = state.target(&name)?;
    let options = state.options(&query, target.solve_options())?;
    let session = state.session(target.headers.clone());

    let (outcome, _) = solve_target(&state, &session, target, &options).await;
    Ok(outcome)
}

/// Solve the target's CAPTCHA and post it with the caller's identity fields
async fn handle_target_submit(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<SolveQuery>,
    Json(identity): Json<Map<String, Value>>,
) -> Result<Response, ApiError> {
    let target = state.target(&name)?;
    let submit = target
        .submit
        .clone()
        .ok_or_else(|| ApiError::SubmitNotConfigured {
            target: name.clone(),
        })?;
    let options = state.options(&query, target.solve_options())?;
    let identity_fields = submit::check_identity(&submit, &identity)?;

    // One session per submission: the CAPTCHA and the form share its cookies
    let session = state.session(target.headers.clone());

    let (outcome, csrf) = solve_target(&state, &session, target, &options).await;
    let Some(code) = outcome.code() else {
        tracing::warn!("Target {}: CAPTCHA not solved, nothing submitted", name);
        return Ok(outcome.into_response());
    };

    let csrf_field = target.page.as_ref().map(|p| p.csrf_field.as_str());
    let csrf = csrf_field.zip(csrf.as_deref());
    let form = submit::build_form(&submit, &code, identity_fields, csrf);

    tracing::info!("Target {}: submitting code {} to {}", name, code, submit.url);

    let url = submit.url.clone();
    let posted = tokio::task::spawn_blocking(move || session.post_form(&url, &form))
        .await
        .map_err(|e| ApiError::Internal(format!("Submit task failed: {}", e)))?;

    let submission = match posted {
        Ok(reply) => submit::interpret(&submit, reply),
        Err(e) => {
            tracing::warn!("Target {}: submit failed: {}", name, e);
            Submission::TransportError(format!("Failed to submit to {}: {}", submit.url, e))
        }
    };

    Ok(submission.into_response())
}

/// Handle health check requests
async fn handle_health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Handle info requests
async fn handle_info(State(state): State<AppState>) -> impl IntoResponse {
    Json(InfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        default_engine: state.engines.default_name().to_string(),
        available_engines: state.engines.info(),
        presets: Preset::all().iter().map(|p| p.as_str()).collect(),
        glyph_maps: vec![GlyphMap::Classic.as_str(), GlyphMap::Learned.as_str()],
        targets: state.targets.names(),
        max_image_size_bytes: state.config.max_image_size,
    })
}
