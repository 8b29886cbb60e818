use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod acquire;
mod config;
mod debug;
mod engine;
mod engines;
mod error;
mod expression;
mod preprocessing;
mod server;
mod solver;
mod submit;
mod target;

#[derive(Parser, Debug)]
#[command(name = "captcha-ocr-server")]
#[command(about = "Reads and solves arithmetic CAPTCHA images over HTTP")]
#[command(version)]
pub struct Args {
    /// Host address to bind to
    #[arg(long, env = "SOLVER_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "SOLVER_PORT", default_value = "9292")]
    pub port: u16,

    /// OCR engine used when a request does not name one ("ocrs", "leptess")
    #[arg(long, env = "SOLVER_ENGINE")]
    pub engine: Option<String>,

    /// Maximum CAPTCHA image size in bytes (default: 5MB)
    #[arg(long, env = "SOLVER_MAX_IMAGE_SIZE", default_value = "5242880")]
    pub max_image_size: usize,

    /// Timeout for each outbound HTTP request, in seconds
    #[arg(long, env = "SOLVER_FETCH_TIMEOUT_SECS", default_value = "10")]
    pub fetch_timeout_secs: u64,

    /// Timeout for normalization and recognition of one image, in seconds
    #[arg(long, env = "SOLVER_OCR_TIMEOUT_SECS", default_value = "30")]
    pub ocr_timeout_secs: u64,

    /// TOML file describing the CAPTCHA targets
    #[arg(long, env = "SOLVER_TARGETS")]
    pub targets: Option<PathBuf>,

    /// Directory receiving every normalized image, for debugging
    #[arg(long, env = "SOLVER_DEBUG_DIR")]
    pub debug_dir: Option<PathBuf>,

    /// Initialize the default engine at startup instead of on first use
    #[arg(long, env = "SOLVER_PRELOAD")]
    pub preload: bool,

    /// Language for the Tesseract engine (e.g., "eng")
    #[arg(long, env = "SOLVER_DEFAULT_LANGUAGE", default_value = "eng")]
    pub default_language: String,

    /// Path to tessdata directory (downloaded to the cache if not set)
    #[arg(long, env = "TESSDATA_PREFIX")]
    pub tessdata_path: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from(args);

    tracing::info!("Starting captcha-ocr-server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Binding to {}:{}", config.host, config.port);

    server::run(config).await
}
