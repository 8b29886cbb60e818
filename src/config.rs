use crate::Args;
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Engine used when a request does not name one
    pub engine: Option<String>,
    pub default_language: String,
    pub tessdata_path: Option<String>,
    pub max_image_size: usize,
    pub fetch_timeout: Duration,
    pub ocr_timeout: Duration,
    pub targets_path: Option<PathBuf>,
    pub debug_dir: Option<PathBuf>,
    pub preload: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9292,
            engine: None,
            default_language: "eng".to_string(),
            tessdata_path: None,
            max_image_size: 5 * 1024 * 1024,
            fetch_timeout: Duration::from_secs(10),
            ocr_timeout: Duration::from_secs(30),
            targets_path: None,
            debug_dir: None,
            preload: false,
        }
    }
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            host: args.host,
            port: args.port,
            engine: args.engine,
            default_language: args.default_language,
            tessdata_path: args.tessdata_path,
            max_image_size: args.max_image_size,
            fetch_timeout: Duration::from_secs(args.fetch_timeout_secs),
            ocr_timeout: Duration::from_secs(args.ocr_timeout_secs),
            targets_path: args.targets,
            debug_dir: args.debug_dir,
            preload: args.preload,
        }
    }
}
