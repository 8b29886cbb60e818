//! OCR engine implementations
//!
//! This module contains implementations of the OcrEngine trait for different
//! OCR backends. Engines are conditionally compiled based on feature flags
//! and initialized on first use, since initialization may download models.

#[cfg(feature = "engine-ocrs")]
pub mod ocrs;

#[cfg(feature = "engine-leptess")]
pub mod leptess;

use crate::config::Config;
use crate::engine::OcrEngine;
use crate::error::OcrError;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Largest model or tessdata file we are willing to download
const MAX_DOWNLOAD_SIZE: u64 = 256 * 1024 * 1024;

type EngineFactory = fn(&Config) -> Result<Arc<dyn OcrEngine>, OcrError>;

/// Information about an available engine
#[derive(Debug, Clone, Serialize)]
pub struct EngineInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub loaded: bool,
}

struct EngineSlot {
    name: &'static str,
    description: &'static str,
    factory: Option<EngineFactory>,
    instance: Mutex<Option<Arc<dyn OcrEngine>>>,
}

/// Registry of compiled-in OCR engines
pub struct EngineRegistry {
    slots: Vec<EngineSlot>,
    default_engine: String,
    config: Config,
}

impl EngineRegistry {
    /// Register every compiled-in engine without initializing any of them
    pub fn new(config: &Config) -> Result<Self, OcrError> {
        #[allow(unused_mut)]
        let mut slots: Vec<EngineSlot> = Vec::new();

        #[cfg(feature = "engine-ocrs")]
        slots.push(EngineSlot {
            name: ocrs::NAME,
            description: ocrs::DESCRIPTION,
            factory: Some(load_ocrs as EngineFactory),
            instance: Mutex::new(None),
        });

        #[cfg(feature = "engine-leptess")]
        slots.push(EngineSlot {
            name: leptess::NAME,
            description: leptess::DESCRIPTION,
            factory: Some(load_leptess as EngineFactory),
            instance: Mutex::new(None),
        });

        if slots.is_empty() {
            return Err(OcrError::InitializationError(
                "No OCR engines available. Build with --features engine-ocrs or --features engine-leptess".to_string()
            ));
        }

        let default_engine = match &config.engine {
            Some(name) => {
                if !slots.iter().any(|s| s.name == name.as_str()) {
                    return Err(OcrError::UnknownEngine(name.clone()));
                }
                name.clone()
            }
            None => slots[0].name.to_string(),
        };

        Ok(Self {
            slots,
            default_engine,
            config: config.clone(),
        })
    }

    /// Registry over already-constructed engines, the first being the default
    #[cfg(test)]
    pub fn from_engines(config: &Config, engines: Vec<Arc<dyn OcrEngine>>) -> Self {
        let default_engine = engines
            .first()
            .map(|e| e.name().to_string())
            .unwrap_or_default();
        let slots = engines
            .into_iter()
            .map(|engine| EngineSlot {
                name: engine.name(),
                description: engine.description(),
                factory: None,
                instance: Mutex::new(Some(engine)),
            })
            .collect();

        Self {
            slots,
            default_engine,
            config: config.clone(),
        }
    }

    /// Get an engine by name, initializing it on first use.
    ///
    /// Blocks while the engine loads; call from a blocking context.
    pub fn get(&self, name: &str) -> Result<Arc<dyn OcrEngine>, OcrError> {
        let slot = self
            .slots
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| OcrError::UnknownEngine(name.to_string()))?;

        let mut instance = slot
            .instance
            .lock()
            .map_err(|_| OcrError::InitializationError(format!("{} engine lock poisoned", name)))?;

        if let Some(engine) = instance.as_ref() {
            return Ok(engine.clone());
        }

        let factory = slot.factory.ok_or_else(|| {
            OcrError::InitializationError(format!("{} engine has no initializer", name))
        })?;

        tracing::info!("Initializing {} engine...", name);
        let engine = factory(&self.config)?;
        tracing::info!("{} engine ready: {}", engine.name(), engine.description());
        *instance = Some(engine.clone());

        Ok(engine)
    }

    /// Get the default engine
    pub fn default(&self) -> Result<Arc<dyn OcrEngine>, OcrError> {
        self.get(&self.default_engine)
    }

    /// Get the default engine name
    pub fn default_name(&self) -> &str {
        &self.default_engine
    }

    /// Get info about all available engines
    pub fn info(&self) -> Vec<EngineInfo> {
        self.slots
            .iter()
            .map(|s| EngineInfo {
                name: s.name,
                description: s.description,
                loaded: s.instance.try_lock().map(|i| i.is_some()).unwrap_or(false),
            })
            .collect()
    }
}

#[cfg(feature = "engine-ocrs")]
fn load_ocrs(config: &Config) -> Result<Arc<dyn OcrEngine>, OcrError> {
    Ok(Arc::new(ocrs::OcrsEngine::new(config)?))
}

#[cfg(feature = "engine-leptess")]
fn load_leptess(config: &Config) -> Result<Arc<dyn OcrEngine>, OcrError> {
    Ok(Arc::new(leptess::LeptessEngine::new(config)?))
}

/// Directory holding downloaded models and tessdata
pub(crate) fn cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("captcha-ocr-server")
}

/// Return `dir/filename`, downloading it from `url` first if it is missing
pub(crate) fn ensure_downloaded(url: &str, dir: &Path, filename: &str) -> Result<PathBuf, OcrError> {
    std::fs::create_dir_all(dir).map_err(|e| {
        OcrError::InitializationError(format!("Failed to create cache directory: {}", e))
    })?;

    let path = dir.join(filename);

    if !path.exists() {
        tracing::info!("Downloading {} (this may take a moment)...", filename);
        download_file(url, &path)?;
        tracing::info!("Downloaded {} to {:?}", filename, path);
    } else {
        tracing::info!("Using cached {} from {:?}", filename, path);
    }

    Ok(path)
}

/// Download a file from URL to path using ureq.
///
/// The body lands in a temp file next to `path` and is renamed into place,
/// so an interrupted download never leaves a truncated model behind.
fn download_file(url: &str, path: &Path) -> Result<(), OcrError> {
    let response = ureq::get(url)
        .call()
        .map_err(|e| OcrError::InitializationError(format!("Failed to download {}: {}", url, e)))?;

    let buffer = response
        .into_body()
        .with_config()
        .limit(MAX_DOWNLOAD_SIZE)
        .read_to_vec()
        .map_err(|e| OcrError::InitializationError(format!("Failed to read response body: {}", e)))?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| {
        OcrError::InitializationError(format!("Failed to create download file: {}", e))
    })?;

    temp.write_all(&buffer)
        .map_err(|e| OcrError::InitializationError(format!("Failed to write download: {}", e)))?;

    temp.persist(path)
        .map_err(|e| OcrError::InitializationError(format!("Failed to store download: {}", e)))?;

    Ok(())
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedEngine;
    use super::*;

    #[test]
    fn test_preloaded_engine_is_returned() {
        let config = Config::default();
        let engine = ScriptedEngine::reading("1+1");
        let registry = EngineRegistry::from_engines(&config, vec![engine]);

        assert_eq!(registry.default_name(), "scripted");
        assert_eq!(registry.default().unwrap().name(), "scripted");
        assert!(registry.info()[0].loaded);
    }

    fn scripted_factory(_config: &Config) -> Result<Arc<dyn OcrEngine>, OcrError> {
        let engine: Arc<dyn OcrEngine> = ScriptedEngine::reading("1+1");
        Ok(engine)
    }

    #[test]
    fn test_engine_initialized_on_first_use() {
        let registry = EngineRegistry {
            slots: vec![EngineSlot {
                name: "scripted",
                description: "Returns canned text",
                factory: Some(scripted_factory as EngineFactory),
                instance: Mutex::new(None),
            }],
            default_engine: "scripted".to_string(),
            config: Config::default(),
        };
        assert!(!registry.info()[0].loaded);

        let engine = registry.default().unwrap();
        assert_eq!(engine.description(), registry.info()[0].description);
        assert!(registry.info()[0].loaded);
    }

    #[test]
    fn test_unknown_engine() {
        let config = Config::default();
        let registry = EngineRegistry::from_engines(&config, vec![ScriptedEngine::reading("")]);
        assert!(matches!(
            registry.get("nope"),
            Err(OcrError::UnknownEngine(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_registry_rejects_unknown_configured_engine() {
        let config = Config {
            engine: Some("nope".to_string()),
            ..Config::default()
        };
        assert!(matches!(
            EngineRegistry::new(&config),
            Err(OcrError::UnknownEngine(_))
        ));
    }

    #[cfg(feature = "engine-ocrs")]
    #[test]
    fn test_compiled_engines_start_unloaded() {
        let registry = EngineRegistry::new(&Config::default()).unwrap();
        assert_eq!(registry.default_name(), "ocrs");
        assert!(registry.info().iter().all(|e| !e.loaded));
    }
}
