// Configuration file loaders

use crate::{ConfigError, DEFAULT_PREFIX, Result};
use serde_json::Value;
use std::ffi::OsStr;
use std::fs;
use std::path::Path;

/// Supported configuration file formats
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FileFormat {
    Json,
    Toml,
    Env,
}

impl FileFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "json" => Some(FileFormat::Json),
            "toml" => Some(FileFormat::Toml),
            "env" => Some(FileFormat::Env),
            _ => None,
        }
    }
}

/// Configuration file loader
pub struct ConfigLoader {
    format: FileFormat,
}

impl ConfigLoader {
    pub fn new(format: FileFormat) -> Self {
        Self { format }
    }

    /// Auto-detect format from file extension
    ///
    /// A bare `.env` file name counts as the `env` format.
    pub fn auto(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .or_else(|| path.file_name().filter(|name| *name == ".env").map(|_| OsStr::new("env")))
            .and_then(|s| s.to_str())
            .ok_or_else(|| ConfigError::LoadError(format!("No file extension found: {}", path.display())))?;

        let format = FileFormat::from_extension(ext)
            .ok_or_else(|| ConfigError::LoadError(format!("Unsupported format: {}", ext)))?;

        Ok(Self::new(format))
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    /// Load configuration from file
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Value> {
        let content = fs::read_to_string(path)?;
        self.parse(&content)
    }

    /// Parse configuration from string
    pub fn parse(&self, content: &str) -> Result<Value> {
        match self.format {
            FileFormat::Json => self.parse_json(content),
            FileFormat::Toml => self.parse_toml(content),
            FileFormat::Env => self.parse_env(content),
        }
    }

    fn parse_json(&self, content: &str) -> Result<Value> {
        serde_json::from_str(content).map_err(|e| ConfigError::ParseError(format!("JSON parse error: {}", e)))
    }

    fn parse_toml(&self, content: &str) -> Result<Value> {
        let toml_value: toml::Value =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(format!("TOML parse error: {}", e)))?;

        serde_json::to_value(toml_value)
            .map_err(|e| ConfigError::ParseError(format!("TOML to JSON conversion error: {}", e)))
    }

    /// `.env` entries keyed the way `PipelineConfig::apply_overrides` reads
    /// them: lower-cased, with an optional `BINDERY_` prefix dropped.
    fn parse_env(&self, content: &str) -> Result<Value> {
        let mut overrides = serde_json::Map::new();
        for entry in dotenvy::from_read_iter(content.as_bytes()) {
            let (key, value) = entry.map_err(|e| ConfigError::ParseError(format!(".env parse error: {}", e)))?;
            overrides.insert(override_key(&key), Value::String(value));
        }
        Ok(Value::Object(overrides))
    }
}

fn override_key(key: &str) -> String {
    key.strip_prefix(DEFAULT_PREFIX)
        .and_then(|k| k.strip_prefix('_'))
        .unwrap_or(key)
        .to_ascii_lowercase()
}
