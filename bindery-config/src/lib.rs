// Configuration management for the Bindery pipeline
//
// Settings come from a JSON/TOML/.env file, then `BINDERY_*` environment
// variables, and end up applied to a `DispatcherBuilder`.

pub mod env;
pub mod error;
pub mod loader;
pub mod validation;

pub use env::{DEFAULT_PREFIX, EnvLoader};
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};
pub use validation::{ConfigValidator, Validate};

use bindery_core::content_negotiation::DEFAULT_JSONP_CALLBACK_PARAM;
use bindery_core::dispatch::{Dispatcher, DispatcherBuilder};
use bindery_core::logging::{LogConfig, LogFormat, LogLevel};
use bindery_core::multipart::MultipartLimits;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::debug;

/// Pipeline settings.
///
/// ```toml
/// default_content_type = "application/json"
/// jsonp_callback_param = "callback"
///
/// [extensions]
/// csv = "text/csv"
///
/// [multipart]
/// max_file_size = 10485760
/// max_parts = 256
///
/// [logging]
/// level = "info"
/// format = "json"
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Media type used when no other negotiation strategy decides.
    pub default_content_type: String,
    /// Extra path extension to media type mappings. `json` and `js` are always mapped.
    pub extensions: BTreeMap<String, String>,
    /// Query parameter carrying the JSONP callback name.
    pub jsonp_callback_param: String,
    pub multipart: MultipartConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MultipartConfig {
    pub max_file_size: usize,
    pub max_parts: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    /// Level for the pipeline's own events, if different.
    pub pipeline_level: Option<LogLevel>,
    pub format: LogFormat,
    /// Raw filter directives; override both levels when set.
    pub filter: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_content_type: "application/json".to_string(),
            extensions: BTreeMap::new(),
            jsonp_callback_param: DEFAULT_JSONP_CALLBACK_PARAM.to_string(),
            multipart: MultipartConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for MultipartConfig {
    fn default() -> Self {
        let limits = MultipartLimits::default();
        Self {
            max_file_size: limits.max_file_size,
            max_parts: limits.max_parts,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            pipeline_level: None,
            format: LogFormat::Json,
            filter: None,
        }
    }
}

impl PipelineConfig {
    /// Load from `path` (if any), then `.env`, then `BINDERY_*` variables, and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let env = EnvLoader::bindery();
        env.load_dotenv(None)?;

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(&env.load()?)?;
        config.validate()?;

        debug!(
            default_content_type = %config.default_content_type,
            jsonp_callback_param = %config.jsonp_callback_param,
            extensions = config.extensions.len(),
            "Pipeline configuration loaded"
        );
        Ok(config)
    }

    /// Read a configuration file, detecting the format from its extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let loader = ConfigLoader::auto(path.as_ref())?;
        let value = loader.load_file(path.as_ref())?;
        Self::from_parsed(value, loader.format())
    }

    /// Parse configuration text in the given format.
    pub fn parse(content: &str, format: FileFormat) -> Result<Self> {
        let value = ConfigLoader::new(format).parse(content)?;
        Self::from_parsed(value, format)
    }

    fn from_parsed(value: serde_json::Value, format: FileFormat) -> Result<Self> {
        match format {
            FileFormat::Env => {
                let vars: HashMap<String, String> = serde_json::from_value(value)
                    .map_err(|e| ConfigError::DeserializationError(e.to_string()))?;
                let mut config = Self::default();
                config.apply_overrides(&vars)?;
                Ok(config)
            }
            FileFormat::Json | FileFormat::Toml => {
                serde_json::from_value(value).map_err(|e| ConfigError::DeserializationError(e.to_string()))
            }
        }
    }

    /// Apply flat overrides keyed like `BINDERY_*` variables without the prefix.
    ///
    /// Recognized keys: `default_content_type`, `jsonp_callback_param`,
    /// `multipart_max_file_size`, `multipart_max_parts`, `log_level`,
    /// `log_pipeline_level`, `log_format`, `log_filter` and `extension_<ext>`.
    /// Other keys are ignored.
    pub fn apply_overrides(&mut self, vars: &HashMap<String, String>) -> Result<()> {
        for (key, value) in vars {
            let value = value.trim();
            match key.as_str() {
                "default_content_type" => self.default_content_type = value.to_string(),
                "jsonp_callback_param" => self.jsonp_callback_param = value.to_string(),
                "multipart_max_file_size" => self.multipart.max_file_size = parse_number(key, value)?,
                "multipart_max_parts" => self.multipart.max_parts = parse_number(key, value)?,
                "log_level" => self.logging.level = parse_level(key, value)?,
                "log_pipeline_level" => self.logging.pipeline_level = Some(parse_level(key, value)?),
                "log_format" => {
                    self.logging.format =
                        serde_json::from_value(serde_json::Value::String(value.to_ascii_lowercase())).map_err(|_| {
                            ConfigError::InvalidValue {
                                key: key.clone(),
                                message: format!("unknown log format '{}'", value),
                            }
                        })?
                }
                "log_filter" => self.logging.filter = Some(value.to_string()),
                other => {
                    if let Some(extension) = other.strip_prefix("extension_") {
                        self.extensions.insert(extension.to_string(), value.to_string());
                    } else {
                        continue;
                    }
                }
            }
            debug!(key = %key, "Configuration override applied");
        }
        Ok(())
    }

    pub fn multipart_limits(&self) -> MultipartLimits {
        MultipartLimits {
            max_file_size: self.multipart.max_file_size,
            max_parts: self.multipart.max_parts,
        }
    }

    /// Configure `builder` with these settings.
    pub fn apply(&self, builder: DispatcherBuilder) -> DispatcherBuilder {
        let mut builder = builder
            .default_content_type(&self.default_content_type)
            .jsonp_callback_param(self.jsonp_callback_param.clone())
            .multipart_limits(self.multipart_limits());
        for (extension, media_type) in &self.extensions {
            builder = builder.extension(extension.clone(), media_type);
        }
        builder
    }

    /// A dispatcher builder with the standard pipeline and these settings.
    pub fn dispatcher_builder(&self) -> DispatcherBuilder {
        self.apply(Dispatcher::builder())
    }

    pub fn log_config(&self) -> LogConfig {
        let mut config = LogConfig::new().level(self.logging.level).format(self.logging.format);
        if let Some(level) = self.logging.pipeline_level {
            config = config.pipeline_level(level);
        }
        if let Some(filter) = &self.logging.filter {
            config = config.with_env_filter(filter.clone());
        }
        config
    }
}

impl Validate for PipelineConfig {
    fn validate(&self) -> Result<()> {
        ConfigValidator::is_media_type(&self.default_content_type, "default_content_type")?;
        ConfigValidator::is_param_name(&self.jsonp_callback_param, "jsonp_callback_param")?;
        for (extension, media_type) in &self.extensions {
            ConfigValidator::not_empty(extension.trim_start_matches('.'), "extensions")?;
            ConfigValidator::is_media_type(media_type, &format!("extensions.{}", extension))?;
        }
        ConfigValidator::in_range(self.multipart.max_file_size, 1, usize::MAX, "multipart.max_file_size")?;
        ConfigValidator::in_range(self.multipart.max_parts, 1, usize::MAX, "multipart.max_parts")?;
        Ok(())
    }
}

fn parse_number(key: &str, value: &str) -> Result<usize> {
    value.parse().map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("expected a non-negative integer: {}", e),
    })
}

fn parse_level(key: &str, value: &str) -> Result<LogLevel> {
    value.parse().map_err(|message| ConfigError::InvalidValue {
        key: key.to_string(),
        message,
    })
}
