// Configuration validation

use crate::{ConfigError, Result};
use bindery_core::content_negotiation::MediaType;
use std::fmt::Display;

/// Trait for validating configuration
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Configuration validator with rules
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate that a value is not empty
    pub fn not_empty(value: &str, field: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!("{} cannot be empty", field)));
        }
        Ok(())
    }

    /// Validate that a number is within range
    pub fn in_range<T: PartialOrd + Display>(value: T, min: T, max: T, field: &str) -> Result<()> {
        if value < min || value > max {
            return Err(ConfigError::ValidationError(format!(
                "{} must be between {} and {}, got {}",
                field, min, max, value
            )));
        }
        Ok(())
    }

    /// Validate a concrete `type/subtype` media type
    pub fn is_media_type(value: &str, field: &str) -> Result<()> {
        match MediaType::parse(value) {
            Some(media_type) if !media_type.is_wildcard() => Ok(()),
            _ => Err(ConfigError::ValidationError(format!(
                "{} must be a concrete media type such as application/json, got '{}'",
                field, value
            ))),
        }
    }

    /// Validate a query parameter name
    pub fn is_param_name(value: &str, field: &str) -> Result<()> {
        Self::not_empty(value, field)?;
        if value.chars().any(|c| c.is_whitespace() || matches!(c, '&' | '=' | '?' | '#')) {
            return Err(ConfigError::ValidationError(format!(
                "{} is not a valid query parameter name: '{}'",
                field, value
            )));
        }
        Ok(())
    }
}
