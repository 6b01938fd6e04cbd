use thiserror::Error;

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required field: {field}. {hint}")]
    MissingRequired { field: String, hint: String },

    #[error("Invalid value for field '{field}': '{value}'. Expected: {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ConfigError {
    /// Create a missing required field error
    pub fn missing_required(field: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::MissingRequired {
            field: field.into(),
            hint: hint.into(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            expected: expected.into(),
        }
    }
}

/// Trait for validating configuration values
pub trait ConfigValidator<T: ?Sized> {
    /// Validate a configuration value
    fn validate(&self, field: &str, value: &T) -> Result<(), ConfigError>;
}

/// Port number validator
pub struct PortValidator {
    pub min: u16,
    pub max: u16,
}

impl Default for PortValidator {
    fn default() -> Self {
        Self { min: 1, max: 65535 }
    }
}

impl ConfigValidator<u16> for PortValidator {
    fn validate(&self, field: &str, value: &u16) -> Result<(), ConfigError> {
        if *value < self.min || *value > self.max {
            return Err(ConfigError::invalid_value(
                field,
                value.to_string(),
                format!("port between {} and {}", self.min, self.max),
            ));
        }
        Ok(())
    }
}

/// Validator restricting a value to a fixed set of choices
pub struct ChoiceValidator {
    pub choices: &'static [&'static str],
}

impl ConfigValidator<str> for ChoiceValidator {
    fn validate(&self, field: &str, value: &str) -> Result<(), ConfigError> {
        if !self.choices.contains(&value) {
            return Err(ConfigError::invalid_value(
                field,
                value,
                format!("one of: {}", self.choices.join(", ")),
            ));
        }
        Ok(())
    }
}
