//! Configuration validation
//!
//! Validates configuration and reports issues.

use super::types::Config;

/// Result of configuration validation
#[derive(Debug, Clone)]
pub struct ConfigValidationResult {
    /// Whether the config is valid
    pub valid: bool,
    /// Validation errors (critical)
    pub errors: Vec<ValidationIssue>,
    /// Validation warnings (non-critical)
    pub warnings: Vec<ValidationIssue>,
}

impl ConfigValidationResult {
    /// Create a valid result
    pub fn valid() -> Self {
        ConfigValidationResult {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Add an error
    pub fn with_error(mut self, issue: ValidationIssue) -> Self {
        self.valid = false;
        self.errors.push(issue);
        self
    }

    /// Add a warning
    pub fn with_warning(mut self, issue: ValidationIssue) -> Self {
        self.warnings.push(issue);
        self
    }
}

/// A validation issue
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the config field
    pub path: String,
    /// Issue message
    pub message: String,
    /// Suggested fix
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationIssue {
            path: path.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " ({})", suggestion)?;
        }
        Ok(())
    }
}

/// Validate the configuration
pub fn validate_config(config: &Config) -> ConfigValidationResult {
    let mut result = ConfigValidationResult::valid();

    if config.default_timeout_secs == 0 {
        result = result.with_warning(
            ValidationIssue::new(
                "default_timeout_secs",
                "Default timeout is zero; requests without a timeout will use 30 seconds",
            )
            .with_suggestion("Set default_timeout_secs to a positive number of seconds"),
        );
    }

    result = validate_host_config(config, result);
    result = validate_container_config(config, result);

    result
}

fn validate_host_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    if config.host.max_output_bytes == 0 {
        result = result.with_error(
            ValidationIssue::new(
                "host.max_output_bytes",
                "Output cap is zero; no stdout or stderr would be captured",
            )
            .with_suggestion("Use the default of 10485760 bytes"),
        );
    }

    if let Some(dir) = &config.host.temp_dir {
        if !dir.exists() {
            result = result.with_warning(
                ValidationIssue::new(
                    "host.temp_dir",
                    format!("Workspace directory does not exist: {}", dir.display()),
                )
                .with_suggestion("Create the directory or unset host.temp_dir"),
            );
        }
    }

    result
}

fn validate_container_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    let container = &config.container;

    if container.image.trim().is_empty() {
        result = result.with_error(
            ValidationIssue::new("container.image", "No container image specified")
                .with_suggestion("Set container.image to a Python image such as python:3.11-slim"),
        );
    }

    if container.memory_bytes().is_none() {
        result = result.with_error(
            ValidationIssue::new(
                "container.memory_limit",
                format!("Cannot parse memory limit: {}", container.memory_limit),
            )
            .with_suggestion("Use a value like 512m or 1g"),
        );
    }

    if !(container.cpu_limit > 0.0) {
        result = result.with_error(
            ValidationIssue::new("container.cpu_limit", "CPU limit must be positive")
                .with_suggestion("Use 0.5 for half a core"),
        );
    }

    if container.sandbox_user.trim().is_empty() || container.sandbox_user == "root" {
        result = result.with_error(
            ValidationIssue::new(
                "container.sandbox_user",
                "User code must run as a dedicated unprivileged account",
            )
            .with_suggestion("Use the default account name, sandbox"),
        );
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        let config = Config::default();
        let result = validate_config(&config);

        assert!(result.valid);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn test_validate_bad_container_config() {
        let mut config = Config::default();
        config.container.image = " ".to_string();
        config.container.memory_limit = "plenty".to_string();
        config.container.cpu_limit = 0.0;
        config.container.sandbox_user = "root".to_string();

        let result = validate_config(&config);
        assert!(!result.valid);
        let paths: Vec<&str> = result.errors.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "container.image",
                "container.memory_limit",
                "container.cpu_limit",
                "container.sandbox_user"
            ]
        );
    }

    #[test]
    fn test_overflowing_memory_limit_is_an_error() {
        let mut config = Config::default();
        config.container.memory_limit = "9999999999999g".to_string();

        let result = validate_config(&config);
        assert!(!result.valid);
        assert_eq!(result.errors[0].path, "container.memory_limit");
    }

    #[test]
    fn test_zero_timeout_is_warning() {
        let mut config = Config::default();
        config.default_timeout_secs = 0;
        config.host.temp_dir = Some("/definitely/not/here".into());

        let result = validate_config(&config);
        assert!(result.valid);
        assert_eq!(result.warnings.len(), 2);
        assert!(result.warnings[0].to_string().starts_with("default_timeout_secs"));
    }
}
