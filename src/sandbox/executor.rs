//! Common executor trait and types

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

use crate::config::DEFAULT_TIMEOUT_SECS;
use crate::error::{Error, Result};

/// Interpreter version requested for a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PythonVersion {
    /// Whatever `python3` resolves to
    #[default]
    Default,
    V3_8,
    V3_9,
    V3_10,
    V3_11,
    V3_12,
}

impl PythonVersion {
    /// Versioned executable name (`python3.11`), or `python3` for the default
    pub fn executable(&self) -> &'static str {
        match self {
            PythonVersion::Default => "python3",
            PythonVersion::V3_8 => "python3.8",
            PythonVersion::V3_9 => "python3.9",
            PythonVersion::V3_10 => "python3.10",
            PythonVersion::V3_11 => "python3.11",
            PythonVersion::V3_12 => "python3.12",
        }
    }

    /// Executable names to look up on the host, most specific first
    pub fn candidates(&self) -> Vec<&'static str> {
        match self {
            PythonVersion::Default => vec!["python3", "python"],
            other => vec![other.executable(), "python3", "python"],
        }
    }
}

impl std::str::FromStr for PythonVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase();
        let version = normalized.strip_prefix("python").unwrap_or(&normalized);
        match version {
            "" | "3" | "default" => Ok(PythonVersion::Default),
            "3.8" => Ok(PythonVersion::V3_8),
            "3.9" => Ok(PythonVersion::V3_9),
            "3.10" => Ok(PythonVersion::V3_10),
            "3.11" => Ok(PythonVersion::V3_11),
            "3.12" => Ok(PythonVersion::V3_12),
            _ => Err(Error::InvalidInput(format!(
                "Unsupported Python version: {}. Supported: default, 3.8, 3.9, 3.10, 3.11, 3.12",
                s
            ))),
        }
    }
}

impl TryFrom<String> for PythonVersion {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<PythonVersion> for String {
    fn from(value: PythonVersion) -> Self {
        value.to_string()
    }
}

impl std::fmt::Display for PythonVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PythonVersion::Default => write!(f, "default"),
            other => write!(f, "{}", other.executable().trim_start_matches("python")),
        }
    }
}

/// Request to execute Python code
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    /// The code to execute
    pub code: String,
    /// Package specifiers to install first, in order
    #[serde(default, deserialize_with = "deserialize_requirements")]
    pub requirements: Vec<String>,
    /// Wall-clock limit in seconds; zero means "use the configured default"
    #[serde(
        default,
        rename = "timeoutSeconds",
        deserialize_with = "deserialize_timeout"
    )]
    pub timeout_secs: u64,
    /// Interpreter to run on the host path
    #[serde(default, rename = "interpreterSelector")]
    pub python_version: PythonVersion,
    /// Include stdout/stderr in successful host results
    #[serde(default = "default_true")]
    pub capture_output: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RequirementsInput {
    Text(String),
    List(Vec<String>),
}

fn deserialize_requirements<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<RequirementsInput>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(RequirementsInput::Text(text)) => parse_requirements(&text),
        Some(RequirementsInput::List(list)) => list
            .iter()
            .flat_map(|entry| parse_requirements(entry))
            .collect(),
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TimeoutInput {
    Int(i64),
    Float(f64),
    Text(String),
}

/// Accept any number (or numeric string); values that are not positive
/// become zero so the configured default applies.
fn deserialize_timeout<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let seconds = match Option::<TimeoutInput>::deserialize(deserializer)? {
        None => 0.0,
        Some(TimeoutInput::Int(n)) => n as f64,
        Some(TimeoutInput::Float(f)) => f,
        Some(TimeoutInput::Text(text)) => text.trim().parse().unwrap_or(0.0),
    };
    Ok(if seconds.is_finite() && seconds > 0.0 {
        seconds.ceil() as u64
    } else {
        0
    })
}

/// Split multiline requirement text into specifiers, skipping blanks and comments
pub fn parse_requirements(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

impl ExecutionRequest {
    /// Create a new execution request
    pub fn new(code: impl Into<String>) -> Self {
        ExecutionRequest {
            code: code.into(),
            requirements: Vec::new(),
            timeout_secs: 0,
            python_version: PythonVersion::default(),
            capture_output: true,
        }
    }

    /// Set the requirement specifiers
    pub fn with_requirements<I, S>(mut self, requirements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.requirements = requirements.into_iter().map(Into::into).collect();
        self
    }

    /// Set requirements from multiline text, one specifier per line
    pub fn with_requirements_text(mut self, text: &str) -> Self {
        self.requirements = parse_requirements(text);
        self
    }

    /// Set timeout in seconds
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set interpreter version
    pub fn with_python_version(mut self, version: PythonVersion) -> Self {
        self.python_version = version;
        self
    }

    /// Toggle stdout/stderr in successful results
    pub fn with_capture_output(mut self, capture: bool) -> Self {
        self.capture_output = capture;
        self
    }

    /// Timeout actually enforced; a zero value is replaced, never rejected
    pub fn effective_timeout_secs(&self, configured_default: u64) -> u64 {
        if self.timeout_secs > 0 {
            self.timeout_secs
        } else if configured_default > 0 {
            configured_default
        } else {
            DEFAULT_TIMEOUT_SECS
        }
    }

    pub fn effective_timeout(&self, configured_default: u64) -> Duration {
        Duration::from_secs(self.effective_timeout_secs(configured_default))
    }

    pub fn has_requirements(&self) -> bool {
        !self.requirements.is_empty()
    }

    /// Requirements in pip's requirements-file format
    pub fn manifest(&self) -> String {
        let mut manifest = self.requirements.join("\n");
        manifest.push('\n');
        manifest
    }

    /// Reject requests that cannot be run at all
    pub fn validate(&self) -> Result<()> {
        if self.code.trim().is_empty() {
            return Err(Error::InvalidInput("No code provided".to_string()));
        }
        Ok(())
    }
}

/// Result of code execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Whether execution was successful
    pub success: bool,
    /// Decoded stdout: JSON when it parses, otherwise the trimmed text
    pub output: serde_json::Value,
    /// Standard output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    /// Standard error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// Human-readable failure reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Exit code of a failed process
    #[serde(default, rename = "code", skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    /// Was execution terminated due to timeout?
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub timed_out: bool,
    /// When the result was produced
    pub execution_time: DateTime<Utc>,
}

impl ExecutionResult {
    /// Output as a display string: raw for strings, compact JSON otherwise
    pub fn output_text(&self) -> String {
        match &self.output {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Trait for code execution backends
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    /// Get the executor name
    fn name(&self) -> &str;

    /// Execute code. Failures of the code itself come back as
    /// `Ok(ExecutionResult { success: false, .. })`.
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_version_parsing() {
        assert_eq!("3.11".parse::<PythonVersion>().unwrap(), PythonVersion::V3_11);
        assert_eq!("python3.8".parse::<PythonVersion>().unwrap(), PythonVersion::V3_8);
        assert_eq!("python3".parse::<PythonVersion>().unwrap(), PythonVersion::Default);
        assert_eq!("default".parse::<PythonVersion>().unwrap(), PythonVersion::Default);
        assert!("2.7".parse::<PythonVersion>().is_err());
        assert_eq!(PythonVersion::V3_10.to_string(), "3.10");
    }

    #[test]
    fn test_python_version_candidates() {
        assert_eq!(PythonVersion::Default.candidates(), vec!["python3", "python"]);
        assert_eq!(
            PythonVersion::V3_12.candidates(),
            vec!["python3.12", "python3", "python"]
        );
    }

    #[test]
    fn test_parse_requirements() {
        let reqs = parse_requirements("requests==2.31\n\n  # pinned for tests\nnumpy\r\n  pandas>=2 \n");
        assert_eq!(reqs, vec!["requests==2.31", "numpy", "pandas>=2"]);
        assert!(parse_requirements("   \n# nothing\n").is_empty());
    }

    #[test]
    fn test_request_from_platform_json() {
        let req: ExecutionRequest = serde_json::from_str(
            r#"{
                "code": "print(1)",
                "requirements": "requests\nnumpy",
                "timeoutSeconds": 5,
                "interpreterSelector": "3.11",
                "captureOutput": false
            }"#,
        )
        .unwrap();

        assert_eq!(req.requirements, vec!["requests", "numpy"]);
        assert_eq!(req.timeout_secs, 5);
        assert_eq!(req.python_version, PythonVersion::V3_11);
        assert!(!req.capture_output);

        let minimal: ExecutionRequest = serde_json::from_str(r#"{"code": "print(1)"}"#).unwrap();
        assert!(minimal.requirements.is_empty());
        assert!(minimal.capture_output);
        assert_eq!(minimal.effective_timeout_secs(30), 30);

        let listed: ExecutionRequest =
            serde_json::from_str(r#"{"code": "x", "requirements": ["a", "", "b"]}"#).unwrap();
        assert_eq!(listed.requirements, vec!["a", "b"]);
    }

    #[test]
    fn test_non_positive_timeout_falls_back_to_default() {
        for raw in ["-5", "0", "null", "\"abc\"", "-0.5"] {
            let req: ExecutionRequest =
                serde_json::from_str(&format!(r#"{{"code": "print(1)", "timeoutSeconds": {}}}"#, raw))
                    .unwrap();
            assert_eq!(req.timeout_secs, 0, "{}", raw);
            assert_eq!(req.effective_timeout_secs(45), 45);
        }

        let fractional: ExecutionRequest =
            serde_json::from_str(r#"{"code": "x", "timeoutSeconds": 2.5}"#).unwrap();
        assert_eq!(fractional.timeout_secs, 3);

        let text: ExecutionRequest =
            serde_json::from_str(r#"{"code": "x", "timeoutSeconds": "10"}"#).unwrap();
        assert_eq!(text.timeout_secs, 10);
    }

    #[test]
    fn test_zero_timeout_substitutes_default() {
        let req = ExecutionRequest::new("print(1)");
        assert_eq!(req.effective_timeout_secs(45), 45);
        assert_eq!(req.effective_timeout_secs(0), DEFAULT_TIMEOUT_SECS);
        assert_eq!(req.with_timeout_secs(5).effective_timeout(45), Duration::from_secs(5));
    }

    #[test]
    fn test_validate_and_manifest() {
        assert!(ExecutionRequest::new("  \n").validate().is_err());

        let req = ExecutionRequest::new("import requests").with_requirements(["requests", "six"]);
        assert!(req.validate().is_ok());
        assert!(req.has_requirements());
        assert_eq!(req.manifest(), "requests\nsix\n");
    }

    #[test]
    fn test_result_serialization_omits_absent_fields() {
        let result = ExecutionResult {
            success: true,
            output: serde_json::json!({"a": 1}),
            stdout: None,
            stderr: None,
            error: None,
            exit_code: None,
            timed_out: false,
            execution_time: Utc::now(),
        };

        let value = serde_json::to_value(&result).unwrap();
        let obj = value.as_object().unwrap();
        assert!(obj.contains_key("executionTime"));
        assert!(!obj.contains_key("stdout"));
        assert!(!obj.contains_key("error"));
        assert!(!obj.contains_key("code"));
        assert!(!obj.contains_key("timedOut"));
        assert_eq!(result.output_text(), r#"{"a":1}"#);
    }
}
