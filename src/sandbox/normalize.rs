//! Result normalization shared by both executors
//!
//! Captured stdout is decoded as a JSON object or array when possible and otherwise passed
//! through as trimmed text. Decoding never fails a run.

use chrono::Utc;
use serde_json::Value;

use super::executor::ExecutionResult;

/// What a run produced before it is wrapped into an `ExecutionResult`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i64>,
    pub timed_out: bool,
}

impl RawOutput {
    pub fn new(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        RawOutput {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code: None,
            timed_out: false,
        }
    }

    pub fn with_exit_code(mut self, code: i64) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn timed_out(mut self) -> Self {
        self.timed_out = true;
        self
    }
}

/// Decode trimmed stdout as a JSON object or array, falling back to the
/// trimmed text. Bare scalars such as `4` or `true` stay text.
pub fn decode_output(stdout: &str) -> Value {
    let trimmed = stdout.trim();
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => value,
        _ => Value::String(trimmed.to_string()),
    }
}

/// Success envelope. Streams are included only when `capture` is set.
pub fn normalize(raw: RawOutput, capture: bool) -> ExecutionResult {
    let output = decode_output(&raw.stdout);
    let (stdout, stderr) = if capture {
        (Some(raw.stdout), Some(raw.stderr))
    } else {
        (None, None)
    };

    ExecutionResult {
        success: true,
        output,
        stdout,
        stderr,
        error: None,
        exit_code: None,
        timed_out: false,
        execution_time: Utc::now(),
    }
}

/// Failure envelope; always carries whatever was captured
pub fn normalize_failure(raw: RawOutput, error: impl Into<String>) -> ExecutionResult {
    ExecutionResult {
        success: false,
        output: decode_output(&raw.stdout),
        stdout: Some(raw.stdout),
        stderr: Some(raw.stderr),
        error: Some(error.into()),
        exit_code: raw.exit_code,
        timed_out: raw.timed_out,
        execution_time: Utc::now(),
    }
}

/// Error text for a non-zero exit: the last stderr line if there is one
pub fn exit_error_message(stderr: &str, exit_code: Option<i64>) -> String {
    let last_line = stderr.lines().rev().map(str::trim).find(|l| !l.is_empty());
    match (last_line, exit_code) {
        (Some(line), _) => line.to_string(),
        (None, Some(code)) => format!("Process exited with code {}", code),
        (None, None) => "Process exited abnormally".to_string(),
    }
}
