//! Out-of-band output lines emitted while a function executes.

use serde::{Deserialize, Serialize};

/// A single out-of-band log line produced during an execution. All output
/// lines for an execution precede its terminal result line on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputLine {
    /// Correlation id of the execution that produced this line.
    pub execution_id: String,

    /// The stream the line is attributed to.
    pub stream: OutputStream,

    /// Severity of the line.
    pub level: OutputLevel,

    /// Optional grouping label for consumers that aggregate output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    /// The log message itself.
    pub message: String,
}

/// The stream an output line is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    /// Regular output.
    Stdout,
    /// Diagnostic output.
    Stderr,
}

/// Severity of an output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputLevel {
    /// Verbose diagnostics.
    Debug,
    /// Informational output.
    Info,
    /// Recoverable problems.
    Warn,
    /// Errors reported by the function itself.
    Error,
}

impl OutputLevel {
    /// Maps a console level string reported by the sandbox. Unknown levels
    /// fall back to `Info`.
    pub fn from_console(level: &str) -> Self {
        match level {
            "debug" => Self::Debug,
            "warn" => Self::Warn,
            "error" => Self::Error,
            _ => Self::Info,
        }
    }
}

impl OutputStream {
    /// The stream a console level is conventionally attributed to.
    pub fn for_level(level: OutputLevel) -> Self {
        match level {
            OutputLevel::Warn | OutputLevel::Error => Self::Stderr,
            _ => Self::Stdout,
        }
    }
}
