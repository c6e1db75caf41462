//! The line-oriented wire protocol: one JSON document per line, every line
//! tagged with its protocol discriminator. All output lines for an
//! execution are written before its single result line.

use std::io::Write;

use serde::Serialize;
use thiserror::Error;

use crate::models::{FunctionResult, OutputLine};

/// A single wire line, tagged so consumers can route without peeking at
/// payload fields.
#[derive(Debug, Serialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
enum ProtocolMessage<'a> {
    Output(&'a OutputLine),
    Result(&'a FunctionResult),
}

/// Errors that can occur while writing protocol lines.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The message could not be serialized.
    #[error("failed to serialize protocol message: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The underlying writer failed.
    #[error("failed to write protocol message: {0}")]
    Io(#[from] std::io::Error),
}

/// Writes protocol messages as newline-delimited JSON. Each line is flushed
/// as it is written so consumers can stream output while the function is
/// still running.
pub struct ProtocolEncoder<W: Write> {
    writer: W,
}

impl<W: Write> ProtocolEncoder<W> {
    /// Wraps a writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Writes one output line.
    pub fn output(&mut self, line: &OutputLine) -> Result<(), ProtocolError> {
        self.write(&ProtocolMessage::Output(line))
    }

    /// Writes the terminal result line.
    pub fn result(&mut self, result: &FunctionResult) -> Result<(), ProtocolError> {
        self.write(&ProtocolMessage::Result(result))
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write(&mut self, message: &ProtocolMessage<'_>) -> Result<(), ProtocolError> {
        let line = serde_json::to_string(message)?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}
