//! The `execute` command: reads one request, runs it, and streams protocol
//! lines to stdout.

use std::{io::Read, path::PathBuf, time::Duration};

use clap::Parser;
use serde_json::Value;
use thiserror::Error;

use crate::{
    config::SandboxConfig,
    engine::executor::Executor,
    models::{ErrorKind, FunctionResult},
    protocol::{ProtocolEncoder, ProtocolError},
};

/// Errors from running the `execute` command.
#[derive(Error, Debug)]
pub enum Error {
    /// Reading the request failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Loading the runtime configuration failed.
    #[error("Config error: {0}")]
    Config(#[from] crate::config::ConfigError),
    /// Writing protocol lines failed.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Arguments for the `execute` command.
#[derive(Parser, Debug)]
pub struct ExecuteArgs {
    /// The function kind selector, e.g. "actionRun" or "validation".
    #[arg(short, long)]
    kind: String,
    /// Execution timeout in milliseconds. Overrides the configured default.
    #[arg(short, long)]
    timeout_ms: Option<u64>,
    /// Path to the request document. Reads stdin when omitted.
    #[arg(short, long)]
    input: Option<PathBuf>,
}

/// Runs one request end to end and streams its protocol lines to stdout.
pub async fn execute(args: ExecuteArgs) -> Result<(), Error> {
    let config = SandboxConfig::load()?;
    let timeout = args
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(config.execution_timeout);

    let raw = match &args.input {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buffer = String::new();
            std::io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };

    let stdout = std::io::stdout();
    let mut encoder = ProtocolEncoder::new(stdout.lock());

    // A request that is not even JSON still gets a result line, so the
    // consumer never has to handle a silent exit.
    let request: Value = match serde_json::from_str(&raw) {
        Ok(request) => request,
        Err(e) => {
            let result = FunctionResult::failure(
                "",
                ErrorKind::user_code("InvalidRequestError"),
                e.to_string(),
            );
            encoder.result(&result)?;
            return Ok(());
        }
    };

    let executor = Executor::new(config);
    let outcome = executor.execute(&args.kind, request, timeout).await;

    for line in &outcome.output {
        encoder.output(line)?;
    }
    encoder.result(&outcome.result)?;

    Ok(())
}
