//! Terminal execution results and the structured error taxonomy.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The terminal result of one execution. Exactly one of these is emitted
/// per request, after any output lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FunctionResult {
    /// The function ran to completion; the payload is kind-specific.
    Success(Value),
    /// The function failed; the error taxonomy is stable across kinds.
    Failure(FunctionResultFailure),
}

impl FunctionResult {
    /// Builds a failure result for the given execution.
    pub fn failure(
        execution_id: impl Into<String>,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self::Failure(FunctionResultFailure {
            execution_id: execution_id.into(),
            error: FunctionResultFailureError { kind, message: message.into() },
        })
    }
}

/// The failure half of a [`FunctionResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionResultFailure {
    /// Correlation id of the failed execution. May be empty when the
    /// failure was synthesized before the request parsed.
    pub execution_id: String,

    /// The structured error.
    pub error: FunctionResultFailureError,
}

/// The structured error carried by a failure result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionResultFailureError {
    /// Category of the error.
    pub kind: ErrorKind,

    /// Human-readable message, derived from the original exception where
    /// one exists.
    pub message: String,
}

/// Category of a failure. Uncategorized exceptions thrown by user code are
/// wrapped as `UserCodeException` carrying the original exception's name;
/// timeouts are synthesized by the orchestrator and never originate in user
/// code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The execution exceeded its configured timeout.
    TimeoutError,
    /// Any exception raised by (or on behalf of) user code; carries the
    /// original exception's name as an opaque string.
    UserCodeException(String),
}

impl ErrorKind {
    /// Convenience constructor for `UserCodeException`.
    pub fn user_code(name: impl Into<String>) -> Self {
        Self::UserCodeException(name.into())
    }
}

/// Per-kind success payloads. Each kind shapes the raw sandbox value into
/// one of these before serialization into the terminal result line.
pub mod success {
    use super::*;

    /// Success payload for the `actionRun` kind.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ActionRunResultSuccess {
        /// Correlation id of the execution.
        pub execution_id: String,
        /// The handler's return value.
        pub payload: Value,
    }

    /// Success payload for the `resolverfunction` kind.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ResolverFunctionResultSuccess {
        /// Correlation id of the execution.
        pub execution_id: String,
        /// The resolved value.
        pub data: Value,
        /// True when the handler resolved to nothing.
        pub unset: bool,
    }

    /// Success payload for the `validation` kind. A value that fails
    /// validation is still a success; the outcome travels in `error`.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ValidationResultSuccess {
        /// Correlation id of the execution.
        pub execution_id: String,
        /// The validation failure message, absent when the value passed.
        #[serde(skip_serializing_if = "Option::is_none")]
        pub error: Option<String>,
    }

    /// Success payload for the `schemaVariantDefinition` kind.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SchemaVariantDefinitionResultSuccess {
        /// Correlation id of the execution.
        pub execution_id: String,
        /// The declarative schema description produced by the handler.
        pub definition: Value,
    }

    /// Success payload for the `management` kind.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ManagementResultSuccess {
        /// Correlation id of the execution.
        pub execution_id: String,
        /// The operation outcome returned by the handler.
        pub payload: Value,
    }

    /// Success payload for the `before` kind: status only.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct BeforeResultSuccess {
        /// Correlation id of the execution.
        pub execution_id: String,
    }
}
