//! Per-kind execution requests as received from the host process.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A preparatory function executed before the main function. Hooks run
/// strictly in list order; each may mutate the shared environment consumed
/// by every subsequent stage of the same request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeforeFunction {
    /// Name of the entry point inside the hook's bundle.
    pub handler: String,

    /// Transport-encoded source of the hook.
    pub code_base64: String,

    /// Argument passed to the hook's handler.
    #[serde(default)]
    pub arg: Value,
}

/// Request for the `actionRun` kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRunRequest {
    /// Opaque correlation id for this execution.
    pub execution_id: String,
    /// Name of the entry point inside the bundle.
    pub handler: String,
    /// Transport-encoded source.
    pub code_base64: String,
    /// Ordered list of preparatory functions.
    #[serde(default)]
    pub before: Vec<BeforeFunction>,
    /// Initial shared environment for this request.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Action context passed to the handler.
    #[serde(default)]
    pub args: Value,
}

/// Request for the `resolverfunction` kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolverFunctionRequest {
    /// Opaque correlation id for this execution.
    pub execution_id: String,
    /// Name of the entry point inside the bundle.
    pub handler: String,
    /// Transport-encoded source.
    pub code_base64: String,
    /// Ordered list of preparatory functions.
    #[serde(default)]
    pub before: Vec<BeforeFunction>,
    /// Initial shared environment for this request.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// The component view the resolver runs against.
    #[serde(default)]
    pub component: ResolverFunctionComponent,
}

/// The component view passed to a resolver function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolverFunctionComponent {
    /// Properties of the component being resolved.
    #[serde(default)]
    pub data: Value,

    /// Views of the component's parents, oldest ancestor last.
    #[serde(default)]
    pub parents: Vec<Value>,
}

/// Request for the `validation` kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationRequest {
    /// Opaque correlation id for this execution.
    pub execution_id: String,
    /// Name of the entry point inside the bundle. Unused by the built-in
    /// validator but accepted for wire compatibility.
    #[serde(default)]
    pub handler: String,
    /// Transport-encoded source. May be empty; the validation harness does
    /// the work itself.
    #[serde(default)]
    pub code_base64: String,
    /// Ordered list of preparatory functions.
    #[serde(default)]
    pub before: Vec<BeforeFunction>,
    /// Initial shared environment for this request.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// The value under validation.
    #[serde(default)]
    pub value: Value,
    /// JSON text describing the schema the value must satisfy.
    pub validation_format: String,
}

/// Request for the `schemaVariantDefinition` kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaVariantDefinitionRequest {
    /// Opaque correlation id for this execution.
    pub execution_id: String,
    /// Name of the entry point inside the bundle.
    pub handler: String,
    /// Transport-encoded source.
    pub code_base64: String,
    /// Ordered list of preparatory functions.
    #[serde(default)]
    pub before: Vec<BeforeFunction>,
    /// Initial shared environment for this request.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Request for the `management` kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagementRequest {
    /// Opaque correlation id for this execution.
    pub execution_id: String,
    /// Name of the entry point inside the bundle.
    pub handler: String,
    /// Transport-encoded source.
    pub code_base64: String,
    /// Ordered list of preparatory functions.
    #[serde(default)]
    pub before: Vec<BeforeFunction>,
    /// Initial shared environment for this request.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Management operation context passed to the handler.
    #[serde(default)]
    pub args: Value,
}

/// Request for the `before` kind: a hook executed standalone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeforeRequest {
    /// Opaque correlation id for this execution.
    pub execution_id: String,
    /// Name of the entry point inside the bundle.
    pub handler: String,
    /// Transport-encoded source.
    pub code_base64: String,
    /// Ordered list of preparatory functions run before this one.
    #[serde(default)]
    pub before: Vec<BeforeFunction>,
    /// Initial shared environment for this request.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Argument passed to the handler.
    #[serde(default)]
    pub arg: Value,
}
