//! This module defines the `FunctionKind` enum.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A category of user-supplied function. The kind determines how the raw
/// code is wrapped into a runnable harness and how the raw result is shaped
/// into a typed success payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionKind {
    /// Runs an action against a component and echoes the handler's return
    /// value as the action payload.
    ActionRun,
    /// Runs a standalone preparatory function that may mutate the shared
    /// environment.
    Before,
    /// Runs a management operation handler.
    Management,
    /// Resolves an attribute value from a component view.
    ResolverFunction,
    /// Produces a declarative schema variant definition.
    SchemaVariantDefinition,
    /// Validates a value against a declarative validation format.
    Validation,
}

/// Error returned when a kind selector string is not recognized.
#[derive(Debug, Clone, Error)]
#[error("unknown function kind: {0}")]
pub struct UnknownFunctionKind(pub String);

impl FromStr for FunctionKind {
    type Err = UnknownFunctionKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "actionRun" => Ok(Self::ActionRun),
            "before" => Ok(Self::Before),
            "management" => Ok(Self::Management),
            "resolverfunction" => Ok(Self::ResolverFunction),
            "schemaVariantDefinition" => Ok(Self::SchemaVariantDefinition),
            "validation" => Ok(Self::Validation),
            other => Err(UnknownFunctionKind(other.to_string())),
        }
    }
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ActionRun => "actionRun",
            Self::Before => "before",
            Self::Management => "management",
            Self::ResolverFunction => "resolverfunction",
            Self::SchemaVariantDefinition => "schemaVariantDefinition",
            Self::Validation => "validation",
        };
        f.write_str(name)
    }
}
