//! Wire-facing data model: function kinds, requests, results, and output
//! lines.

pub mod kind;
pub mod output;
pub mod request;
pub mod result;

pub use kind::{FunctionKind, UnknownFunctionKind};
pub use output::{OutputLevel, OutputLine, OutputStream};
pub use result::{ErrorKind, FunctionResult, FunctionResultFailure, FunctionResultFailureError};
