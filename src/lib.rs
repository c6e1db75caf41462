#![warn(missing_docs)]
//! Crucible is a sandboxed function execution runtime: it takes user-authored
//! JavaScript plus a function kind, runs it in a fresh V8 isolate with a
//! bounded capability surface and a hard timeout, and reports a structured
//! success/failure result over a newline-delimited JSON protocol.

pub mod cmd;
pub mod config;
pub mod engine;
pub mod models;
pub mod protocol;
