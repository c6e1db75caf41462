//! Command implementations for the CLI.

pub mod execute;

pub use execute::ExecuteArgs;
