//! Code materialization: turns transport-encoded source into one
//! self-contained script.
//!
//! The isolated execution context cannot reach the filesystem or network at
//! run time, so any static imports the source references are resolved and
//! inlined here, ahead of execution. Sources are staged in a transient
//! directory that is removed on every exit path.

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tempfile::TempDir;
use thiserror::Error;

/// A self-contained, import-resolved executable unit.
#[derive(Debug, Clone)]
pub struct Bundle {
    /// The final script text, ready for the isolation boundary.
    pub code: String,
}

/// Errors that can occur while materializing a bundle.
#[derive(Debug, Error)]
pub enum BundlerError {
    /// The transport encoding could not be decoded.
    #[error("code is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    /// The decoded bytes are not valid UTF-8 source text.
    #[error("code is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Staging the source in the transient directory failed.
    #[error("failed to stage code: {0}")]
    Io(#[from] std::io::Error),

    /// A static import could not be resolved ahead of execution.
    #[error("unresolved import: {0}")]
    UnresolvedImport(String),
}

impl BundlerError {
    /// The error identity surfaced inside `UserCodeException` failures.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Decode(_) => "Base64DecodeError",
            Self::Utf8(_) => "Utf8DecodeError",
            Self::Io(_) => "BundleIoError",
            Self::UnresolvedImport(_) => "UnresolvedImportError",
        }
    }
}

/// Decodes transport-encoded source and produces a self-contained bundle.
pub fn materialize(code_base64: &str) -> Result<Bundle, BundlerError> {
    let source = String::from_utf8(BASE64.decode(code_base64.trim())?)?;

    // Stage the source transiently; the directory is deleted when `staging`
    // drops, on success and failure alike.
    let staging = TempDir::new()?;
    let entry = staging.path().join("entry.js");
    fs::write(&entry, &source)?;

    let mut included = HashSet::new();
    let code = inline_file(&entry, staging.path(), &mut included)?;

    Ok(Bundle { code })
}

/// Inlines a staged module and, recursively, every relative module it
/// imports. A module is included at most once; re-imports (including
/// cycles) are skipped. Import statements must sit on a single line.
fn inline_file(
    path: &Path,
    root: &Path,
    included: &mut HashSet<PathBuf>,
) -> Result<String, BundlerError> {
    let canonical = fs::canonicalize(path)?;
    if !included.insert(canonical.clone()) {
        return Ok(String::new());
    }

    let source = fs::read_to_string(&canonical)?;
    let from_dir = canonical.parent().unwrap_or(root).to_path_buf();

    let mut out = String::with_capacity(source.len());
    for line in source.lines() {
        if let Some(specifier) = import_specifier(line) {
            let resolved = resolve_import(&specifier, &from_dir, root)?;
            out.push_str(&inline_file(&resolved, root, included)?);
        } else {
            out.push_str(&strip_export(line));
            out.push('\n');
        }
    }

    Ok(out)
}

/// Extracts the module specifier from a single-line static import, if the
/// line is one.
fn import_specifier(line: &str) -> Option<String> {
    let trimmed = line.trim_start();
    let rest = trimmed.strip_prefix("import")?;
    if !rest.starts_with([' ', '"', '\'']) {
        return None;
    }

    let quoted = match rest.find(" from ") {
        Some(idx) => &rest[idx + " from ".len()..],
        None => rest,
    };
    extract_quoted(quoted)
}

fn extract_quoted(s: &str) -> Option<String> {
    let s = s.trim_start();
    let quote = s.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let inner = &s[1..];
    inner.find(quote).map(|end| inner[..end].to_string())
}

/// Resolves a specifier against the importing module's directory. Only
/// relative specifiers can resolve: the sandbox carries no module registry,
/// so bare specifiers are unresolvable by construction. Resolved paths must
/// stay inside the staging directory.
fn resolve_import(
    specifier: &str,
    from_dir: &Path,
    root: &Path,
) -> Result<PathBuf, BundlerError> {
    if !specifier.starts_with("./") && !specifier.starts_with("../") {
        return Err(BundlerError::UnresolvedImport(specifier.to_string()));
    }

    let mut candidate = from_dir.join(specifier);
    if candidate.extension().is_none() {
        candidate.set_extension("js");
    }

    let resolved = fs::canonicalize(&candidate)
        .map_err(|_| BundlerError::UnresolvedImport(specifier.to_string()))?;
    let root = fs::canonicalize(root)?;
    if !resolved.starts_with(&root) {
        return Err(BundlerError::UnresolvedImport(specifier.to_string()));
    }

    Ok(resolved)
}

/// Drops `export` qualifiers so inlined modules run as plain script
/// statements.
fn strip_export(line: &str) -> String {
    let indent_len = line.len() - line.trim_start().len();
    let (indent, rest) = line.split_at(indent_len);
    let rest = rest
        .strip_prefix("export default ")
        .or_else(|| rest.strip_prefix("export "))
        .unwrap_or(rest);
    format!("{indent}{rest}")
}
