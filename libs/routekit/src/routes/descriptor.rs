//! Declarative route descriptor files.
//!
//! Descriptors are JSON documents that may carry `//` and `/* */`
//! annotations; comments are stripped before structural parsing. A document
//! that is not well-formed JSON is a [`ParseError`]. A well-formed document
//! that is semantically empty (no `config`, inactive `status`, no `routes`)
//! is a valid empty contribution: the file contributes zero records and the
//! caller logs why. One operator mistake in one file must never prevent the
//! rest of the application from starting.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Only files whose `config.status` equals this are processed further.
pub const ACTIVE_STATUS: &str = "ACTIVE";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouteFileConfig {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub prefix: Option<String>,
}

/// One declarative route entry, as authored.
///
/// Every field is defaulted so that a malformed record surfaces as a
/// record-level bind rejection instead of failing the whole file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouteRecord {
    pub request_uri: String,
    pub http_method: Option<String>,
    pub handler: String,
    pub validator_schema: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RouteFile {
    config: Option<RouteFileConfig>,
    routes: Option<Vec<RouteRecord>>,
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("route descriptor is not well-formed JSON: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Why a well-formed file contributed zero records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MissingConfig,
    Inactive(String),
    NoRoutes,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::MissingConfig => f.write_str("no config section"),
            SkipReason::Inactive(status) if status.is_empty() => f.write_str("no status"),
            SkipReason::Inactive(status) => write!(f, "status is '{status}', not '{ACTIVE_STATUS}'"),
            SkipReason::NoRoutes => f.write_str("no routes"),
        }
    }
}

/// An active file's contribution to the bind pass.
#[derive(Debug, Clone)]
pub struct ActiveFile {
    /// Prepended verbatim to every record's requestUri.
    pub prefix: String,
    pub routes: Vec<RouteRecord>,
}

#[derive(Debug)]
pub enum Disposition {
    Active(ActiveFile),
    Skipped(SkipReason),
}

/// Parse one descriptor document.
pub fn parse(bytes: &[u8]) -> Result<Disposition, ParseError> {
    let text = String::from_utf8_lossy(bytes);
    let stripped = strip_comments(&text);
    let file: RouteFile = serde_json::from_str(&stripped)?;

    let Some(config) = file.config else {
        return Ok(Disposition::Skipped(SkipReason::MissingConfig));
    };
    if config.status != ACTIVE_STATUS {
        return Ok(Disposition::Skipped(SkipReason::Inactive(config.status)));
    }
    let routes = file.routes.unwrap_or_default();
    if routes.is_empty() {
        return Ok(Disposition::Skipped(SkipReason::NoRoutes));
    }

    Ok(Disposition::Active(ActiveFile {
        prefix: config.prefix.unwrap_or_default(),
        routes,
    }))
}

/// Remove `//` and `/* */` comments outside of string literals. Newlines
/// inside block comments are kept so JSON error positions stay meaningful.
fn strip_comments(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            match c {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    if c == '\n' {
                        out.push('\n');
                    }
                    prev = c;
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// A parsed, active descriptor together with its origin, for diagnostics.
#[derive(Debug, Clone)]
pub struct LoadedRouteFile {
    pub path: PathBuf,
    pub file: ActiveFile,
}

/// Load every `*.json` descriptor under `dir`, recursively, in sorted path
/// order. Unreadable, malformed and inactive files are skipped with a
/// diagnostic; loading never aborts.
pub fn load_dir(dir: &Path) -> Vec<LoadedRouteFile> {
    let mut paths = Vec::new();
    collect_descriptor_paths(dir, &mut paths);
    paths.sort();

    let mut loaded = Vec::new();
    for path in paths {
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::warn!(path = %path.display(), error = %error, "route file unreadable, skipped");
                continue;
            }
        };
        match parse(&bytes) {
            Ok(Disposition::Active(file)) => {
                tracing::info!(path = %path.display(), routes = file.routes.len(), prefix = %file.prefix, "route file loaded");
                loaded.push(LoadedRouteFile { path, file });
            }
            Ok(Disposition::Skipped(reason)) => {
                tracing::info!(path = %path.display(), %reason, "route file contributes no routes");
            }
            Err(error) => {
                tracing::warn!(path = %path.display(), error = %error, "route file malformed, skipped");
            }
        }
    }
    loaded
}

fn collect_descriptor_paths(dir: &Path, out: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(error) => {
            tracing::warn!(dir = %dir.display(), error = %error, "route directory unreadable");
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_descriptor_paths(&path, out);
        } else if path.extension().is_some_and(|ext| ext == "json") {
            out.push(path);
        }
    }
}
