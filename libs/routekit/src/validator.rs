//! Bind-time compiled request validation stages.
//!
//! A route record may name a schema file; the factory loads and compiles it
//! once, at bind time. Compiled stages are shared by every request the route
//! serves. A schema that cannot be loaded or compiled is a bind-time error
//! for that record only, so a typo in one schema name never silences a
//! sibling route.

use std::path::PathBuf;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::request::RequestContext;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema '{name}' unreadable at {path}: {source}")]
    Unreadable {
        name: String,
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("schema '{name}' is not well-formed JSON: {source}")]
    Malformed {
        name: String,
        source: serde_json::Error,
    },
    #[error("schema '{name}' is not a valid schema: {source}")]
    Invalid {
        name: String,
        source: Box<jsonschema::ValidationError<'static>>,
    },
}

/// Loads and compiles validation schemas from a directory of JSON files.
pub struct ValidatorFactory {
    schema_dir: PathBuf,
}

impl ValidatorFactory {
    pub fn new(schema_dir: impl Into<PathBuf>) -> Self {
        Self {
            schema_dir: schema_dir.into(),
        }
    }

    /// Build the validation stage for a record, if it names one.
    pub fn make(&self, schema: Option<&str>) -> Result<Option<ValidationStage>, SchemaError> {
        let Some(name) = schema.map(str::trim).filter(|n| !n.is_empty()) else {
            return Ok(None);
        };

        let path = self.schema_path(name);
        let bytes = std::fs::read(&path).map_err(|source| SchemaError::Unreadable {
            name: name.to_string(),
            path: path.clone(),
            source,
        })?;
        let document: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|source| SchemaError::Malformed {
                name: name.to_string(),
                source,
            })?;
        let compiled = jsonschema::validator_for(&document).map_err(|source| SchemaError::Invalid {
            name: name.to_string(),
            source: Box::new(source),
        })?;

        Ok(Some(ValidationStage {
            name: Arc::from(name),
            compiled: Arc::new(compiled),
        }))
    }

    fn schema_path(&self, name: &str) -> PathBuf {
        let mut path = self.schema_dir.join(name);
        if path.extension().is_none() {
            path.set_extension("json");
        }
        path
    }
}

/// A compiled schema applied to the request's validation subject.
#[derive(Clone)]
pub struct ValidationStage {
    name: Arc<str>,
    compiled: Arc<jsonschema::Validator>,
}

impl ValidationStage {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluate the request against the schema. Collects every violation,
    /// not just the first; on failure logs the full list and returns the
    /// rejection response.
    pub fn check(&self, ctx: &RequestContext) -> Option<Response> {
        let subject = ctx.validation_subject();
        let violations: Vec<String> = self
            .compiled
            .iter_errors(&subject)
            .map(|error| format!("{}: {}", error.instance_path, error))
            .collect();
        if violations.is_empty() {
            return None;
        }

        tracing::warn!(
            request_id = %ctx.request_id,
            schema = %self.name,
            uri = %ctx.uri,
            violations = ?violations,
            "request failed validation"
        );
        Some(
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Validation error." })),
            )
                .into_response(),
        )
    }
}

impl std::fmt::Debug for ValidationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationStage")
            .field("name", &self.name)
            .finish()
    }
}
