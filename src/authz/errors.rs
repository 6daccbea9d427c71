use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

/// Errors raised while building a rule registry from policy files.
#[derive(Debug, Error, Diagnostic)]
pub enum AuthzError {
    #[error("Failed to load policy file `{path}`")]
    #[diagnostic(
        code(crudgate::authz::policy_load),
        help("Check that the file exists and contains valid KDL syntax")
    )]
    PolicyLoadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid policy: {0}")]
    #[diagnostic(
        code(crudgate::authz::invalid_policy),
        help("Each policy file may only contain `resource \"<Type>\" {{ inbound \"...\" outbound \"...\" }}` nodes")
    )]
    InvalidPolicy(String),

    #[error("Invalid resource type `{0}`")]
    #[diagnostic(
        code(crudgate::authz::invalid_resource_type),
        help("Resource types must be non-empty and may not contain whitespace or any of `/ : > ( )`")
    )]
    InvalidResourceType(String),

    #[error("Invalid condition expression: {0}")]
    #[diagnostic(
        code(crudgate::authz::invalid_condition),
        help("Supported operators: ==, !=, >, <, >=, <=, &&, ||, !, in. Paths use dot notation (e.g. authToken.id)")
    )]
    InvalidCondition(String),

    #[error("KDL parse error: {0}")]
    #[diagnostic(
        code(crudgate::authz::kdl_parse),
        help("Check your KDL file syntax, see https://kdl.dev for the syntax reference")
    )]
    KdlParse(String),

    #[error("I/O error: {0}")]
    #[diagnostic(code(crudgate::authz::io))]
    Io(#[from] std::io::Error),
}

/// Failure reported by an evaluator instead of a boolean verdict.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EvaluationError {
    #[error("{0}")]
    Failed(String),

    #[error("evaluator did not respond within {}ms", .0.as_millis())]
    TimedOut(Duration),
}

impl EvaluationError {
    pub fn failed(message: impl Into<String>) -> Self {
        EvaluationError::Failed(message.into())
    }
}

/// Rejection handed back to the transport layer. The connection stays open;
/// only the operation that triggered the hook is refused.
#[derive(Debug, Clone, Error, Diagnostic, PartialEq, Eq)]
pub enum AccessError {
    #[error("{0}")]
    #[diagnostic(code(crudgate::access::blocked))]
    Blocked(String),

    #[error("Cannot publish to a CRUD resource channel")]
    #[diagnostic(
        code(crudgate::access::publish_not_allowed),
        help("CRUD channels are only published to by the server")
    )]
    PublishNotAllowed,

    #[error("{0}")]
    #[diagnostic(code(crudgate::access::evaluator))]
    Evaluator(String),
}

impl AccessError {
    /// Wire name the client libraries match on.
    pub fn name(&self) -> &'static str {
        match self {
            AccessError::Blocked(_) => "CRUDBlockedError",
            AccessError::PublishNotAllowed => "CRUDPublishNotAllowedError",
            AccessError::Evaluator(_) => "EvaluatorError",
        }
    }

    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            name: self.name().to_string(),
            message: self.to_string(),
        }
    }
}

/// `{ name, message }` object as the transport forwards it to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub name: String,
    pub message: String,
}

impl IntoResponse for AccessError {
    fn into_response(self) -> Response {
        let body = json!({ "allowed": false, "error": self.to_payload() });
        (StatusCode::FORBIDDEN, Json(body)).into_response()
    }
}
