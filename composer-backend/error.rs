use axum::Json;
use hyper::StatusCode;
use serde_json::{Value, json};

/// Errors raised by flow-editor operations.
///
/// Every variant is caught at the action boundary (HTTP handler, CLI
/// command, session action) and turned into a user-facing message.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ComposerError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("flow {0} is locked")]
    Locked(String),

    #[error("persistence failed: {0}")]
    Persistence(String),

    #[error("{0}")]
    TransferPrecondition(String),

    #[error("malformed form schema: {0}")]
    MalformedFormSchema(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("node {0} is read-only")]
    ReadOnly(String),

    #[error("node {0} is not awaiting action")]
    NotActionable(String),

    #[error("node {0} has required fields left blank")]
    IncompleteForm(String),

    #[error("conflict: {0}")]
    Conflict(String),
}

impl ComposerError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        ComposerError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Wrap a transport/storage failure. The full `anyhow` chain is kept in
    /// the message so logs stay useful.
    pub fn persistence(err: anyhow::Error) -> Self {
        ComposerError::Persistence(format!("{err:#}"))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ComposerError::Validation(_) | ComposerError::MalformedFormSchema(_) => {
                StatusCode::BAD_REQUEST
            }
            ComposerError::Locked(_) => StatusCode::LOCKED,
            ComposerError::NotFound { .. } => StatusCode::NOT_FOUND,
            ComposerError::TransferPrecondition(_)
            | ComposerError::IncompleteForm(_)
            | ComposerError::NotActionable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ComposerError::ReadOnly(_) | ComposerError::Conflict(_) => StatusCode::CONFLICT,
            ComposerError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to the operator. Persistence failures get a generic,
    /// retry-safe text; the details only go to the logs.
    pub fn user_message(&self) -> String {
        match self {
            ComposerError::Persistence(_) => {
                "Não foi possível salvar as alterações. Tente novamente.".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<ComposerError> for (StatusCode, Json<Value>) {
    fn from(err: ComposerError) -> Self {
        if let ComposerError::Persistence(detail) = &err {
            tracing::error!(error = %detail, "persistence failure");
        }
        (err.status_code(), Json(json!({ "error": err.to_string() })))
    }
}
