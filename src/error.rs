use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Why a sandboxed run did not complete normally
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SandboxFailure {
    #[error("sandbox runtime unavailable: {0}")]
    Unavailable(String),

    /// `output` holds whatever the run printed before it was killed
    #[error("execution timeout after {seconds} seconds")]
    Timeout { seconds: u64, output: String },

    #[error("process exited abnormally (exit code {code})")]
    AbnormalExit { code: i32, output: String },

    #[error("failed to start sandboxed process: {0}")]
    Spawn(String),
}

impl SandboxFailure {
    /// Exit code recorded for a run that ended this way (-1 when none was observed)
    pub fn exit_code(&self) -> i32 {
        match self {
            SandboxFailure::AbnormalExit { code, .. } => *code,
            _ => -1,
        }
    }

    /// Output captured before the run failed, empty when it never started
    pub fn captured_output(&self) -> &str {
        match self {
            SandboxFailure::Timeout { output, .. } | SandboxFailure::AbnormalExit { output, .. } => {
                output
            }
            _ => "",
        }
    }
}

/// Unified error type for the classroom service
#[derive(Error, Debug)]
pub enum ClassroomError {
    // Request errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // Real-time fabric errors (never surfaced to peers)
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Routing violation: {0}")]
    RoutingViolation(String),

    // Execution errors
    #[error("Sandbox failure: {0}")]
    Sandbox(#[from] SandboxFailure),

    #[error("Execution quota exceeded for {requester}")]
    QuotaExceeded { requester: String },

    // Authentication errors
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database connection failed: {0}")]
    DatabaseConnection(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for classroom operations
pub type Result<T> = std::result::Result<T, ClassroomError>;

impl ClassroomError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            ClassroomError::InvalidInput(_) | ClassroomError::InvalidConfig(_) => {
                StatusCode::BAD_REQUEST
            }

            // 401 Unauthorized
            ClassroomError::Unauthorized(_) => StatusCode::UNAUTHORIZED,

            // 403 Forbidden
            ClassroomError::RoutingViolation(_) => StatusCode::FORBIDDEN,

            // 404 Not Found
            ClassroomError::NotFound(_) => StatusCode::NOT_FOUND,

            // 422 Unprocessable Entity
            ClassroomError::PolicyViolation(_) => StatusCode::UNPROCESSABLE_ENTITY,

            // 429 Too Many Requests
            ClassroomError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 503 Service Unavailable
            ClassroomError::Sandbox(SandboxFailure::Unavailable(_))
            | ClassroomError::DatabaseConnection(_) => StatusCode::SERVICE_UNAVAILABLE,

            // 500 Internal Server Error
            ClassroomError::Sandbox(_)
            | ClassroomError::Transport(_)
            | ClassroomError::Database(_)
            | ClassroomError::Io(_)
            | ClassroomError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

// Every HTTP failure uses the same envelope as successful responses
impl IntoResponse for ClassroomError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "success": false,
            "error": self.to_string(),
        });

        (status, Json(body)).into_response()
    }
}

impl From<url::ParseError> for ClassroomError {
    fn from(err: url::ParseError) -> Self {
        ClassroomError::InvalidConfig(err.to_string())
    }
}
