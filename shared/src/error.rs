use lambda_http::http::StatusCode;
use thiserror::Error;

/// Failure reported by an [`ItemStore`](crate::store::ItemStore) call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store rejected the request before executing it (throughput or rate limit).
    #[error("request throttled: {0}")]
    Throttled(String),
    /// Timeouts, dispatch failures and 5xx responses.
    #[error("transient store failure: {0}")]
    Transient(String),
    /// A condition expression (or a transaction condition) did not hold.
    #[error("condition check failed: {0}")]
    ConditionFailed(String),
    #[error("store request failed: {0}")]
    Permanent(String),
}

impl StoreError {
    /// Whether the request can be retried without risking a double write.
    pub fn is_throttle(&self) -> bool {
        matches!(self, StoreError::Throttled(_))
    }

    /// Whether a read can be retried.
    pub fn is_retryable_read(&self) -> bool {
        matches!(self, StoreError::Throttled(_) | StoreError::Transient(_))
    }
}

/// Missing or malformed environment at cold start.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(&'static str),
    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
    /// The Cognito signing keys could not be fetched or parsed.
    #[error("failed to load token signing keys: {0}")]
    Jwks(String),
}

/// Errors surfaced by the access layer to REST and GraphQL callers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        ApiError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::Validation(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        ApiError::Forbidden(msg.into())
    }

    /// HTTP status used by the REST handlers.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Store(StoreError::ConditionFailed(_)) => StatusCode::CONFLICT,
            ApiError::Store(StoreError::Throttled(_) | StoreError::Transient(_)) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Store(StoreError::Permanent(_)) => StatusCode::BAD_GATEWAY,
            ApiError::Config(_) | ApiError::Serialization(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable code, shared by REST bodies and GraphQL `errorType`.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound { .. } => "NOT_FOUND",
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::Conflict(_) | ApiError::Store(StoreError::ConditionFailed(_)) => "CONFLICT",
            ApiError::Store(StoreError::Throttled(_) | StoreError::Transient(_)) => {
                "STORE_UNAVAILABLE"
            }
            ApiError::Store(StoreError::Permanent(_)) => "STORE_ERROR",
            ApiError::Config(_) => "CONFIGURATION_ERROR",
            ApiError::Serialization(_) | ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Serialization(err.to_string())
    }
}

impl From<lambda_http::http::Error> for ApiError {
    fn from(err: lambda_http::http::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl From<serde_dynamo::Error> for ApiError {
    fn from(err: serde_dynamo::Error) -> Self {
        ApiError::Serialization(err.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// A failed `attribute_not_exists` create means the id is taken.
pub(crate) fn on_duplicate(err: StoreError, entity: &str, id: &str) -> ApiError {
    match err {
        StoreError::ConditionFailed(_) => {
            ApiError::Conflict(format!("{} {} already exists", entity, id))
        }
        other => other.into(),
    }
}

/// A failed `attribute_exists` write means the record is gone.
pub(crate) fn on_missing(err: StoreError, entity: &'static str, id: &str) -> ApiError {
    match err {
        StoreError::ConditionFailed(_) => ApiError::not_found(entity, id),
        other => other.into(),
    }
}
