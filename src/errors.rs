use thiserror::Error;

/// Typed error hierarchy for lattice.
///
/// Use at module boundaries (dispatch, rate limiting, vault, queue, stores).
/// Internal/leaf functions can continue using `anyhow::Result`; the `Internal`
/// variant allows seamless conversion via the `?` operator.
#[derive(Debug, Error)]
pub enum LatticeError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid tool name: {0}")]
    InvalidName(String),

    #[error("Dispatcher is not initialized")]
    NotInitialized,

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Invalid token format: {0}")]
    InvalidTokenFormat(String),

    #[error("No {kind} credential available for tool '{tool}'")]
    AuthUnavailable { tool: String, kind: String },

    #[error("Rate limit exceeded for tier '{tier}'")]
    RateLimitExceeded { tier: String },

    #[error("Task visibility timeout: {0}")]
    VisibilityTimeout(String),

    #[error("Task dependencies unsatisfied: {0}")]
    DependencyUnsatisfied(String),

    /// Integrity failures (tamper, checksum mismatch) are deliberately
    /// collapsed into this coarse form before reaching callers. The audit
    /// log carries the detail.
    #[error("Resource temporarily unavailable")]
    Unavailable,

    #[error("Token rotation failed: {0}")]
    RotationFailed(String),

    #[error("Backend error: {message}")]
    Backend { message: String, retryable: bool },

    #[error("Misconfigured: {0}")]
    Misconfigured(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Convenience alias for results using LatticeError.
pub type LatticeResult<T> = std::result::Result<T, LatticeError>;

impl LatticeError {
    /// Whether this error is retryable (rate limits, transient backend errors).
    pub fn is_retryable(&self) -> bool {
        match self {
            LatticeError::RateLimitExceeded { .. } | LatticeError::VisibilityTimeout(_) => true,
            LatticeError::Backend { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// JSON-RPC error code for the transport layer.
    ///
    /// The standard space (-32600..-32700) covers protocol faults; the
    /// application space -32001..-32004 covers dispatch, rate limiting,
    /// credentials and backend availability.
    pub fn jsonrpc_code(&self) -> i64 {
        match self {
            LatticeError::ToolNotFound(_) | LatticeError::InvalidName(_) => -32001,
            LatticeError::RateLimitExceeded { .. } => -32002,
            LatticeError::AuthUnavailable { .. } | LatticeError::InvalidTokenFormat(_) => -32003,
            LatticeError::Backend { .. }
            | LatticeError::Unavailable
            | LatticeError::VisibilityTimeout(_)
            | LatticeError::DependencyUnsatisfied(_) => -32004,
            LatticeError::InvalidParams(_) => -32602,
            LatticeError::NotInitialized
            | LatticeError::RotationFailed(_)
            | LatticeError::Misconfigured(_)
            | LatticeError::Internal(_) => -32603,
        }
    }
}
