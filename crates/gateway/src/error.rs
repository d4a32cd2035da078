use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Outbound gateway failure.
///
/// `Unavailable` means nothing is known about the outcome and the caller may
/// retry. `Rejected` is the gateway's explicit answer and is terminal for
/// that attempt.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    #[error("gateway rejected the request (code {code}): {message}")]
    Rejected { code: i64, message: String },

    /// Local precondition for building a request failed.
    #[error("gateway request could not be built: {0}")]
    Misconfigured(String),
}

impl GatewayError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable(reason.into())
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Unavailable("request timed out".to_string())
        } else if err.is_connect() {
            Self::Unavailable("connection failed".to_string())
        } else {
            Self::Unavailable(err.without_url().to_string())
        }
    }
}
