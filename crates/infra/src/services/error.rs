//! Service-level error taxonomy.

use thiserror::Error;

use cardvault_auth::AuthzError;
use cardvault_core::DomainError;
use cardvault_gateway::GatewayError;

use crate::store::StoreError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Malformed input, rejected before any transaction.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found")]
    NotFound,

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Reservation aborted; nothing was locked.
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: u32, available: u64 },

    /// Guard rejection; nothing was written.
    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Network, timeout or unreadable response. Order left unchanged.
    #[error("payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// Explicit error code from the gateway.
    #[error("payment gateway rejected the request (code {code}): {message}")]
    GatewayRejected { code: i64, message: String },

    /// The order was committed but its payment link could not be produced.
    #[error("order {order_no} was created but payment could not be started: {reason}")]
    PartialSuccess { order_no: String, reason: String },

    /// A concurrent writer changed the order first.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<DomainError> for ServiceError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(m) | DomainError::InvalidId(m) => ServiceError::Validation(m),
            DomainError::NotFound => ServiceError::NotFound,
            DomainError::Conflict(m) => ServiceError::Conflict(m),
            DomainError::Unauthorized => ServiceError::Forbidden("unauthorized".to_string()),
            DomainError::InsufficientStock {
                requested,
                available,
            } => ServiceError::InsufficientStock {
                requested,
                available,
            },
            DomainError::InvalidStateTransition { from, to } => {
                ServiceError::InvalidStateTransition { from, to }
            }
            DomainError::InvariantViolation(m) => ServiceError::Internal(m),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Domain(e) => e.into(),
            other => {
                tracing::error!(error = %other, "store failure");
                ServiceError::Internal(other.to_string())
            }
        }
    }
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unavailable(m) => ServiceError::GatewayUnavailable(m),
            GatewayError::Rejected { code, message } => ServiceError::GatewayRejected { code, message },
            GatewayError::Misconfigured(m) => ServiceError::Internal(m),
        }
    }
}

impl From<AuthzError> for ServiceError {
    fn from(err: AuthzError) -> Self {
        ServiceError::Forbidden(err.to_string())
    }
}
