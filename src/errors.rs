use rust_decimal::Decimal;

use crate::entities::order::OrderStatus;

/// Error taxonomy for the settlement core.
///
/// Every failure a caller can act on has its own stable variant, so the
/// presentation layer can map errors to messages without inspecting
/// internal state. Money-mutating operations fail atomically: when one of
/// these errors surfaces, every entity is exactly as it was before the
/// call.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("database error: {0}")]
    DatabaseError(#[from] sea_orm::DbErr),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("insufficient wallet funds: requested {requested}, available {available}")]
    InsufficientFunds {
        requested: Decimal,
        available: Decimal,
    },

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("gateway signature mismatch")]
    SignatureMismatch,

    #[error("payment failed: {0}")]
    PaymentFailed(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ServiceError {
    /// True when the error indicates a caller mistake rather than an
    /// infrastructure fault.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            ServiceError::DatabaseError(_) | ServiceError::Other(_)
        )
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}
