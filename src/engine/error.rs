use uuid::Uuid;

use crate::model::ItemStatus;

#[derive(Debug, PartialEq, Eq)]
pub enum EngineError {
    /// Unknown entity — also covers ownership mismatches, which are
    /// reported as not-found so callers cannot probe other parties'
    /// bookings.
    NotFound {
        what: &'static str,
        id: Uuid,
    },
    AlreadyExists {
        what: &'static str,
        id: Uuid,
    },
    InvalidTransition {
        from: ItemStatus,
        requested: ItemStatus,
    },
    EmptyCart(Uuid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound { what, id } => write!(f, "{what} not found: {id}"),
            EngineError::AlreadyExists { what, id } => write!(f, "{what} already exists: {id}"),
            EngineError::InvalidTransition { from, requested } => {
                write!(f, "invalid transition: {from} -> {requested}")
            }
            EngineError::EmptyCart(customer_id) => {
                write!(f, "cart is empty for customer: {customer_id}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
