/// Closed error taxonomy surfaced to clients and peers.
///
/// Every failure leaving the node maps to exactly one of these kinds;
/// module-local errors (store, wire, pool) convert into it at the facade.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DhtError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not found")]
    NotFound,
    #[error("deadline exceeded")]
    Timeout,
    #[error("canceled")]
    Canceled,
    #[error("peer unavailable: {0}")]
    Unavailable(String),
    #[error("address not in pool: {0}")]
    NotInPool(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl DhtError {
    /// Stable machine-readable name for the error kind, used on the wire
    /// and in client responses.
    pub const fn kind(&self) -> &'static str {
        match self {
            DhtError::InvalidArgument(_) => "INVALID_ARGUMENT",
            DhtError::NotFound => "NOT_FOUND",
            DhtError::Timeout => "TIMEOUT",
            DhtError::Canceled => "CANCELED",
            DhtError::Unavailable(_) => "UNAVAILABLE",
            DhtError::NotInPool(_) => "NOT_IN_POOL",
            DhtError::Internal(_) => "INTERNAL",
        }
    }
}
