use koorde_common::DhtError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("resource not found")]
    NotFound,
    #[error("store error: {0}")]
    Custom(String),
}

impl From<StoreError> for DhtError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => DhtError::NotFound,
            StoreError::Custom(msg) => DhtError::Internal(msg),
        }
    }
}
