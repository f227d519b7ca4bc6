pub mod client;
pub mod codec;
pub mod message;
pub mod server;

pub use client::PeerClient;
pub use codec::{CodecError, KoordeCodec, MAX_FRAME_SIZE};
pub use message::Message;

use koorde_common::DhtError;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("request timed out")]
    Timeout,
    #[error("request canceled")]
    Canceled,
    #[error("connection closed: {0}")]
    ConnectionClosed(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<WireError> for DhtError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Timeout => DhtError::Timeout,
            WireError::Canceled => DhtError::Canceled,
            other => DhtError::Unavailable(other.to_string()),
        }
    }
}
