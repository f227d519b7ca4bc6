pub mod error;
pub mod space;
pub mod types;

pub use error::DhtError;
pub use space::{Id, Space, SpaceError};
pub use types::{Node, Resource};
