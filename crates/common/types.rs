use crate::space::Id;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A peer on the ring: its identifier and the transport endpoint it
/// answers on (`host:port`). Two nodes are the same node iff their
/// identifiers are equal, regardless of the advertised address.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: Id,
    pub addr: String,
}

impl Node {
    pub fn new(id: Id, addr: impl Into<String>) -> Self {
        Self {
            id,
            addr: addr.into(),
        }
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.addr)
    }
}

/// A stored key-value pair. `key` is the hash of `raw_key` truncated to the
/// ring width; the raw key is kept so ownership transfers re-announce the
/// original application key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub key: Id,
    pub raw_key: String,
    pub value: String,
}

impl Resource {
    pub fn new(key: Id, raw_key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key,
            raw_key: raw_key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.key, self.raw_key)
    }
}
