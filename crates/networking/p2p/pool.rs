use crate::wire::PeerClient;
use koorde_common::{DhtError, Space};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("invalid address: {0}")]
    InvalidArgument(String),
    #[error("address not in pool: {0}")]
    NotInPool(String),
    #[error("pool is closed")]
    Closed,
    #[error("failed to dial {addr}: {reason}")]
    Dial { addr: String, reason: String },
}

impl From<PoolError> for DhtError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::InvalidArgument(msg) => DhtError::InvalidArgument(msg),
            PoolError::NotInPool(addr) => DhtError::NotInPool(addr),
            PoolError::Closed => DhtError::Unavailable("connection pool is closed".to_string()),
            PoolError::Dial { addr, reason } => {
                DhtError::Unavailable(format!("dial {addr}: {reason}"))
            }
        }
    }
}

#[derive(Debug)]
struct PoolEntry {
    client: PeerClient,
    refcount: usize,
}

#[derive(Debug, Default)]
struct PoolState {
    entries: HashMap<String, PoolEntry>,
    closed: bool,
}

/// Reference-counted peer connections, keyed by address.
///
/// The pool only holds connections to nodes the routing table references;
/// each routing-table transition pairs with exactly one `add_ref` per added
/// address and one `release` per removed one. A connection is closed only
/// when its refcount reaches zero, and the pool never holds a connection to
/// the local node itself.
#[derive(Debug, Clone)]
pub struct ConnectionPool(Arc<PoolInner>);

#[derive(Debug)]
struct PoolInner {
    self_addr: String,
    space: Space,
    failure_timeout: Duration,
    state: Mutex<PoolState>,
}

impl ConnectionPool {
    pub fn new(self_addr: String, space: Space, failure_timeout: Duration) -> Self {
        Self(Arc::new(PoolInner {
            self_addr,
            space,
            failure_timeout,
            state: Mutex::new(PoolState::default()),
        }))
    }

    /// The default per-call deadline for remote operations.
    pub fn failure_timeout(&self) -> Duration {
        self.0.failure_timeout
    }

    fn check_addr(&self, addr: &str) -> Result<(), PoolError> {
        if addr.is_empty() {
            return Err(PoolError::InvalidArgument("empty address".to_string()));
        }
        if addr == self.0.self_addr {
            return Err(PoolError::InvalidArgument(format!(
                "own address {addr} is never pooled"
            )));
        }
        Ok(())
    }

    /// Takes a reference on `addr`, dialing a new connection if the address
    /// is not pooled yet. The lock is held across the dial so refcount
    /// updates stay serialized.
    pub async fn add_ref(&self, addr: &str) -> Result<(), PoolError> {
        self.check_addr(addr)?;
        let mut state = self.0.state.lock().await;
        if state.closed {
            return Err(PoolError::Closed);
        }
        if let Some(entry) = state.entries.get_mut(addr) {
            entry.refcount += 1;
            trace!(%addr, refcount = entry.refcount, "Retained pooled connection");
            return Ok(());
        }
        let client = PeerClient::connect(addr, self.0.space.clone())
            .await
            .map_err(|err| PoolError::Dial {
                addr: addr.to_string(),
                reason: err.to_string(),
            })?;
        state.entries.insert(
            addr.to_string(),
            PoolEntry {
                client,
                refcount: 1,
            },
        );
        trace!(%addr, "Opened pooled connection");
        Ok(())
    }

    /// A handle backed by the pooled connection. Never closes it.
    pub async fn get(&self, addr: &str) -> Result<PeerClient, PoolError> {
        let state = self.0.state.lock().await;
        state
            .entries
            .get(addr)
            .map(|entry| entry.client.clone())
            .ok_or_else(|| PoolError::NotInPool(addr.to_string()))
    }

    /// One-shot connection outside the pool; the caller owns it and must
    /// close it.
    pub async fn dial_ephemeral(&self, addr: &str) -> Result<PeerClient, PoolError> {
        self.check_addr(addr)?;
        PeerClient::connect(addr, self.0.space.clone())
            .await
            .map_err(|err| PoolError::Dial {
                addr: addr.to_string(),
                reason: err.to_string(),
            })
    }

    /// Drops a reference on `addr`; the connection is closed and evicted
    /// when the count reaches zero. Releasing an unknown address is a
    /// logged no-op so stabilizer cleanup paths cannot fail.
    pub async fn release(&self, addr: &str) {
        if addr.is_empty() || addr == self.0.self_addr {
            return;
        }
        let mut state = self.0.state.lock().await;
        let remaining = {
            let Some(entry) = state.entries.get_mut(addr) else {
                warn!(%addr, "Released address that is not pooled");
                return;
            };
            entry.refcount -= 1;
            entry.refcount
        };
        if remaining == 0 {
            trace!(%addr, "Closing pooled connection");
            if let Some(mut entry) = state.entries.remove(addr) {
                entry.client.close().await;
            }
        } else {
            trace!(%addr, refcount = remaining, "Released pooled connection");
        }
    }

    /// Closes every connection and marks the pool terminal: no further
    /// admissions. Idempotent; returns the first close error seen, if any.
    pub async fn close(&self) -> Result<(), PoolError> {
        let mut state = self.0.state.lock().await;
        if state.closed {
            return Ok(());
        }
        state.closed = true;
        for (addr, mut entry) in state.entries.drain() {
            debug!(%addr, "Closing pooled connection on shutdown");
            entry.client.close().await;
        }
        Ok(())
    }

    /// Addresses currently pooled, with their refcounts.
    pub async fn refcounts(&self) -> HashMap<String, usize> {
        let state = self.0.state.lock().await;
        state
            .entries
            .iter()
            .map(|(addr, entry)| (addr.clone(), entry.refcount))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    const SELF_ADDR: &str = "127.0.0.1:1";

    /// Accepts and holds connections so dials succeed without a real peer.
    async fn acceptor() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        addr
    }

    fn pool() -> ConnectionPool {
        let space = Space::new(8, 2, 2).unwrap();
        ConnectionPool::new(
            SELF_ADDR.to_string(),
            space,
            std::time::Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn refcounts_follow_add_and_release() {
        let pool = pool();
        let addr = acceptor().await;

        pool.add_ref(&addr).await.unwrap();
        pool.add_ref(&addr).await.unwrap();
        assert_eq!(pool.refcounts().await.get(&addr), Some(&2));
        assert!(pool.get(&addr).await.is_ok());

        pool.release(&addr).await;
        assert_eq!(pool.refcounts().await.get(&addr), Some(&1));
        pool.release(&addr).await;
        assert!(pool.refcounts().await.is_empty());
        assert!(matches!(
            pool.get(&addr).await,
            Err(PoolError::NotInPool(_))
        ));
    }

    #[tokio::test]
    async fn own_and_empty_addresses_are_rejected() {
        let pool = pool();
        assert!(matches!(
            pool.add_ref(SELF_ADDR).await,
            Err(PoolError::InvalidArgument(_))
        ));
        assert!(matches!(
            pool.add_ref("").await,
            Err(PoolError::InvalidArgument(_))
        ));
        assert!(matches!(
            pool.dial_ephemeral(SELF_ADDR).await,
            Err(PoolError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn release_of_unknown_address_is_a_noop() {
        let pool = pool();
        pool.release("10.0.0.9:4400").await;
        assert!(pool.refcounts().await.is_empty());
    }

    #[tokio::test]
    async fn close_is_terminal_and_idempotent() {
        let pool = pool();
        let addr = acceptor().await;
        pool.add_ref(&addr).await.unwrap();

        pool.close().await.unwrap();
        pool.close().await.unwrap();
        assert!(pool.refcounts().await.is_empty());
        assert!(matches!(pool.add_ref(&addr).await, Err(PoolError::Closed)));
    }

    #[tokio::test]
    async fn ephemeral_dials_are_not_tracked() {
        let pool = pool();
        let addr = acceptor().await;
        let mut client = pool.dial_ephemeral(&addr).await.unwrap();
        assert!(pool.refcounts().await.is_empty());
        client.close().await;
    }
}
