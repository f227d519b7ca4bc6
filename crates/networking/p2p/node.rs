use crate::{
    client_ops, lookup,
    pool::{ConnectionPool, PoolError},
    routing_table::RoutingTable,
    utils::Context,
    wire::{
        Message, PeerClient,
        message::{
            Ack, ErrorResponse, FoundSuccessor, LookupMode, PredecessorFound, ResourceFound,
            SuccessorListFound,
        },
    },
};
use koorde_common::{DhtError, Id, Node, Resource, Space};
use koorde_storage::Store;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// The local DHT node: identity, routing table, connection pool and store,
/// plus every operation the node serves to clients and peers.
///
/// Cheap to clone; all clones share the same state.
#[derive(Debug, Clone)]
pub struct LocalNode(Arc<NodeInner>);

#[derive(Debug)]
struct NodeInner {
    space: Space,
    table: RoutingTable,
    pool: ConnectionPool,
    store: Store,
}

/// A connection borrowed for one operation: pooled handles are returned
/// untouched, ephemeral dials are closed afterwards.
pub(crate) enum Lease {
    Pooled(PeerClient),
    Ephemeral(PeerClient),
}

impl Lease {
    pub(crate) fn client(&mut self) -> &mut PeerClient {
        match self {
            Lease::Pooled(client) | Lease::Ephemeral(client) => client,
        }
    }

    pub(crate) async fn finish(self) {
        if let Lease::Ephemeral(mut client) = self {
            client.close().await;
        }
    }
}

impl LocalNode {
    pub fn new(node: Node, space: Space, store: Store, failure_timeout: Duration) -> Self {
        let pool = ConnectionPool::new(node.addr.clone(), space.clone(), failure_timeout);
        let table = RoutingTable::new(node, &space);
        Self(Arc::new(NodeInner {
            space,
            table,
            pool,
            store,
        }))
    }

    pub fn node(&self) -> &Node {
        self.0.table.node()
    }

    pub fn space(&self) -> &Space {
        &self.0.space
    }

    pub fn table(&self) -> &RoutingTable {
        &self.0.table
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.0.pool
    }

    pub fn store(&self) -> &Store {
        &self.0.store
    }

    pub fn failure_timeout(&self) -> Duration {
        self.0.pool.failure_timeout()
    }

    /// Borrows a connection to `addr`: the pooled one when present,
    /// otherwise a one-shot dial that the lease closes afterwards.
    pub(crate) async fn lease(&self, addr: &str) -> Result<Lease, DhtError> {
        match self.0.pool.get(addr).await {
            Ok(client) => Ok(Lease::Pooled(client)),
            Err(PoolError::NotInPool(_)) => {
                let client = self.0.pool.dial_ephemeral(addr).await?;
                Ok(Lease::Ephemeral(client))
            }
            Err(err) => Err(err.into()),
        }
    }

    // Lifecycle

    /// Starts a fresh ring of one.
    pub fn create(&self) {
        info!(node = %self.node(), "Creating single-node ring");
        self.0.table.init_single_node();
    }

    /// Joins an existing ring through `bootstrap_addr`.
    pub async fn join(&self, bootstrap_addr: &str) -> Result<(), DhtError> {
        if bootstrap_addr == self.node().addr {
            return Err(DhtError::InvalidArgument(
                "cannot bootstrap from our own address".to_string(),
            ));
        }
        let timeout = self.failure_timeout();
        // Joining spans several sequential calls, so the context budget
        // covers more than one of them.
        let ctx = Context::with_budget(timeout * 4);
        info!(node = %self.node(), bootstrap = %bootstrap_addr, "Joining ring");

        let mut bootstrap = self
            .0
            .pool
            .dial_ephemeral(bootstrap_addr)
            .await
            .map_err(DhtError::from)?;
        let succ = client_ops::find_successor_initial(
            &mut bootstrap,
            &self.node().id,
            &ctx,
            timeout,
        )
        .await;
        bootstrap.close().await;
        let succ = succ?;

        if succ.id == self.node().id {
            return Err(DhtError::Internal(
                "identifier already taken on the ring".to_string(),
            ));
        }

        let mut lease = self.lease(&succ.addr).await?;
        let pred = match client_ops::get_predecessor(lease.client(), &ctx, timeout).await {
            Ok(node) => Some(node),
            Err(DhtError::NotFound) => None,
            Err(err) => {
                lease.finish().await;
                return Err(err);
            }
        };
        let notified = client_ops::notify(lease.client(), self.node(), &ctx, timeout).await;
        lease.finish().await;
        notified?;

        self.0.pool.add_ref(&succ.addr).await?;
        self.0.table.set_successor(0, Some(succ));
        if let Some(pred) = pred
            && pred.id != self.node().id
        {
            if let Err(err) = self.0.pool.add_ref(&pred.addr).await {
                warn!(pred = %pred, error = %err, "Could not reach joined predecessor");
            } else {
                self.0.table.set_predecessor(Some(pred));
            }
        }

        // One eager maintenance round so the new node is routable before
        // the first timer tick.
        if let Err(err) = self.fix_successor_list(&ctx).await {
            debug!(error = %err, "Initial successor list fix failed");
        }
        if let Err(err) = self.fix_de_bruijn(&ctx).await {
            debug!(error = %err, "Initial de Bruijn fix failed");
        }
        Ok(())
    }

    /// Graceful departure: hand the stored resources to the successor and
    /// shut the pool down.
    pub async fn leave(&self) -> Result<(), DhtError> {
        let succ = self.0.table.first_successor();
        let Some(succ) = succ else {
            return Ok(());
        };
        if succ.id == self.node().id {
            self.0.pool.close().await.map_err(DhtError::from)?;
            return Ok(());
        }
        info!(node = %self.node(), succ = %succ, "Leaving ring");
        let timeout = self.failure_timeout();
        let ctx = Context::with_budget(timeout * 4);
        match self.lease(&succ.addr).await {
            Ok(mut lease) => {
                if let Err(err) =
                    client_ops::leave(lease.client(), self.node(), &ctx, timeout).await
                {
                    debug!(error = %err, "Leave announcement failed");
                }
                let resources = self.0.store.all().map_err(DhtError::from)?;
                if !resources.is_empty()
                    && let Err(err) =
                        client_ops::store(lease.client(), resources, &ctx, timeout).await
                {
                    warn!(error = %err, "Resource handoff failed");
                }
                lease.finish().await;
            }
            Err(err) => warn!(error = %err, "Could not reach successor for handoff"),
        }
        self.0.pool.close().await.map_err(DhtError::from)
    }

    // Client-facing operations

    pub async fn put(&self, raw_key: &str, value: &str, ctx: &Context) -> Result<(), DhtError> {
        ctx.check()?;
        if raw_key.is_empty() {
            return Err(DhtError::InvalidArgument("empty key".to_string()));
        }
        let key = self.0.space.id_from_key(raw_key);
        let resource = Resource::new(key.clone(), raw_key, value);
        let responsible = lookup::initial(self.clone(), key, ctx.clone()).await?;
        if responsible.id == self.node().id {
            self.0.store.put(resource).map_err(DhtError::from)
        } else {
            let timeout = ctx.call_timeout(self.failure_timeout());
            let mut lease = self.lease(&responsible.addr).await?;
            let result = client_ops::store(lease.client(), vec![resource], ctx, timeout).await;
            lease.finish().await;
            result
        }
    }

    pub async fn get(&self, raw_key: &str, ctx: &Context) -> Result<Resource, DhtError> {
        ctx.check()?;
        if raw_key.is_empty() {
            return Err(DhtError::InvalidArgument("empty key".to_string()));
        }
        let key = self.0.space.id_from_key(raw_key);
        let responsible = lookup::initial(self.clone(), key.clone(), ctx.clone()).await?;
        if responsible.id == self.node().id {
            self.0.store.get(&key).map_err(DhtError::from)
        } else {
            let timeout = ctx.call_timeout(self.failure_timeout());
            let mut lease = self.lease(&responsible.addr).await?;
            let result = client_ops::retrieve(lease.client(), &key, ctx, timeout).await;
            lease.finish().await;
            result
        }
    }

    pub async fn delete(&self, raw_key: &str, ctx: &Context) -> Result<(), DhtError> {
        ctx.check()?;
        if raw_key.is_empty() {
            return Err(DhtError::InvalidArgument("empty key".to_string()));
        }
        let key = self.0.space.id_from_key(raw_key);
        let responsible = lookup::initial(self.clone(), key.clone(), ctx.clone()).await?;
        if responsible.id == self.node().id {
            self.0.store.delete(&key).map_err(DhtError::from)
        } else {
            let timeout = ctx.call_timeout(self.failure_timeout());
            let mut lease = self.lease(&responsible.addr).await?;
            let result = client_ops::remove(lease.client(), &key, ctx, timeout).await;
            lease.finish().await;
            result
        }
    }

    /// Resolves the node responsible for `id`.
    pub async fn lookup(&self, id: Id, ctx: &Context) -> Result<Node, DhtError> {
        ctx.check()?;
        lookup::initial(self.clone(), id, ctx.clone()).await
    }

    /// Forwards an initial-mode lookup to `peer`.
    pub(crate) async fn call_find_initial(
        &self,
        peer: &Node,
        target: &Id,
        ctx: &Context,
    ) -> Result<Node, DhtError> {
        let timeout = ctx.call_timeout(self.failure_timeout());
        let mut lease = self.lease(&peer.addr).await?;
        let result =
            client_ops::find_successor_initial(lease.client(), target, ctx, timeout).await;
        lease.finish().await;
        result
    }

    /// Forwards a step-mode lookup to `peer`.
    pub(crate) async fn call_find_step(
        &self,
        peer: &Node,
        target: &Id,
        current_i: &Id,
        kshift: &Id,
        ctx: &Context,
    ) -> Result<Node, DhtError> {
        let timeout = ctx.call_timeout(self.failure_timeout());
        let mut lease = self.lease(&peer.addr).await?;
        let result = client_ops::find_successor_step(
            lease.client(),
            target,
            current_i,
            kshift,
            ctx,
            timeout,
        )
        .await;
        lease.finish().await;
        result
    }

    // Peer-facing handlers

    /// Serves one inbound wire request; failures become error responses
    /// carrying the same request id. `cancel` is the connection's
    /// cancellation signal: shutdown aborts in-flight handlers.
    pub async fn handle_request(&self, request: Message, cancel: CancellationToken) -> Message {
        let id = request.request_id();
        if cancel.is_cancelled() {
            return Message::Error(ErrorResponse::from_error(id, &DhtError::Canceled));
        }
        let result = match request {
            Message::FindSuccessor(find) => self.handle_find_successor(find, cancel).await,
            Message::GetPredecessor(_) => self.handle_get_predecessor(id),
            Message::GetSuccessorList(_) => Ok(Message::SuccessorListFound(SuccessorListFound {
                id,
                nodes: self.0.table.successor_list(),
            })),
            Message::Notify(notify) => self.handle_notify(id, notify.node).await,
            Message::Ping(_) => Ok(Message::Pong(crate::wire::message::Pong { id })),
            Message::StoreResources(store) => self.handle_store(id, store.resources),
            Message::Retrieve(retrieve) => self.handle_retrieve(id, retrieve.key),
            Message::Remove(remove) => self.handle_remove(id, remove.key),
            Message::Leave(leave) => self.handle_leave(id, leave.node).await,
            other => Err(DhtError::InvalidArgument(format!(
                "{other} is not a request"
            ))),
        };
        result.unwrap_or_else(|err| {
            trace!(error = %err, "Request failed");
            Message::Error(ErrorResponse::from_error(id, &err))
        })
    }

    async fn handle_find_successor(
        &self,
        find: crate::wire::message::FindSuccessor,
        cancel: CancellationToken,
    ) -> Result<Message, DhtError> {
        if find.ttl_ms == 0 {
            return Err(DhtError::Timeout);
        }
        let ctx = Context::with_cancellation(Duration::from_millis(find.ttl_ms as u64), cancel);
        let node = match find.mode {
            LookupMode::Initial => lookup::initial(self.clone(), find.target, ctx).await?,
            LookupMode::Step { current_i, kshift } => {
                lookup::step(self.clone(), find.target, current_i, kshift, ctx).await?
            }
        };
        Ok(Message::FoundSuccessor(FoundSuccessor { id: find.id, node }))
    }

    fn handle_get_predecessor(&self, id: u64) -> Result<Message, DhtError> {
        match self.0.table.get_predecessor() {
            Some(node) => Ok(Message::PredecessorFound(PredecessorFound { id, node })),
            None => Err(DhtError::NotFound),
        }
    }

    /// A peer believes it may be our predecessor. Adopt it when it falls
    /// inside `(predecessor, self)`; pool admission precedes the install,
    /// the displaced predecessor is released afterwards.
    async fn handle_notify(&self, id: u64, candidate: Node) -> Result<Message, DhtError> {
        if candidate.id == self.node().id {
            return Err(DhtError::InvalidArgument(
                "notify from our own identifier".to_string(),
            ));
        }
        if candidate.addr.is_empty() {
            return Err(DhtError::InvalidArgument("empty address".to_string()));
        }
        let current = self.0.table.get_predecessor();
        let adopt = match &current {
            None => true,
            Some(pred) => {
                pred.id != candidate.id
                    && self
                        .0
                        .space
                        .between(&candidate.id, &pred.id, &self.node().id)
            }
        };
        if adopt {
            self.0.pool.add_ref(&candidate.addr).await?;
            debug!(pred = %candidate, "Adopting new predecessor");
            self.0.table.set_predecessor(Some(candidate));
            if let Some(old) = current {
                self.0.pool.release(&old.addr).await;
            }
        }
        Ok(Message::Ack(Ack { id }))
    }

    fn handle_store(&self, id: u64, resources: Vec<Resource>) -> Result<Message, DhtError> {
        for resource in &resources {
            if resource.raw_key.is_empty() {
                return Err(DhtError::InvalidArgument("empty key".to_string()));
            }
        }
        for resource in resources {
            self.0.store.put(resource).map_err(DhtError::from)?;
        }
        Ok(Message::Ack(Ack { id }))
    }

    fn handle_retrieve(&self, id: u64, key: Id) -> Result<Message, DhtError> {
        let resource = self.0.store.get(&key).map_err(DhtError::from)?;
        Ok(Message::ResourceFound(ResourceFound { id, resource }))
    }

    fn handle_remove(&self, id: u64, key: Id) -> Result<Message, DhtError> {
        self.0.store.delete(&key).map_err(DhtError::from)?;
        Ok(Message::Ack(Ack { id }))
    }

    /// Our predecessor announced a graceful departure; forget it so the
    /// next stabilization round can pick up its predecessor.
    async fn handle_leave(&self, id: u64, leaving: Node) -> Result<Message, DhtError> {
        if leaving.addr.is_empty() {
            return Err(DhtError::InvalidArgument("empty address".to_string()));
        }
        if let Some(pred) = self.0.table.get_predecessor()
            && pred.id == leaving.id
        {
            info!(pred = %pred, "Predecessor left the ring");
            self.0.table.set_predecessor(None);
            self.0.pool.release(&pred.addr).await;
        }
        Ok(Message::Ack(Ack { id }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::message::{Leave, Notify, Ping, Retrieve, StoreResources, WireFault};
    use koorde_common::Space;
    use tokio::net::TcpListener;

    fn local_node(space: &Space, id: u64) -> LocalNode {
        LocalNode::new(
            Node::new(space.id_from_u64(id), format!("127.0.0.1:{}", 4400 + id)),
            space.clone(),
            Store::new(),
            Duration::from_millis(200),
        )
    }

    /// Bound listener whose address can be adopted as a peer without a
    /// full node behind it.
    async fn reachable_addr() -> String {
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

    fn fault_of(response: Message) -> WireFault {
        match response {
            Message::Error(err) => err.fault,
            other => panic!("expected error response, got {other}"),
        }
    }

    async fn serve(node: &LocalNode, request: Message) -> Message {
        node.handle_request(request, CancellationToken::new()).await
    }

    #[tokio::test]
    async fn ping_answers_pong_with_the_request_id() {
        let space = Space::new(8, 2, 2).unwrap();
        let node = local_node(&space, 0x01);
        let response = serve(&node, Message::Ping(Ping { id: 77 })).await;
        assert_eq!(response, Message::Pong(crate::wire::message::Pong { id: 77 }));
    }

    #[tokio::test]
    async fn get_predecessor_without_one_is_not_found() {
        let space = Space::new(8, 2, 2).unwrap();
        let node = local_node(&space, 0x01);
        let response = serve(
            &node,
            Message::GetPredecessor(crate::wire::message::GetPredecessor { id: 1 }),
        )
        .await;
        assert_eq!(fault_of(response), WireFault::NotFound);
    }

    #[tokio::test]
    async fn notify_adopts_a_closer_predecessor_and_rejects_self() {
        let space = Space::new(8, 2, 2).unwrap();
        let node = local_node(&space, 0x80);
        node.create();

        let candidate = Node::new(space.id_from_u64(0x40), reachable_addr().await);
        let response = serve(
            &node,
            Message::Notify(Notify {
                id: 1,
                node: candidate.clone(),
            }),
        )
        .await;
        assert_eq!(response, Message::Ack(Ack { id: 1 }));
        assert_eq!(node.table().get_predecessor(), Some(candidate.clone()));
        assert_eq!(node.pool().refcounts().await.get(&candidate.addr), Some(&1));

        // A farther candidate does not displace the adopted one.
        let farther = Node::new(space.id_from_u64(0x20), reachable_addr().await);
        serve(
            &node,
            Message::Notify(Notify {
                id: 2,
                node: farther,
            }),
        )
        .await;
        assert_eq!(node.table().get_predecessor(), Some(candidate));

        // Our own identifier is rejected.
        let own = Node::new(space.id_from_u64(0x80), "10.0.0.9:1".to_string());
        let response = serve(&node, Message::Notify(Notify { id: 3, node: own })).await;
        assert_eq!(fault_of(response), WireFault::InvalidArgument);
    }

    #[tokio::test]
    async fn store_rejects_empty_keys_and_serves_retrieve() {
        let space = Space::new(8, 2, 2).unwrap();
        let node = local_node(&space, 0x01);

        let bad = Message::StoreResources(StoreResources {
            id: 1,
            resources: vec![Resource::new(space.id_from_u64(0x10), "", "v")],
        });
        assert_eq!(
            fault_of(serve(&node, bad).await),
            WireFault::InvalidArgument
        );

        let good = Message::StoreResources(StoreResources {
            id: 2,
            resources: vec![Resource::new(space.id_from_u64(0x10), "k", "v")],
        });
        assert_eq!(serve(&node, good).await, Message::Ack(Ack { id: 2 }));

        let response = serve(
            &node,
            Message::Retrieve(Retrieve {
                id: 3,
                key: space.id_from_u64(0x10),
            }),
        )
        .await;
        let Message::ResourceFound(found) = response else {
            panic!("expected resource");
        };
        assert_eq!(found.resource.value, "v");
    }

    #[tokio::test]
    async fn leave_clears_a_matching_predecessor_only() {
        let space = Space::new(8, 2, 2).unwrap();
        let node = local_node(&space, 0x80);
        let pred = Node::new(space.id_from_u64(0x40), reachable_addr().await);
        node.pool().add_ref(&pred.addr).await.unwrap();
        node.table().set_predecessor(Some(pred.clone()));

        // A leave from some other node changes nothing.
        let other = Node::new(space.id_from_u64(0x20), "10.0.0.9:1".to_string());
        serve(&node, Message::Leave(Leave { id: 1, node: other })).await;
        assert_eq!(node.table().get_predecessor(), Some(pred.clone()));

        serve(
            &node,
            Message::Leave(Leave {
                id: 2,
                node: pred.clone(),
            }),
        )
        .await;
        assert_eq!(node.table().get_predecessor(), None);
        assert!(node.pool().refcounts().await.is_empty());
    }

    #[tokio::test]
    async fn responses_are_not_treated_as_requests() {
        let space = Space::new(8, 2, 2).unwrap();
        let node = local_node(&space, 0x01);
        let response = serve(&node, Message::Ack(Ack { id: 9 })).await;
        assert_eq!(fault_of(response), WireFault::InvalidArgument);
    }

    #[tokio::test]
    async fn canceled_connection_rejects_requests() {
        let space = Space::new(8, 2, 2).unwrap();
        let node = local_node(&space, 0x01);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let response = node
            .handle_request(Message::Ping(Ping { id: 5 }), cancel)
            .await;
        assert_eq!(fault_of(response), WireFault::Canceled);
    }
}
