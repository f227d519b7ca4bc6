//! Periodic ring maintenance.
//!
//! Four loops keep the routing state converging under churn (successor,
//! successor list, predecessor, de Bruijn window) and a fifth repairs
//! resource ownership after joins. Every pass runs once per tick under a
//! context bounded by the failure timeout; failures are logged and left
//! for the next tick. Each loop is bound to its own cancellation token:
//! canceling one stops that loop at its next tick, canceling the parent
//! stops the worker.

use crate::{client_ops, lookup, node::LocalNode, utils::Context};
use koorde_common::{DhtError, Node};
use spawned_concurrency::{
    messages::Unused,
    tasks::{CastResponse, GenServer, GenServerHandle, send_interval},
};
use std::{collections::HashSet, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

impl LocalNode {
    /// Verifies that our successor still precedes us correctly, adopting
    /// its predecessor when that node slid in between, and promotes a
    /// backup successor when the current one is unreachable.
    pub async fn stabilize_successor(&self, ctx: &Context) -> Result<(), DhtError> {
        ctx.check()?;
        let me = self.node().clone();
        let Some(mut succ) = self.table().first_successor() else {
            // No successor at all: restart as a ring of one.
            self.table().init_single_node();
            return Ok(());
        };
        let timeout = self.failure_timeout();

        let pred = if succ.id == me.id {
            self.table().get_predecessor()
        } else {
            let result = match self.pool().get(&succ.addr).await {
                Ok(mut client) => client_ops::get_predecessor(&mut client, ctx, timeout).await,
                Err(err) => Err(err.into()),
            };
            match result {
                Ok(node) => Some(node),
                Err(DhtError::NotFound) => None,
                Err(DhtError::Canceled) => return Err(DhtError::Canceled),
                Err(err) => {
                    warn!(succ = %succ, error = %err, "Successor unreachable, promoting backup");
                    self.promote_successor(&succ).await;
                    return Ok(());
                }
            }
        };

        if let Some(pred) = pred
            && pred.id != me.id
            && self.space().between(&pred.id, &me.id, &succ.id)
        {
            match self.pool().add_ref(&pred.addr).await {
                Ok(()) => {
                    debug!(succ = %pred, "Adopting closer successor");
                    self.table().set_successor(0, Some(pred.clone()));
                    self.pool().release(&succ.addr).await;
                    succ = pred;
                }
                Err(err) => {
                    debug!(node = %pred, error = %err, "Could not admit closer successor");
                }
            }
        }

        if succ.id != me.id {
            let notified = match self.pool().get(&succ.addr).await {
                Ok(mut client) => client_ops::notify(&mut client, &me, ctx, timeout).await,
                Err(err) => Err(err.into()),
            };
            if let Err(err) = notified {
                debug!(succ = %succ, error = %err, "Notify failed");
            }
        }
        Ok(())
    }

    /// Replaces the failed first successor with the next live backup, or
    /// collapses to a single-node ring when the whole list is dead.
    async fn promote_successor(&self, failed: &Node) {
        let backup = (1..self.space().successor_list_len())
            .find(|index| self.table().get_successor(*index).is_some());
        match backup {
            Some(index) => {
                info!(index, "Promoting backup successor");
                self.table().promote_candidate(index);
                self.pool().release(&failed.addr).await;
            }
            None => {
                warn!("No live successor candidates, restarting as single-node ring");
                self.release_all_routing_refs().await;
                self.table().init_single_node();
            }
        }
    }

    /// Drops one pool reference per routing structure for every address the
    /// table holds, then leaves the table to be reinitialized.
    async fn release_all_routing_refs(&self) {
        let me_addr = self.node().addr.clone();
        let successor_addrs: HashSet<String> = self
            .table()
            .successor_list()
            .into_iter()
            .map(|n| n.addr)
            .filter(|addr| *addr != me_addr)
            .collect();
        for addr in successor_addrs {
            self.pool().release(&addr).await;
        }
        if let Some(pred) = self.table().get_predecessor()
            && pred.addr != me_addr
        {
            self.pool().release(&pred.addr).await;
        }
        let window_addrs: HashSet<String> = self
            .table()
            .debruijn_list()
            .into_iter()
            .map(|n| n.addr)
            .filter(|addr| *addr != me_addr)
            .collect();
        for addr in window_addrs {
            self.pool().release(&addr).await;
        }
    }

    /// Rebuilds the successor list from the successor's own list, pairing
    /// the install with pool admissions and releases.
    pub async fn fix_successor_list(&self, ctx: &Context) -> Result<(), DhtError> {
        ctx.check()?;
        let me = self.node().clone();
        let Some(succ) = self.table().first_successor() else {
            return Ok(());
        };
        if succ.id == me.id {
            return Ok(());
        }
        let timeout = self.failure_timeout();
        let mut lease = self.lease(&succ.addr).await?;
        let remote = client_ops::get_successor_list(lease.client(), ctx, timeout).await;
        lease.finish().await;
        let remote = remote?;

        let mut new_list = vec![succ];
        for node in remote {
            if new_list.len() >= self.space().successor_list_len() {
                break;
            }
            if node.id == me.id {
                // The list wrapped all the way around to us.
                break;
            }
            new_list.push(node);
        }
        self.install_successor_list(new_list).await;
        Ok(())
    }

    async fn install_successor_list(&self, new_list: Vec<Node>) {
        let me_addr = self.node().addr.clone();
        let old_addrs: HashSet<String> = self
            .table()
            .successor_list()
            .into_iter()
            .map(|n| n.addr)
            .filter(|addr| *addr != me_addr)
            .collect();
        let new_addrs: HashSet<String> = new_list
            .iter()
            .map(|n| n.addr.clone())
            .filter(|addr| *addr != me_addr)
            .collect();

        let mut admitted: HashSet<String> = HashSet::new();
        for addr in new_addrs.difference(&old_addrs) {
            match self.pool().add_ref(addr).await {
                Ok(()) => {
                    admitted.insert(addr.clone());
                }
                Err(err) => debug!(%addr, error = %err, "Could not admit successor candidate"),
            }
        }
        // Entries we could not connect to are dropped before the install so
        // the table never references an unpooled address.
        let installed: Vec<Node> = new_list
            .into_iter()
            .filter(|n| {
                n.addr == me_addr || old_addrs.contains(&n.addr) || admitted.contains(&n.addr)
            })
            .collect();
        self.table().set_successor_list(&installed);
        for addr in old_addrs.difference(&new_addrs) {
            self.pool().release(addr).await;
        }
    }

    /// Pings the predecessor and clears it when it stopped answering.
    pub async fn check_predecessor(&self, ctx: &Context) -> Result<(), DhtError> {
        ctx.check()?;
        let Some(pred) = self.table().get_predecessor() else {
            return Ok(());
        };
        if pred.id == self.node().id {
            return Ok(());
        }
        let timeout = self.failure_timeout();
        let result = match self.pool().get(&pred.addr).await {
            Ok(mut client) => client_ops::ping(&mut client, ctx, timeout).await,
            Err(err) => Err(err.into()),
        };
        match result {
            Ok(()) => Ok(()),
            Err(DhtError::Canceled) => Err(DhtError::Canceled),
            Err(err) => {
                warn!(pred = %pred, error = %err, "Predecessor failed, clearing");
                self.table().set_predecessor(None);
                self.pool().release(&pred.addr).await;
                Ok(())
            }
        }
    }

    /// Re-anchors the de Bruijn window: the anchor is the predecessor of
    /// `k * self mod 2^B`, the rest of the window its ring successors.
    pub async fn fix_de_bruijn(&self, ctx: &Context) -> Result<(), DhtError> {
        ctx.check()?;
        let me = self.node().clone();
        let timeout = self.failure_timeout();
        let target = self.space().mul_k_mod(&me.id);

        let succ_of_target = lookup::initial(self.clone(), target, ctx.clone()).await?;

        let anchor = if succ_of_target.id == me.id {
            self.table().get_predecessor()
        } else {
            let mut lease = self.lease(&succ_of_target.addr).await?;
            let result = client_ops::get_predecessor(lease.client(), ctx, timeout).await;
            lease.finish().await;
            match result {
                Ok(node) => Some(node),
                Err(DhtError::NotFound) => None,
                Err(err) => return Err(err),
            }
        };
        let Some(anchor) = anchor else {
            trace!("Anchor unresolved, skipping de Bruijn window fix");
            return Ok(());
        };

        let anchor_succs = if anchor.id == me.id {
            self.table().successor_list()
        } else {
            let mut lease = self.lease(&anchor.addr).await?;
            let result = client_ops::get_successor_list(lease.client(), ctx, timeout).await;
            lease.finish().await;
            result?
        };

        let degree = self.space().degree() as usize;
        let mut window: Vec<Option<Node>> = Vec::with_capacity(degree);
        window.push(Some(anchor));
        for index in 1..degree {
            window.push(anchor_succs.get(index - 1).cloned());
        }
        self.install_debruijn_window(window).await;
        Ok(())
    }

    async fn install_debruijn_window(&self, mut window: Vec<Option<Node>>) {
        let me_addr = self.node().addr.clone();
        let old_addrs: HashSet<String> = self
            .table()
            .debruijn_list()
            .into_iter()
            .map(|n| n.addr)
            .filter(|addr| *addr != me_addr)
            .collect();
        let new_addrs: HashSet<String> = window
            .iter()
            .flatten()
            .map(|n| n.addr.clone())
            .filter(|addr| *addr != me_addr)
            .collect();

        let mut admitted: HashSet<String> = HashSet::new();
        for addr in new_addrs.difference(&old_addrs) {
            match self.pool().add_ref(addr).await {
                Ok(()) => {
                    admitted.insert(addr.clone());
                }
                Err(err) => debug!(%addr, error = %err, "Could not admit de Bruijn candidate"),
            }
        }
        for slot in window.iter_mut() {
            let keep = match slot {
                Some(node) => {
                    node.addr == me_addr
                        || old_addrs.contains(&node.addr)
                        || admitted.contains(&node.addr)
                }
                None => true,
            };
            if !keep {
                *slot = None;
            }
        }
        self.table().set_debruijn_window(&window);
        for addr in old_addrs.difference(&new_addrs) {
            self.pool().release(addr).await;
        }
    }

    /// Moves every resource whose key left our ownership arc
    /// `(predecessor, self]` to its responsible node; the local copy is
    /// deleted only after the transfer succeeded. Skipped entirely while we
    /// have no predecessor.
    pub async fn fix_storage(&self, ctx: &Context) -> Result<(), DhtError> {
        ctx.check()?;
        let me = self.node().clone();
        let Some(pred) = self.table().get_predecessor() else {
            return Ok(());
        };
        if pred.id == me.id {
            return Ok(());
        }
        let timeout = self.failure_timeout();
        // The complementary arc (self, predecessor] is exactly the set of
        // keys that fell out of our ownership.
        let misplaced = self
            .store()
            .range(self.space(), &me.id, &pred.id)
            .map_err(DhtError::from)?;
        for resource in misplaced {
            ctx.check()?;
            let responsible =
                match lookup::initial(self.clone(), resource.key.clone(), ctx.clone()).await {
                    Ok(node) => node,
                    Err(DhtError::Canceled) => return Err(DhtError::Canceled),
                    Err(err) => {
                        debug!(key = %resource.key, error = %err, "Owner lookup failed");
                        continue;
                    }
                };
            if responsible.id == me.id {
                continue;
            }
            let key = resource.key.clone();
            match self.lease(&responsible.addr).await {
                Ok(mut lease) => {
                    let sent =
                        client_ops::store(lease.client(), vec![resource], ctx, timeout).await;
                    lease.finish().await;
                    match sent {
                        Ok(()) => {
                            debug!(%key, owner = %responsible, "Transferred resource to owner");
                            let _ = self.store().delete(&key);
                        }
                        Err(err) => {
                            debug!(%key, owner = %responsible, error = %err, "Resource transfer failed")
                        }
                    }
                }
                Err(err) => debug!(%key, owner = %responsible, error = %err, "Owner unreachable"),
            }
        }
        Ok(())
    }
}

/// Tick intervals for the maintenance loops. The successor, successor-list
/// and predecessor passes share the stabilization interval; the de Bruijn
/// and storage passes run on their own cadence.
#[derive(Debug, Clone)]
pub struct StabilizerIntervals {
    pub stabilization: Duration,
    pub debruijn_fix: Duration,
    pub storage_fix: Duration,
}

#[derive(Debug, Clone)]
pub enum InMessage {
    Stabilize,
    FixSuccessorList,
    CheckPredecessor,
    FixDeBruijn,
    FixStorage,
}

#[derive(Debug, Clone)]
pub enum OutMessage {
    Done,
}

/// One cancellation token per maintenance loop, all children of the
/// worker's shutdown token.
#[derive(Debug)]
struct LoopTokens {
    stabilize: CancellationToken,
    successor_list: CancellationToken,
    predecessor: CancellationToken,
    debruijn: CancellationToken,
    storage: CancellationToken,
}

impl LoopTokens {
    fn from_parent(parent: &CancellationToken) -> Self {
        Self {
            stabilize: parent.child_token(),
            successor_list: parent.child_token(),
            predecessor: parent.child_token(),
            debruijn: parent.child_token(),
            storage: parent.child_token(),
        }
    }
}

/// Worker running the maintenance passes on their intervals. One tick runs
/// one pass; a failed pass is never retried early, the next tick observes
/// whatever state is left. Canceling `cancel` stops the worker at its next
/// tick.
#[derive(Debug)]
pub struct Stabilizer {
    node: LocalNode,
    cancel: CancellationToken,
    tokens: LoopTokens,
}

impl Stabilizer {
    pub fn spawn(
        node: LocalNode,
        intervals: StabilizerIntervals,
        cancel: CancellationToken,
    ) -> GenServerHandle<Stabilizer> {
        info!("Starting stabilizer");
        let tokens = LoopTokens::from_parent(&cancel);
        let server = Stabilizer {
            node,
            cancel,
            tokens,
        }
        .start();
        send_interval(
            intervals.stabilization,
            server.clone(),
            InMessage::Stabilize,
        );
        send_interval(
            intervals.stabilization,
            server.clone(),
            InMessage::FixSuccessorList,
        );
        send_interval(
            intervals.stabilization,
            server.clone(),
            InMessage::CheckPredecessor,
        );
        send_interval(intervals.debruijn_fix, server.clone(), InMessage::FixDeBruijn);
        send_interval(intervals.storage_fix, server.clone(), InMessage::FixStorage);
        server
    }

    /// Per-tick context: the loop's own token bounds cancellation, the
    /// failure timeout bounds the deadline.
    fn tick_context(&self, token: &CancellationToken) -> Context {
        Context::with_cancellation(self.node.failure_timeout(), token.child_token())
    }
}

impl GenServer for Stabilizer {
    type CallMsg = Unused;
    type CastMsg = InMessage;
    type OutMsg = OutMessage;
    type Error = DhtError;

    async fn handle_cast(
        &mut self,
        message: Self::CastMsg,
        _handle: &GenServerHandle<Self>,
    ) -> CastResponse {
        if self.cancel.is_cancelled() {
            debug!("Stabilizer shutting down");
            return CastResponse::Stop;
        }
        match message {
            Self::CastMsg::Stabilize => {
                trace!(received = "Stabilize");
                if !self.tokens.stabilize.is_cancelled() {
                    let ctx = self.tick_context(&self.tokens.stabilize);
                    let _ = self
                        .node
                        .stabilize_successor(&ctx)
                        .await
                        .inspect_err(|err| error!(error = %err, "Error stabilizing successor"));
                }
            }
            Self::CastMsg::FixSuccessorList => {
                trace!(received = "FixSuccessorList");
                if !self.tokens.successor_list.is_cancelled() {
                    let ctx = self.tick_context(&self.tokens.successor_list);
                    let _ = self
                        .node
                        .fix_successor_list(&ctx)
                        .await
                        .inspect_err(|err| debug!(error = %err, "Error fixing successor list"));
                }
            }
            Self::CastMsg::CheckPredecessor => {
                trace!(received = "CheckPredecessor");
                if !self.tokens.predecessor.is_cancelled() {
                    let ctx = self.tick_context(&self.tokens.predecessor);
                    let _ = self
                        .node
                        .check_predecessor(&ctx)
                        .await
                        .inspect_err(|err| debug!(error = %err, "Error checking predecessor"));
                }
            }
            Self::CastMsg::FixDeBruijn => {
                trace!(received = "FixDeBruijn");
                if !self.tokens.debruijn.is_cancelled() {
                    let ctx = self.tick_context(&self.tokens.debruijn);
                    let _ = self
                        .node
                        .fix_de_bruijn(&ctx)
                        .await
                        .inspect_err(|err| debug!(error = %err, "Error fixing de Bruijn window"));
                }
            }
            Self::CastMsg::FixStorage => {
                trace!(received = "FixStorage");
                if !self.tokens.storage.is_cancelled() {
                    let ctx = self.tick_context(&self.tokens.storage);
                    let _ = self
                        .node
                        .fix_storage(&ctx)
                        .await
                        .inspect_err(|err| debug!(error = %err, "Error repairing resource ownership"));
                }
            }
        }
        CastResponse::NoReply
    }
}
