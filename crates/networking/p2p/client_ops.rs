//! Thin wrappers issuing the wire operations against one peer.
//!
//! Every wrapper takes the operation context and maps failures into the
//! closed error taxonomy: a fired cancellation token becomes
//! [`DhtError::Canceled`], a deadline expiry [`DhtError::Timeout`], a
//! remote `NotFound` is preserved, and any other transport failure is
//! wrapped as [`DhtError::Unavailable`].

use crate::{
    utils::Context,
    wire::{
        Message, PeerClient, WireError,
        message::{
            FindSuccessor, GetPredecessor, GetSuccessorList, Leave, LookupMode, Notify, Ping,
            Remove, Retrieve, StoreResources,
        },
    },
};
use koorde_common::{DhtError, Id, Node, Resource};
use std::time::Duration;

/// Upper bound on resources shipped in a single `Store` frame; larger
/// batches are split across requests.
pub const STORE_CHUNK_SIZE: usize = 256;

async fn call(
    client: &mut PeerClient,
    request: Message,
    ctx: &Context,
    timeout: Duration,
) -> Result<Message, DhtError> {
    ctx.check()?;
    match client.request(request, timeout, ctx.cancellation()).await {
        Ok(Message::Error(response)) => Err(response.into_error()),
        Ok(response) => Ok(response),
        Err(WireError::Timeout) => Err(DhtError::Timeout),
        Err(WireError::Canceled) => Err(DhtError::Canceled),
        Err(other) => Err(DhtError::Unavailable(other.to_string())),
    }
}

fn unexpected(operation: &str, response: &Message) -> DhtError {
    DhtError::Internal(format!("unexpected response to {operation}: {response}"))
}

pub async fn find_successor_initial(
    client: &mut PeerClient,
    target: &Id,
    ctx: &Context,
    timeout: Duration,
) -> Result<Node, DhtError> {
    let request = Message::FindSuccessor(FindSuccessor {
        id: rand::random(),
        ttl_ms: ctx.ttl_ms(),
        target: target.clone(),
        mode: LookupMode::Initial,
    });
    match call(client, request, ctx, timeout).await? {
        Message::FoundSuccessor(found) => Ok(found.node),
        other => Err(unexpected("FindSuccessor", &other)),
    }
}

pub async fn find_successor_step(
    client: &mut PeerClient,
    target: &Id,
    current_i: &Id,
    kshift: &Id,
    ctx: &Context,
    timeout: Duration,
) -> Result<Node, DhtError> {
    let request = Message::FindSuccessor(FindSuccessor {
        id: rand::random(),
        ttl_ms: ctx.ttl_ms(),
        target: target.clone(),
        mode: LookupMode::Step {
            current_i: current_i.clone(),
            kshift: kshift.clone(),
        },
    });
    match call(client, request, ctx, timeout).await? {
        Message::FoundSuccessor(found) => Ok(found.node),
        other => Err(unexpected("FindSuccessor", &other)),
    }
}

/// Fails with [`DhtError::NotFound`] when the peer has no predecessor.
pub async fn get_predecessor(
    client: &mut PeerClient,
    ctx: &Context,
    timeout: Duration,
) -> Result<Node, DhtError> {
    let request = Message::GetPredecessor(GetPredecessor { id: rand::random() });
    match call(client, request, ctx, timeout).await? {
        Message::PredecessorFound(found) => Ok(found.node),
        other => Err(unexpected("GetPredecessor", &other)),
    }
}

pub async fn get_successor_list(
    client: &mut PeerClient,
    ctx: &Context,
    timeout: Duration,
) -> Result<Vec<Node>, DhtError> {
    let request = Message::GetSuccessorList(GetSuccessorList { id: rand::random() });
    match call(client, request, ctx, timeout).await? {
        Message::SuccessorListFound(found) => Ok(found.nodes),
        other => Err(unexpected("GetSuccessorList", &other)),
    }
}

pub async fn notify(
    client: &mut PeerClient,
    node: &Node,
    ctx: &Context,
    timeout: Duration,
) -> Result<(), DhtError> {
    let request = Message::Notify(Notify {
        id: rand::random(),
        node: node.clone(),
    });
    match call(client, request, ctx, timeout).await? {
        Message::Ack(_) => Ok(()),
        other => Err(unexpected("Notify", &other)),
    }
}

pub async fn ping(
    client: &mut PeerClient,
    ctx: &Context,
    timeout: Duration,
) -> Result<(), DhtError> {
    let request = Message::Ping(Ping { id: rand::random() });
    match call(client, request, ctx, timeout).await? {
        Message::Pong(_) => Ok(()),
        other => Err(unexpected("Ping", &other)),
    }
}

/// Ships a batch of resources, chunked so no single frame grows past the
/// codec limit. The peer acknowledges each chunk.
pub async fn store(
    client: &mut PeerClient,
    resources: Vec<Resource>,
    ctx: &Context,
    timeout: Duration,
) -> Result<(), DhtError> {
    for chunk in resources.chunks(STORE_CHUNK_SIZE) {
        let request = Message::StoreResources(StoreResources {
            id: rand::random(),
            resources: chunk.to_vec(),
        });
        match call(client, request, ctx, timeout).await? {
            Message::Ack(_) => {}
            other => return Err(unexpected("Store", &other)),
        }
    }
    Ok(())
}

pub async fn retrieve(
    client: &mut PeerClient,
    key: &Id,
    ctx: &Context,
    timeout: Duration,
) -> Result<Resource, DhtError> {
    let request = Message::Retrieve(Retrieve {
        id: rand::random(),
        key: key.clone(),
    });
    match call(client, request, ctx, timeout).await? {
        Message::ResourceFound(found) => Ok(found.resource),
        other => Err(unexpected("Retrieve", &other)),
    }
}

pub async fn remove(
    client: &mut PeerClient,
    key: &Id,
    ctx: &Context,
    timeout: Duration,
) -> Result<(), DhtError> {
    let request = Message::Remove(Remove {
        id: rand::random(),
        key: key.clone(),
    });
    match call(client, request, ctx, timeout).await? {
        Message::Ack(_) => Ok(()),
        other => Err(unexpected("Remove", &other)),
    }
}

/// Announces departure to the successor of the leaving node.
pub async fn leave(
    client: &mut PeerClient,
    node: &Node,
    ctx: &Context,
    timeout: Duration,
) -> Result<(), DhtError> {
    let request = Message::Leave(Leave {
        id: rand::random(),
        node: node.clone(),
    });
    match call(client, request, ctx, timeout).await? {
        Message::Ack(_) => Ok(()),
        other => Err(unexpected("Leave", &other)),
    }
}
