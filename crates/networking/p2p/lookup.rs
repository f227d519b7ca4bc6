//! Koorde successor lookup: a Chord-style ring walk accelerated by de
//! Bruijn routing.
//!
//! Each hop simulates an "imaginary" identifier `current_i` that advances
//! by one base-`k` digit of the target per step, so a lookup takes
//! `O(log_k N)` hops. When the de Bruijn window is empty or every candidate
//! fails, the walk degrades to following the successor ring. The operation
//! context rides along on every hop: a fired cancellation token or an
//! expired deadline aborts the chain, while individual peer failures only
//! fall through to the next candidate.

use crate::{node::LocalNode, utils::Context};
use futures::future::BoxFuture;
use koorde_common::{DhtError, Id, Node, Space};
use tracing::{debug, trace};

/// Resolves the successor of `target` starting at `node`, entering the
/// de Bruijn graph with the target's first digit.
pub fn initial(
    node: LocalNode,
    target: Id,
    ctx: Context,
) -> BoxFuture<'static, Result<Node, DhtError>> {
    Box::pin(async move {
        ctx.check()?;
        let me = node.node().clone();
        let succ = node.table().first_successor().unwrap_or_else(|| me.clone());
        if node.space().between(&target, &me.id, &succ.id) || target == succ.id {
            return Ok(succ);
        }
        let (digit, kshift) = node.space().next_digit(&target);
        let current_i = advance(node.space(), &me.id, digit);
        descend(node, target, current_i, kshift, ctx).await
    })
}

/// Continues a lookup whose routing state `(current_i, kshift)` was
/// computed upstream.
pub fn step(
    node: LocalNode,
    target: Id,
    current_i: Id,
    kshift: Id,
    ctx: Context,
) -> BoxFuture<'static, Result<Node, DhtError>> {
    Box::pin(async move {
        ctx.check()?;
        let me = node.node().clone();
        let succ = node.table().first_successor().unwrap_or_else(|| me.clone());
        if node.space().between(&target, &me.id, &succ.id) || target == succ.id {
            return Ok(succ);
        }
        if node.space().between(&current_i, &me.id, &succ.id) {
            // The imaginary node falls in our zone: consume the next digit
            // and route through the de Bruijn window.
            let (digit, next_kshift) = node.space().next_digit(&kshift);
            let next_i = advance(node.space(), &current_i, digit);
            return descend(node, target, next_i, next_kshift, ctx).await;
        }
        // Not there yet: keep walking the ring with the state unchanged.
        node.call_find_step(&succ, &target, &current_i, &kshift, &ctx)
            .await
    })
}

/// `current_i * k + digit (mod 2^B)`: the de Bruijn edge taken when one
/// more digit of the target is consumed.
fn advance(space: &Space, current_i: &Id, digit: u32) -> Id {
    space.add_mod(
        &space.mul_k_mod(current_i),
        &space.id_from_u64(digit as u64),
    )
}

/// Tries the de Bruijn candidates from the best-matching window index
/// downward; a candidate equal to the local node recurses locally instead
/// of dialing itself. Falls back to the immediate successor when the whole
/// window is unusable.
async fn descend(
    node: LocalNode,
    target: Id,
    current_i: Id,
    kshift: Id,
    ctx: Context,
) -> Result<Node, DhtError> {
    let window = node.table().debruijn_window();
    let start = start_index(node.space(), &window, &current_i);
    for index in (0..=start).rev() {
        let Some(candidate) = window.get(index).and_then(|slot| slot.as_ref()) else {
            continue;
        };
        ctx.check()?;
        let result = if candidate.id == node.node().id {
            step(
                node.clone(),
                target.clone(),
                current_i.clone(),
                kshift.clone(),
                ctx.clone(),
            )
            .await
        } else {
            trace!(candidate = %candidate, index, "Forwarding lookup along de Bruijn edge");
            node.call_find_step(candidate, &target, &current_i, &kshift, &ctx)
                .await
        };
        match result {
            Ok(found) => return Ok(found),
            Err(DhtError::Canceled) => return Err(DhtError::Canceled),
            Err(DhtError::Timeout) if ctx.expired() => return Err(DhtError::Timeout),
            Err(err) => {
                debug!(candidate = %candidate, error = %err, "De Bruijn candidate failed, trying next");
            }
        }
    }
    // Window dry: degrade to a plain ring walk.
    let me = node.node().clone();
    let succ = node.table().first_successor().unwrap_or_else(|| me.clone());
    if succ.id == me.id {
        return Ok(me);
    }
    trace!(succ = %succ, "De Bruijn window exhausted, falling back to successor");
    node.call_find_initial(&succ, &target, &ctx).await
}

/// Index of the window entry whose `[window[i], window[i+1])` arc contains
/// `current_i`; defaults to the last slot when no pair matches.
fn start_index(space: &Space, window: &[Option<Node>], current_i: &Id) -> usize {
    if window.is_empty() {
        return 0;
    }
    for index in 0..window.len() - 1 {
        if let (Some(a), Some(b)) = (&window[index], &window[index + 1])
            && (&a.id == current_i || space.between(current_i, &a.id, &b.id))
        {
            return index;
        }
    }
    window.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_index_picks_containing_arc() {
        let space = Space::new(8, 4, 4).unwrap();
        let node = |v: u64| Some(Node::new(space.id_from_u64(v), format!("10.0.0.{v}:1")));
        let window = vec![node(0x10), node(0x40), node(0x80), node(0xC0)];

        assert_eq!(start_index(&space, &window, &space.id_from_u64(0x20)), 0);
        assert_eq!(start_index(&space, &window, &space.id_from_u64(0x40)), 1);
        assert_eq!(start_index(&space, &window, &space.id_from_u64(0x9f)), 2);
        // Beyond the last entry: default to the tail.
        assert_eq!(start_index(&space, &window, &space.id_from_u64(0xF0)), 3);
    }

    #[test]
    fn start_index_skips_null_pairs() {
        let space = Space::new(8, 4, 4).unwrap();
        let node = |v: u64| Some(Node::new(space.id_from_u64(v), format!("10.0.0.{v}:1")));
        let window = vec![node(0x10), None, node(0x80), node(0xC0)];
        // The (0x10, None) pair cannot match; 0x20 lands on the tail scan.
        assert_eq!(start_index(&space, &window, &space.id_from_u64(0x90)), 2);
        assert_eq!(start_index(&space, &window, &space.id_from_u64(0x20)), 3);
    }

    #[test]
    fn advance_shifts_in_the_digit() {
        let space = Space::new(32, 4, 4).unwrap();
        let current = space.id_from_hex("71C8502C").unwrap();
        assert_eq!(advance(&space, &current, 3).to_hex(), "c72140b3");
    }
}
