use koorde_common::{Node, Space};
use std::{
    collections::HashSet,
    sync::RwLock,
};

/// Routing state of one node: the successor list (length `L`), the
/// predecessor and the de Bruijn window (length `k`).
///
/// Every slot is independently locked, so readers and writers on different
/// slots never contend and a reader observes either the previous or the new
/// value of a slot, never a tear. There is deliberately no lock covering
/// the whole table: callers must not assume atomic snapshots across
/// structures.
#[derive(Debug)]
pub struct RoutingTable {
    node: Node,
    successors: Vec<RwLock<Option<Node>>>,
    predecessor: RwLock<Option<Node>>,
    debruijn: Vec<RwLock<Option<Node>>>,
}

impl RoutingTable {
    pub fn new(node: Node, space: &Space) -> Self {
        let successors = (0..space.successor_list_len())
            .map(|_| RwLock::new(None))
            .collect();
        let debruijn = (0..space.degree() as usize)
            .map(|_| RwLock::new(None))
            .collect();
        Self {
            node,
            successors,
            predecessor: RwLock::new(None),
            debruijn,
        }
    }

    /// The local node. Immutable for the table's lifetime.
    pub fn node(&self) -> &Node {
        &self.node
    }

    fn read_slot(slots: &[RwLock<Option<Node>>], index: usize) -> Option<Node> {
        slots
            .get(index)?
            .read()
            .ok()?
            .clone()
    }

    fn write_slot(slots: &[RwLock<Option<Node>>], index: usize, value: Option<Node>) {
        // Out-of-range writes are no-ops.
        if let Some(slot) = slots.get(index)
            && let Ok(mut guard) = slot.write()
        {
            *guard = value;
        }
    }

    pub fn get_successor(&self, index: usize) -> Option<Node> {
        Self::read_slot(&self.successors, index)
    }

    pub fn set_successor(&self, index: usize, node: Option<Node>) {
        Self::write_slot(&self.successors, index, node);
    }

    pub fn first_successor(&self) -> Option<Node> {
        self.get_successor(0)
    }

    /// Snapshot of the successor list, nulls skipped.
    pub fn successor_list(&self) -> Vec<Node> {
        (0..self.successors.len())
            .filter_map(|i| self.get_successor(i))
            .collect()
    }

    /// Replaces the successor list with up to `L` entries; excess entries
    /// are truncated, missing slots padded with null.
    pub fn set_successor_list(&self, nodes: &[Node]) {
        for index in 0..self.successors.len() {
            Self::write_slot(&self.successors, index, nodes.get(index).cloned());
        }
    }

    /// Moves `successors[index]` into slot 0, shifting the entries behind
    /// it forward in order and padding the tail with null. Entries before
    /// `index` are discarded.
    pub fn promote_candidate(&self, index: usize) {
        if index >= self.successors.len() {
            return;
        }
        let tail: Vec<Option<Node>> = (index..self.successors.len())
            .map(|i| self.get_successor(i))
            .collect();
        for slot in 0..self.successors.len() {
            Self::write_slot(&self.successors, slot, tail.get(slot).cloned().flatten());
        }
    }

    pub fn get_predecessor(&self) -> Option<Node> {
        self.predecessor.read().ok()?.clone()
    }

    pub fn set_predecessor(&self, node: Option<Node>) {
        if let Ok(mut guard) = self.predecessor.write() {
            *guard = node;
        }
    }

    pub fn get_debruijn(&self, digit: usize) -> Option<Node> {
        Self::read_slot(&self.debruijn, digit)
    }

    pub fn set_debruijn(&self, digit: usize, node: Option<Node>) {
        Self::write_slot(&self.debruijn, digit, node);
    }

    /// The full window including nulls, in digit order.
    pub fn debruijn_window(&self) -> Vec<Option<Node>> {
        (0..self.debruijn.len())
            .map(|i| self.get_debruijn(i))
            .collect()
    }

    /// Snapshot of the de Bruijn window, nulls skipped.
    pub fn debruijn_list(&self) -> Vec<Node> {
        self.debruijn_window().into_iter().flatten().collect()
    }

    pub fn set_debruijn_window(&self, nodes: &[Option<Node>]) {
        for digit in 0..self.debruijn.len() {
            Self::write_slot(&self.debruijn, digit, nodes.get(digit).cloned().flatten());
        }
    }

    /// Resets the table to a freshly-created ring of one: successor,
    /// predecessor and de Bruijn anchor all point at the local node.
    pub fn init_single_node(&self) {
        self.set_successor_list(&[self.node.clone()]);
        self.set_predecessor(Some(self.node.clone()));
        self.set_debruijn_window(&[Some(self.node.clone())]);
    }

    /// Every remote address currently referenced by the table. This is the
    /// set of addresses the connection pool is expected to hold.
    pub fn referenced_addrs(&self) -> HashSet<String> {
        let mut addrs: HashSet<String> = self
            .successor_list()
            .into_iter()
            .chain(self.get_predecessor())
            .chain(self.debruijn_list())
            .map(|n| n.addr)
            .collect();
        addrs.remove(&self.node.addr);
        addrs
    }
}
