use std::{cmp::Reverse, collections::BinaryHeap};

use dsr_common::{Address, Path};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::error::LinkCacheError;

/// Stable handle of a node in the graph arena.
type NodeId = usize;

#[derive(Debug)]
struct Node {
    addr: Address,
    /// Number of links pointing at this node.
    references: u32,
    /// Outgoing links and their weights.
    links: FxHashMap<NodeId, u16>,
    /// Pinned nodes are never collected.
    pinned: bool,
}

impl Node {
    fn new(addr: Address) -> Self {
        Self { addr, references: 0, links: FxHashMap::default(), pinned: false }
    }

    #[inline]
    fn is_garbage(&self) -> bool {
        !self.pinned && self.references == 0 && self.links.is_empty()
    }
}

#[derive(Debug, Default)]
struct LinkGraph {
    nodes: Vec<Option<Node>>,
    index: FxHashMap<Address, NodeId>,
    free: Vec<NodeId>,
}

impl LinkGraph {
    fn get_or_insert(&mut self, addr: Address) -> NodeId {
        if let Some(id) = self.index.get(&addr) {
            return *id;
        }

        let node = Some(Node::new(addr));
        let id = match self.free.pop() {
            Some(id) => {
                self.nodes[id] = node;
                id
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        };

        self.index.insert(addr, id);
        id
    }

    #[inline]
    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id).and_then(Option::as_ref)
    }

    #[inline]
    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id).and_then(Option::as_mut)
    }
}

/// Outcome of [`LinkCache::add_link`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkChange {
    Inserted,
    /// The link was known and its weight was replaced.
    Updated,
}

/// A snapshot of a single link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkRecord {
    pub from: Address,
    pub to: Address,
    pub weight: u16,
}

/// A directed, weighted graph of every link the node has learned about. Routes are computed
/// from it with Dijkstra's algorithm.
///
/// Nodes live in an arena and refer to each other by handle. A node whose last link was removed
/// stays in the arena until [`collect_garbage`](Self::collect_garbage) reclaims it.
#[derive(Debug)]
pub struct LinkCache {
    graph: RwLock<LinkGraph>,
    /// Whether re-adding a known link replaces its weight.
    volatile: bool,
}

impl LinkCache {
    /// Creates a link cache anchored at the local node, which is never collected.
    pub fn new(local: Address, volatile: bool) -> Self {
        let mut graph = LinkGraph::default();
        let id = graph.get_or_insert(local);
        if let Some(node) = graph.node_mut(id) {
            node.pinned = true;
        }

        Self { graph: RwLock::new(graph), volatile }
    }

    /// Adds the link `from -> to`. Under a volatile metric an existing link gets the new weight,
    /// otherwise it is rejected with [`LinkCacheError::AlreadyExists`].
    pub fn add_link(&self, from: Address, to: Address, weight: u16) -> Result<LinkChange, LinkCacheError> {
        if from == to {
            return Err(LinkCacheError::SelfLoop(from));
        }

        let mut graph = self.graph.write();
        let from_id = graph.get_or_insert(from);
        let to_id = graph.get_or_insert(to);

        let node = graph.node_mut(from_id).ok_or(LinkCacheError::Uninitialized(from))?;
        if let Some(current) = node.links.get_mut(&to_id) {
            if !self.volatile {
                return Err(LinkCacheError::AlreadyExists(from, to));
            }
            *current = weight;
            return Ok(LinkChange::Updated);
        }
        node.links.insert(to_id, weight);

        if let Some(node) = graph.node_mut(to_id) {
            node.references += 1;
        }

        trace!(%from, %to, weight, "learned link");
        Ok(LinkChange::Inserted)
    }

    /// Removes the link `from -> to`.
    pub fn remove_link(&self, from: &Address, to: &Address) -> Result<(), LinkCacheError> {
        let mut graph = self.graph.write();
        let no_link = || LinkCacheError::NoSuchLink(*from, *to);

        let from_id = *graph.index.get(from).ok_or_else(no_link)?;
        let to_id = *graph.index.get(to).ok_or_else(no_link)?;

        graph
            .node_mut(from_id)
            .and_then(|node| node.links.remove(&to_id))
            .ok_or_else(no_link)?;

        if let Some(node) = graph.node_mut(to_id) {
            node.references = node.references.saturating_sub(1);
        }

        trace!(%from, %to, "removed link");
        Ok(())
    }

    /// Returns the weight of the link `from -> to`.
    pub fn link_weight(&self, from: &Address, to: &Address) -> Option<u16> {
        let graph = self.graph.read();
        let from_id = graph.index.get(from)?;
        let to_id = graph.index.get(to)?;
        graph.node(*from_id)?.links.get(to_id).copied()
    }

    /// Returns the number of links pointing at `addr`, or `None` if the node is unknown.
    pub fn reference_count(&self, addr: &Address) -> Option<u32> {
        let graph = self.graph.read();
        graph.index.get(addr).and_then(|id| graph.node(*id)).map(|node| node.references)
    }

    /// Reclaims every node that has neither incoming nor outgoing links. Returns the number of
    /// reclaimed nodes.
    pub fn collect_garbage(&self) -> usize {
        let mut graph = self.graph.write();
        let LinkGraph { nodes, index, free } = &mut *graph;

        let mut collected = 0;
        for (id, slot) in nodes.iter_mut().enumerate() {
            if slot.as_ref().is_some_and(Node::is_garbage) {
                if let Some(node) = slot.take() {
                    index.remove(&node.addr);
                }
                free.push(id);
                collected += 1;
            }
        }

        collected
    }

    /// Computes the lightest path from `src` to `dest`.
    pub fn shortest_path(&self, src: &Address, dest: &Address) -> Result<Path, LinkCacheError> {
        let graph = self.graph.read();

        let src_id = *graph.index.get(src).ok_or(LinkCacheError::Uninitialized(*src))?;
        let dest_id = *graph.index.get(dest).ok_or(LinkCacheError::NoPath(*dest))?;
        if src_id == dest_id {
            return Err(LinkCacheError::NoPath(*dest));
        }

        let mut distance = vec![u32::MAX; graph.nodes.len()];
        let mut predecessor: Vec<Option<NodeId>> = vec![None; graph.nodes.len()];
        let mut heap = BinaryHeap::new();

        distance[src_id] = 0;
        heap.push(Reverse((0u32, src_id)));

        while let Some(Reverse((dist, id))) = heap.pop() {
            if id == dest_id {
                break;
            }
            if dist > distance[id] {
                continue;
            }

            let Some(node) = graph.node(id) else { continue };
            for (next, weight) in &node.links {
                let candidate = dist + u32::from(*weight);
                if candidate < distance[*next] {
                    distance[*next] = candidate;
                    predecessor[*next] = Some(id);
                    heap.push(Reverse((candidate, *next)));
                }
            }
        }

        if distance[dest_id] == u32::MAX {
            return Err(LinkCacheError::NoPath(*dest));
        }

        let mut hops = Vec::new();
        let mut current = Some(dest_id);
        while let Some(id) = current {
            let node = graph.node(id).ok_or(LinkCacheError::NoPath(*dest))?;
            hops.push(node.addr);
            current = predecessor[id];
        }
        hops.reverse();

        Path::new(hops, distance[dest_id]).map_err(|_| LinkCacheError::NoPath(*dest))
    }

    /// Number of nodes in the graph, including the local node.
    pub fn node_count(&self) -> usize {
        self.graph.read().index.len()
    }

    /// Returns a copy of every link.
    pub fn snapshot(&self) -> Vec<LinkRecord> {
        let graph = self.graph.read();
        graph
            .nodes
            .iter()
            .flatten()
            .flat_map(|node| {
                node.links.iter().filter_map(|(to, weight)| {
                    graph.node(*to).map(|to| LinkRecord { from: node.addr, to: to.addr, weight: *weight })
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> Address {
        Address::new([2, 0, 0, 0, 0, n])
    }

    /// 1 -> 2 -> 3 -> 5 is the unique lightest route to 5, 1 -> 4 -> 5 is heavier.
    fn diamond() -> LinkCache {
        let cache = LinkCache::new(addr(1), false);
        cache.add_link(addr(1), addr(2), 100).unwrap();
        cache.add_link(addr(2), addr(3), 100).unwrap();
        cache.add_link(addr(3), addr(5), 100).unwrap();
        cache.add_link(addr(1), addr(4), 200).unwrap();
        cache.add_link(addr(4), addr(5), 200).unwrap();
        cache
    }

    #[test]
    fn shortest_path_is_unique_minimum() {
        let cache = diamond();
        let path = cache.shortest_path(&addr(1), &addr(5)).unwrap();
        assert_eq!(path.hops(), &[addr(1), addr(2), addr(3), addr(5)]);
        assert_eq!(path.weight(), 300);

        cache.remove_link(&addr(2), &addr(3)).unwrap();
        let path = cache.shortest_path(&addr(1), &addr(5)).unwrap();
        assert_eq!(path.hops(), &[addr(1), addr(4), addr(5)]);
        assert_eq!(path.weight(), 400);
    }

    #[test]
    fn removing_critical_edge_yields_no_path() {
        let cache = LinkCache::new(addr(1), false);
        cache.add_link(addr(1), addr(2), 100).unwrap();
        cache.add_link(addr(2), addr(3), 100).unwrap();
        assert!(cache.shortest_path(&addr(1), &addr(3)).is_ok());

        cache.remove_link(&addr(2), &addr(3)).unwrap();
        assert_eq!(cache.shortest_path(&addr(1), &addr(3)), Err(LinkCacheError::NoPath(addr(3))));
    }

    #[test]
    fn unknown_source_is_uninitialized() {
        let cache = diamond();
        assert_eq!(
            cache.shortest_path(&addr(9), &addr(5)),
            Err(LinkCacheError::Uninitialized(addr(9)))
        );
        assert_eq!(cache.shortest_path(&addr(1), &addr(9)), Err(LinkCacheError::NoPath(addr(9))));
    }

    #[test]
    fn static_metric_rejects_duplicate_links() {
        let cache = LinkCache::new(addr(1), false);
        cache.add_link(addr(1), addr(2), 100).unwrap();
        assert_eq!(
            cache.add_link(addr(1), addr(2), 100),
            Err(LinkCacheError::AlreadyExists(addr(1), addr(2)))
        );
        assert_eq!(cache.add_link(addr(1), addr(1), 100), Err(LinkCacheError::SelfLoop(addr(1))));
        assert_eq!(
            cache.remove_link(&addr(2), &addr(1)),
            Err(LinkCacheError::NoSuchLink(addr(2), addr(1)))
        );
    }

    #[test]
    fn volatile_metric_updates_weight() {
        let cache = LinkCache::new(addr(1), true);
        assert_eq!(cache.add_link(addr(1), addr(2), 100), Ok(LinkChange::Inserted));
        assert_eq!(cache.add_link(addr(1), addr(2), 250), Ok(LinkChange::Updated));
        assert_eq!(cache.link_weight(&addr(1), &addr(2)), Some(250));
        assert_eq!(cache.reference_count(&addr(2)), Some(1));
    }

    #[test]
    fn reference_counts_and_garbage_collection() {
        let cache = LinkCache::new(addr(1), false);
        cache.add_link(addr(1), addr(2), 100).unwrap();
        cache.add_link(addr(2), addr(3), 100).unwrap();
        assert_eq!(cache.reference_count(&addr(2)), Some(1));
        assert_eq!(cache.reference_count(&addr(3)), Some(1));

        cache.remove_link(&addr(2), &addr(3)).unwrap();
        cache.remove_link(&addr(1), &addr(2)).unwrap();
        for n in 1..=3 {
            assert_eq!(cache.reference_count(&addr(n)), Some(0));
        }

        // Everything but the local node is reclaimed.
        assert_eq!(cache.collect_garbage(), 2);
        assert_eq!(cache.node_count(), 1);
        assert_eq!(cache.reference_count(&addr(2)), None);

        // Freed slots are reused.
        cache.add_link(addr(1), addr(4), 100).unwrap();
        assert_eq!(cache.node_count(), 2);
        assert_eq!(cache.snapshot(), vec![LinkRecord { from: addr(1), to: addr(4), weight: 100 }]);
    }
}
