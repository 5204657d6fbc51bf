//! # OSM Topology and Way Chaining
//!
//! Raw topology as returned by a geodata provider (nodes, ways, and the relation's
//! way order) and the chainer that turns it into one oriented polyline.
//!
//! ## Algorithm
//! 1. Resolve every way in relation order to coordinates. Unresolved or invalid
//!    nodes are skipped, leaving a gap in the chain rather than failing.
//! 2. Orient the first way so that it leads away from the second way: if its head
//!    sits nearer the second way than its tail does, it is reversed.
//! 3. For each following way, reverse it if its tail is closer to the running tail
//!    than its head, then append it, dropping its first point when it duplicates the
//!    running tail (junction de-duplication).
//!
//! Relation order is trusted. Ways that the relation lists out of order produce a
//! jump, which the repair pipeline handles later.

use std::collections::HashMap;

use log::debug;

use crate::error::{Result, RouteError};
use crate::geo_utils::planar_distance;
use crate::Coordinate;

pub type NodeId = u64;
pub type WayId = u64;
pub type RelationId = u64;

/// One OSM way: an internally ordered list of node references.
#[derive(Debug, Clone, PartialEq)]
pub struct Way {
    pub id: WayId,
    pub node_ids: Vec<NodeId>,
}

/// Topology of one relation (or several merged relations).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationTopology {
    pub relation_id: RelationId,
    pub nodes: HashMap<NodeId, Coordinate>,
    pub ways: Vec<Way>,
    /// Intended traversal order of `ways`, by id.
    pub relation_way_order: Vec<WayId>,
}

impl RelationTopology {
    /// Topology made of a single way, for trails mapped without a relation.
    pub fn from_way(way: Way, nodes: HashMap<NodeId, Coordinate>) -> Self {
        Self {
            relation_id: way.id,
            relation_way_order: vec![way.id],
            ways: vec![way],
            nodes,
        }
    }

    /// Concatenate several topologies in order. The first one's id is kept.
    pub fn merge(parts: Vec<RelationTopology>) -> Self {
        let mut merged = RelationTopology::default();
        for (i, part) in parts.into_iter().enumerate() {
            if i == 0 {
                merged.relation_id = part.relation_id;
            }
            merged.nodes.extend(part.nodes);
            merged.ways.extend(part.ways);
            merged.relation_way_order.extend(part.relation_way_order);
        }
        merged
    }

    /// Resolve the relation's ways to coordinate lists, in relation order.
    ///
    /// Ways missing from `ways`, and ways whose nodes all fail to resolve, are left out.
    pub fn resolve_ways(&self) -> Vec<Vec<Coordinate>> {
        let by_id: HashMap<WayId, &Way> = self.ways.iter().map(|w| (w.id, w)).collect();
        let mut resolved = Vec::with_capacity(self.relation_way_order.len());
        let mut missing_nodes = 0usize;

        for way_id in &self.relation_way_order {
            let Some(way) = by_id.get(way_id) else {
                debug!("[Topology] relation {} references unknown way {}", self.relation_id, way_id);
                continue;
            };

            let coords: Vec<Coordinate> = way
                .node_ids
                .iter()
                .filter_map(|id| {
                    let coord = self.nodes.get(id).filter(|c| c.is_valid());
                    if coord.is_none() {
                        missing_nodes += 1;
                    }
                    coord.copied()
                })
                .collect();

            if !coords.is_empty() {
                resolved.push(coords);
            }
        }

        if missing_nodes > 0 {
            debug!(
                "[Topology] relation {}: {} node references unresolved",
                self.relation_id, missing_nodes
            );
        }
        resolved
    }
}

/// Chain resolved ways into one ordered polyline.
///
/// Returns an empty vector when there are no ways. A single way is returned unmodified.
///
/// # Example
/// ```
/// use trail_rebuild::{chain_ways, Coordinate};
///
/// let a = vec![Coordinate::new(0.0, 0.0), Coordinate::new(1.0, 0.0)];
/// let b = vec![Coordinate::new(2.0, 0.0), Coordinate::new(1.0, 0.0)];
///
/// let chained = chain_ways(&[a, b], 0.00001);
/// assert_eq!(chained.len(), 3);
/// assert_eq!(chained[2], Coordinate::new(2.0, 0.0));
/// ```
pub fn chain_ways(ways: &[Vec<Coordinate>], junction_epsilon: f64) -> Vec<Coordinate> {
    let ways: Vec<&Vec<Coordinate>> = ways.iter().filter(|w| !w.is_empty()).collect();
    let Some(first) = ways.first() else {
        return Vec::new();
    };

    let mut chained: Vec<Coordinate> = first.to_vec();
    if ways.len() == 1 {
        return chained;
    }

    let second = ways[1];
    let (second_head, second_tail) = (second[0], second[second.len() - 1]);
    let gap_to_second = |p: &Coordinate| {
        planar_distance(p, &second_head).min(planar_distance(p, &second_tail))
    };
    if gap_to_second(&chained[0]) < gap_to_second(&chained[chained.len() - 1]) {
        chained.reverse();
    }

    let mut reversed = 0usize;
    for way in &ways[1..] {
        let tail = chained[chained.len() - 1];
        let head_gap = planar_distance(&way[0], &tail);
        let tail_gap = planar_distance(&way[way.len() - 1], &tail);

        let oriented: Box<dyn Iterator<Item = &Coordinate>> = if tail_gap < head_gap {
            reversed += 1;
            Box::new(way.iter().rev())
        } else {
            Box::new(way.iter())
        };

        for (i, p) in oriented.enumerate() {
            if i == 0 && planar_distance(p, &tail) <= junction_epsilon {
                continue;
            }
            chained.push(*p);
        }
    }

    debug!(
        "[Chain] {} ways -> {} points ({} ways reversed)",
        ways.len(),
        chained.len(),
        reversed
    );
    chained
}

/// Resolve and chain a relation's topology.
///
/// Fails with [`RouteError::EmptyTopology`] when no way has any resolvable node.
pub fn chain_relation(topology: &RelationTopology, junction_epsilon: f64) -> Result<Vec<Coordinate>> {
    let ways = topology.resolve_ways();
    let chained = chain_ways(&ways, junction_epsilon);
    if chained.is_empty() {
        return Err(RouteError::EmptyTopology { relation_id: topology.relation_id });
    }
    Ok(chained)
}
