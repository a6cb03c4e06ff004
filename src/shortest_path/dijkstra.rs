use std::collections::BinaryHeap;
use std::fmt::Display;

use crate::{
    network::{NetworkGraph, NodeIdx},
    primitives::{StationId, TotalDistance},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    SameStation,
    StationNotFoundInGraph(StationId),
    NoPathFound,
}

impl Display for PathError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PathError::SameStation => f.write_str("source and target must differ"),
            PathError::StationNotFoundInGraph(station) => {
                write!(f, "station {:?} is not served by any line", station)
            }
            PathError::NoPathFound => f.write_str("no route connects source and target"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueueItem {
    node_id: NodeIdx,
    distance: TotalDistance,
}
impl PartialOrd for QueueItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueueItem {
    // Min-heap on distance, ties popped in ascending node (= station id) order.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .distance
            .cmp(&self.distance)
            .then_with(|| other.node_id.0.cmp(&self.node_id.0))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPath {
    /// Stations from source to target, both inclusive.
    pub stations: Vec<StationId>,
    pub total_distance: TotalDistance,
}

pub fn dijkstra(
    graph: &NetworkGraph,
    source: StationId,
    target: StationId,
) -> Result<RawPath, PathError> {
    if source == target {
        return Err(PathError::SameStation);
    }
    let source_id = graph
        .node_of(source)
        .ok_or(PathError::StationNotFoundInGraph(source))?;
    let target_id = graph
        .node_of(target)
        .ok_or(PathError::StationNotFoundInGraph(target))?;

    let mut distances: Vec<TotalDistance> = vec![TotalDistance::MAX; graph.num_nodes()];
    let mut predecessors: Vec<Option<NodeIdx>> = vec![None; graph.num_nodes()];
    let mut settled: Vec<bool> = vec![false; graph.num_nodes()];
    distances[source_id.0 as usize] = 0;

    let mut queue: BinaryHeap<QueueItem> = BinaryHeap::new();
    queue.push(QueueItem {
        node_id: source_id,
        distance: 0,
    });

    while let Some(QueueItem { node_id, distance }) = queue.pop() {
        if settled[node_id.0 as usize] {
            continue;
        }
        settled[node_id.0 as usize] = true;
        if node_id == target_id {
            return Ok(RawPath {
                stations: unwind(graph, &predecessors, target_id),
                total_distance: distance,
            });
        }

        for &edge_idx in graph.node(node_id).outgoing.iter() {
            let edge = graph.edge(edge_idx);
            if settled[edge.to.0 as usize] {
                continue;
            }
            let candidate = distance + TotalDistance::from(edge.distance);
            if candidate < distances[edge.to.0 as usize] {
                distances[edge.to.0 as usize] = candidate;
                predecessors[edge.to.0 as usize] = Some(node_id);
                queue.push(QueueItem {
                    node_id: edge.to,
                    distance: candidate,
                });
            }
        }
    }

    Err(PathError::NoPathFound)
}

fn unwind(graph: &NetworkGraph, predecessors: &[Option<NodeIdx>], target: NodeIdx) -> Vec<StationId> {
    let mut stations = vec![graph.station(target)];
    let mut current = target;
    while let Some(previous) = predecessors[current.0 as usize] {
        stations.push(graph.station(previous));
        current = previous;
    }
    stations.reverse();
    stations
}
