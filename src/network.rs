use std::fmt::Debug;

use itertools::Itertools;

use crate::{
    col::{map_with_capacity, HashMap},
    line::Line,
    primitives::{Distance, StationId},
};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeIdx(pub u32);
impl Debug for NodeIdx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("n#{}", self.0))
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeIdx(pub u32);
impl Debug for EdgeIdx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("e#{}", self.0))
    }
}

#[derive(Debug)]
pub struct EdgePayload {
    pub from: NodeIdx,
    pub to: NodeIdx,
    pub distance: Distance,
}

#[derive(Debug)]
pub struct NodePayload {
    pub station: StationId,
    pub outgoing: Vec<EdgeIdx>,
}

/// The union of all lines' segments as one weighted graph.
///
/// Every segment contributes an edge in both directions. Nodes are indexed in
/// ascending station id order, so comparing node indices compares station ids.
#[derive(Debug)]
pub struct NetworkGraph {
    nodes: Vec<NodePayload>,
    edges: Vec<EdgePayload>,
    node_by_station: HashMap<StationId, NodeIdx>,
}

impl NetworkGraph {
    pub fn create(lines: &[Line]) -> Self {
        let lines = lines.iter().sorted_by_key(|it| it.id).collect_vec();

        let station_ids = lines
            .iter()
            .flat_map(|line| line.topology.stations())
            .sorted()
            .dedup()
            .collect_vec();

        let mut node_by_station = map_with_capacity(station_ids.len());
        let nodes = station_ids
            .iter()
            .enumerate()
            .map(|(idx, &station)| {
                node_by_station.insert(station, NodeIdx(idx as u32));
                NodePayload {
                    station,
                    outgoing: vec![],
                }
            })
            .collect();

        let mut graph = NetworkGraph {
            nodes,
            edges: vec![],
            node_by_station,
        };

        for line in lines {
            for segment in line.topology.segments() {
                let up = graph.node_by_station[&segment.up];
                let down = graph.node_by_station[&segment.down];
                graph.add_edge(up, down, segment.distance);
                graph.add_edge(down, up, segment.distance);
            }
        }

        graph
    }

    fn add_edge(&mut self, from: NodeIdx, to: NodeIdx, distance: Distance) -> EdgeIdx {
        let edge_idx = EdgeIdx(self.edges.len() as u32);
        self.edges.push(EdgePayload { from, to, distance });
        self.nodes[from.0 as usize].outgoing.push(edge_idx);
        edge_idx
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn node(&self, node_idx: NodeIdx) -> &NodePayload {
        &self.nodes[node_idx.0 as usize]
    }

    pub fn edge(&self, edge_idx: EdgeIdx) -> &EdgePayload {
        &self.edges[edge_idx.0 as usize]
    }

    pub fn node_of(&self, station: StationId) -> Option<NodeIdx> {
        self.node_by_station.get(&station).copied()
    }

    pub fn station(&self, node_idx: NodeIdx) -> StationId {
        self.node(node_idx).station
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        line::Line,
        primitives::{LineId, SegmentId, StationId},
    };

    use super::NetworkGraph;

    #[test]
    fn test_create_graph() {
        let (mut line1, _) = Line::create(
            LineId(1),
            "1",
            "red",
            SegmentId(1),
            StationId(5),
            StationId(2),
            5,
        )
        .unwrap();
        line1
            .topology
            .insert(SegmentId(2), StationId(2), StationId(9), 3)
            .unwrap();
        let (line2, _) = Line::create(
            LineId(2),
            "2",
            "blue",
            SegmentId(3),
            StationId(5),
            StationId(2),
            1,
        )
        .unwrap();

        let graph = NetworkGraph::create(&[line2, line1]);
        assert_eq!(graph.num_nodes(), 3);
        assert_eq!(graph.num_edges(), 6);

        let node_2 = graph.node_of(StationId(2)).unwrap();
        let node_5 = graph.node_of(StationId(5)).unwrap();
        let node_9 = graph.node_of(StationId(9)).unwrap();
        assert!(node_2 < node_5 && node_5 < node_9);
        assert_eq!(graph.node_of(StationId(3)), None);

        // Parallel segments of different lines coexist.
        let distances = graph
            .node(node_5)
            .outgoing
            .iter()
            .map(|&it| graph.edge(it))
            .filter(|it| it.to == node_2)
            .map(|it| it.distance)
            .collect::<Vec<_>>();
        assert_eq!(distances, [5, 1]);
    }
}
