use std::fmt::Display;

use crate::{
    col::{map_new, set_new, HashMap, HashSet},
    primitives::{Distance, LineId, SegmentId, StationId, TotalDistance},
};

/// A directed, weighted connection between two adjacent stations of one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub id: SegmentId,
    pub line_id: LineId,
    pub up: StationId,
    pub down: StationId,
    pub distance: Distance,
}

impl Segment {
    pub fn new(
        id: SegmentId,
        line_id: LineId,
        up: StationId,
        down: StationId,
        distance: Distance,
    ) -> Self {
        Self {
            id,
            line_id,
            up,
            down,
            distance,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidTopologyKind {
    SameStation,
    BothRegistered,
    Disconnected,
    NotAChain,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    InvalidDistance,
    InvalidTopology(InvalidTopologyKind),
    MinimumSectionViolation,
    StationNotFound(StationId),
}

impl Display for TopologyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TopologyError::InvalidDistance => f.write_str(
                "invalid distance: segments must be positive, a split strictly shorter than the segment it splits and a merge must fit a single segment",
            ),
            TopologyError::InvalidTopology(kind) => match kind {
                InvalidTopologyKind::SameStation => {
                    f.write_str("invalid topology: up and down station must differ")
                }
                InvalidTopologyKind::BothRegistered => {
                    f.write_str("invalid topology: both stations already registered")
                }
                InvalidTopologyKind::Disconnected => {
                    f.write_str("invalid topology: neither station connects to existing line")
                }
                InvalidTopologyKind::NotAChain => {
                    f.write_str("invalid topology: segments do not form a single chain")
                }
            },
            TopologyError::MinimumSectionViolation => {
                f.write_str("cannot remove from a line with a single segment")
            }
            TopologyError::StationNotFound(station) => {
                write!(f, "station {:?} is not part of the line", station)
            }
        }
    }
}

/// The segments a store has to write back after a successful mutation.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TopologyChange {
    /// Segments under a freshly allocated id. Storing one whose id is taken
    /// must fail.
    pub created: Vec<Segment>,
    /// Existing segments with new endpoints or distance.
    pub saved: Vec<Segment>,
    pub deleted: Vec<SegmentId>,
}

/// The segment chain of a single line.
///
/// Segments are kept in an arena keyed by id, together with two indices
/// mapping a station to the segment leaving it (`by_up`) and the segment
/// entering it (`by_down`). A non-empty topology always forms exactly one
/// simple path: a single station without an incoming segment (the start),
/// a single station without an outgoing segment (the end) and exactly one
/// incoming and one outgoing segment for every other station.
#[derive(Debug, Clone)]
pub struct LineTopology {
    line_id: LineId,
    segments: HashMap<SegmentId, Segment>,
    by_up: HashMap<StationId, SegmentId>,
    by_down: HashMap<StationId, SegmentId>,
}

impl LineTopology {
    pub fn new(line_id: LineId) -> Self {
        Self {
            line_id,
            segments: map_new(),
            by_up: map_new(),
            by_down: map_new(),
        }
    }

    /// Rebuilds a topology from the flat segment set of a store.
    pub fn from_segments(
        line_id: LineId,
        segments: impl IntoIterator<Item = Segment>,
    ) -> Result<Self, TopologyError> {
        let mut topology = Self::new(line_id);
        for segment in segments {
            if segment.line_id != line_id
                || segment.up == segment.down
                || segment.distance == 0
                || topology.by_up.contains_key(&segment.up)
                || topology.by_down.contains_key(&segment.down)
            {
                return Err(TopologyError::InvalidTopology(
                    InvalidTopologyKind::NotAChain,
                ));
            }
            topology.attach(segment);
        }
        if !topology.is_chain() {
            return Err(TopologyError::InvalidTopology(
                InvalidTopologyKind::NotAChain,
            ));
        }
        Ok(topology)
    }

    pub fn line_id(&self) -> LineId {
        self.line_id
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn contains(&self, station: StationId) -> bool {
        self.by_up.contains_key(&station) || self.by_down.contains_key(&station)
    }

    pub fn start(&self) -> Option<StationId> {
        self.by_up
            .keys()
            .copied()
            .find(|station| !self.by_down.contains_key(station))
    }

    pub fn end(&self) -> Option<StationId> {
        self.by_down
            .keys()
            .copied()
            .find(|station| !self.by_up.contains_key(station))
    }

    /// Segments in chain order, from the start station to the end station.
    pub fn segments(&self) -> Vec<&Segment> {
        let mut result = Vec::with_capacity(self.segments.len());
        let mut current = self.start();
        while let Some(station) = current {
            let Some(segment_id) = self.by_up.get(&station) else {
                break;
            };
            let segment = &self.segments[segment_id];
            result.push(segment);
            current = Some(segment.down);
            if result.len() > self.segments.len() {
                break;
            }
        }
        result
    }

    /// Stations in chain order. Empty for an empty topology.
    pub fn stations(&self) -> Vec<StationId> {
        let segments = self.segments();
        match segments.first() {
            None => vec![],
            Some(first) => std::iter::once(first.up)
                .chain(segments.iter().map(|it| it.down))
                .collect(),
        }
    }

    pub fn total_distance(&self) -> TotalDistance {
        self.segments
            .values()
            .map(|it| TotalDistance::from(it.distance))
            .sum()
    }

    /// Checks the single-chain invariant.
    pub fn is_chain(&self) -> bool {
        if self.segments.is_empty() {
            return self.by_up.is_empty() && self.by_down.is_empty();
        }
        let starts = self
            .by_up
            .keys()
            .filter(|station| !self.by_down.contains_key(station))
            .count();
        let ends = self
            .by_down
            .keys()
            .filter(|station| !self.by_up.contains_key(station))
            .count();
        if starts != 1 || ends != 1 {
            return false;
        }
        let mut visited: HashSet<StationId> = set_new();
        for station in self.stations() {
            if !visited.insert(station) {
                return false;
            }
        }
        visited.len() == self.segments.len() + 1
            && self
                .segments
                .values()
                .all(|it| it.up != it.down && it.distance > 0)
    }

    /// Connects `up` and `down` with a new segment, either extending the chain
    /// at one of its ends or splitting the existing segment that shares an
    /// endpoint with the new one. `new_id` is used for the created segment.
    pub fn insert(
        &mut self,
        new_id: SegmentId,
        up: StationId,
        down: StationId,
        distance: Distance,
    ) -> Result<TopologyChange, TopologyError> {
        if distance == 0 {
            return Err(TopologyError::InvalidDistance);
        }
        if up == down {
            return Err(TopologyError::InvalidTopology(
                InvalidTopologyKind::SameStation,
            ));
        }
        let segment = Segment::new(new_id, self.line_id, up, down, distance);
        if self.is_empty() {
            self.attach(segment.clone());
            return Ok(TopologyChange {
                created: vec![segment],
                ..Default::default()
            });
        }

        match (self.contains(up), self.contains(down)) {
            (true, true) => Err(TopologyError::InvalidTopology(
                InvalidTopologyKind::BothRegistered,
            )),
            (false, false) => Err(TopologyError::InvalidTopology(
                InvalidTopologyKind::Disconnected,
            )),
            (false, true) => self.insert_before(segment),
            (true, false) => self.insert_after(segment),
        }
    }

    /// `segment.down` is on the line, `segment.up` is new.
    fn insert_before(&mut self, segment: Segment) -> Result<TopologyChange, TopologyError> {
        let Some(&existing_id) = self.by_down.get(&segment.down) else {
            // `segment.down` is the start of the chain.
            self.attach(segment.clone());
            return Ok(TopologyChange {
                created: vec![segment],
                ..Default::default()
            });
        };
        if segment.distance >= self.segments[&existing_id].distance {
            return Err(TopologyError::InvalidDistance);
        }
        let mut existing = self.detach(existing_id);
        existing.down = segment.up;
        existing.distance -= segment.distance;
        self.attach(existing.clone());
        self.attach(segment.clone());
        Ok(TopologyChange {
            created: vec![segment],
            saved: vec![existing],
            deleted: vec![],
        })
    }

    /// `segment.up` is on the line, `segment.down` is new.
    fn insert_after(&mut self, segment: Segment) -> Result<TopologyChange, TopologyError> {
        let Some(&existing_id) = self.by_up.get(&segment.up) else {
            // `segment.up` is the end of the chain.
            self.attach(segment.clone());
            return Ok(TopologyChange {
                created: vec![segment],
                ..Default::default()
            });
        };
        if segment.distance >= self.segments[&existing_id].distance {
            return Err(TopologyError::InvalidDistance);
        }
        let mut existing = self.detach(existing_id);
        existing.up = segment.down;
        existing.distance -= segment.distance;
        self.attach(segment.clone());
        self.attach(existing.clone());
        Ok(TopologyChange {
            created: vec![segment],
            saved: vec![existing],
            deleted: vec![],
        })
    }

    /// Removes `station` from the line. An interior station merges its two
    /// adjacent segments into one, a boundary station drops its only segment.
    pub fn remove_station(&mut self, station: StationId) -> Result<TopologyChange, TopologyError> {
        if self.len() == 1 {
            return Err(TopologyError::MinimumSectionViolation);
        }
        let incoming = self.by_down.get(&station).copied();
        let outgoing = self.by_up.get(&station).copied();
        match (incoming, outgoing) {
            (Some(incoming), Some(outgoing)) => {
                let distance = self.segments[&incoming]
                    .distance
                    .checked_add(self.segments[&outgoing].distance)
                    .ok_or(TopologyError::InvalidDistance)?;
                let outgoing = self.detach(outgoing);
                let mut merged = self.detach(incoming);
                merged.down = outgoing.down;
                merged.distance = distance;
                self.attach(merged.clone());
                Ok(TopologyChange {
                    created: vec![],
                    saved: vec![merged],
                    deleted: vec![outgoing.id],
                })
            }
            (None, Some(segment_id)) | (Some(segment_id), None) => {
                let removed = self.detach(segment_id);
                Ok(TopologyChange {
                    deleted: vec![removed.id],
                    ..Default::default()
                })
            }
            (None, None) => Err(TopologyError::StationNotFound(station)),
        }
    }

    fn attach(&mut self, segment: Segment) {
        self.by_up.insert(segment.up, segment.id);
        self.by_down.insert(segment.down, segment.id);
        self.segments.insert(segment.id, segment);
    }

    fn detach(&mut self, segment_id: SegmentId) -> Segment {
        let segment = self
            .segments
            .remove(&segment_id)
            .expect("segment indices out of sync");
        self.by_up.remove(&segment.up);
        self.by_down.remove(&segment.down);
        segment
    }
}

#[derive(Debug, Clone)]
pub struct Line {
    pub id: LineId,
    pub name: String,
    pub color: String,
    pub topology: LineTopology,
}

impl Line {
    /// Creates a line together with its first segment.
    pub fn create(
        id: LineId,
        name: impl Into<String>,
        color: impl Into<String>,
        segment_id: SegmentId,
        up: StationId,
        down: StationId,
        distance: Distance,
    ) -> Result<(Self, TopologyChange), TopologyError> {
        let mut topology = LineTopology::new(id);
        let change = topology.insert(segment_id, up, down, distance)?;
        Ok((
            Self {
                id,
                name: name.into(),
                color: color.into(),
                topology,
            },
            change,
        ))
    }

    pub fn update(&mut self, name: impl Into<String>, color: impl Into<String>) {
        self.name = name.into();
        self.color = color.into();
    }
}
