use std::fmt::Display;
use std::sync::{Mutex, MutexGuard, PoisonError};

use itertools::Itertools;

use crate::{
    col::{map_new, HashMap},
    line::{Line, LineTopology, Segment, TopologyChange, TopologyError},
    primitives::{LineId, SegmentId, Station, StationId},
};

#[derive(Debug)]
pub enum StoreError {
    Sqlite(sqlite::Error),
    LineNotFound(LineId),
    StationNotFound(StationId),
    /// A new line was stored under an id that is already taken.
    DuplicateLine(LineId),
    /// A new segment was stored under an id that is already taken.
    DuplicateSegment(SegmentId),
    /// The stored segments of a line do not form a valid chain.
    CorruptLine(LineId, TopologyError),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Sqlite(err) => write!(f, "database error: {}", err),
            StoreError::LineNotFound(line) => write!(f, "line {:?} does not exist", line),
            StoreError::StationNotFound(station) => {
                write!(f, "station {:?} does not exist", station)
            }
            StoreError::DuplicateLine(line) => write!(f, "line id {:?} is already taken", line),
            StoreError::DuplicateSegment(segment) => {
                write!(f, "segment id {:?} is already taken", segment)
            }
            StoreError::CorruptLine(line, err) => {
                write!(f, "stored line {:?} is corrupt: {}", line, err)
            }
        }
    }
}

/// The station registry.
pub trait StationStore: Sync {
    fn find_station_by_id(&self, id: StationId) -> Result<Station, StoreError>;

    /// Fails with [`StoreError::StationNotFound`] if any of the ids is unknown.
    fn find_all_by_id(&self, ids: &[StationId]) -> Result<HashMap<StationId, Station>, StoreError>;

    fn save_station(&self, station: &Station) -> Result<(), StoreError>;
}

/// Persistence of lines and their segments.
pub trait LineStore: Sync {
    fn find_all_lines(&self) -> Result<Vec<Line>, StoreError>;

    fn find_line_by_id(&self, id: LineId) -> Result<Line, StoreError>;

    /// Writes the line's name and color. Segments are written separately.
    fn save_line(&self, line: &Line) -> Result<(), StoreError>;

    /// Stores a new line together with the change that created its first
    /// segment. Fails with [`StoreError::DuplicateLine`] or
    /// [`StoreError::DuplicateSegment`] if an id is taken, storing nothing.
    fn create_line(&self, line: &Line, change: &TopologyChange) -> Result<(), StoreError>;

    /// Deletes the line together with all of its segments.
    fn delete_line(&self, id: LineId) -> Result<(), StoreError>;

    /// Fails with [`StoreError::DuplicateSegment`] if the id is taken.
    fn create_segment(&self, segment: &Segment) -> Result<(), StoreError>;

    fn save_segment(&self, segment: &Segment) -> Result<(), StoreError>;

    fn delete_segment(&self, id: SegmentId) -> Result<(), StoreError>;

    fn next_line_id(&self) -> Result<LineId, StoreError>;

    fn next_segment_id(&self) -> Result<SegmentId, StoreError>;

    /// Persists the outcome of a topology mutation. The default issues one
    /// call per segment; callers needing atomicity use a store that overrides it.
    fn apply_change(&self, change: &TopologyChange) -> Result<(), StoreError> {
        for segment in &change.created {
            self.create_segment(segment)?;
        }
        for segment in &change.saved {
            self.save_segment(segment)?;
        }
        for &segment_id in &change.deleted {
            self.delete_segment(segment_id)?;
        }
        Ok(())
    }
}

pub(crate) fn assemble_line(
    id: LineId,
    name: String,
    color: String,
    segments: Vec<Segment>,
) -> Result<Line, StoreError> {
    let topology = LineTopology::from_segments(id, segments)
        .map_err(|err| StoreError::CorruptLine(id, err))?;
    Ok(Line {
        id,
        name,
        color,
        topology,
    })
}

#[derive(Debug, Default)]
struct MemoryState {
    stations: HashMap<StationId, Station>,
    lines: HashMap<LineId, (String, String)>,
    segments: HashMap<SegmentId, Segment>,
    last_line_id: u32,
    last_segment_id: u32,
}

impl MemoryState {
    fn line(&self, id: LineId) -> Result<Line, StoreError> {
        let (name, color) = self.lines.get(&id).ok_or(StoreError::LineNotFound(id))?;
        let segments = self
            .segments
            .values()
            .filter(|it| it.line_id == id)
            .cloned()
            .collect();
        assemble_line(id, name.clone(), color.clone(), segments)
    }

    fn check_unused(&self, segments: &[Segment]) -> Result<(), StoreError> {
        match segments.iter().find(|it| self.segments.contains_key(&it.id)) {
            Some(taken) => Err(StoreError::DuplicateSegment(taken.id)),
            None => Ok(()),
        }
    }

    fn apply(&mut self, change: &TopologyChange) {
        for segment in change.created.iter().chain(&change.saved) {
            self.last_segment_id = self.last_segment_id.max(segment.id.0);
            self.segments.insert(segment.id, segment.clone());
        }
        for segment_id in &change.deleted {
            self.segments.remove(segment_id);
        }
    }
}

/// A store keeping everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StationStore for MemoryStore {
    fn find_station_by_id(&self, id: StationId) -> Result<Station, StoreError> {
        self.state()
            .stations
            .get(&id)
            .cloned()
            .ok_or(StoreError::StationNotFound(id))
    }

    fn find_all_by_id(&self, ids: &[StationId]) -> Result<HashMap<StationId, Station>, StoreError> {
        let state = self.state();
        let mut result = map_new();
        for &id in ids {
            let station = state
                .stations
                .get(&id)
                .ok_or(StoreError::StationNotFound(id))?;
            result.insert(id, station.clone());
        }
        Ok(result)
    }

    fn save_station(&self, station: &Station) -> Result<(), StoreError> {
        self.state().stations.insert(station.id, station.clone());
        Ok(())
    }
}

impl LineStore for MemoryStore {
    fn find_all_lines(&self) -> Result<Vec<Line>, StoreError> {
        let state = self.state();
        state
            .lines
            .keys()
            .copied()
            .sorted()
            .map(|id| state.line(id))
            .collect()
    }

    fn find_line_by_id(&self, id: LineId) -> Result<Line, StoreError> {
        self.state().line(id)
    }

    fn save_line(&self, line: &Line) -> Result<(), StoreError> {
        let mut state = self.state();
        state.last_line_id = state.last_line_id.max(line.id.0);
        state
            .lines
            .insert(line.id, (line.name.clone(), line.color.clone()));
        Ok(())
    }

    fn create_line(&self, line: &Line, change: &TopologyChange) -> Result<(), StoreError> {
        let mut state = self.state();
        if state.lines.contains_key(&line.id) {
            return Err(StoreError::DuplicateLine(line.id));
        }
        state.check_unused(&change.created)?;
        state.last_line_id = state.last_line_id.max(line.id.0);
        state
            .lines
            .insert(line.id, (line.name.clone(), line.color.clone()));
        state.apply(change);
        Ok(())
    }

    fn delete_line(&self, id: LineId) -> Result<(), StoreError> {
        let mut state = self.state();
        if state.lines.remove(&id).is_none() {
            return Err(StoreError::LineNotFound(id));
        }
        state.segments.retain(|_, it| it.line_id != id);
        Ok(())
    }

    fn create_segment(&self, segment: &Segment) -> Result<(), StoreError> {
        let mut state = self.state();
        state.check_unused(std::slice::from_ref(segment))?;
        state.last_segment_id = state.last_segment_id.max(segment.id.0);
        state.segments.insert(segment.id, segment.clone());
        Ok(())
    }

    fn save_segment(&self, segment: &Segment) -> Result<(), StoreError> {
        let mut state = self.state();
        state.last_segment_id = state.last_segment_id.max(segment.id.0);
        state.segments.insert(segment.id, segment.clone());
        Ok(())
    }

    fn delete_segment(&self, id: SegmentId) -> Result<(), StoreError> {
        self.state().segments.remove(&id);
        Ok(())
    }

    fn next_line_id(&self) -> Result<LineId, StoreError> {
        let mut state = self.state();
        state.last_line_id += 1;
        Ok(LineId(state.last_line_id))
    }

    fn next_segment_id(&self) -> Result<SegmentId, StoreError> {
        let mut state = self.state();
        state.last_segment_id += 1;
        Ok(SegmentId(state.last_segment_id))
    }

    /// Validates and applies the whole change under one lock, so readers
    /// never observe a half-applied change.
    fn apply_change(&self, change: &TopologyChange) -> Result<(), StoreError> {
        let mut state = self.state();
        state.check_unused(&change.created)?;
        state.apply(change);
        Ok(())
    }
}
