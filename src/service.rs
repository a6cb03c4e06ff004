use std::fmt::Display;

use log::{debug, info, warn};

use crate::{
    line::{Line, TopologyError},
    network::NetworkGraph,
    path::{assemble, PathResult},
    primitives::{Distance, LineId, StationId},
    shortest_path::dijkstra::{dijkstra, PathError},
    store::{LineStore, StationStore, StoreError},
};

#[derive(Debug)]
pub enum ServiceError {
    Store(StoreError),
    Topology(TopologyError),
    Path(PathError),
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::Store(err) => Display::fmt(err, f),
            ServiceError::Topology(err) => Display::fmt(err, f),
            ServiceError::Path(err) => Display::fmt(err, f),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        ServiceError::Store(err)
    }
}

impl From<TopologyError> for ServiceError {
    fn from(err: TopologyError) -> Self {
        ServiceError::Topology(err)
    }
}

impl From<PathError> for ServiceError {
    fn from(err: PathError) -> Self {
        ServiceError::Path(err)
    }
}

/// Attempts at a mutation before an id collision is reported to the caller.
const MAX_ATTEMPTS: usize = 3;

/// Re-runs `mutate` when the store reports that a freshly allocated id has
/// been taken in the meantime, e.g. by another handle on the same database.
fn retry_on_taken_id<T>(
    mut mutate: impl FnMut() -> Result<T, ServiceError>,
) -> Result<T, ServiceError> {
    let mut attempt = 1;
    loop {
        match mutate() {
            Err(ServiceError::Store(
                err @ (StoreError::DuplicateLine(_) | StoreError::DuplicateSegment(_)),
            )) if attempt < MAX_ATTEMPTS => {
                warn!("Attempt {} failed: {}, retrying with fresh ids", attempt, err);
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// Administration of lines. Each call issues several store calls; callers
/// must not run two mutations of the same line concurrently.
pub struct LineService<'a, L: LineStore, S: StationStore> {
    lines: &'a L,
    stations: &'a S,
}

impl<'a, L: LineStore, S: StationStore> LineService<'a, L, S> {
    pub fn new(lines: &'a L, stations: &'a S) -> Self {
        Self { lines, stations }
    }

    pub fn find_lines(&self) -> Result<Vec<Line>, ServiceError> {
        Ok(self.lines.find_all_lines()?)
    }

    pub fn find_line(&self, id: LineId) -> Result<Line, ServiceError> {
        Ok(self.lines.find_line_by_id(id)?)
    }

    pub fn create_line(
        &self,
        name: &str,
        color: &str,
        up: StationId,
        down: StationId,
        distance: Distance,
    ) -> Result<Line, ServiceError> {
        self.stations.find_station_by_id(up)?;
        self.stations.find_station_by_id(down)?;
        let line = retry_on_taken_id(|| {
            let id = self.lines.next_line_id()?;
            let segment_id = self.lines.next_segment_id()?;
            let (line, change) = Line::create(id, name, color, segment_id, up, down, distance)?;
            self.lines.create_line(&line, &change)?;
            Ok(line)
        })?;
        info!(
            "Created line {:?} '{}' with {:?} -> {:?} ({})",
            line.id, name, up, down, distance
        );
        Ok(line)
    }

    pub fn update_line(&self, id: LineId, name: &str, color: &str) -> Result<Line, ServiceError> {
        let mut line = self.lines.find_line_by_id(id)?;
        line.update(name, color);
        self.lines.save_line(&line)?;
        info!("Updated line {:?} to '{}' ({})", id, name, color);
        Ok(line)
    }

    pub fn delete_line(&self, id: LineId) -> Result<(), ServiceError> {
        self.lines.delete_line(id)?;
        info!("Deleted line {:?}", id);
        Ok(())
    }

    pub fn insert_section(
        &self,
        line_id: LineId,
        up: StationId,
        down: StationId,
        distance: Distance,
    ) -> Result<Line, ServiceError> {
        self.stations.find_station_by_id(up)?;
        self.stations.find_station_by_id(down)?;
        let line = retry_on_taken_id(|| {
            let mut line = self.lines.find_line_by_id(line_id)?;
            let segment_id = self.lines.next_segment_id()?;
            let change = line.topology.insert(segment_id, up, down, distance)?;
            self.lines.apply_change(&change)?;
            Ok(line)
        })?;
        info!(
            "Inserted {:?} -> {:?} ({}) into line {:?}",
            up, down, distance, line_id
        );
        debug!("Line {:?} is now {:?}", line_id, line.topology.stations());
        Ok(line)
    }

    pub fn remove_section(&self, line_id: LineId, station: StationId) -> Result<Line, ServiceError> {
        let mut line = self.lines.find_line_by_id(line_id)?;
        let change = line.topology.remove_station(station)?;
        self.lines.apply_change(&change)?;
        info!("Removed {:?} from line {:?}", station, line_id);
        debug!("Line {:?} is now {:?}", line_id, line.topology.stations());
        Ok(line)
    }
}

pub trait PathFinder: Sync {
    fn find_path(&self, source: StationId, target: StationId) -> Result<PathResult, ServiceError>;
}

/// Answers path queries over the union of all lines.
pub struct MapService<'a, L: LineStore, S: StationStore> {
    lines: &'a L,
    stations: &'a S,
}

impl<'a, L: LineStore, S: StationStore> MapService<'a, L, S> {
    pub fn new(lines: &'a L, stations: &'a S) -> Self {
        Self { lines, stations }
    }
}

impl<L: LineStore, S: StationStore> PathFinder for MapService<'_, L, S> {
    fn find_path(&self, source: StationId, target: StationId) -> Result<PathResult, ServiceError> {
        if source == target {
            return Err(PathError::SameStation.into());
        }

        let (lines, (source_station, target_station)) = rayon::join(
            || self.lines.find_all_lines(),
            || {
                rayon::join(
                    || self.stations.find_station_by_id(source),
                    || self.stations.find_station_by_id(target),
                )
            },
        );
        let lines = lines?;
        let source_station = source_station?;
        let target_station = target_station?;

        let graph = NetworkGraph::create(&lines);
        debug!(
            "Built network of {} lines: {} stations, {} edges",
            lines.len(),
            graph.num_nodes(),
            graph.num_edges()
        );
        let raw = dijkstra(&graph, source, target)?;

        let by_id = self.stations.find_all_by_id(&raw.stations)?;
        let stations = raw
            .stations
            .iter()
            .map(|id| {
                by_id
                    .get(id)
                    .cloned()
                    .ok_or(StoreError::StationNotFound(*id))
            })
            .collect::<Result<Vec<_>, _>>()?;
        info!(
            "Path {} -> {}: {} stations, distance {}",
            source_station.name,
            target_station.name,
            stations.len(),
            raw.total_distance
        );
        Ok(assemble(stations, raw.total_distance))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use crate::{
        line::{InvalidTopologyKind, Line, Segment, TopologyChange, TopologyError},
        primitives::{LineId, SegmentId, Station, StationId},
        shortest_path::dijkstra::PathError,
        store::{LineStore, MemoryStore, StationStore, StoreError},
    };

    use super::{LineService, MapService, PathFinder, ServiceError};

    fn store_with_stations(names: &[&str]) -> MemoryStore {
        let store = MemoryStore::new();
        for (idx, name) in names.iter().enumerate() {
            store
                .save_station(&Station::new(StationId(idx as u32 + 1), *name))
                .unwrap();
        }
        store
    }

    #[test]
    fn test_remove_insert_then_find_path() {
        // A=1, B=2, C=3, D=4
        let store = store_with_stations(&["A", "B", "C", "D"]);
        let lines = LineService::new(&store, &store);
        let line = lines
            .create_line("L", "blue", StationId(1), StationId(2), 3)
            .unwrap();
        lines
            .insert_section(line.id, StationId(2), StationId(3), 4)
            .unwrap();

        let line = lines.remove_section(line.id, StationId(2)).unwrap();
        assert_eq!(line.topology.stations(), [StationId(1), StationId(3)]);
        assert_eq!(line.topology.total_distance(), 7);

        lines
            .insert_section(line.id, StationId(4), StationId(1), 2)
            .unwrap();
        let line = lines.find_line(line.id).unwrap();
        assert_eq!(
            line.topology.stations(),
            [StationId(4), StationId(1), StationId(3)]
        );

        let map = MapService::new(&store, &store);
        let path = map.find_path(StationId(4), StationId(3)).unwrap();
        assert_eq!(
            path.stations.iter().map(|it| it.name.as_str()).collect::<Vec<_>>(),
            ["D", "A", "C"]
        );
        assert_eq!(path.total_distance, 9);
    }

    /// Hands out a segment id that is already taken, as a second handle on
    /// the same database would before this one writes.
    struct StaleSegmentIds<'a> {
        store: &'a MemoryStore,
        stale: Mutex<Vec<SegmentId>>,
    }

    impl LineStore for StaleSegmentIds<'_> {
        fn find_all_lines(&self) -> Result<Vec<Line>, StoreError> {
            self.store.find_all_lines()
        }
        fn find_line_by_id(&self, id: LineId) -> Result<Line, StoreError> {
            self.store.find_line_by_id(id)
        }
        fn save_line(&self, line: &Line) -> Result<(), StoreError> {
            self.store.save_line(line)
        }
        fn create_line(&self, line: &Line, change: &TopologyChange) -> Result<(), StoreError> {
            self.store.create_line(line, change)
        }
        fn delete_line(&self, id: LineId) -> Result<(), StoreError> {
            self.store.delete_line(id)
        }
        fn create_segment(&self, segment: &Segment) -> Result<(), StoreError> {
            self.store.create_segment(segment)
        }
        fn save_segment(&self, segment: &Segment) -> Result<(), StoreError> {
            self.store.save_segment(segment)
        }
        fn delete_segment(&self, id: SegmentId) -> Result<(), StoreError> {
            self.store.delete_segment(id)
        }
        fn next_line_id(&self) -> Result<LineId, StoreError> {
            self.store.next_line_id()
        }
        fn next_segment_id(&self) -> Result<SegmentId, StoreError> {
            match self.stale.lock().unwrap().pop() {
                Some(id) => Ok(id),
                None => self.store.next_segment_id(),
            }
        }
        fn apply_change(&self, change: &TopologyChange) -> Result<(), StoreError> {
            self.store.apply_change(change)
        }
    }

    #[test]
    fn test_taken_segment_ids_are_retried() {
        let store = store_with_stations(&["A", "B", "C", "D"]);
        let line = LineService::new(&store, &store)
            .create_line("L", "blue", StationId(1), StationId(2), 3)
            .unwrap();

        let stale = StaleSegmentIds {
            store: &store,
            stale: Mutex::new(vec![SegmentId(1)]),
        };
        let lines = LineService::new(&stale, &store);
        let inserted = lines
            .insert_section(line.id, StationId(2), StationId(3), 4)
            .unwrap();
        assert_eq!(
            inserted.topology.stations(),
            [StationId(1), StationId(2), StationId(3)]
        );
        let loaded = store.find_line_by_id(line.id).unwrap();
        assert_eq!(loaded.topology.stations(), inserted.topology.stations());
        assert_eq!(loaded.topology.total_distance(), 7);

        stale.stale.lock().unwrap().push(SegmentId(2));
        let other = lines
            .create_line("M", "red", StationId(3), StationId(4), 2)
            .unwrap();
        assert_eq!(store.find_all_lines().unwrap().len(), 2);
        assert_eq!(
            store.find_line_by_id(other.id).unwrap().topology.stations(),
            [StationId(3), StationId(4)]
        );

        // Collisions on every attempt are reported.
        *stale.stale.lock().unwrap() = vec![SegmentId(1); 3];
        assert!(matches!(
            lines.insert_section(line.id, StationId(4), StationId(1), 1),
            Err(ServiceError::Store(StoreError::DuplicateSegment(SegmentId(1))))
        ));
        assert_eq!(
            store.find_line_by_id(line.id).unwrap().topology.stations(),
            [StationId(1), StationId(2), StationId(3)]
        );
    }

    #[test]
    fn test_mutation_errors_leave_line_unchanged() {
        let store = store_with_stations(&["A", "B", "C"]);
        let lines = LineService::new(&store, &store);
        let line = lines
            .create_line("L", "blue", StationId(1), StationId(2), 3)
            .unwrap();

        assert!(matches!(
            lines.insert_section(line.id, StationId(1), StationId(3), 3),
            Err(ServiceError::Topology(TopologyError::InvalidDistance))
        ));
        assert!(matches!(
            lines.insert_section(line.id, StationId(1), StationId(2), 1),
            Err(ServiceError::Topology(TopologyError::InvalidTopology(
                InvalidTopologyKind::BothRegistered
            )))
        ));
        assert!(matches!(
            lines.insert_section(line.id, StationId(1), StationId(42), 1),
            Err(ServiceError::Store(StoreError::StationNotFound(StationId(42))))
        ));
        assert!(matches!(
            lines.remove_section(line.id, StationId(1)),
            Err(ServiceError::Topology(
                TopologyError::MinimumSectionViolation
            ))
        ));

        let line = lines.find_line(line.id).unwrap();
        assert_eq!(line.topology.stations(), [StationId(1), StationId(2)]);
        assert_eq!(line.topology.total_distance(), 3);
    }

    #[test]
    fn test_update_and_delete_line() {
        let store = store_with_stations(&["A", "B"]);
        let lines = LineService::new(&store, &store);
        let line = lines
            .create_line("L", "blue", StationId(1), StationId(2), 3)
            .unwrap();
        let updated = lines.update_line(line.id, "M", "orange").unwrap();
        assert_eq!(updated.name, "M");
        assert_eq!(lines.find_line(line.id).unwrap().color, "orange");

        lines.delete_line(line.id).unwrap();
        assert!(lines.find_lines().unwrap().is_empty());

        let map = MapService::new(&store, &store);
        assert!(matches!(
            map.find_path(StationId(1), StationId(2)),
            Err(ServiceError::Path(PathError::StationNotFoundInGraph(
                StationId(1)
            )))
        ));
    }

    #[test]
    fn test_path_errors() {
        let store = store_with_stations(&["A", "B", "C", "D", "Z"]);
        let lines = LineService::new(&store, &store);
        lines
            .create_line("1", "red", StationId(1), StationId(2), 5)
            .unwrap();
        lines
            .create_line("2", "green", StationId(3), StationId(4), 5)
            .unwrap();
        let map = MapService::new(&store, &store);

        assert!(matches!(
            map.find_path(StationId(1), StationId(1)),
            Err(ServiceError::Path(PathError::SameStation))
        ));
        // Rejected before the registry is consulted.
        assert!(matches!(
            map.find_path(StationId(77), StationId(77)),
            Err(ServiceError::Path(PathError::SameStation))
        ));
        assert!(matches!(
            map.find_path(StationId(1), StationId(5)),
            Err(ServiceError::Path(PathError::StationNotFoundInGraph(
                StationId(5)
            )))
        ));
        assert!(matches!(
            map.find_path(StationId(1), StationId(4)),
            Err(ServiceError::Path(PathError::NoPathFound))
        ));
        assert!(matches!(
            map.find_path(StationId(1), StationId(99)),
            Err(ServiceError::Store(StoreError::StationNotFound(StationId(99))))
        ));
    }
}
