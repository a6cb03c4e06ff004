use crate::{
    primitives::{Station, StationId},
    service::{LineService, ServiceError},
    store::{MemoryStore, StationStore},
};

/// A small network of three lines:
///
/// ```text
/// Line 1:  1 --5-- 2 --4-- 3 --6-- 4
/// Line 2:          2 --2-- 5 --2-- 6
/// Line 3:  1 --3-- 7 --3-- 6
/// ```
///
/// Station 8 is registered but served by no line.
pub fn create_sample() -> Result<MemoryStore, ServiceError> {
    let store = MemoryStore::new();
    for (id, name) in [
        (1, "Gangnam"),
        (2, "Yeoksam"),
        (3, "Seolleung"),
        (4, "Samseong"),
        (5, "Hanti"),
        (6, "Dogok"),
        (7, "Yangjae"),
        (8, "Jamsil"),
    ] {
        store.save_station(&Station::new(StationId(id), name))?;
    }

    let lines = LineService::new(&store, &store);
    let line = lines.create_line("Line 1", "green", StationId(1), StationId(2), 5)?;
    lines.insert_section(line.id, StationId(2), StationId(3), 4)?;
    lines.insert_section(line.id, StationId(3), StationId(4), 6)?;

    let line = lines.create_line("Line 2", "yellow", StationId(5), StationId(6), 2)?;
    lines.insert_section(line.id, StationId(2), StationId(5), 2)?;

    let line = lines.create_line("Line 3", "orange", StationId(1), StationId(6), 6)?;
    lines.insert_section(line.id, StationId(1), StationId(7), 3)?;

    Ok(store)
}

#[cfg(test)]
mod tests {
    use crate::{
        primitives::{Station, StationId},
        service::{LineService, MapService, PathFinder, ServiceError},
        shortest_path::dijkstra::PathError,
        store::{LineStore, MemoryStore, StationStore},
    };

    fn ids(path: &crate::path::PathResult) -> Vec<u32> {
        path.stations.iter().map(|it| it.id.0).collect()
    }

    #[test]
    fn test_sample_topology() {
        let store = super::create_sample().unwrap();
        let lines = store.find_all_lines().unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[2].topology.stations(),
            [StationId(1), StationId(7), StationId(6)]
        );
        assert_eq!(lines[2].topology.total_distance(), 6);
        assert!(lines.iter().all(|it| it.topology.is_chain()));
    }

    #[test]
    fn test_sample_paths() {
        let store = super::create_sample().unwrap();
        let map = MapService::new(&store, &store);

        let path = map.find_path(StationId(1), StationId(6)).unwrap();
        assert_eq!(path.total_distance, 6);
        assert_eq!(ids(&path), [1, 7, 6]);

        let path = map.find_path(StationId(4), StationId(5)).unwrap();
        assert_eq!(ids(&path), [4, 3, 2, 5]);
        assert_eq!(path.total_distance, 12);
        assert_eq!(path.stations[0].name, "Samseong");

        assert!(matches!(
            map.find_path(StationId(1), StationId(8)),
            Err(ServiceError::Path(PathError::StationNotFoundInGraph(
                StationId(8)
            )))
        ));
    }

    #[test]
    fn test_paths_are_deterministic_and_symmetric() {
        let store = super::create_sample().unwrap();
        let map = MapService::new(&store, &store);
        for source in 1..=7 {
            for target in 1..=7 {
                if source == target {
                    assert!(matches!(
                        map.find_path(StationId(source), StationId(target)),
                        Err(ServiceError::Path(PathError::SameStation))
                    ));
                    continue;
                }
                let first = map.find_path(StationId(source), StationId(target)).unwrap();
                let second = map.find_path(StationId(source), StationId(target)).unwrap();
                assert_eq!(first, second);

                let back = map.find_path(StationId(target), StationId(source)).unwrap();
                assert_eq!(first.total_distance, back.total_distance);
                assert_eq!(first.stations.first().unwrap().id, StationId(source));
                assert_eq!(first.stations.last().unwrap().id, StationId(target));
            }
        }
    }

    #[test]
    fn test_paths_follow_topology_changes() {
        let store = super::create_sample().unwrap();
        let lines = LineService::new(&store, &store);
        let map = MapService::new(&store, &store);
        assert_eq!(
            map.find_path(StationId(2), StationId(6))
                .unwrap()
                .total_distance,
            4
        );

        // Dropping 5 from line 2 merges 2 - 5 - 6 into a single segment of 4.
        lines.remove_section(crate::primitives::LineId(2), StationId(5)).unwrap();
        let path = map.find_path(StationId(2), StationId(6)).unwrap();
        assert_eq!(ids(&path), [2, 6]);
        assert_eq!(path.total_distance, 4);
        assert!(map.find_path(StationId(2), StationId(5)).is_err());
    }

    #[test]
    fn test_shared_station_scenario() {
        // A=1 B=2 C=3
        let store = MemoryStore::new();
        for (id, name) in [(1, "A"), (2, "B"), (3, "C")] {
            store.save_station(&Station::new(StationId(id), name)).unwrap();
        }
        let lines = LineService::new(&store, &store);
        lines
            .create_line("1", "red", StationId(1), StationId(2), 5)
            .unwrap();
        lines
            .create_line("2", "blue", StationId(2), StationId(3), 2)
            .unwrap();

        let map = MapService::new(&store, &store);
        let path = map.find_path(StationId(1), StationId(3)).unwrap();
        assert_eq!(ids(&path), [1, 2, 3]);
        assert_eq!(path.total_distance, 7);
    }
}
