use std::fmt::Display;

use log::info;
use serde::Deserialize;

use crate::{
    col::{map_new, HashMap},
    primitives::{Distance, LineId, Station, StationId},
    service::{LineService, ServiceError},
    store::{LineStore, StationStore, StoreError},
};

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct StationRecord {
    #[serde(rename = "# station_id")]
    pub station_id: StationId,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LineRecord {
    #[serde(rename = "# line_id")]
    pub line_id: u32,
    pub name: String,
    pub color: String,
    pub up_station: StationId,
    pub down_station: StationId,
    pub distance: Distance,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SectionRecord {
    #[serde(rename = "# line_id")]
    pub line_id: u32,
    pub up_station: StationId,
    pub down_station: StationId,
    pub distance: Distance,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct OdRecord {
    #[serde(rename = "# source")]
    pub source: StationId,
    pub target: StationId,
}

fn reader() -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder.trim(csv::Trim::All).delimiter(b';');

    builder
}

pub fn parse_stations(stream: impl std::io::Read) -> Result<Box<[StationRecord]>, csv::Error> {
    reader().from_reader(stream).deserialize().collect()
}
pub fn parse_lines(stream: impl std::io::Read) -> Result<Box<[LineRecord]>, csv::Error> {
    reader().from_reader(stream).deserialize().collect()
}
pub fn parse_sections(stream: impl std::io::Read) -> Result<Box<[SectionRecord]>, csv::Error> {
    reader().from_reader(stream).deserialize().collect()
}
pub fn parse_od_pairs(stream: impl std::io::Read) -> Result<Box<[OdRecord]>, csv::Error> {
    reader().from_reader(stream).deserialize().collect()
}

#[derive(Debug)]
pub enum ImportError {
    Csv(csv::Error),
    Store(StoreError),
    DuplicateLine(u32),
    UnknownLine(u32),
    /// A line or section row was rejected by the line service.
    Rejected { row: usize, error: ServiceError },
}

impl Display for ImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportError::Csv(err) => write!(f, "could not parse csv: {}", err),
            ImportError::Store(err) => Display::fmt(err, f),
            ImportError::DuplicateLine(id) => write!(f, "line {} is defined twice", id),
            ImportError::UnknownLine(id) => write!(f, "section refers to unknown line {}", id),
            ImportError::Rejected { row, error } => write!(f, "row {}: {}", row + 1, error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportStats {
    pub num_stations: usize,
    pub num_lines: usize,
    pub num_sections: usize,
}

/// Loads a network into the given stores. Lines are created from their first
/// segment, the remaining sections are inserted in file order, so every row
/// is subject to the same validation as an interactive mutation.
pub fn import_network<T: LineStore + StationStore>(
    stations: impl std::io::Read,
    lines: impl std::io::Read,
    sections: impl std::io::Read,
    store: &T,
) -> Result<ImportStats, ImportError> {
    let stations = parse_stations(stations).map_err(ImportError::Csv)?;
    let lines = parse_lines(lines).map_err(ImportError::Csv)?;
    let sections = parse_sections(sections).map_err(ImportError::Csv)?;

    for record in stations.iter() {
        store
            .save_station(&Station::new(record.station_id, record.name.as_str()))
            .map_err(ImportError::Store)?;
    }
    info!("Imported {} stations", stations.len());

    let service = LineService::new(store, store);
    let mut line_ids: HashMap<u32, LineId> = map_new();
    for (row, record) in lines.iter().enumerate() {
        if line_ids.contains_key(&record.line_id) {
            return Err(ImportError::DuplicateLine(record.line_id));
        }
        let line = service
            .create_line(
                &record.name,
                &record.color,
                record.up_station,
                record.down_station,
                record.distance,
            )
            .map_err(|error| ImportError::Rejected { row, error })?;
        line_ids.insert(record.line_id, line.id);
    }

    for (row, record) in sections.iter().enumerate() {
        let line_id = *line_ids
            .get(&record.line_id)
            .ok_or(ImportError::UnknownLine(record.line_id))?;
        service
            .insert_section(
                line_id,
                record.up_station,
                record.down_station,
                record.distance,
            )
            .map_err(|error| ImportError::Rejected { row, error })?;
    }
    info!(
        "Imported {} lines with {} additional sections",
        lines.len(),
        sections.len()
    );

    Ok(ImportStats {
        num_stations: stations.len(),
        num_lines: lines.len(),
        num_sections: sections.len(),
    })
}

#[cfg(test)]
mod tests {
    use crate::{
        line::TopologyError,
        primitives::StationId,
        service::ServiceError,
        store::{LineStore, MemoryStore},
    };

    use super::{
        import_network, parse_od_pairs, parse_sections, parse_stations, ImportError, OdRecord,
        SectionRecord, StationRecord,
    };

    const STATIONS: &str = r#"# station_id; name
1; Gangnam
2; Yangjae
3; Gyodae
4; Nambu Bus Terminal"#;

    const LINES: &str = r#"# line_id; name; color; up_station; down_station; distance
10; Line 2; green; 3; 1; 6
20; Shinbundang; red; 1; 2; 8"#;

    #[test]
    fn test_parse_stations() {
        let stations = parse_stations(STATIONS.as_bytes()).unwrap();
        assert_eq!(stations.len(), 4);
        assert_eq!(
            stations[3],
            StationRecord {
                station_id: StationId(4),
                name: "Nambu Bus Terminal".into()
            }
        );
    }

    #[test]
    fn test_parse_sections_and_od_pairs() {
        let content = r#"# line_id; up_station; down_station; distance
        20; 2; 4; 3"#;
        let sections = parse_sections(content.as_bytes()).unwrap();
        assert_eq!(
            *sections,
            [SectionRecord {
                line_id: 20,
                up_station: StationId(2),
                down_station: StationId(4),
                distance: 3
            }]
        );

        let content = r#"# source; target
3; 4
4; 3"#;
        let od_pairs = parse_od_pairs(content.as_bytes()).unwrap();
        assert_eq!(
            *od_pairs,
            [
                OdRecord {
                    source: StationId(3),
                    target: StationId(4)
                },
                OdRecord {
                    source: StationId(4),
                    target: StationId(3)
                }
            ]
        );
    }

    #[test]
    fn test_import_network() {
        let sections = r#"# line_id; up_station; down_station; distance
20; 2; 4; 3"#;
        let store = MemoryStore::new();
        let stats = import_network(
            STATIONS.as_bytes(),
            LINES.as_bytes(),
            sections.as_bytes(),
            &store,
        )
        .unwrap();
        assert_eq!(stats.num_stations, 4);
        assert_eq!(stats.num_lines, 2);
        assert_eq!(stats.num_sections, 1);

        let lines = store.find_all_lines().unwrap();
        assert_eq!(lines[1].name, "Shinbundang");
        assert_eq!(
            lines[1].topology.stations(),
            [StationId(1), StationId(2), StationId(4)]
        );

        let store = MemoryStore::new();
        let result = import_network(
            STATIONS.as_bytes(),
            LINES.as_bytes(),
            r#"# line_id; up_station; down_station; distance
20; 1; 4; 8"#
                .as_bytes(),
            &store,
        );
        assert!(matches!(
            result,
            Err(ImportError::Rejected {
                row: 0,
                error: ServiceError::Topology(TopologyError::InvalidDistance)
            })
        ));
    }
}
