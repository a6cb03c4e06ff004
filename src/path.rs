use serde::Serialize;

use crate::primitives::{Station, StationId, TotalDistance};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StationSummary {
    pub id: StationId,
    pub name: String,
}

/// The answer to a path query: the stations from source to target, in
/// travel order, and the summed distance of the traversed segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathResult {
    pub stations: Vec<StationSummary>,
    pub total_distance: TotalDistance,
}

pub fn assemble(stations: Vec<Station>, total_distance: TotalDistance) -> PathResult {
    PathResult {
        stations: stations
            .into_iter()
            .map(|it| StationSummary {
                id: it.id,
                name: it.name,
            })
            .collect(),
        total_distance,
    }
}

/// Writes one `station_id; name` row per station, in path order.
pub fn write_csv(path: &PathResult, out: impl std::io::Write) -> Result<(), csv::Error> {
    let mut writer = csv::WriterBuilder::new().delimiter(b';').from_writer(out);
    for station in &path.stations {
        writer.serialize(station)?;
    }
    writer.flush()?;
    Ok(())
}
