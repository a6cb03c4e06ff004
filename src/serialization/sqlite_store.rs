use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};
use sqlite::{Connection, OpenFlags, State};

use crate::{
    col::{map_new, HashMap},
    line::{Line, Segment, TopologyChange},
    primitives::{Distance, LineId, SegmentId, Station, StationId},
    store::{assemble_line, LineStore, StationStore, StoreError},
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS station (
        id INTEGER PRIMARY KEY NOT NULL,
        name TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS line (
        id INTEGER PRIMARY KEY NOT NULL,
        name TEXT NOT NULL,
        color TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS segment (
        id INTEGER PRIMARY KEY NOT NULL,
        line_id INTEGER NOT NULL,
        up_station INTEGER NOT NULL,
        down_station INTEGER NOT NULL,
        distance INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS segment_line ON segment (line_id);";

/// A store backed by a single sqlite database file.
pub struct SqliteStore {
    connection: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(filename: &str) -> Result<Self, StoreError> {
        info!("Opening network database {}...", filename);
        let connection = Connection::open_with_flags(
            filename,
            OpenFlags::default().with_create().with_read_write(),
        )
        .map_err(StoreError::Sqlite)?;
        connection.execute(SCHEMA).map_err(StoreError::Sqlite)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:")
    }

    fn connection(&self) -> MutexGuard<'_, Connection> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn in_transaction(
        &self,
        write: impl FnOnce(&Connection) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let connection = self.connection();
        // Takes the write lock up front, so id checks and writes of one
        // transaction cannot interleave with another connection's.
        connection
            .execute("BEGIN IMMEDIATE TRANSACTION;")
            .map_err(StoreError::Sqlite)?;
        match write(&*connection) {
            Ok(()) => connection
                .execute("END TRANSACTION;")
                .map_err(StoreError::Sqlite),
            Err(err) => {
                warn!("Rolling back transaction: {}", err);
                if let Err(rollback_err) = connection.execute("ROLLBACK;") {
                    warn!("Rollback failed: {}", rollback_err);
                }
                Err(err)
            }
        }
    }
}

fn read_station(connection: &Connection, id: StationId) -> Result<Station, StoreError> {
    let mut stmt = connection
        .prepare("SELECT id, name FROM station WHERE id = ?;")
        .map_err(StoreError::Sqlite)?;
    stmt.bind((1, id.0 as i64)).map_err(StoreError::Sqlite)?;
    let station = stmt
        .iter()
        .next()
        .ok_or(StoreError::StationNotFound(id))?
        .map_err(StoreError::Sqlite)
        .map(|it| Station::new(id, it.read::<&str, _>(1)))?;
    Ok(station)
}

fn read_segments(
    connection: &Connection,
    line_id: Option<LineId>,
) -> Result<Vec<Segment>, StoreError> {
    let mut stmt = match line_id {
        None => connection.prepare(
            "SELECT id, line_id, up_station, down_station, distance FROM segment ORDER BY id ASC;",
        ),
        Some(line_id) => connection
            .prepare(
                "SELECT id, line_id, up_station, down_station, distance FROM segment \
                WHERE line_id = ? ORDER BY id ASC;",
            )
            .and_then(|mut stmt| {
                stmt.bind((1, line_id.0 as i64))?;
                Ok(stmt)
            }),
    }
    .map_err(StoreError::Sqlite)?;

    stmt.iter()
        .map(|it| -> Result<Segment, StoreError> {
            let it = it.map_err(StoreError::Sqlite)?;
            Ok(Segment {
                id: SegmentId(it.read::<i64, _>(0) as u32),
                line_id: LineId(it.read::<i64, _>(1) as u32),
                up: StationId(it.read::<i64, _>(2) as u32),
                down: StationId(it.read::<i64, _>(3) as u32),
                distance: it.read::<i64, _>(4) as Distance,
            })
        })
        .collect()
}

fn exists(connection: &Connection, table: &str, id: u32) -> Result<bool, StoreError> {
    let query = format!("SELECT 1 FROM {} WHERE id = ?;", table);
    let mut stmt = connection.prepare(query).map_err(StoreError::Sqlite)?;
    stmt.bind((1, id as i64)).map_err(StoreError::Sqlite)?;
    let state = stmt.next().map_err(StoreError::Sqlite)?;
    Ok(matches!(state, State::Row))
}

fn bind_segment(stmt: &mut sqlite::Statement<'_>, segment: &Segment) -> Result<(), StoreError> {
    stmt.bind((1, segment.line_id.0 as i64))
        .map_err(StoreError::Sqlite)?;
    stmt.bind((2, segment.up.0 as i64))
        .map_err(StoreError::Sqlite)?;
    stmt.bind((3, segment.down.0 as i64))
        .map_err(StoreError::Sqlite)?;
    stmt.bind((4, segment.distance as i64))
        .map_err(StoreError::Sqlite)?;
    stmt.bind((5, segment.id.0 as i64))
        .map_err(StoreError::Sqlite)?;
    Ok(())
}

/// Plain `INSERT`: a taken id fails instead of replacing another line's segment.
fn insert_segment(connection: &Connection, segment: &Segment) -> Result<(), StoreError> {
    if exists(connection, "segment", segment.id.0)? {
        return Err(StoreError::DuplicateSegment(segment.id));
    }
    let mut stmt = connection
        .prepare(
            "INSERT INTO segment (line_id, up_station, down_station, distance, id) \
            VALUES (?, ?, ?, ?, ?);",
        )
        .map_err(StoreError::Sqlite)?;
    bind_segment(&mut stmt, segment)?;
    stmt.next().map_err(StoreError::Sqlite)?;
    Ok(())
}

fn update_segment(connection: &Connection, segment: &Segment) -> Result<(), StoreError> {
    let mut stmt = connection
        .prepare(
            "UPDATE segment SET line_id = ?, up_station = ?, down_station = ?, distance = ? \
            WHERE id = ?;",
        )
        .map_err(StoreError::Sqlite)?;
    bind_segment(&mut stmt, segment)?;
    stmt.next().map_err(StoreError::Sqlite)?;
    Ok(())
}

fn write_change(connection: &Connection, change: &TopologyChange) -> Result<(), StoreError> {
    for segment in &change.created {
        insert_segment(connection, segment)?;
    }
    for segment in &change.saved {
        update_segment(connection, segment)?;
    }
    for &segment_id in &change.deleted {
        remove_segment(connection, segment_id)?;
    }
    Ok(())
}

fn remove_segment(connection: &Connection, id: SegmentId) -> Result<(), StoreError> {
    let mut stmt = connection
        .prepare("DELETE FROM segment WHERE id = ?;")
        .map_err(StoreError::Sqlite)?;
    stmt.bind((1, id.0 as i64)).map_err(StoreError::Sqlite)?;
    stmt.next().map_err(StoreError::Sqlite)?;
    Ok(())
}

fn next_id(connection: &Connection, table: &str) -> Result<u32, StoreError> {
    let query = format!("SELECT COALESCE(MAX(id), 0) + 1 FROM {};", table);
    let mut stmt = connection.prepare(query).map_err(StoreError::Sqlite)?;
    stmt.next().map_err(StoreError::Sqlite)?;
    let id = stmt.read::<i64, _>(0).map_err(StoreError::Sqlite)?;
    Ok(id as u32)
}

impl StationStore for SqliteStore {
    fn find_station_by_id(&self, id: StationId) -> Result<Station, StoreError> {
        read_station(&self.connection(), id)
    }

    fn find_all_by_id(&self, ids: &[StationId]) -> Result<HashMap<StationId, Station>, StoreError> {
        let connection = self.connection();
        let mut result = map_new();
        for &id in ids {
            if !result.contains_key(&id) {
                result.insert(id, read_station(&connection, id)?);
            }
        }
        Ok(result)
    }

    fn save_station(&self, station: &Station) -> Result<(), StoreError> {
        let connection = self.connection();
        let mut stmt = connection
            .prepare("INSERT OR REPLACE INTO station (id, name) VALUES (?, ?);")
            .map_err(StoreError::Sqlite)?;
        stmt.bind((1, station.id.0 as i64))
            .map_err(StoreError::Sqlite)?;
        stmt.bind((2, station.name.as_str()))
            .map_err(StoreError::Sqlite)?;
        stmt.next().map_err(StoreError::Sqlite)?;
        Ok(())
    }
}

impl LineStore for SqliteStore {
    fn find_all_lines(&self) -> Result<Vec<Line>, StoreError> {
        let connection = self.connection();
        let mut segments_by_line: HashMap<LineId, Vec<Segment>> = map_new();
        for segment in read_segments(&connection, None)? {
            segments_by_line
                .entry(segment.line_id)
                .or_default()
                .push(segment);
        }

        let lines = connection
            .prepare("SELECT id, name, color FROM line ORDER BY id ASC;")
            .map_err(StoreError::Sqlite)?
            .iter()
            .map(|it| -> Result<Line, StoreError> {
                let it = it.map_err(StoreError::Sqlite)?;
                let id = LineId(it.read::<i64, _>(0) as u32);
                assemble_line(
                    id,
                    it.read::<&str, _>(1).to_owned(),
                    it.read::<&str, _>(2).to_owned(),
                    segments_by_line.remove(&id).unwrap_or_default(),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        debug!("Loaded {} lines", lines.len());
        Ok(lines)
    }

    fn find_line_by_id(&self, id: LineId) -> Result<Line, StoreError> {
        let connection = self.connection();
        let mut stmt = connection
            .prepare("SELECT name, color FROM line WHERE id = ?;")
            .map_err(StoreError::Sqlite)?;
        stmt.bind((1, id.0 as i64)).map_err(StoreError::Sqlite)?;
        let (name, color) = stmt
            .iter()
            .next()
            .ok_or(StoreError::LineNotFound(id))?
            .map_err(StoreError::Sqlite)
            .map(|it| {
                (
                    it.read::<&str, _>(0).to_owned(),
                    it.read::<&str, _>(1).to_owned(),
                )
            })?;
        assemble_line(id, name, color, read_segments(&connection, Some(id))?)
    }

    fn save_line(&self, line: &Line) -> Result<(), StoreError> {
        let connection = self.connection();
        let mut stmt = connection
            .prepare("INSERT OR REPLACE INTO line (id, name, color) VALUES (?, ?, ?);")
            .map_err(StoreError::Sqlite)?;
        stmt.bind((1, line.id.0 as i64))
            .map_err(StoreError::Sqlite)?;
        stmt.bind((2, line.name.as_str()))
            .map_err(StoreError::Sqlite)?;
        stmt.bind((3, line.color.as_str()))
            .map_err(StoreError::Sqlite)?;
        stmt.next().map_err(StoreError::Sqlite)?;
        Ok(())
    }

    fn create_line(&self, line: &Line, change: &TopologyChange) -> Result<(), StoreError> {
        self.in_transaction(|connection| {
            if exists(connection, "line", line.id.0)? {
                return Err(StoreError::DuplicateLine(line.id));
            }
            let mut stmt = connection
                .prepare("INSERT INTO line (id, name, color) VALUES (?, ?, ?);")
                .map_err(StoreError::Sqlite)?;
            stmt.bind((1, line.id.0 as i64))
                .map_err(StoreError::Sqlite)?;
            stmt.bind((2, line.name.as_str()))
                .map_err(StoreError::Sqlite)?;
            stmt.bind((3, line.color.as_str()))
                .map_err(StoreError::Sqlite)?;
            stmt.next().map_err(StoreError::Sqlite)?;
            write_change(connection, change)
        })
    }

    fn delete_line(&self, id: LineId) -> Result<(), StoreError> {
        self.find_line_by_id(id)?;
        self.in_transaction(|connection| {
            for query in [
                "DELETE FROM segment WHERE line_id = ?;",
                "DELETE FROM line WHERE id = ?;",
            ] {
                let mut stmt = connection.prepare(query).map_err(StoreError::Sqlite)?;
                stmt.bind((1, id.0 as i64)).map_err(StoreError::Sqlite)?;
                stmt.next().map_err(StoreError::Sqlite)?;
            }
            Ok(())
        })
    }

    fn create_segment(&self, segment: &Segment) -> Result<(), StoreError> {
        insert_segment(&self.connection(), segment)
    }

    fn save_segment(&self, segment: &Segment) -> Result<(), StoreError> {
        update_segment(&self.connection(), segment)
    }

    fn delete_segment(&self, id: SegmentId) -> Result<(), StoreError> {
        remove_segment(&self.connection(), id)
    }

    fn next_line_id(&self) -> Result<LineId, StoreError> {
        next_id(&self.connection(), "line").map(LineId)
    }

    fn next_segment_id(&self) -> Result<SegmentId, StoreError> {
        next_id(&self.connection(), "segment").map(SegmentId)
    }

    fn apply_change(&self, change: &TopologyChange) -> Result<(), StoreError> {
        self.in_transaction(|connection| write_change(connection, change))
    }
}
