//! Local journal of violation decisions. It is an audit trail only; the
//! suppression tracker starts empty on every run.

use log::error;
use rusqlite::{params, Connection, Result, NO_PARAMS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Reported,
    Suppressed,
    Failed,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Reported => "reported",
            Outcome::Suppressed => "suppressed",
            Outcome::Failed => "failed",
        }
    }
}

pub fn open(path: &str) -> Result<Connection> {
    let conn = Connection::open(path)?;
    init(&conn)?;
    Ok(conn)
}

fn init(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS detection (vehicle_id TEXT NOT NULL, kind TEXT NOT NULL, seen_at REAL NOT NULL, outcome TEXT NOT NULL)",
        NO_PARAMS,
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS incident (id TEXT NOT NULL PRIMARY KEY, backend_id INTEGER, vehicle_id TEXT NOT NULL, reported_at REAL NOT NULL, address TEXT NOT NULL, district TEXT NOT NULL, photo TEXT) WITHOUT ROWID",
        NO_PARAMS,
    )?;
    Ok(())
}

/// Journals a decision. Failures are logged, never propagated.
pub fn record_detection(conn: &Connection, vehicle_id: &str, kind: &str, seen_at: f64, outcome: Outcome) {
    if let Err(e) = conn.execute(
        "INSERT INTO detection(vehicle_id, kind, seen_at, outcome) VALUES (?1, ?2, ?3, ?4)",
        params![vehicle_id, kind, seen_at, outcome.as_str()],
    ) {
        error!("Unable to journal detection of '{}': {:?}", vehicle_id, e);
    }
}

pub struct IncidentRow<'a> {
    pub id: &'a str,
    pub backend_id: Option<u64>,
    pub vehicle_id: &'a str,
    pub reported_at: f64,
    pub address: &'a str,
    pub district: &'a str,
    pub photo: Option<&'a str>,
}

pub fn record_incident(conn: &Connection, row: &IncidentRow) {
    if let Err(e) = conn.execute(
        "INSERT OR REPLACE INTO incident(id, backend_id, vehicle_id, reported_at, address, district, photo) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            row.id,
            row.backend_id.map(|id| id as i64),
            row.vehicle_id,
            row.reported_at,
            row.address,
            row.district,
            row.photo
        ],
    ) {
        error!("Unable to journal incident {}: {:?}", row.id, e);
    }
}

#[cfg(test)]
pub fn count_outcome(conn: &Connection, outcome: Outcome) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM detection WHERE outcome = ?1",
        params![outcome.as_str()],
        |row| row.get(0),
    )
}

pub fn count_incidents(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM incident", NO_PARAMS, |row| row.get(0))
}

#[cfg(test)]
pub fn open_in_memory() -> Connection {
    let conn = Connection::open_in_memory().expect("in-memory db");
    init(&conn).expect("create tables");
    conn
}
