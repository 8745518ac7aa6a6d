use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

pub mod models;
use models::*;

/// Event journal: every state change, placement and audit record the engine
/// emits. Single connection behind a mutex.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the SQLite database at the given path
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database {}", path))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to apply schema")?;
        Ok(Database {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database mutex poisoned"))
    }

    /// Append one engine event to the matching table.
    pub fn record_event(&self, event: &EngineEvent) -> Result<()> {
        match event {
            EngineEvent::StateChanged(c) => self.insert_state_change(c),
            EngineEvent::Placed(p) => self.insert_placement(p),
            EngineEvent::Audit(a) => self.insert_audit(a),
        }
    }

    // ── State changes ─────────────────────────────────────────────────────────

    fn insert_state_change(&self, c: &StateChange) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO state_changes (match_id, old_state, new_state, reason, minute, score, at)
             VALUES (?1,?2,?3,?4,?5,?6,?7)",
            params![
                c.match_id,
                c.old_state.as_str(),
                c.new_state.as_str(),
                c.reason,
                c.minute,
                c.score.to_string(),
                c.at,
            ],
        )?;
        Ok(())
    }

    pub fn list_state_changes(&self, limit: i64) -> Result<Vec<StateChange>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT match_id, old_state, new_state, reason, minute, score, at
             FROM state_changes ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], map_state_change)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Full history of one match, oldest first.
    pub fn match_history(&self, match_id: &str) -> Result<Vec<StateChange>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT match_id, old_state, new_state, reason, minute, score, at
             FROM state_changes WHERE match_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![match_id], map_state_change)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ── Placements ────────────────────────────────────────────────────────────

    fn insert_placement(&self, p: &PlacedBet) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO placements (
                match_id, market_id, selection_id, price, size, liability, bet_id, placed_at
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            params![
                p.request.match_id,
                p.request.market_id,
                p.request.selection_id,
                p.request.price.to_string(),
                p.request.size.to_string(),
                p.request.liability.to_string(),
                p.bet_id,
                p.placed_at,
            ],
        )?;
        Ok(())
    }

    pub fn list_placements(&self, limit: i64) -> Result<Vec<PlacedBet>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT match_id, market_id, selection_id, price, size, liability, bet_id, placed_at
             FROM placements ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], map_placement)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ── Audit ─────────────────────────────────────────────────────────────────

    fn insert_audit(&self, a: &AuditRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO audit_records (match_id, minute, reason, inputs, at)
             VALUES (?1,?2,?3,?4,?5)",
            params![a.match_id, a.minute, a.reason, a.inputs.to_string(), a.at],
        )?;
        Ok(())
    }

    pub fn list_audit_records(&self, limit: i64) -> Result<Vec<AuditRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT match_id, minute, reason, inputs, at
             FROM audit_records ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], map_audit)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ── Stats ─────────────────────────────────────────────────────────────────

    pub fn get_stats(&self) -> Result<Stats> {
        let conn = self.conn()?;
        let count_state = |state: MatchState| -> i64 {
            conn.query_row(
                "SELECT COUNT(*) FROM state_changes WHERE new_state = ?1",
                params![state.as_str()],
                |r| r.get(0),
            )
            .unwrap_or(0)
        };
        let qualified = count_state(MatchState::Qualified);
        let disqualified = count_state(MatchState::Disqualified);
        let skipped = count_state(MatchState::Skipped);
        let expired = count_state(MatchState::Expired);
        let placements: i64 = conn
            .query_row("SELECT COUNT(*) FROM placements", [], |r| r.get(0))
            .unwrap_or(0);
        let mut stmt = conn.prepare("SELECT liability FROM placements")?;
        let liabilities = stmt
            .query_map([], |r| r.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let total_liability = liabilities
            .iter()
            .filter_map(|l| Decimal::from_str(l).ok())
            .sum();
        Ok(Stats {
            qualified,
            disqualified,
            skipped,
            expired,
            placements,
            total_liability,
        })
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn state_col(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<MatchState> {
    let raw: String = row.get(idx)?;
    MatchState::parse(&raw).ok_or_else(|| conversion_error(idx, format!("unknown state {}", raw)))
}

fn decimal_col(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Decimal> {
    let raw: String = row.get(idx)?;
    Decimal::from_str(&raw).map_err(|e| conversion_error(idx, e.to_string()))
}

fn map_state_change(row: &rusqlite::Row) -> rusqlite::Result<StateChange> {
    let score: String = row.get(5)?;
    Ok(StateChange {
        match_id: row.get(0)?,
        old_state: state_col(row, 1)?,
        new_state: state_col(row, 2)?,
        reason: row.get(3)?,
        minute: row.get(4)?,
        score: score.parse().map_err(|e: crate::error::ScoreParseError| {
            conversion_error(5, e.to_string())
        })?,
        at: row.get(6)?,
    })
}

fn map_placement(row: &rusqlite::Row) -> rusqlite::Result<PlacedBet> {
    Ok(PlacedBet {
        request: PlacementRequest {
            match_id: row.get(0)?,
            market_id: row.get(1)?,
            selection_id: row.get(2)?,
            price: decimal_col(row, 3)?,
            size: decimal_col(row, 4)?,
            liability: decimal_col(row, 5)?,
        },
        bet_id: row.get(6)?,
        placed_at: row.get(7)?,
    })
}

fn map_audit(row: &rusqlite::Row) -> rusqlite::Result<AuditRecord> {
    let inputs: String = row.get(3)?;
    Ok(AuditRecord {
        match_id: row.get(0)?,
        minute: row.get(1)?,
        reason: row.get(2)?,
        inputs: serde_json::from_str(&inputs).map_err(|e| conversion_error(3, e.to_string()))?,
        at: row.get(4)?,
    })
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS state_changes (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    match_id    TEXT    NOT NULL,
    old_state   TEXT    NOT NULL,
    new_state   TEXT    NOT NULL,
    reason      TEXT    NOT NULL,
    minute      INTEGER NOT NULL,
    score       TEXT    NOT NULL,
    at          TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS placements (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    match_id      TEXT    NOT NULL UNIQUE,
    market_id     TEXT    NOT NULL,
    selection_id  INTEGER NOT NULL,
    price         TEXT    NOT NULL,
    size          TEXT    NOT NULL,
    liability     TEXT    NOT NULL,
    bet_id        TEXT    NOT NULL,
    placed_at     TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_records (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    match_id    TEXT    NOT NULL,
    minute      INTEGER NOT NULL,
    reason      TEXT    NOT NULL,
    inputs      TEXT    NOT NULL,
    at          TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_state_changes_match ON state_changes(match_id);
CREATE INDEX IF NOT EXISTS idx_audit_match ON audit_records(match_id);
"#;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stats {
    pub qualified: i64,
    pub disqualified: i64,
    pub skipped: i64,
    pub expired: i64,
    pub placements: i64,
    pub total_liability: Decimal,
}
