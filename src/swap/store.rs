//! Persistence of swap records.
//!
//! Records are stored as a JSON payload alongside the columns the engine
//! queries on: state, addresses and the escrow timeout. Terminal swaps are
//! retired in place, never deleted.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension as _, params};

use super::{SwapRecord, SwapState};
use crate::error::{Result, SwapError};

/// Keyed store of swap records.
pub trait SwapStore: Send {
    fn insert(&mut self, record: &SwapRecord) -> Result<()>;

    /// Rewrites an existing record. The caller is the single writer for this
    /// swap id.
    fn update(&mut self, record: &SwapRecord) -> Result<()>;

    fn get(&self, swap_id: &str) -> Result<Option<SwapRecord>>;

    fn list(&self) -> Result<Vec<SwapRecord>>;

    /// Swaps the given destination address could still claim manually.
    fn claimable_by(&self, address: &str) -> Result<Vec<SwapRecord>>;

    /// Swaps the given committer address could refund, given the current
    /// unix time in seconds.
    fn refundable_by(&self, address: &str, now_secs: u64) -> Result<Vec<SwapRecord>>;
}

#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    path: PathBuf,
}

impl SqliteStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            std::fs::create_dir_all(dir)
                .map_err(|e| SwapError::InvalidState(format!("create store dir: {e}")))?;
        }

        let conn = Connection::open(&path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;
        migrate(&conn)?;

        Ok(Self { conn, path })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrate(&conn)?;
        Ok(Self {
            conn,
            path: PathBuf::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn rows_to_records(
        &self,
        sql: &str,
        bind: impl rusqlite::Params,
    ) -> Result<Vec<SwapRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(bind, |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(decode_record(&row?)?);
        }
        Ok(out)
    }
}

fn encode_record(record: &SwapRecord) -> Result<String> {
    serde_json::to_string(record)
        .map_err(|e| SwapError::InvalidState(format!("encode swap record: {e}")))
}

fn decode_record(json: &str) -> Result<SwapRecord> {
    serde_json::from_str(json)
        .map_err(|e| SwapError::InvalidState(format!("decode swap record: {e}")))
}

fn state_to_str(state: SwapState) -> &'static str {
    match state {
        SwapState::Created => "created",
        SwapState::Committed => "committed",
        SwapState::Funded => "funded",
        SwapState::SrcConfirmed => "src_confirmed",
        SwapState::PaymentSent => "payment_sent",
        SwapState::Paid => "paid",
        SwapState::ManualClaimPending => "manual_claim_pending",
        SwapState::Claimed => "claimed",
        SwapState::Refunded => "refunded",
        SwapState::Expired => "expired",
        SwapState::Failed => "failed",
    }
}

impl SwapStore for SqliteStore {
    fn insert(&mut self, record: &SwapRecord) -> Result<()> {
        self.conn.execute(
            r#"
INSERT INTO swaps (swap_id, state, src_address, dst_address, escrow_timeout, record)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
"#,
            params![
                &record.swap_id,
                state_to_str(record.state),
                record.src_address.as_deref(),
                &record.dst_address,
                record.escrow.as_ref().map(|e| e.timeout as i64),
                encode_record(record)?,
            ],
        )?;
        Ok(())
    }

    fn update(&mut self, record: &SwapRecord) -> Result<()> {
        let rows = self.conn.execute(
            "UPDATE swaps SET state = ?2, record = ?3 WHERE swap_id = ?1",
            params![
                &record.swap_id,
                state_to_str(record.state),
                encode_record(record)?,
            ],
        )?;
        if rows != 1 {
            return Err(SwapError::NotFound(record.swap_id.clone()));
        }
        Ok(())
    }

    fn get(&self, swap_id: &str) -> Result<Option<SwapRecord>> {
        let json: Option<String> = self
            .conn
            .query_row(
                "SELECT record FROM swaps WHERE swap_id = ?1",
                params![swap_id],
                |row| row.get(0),
            )
            .optional()?;
        json.as_deref().map(decode_record).transpose()
    }

    fn list(&self) -> Result<Vec<SwapRecord>> {
        self.rows_to_records("SELECT record FROM swaps ORDER BY swap_id", [])
    }

    fn claimable_by(&self, address: &str) -> Result<Vec<SwapRecord>> {
        self.rows_to_records(
            r#"
SELECT record FROM swaps
WHERE dst_address = ?1
  AND state IN ('src_confirmed', 'paid', 'manual_claim_pending')
ORDER BY swap_id
"#,
            params![address],
        )
    }

    fn refundable_by(&self, address: &str, now_secs: u64) -> Result<Vec<SwapRecord>> {
        self.rows_to_records(
            r#"
SELECT record FROM swaps
WHERE src_address = ?1
  AND state IN ('committed', 'payment_sent')
  AND escrow_timeout IS NOT NULL
  AND escrow_timeout <= ?2
ORDER BY swap_id
"#,
            params![address, now_secs as i64],
        )
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS swaps (
  swap_id TEXT PRIMARY KEY,
  state TEXT NOT NULL,
  src_address TEXT,
  dst_address TEXT NOT NULL,
  escrow_timeout INTEGER,
  record TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS swaps_state_idx ON swaps(state);
CREATE INDEX IF NOT EXISTS swaps_dst_idx ON swaps(dst_address);
CREATE INDEX IF NOT EXISTS swaps_src_idx ON swaps(src_address);
"#,
    )?;
    Ok(())
}
