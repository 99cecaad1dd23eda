//! Durable store for `QuoteRecord` and `SwapTransactionRecord`.
//!
//! SQLite via `rusqlite`, WAL mode, prepared statements — same shape as the
//! teacher's `AtlasDb` (`crates/core/src/db.rs`), scoped to the two record
//! types the route engine and swap executor persist. Amounts and decimals
//! are stored as TEXT and parsed back on read, matching the teacher's
//! `Decimal`-as-TEXT convention.

use rusqlite::{params, Connection, OptionalExtension};

use routex_common::error::{RouterError, RouterResult};
use routex_common::types::{QuoteRecord, SwapStatus, SwapTransactionRecord};

/// Durable store handle. Not `Clone`; callers share it behind an `Arc` +
/// `tokio::sync::Mutex` (`rusqlite::Connection` is `!Sync`).
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (or create) the database at `path`. Enables WAL mode.
    pub fn open(path: &str) -> RouterResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| RouterError::DatabaseError(format!("open {path}: {e}")))?;
        let store = Self { conn };
        store.init_tables()?;
        Ok(store)
    }

    /// In-memory database, for tests.
    pub fn open_in_memory() -> RouterResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| RouterError::DatabaseError(e.to_string()))?;
        let store = Self { conn };
        store.init_tables()?;
        Ok(store)
    }

    fn init_tables(&self) -> RouterResult<()> {
        self.conn
            .pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| RouterError::DatabaseError(e.to_string()))?;
        self.conn
            .pragma_update(None, "synchronous", "NORMAL")
            .map_err(|e| RouterError::DatabaseError(e.to_string()))?;

        self.conn
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS quote_records (
                id                 TEXT PRIMARY KEY,
                provider           TEXT NOT NULL,
                input_mint         TEXT NOT NULL,
                output_mint        TEXT NOT NULL,
                in_amount          TEXT NOT NULL,
                out_amount         TEXT NOT NULL,
                price_impact_pct   TEXT NOT NULL,
                slippage_bps       INTEGER NOT NULL,
                route_plan_json    TEXT NOT NULL,
                platform_fee_amount TEXT,
                gas_estimate       INTEGER,
                response_time_ms   INTEGER NOT NULL,
                is_cached          INTEGER NOT NULL,
                created_at_ms      INTEGER NOT NULL,
                expires_at_ms      INTEGER NOT NULL,
                efficiency_score   REAL,
                reliability_score  REAL
            );
            CREATE INDEX IF NOT EXISTS idx_quote_records_expires ON quote_records(expires_at_ms);

            CREATE TABLE IF NOT EXISTS swap_transactions (
                id                TEXT PRIMARY KEY,
                user_id           TEXT NOT NULL,
                input_mint        TEXT NOT NULL,
                output_mint       TEXT NOT NULL,
                in_amount         TEXT NOT NULL,
                out_amount        TEXT NOT NULL,
                min_out_amount    TEXT NOT NULL,
                slippage_bps      INTEGER NOT NULL,
                provider          TEXT NOT NULL,
                status            TEXT NOT NULL,
                tx_hash           TEXT,
                route_data_json   TEXT NOT NULL,
                fee               TEXT,
                gas_estimate      INTEGER,
                execution_time_ms INTEGER,
                error_code        TEXT,
                error_message     TEXT,
                created_at_ms     INTEGER NOT NULL,
                updated_at_ms     INTEGER NOT NULL,
                expires_at_ms     INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_swap_tx_user ON swap_transactions(user_id);
            CREATE INDEX IF NOT EXISTS idx_swap_tx_status ON swap_transactions(status);
            ",
            )
            .map_err(|e| RouterError::DatabaseError(format!("init tables: {e}")))?;

        Ok(())
    }

    /// Persist a quote record. Best-effort from the caller's perspective
    /// (route engine logs+swallows failure here); immutable after write.
    pub fn insert_quote_record(&self, record: &QuoteRecord) -> RouterResult<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO quote_records (
                    id, provider, input_mint, output_mint, in_amount, out_amount,
                    price_impact_pct, slippage_bps, route_plan_json, platform_fee_amount, gas_estimate,
                    response_time_ms, is_cached, created_at_ms, expires_at_ms,
                    efficiency_score, reliability_score
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)",
                params![
                    record.id,
                    record.provider,
                    record.input_mint,
                    record.output_mint,
                    record.in_amount.to_string(),
                    record.out_amount.to_string(),
                    record.price_impact_pct.to_string(),
                    record.slippage_bps,
                    record.route_plan_json,
                    record.platform_fee_amount.map(|a| a.to_string()),
                    record.gas_estimate,
                    record.response_time_ms,
                    record.is_cached as i64,
                    record.created_at_ms,
                    record.expires_at_ms,
                    record.efficiency_score,
                    record.reliability_score,
                ],
            )
            .map_err(|e| RouterError::DatabaseError(format!("insert quote record: {e}")))?;
        Ok(())
    }

    pub fn get_quote_record(&self, id: &str) -> RouterResult<Option<QuoteRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, provider, input_mint, output_mint, in_amount, out_amount,
                        price_impact_pct, slippage_bps, route_plan_json, platform_fee_amount, gas_estimate,
                        response_time_ms, is_cached, created_at_ms, expires_at_ms,
                        efficiency_score, reliability_score
                 FROM quote_records WHERE id = ?1",
            )
            .map_err(|e| RouterError::DatabaseError(e.to_string()))?;

        stmt.query_row(params![id], row_to_quote_record)
            .optional()
            .map_err(|e| RouterError::DatabaseError(format!("get quote record: {e}")))?
            .transpose()
    }

    /// Persist a swap transaction record (insert or overwrite by id).
    /// Failures here are fatal to the request per the propagation policy.
    pub fn upsert_swap_transaction(&self, record: &SwapTransactionRecord) -> RouterResult<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO swap_transactions (
                    id, user_id, input_mint, output_mint, in_amount, out_amount,
                    min_out_amount, slippage_bps, provider, status, tx_hash,
                    route_data_json, fee, gas_estimate, execution_time_ms,
                    error_code, error_message, created_at_ms, updated_at_ms, expires_at_ms
                ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20)",
                params![
                    record.id,
                    record.user_id,
                    record.input_mint,
                    record.output_mint,
                    record.in_amount.to_string(),
                    record.out_amount.to_string(),
                    record.min_out_amount.to_string(),
                    record.slippage_bps,
                    record.provider,
                    status_to_str(record.status),
                    record.tx_hash,
                    record.route_data_json,
                    record.fee.map(|f| f.to_string()),
                    record.gas_estimate,
                    record.execution_time_ms,
                    record.error_code,
                    record.error_message,
                    record.created_at_ms,
                    record.updated_at_ms,
                    record.expires_at_ms,
                ],
            )
            .map_err(|e| RouterError::DatabaseError(format!("upsert swap tx: {e}")))?;
        Ok(())
    }

    pub fn get_swap_transaction(&self, id: &str) -> RouterResult<Option<SwapTransactionRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, user_id, input_mint, output_mint, in_amount, out_amount,
                        min_out_amount, slippage_bps, provider, status, tx_hash,
                        route_data_json, fee, gas_estimate, execution_time_ms,
                        error_code, error_message, created_at_ms, updated_at_ms, expires_at_ms
                 FROM swap_transactions WHERE id = ?1",
            )
            .map_err(|e| RouterError::DatabaseError(e.to_string()))?;

        stmt.query_row(params![id], row_to_swap_record)
            .optional()
            .map_err(|e| RouterError::DatabaseError(format!("get swap tx: {e}")))?
            .transpose()
    }
}

fn status_to_str(status: SwapStatus) -> &'static str {
    match status {
        SwapStatus::Pending => "PENDING",
        SwapStatus::Completed => "COMPLETED",
        SwapStatus::Failed => "FAILED",
        SwapStatus::Expired => "EXPIRED",
    }
}

fn status_from_str(s: &str) -> RouterResult<SwapStatus> {
    match s {
        "PENDING" => Ok(SwapStatus::Pending),
        "COMPLETED" => Ok(SwapStatus::Completed),
        "FAILED" => Ok(SwapStatus::Failed),
        "EXPIRED" => Ok(SwapStatus::Expired),
        other => Err(RouterError::DatabaseError(format!("unknown swap status {other}"))),
    }
}

fn row_to_quote_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<RouterResult<QuoteRecord>> {
    let in_amount: String = row.get(4)?;
    let out_amount: String = row.get(5)?;
    let price_impact_pct: String = row.get(6)?;
    let platform_fee_amount: Option<String> = row.get(9)?;

    Ok((|| -> RouterResult<QuoteRecord> {
        Ok(QuoteRecord {
            id: row.get(0).map_err(db_err)?,
            provider: row.get(1).map_err(db_err)?,
            input_mint: row.get(2).map_err(db_err)?,
            output_mint: row.get(3).map_err(db_err)?,
            in_amount: in_amount
                .parse()
                .map_err(|e| RouterError::DatabaseError(format!("parse in_amount: {e}")))?,
            out_amount: out_amount
                .parse()
                .map_err(|e| RouterError::DatabaseError(format!("parse out_amount: {e}")))?,
            price_impact_pct: price_impact_pct
                .parse()
                .map_err(|e| RouterError::DatabaseError(format!("parse price_impact_pct: {e}")))?,
            slippage_bps: row.get(7).map_err(db_err)?,
            route_plan_json: row.get(8).map_err(db_err)?,
            platform_fee_amount: platform_fee_amount
                .map(|s| s.parse())
                .transpose()
                .map_err(|e| RouterError::DatabaseError(format!("parse platform_fee_amount: {e}")))?,
            gas_estimate: row.get(10).map_err(db_err)?,
            response_time_ms: row.get(11).map_err(db_err)?,
            is_cached: row.get::<_, i64>(12).map_err(db_err)? != 0,
            created_at_ms: row.get(13).map_err(db_err)?,
            expires_at_ms: row.get(14).map_err(db_err)?,
            efficiency_score: row.get(15).map_err(db_err)?,
            reliability_score: row.get(16).map_err(db_err)?,
        })
    })())
}

fn row_to_swap_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<RouterResult<SwapTransactionRecord>> {
    let in_amount: String = row.get(4)?;
    let out_amount: String = row.get(5)?;
    let min_out_amount: String = row.get(6)?;
    let status: String = row.get(9)?;
    let fee: Option<String> = row.get(12)?;

    Ok((|| -> RouterResult<SwapTransactionRecord> {
        Ok(SwapTransactionRecord {
            id: row.get(0).map_err(db_err)?,
            user_id: row.get(1).map_err(db_err)?,
            input_mint: row.get(2).map_err(db_err)?,
            output_mint: row.get(3).map_err(db_err)?,
            in_amount: in_amount
                .parse()
                .map_err(|e| RouterError::DatabaseError(format!("parse in_amount: {e}")))?,
            out_amount: out_amount
                .parse()
                .map_err(|e| RouterError::DatabaseError(format!("parse out_amount: {e}")))?,
            min_out_amount: min_out_amount
                .parse()
                .map_err(|e| RouterError::DatabaseError(format!("parse min_out_amount: {e}")))?,
            slippage_bps: row.get(7).map_err(db_err)?,
            provider: row.get(8).map_err(db_err)?,
            status: status_from_str(&status)?,
            tx_hash: row.get(10).map_err(db_err)?,
            route_data_json: row.get(11).map_err(db_err)?,
            fee: fee
                .map(|s| s.parse())
                .transpose()
                .map_err(|e| RouterError::DatabaseError(format!("parse fee: {e}")))?,
            gas_estimate: row.get(13).map_err(db_err)?,
            execution_time_ms: row.get(14).map_err(db_err)?,
            error_code: row.get(15).map_err(db_err)?,
            error_message: row.get(16).map_err(db_err)?,
            created_at_ms: row.get(17).map_err(db_err)?,
            updated_at_ms: row.get(18).map_err(db_err)?,
            expires_at_ms: row.get(19).map_err(db_err)?,
        })
    })())
}

fn db_err(e: rusqlite::Error) -> RouterError {
    RouterError::DatabaseError(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_quote_record() -> QuoteRecord {
        QuoteRecord {
            id: "q1".into(),
            provider: "orbit".into(),
            input_mint: "SOL".into(),
            output_mint: "USDC".into(),
            in_amount: 1_000_000_000,
            out_amount: 145_000_000,
            price_impact_pct: "0.01".parse().unwrap(),
            slippage_bps: 50,
            route_plan_json: "[]".into(),
            platform_fee_amount: None,
            gas_estimate: Some(120_000),
            response_time_ms: 250,
            is_cached: false,
            created_at_ms: 1_000,
            expires_at_ms: 31_000,
            efficiency_score: Some(0.9),
            reliability_score: Some(0.95),
        }
    }

    fn sample_swap_record() -> SwapTransactionRecord {
        SwapTransactionRecord {
            id: "tx1".into(),
            user_id: "user1".into(),
            input_mint: "SOL".into(),
            output_mint: "USDC".into(),
            in_amount: 1_000_000_000,
            out_amount: 145_000_000,
            min_out_amount: 144_000_000,
            slippage_bps: 50,
            provider: "orbit".into(),
            status: SwapStatus::Pending,
            tx_hash: None,
            route_data_json: "{}".into(),
            fee: None,
            gas_estimate: None,
            execution_time_ms: None,
            error_code: None,
            error_message: None,
            created_at_ms: 1_000,
            updated_at_ms: 1_000,
            expires_at_ms: 31_000,
        }
    }

    #[test]
    fn round_trips_quote_record() {
        let store = SqliteStore::open_in_memory().unwrap();
        let record = sample_quote_record();
        store.insert_quote_record(&record).unwrap();

        let fetched = store.get_quote_record("q1").unwrap().unwrap();
        assert_eq!(fetched.provider, "orbit");
        assert_eq!(fetched.out_amount, 145_000_000);
        assert_eq!(fetched.price_impact_pct.to_string(), "0.01");
    }

    #[test]
    fn missing_quote_record_is_none() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.get_quote_record("nope").unwrap().is_none());
    }

    #[test]
    fn round_trips_swap_transaction_and_overwrites_on_status_update() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut record = sample_swap_record();
        store.upsert_swap_transaction(&record).unwrap();

        record.status = SwapStatus::Completed;
        record.tx_hash = Some("0xabc".into());
        record.execution_time_ms = Some(420);
        store.upsert_swap_transaction(&record).unwrap();

        let fetched = store.get_swap_transaction("tx1").unwrap().unwrap();
        assert_eq!(fetched.status, SwapStatus::Completed);
        assert_eq!(fetched.tx_hash.as_deref(), Some("0xabc"));
        assert_eq!(fetched.execution_time_ms, Some(420));
    }
}
