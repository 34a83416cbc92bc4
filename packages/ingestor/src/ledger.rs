//! Token Activity Ledger
//!
//! Persists per-contract transfer volume in two tiers. A contract lives in
//! the active tier while its accumulation window is open and moves to the
//! historical tier once `first_seen` falls behind the window. A contract is
//! never in both tiers at once: recording activity for a historical contract
//! promotes it back to a fresh active row.
//!
//! Timestamps are stored as unix seconds and volumes as decimal text, so
//! repeated accumulation stays exact.

use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use thiserror::Error;
use tracing::{debug, info};

/// Errors that can occur reading or writing the ledger
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Active row for {0:#x} vanished during insert conflict")]
    MissingActiveRow(Address),

    #[error("Corrupt ledger row: {0}")]
    Corrupt(String),

    #[error("Refusing negative volume {usd} for {contract:#x}")]
    NegativeVolume { contract: Address, usd: Decimal },

    #[error("Accumulated volume for {0:#x} exceeds decimal range")]
    VolumeOverflow(Address),
}

/// Which table an entry lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Active,
    Historical,
}

impl Tier {
    fn table(self) -> &'static str {
        match self {
            Tier::Active => "active_tokens",
            Tier::Historical => "historical_tokens",
        }
    }
}

/// One ledger row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub contract: Address,
    pub first_seen: DateTime<Utc>,
    /// Accumulated USD volume
    pub volume: Decimal,
    pub tier: Tier,
}

/// What `record_activity` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// First sighting, new active row
    Created,
    /// Came back from the historical tier with a fresh window
    Promoted,
    /// Added to an open window
    Accumulated,
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS active_tokens (
        contract_address TEXT PRIMARY KEY NOT NULL,
        first_seen INTEGER NOT NULL,
        volume TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS historical_tokens (
        contract_address TEXT PRIMARY KEY NOT NULL,
        first_seen INTEGER NOT NULL,
        volume TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_active_tokens_first_seen ON active_tokens (first_seen)",
];

/// SQLite-backed two-tier volume ledger
#[derive(Clone)]
pub struct TokenLedger {
    pool: SqlitePool,
    window: i64,
}

impl TokenLedger {
    /// Open (creating if needed) the database at `url` and ensure the schema
    pub async fn open(url: &str, window: Duration) -> Result<Self, LedgerError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let ledger = Self::from_pool(pool, window).await?;
        info!(url, window_secs = ledger.window, "Token ledger opened");
        Ok(ledger)
    }

    /// Wrap an existing pool, creating tables if missing
    pub async fn from_pool(pool: SqlitePool, window: Duration) -> Result<Self, LedgerError> {
        let ledger = Self {
            pool,
            window: i64::try_from(window.as_secs()).unwrap_or(i64::MAX),
        };
        ledger.init_schema().await?;
        Ok(ledger)
    }

    async fn init_schema(&self) -> Result<(), LedgerError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Add `usd` to the contract's active volume
    ///
    /// A first sighting creates an active row stamped `observed_at`. A
    /// contract found only in the historical tier is promoted: the
    /// historical row is removed and the window restarts at `observed_at`.
    /// All of it happens in one transaction that holds the write lock from
    /// the first read, so concurrent writers queue behind it.
    pub async fn record_activity(
        &self,
        contract: Address,
        usd: Decimal,
        observed_at: DateTime<Utc>,
    ) -> Result<RecordOutcome, LedgerError> {
        if usd.is_sign_negative() && !usd.is_zero() {
            return Err(LedgerError::NegativeVolume { contract, usd });
        }

        let key = address_key(&contract);
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        if let Some(volume) = active_volume(&mut tx, &key).await? {
            let total = accumulate(contract, volume, usd)?;
            set_active_volume(&mut tx, &key, total).await?;
            tx.commit().await?;
            debug!(contract = %contract, usd = %usd, total = %total, "Accumulated volume");
            return Ok(RecordOutcome::Accumulated);
        }

        if insert_or_accumulate(&mut tx, contract, &key, usd, observed_at).await? {
            tx.commit().await?;
            return Ok(RecordOutcome::Accumulated);
        }

        let demoted = sqlx::query("DELETE FROM historical_tokens WHERE contract_address = ?")
            .bind(&key)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        if demoted > 0 {
            info!(contract = %contract, usd = %usd, "Promoted historical token back to active");
            Ok(RecordOutcome::Promoted)
        } else {
            info!(contract = %contract, usd = %usd, "New active token");
            Ok(RecordOutcome::Created)
        }
    }

    /// Move every active row whose window closed before `now` to the
    /// historical tier, replacing any older historical row for the contract
    ///
    /// Returns the number of rows moved. A row exactly at the boundary stays
    /// active.
    pub async fn consolidate(&self, now: DateTime<Utc>) -> Result<usize, LedgerError> {
        let cutoff = now.timestamp().saturating_sub(self.window);
        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;

        let expired = sqlx::query(
            "SELECT contract_address, first_seen, volume FROM active_tokens WHERE first_seen < ?",
        )
        .bind(cutoff)
        .fetch_all(&mut *tx)
        .await?;

        for row in &expired {
            sqlx::query(
                "INSERT INTO historical_tokens (contract_address, first_seen, volume) VALUES (?, ?, ?)
                 ON CONFLICT(contract_address) DO UPDATE SET
                    first_seen = excluded.first_seen,
                    volume = excluded.volume",
            )
            .bind(row.get::<String, _>("contract_address"))
            .bind(row.get::<i64, _>("first_seen"))
            .bind(row.get::<String, _>("volume"))
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("DELETE FROM active_tokens WHERE first_seen < ?")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        if !expired.is_empty() {
            info!(demoted = expired.len(), cutoff, "Consolidated expired tokens");
        }
        Ok(expired.len())
    }

    /// Whether the contract has ever been recorded in either tier
    pub async fn was_ever_seen(&self, contract: Address) -> Result<bool, LedgerError> {
        let key = address_key(&contract);
        let seen: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM active_tokens WHERE contract_address = ?1)
                 OR EXISTS(SELECT 1 FROM historical_tokens WHERE contract_address = ?1)",
        )
        .bind(&key)
        .fetch_one(&self.pool)
        .await?;
        Ok(seen != 0)
    }

    pub async fn active_entry(&self, contract: Address) -> Result<Option<LedgerEntry>, LedgerError> {
        self.entry(Tier::Active, contract).await
    }

    pub async fn historical_entry(&self, contract: Address) -> Result<Option<LedgerEntry>, LedgerError> {
        self.entry(Tier::Historical, contract).await
    }

    pub async fn active_count(&self) -> Result<u64, LedgerError> {
        self.count(Tier::Active).await
    }

    pub async fn historical_count(&self) -> Result<u64, LedgerError> {
        self.count(Tier::Historical).await
    }

    async fn entry(&self, tier: Tier, contract: Address) -> Result<Option<LedgerEntry>, LedgerError> {
        let sql = format!(
            "SELECT contract_address, first_seen, volume FROM {} WHERE contract_address = ?",
            tier.table()
        );
        let row = sqlx::query(&sql)
            .bind(address_key(&contract))
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let first_seen: i64 = row.get("first_seen");
        let volume: String = row.get("volume");
        Ok(Some(LedgerEntry {
            contract,
            first_seen: DateTime::from_timestamp(first_seen, 0)
                .ok_or_else(|| LedgerError::Corrupt(format!("first_seen {first_seen} out of range")))?,
            volume: parse_volume(&volume)?,
            tier,
        }))
    }

    async fn count(&self, tier: Tier) -> Result<u64, LedgerError> {
        let sql = format!("SELECT COUNT(*) FROM {}", tier.table());
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }
}

fn address_key(address: &Address) -> String {
    format!("{:#x}", address)
}

fn parse_volume(raw: &str) -> Result<Decimal, LedgerError> {
    Decimal::from_str(raw).map_err(|e| LedgerError::Corrupt(format!("volume {raw:?}: {e}")))
}

async fn active_volume(
    tx: &mut Transaction<'_, Sqlite>,
    key: &str,
) -> Result<Option<Decimal>, LedgerError> {
    let volume: Option<String> =
        sqlx::query_scalar("SELECT volume FROM active_tokens WHERE contract_address = ?")
            .bind(key)
            .fetch_optional(&mut **tx)
            .await?;
    volume.as_deref().map(parse_volume).transpose()
}

fn accumulate(contract: Address, volume: Decimal, usd: Decimal) -> Result<Decimal, LedgerError> {
    volume
        .checked_add(usd)
        .ok_or(LedgerError::VolumeOverflow(contract))
}

/// Insert a fresh active row, or add to the row another writer created
/// first. Returns `true` when it accumulated instead of inserting.
async fn insert_or_accumulate(
    tx: &mut Transaction<'_, Sqlite>,
    contract: Address,
    key: &str,
    usd: Decimal,
    observed_at: DateTime<Utc>,
) -> Result<bool, LedgerError> {
    let insert = sqlx::query(
        "INSERT INTO active_tokens (contract_address, first_seen, volume) VALUES (?, ?, ?)",
    )
    .bind(key)
    .bind(observed_at.timestamp())
    .bind(usd.to_string())
    .execute(&mut **tx)
    .await;

    match insert {
        Ok(_) => Ok(false),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            debug!(contract = %contract, "Active row already present, accumulating");
            let volume = active_volume(tx, key)
                .await?
                .ok_or(LedgerError::MissingActiveRow(contract))?;
            set_active_volume(tx, key, accumulate(contract, volume, usd)?).await?;
            Ok(true)
        }
        Err(e) => Err(e.into()),
    }
}

async fn set_active_volume(
    tx: &mut Transaction<'_, Sqlite>,
    key: &str,
    volume: Decimal,
) -> Result<(), LedgerError> {
    sqlx::query("UPDATE active_tokens SET volume = ? WHERE contract_address = ?")
        .bind(volume.to_string())
        .bind(key)
        .execute(&mut **tx)
        .await?;
    Ok(())
}
