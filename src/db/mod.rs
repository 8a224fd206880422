//! Durable release journal
//!
//! Append/update record of every observed lock event, the attestation
//! built for it and the submission outcome, plus the source block cursor.
//! Lets a restarted relayer resume in-flight work instead of dropping it.

use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use eyre::{Result, WrapErr};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::error;

pub mod memory;
pub mod models;

pub use memory::MemoryJournal;
pub use models::*;

use crate::retry::ErrorClass;
use crate::types::{Attestation, LockEvent, ReleaseOutcome, ReleaseStatus};

/// Storage for the release journal
#[async_trait]
pub trait Journal: Send + Sync {
    /// Record a newly observed event. Returns the status of an existing
    /// entry for the same (destination, nonce), or `None` if it was inserted.
    async fn record_observed(
        &self,
        event: &LockEvent,
        destination: Address,
    ) -> Result<Option<ReleaseStatus>>;

    /// Attach the built attestation
    async fn record_signed(&self, attestation: &Attestation) -> Result<()>;

    /// Record the final outcome. A released entry is never overwritten.
    async fn record_outcome(
        &self,
        destination: Address,
        nonce: U256,
        outcome: &ReleaseOutcome,
        error_class: Option<ErrorClass>,
    ) -> Result<()>;

    /// Events to re-enqueue after a restart: entries still `observed` or
    /// `signed`, plus `failed` ones when `include_failed` is set.
    async fn resumable(&self, destination: Address, include_failed: bool)
        -> Result<Vec<JournalEntry>>;

    /// Row counts by status
    async fn counts(&self, destination: Address) -> Result<JournalCounts>;

    /// Entries not yet released, newest first
    async fn unreleased(&self, destination: Address, limit: i64) -> Result<Vec<JournalEntry>>;

    /// Last source block whose events were fully dispatched
    async fn source_cursor(&self, source: Address) -> Result<Option<u64>>;

    async fn set_source_cursor(&self, source: Address, block: u64) -> Result<()>;
}

/// Create a database connection pool
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .wrap_err("Failed to connect to database")
}

/// Run pending migrations (uses the migration files in migrations/)
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .wrap_err("Failed to run database migrations")?;
    Ok(())
}

/// Postgres-backed journal
#[derive(Clone)]
pub struct PgJournal {
    pool: PgPool,
}

impl PgJournal {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and migrate
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = create_pool(database_url).await?;
        run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }
}

const ENTRY_COLUMNS: &str = r#"id, destination, nonce::TEXT as nonce, sender, recipient,
    amount::TEXT as amount, source_tx_hash, source_block, digest, signature, status,
    error, error_class, dest_tx_hash, created_at, updated_at"#;

#[async_trait]
impl Journal for PgJournal {
    async fn record_observed(
        &self,
        event: &LockEvent,
        destination: Address,
    ) -> Result<Option<ReleaseStatus>> {
        let inserted = sqlx::query_as::<_, (i64,)>(
            r#"
            INSERT INTO release_journal (destination, nonce, sender, recipient, amount,
                source_tx_hash, source_block, status)
            VALUES ($1, $2::NUMERIC, $3, $4, $5::NUMERIC, $6, $7, 'observed')
            ON CONFLICT (destination, nonce) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(address_key(&destination))
        .bind(event.nonce.to_string())
        .bind(address_key(&event.sender))
        .bind(address_key(&event.recipient))
        .bind(event.amount.to_string())
        .bind(event.source_tx_hash.map(|h| format!("0x{:x}", h)))
        .bind(event.source_block.map(|b| b as i64))
        .fetch_optional(&self.pool)
        .await
        .wrap_err("Failed to insert journal entry")?;

        if inserted.is_some() {
            return Ok(None);
        }

        let existing = sqlx::query_as::<_, (String,)>(
            r#"SELECT status FROM release_journal WHERE destination = $1 AND nonce = $2::NUMERIC"#,
        )
        .bind(address_key(&destination))
        .bind(event.nonce.to_string())
        .fetch_optional(&self.pool)
        .await
        .wrap_err("Failed to read existing journal entry")?;

        Ok(existing.and_then(|(s,)| ReleaseStatus::parse(&s)))
    }

    async fn record_signed(&self, attestation: &Attestation) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE release_journal
            SET digest = $1, signature = $2,
                status = CASE WHEN status = 'observed' THEN 'signed' ELSE status END,
                updated_at = NOW()
            WHERE destination = $3 AND nonce = $4::NUMERIC
            "#,
        )
        .bind(format!("0x{:x}", attestation.digest))
        .bind(format!("0x{}", hex::encode(&attestation.signature)))
        .bind(address_key(&attestation.destination))
        .bind(attestation.nonce.to_string())
        .execute(&self.pool)
        .await
        .wrap_err("Failed to record attestation")?;

        Ok(())
    }

    async fn record_outcome(
        &self,
        destination: Address,
        nonce: U256,
        outcome: &ReleaseOutcome,
        error_class: Option<ErrorClass>,
    ) -> Result<()> {
        let (dest_tx_hash, error) = match outcome {
            ReleaseOutcome::Released { tx_hash } => (tx_hash.map(|h| format!("0x{:x}", h)), None),
            ReleaseOutcome::Rejected { reason } | ReleaseOutcome::Failed { reason } => {
                (None, Some(reason.clone()))
            }
        };

        sqlx::query(
            r#"
            UPDATE release_journal
            SET status = $1, error = $2, error_class = $3,
                dest_tx_hash = COALESCE($4, dest_tx_hash), updated_at = NOW()
            WHERE destination = $5 AND nonce = $6::NUMERIC AND status <> 'released'
            "#,
        )
        .bind(outcome.status().as_str())
        .bind(error)
        .bind(error_class.map(|c| c.as_str()))
        .bind(dest_tx_hash)
        .bind(address_key(&destination))
        .bind(nonce.to_string())
        .execute(&self.pool)
        .await
        .wrap_err_with(|| format!("Failed to record outcome for nonce {}", nonce))?;

        Ok(())
    }

    async fn resumable(
        &self,
        destination: Address,
        include_failed: bool,
    ) -> Result<Vec<JournalEntry>> {
        let query = format!(
            r#"SELECT {} FROM release_journal
               WHERE destination = $1
                 AND (status IN ('observed', 'signed') OR ($2 AND status = 'failed'))
               ORDER BY id ASC"#,
            ENTRY_COLUMNS
        );

        let rows = sqlx::query_as::<_, JournalEntry>(&query)
            .bind(address_key(&destination))
            .bind(include_failed)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("SQL error getting resumable journal entries: {:?}", e);
                e
            })
            .wrap_err("Failed to get resumable journal entries")?;

        Ok(rows)
    }

    async fn counts(&self, destination: Address) -> Result<JournalCounts> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"SELECT status, COUNT(*) FROM release_journal WHERE destination = $1 GROUP BY status"#,
        )
        .bind(address_key(&destination))
        .fetch_all(&self.pool)
        .await
        .wrap_err("Failed to count journal entries")?;

        let mut counts = JournalCounts::default();
        for (status, count) in rows {
            if let Some(status) = ReleaseStatus::parse(&status) {
                counts.add(status, count);
            }
        }
        Ok(counts)
    }

    async fn unreleased(&self, destination: Address, limit: i64) -> Result<Vec<JournalEntry>> {
        let query = format!(
            r#"SELECT {} FROM release_journal
               WHERE destination = $1 AND status <> 'released'
               ORDER BY id DESC LIMIT $2"#,
            ENTRY_COLUMNS
        );

        let rows = sqlx::query_as::<_, JournalEntry>(&query)
            .bind(address_key(&destination))
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .wrap_err("Failed to get unreleased journal entries")?;

        Ok(rows)
    }

    async fn source_cursor(&self, source: Address) -> Result<Option<u64>> {
        let row = sqlx::query_as::<_, (i64,)>(
            r#"SELECT last_block FROM source_cursors WHERE source = $1"#,
        )
        .bind(address_key(&source))
        .fetch_optional(&self.pool)
        .await
        .wrap_err("Failed to get source cursor")?;

        Ok(row.map(|r| r.0 as u64))
    }

    async fn set_source_cursor(&self, source: Address, block: u64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO source_cursors (source, last_block, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (source) DO UPDATE SET last_block = $2, updated_at = NOW()
            "#,
        )
        .bind(address_key(&source))
        .bind(block as i64)
        .execute(&self.pool)
        .await
        .wrap_err("Failed to update source cursor")?;

        Ok(())
    }
}
