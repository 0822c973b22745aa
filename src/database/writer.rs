//! Batched PostgreSQL event writer with in-database deduplication.
//!
//! Events queue into a bounded channel and are flushed in transactions of
//! up to 50, or every 2 seconds, whichever comes first. Within a batch,
//! each event is matched against the currently-active row with the same
//! `(country_code, event_type, affected_asn, affected_prefix)` signature:
//! a hit refreshes `last_seen_at` and raises severity monotonically, a
//! miss inserts a fresh active row. Shutdown drains the queue before the
//! pool is closed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, error, info, warn};

use crate::models::{BgpEvent, Severity};

const BATCH_SIZE: usize = 50;
const BATCH_INTERVAL: Duration = Duration::from_secs(2);
const QUEUE_SIZE: usize = 10_000;

#[derive(Debug, Default)]
struct WriterStats {
    events_written: AtomicU64,
    events_dropped: AtomicU64,
    batches_written: AtomicU64,
}

/// Handle to the background writer task.
pub struct EventWriter {
    tx: mpsc::Sender<BgpEvent>,
    stats: Arc<WriterStats>,
    handle: tokio::task::JoinHandle<()>,
}

impl EventWriter {
    /// Connect to PostgreSQL, verify the connection, and start the
    /// background writer loop.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .max_lifetime(Some(Duration::from_secs(3600)))
            .connect(database_url)
            .await
            .context("database connection failed")?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .context("database ping failed")?;

        info!("connected to PostgreSQL database");

        let (tx, rx) = mpsc::channel(QUEUE_SIZE);
        let stats = Arc::new(WriterStats::default());
        let handle = tokio::spawn(writer_loop(pool, rx, stats.clone()));

        Ok(Self { tx, stats, handle })
    }

    /// Queue an event for batched writing. Non-blocking: when the queue is
    /// full the event is dropped and counted.
    pub fn write(&self, event: BgpEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let dropped = self.stats.events_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped % 1000 == 0 {
                    warn!("event queue full, dropped {} events", dropped);
                }
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Close the queue, wait for the writer to drain, and log totals.
    pub async fn shutdown(self) {
        drop(self.tx);
        let _ = self.handle.await;
        info!(
            "database writer stopped (written={}, dropped={}, batches={})",
            self.stats.events_written.load(Ordering::Relaxed),
            self.stats.events_dropped.load(Ordering::Relaxed),
            self.stats.batches_written.load(Ordering::Relaxed),
        );
    }
}

async fn writer_loop(pool: PgPool, mut rx: mpsc::Receiver<BgpEvent>, stats: Arc<WriterStats>) {
    let mut batch: Vec<BgpEvent> = Vec::with_capacity(BATCH_SIZE);
    let mut ticker = tokio::time::interval(BATCH_INTERVAL);
    ticker.tick().await;

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Some(event) => {
                        batch.push(event);
                        if batch.len() >= BATCH_SIZE {
                            write_batch(&pool, &mut batch, &stats).await;
                        }
                    }
                    // Sender dropped and queue drained: flush and exit
                    None => break,
                }
            }
            _ = ticker.tick() => {
                if !batch.is_empty() {
                    write_batch(&pool, &mut batch, &stats).await;
                }
            }
        }
    }

    if !batch.is_empty() {
        write_batch(&pool, &mut batch, &stats).await;
    }
    pool.close().await;
}

async fn write_batch(pool: &PgPool, batch: &mut Vec<BgpEvent>, stats: &WriterStats) {
    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(e) => {
            error!("failed to begin transaction: {}", e);
            batch.clear();
            return;
        }
    };

    let mut written = 0u64;
    for event in batch.iter() {
        match write_event(&mut tx, event).await {
            Ok(()) => written += 1,
            Err(e) => warn!("failed to write event: {}", e),
        }
    }

    if let Err(e) = tx.commit().await {
        error!("failed to commit batch: {}", e);
        batch.clear();
        return;
    }

    stats.events_written.fetch_add(written, Ordering::Relaxed);
    stats.batches_written.fetch_add(1, Ordering::Relaxed);
    debug!("flushed batch of {} events", batch.len());
    batch.clear();
}

async fn write_event(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    event: &BgpEvent,
) -> Result<(), sqlx::Error> {
    let existing: Option<(i64, String)> = sqlx::query_as(
        "SELECT id, severity FROM bgp_events \
         WHERE country_code = $1 \
         AND event_type = $2 \
         AND affected_asn = $3 \
         AND affected_prefix = $4 \
         AND is_active = true \
         LIMIT 1",
    )
    .bind(&event.country_code)
    .bind(event.event_type.as_str())
    .bind(event.affected_asn as i64)
    .bind(&event.affected_prefix)
    .fetch_optional(&mut **tx)
    .await?;

    if let Some((id, stored_severity)) = existing {
        let severity = raised_severity(&stored_severity, event.severity);
        sqlx::query("UPDATE bgp_events SET last_seen_at = $1, severity = $2 WHERE id = $3")
            .bind(event.detected_at)
            .bind(severity.as_str())
            .bind(id)
            .execute(&mut **tx)
            .await?;
        return Ok(());
    }

    sqlx::query(
        "INSERT INTO bgp_events ( \
            country_code, event_type, severity, event_category, \
            affected_asn, affected_prefix, details, \
            detected_at, last_seen_at, is_active, \
            is_cross_border, attacker_country, victim_country \
         ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
    )
    .bind(&event.country_code)
    .bind(event.event_type.as_str())
    .bind(event.severity.as_str())
    .bind(event.category.as_str())
    .bind(event.affected_asn as i64)
    .bind(&event.affected_prefix)
    .bind(&event.details)
    .bind(event.detected_at)
    .bind(event.detected_at)
    .bind(true)
    .bind(event.is_cross_border)
    .bind(&event.attacker_country)
    .bind(&event.victim_country)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Severity for a refreshed row: the pointwise maximum of what is stored
/// and what was just observed. Never lowered.
fn raised_severity(stored: &str, observed: Severity) -> Severity {
    Severity::from_db(stored).max(observed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_only_ever_rises() {
        assert_eq!(raised_severity("low", Severity::High), Severity::High);
        assert_eq!(raised_severity("critical", Severity::Low), Severity::Critical);
        assert_eq!(raised_severity("medium", Severity::Medium), Severity::Medium);
        assert_eq!(raised_severity("high", Severity::Medium), Severity::High);
        // Unreadable stored severities can only be raised
        assert_eq!(raised_severity("garbage", Severity::Medium), Severity::Medium);
    }

    #[test]
    fn batch_thresholds_match_contract() {
        assert_eq!(BATCH_SIZE, 50);
        assert_eq!(BATCH_INTERVAL, Duration::from_secs(2));
        assert_eq!(QUEUE_SIZE, 10_000);
    }
}
