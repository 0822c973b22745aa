//! Real-time BGP anomaly detector fed by RIPE RIS Live.
//!
//! # Pipeline
//! ```text
//! ┌─────────────────┐   ┌──────────────┐   ┌──────────────┐
//! │ Stream Clients  │──▶│ Update Queue │──▶│  Detectors   │──┐
//! │  (one per       │   │  (bounded,   │   │  (N workers, │  │
//! │   collector)    │   │   drop-tail) │   │   3 in each) │  │
//! └─────────────────┘   └──────────────┘   └──────────────┘  │
//!                                                            ▼
//!                                        ┌──────────────────────┐
//!                                        │    Event Sink        │
//!                                        │ (enrich + dedup +    │
//!                                        │  persist + stdout)   │
//!                                        └──────────────────────┘
//! ```
//!
//! Shutdown is a single broadcast: clients exit and release their queue
//! senders, workers drain the queue and exit on disconnect, the sink exits
//! when the event channel closes, and the writer drains before the
//! database handle goes away.

pub mod config;
pub mod database;
pub mod detector;
pub mod models;
pub mod rislive;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use config::Config;
use database::{CountryResolver, EventWriter, FileResolver, TableResolver};
use detector::{DetectorSet, OriginStore};
use models::BgpEvent;
use rislive::MultiClient;

const EVENT_QUEUE_SIZE: usize = 10_000;
const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Counters shared between the workers, the sink, and the stats task.
#[derive(Debug, Default)]
struct RadarStats {
    updates_processed: AtomicU64,
    events_detected: AtomicU64,
}

/// The assembled detection pipeline.
pub struct Radar {
    config: Config,
}

impl Radar {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run until SIGINT/SIGTERM, then tear the pipeline down in order.
    pub async fn run(self) -> Result<()> {
        let config = &self.config;
        info!("collectors: {:?}", config.collectors);

        // Optional collaborators degrade to their null variants on failure
        let redis = connect_redis(config.redis.as_deref()).await;
        let writer = connect_writer(config.database.as_deref()).await;

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let resolver = Arc::new(build_resolver(config, &shutdown_tx).await);

        let (update_tx, update_rx) = crossbeam_channel::bounded(config.buffer);
        let (event_tx, event_rx) = mpsc::channel::<BgpEvent>(EVENT_QUEUE_SIZE);
        let stats = Arc::new(RadarStats::default());

        // Detector workers: any free worker takes the next update
        let store = Arc::new(OriginStore::new(redis));
        let detectors = Arc::new(DetectorSet::new(event_tx, store));
        let mut worker_handles = Vec::with_capacity(config.workers);
        for _ in 0..config.workers {
            let update_rx = update_rx.clone();
            let detectors = detectors.clone();
            let stats = stats.clone();
            worker_handles.push(tokio::spawn(async move {
                loop {
                    match update_rx.recv_timeout(WORKER_POLL_INTERVAL) {
                        Ok(update) => {
                            stats.updates_processed.fetch_add(1, Ordering::Relaxed);
                            detectors.process(&update).await;
                        }
                        Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                        Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
                    }
                    // recv_timeout parks the runtime thread; yield between
                    // polls so the socket and sink tasks stay scheduled
                    tokio::task::yield_now().await;
                }
            }));
        }
        // Workers hold the only remaining event senders now
        drop(detectors);

        // Event sink: single consumer, serialised output
        let sink_resolver = resolver.clone();
        let sink_stats = stats.clone();
        let sink_handle = tokio::spawn(async move {
            run_event_sink(event_rx, sink_resolver, writer, sink_stats).await;
        });

        // Stream clients and the periodic stats task
        let clients = MultiClient::start(&config.collectors, &update_tx, &shutdown_tx);
        drop(update_tx);

        let stats_handle = spawn_stats_task(
            config.stats_interval(),
            stats.clone(),
            update_rx.clone(),
            &clients,
            &shutdown_tx,
        );
        drop(update_rx);

        wait_for_signal().await?;

        info!("shutting down...");
        let _ = shutdown_tx.send(());

        clients.join().await;
        for handle in worker_handles {
            let _ = handle.await;
        }
        let _ = sink_handle.await;
        let _ = stats_handle.await;

        info!(
            "final stats: updates={}, events={}",
            stats.updates_processed.load(Ordering::Relaxed),
            stats.events_detected.load(Ordering::Relaxed),
        );
        Ok(())
    }
}

/// Connect to Redis if configured. Any failure degrades the origin store
/// to process-local memory with a warning.
async fn connect_redis(url: Option<&str>) -> Option<redis::aio::MultiplexedConnection> {
    let url = url?;
    let client = match redis::Client::open(url) {
        Ok(client) => client,
        Err(e) => {
            warn!("invalid Redis URL: {}", e);
            return None;
        }
    };
    match client.get_multiplexed_async_connection().await {
        Ok(conn) => {
            info!("connected to Redis: {}", url);
            Some(conn)
        }
        Err(e) => {
            warn!("Redis connection failed: {}", e);
            None
        }
    }
}

/// Start the relational writer if configured. Failure means no
/// persistence, not a startup error.
async fn connect_writer(url: Option<&str>) -> Option<EventWriter> {
    let url = url?;
    match EventWriter::connect(url).await {
        Ok(writer) => {
            info!("database writer started");
            Some(writer)
        }
        Err(e) => {
            warn!("database connection failed: {:#}", e);
            None
        }
    }
}

/// Pick the resolver backend: CSV file first, then the database table,
/// otherwise the null resolver.
async fn build_resolver(config: &Config, shutdown: &broadcast::Sender<()>) -> CountryResolver {
    if let Some(path) = &config.asn_data {
        match FileResolver::load(path) {
            Ok(resolver) => {
                let resolver = CountryResolver::File(resolver);
                info!(
                    "using file-based ASN resolver: {} ({} ASNs)",
                    path.display(),
                    resolver.count()
                );
                return resolver;
            }
            Err(e) => warn!("failed to load ASN data: {:#}", e),
        }
    }

    if let Some(url) = &config.database {
        match sqlx::postgres::PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await
        {
            Ok(pool) => {
                let resolver = TableResolver::new(pool);
                resolver.start(shutdown);
                info!("using database ASN resolver");
                return CountryResolver::Table(resolver);
            }
            Err(e) => warn!("ASN resolver database connection failed: {}", e),
        }
    }

    info!("no ASN resolver configured, country codes will be 'XX'");
    CountryResolver::Null
}

/// Drain the event queue: enrich with a country code, log a JSON line,
/// and forward to the relational writer. Exits when the last detector
/// worker drops its sender, then drains the writer.
async fn run_event_sink(
    mut events: mpsc::Receiver<BgpEvent>,
    resolver: Arc<CountryResolver>,
    writer: Option<EventWriter>,
    stats: Arc<RadarStats>,
) {
    while let Some(mut event) = events.recv().await {
        stats.events_detected.fetch_add(1, Ordering::Relaxed);

        enrich_country(&mut event, &resolver);

        if let Some(writer) = &writer {
            writer.write(event.clone());
        }

        let line = serde_json::json!({
            "type": event.event_type,
            "severity": event.severity,
            "category": event.category,
            "affected_asn": event.affected_asn,
            "affected_prefix": event.affected_prefix,
            "detected_at": event.detected_at.to_rfc3339(),
            "details": event.details,
        });
        info!("EVENT: {}", line);
    }

    if let Some(writer) = writer {
        writer.shutdown().await;
    }
}

/// Fill in the country code: the affected ASN first, then the first hit
/// along the recorded AS path, and finally the literal "XX" for unknown.
/// Never "GL", which is Greenland, not "global".
fn enrich_country(event: &mut BgpEvent, resolver: &CountryResolver) {
    if !event.country_code.is_empty() {
        return;
    }

    if event.affected_asn > 0 {
        if let Some(country) = resolver.resolve(event.affected_asn) {
            event.country_code = country;
            return;
        }
    }

    if let Some(path) = event.details.get("as_path").and_then(|p| p.as_array()) {
        let as_path: Vec<u32> = path
            .iter()
            .filter_map(|asn| asn.as_u64())
            .map(|asn| asn as u32)
            .collect();
        if let Some(country) = resolver.resolve_from_path(&as_path) {
            event.country_code = country;
            return;
        }
    }

    event.country_code = "XX".to_string();
}

fn spawn_stats_task(
    interval: Duration,
    stats: Arc<RadarStats>,
    update_rx: crossbeam_channel::Receiver<models::BgpUpdate>,
    clients: &MultiClient,
    shutdown: &broadcast::Sender<()>,
) -> tokio::task::JoinHandle<()> {
    let client_stats = clients.stats_handles();
    let mut shutdown = shutdown.subscribe();
    let capacity = update_rx.capacity().unwrap_or(0);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        let mut last_updates = 0u64;
        let mut last_time = Instant::now();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let updates = stats.updates_processed.load(Ordering::Relaxed);
                    let events = stats.events_detected.load(Ordering::Relaxed);
                    let elapsed = last_time.elapsed().as_secs_f64();
                    let rate = (updates - last_updates) as f64 / elapsed.max(0.001);
                    let clients = rislive::MultiClientStats::aggregate(&client_stats);

                    info!(
                        "STATS: updates={} ({:.0}/s), events={}, queue={}/{}, \
                         connected={}, parsed={}, dropped={}, reconnects={}",
                        updates,
                        rate,
                        events,
                        update_rx.len(),
                        capacity,
                        clients.connected,
                        clients.updates_parsed,
                        clients.updates_dropped,
                        clients.reconnects,
                    );

                    last_updates = updates;
                    last_time = Instant::now();
                }
                _ = shutdown.recv() => return,
            }
        }
    })
}

/// Block until SIGINT or SIGTERM. Failure to install a handler is fatal.
async fn wait_for_signal() -> Result<()> {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = sigterm.recv() => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use models::{EventCategory, EventType, Severity};
    use std::io::Write;

    fn resolver_from_csv(content: &str) -> CountryResolver {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        CountryResolver::File(FileResolver::load(file.path()).unwrap())
    }

    fn event(affected_asn: u32, details: serde_json::Value) -> BgpEvent {
        BgpEvent::new(
            EventType::Hijack,
            Severity::Medium,
            EventCategory::Attack,
            affected_asn,
            "1.2.3.0/24".to_string(),
            details,
        )
    }

    #[test]
    fn enrich_resolves_affected_asn_first() {
        let resolver = resolver_from_csv("13335,US\n");
        let mut event = event(13335, serde_json::json!({}));
        enrich_country(&mut event, &resolver);
        assert_eq!(event.country_code, "US");
    }

    #[test]
    fn enrich_falls_back_to_path() {
        let resolver = resolver_from_csv("3356,US\n");
        let mut event = event(64500, serde_json::json!({"as_path": [64496, 3356, 64500]}));
        enrich_country(&mut event, &resolver);
        assert_eq!(event.country_code, "US");
    }

    #[test]
    fn enrich_unknown_is_xx_never_gl() {
        let resolver = CountryResolver::Null;
        let mut event = event(64500, serde_json::json!({"as_path": [64496, 64500]}));
        enrich_country(&mut event, &resolver);
        assert_eq!(event.country_code, "XX");
        assert_ne!(event.country_code, "GL");
    }

    #[test]
    fn enrich_keeps_existing_country() {
        let resolver = resolver_from_csv("13335,US\n");
        let mut event = event(13335, serde_json::json!({}));
        event.country_code = "DE".to_string();
        enrich_country(&mut event, &resolver);
        assert_eq!(event.country_code, "DE");
    }
}
