//! Reconnecting WebSocket client for the RIS Live feed.
//!
//! One [`RisClient`] per collector, all pushing into a shared bounded
//! update queue. The queue offer is non-blocking: when the queue is full
//! the update is dropped at the producer and counted, because the feed is
//! unreplayable and stalling the socket only trades drops for disconnects.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::Sender;
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::parser::parse_message;
use crate::models::BgpUpdate;

/// WebSocket endpoint for RIS Live.
pub const RIS_LIVE_URL: &str = "wss://ris-live.ripe.net/v1/ws/";

const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(5);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(300);
const PING_INTERVAL: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-client counters, shared with the stats task.
#[derive(Debug, Default)]
pub struct ClientStats {
    pub messages_received: AtomicU64,
    pub updates_parsed: AtomicU64,
    pub updates_dropped: AtomicU64,
    pub errors: AtomicU64,
    pub reconnects: AtomicU64,
    pub connected: AtomicBool,
}

/// Why a connection stopped streaming.
enum StreamEnd {
    /// The server closed the connection cleanly.
    Closed,
    /// Shutdown was signalled; do not reconnect.
    Shutdown,
}

/// A RIS Live client bound to a single collector.
pub struct RisClient {
    collector: String,
    updates: Sender<BgpUpdate>,
    stats: Arc<ClientStats>,
}

impl RisClient {
    pub fn new(collector: String, updates: Sender<BgpUpdate>) -> Self {
        Self {
            collector,
            updates,
            stats: Arc::new(ClientStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<ClientStats> {
        self.stats.clone()
    }

    /// Connection loop: dial, subscribe, stream until the connection dies
    /// or shutdown is signalled, then back off and retry. The back-off
    /// escalates across connections and is never reset mid-loop, so a
    /// long-stable client that drops briefly resumes at its escalated
    /// delay.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let mut reconnect_delay = INITIAL_RECONNECT_DELAY;

        loop {
            match self.connect_and_stream(&mut shutdown).await {
                Ok(StreamEnd::Shutdown) => {
                    self.stats.connected.store(false, Ordering::Relaxed);
                    info!("[{}] client stopped", self.collector);
                    return;
                }
                Ok(StreamEnd::Closed) => {
                    debug!("[{}] connection closed", self.collector);
                }
                Err(e) => {
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "[{}] connection error: {:#}, reconnecting in {:?}",
                        self.collector, e, reconnect_delay
                    );
                }
            }
            self.stats.connected.store(false, Ordering::Relaxed);

            tokio::select! {
                _ = shutdown.recv() => {
                    info!("[{}] client stopped", self.collector);
                    return;
                }
                _ = tokio::time::sleep(reconnect_delay) => {
                    reconnect_delay = (reconnect_delay * 2).min(MAX_RECONNECT_DELAY);
                }
            }
        }
    }

    async fn connect_and_stream(
        &self,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<StreamEnd> {
        info!("[{}] connecting to RIS Live...", self.collector);

        let (socket, _response) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(RIS_LIVE_URL))
            .await
            .map_err(|_| anyhow!("handshake timed out"))?
            .context("dial failed")?;

        let (mut write, mut read) = socket.split();

        let subscribe = serde_json::json!({
            "type": "ris_subscribe",
            "data": {
                "type": "UPDATE",
                "host": self.collector,
            },
        });
        tokio::time::timeout(WRITE_TIMEOUT, write.send(Message::Text(subscribe.to_string().into())))
            .await
            .map_err(|_| anyhow!("subscribe timed out"))?
            .context("subscribe failed")?;

        self.stats.connected.store(true, Ordering::Relaxed);
        info!("[{}] connected and subscribed", self.collector);

        // Keepalive task owns the write half; the oneshot drops when the
        // read loop exits, which unparks and ends the pinger.
        let (ping_done_tx, mut ping_done_rx) = oneshot::channel::<()>();
        let mut ping_shutdown = shutdown.resubscribe();
        let ping_collector = self.collector.clone();
        let pinger = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PING_INTERVAL);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let ping = write.send(Message::Ping(Vec::new().into()));
                        match tokio::time::timeout(WRITE_TIMEOUT, ping).await {
                            Ok(Ok(())) => {}
                            _ => {
                                debug!("[{}] ping failed, letting read loop notice", ping_collector);
                                break;
                            }
                        }
                    }
                    _ = &mut ping_done_rx => break,
                    _ = ping_shutdown.recv() => {
                        // Best-effort close so the server sees a clean exit
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        });

        let result = self.read_loop(&mut read, shutdown).await;

        drop(ping_done_tx);
        let _ = pinger.await;
        self.stats.connected.store(false, Ordering::Relaxed);

        result
    }

    async fn read_loop<S>(
        &self,
        read: &mut S,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<StreamEnd>
    where
        S: Stream<Item = tokio_tungstenite::tungstenite::Result<Message>> + Unpin,
    {
        loop {
            tokio::select! {
                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => self.handle_frame(text.as_str()),
                        // Binary frames and ping/pong control traffic are ignored
                        Some(Ok(Message::Close(_))) | None => return Ok(StreamEnd::Closed),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e).context("read failed"),
                    }
                }
                _ = shutdown.recv() => return Ok(StreamEnd::Shutdown),
            }
        }
    }

    fn handle_frame(&self, frame: &str) {
        let received = self.stats.messages_received.fetch_add(1, Ordering::Relaxed) + 1;

        if received <= 3 {
            let preview: String = frame.chars().take(200).collect();
            debug!("[{}] raw message: {}", self.collector, preview);
        }

        match parse_message(frame, &self.collector) {
            Ok(Some(update)) => {
                self.stats.updates_parsed.fetch_add(1, Ordering::Relaxed);
                if self.updates.try_send(update).is_err() {
                    let dropped = self.stats.updates_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    if dropped % 10_000 == 1 {
                        warn!(
                            "[{}] update queue full, dropped {} updates",
                            self.collector, dropped
                        );
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                if received <= 10 {
                    debug!("[{}] parse error: {}", self.collector, e);
                }
            }
        }
    }
}

/// Aggregated snapshot of all client counters.
#[derive(Debug, Default, Clone)]
pub struct MultiClientStats {
    pub messages_received: u64,
    pub updates_parsed: u64,
    pub updates_dropped: u64,
    pub errors: u64,
    pub reconnects: u64,
    pub connected: usize,
}

/// Fan-in of one client per collector into the shared update queue.
pub struct MultiClient {
    collectors: Vec<String>,
    stats: Vec<Arc<ClientStats>>,
    handles: Vec<JoinHandle<()>>,
}

impl MultiClient {
    /// Spawn one client task per collector. Each client owns a clone of
    /// the queue sender; the queue disconnects once every client exits
    /// and the caller drops its own sender.
    pub fn start(
        collectors: &[String],
        updates: &Sender<BgpUpdate>,
        shutdown: &broadcast::Sender<()>,
    ) -> Self {
        let mut stats = Vec::with_capacity(collectors.len());
        let mut handles = Vec::with_capacity(collectors.len());

        for collector in collectors {
            let client = RisClient::new(collector.clone(), updates.clone());
            stats.push(client.stats());
            handles.push(tokio::spawn(client.run(shutdown.subscribe())));
        }

        info!("started {} collector clients", collectors.len());

        Self {
            collectors: collectors.to_vec(),
            stats,
            handles,
        }
    }

    pub fn collectors(&self) -> &[String] {
        &self.collectors
    }

    /// Wait for every client task to exit after shutdown was signalled.
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("all collector clients stopped");
    }

    pub fn stats(&self) -> MultiClientStats {
        MultiClientStats::aggregate(&self.stats)
    }

    /// Shared counter handles, for the stats task to sample after this
    /// struct has been handed off for joining.
    pub fn stats_handles(&self) -> Vec<Arc<ClientStats>> {
        self.stats.clone()
    }
}

impl MultiClientStats {
    pub fn aggregate(stats: &[Arc<ClientStats>]) -> MultiClientStats {
        let mut total = MultiClientStats::default();
        for stats in stats {
            total.messages_received += stats.messages_received.load(Ordering::Relaxed);
            total.updates_parsed += stats.updates_parsed.load(Ordering::Relaxed);
            total.updates_dropped += stats.updates_dropped.load(Ordering::Relaxed);
            total.errors += stats.errors.load(Ordering::Relaxed);
            total.reconnects += stats.reconnects.load(Ordering::Relaxed);
            if stats.connected.load(Ordering::Relaxed) {
                total.connected += 1;
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let mut delay = INITIAL_RECONNECT_DELAY;
        let mut seen = Vec::new();
        for _ in 0..8 {
            seen.push(delay);
            delay = (delay * 2).min(MAX_RECONNECT_DELAY);
        }
        assert_eq!(seen[0], Duration::from_secs(5));
        assert_eq!(seen[1], Duration::from_secs(10));
        assert_eq!(seen[5], Duration::from_secs(160));
        // Capped at five minutes from the seventh attempt on
        assert_eq!(seen[7], Duration::from_secs(300));
    }

    #[test]
    fn full_queue_drops_at_producer() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let client = RisClient::new("rrc00".to_string(), tx);

        let frame = r#"{
            "type": "ris_message",
            "data": {
                "timestamp": 1.0,
                "peer_asn": 1,
                "path": [1, 2],
                "announcements": [{"prefixes": ["10.0.0.0/8"]}]
            }
        }"#;

        client.handle_frame(frame);
        client.handle_frame(frame);

        let stats = client.stats();
        assert_eq!(stats.updates_parsed.load(Ordering::Relaxed), 2);
        assert_eq!(stats.updates_dropped.load(Ordering::Relaxed), 1);
        assert_eq!(rx.len(), 1);
    }

    #[test]
    fn control_frames_count_as_messages_not_updates() {
        let (tx, _rx) = crossbeam_channel::bounded(8);
        let client = RisClient::new("rrc00".to_string(), tx);

        client.handle_frame(r#"{"type": "ris_subscribe_ok", "data": {}}"#);
        client.handle_frame("not json at all");

        let stats = client.stats();
        assert_eq!(stats.messages_received.load(Ordering::Relaxed), 2);
        assert_eq!(stats.updates_parsed.load(Ordering::Relaxed), 0);
        assert_eq!(stats.errors.load(Ordering::Relaxed), 1);
    }
}
