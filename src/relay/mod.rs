//! RelayPool (C3) — a fixed set of relay WebSocket connections, with
//! heartbeat/sleep-detection, a failure watchdog that triggers a full
//! pool reset, and scatter/gather publish.
//!
//! Grounded on engine/nostr/relay.rs's single-relay `run_relay_loop`
//! (tokio-tungstenite connect + read/select loop + dedup set), generalized
//! to N relays each status-tracked, with engine/http.rs's reconnect-delay
//! shape (exponential backoff + jitter) reused for reconnects.

use crate::atoms::constants::{
    IO_TIMEOUT_SECS, RECONNECT_BASE_MS, RECONNECT_MAX_ATTEMPTS, RECONNECT_MAX_MS,
    RELAY_HEARTBEAT_SECS, RELAY_SLEEP_DETECT_MULTIPLIER, RELAY_WATCHDOG_COOLDOWN_SECS,
    RELAY_WATCHDOG_FAILURE_THRESHOLD,
};
use crate::atoms::error::{SignetError, SignetResult};
use crate::codec::NostrEvent;
use crate::events::{EventBus, SignetEvent};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayConnState {
    Connecting,
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RelayStatus {
    pub url: String,
    pub state: RelayConnState,
    pub last_connected: Option<chrono::DateTime<chrono::Utc>>,
    pub last_disconnected: Option<chrono::DateTime<chrono::Utc>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IncomingEvent {
    pub relay_url: String,
    pub event: NostrEvent,
    pub subscription_id: String,
}

struct RelayHandle {
    status: Mutex<RelayStatus>,
    outgoing: mpsc::UnboundedSender<String>,
    stop: Arc<AtomicBool>,
}

pub struct RelayPool {
    relays: Mutex<HashMap<String, Arc<RelayHandle>>>,
    subscriptions: Mutex<HashMap<String, Value>>,
    incoming_tx: broadcast::Sender<IncomingEvent>,
    acks: Mutex<HashMap<String, broadcast::Sender<bool>>>,
    bus: Arc<EventBus>,
    consecutive_failures: AtomicU32,
    last_reset: Mutex<Option<chrono::DateTime<chrono::Utc>>>,
    configured_relays: Vec<String>,
}

impl RelayPool {
    pub fn new(relay_urls: Vec<String>, bus: Arc<EventBus>) -> Arc<Self> {
        let pool = Arc::new(RelayPool {
            relays: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            incoming_tx: broadcast::channel(1024).0,
            acks: Mutex::new(HashMap::new()),
            bus,
            consecutive_failures: AtomicU32::new(0),
            last_reset: Mutex::new(None),
            configured_relays: relay_urls.clone(),
        });
        for url in relay_urls {
            pool.clone().spawn_relay(url);
        }
        pool.clone().spawn_heartbeat();
        pool
    }

    /// Drops every connection task and spawns fresh ones over the same
    /// configured relay set. Subscriptions are replayed automatically by
    /// `run_connection` on reconnect, from `self.subscriptions` — callers
    /// that also track bookkeeping outside the pool (`SubscriptionManager`'s
    /// per-app subs) still need to call their own rebuild afterward, since
    /// `self.subscriptions` only holds what was last registered via
    /// `subscribe`, not what a caller intends to re-derive.
    pub fn reset(self: &Arc<Self>) {
        let old: Vec<Arc<RelayHandle>> = self.relays.lock().drain().map(|(_, h)| h).collect();
        for handle in &old {
            handle.stop.store(true, Ordering::Relaxed);
        }
        for url in self.configured_relays.clone() {
            self.clone().spawn_relay(url);
        }
    }

    pub fn incoming(&self) -> broadcast::Receiver<IncomingEvent> {
        self.incoming_tx.subscribe()
    }

    pub fn statuses(&self) -> Vec<RelayStatus> {
        self.relays.lock().values().map(|h| h.status.lock().clone()).collect()
    }

    fn spawn_relay(self: Arc<Self>, url: String) {
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let handle = Arc::new(RelayHandle {
            status: Mutex::new(RelayStatus {
                url: url.clone(),
                state: RelayConnState::Disconnected,
                last_connected: None,
                last_disconnected: None,
                last_error: None,
            }),
            outgoing: tx,
            stop: stop.clone(),
        });
        self.relays.lock().insert(url.clone(), handle.clone());

        tokio::spawn(async move {
            let mut attempt: u32 = 0;
            loop {
                if stop.load(Ordering::Relaxed) {
                    break;
                }
                handle.status.lock().state = RelayConnState::Connecting;
                match self.run_connection(&url, &handle, &mut rx).await {
                    Ok(()) => {
                        attempt = 0;
                        self.consecutive_failures.store(0, Ordering::Relaxed);
                    }
                    Err(e) => {
                        warn!("relay {url} error: {e}");
                        handle.status.lock().last_error = Some(e.to_string());
                        self.note_failure();
                    }
                }
                {
                    let mut status = handle.status.lock();
                    status.state = RelayConnState::Disconnected;
                    status.last_disconnected = Some(chrono::Utc::now());
                }
                if stop.load(Ordering::Relaxed) || attempt >= RECONNECT_MAX_ATTEMPTS {
                    break;
                }
                let delay = backoff_delay(attempt);
                debug!("relay {url} reconnecting in {delay:?} (attempt {attempt})");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        });
    }

    async fn run_connection(
        &self,
        url: &str,
        handle: &Arc<RelayHandle>,
        outgoing_rx: &mut mpsc::UnboundedReceiver<String>,
    ) -> SignetResult<()> {
        let (ws, _) = tokio::time::timeout(Duration::from_secs(IO_TIMEOUT_SECS), connect_async(url))
            .await
            .map_err(|_| SignetError::SocketTimeout)?
            .map_err(|e| SignetError::RelayUnreachable(e.to_string()))?;
        let (mut ws_tx, mut ws_rx) = ws.split();

        {
            let mut status = handle.status.lock();
            status.state = RelayConnState::Connected;
            status.last_connected = Some(chrono::Utc::now());
            status.last_error = None;
        }
        info!("connected to relay {url}");

        for (sub_id, filter) in self.subscriptions.lock().clone() {
            let req = json!(["REQ", sub_id, filter]).to_string();
            let _ = ws_tx.send(WsMessage::Text(req)).await;
        }

        // Polled alongside the socket so an externally-requested `reset`
        // closes this connection promptly instead of waiting for the next
        // inbound/outbound message to notice the stop flag.
        let mut stop_check = tokio::time::interval(Duration::from_millis(500));
        loop {
            tokio::select! {
                _ = stop_check.tick() => {
                    if handle.stop.load(Ordering::Relaxed) {
                        break;
                    }
                }
                outgoing = outgoing_rx.recv() => {
                    match outgoing {
                        Some(msg) => { ws_tx.send(WsMessage::Text(msg)).await.map_err(|e| SignetError::RelayUnreachable(e.to_string()))?; }
                        None => break,
                    }
                }
                incoming = ws_rx.next() => {
                    match incoming {
                        Some(Ok(WsMessage::Text(text))) => self.handle_relay_message(url, &text),
                        Some(Ok(WsMessage::Close(_))) | None => break,
                        Some(Err(e)) => return Err(SignetError::RelayUnreachable(e.to_string())),
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }

    fn handle_relay_message(&self, relay_url: &str, text: &str) {
        let arr: Vec<Value> = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(_) => return,
        };
        let Some(msg_type) = arr.first().and_then(|v| v.as_str()) else { return };
        match msg_type {
            "EVENT" => {
                let (Some(sub_id), Some(raw_event)) = (arr.get(1).and_then(|v| v.as_str()), arr.get(2)) else {
                    return;
                };
                if let Ok(event) = serde_json::from_value::<NostrEvent>(raw_event.clone()) {
                    let _ = self.incoming_tx.send(IncomingEvent {
                        relay_url: relay_url.to_string(),
                        event,
                        subscription_id: sub_id.to_string(),
                    });
                }
            }
            "EOSE" => {
                if let Some(handle) = self.relays.lock().get(relay_url) {
                    handle.status.lock().state = RelayConnState::Connected;
                }
            }
            "OK" => {
                let event_id = arr.get(1).and_then(|v| v.as_str()).unwrap_or_default();
                let accepted = arr.get(2).and_then(|v| v.as_bool()).unwrap_or(false);
                if let Some(tx) = self.acks.lock().get(event_id) {
                    let _ = tx.send(accepted);
                }
            }
            "NOTICE" => {
                let notice = arr.get(1).and_then(|v| v.as_str()).unwrap_or_default();
                warn!("NOTICE from {relay_url}: {notice}");
            }
            _ => {}
        }
    }

    /// Registers a subscription filter and sends `REQ` to every connected
    /// relay. Re-sent verbatim to newly (re)connected relays too, since
    /// `run_connection` replays `self.subscriptions` on connect.
    pub fn subscribe(&self, sub_id: &str, filter: Value) {
        self.subscriptions.lock().insert(sub_id.to_string(), filter.clone());
        let req = json!(["REQ", sub_id, filter]).to_string();
        self.broadcast_raw(&req);
    }

    pub fn unsubscribe(&self, sub_id: &str) {
        self.subscriptions.lock().remove(sub_id);
        let req = json!(["CLOSE", sub_id]).to_string();
        self.broadcast_raw(&req);
    }

    fn broadcast_raw(&self, msg: &str) {
        for handle in self.relays.lock().values() {
            let _ = handle.outgoing.send(msg.to_string());
        }
    }

    /// Scatter/gather publish: resolves as soon as any relay acks `OK`,
    /// or after the io timeout with zero acks (§4.3/§4.6).
    pub async fn publish(&self, event: &NostrEvent) -> SignetResult<usize> {
        let (tx, mut rx) = broadcast::channel(8);
        self.acks.lock().insert(event.id.clone(), tx);
        let msg = json!(["EVENT", event]).to_string();
        let relay_count = self.relays.lock().len();
        self.broadcast_raw(&msg);

        let mut acked = 0;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(IO_TIMEOUT_SECS);
        loop {
            if acked > 0 || relay_count == 0 {
                break;
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, rx.recv()).await {
                Ok(Ok(true)) => acked += 1,
                Ok(Ok(false)) => {}
                _ => break,
            }
        }
        self.acks.lock().remove(&event.id);
        if acked == 0 {
            return Err(SignetError::PublishNoAck);
        }
        Ok(acked)
    }

    fn note_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= RELAY_WATCHDOG_FAILURE_THRESHOLD {
            let mut last_reset = self.last_reset.lock();
            let cooled_down = last_reset
                .map(|t| (chrono::Utc::now() - t).num_seconds() >= RELAY_WATCHDOG_COOLDOWN_SECS)
                .unwrap_or(true);
            if cooled_down {
                *last_reset = Some(chrono::Utc::now());
                self.consecutive_failures.store(0, Ordering::Relaxed);
                self.bus.publish(SignetEvent::PoolReset);
            }
        }
    }

    /// Heartbeat: detects the process having been asleep (wall-clock gap
    /// far exceeding the tick interval) and emits `sleep-detected`.
    fn spawn_heartbeat(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut last_tick = tokio::time::Instant::now();
            let mut interval = tokio::time::interval(Duration::from_secs(RELAY_HEARTBEAT_SECS));
            loop {
                interval.tick().await;
                let elapsed = last_tick.elapsed();
                last_tick = tokio::time::Instant::now();
                if elapsed > Duration::from_secs(RELAY_HEARTBEAT_SECS * RELAY_SLEEP_DETECT_MULTIPLIER) {
                    self.bus.publish(SignetEvent::SleepDetected);
                    self.bus.publish(SignetEvent::PoolReset);
                }
            }
        });
    }
}

/// Shared by the kill switch's admin-DM listener, which reconnects to its
/// own (possibly disjoint) relay set with the same backoff shape.
pub(crate) fn backoff_delay(attempt: u32) -> Duration {
    let base = RECONNECT_BASE_MS.saturating_mul(2u64.saturating_pow(attempt.min(8)));
    let capped = base.min(RECONNECT_MAX_MS);
    let jitter_range = capped / 4;
    let jitter = if jitter_range == 0 {
        0
    } else {
        (rand_core::OsRng.next_u32() as u64) % (2 * jitter_range + 1)
    };
    let jittered = capped.saturating_sub(jitter_range).saturating_add(jitter);
    Duration::from_millis(jittered.max(100))
}

use rand_core::RngCore;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_delay_is_capped() {
        for attempt in 0..20 {
            let d = backoff_delay(attempt);
            assert!(d.as_millis() as u64 <= RECONNECT_MAX_MS + RECONNECT_MAX_MS / 4);
        }
    }

    #[tokio::test]
    async fn pool_with_no_relays_starts_empty() {
        let bus = Arc::new(EventBus::new());
        let pool = RelayPool::new(vec![], bus);
        assert!(pool.statuses().is_empty());
    }

    #[tokio::test]
    async fn publish_with_zero_relays_fails_no_ack() {
        let bus = Arc::new(EventBus::new());
        let pool = RelayPool::new(vec![], bus);
        let event = crate::codec::event::sign_event(
            &k256::schnorr::SigningKey::random(&mut rand_core::OsRng),
            &"a".repeat(64),
            1,
            vec![],
            "hi".into(),
        )
        .unwrap();
        let err = pool.publish(&event).await.unwrap_err();
        assert!(matches!(err, SignetError::PublishNoAck));
    }
}
