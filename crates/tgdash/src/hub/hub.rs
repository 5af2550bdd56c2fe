//! Connection registry and fan-out.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use log::{debug, info, warn};
use tgdash_protocol::BroadcastEvent;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::frame::Frame;
use super::sink::{EventSink, SinkError};

/// How often keep-alive frames go out when not configured otherwise.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

struct Registration {
    serial: u64,
    sink: Arc<dyn EventSink>,
}

/// Outcome of writing one frame to every registered connection.
#[derive(Debug, Default)]
pub struct BroadcastReport {
    pub delivered: Vec<String>,
    pub failed: Vec<(String, SinkError)>,
}

impl BroadcastReport {
    pub fn delivered_count(&self) -> usize {
        self.delivered.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }
}

/// Registry of live push connections.
///
/// One entry per connection id. Writers never hold a registry lock while
/// writing: every fan-out works on a snapshot, so a connection that goes away
/// mid-broadcast just reports a failed write.
pub struct BroadcastHub {
    /// Connection ID -> current registration
    connections: DashMap<String, Registration>,

    /// Source of registration serials, used to tell a replaced connection
    /// apart from its successor under the same id.
    next_serial: AtomicU64,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_serial: AtomicU64::new(1),
        }
    }

    /// Greet a connection with the `connection_established` frame and register it.
    ///
    /// The greeting goes out before the connection becomes visible to
    /// broadcasts, so it is always the first frame on the stream. If it cannot
    /// be written nothing is registered and any existing connection under the
    /// same id stays in place. Otherwise an existing connection with the same
    /// id is replaced and the registration serial is returned; pass it to
    /// [`release`](Self::release) when the stream ends.
    pub fn connect(&self, connection_id: &str, sink: Arc<dyn EventSink>) -> Result<u64, SinkError> {
        if let Err(err) = sink.send(Frame::Established.encode()) {
            warn!("Failed to greet push connection {}: {}", connection_id, err);
            return Err(err);
        }

        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        let previous = self
            .connections
            .insert(connection_id.to_string(), Registration { serial, sink });
        if previous.is_some() {
            info!("Replaced push connection {}", connection_id);
        } else {
            info!("Registered push connection {}", connection_id);
        }

        Ok(serial)
    }

    /// Remove a connection. Unknown ids are ignored.
    pub fn disconnect(&self, connection_id: &str) -> bool {
        let removed = self.connections.remove(connection_id).is_some();
        if removed {
            info!("Unregistered push connection {}", connection_id);
        }
        removed
    }

    /// Remove a connection only if it is still the registration identified by `serial`.
    ///
    /// Used by the push endpoint on stream teardown so that a stream which was
    /// superseded by a reconnect under the same id does not evict its successor.
    pub fn release(&self, connection_id: &str, serial: u64) -> bool {
        let removed = self
            .connections
            .remove_if(connection_id, |_, reg| reg.serial == serial)
            .is_some();
        if removed {
            info!("Released push connection {}", connection_id);
        } else {
            debug!(
                "Push connection {} (serial {}) already replaced or removed",
                connection_id, serial
            );
        }
        removed
    }

    /// Send an event to every registered connection.
    ///
    /// Per-connection failures are logged and reported, never propagated, and
    /// the failing connection stays registered until its stream is torn down.
    pub fn broadcast(&self, event: &BroadcastEvent) -> BroadcastReport {
        let frame = match Frame::event(event) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("Failed to serialize {} event: {}", event.kind(), err);
                return BroadcastReport::default();
            }
        };
        let report = self.write_all(frame.encode());
        debug!(
            "Broadcast {} to {} connection(s), {} failed",
            event.kind(),
            report.delivered_count(),
            report.failed_count()
        );
        report
    }

    /// Send a keep-alive frame to every registered connection.
    pub fn heartbeat(&self) -> BroadcastReport {
        self.write_all(Frame::KeepAlive.encode())
    }

    fn write_all(&self, bytes: Bytes) -> BroadcastReport {
        let targets: Vec<(String, Arc<dyn EventSink>)> = self
            .connections
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().sink.clone()))
            .collect();

        let mut report = BroadcastReport::default();
        for (connection_id, sink) in targets {
            match sink.send(bytes.clone()) {
                Ok(()) => report.delivered.push(connection_id),
                Err(err) => {
                    warn!("Failed to write to push connection {}: {}", connection_id, err);
                    report.failed.push((connection_id, err));
                }
            }
        }
        report
    }

    /// Start the periodic keep-alive task. It stops when `shutdown` is cancelled.
    pub fn spawn_heartbeat(
        self: &Arc<Self>,
        period: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = hub.heartbeat();
                        if report.failed_count() > 0 {
                            debug!("Heartbeat failed for {} connection(s)", report.failed_count());
                        }
                    }
                }
            }
            debug!("Heartbeat task stopped");
        })
    }

    pub fn is_connected(&self, connection_id: &str) -> bool {
        self.connections.contains_key(connection_id)
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn connection_ids(&self) -> Vec<String> {
        self.connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicBool;
    use tgdash_protocol::{Chat, NormalizedMessage};

    /// In-memory sink that records frames and can be told to fail.
    #[derive(Default)]
    struct MemorySink {
        frames: Mutex<Vec<Bytes>>,
        failing: AtomicBool,
    }

    impl MemorySink {
        fn failing() -> Self {
            let sink = Self::default();
            sink.failing.store(true, Ordering::SeqCst);
            sink
        }

        fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        fn frames(&self) -> Vec<String> {
            self.frames
                .lock()
                .unwrap()
                .iter()
                .map(|b| String::from_utf8(b.to_vec()).unwrap())
                .collect()
        }

        fn data_frames(&self) -> Vec<String> {
            self.frames()
                .into_iter()
                .filter(|f| f.starts_with("data: "))
                .collect()
        }
    }

    impl EventSink for MemorySink {
        fn send(&self, frame: Bytes) -> Result<(), SinkError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(SinkError::Other("boom".to_string()));
            }
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }
    }

    fn sample_event() -> BroadcastEvent {
        BroadcastEvent::new_message("t1", NormalizedMessage::new(5, Chat::new(100), 1000))
    }

    #[test]
    fn test_connect_sends_greeting() {
        let hub = BroadcastHub::new();
        let sink = Arc::new(MemorySink::default());
        hub.connect("a", sink.clone()).unwrap();

        assert!(hub.is_connected("a"));
        assert_eq!(
            sink.frames(),
            vec!["event: connection_established\ndata: Connected\n\n".to_string()]
        );
    }

    #[test]
    fn test_failed_greeting_never_registers() {
        let hub = BroadcastHub::new();
        let err = hub.connect("a", Arc::new(MemorySink::failing())).unwrap_err();

        assert!(matches!(err, SinkError::Other(_)));
        assert!(!hub.is_connected("a"));
        assert_eq!(hub.connection_count(), 0);
    }

    #[test]
    fn test_failed_greeting_keeps_existing_connection() {
        let hub = BroadcastHub::new();
        let current = Arc::new(MemorySink::default());
        hub.connect("a", current.clone()).unwrap();

        let replacement = Arc::new(MemorySink::failing());
        assert!(hub.connect("a", replacement.clone()).is_err());
        assert!(hub.is_connected("a"));

        let report = hub.broadcast(&sample_event());
        assert_eq!(report.delivered, vec!["a".to_string()]);
        assert_eq!(current.data_frames().len(), 1);
        assert!(replacement.frames().is_empty());
    }

    #[test]
    fn test_greeting_precedes_any_data_frame() {
        let hub = BroadcastHub::new();
        let sink = Arc::new(MemorySink::default());
        hub.connect("a", sink.clone()).unwrap();
        hub.broadcast(&sample_event());

        let frames = sink.frames();
        assert_eq!(frames.len(), 2);
        assert!(frames[0].starts_with("event: connection_established"));
        assert!(frames[1].starts_with("data: "));
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let hub = BroadcastHub::new();
        hub.connect("a", Arc::new(MemorySink::default())).unwrap();

        assert!(hub.disconnect("a"));
        assert!(!hub.disconnect("a"));
        assert!(!hub.disconnect("never-seen"));
        assert_eq!(hub.connection_count(), 0);
    }

    #[test]
    fn test_membership_follows_last_operation_per_id() {
        let hub = BroadcastHub::new();
        let ops: [(&str, bool); 9] = [
            ("a", true),
            ("b", true),
            ("a", false),
            ("c", true),
            ("a", true),
            ("b", false),
            ("b", false),
            ("d", true),
            ("d", false),
        ];

        let mut expected: HashMap<&str, bool> = HashMap::new();
        for (id, connect) in ops {
            if connect {
                hub.connect(id, Arc::new(MemorySink::default())).unwrap();
            } else {
                hub.disconnect(id);
            }
            expected.insert(id, connect);
        }

        let live = expected.values().filter(|v| **v).count();
        assert_eq!(hub.connection_count(), live);
        let mut ids = hub.connection_ids();
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_broadcast_isolates_failing_connection() {
        let hub = BroadcastHub::new();
        let good: Vec<Arc<MemorySink>> = (0..3).map(|_| Arc::new(MemorySink::default())).collect();
        for (i, sink) in good.iter().enumerate() {
            hub.connect(&format!("good-{i}"), sink.clone()).unwrap();
        }
        let bad = Arc::new(MemorySink::default());
        hub.connect("bad", bad.clone()).unwrap();
        bad.set_failing(true);

        let report = hub.broadcast(&sample_event());

        assert_eq!(report.delivered_count(), 3);
        assert_eq!(report.failed_count(), 1);
        assert_eq!(report.failed[0].0, "bad");
        for sink in &good {
            assert_eq!(sink.data_frames().len(), 1);
        }
        // Failing connections are left for the transport to tear down.
        assert!(hub.is_connected("bad"));

        let again = hub.broadcast(&sample_event());
        assert_eq!(again.failed_count(), 1);
        assert_eq!(again.delivered_count(), 3);
    }

    #[test]
    fn test_reconnect_replaces_previous_sink() {
        let hub = BroadcastHub::new();
        let old = Arc::new(MemorySink::default());
        let new = Arc::new(MemorySink::default());

        let old_serial = hub.connect("tab", old.clone()).unwrap();
        hub.connect("tab", new.clone()).unwrap();
        assert_eq!(hub.connection_count(), 1);

        hub.broadcast(&sample_event());
        assert!(old.data_frames().is_empty());
        assert_eq!(new.data_frames().len(), 1);

        // The superseded stream ending must not evict its successor.
        assert!(!hub.release("tab", old_serial));
        assert!(hub.is_connected("tab"));
    }

    #[test]
    fn test_broadcast_frame_contents() {
        let hub = BroadcastHub::new();
        let sinks: Vec<Arc<MemorySink>> = (0..3).map(|_| Arc::new(MemorySink::default())).collect();
        for (i, sink) in sinks.iter().enumerate() {
            hub.connect(&i.to_string(), sink.clone()).unwrap();
        }

        let event = sample_event();
        hub.broadcast(&event);

        let expected = format!("data: {}\n\n", serde_json::to_string(&event).unwrap());
        for sink in &sinks {
            assert_eq!(sink.data_frames(), vec![expected.clone()]);
        }
    }

    #[test]
    fn test_heartbeat_reaches_all_connections() {
        let hub = BroadcastHub::new();
        let a = Arc::new(MemorySink::default());
        let b = Arc::new(MemorySink::default());
        hub.connect("a", a.clone()).unwrap();
        hub.connect("b", b.clone()).unwrap();
        b.set_failing(true);

        let report = hub.heartbeat();
        assert_eq!(report.delivered, vec!["a".to_string()]);
        assert_eq!(a.frames().last().unwrap(), ": keepalive\n\n");
    }

    #[test]
    fn test_broadcast_without_connections() {
        let hub = BroadcastHub::new();
        let report = hub.broadcast(&sample_event());
        assert_eq!(report.delivered_count(), 0);
        assert_eq!(report.failed_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_task_ticks_and_stops() {
        let hub = Arc::new(BroadcastHub::new());
        let sink = Arc::new(MemorySink::default());
        hub.connect("a", sink.clone()).unwrap();

        let shutdown = CancellationToken::new();
        let handle = hub.spawn_heartbeat(Duration::from_secs(20), shutdown.clone());

        tokio::time::sleep(Duration::from_secs(19)).await;
        assert_eq!(sink.frames().len(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(sink.frames().len(), 2);
        assert_eq!(sink.frames()[1], ": keepalive\n\n");

        shutdown.cancel();
        handle.await.unwrap();
    }
}
