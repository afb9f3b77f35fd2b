//! Throttled state fan-out.
//!
//! The broadcaster subscribes to the event bus and, for every event,
//! forwards one `activity:log` line immediately and schedules a
//! `state:full` snapshot. Snapshots are throttled to one per quiet
//! window: the first event in a window emits at the leading edge, and any
//! further events coalesce into a single trailing delivery when the
//! window closes. Snapshot composition happens through [`SnapshotSource`]
//! so the owners copy state out under brief locks, never while encoding
//! or sending.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::event_bus::{EventBus, Published};
use crate::protocol::{ServerMessage, StateSnapshot};

/// Minimum gap between two `state:full` deliveries.
pub const SNAPSHOT_MIN_INTERVAL: Duration = Duration::from_millis(300);

/// Per-client buffered messages before deliveries are shed.
const CLIENT_BUFFER: usize = 64;

/// Composes a full snapshot of observable state.
///
/// Implementations take their mutexes briefly, copy plain data out, and
/// release before returning.
pub trait SnapshotSource: Send + Sync {
    fn snapshot(&self) -> StateSnapshot;
}

/// Fan-out of [`ServerMessage`]s to connected clients.
#[derive(Clone)]
pub struct Broadcaster {
    clients: Arc<Mutex<Vec<flume::Sender<Arc<ServerMessage>>>>>,
    min_interval: Duration,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::with_interval(SNAPSHOT_MIN_INTERVAL)
    }

    /// Override the throttle window (tests use a short one).
    pub fn with_interval(min_interval: Duration) -> Self {
        Self {
            clients: Arc::new(Mutex::new(Vec::new())),
            min_interval,
        }
    }

    /// Register a client; it receives `state:full` and `activity:log`
    /// messages until its receiver is dropped.
    pub fn subscribe(&self) -> flume::Receiver<Arc<ServerMessage>> {
        let (tx, rx) = flume::bounded(CLIENT_BUFFER);
        self.clients.lock().expect("Broadcaster lock poisoned").push(tx);
        rx
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().expect("Broadcaster lock poisoned").len()
    }

    fn deliver(&self, msg: ServerMessage) {
        let msg = Arc::new(msg);
        let mut clients = self.clients.lock().expect("Broadcaster lock poisoned");
        clients.retain(|tx| match tx.try_send(Arc::clone(&msg)) {
            Ok(()) => true,
            Err(flume::TrySendError::Full(_)) => {
                debug!("slow client, message dropped");
                true
            }
            Err(flume::TrySendError::Disconnected(_)) => false,
        });
    }

    fn emit_snapshot(&self, source: &Arc<dyn SnapshotSource>) {
        let snapshot = source.snapshot();
        self.deliver(ServerMessage::StateFull(snapshot));
    }

    /// Drive the broadcaster off the bus until the bus is dropped.
    ///
    /// The caller spawns this onto the runtime; it never blocks the
    /// publisher side.
    pub async fn run(self, bus: EventBus, source: Arc<dyn SnapshotSource>) {
        let events = bus.subscribe();
        let mut last_emit: Option<Instant> = None;
        let mut pending = false;

        loop {
            if pending {
                let since_last = last_emit.map(|t| t.elapsed());
                let due = match since_last {
                    Some(elapsed) if elapsed < self.min_interval => {
                        Some(self.min_interval - elapsed)
                    }
                    _ => None,
                };

                match due {
                    // quiet window expired (or first emit): leading edge
                    None => {
                        self.emit_snapshot(&source);
                        last_emit = Some(Instant::now());
                        pending = false;
                    }
                    // inside the quiet window: coalesce until it closes
                    Some(wait) => {
                        tokio::select! {
                            _ = tokio::time::sleep(wait) => {
                                self.emit_snapshot(&source);
                                last_emit = Some(Instant::now());
                                pending = false;
                            }
                            received = events.recv_async() => match received {
                                Ok(published) => {
                                    self.deliver(ServerMessage::ActivityLog(
                                        published.entry.clone(),
                                    ));
                                }
                                Err(_) => {
                                    // bus gone: flush the trailing snapshot
                                    self.emit_snapshot(&source);
                                    return;
                                }
                            },
                        }
                    }
                }
            } else {
                match events.recv_async().await {
                    Ok(published) => {
                        self.deliver(ServerMessage::ActivityLog(published.entry.clone()));
                        pending = true;
                    }
                    Err(_) => return,
                }
            }
        }
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::BusEvent;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
    }

    impl CountingSource {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl SnapshotSource for CountingSource {
        fn snapshot(&self) -> StateSnapshot {
            self.calls.fetch_add(1, Ordering::SeqCst);
            StateSnapshot::default()
        }
    }

    fn event(n: u32) -> BusEvent {
        BusEvent::TaskCreated {
            task_id: format!("TASK-{:03}", n),
            title: "t".into(),
        }
    }

    fn drain(rx: &flume::Receiver<Arc<ServerMessage>>) -> (usize, usize) {
        let mut snapshots = 0;
        let mut activity = 0;
        while let Ok(msg) = rx.try_recv() {
            match &*msg {
                ServerMessage::StateFull(_) => snapshots += 1,
                ServerMessage::ActivityLog(_) => activity += 1,
            }
        }
        (snapshots, activity)
    }

    #[tokio::test]
    async fn burst_coalesces_to_two_snapshots() {
        let bus = EventBus::new();
        let source = CountingSource::new();
        let broadcaster = Broadcaster::with_interval(Duration::from_millis(80));
        let rx = broadcaster.subscribe();

        let runner = tokio::spawn(
            broadcaster
                .clone()
                .run(bus.clone(), source.clone() as Arc<dyn SnapshotSource>),
        );

        // a burst well inside one throttle window
        for i in 0..10 {
            bus.publish(event(i));
        }
        tokio::time::sleep(Duration::from_millis(250)).await;

        let (snapshots, activity) = drain(&rx);
        assert!(
            (1..=2).contains(&snapshots),
            "expected leading + at most one trailing snapshot, got {snapshots}"
        );
        assert_eq!(activity, 10, "every event forwards one activity line");

        drop(bus);
        let _ = runner.await;
    }

    #[tokio::test]
    async fn spaced_events_each_get_a_snapshot() {
        let bus = EventBus::new();
        let source = CountingSource::new();
        let broadcaster = Broadcaster::with_interval(Duration::from_millis(30));
        let rx = broadcaster.subscribe();

        let runner = tokio::spawn(
            broadcaster
                .clone()
                .run(bus.clone(), source.clone() as Arc<dyn SnapshotSource>),
        );

        for i in 0..3 {
            bus.publish(event(i));
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let (snapshots, activity) = drain(&rx);
        assert_eq!(activity, 3);
        assert!(snapshots >= 3, "spaced events emit individually, got {snapshots}");

        drop(bus);
        let _ = runner.await;
    }

    #[tokio::test]
    async fn no_events_no_snapshots() {
        let bus = EventBus::new();
        let source = CountingSource::new();
        let broadcaster = Broadcaster::with_interval(Duration::from_millis(20));
        let rx = broadcaster.subscribe();

        let runner = tokio::spawn(
            broadcaster
                .clone()
                .run(bus.clone(), source.clone() as Arc<dyn SnapshotSource>),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (snapshots, activity) = drain(&rx);
        assert_eq!(snapshots, 0);
        assert_eq!(activity, 0);
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);

        drop(bus);
        let _ = runner.await;
    }

    #[test]
    fn dropped_clients_pruned() {
        let broadcaster = Broadcaster::new();
        let rx = broadcaster.subscribe();
        assert_eq!(broadcaster.client_count(), 1);
        drop(rx);
        broadcaster.deliver(ServerMessage::StateFull(StateSnapshot::default()));
        assert_eq!(broadcaster.client_count(), 0);
    }
}
