//! Lifecycle events: append-only log plus observer dispatch
//!
//! Two orthogonal facilities, both best-effort:
//!
//! - [`EventLog`]: thread-safe, append-only, with monotonic ids and
//!   timestamps relative to run start. Useful for audit and tests.
//! - [`EventBus`]: wraps the log and fans events out to registered
//!   [`Observer`]s. Observer failures are logged and swallowed; each
//!   observer call is bounded by a soft deadline so a slow observer cannot
//!   stall node execution indefinitely.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ErrorKind;

/// Upper bound on a single observer invocation
const OBSERVER_SOFT_DEADLINE: Duration = Duration::from_secs(1);

/// Single event in the run's lifecycle log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence id, for ordering
    pub id: u64,
    /// Time since run start (ms)
    pub timestamp_ms: u64,
    pub kind: EventKind,
}

/// All lifecycle event types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    RunStart {
        run_id: String,
        node_count: usize,
    },
    RunEnd {
        run_id: String,
        success: bool,
        duration_ms: u64,
    },
    NodeStart {
        node_id: String,
        /// True when the result is about to be served from cache
        cached: bool,
    },
    NodeEnd {
        node_id: String,
        cached: bool,
        duration_ms: u64,
        attempts: u32,
    },
    NodeError {
        node_id: String,
        error: String,
        error_kind: ErrorKind,
        duration_ms: u64,
    },
    SchemaWarning {
        node_id: String,
        placeholder: String,
        expected: String,
        found: String,
    },
    CacheHit {
        node_id: String,
        fingerprint: String,
    },
}

impl EventKind {
    /// Extract the node id for node-scoped events.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::NodeStart { node_id, .. }
            | Self::NodeEnd { node_id, .. }
            | Self::NodeError { node_id, .. }
            | Self::SchemaWarning { node_id, .. }
            | Self::CacheHit { node_id, .. } => Some(node_id),
            Self::RunStart { .. } | Self::RunEnd { .. } => None,
        }
    }

    pub fn is_run_event(&self) -> bool {
        matches!(self, Self::RunStart { .. } | Self::RunEnd { .. })
    }
}

/// Thread-safe, append-only event log
#[derive(Clone)]
pub struct EventLog {
    events: Arc<RwLock<Vec<Event>>>,
    start_time: Instant,
    next_id: Arc<AtomicU64>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            start_time: Instant::now(),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Append an event and return the stored envelope.
    pub fn append(&self, kind: EventKind) -> Event {
        let event = Event {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            timestamp_ms: self.start_time.elapsed().as_millis() as u64,
            kind,
        };
        self.events.write().push(event.clone());
        event
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    /// Events scoped to one node.
    pub fn for_node(&self, node_id: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.kind.node_id() == Some(node_id))
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self.events()).unwrap_or(serde_json::Value::Null)
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog").field("len", &self.len()).finish()
    }
}

/// Callback interface for lifecycle events.
///
/// Observers may suspend; the bus awaits each call but bounds it with a
/// soft deadline. Returning an error never affects the run.
#[async_trait]
pub trait Observer: Send + Sync {
    async fn on_event(&self, event: &Event) -> anyhow::Result<()>;
}

/// Event log plus observer fan-out
#[derive(Clone)]
pub struct EventBus {
    log: EventLog,
    observers: Arc<Vec<Arc<dyn Observer>>>,
}

impl EventBus {
    pub fn new(observers: Vec<Arc<dyn Observer>>) -> Self {
        EventBus {
            log: EventLog::new(),
            observers: Arc::new(observers),
        }
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// Record an event and dispatch it to every observer.
    pub async fn emit(&self, kind: EventKind) {
        let event = self.log.append(kind);
        for observer in self.observers.iter() {
            match tokio::time::timeout(OBSERVER_SOFT_DEADLINE, observer.on_event(&event)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(event_id = event.id, error = %err, "observer failed; continuing");
                }
                Err(_) => {
                    warn!(event_id = event.id, "observer exceeded soft deadline; continuing");
                }
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new(Vec::new())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("events", &self.log.len())
            .field("observers", &self.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[test]
    fn append_returns_monotonic_ids() {
        let log = EventLog::new();
        let a = log.append(EventKind::RunStart {
            run_id: "r".into(),
            node_count: 2,
        });
        let b = log.append(EventKind::NodeStart {
            node_id: "n1".into(),
            cached: false,
        });
        assert_eq!(a.id, 0);
        assert_eq!(b.id, 1);
        assert!(b.timestamp_ms >= a.timestamp_ms);
    }

    #[test]
    fn for_node_filters() {
        let log = EventLog::new();
        log.append(EventKind::NodeStart {
            node_id: "alpha".into(),
            cached: false,
        });
        log.append(EventKind::NodeStart {
            node_id: "beta".into(),
            cached: false,
        });
        log.append(EventKind::NodeEnd {
            node_id: "alpha".into(),
            cached: false,
            duration_ms: 5,
            attempts: 0,
        });

        assert_eq!(log.for_node("alpha").len(), 2);
        assert_eq!(log.for_node("beta").len(), 1);
        assert_eq!(log.for_node("gamma").len(), 0);
    }

    #[test]
    fn kind_serializes_with_type_tag() {
        let kind = EventKind::NodeError {
            node_id: "x".into(),
            error: "boom".into(),
            error_kind: ErrorKind::ExecutorError,
            duration_ms: 12,
        };
        let value = serde_json::to_value(&kind).unwrap();
        assert_eq!(value["type"], json!("node_error"));
        assert_eq!(value["error_kind"], json!("ExecutorError"));
    }

    #[test]
    fn run_events_have_no_node_id() {
        let kind = EventKind::RunStart {
            run_id: "r".into(),
            node_count: 1,
        };
        assert!(kind.is_run_event());
        assert_eq!(kind.node_id(), None);
    }

    struct Collecting {
        seen: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl Observer for Collecting {
        async fn on_event(&self, event: &Event) -> anyhow::Result<()> {
            self.seen.lock().push(event.id);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Observer for Failing {
        async fn on_event(&self, _event: &Event) -> anyhow::Result<()> {
            anyhow::bail!("observer exploded")
        }
    }

    #[tokio::test]
    async fn bus_dispatches_to_observers() {
        let collector = Arc::new(Collecting {
            seen: Mutex::new(Vec::new()),
        });
        let bus = EventBus::new(vec![collector.clone()]);

        bus.emit(EventKind::RunStart {
            run_id: "r".into(),
            node_count: 0,
        })
        .await;
        bus.emit(EventKind::RunEnd {
            run_id: "r".into(),
            success: true,
            duration_ms: 1,
        })
        .await;

        assert_eq!(collector.seen.lock().as_slice(), &[0, 1]);
        assert_eq!(bus.log().len(), 2);
    }

    #[tokio::test]
    async fn observer_failure_is_swallowed() {
        let collector = Arc::new(Collecting {
            seen: Mutex::new(Vec::new()),
        });
        let bus = EventBus::new(vec![Arc::new(Failing), collector.clone()]);

        bus.emit(EventKind::RunStart {
            run_id: "r".into(),
            node_count: 0,
        })
        .await;

        // The failing observer did not prevent later observers or the log.
        assert_eq!(collector.seen.lock().len(), 1);
        assert_eq!(bus.log().len(), 1);
    }

    #[test]
    fn concurrent_appends_produce_unique_ids() {
        let log = EventLog::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let log = log.clone();
                std::thread::spawn(move || {
                    log.append(EventKind::NodeStart {
                        node_id: format!("n{}", i),
                        cached: false,
                    })
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut ids: Vec<u64> = log.events().iter().map(|e| e.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 8);
    }
}
