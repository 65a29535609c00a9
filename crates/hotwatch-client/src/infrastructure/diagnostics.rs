//! DiagnosticsRelay: forwards log records to the server while connected.
//!
//! The relay is a `tracing_subscriber` [`Layer`].  It is installed next to
//! the console `fmt` layer, so console output keeps working whether or not a
//! session exists: the `fmt` layer is the chained previous sink.
//!
//! A relay starts detached.  [`RelayHandle::attach`] plugs in the session
//! (any [`DiagnosticSink`]) for as long as the returned [`RelayGuard`] lives;
//! dropping the guard detaches it again.
//!
//! Each record at or above the configured level is formatted as
//!
//! ```text
//! <Level>: <message> [key=value ...] (<file>:<line>)
//! ```
//!
//! and handed to the sink if it reports a live connection.  Records seen
//! while disconnected are dropped, not queued.

use std::fmt;
use std::sync::{Arc, RwLock};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Targets never forwarded: the WebSocket stack logs about the frames the
/// relay itself produces.
const SKIPPED_TARGET_PREFIXES: &[&str] = &["tokio_tungstenite", "tungstenite"];

/// Where forwarded records go.
pub trait DiagnosticSink: Send + Sync {
    /// `true` while records can be delivered.
    fn is_connected(&self) -> bool;

    /// Delivers one formatted record.  Must not log.
    fn forward(&self, record: String);
}

type SinkSlot = Arc<RwLock<Option<Arc<dyn DiagnosticSink>>>>;

/// The `tracing` layer.  Create with [`relay`].
pub struct DiagnosticsRelay {
    slot: SinkSlot,
    min_level: Level,
}

/// Attaches sinks to a [`DiagnosticsRelay`] after it was installed.
#[derive(Clone)]
pub struct RelayHandle {
    slot: SinkSlot,
}

/// Keeps a sink attached.  Dropping it detaches the sink.
pub struct RelayGuard {
    slot: SinkSlot,
}

/// Creates a detached relay forwarding records at `min_level` or above.
pub fn relay(min_level: Level) -> (DiagnosticsRelay, RelayHandle) {
    let slot: SinkSlot = Arc::new(RwLock::new(None));
    (
        DiagnosticsRelay {
            slot: Arc::clone(&slot),
            min_level,
        },
        RelayHandle { slot },
    )
}

impl RelayHandle {
    /// Routes forwarded records to `sink` until the guard is dropped.
    ///
    /// Attaching replaces any sink attached before.
    pub fn attach(&self, sink: Arc<dyn DiagnosticSink>) -> RelayGuard {
        store(&self.slot, Some(sink));
        RelayGuard {
            slot: Arc::clone(&self.slot),
        }
    }

    pub fn is_attached(&self) -> bool {
        current(&self.slot).is_some()
    }
}

impl Drop for RelayGuard {
    fn drop(&mut self) {
        store(&self.slot, None);
    }
}

fn store(slot: &SinkSlot, sink: Option<Arc<dyn DiagnosticSink>>) {
    let mut guard = slot.write().unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = sink;
}

fn current(slot: &SinkSlot) -> Option<Arc<dyn DiagnosticSink>> {
    slot.read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

impl<S: Subscriber> Layer<S> for DiagnosticsRelay {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        // More verbose levels compare greater.
        if *meta.level() > self.min_level {
            return;
        }
        if SKIPPED_TARGET_PREFIXES
            .iter()
            .any(|prefix| meta.target().starts_with(prefix))
        {
            return;
        }
        let Some(sink) = current(&self.slot) else {
            return;
        };
        if !sink.is_connected() {
            return;
        }

        let mut visitor = RecordVisitor::default();
        event.record(&mut visitor);
        let location = match (meta.file(), meta.line()) {
            (Some(file), Some(line)) => format!("{file}:{line}"),
            _ => meta.target().to_string(),
        };
        sink.forward(render(meta.level(), &visitor, &location));
    }
}

/// Collects the message and any extra fields of an event.
#[derive(Debug, Default)]
struct RecordVisitor {
    message: String,
    fields: Vec<String>,
}

impl Visit for RecordVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={value}", field.name()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.push(format!("{}={value:?}", field.name()));
        }
    }
}

/// Level names as the server displays them.
pub fn level_name(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "Trace",
        Level::DEBUG => "Debug",
        Level::INFO => "Info",
        Level::WARN => "Warning",
        Level::ERROR => "Critical",
    }
}

fn render(level: &Level, visitor: &RecordVisitor, location: &str) -> String {
    let mut record = format!("{}: {}", level_name(level), visitor.message);
    for field in &visitor.fields {
        record.push(' ');
        record.push_str(field);
    }
    record.push_str(&format!(" ({location})"));
    record
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tracing_subscriber::layer::SubscriberExt;

    #[derive(Default)]
    struct RecordingSink {
        connected: AtomicBool,
        records: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn connected() -> Arc<Self> {
            let sink = Arc::new(Self::default());
            sink.connected.store(true, Ordering::SeqCst);
            sink
        }

        fn records(&self) -> Vec<String> {
            self.records.lock().unwrap().clone()
        }
    }

    impl DiagnosticSink for RecordingSink {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        fn forward(&self, record: String) {
            self.records.lock().unwrap().push(record);
        }
    }

    /// Runs `f` with a subscriber holding only the relay.
    fn with_relay(min_level: Level, sink: Arc<RecordingSink>, f: impl FnOnce()) {
        let (layer, handle) = relay(min_level);
        let _guard = handle.attach(sink);
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, f);
    }

    #[test]
    fn test_record_is_formatted_with_level_message_and_location() {
        // Arrange
        let sink = RecordingSink::connected();

        // Act
        with_relay(Level::INFO, Arc::clone(&sink), || {
            tracing::warn!("binding loop detected");
        });

        // Assert
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert!(
            records[0].starts_with("Warning: binding loop detected ("),
            "{}",
            records[0]
        );
        assert!(records[0].contains("diagnostics.rs:"), "{}", records[0]);
        assert!(records[0].ends_with(')'));
    }

    #[test]
    fn test_error_level_is_reported_as_critical() {
        let sink = RecordingSink::connected();

        with_relay(Level::INFO, Arc::clone(&sink), || {
            tracing::error!("boom");
        });

        assert!(sink.records()[0].starts_with("Critical: boom ("));
    }

    #[test]
    fn test_extra_fields_follow_the_message() {
        let sink = RecordingSink::connected();

        with_relay(Level::INFO, Arc::clone(&sink), || {
            tracing::info!(file = "main.qml", line = 42, "reloaded");
        });

        assert!(
            sink.records()[0].starts_with("Info: reloaded file=main.qml line=42 ("),
            "{}",
            sink.records()[0]
        );
    }

    #[test]
    fn test_records_below_minimum_level_are_not_forwarded() {
        let sink = RecordingSink::connected();

        with_relay(Level::WARN, Arc::clone(&sink), || {
            tracing::info!("routine");
            tracing::debug!("detail");
        });

        assert!(sink.records().is_empty());
    }

    #[test]
    fn test_records_while_disconnected_are_dropped() {
        let sink = Arc::new(RecordingSink::default());

        with_relay(Level::TRACE, Arc::clone(&sink), || {
            tracing::error!("nobody is listening");
        });

        assert!(sink.records().is_empty());
    }

    #[test]
    fn test_websocket_stack_records_are_skipped() {
        let sink = RecordingSink::connected();

        with_relay(Level::TRACE, Arc::clone(&sink), || {
            tracing::debug!(target: "tungstenite::protocol", "sending frame");
            tracing::debug!(target: "tokio_tungstenite", "flushing");
            tracing::debug!(target: "viewer", "kept");
        });

        assert_eq!(sink.records().len(), 1);
        assert!(sink.records()[0].starts_with("Debug: kept ("));
    }

    #[test]
    fn test_dropping_the_guard_detaches_the_sink() {
        // Arrange
        let sink = RecordingSink::connected();
        let (layer, handle) = relay(Level::INFO);
        let subscriber = tracing_subscriber::registry().with(layer);
        let guard = handle.attach(Arc::clone(&sink) as Arc<dyn DiagnosticSink>);
        assert!(handle.is_attached());

        // Act
        drop(guard);
        tracing::subscriber::with_default(subscriber, || {
            tracing::error!("after detach");
        });

        // Assert
        assert!(!handle.is_attached());
        assert!(sink.records().is_empty());
    }

    #[test]
    fn test_level_names() {
        assert_eq!(level_name(&Level::TRACE), "Trace");
        assert_eq!(level_name(&Level::DEBUG), "Debug");
        assert_eq!(level_name(&Level::INFO), "Info");
        assert_eq!(level_name(&Level::WARN), "Warning");
        assert_eq!(level_name(&Level::ERROR), "Critical");
    }

    #[test]
    fn test_render_uses_given_location() {
        let visitor = RecordVisitor {
            message: "no file".to_string(),
            fields: Vec::new(),
        };

        assert_eq!(
            render(&Level::INFO, &visitor, "viewer::loader"),
            "Info: no file (viewer::loader)"
        );
    }
}
