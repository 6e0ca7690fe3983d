use common::{JsonFormatter, StructuredLogEntry};
use std::io;
use std::sync::{Arc, Mutex};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SharedBuffer {
    fn lines(&self) -> Vec<StructuredLogEntry> {
        let bytes = self.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }
}

fn capture(with_context: bool, emit: impl FnOnce()) -> Vec<StructuredLogEntry> {
    let buffer = SharedBuffer::default();
    let writer = buffer.clone();
    let layer = JsonFormatter::new()
        .with_context(with_context)
        .with_writer(move || writer.clone());
    let subscriber = Registry::default().with(layer);

    tracing::subscriber::with_default(subscriber, emit);
    buffer.lines()
}

#[test]
fn test_json_formatter_writes_one_entry_per_event() {
    let entries = capture(false, || {
        tracing::info!(agent = "intake", ticket_id = "t-1", "Agent started");
        tracing::warn!(provider = "claude", attempt = 2u64, "LLM attempt failed");
    });

    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].level, "INFO");
    assert_eq!(entries[0].message, "Agent started");
    assert_eq!(entries[0].fields["agent"], "intake");
    assert_eq!(entries[0].fields["ticket_id"], "t-1");
    assert!(entries[0].context.is_none());

    assert_eq!(entries[1].level, "WARN");
    assert_eq!(entries[1].fields["attempt"], 2);
}

#[test]
fn test_json_formatter_extracts_performance_fields() {
    let entries = capture(true, || {
        tracing::info!(agent = "resolution", elapsed_ms = 42u64, "Agent completed");
        tracing::info!(provider = "openai", total_tokens = 150u64, "LLM call succeeded");
        tracing::info!("No metrics here");
    });

    let first = entries[0].performance.as_ref().unwrap();
    assert_eq!(first.elapsed_ms, Some(42));
    assert_eq!(first.total_tokens, None);

    let second = entries[1].performance.as_ref().unwrap();
    assert_eq!(second.total_tokens, Some(150));

    assert!(entries[2].performance.is_none());
    assert_eq!(
        entries[2].context.as_ref().unwrap().pid,
        std::process::id()
    );
}

#[test]
fn test_json_formatter_records_bool_and_float_fields() {
    let entries = capture(false, || {
        tracing::info!(should_escalate = true, confidence = 0.4f64, "Transition");
    });

    assert_eq!(entries[0].fields["should_escalate"], true);
    assert_eq!(entries[0].fields["confidence"], 0.4);
}
