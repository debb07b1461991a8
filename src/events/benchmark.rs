//! `/benchmark`: a synthetic long-running event for exercising queue concurrency.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use super::manipulators::{DirectProcessor, JsonBuilder, LogReader, QueueWriter};
use super::{Event, EventId, EventType, HttpInputEvent};
use crate::queue::SubmissionMode;
use crate::registry::EventManipulatorSet;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BenchmarkPayload {
    pub value: i64,
}

/// Shared by every benchmark event: the simulated work duration and a
/// completion counter.
#[derive(Debug, Clone)]
pub struct BenchmarkSettings {
    delay: Duration,
    completed: Arc<AtomicU64>,
}

impl BenchmarkSettings {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            completed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Number of benchmark events that have finished processing.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct BenchmarkEvent {
    id: EventId,
    payload: BenchmarkPayload,
    settings: BenchmarkSettings,
}

impl BenchmarkEvent {
    pub fn payload(&self) -> &BenchmarkPayload {
        &self.payload
    }

    /// The manipulator set mounted on `/benchmark`.
    pub fn manipulators(settings: BenchmarkSettings) -> EventManipulatorSet {
        EventManipulatorSet::new(Self::EVENT_TYPE)
            .with_builder(JsonBuilder::<Self>::new(settings))
            .with_writer(QueueWriter::new(Self::EVENT_TYPE, SubmissionMode::FireAndForget))
            .with_reader(LogReader::new(Self::EVENT_TYPE))
            .with_processor(DirectProcessor::new(Self::EVENT_TYPE))
    }
}

impl Event for BenchmarkEvent {
    fn id(&self) -> EventId {
        self.id
    }

    fn event_type(&self) -> EventType {
        Self::EVENT_TYPE
    }

    /// Blocks the worker thread for the configured delay.
    fn process(self: Box<Self>) {
        std::thread::sleep(self.settings.delay);
        self.settings.completed.fetch_add(1, Ordering::AcqRel);
        info!(
            event_id = %self.id,
            value = self.payload.value,
            "benchmark event finished processing"
        );
    }
}

impl HttpInputEvent for BenchmarkEvent {
    const EVENT_TYPE: EventType = EventType::new("benchmark");
    type Payload = BenchmarkPayload;
    type Context = BenchmarkSettings;

    fn from_payload(id: EventId, payload: BenchmarkPayload, ctx: &BenchmarkSettings) -> Self {
        Self {
            id,
            payload,
            settings: ctx.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventError;

    fn settings() -> BenchmarkSettings {
        BenchmarkSettings::new(Duration::from_millis(10))
    }

    #[test]
    fn decodes_value() {
        let id = EventId::new();
        let event = BenchmarkEvent::decode(id, br#"{"value": 42}"#, &settings()).unwrap();
        assert_eq!(event.id(), id);
        assert_eq!(event.payload().value, 42);
    }

    #[test]
    fn rejects_malformed_bodies() {
        for body in [
            &br#"{}"#[..],
            br#"{"value": "42"}"#,
            br#"{"value": 4.2}"#,
            br#"{"value": 1, "extra": true}"#,
            br#"not json"#,
            b"",
        ] {
            let result = BenchmarkEvent::decode(EventId::new(), body, &settings());
            assert!(
                matches!(result, Err(EventError::PayloadDecode(_))),
                "accepted {:?}",
                String::from_utf8_lossy(body)
            );
        }
    }

    #[test]
    fn process_sleeps_then_counts() {
        let settings = settings();
        let event =
            BenchmarkEvent::decode(EventId::new(), br#"{"value": 1}"#, &settings).unwrap();

        let started = std::time::Instant::now();
        Box::new(event).process();
        assert!(started.elapsed() >= settings.delay());
        assert_eq!(settings.completed(), 1);
    }

    #[test]
    fn manipulator_set_is_consistent() {
        let set = BenchmarkEvent::manipulators(settings());
        assert!(crate::registry::validate(&set).is_ok());
        assert_eq!(set.capabilities().len(), 4);
    }
}
