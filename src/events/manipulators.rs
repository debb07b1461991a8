//! Manipulators are the per-event-type functions that move an event through
//! the pipeline.
//!
//! ```text
//! body bytes ─► EventBuilder ─► EventQueueWriter ─► queue worker
//!                                                     ├─► EventQueueReader
//!                                                     └─► EventProcessor
//! ```
//!
//! Each manipulator reports the [`EventType`] it serves so a set of them can
//! be checked for agreement before registration.

use std::marker::PhantomData;
use std::time::Instant;

use tracing::info;

use super::{Event, EventError, EventId, EventType, HttpInputEvent};
use crate::queue::SubmissionMode;

/// Behaviour shared by every manipulator.
pub trait Manipulator: Send + Sync + 'static {
    fn event_type(&self) -> EventType;
}

/// Constructs an event from raw body bytes.
pub trait EventBuilder: Manipulator {
    fn build(&self, id: EventId, raw: &[u8]) -> Result<Box<dyn Event>, EventError>;
}

/// Chooses how a constructed event is written to the processing queue.
pub trait EventQueueWriter: Manipulator {
    fn mode(&self) -> SubmissionMode;
}

/// Observes an event when a queue worker picks it up, before processing.
pub trait EventQueueReader: Manipulator {
    fn read(&self, event: &dyn Event);
}

/// Runs an event taken off the queue.
pub trait EventProcessor: Manipulator {
    fn process(&self, event: Box<dyn Event>);
}

/// Builds `E` by decoding a JSON body.
pub struct JsonBuilder<E: HttpInputEvent> {
    ctx: E::Context,
    _event: PhantomData<fn() -> E>,
}

impl<E: HttpInputEvent> JsonBuilder<E> {
    pub fn new(ctx: E::Context) -> Self {
        Self {
            ctx,
            _event: PhantomData,
        }
    }
}

impl<E: HttpInputEvent> Manipulator for JsonBuilder<E> {
    fn event_type(&self) -> EventType {
        E::EVENT_TYPE
    }
}

impl<E: HttpInputEvent> EventBuilder for JsonBuilder<E> {
    fn build(&self, id: EventId, raw: &[u8]) -> Result<Box<dyn Event>, EventError> {
        Ok(Box::new(E::decode(id, raw, &self.ctx)?))
    }
}

/// Writes events with a fixed [`SubmissionMode`].
#[derive(Debug, Clone, Copy)]
pub struct QueueWriter {
    event_type: EventType,
    mode: SubmissionMode,
}

impl QueueWriter {
    pub fn new(event_type: EventType, mode: SubmissionMode) -> Self {
        Self { event_type, mode }
    }
}

impl Manipulator for QueueWriter {
    fn event_type(&self) -> EventType {
        self.event_type
    }
}

impl EventQueueWriter for QueueWriter {
    fn mode(&self) -> SubmissionMode {
        self.mode
    }
}

/// Logs each event as a worker picks it up.
#[derive(Debug, Clone, Copy)]
pub struct LogReader {
    event_type: EventType,
}

impl LogReader {
    pub fn new(event_type: EventType) -> Self {
        Self { event_type }
    }
}

impl Manipulator for LogReader {
    fn event_type(&self) -> EventType {
        self.event_type
    }
}

impl EventQueueReader for LogReader {
    fn read(&self, event: &dyn Event) {
        info!(event_id = %event.id(), event_type = %event.event_type(), "event dequeued");
    }
}

/// Calls [`Event::process`] and logs how long it took.
#[derive(Debug, Clone, Copy)]
pub struct DirectProcessor {
    event_type: EventType,
}

impl DirectProcessor {
    pub fn new(event_type: EventType) -> Self {
        Self { event_type }
    }
}

impl Manipulator for DirectProcessor {
    fn event_type(&self) -> EventType {
        self.event_type
    }
}

impl EventProcessor for DirectProcessor {
    fn process(&self, event: Box<dyn Event>) {
        let id = event.id();
        let started = Instant::now();
        event.process();
        info!(
            event_id = %id,
            event_type = %self.event_type,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "event processed"
        );
    }
}
