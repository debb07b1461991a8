//! `/shutdown`: asks the supervisor to stop the processor.

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use super::manipulators::{DirectProcessor, JsonBuilder, LogReader, QueueWriter};
use super::{Event, EventId, EventType, HttpInputEvent};
use crate::queue::SubmissionMode;
use crate::registry::EventManipulatorSet;
use crate::supervisor::ShutdownHandle;

/// How quickly the processor should stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Urgency {
    /// Terminate now; in-flight work is abandoned.
    Immediate,
    /// Stop accepting work, drain what is in flight, then exit.
    Graceful,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShutdownPayload {
    pub urgency: Urgency,
    pub reason: String,
}

#[derive(Debug)]
pub struct ShutdownEvent {
    id: EventId,
    payload: ShutdownPayload,
    handle: ShutdownHandle,
}

impl ShutdownEvent {
    pub fn payload(&self) -> &ShutdownPayload {
        &self.payload
    }

    /// The manipulator set mounted on `/shutdown`.
    ///
    /// Submission bypasses the worker limit, so a stop request is delivered
    /// even while every worker is busy with earlier events.
    pub fn manipulators(handle: ShutdownHandle) -> EventManipulatorSet {
        EventManipulatorSet::new(Self::EVENT_TYPE)
            .with_builder(JsonBuilder::<Self>::new(handle))
            .with_writer(QueueWriter::new(Self::EVENT_TYPE, SubmissionMode::Bypass))
            .with_reader(LogReader::new(Self::EVENT_TYPE))
            .with_processor(DirectProcessor::new(Self::EVENT_TYPE))
    }
}

impl Event for ShutdownEvent {
    fn id(&self) -> EventId {
        self.id
    }

    fn event_type(&self) -> EventType {
        Self::EVENT_TYPE
    }

    /// Hands the stop request to the supervisor and returns immediately.
    fn process(self: Box<Self>) {
        let Self {
            id,
            payload: ShutdownPayload { urgency, reason },
            handle,
        } = *self;
        warn!(event_id = %id, ?urgency, %reason, "shutdown requested");

        if let Err(e) = handle.request(urgency, reason) {
            error!(event_id = %id, error = %e, "shutdown request could not be delivered");
        }
    }
}

impl HttpInputEvent for ShutdownEvent {
    const EVENT_TYPE: EventType = EventType::new("shutdown");
    type Payload = ShutdownPayload;
    type Context = ShutdownHandle;

    fn from_payload(id: EventId, payload: ShutdownPayload, ctx: &ShutdownHandle) -> Self {
        Self {
            id,
            payload,
            handle: ctx.clone(),
        }
    }
}
