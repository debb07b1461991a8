//! Business events: typed envelopes decoded from request bodies.
//!
//! An [`Event`] carries a unique [`EventId`] and a decoded payload, and knows
//! how to [`process`](Event::process) itself. Events that originate from an
//! HTTP body implement [`HttpInputEvent`], which supplies JSON decoding.
//!
//! | Event             | Path         | Payload                                  |
//! |-------------------|--------------|------------------------------------------|
//! | [`ShutdownEvent`] | `/shutdown`  | `{"urgency": "GRACEFUL", "reason": "…"}` |
//! | [`BenchmarkEvent`]| `/benchmark` | `{"value": 42}`                          |

use std::fmt;

use serde::de::DeserializeOwned;
use thiserror::Error;
use uuid::Uuid;

pub mod benchmark;
pub mod dispatch;
pub mod manipulators;
pub mod shutdown;

pub use benchmark::{BenchmarkEvent, BenchmarkPayload, BenchmarkSettings};
pub use dispatch::{DispatchError, endpoint};
pub use manipulators::{
    DirectProcessor, EventBuilder, EventProcessor, EventQueueReader, EventQueueWriter,
    JsonBuilder, LogReader, Manipulator, QueueWriter,
};
pub use shutdown::{ShutdownEvent, ShutdownPayload, Urgency};

/// Unique identifier of one event instance (UUID v4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId(Uuid);

impl EventId {
    /// Generates a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier shared by every event of one kind, e.g. `"benchmark"`.
///
/// Manipulators declare the event type they handle; the manipulator registry
/// keys on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventType(&'static str);

impl EventType {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Errors raised while constructing an event.
#[derive(Debug, Error)]
pub enum EventError {
    /// The body is not valid JSON for the payload schema: missing or unknown
    /// fields, wrong types, or an unrecognized enum value.
    #[error("payload could not be decoded: {0}")]
    PayloadDecode(#[from] serde_json::Error),
}

/// A unit of business work derived from an inbound request.
///
/// `process` consumes the event, so it runs at most once. It is called on
/// whatever worker thread the processing queue assigns and may block.
pub trait Event: fmt::Debug + Send + 'static {
    fn id(&self) -> EventId;

    fn event_type(&self) -> EventType;

    fn process(self: Box<Self>);
}

/// An [`Event`] built from a JSON request body.
///
/// `Context` carries whatever the event needs at processing time that is not
/// part of the payload, such as a shutdown handle or a configured delay.
pub trait HttpInputEvent: Event + Sized {
    const EVENT_TYPE: EventType;

    type Payload: DeserializeOwned;

    type Context: Clone + Send + Sync + 'static;

    fn from_payload(id: EventId, payload: Self::Payload, ctx: &Self::Context) -> Self;

    /// Decodes `raw` and constructs the event. Nothing is constructed on error.
    fn decode(id: EventId, raw: &[u8], ctx: &Self::Context) -> Result<Self, EventError> {
        let payload = serde_json::from_slice(raw)?;
        Ok(Self::from_payload(id, payload, ctx))
    }
}
