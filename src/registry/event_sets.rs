use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::events::{
    EventBuilder, EventProcessor, EventQueueReader, EventQueueWriter, EventType, Manipulator,
};

/// Errors raised while registering event manipulators. These are startup
/// errors, never request-path errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{kind} declares event type `{found}` but the set is for `{expected}`")]
    MismatchedEventIdentifier {
        expected: EventType,
        found: EventType,
        kind: &'static str,
    },

    #[error("event type `{0}` is already registered")]
    DuplicateEventIdentifier(EventType),

    #[error("event type `{0}` has no builder and cannot be mounted on a path")]
    MissingBuilder(EventType),
}

/// One present manipulator, tagged with its role.
#[derive(Clone)]
pub enum Capability {
    Builder(Arc<dyn EventBuilder>),
    Writer(Arc<dyn EventQueueWriter>),
    Reader(Arc<dyn EventQueueReader>),
    Processor(Arc<dyn EventProcessor>),
}

impl Capability {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Builder(_) => "builder",
            Self::Writer(_) => "writer",
            Self::Reader(_) => "reader",
            Self::Processor(_) => "processor",
        }
    }

    /// The event type this manipulator declares.
    pub fn event_type(&self) -> EventType {
        match self {
            Self::Builder(m) => m.event_type(),
            Self::Writer(m) => m.event_type(),
            Self::Reader(m) => m.event_type(),
            Self::Processor(m) => m.event_type(),
        }
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind(), self.event_type())
    }
}

/// The manipulators registered for one event type.
///
/// Any subset of builder, writer, reader and processor may be present; at
/// most one of each. Setting a role twice replaces the earlier manipulator.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use business_processor::events::{BenchmarkEvent, BenchmarkSettings, HttpInputEvent, JsonBuilder};
/// use business_processor::registry::{EventManipulatorSet, validate};
///
/// let settings = BenchmarkSettings::new(Duration::from_millis(1));
/// let set = EventManipulatorSet::new(BenchmarkEvent::EVENT_TYPE)
///     .with_builder(JsonBuilder::<BenchmarkEvent>::new(settings));
///
/// assert!(set.builder().is_some());
/// assert!(set.writer().is_none());
/// assert!(validate(&set).is_ok());
/// ```
#[derive(Clone, Debug)]
pub struct EventManipulatorSet {
    event_type: EventType,
    capabilities: Vec<Capability>,
}

impl EventManipulatorSet {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            capabilities: Vec::with_capacity(4),
        }
    }

    #[must_use]
    pub fn with_builder(self, builder: impl EventBuilder) -> Self {
        self.with(Capability::Builder(Arc::new(builder)))
    }

    #[must_use]
    pub fn with_writer(self, writer: impl EventQueueWriter) -> Self {
        self.with(Capability::Writer(Arc::new(writer)))
    }

    #[must_use]
    pub fn with_reader(self, reader: impl EventQueueReader) -> Self {
        self.with(Capability::Reader(Arc::new(reader)))
    }

    #[must_use]
    pub fn with_processor(self, processor: impl EventProcessor) -> Self {
        self.with(Capability::Processor(Arc::new(processor)))
    }

    /// Adds `capability`, replacing a present one of the same role.
    #[must_use]
    pub fn with(mut self, capability: Capability) -> Self {
        self.capabilities.retain(|c| c.kind() != capability.kind());
        self.capabilities.push(capability);
        self
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    pub fn builder(&self) -> Option<&Arc<dyn EventBuilder>> {
        self.capabilities.iter().find_map(|c| match c {
            Capability::Builder(b) => Some(b),
            _ => None,
        })
    }

    pub fn writer(&self) -> Option<&Arc<dyn EventQueueWriter>> {
        self.capabilities.iter().find_map(|c| match c {
            Capability::Writer(w) => Some(w),
            _ => None,
        })
    }

    pub fn reader(&self) -> Option<&Arc<dyn EventQueueReader>> {
        self.capabilities.iter().find_map(|c| match c {
            Capability::Reader(r) => Some(r),
            _ => None,
        })
    }

    pub fn processor(&self) -> Option<&Arc<dyn EventProcessor>> {
        self.capabilities.iter().find_map(|c| match c {
            Capability::Processor(p) => Some(p),
            _ => None,
        })
    }
}

/// Checks that every manipulator in `set` declares the set's event type.
///
/// Reports the first disagreeing manipulator in insertion order.
pub fn validate(set: &EventManipulatorSet) -> Result<(), RegistryError> {
    match set
        .capabilities
        .iter()
        .find(|c| c.event_type() != set.event_type)
    {
        Some(c) => Err(RegistryError::MismatchedEventIdentifier {
            expected: set.event_type,
            found: c.event_type(),
            kind: c.kind(),
        }),
        None => Ok(()),
    }
}

/// Validated manipulator sets, in registration order.
#[derive(Debug, Default)]
pub struct EventManipulatorRegistry {
    sets: Vec<EventManipulatorSet>,
}

impl EventManipulatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and appends `set`.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::MismatchedEventIdentifier`]: a manipulator disagrees
    ///   with the set's event type.
    /// - [`RegistryError::DuplicateEventIdentifier`]: a set for this event
    ///   type is already registered.
    ///
    /// On error the registry is left unchanged.
    pub fn register(&mut self, set: EventManipulatorSet) -> Result<(), RegistryError> {
        validate(&set)?;
        if self.get(set.event_type).is_some() {
            return Err(RegistryError::DuplicateEventIdentifier(set.event_type));
        }
        self.sets.push(set);
        Ok(())
    }

    pub fn get(&self, event_type: EventType) -> Option<&EventManipulatorSet> {
        self.sets.iter().find(|s| s.event_type == event_type)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EventManipulatorSet> {
        self.sets.iter()
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{DirectProcessor, LogReader, QueueWriter};
    use crate::queue::SubmissionMode;

    const ORDERS: EventType = EventType::new("orders");
    const REFUNDS: EventType = EventType::new("refunds");

    fn full_set(event_type: EventType) -> EventManipulatorSet {
        EventManipulatorSet::new(event_type)
            .with_writer(QueueWriter::new(event_type, SubmissionMode::FireAndForget))
            .with_reader(LogReader::new(event_type))
            .with_processor(DirectProcessor::new(event_type))
    }

    #[test]
    fn empty_set_is_valid() {
        assert!(validate(&EventManipulatorSet::new(ORDERS)).is_ok());
    }

    #[test]
    fn mismatched_writer_is_rejected_and_not_stored() {
        let mut registry = EventManipulatorRegistry::new();
        registry.register(full_set(REFUNDS)).unwrap();

        let bad = EventManipulatorSet::new(ORDERS)
            .with_reader(LogReader::new(ORDERS))
            .with_writer(QueueWriter::new(REFUNDS, SubmissionMode::Blocking));

        assert_eq!(
            registry.register(bad),
            Err(RegistryError::MismatchedEventIdentifier {
                expected: ORDERS,
                found: REFUNDS,
                kind: "writer",
            })
        );
        assert_eq!(registry.len(), 1);
        assert!(registry.get(ORDERS).is_none());
    }

    #[test]
    fn duplicate_event_type_is_rejected() {
        let mut registry = EventManipulatorRegistry::new();
        registry.register(full_set(ORDERS)).unwrap();
        assert_eq!(
            registry.register(full_set(ORDERS)),
            Err(RegistryError::DuplicateEventIdentifier(ORDERS))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn insertion_order_is_preserved() {
        let mut registry = EventManipulatorRegistry::new();
        registry.register(full_set(REFUNDS)).unwrap();
        registry.register(full_set(ORDERS)).unwrap();
        let order: Vec<_> = registry.iter().map(|s| s.event_type()).collect();
        assert_eq!(order, [REFUNDS, ORDERS]);
    }

    #[test]
    fn same_role_replaces() {
        let set = EventManipulatorSet::new(ORDERS)
            .with_writer(QueueWriter::new(REFUNDS, SubmissionMode::Blocking))
            .with_writer(QueueWriter::new(ORDERS, SubmissionMode::FireAndForget));
        assert_eq!(set.capabilities().len(), 1);
        assert_eq!(set.writer().unwrap().mode(), SubmissionMode::FireAndForget);
        assert!(validate(&set).is_ok());
    }
}
