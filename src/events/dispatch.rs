//! Composes a registered manipulator set into a path handler.

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

use super::{Event, EventError, EventId};
use crate::http::StatusCode;
use crate::queue::{ProcessingQueue, QueueError};
use crate::registry::{BoxFuture, EventManipulatorSet, PathHandler, RegistryError};

/// Why a path handler could not turn a body into queued work.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Decode(#[from] EventError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl DispatchError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Decode(_) => StatusCode::BadRequest,
            Self::Queue(_) => StatusCode::InternalServerError,
        }
    }
}

/// Builds the handler that decodes a body with `set`'s builder and submits
/// the event to `queue`.
///
/// The writer picks the submission mode (fire-and-forget when absent). On the
/// worker, the reader sees the event first, then the processor runs it, or
/// [`Event::process`](super::Event::process) directly when there is none.
///
/// # Errors
///
/// [`RegistryError::MissingBuilder`] if the set has no builder.
pub fn endpoint(
    set: &EventManipulatorSet,
    queue: ProcessingQueue,
) -> Result<PathHandler, RegistryError> {
    let event_type = set.event_type();
    let builder = set
        .builder()
        .cloned()
        .ok_or(RegistryError::MissingBuilder(event_type))?;
    let mode = set.writer().map(|w| w.mode()).unwrap_or_default();
    let reader = set.reader().cloned();
    let processor = set.processor().cloned();

    let handler: PathHandler = Arc::new(move |body: Bytes| -> BoxFuture<Result<(), DispatchError>> {
        let built = builder.build(EventId::new(), &body);
        let queue = queue.clone();
        let reader = reader.clone();
        let processor = processor.clone();

        Box::pin(async move {
            let event = built.inspect_err(|e| {
                debug!(%event_type, error = %e, "request body rejected");
            })?;
            debug!(event_id = %event.id(), %event_type, ?mode, "queueing event");

            queue
                .submit(mode, move || {
                    if let Some(reader) = &reader {
                        reader.read(event.as_ref());
                    }
                    match processor {
                        Some(processor) => processor.process(event),
                        None => event.process(),
                    }
                })
                .await?;
            Ok(())
        })
    });

    Ok(handler)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::events::{BenchmarkEvent, BenchmarkSettings, HttpInputEvent, JsonBuilder, QueueWriter};
    use crate::queue::SubmissionMode;

    #[tokio::test]
    async fn decoded_event_is_processed() {
        let queue = ProcessingQueue::new(2);
        let settings = BenchmarkSettings::new(Duration::from_millis(5));
        let set = EventManipulatorSet::new(BenchmarkEvent::EVENT_TYPE)
            .with_builder(JsonBuilder::<BenchmarkEvent>::new(settings.clone()))
            .with_writer(QueueWriter::new(BenchmarkEvent::EVENT_TYPE, SubmissionMode::Blocking));

        let handler = endpoint(&set, queue).unwrap();
        handler(Bytes::from_static(br#"{"value": 7}"#)).await.unwrap();

        // Blocking mode returns only after processing.
        assert_eq!(settings.completed(), 1);
    }

    #[tokio::test]
    async fn malformed_body_is_never_queued() {
        let queue = ProcessingQueue::new(1);
        let settings = BenchmarkSettings::new(Duration::ZERO);
        let handler = endpoint(&BenchmarkEvent::manipulators(settings.clone()), queue.clone())
            .unwrap();

        let err = handler(Bytes::from_static(br#"{"value": "x"}"#)).await.unwrap_err();
        assert!(matches!(err, DispatchError::Decode(_)));
        assert_eq!(err.status(), StatusCode::BadRequest);

        queue.shutdown().await;
        assert_eq!(settings.completed(), 0);
    }

    #[tokio::test]
    async fn closed_queue_is_a_server_error() {
        let queue = ProcessingQueue::new(1);
        let handler = endpoint(
            &BenchmarkEvent::manipulators(BenchmarkSettings::new(Duration::ZERO)),
            queue.clone(),
        )
        .unwrap();
        queue.shutdown().await;

        let err = handler(Bytes::from_static(br#"{"value": 1}"#)).await.unwrap_err();
        assert!(matches!(err, DispatchError::Queue(QueueError::Closed)));
        assert_eq!(err.status(), StatusCode::InternalServerError);
    }

    #[test]
    fn set_without_builder_cannot_be_mounted() {
        let set = EventManipulatorSet::new(BenchmarkEvent::EVENT_TYPE);
        assert!(matches!(
            endpoint(&set, ProcessingQueue::new(1)),
            Err(RegistryError::MissingBuilder(_))
        ));
    }
}
