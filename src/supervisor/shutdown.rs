use tokio::sync::mpsc;

use super::SupervisorError;
use crate::events::Urgency;

/// A request to stop the processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopRequest {
    pub urgency: Urgency,
    pub reason: String,
}

/// Sending half of the supervisor's stop channel.
///
/// Held by the `/shutdown` event and the signal listener; requests are
/// delivered without blocking the caller.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: mpsc::UnboundedSender<StopRequest>,
}

impl ShutdownHandle {
    /// Creates a handle together with the receiver that observes its requests.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StopRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Asks the supervisor to stop.
    ///
    /// # Errors
    ///
    /// [`SupervisorError::NotRunning`] once the supervisor is gone.
    pub fn request(&self, urgency: Urgency, reason: impl Into<String>) -> Result<(), SupervisorError> {
        self.tx
            .send(StopRequest {
                urgency,
                reason: reason.into(),
            })
            .map_err(|_| SupervisorError::NotRunning)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_arrive_in_order() {
        let (handle, mut rx) = ShutdownHandle::channel();
        handle.request(Urgency::Graceful, "first").unwrap();
        handle.clone().request(Urgency::Immediate, "second").unwrap();

        assert_eq!(rx.try_recv().unwrap().reason, "first");
        assert_eq!(rx.try_recv().unwrap().urgency, Urgency::Immediate);
    }

    #[test]
    fn dropped_receiver_means_not_running() {
        let (handle, rx) = ShutdownHandle::channel();
        drop(rx);
        assert!(matches!(
            handle.request(Urgency::Graceful, "late"),
            Err(SupervisorError::NotRunning)
        ));
    }
}
