//! # Supervisor: owns the processor's lifecycle.
//!
//! The [`Supervisor`] is the explicit context that holds everything the
//! processor needs: configuration, both registries, the processing queue and
//! the stop channel. Nothing here is global.
//!
//! ```text
//! Supervisor::new(config)
//!   mount(path, set) ...          registries mutable (&mut self)
//!   bind()  ──►  Running          registries sealed behind Arc
//!   run()   ──►  serve until a StopRequest arrives on the channel
//!
//! StopRequest { Graceful }
//!   cancel listener ─► idle connections close, busy ones finish their cycle
//!   wait for connections ─► drain queue          (bounded by shutdown grace)
//!      ├─ drained              → Ok(Stopped::Graceful)
//!      ├─ IMMEDIATE meanwhile  → Ok(Stopped::Immediate)
//!      └─ grace exceeded       → Err(GraceExceeded)
//!
//! StopRequest { Immediate }   → Ok(Stopped::Immediate), nothing drained
//! ```
//!
//! Exiting the process is left to the binary.

mod shutdown;
mod signals;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::ProcessorConfig;
use crate::events::{BenchmarkEvent, BenchmarkSettings, ShutdownEvent, Urgency, endpoint};
use crate::queue::ProcessingQueue;
use crate::registry::{
    EventManipulatorRegistry, EventManipulatorSet, PathHandlerRegistry, RegistryError,
};
use crate::server::{Server, ServerError};

pub use shutdown::{ShutdownHandle, StopRequest};
pub use signals::forward_signals;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("processor is not running")]
    NotRunning,

    #[error("graceful shutdown exceeded {grace:?} with {in_flight} events still in flight")]
    GraceExceeded { grace: Duration, in_flight: usize },

    #[error("listener stopped unexpectedly")]
    ListenerStopped,
}

/// How the processor stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stopped {
    /// All connections closed and all queued events finished.
    Graceful { reason: String },
    /// Stopped without draining; the caller is expected to exit now.
    Immediate { reason: String },
}

impl Stopped {
    pub fn reason(&self) -> &str {
        match self {
            Self::Graceful { reason } | Self::Immediate { reason } => reason,
        }
    }
}

/// Setup phase: registries are still mutable.
pub struct Supervisor {
    config: ProcessorConfig,
    paths: PathHandlerRegistry,
    events: EventManipulatorRegistry,
    queue: ProcessingQueue,
    benchmark: BenchmarkSettings,
    handle: ShutdownHandle,
    stop_rx: mpsc::UnboundedReceiver<StopRequest>,
}

impl Supervisor {
    pub fn new(config: ProcessorConfig) -> Self {
        let (handle, stop_rx) = ShutdownHandle::channel();
        Self {
            queue: ProcessingQueue::new(config.workers()),
            benchmark: BenchmarkSettings::new(config.benchmark_delay()),
            paths: PathHandlerRegistry::new(),
            events: EventManipulatorRegistry::new(),
            config,
            handle,
            stop_rx,
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.handle.clone()
    }

    pub fn queue(&self) -> &ProcessingQueue {
        &self.queue
    }

    pub fn benchmark_settings(&self) -> &BenchmarkSettings {
        &self.benchmark
    }

    pub fn events(&self) -> &EventManipulatorRegistry {
        &self.events
    }

    /// Registers `set` and serves it on `path`.
    ///
    /// Nothing is registered if the set is invalid, has no builder, or its
    /// event type is already taken.
    pub fn mount(&mut self, path: &str, set: EventManipulatorSet) -> Result<(), SupervisorError> {
        let handler = endpoint(&set, self.queue.clone())?;
        let event_type = set.event_type();
        self.events.register(set)?;
        self.paths.register_handler(path, handler);
        debug!(path, %event_type, "event endpoint mounted");
        Ok(())
    }

    /// Mounts `/shutdown` and `/benchmark`.
    pub fn mount_standard_endpoints(&mut self) -> Result<(), SupervisorError> {
        self.mount("/shutdown", ShutdownEvent::manipulators(self.shutdown_handle()))?;
        self.mount("/benchmark", BenchmarkEvent::manipulators(self.benchmark.clone()))?;
        Ok(())
    }

    /// Seals the registries and binds the configured address.
    pub async fn bind(self) -> Result<Running, SupervisorError> {
        let address = self.config.bind_address();
        let server = Server::bind(&address)
            .await?
            .max_request_bytes(self.config.max_request_bytes);

        info!(
            address = %server.local_addr(),
            workers = self.queue.workers(),
            event_types = self.events.len(),
            "processor bound"
        );

        Ok(Running {
            local_addr: server.local_addr(),
            server,
            routes: Arc::new(self.paths),
            queue: self.queue,
            handle: self.handle,
            stop_rx: self.stop_rx,
            grace: self.config.shutdown_grace(),
        })
    }

    /// Mounts the standard endpoints, binds, and serves until stopped.
    pub async fn start(mut self) -> Result<Stopped, SupervisorError> {
        self.mount_standard_endpoints()?;
        self.bind().await?.run().await
    }
}

/// A bound processor whose registries can no longer change.
pub struct Running {
    server: Server,
    local_addr: SocketAddr,
    routes: Arc<PathHandlerRegistry>,
    queue: ProcessingQueue,
    handle: ShutdownHandle,
    stop_rx: mpsc::UnboundedReceiver<StopRequest>,
    grace: Duration,
}

impl Running {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.handle.clone()
    }

    /// Serves requests until a stop request arrives, then stops accordingly.
    ///
    /// # Errors
    ///
    /// - [`SupervisorError::GraceExceeded`] if a graceful drain does not
    ///   finish in time.
    /// - [`SupervisorError::ListenerStopped`] or [`SupervisorError::Server`]
    ///   if the listener ends on its own.
    pub async fn run(self) -> Result<Stopped, SupervisorError> {
        let Self {
            server,
            routes,
            queue,
            handle,
            mut stop_rx,
            grace,
            ..
        } = self;

        let shutdown = CancellationToken::new();
        let connections = TaskTracker::new();
        let mut listener = tokio::spawn(server.run(routes, shutdown.clone(), connections.clone()));

        let first = tokio::select! {
            request = stop_rx.recv() => request,
            joined = &mut listener => {
                return Err(match joined {
                    Ok(Err(e)) => e.into(),
                    _ => SupervisorError::ListenerStopped,
                });
            }
        };
        // `handle` keeps the channel open, so `recv` cannot return `None` here.
        let Some(StopRequest { urgency, reason }) = first else {
            return Err(SupervisorError::ListenerStopped);
        };
        drop(handle);

        shutdown.cancel();
        if urgency == Urgency::Immediate {
            warn!(%reason, in_flight = queue.in_flight(), "stopping immediately");
            queue.close();
            return Ok(Stopped::Immediate { reason });
        }

        info!(%reason, ?grace, "graceful shutdown started");
        let drain = drain(listener, connections, queue.clone());
        tokio::pin!(drain);
        let deadline = tokio::time::sleep(grace);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                () = &mut drain => {
                    info!(%reason, "graceful shutdown complete");
                    return Ok(Stopped::Graceful { reason });
                }
                () = &mut deadline => {
                    return Err(SupervisorError::GraceExceeded {
                        grace,
                        in_flight: queue.in_flight(),
                    });
                }
                Some(next) = stop_rx.recv() => match next.urgency {
                    Urgency::Immediate => {
                        warn!(reason = %next.reason, "immediate stop requested during graceful shutdown");
                        return Ok(Stopped::Immediate { reason: next.reason });
                    }
                    Urgency::Graceful => {
                        debug!(reason = %next.reason, "graceful shutdown already in progress");
                    }
                },
            }
        }
    }
}

/// Waits for the listener, then every connection, then every queued event.
async fn drain(
    listener: JoinHandle<Result<(), ServerError>>,
    connections: TaskTracker,
    queue: ProcessingQueue,
) {
    match listener.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "listener failed during shutdown"),
        Err(e) => warn!(error = %e, "listener task failed during shutdown"),
    }
    connections.close();
    connections.wait().await;
    debug!(in_flight = queue.in_flight(), "connections closed, draining queue");
    queue.shutdown().await;
}
