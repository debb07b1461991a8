//! # business-processor
//!
//! A small HTTP front end that decodes request bodies into typed business
//! events and runs them on a bounded worker queue.
//!
//! ```text
//! bytes ─► RequestDecoder ─► RequestCycle ─► PathHandler ─► EventBuilder
//!                                                              │
//!                      response ◄─ acknowledgement      ProcessingQueue ─► Event::process
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use business_processor::{ProcessorConfig, Stopped, Supervisor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let stopped = Supervisor::new(ProcessorConfig::default()).start().await?;
//!     if let Stopped::Immediate { .. } = stopped {
//!         std::process::exit(2);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod events;
pub mod http;
pub mod logging;
pub mod queue;
pub mod registry;
pub mod server;
pub mod supervisor;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use config::{ConfigError, ProcessorConfig};
pub use events::{BenchmarkEvent, Event, EventId, EventType, HttpInputEvent, ShutdownEvent, Urgency};
pub use http::{Method, Response, StatusCode};
pub use queue::{ProcessingQueue, SubmissionMode};
pub use registry::{EventManipulatorRegistry, EventManipulatorSet, PathHandlerRegistry};
pub use server::{Server, ServerError};
pub use supervisor::{ShutdownHandle, Stopped, Supervisor, SupervisorError};
