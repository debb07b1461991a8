//! Startup-time registries shared read-only by every connection.
//!
//! - [`PathHandlerRegistry`] maps a request path to a handler consuming the raw body.
//! - [`EventManipulatorRegistry`] maps an event type to a validated [`EventManipulatorSet`].
//!
//! Both are populated through `&mut self` before the listener binds and then
//! moved behind an [`Arc`](std::sync::Arc), which is what seals them: no
//! mutable access exists once connections are being served.

mod event_sets;
mod paths;

pub use event_sets::{
    Capability, EventManipulatorRegistry, EventManipulatorSet, RegistryError, validate,
};
pub use paths::{BoxFuture, IntoPathHandler, PathHandler, PathHandlerRegistry, normalize};
