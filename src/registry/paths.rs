use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;

use crate::events::DispatchError;

/// Heap-allocated, sendable future.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Type-erased handler bound to a path. Receives the complete request body.
///
/// Stored behind `Arc<dyn Fn(…)>` so connection tasks can hold a handle
/// across the body phase without borrowing the registry.
pub type PathHandler =
    Arc<dyn Fn(Bytes) -> BoxFuture<Result<(), DispatchError>> + Send + Sync + 'static>;

/// Conversion trait for async body handlers.
///
/// Any `Fn(Bytes) -> impl Future<Output = Result<(), DispatchError>> + Send`
/// that is also `Send + Sync + 'static` implements this automatically.
pub trait IntoPathHandler: Send + Sync + 'static {
    fn call(&self, body: Bytes) -> BoxFuture<Result<(), DispatchError>>;
}

impl<T, F> IntoPathHandler for T
where
    T: Fn(Bytes) -> F + Send + Sync + 'static,
    F: Future<Output = Result<(), DispatchError>> + Send + 'static,
{
    fn call(&self, body: Bytes) -> BoxFuture<Result<(), DispatchError>> {
        Box::pin((self)(body))
    }
}

/// Strips a trailing slash so `/benchmark/` and `/benchmark` share a key.
/// The root path `/` is left untouched.
pub fn normalize(path: &str) -> &str {
    if path != "/" && path.ends_with('/') {
        &path[..path.len() - 1]
    } else {
        path
    }
}

/// Exact-match table from request path to [`PathHandler`].
///
/// # Examples
///
/// ```
/// use business_processor::registry::PathHandlerRegistry;
///
/// let mut paths = PathHandlerRegistry::new();
/// paths.register("/ping", |_body| async { Ok(()) });
///
/// assert!(paths.retrieve("/ping").is_some());
/// assert!(paths.retrieve("/ping/").is_some());
/// assert!(paths.retrieve("/ping/extra").is_none());
/// ```
#[derive(Default)]
pub struct PathHandlerRegistry {
    handlers: HashMap<String, PathHandler>,
}

impl PathHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `path`, replacing any previous handler.
    pub fn register(&mut self, path: &str, handler: impl IntoPathHandler) {
        let handler: PathHandler = Arc::new(move |body| handler.call(body));
        self.register_handler(path, handler);
    }

    /// Registers an already type-erased handler.
    pub fn register_handler(&mut self, path: &str, handler: PathHandler) {
        self.handlers.insert(normalize(path).to_owned(), handler);
    }

    /// Returns the handler for exactly `path`, if one is registered.
    pub fn retrieve(&self, path: &str) -> Option<PathHandler> {
        self.handlers.get(normalize(path)).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered paths, in no particular order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl fmt::Debug for PathHandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathHandlerRegistry")
            .field("paths", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
