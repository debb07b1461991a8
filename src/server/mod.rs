//! Async TCP front end using Tokio.
//!
//! Accepts connections, splits each byte stream into request parts and drives
//! the per-connection [`RequestCycle`] over them. Connections are persistent
//! unless the client (or a pending shutdown) says otherwise.

pub mod cycle;

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::http::{RequestDecoder, RequestPart, Response};
use crate::registry::PathHandlerRegistry;

pub use cycle::{ACKNOWLEDGEMENT, CycleError, ReadState, RequestCycle, RequestData, Step, transition};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// A bound listener, ready to serve a sealed [`PathHandlerRegistry`].
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use business_processor::registry::PathHandlerRegistry;
/// use business_processor::server::Server;
/// use tokio_util::{sync::CancellationToken, task::TaskTracker};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut routes = PathHandlerRegistry::new();
///     routes.register("/ping", |_body| async { Ok(()) });
///
///     let server = Server::bind("127.0.0.1:8080").await?;
///     server
///         .run(Arc::new(routes), CancellationToken::new(), TaskTracker::new())
///         .await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    max_request_bytes: usize,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            max_request_bytes: RequestDecoder::DEFAULT_MAX_REQUEST_BYTES,
        })
    }

    /// Caps the size of a single buffered request (head plus body).
    #[must_use]
    pub fn max_request_bytes(mut self, max_request_bytes: usize) -> Self {
        self.max_request_bytes = max_request_bytes;
        self
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections until `shutdown` is cancelled.
    ///
    /// Each connection runs on its own task spawned on `connections`, so the
    /// caller can wait for them to finish. Once `shutdown` fires the listener
    /// is dropped, idle connections close, and busy ones close after their
    /// current response.
    ///
    /// # Errors
    ///
    /// Currently always returns `Ok`; accept failures are logged and skipped.
    pub async fn run(
        self,
        routes: Arc<PathHandlerRegistry>,
        shutdown: CancellationToken,
        connections: TaskTracker,
    ) -> Result<(), ServerError> {
        info!(address = %self.local_addr, paths = routes.len(), "business processor listening");

        loop {
            let (stream, peer_addr) = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                        continue;
                    }
                },
            };

            debug!(peer = %peer_addr, "connection accepted");
            let routes = Arc::clone(&routes);
            let shutdown = shutdown.clone();
            let max_request_bytes = self.max_request_bytes;

            connections.spawn(async move {
                if let Err(e) =
                    handle_connection(stream, peer_addr, routes, shutdown, max_request_bytes).await
                {
                    warn!(peer = %peer_addr, error = %e, "connection closed with error");
                }
            });
        }

        info!(address = %self.local_addr, "listener stopped");
        Ok(())
    }
}

/// Handles a single TCP connection over its lifetime.
///
/// Parts are decoded from the buffer and fed through [`transition`] one at a
/// time, so requests on one connection are handled strictly in order. After
/// an error response mid-request the remaining parts of that request are
/// skipped. Decoder errors leave the stream position unknown and close the
/// connection.
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    routes: Arc<PathHandlerRegistry>,
    shutdown: CancellationToken,
    max_request_bytes: usize,
) -> Result<(), std::io::Error> {
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);
    let mut decoder = RequestDecoder::new(max_request_bytes);
    let mut cycle = RequestCycle::default();
    let mut keep_alive = true;
    let mut discarding = false;

    loop {
        loop {
            let part = match decoder.decode(&mut buf) {
                Ok(Some(part)) => part,
                Ok(None) => break,
                Err(e) => {
                    warn!(peer = %peer_addr, error = %e, status = %e.status(), "undecodable request");
                    let response = Response::message(e.status(), e.to_string()).keep_alive(false);
                    stream.write_all(&response.into_bytes()).await?;
                    stream.flush().await?;
                    return Ok(());
                }
            };

            if discarding {
                discarding = !matches!(part, RequestPart::End);
                continue;
            }

            if let RequestPart::Head(head) = &part {
                keep_alive = head.is_keep_alive();
                debug!(
                    peer = %peer_addr,
                    method = %head.method(),
                    path = %head.path(),
                    version = %head.version(),
                    "request head received"
                );
            }

            let (next, outcome) = transition(cycle, part, &routes).await;
            cycle = next;

            let response = match outcome {
                Ok(Step::Continue) => continue,
                Ok(Step::Respond(response)) => response,
                Err(e) => {
                    let status = e.status();
                    if status.as_u16() >= 500 {
                        warn!(peer = %peer_addr, error = %e, %status, "request cycle failed");
                    } else {
                        debug!(peer = %peer_addr, error = %e, %status, "request rejected");
                    }
                    e.into_response()
                }
            };

            let close = !keep_alive || shutdown.is_cancelled();
            stream
                .write_all(&response.keep_alive(!close).into_bytes())
                .await?;
            stream.flush().await?;

            if close {
                debug!(peer = %peer_addr, "closing connection after response");
                return Ok(());
            }
            discarding = decoder.is_mid_message();
        }

        // A partial head is not yet a request, so it does not hold up shutdown.
        let between_requests = !decoder.is_mid_message();
        let bytes_read = tokio::select! {
            _ = shutdown.cancelled(), if between_requests => {
                debug!(peer = %peer_addr, "closing idle connection for shutdown");
                return Ok(());
            }
            read = stream.read_buf(&mut buf) => read?,
        };

        if bytes_read == 0 {
            debug!(peer = %peer_addr, "connection closed by peer");
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::http::StatusCode;

    async fn spawn_server(
        routes: PathHandlerRegistry,
        max_request_bytes: usize,
    ) -> (SocketAddr, CancellationToken, TaskTracker) {
        let server = Server::bind("127.0.0.1:0")
            .await
            .unwrap()
            .max_request_bytes(max_request_bytes);
        let addr = server.local_addr();
        let shutdown = CancellationToken::new();
        let connections = TaskTracker::new();
        tokio::spawn(server.run(Arc::new(routes), shutdown.clone(), connections.clone()));
        (addr, shutdown, connections)
    }

    async fn roundtrip(addr: SocketAddr, raw: &[u8]) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw).await.unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    const ACKNOWLEDGEMENT_JSON: &str = r#"{"message":"Request received and processed."}"#;

    fn ok_routes() -> PathHandlerRegistry {
        let mut routes = PathHandlerRegistry::new();
        routes.register("/ok", |_body: Bytes| async { Ok(()) });
        routes
    }

    #[tokio::test]
    async fn bind_to_ephemeral_port() {
        let server = Server::bind("127.0.0.1:0").await.unwrap();
        assert_ne!(server.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let first = Server::bind("127.0.0.1:0").await.unwrap();
        let taken = first.local_addr().to_string();
        assert!(matches!(
            Server::bind(&taken).await,
            Err(ServerError::Bind { .. })
        ));
    }

    #[tokio::test]
    async fn acknowledges_and_closes_on_request() {
        let (addr, _, _) = spawn_server(ok_routes(), 1024).await;
        let text = roundtrip(
            addr,
            b"POST /ok HTTP/1.1\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{}",
        )
        .await;
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.ends_with(ACKNOWLEDGEMENT_JSON));
    }

    #[tokio::test]
    async fn keep_alive_serves_requests_in_order() {
        let (addr, _, _) = spawn_server(ok_routes(), 1024).await;
        let text = roundtrip(
            addr,
            b"POST /missing HTTP/1.1\r\nContent-Length: 2\r\n\r\n{}\
              POST /ok HTTP/1.1\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{}",
        )
        .await;

        let not_found = text.find("HTTP/1.1 404 Not Found").unwrap();
        let ok = text.find("HTTP/1.1 200 OK").unwrap();
        assert!(not_found < ok);
    }

    #[tokio::test]
    async fn oversize_request_gets_413_and_close() {
        let (addr, _, _) = spawn_server(ok_routes(), 64).await;
        let text = roundtrip(
            addr,
            b"POST /ok HTTP/1.1\r\nContent-Length: 1000\r\n\r\n",
        )
        .await;
        assert!(text.starts_with(&format!(
            "HTTP/1.1 {} {}",
            StatusCode::PayloadTooLarge.as_u16(),
            StatusCode::PayloadTooLarge.canonical_reason()
        )));
        assert!(text.contains("Connection: close\r\n"));
    }

    #[tokio::test]
    async fn chunked_request_is_not_implemented() {
        let (addr, _, _) = spawn_server(ok_routes(), 1024).await;
        let text = roundtrip(
            addr,
            b"POST /ok HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n0\r\n\r\n",
        )
        .await;
        assert!(text.starts_with("HTTP/1.1 501"));
    }

    #[tokio::test]
    async fn garbage_gets_400() {
        let (addr, _, _) = spawn_server(ok_routes(), 1024).await;
        let text = roundtrip(addr, b"\x01\x02 nonsense\r\n\r\n").await;
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }

    #[tokio::test]
    async fn idle_connections_close_on_shutdown() {
        let (addr, shutdown, connections) = spawn_server(ok_routes(), 1024).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        // Give the accept loop a chance to register the connection.
        tokio::time::sleep(Duration::from_millis(50)).await;

        shutdown.cancel();
        connections.close();
        tokio::time::timeout(Duration::from_secs(2), connections.wait())
            .await
            .unwrap();

        let mut out = Vec::new();
        assert_eq!(stream.read_to_end(&mut out).await.unwrap_or(0), 0);
    }

    #[tokio::test]
    async fn partial_head_does_not_hold_up_shutdown() {
        let (addr, shutdown, connections) = spawn_server(ok_routes(), 1024).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"POST /ok HTTP/1.1\r\nHost: x").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        shutdown.cancel();
        connections.close();
        tokio::time::timeout(Duration::from_secs(2), connections.wait())
            .await
            .unwrap();

        let mut out = Vec::new();
        assert_eq!(stream.read_to_end(&mut out).await.unwrap_or(0), 0);
    }
}
