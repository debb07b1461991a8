//! Per-connection request state machine.
//!
//! A connection walks `NotProcessing → WaitingForBody → FullMessageReceived`
//! once per request, driven by the parts the decoder yields. [`transition`]
//! takes the current cycle by value and hands back the next one together with
//! the outcome, so it can be exercised without a socket.

use std::fmt;

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tracing::debug;

use crate::events::DispatchError;
use crate::http::{Method, RequestHead, RequestPart, Response, StatusCode, Version};
use crate::registry::{PathHandler, PathHandlerRegistry};

/// Body of the 200 response sent once a request has been queued.
pub const ACKNOWLEDGEMENT: &str = "Request received and processed.";

/// Coarse state of a [`RequestCycle`], used in logs and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    NotProcessing,
    WaitingForBody,
    FullMessageReceived,
}

impl fmt::Display for ReadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotProcessing => "not processing",
            Self::WaitingForBody => "waiting for body",
            Self::FullMessageReceived => "full message received",
        })
    }
}

/// What has been learned about the request in progress.
pub struct RequestData {
    version: Version,
    path: String,
    method: Method,
    handler: PathHandler,
    body: BytesMut,
}

impl RequestData {
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

impl fmt::Debug for RequestData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestData")
            .field("version", &self.version)
            .field("path", &self.path)
            .field("method", &self.method)
            .field("body_len", &self.body.len())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub enum RequestCycle {
    #[default]
    NotProcessing,
    WaitingForBody(RequestData),
    FullMessageReceived(RequestData),
}

impl RequestCycle {
    pub fn read_state(&self) -> ReadState {
        match self {
            Self::NotProcessing => ReadState::NotProcessing,
            Self::WaitingForBody(_) => ReadState::WaitingForBody,
            Self::FullMessageReceived(_) => ReadState::FullMessageReceived,
        }
    }

    /// The request in progress, if any.
    pub fn request(&self) -> Option<&RequestData> {
        match self {
            Self::NotProcessing => None,
            Self::WaitingForBody(data) | Self::FullMessageReceived(data) => Some(data),
        }
    }
}

/// What the connection should do after a successful transition.
#[derive(Debug)]
pub enum Step {
    /// Keep reading parts.
    Continue,
    /// The cycle is complete; send this response.
    Respond(Response),
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("received {part} part while {state}")]
    OutOfOrderPart { part: &'static str, state: ReadState },

    #[error("no handler registered for path {path}")]
    PathNotFound { path: String },

    #[error("request has no method")]
    MissingMethod,

    #[error("{method} {path} requires a request body")]
    MissingBody { method: Method, path: String },

    #[error("request ended while {state}")]
    UnexpectedEnd { state: ReadState },

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl CycleError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::PathNotFound { .. } => StatusCode::NotFound,
            Self::MissingMethod | Self::MissingBody { .. } => StatusCode::BadRequest,
            Self::OutOfOrderPart { .. } | Self::UnexpectedEnd { .. } => {
                StatusCode::InternalServerError
            }
            Self::Dispatch(e) => e.status(),
        }
    }

    pub fn into_response(self) -> Response {
        Response::message(self.status(), self.to_string())
    }
}

/// Advances `cycle` by one decoded `part`.
///
/// Every error, and every completed cycle, leaves the connection back in
/// [`RequestCycle::NotProcessing`] with no request data.
pub async fn transition(
    cycle: RequestCycle,
    part: RequestPart,
    routes: &PathHandlerRegistry,
) -> (RequestCycle, Result<Step, CycleError>) {
    match (cycle, part) {
        (RequestCycle::NotProcessing, RequestPart::Head(head)) => match accept_head(head, routes) {
            Ok(data) => (RequestCycle::WaitingForBody(data), Ok(Step::Continue)),
            Err(e) => (RequestCycle::NotProcessing, Err(e)),
        },

        (RequestCycle::WaitingForBody(mut data), RequestPart::Body(chunk)) => {
            data.body.extend_from_slice(&chunk);
            if data.body.is_empty() && data.method.requires_body() {
                let RequestData { method, path, .. } = data;
                return (
                    RequestCycle::NotProcessing,
                    Err(CycleError::MissingBody { method, path }),
                );
            }

            debug!(method = %data.method, path = %data.path, body_len = data.body.len(), "invoking path handler");
            match (data.handler)(Bytes::copy_from_slice(&data.body)).await {
                Ok(()) => (RequestCycle::FullMessageReceived(data), Ok(Step::Continue)),
                Err(e) => (RequestCycle::NotProcessing, Err(e.into())),
            }
        }

        (RequestCycle::FullMessageReceived(_), RequestPart::End) => (
            RequestCycle::NotProcessing,
            Ok(Step::Respond(Response::message(
                StatusCode::Ok,
                ACKNOWLEDGEMENT,
            ))),
        ),

        (cycle, RequestPart::End) => (
            RequestCycle::NotProcessing,
            Err(CycleError::UnexpectedEnd {
                state: cycle.read_state(),
            }),
        ),

        (cycle, part) => (
            RequestCycle::NotProcessing,
            Err(CycleError::OutOfOrderPart {
                part: part.kind(),
                state: cycle.read_state(),
            }),
        ),
    }
}

fn accept_head(head: RequestHead, routes: &PathHandlerRegistry) -> Result<RequestData, CycleError> {
    let Some(handler) = routes.retrieve(head.path()) else {
        return Err(CycleError::PathNotFound {
            path: head.path().to_owned(),
        });
    };
    if head.method().is_empty() {
        return Err(CycleError::MissingMethod);
    }

    Ok(RequestData {
        version: head.version(),
        path: head.path().to_owned(),
        method: head.method().clone(),
        handler,
        body: BytesMut::new(),
    })
}
