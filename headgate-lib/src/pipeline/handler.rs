use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use hyper::upgrade::OnUpgrade;
use tokio::sync::mpsc;

use crate::error::Result;

/// Bounded capacity of the per-exchange event channels
pub const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Protocol kind of one inbound exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// A plain HTTP request/response exchange
    Http,
    /// A WebSocket handshake and the session behind it
    WebSocket,
    /// Host runtime lifecycle events (startup/shutdown); never gated
    Lifecycle,
}

/// Per-exchange connection descriptor, created by the host runtime.
///
/// Middlewares read `kind`, `path` and `headers`; the remaining fields
/// are populated by the server adapter for the upstream forwarder and
/// pass through the pipeline untouched.
#[derive(Debug)]
pub struct Scope {
    pub kind: ScopeKind,
    pub method: Method,
    /// Request path without the query string
    pub path: String,
    /// Raw query string, without the leading '?'
    pub query: Option<String>,
    /// Ordered header list; names are canonical lowercase, values raw bytes
    pub headers: HeaderMap,
    /// Upgrade handle for WebSocket exchanges, taken by the forwarder
    pub upgrade: Option<OnUpgrade>,
}

impl Scope {
    pub fn new(
        kind: ScopeKind,
        method: Method,
        path: impl Into<String>,
        headers: HeaderMap,
    ) -> Self {
        Self {
            kind,
            method,
            path: path.into(),
            query: None,
            headers,
            upgrade: None,
        }
    }
}

/// Inbound events delivered to a handler for one exchange
#[derive(Debug, Clone)]
pub enum RequestEvent {
    /// A request body chunk; `more` is false on the final chunk
    Body { chunk: Bytes, more: bool },
}

/// Outbound events produced by a handler for one exchange.
///
/// A well-formed exchange emits exactly one `Start` followed by one or
/// more `Body` events, the last of which has `more == false`.
#[derive(Debug, Clone)]
pub enum ResponseEvent {
    Start { status: StatusCode, headers: HeaderMap },
    Body { chunk: Bytes, more: bool },
}

/// Source of inbound request events for one exchange
pub type EventSource = mpsc::Receiver<RequestEvent>;

/// Sink for the outbound response events of one exchange
pub type EventSink = mpsc::Sender<ResponseEvent>;

pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// One composable exchange handler.
///
/// A handler completes when its exchange is done. Middlewares implement
/// this same contract around an inner handler, so a pipeline is nothing
/// more than nested `Arc<dyn Handler>` values.
pub trait Handler: Send + Sync {
    fn handle(&self, scope: Scope, inbound: EventSource, outbound: EventSink) -> HandlerFuture<'_>;
}
