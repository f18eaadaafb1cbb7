#![allow(dead_code)]
//! Shared test helpers for pipeline tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use headgate_lib::pipeline::{
    EventSink, EventSource, Handler, HandlerFuture, ResponseEvent, Scope, ScopeKind,
};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use tokio::sync::mpsc;

/// Inner handler that replays a scripted response event sequence and
/// counts how often it was invoked.
pub struct ScriptedHandler {
    events: Vec<ResponseEvent>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedHandler {
    pub fn new(events: Vec<ResponseEvent>) -> Self {
        Self {
            events,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A response with the given status, empty headers, and the body
    /// split across the given chunks.
    pub fn with_body(status: StatusCode, chunks: &[&[u8]]) -> Self {
        Self::with_headers(status, HeaderMap::new(), chunks)
    }

    pub fn with_headers(status: StatusCode, headers: HeaderMap, chunks: &[&[u8]]) -> Self {
        let mut events = vec![ResponseEvent::Start { status, headers }];
        for (i, chunk) in chunks.iter().enumerate() {
            events.push(ResponseEvent::Body {
                chunk: Bytes::copy_from_slice(chunk),
                more: i + 1 < chunks.len(),
            });
        }
        Self::new(events)
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl Handler for ScriptedHandler {
    fn handle(
        &self,
        _scope: Scope,
        _inbound: EventSource,
        outbound: EventSink,
    ) -> HandlerFuture<'_> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let events = self.events.clone();
        Box::pin(async move {
            for event in events {
                outbound.send(event).await?;
            }
            Ok(())
        })
    }
}

/// Run one exchange with an empty request and collect every response
/// event the handler emits.
pub async fn run_exchange(handler: &dyn Handler, scope: Scope) -> Vec<ResponseEvent> {
    let (request_tx, request_rx) = mpsc::channel(1);
    let (response_tx, mut response_rx) = mpsc::channel(16);
    drop(request_tx);

    let drive = handler.handle(scope, request_rx, response_tx);
    let drain = async {
        let mut events = Vec::new();
        while let Some(event) = response_rx.recv().await {
            events.push(event);
        }
        events
    };

    let (result, events) = tokio::join!(drive, drain);
    result.expect("exchange failed");
    events
}

pub fn http_scope(path: &str) -> Scope {
    Scope::new(ScopeKind::Http, Method::GET, path, HeaderMap::new())
}

pub fn scope_with_header(kind: ScopeKind, name: &'static str, value: &str) -> Scope {
    let mut headers = HeaderMap::new();
    headers.insert(name, HeaderValue::from_str(value).unwrap());
    Scope::new(kind, Method::GET, "/", headers)
}

/// Status and headers of the leading `Start` event
pub fn response_start(events: &[ResponseEvent]) -> (StatusCode, &HeaderMap) {
    match events.first() {
        Some(ResponseEvent::Start { status, headers }) => (*status, headers),
        other => panic!("expected a response start, got {other:?}"),
    }
}

/// All body bytes concatenated in emission order
pub fn body_bytes(events: &[ResponseEvent]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for event in events {
        if let ResponseEvent::Body { chunk, .. } = event {
            bytes.extend_from_slice(chunk);
        }
    }
    bytes
}

/// Number of body events emitted
pub fn body_event_count(events: &[ResponseEvent]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, ResponseEvent::Body { .. }))
        .count()
}
