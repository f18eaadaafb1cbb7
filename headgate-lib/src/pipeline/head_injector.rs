use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use http::header::CONTENT_LENGTH;
use http::StatusCode;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::pipeline::handler::{
    EventSink, EventSource, Handler, HandlerFuture, ResponseEvent, Scope, ScopeKind,
    EVENT_CHANNEL_CAPACITY,
};
use crate::pipeline::snippet::InjectionSnippet;

/// Injection anchor: the first occurrence in the response body marks
/// where the snippet goes
pub const HEAD_MARKER: &[u8] = b"</head>";

/// Rewrites the root document of the wrapped application so the client
/// bootstrap snippet lands immediately before `</head>`, while every
/// other exchange streams through untouched.
pub struct HeadInjector {
    inner: Arc<dyn Handler>,
    snippet: InjectionSnippet,
    max_buffer_bytes: usize,
}

impl HeadInjector {
    pub fn new(inner: Arc<dyn Handler>, snippet: InjectionSnippet, max_buffer_bytes: usize) -> Self {
        Self {
            inner,
            snippet,
            max_buffer_bytes,
        }
    }
}

impl Handler for HeadInjector {
    fn handle(&self, scope: Scope, inbound: EventSource, outbound: EventSink) -> HandlerFuture<'_> {
        Box::pin(async move {
            // Only the root document of a plain HTTP exchange is a rewrite
            // candidate; everything else passes through with no overhead.
            if scope.kind != ScopeKind::Http || scope.path != "/" {
                return self.inner.handle(scope, inbound, outbound).await;
            }

            let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
            let inner_fut = self.inner.handle(scope, inbound, events_tx);
            let relay_fut = relay(events_rx, outbound, &self.snippet, self.max_buffer_bytes);

            let (inner_res, relay_res) = tokio::join!(inner_fut, relay_fut);
            inner_res?;
            relay_res
        })
    }
}

/// Relay response events from the inner handler to the outbound sink,
/// holding body chunks back until the marker decision is made.
///
/// The accumulation buffer lives for exactly one response and is never
/// partially emitted: chunks leave either rewritten in one piece, or
/// verbatim once interception ends.
async fn relay(
    mut events: mpsc::Receiver<ResponseEvent>,
    outbound: EventSink,
    snippet: &InjectionSnippet,
    max_buffer_bytes: usize,
) -> Result<()> {
    let mut intercepting = true;
    let mut buffer = BytesMut::new();

    while let Some(event) = events.recv().await {
        if !intercepting {
            outbound.send(event).await?;
            continue;
        }

        match event {
            ResponseEvent::Start {
                status,
                mut headers,
            } => {
                if status != StatusCode::OK {
                    // Only successful responses are rewrite candidates
                    trace!(%status, "non-200 root response, passing through");
                    intercepting = false;
                } else {
                    // The body length is about to change; a stale length
                    // would break framing
                    headers.remove(CONTENT_LENGTH);
                }
                // Header events are never buffered
                outbound.send(ResponseEvent::Start { status, headers }).await?;
            }
            ResponseEvent::Body { chunk, more } => {
                buffer.extend_from_slice(&chunk);

                if let Some(at) = find_marker(&buffer) {
                    let rewritten = inject_at(&mut buffer, at, snippet);
                    intercepting = false;
                    debug!(offset = at, "injected bootstrap snippet before head marker");
                    outbound
                        .send(ResponseEvent::Body {
                            chunk: rewritten,
                            more,
                        })
                        .await?;
                } else if !more {
                    // The entire response was seen and the marker never
                    // appeared; release everything unmodified
                    let flushed = buffer.split().freeze();
                    intercepting = false;
                    outbound
                        .send(ResponseEvent::Body {
                            chunk: flushed,
                            more: false,
                        })
                        .await?;
                } else if buffer.len() > max_buffer_bytes {
                    // Cap reached without a marker; give up on injection
                    // rather than buffer without bound
                    warn!(
                        buffered = buffer.len(),
                        cap = max_buffer_bytes,
                        "head marker not found within buffer cap, streaming uninjected"
                    );
                    let flushed = buffer.split().freeze();
                    intercepting = false;
                    outbound
                        .send(ResponseEvent::Body {
                            chunk: flushed,
                            more: true,
                        })
                        .await?;
                }
                // Otherwise hold: more chunks are coming and the marker
                // may still arrive
            }
        }
    }

    Ok(())
}

/// Byte-exact search for the first `</head>` in the buffer
fn find_marker(buffer: &[u8]) -> Option<usize> {
    if buffer.len() < HEAD_MARKER.len() {
        return None;
    }
    buffer
        .windows(HEAD_MARKER.len())
        .position(|window| window == HEAD_MARKER)
}

/// Splice the snippet in immediately before the marker, consuming the
/// accumulated buffer
fn inject_at(buffer: &mut BytesMut, at: usize, snippet: &InjectionSnippet) -> Bytes {
    let mut rewritten = BytesMut::with_capacity(buffer.len() + snippet.len());
    rewritten.extend_from_slice(&buffer[..at]);
    rewritten.extend_from_slice(snippet.as_bytes());
    rewritten.extend_from_slice(&buffer[at..]);
    buffer.clear();
    rewritten.freeze()
}
