use std::sync::Arc;

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, HeaderValue, StatusCode};
use tracing::debug;

use crate::error::Result;
use crate::pipeline::handler::{
    EventSink, EventSource, Handler, HandlerFuture, ResponseEvent, Scope, ScopeKind,
};

/// Header every HTTP and WebSocket exchange must present to pass the gate
pub const SHARED_SECRET_HEADER: &str = "shiny-shared-secret";

/// Fixed body of the denial response
pub const DENIAL_BODY: &str = "Direct access to this content is not permitted.";

/// Rejects HTTP and WebSocket exchanges that do not present the shared
/// secret, before anything downstream sees them.
pub struct AccessGate {
    inner: Arc<dyn Handler>,
    secret: Bytes,
}

impl AccessGate {
    pub fn new(inner: Arc<dyn Handler>, secret: impl Into<Bytes>) -> Self {
        Self {
            inner,
            secret: secret.into(),
        }
    }

    /// Linear scan over the header list; the first byte-exact value match
    /// authorizes. Duplicate headers are permitted and checked in order.
    fn is_authorized(&self, scope: &Scope) -> bool {
        match scope.kind {
            ScopeKind::Http | ScopeKind::WebSocket => {}
            // Only HTTP and WebSocket exchanges are gated
            _ => return true,
        }

        scope
            .headers
            .get_all(SHARED_SECRET_HEADER)
            .iter()
            .any(|value| value.as_bytes() == self.secret)
    }
}

impl Handler for AccessGate {
    fn handle(&self, scope: Scope, inbound: EventSource, outbound: EventSink) -> HandlerFuture<'_> {
        Box::pin(async move {
            if self.is_authorized(&scope) {
                return self.inner.handle(scope, inbound, outbound).await;
            }

            debug!(path = %scope.path, kind = ?scope.kind, "missing or mismatched shared secret");
            deny(&outbound).await
        })
    }
}

/// Emit the fixed 403 denial and finish the exchange
async fn deny(outbound: &EventSink) -> Result<()> {
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(CONTENT_LENGTH, HeaderValue::from(DENIAL_BODY.len()));

    outbound
        .send(ResponseEvent::Start {
            status: StatusCode::FORBIDDEN,
            headers,
        })
        .await?;
    outbound
        .send(ResponseEvent::Body {
            chunk: Bytes::from_static(DENIAL_BODY.as_bytes()),
            more: false,
        })
        .await?;

    Ok(())
}
