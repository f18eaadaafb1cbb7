use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use http::header::UPGRADE;
use http::{HeaderMap, Request, Response, StatusCode};
use http_body::{Body, Frame};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::pipeline::{
    Handler, RequestEvent, ResponseEvent, Scope, ScopeKind, EVENT_CHANNEL_CAPACITY,
};

pub(crate) type RespBody = BoxBody<Bytes, GatewayError>;

/// Drive one hyper exchange through the pipeline: the request becomes a
/// scope plus inbound events, the response event stream becomes a hyper
/// response.
pub(crate) async fn serve_exchange(
    handler: Arc<dyn Handler>,
    mut req: Request<Incoming>,
) -> Response<RespBody> {
    let kind = if is_websocket_upgrade(req.headers()) {
        ScopeKind::WebSocket
    } else {
        ScopeKind::Http
    };
    let upgrade = (kind == ScopeKind::WebSocket).then(|| hyper::upgrade::on(&mut req));

    let (parts, body) = req.into_parts();
    let scope = Scope {
        kind,
        method: parts.method,
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        headers: parts.headers,
        upgrade,
    };

    let (request_tx, request_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (response_tx, mut response_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    spawn_request_pump(body, request_tx);
    tokio::spawn(async move {
        if let Err(e) = handler.handle(scope, request_rx, response_tx).await {
            match e {
                GatewayError::ExchangeClosed => debug!("exchange closed by peer"),
                e => warn!(error = %e, "pipeline error"),
            }
        }
    });

    match response_rx.recv().await {
        Some(ResponseEvent::Start { status, headers }) => {
            let mut response = Response::new(EventBody::new(response_rx).boxed());
            *response.status_mut() = status;
            *response.headers_mut() = headers;
            response
        }
        Some(ResponseEvent::Body { .. }) => {
            warn!("pipeline emitted a body event before the response start");
            synthetic_error_response(StatusCode::BAD_GATEWAY)
        }
        None => {
            warn!("pipeline finished without producing a response");
            synthetic_error_response(StatusCode::BAD_GATEWAY)
        }
    }
}

/// WebSocket exchanges are recognized by the `Upgrade: websocket` header
/// of the handshake request
fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get_all(UPGRADE)
        .iter()
        .any(|value| value.as_bytes().eq_ignore_ascii_case(b"websocket"))
}

/// Pump the hyper request body into inbound events until it ends or the
/// pipeline stops listening
fn spawn_request_pump(mut body: Incoming, events: mpsc::Sender<RequestEvent>) {
    tokio::spawn(async move {
        while let Some(frame) = body.frame().await {
            match frame {
                Ok(frame) => {
                    if let Ok(chunk) = frame.into_data() {
                        if events
                            .send(RequestEvent::Body { chunk, more: true })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                }
                Err(e) => {
                    debug!(error = %e, "request body ended with error");
                    return;
                }
            }
        }

        let _ = events
            .send(RequestEvent::Body {
                chunk: Bytes::new(),
                more: false,
            })
            .await;
    });
}

/// Build an empty synthetic response for pipeline-level failures
fn synthetic_error_response(status: StatusCode) -> Response<RespBody> {
    let mut response = Response::new(
        Full::new(Bytes::new())
            .map_err(|never| match never {})
            .boxed(),
    );
    *response.status_mut() = status;
    response
}

/// Response body streaming out of the pipeline's event channel.
///
/// The stream is complete only after a `Body` event with `more == false`;
/// a channel that closes earlier surfaces as a body error so the
/// transport aborts the exchange instead of framing a truncated body as
/// complete.
pub(crate) struct EventBody {
    events: mpsc::Receiver<ResponseEvent>,
    done: bool,
}

impl EventBody {
    pub(crate) fn new(events: mpsc::Receiver<ResponseEvent>) -> Self {
        Self {
            events,
            done: false,
        }
    }
}

impl Body for EventBody {
    type Data = Bytes;
    type Error = GatewayError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<std::result::Result<Frame<Bytes>, GatewayError>>> {
        let this = self.get_mut();
        loop {
            if this.done {
                return Poll::Ready(None);
            }
            match this.events.poll_recv(cx) {
                Poll::Ready(Some(ResponseEvent::Body { chunk, more })) => {
                    if !more {
                        this.done = true;
                    }
                    if chunk.is_empty() {
                        continue;
                    }
                    return Poll::Ready(Some(Ok(Frame::data(chunk))));
                }
                Poll::Ready(Some(ResponseEvent::Start { .. })) => {
                    return Poll::Ready(Some(Err(GatewayError::Http(
                        "response start emitted twice".to_string(),
                    ))));
                }
                Poll::Ready(None) => {
                    return Poll::Ready(Some(Err(GatewayError::ExchangeClosed)));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.done
    }
}
