use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use http::{HeaderMap, Request, StatusCode, Uri};
use http_body::{Body, Frame};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper::upgrade::OnUpgrade;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tracing::{debug, warn};

use crate::error::{GatewayError, Result};
use crate::pipeline::{
    EventSink, EventSource, Handler, HandlerFuture, RequestEvent, ResponseEvent, Scope, ScopeKind,
};

type ReqBody = BoxBody<Bytes, Infallible>;
type HttpClient = Client<HttpConnector, ReqBody>;

/// Inner handler that forwards every authorized exchange to the wrapped
/// application server.
pub struct UpstreamHandler {
    client: HttpClient,
    authority: String,
}

impl UpstreamHandler {
    pub fn new(authority: impl Into<String>, connect_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            client,
            authority: authority.into(),
        }
    }

    fn upstream_uri(&self, scope: &Scope) -> Result<Uri> {
        let target = match &scope.query {
            Some(query) => format!("http://{}{}?{}", self.authority, scope.path, query),
            None => format!("http://{}{}", self.authority, scope.path),
        };
        Ok(target.parse::<Uri>()?)
    }

    async fn forward_http(
        &self,
        scope: Scope,
        inbound: EventSource,
        outbound: EventSink,
    ) -> Result<()> {
        let uri = self.upstream_uri(&scope)?;

        // Only stream a body upstream when the request advertises one, so
        // bodyless methods keep their framing
        let body: ReqBody = if request_advertises_body(&scope.headers) {
            RequestEventBody::new(inbound).boxed()
        } else {
            Empty::<Bytes>::new().boxed()
        };
        let req = build_upstream_request(&scope, uri, body)?;

        let resp = match self.client.request(req).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(error = %e, authority = %self.authority, "upstream request failed");
                return send_bad_gateway(&outbound).await;
            }
        };

        let (parts, body) = resp.into_parts();
        outbound
            .send(ResponseEvent::Start {
                status: parts.status,
                headers: parts.headers,
            })
            .await?;
        stream_response_body(body, &outbound).await
    }

    async fn relay_websocket(&self, mut scope: Scope, outbound: EventSink) -> Result<()> {
        let downstream = scope.upgrade.take();
        let uri = self.upstream_uri(&scope)?;
        let req = build_upstream_request(&scope, uri, Empty::<Bytes>::new().boxed())?;

        let mut resp = match self.client.request(req).await {
            Ok(resp) => resp,
            Err(e) => {
                warn!(error = %e, authority = %self.authority, "upstream websocket handshake failed");
                return send_bad_gateway(&outbound).await;
            }
        };

        if resp.status() == StatusCode::SWITCHING_PROTOCOLS {
            let upstream_upgrade = hyper::upgrade::on(&mut resp);
            match downstream {
                Some(downstream) => spawn_session_bridge(downstream, upstream_upgrade),
                None => warn!("websocket exchange without an upgrade handle"),
            }
        }

        let (parts, body) = resp.into_parts();
        outbound
            .send(ResponseEvent::Start {
                status: parts.status,
                headers: parts.headers,
            })
            .await?;
        stream_response_body(body, &outbound).await
    }
}

impl Handler for UpstreamHandler {
    fn handle(&self, scope: Scope, inbound: EventSource, outbound: EventSink) -> HandlerFuture<'_> {
        Box::pin(async move {
            match scope.kind {
                ScopeKind::Http => self.forward_http(scope, inbound, outbound).await,
                ScopeKind::WebSocket => self.relay_websocket(scope, outbound).await,
                // Nothing to forward for runtime lifecycle events
                ScopeKind::Lifecycle => Ok(()),
            }
        })
    }
}

fn request_advertises_body(headers: &HeaderMap) -> bool {
    headers.contains_key(CONTENT_LENGTH) || headers.contains_key(TRANSFER_ENCODING)
}

fn build_upstream_request(scope: &Scope, uri: Uri, body: ReqBody) -> Result<Request<ReqBody>> {
    let mut req = Request::builder()
        .method(scope.method.clone())
        .uri(uri)
        .body(body)
        .map_err(|e| GatewayError::Http(format!("Failed to build upstream request: {e}")))?;

    // The app server should see its own authority, not the caller's
    let mut headers = scope.headers.clone();
    headers.remove(HOST);
    *req.headers_mut() = headers;

    Ok(req)
}

/// Forward the upstream response body as events, one per data frame,
/// with a final empty end-of-stream event.
async fn stream_response_body(mut body: Incoming, outbound: &EventSink) -> Result<()> {
    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(|e| GatewayError::Upstream(format!("upstream body error: {e}")))?;
        if let Ok(chunk) = frame.into_data() {
            outbound
                .send(ResponseEvent::Body { chunk, more: true })
                .await?;
        }
        // Trailer frames are dropped; the event contract carries none
    }

    outbound
        .send(ResponseEvent::Body {
            chunk: Bytes::new(),
            more: false,
        })
        .await?;

    Ok(())
}

/// Synthetic response when the app server cannot be reached
async fn send_bad_gateway(outbound: &EventSink) -> Result<()> {
    outbound
        .send(ResponseEvent::Start {
            status: StatusCode::BAD_GATEWAY,
            headers: HeaderMap::new(),
        })
        .await?;
    outbound
        .send(ResponseEvent::Body {
            chunk: Bytes::new(),
            more: false,
        })
        .await?;

    Ok(())
}

/// Once both sides finish upgrading, shuttle session bytes verbatim in
/// both directions until either side closes.
fn spawn_session_bridge(downstream: OnUpgrade, upstream: OnUpgrade) {
    tokio::spawn(async move {
        let (downstream, upstream) = match tokio::try_join!(downstream, upstream) {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, "websocket upgrade did not complete");
                return;
            }
        };

        let mut downstream = TokioIo::new(downstream);
        let mut upstream = TokioIo::new(upstream);
        match tokio::io::copy_bidirectional(&mut downstream, &mut upstream).await {
            Ok((to_upstream, to_downstream)) => {
                debug!(to_upstream, to_downstream, "websocket session closed");
            }
            Err(e) => debug!(error = %e, "websocket session ended with error"),
        }
    });
}

/// Streams inbound request events into an upstream request body
struct RequestEventBody {
    inbound: EventSource,
    done: bool,
}

impl RequestEventBody {
    fn new(inbound: EventSource) -> Self {
        Self {
            inbound,
            done: false,
        }
    }
}

impl Body for RequestEventBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<std::result::Result<Frame<Bytes>, Infallible>>> {
        let this = self.get_mut();
        loop {
            if this.done {
                return Poll::Ready(None);
            }
            match this.inbound.poll_recv(cx) {
                Poll::Ready(Some(RequestEvent::Body { chunk, more })) => {
                    if !more {
                        this.done = true;
                    }
                    if chunk.is_empty() {
                        continue;
                    }
                    return Poll::Ready(Some(Ok(Frame::data(chunk))));
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.done
    }
}
