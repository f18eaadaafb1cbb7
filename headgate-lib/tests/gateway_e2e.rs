#![forbid(unsafe_code)]

use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use headgate_lib::config::{AuthConfig, Config, InjectionConfig, LoggingConfig, TimeoutConfig};
use headgate_lib::pipeline::{build_pipeline, InjectionSnippet, DENIAL_BODY, SHARED_SECRET_HEADER};
use headgate_lib::upstream::UpstreamHandler;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::time::sleep;

const SECRET: &str = "e2e-secret";
const ROOT_HTML: &str = "<html><head><title>app</title></head><body>root</body></html>";
const OTHER_HTML: &str = "<html><head></head><body>other</body></html>";
const MISSING_HTML: &str = "<html><head></head><body>missing</body></html>";

fn pick_free_port() -> SocketAddr {
    let listener = StdTcpListener::bind("127.0.0.1:0").expect("bind ephemeral");
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Minimal app server the gateway fronts in these tests
async fn spawn_app_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            tokio::spawn(async move {
                let svc = service_fn(|req: Request<Incoming>| async move {
                    let (status, body) = match req.uri().path() {
                        "/" => (StatusCode::OK, ROOT_HTML),
                        "/other" => (StatusCode::OK, OTHER_HTML),
                        _ => (StatusCode::NOT_FOUND, MISSING_HTML),
                    };
                    let mut resp = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
                    *resp.status_mut() = status;
                    Ok::<_, hyper::Error>(resp)
                });
                let _ = ConnBuilder::new(TokioExecutor::new())
                    .serve_connection(TokioIo::new(stream), svc)
                    .await;
            });
        }
    });

    addr
}

/// Spawn an app server plus a gateway in front of it; returns the
/// gateway address
async fn spawn_gateway() -> SocketAddr {
    let upstream_addr = spawn_app_server().await;
    let listen = pick_free_port();

    let config = Config {
        listen,
        upstream: upstream_addr.to_string(),
        auth: AuthConfig {
            shared_secret: SECRET.to_string(),
        },
        injection: InjectionConfig::default(),
        logging: LoggingConfig::default(),
        timeout: TimeoutConfig::default(),
    };

    let upstream = Arc::new(UpstreamHandler::new(
        config.upstream.clone(),
        Duration::from_millis(config.timeout.connect_ms),
    ));
    let pipeline = build_pipeline(upstream, &config);
    tokio::spawn(headgate_lib::server::run(Arc::new(config), pipeline));

    // Give the gateway a moment to bind.
    sleep(Duration::from_millis(50)).await;
    listen
}

/// The document with the default snippet spliced in before `</head>`
fn expected_injected(body: &str) -> String {
    let snippet = InjectionSnippet::build(&InjectionConfig::default());
    let snippet = String::from_utf8(snippet.as_bytes().to_vec()).unwrap();
    let at = body.find("</head>").expect("marker present");
    format!("{}{}{}", &body[..at], snippet, &body[at..])
}

#[tokio::test]
async fn denies_requests_without_the_secret() {
    let gateway = spawn_gateway().await;

    let resp = reqwest::Client::new()
        .get(format!("http://{gateway}/"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), reqwest::StatusCode::FORBIDDEN);
    assert_eq!(resp.text().await.unwrap(), DENIAL_BODY);
}

#[tokio::test]
async fn denies_requests_with_a_wrong_secret() {
    let gateway = spawn_gateway().await;

    let resp = reqwest::Client::new()
        .get(format!("http://{gateway}/"))
        .header(SHARED_SECRET_HEADER, "wrong")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), reqwest::StatusCode::FORBIDDEN);
    assert_eq!(resp.text().await.unwrap(), DENIAL_BODY);
}

#[tokio::test]
async fn injects_the_snippet_into_the_root_document() {
    let gateway = spawn_gateway().await;

    let resp = reqwest::Client::new()
        .get(format!("http://{gateway}/"))
        .header(SHARED_SECRET_HEADER, SECRET)
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    // The app server's length no longer holds once the snippet lands
    assert!(resp.headers().get("content-length").is_none());
    assert_eq!(resp.text().await.unwrap(), expected_injected(ROOT_HTML));
}

#[tokio::test]
async fn other_paths_stream_through_unmodified() {
    let gateway = spawn_gateway().await;

    let resp = reqwest::Client::new()
        .get(format!("http://{gateway}/other"))
        .header(SHARED_SECRET_HEADER, SECRET)
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(
        resp.headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok()),
        Some(OTHER_HTML.len().to_string().as_str())
    );
    assert_eq!(resp.text().await.unwrap(), OTHER_HTML);
}

#[tokio::test]
async fn non_200_root_responses_pass_through() {
    let gateway = spawn_gateway().await;

    let resp = reqwest::Client::new()
        .get(format!("http://{gateway}/nope"))
        .header(SHARED_SECRET_HEADER, SECRET)
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    assert_eq!(resp.text().await.unwrap(), MISSING_HTML);
}

#[tokio::test]
async fn unreachable_upstream_yields_bad_gateway() {
    // Gateway wired to a port nothing listens on
    let listen = pick_free_port();
    let dead_upstream = pick_free_port();

    let config = Config {
        listen,
        upstream: dead_upstream.to_string(),
        auth: AuthConfig {
            shared_secret: SECRET.to_string(),
        },
        injection: InjectionConfig::default(),
        logging: LoggingConfig::default(),
        timeout: TimeoutConfig::default(),
    };

    let upstream = Arc::new(UpstreamHandler::new(
        config.upstream.clone(),
        Duration::from_millis(config.timeout.connect_ms),
    ));
    let pipeline = build_pipeline(upstream, &config);
    tokio::spawn(headgate_lib::server::run(Arc::new(config), pipeline));
    sleep(Duration::from_millis(50)).await;

    let resp = reqwest::Client::new()
        .get(format!("http://{listen}/other"))
        .header(SHARED_SECRET_HEADER, SECRET)
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), reqwest::StatusCode::BAD_GATEWAY);
}
