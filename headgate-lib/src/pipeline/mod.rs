pub mod access_gate;
pub mod handler;
pub mod head_injector;
pub mod snippet;

pub use access_gate::{AccessGate, DENIAL_BODY, SHARED_SECRET_HEADER};
pub use handler::{
    EventSink, EventSource, Handler, HandlerFuture, RequestEvent, ResponseEvent, Scope, ScopeKind,
    EVENT_CHANNEL_CAPACITY,
};
pub use head_injector::{HeadInjector, HEAD_MARKER};
pub use snippet::InjectionSnippet;

use std::sync::Arc;

use crate::config::Config;

/// Compose the full middleware pipeline around an inner application
/// handler: `AccessGate(HeadInjector(inner))`.
///
/// The gate sits outermost so unauthorized traffic is rejected before
/// any response-body processing. Construction is pure: the snippet is
/// precomputed once and nothing else is allocated per process.
pub fn build_pipeline(inner: Arc<dyn Handler>, config: &Config) -> Arc<dyn Handler> {
    let snippet = InjectionSnippet::build(&config.injection);
    let injector = HeadInjector::new(inner, snippet, config.injection.max_buffer_bytes);
    Arc::new(AccessGate::new(
        Arc::new(injector),
        config.auth.shared_secret.clone().into_bytes(),
    ))
}
