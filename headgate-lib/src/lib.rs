#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod pipeline;
pub mod server;
pub mod upstream;

pub use config::{load_from_path, Config};
pub use error::{GatewayError, Result};
pub use pipeline::{
    build_pipeline, AccessGate, Handler, HeadInjector, InjectionSnippet, ResponseEvent, Scope,
    ScopeKind,
};
pub use server::run;
pub use upstream::UpstreamHandler;
