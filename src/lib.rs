// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod api;
pub mod config;
pub mod crawl;
pub mod dedup;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod llm;
pub mod metrics;
pub mod model;
pub mod notify;
pub mod pipeline;
pub mod report;
pub mod scheduler;
pub mod search;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, AppState};
pub use crate::config::AppConfig;
pub use crate::pipeline::{Clock, Pipeline, PipelineSettings, SystemClock};
pub use crate::scheduler::Scheduler;
pub use crate::store::{MemoryStore, Store};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Component log targets are short names, not module paths.
pub const DEFAULT_LOG_FILTER: &str =
    "source_digest=info,crawl=info,scheduler=info,report=info,notify=info,store=info,pipeline=info,extract=info,llm=info,warn";

/// Install the global tracing subscriber. `LOG_FORMAT=json` switches to JSON lines;
/// the filter comes from `RUST_LOG`, else `DEFAULT_LOG_FILTER`.
/// Safe to call twice; the second call is a no-op.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    let res = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
