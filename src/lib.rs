//! # Chatsieve - Regex Chat Filtering for Embedded Hosts
//!
//! A concurrent text-filtering engine meant to be embedded in a larger host
//! application (typically a game or chat server). Inbound messages are matched
//! against compiled rules and rewritten, lower-cased, randomly replaced, or
//! used to warn their author before delivery.
//!
//! ## Architecture
//!
//! - **Filtering passes run off the host's main thread**: rules and actions
//!   never touch the live host API. Actor-dependent steps consult the
//!   [`cache::ActorSnapshotCache`] instead.
//! - **A single privileged task** owns the host directory handle. The snapshot
//!   refresher and all message deliveries are marshaled onto it through the
//!   [`bridge::HostBridge`].
//! - **No global state**: a [`filter::FilterEngine`] is constructed once at
//!   startup and threaded through to whoever needs it.

pub mod bridge;
pub mod cache;
pub mod config;
pub mod filter;
pub mod parallel;
pub mod shared;

pub use cache::{ActorRef, ActorSnapshot, ActorSnapshotCache};
pub use filter::{FilterEngine, FilterRule, MessageState};

/// Result type alias for chatsieve operations
pub type Result<T> = anyhow::Result<T>;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const PKG_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Install a `tracing` subscriber honoring `RUST_LOG`, for embedders that do
/// not bring their own. Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
