//! Change watcher.
//!
//! Subscribes to the governance program over the node's websocket and turns
//! account changes into cache invalidations, so cached views do not outlive the
//! chain state they were built from by more than the notification latency.

/// Chain events, handlers and dispatcher
pub mod events;
/// Subscription loop
mod watcher;

pub use events::{
    CacheInvalidationHandler, ChainEvent, ChainEventHandler, EventDispatcher, LoggingHandler,
    convert_notification,
};
pub use watcher::{ProgramWatcher, WatcherConfig};

use crate::rpc::RpcError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("handler error: {0}")]
    Handler(String),
}
