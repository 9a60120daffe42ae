//! Read-side reconciliation core for on-chain DAO governance.
//!
//! Raw governance accounts are read from a chain node, decoded, joined with
//! off-chain realm settings and feed items, and served as cached views through
//! a field-based query façade. A program subscription keeps the cache honest.

pub mod cache;
pub mod chain;
pub mod config;
pub mod error;
pub mod governance;
pub mod query;
pub mod reconcile;
pub mod rpc;
pub mod sync;
pub mod utils;

pub use config::{ConfigError, ServiceConfig};
pub use error::CoreError;
pub use query::{Principal, QueryError, QueryFacade};
pub use reconcile::{ReadOptions, ReconciliationEngine};
