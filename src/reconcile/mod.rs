//! Reconciliation of on-chain governance state with off-chain records.
//!
//! The engine reads raw accounts through the chain reader, decodes them,
//! derives proposal state and vote tallies, joins the result with the
//! relational store and serves it as paginated, cached views.

/// Pagination cursors and filter hashing
pub mod cursor;
/// Engine operations
mod engine;
/// Proposal lifecycle derivation
pub mod proposal_state;
/// Off-chain relational store
pub mod store;
/// Vote tallying
pub mod tally;
/// Output views
pub mod views;

pub use cursor::{Cursor, SortKey};
pub use engine::{EngineConfig, MemberFilter, ProposalFilter, ReadOptions, ReconciliationEngine};
pub use proposal_state::{ProposalState, derive_state, threshold_weight};
pub use store::{
    FeedItemKind, FeedItemRecord, InMemoryStore, OffChainStore, RealmSettings, StoreError,
    StoreSnapshot,
};
pub use tally::{VoteTotals, WeightPolicy, tally_votes};
pub use views::*;
