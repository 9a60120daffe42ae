//! Event system for the change watcher.
//!
//! The watcher turns raw account notifications into [`ChainEvent`]s and hands
//! them to every registered [`ChainEventHandler`]. Handlers decide what a change
//! means: the cache handler drops the affected realm, the logging handler just
//! records it. Keeping the two apart lets the watcher be tested without a cache.

use super::SyncError;
use crate::cache::QueryCache;
use crate::governance::decoder::PARENT_OFFSET;
use crate::governance::{AccountType, Address, decode_any, peek_header};
use crate::rpc::AccountNotification;
use std::sync::Arc;
use tracing::{debug, info};

/// Events observed while watching the governance program
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    /// An account owned by the program changed
    AccountChanged {
        address: Address,
        /// Kind from the account header, if it has one we know.
        account_type: Option<AccountType>,
        /// Realm recorded in the account body (realms, governances, member records).
        realm: Option<Address>,
        /// First body field: the governance of a proposal, the proposal of a vote record.
        parent: Option<Address>,
        slot: u64,
    },
    /// The subscription dropped; changes may be missed until it is back
    SubscriptionLost { reason: String },
    /// The subscription was re-established after `attempts` failures
    Resubscribed { attempts: u32 },
}

/// Trait for handling chain events.
#[async_trait::async_trait]
pub trait ChainEventHandler: Send + Sync {
    /// Handle a chain event.
    async fn handle(&mut self, event: &ChainEvent) -> Result<(), SyncError>;

    /// Get the name of this handler for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// Event dispatcher that manages multiple event handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Box<dyn ChainEventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new event handler.
    ///
    /// Handlers are called in the order they are registered.
    pub fn register_handler(&mut self, handler: Box<dyn ChainEventHandler>) {
        self.handlers.push(handler);
    }

    /// Dispatch an event to all registered handlers.
    ///
    /// Errors from handlers are logged, but do not stop other handlers from running.
    pub async fn dispatch(&mut self, event: &ChainEvent) {
        for handler in &mut self.handlers {
            if let Err(e) = handler.handle(event).await {
                tracing::error!("Handler {} failed to process event: {}", handler.name(), e);
            }
        }
    }
}

/// Convert a program notification into a chain event.
pub fn convert_notification(notification: &AccountNotification) -> ChainEvent {
    let data = &notification.account.data;
    let account_type = peek_header(data).map(|(kind, _)| kind);
    let realm = match account_type {
        Some(AccountType::Realm) => Some(notification.address),
        Some(AccountType::Governance | AccountType::TokenOwnerRecord) => {
            decode_any(data).ok().and_then(|entity| entity.realm())
        }
        _ => None,
    };
    let parent = match account_type {
        Some(AccountType::Proposal | AccountType::VoteRecord) => data
            .get(PARENT_OFFSET..PARENT_OFFSET + 32)
            .and_then(Address::from_slice),
        _ => None,
    };

    ChainEvent::AccountChanged {
        address: notification.address,
        account_type,
        realm,
        parent,
        slot: notification.slot,
    }
}

/// Drops cached views affected by account changes.
pub struct CacheInvalidationHandler {
    cache: Arc<QueryCache>,
}

impl CacheInvalidationHandler {
    pub fn new(cache: Arc<QueryCache>) -> Self {
        Self { cache }
    }

    /// Realm whose views depend on the changed account, as far as we know.
    fn realm_for(
        &self,
        address: &Address,
        realm: Option<Address>,
        parent: Option<Address>,
    ) -> Option<Address> {
        let index = self.cache.index();
        realm
            .or_else(|| parent.and_then(|p| index.realm_of(&p)))
            .or_else(|| index.realm_of(address))
    }
}

#[async_trait::async_trait]
impl ChainEventHandler for CacheInvalidationHandler {
    async fn handle(&mut self, event: &ChainEvent) -> Result<(), SyncError> {
        match event {
            ChainEvent::AccountChanged {
                address,
                realm,
                parent,
                ..
            } => match self.realm_for(address, *realm, *parent) {
                Some(realm) => self.cache.invalidate(&realm),
                // Unknown realm: only entries keyed by the account itself can be stale.
                None => self.cache.invalidate(address),
            },
            ChainEvent::Resubscribed { .. } => {
                info!("Clearing query cache after missed notifications");
                self.cache.clear();
            }
            ChainEvent::SubscriptionLost { .. } => {}
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "cache-invalidation"
    }
}

/// Logs every event at debug level.
pub struct LoggingHandler;

#[async_trait::async_trait]
impl ChainEventHandler for LoggingHandler {
    async fn handle(&mut self, event: &ChainEvent) -> Result<(), SyncError> {
        match event {
            ChainEvent::AccountChanged {
                address,
                account_type,
                slot,
                ..
            } => debug!("{:?} account {} changed at slot {}", account_type, address, slot),
            ChainEvent::SubscriptionLost { reason } => info!("Subscription lost: {}", reason),
            ChainEvent::Resubscribed { attempts } => {
                info!("Resubscribed after {} attempt(s)", attempts)
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "logging"
    }
}
