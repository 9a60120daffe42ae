//! Chain node RPC integration.
//!
//! This module provides the JSON-RPC client and wire types used to read raw
//! accounts from the chain, plus the transport traits the rest of the crate is
//! written against so that tests can substitute an in-memory node.

/// JSON-RPC client for account reads and program subscriptions
mod client;
/// Wire types and RPC errors
mod types;

pub use client::SolanaRpcClient;
pub use types::{
    AccountFilter, AccountNotification, DataSlice, ProgramAccountsQuery, RawAccount, RpcError,
    Slotted,
};

use crate::governance::Address;
use std::pin::Pin;

/// Stream of account change notifications.
pub type AccountStream =
    Pin<Box<dyn futures_util::Stream<Item = Result<AccountNotification, RpcError>> + Send>>;

/// Account reads the chain reader issues against a node.
#[async_trait::async_trait]
pub trait RpcTransport: Send + Sync {
    /// Fetch accounts by address. The result has one slot per requested address,
    /// in request order, `None` for addresses with no account.
    async fn get_multiple_accounts(
        &self,
        addresses: &[Address],
    ) -> Result<Slotted<Vec<Option<RawAccount>>>, RpcError>;

    /// Fetch one account, `None` when the node has no account at `address`.
    async fn get_account_info(
        &self,
        address: &Address,
    ) -> Result<Slotted<Option<RawAccount>>, RpcError> {
        let response = self.get_multiple_accounts(std::slice::from_ref(address)).await?;
        let value = response.value.into_iter().next().ok_or_else(|| {
            RpcError::InvalidResponse("getMultipleAccounts returned no slot".to_string())
        })?;
        Ok(Slotted {
            slot: response.slot,
            value,
        })
    }

    /// Fetch all accounts owned by `program` that pass every filter.
    async fn get_program_accounts(
        &self,
        program: &Address,
        query: &ProgramAccountsQuery,
    ) -> Result<Slotted<Vec<(Address, RawAccount)>>, RpcError>;
}

/// Push source of account changes.
#[async_trait::async_trait]
pub trait AccountChangeSource: Send + Sync {
    async fn subscribe(
        &self,
        program: &Address,
        filters: &[AccountFilter],
    ) -> Result<AccountStream, RpcError>;
}
