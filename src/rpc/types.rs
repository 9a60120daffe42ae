//! Types for the JSON-RPC account API

use crate::governance::Address;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;

/// Raw account as returned by the node, with data already base64-decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAccount {
    pub data: Vec<u8>,
    pub owner: Address,
    pub lamports: u64,
}

/// A value together with the slot the node reported it at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slotted<T> {
    pub slot: u64,
    pub value: T,
}

/// Server-side filter for `getProgramAccounts`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AccountFilter {
    /// Account data length must equal this size.
    DataSize(u64),
    /// Account data at `offset` must start with `bytes`.
    Memcmp { offset: usize, bytes: Vec<u8> },
}

impl AccountFilter {
    pub fn memcmp(offset: usize, bytes: impl Into<Vec<u8>>) -> Self {
        AccountFilter::Memcmp {
            offset,
            bytes: bytes.into(),
        }
    }

    /// Whether `data` passes this filter. Mirrors the node's evaluation.
    pub fn matches(&self, data: &[u8]) -> bool {
        match self {
            AccountFilter::DataSize(size) => data.len() as u64 == *size,
            AccountFilter::Memcmp { offset, bytes } => data
                .get(*offset..offset + bytes.len())
                .is_some_and(|window| window == bytes.as_slice()),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            AccountFilter::DataSize(size) => json!({ "dataSize": size }),
            AccountFilter::Memcmp { offset, bytes } => json!({
                "memcmp": {
                    "offset": offset,
                    "bytes": STANDARD.encode(bytes),
                    "encoding": "base64"
                }
            }),
        }
    }
}

/// Restricts returned account data to `length` bytes starting at `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataSlice {
    pub offset: usize,
    pub length: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ProgramAccountsQuery {
    pub filters: Vec<AccountFilter>,
    pub data_slice: Option<DataSlice>,
}

impl ProgramAccountsQuery {
    pub fn new(filters: Vec<AccountFilter>) -> Self {
        Self {
            filters,
            data_slice: None,
        }
    }

    pub fn with_data_slice(mut self, offset: usize, length: usize) -> Self {
        self.data_slice = Some(DataSlice { offset, length });
        self
    }
}

/// Account change pushed by a program subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountNotification {
    pub address: Address,
    pub account: RawAccount,
    pub slot: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RpcContext {
    pub slot: u64,
}

/// `{ context, value }` envelope used by account methods.
#[derive(Debug, Deserialize)]
pub(crate) struct RpcEnvelope<T> {
    pub context: RpcContext,
    pub value: T,
}

/// Account in `base64` encoding as sent by the node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct UiAccount {
    /// `[payload, encoding]`
    pub data: (String, String),
    pub owner: String,
    pub lamports: u64,
}

impl UiAccount {
    pub fn into_raw(self) -> Result<RawAccount, RpcError> {
        let (payload, encoding) = self.data;
        if encoding != "base64" {
            return Err(RpcError::InvalidResponse(format!(
                "unexpected account encoding {}",
                encoding
            )));
        }
        let data = STANDARD
            .decode(payload)
            .map_err(|e| RpcError::InvalidResponse(format!("bad base64 account data: {}", e)))?;
        let owner = self
            .owner
            .parse()
            .map_err(|e| RpcError::InvalidResponse(format!("bad owner: {}", e)))?;
        Ok(RawAccount {
            data,
            owner,
            lamports: self.lamports,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct KeyedUiAccount {
    pub pubkey: String,
    pub account: UiAccount,
}

impl KeyedUiAccount {
    pub fn into_raw(self) -> Result<(Address, RawAccount), RpcError> {
        let address = self
            .pubkey
            .parse()
            .map_err(|e| RpcError::InvalidResponse(format!("bad pubkey: {}", e)))?;
        Ok((address, self.account.into_raw()?))
    }
}

/// Error types for RPC operations
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("request timed out")]
    Timeout,

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("subscription error: {0}")]
    SubscriptionError(String),

    #[error("client closed")]
    Closed,
}

/// JSON-RPC server error codes that mean "try again later".
const TRANSIENT_RPC_CODES: &[i64] = &[
    -32004, // block not available
    -32005, // node is behind
    -32014, // block status not yet available
    -32016, // minimum context slot not reached
];

impl RpcError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            RpcError::HttpError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            RpcError::Status { status, .. } => *status >= 500,
            RpcError::RateLimited { .. } | RpcError::Timeout => true,
            RpcError::Rpc { code, .. } => TRANSIENT_RPC_CODES.contains(code),
            RpcError::WebSocketError(_) | RpcError::SubscriptionError(_) => true,
            RpcError::JsonError(_) | RpcError::InvalidResponse(_) | RpcError::Closed => false,
        }
    }

    /// Whether a failed multi-account request could be caused by some of its
    /// addresses rather than by the node or the link to it.
    pub fn may_be_address_specific(&self) -> bool {
        match self {
            RpcError::Timeout | RpcError::JsonError(_) | RpcError::InvalidResponse(_) => true,
            RpcError::HttpError(e) => e.is_timeout() || e.is_decode(),
            RpcError::Status { status, .. } => *status == 413,
            RpcError::Rpc { code, .. } => !TRANSIENT_RPC_CODES.contains(code),
            RpcError::RateLimited { .. }
            | RpcError::WebSocketError(_)
            | RpcError::SubscriptionError(_)
            | RpcError::Closed => false,
        }
    }

    /// Server-requested delay before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RpcError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RpcError::RateLimited { .. })
    }
}
