//! Reconciled outputs returned by the engine and cached as JSON.

use super::proposal_state::ProposalState;
use super::store::RealmSettings;
use super::tally::WeightPolicy;
use crate::cache::CacheValue;
use crate::governance::{Address, GovernanceConfig};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// When a view was assembled and the newest chain slot it reflects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Freshness {
    pub fetched_at: DateTime<Utc>,
    pub slot: u64,
}

impl Freshness {
    pub fn now(slot: u64) -> Self {
        Self {
            fetched_at: Utc::now(),
            slot,
        }
    }
}

/// An account that was left out of an aggregate and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skipped {
    pub address: Address,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceView {
    pub address: Address,
    pub realm: Address,
    pub governed_account: Address,
    pub config: GovernanceConfig,
    pub proposals_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceList {
    pub realm: Address,
    pub governances: Vec<GovernanceView>,
    pub skipped: Vec<Skipped>,
    pub freshness: Freshness,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealmView {
    pub address: Address,
    pub name: String,
    pub community_mint: Address,
    pub council_mint: Option<Address>,
    pub authority: Option<Address>,
    pub voting_proposal_count: u32,
    /// Off-chain display settings, if the realm has any.
    pub settings: Option<RealmSettings>,
    pub governances: Vec<GovernanceView>,
    /// Governance accounts that could not be decoded.
    pub skipped: Vec<Skipped>,
    pub freshness: Freshness,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalView {
    pub address: Address,
    pub governance: Address,
    pub realm: Address,
    pub governing_token_mint: Address,
    pub name: String,
    pub description_link: String,
    pub state: ProposalState,
    pub yes_vote_weight: u64,
    pub no_vote_weight: u64,
    pub abstain_vote_weight: u64,
    pub electorate: u64,
    pub threshold_weight: u64,
    pub signatories_count: u8,
    pub signatories_signed_off_count: u8,
    pub draft_at: i64,
    pub voting_at: Option<i64>,
    pub voting_ends_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub cancelled_at: Option<i64>,
    /// Off-chain feed items discussing this proposal.
    pub discussion_count: usize,
    pub freshness: Freshness,
}

/// One page of a ranked listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Resume token for the next page; `None` when the page is empty.
    pub end_cursor: Option<String>,
    pub has_next: bool,
    pub skipped: Vec<Skipped>,
    pub freshness: Freshness,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Balance {
    Known { amount: u64 },
    /// The token account could not be read or decoded.
    Unknown { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBalance {
    pub token_account: Address,
    pub mint: Option<Address>,
    pub balance: Balance,
    pub decimals: Option<u8>,
    /// Balance scaled by the mint's decimals.
    pub ui_amount: Option<String>,
}

/// Treasury holdings of one mint across all of the governance's token accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintTotal {
    pub mint: Address,
    /// Sum of the known balances.
    pub amount: u64,
    pub decimals: Option<u8>,
    pub ui_amount: Option<String>,
    pub accounts: usize,
    /// Some account of this mint has an unknown balance, so `amount` is a lower bound.
    pub partial: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreasuryView {
    pub governance: Address,
    pub realm: Option<Address>,
    pub tokens: Vec<TokenBalance>,
    /// Per-mint totals, ordered by mint.
    pub totals: Vec<MintTotal>,
    /// True when at least one balance is unknown.
    pub degraded: bool,
    pub freshness: Freshness,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub proposal: Address,
    pub yes: u64,
    pub no: u64,
    pub abstain: u64,
    pub voters: u32,
    pub snapshot_weighted: u32,
    pub current_weighted: u32,
    pub unresolved_voters: Vec<Address>,
    /// Vote and token owner records that failed to decode.
    pub skipped: Vec<Skipped>,
    pub electorate: u64,
    pub threshold_weight: u64,
    pub policy: WeightPolicy,
    pub freshness: Freshness,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberView {
    pub token_owner_record: Address,
    pub owner: Address,
    pub governing_token_mint: Address,
    pub deposit: u64,
    pub unrelinquished_votes_count: u32,
    pub total_votes_count: u32,
    pub delegate: Option<Address>,
}

/// How an off-chain reference to an on-chain account resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChainLink<T> {
    Linked(T),
    /// No account exists at the referenced address.
    Orphaned { address: Address },
    /// The account could not be read or decoded.
    Unresolved { address: Address, reason: String },
}

impl<T> ChainLink<T> {
    pub fn is_linked(&self) -> bool {
        matches!(self, ChainLink::Linked(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealmSummary {
    pub address: Address,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalSummary {
    pub address: Address,
    pub governance: Address,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedContent {
    Post,
    Proposal { link: ChainLink<ProposalSummary> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItemView {
    pub id: u64,
    pub title: String,
    pub score: i64,
    pub created_at: DateTime<Utc>,
    pub hidden: bool,
    pub content: FeedContent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedView {
    pub realm: ChainLink<RealmSummary>,
    pub items: Vec<FeedItemView>,
    pub freshness: Freshness,
}

macro_rules! cache_value {
    ($($view:ty),* $(,)?) => {
        $(
            impl CacheValue for $view {
                fn source_slot(&self) -> u64 {
                    self.freshness.slot
                }
            }
        )*
    };
}

cache_value!(RealmView, GovernanceList, ProposalView, TreasuryView, Tally, FeedView);

impl<T> CacheValue for Page<T>
where
    T: Serialize + DeserializeOwned + Send,
{
    fn source_slot(&self) -> u64 {
        self.freshness.slot
    }
}
