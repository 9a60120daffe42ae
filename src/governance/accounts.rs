//! Typed governance entities produced by the account decoder.
//!
//! These are layout-independent: a Proposal decoded from a v1 account and one
//! decoded from a v2 account share the same struct, with v2-only fields left at
//! their neutral value (zero abstain weight, no max-vote-weight snapshot).

use super::Address;
use serde::{Deserialize, Serialize};

/// Length of an SPL token account.
pub const TOKEN_ACCOUNT_LEN: usize = 165;
/// Length of an SPL mint account.
pub const MINT_ACCOUNT_LEN: usize = 82;

/// Kinds of accounts the decoder understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountType {
    Realm,
    TokenOwnerRecord,
    Governance,
    Proposal,
    VoteRecord,
    /// SPL token account, fixed layout without a governance header.
    TokenAccount,
    /// SPL mint, fixed layout without a governance header.
    Mint,
}

impl AccountType {
    /// Leading discriminant byte for governance-program accounts.
    pub fn discriminant(self) -> Option<u8> {
        match self {
            AccountType::Realm => Some(1),
            AccountType::TokenOwnerRecord => Some(2),
            AccountType::Governance => Some(3),
            AccountType::Proposal => Some(4),
            AccountType::VoteRecord => Some(5),
            AccountType::TokenAccount | AccountType::Mint => None,
        }
    }

    pub fn from_discriminant(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(AccountType::Realm),
            2 => Some(AccountType::TokenOwnerRecord),
            3 => Some(AccountType::Governance),
            4 => Some(AccountType::Proposal),
            5 => Some(AccountType::VoteRecord),
            _ => None,
        }
    }

    /// Layout versions this build can decode.
    pub fn supported_versions(self) -> &'static [u8] {
        match self {
            AccountType::Realm | AccountType::Proposal | AccountType::VoteRecord => &[1, 2],
            AccountType::TokenOwnerRecord | AccountType::Governance => &[1],
            AccountType::TokenAccount | AccountType::Mint => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Realm {
    pub community_mint: Address,
    pub council_mint: Option<Address>,
    pub authority: Option<Address>,
    pub name: String,
    /// Proposals currently in voting. Recorded from layout v2 onwards.
    pub voting_proposal_count: u32,
}

/// When a proposal may finish before its voting time runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteTipping {
    /// Tip once the outcome can no longer change.
    Strict,
    /// Tip as soon as the threshold is met and yes leads no.
    Early,
    /// Always run the full voting time.
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceConfig {
    pub vote_threshold_percentage: u8,
    pub min_community_weight_to_create_proposal: u64,
    /// Voting duration in seconds.
    pub max_voting_time: u32,
    pub vote_tipping: VoteTipping,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Governance {
    pub realm: Address,
    pub governed_account: Address,
    pub config: GovernanceConfig,
    pub proposals_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub governance: Address,
    pub governing_token_mint: Address,
    pub token_owner_record: Address,
    pub name: String,
    pub description_link: String,
    pub signatories_count: u8,
    pub signatories_signed_off_count: u8,
    pub yes_vote_weight: u64,
    pub no_vote_weight: u64,
    /// Always zero for layout v1, which has no abstain option.
    pub abstain_vote_weight: u64,
    pub draft_at: i64,
    pub signing_off_at: Option<i64>,
    pub voting_at: Option<i64>,
    pub voting_completed_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub cancelled_at: Option<i64>,
    /// Electorate size frozen when voting completed. Layout v2 only.
    pub max_vote_weight: Option<u64>,
}

impl Proposal {
    /// Voting end as unix seconds, known once voting has started.
    pub fn voting_ends_at(&self, max_voting_time: u32) -> Option<i64> {
        self.voting_at
            .map(|start| start.saturating_add(i64::from(max_voting_time)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Vote {
    Yes,
    No,
    Abstain,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub proposal: Address,
    pub governing_token_owner: Address,
    pub is_relinquished: bool,
    pub vote: Vote,
    /// Voter weight captured when the vote was cast. Layout v2 only.
    pub voter_weight: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenOwnerRecord {
    pub realm: Address,
    pub governing_token_mint: Address,
    pub governing_token_owner: Address,
    pub governing_token_deposit_amount: u64,
    pub unrelinquished_votes_count: u32,
    pub total_votes_count: u32,
    pub outstanding_proposal_count: u8,
    pub governance_delegate: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenAccount {
    pub mint: Address,
    pub owner: Address,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mint {
    pub supply: u64,
    pub decimals: u8,
}

/// Output of the decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedEntity {
    Realm(Realm),
    TokenOwnerRecord(TokenOwnerRecord),
    Governance(Governance),
    Proposal(Proposal),
    VoteRecord(VoteRecord),
    TokenAccount(TokenAccount),
    Mint(Mint),
}

impl DecodedEntity {
    pub fn account_type(&self) -> AccountType {
        match self {
            DecodedEntity::Realm(_) => AccountType::Realm,
            DecodedEntity::TokenOwnerRecord(_) => AccountType::TokenOwnerRecord,
            DecodedEntity::Governance(_) => AccountType::Governance,
            DecodedEntity::Proposal(_) => AccountType::Proposal,
            DecodedEntity::VoteRecord(_) => AccountType::VoteRecord,
            DecodedEntity::TokenAccount(_) => AccountType::TokenAccount,
            DecodedEntity::Mint(_) => AccountType::Mint,
        }
    }

    /// Realm that owns this entity, when the account itself records it.
    pub fn realm(&self) -> Option<Address> {
        match self {
            DecodedEntity::Governance(g) => Some(g.realm),
            DecodedEntity::TokenOwnerRecord(r) => Some(r.realm),
            _ => None,
        }
    }
}
