//! Binary account decoder.
//!
//! Governance accounts are `[kind][version][body]` where the body is bincode with
//! fixed-width little-endian integers. SPL token accounts and mints use their
//! standard fixed layouts and are read by offset.
//!
//! Decoding never panics on untrusted input: short buffers, wrong discriminants,
//! oversized length prefixes and trailing bytes all fail with
//! [`DecodeErrorKind::MalformedAccount`]; a version byte this build does not know
//! fails with [`DecodeErrorKind::UnsupportedVersion`].

use super::accounts::*;
use super::Address;
use bincode::Options;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Byte offset of the first body field (the parent address) in governance accounts.
pub const PARENT_OFFSET: usize = 2;
/// Byte offset of `governing_token_mint` in a TokenOwnerRecord.
pub const GOVERNING_MINT_OFFSET: usize = PARENT_OFFSET + 32;
/// Byte offset of `governing_token_owner` in a TokenOwnerRecord.
pub const TOKEN_OWNER_OFFSET: usize = PARENT_OFFSET + 64;
/// Byte offset of `owner` in an SPL token account.
pub const TOKEN_ACCOUNT_OWNER_OFFSET: usize = 32;

const HEADER_LEN: usize = 2;
const MAX_BODY_LEN: u64 = 10 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    MalformedAccount,
    UnsupportedVersion,
}

impl fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeErrorKind::MalformedAccount => f.write_str("malformed account"),
            DecodeErrorKind::UnsupportedVersion => f.write_str("unsupported version"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} ({account_type:?}): {detail}")]
pub struct DecodeError {
    pub kind: DecodeErrorKind,
    pub account_type: AccountType,
    pub detail: String,
}

impl DecodeError {
    fn malformed(account_type: AccountType, detail: impl Into<String>) -> Self {
        Self {
            kind: DecodeErrorKind::MalformedAccount,
            account_type,
            detail: detail.into(),
        }
    }

    fn unsupported(account_type: AccountType, version: u8) -> Self {
        Self {
            kind: DecodeErrorKind::UnsupportedVersion,
            account_type,
            detail: format!("layout version {} is not supported", version),
        }
    }
}

fn body_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .with_limit(MAX_BODY_LEN)
        .reject_trailing_bytes()
}

#[derive(Serialize, Deserialize)]
struct RealmV1 {
    community_mint: Address,
    council_mint: Option<Address>,
    authority: Option<Address>,
    name: String,
}

#[derive(Serialize, Deserialize)]
struct RealmV2 {
    community_mint: Address,
    council_mint: Option<Address>,
    authority: Option<Address>,
    name: String,
    voting_proposal_count: u32,
}

#[derive(Serialize, Deserialize)]
struct ProposalV1 {
    governance: Address,
    governing_token_mint: Address,
    token_owner_record: Address,
    name: String,
    description_link: String,
    signatories_count: u8,
    signatories_signed_off_count: u8,
    yes_vote_weight: u64,
    no_vote_weight: u64,
    draft_at: i64,
    signing_off_at: Option<i64>,
    voting_at: Option<i64>,
    voting_completed_at: Option<i64>,
    completed_at: Option<i64>,
    cancelled_at: Option<i64>,
}

#[derive(Serialize, Deserialize)]
enum VoteV1 {
    Yes,
    No,
}

#[derive(Serialize, Deserialize)]
struct VoteRecordV1 {
    proposal: Address,
    governing_token_owner: Address,
    is_relinquished: bool,
    vote: VoteV1,
}

#[derive(Serialize, Deserialize)]
struct VoteRecordV2 {
    proposal: Address,
    governing_token_owner: Address,
    is_relinquished: bool,
    vote: Vote,
    voter_weight: u64,
}

/// Reads the governance header without touching the body.
pub fn peek_header(bytes: &[u8]) -> Option<(AccountType, u8)> {
    if bytes.len() < HEADER_LEN {
        return None;
    }
    AccountType::from_discriminant(bytes[0]).map(|kind| (kind, bytes[1]))
}

/// Decodes `bytes` as an account of `expected` type.
pub fn decode(bytes: &[u8], expected: AccountType) -> Result<DecodedEntity, DecodeError> {
    match expected {
        AccountType::TokenAccount => return decode_token_account(bytes).map(DecodedEntity::TokenAccount),
        AccountType::Mint => return decode_mint(bytes).map(DecodedEntity::Mint),
        _ => {}
    }

    let (discriminant, version, body) = split_header(bytes, expected)?;
    if Some(discriminant) != expected.discriminant() {
        return Err(DecodeError::malformed(
            expected,
            format!("discriminant {} does not match", discriminant),
        ));
    }
    if !expected.supported_versions().contains(&version) {
        return Err(DecodeError::unsupported(expected, version));
    }

    let entity = match (expected, version) {
        (AccountType::Realm, 1) => {
            let v1: RealmV1 = body_from(body, expected)?;
            DecodedEntity::Realm(Realm {
                community_mint: v1.community_mint,
                council_mint: v1.council_mint,
                authority: v1.authority,
                name: v1.name,
                voting_proposal_count: 0,
            })
        }
        (AccountType::Realm, 2) => {
            let v2: RealmV2 = body_from(body, expected)?;
            DecodedEntity::Realm(Realm {
                community_mint: v2.community_mint,
                council_mint: v2.council_mint,
                authority: v2.authority,
                name: v2.name,
                voting_proposal_count: v2.voting_proposal_count,
            })
        }
        // Single-version layouts are the domain struct as declared.
        (AccountType::Governance, 1) => DecodedEntity::Governance(body_from(body, expected)?),
        (AccountType::TokenOwnerRecord, 1) => {
            DecodedEntity::TokenOwnerRecord(body_from(body, expected)?)
        }
        (AccountType::Proposal, 1) => {
            let v1: ProposalV1 = body_from(body, expected)?;
            DecodedEntity::Proposal(Proposal {
                governance: v1.governance,
                governing_token_mint: v1.governing_token_mint,
                token_owner_record: v1.token_owner_record,
                name: v1.name,
                description_link: v1.description_link,
                signatories_count: v1.signatories_count,
                signatories_signed_off_count: v1.signatories_signed_off_count,
                yes_vote_weight: v1.yes_vote_weight,
                no_vote_weight: v1.no_vote_weight,
                abstain_vote_weight: 0,
                draft_at: v1.draft_at,
                signing_off_at: v1.signing_off_at,
                voting_at: v1.voting_at,
                voting_completed_at: v1.voting_completed_at,
                completed_at: v1.completed_at,
                cancelled_at: v1.cancelled_at,
                max_vote_weight: None,
            })
        }
        (AccountType::Proposal, 2) => DecodedEntity::Proposal(body_from(body, expected)?),
        (AccountType::VoteRecord, 1) => {
            let v1: VoteRecordV1 = body_from(body, expected)?;
            DecodedEntity::VoteRecord(VoteRecord {
                proposal: v1.proposal,
                governing_token_owner: v1.governing_token_owner,
                is_relinquished: v1.is_relinquished,
                vote: match v1.vote {
                    VoteV1::Yes => Vote::Yes,
                    VoteV1::No => Vote::No,
                },
                voter_weight: None,
            })
        }
        (AccountType::VoteRecord, 2) => {
            let v2: VoteRecordV2 = body_from(body, expected)?;
            DecodedEntity::VoteRecord(VoteRecord {
                proposal: v2.proposal,
                governing_token_owner: v2.governing_token_owner,
                is_relinquished: v2.is_relinquished,
                vote: v2.vote,
                voter_weight: Some(v2.voter_weight),
            })
        }
        (account_type, version) => return Err(DecodeError::unsupported(account_type, version)),
    };

    Ok(entity)
}

/// Decodes a governance account using the kind recorded in its own header.
pub fn decode_any(bytes: &[u8]) -> Result<DecodedEntity, DecodeError> {
    match peek_header(bytes) {
        Some((kind, _)) => decode(bytes, kind),
        None => Err(DecodeError::malformed(
            AccountType::Realm,
            "missing or unknown governance header",
        )),
    }
}

pub fn decode_realm(bytes: &[u8]) -> Result<Realm, DecodeError> {
    match decode(bytes, AccountType::Realm)? {
        DecodedEntity::Realm(realm) => Ok(realm),
        other => Err(unexpected(AccountType::Realm, &other)),
    }
}

pub fn decode_governance(bytes: &[u8]) -> Result<Governance, DecodeError> {
    match decode(bytes, AccountType::Governance)? {
        DecodedEntity::Governance(governance) => Ok(governance),
        other => Err(unexpected(AccountType::Governance, &other)),
    }
}

pub fn decode_proposal(bytes: &[u8]) -> Result<Proposal, DecodeError> {
    match decode(bytes, AccountType::Proposal)? {
        DecodedEntity::Proposal(proposal) => Ok(proposal),
        other => Err(unexpected(AccountType::Proposal, &other)),
    }
}

pub fn decode_vote_record(bytes: &[u8]) -> Result<VoteRecord, DecodeError> {
    match decode(bytes, AccountType::VoteRecord)? {
        DecodedEntity::VoteRecord(record) => Ok(record),
        other => Err(unexpected(AccountType::VoteRecord, &other)),
    }
}

pub fn decode_token_owner_record(bytes: &[u8]) -> Result<TokenOwnerRecord, DecodeError> {
    match decode(bytes, AccountType::TokenOwnerRecord)? {
        DecodedEntity::TokenOwnerRecord(record) => Ok(record),
        other => Err(unexpected(AccountType::TokenOwnerRecord, &other)),
    }
}

/// Reads an SPL token account (mint, owner, amount).
pub fn decode_token_account(bytes: &[u8]) -> Result<TokenAccount, DecodeError> {
    let account_type = AccountType::TokenAccount;
    if bytes.len() != TOKEN_ACCOUNT_LEN {
        return Err(DecodeError::malformed(
            account_type,
            format!("expected {} bytes, got {}", TOKEN_ACCOUNT_LEN, bytes.len()),
        ));
    }
    // state: 0 = uninitialized, 1 = initialized, 2 = frozen
    if bytes[108] == 0 || bytes[108] > 2 {
        return Err(DecodeError::malformed(account_type, "token account is not initialized"));
    }
    Ok(TokenAccount {
        mint: address_at(bytes, 0, account_type)?,
        owner: address_at(bytes, 32, account_type)?,
        amount: u64_at(bytes, 64, account_type)?,
    })
}

/// Reads an SPL mint (supply, decimals).
pub fn decode_mint(bytes: &[u8]) -> Result<Mint, DecodeError> {
    let account_type = AccountType::Mint;
    if bytes.len() != MINT_ACCOUNT_LEN {
        return Err(DecodeError::malformed(
            account_type,
            format!("expected {} bytes, got {}", MINT_ACCOUNT_LEN, bytes.len()),
        ));
    }
    if bytes[45] != 1 {
        return Err(DecodeError::malformed(account_type, "mint is not initialized"));
    }
    Ok(Mint {
        supply: u64_at(bytes, 36, account_type)?,
        decimals: bytes[44],
    })
}

/// Encodes `entity` with the given layout version.
///
/// Fields the target layout cannot carry must be at their neutral value;
/// otherwise encoding fails rather than silently dropping data.
pub fn encode(entity: &DecodedEntity, version: u8) -> Result<Vec<u8>, DecodeError> {
    let account_type = entity.account_type();
    let body = match (entity, version) {
        (DecodedEntity::Realm(r), 1) => {
            if r.voting_proposal_count != 0 {
                return Err(DecodeError::malformed(
                    account_type,
                    "voting_proposal_count requires layout v2",
                ));
            }
            body_to(
                &RealmV1 {
                    community_mint: r.community_mint,
                    council_mint: r.council_mint,
                    authority: r.authority,
                    name: r.name.clone(),
                },
                account_type,
            )?
        }
        (DecodedEntity::Realm(r), 2) => body_to(
            &RealmV2 {
                community_mint: r.community_mint,
                council_mint: r.council_mint,
                authority: r.authority,
                name: r.name.clone(),
                voting_proposal_count: r.voting_proposal_count,
            },
            account_type,
        )?,
        (DecodedEntity::Governance(g), 1) => body_to(g, account_type)?,
        (DecodedEntity::TokenOwnerRecord(t), 1) => body_to(t, account_type)?,
        (DecodedEntity::Proposal(p), 1) => {
            if p.abstain_vote_weight != 0 || p.max_vote_weight.is_some() {
                return Err(DecodeError::malformed(
                    account_type,
                    "abstain weight and max vote weight require layout v2",
                ));
            }
            body_to(
                &ProposalV1 {
                    governance: p.governance,
                    governing_token_mint: p.governing_token_mint,
                    token_owner_record: p.token_owner_record,
                    name: p.name.clone(),
                    description_link: p.description_link.clone(),
                    signatories_count: p.signatories_count,
                    signatories_signed_off_count: p.signatories_signed_off_count,
                    yes_vote_weight: p.yes_vote_weight,
                    no_vote_weight: p.no_vote_weight,
                    draft_at: p.draft_at,
                    signing_off_at: p.signing_off_at,
                    voting_at: p.voting_at,
                    voting_completed_at: p.voting_completed_at,
                    completed_at: p.completed_at,
                    cancelled_at: p.cancelled_at,
                },
                account_type,
            )?
        }
        (DecodedEntity::Proposal(p), 2) => body_to(p, account_type)?,
        (DecodedEntity::VoteRecord(v), 1) => {
            let vote = match v.vote {
                Vote::Yes => VoteV1::Yes,
                Vote::No => VoteV1::No,
                Vote::Abstain => {
                    return Err(DecodeError::malformed(account_type, "abstain requires layout v2"));
                }
            };
            if v.voter_weight.is_some() {
                return Err(DecodeError::malformed(account_type, "voter weight requires layout v2"));
            }
            body_to(
                &VoteRecordV1 {
                    proposal: v.proposal,
                    governing_token_owner: v.governing_token_owner,
                    is_relinquished: v.is_relinquished,
                    vote,
                },
                account_type,
            )?
        }
        (DecodedEntity::VoteRecord(v), 2) => {
            let voter_weight = v.voter_weight.ok_or_else(|| {
                DecodeError::malformed(account_type, "layout v2 requires a voter weight")
            })?;
            body_to(
                &VoteRecordV2 {
                    proposal: v.proposal,
                    governing_token_owner: v.governing_token_owner,
                    is_relinquished: v.is_relinquished,
                    vote: v.vote,
                    voter_weight,
                },
                account_type,
            )?
        }
        (DecodedEntity::TokenAccount(t), _) => return Ok(encode_token_account(t)),
        (DecodedEntity::Mint(m), _) => return Ok(encode_mint(m)),
        (_, version) => return Err(DecodeError::unsupported(account_type, version)),
    };

    let discriminant = account_type
        .discriminant()
        .ok_or_else(|| DecodeError::malformed(account_type, "no governance discriminant"))?;
    let mut bytes = Vec::with_capacity(HEADER_LEN + body.len());
    bytes.push(discriminant);
    bytes.push(version);
    bytes.extend_from_slice(&body);
    Ok(bytes)
}

fn encode_token_account(account: &TokenAccount) -> Vec<u8> {
    let mut bytes = vec![0u8; TOKEN_ACCOUNT_LEN];
    bytes[0..32].copy_from_slice(account.mint.as_bytes());
    bytes[32..64].copy_from_slice(account.owner.as_bytes());
    bytes[64..72].copy_from_slice(&account.amount.to_le_bytes());
    bytes[108] = 1;
    bytes
}

fn encode_mint(mint: &Mint) -> Vec<u8> {
    let mut bytes = vec![0u8; MINT_ACCOUNT_LEN];
    bytes[36..44].copy_from_slice(&mint.supply.to_le_bytes());
    bytes[44] = mint.decimals;
    bytes[45] = 1;
    bytes
}

fn split_header(bytes: &[u8], account_type: AccountType) -> Result<(u8, u8, &[u8]), DecodeError> {
    if bytes.len() < HEADER_LEN {
        return Err(DecodeError::malformed(
            account_type,
            format!("account is {} bytes, shorter than the header", bytes.len()),
        ));
    }
    Ok((bytes[0], bytes[1], &bytes[HEADER_LEN..]))
}

fn body_from<T: DeserializeOwned>(body: &[u8], account_type: AccountType) -> Result<T, DecodeError> {
    body_options()
        .deserialize(body)
        .map_err(|e| DecodeError::malformed(account_type, e.to_string()))
}

fn body_to<T: Serialize>(value: &T, account_type: AccountType) -> Result<Vec<u8>, DecodeError> {
    body_options()
        .serialize(value)
        .map_err(|e| DecodeError::malformed(account_type, e.to_string()))
}

fn address_at(bytes: &[u8], offset: usize, account_type: AccountType) -> Result<Address, DecodeError> {
    bytes
        .get(offset..offset + 32)
        .and_then(Address::from_slice)
        .ok_or_else(|| DecodeError::malformed(account_type, format!("no address at {}", offset)))
}

fn u64_at(bytes: &[u8], offset: usize, account_type: AccountType) -> Result<u64, DecodeError> {
    bytes
        .get(offset..offset + 8)
        .and_then(|slice| <[u8; 8]>::try_from(slice).ok())
        .map(u64::from_le_bytes)
        .ok_or_else(|| DecodeError::malformed(account_type, format!("no u64 at {}", offset)))
}

fn unexpected(expected: AccountType, got: &DecodedEntity) -> DecodeError {
    DecodeError::malformed(
        expected,
        format!("decoded {:?} instead", got.account_type()),
    )
}
