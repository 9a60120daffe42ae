//! Reconciliation engine.
//!
//! Every public operation goes through the query cache: a hit returns without
//! touching the chain or the store. On a miss the engine reads the accounts it
//! needs through the chain reader, decodes them, joins them with off-chain
//! records and derives aggregates. All views are stamped with the wall-clock
//! time they were assembled and the newest slot they reflect.

use super::cursor::{self, Cursor, SortKey};
use super::proposal_state::{self, ProposalState};
use super::store::{FeedItemRecord, OffChainStore};
use super::tally::{self, WeightPolicy};
use super::views::*;
use crate::cache::{CacheKey, CacheValue, EntityKind, QueryCache};
use crate::chain::{AccountSlot, ChainReader, with_deadline};
use crate::error::CoreError;
use crate::governance::decoder::{
    self, GOVERNING_MINT_OFFSET, PARENT_OFFSET, TOKEN_ACCOUNT_OWNER_OFFSET,
};
use crate::governance::{
    AccountType, Address, Governance, Proposal, Realm, TOKEN_ACCOUNT_LEN, TokenOwnerRecord,
    VoteRecord,
};
use crate::rpc::{AccountFilter, ProgramAccountsQuery, RawAccount};
use crate::utils::format_token_amount;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub governance_program: Address,
    pub token_program: Address,
    pub default_page_size: usize,
    pub max_page_size: usize,
    pub weight_policy: WeightPolicy,
}

/// Per-call options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    /// The call fails with `DeadlineExceeded` if not finished by then.
    pub deadline: Option<Instant>,
    /// Cached views assembled before this instant are not served.
    pub as_of: Option<DateTime<Utc>>,
}

impl ReadOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            as_of: None,
        }
    }

    pub fn as_of(mut self, as_of: DateTime<Utc>) -> Self {
        self.as_of = Some(as_of);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalFilter {
    /// Keep only proposals in one of these states.
    pub states: Option<BTreeSet<ProposalState>>,
    pub governance: Option<Address>,
    /// Case-insensitive substring of the proposal name.
    pub text: Option<String>,
}

impl ProposalFilter {
    fn matches(&self, view: &ProposalView) -> bool {
        self.states
            .as_ref()
            .is_none_or(|states| states.contains(&view.state))
            && self.governance.is_none_or(|g| g == view.governance)
            && self.text.as_ref().is_none_or(|text| {
                view.name.to_lowercase().contains(&text.to_lowercase())
            })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberFilter {
    pub governing_token_mint: Option<Address>,
}

/// Proposal together with everything needed to derive its state.
struct ProposalContext {
    address: Address,
    proposal: Proposal,
    governance_address: Address,
    governance: Governance,
    electorate: u64,
    slot: u64,
}

impl ProposalContext {
    fn threshold_weight(&self) -> u64 {
        proposal_state::threshold_weight(
            self.electorate,
            self.governance.config.vote_threshold_percentage,
        )
    }
}

pub struct ReconciliationEngine {
    reader: ChainReader,
    store: Arc<dyn OffChainStore>,
    cache: Arc<QueryCache>,
    config: EngineConfig,
    clock: fn() -> i64,
}

impl ReconciliationEngine {
    pub fn new(
        reader: ChainReader,
        store: Arc<dyn OffChainStore>,
        cache: Arc<QueryCache>,
        config: EngineConfig,
    ) -> Self {
        Self {
            reader,
            store,
            cache,
            config,
            clock: || Utc::now().timestamp(),
        }
    }

    /// Replace the unix-seconds clock used to derive proposal state.
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    pub fn reader(&self) -> &ChainReader {
        &self.reader
    }

    /// Realm account, its governances and off-chain settings.
    pub async fn get_realm_view(
        &self,
        realm: Address,
        opts: ReadOptions,
    ) -> Result<RealmView, CoreError> {
        let key = CacheKey::new(realm, EntityKind::RealmView).with_subject(realm);
        self.cached(key, &opts, || async move {
            let (realm_account, governances, settings) = futures::try_join!(
                self.load_realm(realm, opts.deadline),
                self.load_governances(realm, opts.deadline),
                async { self.store.realm_settings(&realm).await.map_err(CoreError::from) },
            )?;
            let (account, realm_slot) = realm_account;

            Ok(RealmView {
                address: realm,
                name: account.name,
                community_mint: account.community_mint,
                council_mint: account.council_mint,
                authority: account.authority,
                voting_proposal_count: account.voting_proposal_count,
                settings,
                governances: governances.governances,
                skipped: governances.skipped,
                freshness: Freshness::now(realm_slot.max(governances.freshness.slot)),
            })
        })
        .await
    }

    pub async fn list_governances(
        &self,
        realm: Address,
        opts: ReadOptions,
    ) -> Result<GovernanceList, CoreError> {
        let key = CacheKey::new(realm, EntityKind::Governances);
        self.cached(key, &opts, || self.load_governances(realm, opts.deadline))
            .await
    }

    /// Proposals of `realm` ordered by voting end, newest first; proposals that
    /// have not started voting come before all others.
    pub async fn list_proposals(
        &self,
        realm: Address,
        cursor: Option<&str>,
        page_size: Option<usize>,
        filter: &ProposalFilter,
        opts: ReadOptions,
    ) -> Result<Page<ProposalView>, CoreError> {
        let filter_hash = cursor::filter_hash("proposals", filter)?;
        let after = cursor
            .map(|raw| Cursor::decode(raw, filter_hash))
            .transpose()?;
        let page_size = self.page_size(page_size);

        let key = CacheKey::new(realm, EntityKind::ProposalPage)
            .with_window(cursor, page_size)
            .with_filter_hash(filter_hash);
        self.cached(key, &opts, || async move {
            let (views, skipped, slot) = self.load_proposal_views(realm, filter, opts.deadline).await?;
            let page = cursor::paginate(
                views,
                proposal_sort_key,
                after.as_ref(),
                page_size,
                filter_hash,
            );
            Ok(Page {
                items: page.items,
                end_cursor: page.end_cursor,
                has_next: page.has_next,
                skipped,
                freshness: Freshness::now(slot),
            })
        })
        .await
    }

    pub async fn get_proposal(
        &self,
        proposal: Address,
        opts: ReadOptions,
    ) -> Result<ProposalView, CoreError> {
        let key = CacheKey::new(proposal, EntityKind::Proposal).with_subject(proposal);
        self.cached(key, &opts, || async move {
            let (context, discussions) = futures::try_join!(
                self.load_proposal_context(proposal, opts.deadline),
                async {
                    self.store
                        .feed_items_by_proposal(&proposal)
                        .await
                        .map_err(CoreError::from)
                },
            )?;
            Ok(self.proposal_view(&context, discussions.len()))
        })
        .await
    }

    /// Balances of the token accounts owned by `governance`.
    ///
    /// A token account that cannot be read or decoded is reported with an
    /// unknown balance and marks the view degraded; it never fails the call.
    pub async fn get_treasury(
        &self,
        governance: Address,
        opts: ReadOptions,
    ) -> Result<TreasuryView, CoreError> {
        let key = CacheKey::new(governance, EntityKind::Treasury).with_subject(governance);
        self.cached(key, &opts, || self.load_treasury(governance, opts.deadline))
            .await
    }

    /// Recompute the vote totals of `proposal` from its vote records.
    pub async fn compute_tally(
        &self,
        proposal: Address,
        policy: Option<WeightPolicy>,
        opts: ReadOptions,
    ) -> Result<Tally, CoreError> {
        let policy = policy.unwrap_or(self.config.weight_policy);
        let key = CacheKey::new(proposal, EntityKind::Tally)
            .with_subject(proposal)
            .with_filter_hash(cursor::filter_hash("tally", &policy)?);
        self.cached(key, &opts, || self.load_tally(proposal, policy, opts.deadline))
            .await
    }

    /// Token owner records of `realm`, largest deposit first.
    pub async fn list_members(
        &self,
        realm: Address,
        cursor: Option<&str>,
        page_size: Option<usize>,
        filter: &MemberFilter,
        opts: ReadOptions,
    ) -> Result<Page<MemberView>, CoreError> {
        let filter_hash = cursor::filter_hash("members", filter)?;
        let after = cursor
            .map(|raw| Cursor::decode(raw, filter_hash))
            .transpose()?;
        let page_size = self.page_size(page_size);

        let key = CacheKey::new(realm, EntityKind::MemberPage)
            .with_window(cursor, page_size)
            .with_filter_hash(filter_hash);
        self.cached(key, &opts, || async move {
            let mut filters = vec![
                kind_filter(AccountType::TokenOwnerRecord),
                AccountFilter::memcmp(PARENT_OFFSET, realm.as_bytes().to_vec()),
            ];
            if let Some(mint) = filter.governing_token_mint {
                filters.push(AccountFilter::memcmp(
                    GOVERNING_MINT_OFFSET,
                    mint.as_bytes().to_vec(),
                ));
            }
            let accounts = self
                .reader
                .fetch_program_accounts(
                    &self.config.governance_program,
                    &ProgramAccountsQuery::new(filters),
                    opts.deadline,
                )
                .await?;

            let (records, skipped) =
                decode_all(accounts.value, decoder::decode_token_owner_record);
            let members: Vec<MemberView> = records
                .into_iter()
                .map(|(address, record)| member_view(address, record))
                .sorted_by(|a, b| member_sort_key(a).listing_cmp(&member_sort_key(b)))
                .collect();

            let page = cursor::paginate(
                members,
                member_sort_key,
                after.as_ref(),
                page_size,
                filter_hash,
            );
            Ok(Page {
                items: page.items,
                end_cursor: page.end_cursor,
                has_next: page.has_next,
                skipped,
                freshness: Freshness::now(accounts.slot),
            })
        })
        .await
    }

    /// Off-chain feed of `realm` joined with the on-chain accounts it refers to.
    pub async fn list_feed(
        &self,
        realm: Address,
        include_hidden: bool,
        opts: ReadOptions,
    ) -> Result<FeedView, CoreError> {
        let key = CacheKey::new(realm, EntityKind::Feed)
            .with_filter_hash(cursor::filter_hash("feed", &include_hidden)?);
        self.cached(key, &opts, || self.load_feed(realm, include_hidden, opts.deadline))
            .await
    }

    /// Drop everything cached for `realm` and the entities known to belong to it.
    pub fn invalidate(&self, realm: &Address) {
        info!("Invalidating cached views of realm {}", realm);
        self.cache.invalidate(realm);
    }

    async fn cached<T, F, Fut>(
        &self,
        key: CacheKey,
        opts: &ReadOptions,
        compute: F,
    ) -> Result<T, CoreError>
    where
        T: CacheValue,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let policy = self.cache.policy().not_before(opts.as_of);
        with_deadline(opts.deadline, self.cache.get_or_compute(key, policy, compute)).await?
    }

    fn page_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.config.default_page_size)
            .clamp(1, self.config.max_page_size.max(1))
    }

    fn now(&self) -> i64 {
        (self.clock)()
    }

    async fn load_realm(
        &self,
        realm: Address,
        deadline: Option<Instant>,
    ) -> Result<(Realm, u64), CoreError> {
        let account = self.reader.fetch_account(realm, deadline).await?;
        let raw = account.value.ok_or(CoreError::NotFound {
            entity: "realm",
            address: realm,
        })?;
        let decoded = decoder::decode_realm(&raw.data).map_err(|e| CoreError::decode(realm, e))?;
        Ok((decoded, account.slot))
    }

    async fn load_governances(
        &self,
        realm: Address,
        deadline: Option<Instant>,
    ) -> Result<GovernanceList, CoreError> {
        let accounts = self
            .reader
            .fetch_program_accounts(
                &self.config.governance_program,
                &ProgramAccountsQuery::new(vec![
                    kind_filter(AccountType::Governance),
                    AccountFilter::memcmp(PARENT_OFFSET, realm.as_bytes().to_vec()),
                ]),
                deadline,
            )
            .await?;

        let (governances, skipped) = decode_all(accounts.value, decoder::decode_governance);
        let governances: Vec<GovernanceView> = governances
            .into_iter()
            .filter(|(_, g)| g.realm == realm)
            .map(|(address, g)| GovernanceView {
                address,
                realm: g.realm,
                governed_account: g.governed_account,
                config: g.config,
                proposals_count: g.proposals_count,
            })
            .sorted_by_key(|g| g.address)
            .collect();
        self.cache
            .assign(governances.iter().map(|g| g.address), realm);

        debug!(
            "Realm {} has {} governances ({} skipped)",
            realm,
            governances.len(),
            skipped.len()
        );
        Ok(GovernanceList {
            realm,
            governances,
            skipped,
            freshness: Freshness::now(accounts.slot),
        })
    }

    async fn load_proposal_views(
        &self,
        realm: Address,
        filter: &ProposalFilter,
        deadline: Option<Instant>,
    ) -> Result<(Vec<ProposalView>, Vec<Skipped>, u64), CoreError> {
        let (_, realm_slot) = self.load_realm(realm, deadline).await?;
        let governances = self.load_governances(realm, deadline).await?;
        let selected: Vec<&GovernanceView> = governances
            .governances
            .iter()
            .filter(|g| filter.governance.is_none_or(|wanted| wanted == g.address))
            .collect();

        let queries: Vec<ProgramAccountsQuery> = selected
            .iter()
            .map(|g| {
                ProgramAccountsQuery::new(vec![
                    kind_filter(AccountType::Proposal),
                    AccountFilter::memcmp(PARENT_OFFSET, g.address.as_bytes().to_vec()),
                ])
            })
            .collect();
        let per_governance = try_join_all(queries.iter().map(|query| {
            self.reader
                .fetch_program_accounts(&self.config.governance_program, query, deadline)
        }))
        .await?;

        let mut slot = realm_slot.max(governances.freshness.slot);
        let mut skipped = governances.skipped.clone();
        let mut proposals = Vec::new();
        for accounts in per_governance {
            slot = slot.max(accounts.slot);
            let (decoded, failed) = decode_all(accounts.value, decoder::decode_proposal);
            proposals.extend(decoded);
            skipped.extend(failed);
        }

        let supplies = self
            .mint_supplies(
                proposals
                    .iter()
                    .filter(|(_, p)| p.max_vote_weight.is_none())
                    .map(|(_, p)| p.governing_token_mint),
                deadline,
            )
            .await?;
        slot = slot.max(supplies.1);

        let discussions = self.store.feed_items_by_realm(&realm).await?;
        let discussion_counts = discussions
            .iter()
            .filter_map(FeedItemRecord::proposal)
            .counts();

        let configs: HashMap<Address, &GovernanceView> =
            selected.iter().map(|g| (g.address, *g)).collect();
        let mut views = Vec::with_capacity(proposals.len());
        for (address, proposal) in proposals {
            let Some(governance) = configs.get(&proposal.governance) else {
                continue;
            };
            let supply = supplies.0.get(&proposal.governing_token_mint).copied();
            let context = ProposalContext {
                address,
                electorate: proposal_state::electorate(&proposal, supply.unwrap_or_default()),
                governance_address: governance.address,
                governance: Governance {
                    realm,
                    governed_account: governance.governed_account,
                    config: governance.config.clone(),
                    proposals_count: governance.proposals_count,
                },
                proposal,
                slot,
            };
            let view = self.proposal_view(
                &context,
                discussion_counts.get(&address).copied().unwrap_or_default(),
            );
            if filter.matches(&view) {
                views.push(view);
            }
        }
        views.sort_by(|a, b| proposal_sort_key(a).listing_cmp(&proposal_sort_key(b)));
        self.cache.assign(views.iter().map(|v| v.address), realm);

        debug!(
            "Realm {}: {} proposals match, {} accounts skipped",
            realm,
            views.len(),
            skipped.len()
        );
        Ok((views, skipped, slot))
    }

    /// Supplies of `mints`. Mints are required for electorate sizing, so any
    /// mint that is missing or unreadable fails the call.
    async fn mint_supplies(
        &self,
        mints: impl IntoIterator<Item = Address>,
        deadline: Option<Instant>,
    ) -> Result<(HashMap<Address, u64>, u64), CoreError> {
        let mints: Vec<Address> = mints.into_iter().unique().collect();
        if mints.is_empty() {
            return Ok((HashMap::new(), 0));
        }
        let batch = self.reader.fetch_accounts(mints.iter().copied(), deadline).await?;
        let failed = batch.failed();
        if !failed.is_empty() {
            return Err(CoreError::PartialUpstreamFailure { failed });
        }

        let mut supplies = HashMap::with_capacity(mints.len());
        for mint in mints {
            let raw = batch.present(&mint).ok_or(CoreError::NotFound {
                entity: "mint",
                address: mint,
            })?;
            let decoded = decoder::decode_mint(&raw.data).map_err(|e| CoreError::decode(mint, e))?;
            supplies.insert(mint, decoded.supply);
        }
        Ok((supplies, batch.slot))
    }

    async fn load_proposal_context(
        &self,
        address: Address,
        deadline: Option<Instant>,
    ) -> Result<ProposalContext, CoreError> {
        let account = self.reader.fetch_account(address, deadline).await?;
        let raw = account.value.ok_or(CoreError::NotFound {
            entity: "proposal",
            address,
        })?;
        let proposal =
            decoder::decode_proposal(&raw.data).map_err(|e| CoreError::decode(address, e))?;

        let governance_address = proposal.governance;
        let governance_account = self.reader.fetch_account(governance_address, deadline).await?;
        let raw = governance_account.value.ok_or(CoreError::NotFound {
            entity: "governance",
            address: governance_address,
        })?;
        let governance = decoder::decode_governance(&raw.data)
            .map_err(|e| CoreError::decode(governance_address, e))?;

        let (electorate, mint_slot) = match proposal.max_vote_weight {
            Some(snapshot) => (snapshot, 0),
            None => {
                let (supplies, slot) = self
                    .mint_supplies([proposal.governing_token_mint], deadline)
                    .await?;
                let supply = supplies
                    .get(&proposal.governing_token_mint)
                    .copied()
                    .unwrap_or_default();
                (supply, slot)
            }
        };

        self.cache
            .assign([address, governance_address], governance.realm);

        Ok(ProposalContext {
            address,
            slot: account.slot.max(governance_account.slot).max(mint_slot),
            proposal,
            governance_address,
            governance,
            electorate,
        })
    }

    fn proposal_view(&self, context: &ProposalContext, discussion_count: usize) -> ProposalView {
        let proposal = &context.proposal;
        let config = &context.governance.config;
        ProposalView {
            address: context.address,
            governance: context.governance_address,
            realm: context.governance.realm,
            governing_token_mint: proposal.governing_token_mint,
            name: proposal.name.clone(),
            description_link: proposal.description_link.clone(),
            state: proposal_state::derive_state(proposal, config, context.electorate, self.now()),
            yes_vote_weight: proposal.yes_vote_weight,
            no_vote_weight: proposal.no_vote_weight,
            abstain_vote_weight: proposal.abstain_vote_weight,
            electorate: context.electorate,
            threshold_weight: context.threshold_weight(),
            signatories_count: proposal.signatories_count,
            signatories_signed_off_count: proposal.signatories_signed_off_count,
            draft_at: proposal.draft_at,
            voting_at: proposal.voting_at,
            voting_ends_at: proposal.voting_ends_at(config.max_voting_time),
            completed_at: proposal.completed_at,
            cancelled_at: proposal.cancelled_at,
            discussion_count,
            freshness: Freshness::now(context.slot),
        }
    }

    async fn load_treasury(
        &self,
        governance: Address,
        deadline: Option<Instant>,
    ) -> Result<TreasuryView, CoreError> {
        // Only the mint is needed from the listing; balances come from the batch read.
        let listing = self
            .reader
            .fetch_program_accounts(
                &self.config.token_program,
                &ProgramAccountsQuery::new(vec![
                    AccountFilter::DataSize(TOKEN_ACCOUNT_LEN as u64),
                    AccountFilter::memcmp(
                        TOKEN_ACCOUNT_OWNER_OFFSET,
                        governance.as_bytes().to_vec(),
                    ),
                ])
                .with_data_slice(0, 32),
                deadline,
            )
            .await?;
        // The listing carries each account's mint, so unreadable balances still
        // count towards the right per-mint total.
        let listed_mints: HashMap<Address, Option<Address>> = listing
            .value
            .iter()
            .map(|(address, raw)| (*address, raw.data.get(..32).and_then(Address::from_slice)))
            .collect();
        let token_accounts: Vec<Address> = listed_mints.keys().copied().sorted().collect();

        let batch = self
            .reader
            .fetch_accounts(
                token_accounts.iter().copied().chain([governance]),
                deadline,
            )
            .await?;

        let realm = match batch.get(&governance) {
            Some(AccountSlot::Absent) => {
                return Err(CoreError::NotFound {
                    entity: "governance",
                    address: governance,
                });
            }
            Some(AccountSlot::Present(raw)) => match decoder::decode_governance(&raw.data) {
                Ok(g) => Some(g.realm),
                Err(e) => return Err(CoreError::decode(governance, e)),
            },
            _ => None,
        };
        if let Some(realm) = realm {
            self.cache
                .assign(token_accounts.iter().copied().chain([governance]), realm);
        }

        let mut decoded = Vec::with_capacity(token_accounts.len());
        for address in &token_accounts {
            let outcome = match batch.get(address) {
                Some(AccountSlot::Present(raw)) => decoder::decode_token_account(&raw.data)
                    .map_err(|e| e.to_string()),
                Some(AccountSlot::Absent) => Err("token account closed".to_string()),
                Some(AccountSlot::Failed(reason)) => Err(reason.clone()),
                None => Err("token account not fetched".to_string()),
            };
            decoded.push((*address, outcome));
        }

        let mints: Vec<Address> = decoded
            .iter()
            .filter_map(|(_, outcome)| outcome.as_ref().ok().map(|t| t.mint))
            .chain(listed_mints.values().flatten().copied())
            .unique()
            .collect();
        let mint_batch = self.reader.fetch_accounts(mints, deadline).await?;
        let decimals: HashMap<Address, u8> = mint_batch
            .accounts
            .iter()
            .filter_map(|(address, slot)| match slot {
                AccountSlot::Present(raw) => decoder::decode_mint(&raw.data)
                    .ok()
                    .map(|mint| (*address, mint.decimals)),
                _ => None,
            })
            .collect();

        let tokens: Vec<TokenBalance> = decoded
            .into_iter()
            .map(|(token_account, outcome)| match outcome {
                Ok(token) => {
                    let decimals = decimals.get(&token.mint).copied();
                    TokenBalance {
                        token_account,
                        mint: Some(token.mint),
                        balance: Balance::Known {
                            amount: token.amount,
                        },
                        decimals,
                        ui_amount: decimals.map(|d| format_token_amount(token.amount, d)),
                    }
                }
                Err(reason) => {
                    warn!("Treasury token account {} unknown: {}", token_account, reason);
                    let mint = listed_mints.get(&token_account).copied().flatten();
                    TokenBalance {
                        token_account,
                        mint,
                        balance: Balance::Unknown { reason },
                        decimals: mint.and_then(|m| decimals.get(&m).copied()),
                        ui_amount: None,
                    }
                }
            })
            .collect();

        let totals = mint_totals(&tokens);
        let degraded = tokens
            .iter()
            .any(|t| matches!(t.balance, Balance::Unknown { .. }));
        Ok(TreasuryView {
            governance,
            realm,
            tokens,
            totals,
            degraded,
            freshness: Freshness::now(listing.slot.max(batch.slot).max(mint_batch.slot)),
        })
    }

    async fn load_tally(
        &self,
        proposal: Address,
        policy: WeightPolicy,
        deadline: Option<Instant>,
    ) -> Result<Tally, CoreError> {
        let context = self.load_proposal_context(proposal, deadline).await?;
        let records = self
            .reader
            .fetch_program_accounts(
                &self.config.governance_program,
                &ProgramAccountsQuery::new(vec![
                    kind_filter(AccountType::VoteRecord),
                    AccountFilter::memcmp(PARENT_OFFSET, proposal.as_bytes().to_vec()),
                ]),
                deadline,
            )
            .await?;
        let (votes, mut skipped): (Vec<(Address, VoteRecord)>, _) =
            decode_all(records.value, decoder::decode_vote_record);

        let mut slot = context.slot.max(records.slot);
        let mut deposits = HashMap::new();
        if !tally::voters_needing_deposits(&proposal, &votes, policy).is_empty() {
            let owners = self
                .reader
                .fetch_program_accounts(
                    &self.config.governance_program,
                    &ProgramAccountsQuery::new(vec![
                        kind_filter(AccountType::TokenOwnerRecord),
                        AccountFilter::memcmp(
                            PARENT_OFFSET,
                            context.governance.realm.as_bytes().to_vec(),
                        ),
                        AccountFilter::memcmp(
                            GOVERNING_MINT_OFFSET,
                            context.proposal.governing_token_mint.as_bytes().to_vec(),
                        ),
                    ]),
                    deadline,
                )
                .await?;
            slot = slot.max(owners.slot);
            let (records, unreadable) =
                decode_all(owners.value, decoder::decode_token_owner_record);
            if !unreadable.is_empty() {
                skipped.extend(unreadable);
                skipped.sort_by_key(|s| s.address);
            }
            deposits = records
                .into_iter()
                .map(|(_, r): (Address, TokenOwnerRecord)| {
                    (r.governing_token_owner, r.governing_token_deposit_amount)
                })
                .collect();
        }

        let totals = tally::tally_votes(&proposal, &votes, &deposits, policy);
        if !totals.unresolved_voters.is_empty() {
            debug!(
                "Proposal {}: {} voters without a resolvable weight",
                proposal,
                totals.unresolved_voters.len()
            );
        }
        Ok(Tally {
            proposal,
            yes: totals.yes,
            no: totals.no,
            abstain: totals.abstain,
            voters: totals.voters,
            snapshot_weighted: totals.snapshot_weighted,
            current_weighted: totals.current_weighted,
            unresolved_voters: totals.unresolved_voters,
            skipped,
            electorate: context.electorate,
            threshold_weight: context.threshold_weight(),
            policy,
            freshness: Freshness::now(slot),
        })
    }

    async fn load_feed(
        &self,
        realm: Address,
        include_hidden: bool,
        deadline: Option<Instant>,
    ) -> Result<FeedView, CoreError> {
        let records: Vec<FeedItemRecord> = self
            .store
            .feed_items_by_realm(&realm)
            .await?
            .into_iter()
            .filter(|item| include_hidden || !item.hidden)
            .sorted_by(|a, b| {
                b.score
                    .cmp(&a.score)
                    .then_with(|| b.created_at.cmp(&a.created_at))
                    .then_with(|| a.id.cmp(&b.id))
            })
            .collect();

        let referenced = records.iter().filter_map(FeedItemRecord::proposal);
        let batch = self
            .reader
            .fetch_accounts(referenced.chain([realm]), deadline)
            .await?;

        let realm_link = resolve(realm, batch.get(&realm), |raw| {
            decoder::decode_realm(&raw.data).map(|r| RealmSummary {
                address: realm,
                name: r.name,
            })
        });

        let items = records
            .into_iter()
            .map(|record| {
                let content = match record.proposal() {
                    None => FeedContent::Post,
                    Some(proposal) => FeedContent::Proposal {
                        link: resolve(proposal, batch.get(&proposal), |raw| {
                            decoder::decode_proposal(&raw.data).map(|p| ProposalSummary {
                                address: proposal,
                                governance: p.governance,
                                name: p.name,
                            })
                        }),
                    },
                };
                FeedItemView {
                    id: record.id,
                    title: record.title,
                    score: record.score,
                    created_at: record.created_at,
                    hidden: record.hidden,
                    content,
                }
            })
            .collect::<Vec<_>>();

        let unlinked = items
            .iter()
            .filter(|item| match &item.content {
                FeedContent::Proposal { link } => !link.is_linked(),
                FeedContent::Post => false,
            })
            .count();
        if unlinked > 0 {
            warn!(
                "Realm {} feed has {} proposal references without a readable account",
                realm, unlinked
            );
        }

        Ok(FeedView {
            realm: realm_link,
            items,
            freshness: Freshness::now(batch.slot),
        })
    }
}

fn kind_filter(account_type: AccountType) -> AccountFilter {
    AccountFilter::memcmp(0, account_type.discriminant().into_iter().collect::<Vec<_>>())
}

/// Decode every account, separating the ones that fail.
fn decode_all<T, E: std::fmt::Display>(
    accounts: Vec<(Address, RawAccount)>,
    decode: impl Fn(&[u8]) -> Result<T, E>,
) -> (Vec<(Address, T)>, Vec<Skipped>) {
    let mut decoded = Vec::with_capacity(accounts.len());
    let mut skipped = Vec::new();
    for (address, account) in accounts {
        match decode(&account.data) {
            Ok(entity) => decoded.push((address, entity)),
            Err(e) => {
                warn!("Skipping account {}: {}", address, e);
                skipped.push(Skipped {
                    address,
                    reason: e.to_string(),
                });
            }
        }
    }
    skipped.sort_by_key(|s| s.address);
    (decoded, skipped)
}

/// Sum known balances per mint. A mint with any unknown balance is partial.
fn mint_totals(tokens: &[TokenBalance]) -> Vec<MintTotal> {
    let mut totals: BTreeMap<Address, MintTotal> = BTreeMap::new();
    for token in tokens {
        let Some(mint) = token.mint else {
            continue;
        };
        let total = totals.entry(mint).or_insert_with(|| MintTotal {
            mint,
            amount: 0,
            decimals: token.decimals,
            ui_amount: None,
            accounts: 0,
            partial: false,
        });
        total.accounts += 1;
        match token.balance {
            Balance::Known { amount } => total.amount = total.amount.saturating_add(amount),
            Balance::Unknown { .. } => total.partial = true,
        }
    }
    totals
        .into_values()
        .map(|mut total| {
            total.ui_amount = total.decimals.map(|d| format_token_amount(total.amount, d));
            total
        })
        .collect()
}

fn resolve<T, E: std::fmt::Display>(
    address: Address,
    slot: Option<&AccountSlot>,
    decode: impl FnOnce(&RawAccount) -> Result<T, E>,
) -> ChainLink<T> {
    match slot {
        Some(AccountSlot::Present(raw)) => match decode(raw) {
            Ok(summary) => ChainLink::Linked(summary),
            Err(e) => ChainLink::Unresolved {
                address,
                reason: e.to_string(),
            },
        },
        Some(AccountSlot::Absent) => ChainLink::Orphaned { address },
        Some(AccountSlot::Failed(reason)) => ChainLink::Unresolved {
            address,
            reason: reason.clone(),
        },
        None => ChainLink::Unresolved {
            address,
            reason: "not fetched".to_string(),
        },
    }
}

fn proposal_sort_key(view: &ProposalView) -> SortKey {
    SortKey::new(
        view.voting_ends_at.map(i128::from).unwrap_or(i128::MAX),
        view.address,
    )
}

fn member_view(address: Address, record: TokenOwnerRecord) -> MemberView {
    MemberView {
        token_owner_record: address,
        owner: record.governing_token_owner,
        governing_token_mint: record.governing_token_mint,
        deposit: record.governing_token_deposit_amount,
        unrelinquished_votes_count: record.unrelinquished_votes_count,
        total_votes_count: record.total_votes_count,
        delegate: record.governance_delegate,
    }
}

fn member_sort_key(view: &MemberView) -> SortKey {
    SortKey::new(i128::from(view.deposit), view.token_owner_record)
}
