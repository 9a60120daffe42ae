#![allow(dead_code)]

use parking_lot::Mutex;
use realms_state_sync::cache::{CacheConfig, QueryCache};
use realms_state_sync::chain::{ChainReader, ReaderConfig};
use realms_state_sync::governance::{
    Address, DecodedEntity, Governance, GovernanceConfig, MINT_ACCOUNT_LEN, Proposal, Realm,
    TOKEN_ACCOUNT_LEN, TokenOwnerRecord, Vote, VoteRecord, VoteTipping, encode,
};
use realms_state_sync::reconcile::{
    EngineConfig, InMemoryStore, ReconciliationEngine, WeightPolicy,
};
use realms_state_sync::rpc::{ProgramAccountsQuery, RawAccount, RpcError, RpcTransport, Slotted};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

pub const GOVERNANCE_PROGRAM: Address = Address::new([0xaa; 32]);
pub const TOKEN_PROGRAM: Address = Address::new([0xbb; 32]);

/// Unix seconds the engine under test believes it is.
pub const NOW: i64 = 1_700_000_000;

/// Distinct address per `n`, never colliding with the program ids.
pub fn addr(n: u16) -> Address {
    let mut bytes = [7u8; 32];
    bytes[..2].copy_from_slice(&n.to_be_bytes());
    Address::new(bytes)
}

/// In-memory node answering account reads from a ledger.
#[derive(Default)]
pub struct StubNode {
    ledger: Mutex<BTreeMap<Address, RawAccount>>,
    failing: Mutex<BTreeSet<Address>>,
    delay: Mutex<Option<Duration>>,
    rate_limited: AtomicBool,
    slot: AtomicU64,
    pub multiple_calls: AtomicUsize,
    pub program_calls: AtomicUsize,
    pub batch_sizes: Mutex<Vec<usize>>,
    in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
}

/// Counts a request as in flight until dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl StubNode {
    pub fn new() -> Arc<Self> {
        let node = Self::default();
        node.slot.store(100, Ordering::Relaxed);
        Arc::new(node)
    }

    pub fn put(&self, address: Address, account: RawAccount) {
        self.ledger.lock().insert(address, account);
    }

    pub fn remove(&self, address: &Address) {
        self.ledger.lock().remove(address);
    }

    /// Any batch containing `address` times out.
    pub fn fail(&self, address: Address) {
        self.failing.lock().insert(address);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    pub fn set_rate_limited(&self, limited: bool) {
        self.rate_limited.store(limited, Ordering::Relaxed);
    }

    pub fn advance_slot(&self) {
        self.slot.fetch_add(1, Ordering::Relaxed);
    }

    pub fn calls(&self) -> usize {
        self.multiple_calls.load(Ordering::Relaxed) + self.program_calls.load(Ordering::Relaxed)
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(&self.in_flight)
    }

    async fn pause(&self) {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait::async_trait]
impl RpcTransport for StubNode {
    async fn get_multiple_accounts(
        &self,
        addresses: &[Address],
    ) -> Result<Slotted<Vec<Option<RawAccount>>>, RpcError> {
        self.multiple_calls.fetch_add(1, Ordering::Relaxed);
        self.batch_sizes.lock().push(addresses.len());
        let _in_flight = self.enter();
        self.pause().await;

        if self.rate_limited.load(Ordering::Relaxed) {
            return Err(RpcError::RateLimited { retry_after: None });
        }
        if addresses.iter().any(|a| self.failing.lock().contains(a)) {
            return Err(RpcError::Timeout);
        }
        let ledger = self.ledger.lock();
        Ok(Slotted {
            slot: self.slot.load(Ordering::Relaxed),
            value: addresses.iter().map(|a| ledger.get(a).cloned()).collect(),
        })
    }

    async fn get_program_accounts(
        &self,
        program: &Address,
        query: &ProgramAccountsQuery,
    ) -> Result<Slotted<Vec<(Address, RawAccount)>>, RpcError> {
        self.program_calls.fetch_add(1, Ordering::Relaxed);
        let _in_flight = self.enter();
        self.pause().await;

        if self.rate_limited.load(Ordering::Relaxed) {
            return Err(RpcError::RateLimited { retry_after: None });
        }
        let ledger = self.ledger.lock();
        let value = ledger
            .iter()
            .filter(|(_, account)| account.owner == *program)
            .filter(|(_, account)| query.filters.iter().all(|f| f.matches(&account.data)))
            .map(|(address, account)| {
                let mut account = account.clone();
                if let Some(slice) = query.data_slice {
                    let end = (slice.offset + slice.length).min(account.data.len());
                    account.data = account.data.get(slice.offset..end).unwrap_or(&[]).to_vec();
                }
                (*address, account)
            })
            .collect();
        Ok(Slotted {
            slot: self.slot.load(Ordering::Relaxed),
            value,
        })
    }
}

pub fn fast_reader_config() -> ReaderConfig {
    ReaderConfig {
        max_batch_size: 100,
        max_concurrency: 4,
        max_attempts: 2,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
    }
}

pub struct Harness {
    pub node: Arc<StubNode>,
    pub store: Arc<InMemoryStore>,
    pub engine: Arc<ReconciliationEngine>,
}

pub fn harness() -> Harness {
    harness_with(fast_reader_config(), CacheConfig::default())
}

pub fn harness_with(reader: ReaderConfig, cache: CacheConfig) -> Harness {
    let node = StubNode::new();
    let store = Arc::new(InMemoryStore::new());
    let engine = ReconciliationEngine::new(
        ChainReader::new(node.clone(), reader),
        store.clone(),
        Arc::new(QueryCache::new(cache)),
        EngineConfig {
            governance_program: GOVERNANCE_PROGRAM,
            token_program: TOKEN_PROGRAM,
            default_page_size: 20,
            max_page_size: 50,
            weight_policy: WeightPolicy::SnapshotOrCurrent,
        },
    )
    .with_clock(|| NOW);
    Harness {
        node,
        store,
        engine: Arc::new(engine),
    }
}

fn program_account(entity: DecodedEntity, version: u8) -> RawAccount {
    RawAccount {
        data: encode(&entity, version).expect("fixture encodes"),
        owner: GOVERNANCE_PROGRAM,
        lamports: 1_000_000,
    }
}

pub fn realm_account(name: &str, community_mint: Address) -> RawAccount {
    program_account(
        DecodedEntity::Realm(Realm {
            community_mint,
            council_mint: None,
            authority: None,
            name: name.to_string(),
            voting_proposal_count: 0,
        }),
        2,
    )
}

pub fn governance_account(realm: Address, threshold_pct: u8, max_voting_time: u32) -> RawAccount {
    program_account(
        DecodedEntity::Governance(Governance {
            realm,
            governed_account: addr(9999),
            config: GovernanceConfig {
                vote_threshold_percentage: threshold_pct,
                min_community_weight_to_create_proposal: 1,
                max_voting_time,
                vote_tipping: VoteTipping::Disabled,
            },
            proposals_count: 0,
        }),
        1,
    )
}

/// Proposal in draft with no votes; callers adjust the fields they care about.
pub fn draft_proposal(governance: Address, mint: Address, name: &str) -> Proposal {
    Proposal {
        governance,
        governing_token_mint: mint,
        token_owner_record: addr(9998),
        name: name.to_string(),
        description_link: String::new(),
        signatories_count: 1,
        signatories_signed_off_count: 0,
        yes_vote_weight: 0,
        no_vote_weight: 0,
        abstain_vote_weight: 0,
        draft_at: NOW - 10_000,
        signing_off_at: None,
        voting_at: None,
        voting_completed_at: None,
        completed_at: None,
        cancelled_at: None,
        max_vote_weight: None,
    }
}

pub fn proposal_account(proposal: Proposal) -> RawAccount {
    program_account(DecodedEntity::Proposal(proposal), 2)
}

pub fn vote_record_account(
    proposal: Address,
    voter: Address,
    vote: Vote,
    voter_weight: Option<u64>,
) -> RawAccount {
    let version = if voter_weight.is_some() { 2 } else { 1 };
    program_account(
        DecodedEntity::VoteRecord(VoteRecord {
            proposal,
            governing_token_owner: voter,
            is_relinquished: false,
            vote,
            voter_weight,
        }),
        version,
    )
}

pub fn token_owner_record_account(
    realm: Address,
    mint: Address,
    owner: Address,
    deposit: u64,
) -> RawAccount {
    program_account(
        DecodedEntity::TokenOwnerRecord(TokenOwnerRecord {
            realm,
            governing_token_mint: mint,
            governing_token_owner: owner,
            governing_token_deposit_amount: deposit,
            unrelinquished_votes_count: 0,
            total_votes_count: 0,
            outstanding_proposal_count: 0,
            governance_delegate: None,
        }),
        1,
    )
}

/// SPL token account layout: mint, owner, amount, then state at byte 108.
pub fn token_account(mint: Address, owner: Address, amount: u64) -> RawAccount {
    let mut data = vec![0u8; TOKEN_ACCOUNT_LEN];
    data[..32].copy_from_slice(mint.as_bytes());
    data[32..64].copy_from_slice(owner.as_bytes());
    data[64..72].copy_from_slice(&amount.to_le_bytes());
    data[108] = 1;
    RawAccount {
        data,
        owner: TOKEN_PROGRAM,
        lamports: 2_039_280,
    }
}

/// SPL mint layout: supply at 36, decimals at 44, initialized flag at 45.
pub fn mint_account(supply: u64, decimals: u8) -> RawAccount {
    let mut data = vec![0u8; MINT_ACCOUNT_LEN];
    data[36..44].copy_from_slice(&supply.to_le_bytes());
    data[44] = decimals;
    data[45] = 1;
    RawAccount {
        data,
        owner: TOKEN_PROGRAM,
        lamports: 1_461_600,
    }
}

/// Realm with one governance and a community mint, returned as `(realm, governance, mint)`.
pub fn seed_realm(node: &StubNode, base: u16, threshold_pct: u8) -> (Address, Address, Address) {
    let realm = addr(base);
    let governance = addr(base + 1);
    let mint = addr(base + 2);
    node.put(realm, realm_account(&format!("realm-{}", base), mint));
    node.put(governance, governance_account(realm, threshold_pct, 3_600));
    node.put(mint, mint_account(1_000, 0));
    (realm, governance, mint)
}
