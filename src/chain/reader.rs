//! Batched, retrying account reads.
//!
//! The reader is the only component that talks to the node. It splits address
//! sets into `getMultipleAccounts` batches and retries transient failures with
//! exponential backoff. Every upstream request, retries and bisection included,
//! holds one of `max_concurrency` permits while it is on the wire.
//!
//! A batch that still fails with an error one address could cause (a timeout, a
//! response the node could not produce) is bisected with one attempt per half,
//! so only the addresses that really cannot be read are reported as failed.
//! Rate limits and connection failures fail the whole batch without bisecting.

use crate::error::CoreError;
use crate::governance::Address;
use crate::rpc::{ProgramAccountsQuery, RawAccount, RpcError, RpcTransport, Slotted};
use backoff::ExponentialBackoffBuilder;
use backoff::future::retry;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt, stream};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Upper bound the node accepts for `getMultipleAccounts`.
pub const MAX_MULTIPLE_ACCOUNTS: usize = 100;

#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Addresses per `getMultipleAccounts` call.
    pub max_batch_size: usize,
    /// Upstream requests in flight at once. 1 makes requests strictly sequential.
    pub max_concurrency: usize,
    /// Attempts per request, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            max_batch_size: MAX_MULTIPLE_ACCOUNTS,
            max_concurrency: 4,
            max_attempts: 4,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// Outcome for one requested address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountSlot {
    Present(RawAccount),
    /// The node has no account at this address.
    Absent,
    /// The address could not be read after all retries.
    Failed(String),
}

/// Result of [`ChainReader::fetch_accounts`]: an entry for every requested address.
#[derive(Debug, Clone, Default)]
pub struct AccountBatch {
    pub accounts: HashMap<Address, AccountSlot>,
    /// Highest slot reported by any batch.
    pub slot: u64,
}

impl AccountBatch {
    pub fn get(&self, address: &Address) -> Option<&AccountSlot> {
        self.accounts.get(address)
    }

    pub fn present(&self, address: &Address) -> Option<&RawAccount> {
        match self.accounts.get(address) {
            Some(AccountSlot::Present(account)) => Some(account),
            _ => None,
        }
    }

    /// Addresses that failed, in byte order.
    pub fn failed(&self) -> Vec<Address> {
        let mut failed: Vec<Address> = self
            .accounts
            .iter()
            .filter(|(_, slot)| matches!(slot, AccountSlot::Failed(_)))
            .map(|(address, _)| *address)
            .collect();
        failed.sort();
        failed
    }

    pub fn is_complete(&self) -> bool {
        self.failed().is_empty()
    }
}

/// Counters for upstream traffic.
#[derive(Debug, Default)]
pub struct ReaderStats {
    pub requests: AtomicU64,
    pub retries: AtomicU64,
    pub failed_addresses: AtomicU64,
}

struct ChunkOutcome {
    slots: Vec<(Address, AccountSlot)>,
    slot: u64,
}

pub struct ChainReader {
    transport: Arc<dyn RpcTransport>,
    config: ReaderConfig,
    permits: Semaphore,
    stats: Arc<ReaderStats>,
}

impl ChainReader {
    pub fn new(transport: Arc<dyn RpcTransport>, config: ReaderConfig) -> Self {
        let permits = Semaphore::new(config.max_concurrency.max(1));
        Self {
            transport,
            config,
            permits,
            stats: Arc::new(ReaderStats::default()),
        }
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn stats(&self) -> Arc<ReaderStats> {
        self.stats.clone()
    }

    /// Fetch every address in `addresses`.
    ///
    /// Never fails because of individual addresses: unreadable ones come back as
    /// [`AccountSlot::Failed`]. The only error is [`CoreError::DeadlineExceeded`].
    pub async fn fetch_accounts(
        &self,
        addresses: impl IntoIterator<Item = Address>,
        deadline: Option<Instant>,
    ) -> Result<AccountBatch, CoreError> {
        let unique: Vec<Address> = addresses
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if unique.is_empty() {
            return Ok(AccountBatch::default());
        }

        let batch_size = self.config.max_batch_size.clamp(1, MAX_MULTIPLE_ACCOUNTS);
        debug!(
            "Fetching {} accounts in batches of {}",
            unique.len(),
            batch_size
        );

        let chunks: Vec<Vec<Address>> = unique
            .chunks(batch_size)
            .map(<[Address]>::to_vec)
            .collect();
        let work = async {
            let outcomes: Vec<ChunkOutcome> = stream::iter(chunks)
                .map(|chunk| self.fetch_chunk(chunk, self.config.max_attempts))
                .buffer_unordered(self.config.max_concurrency.max(1))
                .collect()
                .await;

            let mut batch = AccountBatch::default();
            for outcome in outcomes {
                batch.slot = batch.slot.max(outcome.slot);
                batch.accounts.extend(outcome.slots);
            }
            batch
        };

        let batch = with_deadline(deadline, work).await?;
        let failed = batch.failed();
        if !failed.is_empty() {
            self.stats
                .failed_addresses
                .fetch_add(failed.len() as u64, Ordering::Relaxed);
            warn!(
                "{} of {} accounts unreadable after retries",
                failed.len(),
                unique.len()
            );
        }
        Ok(batch)
    }

    /// Fetch one account that the caller cannot do without.
    ///
    /// A read failure becomes [`CoreError::PartialUpstreamFailure`] naming the address.
    pub async fn fetch_account(
        &self,
        address: Address,
        deadline: Option<Instant>,
    ) -> Result<Slotted<Option<RawAccount>>, CoreError> {
        let work = self.with_retry("getAccountInfo", self.config.max_attempts, || {
            self.transport.get_account_info(&address)
        });

        match with_deadline(deadline, work).await? {
            Ok(account) => Ok(account),
            Err(e) => {
                self.stats.failed_addresses.fetch_add(1, Ordering::Relaxed);
                warn!("Account {} unreadable after retries: {}", address, e);
                Err(CoreError::PartialUpstreamFailure {
                    failed: vec![address],
                })
            }
        }
    }

    /// Fetch program-owned accounts passing `query`.
    ///
    /// This is a single upstream call, so there is no partial result: exhausting
    /// retries fails with [`CoreError::RateLimited`] or [`CoreError::Upstream`].
    pub async fn fetch_program_accounts(
        &self,
        program: &Address,
        query: &ProgramAccountsQuery,
        deadline: Option<Instant>,
    ) -> Result<Slotted<Vec<(Address, RawAccount)>>, CoreError> {
        let work = self.with_retry("getProgramAccounts", self.config.max_attempts, || {
            self.transport.get_program_accounts(program, query)
        });

        match with_deadline(deadline, work).await? {
            Ok(accounts) => Ok(accounts),
            Err(e) if e.is_rate_limited() => {
                warn!("getProgramAccounts {} still rate limited after retries", program);
                Err(CoreError::RateLimited)
            }
            Err(e) => Err(CoreError::Upstream(format!(
                "getProgramAccounts {}: {}",
                program, e
            ))),
        }
    }

    /// Read `chunk` with up to `attempts` tries, bisecting on address-specific failures.
    fn fetch_chunk(&self, chunk: Vec<Address>, attempts: u32) -> BoxFuture<'_, ChunkOutcome> {
        async move {
            let result = self
                .with_retry("getMultipleAccounts", attempts, || {
                    self.transport.get_multiple_accounts(&chunk)
                })
                .await
                .and_then(|response| {
                    if response.value.len() == chunk.len() {
                        Ok(response)
                    } else {
                        Err(RpcError::InvalidResponse(format!(
                            "asked for {} accounts, got {}",
                            chunk.len(),
                            response.value.len()
                        )))
                    }
                });

            match result {
                Ok(response) => ChunkOutcome {
                    slots: chunk
                        .iter()
                        .copied()
                        .zip(response.value)
                        .map(|(address, account)| {
                            let slot = match account {
                                Some(account) => AccountSlot::Present(account),
                                None => AccountSlot::Absent,
                            };
                            (address, slot)
                        })
                        .collect(),
                    slot: response.slot,
                },
                Err(e) if chunk.len() > 1 && e.may_be_address_specific() => {
                    debug!(
                        "Batch of {} failed ({}), bisecting to isolate failures",
                        chunk.len(),
                        e
                    );
                    let (left, right) = chunk.split_at(chunk.len() / 2);
                    let (left, right) = futures::join!(
                        self.fetch_chunk(left.to_vec(), 1),
                        self.fetch_chunk(right.to_vec(), 1)
                    );
                    let mut slots = left.slots;
                    slots.extend(right.slots);
                    ChunkOutcome {
                        slots,
                        slot: left.slot.max(right.slot),
                    }
                }
                Err(e) => {
                    warn!("{} account(s) unreadable: {}", chunk.len(), e);
                    let reason = e.to_string();
                    ChunkOutcome {
                        slots: chunk
                            .iter()
                            .map(|address| (*address, AccountSlot::Failed(reason.clone())))
                            .collect(),
                        slot: 0,
                    }
                }
            }
        }
        .boxed()
    }

    /// Run `call` until it succeeds, fails permanently, or `max_attempts` run out.
    /// Each attempt waits for a concurrency permit; backoff sleeps do not hold one.
    async fn with_retry<T, F, Fut>(
        &self,
        method: &'static str,
        max_attempts: u32,
        mut call: F,
    ) -> Result<T, RpcError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.initial_backoff)
            .with_max_interval(self.config.max_backoff)
            .with_max_elapsed_time(None)
            .build();
        let max_attempts = max_attempts.max(1);
        let permits = &self.permits;
        let stats = &self.stats;
        let mut attempt = 0u32;

        retry(policy, || {
            attempt += 1;
            let current = attempt;
            let request = call();
            async move {
                let Ok(_permit) = permits.acquire().await else {
                    return Err(backoff::Error::permanent(RpcError::Closed));
                };
                stats.requests.fetch_add(1, Ordering::Relaxed);
                if current > 1 {
                    stats.retries.fetch_add(1, Ordering::Relaxed);
                }
                match request.await {
                    Ok(value) => Ok(value),
                    Err(e) if !e.is_transient() || current >= max_attempts => {
                        debug!("{} giving up after {} attempt(s): {}", method, current, e);
                        Err(backoff::Error::permanent(e))
                    }
                    Err(e) => {
                        debug!("{} attempt {} failed, retrying: {}", method, current, e);
                        match e.retry_after() {
                            Some(delay) => Err(backoff::Error::retry_after(e, delay)),
                            None => Err(backoff::Error::transient(e)),
                        }
                    }
                }
            }
        })
        .await
    }
}

/// Bound `work` by an optional deadline. Expiry drops `work` and any requests it
/// still has in flight.
pub async fn with_deadline<T>(
    deadline: Option<Instant>,
    work: impl Future<Output = T>,
) -> Result<T, CoreError> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, work)
            .await
            .map_err(|_| CoreError::DeadlineExceeded),
        None => Ok(work.await),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::Slotted;
    use parking_lot::Mutex;

    /// Node that fails the first `failures` calls with the given error factory.
    struct FlakyNode {
        failures: Mutex<u32>,
        error: fn() -> RpcError,
        calls: AtomicU64,
    }

    #[async_trait::async_trait]
    impl RpcTransport for FlakyNode {
        async fn get_multiple_accounts(
            &self,
            addresses: &[Address],
        ) -> Result<Slotted<Vec<Option<RawAccount>>>, RpcError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            {
                let mut failures = self.failures.lock();
                if *failures > 0 {
                    *failures -= 1;
                    return Err((self.error)());
                }
            }
            Ok(Slotted {
                slot: 7,
                value: addresses.iter().map(|_| None).collect(),
            })
        }

        async fn get_program_accounts(
            &self,
            _program: &Address,
            _query: &ProgramAccountsQuery,
        ) -> Result<Slotted<Vec<(Address, RawAccount)>>, RpcError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err((self.error)())
        }
    }

    fn reader(node: Arc<FlakyNode>, max_attempts: u32) -> ChainReader {
        ChainReader::new(
            node,
            ReaderConfig {
                max_batch_size: 10,
                max_concurrency: 2,
                max_attempts,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_is_retried_until_success() {
        let node = Arc::new(FlakyNode {
            failures: Mutex::new(2),
            error: || RpcError::RateLimited {
                retry_after: Some(Duration::from_millis(5)),
            },
            calls: AtomicU64::new(0),
        });
        let reader = reader(node.clone(), 4);

        let batch = reader
            .fetch_accounts([Address::new([1; 32])], None)
            .await
            .unwrap();
        assert_eq!(batch.get(&Address::new([1; 32])), Some(&AccountSlot::Absent));
        assert_eq!(node.calls.load(Ordering::SeqCst), 3);
        assert_eq!(batch.slot, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let node = Arc::new(FlakyNode {
            failures: Mutex::new(1),
            error: || RpcError::Rpc {
                code: -32602,
                message: "invalid params".to_string(),
            },
            calls: AtomicU64::new(0),
        });
        let reader = reader(node.clone(), 4);

        let address = Address::new([2; 32]);
        let batch = reader.fetch_accounts([address], None).await.unwrap();
        assert!(matches!(batch.get(&address), Some(AccountSlot::Failed(_))));
        assert_eq!(node.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_program_query_reports_rate_limit() {
        let node = Arc::new(FlakyNode {
            failures: Mutex::new(0),
            error: || RpcError::RateLimited { retry_after: None },
            calls: AtomicU64::new(0),
        });
        let reader = reader(node.clone(), 3);

        let err = reader
            .fetch_program_accounts(&Address::new([3; 32]), &ProgramAccountsQuery::default(), None)
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::RateLimited);
        assert_eq!(node.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn duplicate_addresses_are_fetched_once() {
        let node = Arc::new(FlakyNode {
            failures: Mutex::new(0),
            error: || RpcError::Timeout,
            calls: AtomicU64::new(0),
        });
        let reader = reader(node.clone(), 1);
        let address = Address::new([4; 32]);

        let batch = reader
            .fetch_accounts([address, address, address], None)
            .await
            .unwrap();
        assert_eq!(batch.accounts.len(), 1);
        assert_eq!(node.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_request_makes_no_calls() {
        let node = Arc::new(FlakyNode {
            failures: Mutex::new(0),
            error: || RpcError::Timeout,
            calls: AtomicU64::new(0),
        });
        let reader = reader(node.clone(), 1);

        let batch = reader.fetch_accounts(Vec::new(), None).await.unwrap();
        assert!(batch.accounts.is_empty());
        assert_eq!(node.calls.load(Ordering::SeqCst), 0);
    }
}
