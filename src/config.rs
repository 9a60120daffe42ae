//!
//! Service configuration.
//!
//! Every setting has a default and can be overridden through a `REALMS_*`
//! environment variable. Parsing goes through a lookup function so it can be
//! exercised without touching the process environment.

use crate::cache::CacheConfig;
use crate::chain::{MAX_MULTIPLE_ACCOUNTS, ReaderConfig};
use crate::governance::{Address, AddressParseError};
use crate::reconcile::{EngineConfig, WeightPolicy};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_RPC_URL: &str = "https://api.mainnet-beta.solana.com";
pub const DEFAULT_RPC_WS_URL: &str = "wss://api.mainnet-beta.solana.com";
pub const GOVERNANCE_PROGRAM_ID: &str = "GovER5Lthms3bLBqWub97yVrMmEogzX7xNjdXpPPCVZw";
pub const TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("{key}: invalid value {value:?}: {reason}")]
	Invalid {
		key: &'static str,
		value: String,
		reason: String,
	},

	#[error("{key}: invalid address: {source}")]
	Address {
		key: &'static str,
		#[source]
		source: AddressParseError,
	},
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
	pub rpc_url: String,
	pub rpc_ws_url: String,
	pub governance_program: Address,
	pub token_program: Address,
	pub rpc_timeout: Duration,
	pub reader: ReaderConfig,
	pub cache: CacheConfig,
	pub request_deadline: Duration,
	pub default_page_size: usize,
	pub max_page_size: usize,
	/// JSON file with off-chain records; empty store when unset.
	pub store_path: Option<PathBuf>,
}

impl ServiceConfig {
	/// Load configuration from the process environment.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	/// Load configuration from `lookup`, falling back to defaults for unset keys.
	///
	/// # Errors
	/// Returns `ConfigError` for values that do not parse or are out of range.
	pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
		let reader_defaults = ReaderConfig::default();
		let cache_defaults = CacheConfig::default();

		let max_batch_size = parse(&lookup, "REALMS_RPC_BATCH_SIZE", reader_defaults.max_batch_size)?;
		if !(1..=MAX_MULTIPLE_ACCOUNTS).contains(&max_batch_size) {
			return Err(ConfigError::Invalid {
				key: "REALMS_RPC_BATCH_SIZE",
				value: max_batch_size.to_string(),
				reason: format!("must be between 1 and {}", MAX_MULTIPLE_ACCOUNTS),
			});
		}
		let max_concurrency = positive(&lookup, "REALMS_RPC_MAX_CONCURRENCY", reader_defaults.max_concurrency)?;
		let max_attempts = positive(&lookup, "REALMS_RPC_MAX_ATTEMPTS", reader_defaults.max_attempts)?;
		let initial_backoff_ms = parse(
			&lookup,
			"REALMS_RPC_INITIAL_BACKOFF_MS",
			reader_defaults.initial_backoff.as_millis() as u64,
		)?;

		let max_page_size = positive(&lookup, "REALMS_MAX_PAGE_SIZE", 100)?;

		Ok(Self {
			rpc_url: lookup("REALMS_RPC_URL").unwrap_or_else(|| DEFAULT_RPC_URL.to_string()),
			rpc_ws_url: lookup("REALMS_RPC_WS_URL").unwrap_or_else(|| DEFAULT_RPC_WS_URL.to_string()),
			governance_program: address(&lookup, "REALMS_GOVERNANCE_PROGRAM_ID", GOVERNANCE_PROGRAM_ID)?,
			token_program: address(&lookup, "REALMS_TOKEN_PROGRAM_ID", TOKEN_PROGRAM_ID)?,
			rpc_timeout: Duration::from_secs(parse(&lookup, "REALMS_RPC_TIMEOUT_SECS", 30)?),
			reader: ReaderConfig {
				max_batch_size,
				max_concurrency,
				max_attempts,
				initial_backoff: Duration::from_millis(initial_backoff_ms),
				max_backoff: reader_defaults.max_backoff,
			},
			cache: CacheConfig {
				ttl: Duration::from_secs(parse(
					&lookup,
					"REALMS_CACHE_TTL_SECS",
					cache_defaults.ttl.as_secs(),
				)?),
				max_realms: positive(&lookup, "REALMS_CACHE_MAX_REALMS", cache_defaults.max_realms)?,
				entries_per_realm: positive(
					&lookup,
					"REALMS_CACHE_ENTRIES_PER_REALM",
					cache_defaults.entries_per_realm,
				)?,
			},
			request_deadline: Duration::from_secs(parse(&lookup, "REALMS_REQUEST_DEADLINE_SECS", 20)?),
			default_page_size: 20.min(max_page_size),
			max_page_size,
			store_path: lookup("REALMS_STORE_PATH").map(PathBuf::from),
		})
	}

	pub fn engine_config(&self) -> EngineConfig {
		EngineConfig {
			governance_program: self.governance_program,
			token_program: self.token_program,
			default_page_size: self.default_page_size,
			max_page_size: self.max_page_size,
			weight_policy: WeightPolicy::default(),
		}
	}
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, ConfigError>
where
	T: FromStr,
	T::Err: std::fmt::Display,
{
	match lookup(key) {
		None => Ok(default),
		Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
			key,
			value: raw.clone(),
			reason: e.to_string(),
		}),
	}
}

fn positive<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, ConfigError>
where
	T: FromStr + Default + PartialEq + ToString,
	T::Err: std::fmt::Display,
{
	let value = parse(lookup, key, default)?;
	if value == T::default() {
		return Err(ConfigError::Invalid {
			key,
			value: value.to_string(),
			reason: "must be greater than zero".to_string(),
		});
	}
	Ok(value)
}

fn address(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: &str) -> Result<Address, ConfigError> {
	let raw = lookup(key).unwrap_or_else(|| default.to_string());
	raw.trim()
		.parse()
		.map_err(|source| ConfigError::Address { key, source })
}
