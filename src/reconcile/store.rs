use crate::error::CoreError;
use crate::governance::Address;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Display settings kept off chain for a realm.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealmSettings {
	pub realm: Address,
	pub display_name: Option<String>,
	pub symbol: Option<String>,
	pub description: Option<String>,
	#[serde(default)]
	pub links: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedItemKind {
	Post,
	/// Discussion attached to an on-chain proposal.
	Proposal { proposal: Address },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItemRecord {
	pub id: u64,
	pub realm: Address,
	pub kind: FeedItemKind,
	pub title: String,
	pub score: i64,
	pub created_at: DateTime<Utc>,
	#[serde(default)]
	pub hidden: bool,
}

impl FeedItemRecord {
	pub fn proposal(&self) -> Option<Address> {
		match self.kind {
			FeedItemKind::Proposal { proposal } => Some(proposal),
			FeedItemKind::Post => None,
		}
	}
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	#[error("store unavailable: {0}")]
	Unavailable(String),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl From<StoreError> for CoreError {
	fn from(err: StoreError) -> Self {
		CoreError::Store(err.to_string())
	}
}

/// Relational records the engine joins with chain state
#[async_trait::async_trait]
pub trait OffChainStore: Send + Sync {
	async fn realm_settings(&self, realm: &Address) -> Result<Option<RealmSettings>, StoreError>;
	async fn feed_items_by_realm(&self, realm: &Address) -> Result<Vec<FeedItemRecord>, StoreError>;
	async fn feed_items_by_proposal(
		&self,
		proposal: &Address,
	) -> Result<Vec<FeedItemRecord>, StoreError>;
}

/// Serialized form of [`InMemoryStore`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
	#[serde(default)]
	pub settings: Vec<RealmSettings>,
	#[serde(default)]
	pub feed_items: Vec<FeedItemRecord>,
}

/// In-memory implementation of OffChainStore
#[derive(Debug, Default)]
pub struct InMemoryStore {
	data: RwLock<StoreSnapshot>,
	unavailable: RwLock<Option<String>>,
}

impl InMemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
		Self {
			data: RwLock::new(snapshot),
			unavailable: RwLock::new(None),
		}
	}

	/// Load records from a JSON file shaped like [`StoreSnapshot`].
	pub async fn load(path: &Path) -> Result<Self, StoreError> {
		let raw = tokio::fs::read_to_string(path).await?;
		let snapshot: StoreSnapshot = serde_json::from_str(&raw)?;
		info!(
			"Loaded {} realm settings and {} feed items from {}",
			snapshot.settings.len(),
			snapshot.feed_items.len(),
			path.display()
		);
		Ok(Self::from_snapshot(snapshot))
	}

	pub fn upsert_settings(&self, settings: RealmSettings) {
		let mut data = self.data.write();
		data.settings.retain(|s| s.realm != settings.realm);
		data.settings.push(settings);
	}

	pub fn upsert_feed_item(&self, item: FeedItemRecord) {
		let mut data = self.data.write();
		data.feed_items.retain(|i| i.id != item.id);
		data.feed_items.push(item);
	}

	/// Make every call fail with `reason` until cleared with `None`.
	pub fn set_unavailable(&self, reason: Option<&str>) {
		*self.unavailable.write() = reason.map(str::to_owned);
	}

	fn check(&self) -> Result<(), StoreError> {
		match self.unavailable.read().as_ref() {
			Some(reason) => Err(StoreError::Unavailable(reason.clone())),
			None => Ok(()),
		}
	}
}

#[async_trait::async_trait]
impl OffChainStore for InMemoryStore {
	async fn realm_settings(&self, realm: &Address) -> Result<Option<RealmSettings>, StoreError> {
		self.check()?;
		Ok(self.data.read().settings.iter().find(|s| s.realm == *realm).cloned())
	}

	async fn feed_items_by_realm(&self, realm: &Address) -> Result<Vec<FeedItemRecord>, StoreError> {
		self.check()?;
		Ok(self
			.data
			.read()
			.feed_items
			.iter()
			.filter(|i| i.realm == *realm)
			.cloned()
			.collect())
	}

	async fn feed_items_by_proposal(
		&self,
		proposal: &Address,
	) -> Result<Vec<FeedItemRecord>, StoreError> {
		self.check()?;
		Ok(self
			.data
			.read()
			.feed_items
			.iter()
			.filter(|i| i.proposal() == Some(*proposal))
			.cloned()
			.collect())
	}
}
