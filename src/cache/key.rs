use crate::governance::Address;
use serde::Serialize;
use std::fmt;

/// Kind of engine output an entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EntityKind {
    RealmView,
    Governances,
    ProposalPage,
    Proposal,
    Tally,
    Treasury,
    MemberPage,
    Feed,
}

/// Pagination window of a page entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageWindow {
    pub cursor: Option<String>,
    pub page_size: usize,
}

/// Identifies one cached engine output.
///
/// `partition` is the realm the output belongs to, or the subject address when
/// the realm is not known yet. Invalidation works per partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub partition: Address,
    pub kind: EntityKind,
    pub window: Option<PageWindow>,
    pub filter_hash: u64,
    /// Entity inside the partition, for single-entity outputs.
    pub subject: Option<Address>,
}

impl CacheKey {
    pub fn new(partition: Address, kind: EntityKind) -> Self {
        Self {
            partition,
            kind,
            window: None,
            filter_hash: 0,
            subject: None,
        }
    }

    pub fn with_window(mut self, cursor: Option<&str>, page_size: usize) -> Self {
        self.window = Some(PageWindow {
            cursor: cursor.map(str::to_owned),
            page_size,
        });
        self
    }

    pub fn with_filter_hash(mut self, filter_hash: u64) -> Self {
        self.filter_hash = filter_hash;
        self
    }

    pub fn with_subject(mut self, subject: Address) -> Self {
        self.subject = Some(subject);
        self
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}@{}", self.kind, self.partition)?;
        if let Some(subject) = &self.subject {
            write!(f, "/{}", subject)?;
        }
        if let Some(window) = &self.window {
            write!(
                f,
                "[{}+{}]",
                window.cursor.as_deref().unwrap_or("start"),
                window.page_size
            )?;
        }
        if self.filter_hash != 0 {
            write!(f, "#{}", hex::encode(self.filter_hash.to_be_bytes()))?;
        }
        Ok(())
    }
}
