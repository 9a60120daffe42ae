use crate::governance::Address;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::num::NonZeroUsize;

/// Maps entity addresses (governances, proposals, token accounts) to the realm
/// they belong to, as learned while reconciling.
///
/// Holds at most `capacity` subjects; the least recently recorded one goes first.
#[derive(Debug)]
pub struct PartitionIndex {
    inner: Mutex<IndexState>,
}

#[derive(Debug)]
struct IndexState {
    realm_of: LruCache<Address, Address>,
    subjects: HashMap<Address, BTreeSet<Address>>,
}

impl IndexState {
    fn detach(&mut self, subject: &Address, realm: &Address) {
        if let Some(set) = self.subjects.get_mut(realm) {
            set.remove(subject);
            if set.is_empty() {
                self.subjects.remove(realm);
            }
        }
    }
}

impl PartitionIndex {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(IndexState {
                realm_of: LruCache::new(capacity),
                subjects: HashMap::new(),
            }),
        }
    }

    /// Record that `subject` belongs to `realm`.
    ///
    /// Returns the subject dropped to stay within capacity, if any.
    pub fn record(&self, subject: Address, realm: Address) -> Option<Address> {
        if subject == realm {
            return None;
        }
        let mut state = self.inner.lock();
        let dropped = match state.realm_of.push(subject, realm) {
            Some((previous, old_realm)) if previous == subject => {
                if old_realm != realm {
                    state.detach(&subject, &old_realm);
                }
                None
            }
            Some((dropped, dropped_realm)) => {
                state.detach(&dropped, &dropped_realm);
                Some(dropped)
            }
            None => None,
        };
        state.subjects.entry(realm).or_default().insert(subject);
        dropped
    }

    pub fn record_all(
        &self,
        subjects: impl IntoIterator<Item = Address>,
        realm: Address,
    ) -> Vec<Address> {
        subjects
            .into_iter()
            .filter_map(|subject| self.record(subject, realm))
            .collect()
    }

    pub fn realm_of(&self, subject: &Address) -> Option<Address> {
        self.inner.lock().realm_of.peek(subject).copied()
    }

    pub fn subjects_of(&self, realm: &Address) -> Vec<Address> {
        self.inner
            .lock()
            .subjects
            .get(realm)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().realm_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
