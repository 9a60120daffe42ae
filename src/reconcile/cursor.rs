//! Opaque pagination cursors.
//!
//! Lists are ordered by `(rank desc, address asc)`. A cursor names the last item
//! of a page and resumes strictly after it, so pages never overlap and nothing
//! between them is skipped even if items are added or removed meanwhile.
//!
//! Wire form, URL-safe base64 without padding:
//!
//! ```text
//! [version u8][rank i128 BE][address 32][filter hash u64 BE][checksum 8]
//! ```
//!
//! The checksum is the first 8 bytes of SHA-256 over everything before it.

use crate::error::CoreError;
use crate::governance::Address;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;

pub const CURSOR_VERSION: u8 = 1;
const BODY_LEN: usize = 1 + 16 + 32 + 8;
const CHECKSUM_LEN: usize = 8;

/// Position of an item in a ranked listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SortKey {
    pub rank: i128,
    pub address: Address,
}

impl SortKey {
    pub fn new(rank: i128, address: Address) -> Self {
        Self { rank, address }
    }

    /// Listing order: higher rank first, ties by address.
    pub fn listing_cmp(&self, other: &Self) -> Ordering {
        other
            .rank
            .cmp(&self.rank)
            .then_with(|| self.address.cmp(&other.address))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub after: SortKey,
    pub filter_hash: u64,
}

impl Cursor {
    pub fn encode(&self) -> String {
        let mut bytes = Vec::with_capacity(BODY_LEN + CHECKSUM_LEN);
        bytes.push(CURSOR_VERSION);
        bytes.extend_from_slice(&self.after.rank.to_be_bytes());
        bytes.extend_from_slice(self.after.address.as_bytes());
        bytes.extend_from_slice(&self.filter_hash.to_be_bytes());
        let checksum = checksum(&bytes);
        bytes.extend_from_slice(&checksum);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Parse `raw` and check it was issued for a listing with `filter_hash`.
    pub fn decode(raw: &str, filter_hash: u64) -> Result<Self, CoreError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(raw)
            .map_err(|e| CoreError::InvalidCursor(format!("not base64: {}", e)))?;
        if bytes.len() != BODY_LEN + CHECKSUM_LEN {
            return Err(CoreError::InvalidCursor(format!(
                "expected {} bytes, got {}",
                BODY_LEN + CHECKSUM_LEN,
                bytes.len()
            )));
        }
        let (body, sum) = bytes.split_at(BODY_LEN);
        if checksum(body) != sum {
            return Err(CoreError::InvalidCursor("checksum mismatch".to_string()));
        }
        if body[0] != CURSOR_VERSION {
            return Err(CoreError::InvalidCursor(format!(
                "unknown cursor version {}",
                body[0]
            )));
        }

        let mut rank = [0u8; 16];
        rank.copy_from_slice(&body[1..17]);
        let address = Address::from_slice(&body[17..49])
            .ok_or_else(|| CoreError::InvalidCursor("bad address".to_string()))?;
        let mut hash = [0u8; 8];
        hash.copy_from_slice(&body[49..57]);
        let cursor_hash = u64::from_be_bytes(hash);
        if cursor_hash != filter_hash {
            return Err(CoreError::InvalidCursor(
                "cursor was issued for a different filter".to_string(),
            ));
        }

        Ok(Self {
            after: SortKey::new(i128::from_be_bytes(rank), address),
            filter_hash: cursor_hash,
        })
    }
}

/// Stable hash of a listing's kind and filter shape.
pub fn filter_hash<F: Serialize>(kind: &str, filter: &F) -> Result<u64, CoreError> {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update([0]);
    hasher.update(serde_json::to_vec(filter)?);
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    Ok(u64::from_be_bytes(head))
}

fn checksum(body: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = Sha256::digest(body);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest[..CHECKSUM_LEN]);
    out
}

/// A page cut from a sorted listing.
#[derive(Debug)]
pub struct PageSlice<T> {
    pub items: Vec<T>,
    pub end_cursor: Option<String>,
    pub has_next: bool,
}

/// Cut the page after `cursor` from `items`, already in listing order.
pub fn paginate<T>(
    items: Vec<T>,
    key_of: impl Fn(&T) -> SortKey,
    cursor: Option<&Cursor>,
    page_size: usize,
    filter_hash: u64,
) -> PageSlice<T> {
    let page_size = page_size.max(1);
    let mut rest = items
        .into_iter()
        .skip_while(|item| {
            cursor.is_some_and(|c| key_of(item).listing_cmp(&c.after) != Ordering::Greater)
        })
        .peekable();

    let page: Vec<T> = rest.by_ref().take(page_size).collect();
    let has_next = rest.peek().is_some();
    let end_cursor = page.last().map(|last| {
        Cursor {
            after: key_of(last),
            filter_hash,
        }
        .encode()
    });

    PageSlice {
        items: page,
        end_cursor,
        has_next,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn key(rank: i128, a: u8) -> SortKey {
        SortKey::new(rank, Address::new([a; 32]))
    }

    #[test]
    fn cursor_survives_encoding() {
        let cursor = Cursor {
            after: key(-5, 3),
            filter_hash: 42,
        };
        let raw = cursor.encode();
        assert!(!raw.contains('='));
        assert_eq!(Cursor::decode(&raw, 42).unwrap(), cursor);
    }

    #[test]
    fn cursor_for_another_filter_is_rejected() {
        let raw = Cursor {
            after: key(1, 1),
            filter_hash: 42,
        }
        .encode();
        assert!(matches!(
            Cursor::decode(&raw, 43),
            Err(CoreError::InvalidCursor(_))
        ));
    }

    #[test]
    fn tampered_or_truncated_cursors_are_rejected() {
        let raw = Cursor {
            after: key(1, 1),
            filter_hash: 0,
        }
        .encode();
        let mut bytes = URL_SAFE_NO_PAD.decode(&raw).unwrap();
        bytes[3] ^= 0xff;
        let tampered = URL_SAFE_NO_PAD.encode(&bytes);

        assert!(Cursor::decode(&tampered, 0).is_err());
        assert!(Cursor::decode(&raw[..raw.len() - 4], 0).is_err());
        assert!(Cursor::decode("not a cursor!", 0).is_err());
    }

    #[test]
    fn filter_hash_depends_on_kind_and_filter() {
        let a = filter_hash("proposals", &Some("x")).unwrap();
        let b = filter_hash("proposals", &Some("y")).unwrap();
        let c = filter_hash("members", &Some("x")).unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, filter_hash("proposals", &Some("x")).unwrap());
    }

    #[test]
    fn pages_have_no_gaps_or_duplicates() {
        let mut items: Vec<SortKey> = (0..23u8).map(|i| key(i128::from(i % 5), i)).collect();
        items.sort_by(SortKey::listing_cmp);

        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = paginate(items.clone(), |k| *k, cursor.as_ref(), 4, 9);
            seen.extend(page.items.iter().copied());
            if !page.has_next {
                assert!(page.items.len() <= 4);
                break;
            }
            let raw = page.end_cursor.unwrap();
            cursor = Some(Cursor::decode(&raw, 9).unwrap());
        }

        assert_eq!(seen, items);
        let unique: BTreeSet<_> = seen.iter().map(|k| k.address).collect();
        assert_eq!(unique.len(), items.len());
    }

    #[test]
    fn cursor_resumes_after_removed_item() {
        let items = vec![key(9, 1), key(8, 2), key(7, 3)];
        let gone = Cursor {
            after: key(8, 5),
            filter_hash: 0,
        };
        let page = paginate(items, |k| *k, Some(&gone), 10, 0);
        assert_eq!(page.items, vec![key(7, 3)]);
        assert!(!page.has_next);
    }
}
