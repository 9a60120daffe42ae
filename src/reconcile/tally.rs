//! Vote tallying.
//!
//! A vote's weight is the snapshot the VoteRecord recorded when the vote was
//! cast (layout v2). Records without a snapshot (layout v1) fall back to the
//! voter's current TokenOwnerRecord deposit. Voters with neither are listed as
//! unresolved and contribute nothing.
//!
//! Relinquished records still count: relinquishing after voting ends only frees
//! the voter's tokens, the cast vote stands.

use crate::governance::{Address, Vote, VoteRecord};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeightPolicy {
    /// Snapshot when recorded, else the current deposit.
    #[default]
    SnapshotOrCurrent,
    /// Always the current deposit, ignoring snapshots.
    CurrentOnly,
}

/// Weighted vote sums of one proposal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTotals {
    pub yes: u64,
    pub no: u64,
    pub abstain: u64,
    pub voters: u32,
    pub snapshot_weighted: u32,
    pub current_weighted: u32,
    pub unresolved_voters: Vec<Address>,
}

/// Sum `records` for `proposal`.
///
/// `deposits` maps a voter (governing token owner) to their current deposit.
/// The result does not depend on the order of `records`. When a voter appears
/// more than once only the record at the lowest address counts.
pub fn tally_votes(
    proposal: &Address,
    records: &[(Address, VoteRecord)],
    deposits: &HashMap<Address, u64>,
    policy: WeightPolicy,
) -> VoteTotals {
    let mut by_voter: BTreeMap<Address, (Address, &VoteRecord)> = BTreeMap::new();
    for (address, record) in records.iter().filter(|(_, r)| r.proposal == *proposal) {
        by_voter
            .entry(record.governing_token_owner)
            .and_modify(|kept| {
                if *address < kept.0 {
                    *kept = (*address, record);
                }
            })
            .or_insert((*address, record));
    }

    let mut totals = VoteTotals::default();
    for (voter, (_, record)) in &by_voter {
        let snapshot = match policy {
            WeightPolicy::SnapshotOrCurrent => record.voter_weight,
            WeightPolicy::CurrentOnly => None,
        };
        let weight = match (snapshot, deposits.get(voter)) {
            (Some(weight), _) => {
                totals.snapshot_weighted += 1;
                weight
            }
            (None, Some(deposit)) => {
                totals.current_weighted += 1;
                *deposit
            }
            (None, None) => {
                totals.unresolved_voters.push(*voter);
                continue;
            }
        };

        totals.voters += 1;
        let bucket = match record.vote {
            Vote::Yes => &mut totals.yes,
            Vote::No => &mut totals.no,
            Vote::Abstain => &mut totals.abstain,
        };
        *bucket = bucket.saturating_add(weight);
    }
    totals.unresolved_voters = totals.unresolved_voters.into_iter().sorted().collect();
    totals
}

/// Voters whose weight must come from their current deposit.
pub fn voters_needing_deposits(
    proposal: &Address,
    records: &[(Address, VoteRecord)],
    policy: WeightPolicy,
) -> Vec<Address> {
    records
        .iter()
        .filter(|(_, r)| r.proposal == *proposal)
        .filter(|(_, r)| policy == WeightPolicy::CurrentOnly || r.voter_weight.is_none())
        .map(|(_, r)| r.governing_token_owner)
        .sorted()
        .dedup()
        .collect()
}
