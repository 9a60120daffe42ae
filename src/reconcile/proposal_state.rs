//! Proposal lifecycle derivation.
//!
//! State is never stored on chain in a form we trust; it is recomputed from the
//! proposal's counters and timestamps, the governance rules and the clock.

use crate::governance::{GovernanceConfig, Proposal, VoteTipping};
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum ProposalState {
    Draft,
    SigningOff,
    Voting,
    Succeeded,
    Defeated,
    Cancelled,
    Completed,
}

/// Weight needed to pass: `ceil(electorate * pct / 100)`, percentage capped at 100.
pub fn threshold_weight(electorate: u64, threshold_pct: u8) -> u64 {
    let pct = u128::from(threshold_pct.min(100));
    let needed = (u128::from(electorate) * pct).div_ceil(100);
    // needed <= electorate, so this cannot truncate
    needed as u64
}

/// Electorate size: the proposal's frozen snapshot if present, else the
/// governing mint's current supply.
pub fn electorate(proposal: &Proposal, mint_supply: u64) -> u64 {
    proposal.max_vote_weight.unwrap_or(mint_supply)
}

/// Derive the lifecycle state of `proposal` at unix time `now`.
pub fn derive_state(
    proposal: &Proposal,
    config: &GovernanceConfig,
    electorate: u64,
    now: i64,
) -> ProposalState {
    if proposal.completed_at.is_some() {
        return ProposalState::Completed;
    }
    if proposal.cancelled_at.is_some() {
        return ProposalState::Cancelled;
    }
    let Some(ends_at) = proposal.voting_ends_at(config.max_voting_time) else {
        return if proposal.signatories_signed_off_count == 0 && proposal.signing_off_at.is_none()
        {
            ProposalState::Draft
        } else {
            ProposalState::SigningOff
        };
    };

    let threshold = threshold_weight(electorate, config.vote_threshold_percentage);
    let yes = proposal.yes_vote_weight;
    let no = proposal.no_vote_weight;
    let passes = yes >= threshold && yes > no;

    if now >= ends_at || proposal.voting_completed_at.is_some() {
        return if passes {
            ProposalState::Succeeded
        } else {
            ProposalState::Defeated
        };
    }

    match config.vote_tipping {
        VoteTipping::Strict => {
            if yes >= threshold && yes > electorate.saturating_sub(yes) {
                ProposalState::Succeeded
            } else if electorate.saturating_sub(no) < threshold {
                ProposalState::Defeated
            } else {
                ProposalState::Voting
            }
        }
        VoteTipping::Early if passes => ProposalState::Succeeded,
        VoteTipping::Early | VoteTipping::Disabled => ProposalState::Voting,
    }
}
