mod common;

use chrono::{TimeZone, Utc};
use common::*;
use realms_state_sync::error::CoreError;
use realms_state_sync::governance::{Address, Vote};
use realms_state_sync::query::{Capability, Principal, QueryError, QueryFacade};
use realms_state_sync::reconcile::{
    Balance, ChainLink, FeedContent, FeedItemKind, FeedItemRecord, MemberFilter, ProposalFilter,
    ProposalState, ReadOptions, RealmSettings, WeightPolicy,
};
use realms_state_sync::rpc::AccountNotification;
use realms_state_sync::sync::{CacheInvalidationHandler, ChainEventHandler, convert_notification};
use serde_json::json;
use std::time::Duration;

fn feed_item(id: u64, realm: Address, kind: FeedItemKind, score: i64) -> FeedItemRecord {
    FeedItemRecord {
        id,
        realm,
        kind,
        title: format!("item {}", id),
        score,
        created_at: Utc.timestamp_opt(NOW + id as i64, 0).unwrap(),
        hidden: false,
    }
}

#[tokio::test]
async fn cached_realm_views_are_served_without_upstream_calls() {
    let h = harness();
    let (realm_a, _, _) = seed_realm(&h.node, 10, 60);
    let (realm_b, _, _) = seed_realm(&h.node, 20, 60);

    let a = h.engine.get_realm_view(realm_a, ReadOptions::default()).await.unwrap();
    let b = h.engine.get_realm_view(realm_b, ReadOptions::default()).await.unwrap();
    assert_eq!(a.name, "realm-10");
    assert_eq!(b.name, "realm-20");
    assert_eq!(a.governances.len(), 1);

    let calls = h.node.calls();
    h.engine.get_realm_view(realm_a, ReadOptions::default()).await.unwrap();
    h.engine.get_realm_view(realm_b, ReadOptions::default()).await.unwrap();
    assert_eq!(h.node.calls(), calls);
    assert!(h.engine.cache().stats().hits >= 2);

    // Only realm A is dropped.
    h.node.put(realm_a, realm_account("renamed", addr(12)));
    h.engine.invalidate(&realm_a);

    let a = h.engine.get_realm_view(realm_a, ReadOptions::default()).await.unwrap();
    assert_eq!(a.name, "renamed");
    let after_refresh = h.node.calls();
    assert!(after_refresh > calls);

    h.engine.get_realm_view(realm_b, ReadOptions::default()).await.unwrap();
    assert_eq!(h.node.calls(), after_refresh);
}

#[tokio::test]
async fn realm_view_joins_off_chain_settings() {
    let h = harness();
    let (realm, _, _) = seed_realm(&h.node, 10, 60);
    h.store.upsert_settings(RealmSettings {
        realm,
        display_name: Some("Example DAO".to_string()),
        symbol: Some("EX".to_string()),
        ..Default::default()
    });

    let view = h.engine.get_realm_view(realm, ReadOptions::default()).await.unwrap();
    let settings = view.settings.unwrap();
    assert_eq!(settings.display_name.as_deref(), Some("Example DAO"));
}

#[tokio::test]
async fn missing_realm_is_not_found() {
    let h = harness();
    let err = h
        .engine
        .get_realm_view(addr(1), ReadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound { entity: "realm", .. }));
}

#[tokio::test]
async fn freshness_floor_forces_a_recompute() {
    let h = harness();
    let (realm, _, _) = seed_realm(&h.node, 10, 60);
    h.engine.list_governances(realm, ReadOptions::default()).await.unwrap();
    let calls = h.node.calls();

    tokio::time::sleep(Duration::from_millis(5)).await;
    let floor = Utc::now();
    let opts = ReadOptions::default().as_of(floor);

    let fresh = h.engine.list_governances(realm, opts).await.unwrap();
    assert!(h.node.calls() > calls);
    assert!(fresh.freshness.fetched_at >= floor);

    let calls = h.node.calls();
    h.engine.list_governances(realm, opts).await.unwrap();
    assert_eq!(h.node.calls(), calls);
}

#[tokio::test]
async fn proposal_pages_cover_every_proposal_once() {
    let h = harness();
    let (realm, governance, mint) = seed_realm(&h.node, 10, 60);

    let mut expected = Vec::new();
    let draft = addr(199);
    h.node.put(draft, proposal_account(draft_proposal(governance, mint, "draft")));
    expected.push(draft);
    for i in 0..7u16 {
        let address = addr(100 + i);
        let mut proposal = draft_proposal(governance, mint, &format!("proposal {}", i));
        proposal.voting_at = Some(NOW - 100 * i64::from(i));
        h.node.put(address, proposal_account(proposal));
        expected.push(address);
    }

    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = h
            .engine
            .list_proposals(
                realm,
                cursor.as_deref(),
                Some(3),
                &ProposalFilter::default(),
                ReadOptions::default(),
            )
            .await
            .unwrap();
        assert!(page.items.len() <= 3);
        seen.extend(page.items.iter().map(|p| p.address));
        if !page.has_next {
            break;
        }
        cursor = page.end_cursor;
        assert!(cursor.is_some());
    }

    assert_eq!(seen, expected);
}

#[tokio::test]
async fn proposal_filters_narrow_the_listing() {
    let h = harness();
    let (realm, governance, mint) = seed_realm(&h.node, 10, 60);
    let mut voting = draft_proposal(governance, mint, "Fund the grants program");
    voting.voting_at = Some(NOW - 10);
    h.node.put(addr(100), proposal_account(voting));
    h.node.put(addr(101), proposal_account(draft_proposal(governance, mint, "Rename")));

    let filter = ProposalFilter {
        text: Some("grants".to_string()),
        ..Default::default()
    };
    let page = h
        .engine
        .list_proposals(realm, None, None, &filter, ReadOptions::default())
        .await
        .unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].state, ProposalState::Voting);

    let drafts = ProposalFilter {
        states: Some([ProposalState::Draft].into_iter().collect()),
        ..Default::default()
    };
    let page = h
        .engine
        .list_proposals(realm, None, None, &drafts, ReadOptions::default())
        .await
        .unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].address, addr(101));
}

#[tokio::test]
async fn cursor_from_another_filter_is_rejected() {
    let h = harness();
    let (realm, governance, mint) = seed_realm(&h.node, 10, 60);
    for i in 0..3u16 {
        h.node.put(
            addr(100 + i),
            proposal_account(draft_proposal(governance, mint, &format!("p{}", i))),
        );
    }

    let first = h
        .engine
        .list_proposals(realm, None, Some(2), &ProposalFilter::default(), ReadOptions::default())
        .await
        .unwrap();
    let cursor = first.end_cursor.unwrap();

    let other = ProposalFilter {
        text: Some("p".to_string()),
        ..Default::default()
    };
    let err = h
        .engine
        .list_proposals(realm, Some(&cursor), Some(2), &other, ReadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidCursor(_)));

    let err = h
        .engine
        .list_proposals(
            realm,
            Some("not-a-cursor"),
            Some(2),
            &ProposalFilter::default(),
            ReadOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidCursor(_)));
}

#[tokio::test]
async fn ended_proposal_over_threshold_succeeds() {
    let h = harness();
    let (realm, governance, mint) = seed_realm(&h.node, 10, 50);
    h.node.put(mint, mint_account(200, 0));

    let address = addr(100);
    let mut proposal = draft_proposal(governance, mint, "Pass me");
    proposal.voting_at = Some(NOW - 7_200);
    proposal.yes_vote_weight = 100;
    proposal.no_vote_weight = 40;
    h.node.put(address, proposal_account(proposal));
    h.store.upsert_feed_item(feed_item(
        1,
        realm,
        FeedItemKind::Proposal { proposal: address },
        3,
    ));

    let view = h.engine.get_proposal(address, ReadOptions::default()).await.unwrap();
    assert_eq!(view.state, ProposalState::Succeeded);
    assert_eq!(view.electorate, 200);
    assert_eq!(view.threshold_weight, 100);
    assert_eq!(view.realm, realm);
    assert_eq!(view.voting_ends_at, Some(NOW - 3_600));
    assert_eq!(view.discussion_count, 1);
}

#[tokio::test]
async fn proposal_below_threshold_is_defeated() {
    let h = harness();
    let (_, governance, mint) = seed_realm(&h.node, 10, 50);
    h.node.put(mint, mint_account(200, 0));

    let mut proposal = draft_proposal(governance, mint, "Not enough");
    proposal.voting_at = Some(NOW - 7_200);
    proposal.yes_vote_weight = 99;
    h.node.put(addr(100), proposal_account(proposal));

    let view = h.engine.get_proposal(addr(100), ReadOptions::default()).await.unwrap();
    assert_eq!(view.state, ProposalState::Defeated);
}

#[tokio::test]
async fn unreadable_token_account_degrades_the_treasury() {
    let h = harness();
    let (realm, governance, _) = seed_realm(&h.node, 10, 60);
    let usdc = addr(610);
    h.node.put(usdc, mint_account(1_000_000_000, 6));
    h.node.put(addr(600), token_account(usdc, governance, 1_500_000));
    h.node.put(addr(601), token_account(usdc, governance, 7));
    h.node.put(addr(602), token_account(usdc, addr(1), 9));
    let bonk = addr(611);
    h.node.put(bonk, mint_account(5_000, 0));
    h.node.put(addr(603), token_account(bonk, governance, 40));
    h.node.put(addr(604), token_account(bonk, governance, 2));
    h.node.fail(addr(601));

    let treasury = h.engine.get_treasury(governance, ReadOptions::default()).await.unwrap();

    assert_eq!(treasury.realm, Some(realm));
    assert!(treasury.degraded);
    assert_eq!(treasury.tokens.len(), 4);

    let healthy = treasury
        .tokens
        .iter()
        .find(|t| t.token_account == addr(600))
        .unwrap();
    assert_eq!(healthy.balance, Balance::Known { amount: 1_500_000 });
    assert_eq!(healthy.decimals, Some(6));
    assert_eq!(healthy.ui_amount.as_deref(), Some("1.500000"));

    let broken = treasury
        .tokens
        .iter()
        .find(|t| t.token_account == addr(601))
        .unwrap();
    assert!(matches!(broken.balance, Balance::Unknown { .. }));
    assert_eq!(broken.mint, Some(usdc));

    assert_eq!(treasury.totals.len(), 2);
    let usdc_total = treasury.totals.iter().find(|t| t.mint == usdc).unwrap();
    assert_eq!(usdc_total.amount, 1_500_000);
    assert_eq!(usdc_total.accounts, 2);
    assert!(usdc_total.partial);
    assert_eq!(usdc_total.ui_amount.as_deref(), Some("1.500000"));

    let bonk_total = treasury.totals.iter().find(|t| t.mint == bonk).unwrap();
    assert_eq!(bonk_total.amount, 42);
    assert_eq!(bonk_total.accounts, 2);
    assert!(!bonk_total.partial);
}

#[tokio::test]
async fn subject_views_are_served_from_cache_on_the_second_call() {
    let h = harness();
    let (realm, governance, mint) = seed_realm(&h.node, 10, 60);
    let proposal = addr(100);
    let mut account = draft_proposal(governance, mint, "Cached");
    account.voting_at = Some(NOW - 10);
    h.node.put(proposal, proposal_account(account));
    h.node.put(addr(300), vote_record_account(proposal, addr(400), Vote::Yes, None));
    h.node.put(addr(500), token_owner_record_account(realm, mint, addr(400), 70));
    h.node.put(addr(600), token_account(mint, governance, 5));

    let opts = ReadOptions::default();
    let first_proposal = h.engine.get_proposal(proposal, opts).await.unwrap();
    let first_treasury = h.engine.get_treasury(governance, opts).await.unwrap();
    let first_tally = h.engine.compute_tally(proposal, None, opts).await.unwrap();
    let calls = h.node.calls();
    let computations = h.engine.cache().stats().computations;

    assert_eq!(h.engine.get_proposal(proposal, opts).await.unwrap(), first_proposal);
    assert_eq!(h.engine.get_treasury(governance, opts).await.unwrap(), first_treasury);
    assert_eq!(
        h.engine.compute_tally(proposal, None, opts).await.unwrap(),
        first_tally
    );
    assert_eq!(h.node.calls(), calls);
    assert_eq!(h.engine.cache().stats().computations, computations);

    // All three still belong to the realm for invalidation.
    h.engine.invalidate(&realm);
    h.engine.get_treasury(governance, opts).await.unwrap();
    assert!(h.node.calls() > calls);
}

#[tokio::test]
async fn engine_futures_run_on_spawned_tasks() {
    let h = harness();
    let (realm, _, _) = seed_realm(&h.node, 10, 60);
    let engine = h.engine.clone();

    let view = tokio::spawn(async move {
        engine.get_realm_view(realm, ReadOptions::default()).await
    })
    .await
    .unwrap()
    .unwrap();
    assert_eq!(view.name, "realm-10");
}

#[tokio::test]
async fn corrupt_token_owner_record_is_reported_in_the_tally() {
    let h = harness();
    let (realm, governance, mint) = seed_realm(&h.node, 10, 60);
    let proposal = addr(100);
    let mut account = draft_proposal(governance, mint, "Vote");
    account.voting_at = Some(NOW - 10);
    h.node.put(proposal, proposal_account(account));

    let (healthy, broken) = (addr(400), addr(401));
    h.node.put(addr(300), vote_record_account(proposal, healthy, Vote::Yes, None));
    h.node.put(addr(301), vote_record_account(proposal, broken, Vote::No, None));
    h.node.put(addr(500), token_owner_record_account(realm, mint, healthy, 80));
    let mut corrupt = token_owner_record_account(realm, mint, broken, 50);
    let len = corrupt.data.len();
    corrupt.data.truncate(len - 3);
    h.node.put(addr(501), corrupt);

    let tally = h
        .engine
        .compute_tally(proposal, None, ReadOptions::default())
        .await
        .unwrap();
    assert_eq!((tally.yes, tally.no), (80, 0));
    assert_eq!(tally.unresolved_voters, vec![broken]);
    assert_eq!(tally.skipped.len(), 1);
    assert_eq!(tally.skipped[0].address, addr(501));
}

#[tokio::test]
async fn tally_prefers_snapshots_and_falls_back_to_deposits() {
    let h = harness();
    let (realm, governance, mint) = seed_realm(&h.node, 10, 60);
    let proposal = addr(100);
    let mut account = draft_proposal(governance, mint, "Vote");
    account.voting_at = Some(NOW - 10);
    account.max_vote_weight = Some(1_000);
    h.node.put(proposal, proposal_account(account));

    let (snapshotted, current, unknown) = (addr(400), addr(401), addr(402));
    h.node.put(addr(300), vote_record_account(proposal, snapshotted, Vote::Yes, Some(300)));
    h.node.put(addr(301), vote_record_account(proposal, current, Vote::No, None));
    h.node.put(addr(302), vote_record_account(proposal, unknown, Vote::Yes, None));
    h.node.put(addr(500), token_owner_record_account(realm, mint, snapshotted, 120));
    h.node.put(addr(501), token_owner_record_account(realm, mint, current, 50));

    let tally = h
        .engine
        .compute_tally(proposal, None, ReadOptions::default())
        .await
        .unwrap();
    assert_eq!(tally.policy, WeightPolicy::SnapshotOrCurrent);
    assert_eq!((tally.yes, tally.no, tally.abstain), (300, 50, 0));
    assert_eq!(tally.voters, 2);
    assert_eq!(tally.snapshot_weighted, 1);
    assert_eq!(tally.current_weighted, 1);
    assert_eq!(tally.unresolved_voters, vec![unknown]);
    assert_eq!(tally.electorate, 1_000);
    assert_eq!(tally.threshold_weight, 600);

    let current_only = h
        .engine
        .compute_tally(proposal, Some(WeightPolicy::CurrentOnly), ReadOptions::default())
        .await
        .unwrap();
    assert_eq!((current_only.yes, current_only.no), (120, 50));
    assert_eq!(current_only.snapshot_weighted, 0);
    assert_eq!(current_only.current_weighted, 2);
}

#[tokio::test]
async fn members_are_ordered_by_deposit() {
    let h = harness();
    let (realm, _, mint) = seed_realm(&h.node, 10, 60);
    let council = addr(900);
    h.node.put(addr(800), token_owner_record_account(realm, mint, addr(850), 10));
    h.node.put(addr(801), token_owner_record_account(realm, mint, addr(851), 50));
    h.node.put(addr(802), token_owner_record_account(realm, mint, addr(852), 50));
    h.node.put(addr(803), token_owner_record_account(realm, mint, addr(853), 5));
    h.node.put(addr(804), token_owner_record_account(realm, council, addr(854), 1_000));
    h.node.put(addr(805), token_owner_record_account(addr(20), mint, addr(855), 70));

    let all = h
        .engine
        .list_members(realm, None, Some(10), &MemberFilter::default(), ReadOptions::default())
        .await
        .unwrap();
    let order: Vec<_> = all.items.iter().map(|m| m.token_owner_record).collect();
    assert_eq!(order, vec![addr(804), addr(801), addr(802), addr(800), addr(803)]);
    assert!(!all.has_next);

    let community = MemberFilter {
        governing_token_mint: Some(mint),
    };
    let first = h
        .engine
        .list_members(realm, None, Some(2), &community, ReadOptions::default())
        .await
        .unwrap();
    assert_eq!(
        first.items.iter().map(|m| m.deposit).collect::<Vec<_>>(),
        vec![50, 50]
    );
    assert!(first.has_next);

    let second = h
        .engine
        .list_members(
            realm,
            first.end_cursor.as_deref(),
            Some(2),
            &community,
            ReadOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(
        second.items.iter().map(|m| m.token_owner_record).collect::<Vec<_>>(),
        vec![addr(800), addr(803)]
    );
}

#[tokio::test]
async fn feed_marks_orphans_and_hides_moderated_items() {
    let h = harness();
    let (realm, governance, mint) = seed_realm(&h.node, 10, 60);
    let proposal = addr(100);
    h.node.put(proposal, proposal_account(draft_proposal(governance, mint, "Linked")));

    h.store.upsert_feed_item(feed_item(1, realm, FeedItemKind::Post, 5));
    h.store.upsert_feed_item(feed_item(2, realm, FeedItemKind::Proposal { proposal }, 10));
    h.store.upsert_feed_item(feed_item(
        3,
        realm,
        FeedItemKind::Proposal { proposal: addr(777) },
        1,
    ));
    let mut hidden = feed_item(4, realm, FeedItemKind::Post, 100);
    hidden.hidden = true;
    h.store.upsert_feed_item(hidden);

    let feed = h.engine.list_feed(realm, false, ReadOptions::default()).await.unwrap();
    assert!(matches!(&feed.realm, ChainLink::Linked(summary) if summary.name == "realm-10"));
    assert_eq!(feed.items.iter().map(|i| i.id).collect::<Vec<_>>(), vec![2, 1, 3]);
    assert!(matches!(
        &feed.items[0].content,
        FeedContent::Proposal { link: ChainLink::Linked(summary) } if summary.name == "Linked"
    ));
    assert!(matches!(
        &feed.items[2].content,
        FeedContent::Proposal { link: ChainLink::Orphaned { address } } if *address == addr(777)
    ));

    let moderated = h.engine.list_feed(realm, true, ReadOptions::default()).await.unwrap();
    assert_eq!(moderated.items.iter().map(|i| i.id).collect::<Vec<_>>(), vec![4, 2, 1, 3]);
}

#[tokio::test]
async fn feed_of_unknown_realm_is_orphaned_not_an_error() {
    let h = harness();
    let realm = addr(50);
    h.store.upsert_feed_item(feed_item(1, realm, FeedItemKind::Post, 1));

    let feed = h.engine.list_feed(realm, false, ReadOptions::default()).await.unwrap();
    assert_eq!(feed.realm, ChainLink::Orphaned { address: realm });
    assert_eq!(feed.items.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn slow_upstream_exceeds_the_deadline() {
    let h = harness();
    let (realm, _, _) = seed_realm(&h.node, 10, 60);
    h.node.set_delay(Some(Duration::from_secs(10)));

    let err = h
        .engine
        .get_realm_view(realm, ReadOptions::with_timeout(Duration::from_secs(1)))
        .await
        .unwrap_err();
    assert_eq!(err, CoreError::DeadlineExceeded);

    // The abandoned computation must not block the next caller.
    h.node.set_delay(None);
    let view = h.engine.get_realm_view(realm, ReadOptions::default()).await.unwrap();
    assert_eq!(view.address, realm);
}

#[tokio::test]
async fn store_outage_fails_the_request() {
    let h = harness();
    let (realm, _, _) = seed_realm(&h.node, 10, 60);
    h.store.set_unavailable(Some("db down"));

    let err = h
        .engine
        .get_realm_view(realm, ReadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Store(reason) if reason.contains("db down")));

    let err = h
        .engine
        .list_feed(realm, false, ReadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Store(_)));
}

#[tokio::test]
async fn program_change_invalidates_the_cached_realm() {
    let h = harness();
    let (realm, governance, _) = seed_realm(&h.node, 10, 60);
    h.engine.list_governances(realm, ReadOptions::default()).await.unwrap();
    let calls = h.node.calls();

    h.node.put(governance, governance_account(realm, 75, 3_600));
    let notification = AccountNotification {
        address: governance,
        account: governance_account(realm, 75, 3_600),
        slot: 101,
    };
    let mut handler = CacheInvalidationHandler::new(h.engine.cache().clone());
    handler.handle(&convert_notification(&notification)).await.unwrap();

    let list = h.engine.list_governances(realm, ReadOptions::default()).await.unwrap();
    assert!(h.node.calls() > calls);
    assert_eq!(list.governances[0].config.vote_threshold_percentage, 75);
}

#[tokio::test]
async fn facade_dispatches_by_field_name() {
    let h = harness();
    let (realm, governance, mint) = seed_realm(&h.node, 10, 50);
    h.node.put(mint, mint_account(200, 0));
    let mut proposal = draft_proposal(governance, mint, "Pass me");
    proposal.voting_at = Some(NOW - 7_200);
    proposal.yes_vote_weight = 150;
    h.node.put(addr(100), proposal_account(proposal));

    let facade = QueryFacade::new(h.engine.clone(), Some(Duration::from_secs(5)));
    let principal = Principal::anonymous();

    let value = facade
        .resolve("proposal", json!({ "address": addr(100).to_string() }), &principal)
        .await
        .unwrap();
    assert_eq!(value["state"], "Succeeded");

    let value = facade
        .resolve("proposals", json!({ "realm": realm.to_string(), "first": 1 }), &principal)
        .await
        .unwrap();
    assert_eq!(value["items"].as_array().map(Vec::len), Some(1));

    let err = facade.resolve("nope", json!({}), &principal).await.unwrap_err();
    assert!(matches!(err, QueryError::UnknownField(field) if field == "nope"));

    let err = facade
        .resolve("realm", json!({ "address": 5 }), &principal)
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::InvalidArguments { field, .. } if field == "realm"));

    let err = facade
        .resolve("realm", json!({ "address": "0OIl" }), &principal)
        .await
        .unwrap_err();
    assert!(matches!(err, QueryError::InvalidArguments { .. }));
}

#[tokio::test]
async fn facade_shows_hidden_items_only_to_moderators() {
    let h = harness();
    let (realm, _, _) = seed_realm(&h.node, 10, 60);
    h.store.upsert_feed_item(feed_item(1, realm, FeedItemKind::Post, 1));
    let mut hidden = feed_item(2, realm, FeedItemKind::Post, 2);
    hidden.hidden = true;
    h.store.upsert_feed_item(hidden);

    let facade = QueryFacade::new(h.engine.clone(), None);
    let args = json!({ "realm": realm.to_string() });

    let public = facade
        .resolve("feed", args.clone(), &Principal::user("alice"))
        .await
        .unwrap();
    assert_eq!(public["items"].as_array().map(Vec::len), Some(1));

    let moderator = Principal::user("mod").with_capability(Capability::ViewHidden);
    let full = facade.resolve("feed", args, &moderator).await.unwrap();
    assert_eq!(full["items"].as_array().map(Vec::len), Some(2));
}
