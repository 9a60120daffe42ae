//! Field-name dispatch into the reconciliation engine.
//!
//! Each external field maps to one resolver in [`FIELDS`]. A resolver parses its
//! JSON arguments into a typed struct, calls the engine and serializes the view.

use super::{Principal, QueryError};
use crate::governance::Address;
use crate::reconcile::{
    MemberFilter, ProposalFilter, ReadOptions, ReconciliationEngine, WeightPolicy,
};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Resolver signature shared by every field.
pub type Resolver = for<'a> fn(
    &'a ReconciliationEngine,
    Value,
    &'a Principal,
    ReadOptions,
) -> BoxFuture<'a, Result<Value, QueryError>>;

/// Field name to resolver.
pub static FIELDS: &[(&str, Resolver)] = &[
    ("realm", resolve_realm),
    ("governances", resolve_governances),
    ("proposals", resolve_proposals),
    ("proposal", resolve_proposal),
    ("treasury", resolve_treasury),
    ("tally", resolve_tally),
    ("members", resolve_members),
    ("feed", resolve_feed),
    ("cacheStats", resolve_cache_stats),
];

pub struct QueryFacade {
    engine: Arc<ReconciliationEngine>,
    request_timeout: Option<Duration>,
}

impl QueryFacade {
    /// Create a new façade.
    ///
    /// # Arguments
    /// * `engine` - Engine every field resolves against.
    /// * `request_timeout` - Deadline applied to each query, if any.
    pub fn new(engine: Arc<ReconciliationEngine>, request_timeout: Option<Duration>) -> Self {
        Self {
            engine,
            request_timeout,
        }
    }

    pub fn engine(&self) -> &Arc<ReconciliationEngine> {
        &self.engine
    }

    pub fn fields() -> impl Iterator<Item = &'static str> {
        FIELDS.iter().map(|(name, _)| *name)
    }

    /// Resolve `field` with JSON `args` on behalf of `principal`.
    ///
    /// # Errors
    /// `UnknownField` for names not in the table, `InvalidArguments` when `args`
    /// do not fit the field, otherwise whatever the engine reports.
    pub async fn resolve(
        &self,
        field: &str,
        args: Value,
        principal: &Principal,
    ) -> Result<Value, QueryError> {
        let resolver = FIELDS
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, resolver)| *resolver)
            .ok_or_else(|| QueryError::UnknownField(field.to_string()))?;

        let mut opts = match self.request_timeout {
            Some(timeout) => ReadOptions::with_timeout(timeout),
            None => ReadOptions::default(),
        };
        if let Some(raw) = args.get("as_of") {
            let as_of: DateTime<Utc> = parse_args(field, raw.clone())?;
            opts = opts.as_of(as_of);
        }

        debug!("Resolving {} for {:?}", field, principal.user_id);
        let result = resolver(self.engine.as_ref(), args, principal, opts).await;
        if let Err(e) = &result {
            warn!("Query {} failed: {}", field, e);
        }
        result
    }
}

#[derive(Debug, Deserialize)]
struct AddressArgs {
    address: Address,
}

#[derive(Debug, Deserialize)]
struct RealmArgs {
    realm: Address,
}

#[derive(Debug, Deserialize)]
struct ProposalsArgs {
    realm: Address,
    after: Option<String>,
    first: Option<usize>,
    #[serde(default)]
    filter: ProposalFilter,
}

#[derive(Debug, Deserialize)]
struct TreasuryArgs {
    governance: Address,
}

#[derive(Debug, Deserialize)]
struct TallyArgs {
    proposal: Address,
    weight_policy: Option<WeightPolicy>,
}

#[derive(Debug, Deserialize)]
struct MembersArgs {
    realm: Address,
    after: Option<String>,
    first: Option<usize>,
    mint: Option<Address>,
}

fn parse_args<T: DeserializeOwned>(field: &str, args: Value) -> Result<T, QueryError> {
    serde_json::from_value(args).map_err(|e| QueryError::InvalidArguments {
        field: field.to_string(),
        reason: e.to_string(),
    })
}

fn to_json<T: Serialize>(view: &T) -> Result<Value, QueryError> {
    serde_json::to_value(view).map_err(|e| QueryError::Serialization(e.to_string()))
}

fn resolve_realm<'a>(
    engine: &'a ReconciliationEngine,
    args: Value,
    _principal: &'a Principal,
    opts: ReadOptions,
) -> BoxFuture<'a, Result<Value, QueryError>> {
    async move {
        let args: AddressArgs = parse_args("realm", args)?;
        to_json(&engine.get_realm_view(args.address, opts).await?)
    }
    .boxed()
}

fn resolve_governances<'a>(
    engine: &'a ReconciliationEngine,
    args: Value,
    _principal: &'a Principal,
    opts: ReadOptions,
) -> BoxFuture<'a, Result<Value, QueryError>> {
    async move {
        let args: RealmArgs = parse_args("governances", args)?;
        to_json(&engine.list_governances(args.realm, opts).await?)
    }
    .boxed()
}

fn resolve_proposals<'a>(
    engine: &'a ReconciliationEngine,
    args: Value,
    _principal: &'a Principal,
    opts: ReadOptions,
) -> BoxFuture<'a, Result<Value, QueryError>> {
    async move {
        let args: ProposalsArgs = parse_args("proposals", args)?;
        let page = engine
            .list_proposals(
                args.realm,
                args.after.as_deref(),
                args.first,
                &args.filter,
                opts,
            )
            .await?;
        to_json(&page)
    }
    .boxed()
}

fn resolve_proposal<'a>(
    engine: &'a ReconciliationEngine,
    args: Value,
    _principal: &'a Principal,
    opts: ReadOptions,
) -> BoxFuture<'a, Result<Value, QueryError>> {
    async move {
        let args: AddressArgs = parse_args("proposal", args)?;
        to_json(&engine.get_proposal(args.address, opts).await?)
    }
    .boxed()
}

fn resolve_treasury<'a>(
    engine: &'a ReconciliationEngine,
    args: Value,
    _principal: &'a Principal,
    opts: ReadOptions,
) -> BoxFuture<'a, Result<Value, QueryError>> {
    async move {
        let args: TreasuryArgs = parse_args("treasury", args)?;
        to_json(&engine.get_treasury(args.governance, opts).await?)
    }
    .boxed()
}

fn resolve_tally<'a>(
    engine: &'a ReconciliationEngine,
    args: Value,
    _principal: &'a Principal,
    opts: ReadOptions,
) -> BoxFuture<'a, Result<Value, QueryError>> {
    async move {
        let args: TallyArgs = parse_args("tally", args)?;
        to_json(
            &engine
                .compute_tally(args.proposal, args.weight_policy, opts)
                .await?,
        )
    }
    .boxed()
}

fn resolve_members<'a>(
    engine: &'a ReconciliationEngine,
    args: Value,
    _principal: &'a Principal,
    opts: ReadOptions,
) -> BoxFuture<'a, Result<Value, QueryError>> {
    async move {
        let args: MembersArgs = parse_args("members", args)?;
        let filter = MemberFilter {
            governing_token_mint: args.mint,
        };
        let page = engine
            .list_members(args.realm, args.after.as_deref(), args.first, &filter, opts)
            .await?;
        to_json(&page)
    }
    .boxed()
}

fn resolve_feed<'a>(
    engine: &'a ReconciliationEngine,
    args: Value,
    principal: &'a Principal,
    opts: ReadOptions,
) -> BoxFuture<'a, Result<Value, QueryError>> {
    async move {
        let args: RealmArgs = parse_args("feed", args)?;
        let include_hidden = principal.can_view_hidden();
        to_json(&engine.list_feed(args.realm, include_hidden, opts).await?)
    }
    .boxed()
}

fn resolve_cache_stats<'a>(
    engine: &'a ReconciliationEngine,
    _args: Value,
    _principal: &'a Principal,
    _opts: ReadOptions,
) -> BoxFuture<'a, Result<Value, QueryError>> {
    async move { to_json(&engine.cache().stats()) }.boxed()
}
