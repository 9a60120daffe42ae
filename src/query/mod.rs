//! External query surface.
//!
//! Translates `(field, arguments, principal)` triples into engine calls and
//! returns JSON. Schema building and transport live outside this crate.

/// Field table and resolvers
mod facade;

pub use facade::{FIELDS, QueryFacade, Resolver};

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    /// See feed items moderators have hidden.
    ViewHidden,
}

/// Caller identity as established by the auth layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: Option<String>,
    pub capabilities: BTreeSet<Capability>,
}

impl Principal {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            capabilities: BTreeSet::new(),
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    pub fn can_view_hidden(&self) -> bool {
        self.capabilities.contains(&Capability::ViewHidden)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("invalid arguments for {field}: {reason}")]
    InvalidArguments { field: String, reason: String },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("serialization error: {0}")]
    Serialization(String),
}
