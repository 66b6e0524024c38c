// ABOUTME: Resolves the operator account the message consumer applies changes as
// ABOUTME: Missing or unknown operators are configuration errors that abort startup

use serde::Deserialize;

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OperatorAccount {
    pub username: String,
    pub uuid: String,
}

/// Identity attached to every change the consumer applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorIdentity {
    pub username: String,
    pub uuid: String,
}

pub trait IdentityResolver {
    fn find_user(&self, username: &str) -> Result<Option<OperatorIdentity>>;
}

/// Operators declared in configuration, matched case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredOperators {
    accounts: Vec<OperatorAccount>,
}

impl ConfiguredOperators {
    pub fn new(accounts: Vec<OperatorAccount>) -> Self {
        Self { accounts }
    }
}

impl IdentityResolver for ConfiguredOperators {
    fn find_user(&self, username: &str) -> Result<Option<OperatorIdentity>> {
        Ok(self
            .accounts
            .iter()
            .find(|account| account.username.eq_ignore_ascii_case(username))
            .map(|account| OperatorIdentity {
                username: account.username.clone(),
                uuid: account.uuid.clone(),
            }))
    }
}

pub fn resolve_operator(
    username: Option<&str>,
    resolver: &dyn IdentityResolver,
) -> Result<OperatorIdentity> {
    let username = username.map(str::trim).unwrap_or_default();
    if username.is_empty() {
        return Err(SyncError::Configuration(
            "No value set for consumer.operator_user".to_string(),
        ));
    }
    tracing::info!(username, "loading operator account");
    resolver.find_user(username)?.ok_or_else(|| {
        SyncError::Configuration(format!("No user found with username: {username}"))
    })
}
