use crate::error::{Result, SelectError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId {
    pub account_id: u32,
    pub project_id: u32,
}

impl TenantId {
    pub fn new(account_id: u32, project_id: u32) -> Self {
        Self {
            account_id,
            project_id,
        }
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.account_id, self.project_id)
    }
}

/// Parses `account` or `account:project`.
impl FromStr for TenantId {
    type Err = SelectError;

    fn from_str(s: &str) -> Result<Self> {
        let parse = |part: &str| {
            part.trim()
                .parse::<u32>()
                .map_err(|e| SelectError::bad_param("tenant", format!("{s:?}: {e}")))
        };
        match s.split_once(':') {
            Some((account, project)) => Ok(Self::new(parse(account)?, parse(project)?)),
            None => Ok(Self::new(parse(s)?, 0)),
        }
    }
}

/// The ordered set of tenants a query is restricted to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TenantScope {
    tenants: Vec<TenantId>,
}

impl TenantScope {
    /// Builds a scope, dropping duplicates while keeping first-seen order.
    pub fn new(tenants: impl IntoIterator<Item = TenantId>) -> Self {
        let mut scope = Self::default();
        for t in tenants {
            if !scope.tenants.contains(&t) {
                scope.tenants.push(t);
            }
        }
        scope
    }

    pub fn single(tenant: TenantId) -> Self {
        Self {
            tenants: vec![tenant],
        }
    }

    pub fn tenants(&self) -> &[TenantId] {
        &self.tenants
    }

    pub fn contains(&self, tenant: &TenantId) -> bool {
        self.tenants.contains(tenant)
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }

    /// Wire form sent in the `tenant_ids` parameter.
    pub fn encode(&self) -> String {
        // Serializing plain integer structs cannot fail.
        serde_json::to_string(&self.tenants).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn decode(s: &str) -> Result<Self> {
        let tenants: Vec<TenantId> = serde_json::from_str(s)
            .map_err(|e| SelectError::bad_param("tenant_ids", e.to_string()))?;
        Ok(Self::new(tenants))
    }
}
