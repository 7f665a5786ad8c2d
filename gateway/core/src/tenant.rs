//! Tenant Registry
//!
//! Resolves a caller token to the credentials of its backing database. The
//! registry reports every matching row; the pool decides whether zero or
//! several matches are fatal.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;

use crate::adapter::AdapterError;
use crate::config::TenantToml;

/// Credentials for one tenant database
#[derive(Clone, PartialEq, Eq)]
pub struct TenantCredentials {
    /// Database user
    pub db_user: String,
    /// Database password
    pub db_password: String,
    /// Database name
    pub db_name: String,
}

impl TenantCredentials {
    /// Build credentials from their parts
    pub fn new(
        db_user: impl Into<String>,
        db_password: impl Into<String>,
        db_name: impl Into<String>,
    ) -> Self {
        Self {
            db_user: db_user.into(),
            db_password: db_password.into(),
            db_name: db_name.into(),
        }
    }
}

impl fmt::Debug for TenantCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantCredentials")
            .field("db_user", &self.db_user)
            .field("db_password", &"<redacted>")
            .field("db_name", &self.db_name)
            .finish()
    }
}

impl From<&TenantToml> for TenantCredentials {
    fn from(entry: &TenantToml) -> Self {
        Self::new(&entry.db_user, &entry.db_password, &entry.db_name)
    }
}

/// Lookup of tenant metadata by token
#[async_trait]
pub trait TenantRegistry: Send + Sync {
    /// All tenant rows registered for `token`
    async fn find_by_token(&self, token: &str) -> Result<Vec<TenantCredentials>, AdapterError>;
}

/// In-memory registry built from `[[tenants]]` entries
#[derive(Debug, Default)]
pub struct StaticTenantRegistry {
    tenants: HashMap<String, Vec<TenantCredentials>>,
}

impl StaticTenantRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from configuration entries; duplicate tokens are kept
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a TenantToml>) -> Self {
        let mut registry = Self::new();
        for entry in entries {
            registry.insert(entry.token.clone(), TenantCredentials::from(entry));
        }
        registry
    }

    /// Register a tenant row
    pub fn insert(&mut self, token: impl Into<String>, credentials: TenantCredentials) {
        self.tenants.entry(token.into()).or_default().push(credentials);
    }

    /// Number of distinct tokens
    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    /// Whether no tenant is registered
    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }
}

#[async_trait]
impl TenantRegistry for StaticTenantRegistry {
    async fn find_by_token(&self, token: &str) -> Result<Vec<TenantCredentials>, AdapterError> {
        Ok(self.tenants.get(token).cloned().unwrap_or_default())
    }
}
