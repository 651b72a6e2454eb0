use std::collections::HashMap;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::ConnectorError;

/// Resolves key references from configuration to secret material.
///
/// References take the form `env:NAME` or `file:PATH`; configuration never
/// carries raw keys, and resolved values are wrapped in [`SecretString`] so
/// they cannot leak through `Debug` or logging.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Resolve a reference to its secret value.
    async fn resolve(&self, reference: &str) -> Result<SecretString, ConnectorError>;
}

/// Resolves `env:NAME` references from process environment variables and
/// `file:PATH` references from the filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSecretStore;

impl EnvSecretStore {
    /// Create the store.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn resolve(&self, reference: &str) -> Result<SecretString, ConnectorError> {
        if let Some(name) = reference.strip_prefix("env:") {
            return std::env::var(name)
                .map(SecretString::from)
                .map_err(|_| ConnectorError::Secret(format!("env var {name} not set")));
        }
        if let Some(path) = reference.strip_prefix("file:") {
            let contents = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| ConnectorError::Secret(format!("reading {path}: {e}")))?;
            return Ok(SecretString::from(contents.trim().to_owned()));
        }
        Err(ConnectorError::Secret(format!(
            "unsupported secret reference: {reference}"
        )))
    }
}

/// Fixed reference-to-value map, for tests and local development.
#[derive(Debug, Default, Clone)]
pub struct StaticSecretStore {
    secrets: HashMap<String, String>,
}

impl StaticSecretStore {
    /// Create a store from `(reference, value)` pairs.
    #[must_use]
    pub fn new(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            secrets: pairs.into_iter().collect(),
        }
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn resolve(&self, reference: &str) -> Result<SecretString, ConnectorError> {
        self.secrets
            .get(reference)
            .map(|v| SecretString::from(v.clone()))
            .ok_or_else(|| ConnectorError::Secret(format!("unknown reference: {reference}")))
    }
}
