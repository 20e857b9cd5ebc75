//! Chain name → numeric id and transport.

use std::collections::HashMap;
use std::sync::Arc;

use chainingest_core::{RepositoryError, RpcTransport};

/// What a repository needs to serve one chain.
#[derive(Clone)]
pub struct ChainSettings {
    /// Numeric chain identifier attached to every emitted record.
    pub chain_id: u64,
    /// Usually an `Arc<ProviderPool>`.
    pub transport: Arc<dyn RpcTransport>,
}

impl std::fmt::Debug for ChainSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainSettings")
            .field("chain_id", &self.chain_id)
            .field("transport", &self.transport.url())
            .finish()
    }
}

/// The chains one repository serves.
#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    chains: HashMap<String, ChainSettings>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with_chain(
        mut self,
        chain: impl Into<String>,
        chain_id: u64,
        transport: Arc<dyn RpcTransport>,
    ) -> Self {
        self.insert(chain, chain_id, transport);
        self
    }

    pub fn insert(&mut self, chain: impl Into<String>, chain_id: u64, transport: Arc<dyn RpcTransport>) {
        self.chains
            .insert(chain.into(), ChainSettings { chain_id, transport });
    }

    /// Settings for `chain`, or [`RepositoryError::UnknownChain`].
    pub fn get(&self, chain: &str) -> Result<&ChainSettings, RepositoryError> {
        self.chains
            .get(chain)
            .ok_or_else(|| RepositoryError::UnknownChain(chain.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.chains.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }
}
