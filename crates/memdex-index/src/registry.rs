// SPDX-FileCopyrightText: 2026 Memdex Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Process-wide sharing of index instances.
//!
//! Two callers asking for the same agent, store, provider and configuration
//! get the same [`MemoryIndexManager`]. Teardown is explicit.

use std::collections::HashMap;
use std::sync::Arc;

use memdex_config::MemdexConfig;
use memdex_core::{EmbeddingProvider, LlmInvoker, MemdexError};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::manager::MemoryIndexManager;

/// Key identifying one index instance.
pub fn fingerprint(config: &MemdexConfig, provider: &dyn EmbeddingProvider) -> Result<String, MemdexError> {
    let encoded = serde_json::to_string(config)
        .map_err(|e| MemdexError::Internal(format!("failed to encode config: {e}")))?;
    let digest = Sha256::digest(encoded.as_bytes());
    Ok(format!(
        "{}|{}|{}|{}|{}|{:x}",
        config.store.agent_id,
        config.store.resolved_path().display(),
        provider.id(),
        provider.model(),
        provider.provider_key(),
        digest
    ))
}

/// Shared index instances keyed by [`fingerprint`].
#[derive(Default)]
pub struct IndexRegistry {
    managers: Mutex<HashMap<String, Arc<MemoryIndexManager>>>,
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the open instance for this configuration, opening one if
    /// needed. Closed instances are replaced.
    pub async fn get_or_create(
        &self,
        config: MemdexConfig,
        provider: Arc<dyn EmbeddingProvider>,
        fallback: Option<Arc<dyn EmbeddingProvider>>,
        llm: Option<Arc<dyn LlmInvoker>>,
    ) -> Result<Arc<MemoryIndexManager>, MemdexError> {
        let key = fingerprint(&config, provider.as_ref())?;
        let mut managers = self.managers.lock().await;
        if let Some(existing) = managers.get(&key)
            && !existing.is_closed()
        {
            return Ok(Arc::clone(existing));
        }
        let manager = MemoryIndexManager::open(config, provider, fallback, llm).await?;
        debug!(key = %key, "registered memory index");
        managers.insert(key, Arc::clone(&manager));
        Ok(manager)
    }

    /// Closes and forgets one instance. Returns false if the key is unknown.
    pub async fn remove(&self, key: &str) -> Result<bool, MemdexError> {
        let removed = self.managers.lock().await.remove(key);
        match removed {
            Some(manager) => {
                manager.close().await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Closes every instance. All are attempted; the first error is returned.
    pub async fn close_all(&self) -> Result<(), MemdexError> {
        let managers: Vec<_> = self.managers.lock().await.drain().collect();
        let mut first_error = None;
        for (key, manager) in managers {
            if let Err(e) = manager.close().await {
                warn!(key = %key, error = %e, "failed to close memory index");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub async fn len(&self) -> usize {
        self.managers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.managers.lock().await.is_empty()
    }
}
