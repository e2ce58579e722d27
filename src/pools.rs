//! Pool registry.
//!
//! Each provider owns one `PoolRegistry`: a local mirror of the pools the
//! marketplace knows about, keyed by local id, plus the active-pool
//! pointer orders are routed to. Mutations take effect immediately; a
//! read after a successful mutation always sees it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::types::{Pool, PoolUpdate, RentalError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolRegistry {
    pools: BTreeMap<String, Pool>,
    active: Option<String>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a list of pools, deduplicating as `add_pool` does.
    pub fn from_pools(pools: impl IntoIterator<Item = Pool>) -> Self {
        let mut registry = Self::new();
        for pool in pools {
            registry.add_pool(pool);
        }
        registry
    }

    /// Insert a pool, or refresh the existing record carrying the same
    /// remote id. A different pool arriving under a local id that is
    /// already taken is stored under a fresh one. Returns the local id the
    /// pool is stored under.
    pub fn add_pool(&mut self, pool: Pool) -> String {
        if let Some(remote) = pool.remote_id.as_deref() {
            let existing = self
                .pools
                .values()
                .find(|p| p.remote_id.as_deref() == Some(remote))
                .map(|p| p.id.clone());
            if let Some(local_id) = existing {
                debug!(pool_id = %local_id, remote_id = remote, "Pool already mirrored, refreshing");
                self.pools.insert(local_id.clone(), Pool { id: local_id.clone(), ..pool });
                return local_id;
            }
        }
        let mut id = pool.id.clone();
        if let Some(taken) = self.pools.get(&id) {
            if taken.remote_id != pool.remote_id {
                let fresh = Uuid::new_v4().simple().to_string();
                warn!(
                    pool_id = %id,
                    new_id = %fresh,
                    remote_id = ?pool.remote_id,
                    "Local pool id already used by another pool, storing under a new id"
                );
                id = fresh;
            }
        }
        self.pools.insert(id.clone(), Pool { id: id.clone(), ..pool });
        id
    }

    /// The record `update` would produce for pool `id`, without storing it.
    pub fn preview_update(&self, id: &str, update: &PoolUpdate) -> Result<Pool, RentalError> {
        self.get(id)
            .map(|pool| update.merge_into(pool))
            .ok_or_else(|| RentalError::PoolNotFound(id.to_string()))
    }

    /// Merge `update` over pool `id` and store the result.
    pub fn update_pool(&mut self, id: &str, update: &PoolUpdate) -> Result<Pool, RentalError> {
        let merged = self.preview_update(id, update)?;
        self.pools.insert(merged.id.clone(), merged.clone());
        Ok(merged)
    }

    /// Replace the stored record with the same local id.
    pub fn store(&mut self, pool: Pool) -> Result<(), RentalError> {
        match self.pools.get_mut(&pool.id) {
            Some(existing) => {
                *existing = pool;
                Ok(())
            }
            None => Err(RentalError::PoolNotFound(pool.id)),
        }
    }

    /// Remove the pool named by local or remote id.
    ///
    /// Returns `Ok(false)` when no such pool exists (the mirror is left
    /// untouched). Clears the active pointer if it pointed at the pool.
    pub fn delete_pool(&mut self, id: &str) -> Result<bool, RentalError> {
        let doomed: Vec<String> = self
            .pools
            .values()
            .filter(|p| p.matches(id))
            .map(|p| p.id.clone())
            .collect();
        if doomed.is_empty() {
            return Ok(false);
        }
        for local_id in &doomed {
            self.pools.remove(local_id);
            if self.active.as_deref() == Some(local_id.as_str()) {
                self.active = None;
            }
        }
        if self.contains(id) {
            warn!(pool_id = id, "Pool still present after removal");
            return Err(RentalError::PoolRemovalInconsistency(id.to_string()));
        }
        Ok(true)
    }

    /// Point orders at pool `id` (local or remote id).
    pub fn set_active_pool(&mut self, id: &str) -> Result<(), RentalError> {
        let local_id = self
            .get(id)
            .map(|p| p.id.clone())
            .ok_or_else(|| RentalError::PoolNotFound(id.to_string()))?;
        self.active = Some(local_id);
        Ok(())
    }

    pub fn active_pool(&self) -> Option<&Pool> {
        self.active.as_deref().and_then(|id| self.pools.get(id))
    }

    pub fn active_pool_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Look up a pool by local id, falling back to remote id.
    pub fn get(&self, id: &str) -> Option<&Pool> {
        self.pools
            .get(id)
            .or_else(|| self.pools.values().find(|p| p.matches(id)))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn pools(&self) -> impl Iterator<Item = &Pool> {
        self.pools.values()
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}
