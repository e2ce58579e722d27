//! Rental providers.
//!
//! A `Provider` is one configured marketplace account: its credentials,
//! the adapter that talks to the marketplace, and the pool / pool-profile
//! mirrors the engine keeps for it. Providers exclusively own their pool
//! records; nothing is shared between providers.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::marketplaces::{MarketKind, MarketLimits, RentalMarketplace};
use crate::pools::PoolRegistry;
use crate::types::{PoolProfile, ProviderIdentity, RentalError};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Marketplace API credentials. Never serialized or logged.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: SecretString,
    pub api_secret: Option<SecretString>,
    pub api_id: Option<String>,
}

impl Credentials {
    pub fn new(api_key: String, api_secret: Option<String>, api_id: Option<String>) -> Self {
        Self {
            api_key: SecretString::new(api_key),
            api_secret: api_secret.map(SecretString::new),
            api_id,
        }
    }

    /// Key present plus either a secret or an id.
    pub fn is_complete(&self) -> bool {
        let has_secret = self
            .api_secret
            .as_ref()
            .is_some_and(|s| !s.expose_secret().is_empty());
        let has_id = self.api_id.as_deref().is_some_and(|id| !id.is_empty());
        !self.api_key.expose_secret().is_empty() && (has_secret || has_id)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"[REDACTED]")
            .field("api_secret", &self.api_secret.as_ref().map(|_| "[REDACTED]"))
            .field("api_id", &self.api_id)
            .finish()
    }
}

/// Everything needed to set up a provider.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub kind: MarketKind,
    pub name: Option<String>,
    pub credentials: Credentials,
    pub active_pool: Option<String>,
    pub active_profile: Option<String>,
}

impl ProviderSettings {
    pub fn new(kind: MarketKind, credentials: Credentials) -> Self {
        Self {
            kind,
            name: None,
            credentials,
            active_pool: None,
            active_profile: None,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Reject settings missing required credentials.
    pub fn validate(&self) -> Result<(), RentalError> {
        if self.credentials.api_key.expose_secret().is_empty() {
            return Err(RentalError::Config("settings.api_key is required!".to_string()));
        }
        if !self.credentials.is_complete() {
            return Err(RentalError::Config(
                "settings.api_secret or settings.api_id is required!".to_string(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// One configured marketplace account.
pub struct Provider {
    id: Uuid,
    name: String,
    credentials: Credentials,
    client: Arc<dyn RentalMarketplace>,
    pub(crate) pools: PoolRegistry,
    pub(crate) profiles: Vec<PoolProfile>,
    pub(crate) active_profile: Option<String>,
    rent_lock: Arc<Mutex<()>>,
}

impl Provider {
    pub fn new(settings: &ProviderSettings, client: Arc<dyn RentalMarketplace>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: settings
                .name
                .clone()
                .unwrap_or_else(|| settings.kind.type_name().to_string()),
            credentials: settings.credentials.clone(),
            client,
            pools: PoolRegistry::new(),
            profiles: Vec::new(),
            active_profile: None,
            rent_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> MarketKind {
        self.client.kind()
    }

    pub fn identity(&self) -> ProviderIdentity {
        ProviderIdentity {
            id: self.id,
            name: self.name.clone(),
            market: self.kind(),
        }
    }

    pub fn client(&self) -> Arc<dyn RentalMarketplace> {
        Arc::clone(&self.client)
    }

    pub fn pools(&self) -> &PoolRegistry {
        &self.pools
    }

    pub fn profiles(&self) -> &[PoolProfile] {
        &self.profiles
    }

    pub fn active_profile(&self) -> Option<&str> {
        self.active_profile.as_deref()
    }

    /// Set the active profile; the id must be one of the mirrored profiles.
    pub fn set_active_profile(&mut self, id: &str) -> Result<(), RentalError> {
        if !self.profiles.iter().any(|p| p.id == id) {
            return Err(RentalError::Config(format!("unknown pool profile {id}")));
        }
        self.active_profile = Some(id.to_string());
        Ok(())
    }

    /// Everything one pipeline run needs, detached from the engine's lock.
    pub fn rental_target(&self) -> RentalTarget {
        RentalTarget {
            identity: self.identity(),
            limits: self.kind().limits(),
            client: self.client(),
            has_credentials: self.credentials.is_complete(),
            pools: self.pools.clone(),
            rent_lock: Arc::clone(&self.rent_lock),
        }
    }

    pub fn summary(&self) -> ProviderSummary {
        ProviderSummary {
            id: self.id,
            name: self.name.clone(),
            kind: self.kind(),
            active_pool: self.pools.active_pool_id().map(str::to_string),
            active_profile: self.active_profile.clone(),
            pools: self.pools.pools().cloned().collect(),
            profiles: self.profiles.clone(),
        }
    }
}

/// A provider as seen by one pipeline run.
#[derive(Clone)]
pub struct RentalTarget {
    pub identity: ProviderIdentity,
    pub limits: MarketLimits,
    pub client: Arc<dyn RentalMarketplace>,
    pub has_credentials: bool,
    pub pools: PoolRegistry,
    /// Held for the whole preprocess → execute run.
    pub rent_lock: Arc<Mutex<()>>,
}

/// Serializable view of a provider (no credentials).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSummary {
    pub id: Uuid,
    pub name: String,
    pub kind: MarketKind,
    pub active_pool: Option<String>,
    pub active_profile: Option<String>,
    pub pools: Vec<crate::types::Pool>,
    pub profiles: Vec<PoolProfile>,
}
