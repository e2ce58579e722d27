//! Core engine: the rental orchestration façade.
//!
//! `HashRenter` owns the configured providers, the registered strategies,
//! the receipt log and the event bus. Every rental, whoever starts it,
//! funnels through [`HashRenter::rent`]: targets are resolved, the
//! preprocess → execute pipeline runs per provider, a receipt is
//! recorded, a snapshot is pushed, and exactly one report is published.

pub mod autorenter;
pub mod events;
pub mod execute;
pub mod preprocess;

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::marketplaces::{
    MarketKind, MarketplaceError, OrderBook, OrderReceipt, RentalMarketplace,
};
use crate::pools::PoolRegistry;
use crate::provider::{Provider, ProviderSettings, ProviderSummary};
use crate::storage::{EngineSnapshot, SnapshotSink};
use crate::strategy::manual::ManualRentStrategy;
use crate::strategy::sensor::SensorReading;
use crate::strategy::{RentTrigger, RentalStrategy, StrategyKind, StrategySignal};
use crate::types::{
    Pool, PoolProfile, PoolSpec, PoolUpdate, ProviderIdentity, Receipt, RentalError,
    RentalReport, RentalRequest, StatusType,
};
pub use autorenter::{AggregationPolicy, AutoRenter, PoolSource, RentApproval};
pub use events::{EventBus, RentalEvent};

// ---------------------------------------------------------------------------
// Rent intents
// ---------------------------------------------------------------------------

/// Which configured providers a rental targets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ProviderSelector {
    #[default]
    All,
    Id(Uuid),
    Name(String),
    Market(MarketKind),
}

impl ProviderSelector {
    fn matches(&self, provider: &Provider) -> bool {
        match self {
            ProviderSelector::All => true,
            ProviderSelector::Id(id) => provider.id() == *id,
            ProviderSelector::Name(name) => provider.name() == name,
            ProviderSelector::Market(kind) => provider.kind() == *kind,
        }
    }
}

/// One logical rent: what to rent, where, and who approves it.
#[derive(Clone)]
pub struct RentIntent {
    pub request: RentalRequest,
    pub selector: ProviderSelector,
    pub approval: Option<Arc<dyn RentApproval>>,
}

impl RentIntent {
    pub fn new(request: RentalRequest) -> Self {
        Self {
            request,
            selector: ProviderSelector::All,
            approval: None,
        }
    }

    pub fn with_selector(mut self, selector: ProviderSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_approval(mut self, approval: Arc<dyn RentApproval>) -> Self {
        self.approval = Some(approval);
        self
    }
}

impl fmt::Debug for RentIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RentIntent")
            .field("request", &self.request)
            .field("selector", &self.selector)
            .field("approval", &self.approval.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Operation results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineSettings {
    pub aggregation: AggregationPolicy,
    /// Caller-level bound on each provider's pipeline run.
    pub rent_timeout: Option<Duration>,
}

/// Result of a successful provider setup.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSetup {
    pub provider: ProviderSummary,
    pub pools: Vec<Pool>,
    pub profiles: Vec<PoolProfile>,
}

/// What one provider did during a pool or profile operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderPoolResult {
    pub provider: ProviderIdentity,
    pub success: bool,
    pub message: String,
}

/// Structured result of a pool create/update/delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolChange {
    /// Local pool (or profile) id the change applied to.
    pub id: String,
    /// True when every provider involved succeeded.
    pub success: bool,
    pub message: String,
    pub results: Vec<ProviderPoolResult>,
}

impl PoolChange {
    fn from_results(id: &str, done: &str, results: Vec<ProviderPoolResult>) -> Self {
        let failed = results.iter().filter(|r| !r.success).count();
        let message = match failed {
            0 => done.to_string(),
            n => format!("{n} of {} provider(s) failed", results.len()),
        };
        Self {
            id: id.to_string(),
            success: failed == 0,
            message,
            results,
        }
    }

    fn changed(&self) -> bool {
        self.results.iter().any(|r| r.success)
    }
}

/// Result of an order cancellation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelOutcome {
    pub provider: ProviderIdentity,
    pub order_id: String,
    pub success: bool,
    /// `NETWORK` when the marketplace could not be reached, `MARKETPLACE`
    /// when it answered with an error.
    pub status_type: Option<StatusType>,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct Inner {
    settings: EngineSettings,
    providers: RwLock<Vec<Provider>>,
    strategies: std::sync::RwLock<BTreeMap<StrategyKind, Arc<dyn RentalStrategy>>>,
    receipts: Mutex<Vec<Receipt>>,
    events: EventBus,
    sink: Option<Arc<dyn SnapshotSink>>,
}

#[async_trait]
impl PoolSource for Inner {
    async fn current_pools(&self, provider: Uuid) -> Option<PoolRegistry> {
        self.providers
            .read()
            .await
            .iter()
            .find(|p| p.id() == provider)
            .map(|p| p.pools.clone())
    }
}

/// The orchestration engine. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct HashRenter {
    inner: Arc<Inner>,
}

impl HashRenter {
    pub fn new(settings: EngineSettings) -> Self {
        Self::build(settings, None)
    }

    /// An engine that pushes a snapshot to `sink` after every mutation.
    pub fn with_snapshot_sink(settings: EngineSettings, sink: Arc<dyn SnapshotSink>) -> Self {
        Self::build(settings, Some(sink))
    }

    fn build(settings: EngineSettings, sink: Option<Arc<dyn SnapshotSink>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                providers: RwLock::new(Vec::new()),
                strategies: std::sync::RwLock::new(BTreeMap::new()),
                receipts: Mutex::new(Vec::new()),
                events: EventBus::new(),
                sink,
            }),
        }
    }

    pub fn settings(&self) -> EngineSettings {
        self.inner.settings
    }

    // -- Providers ---------------------------------------------------------

    /// Marketplace type names this engine can rent from.
    pub fn supported_markets() -> Vec<&'static str> {
        MarketKind::ALL.iter().map(MarketKind::type_name).collect()
    }

    /// Authorize, mirror pools and profiles, and register a provider.
    ///
    /// Only malformed settings and a failed authorization are errors; no
    /// engine state changes unless setup succeeds.
    pub async fn setup_provider(
        &self,
        settings: ProviderSettings,
        client: Arc<dyn RentalMarketplace>,
    ) -> Result<ProviderSetup, RentalError> {
        settings.validate()?;
        if client.kind() != settings.kind {
            return Err(RentalError::Config(format!(
                "adapter for {} does not match settings.kind {}",
                client.kind(),
                settings.kind
            )));
        }

        let mut provider = Provider::new(&settings, Arc::clone(&client));
        match client.test_authorization().await {
            Ok(true) => {}
            Ok(false) => {
                return Err(RentalError::Authorization {
                    provider: provider.name().to_string(),
                    message: "Provider Authorization Failed".to_string(),
                })
            }
            Err(e) => {
                return Err(RentalError::Authorization {
                    provider: provider.name().to_string(),
                    message: format!("Unable to check Provider Authorization: {e}"),
                })
            }
        }

        match client.get_pools().await {
            Ok(pools) => {
                for pool in pools {
                    provider.pools.add_pool(pool);
                }
            }
            Err(e) => warn!(provider = %provider.name(), error = %e, "Could not fetch pools"),
        }

        match client.get_pool_profiles().await {
            Ok(profiles) => provider.profiles = profiles,
            Err(MarketplaceError::Unsupported(_)) => {}
            Err(e) => warn!(provider = %provider.name(), error = %e, "Could not fetch pool profiles"),
        }

        if let Some(pool_id) = settings.active_pool.as_deref() {
            if let Err(e) = provider.pools.set_active_pool(pool_id) {
                warn!(provider = %provider.name(), error = %e, "Configured active pool not found");
            }
        }
        if let Some(profile_id) = settings.active_profile.as_deref() {
            if let Err(e) = provider.set_active_profile(profile_id) {
                warn!(provider = %provider.name(), error = %e, "Configured active profile not found");
            }
        }
        if provider.active_profile.is_none() {
            provider.active_profile = provider.profiles.first().map(|p| p.id.clone());
        }

        let setup = ProviderSetup {
            provider: provider.summary(),
            pools: provider.pools.pools().cloned().collect(),
            profiles: provider.profiles.clone(),
        };
        info!(
            provider = %provider.identity(),
            pools = setup.pools.len(),
            profiles = setup.profiles.len(),
            "Rental provider set up"
        );

        self.inner.providers.write().await.push(provider);
        self.persist().await;
        Ok(setup)
    }

    /// Re-apply saved pool mirrors and active pool/profile pointers to the
    /// providers matching a saved summary by name and marketplace. Returns
    /// how many providers were matched.
    pub async fn restore_providers(&self, saved: &[ProviderSummary]) -> usize {
        let restored = {
            let mut providers = self.inner.providers.write().await;
            let mut restored = 0;
            for summary in saved {
                let Some(provider) = providers
                    .iter_mut()
                    .find(|p| p.name() == summary.name && p.kind() == summary.kind)
                else {
                    debug!(provider = %summary.name, "Saved provider is no longer configured");
                    continue;
                };
                for pool in &summary.pools {
                    if !provider.pools.contains(&pool.id) {
                        provider.pools.add_pool(pool.clone());
                    }
                }
                if let Some(active) = summary.active_pool.as_deref() {
                    let remote = summary
                        .pools
                        .iter()
                        .find(|p| p.id == active)
                        .and_then(|p| p.remote_id.as_deref());
                    let found = std::iter::once(active)
                        .chain(remote)
                        .any(|id| provider.pools.set_active_pool(id).is_ok());
                    if !found {
                        warn!(provider = %summary.name, pool_id = active, "Saved active pool not found");
                    }
                }
                if let Some(profile) = summary.active_profile.as_deref() {
                    if let Err(e) = provider.set_active_profile(profile) {
                        warn!(provider = %summary.name, error = %e, "Saved active profile not found");
                    }
                }
                info!(
                    provider = %provider.identity(),
                    active_pool = ?provider.pools.active_pool_id(),
                    active_profile = ?provider.active_profile,
                    "Provider state restored"
                );
                restored += 1;
            }
            restored
        };
        if restored > 0 {
            self.persist().await;
        }
        restored
    }

    /// Remove a provider. Returns false if no provider has this id.
    pub async fn remove_provider(&self, id: Uuid) -> bool {
        let removed = {
            let mut providers = self.inner.providers.write().await;
            let before = providers.len();
            providers.retain(|p| p.id() != id);
            providers.len() != before
        };
        if removed {
            info!(provider_id = %id, "Rental provider removed");
            self.persist().await;
        }
        removed
    }

    pub async fn providers(&self) -> Vec<ProviderSummary> {
        self.inner
            .providers
            .read()
            .await
            .iter()
            .map(Provider::summary)
            .collect()
    }

    pub async fn provider(&self, id: Uuid) -> Option<ProviderSummary> {
        self.inner
            .providers
            .read()
            .await
            .iter()
            .find(|p| p.id() == id)
            .map(Provider::summary)
    }

    async fn clients(
        &self,
        selector: &ProviderSelector,
    ) -> Vec<(ProviderIdentity, Arc<dyn RentalMarketplace>)> {
        self.inner
            .providers
            .read()
            .await
            .iter()
            .filter(|p| selector.matches(p))
            .map(|p| (p.identity(), p.client()))
            .collect()
    }

    async fn client(
        &self,
        provider_id: Uuid,
    ) -> Result<(ProviderIdentity, Arc<dyn RentalMarketplace>), RentalError> {
        self.clients(&ProviderSelector::Id(provider_id))
            .await
            .into_iter()
            .next()
            .ok_or_else(|| RentalError::ProviderNotFound(provider_id.to_string()))
    }

    /// Apply `f` to one provider under the write lock.
    async fn with_provider<T>(
        &self,
        provider_id: Uuid,
        f: impl FnOnce(&mut Provider) -> Result<T, RentalError>,
    ) -> Result<T, RentalError> {
        let mut providers = self.inner.providers.write().await;
        let provider = providers
            .iter_mut()
            .find(|p| p.id() == provider_id)
            .ok_or_else(|| RentalError::ProviderNotFound(provider_id.to_string()))?;
        f(provider)
    }

    // -- Pools ---------------------------------------------------------------

    /// Create a pool on every provider and make it their active pool.
    ///
    /// The pool is mirrored locally only on providers whose marketplace
    /// accepted it.
    pub async fn create_pool(&self, spec: &PoolSpec) -> Result<PoolChange, RentalError> {
        spec.validate()?;
        let clients = self.clients(&ProviderSelector::All).await;
        if clients.is_empty() {
            return Err(RentalError::NoProvider);
        }

        let id = Uuid::new_v4().simple().to_string();
        let mut results = Vec::with_capacity(clients.len());
        for (identity, client) in clients {
            let mut pool = spec.to_pool(&id);
            let response = client.create_or_edit_pool(&pool).await;
            let outcome = match response {
                Ok(ack) if ack.success => {
                    pool.remote_id = ack.remote_id.or(pool.remote_id);
                    self.with_provider(identity.id, |p| {
                        let local_id = p.pools.add_pool(pool);
                        p.pools.set_active_pool(&local_id)
                    })
                    .await
                    .map(|_| "Pool created".to_string())
                    .map_err(|e| e.to_string())
                }
                Ok(ack) => Err(ack
                    .message
                    .unwrap_or_else(|| "marketplace rejected the pool".to_string())),
                Err(e) => Err(e.to_string()),
            };
            results.push(pool_result(identity, outcome));
        }

        let change = PoolChange::from_results(&id, "Pool created", results);
        info!(pool_id = %id, success = change.success, "Pool create finished");
        if change.changed() {
            self.persist().await;
        }
        Ok(change)
    }

    /// Merge `update` over pool `id` on the selected providers that hold it,
    /// push the merged record to each marketplace, and store it locally.
    ///
    /// Fields the update leaves unset keep their current values.
    pub async fn update_pool(
        &self,
        id: &str,
        update: &PoolUpdate,
        selector: &ProviderSelector,
    ) -> Result<PoolChange, RentalError> {
        let mut plans = Vec::new();
        {
            let providers = self.inner.providers.read().await;
            for p in providers.iter().filter(|p| selector.matches(p) && p.pools.contains(id)) {
                plans.push((p.identity(), p.client(), p.pools.preview_update(id, update)?));
            }
        }
        if plans.is_empty() {
            return Err(RentalError::PoolNotFound(id.to_string()));
        }

        let mut results = Vec::with_capacity(plans.len());
        for (identity, client, mut merged) in plans {
            let response = client.create_or_edit_pool(&merged).await;
            let outcome = match response {
                Ok(ack) if ack.success => {
                    if ack.remote_id.is_some() {
                        merged.remote_id = ack.remote_id;
                    }
                    self.with_provider(identity.id, |p| p.pools.store(merged))
                        .await
                        .map(|_| "Updated".to_string())
                        .map_err(|e| e.to_string())
                }
                Ok(ack) => Err(ack
                    .message
                    .unwrap_or_else(|| "marketplace rejected the update".to_string())),
                Err(e) => Err(e.to_string()),
            };
            results.push(pool_result(identity, outcome));
        }

        let change = PoolChange::from_results(id, "Updated", results);
        if change.changed() {
            self.persist().await;
        }
        Ok(change)
    }

    /// Remove pool `id` (local or remote id) from every provider's mirror.
    ///
    /// An id no provider holds is a successful no-op.
    pub async fn delete_pool(&self, id: &str) -> PoolChange {
        let results: Vec<ProviderPoolResult> = {
            let mut providers = self.inner.providers.write().await;
            providers
                .iter_mut()
                .filter_map(|p| {
                    let outcome = match p.pools.delete_pool(id) {
                        Ok(false) => return None,
                        Ok(true) => Ok(format!("Pool: {id} removed.")),
                        Err(e) => Err(e.to_string()),
                    };
                    Some(pool_result(p.identity(), outcome))
                })
                .collect()
        };

        if results.is_empty() {
            debug!(pool_id = id, "Pool not mirrored anywhere, nothing to delete");
        }
        let change = PoolChange::from_results(id, "Deleted", results);
        if change.changed() {
            self.persist().await;
        }
        change
    }

    /// Point the selected providers' orders at pool `id`. Returns how many
    /// providers were updated.
    pub async fn set_active_pool(
        &self,
        id: &str,
        selector: &ProviderSelector,
    ) -> Result<usize, RentalError> {
        let updated = {
            let mut providers = self.inner.providers.write().await;
            let mut updated = 0;
            for provider in providers.iter_mut().filter(|p| selector.matches(p)) {
                if provider.pools.set_active_pool(id).is_ok() {
                    updated += 1;
                }
            }
            updated
        };
        if updated == 0 {
            return Err(RentalError::PoolNotFound(id.to_string()));
        }
        self.persist().await;
        Ok(updated)
    }

    /// All mirrored pools, deduplicated by local id.
    pub async fn pools(&self) -> Vec<Pool> {
        let providers = self.inner.providers.read().await;
        let mut seen = HashSet::new();
        providers
            .iter()
            .flat_map(|p| p.pools.pools())
            .filter(|pool| seen.insert(pool.id.clone()))
            .cloned()
            .collect()
    }

    /// Look up a pool by local or remote id.
    pub async fn pool(&self, id: &str) -> Option<Pool> {
        let providers = self.inner.providers.read().await;
        providers.iter().find_map(|p| p.pools.get(id).cloned())
    }

    // -- Pool profiles ---------------------------------------------------------

    /// Create a pool profile on every provider whose marketplace has them.
    pub async fn create_pool_profile(
        &self,
        name: &str,
        algorithm: &str,
    ) -> Result<Vec<PoolProfile>, RentalError> {
        let mut created = Vec::new();
        for (identity, client) in self.clients(&ProviderSelector::All).await {
            match client.create_pool_profile(name, algorithm).await {
                Ok(profile) => {
                    let stored = profile.clone();
                    self.with_provider(identity.id, |p| {
                        if p.active_profile.is_none() {
                            p.active_profile = Some(stored.id.clone());
                        }
                        p.profiles.push(stored);
                        Ok(())
                    })
                    .await?;
                    info!(provider = %identity, profile_id = %profile.id, "Pool profile created");
                    created.push(profile);
                }
                Err(MarketplaceError::Unsupported(_)) => {}
                Err(e) => {
                    return Err(RentalError::Internal(format!(
                        "Failed to create pool profile on {identity}: {e}"
                    )))
                }
            }
        }
        if !created.is_empty() {
            self.persist().await;
        }
        Ok(created)
    }

    pub async fn delete_pool_profile(&self, id: &str) -> Result<PoolChange, RentalError> {
        let holders: Vec<_> = {
            let providers = self.inner.providers.read().await;
            if providers.is_empty() {
                return Err(RentalError::NoProvider);
            }
            providers
                .iter()
                .filter(|p| p.profiles.iter().any(|profile| profile.id == id))
                .map(|p| (p.identity(), p.client()))
                .collect()
        };

        let mut results = Vec::with_capacity(holders.len());
        for (identity, client) in holders {
            let response = client.delete_pool_profile(id).await;
            let outcome = match response {
                Ok(()) => self
                    .with_provider(identity.id, |p| {
                        p.profiles.retain(|profile| profile.id != id);
                        if p.active_profile.as_deref() == Some(id) {
                            p.active_profile = None;
                        }
                        Ok("profile deleted".to_string())
                    })
                    .await
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            results.push(pool_result(identity, outcome));
        }

        let change = PoolChange::from_results(id, "profile deleted", results);
        if change.changed() {
            self.persist().await;
        }
        Ok(change)
    }

    /// All mirrored pool profiles, deduplicated by id.
    pub async fn pool_profiles(&self) -> Vec<PoolProfile> {
        let providers = self.inner.providers.read().await;
        let mut seen = HashSet::new();
        providers
            .iter()
            .flat_map(|p| p.profiles.iter())
            .filter(|profile| seen.insert(profile.id.clone()))
            .cloned()
            .collect()
    }

    // -- Marketplace queries -----------------------------------------------------

    /// Balance in the provider's settlement currency.
    pub async fn balance(&self, provider_id: Uuid) -> Result<Decimal, RentalError> {
        let (identity, client) = self.client(provider_id).await?;
        client
            .get_balance(identity.market.limits().settlement_currency)
            .await
            .map_err(|e| RentalError::BalanceFetch(e.to_string()))
    }

    pub async fn order_book(&self, provider_id: Uuid, algorithm: &str) -> Result<OrderBook, RentalError> {
        let (_, client) = self.client(provider_id).await?;
        client
            .get_order_book(algorithm)
            .await
            .map_err(|e| RentalError::PricingFetch(e.to_string()))
    }

    pub async fn order(&self, provider_id: Uuid, order_id: &str) -> Result<OrderReceipt, RentalError> {
        let (_, client) = self.client(provider_id).await?;
        client
            .get_order(order_id)
            .await
            .map_err(|e| RentalError::OrderSubmission {
                kind: e.submission_failure(),
                message: e.to_string(),
            })
    }

    pub async fn deposit_addresses(
        &self,
        provider_id: Uuid,
        currency: &str,
    ) -> Result<Vec<String>, RentalError> {
        let (_, client) = self.client(provider_id).await?;
        client
            .get_deposit_addresses(currency)
            .await
            .map_err(|e| RentalError::OrderSubmission {
                kind: e.submission_failure(),
                message: e.to_string(),
            })
    }

    /// Cancel a running order. Failures come back in the outcome; only an
    /// unknown provider is an error.
    pub async fn cancel_rental(
        &self,
        provider_id: Uuid,
        order_id: &str,
    ) -> Result<CancelOutcome, RentalError> {
        let (identity, client) = self.client(provider_id).await?;
        let (success, status_type, message) = match client.cancel_order(order_id).await {
            Ok(ack) => match ack.error {
                None => (true, None, format!("Order {order_id} cancelled")),
                Some(e) => (false, Some(StatusType::Marketplace), e),
            },
            Err(e) => (false, Some(e.submission_failure().into()), e.to_string()),
        };
        if success {
            info!(provider = %identity, order_id, "Order cancelled");
        } else {
            warn!(provider = %identity, order_id, reason = %message, "Order cancellation failed");
        }
        Ok(CancelOutcome {
            provider: identity,
            order_id: order_id.to_string(),
            success,
            status_type,
            message,
        })
    }

    // -- Renting -------------------------------------------------------------

    /// Run one rental across the selected providers.
    ///
    /// Always produces a report: it is recorded as a receipt and published
    /// exactly once on the event bus before being returned.
    pub async fn rent(&self, intent: RentIntent) -> RentalReport {
        let targets: Vec<_> = self
            .inner
            .providers
            .read()
            .await
            .iter()
            .filter(|p| intent.selector.matches(p))
            .map(Provider::rental_target)
            .collect();

        let renter = AutoRenter::new(targets, self.inner.settings.aggregation)
            .with_timeout(self.inner.settings.rent_timeout)
            .with_pool_source(Arc::clone(&self.inner) as Arc<dyn PoolSource>);
        let report = renter.rent(&intent.request, intent.approval.as_deref()).await;

        self.receipt_log().push(Receipt::new(report.clone()));
        self.persist().await;
        self.inner.events.publish(&report);
        report
    }

    pub fn on_rental_finished(&self, handler: impl Fn(&RentalReport) + Send + Sync + 'static) {
        self.inner.events.on_rental_finished(handler);
    }

    pub fn on_rental_success(&self, handler: impl Fn(&RentalReport) + Send + Sync + 'static) {
        self.inner.events.on_rental_success(handler);
    }

    pub fn on_rental_warning(&self, handler: impl Fn(&RentalReport) + Send + Sync + 'static) {
        self.inner.events.on_rental_warning(handler);
    }

    pub fn on_rental_error(&self, handler: impl Fn(&RentalReport) + Send + Sync + 'static) {
        self.inner.events.on_rental_error(handler);
    }

    // -- Strategies ------------------------------------------------------------

    /// Bind `strategy` to this engine's rent entry point and register it,
    /// replacing any strategy of the same kind.
    pub fn setup_strategy(&self, strategy: Arc<dyn RentalStrategy>) {
        strategy.on_rental_trigger(self.rent_trigger());
        let kind = strategy.kind();
        let replaced = self.strategies_mut().insert(kind, strategy).is_some();
        info!(strategy = %kind, replaced, "Rental strategy registered");
    }

    pub fn strategy(&self, kind: StrategyKind) -> Option<Arc<dyn RentalStrategy>> {
        self.inner
            .strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned()
    }

    pub fn strategies(&self) -> Vec<StrategyKind> {
        self.inner
            .strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    /// Rent through the manual strategy, registering one if needed.
    pub async fn manual_rent(&self, intent: RentIntent) -> Result<RentalReport, RentalError> {
        let strategy = match self.strategy(StrategyKind::ManualRent) {
            Some(strategy) => strategy,
            None => {
                self.setup_strategy(Arc::new(ManualRentStrategy::new()));
                self.registered(StrategyKind::ManualRent)?
            }
        };
        strategy
            .handle(StrategySignal::Manual(intent))
            .await?
            .ok_or_else(|| RentalError::Internal("manual strategy declined to rent".to_string()))
    }

    /// Ask the registered spot strategy to evaluate and maybe rent.
    pub async fn spot_check(&self) -> Result<Option<RentalReport>, RentalError> {
        self.registered(StrategyKind::SpotRental)?
            .handle(StrategySignal::SpotCheck)
            .await
    }

    /// Feed a reading to the registered sensor-driven strategy.
    pub async fn sensor_signal(
        &self,
        reading: SensorReading,
    ) -> Result<Option<RentalReport>, RentalError> {
        self.registered(StrategyKind::SensorDriven)?
            .handle(StrategySignal::Sensor(reading))
            .await
    }

    fn registered(&self, kind: StrategyKind) -> Result<Arc<dyn RentalStrategy>, RentalError> {
        self.strategy(kind)
            .ok_or_else(|| RentalError::Config(format!("no {kind} strategy registered")))
    }

    fn strategies_mut(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, BTreeMap<StrategyKind, Arc<dyn RentalStrategy>>> {
        self.inner
            .strategies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// The rent entry point handed to strategies. Holds the engine weakly
    /// so a registered strategy does not keep the engine alive.
    fn rent_trigger(&self) -> RentTrigger {
        let engine = Arc::downgrade(&self.inner);
        Arc::new(move |intent: RentIntent| {
            let engine = engine.clone();
            async move {
                match engine.upgrade() {
                    Some(inner) => HashRenter { inner }.rent(intent).await,
                    None => RentalReport::error(&RentalError::Internal(
                        "engine has shut down".to_string(),
                    )),
                }
            }
            .boxed()
        })
    }

    // -- Receipts ------------------------------------------------------------

    pub fn receipts(&self) -> Vec<Receipt> {
        self.receipt_log().clone()
    }

    /// Seed the receipt log, e.g. from a loaded snapshot.
    pub fn restore_receipts(&self, receipts: Vec<Receipt>) {
        let mut log = self.receipt_log();
        log.extend(receipts);
        log.sort_by_key(|r| r.recorded_at);
    }

    pub async fn clear_receipts(&self) {
        self.receipt_log().clear();
        self.persist().await;
    }

    /// Remove receipts by id. Returns true when none of them remain.
    pub async fn remove_receipts(&self, ids: &[Uuid]) -> bool {
        let all_gone = {
            let mut receipts = self.receipt_log();
            receipts.retain(|r| !ids.contains(&r.id));
            !receipts.iter().any(|r| ids.contains(&r.id))
        };
        if all_gone {
            self.persist().await;
        }
        all_gone
    }

    fn receipt_log(&self) -> MutexGuard<'_, Vec<Receipt>> {
        self.inner
            .receipts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // -- Snapshots -------------------------------------------------------------

    pub async fn snapshot(&self) -> EngineSnapshot {
        let providers = self.providers().await;
        EngineSnapshot {
            taken_at: Utc::now(),
            providers,
            strategies: self.strategies(),
            receipts: self.receipts(),
        }
    }

    /// Push a snapshot to the sink, if any. Failures are logged, never raised.
    async fn persist(&self) {
        let Some(sink) = self.inner.sink.clone() else {
            return;
        };
        let snapshot = self.snapshot().await;
        if let Err(e) = sink.persist(&snapshot) {
            error!(error = %e, "Failed to persist engine snapshot");
        }
    }
}

fn pool_result(provider: ProviderIdentity, outcome: Result<String, String>) -> ProviderPoolResult {
    match outcome {
        Ok(message) => ProviderPoolResult {
            provider,
            success: true,
            message,
        },
        Err(message) => {
            warn!(provider = %provider, reason = %message, "Pool operation failed");
            ProviderPoolResult {
                provider,
                success: false,
                message,
            }
        }
    }
}
