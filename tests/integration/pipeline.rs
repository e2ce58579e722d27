//! End-to-end rental pipeline tests.
//!
//! Providers are set up on a real `HashRenter` backed by `MockMarketplace`
//! adapters; every rent goes through preprocess, execute, aggregation,
//! receipts and the event bus.

use rust_decimal_macros::dec;
use std::sync::{Arc, Mutex};

use hashrent::engine::{
    AggregationPolicy, EngineSettings, HashRenter, ProviderSelector, RentIntent,
};
use hashrent::marketplaces::{MarketKind, MarketplaceError, RentalMarketplace};
use hashrent::provider::{Credentials, ProviderSettings};
use hashrent::storage::{JsonFileStore, SnapshotSink};
use hashrent::types::{PoolProfile, PoolSpec, PoolUpdate, RentalRequest, Severity, StatusType};

use crate::mock_marketplace::MockMarketplace;

fn settings(kind: MarketKind, name: &str) -> ProviderSettings {
    ProviderSettings::new(
        kind,
        Credentials::new("key".into(), Some("secret".into()), Some("acct".into())),
    )
    .with_name(name)
}

fn spec() -> PoolSpec {
    PoolSpec {
        algorithm: "scrypt".into(),
        host: "stratum.example.com".into(),
        port: 3333,
        user: "worker.1".into(),
        pass: "x".into(),
        name: "main".into(),
        notes: String::new(),
    }
}

fn request() -> RentalRequest {
    RentalRequest::new(dec!(0.01), dec!(0.02), dec!(0.5), "scrypt")
}

/// An engine with one provider per mock, all sharing one active pool.
async fn engine_with(
    policy: AggregationPolicy,
    mocks: &[(&str, Arc<MockMarketplace>)],
    with_pool: bool,
) -> HashRenter {
    let engine = HashRenter::new(EngineSettings {
        aggregation: policy,
        rent_timeout: None,
    });
    for (name, mock) in mocks {
        let client: Arc<dyn RentalMarketplace> = mock.clone();
        engine
            .setup_provider(settings(mock.kind(), name), client)
            .await
            .unwrap();
    }
    if with_pool {
        let change = engine.create_pool(&spec()).await.unwrap();
        assert!(change.success);
    }
    engine
}

/// Counts how often each severity event fired.
#[derive(Default)]
struct EventLog {
    finished: Mutex<usize>,
    severities: Mutex<Vec<Severity>>,
}

fn record_events(engine: &HashRenter) -> Arc<EventLog> {
    let log = Arc::new(EventLog::default());
    let l = log.clone();
    engine.on_rental_finished(move |_| *l.finished.lock().unwrap() += 1);
    let l = log.clone();
    engine.on_rental_success(move |r| l.severities.lock().unwrap().push(r.status));
    let l = log.clone();
    engine.on_rental_warning(move |r| l.severities.lock().unwrap().push(r.status));
    let l = log.clone();
    engine.on_rental_error(move |r| l.severities.lock().unwrap().push(r.status));
    log
}

#[tokio::test]
async fn test_successful_rental_reports_remote_order() {
    let mock = Arc::new(MockMarketplace::nicehash());
    mock.set_fill("abc123", "ACTIVE", dec!(0.01));
    let engine = engine_with(AggregationPolicy::AllProviders, &[("nh", mock.clone())], true).await;
    let events = record_events(&engine);

    let report = engine.rent(RentIntent::new(request())).await;

    assert_eq!(report.status, Severity::Normal);
    assert!(report.succeeded());
    assert_eq!(report.rental_ids(), vec!["abc123"]);
    assert_eq!(report.total_cost(), dec!(0.01));
    assert_eq!(report.outcomes[0].amount, dec!(0.01));
    assert_eq!(report.outcomes[0].duration_hours, Some(dec!(24)));

    let order = &mock.submitted()[0];
    assert_eq!(order.pool_host, "stratum.example.com");
    assert_eq!(order.algorithm, "scrypt");
    assert_eq!(order.pool_remote_id.as_deref(), Some("remote-1"));

    assert_eq!(*events.finished.lock().unwrap(), 1);
    assert_eq!(*events.severities.lock().unwrap(), vec![Severity::Normal]);
    assert_eq!(engine.receipts().len(), 1);
}

#[tokio::test]
async fn test_zero_limit_rents_at_marketplace_default() {
    let mock = Arc::new(MockMarketplace::nicehash());
    let engine = engine_with(AggregationPolicy::AllProviders, &[("nh", mock.clone())], true).await;

    let request = RentalRequest::new(dec!(0.01), dec!(0), dec!(0.5), "scrypt");
    let report = engine.rent(RentIntent::new(request)).await;

    assert_eq!(report.status, Severity::Normal);
    assert!(report.succeeded());
    assert_eq!(report.outcomes[0].duration_hours, Some(dec!(48)));
    assert_eq!(mock.submitted()[0].limit, dec!(0.01));
}

#[tokio::test]
async fn test_no_pool_is_error_without_order() {
    let mock = Arc::new(MockMarketplace::nicehash());
    let engine = engine_with(AggregationPolicy::AllProviders, &[("nh", mock.clone())], false).await;
    let events = record_events(&engine);

    let report = engine.rent(RentIntent::new(request())).await;

    assert_eq!(report.status, Severity::Error);
    assert_eq!(report.status_type, Some(StatusType::NoPool));
    assert_eq!(report.message, "No pool found");
    assert_eq!(mock.order_count(), 0);
    assert_eq!(*events.severities.lock().unwrap(), vec![Severity::Error]);
}

#[tokio::test]
async fn test_amount_below_minimum_is_low_balance() {
    let mock = Arc::new(MockMarketplace::nicehash());
    let engine = engine_with(AggregationPolicy::AllProviders, &[("nh", mock.clone())], true).await;

    let report = engine
        .rent(RentIntent::new(RentalRequest::new(dec!(0.003), dec!(0.02), dec!(0.5), "scrypt")))
        .await;

    assert_eq!(report.status, Severity::Error);
    assert_eq!(report.status_type, Some(StatusType::LowBalance));
    assert!(!report.succeeded());
    assert_eq!(mock.order_count(), 0);
}

#[tokio::test]
async fn test_non_running_remote_status_is_failure() {
    let mock = Arc::new(MockMarketplace::nicehash());
    mock.set_fill("abc123", "CANCELLED", dec!(0));
    let engine = engine_with(AggregationPolicy::AllProviders, &[("nh", mock.clone())], true).await;

    let report = engine.rent(RentIntent::new(request())).await;

    assert_eq!(report.status, Severity::Error);
    assert_eq!(report.status_type, Some(StatusType::RemoteRejected));
    assert_eq!(mock.order_count(), 1);
}

#[tokio::test]
async fn test_submission_errors_keep_network_and_marketplace_apart() {
    let network = Arc::new(MockMarketplace::nicehash());
    network.set_order_error(MarketplaceError::Network("connection refused".into()));
    let engine = engine_with(AggregationPolicy::AllProviders, &[("nh", network)], true).await;
    let report = engine.rent(RentIntent::new(request())).await;
    assert_eq!(report.status_type, Some(StatusType::Network));

    let refused = Arc::new(MockMarketplace::nicehash());
    refused.set_order_error(MarketplaceError::Marketplace("insufficient funds".into()));
    let engine = engine_with(AggregationPolicy::AllProviders, &[("nh", refused)], true).await;
    let report = engine.rent(RentIntent::new(request())).await;
    assert_eq!(report.status_type, Some(StatusType::Marketplace));
}

#[tokio::test]
async fn test_missing_market_price_still_rents_with_warning() {
    let mock = Arc::new(MockMarketplace::nicehash());
    mock.set_price_down();
    let engine = engine_with(AggregationPolicy::AllProviders, &[("nh", mock.clone())], true).await;
    let events = record_events(&engine);

    let report = engine.rent(RentIntent::new(request())).await;

    assert!(report.succeeded());
    assert_eq!(report.status, Severity::Warning);
    assert_eq!(report.status_type, Some(StatusType::Cutoff));
    assert_eq!(*events.severities.lock().unwrap(), vec![Severity::Warning]);
}

#[tokio::test]
async fn test_all_providers_partial_success_is_warning() {
    let good = Arc::new(MockMarketplace::nicehash());
    let bad = Arc::new(MockMarketplace::nicehash());
    bad.set_order_error(MarketplaceError::Marketplace("rejected".into()));
    let engine = engine_with(
        AggregationPolicy::AllProviders,
        &[("good", good.clone()), ("bad", bad.clone())],
        true,
    )
    .await;
    let events = record_events(&engine);

    let report = engine.rent(RentIntent::new(request())).await;

    assert_eq!(report.status, Severity::Warning);
    assert_eq!(report.message, "Rented on 1 of 2 provider(s)");
    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(good.order_count(), 1);
    assert_eq!(*events.finished.lock().unwrap(), 1);
    assert_eq!(events.severities.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_first_success_stops_after_winner() {
    let first = Arc::new(MockMarketplace::nicehash());
    let second = Arc::new(MockMarketplace::nicehash());
    let engine = engine_with(
        AggregationPolicy::FirstSuccess,
        &[("first", first.clone()), ("second", second.clone())],
        true,
    )
    .await;

    let report = engine.rent(RentIntent::new(request())).await;

    assert_eq!(report.status, Severity::Normal);
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(first.order_count(), 1);
    assert_eq!(second.order_count(), 0);
}

#[tokio::test]
async fn test_first_success_falls_through_failures() {
    let first = Arc::new(MockMarketplace::nicehash());
    first.set_order_error(MarketplaceError::Network("down".into()));
    let second = Arc::new(MockMarketplace::nicehash());
    let engine = engine_with(
        AggregationPolicy::FirstSuccess,
        &[("first", first), ("second", second.clone())],
        true,
    )
    .await;

    let report = engine.rent(RentIntent::new(request())).await;

    assert!(report.succeeded());
    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(second.order_count(), 1);
}

#[tokio::test]
async fn test_selector_targets_one_market() {
    let nh = Arc::new(MockMarketplace::nicehash());
    let mrr = Arc::new(MockMarketplace::new(MarketKind::MiningRigRentals, dec!(1)));
    let engine = engine_with(
        AggregationPolicy::AllProviders,
        &[("nh", nh.clone()), ("mrr", mrr.clone())],
        true,
    )
    .await;

    let report = engine
        .rent(
            RentIntent::new(request())
                .with_selector(ProviderSelector::Market(MarketKind::MiningRigRentals)),
        )
        .await;

    assert!(report.succeeded());
    assert_eq!(nh.order_count(), 0);
    assert_eq!(mrr.order_count(), 1);
}

#[tokio::test]
async fn test_update_only_host_keeps_other_fields() {
    let mock = Arc::new(MockMarketplace::nicehash());
    let engine = engine_with(AggregationPolicy::AllProviders, &[("nh", mock.clone())], false).await;
    let created = engine.create_pool(&spec()).await.unwrap();

    let update = PoolUpdate {
        host: Some("backup.example.com".into()),
        ..Default::default()
    };
    let change = engine
        .update_pool(&created.id, &update, &ProviderSelector::All)
        .await
        .unwrap();
    assert!(change.success);

    let pool = engine.pool(&created.id).await.unwrap();
    assert_eq!(pool.host, "backup.example.com");
    assert_eq!(pool.user, "worker.1");
    assert_eq!(pool.pass, "x");
    assert_eq!(pool.name, "main");
    assert_eq!(pool.remote_id.as_deref(), Some("remote-1"));

    // The marketplace saw the merged record, addressed by its remote id.
    let pushed = mock.pool_pushes().pop().unwrap();
    assert_eq!(pushed.host, "backup.example.com");
    assert_eq!(pushed.remote_id.as_deref(), Some("remote-1"));
}

#[tokio::test]
async fn test_delete_unknown_pool_is_noop() {
    let mock = Arc::new(MockMarketplace::nicehash());
    let engine = engine_with(AggregationPolicy::AllProviders, &[("nh", mock)], true).await;
    let before = engine.pools().await;

    let change = engine.delete_pool("does-not-exist").await;

    assert!(change.success);
    assert!(change.results.is_empty());
    assert_eq!(engine.pools().await, before);
}

#[tokio::test]
async fn test_delete_by_remote_id() {
    let mock = Arc::new(MockMarketplace::nicehash());
    let engine = engine_with(AggregationPolicy::AllProviders, &[("nh", mock)], true).await;

    let change = engine.delete_pool("remote-1").await;

    assert!(change.success);
    assert_eq!(change.results.len(), 1);
    assert!(engine.pools().await.is_empty());
    let report = engine.rent(RentIntent::new(request())).await;
    assert_eq!(report.status_type, Some(StatusType::NoPool));
}

#[tokio::test]
async fn test_setup_mirrors_remote_pools_and_profiles() {
    let remote = spec().to_pool("existing");
    let mrr = Arc::new(
        MockMarketplace::new(MarketKind::MiningRigRentals, dec!(1))
            .with_pools(vec![remote])
            .with_profiles(vec![hashrent::types::PoolProfile {
                id: "prof-1".into(),
                name: "scrypt rigs".into(),
                algorithm: Some("scrypt".into()),
            }]),
    );
    let engine = HashRenter::new(EngineSettings::default());

    let setup = engine
        .setup_provider(settings(MarketKind::MiningRigRentals, "mrr"), mrr)
        .await
        .unwrap();

    assert_eq!(setup.pools.len(), 1);
    assert_eq!(setup.provider.active_profile.as_deref(), Some("prof-1"));
    assert_eq!(engine.pool_profiles().await.len(), 1);
}

#[tokio::test]
async fn test_cancel_rental_network_failure() {
    let mock = Arc::new(MockMarketplace::nicehash());
    let engine = engine_with(AggregationPolicy::AllProviders, &[("nh", mock)], false).await;
    let id = engine.providers().await[0].id;

    let ok = engine.cancel_rental(id, "abc123").await.unwrap();
    assert!(ok.success);

    let failed = engine.cancel_rental(id, "gone").await.unwrap();
    assert!(!failed.success);
    assert_eq!(failed.status_type, Some(StatusType::Network));
}

#[tokio::test]
async fn test_snapshot_round_trip_restores_receipts() {
    let mut path = std::env::temp_dir();
    path.push(format!("hashrent_it_{}.json", uuid::Uuid::new_v4()));
    let store = JsonFileStore::new(&path);

    let mock = Arc::new(MockMarketplace::nicehash());
    mock.set_fill("abc123", "ACTIVE", dec!(0.01));
    let engine = HashRenter::with_snapshot_sink(
        EngineSettings::default(),
        Arc::new(store.clone()) as Arc<dyn SnapshotSink>,
    );
    engine
        .setup_provider(settings(MarketKind::NiceHash, "nh"), mock)
        .await
        .unwrap();
    engine.create_pool(&spec()).await.unwrap();
    engine.rent(RentIntent::new(request())).await;

    let saved = store.load().unwrap().unwrap();
    assert_eq!(saved.providers.len(), 1);
    assert_eq!(saved.pool_count(), 1);
    assert_eq!(saved.receipts.len(), 1);
    assert_eq!(saved.receipts[0].report.rental_ids(), vec!["abc123"]);

    let restarted = HashRenter::new(EngineSettings::default());
    restarted.restore_receipts(saved.receipts.clone());
    assert_eq!(restarted.receipts(), saved.receipts);

    store.delete().unwrap();
}

#[tokio::test]
async fn test_snapshot_round_trip_restores_active_pointers() {
    let mut path = std::env::temp_dir();
    path.push(format!("hashrent_it_{}.json", uuid::Uuid::new_v4()));
    let store = JsonFileStore::new(&path);
    let profiles = vec![
        PoolProfile {
            id: "prof-1".into(),
            name: "first".into(),
            algorithm: None,
        },
        PoolProfile {
            id: "prof-2".into(),
            name: "second".into(),
            algorithm: Some("scrypt".into()),
        },
    ];

    let mrr = Arc::new(
        MockMarketplace::new(MarketKind::MiningRigRentals, dec!(1)).with_profiles(profiles.clone()),
    );
    let engine = HashRenter::with_snapshot_sink(
        EngineSettings::default(),
        Arc::new(store.clone()) as Arc<dyn SnapshotSink>,
    );
    let mut first_run = settings(MarketKind::MiningRigRentals, "mrr");
    first_run.active_profile = Some("prof-2".into());
    engine.setup_provider(first_run, mrr).await.unwrap();
    engine.create_pool(&spec()).await.unwrap();

    let saved = store.load().unwrap().unwrap();
    let before = saved.providers[0].clone();
    assert!(before.active_pool.is_some());
    assert_eq!(before.active_profile.as_deref(), Some("prof-2"));

    // The marketplace session after a restart no longer reports the pool.
    let fresh = Arc::new(
        MockMarketplace::new(MarketKind::MiningRigRentals, dec!(1)).with_profiles(profiles),
    );
    let restarted = HashRenter::new(EngineSettings::default());
    restarted
        .setup_provider(settings(MarketKind::MiningRigRentals, "mrr"), fresh.clone())
        .await
        .unwrap();
    let cold = restarted.providers().await.remove(0);
    assert!(cold.active_pool.is_none());
    assert_eq!(cold.active_profile.as_deref(), Some("prof-1"));

    assert_eq!(restarted.restore_providers(&saved.providers).await, 1);
    let warm = restarted.providers().await.remove(0);
    assert_eq!(warm.active_pool, before.active_pool);
    assert_eq!(warm.active_profile.as_deref(), Some("prof-2"));

    let report = restarted.rent(RentIntent::new(request())).await;
    assert!(report.succeeded());
    assert_eq!(fresh.submitted()[0].pool_host, "stratum.example.com");

    store.delete().unwrap();
}

#[tokio::test]
async fn test_restore_skips_unconfigured_providers() {
    let mock = Arc::new(MockMarketplace::nicehash());
    let engine = engine_with(AggregationPolicy::AllProviders, &[("nh", mock)], true).await;
    let mut saved = engine.snapshot().await.providers;
    saved[0].name = "retired".into();

    let other = Arc::new(MockMarketplace::nicehash());
    let restarted = engine_with(AggregationPolicy::AllProviders, &[("nh", other)], false).await;
    assert_eq!(restarted.restore_providers(&saved).await, 0);
    assert!(restarted.pools().await.is_empty());
}

#[test]
fn test_rent_without_providers_blocking() {
    let engine = HashRenter::new(EngineSettings::default());
    let report = tokio_test::block_on(engine.rent(RentIntent::new(request())));
    assert_eq!(report.status, Severity::Error);
    assert_eq!(report.status_type, Some(StatusType::NoProvider));
    assert_eq!(engine.receipts().len(), 1);
}
