//! Strategies driving rentals through the engine's bound trigger.

use anyhow::anyhow;
use async_trait::async_trait;
use rust_decimal_macros::dec;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hashrent::engine::{EngineSettings, HashRenter, ProviderSelector, RentApproval, RentIntent};
use hashrent::engine::AggregationPolicy;
use hashrent::marketplaces::{MarketKind, MarketplaceError};
use hashrent::provider::{Credentials, ProviderSettings};
use hashrent::strategy::sensor::{SensorConfig, SensorDrivenStrategy, SensorReading};
use hashrent::strategy::spot::{
    ProfitabilityEvaluator, SpotConfig, SpotDecision, SpotRentalStrategy,
};
use hashrent::strategy::{RentalStrategy, StrategyKind};
use hashrent::types::{PoolSpec, PreprocessReport, RentalRequest, Severity, StatusType};

use crate::mock_marketplace::MockMarketplace;

fn request() -> RentalRequest {
    RentalRequest::new(dec!(0.01), dec!(0.02), dec!(0.5), "scrypt")
}

async fn engine(mock: Arc<MockMarketplace>, with_pool: bool) -> HashRenter {
    engine_with(EngineSettings::default(), mock, with_pool).await
}

async fn engine_with(
    settings: EngineSettings,
    mock: Arc<MockMarketplace>,
    with_pool: bool,
) -> HashRenter {
    let engine = HashRenter::new(settings);
    engine
        .setup_provider(
            ProviderSettings::new(
                MarketKind::NiceHash,
                Credentials::new("key".into(), Some("secret".into()), None),
            ),
            mock,
        )
        .await
        .unwrap();
    if with_pool {
        engine
            .create_pool(&PoolSpec {
                algorithm: "scrypt".into(),
                host: "stratum.example.com".into(),
                port: 3333,
                user: "worker.1".into(),
                pass: "x".into(),
                name: "main".into(),
                notes: String::new(),
            })
            .await
            .unwrap();
    }
    engine
}

struct Always(SpotDecision);

#[async_trait]
impl ProfitabilityEvaluator for Always {
    async fn evaluate(&self) -> anyhow::Result<SpotDecision> {
        Ok(self.0.clone())
    }
}

struct Broken;

#[async_trait]
impl ProfitabilityEvaluator for Broken {
    async fn evaluate(&self) -> anyhow::Result<SpotDecision> {
        Err(anyhow!("price feed unavailable"))
    }
}

struct Decline;

#[async_trait]
impl RentApproval for Decline {
    async fn approve(&self, _report: &PreprocessReport) -> bool {
        false
    }
}

fn rent_decision() -> SpotDecision {
    SpotDecision::Rent {
        request: request(),
        selector: ProviderSelector::All,
    }
}

#[tokio::test]
async fn test_manual_rent_through_engine() {
    let mock = Arc::new(MockMarketplace::nicehash());
    mock.set_fill("abc123", "ACTIVE", dec!(0.01));
    let engine = engine(mock.clone(), true).await;
    let fired = Arc::new(AtomicUsize::new(0));
    let f = fired.clone();
    engine.on_rental_success(move |_| {
        f.fetch_add(1, Ordering::SeqCst);
    });

    let report = engine.manual_rent(RentIntent::new(request())).await.unwrap();

    assert_eq!(report.rental_ids(), vec!["abc123"]);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(engine.receipts().len(), 1);
    assert_eq!(engine.strategies(), vec![StrategyKind::ManualRent]);
}

#[tokio::test]
async fn test_declined_approval_places_no_order() {
    let mock = Arc::new(MockMarketplace::nicehash());
    let engine = engine(mock.clone(), true).await;

    let report = engine
        .rent(RentIntent::new(request()).with_approval(Arc::new(Decline)))
        .await;

    assert_eq!(report.status, Severity::Warning);
    assert_eq!(report.status_type, Some(StatusType::Cancelled));
    assert_eq!(mock.order_count(), 0);
}

#[tokio::test]
async fn test_spot_check_rents_when_profitable() {
    let mock = Arc::new(MockMarketplace::nicehash());
    let engine = engine(mock.clone(), true).await;
    engine.setup_strategy(Arc::new(SpotRentalStrategy::new(
        SpotConfig::default(),
        Box::new(Always(rent_decision())),
    )));

    let report = engine.spot_check().await.unwrap().unwrap();

    assert!(report.succeeded());
    assert_eq!(mock.order_count(), 1);
}

#[tokio::test]
async fn test_spot_check_hold_rents_nothing() {
    let mock = Arc::new(MockMarketplace::nicehash());
    let engine = engine(mock.clone(), true).await;
    engine.setup_strategy(Arc::new(SpotRentalStrategy::new(
        SpotConfig::default(),
        Box::new(Always(SpotDecision::Hold {
            reason: "too expensive".into(),
        })),
    )));

    assert!(engine.spot_check().await.unwrap().is_none());
    assert!(engine.receipts().is_empty());
}

#[tokio::test]
async fn test_spot_retries_failed_rentals() {
    let mock = Arc::new(MockMarketplace::nicehash());
    mock.set_order_error(MarketplaceError::Network("connection reset".into()));
    let engine = engine(mock.clone(), true).await;
    engine.setup_strategy(Arc::new(SpotRentalStrategy::new(
        SpotConfig {
            interval_secs: 60,
            retry_attempts: 2,
        },
        Box::new(Always(rent_decision())),
    )));

    let report = engine.spot_check().await.unwrap().unwrap();

    assert_eq!(report.status, Severity::Error);
    assert_eq!(engine.receipts().len(), 3);
    assert_eq!(mock.order_count(), 0);
}

#[tokio::test]
async fn test_spot_does_not_retry_missing_pool() {
    let mock = Arc::new(MockMarketplace::nicehash());
    let engine = engine(mock.clone(), false).await;
    engine.setup_strategy(Arc::new(SpotRentalStrategy::new(
        SpotConfig {
            interval_secs: 60,
            retry_attempts: 2,
        },
        Box::new(Always(rent_decision())),
    )));

    let report = engine.spot_check().await.unwrap().unwrap();

    assert_eq!(report.status_type, Some(StatusType::NoPool));
    assert_eq!(engine.receipts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_spot_timeout_submits_once() {
    let mock = Arc::new(MockMarketplace::nicehash());
    mock.set_order_delay(Duration::from_secs(120));
    let settings = EngineSettings {
        aggregation: AggregationPolicy::default(),
        rent_timeout: Some(Duration::from_secs(60)),
    };
    let engine = engine_with(settings, mock.clone(), true).await;
    engine.setup_strategy(Arc::new(SpotRentalStrategy::new(
        SpotConfig {
            interval_secs: 60,
            retry_attempts: 2,
        },
        Box::new(Always(rent_decision())),
    )));

    let report = engine.spot_check().await.unwrap().unwrap();

    assert_eq!(report.status, Severity::Error);
    assert_eq!(report.status_type, Some(StatusType::Timeout));
    assert_eq!(mock.order_count(), 1);
    assert_eq!(engine.receipts().len(), 1);
}

#[tokio::test]
async fn test_spot_evaluator_failure_is_internal_error() {
    let engine = engine(Arc::new(MockMarketplace::nicehash()), true).await;
    engine.setup_strategy(Arc::new(SpotRentalStrategy::new(
        SpotConfig::default(),
        Box::new(Broken),
    )));

    let err = engine.spot_check().await.unwrap_err();
    assert!(err.to_string().contains("price feed unavailable"));
}

#[tokio::test]
async fn test_sensor_threshold_through_engine() {
    let mock = Arc::new(MockMarketplace::nicehash());
    let engine = engine(mock.clone(), true).await;
    engine.setup_strategy(Arc::new(SensorDrivenStrategy::new(
        SensorConfig {
            threshold: dec!(100),
        },
        request(),
    )));

    let quiet = engine
        .sensor_signal(SensorReading::new("pool-hashrate", dec!(40)))
        .await
        .unwrap();
    assert!(quiet.is_none());

    let report = engine
        .sensor_signal(SensorReading::new("pool-hashrate", dec!(150)))
        .await
        .unwrap()
        .unwrap();
    assert!(report.succeeded());
    assert_eq!(mock.order_count(), 1);
}

#[tokio::test]
async fn test_strategy_outliving_engine_reports_error() {
    let strategy = Arc::new(SpotRentalStrategy::new(
        SpotConfig::default(),
        Box::new(Always(rent_decision())),
    ));
    {
        let engine = engine(Arc::new(MockMarketplace::nicehash()), true).await;
        engine.setup_strategy(strategy.clone());
    }

    let report = strategy.spot_check().await.unwrap().unwrap();
    assert_eq!(report.status, Severity::Error);
    assert_eq!(report.status_type, Some(StatusType::Internal));
    assert_eq!(strategy.kind(), StrategyKind::SpotRental);
}
