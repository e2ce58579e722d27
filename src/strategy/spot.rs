//! Spot rental strategy.
//!
//! Asks a `ProfitabilityEvaluator` whether renting pays right now and, if
//! it does, rents with the parameters the evaluator chose. How
//! profitability is computed is the evaluator's business. An ERROR
//! report whose providers all failed before submitting an order may be
//! retried a configured number of times; the core pipeline itself never
//! retries.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{unsupported, RentTrigger, RentalStrategy, StrategyKind, StrategySignal, TriggerSlot};
use crate::engine::{ProviderSelector, RentIntent};
use crate::types::{RentalError, RentalReport, RentalRequest, Severity, StatusType};

/// Go / no-go answer from a profitability evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum SpotDecision {
    Hold { reason: String },
    Rent { request: RentalRequest, selector: ProviderSelector },
}

#[async_trait]
pub trait ProfitabilityEvaluator: Send + Sync {
    async fn evaluate(&self) -> anyhow::Result<SpotDecision>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Extra attempts after an ERROR report.
    #[serde(default)]
    pub retry_attempts: u32,
}

fn default_interval_secs() -> u64 {
    300
}

impl Default for SpotConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            retry_attempts: 0,
        }
    }
}

pub struct SpotRentalStrategy {
    config: SpotConfig,
    evaluator: Box<dyn ProfitabilityEvaluator>,
    trigger: TriggerSlot,
}

impl SpotRentalStrategy {
    pub fn new(config: SpotConfig, evaluator: Box<dyn ProfitabilityEvaluator>) -> Self {
        Self {
            config,
            evaluator,
            trigger: TriggerSlot::default(),
        }
    }

    pub fn config(&self) -> &SpotConfig {
        &self.config
    }

    /// Evaluate once and rent if profitable.
    pub async fn spot_check(&self) -> Result<Option<RentalReport>, RentalError> {
        let decision = self
            .evaluator
            .evaluate()
            .await
            .map_err(|e| RentalError::Internal(format!("profitability evaluation failed: {e:#}")))?;

        let (request, selector) = match decision {
            SpotDecision::Hold { reason } => {
                info!(reason = %reason, "Spot check: holding");
                return Ok(None);
            }
            SpotDecision::Rent { request, selector } => (request, selector),
        };

        info!(request = %request, "Spot check: renting");
        let mut attempt = 0;
        loop {
            let intent = RentIntent::new(request.clone()).with_selector(selector.clone());
            let report = self.trigger.fire(intent).await?;
            if !retryable(&report) || attempt >= self.config.retry_attempts {
                return Ok(Some(report));
            }
            attempt += 1;
            warn!(
                attempt,
                max_retries = self.config.retry_attempts,
                message = %report.message,
                "Spot rental failed, retrying"
            );
        }
    }

    /// Run spot checks on an interval until `shutdown` resolves.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.interval_secs.max(1)));
        tokio::pin!(shutdown);

        info!(interval_secs = self.config.interval_secs, "Spot strategy loop started");
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.spot_check().await {
                        Ok(Some(report)) => info!(status = %report.status, message = %report.message, "Spot cycle finished"),
                        Ok(None) => debug!("Spot cycle: no rental"),
                        Err(e) => error!(error = %e, "Spot cycle failed, continuing to next"),
                    }
                }
                _ = &mut shutdown => {
                    info!("Spot strategy loop stopped");
                    break;
                }
            }
        }
    }
}

/// An ERROR report is retried only when every provider failed before its
/// order could have reached the marketplace. A timeout or panic may have
/// left an order in flight, so those are final.
fn retryable(report: &RentalReport) -> bool {
    let safe = |kind: Option<StatusType>| {
        matches!(
            kind,
            Some(
                StatusType::BalanceFetch
                    | StatusType::PricingFetch
                    | StatusType::Network
                    | StatusType::Marketplace
            )
        )
    };
    report.status == Severity::Error
        && if report.outcomes.is_empty() {
            safe(report.status_type)
        } else {
            report.outcomes.iter().all(|o| !o.success && safe(o.status_type))
        }
}

#[async_trait]
impl RentalStrategy for SpotRentalStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::SpotRental
    }

    fn on_rental_trigger(&self, trigger: RentTrigger) {
        self.trigger.bind(trigger);
    }

    async fn handle(&self, signal: StrategySignal) -> Result<Option<RentalReport>, RentalError> {
        match signal {
            StrategySignal::SpotCheck => self.spot_check().await,
            other => Err(unsupported(self.kind(), &other)),
        }
    }
}
