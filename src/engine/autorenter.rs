//! AutoRenter: drives the preprocess → execute pipeline per provider.
//!
//! Fans one rent intent out across the targeted providers and folds the
//! per-provider outcomes into a single `RentalReport`. Whatever happens
//! inside a provider's run (stage failure, timeout, panic) comes back as
//! an ERROR outcome, so the report is always a well-formed value.

use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::execute::execute;
use super::preprocess::{preprocess, Feasible};
use crate::pools::PoolRegistry;
use crate::provider::RentalTarget;
use crate::types::{
    PreprocessReport, RentalError, RentalOutcome, RentalReport, RentalRequest, Severity,
    StatusType,
};

/// How per-provider outcomes combine when several providers are targeted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationPolicy {
    /// Run every targeted provider concurrently and report all of them.
    #[default]
    AllProviders,
    /// Try providers in order and stop at the first successful rental.
    FirstSuccess,
}

/// Hook that sees each feasible preprocess report and decides whether to
/// go ahead with the order.
#[async_trait]
pub trait RentApproval: Send + Sync {
    async fn approve(&self, report: &PreprocessReport) -> bool;
}

/// Where a run re-reads a provider's pools once it holds the rent lock.
#[async_trait]
pub trait PoolSource: Send + Sync {
    /// `None` when the provider is no longer registered.
    async fn current_pools(&self, provider: Uuid) -> Option<PoolRegistry>;
}

pub struct AutoRenter {
    targets: Vec<RentalTarget>,
    policy: AggregationPolicy,
    timeout: Option<Duration>,
    pool_source: Option<Arc<dyn PoolSource>>,
}

impl AutoRenter {
    pub fn new(targets: Vec<RentalTarget>, policy: AggregationPolicy) -> Self {
        Self {
            targets,
            policy,
            timeout: None,
            pool_source: None,
        }
    }

    pub fn with_pool_source(mut self, source: Arc<dyn PoolSource>) -> Self {
        self.pool_source = Some(source);
        self
    }

    /// Bound each provider's run; a run that overruns becomes a TIMEOUT outcome.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Rent on the targeted providers.
    pub async fn rent(
        &self,
        request: &RentalRequest,
        approval: Option<&dyn RentApproval>,
    ) -> RentalReport {
        if self.targets.is_empty() {
            return RentalReport::error(&RentalError::NoProvider);
        }
        info!(
            providers = self.targets.len(),
            policy = ?self.policy,
            request = %request,
            "Starting rental"
        );

        let outcomes = match self.policy {
            AggregationPolicy::AllProviders => {
                join_all(self.targets.iter().map(|t| self.rent_on(t, request, approval))).await
            }
            AggregationPolicy::FirstSuccess => {
                let mut outcomes = Vec::with_capacity(self.targets.len());
                for target in &self.targets {
                    let outcome = self.rent_on(target, request, approval).await;
                    let rented = outcome.success;
                    outcomes.push(outcome);
                    if rented {
                        break;
                    }
                }
                outcomes
            }
        };

        summarize(self.policy, outcomes)
    }

    async fn rent_on(
        &self,
        target: &RentalTarget,
        request: &RentalRequest,
        approval: Option<&dyn RentApproval>,
    ) -> RentalOutcome {
        let run = AssertUnwindSafe(self.locked_run(target, request, approval)).catch_unwind();
        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => {
                    error!(provider = %target.identity, timeout_secs = limit.as_secs(), "Rental timed out");
                    return RentalOutcome::failed(
                        target.identity.clone(),
                        request,
                        &RentalError::Timeout(limit.as_secs()),
                    );
                }
            },
            None => run.await,
        };

        result.unwrap_or_else(|panic| {
            let message = panic_message(panic.as_ref());
            error!(provider = %target.identity, panic = %message, "Rental pipeline panicked");
            RentalOutcome::failed(target.identity.clone(), request, &RentalError::Internal(message))
        })
    }

    /// One pipeline at a time per provider, run against the pools as they
    /// stand once the lock is held.
    async fn locked_run(
        &self,
        target: &RentalTarget,
        request: &RentalRequest,
        approval: Option<&dyn RentApproval>,
    ) -> RentalOutcome {
        let _guard = target.rent_lock.lock().await;
        let source = match &self.pool_source {
            Some(source) => source,
            None => return run_pipeline(target, request, approval).await,
        };
        match source.current_pools(target.identity.id).await {
            Some(pools) => {
                let current = RentalTarget {
                    pools,
                    ..target.clone()
                };
                run_pipeline(&current, request, approval).await
            }
            None => {
                warn!(provider = %target.identity, "Provider removed before its rental started");
                RentalOutcome::failed(target.identity.clone(), request, &RentalError::NoProvider)
            }
        }
    }
}

async fn run_pipeline(
    target: &RentalTarget,
    request: &RentalRequest,
    approval: Option<&dyn RentApproval>,
) -> RentalOutcome {
    let feasible = match Feasible::check(preprocess(target, request).await) {
        Ok(feasible) => feasible,
        Err(report) => {
            debug!(provider = %target.identity, "Skipping execute after preprocess error");
            return RentalOutcome::from_report(&report, report.status_type, &report.message);
        }
    };

    if let Some(approval) = approval {
        if !approval.approve(feasible.report()).await {
            info!(provider = %target.identity, "Rental declined");
            return RentalOutcome::from_report(
                feasible.report(),
                Some(StatusType::Cancelled),
                "Rental cancelled",
            );
        }
    }

    execute(target, request, &feasible).await
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "provider pipeline panicked".to_string()
    }
}

/// Fold per-provider outcomes into one report.
///
/// - nothing rented: ERROR, or WARNING/CANCELLED when every provider was declined
/// - `AllProviders`: NORMAL only if every provider rented with NORMAL status
/// - `FirstSuccess`: the winning provider's status
pub fn summarize(policy: AggregationPolicy, outcomes: Vec<RentalOutcome>) -> RentalReport {
    let total = outcomes.len();
    let rented = outcomes.iter().filter(|o| o.success).count();

    if total == 0 {
        return RentalReport::error(&RentalError::NoProvider);
    }

    if rented == 0 {
        if outcomes.iter().all(|o| o.status_type == Some(StatusType::Cancelled)) {
            return RentalReport::new(
                Severity::Warning,
                Some(StatusType::Cancelled),
                "Rental cancelled".to_string(),
                outcomes,
            );
        }
        let (status_type, message) = if total == 1 {
            (outcomes[0].status_type, outcomes[0].message.clone())
        } else {
            let first_error = outcomes
                .iter()
                .find(|o| o.status == Severity::Error)
                .and_then(|o| o.status_type);
            (first_error, format!("No rentals placed on {total} provider(s)"))
        };
        return RentalReport::new(Severity::Error, status_type, message, outcomes);
    }

    let message = format!("Rented on {rented} of {total} provider(s)");
    let (status, status_type) = match policy {
        AggregationPolicy::AllProviders => {
            let all_normal = outcomes
                .iter()
                .all(|o| o.success && o.status == Severity::Normal);
            if all_normal {
                (Severity::Normal, None)
            } else {
                let flagged = outcomes
                    .iter()
                    .filter(|o| o.success)
                    .find_map(|o| o.status_type);
                (Severity::Warning, flagged)
            }
        }
        AggregationPolicy::FirstSuccess => {
            let winner = outcomes.iter().find(|o| o.success);
            (
                winner.map_or(Severity::Warning, |o| o.status),
                winner.and_then(|o| o.status_type),
            )
        }
    };
    RentalReport::new(status, status_type, message, outcomes)
}
