//! Execute stage.
//!
//! Places the order for a request that passed preprocess and turns the
//! marketplace's answer into a `RentalOutcome`. Precondition failures
//! and submission errors come back as unsuccessful outcomes, never as
//! errors.

use chrono::Utc;
use tracing::{info, warn};

use super::preprocess::Feasible;
use crate::marketplaces::{MarketLimits, OrderPayload};
use crate::provider::RentalTarget;
use crate::types::{
    MinimumKind, Pool, PoolSelection, RentalError, RentalOutcome, RentalRequest,
};

impl OrderPayload {
    /// Merge a request with its target pool. The pool decides routing
    /// (connection fields and algorithm); the request decides economics.
    pub fn merge(request: &RentalRequest, pool: &Pool, limits: &MarketLimits) -> Self {
        let limit = limits.resolve_limit(request.limit);
        Self {
            amount: request.amount,
            price: request.price,
            limit,
            duration_hours: request.duration_hours,
            algorithm: pool.algorithm.clone(),
            location: request
                .location
                .clone()
                .unwrap_or_else(|| limits.default_location.to_string()),
            two_factor_code: request.two_factor_code.clone(),
            pool_id: pool.id.clone(),
            pool_remote_id: pool.remote_id.clone(),
            pool_host: pool.host.clone(),
            pool_port: pool.port,
            pool_user: pool.user.clone(),
            pool_pass: pool.pass.clone(),
            pool_name: pool.name.clone(),
        }
    }
}

/// Check the execute preconditions and resolve the pool to route to.
fn check_preconditions<'a>(
    target: &'a RentalTarget,
    request: &RentalRequest,
) -> Result<&'a Pool, RentalError> {
    let limits = &target.limits;
    if !target.has_credentials {
        return Err(RentalError::MissingCredentials(
            "Must provide api key and api secret or id on initialize".to_string(),
        ));
    }
    if request.amount < limits.min_amount {
        return Err(RentalError::BelowMinimum {
            kind: MinimumKind::LowBalance,
            message: format!("The minimum amount to pay is {} {}", limits.min_amount, limits.settlement_currency),
        });
    }
    if limits.resolve_limit(request.limit) < limits.min_limit {
        return Err(RentalError::BelowMinimum {
            kind: MinimumKind::LowLimit,
            message: format!("The minimum limit is {}", limits.min_limit),
        });
    }
    if target.pools.is_empty() {
        return Err(RentalError::NoPoolConfigured);
    }
    match &request.pool {
        PoolSelection::Active => target.pools.active_pool().ok_or(RentalError::NoActivePool),
        PoolSelection::Pool(id) => target
            .pools
            .get(id)
            .ok_or_else(|| RentalError::PoolNotFound(id.clone())),
    }
}

/// Place the order on the target marketplace.
pub async fn execute(target: &RentalTarget, request: &RentalRequest, feasible: &Feasible) -> RentalOutcome {
    let report = feasible.report();

    let pool = match check_preconditions(target, request) {
        Ok(pool) => pool,
        Err(e) => {
            warn!(provider = %target.identity, error = %e, "Execute precondition failed");
            return RentalOutcome::failed(target.identity.clone(), request, &e);
        }
    };

    let payload = OrderPayload::merge(request, pool, &target.limits);
    info!(
        provider = %target.identity,
        amount = %payload.amount,
        limit = %payload.limit,
        price = %payload.price,
        pool = %pool,
        "Submitting order"
    );

    let receipt = match target.client.create_order(&payload).await {
        Ok(receipt) => receipt,
        Err(e) => {
            let err = RentalError::OrderSubmission {
                kind: e.submission_failure(),
                message: e.to_string(),
            };
            warn!(provider = %target.identity, error = %err, "Order submission failed");
            return RentalOutcome::failed(target.identity.clone(), request, &err);
        }
    };

    if !receipt.is_live() {
        let err = RentalError::RemoteOrderRejected {
            id: receipt.id.clone(),
            code: receipt.status_code.clone(),
        };
        warn!(provider = %target.identity, order_id = %receipt.id, code = %receipt.status_code, "Order not running");
        let mut outcome = RentalOutcome::failed(target.identity.clone(), request, &err);
        outcome.cost = Some(receipt.payed_amount);
        return outcome;
    }

    info!(
        provider = %target.identity,
        rental_id = %receipt.id,
        paid = %receipt.payed_amount,
        "Rental placed"
    );
    RentalOutcome {
        provider: target.identity.clone(),
        success: true,
        status: report.status,
        status_type: report.status_type,
        rental_id: Some(receipt.id),
        cost: Some(receipt.payed_amount),
        amount: request.amount,
        limit: payload.limit,
        duration_hours: report.duration_hours,
        message: report.message.clone(),
        timestamp: Utc::now(),
    }
}
