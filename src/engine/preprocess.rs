//! Preprocess stage.
//!
//! Checks a rental request against the account balance, the
//! marketplace minimums and current pricing before any money is spent.
//! Every failure here becomes a report value; nothing is raised past the
//! stage boundary.

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::marketplaces::DurationQuery;
use crate::provider::RentalTarget;
use crate::types::{truncate_hundredths, PreprocessReport, RentalRequest, Severity, StatusType};

const SECONDS_PER_HOUR: Decimal = rust_decimal_macros::dec!(3600);

/// A report that passed preprocess (status is not ERROR).
///
/// Only `Feasible::check` constructs one, so the execute stage cannot be
/// handed a request that was rejected here.
#[derive(Debug, Clone)]
pub struct Feasible {
    report: PreprocessReport,
}

impl Feasible {
    pub fn check(report: PreprocessReport) -> Result<Self, PreprocessReport> {
        if report.is_error() {
            Err(report)
        } else {
            Ok(Self { report })
        }
    }

    pub fn report(&self) -> &PreprocessReport {
        &self.report
    }

    pub fn into_report(self) -> PreprocessReport {
        self.report
    }
}

/// Run the feasibility checks for one provider.
pub async fn preprocess(target: &RentalTarget, request: &RentalRequest) -> PreprocessReport {
    let mut report = PreprocessReport::pending(target.identity.clone(), request);
    let limits = target.limits;
    let limit = limits.resolve_limit(request.limit);
    report.limit = truncate_hundredths(limit);
    report.total_hashes = limit;

    // 1. Balance
    let balance = match target.client.get_balance(limits.settlement_currency).await {
        Ok(balance) => balance,
        Err(e) => {
            warn!(provider = %target.identity, error = %e, "Balance lookup failed");
            report.status = Severity::Error;
            report.status_type = Some(StatusType::BalanceFetch);
            report.message = "failed to get balance".to_string();
            return report;
        }
    };
    report.balance = Some(balance);

    // 2. Duration estimate
    let query = DurationQuery {
        amount: request.amount,
        limit: limit.trunc_with_scale(8),
        price: request.price,
        algorithm: request.algorithm.to_uppercase(),
    };
    match target.client.estimate_duration(&query).await {
        Ok(seconds) => {
            report.duration_hours = Some(truncate_hundredths(seconds / SECONDS_PER_HOUR));
        }
        Err(e) => {
            warn!(provider = %target.identity, error = %e, "Duration estimate failed");
            report.status = Severity::Error;
            report.status_type = Some(StatusType::PricingFetch);
            report.message = "failed to get duration".to_string();
            return report;
        }
    }

    // 3. Marketplace minimums. A low limit outranks a low balance when both apply.
    if balance < limits.min_amount {
        report.low_balance = true;
        report.message = format!("Balance must be >= {}", limits.min_amount);
    } else if request.amount < limits.min_amount {
        report.low_balance = true;
        report.message = format!("Amount must be >= {}", limits.min_amount);
    } else if balance < request.amount {
        report.low_balance = true;
        report.message = format!("Balance {balance} is below the requested amount {}", request.amount);
    }
    if report.low_balance {
        report.status_type = Some(StatusType::LowBalance);
    }
    if limit < limits.min_limit {
        report.low_limit = true;
        report.status_type = Some(StatusType::LowLimit);
        report.message = format!("Hashrate/limit must be >= {} {}", limits.min_limit, request.unit);
    }
    if report.low_balance || report.low_limit {
        report.status = Severity::Error;
        warn!(
            provider = %target.identity,
            balance = %balance,
            amount = %request.amount,
            limit = %limit,
            reason = ?report.status_type,
            "Rental below marketplace minimum"
        );
        return report;
    }

    // 4. Live market price, informational only
    match target.client.get_market_price(&request.algorithm).await {
        Ok(price) => {
            report.market_price = Some(price);
            report.message = format!("Algorithm: {}", request.algorithm);
            debug!(provider = %target.identity, market_price = %price, "Market price fetched");
        }
        Err(e) => {
            report.status = Severity::Warning;
            report.status_type = Some(StatusType::Cutoff);
            report.message = format!("Algorithm: {} (no live market price: {e})", request.algorithm);
            warn!(provider = %target.identity, error = %e, "Market price unavailable");
        }
    }

    info!(
        provider = %target.identity,
        status = %report.status,
        duration_hours = ?report.duration_hours,
        balance = %balance,
        "Preprocess complete"
    );
    report
}
