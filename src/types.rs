//! Shared types for hashrent.
//!
//! These types form the data model used across all modules. Marketplace
//! adapters normalise their REST payloads into these shapes so the
//! pipeline stages never see provider-specific field names.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::marketplaces::MarketKind;

/// Truncate toward zero at two decimal places.
///
/// Used for computed durations and displayed limits.
pub fn truncate_hundredths(value: Decimal) -> Decimal {
    value.trunc_with_scale(2)
}

// ---------------------------------------------------------------------------
// Pools
// ---------------------------------------------------------------------------

/// A mining-pool endpoint that rented hashpower is pointed at.
///
/// Serde aliases accept the marketplace spellings (`stratumHostname`,
/// `username`, ...) so adapter payloads deserialize straight into the
/// canonical field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    /// Local id, unique within one provider's mirror.
    pub id: String,
    #[serde(alias = "stratumHostname")]
    pub host: String,
    #[serde(alias = "stratumPort")]
    pub port: u16,
    #[serde(alias = "username")]
    pub user: String,
    #[serde(alias = "password")]
    pub pass: String,
    #[serde(alias = "type")]
    pub algorithm: String,
    /// Id assigned by the marketplace. `None` until created remotely.
    #[serde(default, alias = "remoteId")]
    pub remote_id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub notes: String,
}

impl Pool {
    /// Whether `id` names this pool by its local or remote id.
    pub fn matches(&self, id: &str) -> bool {
        self.id == id || self.remote_id.as_deref() == Some(id)
    }
}

impl fmt::Display for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) stratum+tcp://{}:{} as {}",
            self.name, self.algorithm, self.host, self.port, self.user
        )
    }
}

/// Caller input for creating a pool on every configured provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSpec {
    #[serde(alias = "algo", alias = "type")]
    pub algorithm: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(default = "default_pool_pass")]
    pub pass: String,
    pub name: String,
    #[serde(default)]
    pub notes: String,
}

fn default_pool_pass() -> String {
    "x".to_string()
}

impl PoolSpec {
    /// Reject specs missing any connection field.
    pub fn validate(&self) -> Result<(), RentalError> {
        if self.host.trim().is_empty()
            || self.port == 0
            || self.user.trim().is_empty()
            || self.pass.is_empty()
        {
            return Err(RentalError::Config(
                "must provide all of the following: host, port, user, pass".to_string(),
            ));
        }
        if self.algorithm.trim().is_empty() {
            return Err(RentalError::Config("pool algorithm is required".to_string()));
        }
        Ok(())
    }

    /// Materialise the spec as a pool with the given local id.
    pub fn to_pool(&self, id: &str) -> Pool {
        Pool {
            id: id.to_string(),
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            pass: self.pass.clone(),
            algorithm: self.algorithm.clone(),
            remote_id: None,
            name: self.name.clone(),
            notes: self.notes.clone(),
        }
    }
}

/// A partial pool update. Unset (or empty) fields keep their current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolUpdate {
    #[serde(default, alias = "stratumHostname")]
    pub host: Option<String>,
    #[serde(default, alias = "stratumPort")]
    pub port: Option<u16>,
    #[serde(default, alias = "username")]
    pub user: Option<String>,
    #[serde(default, alias = "password")]
    pub pass: Option<String>,
    #[serde(default, alias = "type")]
    pub algorithm: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl PoolUpdate {
    /// Merge this update over `pool`, returning the resulting record.
    pub fn merge_into(&self, pool: &Pool) -> Pool {
        Pool {
            id: pool.id.clone(),
            host: pick(&self.host, &pool.host),
            port: self.port.filter(|p| *p != 0).unwrap_or(pool.port),
            user: pick(&self.user, &pool.user),
            pass: pick(&self.pass, &pool.pass),
            algorithm: pick(&self.algorithm, &pool.algorithm),
            remote_id: pool.remote_id.clone(),
            name: pick(&self.name, &pool.name),
            notes: pick(&self.notes, &pool.notes),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == PoolUpdate::default()
    }
}

fn pick(update: &Option<String>, current: &str) -> String {
    match update {
        Some(v) if !v.is_empty() => v.clone(),
        _ => current.to_string(),
    }
}

/// A pool profile (a named group of pools some marketplaces rent against).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolProfile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub algorithm: Option<String>,
}

// ---------------------------------------------------------------------------
// Rental request
// ---------------------------------------------------------------------------

/// Unit the hashrate limit is displayed in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashUnit {
    #[serde(rename = "GH")]
    Gigahash,
    #[default]
    #[serde(rename = "TH")]
    Terahash,
}

impl HashUnit {
    pub fn label(&self) -> &'static str {
        match self {
            HashUnit::Gigahash => "Total Gigahashes",
            HashUnit::Terahash => "Total Terahashes",
        }
    }
}

impl fmt::Display for HashUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashUnit::Gigahash => write!(f, "GH"),
            HashUnit::Terahash => write!(f, "TH"),
        }
    }
}

/// Which pool an order should be pointed at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolSelection {
    /// The provider's active pool.
    #[default]
    Active,
    /// A specific pool by local or remote id.
    Pool(String),
}

/// A request to rent hashpower. Built by a strategy and not modified
/// once handed to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RentalRequest {
    /// Budget in the settlement currency.
    pub amount: Decimal,
    /// Hashrate limit in `unit`.
    pub limit: Decimal,
    /// Price per unit per day.
    pub price: Decimal,
    #[serde(default)]
    pub duration_hours: Option<Decimal>,
    pub algorithm: String,
    #[serde(default)]
    pub unit: HashUnit,
    #[serde(default)]
    pub pool: PoolSelection,
    /// Marketplace region; the marketplace default applies when unset.
    #[serde(default)]
    pub location: Option<String>,
    /// Two-factor code for accounts that require one on order creation.
    #[serde(default)]
    pub two_factor_code: Option<String>,
}

impl RentalRequest {
    pub fn new(amount: Decimal, limit: Decimal, price: Decimal, algorithm: &str) -> Self {
        Self {
            amount,
            limit,
            price,
            duration_hours: None,
            algorithm: algorithm.to_string(),
            unit: HashUnit::default(),
            pool: PoolSelection::Active,
            location: None,
            two_factor_code: None,
        }
    }

    pub fn with_unit(mut self, unit: HashUnit) -> Self {
        self.unit = unit;
        self
    }

    pub fn with_pool(mut self, pool_id: &str) -> Self {
        self.pool = PoolSelection::Pool(pool_id.to_string());
        self
    }

    pub fn with_two_factor(mut self, code: &str) -> Self {
        self.two_factor_code = Some(code.to_string());
        self
    }
}

impl fmt::Display for RentalRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}/s of {} for {} @ {}",
            self.limit, self.unit, self.algorithm, self.amount, self.price
        )
    }
}

// ---------------------------------------------------------------------------
// Status taxonomy
// ---------------------------------------------------------------------------

/// Outcome severity. Each level routes to its own event; the levels are
/// not ordered for control purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Normal,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Normal => write!(f, "NORMAL"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// Machine-checkable reason paired with a severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusType {
    LowBalance,
    LowLimit,
    /// Live market price unavailable; rental may still proceed.
    Cutoff,
    BalanceFetch,
    PricingFetch,
    MissingCredentials,
    /// The marketplace refused the configured credentials.
    Unauthorized,
    NoPool,
    NoActivePool,
    NoProvider,
    Network,
    Marketplace,
    RemoteRejected,
    Cancelled,
    Timeout,
    Internal,
}

impl fmt::Display for StatusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatusType::LowBalance => "LOW_BALANCE",
            StatusType::LowLimit => "LOW_LIMIT",
            StatusType::Cutoff => "CUTOFF",
            StatusType::BalanceFetch => "BALANCE_FETCH",
            StatusType::PricingFetch => "PRICING_FETCH",
            StatusType::MissingCredentials => "MISSING_CREDENTIALS",
            StatusType::Unauthorized => "UNAUTHORIZED",
            StatusType::NoPool => "NO_POOL",
            StatusType::NoActivePool => "NO_ACTIVE_POOL",
            StatusType::NoProvider => "NO_PROVIDER",
            StatusType::Network => "NETWORK",
            StatusType::Marketplace => "MARKETPLACE",
            StatusType::RemoteRejected => "REMOTE_REJECTED",
            StatusType::Cancelled => "CANCELLED",
            StatusType::Timeout => "TIMEOUT",
            StatusType::Internal => "INTERNAL",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Pipeline results
// ---------------------------------------------------------------------------

/// Which configured account a result belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderIdentity {
    pub id: Uuid,
    pub name: String,
    pub market: MarketKind,
}

impl fmt::Display for ProviderIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.market)
    }
}

/// Feasibility report produced by the preprocess stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessReport {
    pub provider: ProviderIdentity,
    pub status: Severity,
    pub status_type: Option<StatusType>,
    pub message: String,
    /// Estimated duration, truncated to hundredths.
    pub duration_hours: Option<Decimal>,
    pub amount: Decimal,
    pub price: Decimal,
    /// Requested limit, truncated to hundredths for display.
    pub limit: Decimal,
    pub balance: Option<Decimal>,
    /// Live market price for the algorithm, when it could be fetched.
    pub market_price: Option<Decimal>,
    pub low_balance: bool,
    pub low_limit: bool,
    pub total_hashes: Decimal,
    pub label: String,
    pub algorithm: String,
}

impl PreprocessReport {
    /// A NORMAL report for `request` with nothing computed yet.
    pub fn pending(provider: ProviderIdentity, request: &RentalRequest) -> Self {
        Self {
            provider,
            status: Severity::Normal,
            status_type: None,
            message: String::new(),
            duration_hours: None,
            amount: request.amount,
            price: request.price,
            limit: truncate_hundredths(request.limit),
            balance: None,
            market_price: None,
            low_balance: false,
            low_limit: false,
            total_hashes: request.limit,
            label: request.unit.label().to_string(),
            algorithm: request.algorithm.clone(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == Severity::Error
    }
}

/// Normalised result of one provider's rental attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RentalOutcome {
    pub provider: ProviderIdentity,
    pub success: bool,
    pub status: Severity,
    pub status_type: Option<StatusType>,
    pub rental_id: Option<String>,
    /// Amount the marketplace reports as paid.
    pub cost: Option<Decimal>,
    pub amount: Decimal,
    pub limit: Decimal,
    pub duration_hours: Option<Decimal>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl RentalOutcome {
    /// A failed outcome carrying the error's status type and message.
    pub fn failed(provider: ProviderIdentity, request: &RentalRequest, err: &RentalError) -> Self {
        Self {
            provider,
            success: false,
            status: Severity::Error,
            status_type: Some(err.status_type()),
            rental_id: None,
            cost: None,
            amount: request.amount,
            limit: request.limit,
            duration_hours: None,
            message: err.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// An unsuccessful outcome that returns the preprocess report as-is.
    pub fn from_report(report: &PreprocessReport, status_type: Option<StatusType>, message: &str) -> Self {
        Self {
            provider: report.provider.clone(),
            success: false,
            status: report.status,
            status_type,
            rental_id: None,
            cost: None,
            amount: report.amount,
            limit: report.limit,
            duration_hours: report.duration_hours,
            message: message.to_string(),
            timestamp: Utc::now(),
        }
    }
}

impl fmt::Display for RentalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.success { "rented" } else { "not rented" };
        write!(f, "{}: {verdict} [{}", self.provider, self.status)?;
        if let Some(t) = self.status_type {
            write!(f, "/{t}")?;
        }
        write!(f, "] {}", self.message)?;
        if let Some(id) = &self.rental_id {
            write!(f, " (rental {id})")?;
        }
        Ok(())
    }
}

/// Everything one `rent` call produced. This is the unit the event bus
/// transports: exactly one per call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RentalReport {
    pub id: Uuid,
    pub status: Severity,
    pub status_type: Option<StatusType>,
    pub message: String,
    pub outcomes: Vec<RentalOutcome>,
    pub finished_at: DateTime<Utc>,
}

impl RentalReport {
    pub fn new(
        status: Severity,
        status_type: Option<StatusType>,
        message: String,
        outcomes: Vec<RentalOutcome>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            status,
            status_type,
            message,
            outcomes,
            finished_at: Utc::now(),
        }
    }

    /// An ERROR report with no per-provider outcomes.
    pub fn error(err: &RentalError) -> Self {
        Self::new(Severity::Error, Some(err.status_type()), err.to_string(), Vec::new())
    }

    pub fn succeeded(&self) -> bool {
        self.outcomes.iter().any(|o| o.success)
    }

    pub fn rental_ids(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter_map(|o| o.rental_id.as_deref())
            .collect()
    }

    /// Sum of what the marketplaces report as paid.
    pub fn total_cost(&self) -> Decimal {
        self.outcomes.iter().filter_map(|o| o.cost).sum()
    }
}

impl fmt::Display for RentalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({} provider(s), cost {})",
            self.status,
            self.message,
            self.outcomes.len(),
            self.total_cost()
        )
    }
}

/// A recorded rental report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub report: RentalReport,
}

impl Receipt {
    pub fn new(report: RentalReport) -> Self {
        Self {
            id: Uuid::new_v4(),
            recorded_at: Utc::now(),
            report,
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Which marketplace minimum a request fell below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MinimumKind {
    LowBalance,
    LowLimit,
}

impl From<MinimumKind> for StatusType {
    fn from(kind: MinimumKind) -> Self {
        match kind {
            MinimumKind::LowBalance => StatusType::LowBalance,
            MinimumKind::LowLimit => StatusType::LowLimit,
        }
    }
}

/// Why an order submission failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmissionFailure {
    /// The request never got a marketplace answer.
    Network,
    /// The marketplace answered with an error.
    Marketplace,
}

impl From<SubmissionFailure> for StatusType {
    fn from(kind: SubmissionFailure) -> Self {
        match kind {
            SubmissionFailure::Network => StatusType::Network,
            SubmissionFailure::Marketplace => StatusType::Marketplace,
        }
    }
}

impl fmt::Display for SubmissionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionFailure::Network => write!(f, "NETWORK"),
            SubmissionFailure::Marketplace => write!(f, "MARKETPLACE"),
        }
    }
}

/// Domain errors for the rental engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RentalError {
    #[error("Authorization failed ({provider}): {message}")]
    Authorization { provider: String, message: String },

    #[error("Failed to get balance: {0}")]
    BalanceFetch(String),

    #[error("Failed to get pricing: {0}")]
    PricingFetch(String),

    #[error("{message}")]
    BelowMinimum { kind: MinimumKind, message: String },

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    #[error("No pool found")]
    NoPoolConfigured,

    #[error("No active pool set")]
    NoActivePool,

    #[error("No rental providers matched")]
    NoProvider,

    #[error("Failed to create order ({kind}): {message}")]
    OrderSubmission { kind: SubmissionFailure, message: String },

    #[error("Order {id} not running (remote status {code})")]
    RemoteOrderRejected { id: String, code: String },

    #[error("Failed to remove pool {0} from the local mirror")]
    PoolRemovalInconsistency(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Pool not found: {0}")]
    PoolNotFound(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Rental timed out after {0}s")]
    Timeout(u64),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RentalError {
    /// The status type reported alongside this error.
    pub fn status_type(&self) -> StatusType {
        match self {
            RentalError::Authorization { .. } => StatusType::Unauthorized,
            RentalError::MissingCredentials(_) => StatusType::MissingCredentials,
            RentalError::BalanceFetch(_) => StatusType::BalanceFetch,
            RentalError::PricingFetch(_) => StatusType::PricingFetch,
            RentalError::BelowMinimum { kind, .. } => (*kind).into(),
            RentalError::NoPoolConfigured => StatusType::NoPool,
            RentalError::NoActivePool | RentalError::PoolNotFound(_) => StatusType::NoActivePool,
            RentalError::NoProvider | RentalError::ProviderNotFound(_) => StatusType::NoProvider,
            RentalError::OrderSubmission { kind, .. } => (*kind).into(),
            RentalError::RemoteOrderRejected { .. } => StatusType::RemoteRejected,
            RentalError::Timeout(_) => StatusType::Timeout,
            RentalError::PoolRemovalInconsistency(_)
            | RentalError::Config(_)
            | RentalError::Unsupported(_)
            | RentalError::Internal(_) => StatusType::Internal,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
