//! Marketplace integrations.
//!
//! Defines the `RentalMarketplace` capability trait every hashpower
//! marketplace adapter implements, plus the marketplace kinds the engine
//! knows the minimums for:
//! - NiceHash: standard orders priced per unit per day
//! - MiningRigRentals: rig rentals grouped under pool profiles
//!
//! Live HTTP adapters live outside this crate. `paper` provides an
//! in-memory marketplace for dry runs.

pub mod paper;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{Pool, PoolProfile, SubmissionFailure};

// ---------------------------------------------------------------------------
// Marketplace kinds
// ---------------------------------------------------------------------------

/// Supported marketplace types, selected by configuration at setup time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketKind {
    NiceHash,
    MiningRigRentals,
}

impl MarketKind {
    pub const ALL: &'static [MarketKind] = &[MarketKind::NiceHash, MarketKind::MiningRigRentals];

    pub fn type_name(&self) -> &'static str {
        match self {
            MarketKind::NiceHash => "NiceHash",
            MarketKind::MiningRigRentals => "MiningRigRentals",
        }
    }

    /// Minimum spend and rate the marketplace enforces.
    pub fn limits(&self) -> MarketLimits {
        match self {
            MarketKind::NiceHash => MarketLimits {
                settlement_currency: "BTC",
                min_amount: dec!(0.005),
                min_limit: dec!(0.01),
                default_limit: dec!(0.01),
                default_location: "1",
            },
            MarketKind::MiningRigRentals => MarketLimits {
                settlement_currency: "BTC",
                min_amount: Decimal::ZERO,
                min_limit: Decimal::ZERO,
                default_limit: Decimal::ZERO,
                default_location: "",
            },
        }
    }
}

impl fmt::Display for MarketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

impl std::str::FromStr for MarketKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_', ' '], "").as_str() {
            "nicehash" => Ok(MarketKind::NiceHash),
            "miningrigrentals" | "mrr" => Ok(MarketKind::MiningRigRentals),
            other => anyhow::bail!("Unknown marketplace type: {other}"),
        }
    }
}

/// Marketplace-specific minimums and defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketLimits {
    pub settlement_currency: &'static str,
    /// Minimum spend (and minimum settlement balance).
    pub min_amount: Decimal,
    /// Minimum hashrate limit.
    pub min_limit: Decimal,
    /// Limit used when a request leaves it at zero.
    pub default_limit: Decimal,
    pub default_location: &'static str,
}

impl MarketLimits {
    /// The limit an order is placed with: a zero limit means the marketplace default.
    pub fn resolve_limit(&self, limit: Decimal) -> Decimal {
        if limit.is_zero() {
            self.default_limit
        } else {
            limit
        }
    }
}

// ---------------------------------------------------------------------------
// Adapter payloads
// ---------------------------------------------------------------------------

/// Inputs for a duration estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurationQuery {
    pub amount: Decimal,
    pub limit: Decimal,
    pub price: Decimal,
    /// Upper-cased algorithm name.
    pub algorithm: String,
}

/// Order submitted to a marketplace: the request's economics merged with
/// the target pool's connection fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPayload {
    pub amount: Decimal,
    pub price: Decimal,
    pub limit: Decimal,
    pub duration_hours: Option<Decimal>,
    pub algorithm: String,
    pub location: String,
    pub two_factor_code: Option<String>,
    pub pool_id: String,
    pub pool_remote_id: Option<String>,
    pub pool_host: String,
    pub pool_port: u16,
    pub pool_user: String,
    pub pool_pass: String,
    pub pool_name: String,
}

/// Remote answer to an order submission or lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub id: String,
    /// Remote status code, e.g. "ACTIVE", "COMPLETED", "CANCELLED".
    pub status_code: String,
    #[serde(default)]
    pub payed_amount: Decimal,
}

impl OrderReceipt {
    /// Whether the remote status means hashpower is (or was) delivered.
    pub fn is_live(&self) -> bool {
        matches!(self.status_code.as_str(), "ACTIVE" | "COMPLETED")
    }
}

/// Remote answer to a pool create/edit call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolAck {
    pub success: bool,
    #[serde(default)]
    pub remote_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Remote answer to an order cancellation. `error` is set when the
/// marketplace answered but refused.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CancelAck {
    #[serde(default)]
    pub error: Option<String>,
}

/// Snapshot of the open orders for an algorithm.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    pub algorithm: String,
    /// Hashrate unit the book is quoted in, e.g. "TH".
    pub display_market_factor: String,
    pub market_factor: Decimal,
    pub entries: Vec<OrderBookEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookEntry {
    pub id: String,
    pub price: Decimal,
    pub limit: Decimal,
    pub alive: bool,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure reported by a marketplace adapter.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MarketplaceError {
    /// Transport-level failure; the marketplace never answered.
    #[error("network error: {0}")]
    Network(String),
    /// The marketplace answered with an error.
    #[error("marketplace error: {0}")]
    Marketplace(String),
    #[error("not supported by this marketplace: {0}")]
    Unsupported(&'static str),
}

impl MarketplaceError {
    /// Transport failures are NETWORK; anything the marketplace answered is MARKETPLACE.
    pub fn submission_failure(&self) -> SubmissionFailure {
        match self {
            MarketplaceError::Network(_) => SubmissionFailure::Network,
            MarketplaceError::Marketplace(_) | MarketplaceError::Unsupported(_) => {
                SubmissionFailure::Marketplace
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Capability trait
// ---------------------------------------------------------------------------

/// The capability set every marketplace adapter provides.
///
/// Pool-profile calls default to `Unsupported` for marketplaces without
/// profiles; everything else is mandatory.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RentalMarketplace: Send + Sync {
    fn kind(&self) -> MarketKind;

    /// Check that the credentials work. `Ok(false)` means the marketplace
    /// rejected them; `Err` means the check itself failed.
    async fn test_authorization(&self) -> Result<bool, MarketplaceError>;

    async fn get_balance(&self, currency: &str) -> Result<Decimal, MarketplaceError>;

    async fn get_pools(&self) -> Result<Vec<Pool>, MarketplaceError>;

    /// Update the pool if it carries a remote id, else create it.
    async fn create_or_edit_pool(&self, pool: &Pool) -> Result<PoolAck, MarketplaceError>;

    async fn get_pool_profiles(&self) -> Result<Vec<PoolProfile>, MarketplaceError> {
        Err(MarketplaceError::Unsupported("pool profiles"))
    }

    async fn create_pool_profile(
        &self,
        _name: &str,
        _algorithm: &str,
    ) -> Result<PoolProfile, MarketplaceError> {
        Err(MarketplaceError::Unsupported("pool profiles"))
    }

    async fn delete_pool_profile(&self, _id: &str) -> Result<(), MarketplaceError> {
        Err(MarketplaceError::Unsupported("pool profiles"))
    }

    async fn create_order(&self, order: &OrderPayload) -> Result<OrderReceipt, MarketplaceError>;

    async fn get_order(&self, id: &str) -> Result<OrderReceipt, MarketplaceError>;

    async fn get_order_book(&self, algorithm: &str) -> Result<OrderBook, MarketplaceError>;

    async fn cancel_order(&self, id: &str) -> Result<CancelAck, MarketplaceError>;

    /// Estimated rental duration in seconds.
    async fn estimate_duration(&self, query: &DurationQuery) -> Result<Decimal, MarketplaceError>;

    /// Current market price for an algorithm.
    async fn get_market_price(&self, algorithm: &str) -> Result<Decimal, MarketplaceError>;

    async fn get_deposit_addresses(&self, currency: &str) -> Result<Vec<String>, MarketplaceError>;
}
