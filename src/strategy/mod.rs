//! Rental strategies: policies that decide when to rent and with what.
//!
//! A strategy never calls the pipeline itself. The engine binds its rent
//! entry point into the strategy with `on_rental_trigger`, and every
//! strategy-initiated rental goes through that bound trigger so outcome
//! handling stays in one place.

pub mod manual;
pub mod sensor;
pub mod spot;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::engine::RentIntent;
use crate::types::{RentalError, RentalReport};
use sensor::SensorReading;

/// The engine's rent entry point as seen by a strategy.
pub type RentTrigger = Arc<dyn Fn(RentIntent) -> BoxFuture<'static, RentalReport> + Send + Sync>;

/// Strategy identity. The engine keeps at most one strategy per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StrategyKind {
    ManualRent,
    SpotRental,
    SensorDriven,
}

impl StrategyKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            StrategyKind::ManualRent => "ManualRent",
            StrategyKind::SpotRental => "SpotRental",
            StrategyKind::SensorDriven => "SensorDriven",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

/// Input a strategy can be asked to act on.
pub enum StrategySignal {
    /// Rent now with these parameters.
    Manual(RentIntent),
    /// Evaluate spot profitability and rent if it pays.
    SpotCheck,
    /// An external reading arrived.
    Sensor(SensorReading),
}

impl StrategySignal {
    fn label(&self) -> &'static str {
        match self {
            StrategySignal::Manual(_) => "manual",
            StrategySignal::SpotCheck => "spot check",
            StrategySignal::Sensor(_) => "sensor reading",
        }
    }
}

#[async_trait]
pub trait RentalStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Bind the engine's rent entry point. Called once on registration.
    fn on_rental_trigger(&self, trigger: RentTrigger);

    /// Act on a signal. `Ok(None)` means the strategy decided not to rent.
    async fn handle(&self, signal: StrategySignal) -> Result<Option<RentalReport>, RentalError>;
}

/// Holds the bound rent trigger for a strategy.
#[derive(Default)]
pub struct TriggerSlot {
    trigger: RwLock<Option<RentTrigger>>,
}

impl TriggerSlot {
    pub fn bind(&self, trigger: RentTrigger) {
        *self.trigger.write().unwrap_or_else(PoisonError::into_inner) = Some(trigger);
    }

    pub fn is_bound(&self) -> bool {
        self.trigger
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Rent through the bound trigger.
    pub async fn fire(&self, intent: RentIntent) -> Result<RentalReport, RentalError> {
        let trigger = self
            .trigger
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| {
                RentalError::Config("strategy is not registered with an engine".to_string())
            })?;
        Ok(trigger(intent).await)
    }
}

pub(crate) fn unsupported(kind: StrategyKind, signal: &StrategySignal) -> RentalError {
    RentalError::Unsupported(format!("{kind} strategy cannot handle a {}", signal.label()))
}
