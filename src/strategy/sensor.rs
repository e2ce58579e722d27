//! Sensor-driven strategy: rents when an external reading crosses a threshold.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{unsupported, RentTrigger, RentalStrategy, StrategyKind, StrategySignal, TriggerSlot};
use crate::engine::{ProviderSelector, RentIntent};
use crate::types::{RentalError, RentalReport, RentalRequest};

/// One reading from an external signal source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub source: String,
    pub value: Decimal,
    /// Overrides the strategy's template request for this reading.
    #[serde(default)]
    pub request: Option<RentalRequest>,
}

impl SensorReading {
    pub fn new(source: &str, value: Decimal) -> Self {
        Self {
            source: source.to_string(),
            value,
            request: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Readings at or above this value trigger a rental.
    pub threshold: Decimal,
}

pub struct SensorDrivenStrategy {
    config: SensorConfig,
    template: RentalRequest,
    selector: ProviderSelector,
    trigger: TriggerSlot,
}

impl SensorDrivenStrategy {
    pub fn new(config: SensorConfig, template: RentalRequest) -> Self {
        Self {
            config,
            template,
            selector: ProviderSelector::All,
            trigger: TriggerSlot::default(),
        }
    }

    pub fn with_selector(mut self, selector: ProviderSelector) -> Self {
        self.selector = selector;
        self
    }

    pub async fn sensor_signal(
        &self,
        reading: SensorReading,
    ) -> Result<Option<RentalReport>, RentalError> {
        if reading.value < self.config.threshold {
            debug!(
                source = %reading.source,
                value = %reading.value,
                threshold = %self.config.threshold,
                "Sensor reading below threshold"
            );
            return Ok(None);
        }

        info!(source = %reading.source, value = %reading.value, "Sensor threshold crossed");
        let request = reading.request.unwrap_or_else(|| self.template.clone());
        let intent = RentIntent::new(request).with_selector(self.selector.clone());
        self.trigger.fire(intent).await.map(Some)
    }
}

#[async_trait]
impl RentalStrategy for SensorDrivenStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::SensorDriven
    }

    fn on_rental_trigger(&self, trigger: RentTrigger) {
        self.trigger.bind(trigger);
    }

    async fn handle(&self, signal: StrategySignal) -> Result<Option<RentalReport>, RentalError> {
        match signal {
            StrategySignal::Sensor(reading) => self.sensor_signal(reading).await,
            other => Err(unsupported(self.kind(), &other)),
        }
    }
}
