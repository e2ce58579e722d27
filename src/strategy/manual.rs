//! Manual rent strategy: rents exactly when asked to.

use async_trait::async_trait;
use tracing::info;

use super::{unsupported, RentTrigger, RentalStrategy, StrategyKind, StrategySignal, TriggerSlot};
use crate::engine::RentIntent;
use crate::types::{RentalError, RentalReport};

#[derive(Default)]
pub struct ManualRentStrategy {
    trigger: TriggerSlot,
}

impl ManualRentStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn manual_rent(&self, intent: RentIntent) -> Result<RentalReport, RentalError> {
        info!(request = %intent.request, "Manual rent triggered");
        self.trigger.fire(intent).await
    }
}

#[async_trait]
impl RentalStrategy for ManualRentStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ManualRent
    }

    fn on_rental_trigger(&self, trigger: RentTrigger) {
        self.trigger.bind(trigger);
    }

    async fn handle(&self, signal: StrategySignal) -> Result<Option<RentalReport>, RentalError> {
        match signal {
            StrategySignal::Manual(intent) => self.manual_rent(intent).await.map(Some),
            other => Err(unsupported(self.kind(), &other)),
        }
    }
}
