//! Outcome classification and rental events.
//!
//! Every `rent` call publishes exactly one report: the shared
//! `RENTAL_FINISHED` event fires first, then the one severity event the
//! report's status routes to. Each event has a single handler slot;
//! registering a handler replaces the previous one.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{error, info, warn};

use crate::types::{RentalReport, Severity};

/// Named rental events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RentalEvent {
    Finished,
    Success,
    Warning,
    Error,
}

impl RentalEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RentalEvent::Finished => "RENTAL_FINISHED",
            RentalEvent::Success => "RENTAL_SUCCESS",
            RentalEvent::Warning => "RENTAL_WARNING",
            RentalEvent::Error => "RENTAL_ERROR",
        }
    }

    /// The severity event a status routes to.
    pub fn for_severity(severity: Severity) -> Self {
        match severity {
            Severity::Normal => RentalEvent::Success,
            Severity::Warning => RentalEvent::Warning,
            Severity::Error => RentalEvent::Error,
        }
    }
}

impl fmt::Display for RentalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

pub type RentalHandler = Arc<dyn Fn(&RentalReport) + Send + Sync>;

struct Slots {
    finished: Option<RentalHandler>,
    success: RentalHandler,
    warning: RentalHandler,
    error: RentalHandler,
}

/// Single-slot publish/subscribe channel for rental reports.
pub struct EventBus {
    slots: Mutex<Slots>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// A bus whose severity handlers log the report.
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Slots {
                finished: None,
                success: Arc::new(|report| info!(report = %report, "Rental success")),
                warning: Arc::new(|report| warn!(report = %report, "Rental warning")),
                error: Arc::new(|report| error!(report = %report, "Rental error")),
            }),
        }
    }

    pub fn on_rental_finished(&self, handler: impl Fn(&RentalReport) + Send + Sync + 'static) {
        self.slots().finished = Some(Arc::new(handler));
    }

    pub fn on_rental_success(&self, handler: impl Fn(&RentalReport) + Send + Sync + 'static) {
        self.slots().success = Arc::new(handler);
    }

    pub fn on_rental_warning(&self, handler: impl Fn(&RentalReport) + Send + Sync + 'static) {
        self.slots().warning = Arc::new(handler);
    }

    pub fn on_rental_error(&self, handler: impl Fn(&RentalReport) + Send + Sync + 'static) {
        self.slots().error = Arc::new(handler);
    }

    /// Fire `RENTAL_FINISHED`, then the report's severity event.
    /// Returns the severity event that fired.
    pub fn publish(&self, report: &RentalReport) -> RentalEvent {
        let event = RentalEvent::for_severity(report.status);
        // Clone the handlers out so they run without the slot lock held.
        let (finished, handler) = {
            let slots = self.slots();
            let handler = match event {
                RentalEvent::Success => Arc::clone(&slots.success),
                RentalEvent::Warning => Arc::clone(&slots.warning),
                _ => Arc::clone(&slots.error),
            };
            (slots.finished.clone(), handler)
        };

        info!(event = RentalEvent::Finished.name(), report_id = %report.id, "Rental function finished");
        if let Some(finished) = finished {
            finished(report);
        }
        info!(event = event.name(), report_id = %report.id, status = %report.status, "Publishing rental event");
        handler(report);
        event
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
