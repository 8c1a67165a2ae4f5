use crate::prediction::Prediction;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Cache lifecycle events, delivered to the registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PgpsEvent {
    /// Cache initialization beginning.
    Init,
    /// No prediction currently available.
    Unavailable,
    /// Predictions are being loaded from the assistance service.
    Loading,
    /// A prediction just became available; carries that record.
    Available,
    /// Every prediction of the active set is available.
    Ready,
}

/// Single observer registered at initialization, one per cache instance.
/// For [PgpsEvent::Available] the record that just arrived is attached,
/// all other events carry no payload.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: PgpsEvent, prediction: Option<&Prediction>);
}

impl<F> EventHandler for F
where
    F: Fn(PgpsEvent, Option<&Prediction>) + Send + Sync,
{
    fn handle(&self, event: PgpsEvent, prediction: Option<&Prediction>) {
        self(event, prediction)
    }
}

/// Deferred "notify me when a prediction covers now" registration,
/// drained when one becomes available.
pub(crate) type Waiter = Box<dyn FnOnce(&Prediction) + Send>;
