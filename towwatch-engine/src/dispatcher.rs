use std::sync::Arc;
use towwatch_core::{AlertSink, PortError};
use towwatch_shared::{FlightRef, TowOperation};
use tracing::{debug, error, info};

use crate::retry::RetryPolicy;
use crate::stands::{StandReconciler, StandUpdate};

/// Answers "does some other registered operation still need this flight
/// alerted?". Implemented by the registry.
pub trait FlightActivity: Send + Sync {
    fn is_any_other_active_for_flight(&self, flight: &FlightRef, exclude_id: &str) -> bool;
}

/// Decides and sends alert changes to the sink.
///
/// Flight writes are retried per the [`RetryPolicy`] and block the caller
/// until they land; nothing is reported back to the caller on failure.
pub struct AlertDispatcher {
    sink: Arc<dyn AlertSink>,
    alert_field: String,
    retry: RetryPolicy,
    stands: Option<StandReconciler>,
}

impl AlertDispatcher {
    pub fn new(sink: Arc<dyn AlertSink>, alert_field: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            sink,
            alert_field: alert_field.into(),
            retry,
            stands: None,
        }
    }

    /// Also mirror operation alerts onto their origin stands
    pub fn with_stands(mut self, stands: StandReconciler) -> Self {
        self.stands = Some(stands);
        self
    }

    pub fn stands(&self) -> Option<&StandReconciler> {
        self.stands.as_ref()
    }

    /// Mark every flight of the operation as alerted
    pub async fn set_alert(&self, op: &TowOperation) {
        info!(tow_id = %op.id, flights = op.flights.len(), "Raising tow alert");
        for flight in &op.flights {
            self.set_flight_alert(flight, true).await;
        }
        self.set_stand_alert(op, true).await;
    }

    /// Clear the operation's flights, except those another active operation
    /// still needs alerted; those are (re)set instead.
    pub async fn conditional_clear(&self, op: &TowOperation, activity: &dyn FlightActivity) {
        for flight in &op.flights {
            let still_needed = activity.is_any_other_active_for_flight(flight, &op.id);
            if still_needed {
                info!(
                    tow_id = %op.id,
                    flight = %flight,
                    "Flight still alerted on behalf of another tow"
                );
            } else {
                debug!(tow_id = %op.id, flight = %flight, "Clearing flight alert");
            }
            self.set_flight_alert(flight, still_needed).await;
        }
        self.set_stand_alert(op, false).await;
    }

    /// Single flight write. Returns false only when a bounded retry policy
    /// ran out of attempts.
    pub async fn set_flight_alert(&self, flight: &FlightRef, alerted: bool) -> bool {
        let value = if alerted { "true" } else { "false" };
        let label = format!("Setting {}={} on flight {}", self.alert_field, value, flight);

        let result = self
            .retry
            .run(&label, || {
                self.sink
                    .set_flight_custom_field(flight, &self.alert_field, value)
            })
            .await;

        match result {
            Ok(()) => {
                debug!(flight = %flight, value, "Flight updated");
                true
            }
            Err(e) => {
                log_abandoned(flight, &e);
                false
            }
        }
    }

    pub async fn set_stand_alert(&self, op: &TowOperation, alerted: bool) -> Option<StandUpdate> {
        match &self.stands {
            Some(stands) => Some(stands.update_for_operation(op, alerted).await),
            None => None,
        }
    }
}

fn log_abandoned(flight: &FlightRef, e: &PortError) {
    error!(
        flight = %flight,
        "Abandoned flight update, state will be corrected on the next refresh: {}",
        e
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{flight, operation, stand, RecordingSink, SinkCall, StaticSnapshots};
    use chrono::Duration;
    use std::collections::HashSet;
    use towwatch_shared::FlightNature;

    /// Flights some other operation keeps alive
    struct Busy(HashSet<FlightRef>);

    impl FlightActivity for Busy {
        fn is_any_other_active_for_flight(&self, flight: &FlightRef, _exclude_id: &str) -> bool {
            self.0.contains(flight)
        }
    }

    fn dispatcher(sink: Arc<RecordingSink>) -> AlertDispatcher {
        AlertDispatcher::new(sink, "B---_TowingNotStarted", RetryPolicy::forever(std::time::Duration::from_secs(5)))
    }

    #[tokio::test]
    async fn test_set_alert_writes_every_flight() {
        let sink = Arc::new(RecordingSink::new());
        let arr = flight(FlightNature::Arrival, "101");
        let dep = flight(FlightNature::Departure, "102");
        let op = operation("T1", Duration::minutes(-5), Duration::hours(1), false, false, vec![arr.clone(), dep.clone()]);

        dispatcher(sink.clone()).set_alert(&op).await;

        assert_eq!(sink.flight_values(&arr), vec!["true"]);
        assert_eq!(sink.flight_values(&dep), vec!["true"]);
        assert!(matches!(&sink.calls()[0], SinkCall::Flight { field, .. } if field == "B---_TowingNotStarted"));
    }

    #[tokio::test]
    async fn test_conditional_clear_keeps_shared_flight() {
        let sink = Arc::new(RecordingSink::new());
        let shared = flight(FlightNature::Arrival, "101");
        let own = flight(FlightNature::Departure, "102");
        let op = operation("T1", Duration::minutes(5), Duration::hours(1), false, false, vec![shared.clone(), own.clone()]);

        let busy = Busy(HashSet::from([shared.clone()]));
        dispatcher(sink.clone()).conditional_clear(&op, &busy).await;

        assert_eq!(sink.flight_values(&shared), vec!["true"]);
        assert_eq!(sink.flight_values(&own), vec!["false"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_dispatch_is_retried() {
        let sink = Arc::new(RecordingSink::failing(3));
        let arr = flight(FlightNature::Arrival, "101");

        let delivered = dispatcher(sink.clone()).set_flight_alert(&arr, true).await;

        assert!(delivered);
        assert_eq!(sink.attempts(), 4);
        assert_eq!(sink.flight_values(&arr), vec!["true"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_retry_gives_up_quietly() {
        let sink = Arc::new(RecordingSink::broken());
        let dispatcher = AlertDispatcher::new(
            sink.clone(),
            "alert",
            RetryPolicy::bounded(std::time::Duration::from_secs(1), 2),
        );

        assert!(!dispatcher.set_flight_alert(&flight(FlightNature::Arrival, "1"), true).await);
        assert_eq!(sink.attempts(), 2);
    }

    #[tokio::test]
    async fn test_stand_follows_operation_state() {
        let sink = Arc::new(RecordingSink::new());
        let source = Arc::new(StaticSnapshots::with_stands(vec![stand("1001", "A12", false, None)]));
        let dispatcher = dispatcher(sink.clone()).with_stands(StandReconciler::new(source, sink.clone()));

        let mut op = operation("T1", Duration::minutes(-5), Duration::hours(1), false, false, vec![]);
        op.from_stand = Some("A12".to_string());
        dispatcher.set_alert(&op).await;

        assert_eq!(
            sink.stand_calls(),
            vec![SinkCall::Stand { stand_id: "1001".into(), tow_id: Some("T1".into()), alerted: true }]
        );
    }

    #[tokio::test]
    async fn test_no_stand_updates_when_disabled() {
        let sink = Arc::new(RecordingSink::new());
        let mut op = operation("T1", Duration::minutes(-5), Duration::hours(1), false, false, vec![]);
        op.from_stand = Some("A12".to_string());

        let dispatcher = dispatcher(sink.clone());
        assert_eq!(dispatcher.set_stand_alert(&op, true).await, None);
        assert!(sink.calls().is_empty());
    }
}
