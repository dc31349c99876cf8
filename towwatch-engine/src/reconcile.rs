//! Startup pass over recent flights: anything still flagged with no active
//! tow behind it gets cleared.

use std::collections::HashSet;
use towwatch_shared::FlightRef;
use tracing::info;

use crate::registry::TowRegistry;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub examined: usize,
    pub cleared: usize,
    pub kept: usize,
}

/// Clear the alert on every flight no registered operation keeps active.
/// Run after the registry has been loaded from a snapshot.
pub async fn reconcile_flights(registry: &TowRegistry, flights: &[FlightRef]) -> ReconcileSummary {
    let mut seen = HashSet::new();
    let mut summary = ReconcileSummary::default();

    for flight in flights {
        if !seen.insert(flight) {
            continue;
        }
        summary.examined += 1;
        if registry.is_any_active_for_flight(flight) {
            summary.kept += 1;
            continue;
        }
        if registry.dispatcher().set_flight_alert(flight, false).await {
            summary.cleared += 1;
        }
    }

    info!(
        examined = summary.examined,
        cleared = summary.cleared,
        kept = summary.kept,
        "Flight reconciliation complete"
    );
    summary
}
