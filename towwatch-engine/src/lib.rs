pub mod dispatcher;
pub mod reconcile;
pub mod registry;
pub mod retry;
pub mod stands;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use dispatcher::{AlertDispatcher, FlightActivity};
pub use reconcile::{reconcile_flights, ReconcileSummary};
pub use registry::{ArmedEntry, SchedulerSettings, TowRegistry};
pub use retry::RetryPolicy;
pub use stands::{StandReconciler, StandUpdate};
