use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use towwatch_core::{NotificationSource, SnapshotSource};
use towwatch_engine::{reconcile_flights, RetryPolicy, TowRegistry};
use towwatch_shared::{parse_notification, TowNotification, TowOperation, TowRecord};
use tracing::{debug, error, info, info_span, trace, warn, Instrument};
use uuid::Uuid;

use crate::error::MonitorError;

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub refresh_interval: Duration,
    /// Snapshot window bounds, relative to the time of the refresh
    pub window_from: chrono::Duration,
    pub window_to: chrono::Duration,
    pub poll_timeout: Duration,
    /// Pause after a failed poll of the notification channel
    pub channel_retry_interval: Duration,
    pub flight_reconciliation: bool,
    pub lookback: chrono::Duration,
}

/// What happened to one notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Registered with timers armed
    Admitted { tow_id: String },
    /// Both actuals reported; alert cleared, nothing registered
    Completed { tow_id: String },
    Removed { tow_id: String },
    /// Not a towing change
    Ignored,
    Rejected,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub purged: usize,
    pub fetched: usize,
    pub admitted: usize,
    pub completed: usize,
    pub rejected: usize,
}

pub struct MonitorHandles {
    pub listener: JoinHandle<()>,
    /// Resolves only with the fatal error that stopped the refresh loop
    pub refresh: JoinHandle<MonitorError>,
}

impl MonitorHandles {
    pub fn abort(&self) {
        self.listener.abort();
        self.refresh.abort();
    }
}

/// Keeps the registry in step with the source system: periodic snapshots,
/// live notifications in between.
pub struct TowMonitor {
    registry: Arc<TowRegistry>,
    snapshots: Arc<dyn SnapshotSource>,
    notifications: Arc<dyn NotificationSource>,
    retry: RetryPolicy,
    settings: MonitorSettings,
}

impl TowMonitor {
    pub fn new(
        registry: Arc<TowRegistry>,
        snapshots: Arc<dyn SnapshotSource>,
        notifications: Arc<dyn NotificationSource>,
        retry: RetryPolicy,
        settings: MonitorSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            snapshots,
            notifications,
            retry,
            settings,
        })
    }

    pub fn registry(&self) -> &Arc<TowRegistry> {
        &self.registry
    }

    /// Startup sequence. Only a fatal error from the initial refresh stops it.
    pub async fn start(self: &Arc<Self>) -> Result<MonitorHandles, MonitorError> {
        info!("Tow monitor starting");
        self.registry.clear();

        self.clear_stale_stands().await;

        info!("Initial population of the tow registry");
        match self.refresh().await {
            Ok(summary) => log_refresh(&summary),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => error!("Initial refresh failed, next attempt at the refresh interval: {}", e),
        }

        let listener = tokio::spawn(self.clone().run_listener());

        if self.settings.flight_reconciliation {
            self.reconcile_recent_flights().await;
        }

        let refresh = tokio::spawn(self.clone().run_refresh_loop());
        info!(
            interval_secs = self.settings.refresh_interval.as_secs(),
            "Tow monitor started"
        );

        Ok(MonitorHandles { listener, refresh })
    }

    /// Replace the registry contents with a fresh snapshot.
    ///
    /// The channel is purged first: everything it held is older than the
    /// snapshot about to be read.
    pub async fn refresh(&self) -> Result<RefreshSummary, MonitorError> {
        let purged = self
            .notifications
            .purge()
            .await
            .map_err(MonitorError::NotificationChannel)?;

        let now = Utc::now();
        let (from, to) = (now + self.settings.window_from, now + self.settings.window_to);
        let records = self
            .retry
            .run("Fetching towing snapshot", || {
                self.snapshots.fetch_operations_in_window(from, to)
            })
            .await
            .map_err(MonitorError::Snapshot)?;

        let dropped = self.registry.clear();
        debug!(dropped, "Registry reset for refresh");

        let mut summary = RefreshSummary {
            purged,
            fetched: records.len(),
            ..RefreshSummary::default()
        };
        for record in records {
            let op = match to_operation(record) {
                Some(op) => op,
                None => {
                    summary.rejected += 1;
                    continue;
                }
            };
            match self.registry.upsert(op).await {
                Some(_) => summary.admitted += 1,
                None => summary.completed += 1,
            }
        }
        Ok(summary)
    }

    /// Handle one raw payload from the notification channel
    pub async fn process_payload(&self, payload: &str) -> Outcome {
        let span = info_span!("notification", message_id = %Uuid::new_v4());
        async {
            trace!(payload, "Notification received");
            let notification = match parse_notification(payload) {
                Ok(Some(notification)) => notification,
                Ok(None) => {
                    trace!("Not a towing change, ignored");
                    return Outcome::Ignored;
                }
                Err(e) => {
                    error!("Unprocessable notification: {}", e);
                    trace!(payload, "Unprocessable notification contents");
                    return Outcome::Rejected;
                }
            };

            info!(kind = notification.kind(), "Processing towing notification");
            match notification {
                TowNotification::Created(record) | TowNotification::Updated(record) => {
                    let Some(op) = to_operation(record) else {
                        return Outcome::Rejected;
                    };
                    let tow_id = op.id.clone();
                    match self.registry.upsert(op).await {
                        Some(_) => Outcome::Admitted { tow_id },
                        None => Outcome::Completed { tow_id },
                    }
                }
                TowNotification::Deleted(record) => {
                    let Some(op) = self.deleted_operation(record) else {
                        return Outcome::Rejected;
                    };
                    self.registry.remove_and_clear(&op).await;
                    Outcome::Removed { tow_id: op.id }
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Poll the channel forever, one notification at a time
    pub async fn run_listener(self: Arc<Self>) {
        info!("Notification listener started");
        loop {
            match self.notifications.next_payload(self.settings.poll_timeout).await {
                Ok(Some(payload)) => {
                    self.process_payload(&payload).await;
                }
                Ok(None) => {}
                Err(e) => {
                    error!("Notification channel error: {}", e);
                    sleep(self.settings.channel_retry_interval).await;
                }
            }
        }
    }

    /// Refresh on every interval until a refresh fails fatally
    pub async fn run_refresh_loop(self: Arc<Self>) -> MonitorError {
        loop {
            sleep(self.settings.refresh_interval).await;
            trace!("Scheduled refresh");
            match self.refresh().await {
                Ok(summary) => log_refresh(&summary),
                Err(e) if e.is_fatal() => return e,
                Err(e) => error!("Refresh abandoned: {}", e),
            }
        }
    }

    async fn clear_stale_stands(&self) {
        let Some(stands) = self.registry.dispatcher().stands() else {
            return;
        };
        match self
            .retry
            .run("Fetching stands", || self.snapshots.fetch_stands())
            .await
        {
            Ok(all) => {
                let cleared = stands.clear_flagged(&all).await;
                info!(stands = all.len(), cleared, "Stale stand alerts cleared");
            }
            Err(e) => error!("Could not read stands, stale stand alerts left in place: {}", e),
        }
    }

    async fn reconcile_recent_flights(&self) {
        let now = Utc::now();
        match self.snapshots.fetch_flights(now - self.settings.lookback, now).await {
            Ok(flights) => {
                reconcile_flights(&self.registry, &flights).await;
            }
            Err(e) => error!("Flight reconciliation abandoned: {}", e),
        }
    }

    /// Deleted notifications may carry a partial record; fall back to what
    /// is registered under the same ID.
    fn deleted_operation(&self, record: TowRecord) -> Option<TowOperation> {
        let id = record.id.clone();
        match TowOperation::try_from(record) {
            Ok(op) => Some(op),
            Err(e) => match id.as_deref().and_then(|id| self.registry.get(id)) {
                Some(registered) => Some(registered.as_ref().clone()),
                None => {
                    warn!("Deleted towing could not be resolved: {}", e);
                    None
                }
            },
        }
    }
}

fn to_operation(record: TowRecord) -> Option<TowOperation> {
    match TowOperation::try_from(record.clone()) {
        Ok(op) => Some(op),
        Err(e) => {
            error!("Skipping towing record: {}", e);
            let contents = serde_json::to_string(&record).unwrap_or_default();
            trace!(record = %contents, "Skipped towing record");
            None
        }
    }
}

fn log_refresh(summary: &RefreshSummary) {
    info!(
        purged = summary.purged,
        fetched = summary.fetched,
        admitted = summary.admitted,
        completed = summary.completed,
        rejected = summary.rejected,
        "Tow registry refreshed"
    );
}
