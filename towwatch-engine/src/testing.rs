//! In-memory fakes for the ports, shared by the engine's unit tests and the
//! service's integration tests (`test-support` feature).

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use towwatch_core::{AlertSink, NotificationSource, PortError, PortResult, SnapshotSource};
use towwatch_shared::{FlightNature, FlightRef, StandRecord, TowOperation, TowRecord};

/// A write accepted by [`RecordingSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Flight {
        flight: FlightRef,
        field: String,
        value: String,
    },
    Stand {
        stand_id: String,
        tow_id: Option<String>,
        alerted: bool,
    },
}

/// Records every accepted write. Can be told to reject the next N attempts.
#[derive(Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
    attempts: AtomicUsize,
    failures_left: AtomicUsize,
    always_fail: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(times: usize) -> Self {
        let sink = Self::default();
        sink.failures_left.store(times, Ordering::SeqCst);
        sink
    }

    pub fn broken() -> Self {
        let sink = Self::default();
        sink.always_fail.store(true, Ordering::SeqCst);
        sink
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Values written to `flight`, in order
    pub fn flight_values(&self, flight: &FlightRef) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                SinkCall::Flight { flight: f, value, .. } if &f == flight => Some(value),
                _ => None,
            })
            .collect()
    }

    pub fn stand_calls(&self) -> Vec<SinkCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, SinkCall::Stand { .. }))
            .collect()
    }

    pub fn reset(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn should_fail(&self) -> bool {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.always_fail.load(Ordering::SeqCst) {
            return true;
        }
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl AlertSink for RecordingSink {
    async fn set_flight_custom_field(&self, flight: &FlightRef, field: &str, value: &str) -> PortResult<()> {
        if self.should_fail() {
            return Err(PortError::Transport("connection refused".to_string()));
        }
        self.calls.lock().unwrap().push(SinkCall::Flight {
            flight: flight.clone(),
            field: field.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    async fn set_stand_custom_fields(&self, stand: &StandRecord, tow_id: Option<&str>, alerted: bool) -> PortResult<()> {
        if self.should_fail() {
            return Err(PortError::Transport("connection refused".to_string()));
        }
        self.calls.lock().unwrap().push(SinkCall::Stand {
            stand_id: stand.id.clone(),
            tow_id: tow_id.map(str::to_string),
            alerted,
        });
        Ok(())
    }
}

/// Serves fixed snapshot data
#[derive(Default)]
pub struct StaticSnapshots {
    pub operations: Mutex<Vec<TowRecord>>,
    pub stands: Mutex<Vec<StandRecord>>,
    pub flights: Mutex<Vec<FlightRef>>,
    failures_left: AtomicUsize,
    fetches: AtomicUsize,
}

impl StaticSnapshots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_operations(operations: Vec<TowRecord>) -> Self {
        let source = Self::default();
        *source.operations.lock().unwrap() = operations;
        source
    }

    pub fn with_stands(stands: Vec<StandRecord>) -> Self {
        let source = Self::default();
        *source.stands.lock().unwrap() = stands;
        source
    }

    /// Fail the next `times` fetches of any kind
    pub fn fail_next(&self, times: usize) {
        self.failures_left.store(times, Ordering::SeqCst);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn check(&self) -> PortResult<()> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        match self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        {
            Ok(_) => Err(PortError::Auth("401 Unauthorized".to_string())),
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl SnapshotSource for StaticSnapshots {
    async fn fetch_operations_in_window(&self, _from: DateTime<Utc>, _to: DateTime<Utc>) -> PortResult<Vec<TowRecord>> {
        self.check()?;
        Ok(self.operations.lock().unwrap().clone())
    }

    async fn fetch_stands(&self) -> PortResult<Vec<StandRecord>> {
        self.check()?;
        Ok(self.stands.lock().unwrap().clone())
    }

    async fn fetch_flights(&self, _from: DateTime<Utc>, _to: DateTime<Utc>) -> PortResult<Vec<FlightRef>> {
        self.check()?;
        Ok(self.flights.lock().unwrap().clone())
    }
}

/// A queue of payloads standing in for the notification channel
#[derive(Default)]
pub struct QueuedNotifications {
    backlog: Mutex<VecDeque<String>>,
    purges: AtomicUsize,
    broken: AtomicBool,
}

impl QueuedNotifications {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, payload: impl Into<String>) {
        self.backlog.lock().unwrap().push_back(payload.into());
    }

    pub fn pending(&self) -> usize {
        self.backlog.lock().unwrap().len()
    }

    pub fn purges(&self) -> usize {
        self.purges.load(Ordering::SeqCst)
    }

    /// Make every subsequent call fail as if the channel were gone
    pub fn break_channel(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl NotificationSource for QueuedNotifications {
    async fn purge(&self) -> PortResult<usize> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(PortError::Resource("notification queue missing".to_string()));
        }
        self.purges.fetch_add(1, Ordering::SeqCst);
        let mut backlog = self.backlog.lock().unwrap();
        let dropped = backlog.len();
        backlog.clear();
        Ok(dropped)
    }

    async fn next_payload(&self, timeout: std::time::Duration) -> PortResult<Option<String>> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(PortError::Resource("notification queue missing".to_string()));
        }
        let next = self.backlog.lock().unwrap().pop_front();
        if next.is_none() {
            tokio::time::sleep(timeout).await;
        }
        Ok(next)
    }
}

pub fn flight(nature: FlightNature, number: &str) -> FlightRef {
    FlightRef::new(
        nature,
        "EY",
        number,
        NaiveDate::from_ymd_opt(2026, 10, 18).unwrap(),
    )
}

/// Operation with start/end relative to now
pub fn operation(
    id: &str,
    start_offset: Duration,
    end_offset: Duration,
    actual_start: bool,
    actual_end: bool,
    flights: Vec<FlightRef>,
) -> TowOperation {
    let now = Utc::now();
    TowOperation {
        id: id.to_string(),
        scheduled_start: now + start_offset,
        scheduled_end: now + end_offset,
        actual_start_confirmed: actual_start,
        actual_end_confirmed: actual_end,
        flights,
        from_stand: None,
        to_stand: None,
    }
}

/// Wire form of [`operation`]
pub fn record(
    id: &str,
    start_offset: Duration,
    end_offset: Duration,
    actual_start: bool,
    actual_end: bool,
    flights: Vec<FlightRef>,
) -> TowRecord {
    let now = Utc::now();
    let actual = |set: bool| set.then(|| now.to_rfc3339());
    TowRecord {
        id: Some(id.to_string()),
        scheduled_start: Some((now + start_offset).to_rfc3339()),
        scheduled_end: Some((now + end_offset).to_rfc3339()),
        actual_start: actual(actual_start),
        actual_end: actual(actual_end),
        flights,
        from_stand: None,
        to_stand: None,
    }
}

pub fn stand(id: &str, name: &str, tow_alert: bool, owner: Option<&str>) -> StandRecord {
    StandRecord {
        id: id.to_string(),
        name: name.to_string(),
        sort_order: Some("10".to_string()),
        area: Some("Apron A".to_string()),
        tow_alert,
        alert_tow_id: owner.map(str::to_string),
    }
}
