use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use towwatch_shared::{FlightRef, StandRecord, TowRecord};

use crate::PortResult;

/// Where full snapshots of towings, stands and flights come from
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_operations_in_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> PortResult<Vec<TowRecord>>;

    async fn fetch_stands(&self) -> PortResult<Vec<StandRecord>>;

    async fn fetch_flights(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> PortResult<Vec<FlightRef>>;

    /// Look a stand up by its name. The source has no keyed lookup, so the
    /// default implementation scans the full list.
    async fn find_stand(&self, name: &str) -> PortResult<Option<StandRecord>> {
        let stands = self.fetch_stands().await?;
        Ok(stands.into_iter().find(|s| s.name == name))
    }
}

/// Inbound channel of raw towing notifications
#[async_trait]
pub trait NotificationSource: Send + Sync {
    /// Discard everything currently waiting on the channel
    async fn purge(&self) -> PortResult<usize>;

    /// Wait up to `timeout` for the next payload
    async fn next_payload(&self, timeout: Duration) -> PortResult<Option<String>>;
}

/// The external system holding the alert flags
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn set_flight_custom_field(
        &self,
        flight: &FlightRef,
        field: &str,
        value: &str,
    ) -> PortResult<()>;

    /// Write the stand's tow-ID and alert fields. `tow_id` is `None` when
    /// clearing.
    async fn set_stand_custom_fields(
        &self,
        stand: &StandRecord,
        tow_id: Option<&str>,
        alerted: bool,
    ) -> PortResult<()>;
}
