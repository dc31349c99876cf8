use serde::Deserialize;

use super::tow::TowRecord;
use crate::ParseError;

pub const CREATED: &str = "TowingCreatedNotification";
pub const UPDATED: &str = "TowingUpdatedNotification";
pub const DELETED: &str = "TowingDeletedNotification";

/// A towing change pushed by the source system
#[derive(Debug, Clone)]
pub enum TowNotification {
    Created(TowRecord),
    Updated(TowRecord),
    Deleted(TowRecord),
}

impl TowNotification {
    pub fn kind(&self) -> &'static str {
        match self {
            TowNotification::Created(_) => "created",
            TowNotification::Updated(_) => "updated",
            TowNotification::Deleted(_) => "deleted",
        }
    }

    pub fn record(&self) -> &TowRecord {
        match self {
            TowNotification::Created(r) | TowNotification::Updated(r) | TowNotification::Deleted(r) => r,
        }
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    towing: Option<TowRecord>,
}

/// Parse a raw notification payload.
///
/// Returns `Ok(None)` for well-formed messages that are not towing changes;
/// the channel carries other notification types that we simply ignore.
pub fn parse_notification(payload: &str) -> Result<Option<TowNotification>, ParseError> {
    let envelope: Envelope = serde_json::from_str(payload)?;

    let wrap: fn(TowRecord) -> TowNotification = match envelope.kind.as_str() {
        CREATED => TowNotification::Created,
        UPDATED => TowNotification::Updated,
        DELETED => TowNotification::Deleted,
        _ => return Ok(None),
    };

    let record = envelope.towing.ok_or(ParseError::MissingField("towing"))?;
    Ok(Some(wrap(record)))
}
