use serde::{Deserialize, Serialize};
use std::fmt;

/// A parking stand as seen by the alerting side. `tow_alert` and
/// `alert_tow_id` mirror the two stand custom fields we write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StandRecord {
    pub id: String,
    pub name: String,
    pub sort_order: Option<String>,
    pub area: Option<String>,
    pub tow_alert: bool,
    pub alert_tow_id: Option<String>,
}

impl StandRecord {
    /// The operation currently holding this stand's alert, if any
    pub fn owner(&self) -> Option<&str> {
        self.alert_tow_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
    }

    /// True when another operation holds the stand's alert
    pub fn is_owned_by_other(&self, tow_id: &str) -> bool {
        self.owner().map(|owner| owner != tow_id).unwrap_or(false)
    }

    /// Left over state from an earlier run
    pub fn needs_clearing(&self) -> bool {
        self.tow_alert || self.owner().is_some()
    }
}

impl fmt::Display for StandRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Stand {} ({}) alert={} owner={}",
            self.name,
            self.id,
            self.tow_alert,
            self.owner().unwrap_or("-")
        )
    }
}
