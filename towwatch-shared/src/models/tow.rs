use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::flight::FlightRef;
use crate::ParseError;

/// One of the two deadlines carried by a towing operation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Milestone {
    Start,
    End,
}

impl Milestone {
    pub const ALL: [Milestone; 2] = [Milestone::Start, Milestone::End];
}

impl fmt::Display for Milestone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Milestone::Start => write!(f, "start"),
            Milestone::End => write!(f, "end"),
        }
    }
}

/// Towing record as delivered by the source system, in snapshots and in
/// notifications. Every field is optional on the wire; validation happens in
/// the conversion to [`TowOperation`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TowRecord {
    pub id: Option<String>,
    pub scheduled_start: Option<String>,
    pub scheduled_end: Option<String>,
    pub actual_start: Option<String>,
    pub actual_end: Option<String>,
    #[serde(default)]
    pub flights: Vec<FlightRef>,
    pub from_stand: Option<String>,
    pub to_stand: Option<String>,
}

/// A parsed towing operation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TowOperation {
    pub id: String,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
    pub actual_start_confirmed: bool,
    pub actual_end_confirmed: bool,
    pub flights: Vec<FlightRef>,
    pub from_stand: Option<String>,
    pub to_stand: Option<String>,
}

impl TowOperation {
    /// Parse a single record from its JSON representation
    pub fn from_json(json: &str) -> Result<Self, ParseError> {
        let record: TowRecord = serde_json::from_str(json)?;
        Self::try_from(record)
    }

    pub fn scheduled(&self, milestone: Milestone) -> DateTime<Utc> {
        match milestone {
            Milestone::Start => self.scheduled_start,
            Milestone::End => self.scheduled_end,
        }
    }

    pub fn is_confirmed(&self, milestone: Milestone) -> bool {
        match milestone {
            Milestone::Start => self.actual_start_confirmed,
            Milestone::End => self.actual_end_confirmed,
        }
    }

    /// Milestones still waiting for an actual time, in start/end order
    pub fn unconfirmed_milestones(&self) -> Vec<Milestone> {
        Milestone::ALL
            .into_iter()
            .filter(|m| !self.is_confirmed(*m))
            .collect()
    }

    pub fn both_actuals_confirmed(&self) -> bool {
        self.actual_start_confirmed && self.actual_end_confirmed
    }

    /// Overdue on the start, or overdue on the end without both actuals.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        (now > self.scheduled_start && !self.actual_start_confirmed)
            || (now > self.scheduled_end && !self.both_actuals_confirmed())
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(Utc::now())
    }

    pub fn involves_flight(&self, flight: &FlightRef) -> bool {
        self.flights.iter().any(|f| f == flight)
    }
}

impl TryFrom<TowRecord> for TowOperation {
    type Error = ParseError;

    fn try_from(record: TowRecord) -> Result<Self, Self::Error> {
        let id = record
            .id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or(ParseError::MissingField("id"))?;

        let scheduled_start = parse_timestamp("scheduledStart", record.scheduled_start.as_deref())?;
        let scheduled_end = parse_timestamp("scheduledEnd", record.scheduled_end.as_deref())?;

        Ok(Self {
            id,
            scheduled_start,
            scheduled_end,
            actual_start_confirmed: is_present(record.actual_start.as_deref()),
            actual_end_confirmed: is_present(record.actual_end.as_deref()),
            flights: record.flights,
            from_stand: non_empty(record.from_stand),
            to_stand: non_empty(record.to_stand),
        })
    }
}

impl fmt::Display for TowOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flights = self
            .flights
            .iter()
            .map(|fl| format!("{}{}", fl.airline_code, fl.flight_number))
            .collect::<Vec<_>>()
            .join(",");
        write!(
            f,
            "Tow {} [{}] start {} end {} actuals {}/{}",
            self.id,
            flights,
            self.scheduled_start,
            self.scheduled_end,
            self.actual_start_confirmed,
            self.actual_end_confirmed
        )
    }
}

// An empty actual time on the wire means "not reported yet".
fn is_present(value: Option<&str>) -> bool {
    value.map(|v| !v.trim().is_empty()).unwrap_or(false)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// RFC 3339, or a bare `YYYY-MM-DDTHH:MM:SS` which is taken as UTC.
pub fn parse_timestamp(field: &'static str, value: Option<&str>) -> Result<DateTime<Utc>, ParseError> {
    let raw = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(ParseError::MissingField(field))?;

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|_| ParseError::InvalidTimestamp {
            field,
            value: raw.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn operation(start_offset: Duration, end_offset: Duration, actual_start: bool, actual_end: bool) -> TowOperation {
        let now = Utc::now();
        TowOperation {
            id: "T1".to_string(),
            scheduled_start: now + start_offset,
            scheduled_end: now + end_offset,
            actual_start_confirmed: actual_start,
            actual_end_confirmed: actual_end,
            flights: vec![],
            from_stand: None,
            to_stand: None,
        }
    }

    #[test]
    fn test_parse_full_record() {
        let json = r#"{
            "id": "T100",
            "scheduledStart": "2026-10-18T08:00:00Z",
            "scheduledEnd": "2026-10-18T08:30:00",
            "actualStart": "2026-10-18T08:02:00Z",
            "actualEnd": "",
            "flights": [
                {"nature": "Arrival", "airlineCode": "EY", "flightNumber": "101", "scheduledDate": "2026-10-18"}
            ],
            "fromStand": "A12",
            "toStand": ""
        }"#;
        let op = TowOperation::from_json(json).unwrap();

        assert_eq!(op.id, "T100");
        assert!(op.actual_start_confirmed);
        assert!(!op.actual_end_confirmed);
        assert_eq!(op.unconfirmed_milestones(), vec![Milestone::End]);
        assert_eq!(op.flights.len(), 1);
        assert_eq!(op.from_stand.as_deref(), Some("A12"));
        assert_eq!(op.to_stand, None);
        assert_eq!(op.scheduled_end.to_rfc3339(), "2026-10-18T08:30:00+00:00");
    }

    #[test]
    fn test_missing_fields_rejected() {
        let err = TowOperation::from_json(r#"{"scheduledStart":"2026-10-18T08:00:00Z"}"#).unwrap_err();
        assert!(matches!(err, ParseError::MissingField("id")));

        let err = TowOperation::from_json(r#"{"id":"T1","scheduledStart":"2026-10-18T08:00:00Z"}"#).unwrap_err();
        assert!(matches!(err, ParseError::MissingField("scheduledEnd")));

        let err = TowOperation::from_json(r#"{"id":"T1","scheduledStart":"soon","scheduledEnd":"later"}"#).unwrap_err();
        assert!(matches!(err, ParseError::InvalidTimestamp { field: "scheduledStart", .. }));
    }

    #[test]
    fn test_is_active() {
        // Start overdue, nothing confirmed
        assert!(operation(Duration::minutes(-5), Duration::hours(1), false, false).is_active());
        // Start confirmed, end not yet due
        assert!(!operation(Duration::minutes(-5), Duration::hours(1), true, false).is_active());
        // Start confirmed, end overdue
        assert!(operation(Duration::hours(-2), Duration::minutes(-1), true, false).is_active());
        // Everything confirmed
        assert!(!operation(Duration::hours(-2), Duration::minutes(-1), true, true).is_active());
        // Nothing due yet
        assert!(!operation(Duration::minutes(5), Duration::hours(1), false, false).is_active());
    }

    #[test]
    fn test_end_confirmed_without_start_is_not_both() {
        let op = operation(Duration::hours(-2), Duration::hours(-1), false, true);
        assert!(!op.both_actuals_confirmed());
        assert!(op.is_active());
        assert_eq!(op.unconfirmed_milestones(), vec![Milestone::Start]);
    }
}
