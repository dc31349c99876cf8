use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::ParseError;

/// Direction of a flight leg relative to the airport
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FlightNature {
    Arrival,
    Departure,
}

impl FlightNature {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlightNature::Arrival => "Arrival",
            FlightNature::Departure => "Departure",
        }
    }
}

/// Identifies one flight leg. Two references are the same flight when all
/// four fields match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct FlightRef {
    pub nature: FlightNature,
    pub airline_code: String,
    pub flight_number: String,
    #[serde(deserialize_with = "deserialize_scheduled_date")]
    pub scheduled_date: NaiveDate,
}

impl FlightRef {
    pub fn new(
        nature: FlightNature,
        airline_code: impl Into<String>,
        flight_number: impl Into<String>,
        scheduled_date: NaiveDate,
    ) -> Self {
        Self {
            nature,
            airline_code: airline_code.into(),
            flight_number: flight_number.into(),
            scheduled_date,
        }
    }

    pub fn is_arrival(&self) -> bool {
        self.nature == FlightNature::Arrival
    }
}

impl fmt::Display for FlightRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{} {} {}",
            self.airline_code,
            self.flight_number,
            if self.is_arrival() { "A" } else { "D" },
            self.scheduled_date
        )
    }
}

/// Accepts a plain date, a local datetime or an RFC 3339 timestamp; the
/// source system is not consistent about which one it sends.
pub fn parse_scheduled_date(value: &str) -> Result<NaiveDate, ParseError> {
    let value = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(date);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.date_naive());
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .map(|dt| dt.date())
        .map_err(|_| ParseError::InvalidDate(value.to_string()))
}

fn deserialize_scheduled_date<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_scheduled_date(&raw).map_err(serde::de::Error::custom)
}
