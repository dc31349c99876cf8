pub mod models;

pub use models::flight::{FlightNature, FlightRef};
pub use models::notification::{parse_notification, TowNotification};
pub use models::stand::StandRecord;
pub use models::tow::{Milestone, TowOperation, TowRecord};

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Invalid timestamp in {field}: {value}")]
    InvalidTimestamp {
        field: &'static str,
        value: String,
    },

    #[error("Invalid date: {0}")]
    InvalidDate(String),
}
