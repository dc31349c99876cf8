use towwatch_core::PortError;

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("notification channel not accessible or readable: {0}")]
    NotificationChannel(#[source] PortError),

    #[error("towing snapshot unavailable: {0}")]
    Snapshot(#[source] PortError),
}

impl MonitorError {
    /// The process cannot keep its alerts correct without the channel
    pub fn is_fatal(&self) -> bool {
        matches!(self, MonitorError::NotificationChannel(_))
    }

    /// Operator guidance logged before a fatal exit
    pub fn remediation(&self) -> &'static str {
        match self {
            MonitorError::NotificationChannel(_) => {
                "Check the notification topic exists and the consumer group may read from it"
            }
            MonitorError::Snapshot(_) => "Check the AMS REST service and access token",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("{key} = {value} hours is out of range")]
    HoursOutOfRange { key: &'static str, value: i64 },
}
