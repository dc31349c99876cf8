pub mod error;
pub mod monitor;
pub mod settings;

pub use error::{MonitorError, SettingsError};
pub use monitor::{MonitorHandles, MonitorSettings, Outcome, RefreshSummary, TowMonitor};
