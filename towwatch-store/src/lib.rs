pub mod ams_client;
pub mod app_config;
pub mod notifications;

pub use ams_client::AmsClient;
pub use notifications::KafkaNotifications;
