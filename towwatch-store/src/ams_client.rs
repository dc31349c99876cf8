//! REST adapter for the airport management system: snapshot reads and
//! custom field writes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use towwatch_core::{AlertSink, PortError, PortResult, SnapshotSource};
use towwatch_shared::{FlightRef, StandRecord, TowRecord};
use tracing::{debug, trace};

use crate::app_config::{AmsConfig, StandsConfig};

const PATH_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CustomField {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// Stand as the AMS serves it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StandResource {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,
    #[serde(default)]
    pub custom_fields: Vec<CustomField>,
}

impl StandResource {
    fn field(&self, name: &str) -> Option<&str> {
        self.custom_fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }
}

pub struct AmsClient {
    client: Client,
    base: String,
    token: String,
    stand_tow_id_field: String,
    stand_alert_field: String,
}

impl AmsClient {
    pub fn new(ams: &AmsConfig, stands: &StandsConfig) -> PortResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PortError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base: format!("{}/{}", ams.base_uri.trim_end_matches('/'), ams.airport_code),
            token: ams.token.clone(),
            stand_tow_id_field: stands.tow_id_field.clone(),
            stand_alert_field: stands.alert_field.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> PortResult<T> {
        let url = self.url(path);
        trace!(%url, "GET");
        let response = self
            .client
            .get(&url)
            .header("Authorization", &self.token)
            .send()
            .await
            .map_err(|e| PortError::Transport(format!("GET {}: {}", url, e)))?;

        let body = check(response, &url)
            .await?
            .text()
            .await
            .map_err(|e| PortError::Transport(format!("GET {}: {}", url, e)))?;
        serde_json::from_str(&body).map_err(|e| PortError::Malformed(format!("GET {}: {}", url, e)))
    }

    async fn put_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> PortResult<()> {
        let url = self.url(path);
        trace!(%url, "PUT");
        let response = self
            .client
            .put(&url)
            .header("Authorization", &self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| PortError::Transport(format!("PUT {}: {}", url, e)))?;

        check(response, &url).await?;
        Ok(())
    }

    pub fn stand_from_resource(&self, resource: StandResource) -> StandRecord {
        let tow_alert = resource
            .field(&self.stand_alert_field)
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let alert_tow_id = resource
            .field(&self.stand_tow_id_field)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        StandRecord {
            id: resource.id,
            name: resource.name,
            sort_order: resource.sort_order,
            area: resource.area,
            tow_alert,
            alert_tow_id,
        }
    }

    pub fn stand_resource(&self, stand: &StandRecord, tow_id: Option<&str>, alerted: bool) -> StandResource {
        StandResource {
            id: stand.id.clone(),
            name: stand.name.clone(),
            sort_order: stand.sort_order.clone(),
            area: stand.area.clone(),
            custom_fields: vec![
                CustomField {
                    name: self.stand_tow_id_field.clone(),
                    value: tow_id.unwrap_or_default().to_string(),
                },
                CustomField {
                    name: self.stand_alert_field.clone(),
                    value: alerted.to_string(),
                },
            ],
        }
    }
}

async fn check(response: Response, url: &str) -> PortResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let detail = format!("{} returned {}: {}", url, status, text.trim());
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PortError::Auth(detail),
        StatusCode::NOT_FOUND => PortError::NotFound(detail),
        _ => PortError::Transport(detail),
    })
}

fn window(from: DateTime<Utc>, to: DateTime<Utc>) -> String {
    format!("{}/{}", from.format(PATH_TIME_FORMAT), to.format(PATH_TIME_FORMAT))
}

#[async_trait]
impl SnapshotSource for AmsClient {
    async fn fetch_operations_in_window(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> PortResult<Vec<TowRecord>> {
        let records: Vec<TowRecord> = self.get_json(&format!("Towings/{}", window(from, to))).await?;
        debug!(count = records.len(), "Fetched towing snapshot");
        Ok(records)
    }

    async fn fetch_stands(&self) -> PortResult<Vec<StandRecord>> {
        let resources: Vec<StandResource> = self.get_json("Stands").await?;
        Ok(resources
            .into_iter()
            .map(|r| self.stand_from_resource(r))
            .collect())
    }

    async fn fetch_flights(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> PortResult<Vec<FlightRef>> {
        self.get_json(&format!("Flights/{}", window(from, to))).await
    }
}

#[async_trait]
impl AlertSink for AmsClient {
    async fn set_flight_custom_field(&self, flight: &FlightRef, field: &str, value: &str) -> PortResult<()> {
        let path = format!(
            "Flights/{}/{}/{}/{}/CustomFields",
            flight.nature.as_str(),
            flight.airline_code,
            flight.flight_number,
            flight.scheduled_date.format("%Y-%m-%d")
        );
        let body = CustomField {
            name: field.to_string(),
            value: value.to_string(),
        };
        self.put_json(&path, &body).await
    }

    async fn set_stand_custom_fields(&self, stand: &StandRecord, tow_id: Option<&str>, alerted: bool) -> PortResult<()> {
        let body = self.stand_resource(stand, tow_id, alerted);
        self.put_json(&format!("Stands/{}", stand.id), &body).await
    }
}
