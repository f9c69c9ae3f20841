// nest_exporter - Prometheus metrics exporter for Nest devices
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

//! Thermostat readings from the Smart Device Management API.

use crate::client::{self, ClientError};
use crate::json;
use crate::oauth::{OAuthCredentials, TokenSource};
use reqwest::{Client, Url};
use serde_json::Value;
use std::time::Duration;

const THERMOSTAT_TYPE: &str = "sdm.devices.types.THERMOSTAT";
const ROOM_SEGMENT: &str = "/rooms/";

const TRAIT_INFO: &str = "sdm.devices.traits.Info";
const TRAIT_CONNECTIVITY: &str = "sdm.devices.traits.Connectivity";
const TRAIT_TEMPERATURE: &str = "sdm.devices.traits.Temperature";
const TRAIT_HUMIDITY: &str = "sdm.devices.traits.Humidity";
const TRAIT_SETPOINT: &str = "sdm.devices.traits.ThermostatTemperatureSetpoint";
const TRAIT_HVAC: &str = "sdm.devices.traits.ThermostatHvac";

/// Configuration for a `NestClient`.
#[derive(Debug, Clone)]
pub struct NestConfig {
    pub api_url: String,
    pub token_url: String,
    pub project_id: String,
    pub credentials: OAuthCredentials,
    /// Pre-issued access token to use instead of the refresh token grant.
    pub access_token: Option<String>,
    pub timeout: Duration,
}

/// Current activity of the HVAC system controlled by a thermostat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HvacStatus {
    Off,
    Heating,
    Cooling,
    Unknown,
}

impl HvacStatus {
    fn from_api(status: Option<&str>) -> Self {
        match status {
            Some("OFF") => Self::Off,
            Some("HEATING") => Self::Heating,
            Some("COOLING") => Self::Cooling,
            _ => Self::Unknown,
        }
    }

    pub fn is_heating(self) -> bool {
        self == Self::Heating
    }

    pub fn is_cooling(self) -> bool {
        self == Self::Cooling
    }
}

/// State of a single thermostat.
///
/// Physical readings are only meaningful when `online` is true.
#[derive(Debug, Clone, PartialEq)]
pub struct Thermostat {
    pub id: String,
    pub label: String,
    pub room: String,
    pub online: bool,
    pub ambient_temperature: Option<f64>,
    pub humidity: Option<f64>,
    /// Absent when the thermostat mode doesn't use a heat setpoint (e.g. OFF or COOL).
    pub heat_setpoint: Option<f64>,
    /// Absent when the thermostat mode doesn't use a cool setpoint (e.g. OFF or HEAT).
    pub cool_setpoint: Option<f64>,
    pub hvac_status: HvacStatus,
}

/// Client for listing thermostats of a Device Access project.
#[derive(Debug)]
pub struct NestClient {
    client: Client,
    tokens: TokenSource,
    devices_url: Url,
}

impl NestClient {
    pub fn new(cfg: NestConfig) -> Result<Self, ClientError> {
        let api_url = client::parse_url(&cfg.api_url)?;
        let token_url = client::parse_url(&cfg.token_url)?;
        let devices_url = client::join_path(&api_url, &["enterprises", cfg.project_id.as_str(), "devices", ""])?;
        let client = client::http_client(cfg.timeout)?;

        let mut tokens = TokenSource::new(client.clone(), token_url, cfg.credentials);
        if let Some(token) = cfg.access_token {
            tokens = tokens.with_static_token(token);
        }

        Ok(NestClient {
            client,
            tokens,
            devices_url,
        })
    }

    /// Fetch the current state of every thermostat in the project.
    pub async fn thermostats(&self) -> Result<Vec<Thermostat>, ClientError> {
        let token = self
            .tokens
            .access_token()
            .await
            .map_err(|e| ClientError::Authentication(Box::new(e)))?;

        tracing::debug!(message = "making devices request", url = %self.devices_url);
        let req = self.client.get(self.devices_url.clone()).bearer_auth(token);
        let body = client::fetch(req, &self.devices_url).await?;
        parse_devices(&body)
    }
}

/// Parse a device list response, skipping any device that isn't a thermostat.
///
/// Returns `ClientError::NoValidDevices` if the response contained no thermostats.
pub fn parse_devices(body: &[u8]) -> Result<Vec<Thermostat>, ClientError> {
    let doc: Value = serde_json::from_slice(body)?;
    let thermostats: Vec<Thermostat> = json::array_at(&doc, &["devices"])
        .iter()
        .filter(|d| json::str_at(d, &["type"]) == Some(THERMOSTAT_TYPE))
        .map(parse_thermostat)
        .collect();

    if thermostats.is_empty() {
        return Err(ClientError::NoValidDevices);
    }

    Ok(thermostats)
}

fn parse_thermostat(device: &Value) -> Thermostat {
    let traits = |name: &str, field: &str| -> Option<f64> { json::f64_at(device, &["traits", name, field]) };

    Thermostat {
        id: json::string_or_empty(device, &["name"]),
        label: json::string_or_empty(device, &["traits", TRAIT_INFO, "customName"]),
        room: room_name(device),
        online: json::str_at(device, &["traits", TRAIT_CONNECTIVITY, "status"]) == Some("ONLINE"),
        ambient_temperature: traits(TRAIT_TEMPERATURE, "ambientTemperatureCelsius"),
        humidity: traits(TRAIT_HUMIDITY, "ambientHumidityPercent"),
        heat_setpoint: traits(TRAIT_SETPOINT, "heatCelsius"),
        cool_setpoint: traits(TRAIT_SETPOINT, "coolCelsius"),
        hvac_status: HvacStatus::from_api(json::str_at(device, &["traits", TRAIT_HVAC, "status"])),
    }
}

/// A thermostat belongs to at most one room, found among its parent relations.
fn room_name(device: &Value) -> String {
    json::array_at(device, &["parentRelations"])
        .iter()
        .find(|rel| json::str_at(rel, &["parent"]).map_or(false, |p| p.contains(ROOM_SEGMENT)))
        .map(|rel| json::string_or_empty(rel, &["displayName"]))
        .unwrap_or_default()
}
