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

//! Current weather for a single location from the OpenWeatherMap API.

use crate::client::{self, ClientError};
use crate::json;
use reqwest::{Client, Url};
use serde_json::Value;
use std::time::Duration;

/// Configuration for a `WeatherClient`.
#[derive(Debug, Clone)]
pub struct WeatherConfig {
    pub api_url: String,
    pub api_key: String,
    pub location_id: String,
    pub timeout: Duration,
}

/// Current conditions at the configured location.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeatherSnapshot {
    /// Degrees celsius
    pub temperature: f64,
    /// Relative humidity (0-100)
    pub humidity: f64,
    /// Hectopascals
    pub pressure: f64,
}

#[derive(Debug)]
pub struct WeatherClient {
    client: Client,
    url: Url,
    /// `url` without the API key, used in errors and logs
    redacted: Url,
}

impl WeatherClient {
    pub fn new(cfg: WeatherConfig) -> Result<Self, ClientError> {
        let mut redacted = client::parse_url(&cfg.api_url)?;
        redacted
            .query_pairs_mut()
            .append_pair("id", &cfg.location_id)
            .append_pair("units", "metric");

        let mut url = redacted.clone();
        url.query_pairs_mut().append_pair("appid", &cfg.api_key);

        Ok(WeatherClient {
            client: client::http_client(cfg.timeout)?,
            url,
            redacted,
        })
    }

    pub async fn weather(&self) -> Result<WeatherSnapshot, ClientError> {
        tracing::debug!(message = "making current weather request", url = %self.redacted);

        let req = self.client.get(self.url.clone());
        let body = client::fetch(req, &self.redacted).await?;
        parse_weather(&body)
    }
}

/// Parse a current weather response. Temperature, humidity, and pressure are all required.
pub fn parse_weather(body: &[u8]) -> Result<WeatherSnapshot, ClientError> {
    let doc: Value = serde_json::from_slice(body)?;

    Ok(WeatherSnapshot {
        temperature: json::f64_at(&doc, &["main", "temp"]).ok_or(ClientError::MissingField("main.temp"))?,
        humidity: json::f64_at(&doc, &["main", "humidity"]).ok_or(ClientError::MissingField("main.humidity"))?,
        pressure: json::f64_at(&doc, &["main", "pressure"]).ok_or(ClientError::MissingField("main.pressure"))?,
    })
}
