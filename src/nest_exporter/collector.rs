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

//! Pairs each reader with the metrics it maps onto.
//!
//! A collector never returns an error: failures of the underlying reader are logged and
//! reported through the reader's "up" gauge so that one failing API doesn't prevent the
//! others from being exported.

use crate::metrics::{NestAppMetrics, ThermostatMetrics, WeatherMetrics};
use crate::nest::NestClient;
use crate::nestapp::NestAppClient;
use crate::weather::WeatherClient;
use async_trait::async_trait;
use tracing::Instrument;

#[async_trait]
pub trait Collector: Send + Sync {
    /// Short name of the upstream API for logging.
    fn name(&self) -> &'static str;

    /// Fetch current values from the upstream API and update all metrics.
    async fn collect(&self);
}

#[derive(Debug)]
pub struct ThermostatCollector {
    client: NestClient,
    metrics: ThermostatMetrics,
}

impl ThermostatCollector {
    pub fn new(client: NestClient, metrics: ThermostatMetrics) -> Self {
        ThermostatCollector { client, metrics }
    }
}

#[async_trait]
impl Collector for ThermostatCollector {
    fn name(&self) -> &'static str {
        "nest"
    }

    async fn collect(&self) {
        match self
            .client
            .thermostats()
            .instrument(tracing::debug_span!("nest_thermostats"))
            .await
        {
            Ok(thermostats) => {
                self.metrics.observe(&thermostats);
                tracing::debug!(message = "collected Nest data", thermostats = thermostats.len());
            }
            Err(e) => {
                self.metrics.failed();
                tracing::error!(message = "failed collecting Nest data", error = %e);
            }
        }
    }
}

#[derive(Debug)]
pub struct WeatherCollector {
    client: WeatherClient,
    metrics: WeatherMetrics,
}

impl WeatherCollector {
    pub fn new(client: WeatherClient, metrics: WeatherMetrics) -> Self {
        WeatherCollector { client, metrics }
    }
}

#[async_trait]
impl Collector for WeatherCollector {
    fn name(&self) -> &'static str {
        "weather"
    }

    async fn collect(&self) {
        match self
            .client
            .weather()
            .instrument(tracing::debug_span!("owm_weather"))
            .await
        {
            Ok(snapshot) => {
                self.metrics.observe(&snapshot);
                tracing::debug!(message = "collected weather data", weather = ?snapshot);
            }
            Err(e) => {
                self.metrics.failed();
                tracing::error!(message = "failed collecting weather data", error = %e);
            }
        }
    }
}

#[derive(Debug)]
pub struct NestAppCollector {
    client: NestAppClient,
    metrics: NestAppMetrics,
}

impl NestAppCollector {
    pub fn new(client: NestAppClient, metrics: NestAppMetrics) -> Self {
        NestAppCollector { client, metrics }
    }
}

#[async_trait]
impl Collector for NestAppCollector {
    fn name(&self) -> &'static str {
        "nest_app"
    }

    async fn collect(&self) {
        match self
            .client
            .readings()
            .instrument(tracing::debug_span!("nest_app_readings"))
            .await
        {
            Ok(readings) => {
                self.metrics.observe(&readings);
                tracing::debug!(
                    message = "collected Nest app data",
                    structures = readings.structures.len(),
                    sensors = readings.sensors.len(),
                );
            }
            Err(e) => {
                self.metrics.failed();
                tracing::error!(message = "failed collecting Nest app data", error = %e);
            }
        }
    }
}
