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

use crate::collector::{Collector, NestAppCollector, ThermostatCollector, WeatherCollector};
use crate::config::{ConfigError, ExporterConfig};
use crate::metrics::{NestAppMetrics, ThermostatMetrics, WeatherMetrics};
use crate::nest::NestClient;
use crate::nestapp::NestAppClient;
use crate::weather::WeatherClient;
use prometheus_client::encoding::text::encode;
use prometheus_client::registry::Registry;
use std::fmt;
use tokio::sync::Mutex;

/// Owns every configured collector and the registry their metrics are registered with.
pub struct Exporter {
    registry: Registry,
    collectors: Vec<Box<dyn Collector>>,
    scrape: Mutex<()>,
}

impl Exporter {
    /// Create collectors for each reader that is configured.
    ///
    /// Readers without credentials are skipped. A reader that is configured but can't be
    /// created (invalid URL, failed initial authentication) is an error.
    pub async fn new(cfg: &ExporterConfig) -> Result<Self, ConfigError> {
        let mut registry = Registry::default();
        let mut collectors: Vec<Box<dyn Collector>> = Vec::new();

        if let Some(nest) = cfg.nest()? {
            let client = NestClient::new(nest).map_err(|e| ConfigError::Reader("nest", e))?;
            let metrics = ThermostatMetrics::new(&mut registry, cfg.nest_label_space_to_dash);
            collectors.push(Box::new(ThermostatCollector::new(client, metrics)));
        }

        if let Some(weather) = cfg.weather() {
            let client = WeatherClient::new(weather).map_err(|e| ConfigError::Reader("weather", e))?;
            let metrics = WeatherMetrics::new(&mut registry);
            collectors.push(Box::new(WeatherCollector::new(client, metrics)));
        }

        if let Some(app) = cfg.nest_app()? {
            let client = NestAppClient::new(app)
                .await
                .map_err(|e| ConfigError::Reader("nest_app", e))?;
            let metrics = NestAppMetrics::new(&mut registry);
            collectors.push(Box::new(NestAppCollector::new(client, metrics)));
        }

        Ok(Exporter {
            registry,
            collectors,
            scrape: Mutex::new(()),
        })
    }

    /// Names of the configured collectors.
    pub fn collectors(&self) -> Vec<&'static str> {
        self.collectors.iter().map(|c| c.name()).collect()
    }

    /// Run every collector and encode the resulting metrics in the OpenMetrics text format.
    ///
    /// Scrapes are serialized so that the values set by one scrape are encoded before
    /// another scrape can replace them.
    pub async fn scrape(&self) -> Result<String, fmt::Error> {
        let _guard = self.scrape.lock().await;
        for collector in self.collectors.iter() {
            collector.collect().await;
        }

        let mut buf = String::new();
        encode(&mut buf, &self.registry)?;
        Ok(buf)
    }
}

impl fmt::Debug for Exporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exporter")
            .field("collectors", &self.collectors())
            .finish()
    }
}
