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

//! Prometheus metrics exporter for Nest thermostats, temperature sensors, and local weather
//!
//! ## Features
//!
//! `nest_exporter` fetches data from up to three APIs each time it is scraped and emits the
//! results as Prometheus metrics. Each API is optional and is only used when credentials for
//! it are provided. When an API can't be reached, its `up` metric is set to `0` and no other
//! metrics are emitted for it during that scrape.
//!
//! ### Thermostats ([Smart Device Management API])
//!
//! * `nest_up` - Was talking to the Nest API successful.
//! * `nest_online{id, room, label}` - Is the thermostat online.
//! * `nest_ambient_temperature_celsius{id, room, label}` - Inside temperature.
//! * `nest_setpoint_temperature_celsius{id, room, label}` - Heating setpoint, when heating is enabled.
//! * `nest_cool_setpoint_temperature_celsius{id, room, label}` - Cooling setpoint, when cooling is enabled.
//! * `nest_humidity_percent{id, room, label}` - Inside humidity.
//! * `nest_heating{id, room, label}` - Is the thermostat heating.
//! * `nest_cooling{id, room, label}` - Is the thermostat cooling.
//!
//! Only `nest_online` is emitted for offline thermostats.
//!
//! ### Weather ([OpenWeatherMap])
//!
//! * `nest_weather_up` - Was talking to the OpenWeatherMap API successful.
//! * `nest_weather_temperature_celsius` - Outside temperature.
//! * `nest_weather_humidity_percent` - Outside humidity.
//! * `nest_weather_pressure_hectopascal` - Outside pressure.
//!
//! ### Temperature sensors (Nest app API)
//!
//! * `nest_app_up` - Was talking to the Nest app API successful.
//! * `nest_temp_sensor_temperature_celsius{serial, structure, where}` - Sensor temperature.
//! * `nest_temp_sensor_battery{serial, structure, where}` - Sensor battery level (0-100).
//! * `nest_temp_sensor_last_updated_timestamp_seconds{serial, structure, where}` - Last sensor update.
//! * `nest_outside_temperature_celsius{id, name}` - Outside temperature of a structure.
//!
//! [Smart Device Management API]: https://developers.google.com/nest/device-access/api
//! [OpenWeatherMap]: https://openweathermap.org/current
//!
//! ## Usage
//!
//! ### Thermostats
//!
//! Thermostat metrics require a [Device Access] project along with the OAuth client ID,
//! client secret, and refresh token created while setting it up.
//!
//! ```text
//! ./nest_exporter --nest-project-id $PROJECT_ID --nest-client-id $CLIENT_ID \
//!     --nest-client-secret $CLIENT_SECRET --nest-refresh-token $REFRESH_TOKEN
//! ```
//!
//! [Device Access]: https://developers.google.com/nest/device-access/get-started
//!
//! ### Weather
//!
//! Weather metrics require an OpenWeatherMap API key and the ID of a city.
//!
//! ```text
//! ./nest_exporter --owm-auth $API_KEY --owm-location 2643743
//! ```
//!
//! ### Temperature sensors
//!
//! Temperature sensors aren't available via the Smart Device Management API. They are read
//! from the API used by the Nest mobile app instead, which requires the `issueToken` URL and
//! cookies of a Google account session logged in to `home.nest.com`. Both must be provided.
//!
//! ```text
//! ./nest_exporter --nest-google-auth-url "$ISSUE_TOKEN_URL" --nest-google-auth-cookies "$COOKIES"
//! ```
//!
//! ### Prometheus
//!
//! Prometheus metrics are exposed on port `9777` at `/metrics`. Once `nest_exporter`
//! is running, configure scrapes of it by your Prometheus server. Add the host running
//! `nest_exporter` as a target under the Prometheus `scrape_configs` section as described by
//! the example below.
//!
//! ```yaml
//! # Sample config for Prometheus.
//!
//! global:
//!   scrape_interval:     1m
//!   evaluation_interval: 1m
//!   external_labels:
//!     monitor: 'my_prom'
//!
//! scrape_configs:
//! - job_name: nest_exporter
//!   static_configs:
//!   - targets: ['example:9777']
//! ```
//!

pub mod client;
pub mod collector;
pub mod config;
pub mod exporter;
pub mod http;
pub mod json;
pub mod metrics;
pub mod nest;
pub mod nestapp;
pub mod oauth;
pub mod weather;
