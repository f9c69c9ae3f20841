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

use crate::client::ClientError;
use crate::nest::NestConfig;
use crate::nestapp::NestAppConfig;
use crate::oauth::OAuthCredentials;
use crate::weather::WeatherConfig;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TIMEOUT_MILLIS: u64 = 5000;
pub const DEFAULT_NEST_API_URL: &str = "https://smartdevicemanagement.googleapis.com/v1/";
pub const DEFAULT_NEST_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_WEATHER_API_URL: &str = "https://api.openweathermap.org/data/2.5/weather";
pub const DEFAULT_WEATHER_LOCATION: &str = "2643743";
pub const DEFAULT_NEST_APP_JWT_URL: &str = "https://nestauthproxyservice-pa.googleapis.com/v1/issue_jwt";
pub const DEFAULT_NEST_APP_API_URL: &str = "https://home.nest.com/";

/// Errors that prevent the exporter from starting.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Nest project ID provided, but no refresh token provided")]
    MissingRefreshToken,

    #[error("Google auth URL for the Nest app provided, but no cookies provided")]
    MissingAppCookies,

    #[error("cookies for the Nest app provided, but the Google auth URL not provided")]
    MissingAppAuthUrl,

    #[error("unable to create {0} reader: {1}")]
    Reader(&'static str, #[source] ClientError),
}

/// Settings for every reader. Optional credentials that are missing or empty disable
/// the corresponding reader.
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    pub timeout: Duration,
    pub nest_api_url: String,
    pub nest_token_url: String,
    pub nest_client_id: Option<String>,
    pub nest_client_secret: Option<String>,
    pub nest_project_id: Option<String>,
    pub nest_refresh_token: Option<String>,
    /// Pre-issued access token, bypasses the refresh token grant
    pub nest_access_token: Option<String>,
    pub nest_label_space_to_dash: bool,
    pub weather_api_url: String,
    pub weather_api_key: Option<String>,
    pub weather_location: String,
    pub app_auth_url: Option<String>,
    pub app_auth_cookies: Option<String>,
    pub app_jwt_url: String,
    pub app_api_url: String,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        ExporterConfig {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MILLIS),
            nest_api_url: DEFAULT_NEST_API_URL.to_owned(),
            nest_token_url: DEFAULT_NEST_TOKEN_URL.to_owned(),
            nest_client_id: None,
            nest_client_secret: None,
            nest_project_id: None,
            nest_refresh_token: None,
            nest_access_token: None,
            nest_label_space_to_dash: false,
            weather_api_url: DEFAULT_WEATHER_API_URL.to_owned(),
            weather_api_key: None,
            weather_location: DEFAULT_WEATHER_LOCATION.to_owned(),
            app_auth_url: None,
            app_auth_cookies: None,
            app_jwt_url: DEFAULT_NEST_APP_JWT_URL.to_owned(),
            app_api_url: DEFAULT_NEST_APP_API_URL.to_owned(),
        }
    }
}

fn present(v: &Option<String>) -> Option<&str> {
    v.as_deref().filter(|s| !s.is_empty())
}

impl ExporterConfig {
    /// Thermostat reader settings, `None` if no project ID is configured.
    pub fn nest(&self) -> Result<Option<NestConfig>, ConfigError> {
        let project_id = match present(&self.nest_project_id) {
            Some(p) => p,
            None => return Ok(None),
        };

        let access_token = present(&self.nest_access_token).map(str::to_owned);
        let refresh_token = present(&self.nest_refresh_token).unwrap_or_default();
        if refresh_token.is_empty() && access_token.is_none() {
            return Err(ConfigError::MissingRefreshToken);
        }

        Ok(Some(NestConfig {
            api_url: self.nest_api_url.clone(),
            token_url: self.nest_token_url.clone(),
            project_id: project_id.to_owned(),
            credentials: OAuthCredentials {
                client_id: present(&self.nest_client_id).unwrap_or_default().to_owned(),
                client_secret: present(&self.nest_client_secret).unwrap_or_default().to_owned(),
                refresh_token: refresh_token.to_owned(),
            },
            access_token,
            timeout: self.timeout,
        }))
    }

    /// Weather reader settings, `None` if no API key is configured.
    pub fn weather(&self) -> Option<WeatherConfig> {
        present(&self.weather_api_key).map(|key| WeatherConfig {
            api_url: self.weather_api_url.clone(),
            api_key: key.to_owned(),
            location_id: self.weather_location.clone(),
            timeout: self.timeout,
        })
    }

    /// Nest app reader settings, `None` if neither the auth URL nor cookies are configured.
    ///
    /// Configuring only one of them is an error.
    pub fn nest_app(&self) -> Result<Option<NestAppConfig>, ConfigError> {
        match (present(&self.app_auth_url), present(&self.app_auth_cookies)) {
            (None, None) => Ok(None),
            (Some(_), None) => Err(ConfigError::MissingAppCookies),
            (None, Some(_)) => Err(ConfigError::MissingAppAuthUrl),
            (Some(url), Some(cookies)) => Ok(Some(NestAppConfig {
                auth_url: url.to_owned(),
                auth_cookies: cookies.to_owned(),
                jwt_url: self.app_jwt_url.clone(),
                api_url: self.app_api_url.clone(),
                timeout: self.timeout,
            })),
        }
    }
}
