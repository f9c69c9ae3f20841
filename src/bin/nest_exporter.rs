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

use clap::Parser;
use nest_exporter::config::{self, ExporterConfig};
use nest_exporter::exporter::Exporter;
use nest_exporter::http::RequestContext;
use std::error::Error;
use std::io;
use std::net::SocketAddr;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{self, SignalKind};
use tracing::Level;

const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_BIND_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 9777);
const DEFAULT_METRICS_PATH: &str = "/metrics";

#[derive(Debug, Parser)]
#[clap(name = "nest_exporter", version = clap::crate_version!())]
struct NestExporterApplication {
    /// Address to bind to. By default, nest_exporter will bind to public address since
    /// the purpose is to expose metrics to an external system (Prometheus or another
    /// agent for ingestion)
    #[clap(long, env = "PRONESTHEUS_LISTEN_ADDR", default_value_t = DEFAULT_BIND_ADDR.into())]
    listen_addr: SocketAddr,

    /// Path under which to expose metrics
    #[clap(long, env = "PRONESTHEUS_METRICS_PATH", default_value_t = DEFAULT_METRICS_PATH.into())]
    metrics_path: String,

    /// Timeout for each request to an upstream API, in milliseconds
    #[clap(long, env = "PRONESTHEUS_SCRAPE_TIMEOUT", default_value_t = config::DEFAULT_TIMEOUT_MILLIS)]
    scrape_timeout: u64,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[clap(long, env = "PRONESTHEUS_LOG_LEVEL", default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,

    /// Base URL for the Nest Smart Device Management API
    #[clap(long, env = "PRONESTHEUS_NEST_API_URL", default_value_t = config::DEFAULT_NEST_API_URL.into())]
    nest_api_url: String,

    /// URL used to exchange the Nest refresh token for an access token
    #[clap(long, env = "PRONESTHEUS_NEST_OAUTH_TOKEN_URL", default_value_t = config::DEFAULT_NEST_TOKEN_URL.into())]
    nest_oauth_token_url: String,

    /// OAuth client ID of the Device Access project
    #[clap(long, env = "PRONESTHEUS_NEST_CLIENT_ID")]
    nest_client_id: Option<String>,

    /// OAuth client secret of the Device Access project
    #[clap(long, env = "PRONESTHEUS_NEST_CLIENT_SECRET", hide_env_values = true)]
    nest_client_secret: Option<String>,

    /// Device Access project ID. Thermostat metrics are only exported when this is set
    #[clap(long, env = "PRONESTHEUS_NEST_PROJECT_ID")]
    nest_project_id: Option<String>,

    /// OAuth refresh token for the Device Access project
    #[clap(long, env = "PRONESTHEUS_NEST_REFRESH_TOKEN", hide_env_values = true)]
    nest_refresh_token: Option<String>,

    /// Replace spaces in thermostat labels with dashes
    #[clap(long, env = "PRONESTHEUS_NEST_LABEL_SPACE_TO_DASH")]
    nest_label_space_to_dash: bool,

    /// URL of the OpenWeatherMap current weather API
    #[clap(long, env = "PRONESTHEUS_OWM_URL", default_value_t = config::DEFAULT_WEATHER_API_URL.into())]
    owm_url: String,

    /// OpenWeatherMap API key. Weather metrics are only exported when this is set
    #[clap(long, env = "PRONESTHEUS_OWM_AUTH", hide_env_values = true)]
    owm_auth: Option<String>,

    /// OpenWeatherMap city ID to fetch weather for
    #[clap(long, env = "PRONESTHEUS_OWM_LOCATION", default_value_t = config::DEFAULT_WEATHER_LOCATION.into())]
    owm_location: String,

    /// Google URL that issues access tokens for the Nest app. Must be set together
    /// with --nest-google-auth-cookies to export temperature sensor metrics
    #[clap(long, env = "PRONESTHEUS_NEST_GOOGLE_AUTH_URL", hide_env_values = true)]
    nest_google_auth_url: Option<String>,

    /// Cookies of a Google session logged in to the Nest app
    #[clap(long, env = "PRONESTHEUS_NEST_GOOGLE_AUTH_COOKIES", hide_env_values = true)]
    nest_google_auth_cookies: Option<String>,

    /// URL that exchanges a Google access token for a Nest app token
    #[clap(long, env = "PRONESTHEUS_NEST_APP_JWT_URL", default_value_t = config::DEFAULT_NEST_APP_JWT_URL.into())]
    nest_app_jwt_url: String,

    /// Base URL for the Nest app API
    #[clap(long, env = "PRONESTHEUS_NEST_APP_API_URL", default_value_t = config::DEFAULT_NEST_APP_API_URL.into())]
    nest_app_api_url: String,
}

impl NestExporterApplication {
    fn exporter_config(&self) -> ExporterConfig {
        ExporterConfig {
            timeout: Duration::from_millis(self.scrape_timeout),
            nest_api_url: self.nest_api_url.clone(),
            nest_token_url: self.nest_oauth_token_url.clone(),
            nest_client_id: self.nest_client_id.clone(),
            nest_client_secret: self.nest_client_secret.clone(),
            nest_project_id: self.nest_project_id.clone(),
            nest_refresh_token: self.nest_refresh_token.clone(),
            nest_access_token: None,
            nest_label_space_to_dash: self.nest_label_space_to_dash,
            weather_api_url: self.owm_url.clone(),
            weather_api_key: self.owm_auth.clone(),
            weather_location: self.owm_location.clone(),
            app_auth_url: self.nest_google_auth_url.clone(),
            app_auth_cookies: self.nest_google_auth_cookies.clone(),
            app_jwt_url: self.nest_app_jwt_url.clone(),
            app_api_url: self.nest_app_api_url.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let opts = NestExporterApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    if !opts.metrics_path.starts_with('/') || opts.metrics_path == "/" {
        tracing::error!(message = "metrics path must start with '/' and not be '/'", path = %opts.metrics_path);
        process::exit(1)
    }

    // Readers that are configured are created before starting the HTTP server. This
    // performs the initial authentication for the Nest app API so that bad credentials
    // are reported at startup instead of on every scrape.
    let exporter = Exporter::new(&opts.exporter_config()).await.unwrap_or_else(|e| {
        tracing::error!(message = "unable to initialize exporter", error = %e);
        process::exit(1)
    });

    let collectors = exporter.collectors();
    if collectors.is_empty() {
        tracing::warn!(message = "no APIs configured, no metrics will be exported");
    } else {
        tracing::info!(message = "configured collectors", collectors = ?collectors);
    }

    let context = Arc::new(RequestContext::new(exporter, &opts.metrics_path));
    let app = nest_exporter::http::router(context);
    let server = axum::Server::try_bind(&opts.listen_addr)
        .unwrap_or_else(|e| {
            tracing::error!(message = "error binding to address", address = %opts.listen_addr, error = %e);
            process::exit(1)
        })
        .serve(app.into_make_service());

    tracing::info!(message = "server started", address = %server.local_addr(), metrics_path = %opts.metrics_path);

    server
        .with_graceful_shutdown(async {
            // Wait for either SIGTERM or SIGINT to shutdown
            tokio::select! {
                _ = sigterm() => {}
                _ = sigint() => {}
            }
        })
        .await?;

    tracing::info!("server shutdown");
    Ok(())
}

/// Return after the first SIGTERM signal received by this process
async fn sigterm() -> io::Result<()> {
    unix::signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

/// Return after the first SIGINT signal received by this process
async fn sigint() -> io::Result<()> {
    unix::signal(SignalKind::interrupt())?.recv().await;
    Ok(())
}
