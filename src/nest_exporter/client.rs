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

use reqwest::header::USER_AGENT;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use std::time::Duration;
use thiserror::Error;

const USER_AGENT_VALUE: &str = concat!("nest_exporter/", env!("CARGO_PKG_VERSION"));

/// Errors that may occur while fetching or parsing data from any upstream API.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("unable to build HTTP client: {0}")]
    Internal(#[source] reqwest::Error),

    #[error("invalid URL {0}: {1}")]
    InvalidUrl(String, String),

    #[error("request to {0} failed: {1}")]
    Request(Url, #[source] reqwest::Error),

    #[error("unexpected status {0} for {1}")]
    Status(StatusCode, Url),

    #[error("failed reading response body from {0}: {1}")]
    Body(Url, #[source] reqwest::Error),

    #[error("failed parsing response body: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("missing field {0} in response")]
    MissingField(&'static str),

    #[error("invalid value for field {0} in response")]
    InvalidField(&'static str),

    #[error("no valid thermostats in devices list")]
    NoValidDevices,

    #[error("upstream rejected request: {0}: {1}")]
    Rejected(String, String),

    #[error("invalid expiration time {0}: {1}")]
    InvalidExpiry(String, #[source] chrono::ParseError),

    #[error("authentication failed: {0}")]
    Authentication(#[source] Box<ClientError>),

    #[error("re-authentication failed: {0}")]
    Reauthentication(#[source] Box<ClientError>),
}

/// Build an HTTP client where every request (including token requests) is bounded by `timeout`.
pub fn http_client(timeout: Duration) -> Result<Client, ClientError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(ClientError::Internal)
}

pub fn parse_url(url: &str) -> Result<Url, ClientError> {
    Url::parse(url).map_err(|e| ClientError::InvalidUrl(url.to_owned(), e.to_string()))
}

/// Append path segments to `base`, dropping a trailing empty segment first so that
/// bases with and without a trailing slash produce the same result. An empty final
/// segment in `segments` results in a trailing slash.
pub fn join_path(base: &Url, segments: &[&str]) -> Result<Url, ClientError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map(|mut p| {
            p.pop_if_empty().extend(segments);
        })
        .map_err(|_| ClientError::InvalidUrl(base.to_string(), "URL cannot be a base".to_owned()))?;

    Ok(url)
}

/// Send a request and return the full body if the response status was `200 OK`.
///
/// `url` is the URL reported in errors. It may differ from the URL actually requested so
/// that credentials in query parameters are never part of an error. The URL attached to
/// errors by `reqwest` is dropped for the same reason.
pub async fn fetch(req: RequestBuilder, url: &Url) -> Result<Vec<u8>, ClientError> {
    let (status, body) = fetch_any(req, url).await?;
    if status != StatusCode::OK {
        return Err(ClientError::Status(status, url.clone()));
    }

    Ok(body)
}

/// Send a request and return the status and full body regardless of the response status.
///
/// Used for token endpoints which describe failures in the body of non-200 responses.
pub async fn fetch_any(req: RequestBuilder, url: &Url) -> Result<(StatusCode, Vec<u8>), ClientError> {
    let res = req
        .header(USER_AGENT, USER_AGENT_VALUE)
        .send()
        .await
        .map_err(|e| ClientError::Request(url.clone(), e.without_url()))?;

    let status = res.status();
    let body = res
        .bytes()
        .await
        .map_err(|e| ClientError::Body(url.clone(), e.without_url()))?;
    Ok((status, body.to_vec()))
}
