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

//! OAuth2 access tokens obtained from a long-lived refresh token.

use crate::client::{self, ClientError};
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use tokio::sync::Mutex;

/// Tokens are renewed this long before they actually expire.
const EXPIRY_MARGIN_SECS: i64 = 10;

/// Credentials for the refresh token grant.
#[derive(Debug, Clone)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    /// `None` for tokens that never expire (injected tokens).
    expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires) => now + Duration::seconds(EXPIRY_MARGIN_SECS) < expires,
            None => true,
        }
    }
}

/// Time a token issued at `issued` expires, or `None` if `expires_in` is out of range.
fn expiry_time(issued: DateTime<Utc>, expires_in: i64) -> Option<DateTime<Utc>> {
    Duration::try_seconds(expires_in).and_then(|d| issued.checked_add_signed(d))
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<i64>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Source of OAuth2 access tokens that exchanges a refresh token for a new access
/// token whenever the cached one is missing or about to expire.
#[derive(Debug)]
pub struct TokenSource {
    http: Client,
    token_url: Url,
    credentials: OAuthCredentials,
    token: Mutex<Option<AccessToken>>,
}

impl TokenSource {
    pub fn new(http: Client, token_url: Url, credentials: OAuthCredentials) -> Self {
        TokenSource {
            http,
            token_url,
            credentials,
            token: Mutex::new(None),
        }
    }

    /// Use a pre-issued access token that never expires instead of contacting the token
    /// endpoint. Intended for testing against mock APIs.
    pub fn with_static_token<S: Into<String>>(self, token: S) -> Self {
        TokenSource {
            token: Mutex::new(Some(AccessToken {
                value: token.into(),
                expires_at: None,
            })),
            ..self
        }
    }

    /// Return a valid access token, refreshing it if necessary.
    pub async fn access_token(&self) -> Result<String, ClientError> {
        let mut guard = self.token.lock().await;
        if let Some(cached) = guard.as_ref() {
            if cached.is_valid_at(Utc::now()) {
                return Ok(cached.value.clone());
            }
        }

        let token = self.refresh().await?;
        let value = token.value.clone();
        *guard = Some(token);
        Ok(value)
    }

    async fn refresh(&self) -> Result<AccessToken, ClientError> {
        tracing::debug!(message = "refreshing OAuth access token", url = %self.token_url);

        let req = self.http.post(self.token_url.clone()).form(&[
            ("grant_type", "refresh_token"),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("refresh_token", self.credentials.refresh_token.as_str()),
        ]);

        let requested = Utc::now();
        let (status, body) = client::fetch_any(req, &self.token_url).await?;
        let res = match serde_json::from_slice::<TokenResponse>(&body) {
            Ok(r) => r,
            Err(_) if status != StatusCode::OK => return Err(ClientError::Status(status, self.token_url.clone())),
            Err(e) => return Err(ClientError::Parse(e)),
        };

        if let Some(error) = res.error {
            return Err(ClientError::Rejected(error, res.error_description.unwrap_or_default()));
        }

        if status != StatusCode::OK {
            return Err(ClientError::Status(status, self.token_url.clone()));
        }

        let value = res
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or(ClientError::MissingField("access_token"))?;
        let expires_at = match res.expires_in {
            Some(secs) => {
                let expires = expiry_time(requested, secs).ok_or(ClientError::InvalidField("expires_in"))?;
                Some(expires)
            }
            None => None,
        };

        tracing::debug!(message = "obtained new OAuth access token", expires_at = ?expires_at);
        Ok(AccessToken { value, expires_at })
    }
}

#[cfg(test)]
mod test {
    use super::{expiry_time, AccessToken};
    use chrono::{Duration, Utc};

    #[test]
    fn test_token_without_expiry_always_valid() {
        let token = AccessToken {
            value: "abc".to_owned(),
            expires_at: None,
        };

        assert!(token.is_valid_at(Utc::now() + Duration::days(365)));
    }

    #[test]
    fn test_token_valid_before_margin() {
        let now = Utc::now();
        let token = AccessToken {
            value: "abc".to_owned(),
            expires_at: Some(now + Duration::seconds(60)),
        };

        assert!(token.is_valid_at(now));
    }

    #[test]
    fn test_token_invalid_within_margin() {
        let now = Utc::now();
        let token = AccessToken {
            value: "abc".to_owned(),
            expires_at: Some(now + Duration::seconds(5)),
        };

        assert!(!token.is_valid_at(now));
        assert!(!token.is_valid_at(now + Duration::seconds(30)));
    }

    #[test]
    fn test_expiry_time() {
        let now = Utc::now();
        assert_eq!(Some(now + Duration::seconds(3599)), expiry_time(now, 3599));
        assert_eq!(Some(now - Duration::seconds(5)), expiry_time(now, -5));
    }

    #[test]
    fn test_expiry_time_out_of_range() {
        let now = Utc::now();
        assert_eq!(None, expiry_time(now, 9_000_000_000_000_000_000));
        assert_eq!(None, expiry_time(now, i64::MIN));
        assert_eq!(None, expiry_time(now, 400_000 * 365 * 86_400));
    }
}
