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

//! Temperature sensor and structure readings from the API used by the Nest mobile app.
//!
//! This API isn't documented. Access requires a session token obtained in two steps:
//! a Google access token is fetched using the cookies of a logged in browser session,
//! then exchanged for a short-lived Nest JWT. The session is renewed shortly before
//! it expires.

use crate::client::{self, ClientError};
use crate::json;
use chrono::{DateTime, Duration, TimeZone, Utc};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE};
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

const JWT_POLICY_ID: &str = "authproxy-oauth-policy";
const JWT_LIFETIME: &str = "3600s";
const REAUTH_MARGIN_MINS: i64 = 2;
const BUCKETS_REQUEST: &str = r#"{"known_bucket_types":["structure","where","kryptonite"],"known_bucket_versions":[]}"#;
const HEADER_REQUESTED_WITH: &str = "X-Requested-With";
const HEADER_USER_ID: &str = "X-nl-user-id";
const HEADER_PROTOCOL_VERSION: &str = "X-nl-protocol-version";

/// Configuration for a `NestAppClient`.
#[derive(Debug, Clone)]
pub struct NestAppConfig {
    /// URL that issues a Google access token given the cookies of a logged in session
    pub auth_url: String,
    /// Cookie header from a logged in session
    pub auth_cookies: String,
    /// URL that exchanges a Google access token for a Nest JWT
    pub jwt_url: String,
    /// Base URL of the Nest app API
    pub api_url: String,
    pub timeout: std::time::Duration,
}

/// Credentials for the Nest app API, replaced as a whole on each (re)authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// True once the session is within the renewal margin of expiring, or has expired.
    pub fn needs_renewal(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at - Duration::minutes(REAUTH_MARGIN_MINS)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A house or other location that groups sensors.
#[derive(Debug, Clone, PartialEq)]
pub struct Structure {
    pub id: String,
    pub name: String,
    /// "where" ID to room name
    pub where_names: HashMap<String, String>,
    /// Absent until weather for the structure has been observed
    pub outside_temperature: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemperatureSensor {
    pub serial_number: String,
    pub structure_name: String,
    pub where_name: String,
    pub last_updated_at: Option<DateTime<Utc>>,
    /// Absent when the sensor hasn't reported a reading
    pub temperature: Option<f64>,
    /// 0-100
    pub battery_level: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Readings {
    pub structures: Vec<Structure>,
    pub sensors: Vec<TemperatureSensor>,
}

/// Obtains new sessions via the two step token exchange.
#[derive(Debug)]
struct Authenticator {
    client: Client,
    auth_url: Url,
    auth_cookies: String,
    jwt_url: Url,
}

impl Authenticator {
    async fn session(&self) -> Result<Session, ClientError> {
        let google_token = self.google_access_token().await?;
        let session = self.nest_jwt(&google_token).await?;

        tracing::debug!(
            message = "obtained new access token for Nest app API",
            user_id = %session.user_id,
            expires_at = %session.expires_at,
        );

        Ok(session)
    }

    async fn google_access_token(&self) -> Result<String, ClientError> {
        let req = self
            .client
            .get(self.auth_url.clone())
            .header(COOKIE, &self.auth_cookies)
            .header(HEADER_REQUESTED_WITH, "XmlHttpRequest");

        let (status, body) = client::fetch_any(req, &self.auth_url).await?;
        let doc = token_document(status, &body, &self.auth_url)?;

        json::str_at(&doc, &["access_token"])
            .filter(|t| !t.is_empty())
            .map(str::to_owned)
            .ok_or(ClientError::MissingField("access_token"))
    }

    async fn nest_jwt(&self, google_token: &str) -> Result<Session, ClientError> {
        let payload = serde_json::json!({
            "embed_google_oauth_access_token": true,
            "expire_after": JWT_LIFETIME,
            "google_oauth_access_token": google_token,
            "policy_id": JWT_POLICY_ID,
        });

        let req = self
            .client
            .post(self.jwt_url.clone())
            .bearer_auth(google_token)
            .header(HEADER_REQUESTED_WITH, "XmlHttpRequest")
            .json(&payload);

        let (status, body) = client::fetch_any(req, &self.jwt_url).await?;
        let doc = token_document(status, &body, &self.jwt_url)?;
        parse_session(&doc)
    }
}

/// Parse the body of a token endpoint response, turning upstream-reported errors into
/// `ClientError::Rejected` and other non-200 responses into `ClientError::Status`.
fn token_document(status: StatusCode, body: &[u8], url: &Url) -> Result<Value, ClientError> {
    let doc: Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(_) if status != StatusCode::OK => return Err(ClientError::Status(status, url.clone())),
        Err(e) => return Err(ClientError::Parse(e)),
    };

    if let Some(error) = json::lookup(&doc, &["error"]) {
        let kind = error.as_str().map(str::to_owned).unwrap_or_else(|| error.to_string());
        return Err(ClientError::Rejected(kind, json::string_or_empty(&doc, &["error_description"])));
    }

    if status != StatusCode::OK {
        return Err(ClientError::Status(status, url.clone()));
    }

    Ok(doc)
}

fn parse_session(doc: &Value) -> Result<Session, ClientError> {
    let token = json::str_at(doc, &["jwt"])
        .filter(|t| !t.is_empty())
        .ok_or(ClientError::MissingField("jwt"))?;
    let user_id = json::str_at(doc, &["claims", "subject", "nestId", "id"])
        .filter(|t| !t.is_empty())
        .ok_or(ClientError::MissingField("claims.subject.nestId.id"))?;
    let expiration = json::str_at(doc, &["claims", "expirationTime"])
        .filter(|t| !t.is_empty())
        .ok_or(ClientError::MissingField("claims.expirationTime"))?;
    let expires_at = DateTime::parse_from_rfc3339(expiration)
        .map_err(|e| ClientError::InvalidExpiry(expiration.to_owned(), e))?
        .with_timezone(&Utc);

    Ok(Session {
        token: token.to_owned(),
        user_id: user_id.to_owned(),
        expires_at,
    })
}

/// Client for temperature sensor readings from the Nest app API.
#[derive(Debug)]
pub struct NestAppClient {
    client: Client,
    auth: Authenticator,
    api_url: Url,
    session: Mutex<Session>,
}

impl NestAppClient {
    /// Create a new client, authenticating immediately.
    ///
    /// Fails with `ClientError::Authentication` if a session could not be established.
    pub async fn new(cfg: NestAppConfig) -> Result<Self, ClientError> {
        let client = client::http_client(cfg.timeout)?;
        let auth = Authenticator {
            client: client.clone(),
            auth_url: client::parse_url(&cfg.auth_url)?,
            auth_cookies: cfg.auth_cookies,
            jwt_url: client::parse_url(&cfg.jwt_url)?,
        };

        let session = auth
            .session()
            .await
            .map_err(|e| ClientError::Authentication(Box::new(e)))?;

        Ok(NestAppClient {
            client,
            auth,
            api_url: client::parse_url(&cfg.api_url)?,
            session: Mutex::new(session),
        })
    }

    /// Fetch structures and temperature sensors, renewing the session first if needed.
    pub async fn readings(&self) -> Result<Readings, ClientError> {
        let session = self.current_session().await?;
        let url = client::join_path(&self.api_url, &["api", "0.1", "user", session.user_id.as_str(), "app_launch"])?;
        tracing::debug!(message = "making app launch request", url = %url);

        let req = self
            .client
            .post(url.clone())
            .header(AUTHORIZATION, format!("Basic {}", session.token))
            .header(COOKIE, session_cookie(&session.token))
            .header(HEADER_USER_ID, &session.user_id)
            .header(HEADER_PROTOCOL_VERSION, "1")
            .header(CONTENT_TYPE, "application/json")
            .body(BUCKETS_REQUEST);

        let body = client::fetch(req, &url).await?;
        parse_readings(&body)
    }

    /// Return the session to use for the next request.
    ///
    /// The lock is held across renewal so concurrent callers never race to replace the
    /// session. If renewal fails, the old session is still returned until it has fully
    /// expired.
    async fn current_session(&self) -> Result<Session, ClientError> {
        let mut session = self.session.lock().await;
        if !session.needs_renewal(Utc::now()) {
            return Ok(session.clone());
        }

        match self.auth.session().await {
            Ok(renewed) => {
                *session = renewed;
            }
            Err(e) if session.is_expired(Utc::now()) => {
                return Err(ClientError::Reauthentication(Box::new(e)));
            }
            Err(e) => {
                tracing::warn!(
                    message = "failed to renew Nest app session, using existing token",
                    expires_at = %session.expires_at,
                    error = %e,
                );
            }
        }

        Ok(session.clone())
    }
}

fn session_cookie(token: &str) -> String {
    format!(
        "G_ENABLED_IDPS=google; eu_cookie_accepted=1; viewer-volume=0.5; cztoken={}; user_token={}",
        token, token
    )
}

/// A single entry of the `updated_buckets` list, keyed by `{type}.{id}`.
#[derive(Debug, Clone, PartialEq)]
enum Bucket {
    Structure {
        id: String,
        name: String,
    },
    Where {
        structure_id: String,
        wheres: Vec<(String, String)>,
    },
    Sensor {
        serial_number: String,
        structure_id: String,
        where_id: String,
        last_updated_at: Option<i64>,
        temperature: Option<f64>,
        battery_level: Option<i64>,
    },
    Unknown,
}

impl Bucket {
    fn from_json(obj: &Value) -> Self {
        let key = json::str_at(obj, &["object_key"]).unwrap_or_default();
        let value = match json::lookup(obj, &["value"]) {
            Some(v) => v,
            None => return Self::Unknown,
        };

        match key.split_once('.') {
            Some(("structure", id)) => Self::Structure {
                id: id.to_owned(),
                name: json::string_or_empty(value, &["name"]),
            },
            Some(("where", id)) => Self::Where {
                structure_id: id.to_owned(),
                wheres: json::array_at(value, &["wheres"])
                    .iter()
                    .filter_map(|w| {
                        let where_id = json::str_at(w, &["where_id"])?;
                        Some((where_id.to_owned(), json::string_or_empty(w, &["name"])))
                    })
                    .collect(),
            },
            Some(("kryptonite", _)) => Self::Sensor {
                serial_number: json::string_or_empty(value, &["serial_number"]),
                structure_id: json::string_or_empty(value, &["structure_id"]),
                where_id: json::string_or_empty(value, &["where_id"]),
                last_updated_at: json::i64_at(value, &["last_updated_at"]),
                temperature: json::f64_at(value, &["current_temperature"]),
                battery_level: json::i64_at(value, &["battery_level"]),
            },
            _ => Self::Unknown,
        }
    }
}

/// Parse an app launch response into structures and sensors.
pub fn parse_readings(body: &[u8]) -> Result<Readings, ClientError> {
    let doc: Value = serde_json::from_slice(body)?;
    let buckets: Vec<Bucket> = json::array_at(&doc, &["updated_buckets"])
        .iter()
        .map(Bucket::from_json)
        .collect();

    Ok(resolve(&buckets, json::lookup(&doc, &["weather_for_structures"])))
}

/// Resolve references between buckets. Structures are built before anything refers to
/// them so the result doesn't depend on the order of buckets in the response.
fn resolve(buckets: &[Bucket], weather: Option<&Value>) -> Readings {
    let mut structures: BTreeMap<String, Structure> = buckets
        .iter()
        .filter_map(|b| match b {
            Bucket::Structure { id, name } => Some((
                id.clone(),
                Structure {
                    id: id.clone(),
                    name: name.clone(),
                    where_names: HashMap::new(),
                    outside_temperature: None,
                },
            )),
            _ => None,
        })
        .collect();

    for bucket in buckets {
        if let Bucket::Where { structure_id, wheres } = bucket {
            if let Some(structure) = structures.get_mut(structure_id) {
                structure.where_names.extend(wheres.iter().cloned());
            }
        }
    }

    let sensors = buckets
        .iter()
        .filter_map(|b| match b {
            Bucket::Sensor {
                serial_number,
                structure_id,
                where_id,
                last_updated_at,
                temperature,
                battery_level,
            } => {
                let structure = structures.get(structure_id);
                Some(TemperatureSensor {
                    serial_number: serial_number.clone(),
                    structure_name: structure.map(|s| s.name.clone()).unwrap_or_default(),
                    where_name: structure
                        .and_then(|s| s.where_names.get(where_id))
                        .cloned()
                        .unwrap_or_default(),
                    last_updated_at: last_updated_at.and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
                    temperature: *temperature,
                    battery_level: *battery_level,
                })
            }
            _ => None,
        })
        .collect();

    if let Some(entries) = weather.and_then(Value::as_object) {
        for (key, conditions) in entries {
            let structure = key
                .strip_prefix("structure.")
                .and_then(|id| structures.get_mut(id));

            if let (Some(structure), Some(temp)) = (structure, json::f64_at(conditions, &["current", "temp_c"])) {
                structure.outside_temperature = Some(temp);
            }
        }
    }

    Readings {
        structures: structures.into_values().collect(),
        sensors,
    }
}
