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

#![allow(dead_code)]

//! In-process mock versions of the upstream APIs, served on an ephemeral local port.

use axum::extract::{Form, Json, Path, Query, State};
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Serve `app` on an ephemeral port and return its base URL (without a trailing slash).
pub fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = axum::Server::from_tcp(listener)
        .unwrap()
        .serve(app.into_make_service());

    tokio::spawn(server);
    format!("http://{}", addr)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

pub const DEVICES: &str = r#"{
  "devices": [
    {
      "name": "enterprises/proj/devices/therm-1",
      "type": "sdm.devices.types.THERMOSTAT",
      "traits": {
        "sdm.devices.traits.Info": {"customName": "Living Room"},
        "sdm.devices.traits.Humidity": {"ambientHumidityPercent": 41},
        "sdm.devices.traits.Connectivity": {"status": "ONLINE"},
        "sdm.devices.traits.ThermostatHvac": {"status": "HEATING"},
        "sdm.devices.traits.ThermostatTemperatureSetpoint": {"heatCelsius": 21.5},
        "sdm.devices.traits.Temperature": {"ambientTemperatureCelsius": 19.75}
      },
      "parentRelations": [
        {"parent": "enterprises/proj/structures/s1/rooms/r1", "displayName": "Hallway"}
      ]
    },
    {
      "name": "enterprises/proj/devices/therm-2",
      "type": "sdm.devices.types.THERMOSTAT",
      "traits": {
        "sdm.devices.traits.Info": {"customName": "Upstairs"},
        "sdm.devices.traits.Connectivity": {"status": "OFFLINE"},
        "sdm.devices.traits.ThermostatHvac": {"status": "OFF"},
        "sdm.devices.traits.Temperature": {"ambientTemperatureCelsius": 18.0}
      },
      "parentRelations": []
    },
    {
      "name": "enterprises/proj/devices/doorbell-1",
      "type": "sdm.devices.types.DOORBELL",
      "traits": {}
    }
  ]
}"#;

/// Smart Device Management API and Google OAuth token endpoint.
#[derive(Debug)]
pub struct MockNest {
    pub devices_status: StatusCode,
    pub devices_body: String,
    pub token_status: StatusCode,
    pub token_body: Value,
    pub token_requests: AtomicUsize,
    pub devices_requests: AtomicUsize,
    pub last_authorization: Mutex<Option<String>>,
}

impl Default for MockNest {
    fn default() -> Self {
        MockNest {
            devices_status: StatusCode::OK,
            devices_body: DEVICES.to_owned(),
            token_status: StatusCode::OK,
            token_body: json!({"access_token": "refreshed-token", "expires_in": 3599, "token_type": "Bearer"}),
            token_requests: AtomicUsize::new(0),
            devices_requests: AtomicUsize::new(0),
            last_authorization: Mutex::new(None),
        }
    }
}

pub fn nest_router(state: Arc<MockNest>) -> Router {
    Router::new()
        .route("/v1/enterprises/proj/devices/", get(nest_devices))
        .route("/token", post(nest_token))
        .with_state(state)
}

async fn nest_devices(State(state): State<Arc<MockNest>>, headers: HeaderMap) -> (StatusCode, String) {
    state.devices_requests.fetch_add(1, Ordering::SeqCst);
    *state.last_authorization.lock().unwrap() = header(&headers, AUTHORIZATION.as_str()).map(str::to_owned);
    (state.devices_status, state.devices_body.clone())
}

async fn nest_token(
    State(state): State<Arc<MockNest>>,
    Form(form): Form<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    state.token_requests.fetch_add(1, Ordering::SeqCst);
    let valid = form.get("grant_type").map(String::as_str) == Some("refresh_token")
        && form.get("refresh_token").map(String::as_str) == Some("refresh")
        && form.get("client_id").map(String::as_str) == Some("client-id")
        && form.get("client_secret").map(String::as_str) == Some("client-secret");

    if valid {
        (state.token_status, Json(state.token_body.clone()))
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid_request", "error_description": "bad form"})),
        )
    }
}

/// OpenWeatherMap current weather API.
#[derive(Debug)]
pub struct MockWeather {
    pub status: StatusCode,
    pub body: String,
}

impl Default for MockWeather {
    fn default() -> Self {
        MockWeather {
            status: StatusCode::OK,
            body: r#"{"main":{"temp":17.57,"feels_like":17.2,"humidity":82,"pressure":1016},"name":"London"}"#.to_owned(),
        }
    }
}

pub fn weather_router(state: Arc<MockWeather>) -> Router {
    Router::new()
        .route("/data/2.5/weather", get(weather))
        .with_state(state)
}

async fn weather(
    State(state): State<Arc<MockWeather>>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, String) {
    let valid = params.get("appid").map(String::as_str) == Some("owm-key")
        && params.get("id").map(String::as_str) == Some("2643743")
        && params.get("units").map(String::as_str) == Some("metric");

    if valid {
        (state.status, state.body.clone())
    } else {
        (
            StatusCode::UNAUTHORIZED,
            r#"{"cod":401,"message":"Invalid API key"}"#.to_owned(),
        )
    }
}

pub const APP_LAUNCH: &str = r#"{
  "updated_buckets": [
    {"object_key": "kryptonite.K1", "object_revision": 1, "value": {
      "serial_number": "22AA01",
      "structure_id": "S1",
      "where_id": "w-kitchen",
      "current_temperature": 20.5,
      "battery_level": 93,
      "last_updated_at": 1690000000
    }},
    {"object_key": "structure.S1", "object_revision": 1, "value": {"name": "Home"}},
    {"object_key": "where.S1", "object_revision": 1, "value": {"wheres": [
      {"where_id": "w-kitchen", "name": "Kitchen"}
    ]}}
  ],
  "weather_for_structures": {
    "structure.S1": {"current": {"temp_c": 11.3}}
  }
}"#;

pub const APP_COOKIES: &str = "SID=abc; HSID=def";

/// Google token issuance, Nest JWT issuance, and the Nest app API.
#[derive(Debug)]
pub struct MockApp {
    /// Expiration of the next issued JWT
    pub expires_at: Mutex<DateTime<Utc>>,
    pub fail_auth: AtomicBool,
    pub fail_data: AtomicBool,
    pub auth_requests: AtomicUsize,
    pub jwt_requests: AtomicUsize,
    pub data_requests: AtomicUsize,
    /// Token used by the most recent app launch request
    pub data_token: Mutex<Option<String>>,
}

impl MockApp {
    pub fn expiring_in(d: Duration) -> Self {
        MockApp {
            expires_at: Mutex::new(Utc::now() + d),
            fail_auth: AtomicBool::new(false),
            fail_data: AtomicBool::new(false),
            auth_requests: AtomicUsize::new(0),
            jwt_requests: AtomicUsize::new(0),
            data_requests: AtomicUsize::new(0),
            data_token: Mutex::new(None),
        }
    }

    pub fn set_expiring_in(&self, d: Duration) {
        *self.expires_at.lock().unwrap() = Utc::now() + d;
    }

    pub fn data_token(&self) -> Option<String> {
        self.data_token.lock().unwrap().clone()
    }
}

pub fn app_router(state: Arc<MockApp>) -> Router {
    Router::new()
        .route("/iframerpc", get(app_google_token))
        .route("/v1/issue_jwt", post(app_issue_jwt))
        .route("/api/0.1/user/:user_id/app_launch", post(app_launch))
        .with_state(state)
}

async fn app_google_token(State(state): State<Arc<MockApp>>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    state.auth_requests.fetch_add(1, Ordering::SeqCst);
    let valid = header(&headers, COOKIE.as_str()) == Some(APP_COOKIES)
        && header(&headers, "x-requested-with") == Some("XmlHttpRequest");

    if !valid || state.fail_auth.load(Ordering::SeqCst) {
        return (
            StatusCode::OK,
            Json(json!({"error": "USER_LOGGED_OUT", "detail": "No active session found."})),
        );
    }

    (
        StatusCode::OK,
        Json(json!({"token_type": "Bearer", "access_token": "google-token", "expires_in": "3599"})),
    )
}

async fn app_issue_jwt(
    State(state): State<Arc<MockApp>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let n = state.jwt_requests.fetch_add(1, Ordering::SeqCst) + 1;
    let valid = header(&headers, AUTHORIZATION.as_str()) == Some("Bearer google-token")
        && body["google_oauth_access_token"] == "google-token"
        && body["policy_id"] == "authproxy-oauth-policy"
        && body["expire_after"] == "3600s"
        && body["embed_google_oauth_access_token"] == true;

    if !valid {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": {"code": 401, "status": "UNAUTHENTICATED"}})),
        );
    }

    let expires_at = *state.expires_at.lock().unwrap();
    (
        StatusCode::OK,
        Json(json!({
            "jwt": format!("jwt-{}", n),
            "claims": {
                "subject": {"nestId": {"id": "42"}},
                "expirationTime": expires_at.to_rfc3339(),
            }
        })),
    )
}

async fn app_launch(
    State(state): State<Arc<MockApp>>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    state.data_requests.fetch_add(1, Ordering::SeqCst);

    let token = header(&headers, AUTHORIZATION.as_str())
        .and_then(|v| v.strip_prefix("Basic "))
        .map(str::to_owned);
    *state.data_token.lock().unwrap() = token.clone();

    let token = token.unwrap_or_default();
    let cookie = header(&headers, COOKIE.as_str()).unwrap_or_default();
    let request: Value = serde_json::from_str(&body).unwrap_or_default();
    let valid = user_id == "42"
        && header(&headers, "x-nl-user-id") == Some("42")
        && header(&headers, "x-nl-protocol-version") == Some("1")
        && cookie.contains(&format!("cztoken={}", token))
        && cookie.contains(&format!("user_token={}", token))
        && request["known_bucket_types"] == json!(["structure", "where", "kryptonite"]);

    if !valid {
        return (StatusCode::UNAUTHORIZED, "{}".to_owned());
    }

    if state.fail_data.load(Ordering::SeqCst) {
        return (StatusCode::SERVICE_UNAVAILABLE, "{}".to_owned());
    }

    (StatusCode::OK, APP_LAUNCH.to_owned())
}
