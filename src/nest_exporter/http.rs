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

use crate::exporter::Exporter;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

const OPENMETRICS_TEXT: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Global state shared between all HTTP requests.
#[derive(Debug)]
pub struct RequestContext {
    exporter: Exporter,
    metrics_path: String,
}

impl RequestContext {
    pub fn new(exporter: Exporter, metrics_path: &str) -> Self {
        RequestContext {
            exporter,
            metrics_path: metrics_path.to_owned(),
        }
    }
}

/// Build a router that runs a scrape for each request to the metrics path and serves an
/// index page at `/`.
pub fn router(context: Arc<RequestContext>) -> Router {
    let metrics_path = context.metrics_path.clone();
    Router::new()
        .route("/", get(index))
        .route(&metrics_path, get(text_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(context)
}

async fn text_metrics(State(context): State<Arc<RequestContext>>) -> Response {
    match context.exporter.scrape().await {
        Ok(buf) => {
            tracing::debug!(message = "encoded metrics to text format", num_bytes = buf.len());
            ([(CONTENT_TYPE, OPENMETRICS_TEXT)], buf).into_response()
        }
        Err(e) => {
            tracing::error!(message = "error encoding metrics", error = %e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn index(State(context): State<Arc<RequestContext>>) -> Html<String> {
    Html(format!(
        "<html>\n<head><title>Nest Exporter</title></head>\n<body>\n<h1>Nest Exporter</h1>\n<p><a href=\"{}\">Metrics</a></p>\n</body>\n</html>\n",
        context.metrics_path
    ))
}
