//! The places-autocomplete proxy.
//!
//! The mobile and web clients can't hold the Places API key, and browsers
//! won't call the Places API cross-origin anyway, so this endpoint does it
//! for them. Requests are relayed more or less verbatim: we inject the key
//! and field mask, forward the JSON body, and hand back whatever status and
//! body the upstream produced, plus permissive CORS headers.
//!
//! This is the one handler whose errors are visible to its caller: they come
//! back as `{"error": "..."}` with a 4xx/5xx status.

use lambda_http::{
    http::{header::CONTENT_TYPE, Method, StatusCode},
    tracing, Body, Error, Request, Response,
};
use serde_json::{json, Value};

use crate::config::{PlacesSettings, DEFAULT_FIELD_MASK};

pub const API_KEY_HEADER: &str = "X-Goog-Api-Key";
pub const FIELD_MASK_HEADER: &str = "X-Goog-Field-Mask";

pub const CORS_HEADERS: [(&str, &str); 4] = [
    ("Access-Control-Allow-Origin", "*"),
    ("Access-Control-Allow-Methods", "GET, POST, OPTIONS"),
    (
        "Access-Control-Allow-Headers",
        "Content-Type, X-Goog-Api-Key, X-Goog-Field-Mask",
    ),
    ("Access-Control-Max-Age", "3600"),
];

pub struct PlacesProxy {
    settings: PlacesSettings,
    client: reqwest::Client,
}

impl PlacesProxy {
    pub fn new(settings: PlacesSettings) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()?;

        Ok(PlacesProxy { settings, client })
    }

    pub async fn handle(&self, req: Request) -> Result<Response<Body>, Error> {
        if req.method() == Method::OPTIONS {
            return respond(StatusCode::NO_CONTENT, None);
        }

        if req.method() != Method::POST {
            return error_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
        }

        let Some(api_key) = self
            .settings
            .api_key
            .clone()
            .or_else(|| header_value(&req, API_KEY_HEADER))
        else {
            return error_response(StatusCode::BAD_REQUEST, "API key is required");
        };

        let field_mask = header_value(&req, FIELD_MASK_HEADER)
            .unwrap_or_else(|| DEFAULT_FIELD_MASK.to_owned());

        let Some(query) = json_body(&req) else {
            return error_response(StatusCode::BAD_REQUEST, "Request body is required");
        };

        match self.forward(&api_key, &field_mask, &query).await {
            Ok((status, text)) => respond(status, Some(text)),

            Err(e) => {
                tracing::error!("places upstream request failed: {e}");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
            }
        }
    }

    async fn forward(
        &self,
        api_key: &str,
        field_mask: &str,
        query: &Value,
    ) -> Result<(StatusCode, String), reqwest::Error> {
        let resp = self
            .client
            .post(&self.settings.endpoint)
            .header(API_KEY_HEADER, api_key)
            .header(FIELD_MASK_HEADER, field_mask)
            .json(query)
            .send()
            .await?;

        // reqwest and lambda_http may sit on different `http` majors, so go
        // through the raw code.
        let status = StatusCode::from_u16(resp.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        let text = resp.text().await?;
        Ok((status, text))
    }
}

fn header_value(req: &Request, name: &str) -> Option<String> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

/// The request body as JSON, if it parses and has anything in it.
fn json_body(req: &Request) -> Option<Value> {
    let raw: &[u8] = req.body();

    if raw.is_empty() {
        return None;
    }

    let value: Value = serde_json::from_slice(raw).ok()?;

    let blank = match &value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
    };

    if blank {
        None
    } else {
        Some(value)
    }
}

fn respond(status: StatusCode, body: Option<String>) -> Result<Response<Body>, Error> {
    let mut builder = Response::builder().status(status);

    for (name, value) in CORS_HEADERS {
        builder = builder.header(name, value);
    }

    let resp = match body {
        Some(text) => builder
            .header(CONTENT_TYPE, "application/json")
            .body(Body::Text(text))?,
        None => builder.body(Body::Empty)?,
    };

    Ok(resp)
}

fn error_response(status: StatusCode, message: &str) -> Result<Response<Body>, Error> {
    respond(status, Some(json!({ "error": message }).to_string()))
}
