//! HTTP client for the shuttle backend REST API.
//!
//! Covers the catalog (`GET /buses`, `GET /buses/{id}`), the authoritative
//! location snapshot (`GET /buses/{id}/location`) and the driver-side
//! producer endpoint (`POST /buses/{id}/location`).

use std::time::Duration;

use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::TokenStore;
use crate::tracker::types::{LocationSample, RawLocation};

#[derive(Debug, Error)]
pub enum RestError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Unexpected status: {0}")]
    Status(StatusCode),
    #[error("Parse error: {0}")]
    Parse(String),
}

/// A bus as returned by the catalog listing.
#[derive(Debug, Clone, Deserialize)]
pub struct Bus {
    pub id: i64,
    pub name: Option<String>,
}

impl Bus {
    /// Display label: the bus name when present, `Bus {id}` otherwise.
    pub fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| format!("Bus {}", self.id))
    }
}

/// Bus detail including its stop list.
///
/// The backend has returned stops both at the top level and nested under
/// `route`; both shapes are accepted.
#[derive(Debug, Clone, Deserialize)]
pub struct BusDetail {
    pub id: i64,
    pub name: Option<String>,
    #[serde(default)]
    stops: Vec<RawStop>,
    route: Option<RouteDetail>,
}

#[derive(Debug, Clone, Deserialize)]
struct RouteDetail {
    #[serde(default)]
    stops: Vec<RawStop>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawStop {
    name: Option<String>,
    label: Option<String>,
}

impl BusDetail {
    /// Stop display labels in route order. Unnamed stops get a positional
    /// placeholder so the list stays aligned with the route.
    pub fn stop_labels(&self) -> Vec<String> {
        let raw = if self.stops.is_empty() {
            self.route.as_ref().map(|r| r.stops.as_slice()).unwrap_or(&[])
        } else {
            self.stops.as_slice()
        };
        raw.iter()
            .enumerate()
            .map(|(i, stop)| {
                stop.name
                    .clone()
                    .or_else(|| stop.label.clone())
                    .unwrap_or_else(|| format!("Stop {}", i + 1))
            })
            .collect()
    }
}

/// One GPS fix as published by a driver's device.
#[derive(Debug, Clone, Serialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    /// ISO 8601/RFC 3339 capture time.
    pub timestamp: String,
}

impl LocationFix {
    /// Fix stamped with the current time and no motion metadata.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: None,
            speed: None,
            heading: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

/// REST API client
pub struct RestClient {
    client: Client,
    base_url: String,
    tokens: TokenStore,
}

impl RestClient {
    pub fn new(
        base_url: impl Into<String>,
        tokens: TokenStore,
        timeout: Duration,
    ) -> Result<Self, RestError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| RestError::Network(format!("Failed to build HTTP client: {}", e)))?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url, tokens })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Attach the current bearer token, read per request so a refreshed
    /// credential is picked up without rebuilding the client.
    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.tokens.get() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, RestError> {
        let response = request
            .send()
            .await
            .map_err(|e| RestError::Network(e.to_string()))?;

        // Stale credential: drop it so the surrounding app can re-authenticate.
        if response.status() == StatusCode::UNAUTHORIZED {
            self.tokens.clear();
        }

        Ok(response)
    }

    /// List all buses known to the backend.
    pub async fn list_buses(&self) -> Result<Vec<Bus>, RestError> {
        let response = self.send(self.authorize(self.client.get(self.url("/buses")))).await?;
        if !response.status().is_success() {
            return Err(RestError::Status(response.status()));
        }
        response.json().await.map_err(|e| RestError::Parse(e.to_string()))
    }

    /// Fetch one bus with its stop list.
    pub async fn get_bus(&self, bus_id: &str) -> Result<BusDetail, RestError> {
        let response = self
            .send(self.authorize(self.client.get(self.url(&format!("/buses/{}", bus_id)))))
            .await?;
        if !response.status().is_success() {
            return Err(RestError::Status(response.status()));
        }
        response.json().await.map_err(|e| RestError::Parse(e.to_string()))
    }

    /// One snapshot fetch of the current location record.
    ///
    /// `Ok(None)` covers both "no record" (404) and "record without a usable
    /// coordinate pair": the consumer only distinguishes whether coordinates
    /// exist, not why they are missing. Transport and server failures are
    /// returned as errors for the caller to absorb.
    pub async fn fetch_location(&self, bus_id: &str) -> Result<Option<LocationSample>, RestError> {
        let response = self
            .send(self.authorize(
                self.client.get(self.url(&format!("/buses/{}/location", bus_id))),
            ))
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(RestError::Status(response.status()));
        }

        let raw: RawLocation = response
            .json()
            .await
            .map_err(|e| RestError::Parse(e.to_string()))?;
        Ok(raw.into_sample(bus_id, Utc::now()))
    }

    /// Producer side: publish one GPS fix for a bus.
    pub async fn post_location(&self, bus_id: &str, fix: &LocationFix) -> Result<(), RestError> {
        let response = self
            .send(self.authorize(
                self.client
                    .post(self.url(&format!("/buses/{}/location", bus_id)))
                    .json(fix),
            ))
            .await?;

        if !response.status().is_success() {
            return Err(RestError::Status(response.status()));
        }
        Ok(())
    }
}
