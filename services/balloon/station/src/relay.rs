//! HTTP relay to the flight dashboards.
//!
//! Every post is fire-and-forget: it runs as its own task and only its
//! outcome feeds the endpoint's failure counter. An endpoint that fails
//! [`MAX_FAILURES`] times in a row is skipped until the process restarts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use balloon_storage::TransferStatus;
use balloon_wire::Location;
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::RelayError;

/// Consecutive failures after which an endpoint is skipped
pub const MAX_FAILURES: u32 = 5;
/// Minimum spacing between location posts of the same kind
pub const LOCATION_INTERVAL: Duration = Duration::from_secs(30);
/// Per-request timeout
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Stats path
pub const STATS_PATH: &str = "/api/stats/";
/// Locations path
pub const LOCATIONS_PATH: &str = "/api/locations/";
/// Photos path
pub const PHOTOS_PATH: &str = "/api/photos/";

/// A dashboard to post to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Base URL, e.g. `http://dashboard:8000`
    pub url: String,
    /// Auth token sent as `Authorization: Token <token>`
    pub token: String,
}

/// Whose position a location post describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocationKind {
    /// The balloon
    Balloon,
    /// The ground station (chase car)
    Chase,
}

impl LocationKind {
    /// Type letter understood by the dashboard
    pub fn code(self) -> &'static str {
        match self {
            LocationKind::Balloon => "B",
            LocationKind::Chase => "C",
        }
    }
}

/// One dashboard endpoint with its failure counter
#[derive(Debug, Clone)]
pub struct WebClient {
    endpoint: Endpoint,
    http: reqwest::Client,
    failures: Arc<AtomicU32>,
}

impl WebClient {
    /// Client for `endpoint`
    pub fn new(endpoint: Endpoint, http: reqwest::Client) -> Self {
        Self {
            endpoint,
            http,
            failures: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Base URL
    pub fn url(&self) -> &str {
        &self.endpoint.url
    }

    /// Consecutive failures so far
    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Whether posts are still attempted
    pub fn is_active(&self) -> bool {
        self.failures() < MAX_FAILURES
    }

    /// POST `body` to `path` in the background
    pub fn post(&self, path: &str, body: Value) -> JoinHandle<()> {
        let client = self.clone();
        let url = format!("{}{}", self.endpoint.url.trim_end_matches('/'), path);
        tokio::spawn(async move {
            debug!("POST {}: {}", url, body);
            match client.send(&url, &body).await {
                Ok(()) => client.failures.store(0, Ordering::Relaxed),
                Err(e) => {
                    let failures = client.failures.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!("POST {} failed ({} in a row): {}", url, failures, e);
                    if failures == MAX_FAILURES {
                        warn!(
                            "Deactivating {} after {} consecutive failures",
                            client.endpoint.url, failures
                        );
                    }
                }
            }
        })
    }

    async fn send(&self, url: &str, body: &Value) -> Result<(), RelayError> {
        let response = self
            .http
            .post(url)
            .header(AUTHORIZATION, format!("Token {}", self.endpoint.token))
            .json(body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::Status(status.as_u16()));
        }
        Ok(())
    }
}

/// Fans posts out to every active endpoint
#[derive(Debug, Clone)]
pub struct WebRelay {
    clients: Vec<WebClient>,
    location_interval: Duration,
    last_location: Arc<Mutex<HashMap<LocationKind, Instant>>>,
}

impl WebRelay {
    /// Relay to `endpoints`
    pub fn new(endpoints: Vec<Endpoint>) -> Result<Self, RelayError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        for endpoint in &endpoints {
            info!("Relaying to {}", endpoint.url);
        }
        Ok(Self {
            clients: endpoints
                .into_iter()
                .map(|endpoint| WebClient::new(endpoint, http.clone()))
                .collect(),
            location_interval: LOCATION_INTERVAL,
            last_location: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Relay that posts nowhere
    pub fn disabled() -> Self {
        Self {
            clients: Vec::new(),
            location_interval: LOCATION_INTERVAL,
            last_location: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Override the location throttle
    pub fn with_location_interval(mut self, interval: Duration) -> Self {
        self.location_interval = interval;
        self
    }

    /// Endpoints, active or not
    pub fn clients(&self) -> &[WebClient] {
        &self.clients
    }

    /// POST `body` to `path` on every active endpoint
    pub fn post(&self, path: &str, body: Value) -> Vec<JoinHandle<()>> {
        self.clients
            .iter()
            .filter(|client| {
                let active = client.is_active();
                if !active {
                    debug!("Skipping inactive endpoint {}", client.url());
                }
                active
            })
            .map(|client| client.post(path, body.clone()))
            .collect()
    }

    /// Post the merged stats document
    pub fn post_stats(&self, stats: Value) -> Vec<JoinHandle<()>> {
        self.post(STATS_PATH, stats)
    }

    /// Post a location unless one of the same kind went out within the
    /// throttle interval. Returns whether it was posted.
    pub fn post_location(&self, location: &Location, kind: LocationKind) -> bool {
        let now = Instant::now();
        {
            let mut last = self
                .last_location
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(previous) = last.get(&kind) {
                if now.duration_since(*previous) < self.location_interval {
                    return false;
                }
            }
            last.insert(kind, now);
        }

        self.post(
            LOCATIONS_PATH,
            json!({
                "latitude": location.latitude,
                "longitude": location.longitude,
                "altitude": location.altitude,
                "type": kind.code(),
            }),
        );
        true
    }

    /// Post a transfer's status
    pub fn post_photo(&self, status: &TransferStatus) -> Vec<JoinHandle<()>> {
        match serde_json::to_value(status) {
            Ok(body) => self.post(PHOTOS_PATH, body),
            Err(e) => {
                warn!("Cannot serialize transfer {} status: {}", status.index, e);
                Vec::new()
            }
        }
    }
}
