//! Client side of the watchlist API with in-flight request coalescing.
//!
//! One slot remembers the lookup currently on the wire. Asking again for the
//! same normalised username while it runs joins that lookup instead of
//! issuing a second request. A different username replaces the slot and runs
//! on its own; nothing is queued. Whichever lookup owns the slot clears it
//! when it settles, success or not, and only if the slot still holds that
//! same lookup.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use reqwest::header::CACHE_CONTROL;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::canonical::normalize_username;
use crate::error::LookupError;

pub const DEFAULT_API_URL: &str = "https://haveiwatchit.fly.dev/api/watchlist";

pub type LookupResult = Result<Arc<Vec<String>>, LookupError>;

/// A lookup that any number of callers can await.
pub type SharedLookup = Shared<BoxFuture<'static, LookupResult>>;

#[async_trait]
pub trait WatchlistTransport: Send + Sync {
    async fn fetch_uris(&self, id: &str) -> Result<Vec<String>, LookupError>;
}

/// Calls `GET <api>?user=<id>`.
pub struct HttpTransport {
    client: reqwest::Client,
    api_url: String,
}

#[derive(Deserialize)]
struct ApiError {
    error: Option<String>,
}

impl HttpTransport {
    pub fn new(api_url: impl Into<String>) -> Result<Self, LookupError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| LookupError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            api_url: api_url.into(),
        })
    }
}

#[async_trait]
impl WatchlistTransport for HttpTransport {
    async fn fetch_uris(&self, id: &str) -> Result<Vec<String>, LookupError> {
        let url = Url::parse_with_params(&self.api_url, &[("user", id)])
            .map_err(|e| LookupError::Transport(e.to_string()))?;
        let rsp = self
            .client
            .get(url)
            .header(CACHE_CONTROL, "no-store")
            .send()
            .await
            .map_err(|e| LookupError::Transport(e.to_string()))?;

        let status = rsp.status();
        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or_default().to_string();
            let message = rsp
                .json::<ApiError>()
                .await
                .ok()
                .and_then(|e| e.error)
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| {
                    if reason.is_empty() {
                        format!("HTTP {}", status.as_u16())
                    } else {
                        reason
                    }
                });
            return Err(LookupError::Api(message));
        }

        let body: serde_json::Value = rsp
            .json()
            .await
            .map_err(|_| LookupError::InvalidResponse)?;
        parse_uri_array(body)
    }
}

/// The API answers with a JSON array of URI strings; anything else is a
/// protocol error.
pub fn parse_uri_array(body: serde_json::Value) -> Result<Vec<String>, LookupError> {
    serde_json::from_value(body).map_err(|_| LookupError::InvalidResponse)
}

struct Slot {
    id: String,
    generation: u64,
    lookup: SharedLookup,
}

pub struct WatchlistClient {
    transport: Arc<dyn WatchlistTransport>,
    in_flight: Arc<Mutex<Option<Slot>>>,
    generation: AtomicU64,
}

impl WatchlistClient {
    pub fn new(transport: Arc<dyn WatchlistTransport>) -> Self {
        Self {
            transport,
            in_flight: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
        }
    }

    /// Starts a lookup for `username`, or joins the one already running for
    /// the same user. Fails fast on a blank username.
    pub fn lookup(&self, username: &str) -> Result<SharedLookup, LookupError> {
        let id = normalize_username(username);
        if id.is_empty() {
            return Err(LookupError::UsernameRequired);
        }

        let mut slot = lock(&self.in_flight);
        if let Some(current) = slot.as_ref().filter(|s| s.id == id) {
            debug!("[watchlist] joining in-flight lookup for {}", id);
            return Ok(current.lookup.clone());
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let transport = Arc::clone(&self.transport);
        let in_flight = Arc::clone(&self.in_flight);
        let request_id = id.clone();
        let lookup = async move {
            let result = transport.fetch_uris(&request_id).await.map(Arc::new);
            release(&in_flight, generation);
            result
        }
        .boxed()
        .shared();

        *slot = Some(Slot {
            id,
            generation,
            lookup: lookup.clone(),
        });
        Ok(lookup)
    }

    pub async fn fetch_uris(&self, username: &str) -> LookupResult {
        self.lookup(username)?.await
    }

    /// Username of the lookup currently holding the slot.
    pub fn in_flight(&self) -> Option<String> {
        lock(&self.in_flight).as_ref().map(|s| s.id.clone())
    }
}

fn release(in_flight: &Mutex<Option<Slot>>, generation: u64) {
    let mut slot = lock(in_flight);
    if slot.as_ref().is_some_and(|s| s.generation == generation) {
        *slot = None;
    }
}

fn lock(m: &Mutex<Option<Slot>>) -> MutexGuard<'_, Option<Slot>> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}
