use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use harvester_core::{Message, Order, ScoredQuery, Timeline, DEFAULT_SCORE};
use node_logging::{node_debug, node_warn};
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::runtime::Runtime;
use url::Url;

use crate::replicate::encode_timeline;
use crate::services::{
    PeerDirectory, Replicator, Scraper, SuggestRequest, SuggestionCatalog, Suggestions,
};
use crate::CollaboratorError;

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Identifies this node in pushed payloads.
    pub peer_hash: Option<String>,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
            peer_hash: None,
        }
    }
}

/// Blocking facade over an async `reqwest` client.
///
/// Calls run on a shared tokio runtime via `block_on`, so they must come from
/// plain threads (caretaker, harvest workers, push executors), never from
/// inside the runtime itself.
#[derive(Clone)]
pub struct PeerClient {
    runtime: Arc<Runtime>,
    client: reqwest::Client,
    settings: HttpSettings,
}

impl PeerClient {
    pub fn new(settings: HttpSettings) -> Result<Self, CollaboratorError> {
        let runtime = Runtime::new()?;
        Self::with_runtime(Arc::new(runtime), settings)
    }

    pub fn with_runtime(
        runtime: Arc<Runtime>,
        settings: HttpSettings,
    ) -> Result<Self, CollaboratorError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.request_timeout)
            .build()
            .map_err(|err| CollaboratorError::Network(err.to_string()))?;
        Ok(Self {
            runtime,
            client,
            settings,
        })
    }

    pub fn settings(&self) -> &HttpSettings {
        &self.settings
    }

    pub fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, CollaboratorError> {
        let display = url.to_string();
        self.runtime.block_on(async {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(map_reqwest_error)?;
            let status = response.status();
            if !status.is_success() {
                return Err(status_error(status, &display));
            }
            let body = response.bytes().await.map_err(map_reqwest_error)?;
            serde_json::from_slice(&body).map_err(|err| CollaboratorError::Decode(err.to_string()))
        })
    }

    /// POSTs an urlencoded form; returns the HTTP status on any response.
    pub fn post_form(&self, url: Url, fields: &[(&str, &str)]) -> Result<u16, CollaboratorError> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .finish();
        self.runtime.block_on(async {
            let response = self
                .client
                .post(url)
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(body)
                .send()
                .await
                .map_err(map_reqwest_error)?;
            Ok::<u16, CollaboratorError>(response.status().as_u16())
        })
    }
}

/// Resolves `path` against a peer stub such as `http://peer.example:9000/`.
pub fn endpoint(peer: &str, path: &str) -> Result<Url, CollaboratorError> {
    let base = format!("{}/", peer.trim().trim_end_matches('/'));
    Url::parse(&base)
        .and_then(|base| base.join(path))
        .map_err(|err| CollaboratorError::InvalidEndpoint(format!("{peer}: {err}")))
}

fn status_error(status: reqwest::StatusCode, url: &str) -> CollaboratorError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return CollaboratorError::RateLimited(url.to_string());
    }
    CollaboratorError::HttpStatus {
        status: status.as_u16(),
        url: url.to_string(),
    }
}

fn map_reqwest_error(err: reqwest::Error) -> CollaboratorError {
    if err.is_timeout() {
        return CollaboratorError::Timeout(err.to_string());
    }
    CollaboratorError::Network(err.to_string())
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(number) => Ok(number.as_u64().unwrap_or(0)),
        serde_json::Value::String(text) => Ok(text.trim().parse().unwrap_or(0)),
        _ => Ok(0),
    }
}

#[derive(Debug, Default, Deserialize)]
struct ResponseMetadata {
    #[serde(default, deserialize_with = "lenient_u64")]
    hits: u64,
}

#[derive(Debug, Deserialize)]
struct SuggestedQuery {
    query: String,
    #[serde(default)]
    score: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SuggestResponse {
    #[serde(default)]
    search_metadata: ResponseMetadata,
    #[serde(default)]
    queries: Vec<SuggestedQuery>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    search_metadata: ResponseMetadata,
    #[serde(default)]
    statuses: Vec<Message>,
}

impl SearchResponse {
    fn into_timeline(self, order: Order) -> Timeline {
        let mut timeline = Timeline::from_messages(order, self.statuses);
        timeline.set_hits(self.search_metadata.hits);
        timeline
    }
}

/// Suggestion catalog and message cache of a backend peer.
pub struct RemoteCatalog {
    client: PeerClient,
    backend: String,
}

impl RemoteCatalog {
    pub fn new(client: PeerClient, backend: impl Into<String>) -> Self {
        Self {
            client,
            backend: backend.into(),
        }
    }
}

impl SuggestionCatalog for RemoteCatalog {
    fn suggest(&self, request: &SuggestRequest) -> Result<Suggestions, CollaboratorError> {
        let mut url = endpoint(&self.backend, "api/suggest.json")?;
        url.query_pairs_mut()
            .append_pair("q", &request.filters)
            .append_pair("source", "query")
            .append_pair("count", &request.count.to_string())
            .append_pair("order", request.order.as_param())
            .append_pair("orderby", &request.sort_field)
            .append_pair("until", "now")
            .append_pair("selectby", &request.sort_field)
            .append_pair("random", &request.random_sample.to_string());
        let response: SuggestResponse = self.client.get_json(url)?;
        Ok(Suggestions {
            queries: response
                .queries
                .into_iter()
                .map(|entry| ScoredQuery::new(entry.query, entry.score.unwrap_or(DEFAULT_SCORE)))
                .collect(),
            total_backlog: response.search_metadata.hits,
        })
    }

    fn sample_cached(&self, count: usize) -> Result<Timeline, CollaboratorError> {
        let mut url = endpoint(&self.backend, "api/search.json")?;
        url.query_pairs_mut()
            .append_pair("q", "")
            .append_pair("source", "cache")
            .append_pair("count", &count.to_string());
        let response: SearchResponse = self.client.get_json(url)?;
        Ok(response.into_timeline(Order::CreatedAt))
    }
}

/// Scraper that delegates retrieval to a peer's search API.
pub struct RemoteSearchScraper {
    client: PeerClient,
    backend: String,
    source: String,
}

impl RemoteSearchScraper {
    pub fn new(client: PeerClient, backend: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            client,
            backend: backend.into(),
            source: source.into(),
        }
    }
}

impl Scraper for RemoteSearchScraper {
    fn search(
        &self,
        query: &str,
        order: Order,
        allow_paging: bool,
        limit: usize,
    ) -> Result<Timeline, CollaboratorError> {
        let mut url = endpoint(&self.backend, "api/search.json")?;
        url.query_pairs_mut()
            .append_pair("q", query)
            .append_pair("source", &self.source)
            .append_pair("order", order.as_param())
            .append_pair("count", &limit.to_string())
            .append_pair("paging", if allow_paging { "true" } else { "false" });
        let response: SearchResponse = self.client.get_json(url)?;
        Ok(response.into_timeline(order).with_query(query))
    }
}

/// Pushes timelines to each peer's `api/push.json`.
pub struct HttpReplicator {
    client: PeerClient,
}

impl HttpReplicator {
    pub fn new(client: PeerClient) -> Self {
        Self { client }
    }
}

impl Replicator for HttpReplicator {
    fn push(&self, peers: &[String], timeline: &Timeline) -> bool {
        let data = match encode_timeline(timeline, self.client.settings().peer_hash.as_deref()) {
            Ok(data) => data,
            Err(err) => {
                node_warn!("could not encode timeline for push: {}", err);
                return false;
            }
        };

        let mut accepted = 0usize;
        let mut failed = 0usize;
        for peer in peers {
            let result = endpoint(peer, "api/push.json")
                .and_then(|url| self.client.post_form(url, &[("data", data.as_str())]));
            match result {
                Ok(status) if (200..300).contains(&status) => accepted += 1,
                Ok(status) => {
                    failed += 1;
                    node_debug!("push to {} answered with status {}", peer, status);
                }
                Err(err) => {
                    failed += 1;
                    node_debug!("push to {} failed: {}", peer, err);
                }
            }
        }
        if failed > 0 {
            node_debug!(
                "push of {} messages: {} peers accepted, {} failed",
                timeline.len(),
                accepted,
                failed
            );
        }
        accepted > 0
    }
}

/// Hello pings with per-peer latency bookkeeping.
pub struct HttpPeerDirectory {
    client: PeerClient,
    latency_ms: Mutex<HashMap<String, f64>>,
}

impl HttpPeerDirectory {
    pub fn new(client: PeerClient) -> Self {
        Self {
            client,
            latency_ms: Mutex::new(HashMap::new()),
        }
    }

    pub fn latency(&self, peer: &str) -> Option<f64> {
        self.latency_ms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(peer)
            .copied()
    }

    fn hello(&self, peer: &str) -> Result<(), CollaboratorError> {
        let url = endpoint(peer, "api/hello.json")?;
        let _: serde_json::Value = self.client.get_json(url)?;
        Ok(())
    }
}

impl PeerDirectory for HttpPeerDirectory {
    fn announce(&self, peers: &[String]) -> usize {
        let mut answered = 0;
        for peer in peers {
            let start = Instant::now();
            match self.hello(peer) {
                Ok(()) => {
                    answered += 1;
                    let elapsed = start.elapsed().as_secs_f64() * 1000.0;
                    self.latency_ms
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(peer.clone(), elapsed);
                }
                Err(err) => node_debug!("hello to {} failed: {}", peer, err),
            }
        }
        answered
    }

    fn heal_latency(&self, factor: f32) {
        let factor = f64::from(factor);
        for latency in self
            .latency_ms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values_mut()
        {
            *latency *= factor;
        }
    }
}
