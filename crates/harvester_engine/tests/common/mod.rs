#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

use chrono::{DateTime, Utc};
use harvester_core::{Message, Order, Timeline};
use harvester_engine::{
    CollaboratorError, ConfigMap, Crawler, DurableStore, PeerDirectory, Replicator,
    RetentionBucket, Scraper, StoredQuery, SuggestRequest, SuggestionCatalog, Suggestions,
    TrendingTopics, Upgrader, UserDirectory,
};

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(node_logging::initialize_for_tests);
}

pub fn config(pairs: &[(&str, &str)]) -> ConfigMap {
    ConfigMap::from_pairs(pairs.iter().copied())
}

pub fn at(timestamp: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(timestamp)
        .unwrap()
        .with_timezone(&Utc)
}

pub fn message(id: &str, created_at: &str) -> Message {
    Message {
        id: id.to_string(),
        screen_name: format!("user{id}"),
        text: format!("message {id}"),
        created_at: at(created_at),
        favourites_count: 0,
        retweet_count: 0,
        mentions: Vec::new(),
        hashtags: Vec::new(),
        place_name: None,
        user_id: None,
    }
}

pub fn timeline(messages: Vec<Message>) -> Timeline {
    Timeline::from_messages(Order::CreatedAt, messages)
}

/// `count` distinct messages, one minute apart.
pub fn many_messages(count: usize) -> Timeline {
    let base = at("2016-03-01T00:00:00Z");
    let messages = (0..count).map(|index| {
        let mut message = message(&index.to_string(), "2016-03-01T00:00:00Z");
        message.created_at = base + chrono::TimeDelta::minutes(index as i64);
        message
    });
    timeline(messages.collect())
}

#[derive(Default)]
pub struct FakeScraper {
    results: Mutex<HashMap<String, Timeline>>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeScraper {
    pub fn with_result(self, query: &str, result: Timeline) -> Self {
        self.results.lock().unwrap().insert(query.to_string(), result);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Scraper for FakeScraper {
    fn search(
        &self,
        query: &str,
        order: Order,
        _allow_paging: bool,
        _limit: usize,
    ) -> Result<Timeline, CollaboratorError> {
        self.calls.lock().unwrap().push(query.to_string());
        match self.results.lock().unwrap().get(query) {
            Some(result) => Ok(result.clone()),
            None => Err(CollaboratorError::Other(format!("no result for {query}"))),
        }
    }
}

#[derive(Default)]
pub struct FakeCatalog {
    responses: Mutex<VecDeque<Result<Suggestions, CollaboratorError>>>,
    cached: Mutex<Timeline>,
    pub requests: Mutex<Vec<SuggestRequest>>,
    pub cache_samples: Mutex<Vec<usize>>,
}

impl FakeCatalog {
    pub fn suggesting(self, queries: &[&str], total_backlog: u64) -> Self {
        let suggestions = Suggestions {
            queries: queries
                .iter()
                .map(|query| harvester_core::ScoredQuery::with_default_score(*query))
                .collect(),
            total_backlog,
        };
        self.responses.lock().unwrap().push_back(Ok(suggestions));
        self
    }

    pub fn failing(self) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(CollaboratorError::Network("peer down".into())));
        self
    }

    pub fn with_cache(self, cached: Timeline) -> Self {
        *self.cached.lock().unwrap() = cached;
        self
    }

    pub fn requests(&self) -> Vec<SuggestRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn cache_samples(&self) -> Vec<usize> {
        self.cache_samples.lock().unwrap().clone()
    }
}

impl SuggestionCatalog for FakeCatalog {
    fn suggest(&self, request: &SuggestRequest) -> Result<Suggestions, CollaboratorError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Suggestions::default()))
    }

    fn sample_cached(&self, count: usize) -> Result<Timeline, CollaboratorError> {
        self.cache_samples.lock().unwrap().push(count);
        Ok(self.cached.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct FakeTrends {
    pub topics: HashMap<String, Vec<String>>,
}

impl TrendingTopics for FakeTrends {
    fn locations(&self) -> Result<Vec<String>, CollaboratorError> {
        let mut locations: Vec<String> = self.topics.keys().cloned().collect();
        locations.sort();
        Ok(locations)
    }

    fn trends(&self, location: &str) -> Result<Vec<String>, CollaboratorError> {
        Ok(self.topics.get(location).cloned().unwrap_or_default())
    }
}

/// Records every push; accepts once `fail_first` attempts have failed.
pub struct RecordingReplicator {
    fail_first: usize,
    attempts: AtomicUsize,
    pub pushes: Mutex<Vec<Timeline>>,
}

impl RecordingReplicator {
    pub fn accepting() -> Self {
        Self::failing_first(0)
    }

    pub fn rejecting() -> Self {
        Self::failing_first(usize::MAX)
    }

    pub fn failing_first(fail_first: usize) -> Self {
        Self {
            fail_first,
            attempts: AtomicUsize::new(0),
            pushes: Mutex::new(Vec::new()),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn pushes(&self) -> Vec<Timeline> {
        self.pushes.lock().unwrap().clone()
    }
}

impl Replicator for RecordingReplicator {
    fn push(&self, _peers: &[String], timeline: &Timeline) -> bool {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        self.pushes.lock().unwrap().push(timeline.clone());
        attempt >= self.fail_first
    }
}

#[derive(Default)]
pub struct FakeStore {
    pub due: Mutex<Vec<StoredQuery>>,
    pub deleted: Mutex<Vec<String>>,
    pub recorded: Mutex<Vec<(String, usize)>>,
    pub sweeps: Mutex<Vec<(RetentionBucket, DateTime<Utc>)>>,
}

impl FakeStore {
    pub fn with_due(queries: &[&str]) -> Self {
        let store = Self::default();
        *store.due.lock().unwrap() = queries
            .iter()
            .map(|query| StoredQuery {
                query: query.to_string(),
                retrieval_next: at("2016-03-01T00:00:00Z"),
            })
            .collect();
        store
    }
}

impl DurableStore for FakeStore {
    fn due_queries(
        &self,
        _now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<StoredQuery>, CollaboratorError> {
        let mut due = self.due.lock().unwrap();
        let take = limit.min(due.len());
        Ok(due.drain(..take).collect())
    }

    fn delete_query(&self, query: &str) -> Result<(), CollaboratorError> {
        self.deleted.lock().unwrap().push(query.to_string());
        Ok(())
    }

    fn record_retrieval(&self, query: &str, timeline: &Timeline) -> Result<(), CollaboratorError> {
        self.recorded
            .lock()
            .unwrap()
            .push((query.to_string(), timeline.len()));
        Ok(())
    }

    fn delete_older_than(
        &self,
        bucket: RetentionBucket,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, CollaboratorError> {
        self.sweeps.lock().unwrap().push((bucket, cutoff));
        Ok(3)
    }
}

#[derive(Default)]
pub struct FakeUsers {
    pub pending: Mutex<Option<Vec<u64>>>,
    pub announced: Mutex<Vec<u64>>,
    pub rate_limited: bool,
}

impl UserDirectory for FakeUsers {
    fn announce(&self, ids: &[u64]) {
        self.announced.lock().unwrap().extend_from_slice(ids);
    }

    fn take_pending_chunk(&self) -> Option<Vec<u64>> {
        self.pending.lock().unwrap().take()
    }

    fn resolve(&self, ids: &[u64]) -> Result<usize, CollaboratorError> {
        if self.rate_limited {
            return Err(CollaboratorError::RateLimited("users/lookup".into()));
        }
        Ok(ids.len())
    }
}

#[derive(Default)]
pub struct FakePeers {
    pub announcements: AtomicUsize,
    pub heals: Mutex<Vec<f32>>,
}

impl PeerDirectory for FakePeers {
    fn announce(&self, peers: &[String]) -> usize {
        self.announcements.fetch_add(1, Ordering::SeqCst);
        peers.len()
    }

    fn heal_latency(&self, factor: f32) {
        self.heals.lock().unwrap().push(factor);
    }
}

#[derive(Default)]
pub struct FakeCrawler {
    pub seed: Option<String>,
    pub seeded: AtomicUsize,
}

impl Crawler for FakeCrawler {
    fn pending(&self) -> usize {
        0
    }

    fn process(&self) -> usize {
        0
    }

    fn seed_random_term(&self) -> Option<String> {
        self.seeded.fetch_add(1, Ordering::SeqCst);
        self.seed.clone()
    }
}

pub enum UpgradeBehaviour {
    Succeed,
    Fail,
    Panic,
}

pub struct FakeUpgrader {
    pub behaviour: UpgradeBehaviour,
    pub runs: AtomicUsize,
}

impl FakeUpgrader {
    pub fn new(behaviour: UpgradeBehaviour) -> Self {
        Self {
            behaviour,
            runs: AtomicUsize::new(0),
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

impl Upgrader for FakeUpgrader {
    fn upgrade(&self) -> Result<Vec<String>, CollaboratorError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            UpgradeBehaviour::Succeed => Ok(vec!["upgraded".to_string()]),
            UpgradeBehaviour::Fail => Err(CollaboratorError::Other("script missing".into())),
            UpgradeBehaviour::Panic => panic!("upgrade script crashed"),
        }
    }
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
