use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use node_logging::node_warn;

use crate::ConfigError;

/// Flat `dotted.key -> value` configuration, as read from the node's config file.
///
/// Typed getters fall back to the given default when a key is missing; a
/// malformed value is logged and also falls back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigMap {
    values: BTreeMap<String, String>,
}

impl ConfigMap {
    pub fn new(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn raw(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|value| value.trim())
    }

    pub fn get_str(&self, key: &str, default: &str) -> String {
        self.raw(key).unwrap_or(default).to_string()
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.raw(key) {
            None => default,
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => true,
                "false" | "no" | "off" | "0" => false,
                _ => fallback(key, value, "expected a boolean", default),
            },
        }
    }

    pub fn get_int<T>(&self, key: &str, default: T) -> T
    where
        T: FromStr + Copy,
        T::Err: std::fmt::Display,
    {
        match self.parse(key) {
            Ok(Some(value)) => value,
            Ok(None) => default,
            Err(err) => {
                node_warn!("{}; using default", err);
                default
            }
        }
    }

    pub fn get_millis(&self, key: &str, default_ms: u64) -> Duration {
        Duration::from_millis(self.get_int(key, default_ms))
    }

    pub fn get_secs(&self, key: &str, default_secs: u64) -> Duration {
        Duration::from_secs(self.get_int(key, default_secs))
    }

    /// Comma separated list with blank entries removed.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.raw(key)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|entry| !entry.is_empty())
                    .map(ToOwned::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let Some(value) = self.raw(key) else {
            return Ok(None);
        };
        value.parse::<T>().map(Some).map_err(|err| ConfigError {
            key: key.to_string(),
            value: value.to_string(),
            reason: err.to_string(),
        })
    }
}

fn fallback<T>(key: &str, value: &str, reason: &str, default: T) -> T {
    let err = ConfigError {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    };
    node_warn!("{}; using default", err);
    default
}

/// Retry schedule for pushing a timeline to peers.
///
/// After the first attempt, up to `max_retries` further attempts follow;
/// retry `i` (0-based) waits `(i + 1) * backoff` before it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn delay(&self, retry: u32) -> Duration {
        self.backoff * (retry + 1)
    }

    pub fn from_config(config: &ConfigMap) -> Self {
        Self {
            max_retries: config.get_int("caretaker.backendpush.retries", 5),
            backoff: config.get_millis("caretaker.backendpush.backoff", 3000),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff: Duration::from_millis(3000),
        }
    }
}

/// Concurrent harvest rounds run by the caretaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalSettings {
    pub enabled: bool,
    pub concurrency: usize,
    pub loops: usize,
    pub sleep_base: Duration,
    pub sleep_random_offset: Duration,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self::from_config(&ConfigMap::default())
    }
}

impl RetrievalSettings {
    pub fn from_config(config: &ConfigMap) -> Self {
        Self {
            enabled: config.get_bool("retrieval.forbackend.enabled", false),
            concurrency: config.get_int("retrieval.forbackend.concurrency", 1usize).max(1),
            loops: config.get_int("retrieval.forbackend.loops", 10),
            sleep_base: config.get_millis("retrieval.forbackend.sleep.base", 300),
            sleep_random_offset: config.get_millis("retrieval.forbackend.sleep.randomoffset", 100),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaretakerSettings {
    /// Peer backends batches are replicated to.
    pub peers: Vec<String>,
    pub retry: RetryPolicy,
    pub retrieval: RetrievalSettings,
    pub queries_enabled: bool,
    pub user_enabled: bool,
    pub autodeletion: bool,
    pub push_min_size: usize,
    pub push_max_size: usize,
    pub busy_pause: Duration,
    pub idle_pause: Duration,
    pub upgrade_interval: Duration,
    pub hello_period: Duration,
    pub deletion_period: Duration,
    pub suggestion_cache_limit: usize,
    pub due_query_limit: usize,
    pub due_query_search_limit: usize,
    pub crawl_steps: usize,
    pub latency_heal_factor: f32,
    pub rate_limit_pause: Duration,
}

impl Default for CaretakerSettings {
    fn default() -> Self {
        Self::from_config(&ConfigMap::default())
    }
}

impl CaretakerSettings {
    pub fn from_config(config: &ConfigMap) -> Self {
        Self {
            peers: config.get_list("backend"),
            retry: RetryPolicy::from_config(config),
            retrieval: RetrievalSettings::from_config(config),
            queries_enabled: config.get_bool("retrieval.queries.enabled", false),
            user_enabled: config.get_bool("retrieval.user.enabled", false),
            autodeletion: config.get_bool("autodeletion", false),
            push_min_size: 200,
            push_max_size: 1000,
            busy_pause: config.get_millis("caretaker.pause.busy", 500),
            idle_pause: config.get_millis("caretaker.pause.idle", 5000),
            upgrade_interval: Duration::from_secs(24 * 60 * 60),
            hello_period: Duration::from_secs(10 * 60),
            deletion_period: Duration::from_secs(60),
            suggestion_cache_limit: 100,
            due_query_limit: 10,
            due_query_search_limit: 10_000,
            crawl_steps: 10,
            latency_heal_factor: 0.95,
            rate_limit_pause: config.get_millis("harvester.failure_pause", 10_000),
        }
    }
}

/// Knobs of the Kaizen family of strategies.
#[derive(Debug, Clone, PartialEq)]
pub struct KaizenSettings {
    pub queries_limit: usize,
    pub suggestions_count: usize,
    pub suggestions_random: usize,
    pub place_radius: u32,
    pub verbose: bool,
    /// How long the blocking frontier waits for room before dropping a query.
    pub block_time: Duration,
}

impl KaizenSettings {
    pub fn from_config(config: &ConfigMap) -> Self {
        Self {
            queries_limit: config.get_int("harvester.kaizen.queries_limit", 500),
            suggestions_count: config.get_int("harvester.kaizen.suggestions_count", 1000),
            suggestions_random: config.get_int("harvester.kaizen.suggestions_random", 5),
            place_radius: config.get_int("harvester.kaizen.place_radius", 5),
            verbose: config.get_bool("harvester.kaizen.verbose", true),
            block_time: config.get_secs("harvester.blocking_kaizen.block_time", 120),
        }
    }
}

/// Settings shared by every harvest strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct HarvesterSettings {
    /// Push targets for harvested timelines.
    pub backend: Vec<String>,
    pub search_limit: usize,
    /// Pause after the suggestion catalog failed or had nothing to offer.
    pub failure_pause: Duration,
    pub push_retry: RetryPolicy,
    pub push_inbox: usize,
    pub kaizen: KaizenSettings,
}

impl Default for HarvesterSettings {
    fn default() -> Self {
        Self::from_config(&ConfigMap::default())
    }
}

impl HarvesterSettings {
    pub fn from_config(config: &ConfigMap) -> Self {
        Self {
            backend: config.get_list("backend"),
            search_limit: config.get_int("harvester.search_limit", 400),
            failure_pause: config.get_millis("harvester.failure_pause", 10_000),
            push_retry: RetryPolicy::from_config(config),
            push_inbox: 16,
            kaizen: KaizenSettings::from_config(config),
        }
    }
}
