//! Contracts of the collaborators the harvester and caretaker drive.
//!
//! All calls are synchronous; they run on the caretaker thread or on harvest
//! workers. Implementations must be thread-safe.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use harvester_core::{Order, ScoredQuery, Timeline};

use crate::CollaboratorError;

/// Retrieves messages for a query from the external source.
pub trait Scraper: Send + Sync {
    fn search(
        &self,
        query: &str,
        order: Order,
        allow_paging: bool,
        limit: usize,
    ) -> Result<Timeline, CollaboratorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn as_param(self) -> &'static str {
        match self {
            SortOrder::Ascending => "asc",
            SortOrder::Descending => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuggestRequest {
    pub filters: String,
    pub sort_field: String,
    pub order: SortOrder,
    pub count: usize,
    /// Asks the catalog to sample randomly among this many top entries, so
    /// cooperating nodes do not all pick the same topics.
    pub random_sample: usize,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Suggestions {
    pub queries: Vec<ScoredQuery>,
    /// Number of queries the catalog holds that are due for retrieval.
    pub total_backlog: u64,
}

/// Remote catalog of queries due for harvesting, plus the backend's message cache.
pub trait SuggestionCatalog: Send + Sync {
    fn suggest(&self, request: &SuggestRequest) -> Result<Suggestions, CollaboratorError>;

    /// Recently cached messages of the backend, used to bootstrap context.
    fn sample_cached(&self, count: usize) -> Result<Timeline, CollaboratorError>;
}

/// Trending topics of an authenticated external source.
pub trait TrendingTopics: Send + Sync {
    fn locations(&self) -> Result<Vec<String>, CollaboratorError>;

    fn trends(&self, location: &str) -> Result<Vec<String>, CollaboratorError>;
}

/// Transmits a timeline to peers. Succeeds if at least one peer accepted it.
pub trait Replicator: Send + Sync {
    fn push(&self, peers: &[String], timeline: &Timeline) -> bool;
}

/// Timelines waiting to be replicated in batches.
pub trait OutgoingBuffer: Send + Sync {
    fn transmit(&self, timeline: Timeline);

    /// Merges queued timelines into one batch of at least `min_size` messages,
    /// stopping once `max_size` is reached. `None` while fewer than `min_size`
    /// messages are queued.
    fn take_batch(&self, order: Order, min_size: usize, max_size: usize) -> Option<Timeline>;

    /// Number of queued messages.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredQuery {
    pub query: String,
    pub retrieval_next: DateTime<Utc>,
}

/// Time-bucketed message indexes with bounded retention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionBucket {
    Hour,
    Day,
    Week,
    Month,
}

impl RetentionBucket {
    pub fn max_age(self) -> Duration {
        const HOUR: u64 = 60 * 60;
        Duration::from_secs(match self {
            RetentionBucket::Hour => HOUR,
            RetentionBucket::Day => 24 * HOUR,
            RetentionBucket::Week => 7 * 24 * HOUR,
            RetentionBucket::Month => 30 * 24 * HOUR,
        })
    }

    /// Oldest creation time still kept in this bucket at `now`.
    pub fn cutoff(self, now: DateTime<Utc>) -> DateTime<Utc> {
        TimeDelta::from_std(self.max_age())
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn name(self) -> &'static str {
        match self {
            RetentionBucket::Hour => "hour",
            RetentionBucket::Day => "day",
            RetentionBucket::Week => "week",
            RetentionBucket::Month => "month",
        }
    }
}

/// The node's durable query and message storage.
pub trait DurableStore: Send + Sync {
    /// Stored queries whose retrieval is due at `now`, earliest first.
    fn due_queries(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<StoredQuery>, CollaboratorError>;

    fn delete_query(&self, query: &str) -> Result<(), CollaboratorError>;

    /// Updates propagation bookkeeping (next due time) after a retrieval.
    fn record_retrieval(&self, query: &str, timeline: &Timeline) -> Result<(), CollaboratorError>;

    fn delete_older_than(
        &self,
        bucket: RetentionBucket,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, CollaboratorError>;
}

/// Known peers and their measured latency.
pub trait PeerDirectory: Send + Sync {
    /// Announces this node; returns how many peers answered.
    fn announce(&self, peers: &[String]) -> usize;

    /// Multiplies stored latencies by `factor` so slow peers get picked again.
    fn heal_latency(&self, factor: f32);
}

/// Users discovered in harvested content that still need a profile lookup.
pub trait UserDirectory: Send + Sync {
    fn announce(&self, ids: &[u64]);

    fn take_pending_chunk(&self) -> Option<Vec<u64>>;

    fn resolve(&self, ids: &[u64]) -> Result<usize, CollaboratorError>;
}

pub trait Crawler: Send + Sync {
    fn pending(&self) -> usize;

    /// Runs one crawl step; returns the amount of work done.
    fn process(&self) -> usize;

    /// Stacks a crawl for a random known term, returning the term.
    fn seed_random_term(&self) -> Option<String>;
}

/// Imports dump files dropped into the node's import directory.
pub trait DumpImporter: Send + Sync {
    fn import_ready(&self, limit: usize) -> Result<usize, CollaboratorError>;
}

pub trait Upgrader: Send + Sync {
    /// Runs the upgrade procedure, returning its output lines.
    fn upgrade(&self) -> Result<Vec<String>, CollaboratorError>;
}

/// A cache the caretaker clears once it grows too large.
pub trait EvictableCache: Send + Sync {
    fn len(&self) -> usize;

    fn clear(&self);

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
