//! The caretaker: the node's single maintenance and scheduling loop.
mod round;

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use harvester_core::{accept_for_retrieval, Order, Timeline};
use node_logging::{
    current_iteration, node_debug, node_error, node_info, node_warn, set_iteration,
};
use rand::Rng;

use crate::config::CaretakerSettings;
use crate::harvester::Harvester;
use crate::replicate::push_with_retry;
use crate::services::{
    Crawler, DumpImporter, DurableStore, EvictableCache, OutgoingBuffer, PeerDirectory,
    Replicator, RetentionBucket, Scraper, Upgrader, UserDirectory,
};
use crate::signal::ShutdownSignal;
use crate::CollaboratorError;

pub use round::{run_harvest_rounds, RoundReport};

/// Dump files imported per iteration.
const DUMP_IMPORT_LIMIT: usize = 1000;
const DUE_QUERY_MAX_PAUSE_MS: u64 = 200;
const CRAWL_MAX_PAUSE_MS: u64 = 20;

/// Everything the caretaker drives. Only the replication path is mandatory.
#[derive(Clone)]
pub struct CaretakerServices {
    pub replicator: Arc<dyn Replicator>,
    pub outgoing: Arc<dyn OutgoingBuffer>,
    pub harvester: Option<Arc<dyn Harvester>>,
    pub scraper: Option<Arc<dyn Scraper>>,
    pub store: Option<Arc<dyn DurableStore>>,
    pub peers: Option<Arc<dyn PeerDirectory>>,
    pub users: Option<Arc<dyn UserDirectory>>,
    pub crawler: Option<Arc<dyn Crawler>>,
    pub importer: Option<Arc<dyn DumpImporter>>,
    pub upgrader: Option<Arc<dyn Upgrader>>,
    pub suggestion_cache: Option<Arc<dyn EvictableCache>>,
}

impl CaretakerServices {
    pub fn new(replicator: Arc<dyn Replicator>, outgoing: Arc<dyn OutgoingBuffer>) -> Self {
        Self {
            replicator,
            outgoing,
            harvester: None,
            scraper: None,
            store: None,
            peers: None,
            users: None,
            crawler: None,
            importer: None,
            upgrader: None,
            suggestion_cache: None,
        }
    }

    pub fn with_harvester(mut self, harvester: Arc<dyn Harvester>) -> Self {
        self.harvester = Some(harvester);
        self
    }

    pub fn with_scraper(mut self, scraper: Arc<dyn Scraper>) -> Self {
        self.scraper = Some(scraper);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_peers(mut self, peers: Arc<dyn PeerDirectory>) -> Self {
        self.peers = Some(peers);
        self
    }

    pub fn with_users(mut self, users: Arc<dyn UserDirectory>) -> Self {
        self.users = Some(users);
        self
    }

    pub fn with_crawler(mut self, crawler: Arc<dyn Crawler>) -> Self {
        self.crawler = Some(crawler);
        self
    }

    pub fn with_importer(mut self, importer: Arc<dyn DumpImporter>) -> Self {
        self.importer = Some(importer);
        self
    }

    pub fn with_upgrader(mut self, upgrader: Arc<dyn Upgrader>) -> Self {
        self.upgrader = Some(upgrader);
        self
    }

    pub fn with_suggestion_cache(mut self, cache: Arc<dyn EvictableCache>) -> Self {
        self.suggestion_cache = Some(cache);
        self
    }
}

/// Timers and flags carried from one iteration to the next.
#[derive(Debug, Clone)]
pub struct SchedulerState {
    pub started_at: Instant,
    pub upgrade_due: DateTime<Utc>,
    pub last_hello: Option<Instant>,
    pub last_deletion: Option<Instant>,
    /// The previous iteration did useful work; the next one pauses briefly.
    pub busy: bool,
    pub iteration: u64,
}

impl SchedulerState {
    pub fn new(settings: &CaretakerSettings) -> Self {
        Self {
            started_at: Instant::now(),
            upgrade_due: after(Utc::now(), settings.upgrade_interval),
            last_hello: None,
            last_deletion: None,
            busy: false,
            iteration: 0,
        }
    }
}

fn after(now: DateTime<Utc>, wait: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(wait)
        .ok()
        .and_then(|wait| now.checked_add_signed(wait))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn due(last: Option<Instant>, period: Duration) -> bool {
    last.is_none_or(|last| last.elapsed() >= period)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Upgrade,
    Hello,
    EvictCaches,
    Throttle,
    Replicate,
    ImportDumps,
    Harvest,
    Crawl,
    DueQueries,
    ResolveUsers,
    SeedCrawl,
    HealLatency,
    Retention,
}

const STEPS: [Step; 13] = [
    Step::Upgrade,
    Step::Hello,
    Step::EvictCaches,
    Step::Throttle,
    Step::Replicate,
    Step::ImportDumps,
    Step::Harvest,
    Step::Crawl,
    Step::DueQueries,
    Step::ResolveUsers,
    Step::SeedCrawl,
    Step::HealLatency,
    Step::Retention,
];

impl Step {
    fn name(self) -> &'static str {
        match self {
            Step::Upgrade => "upgrade",
            Step::Hello => "hello",
            Step::EvictCaches => "evict caches",
            Step::Throttle => "throttle",
            Step::Replicate => "replicate",
            Step::ImportDumps => "import dumps",
            Step::Harvest => "harvest",
            Step::Crawl => "crawl",
            Step::DueQueries => "due queries",
            Step::ResolveUsers => "resolve users",
            Step::SeedCrawl => "seed crawl",
            Step::HealLatency => "heal latency",
            Step::Retention => "retention",
        }
    }
}

enum Flow {
    Continue,
    Stop,
}

type StepResult = Result<Flow, CollaboratorError>;

pub struct Caretaker {
    settings: CaretakerSettings,
    services: CaretakerServices,
    signal: ShutdownSignal,
}

impl Caretaker {
    pub fn new(settings: CaretakerSettings, services: CaretakerServices) -> Self {
        Self {
            settings,
            services,
            signal: ShutdownSignal::new(),
        }
    }

    pub fn settings(&self) -> &CaretakerSettings {
        &self.settings
    }

    pub fn signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }

    /// Starts the loop on a dedicated thread.
    pub fn spawn(self) -> io::Result<CaretakerHandle> {
        let signal = self.signal.clone();
        let thread = thread::Builder::new()
            .name("caretaker".to_string())
            .spawn(move || self.run())?;
        Ok(CaretakerHandle { signal, thread })
    }

    /// Loops until shutdown is triggered.
    pub fn run(&self) {
        let mut state = SchedulerState::new(&self.settings);
        node_info!("caretaker started");
        while self.tick(&mut state) {}
        node_info!(
            "caretaker terminated after {} iterations, uptime {} s",
            state.iteration,
            state.started_at.elapsed().as_secs()
        );
    }

    /// Runs one iteration with panics contained. Returns whether the loop
    /// should go on.
    pub fn tick(&self, state: &mut SchedulerState) -> bool {
        if self.signal.is_triggered() {
            return false;
        }
        match panic::catch_unwind(AssertUnwindSafe(|| self.run_iteration(state))) {
            Ok(go_on) => go_on,
            Err(payload) => {
                node_error!(
                    "caretaker iteration {} panicked: {}",
                    current_iteration(),
                    panic_message(payload.as_ref())
                );
                !self.signal.is_triggered()
            }
        }
    }

    /// Runs every step once, in order. Returns `false` once shutdown was
    /// observed between steps.
    pub fn run_iteration(&self, state: &mut SchedulerState) -> bool {
        state.iteration += 1;
        set_iteration(state.iteration);
        node_debug!("caretaker iteration {} started", current_iteration());
        for step in STEPS {
            if self.signal.is_triggered() {
                return false;
            }
            match self.run_step(step, state) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => return false,
                Err(err) => node_warn!(
                    "caretaker iteration {}: step {} failed: {}",
                    current_iteration(),
                    step.name(),
                    err
                ),
            }
        }
        true
    }

    fn run_step(&self, step: Step, state: &mut SchedulerState) -> StepResult {
        match step {
            Step::Upgrade => self.upgrade(state),
            Step::Hello => self.hello(state),
            Step::EvictCaches => self.evict_caches(),
            Step::Throttle => self.throttle(state),
            Step::Replicate => self.replicate(state),
            Step::ImportDumps => self.import_dumps(),
            Step::Harvest => self.harvest(state),
            Step::Crawl => self.crawl(state),
            Step::DueQueries => self.due_queries(state),
            Step::ResolveUsers => self.resolve_users(),
            Step::SeedCrawl => self.seed_crawl(state),
            Step::HealLatency => self.heal_latency(),
            Step::Retention => self.retention(state),
        }
    }

    fn upgrade(&self, state: &mut SchedulerState) -> StepResult {
        let now = Utc::now();
        if now <= state.upgrade_due {
            return Ok(Flow::Continue);
        }
        // Move the deadline before trying, so a failing upgrade is not retried every pass.
        state.upgrade_due = after(now, self.settings.upgrade_interval);
        let Some(upgrader) = &self.services.upgrader else {
            return Ok(Flow::Continue);
        };
        node_info!("UPGRADE: starting an upgrade");
        for line in upgrader.upgrade()? {
            node_info!("UPGRADE: {}", line);
        }
        node_info!("UPGRADE: started an upgrade");
        Ok(Flow::Continue)
    }

    fn hello(&self, state: &mut SchedulerState) -> StepResult {
        if !due(state.last_hello, self.settings.hello_period) {
            return Ok(Flow::Continue);
        }
        state.last_hello = Some(Instant::now());
        if let Some(peers) = &self.services.peers {
            if !self.settings.peers.is_empty() {
                let answered = peers.announce(&self.settings.peers);
                node_debug!(
                    "hello answered by {}/{} peers",
                    answered,
                    self.settings.peers.len()
                );
            }
        }
        Ok(Flow::Continue)
    }

    fn evict_caches(&self) -> StepResult {
        if let Some(cache) = &self.services.suggestion_cache {
            if cache.len() > self.settings.suggestion_cache_limit {
                node_debug!("clearing suggestion cache of {} entries", cache.len());
                cache.clear();
            }
        }
        Ok(Flow::Continue)
    }

    fn throttle(&self, state: &mut SchedulerState) -> StepResult {
        let pause = if state.busy {
            self.settings.busy_pause
        } else {
            self.settings.idle_pause
        };
        if !self.signal.sleep(pause) {
            return Ok(Flow::Stop);
        }
        state.busy = false;
        Ok(Flow::Continue)
    }

    fn replicate(&self, state: &mut SchedulerState) -> StepResult {
        if self.settings.peers.is_empty() {
            return Ok(Flow::Continue);
        }
        let Some(batch) = self.services.outgoing.take_batch(
            Order::CreatedAt,
            self.settings.push_min_size,
            self.settings.push_max_size,
        ) else {
            return Ok(Flow::Continue);
        };
        if batch.is_empty() {
            return Ok(Flow::Continue);
        }
        let signal = &self.signal;
        let report = push_with_retry(
            self.services.replicator.as_ref(),
            &self.settings.peers,
            &batch,
            &self.settings.retry,
            &|wait: Duration| {
                signal.sleep(wait);
            },
        );
        if !report.success {
            node_warn!(
                "dropping batch of {} messages after {} failed push attempts",
                batch.len(),
                report.attempts
            );
        }
        state.busy = true;
        Ok(Flow::Continue)
    }

    fn import_dumps(&self) -> StepResult {
        if let Some(importer) = &self.services.importer {
            let imported = importer.import_ready(DUMP_IMPORT_LIMIT)?;
            if imported > 0 {
                node_info!("imported {} dump files", imported);
            }
        }
        Ok(Flow::Continue)
    }

    fn harvest(&self, state: &mut SchedulerState) -> StepResult {
        let Some(harvester) = &self.services.harvester else {
            return Ok(Flow::Continue);
        };
        if !self.settings.retrieval.enabled
            || self.settings.peers.is_empty()
            || self.services.outgoing.len() >= self.settings.push_max_size
        {
            return Ok(Flow::Continue);
        }
        let report =
            run_harvest_rounds(harvester.as_ref(), &self.settings.retrieval, &self.signal);
        node_debug!(
            "caretaker iteration {}: harvest step: {} rounds, {} messages, aborted = {}, panicked workers = {}",
            current_iteration(),
            report.rounds,
            report.harvested,
            report.aborted,
            report.panicked
        );
        state.busy = true;
        Ok(Flow::Continue)
    }

    fn crawl(&self, state: &mut SchedulerState) -> StepResult {
        let Some(crawler) = &self.services.crawler else {
            return Ok(Flow::Continue);
        };
        if crawler.pending() == 0 {
            return Ok(Flow::Continue);
        }
        for _ in 0..self.settings.crawl_steps {
            if crawler.process() == 0 {
                break;
            }
            state.busy = true;
            let pause = rand::rng().random_range(0..CRAWL_MAX_PAUSE_MS);
            if !self.signal.sleep(Duration::from_millis(pause)) {
                break;
            }
        }
        Ok(Flow::Continue)
    }

    fn due_queries(&self, state: &mut SchedulerState) -> StepResult {
        if !self.settings.queries_enabled {
            return Ok(Flow::Continue);
        }
        let (Some(store), Some(scraper)) = (&self.services.store, &self.services.scraper) else {
            return Ok(Flow::Continue);
        };
        for stored in store.due_queries(Utc::now(), self.settings.due_query_limit)? {
            if self.signal.is_triggered() {
                break;
            }
            let query = stored.query;
            if !accept_for_retrieval(&query) {
                node_debug!("deleting stored query '{}', not fit for retrieval", query);
                if let Err(err) = store.delete_query(&query) {
                    node_warn!("could not delete stored query '{}': {}", query, err);
                }
                continue;
            }

            let timeline = match scraper.search(
                &query,
                Order::CreatedAt,
                false,
                self.settings.due_query_search_limit,
            ) {
                Ok(timeline) => timeline,
                Err(err) => {
                    node_warn!("retrieval of due query '{}' failed: {}", query, err);
                    Timeline::new(Order::CreatedAt)
                }
            }
            .with_query(query.as_str());
            if let Err(err) = store.record_retrieval(&query, &timeline) {
                node_warn!("could not record retrieval of '{}': {}", query, err);
            }
            if let Some(users) = &self.services.users {
                let ids: Vec<u64> = timeline
                    .iter()
                    .filter_map(|message| message.user_id)
                    .collect();
                if !ids.is_empty() {
                    users.announce(&ids);
                }
            }
            node_info!(
                "retrieval of {} new messages for q = \"{}\"",
                timeline.len(),
                query
            );

            let pause = rand::rng().random_range(0..DUE_QUERY_MAX_PAUSE_MS);
            self.signal.sleep(Duration::from_millis(pause));
            state.busy = true;
        }
        Ok(Flow::Continue)
    }

    fn resolve_users(&self) -> StepResult {
        if !self.settings.user_enabled {
            return Ok(Flow::Continue);
        }
        let Some(users) = &self.services.users else {
            return Ok(Flow::Continue);
        };
        let Some(ids) = users.take_pending_chunk() else {
            return Ok(Flow::Continue);
        };
        match users.resolve(&ids) {
            Ok(resolved) => node_debug!("resolved {} of {} pending users", resolved, ids.len()),
            Err(err) => {
                users.announce(&ids);
                node_warn!("could not resolve {} pending users: {}", ids.len(), err);
                if err.is_rate_limited() {
                    self.signal.sleep(self.settings.rate_limit_pause);
                }
            }
        }
        Ok(Flow::Continue)
    }

    fn seed_crawl(&self, state: &mut SchedulerState) -> StepResult {
        if state.busy {
            return Ok(Flow::Continue);
        }
        let Some(crawler) = &self.services.crawler else {
            return Ok(Flow::Continue);
        };
        if let Some(term) = crawler.seed_random_term().filter(|term| !term.is_empty()) {
            node_info!("started a crawler for term {}", term);
            state.busy = true;
        }
        Ok(Flow::Continue)
    }

    fn heal_latency(&self) -> StepResult {
        if let Some(peers) = &self.services.peers {
            peers.heal_latency(self.settings.latency_heal_factor);
        }
        Ok(Flow::Continue)
    }

    fn retention(&self, state: &mut SchedulerState) -> StepResult {
        let Some(store) = &self.services.store else {
            return Ok(Flow::Continue);
        };
        if !due(state.last_deletion, self.settings.deletion_period) {
            return Ok(Flow::Continue);
        }
        let now = Utc::now();
        let mut buckets = vec![
            RetentionBucket::Hour,
            RetentionBucket::Day,
            RetentionBucket::Week,
        ];
        if self.settings.autodeletion {
            buckets.push(RetentionBucket::Month);
        }
        for bucket in buckets {
            match store.delete_older_than(bucket, bucket.cutoff(now)) {
                Ok(0) => {}
                Ok(deleted) => {
                    node_info!("deleted {} outdated({}) messages", deleted, bucket.name())
                }
                Err(err) => {
                    node_warn!("retention sweep of {} bucket failed: {}", bucket.name(), err)
                }
            }
        }
        state.last_deletion = Some(Instant::now());
        Ok(Flow::Continue)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Handle to a running caretaker thread.
pub struct CaretakerHandle {
    signal: ShutdownSignal,
    thread: JoinHandle<()>,
}

impl CaretakerHandle {
    pub fn signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Triggers shutdown and waits for the loop to exit. A harvest round in
    /// progress is allowed to finish first.
    pub fn shutdown(self) {
        self.signal.trigger();
        if self.thread.join().is_err() {
            node_error!("caretaker thread panicked");
        }
    }
}
