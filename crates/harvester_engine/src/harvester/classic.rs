use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use harvester_core::{
    user_query, HarvestOutcome, HarvestedSet, Order, PendingContextList, Timeline,
};
use node_logging::{node_info, node_warn};
use rand::Rng;

use crate::config::HarvesterSettings;
use crate::harvester::{HarvestServices, Harvester};
use crate::push::PushExecutor;
use crate::services::{SortOrder, SuggestRequest};
use crate::signal::ShutdownSignal;

const FETCH_RANDOM: usize = 3;
/// Below this backend backlog, mined context may be harvested instead of suggestions.
const HITS_LIMIT_FOR_QUERIES: u64 = 20;
const MAX_PENDING: usize = 200;
const MAX_HARVESTED: usize = 10_000;
const CACHE_SAMPLE: usize = 100;

struct ClassicState {
    pending_queries: VecDeque<String>,
    pending_context: PendingContextList,
    harvested: HarvestedSet,
    hits_on_backend: u64,
}

impl ClassicState {
    /// Queues mentions and hashtags of `timeline` as context candidates.
    fn check_context(&mut self, timeline: &Timeline, front: bool) {
        for message in timeline.iter() {
            for user in &message.mentions {
                self.check_candidate(&user_query(user), front);
            }
            for hashtag in &message.hashtags {
                self.check_candidate(hashtag, front);
            }
        }
    }

    fn check_candidate(&mut self, candidate: &str, front: bool) {
        if !self.harvested.contains(candidate) {
            self.pending_context.offer(candidate, front);
        }
        self.harvested.evict_if_full();
    }
}

/// Non-adaptive harvester working off backend suggestions, with mined
/// mentions and hashtags as a fallback pool while the backend backlog is low.
pub struct ClassicHarvester {
    settings: HarvesterSettings,
    services: HarvestServices,
    state: Mutex<ClassicState>,
    pusher: PushExecutor,
    halt: ShutdownSignal,
}

impl ClassicHarvester {
    pub fn new(settings: HarvesterSettings, services: HarvestServices) -> Self {
        let pusher = PushExecutor::spawn(
            "classic",
            services.push_target(&settings),
            settings.push_inbox,
        );
        Self {
            settings,
            services,
            state: Mutex::new(ClassicState {
                pending_queries: VecDeque::new(),
                pending_context: PendingContextList::new(MAX_PENDING),
                harvested: HarvestedSet::new(MAX_HARVESTED),
                hits_on_backend: 1000,
            }),
            pusher,
            halt: ShutdownSignal::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, ClassicState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sizes of the pending query, pending context and harvested pools.
    pub fn pool_sizes(&self) -> (usize, usize, usize) {
        let state = self.state();
        (
            state.pending_queries.len(),
            state.pending_context.len(),
            state.harvested.len(),
        )
    }

    pub fn hits_on_backend(&self) -> u64 {
        self.state().hits_on_backend
    }

    fn search(&self, query: &str) -> Option<Timeline> {
        match self.services.scraper.search(
            query,
            Order::CreatedAt,
            false,
            self.settings.search_limit,
        ) {
            Ok(timeline) => Some(timeline),
            Err(err) => {
                node_warn!("classic: search for '{}' failed: {}", query, err);
                None
            }
        }
    }

    fn pick_context(&self) -> Option<String> {
        let mut rng = rand::rng();
        let mut state = self.state();
        let from_context = rng.random_range(0..100) != 0
            && state.hits_on_backend < HITS_LIMIT_FOR_QUERIES
            && state.pending_queries.is_empty()
            && !state.pending_context.is_empty();
        if !from_context {
            return None;
        }
        let index = rng.random_range(0..=state.pending_context.len() / 2);
        let query = state.pending_context.remove_at(index)?;
        state.harvested.insert(&query);
        Some(query)
    }

    fn harvest_context(&self, query: String) -> HarvestOutcome {
        let Some(timeline) = self.search(&query) else {
            return HarvestOutcome::NoWork;
        };
        if timeline.is_empty() {
            return HarvestOutcome::NoWork;
        }
        let count = timeline.len();
        self.state().check_context(&timeline, false);
        let (queries, context, harvested) = self.pool_sizes();
        node_info!(
            "retrieval of {} new messages for q = {}, scheduled push; pendingQueries = {}, pendingContext = {}, harvestedContext = {}",
            count,
            query,
            queries,
            context,
            harvested
        );
        self.pusher.submit(timeline.with_query(query));
        HarvestOutcome::Harvested(count)
    }

    fn refill_queries(&self) {
        let hits = {
            let state = self.state();
            if !state.pending_queries.is_empty() {
                return;
            }
            state.hits_on_backend
        };
        let request = SuggestRequest {
            filters: String::new(),
            sort_field: "retrieval_next".to_string(),
            order: SortOrder::Ascending,
            count: (hits / 10).clamp((FETCH_RANDOM * 30) as u64, 1000) as usize,
            random_sample: FETCH_RANDOM,
        };
        let suggestions = match self.services.catalog.suggest(&request) {
            Ok(suggestions) => suggestions,
            Err(err) => {
                node_warn!("classic: suggestion request failed: {}", err);
                self.halt.sleep(self.settings.failure_pause);
                return;
            }
        };

        let context_empty = {
            let mut state = self.state();
            for suggestion in &suggestions.queries {
                if !state.pending_queries.contains(&suggestion.query) {
                    state.pending_queries.push_back(suggestion.query.clone());
                }
            }
            state.hits_on_backend = suggestions.total_backlog;
            state.pending_context.is_empty()
        };
        node_info!(
            "got {} suggestions for harvesting from {} in backend",
            suggestions.queries.len(),
            suggestions.total_backlog
        );
        if suggestions.total_backlog > 0 {
            return;
        }

        if context_empty {
            match self.services.catalog.sample_cached(CACHE_SAMPLE) {
                Ok(timeline) => self.state().check_context(&timeline, false),
                Err(err) => node_warn!("classic: could not sample backend cache: {}", err),
            }
        }
        let starving = self.state().pending_context.is_empty();
        if starving {
            self.halt.sleep(self.settings.failure_pause);
        }
    }

    fn next_query(&self) -> Option<String> {
        let mut state = self.state();
        let query = state.pending_queries.pop_front()?;
        state.pending_context.remove(&query);
        state.harvested.insert(&query);
        Some(query)
    }

    fn harvest_query(&self, query: String) -> HarvestOutcome {
        let timeline = self
            .search(&query)
            .unwrap_or_else(|| Timeline::new(Order::CreatedAt))
            .with_query(query);
        let count = timeline.len();
        if count > 0 {
            self.state().check_context(&timeline, true);
        }
        let (queries, context, harvested) = self.pool_sizes();
        node_info!(
            "starting push to backend; pendingQueries = {}, pendingContext = {}, harvestedContext = {}",
            queries,
            context,
            harvested
        );
        self.pusher.submit(timeline);
        HarvestOutcome::from_count(count)
    }
}

impl Harvester for ClassicHarvester {
    fn harvest(&self) -> HarvestOutcome {
        if let Some(query) = self.pick_context() {
            return self.harvest_context(query);
        }
        self.refill_queries();
        match self.next_query() {
            Some(query) => self.harvest_query(query),
            None => HarvestOutcome::NoWork,
        }
    }

    fn stop(&self) {
        self.halt.trigger();
        self.pusher.stop();
    }
}
