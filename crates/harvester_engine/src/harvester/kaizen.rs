use std::fmt;

use harvester_core::{
    narrow_until, timeline_context, Frontier, HarvestOutcome, Order, Timeline, DEFAULT_SCORE,
};
use node_logging::{node_debug, node_info, node_warn};
use rand::Rng;

use crate::config::HarvesterSettings;
use crate::harvester::{HarvestServices, Harvester};
use crate::push::PushExecutor;
use crate::services::{SortOrder, SuggestRequest};
use crate::signal::ShutdownSignal;

/// Explore/exploit harvester over a pluggable frontier.
///
/// Exploiting pops a query, retrieves one page of results and mines them for
/// new queries; exploring asks the backend for suggestions, then trending
/// topics, then the backend's cached messages.
pub struct KaizenHarvester {
    name: &'static str,
    frontier: Box<dyn Frontier>,
    settings: HarvesterSettings,
    services: HarvestServices,
    pusher: PushExecutor,
    halt: ShutdownSignal,
}

impl KaizenHarvester {
    pub fn new(
        name: &'static str,
        frontier: Box<dyn Frontier>,
        settings: HarvesterSettings,
        services: HarvestServices,
    ) -> Self {
        let pusher = PushExecutor::spawn(
            name,
            services.push_target(&settings),
            settings.push_inbox,
        );
        Self {
            name,
            frontier,
            settings,
            services,
            pusher,
            halt: ShutdownSignal::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn frontier(&self) -> &dyn Frontier {
        self.frontier.as_ref()
    }

    fn note(&self, line: fmt::Arguments<'_>) {
        if self.settings.kaizen.verbose {
            node_info!("{}: {}", self.name, line);
        } else {
            node_debug!("{}: {}", self.name, line);
        }
    }

    fn add_query(&self, query: &str, score: f64) -> bool {
        let added = self.frontier.add(query, score);
        if added {
            self.note(format_args!("adding '{query}' to queries"));
        }
        added
    }

    /// Feeds mentions, hashtags, places and the date-narrowed continuation of
    /// the timeline's query into the frontier. Returns how many were added.
    fn grab_information(&self, timeline: &Timeline) -> usize {
        let mut added = timeline_context(timeline, self.settings.kaizen.place_radius)
            .into_iter()
            .filter(|candidate| self.add_query(&candidate.query, candidate.score))
            .count();
        if let (Some(query), Some(oldest)) = (timeline.query(), timeline.oldest_date()) {
            if self.add_query(&narrow_until(query, oldest), DEFAULT_SCORE) {
                added += 1;
            }
        }
        added
    }

    fn harvest_messages(&self) -> HarvestOutcome {
        self.note(format_args!(
            "{} available queries, harvest season",
            self.frontier.len()
        ));
        // Workers share the frontier, so it may have drained since the gate.
        let Some(query) = self.frontier.try_take() else {
            return HarvestOutcome::NoWork;
        };

        let timeline = match self.services.scraper.search(
            &query,
            Order::CreatedAt,
            false,
            self.settings.search_limit,
        ) {
            Ok(timeline) => timeline,
            Err(err) => {
                node_warn!("{}: search for '{}' failed: {}", self.name, query, err);
                Timeline::new(Order::CreatedAt)
            }
        }
        .with_query(query.as_str());

        if timeline.is_empty() {
            self.note(format_args!(
                "'{query}' gives no result, pushing to backend anyway"
            ));
            self.pusher.submit(timeline);
            return HarvestOutcome::NoWork;
        }

        let count = timeline.len();
        self.note(format_args!(
            "'{query}' gives {count} messages, pushing to backend"
        ));
        self.grab_information(&timeline);
        self.pusher.submit(timeline);
        HarvestOutcome::Harvested(count)
    }

    fn grab_trending(&self) -> usize {
        let Some(trends) = self.services.trends.as_ref() else {
            return 0;
        };
        self.note(format_args!("getting trending topics"));
        let locations = match trends.locations() {
            Ok(locations) => locations,
            Err(err) => {
                log_trend_error(self.name, &err);
                return 0;
            }
        };
        let mut added = 0;
        for location in locations {
            match trends.trends(&location) {
                Ok(topics) => {
                    added += topics
                        .iter()
                        .filter(|topic| self.add_query(topic, DEFAULT_SCORE))
                        .count();
                }
                Err(err) => {
                    log_trend_error(self.name, &err);
                    if err.is_rate_limited() {
                        break;
                    }
                }
            }
        }
        added
    }

    fn grab_cached_context(&self) -> usize {
        self.note(format_args!(
            "backend has no suggested queries, grabbing context from its cached messages"
        ));
        match self
            .services
            .catalog
            .sample_cached(self.settings.kaizen.suggestions_random)
        {
            Ok(timeline) => self.grab_information(&timeline),
            Err(err) => {
                node_warn!("{}: could not sample backend cache: {}", self.name, err);
                0
            }
        }
    }

    fn grab_suggestions(&self) -> HarvestOutcome {
        self.note(format_args!("requesting query suggestions from backend"));
        let request = SuggestRequest {
            filters: String::new(),
            sort_field: "retrieval_next".to_string(),
            order: SortOrder::Descending,
            count: self.settings.kaizen.suggestions_count,
            random_sample: self.settings.kaizen.suggestions_random,
        };
        let suggestions = match self.services.catalog.suggest(&request) {
            Ok(suggestions) => suggestions,
            Err(err) => {
                node_warn!("{}: suggestion request failed: {}", self.name, err);
                self.halt.sleep(self.settings.failure_pause);
                return HarvestOutcome::NoWork;
            }
        };

        self.note(format_args!(
            "backend gave {} suggested queries",
            suggestions.queries.len()
        ));
        for suggestion in &suggestions.queries {
            self.add_query(&suggestion.query, suggestion.score);
        }
        if suggestions.queries.is_empty() && self.grab_trending() == 0 {
            self.grab_cached_context();
        }

        if self.frontier.is_empty() {
            HarvestOutcome::NoWork
        } else {
            HarvestOutcome::Harvested(0)
        }
    }
}

fn log_trend_error(name: &str, err: &crate::CollaboratorError) {
    if err.is_rate_limited() {
        node_debug!("{}: trending topics rate limited: {}", name, err);
    } else {
        node_warn!("{}: trending topics failed: {}", name, err);
    }
}

impl Harvester for KaizenHarvester {
    fn harvest(&self) -> HarvestOutcome {
        let exploit = !self.frontier.is_empty()
            && rand::rng().random::<f64>() < self.frontier.fill_ratio();
        if exploit {
            self.harvest_messages()
        } else {
            self.grab_suggestions()
        }
    }

    fn stop(&self) {
        self.halt.trigger();
        self.pusher.stop();
    }
}
