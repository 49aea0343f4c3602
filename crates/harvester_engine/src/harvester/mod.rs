//! Harvest strategies.
//!
//! A harvester is created once at startup and shared by every worker of a
//! harvest round, so all strategies keep their state behind interior locks.
mod classic;
mod kaizen;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use harvester_core::{BlockingFrontier, HarvestOutcome, PriorityFrontier, UnorderedFrontier};

use crate::config::HarvesterSettings;
use crate::push::PushTarget;
use crate::services::{OutgoingBuffer, Replicator, Scraper, SuggestionCatalog, TrendingTopics};

pub use classic::ClassicHarvester;
pub use kaizen::KaizenHarvester;

pub trait Harvester: Send + Sync {
    /// Runs one explore or exploit step. Never fails; problems are logged
    /// and reported as [`HarvestOutcome::NoWork`].
    fn harvest(&self) -> HarvestOutcome;

    /// Shuts down the strategy's push executor, waiting for queued pushes.
    fn stop(&self);
}

/// Collaborators a harvest strategy talks to.
#[derive(Clone)]
pub struct HarvestServices {
    pub scraper: Arc<dyn Scraper>,
    pub catalog: Arc<dyn SuggestionCatalog>,
    /// Present only when an authenticated trending source is configured.
    pub trends: Option<Arc<dyn TrendingTopics>>,
    pub replicator: Arc<dyn Replicator>,
    pub outgoing: Arc<dyn OutgoingBuffer>,
}

impl HarvestServices {
    pub(crate) fn push_target(&self, settings: &HarvesterSettings) -> PushTarget {
        PushTarget {
            backend: settings.backend.clone(),
            replicator: self.replicator.clone(),
            outgoing: self.outgoing.clone(),
            retry: settings.push_retry,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HarvesterKind {
    Classic,
    #[default]
    Kaizen,
    Priority,
    Blocking,
}

impl HarvesterKind {
    pub fn name(self) -> &'static str {
        match self {
            HarvesterKind::Classic => "classic",
            HarvesterKind::Kaizen => "kaizen",
            HarvesterKind::Priority => "priority",
            HarvesterKind::Blocking => "blocking",
        }
    }
}

impl fmt::Display for HarvesterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HarvesterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "classic" => Ok(HarvesterKind::Classic),
            "kaizen" => Ok(HarvesterKind::Kaizen),
            "priority" | "priority_kaizen" => Ok(HarvesterKind::Priority),
            "blocking" | "blocking_kaizen" => Ok(HarvesterKind::Blocking),
            other => Err(format!("unknown harvester strategy '{other}'")),
        }
    }
}

/// Creates the strategy selected by `kind`.
pub fn build_harvester(
    kind: HarvesterKind,
    settings: HarvesterSettings,
    services: HarvestServices,
) -> Arc<dyn Harvester> {
    let limit = settings.kaizen.queries_limit;
    match kind {
        HarvesterKind::Classic => Arc::new(ClassicHarvester::new(settings, services)),
        HarvesterKind::Kaizen => Arc::new(KaizenHarvester::new(
            "kaizen",
            Box::new(UnorderedFrontier::new(limit)),
            settings,
            services,
        )),
        HarvesterKind::Priority => Arc::new(KaizenHarvester::new(
            "priority-kaizen",
            Box::new(PriorityFrontier::new(limit)),
            settings,
            services,
        )),
        HarvesterKind::Blocking => {
            let block_time = settings.kaizen.block_time;
            Arc::new(KaizenHarvester::new(
                "blocking-kaizen",
                Box::new(BlockingFrontier::new(limit, block_time)),
                settings,
                services,
            ))
        }
    }
}
