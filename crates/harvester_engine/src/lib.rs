//! Harvester engine: collaborator contracts, replication, harvest strategies
//! and the caretaker loop that schedules them.
mod buffer;
mod caretaker;
mod config;
mod error;
mod harvester;
mod http;
mod push;
mod replicate;
mod services;
mod signal;

pub use buffer::MemoryOutgoingBuffer;
pub use caretaker::{
    run_harvest_rounds, Caretaker, CaretakerHandle, CaretakerServices, RoundReport,
    SchedulerState,
};
pub use config::{
    CaretakerSettings, ConfigMap, HarvesterSettings, KaizenSettings, RetrievalSettings,
    RetryPolicy,
};
pub use error::{CollaboratorError, ConfigError, PushError};
pub use harvester::{
    build_harvester, ClassicHarvester, HarvestServices, Harvester, HarvesterKind,
    KaizenHarvester,
};
pub use http::{
    endpoint, HttpPeerDirectory, HttpReplicator, HttpSettings, PeerClient, RemoteCatalog,
    RemoteSearchScraper,
};
pub use push::{PushExecutor, PushTarget};
pub use replicate::{encode_timeline, push_with_retry, PushReport};
pub use services::{
    Crawler, DumpImporter, DurableStore, EvictableCache, OutgoingBuffer, PeerDirectory,
    Replicator, RetentionBucket, Scraper, SortOrder, StoredQuery, SuggestRequest,
    SuggestionCatalog, Suggestions, TrendingTopics, Upgrader, UserDirectory,
};
pub use signal::ShutdownSignal;
