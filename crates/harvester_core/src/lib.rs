//! Harvester core: queries, frontiers and context mining, free of IO.
mod context;
mod frontier;
mod message;
mod outcome;
mod pools;
mod query;

pub use context::{context_score, message_context, message_score, timeline_context};
pub use frontier::{BlockingFrontier, Frontier, PriorityFrontier, UnorderedFrontier};
pub use message::{Message, Order, Timeline};
pub use outcome::{HarvestOutcome, NO_WORK};
pub use pools::{HarvestedSet, PendingContextList};
pub use query::{
    accept_for_retrieval, narrow_until, place_query, user_query, ScoredQuery, DEFAULT_SCORE,
    MAX_RETRIEVAL_QUERY_LEN,
};
