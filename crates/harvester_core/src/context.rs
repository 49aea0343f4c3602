use crate::message::{Message, Timeline};
use crate::query::{place_query, user_query, ScoredQuery};

/// Largest f64 below 1; the score saturates here instead of rounding up to 1.
const MAX_SCORE: f64 = 1.0 - f64::EPSILON / 2.0;

/// Engagement weight of one retweet relative to one favourite.
const RETWEET_WEIGHT: f64 = 5.0;

/// Maps engagement to a priority in `[0, 1)`.
///
/// With `raw = favourites + 5 * retweets` the score is
/// `raw / (raw + 10 * e^(-0.1 * raw))`: zero without engagement, increasing,
/// and saturating towards 1.
pub fn context_score(favourites: u64, retweets: u64) -> f64 {
    let raw = favourites as f64 + RETWEET_WEIGHT * retweets as f64;
    if raw <= 0.0 {
        return 0.0;
    }
    // Same function as raw/(raw + 10e^-0.1raw), arranged so each step rounds monotonically.
    let damping = 10.0 * (-0.1 * raw).exp() / raw;
    (1.0 / (1.0 + damping)).min(MAX_SCORE)
}

pub fn message_score(message: &Message) -> f64 {
    context_score(message.favourites_count, message.retweet_count)
}

/// Candidate topics mined from one message: mentioned users, hashtags and the place.
pub fn message_context(message: &Message, place_radius_miles: u32) -> Vec<ScoredQuery> {
    let score = message_score(message);
    let users = message
        .mentions
        .iter()
        .map(|user| ScoredQuery::new(user_query(user), score));
    let hashtags = message
        .hashtags
        .iter()
        .map(|hashtag| ScoredQuery::new(hashtag.clone(), score));
    let place = message
        .place()
        .map(|place| ScoredQuery::new(place_query(place, place_radius_miles), score));
    users.chain(hashtags).chain(place).collect()
}

/// Candidate topics for a whole timeline, newest message first.
pub fn timeline_context(timeline: &Timeline, place_radius_miles: u32) -> Vec<ScoredQuery> {
    timeline
        .iter()
        .flat_map(|message| message_context(message, place_radius_miles))
        .collect()
}
