use chrono::NaiveDate;

/// Score given to queries that carry no engagement signal.
pub const DEFAULT_SCORE: f64 = 0.5;

/// Upper bound (inclusive) on query length accepted for due-time retrieval.
pub const MAX_RETRIEVAL_QUERY_LEN: usize = 16;

const UNTIL: &str = "until:";
const FROM: &str = "from:";

/// A pending topic together with its priority score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredQuery {
    pub query: String,
    pub score: f64,
}

impl ScoredQuery {
    pub fn new(query: impl Into<String>, score: f64) -> Self {
        Self {
            query: query.into(),
            score,
        }
    }

    pub fn with_default_score(query: impl Into<String>) -> Self {
        Self::new(query, DEFAULT_SCORE)
    }
}

/// Whether a stored query may be re-run by the due-time retrieval step.
///
/// Plain terms of 2..=16 characters pass; anything with an operator is
/// rejected unless it is a `from:` user query.
pub fn accept_for_retrieval(query: &str) -> bool {
    let len = query.chars().count();
    len > 1
        && len <= MAX_RETRIEVAL_QUERY_LEN
        && (!query.contains(':') || query.starts_with(FROM))
}

/// Restricts `query` to messages created on or before `date`.
///
/// An existing `until:` value is replaced, otherwise the clause is appended.
pub fn narrow_until(query: &str, date: NaiveDate) -> String {
    let date = date.format("%Y-%m-%d");
    match query.find(UNTIL) {
        None => format!("{query} {UNTIL}{date}"),
        Some(start) => {
            let value_start = start + UNTIL.len();
            let value_end = query[value_start..]
                .find(char::is_whitespace)
                .map_or(query.len(), |offset| value_start + offset);
            format!(
                "{}{}{}",
                &query[..value_start],
                date,
                &query[value_end..]
            )
        }
    }
}

/// Query that harvests the messages of one user.
pub fn user_query(screen_name: &str) -> String {
    format!("{FROM}{screen_name}")
}

/// Geo-radius query around a named place.
pub fn place_query(place: &str, radius_miles: u32) -> String {
    format!("near:\"{place}\" within:{radius_miles}mi")
}
