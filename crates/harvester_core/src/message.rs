use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A harvested message. Only the fields the harvester reads are modelled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "id_str")]
    pub id: String,
    pub screen_name: String,
    #[serde(default)]
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub favourites_count: u64,
    #[serde(default)]
    pub retweet_count: u64,
    #[serde(default)]
    pub mentions: Vec<String>,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u64>,
}

impl Message {
    /// Place name, if present and non-blank.
    pub fn place(&self) -> Option<&str> {
        self.place_name
            .as_deref()
            .map(str::trim)
            .filter(|place| !place.is_empty())
    }
}

/// Sort order requested from a scraper or buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    #[default]
    CreatedAt,
}

impl Order {
    pub fn as_param(self) -> &'static str {
        match self {
            Order::CreatedAt => "created_at",
        }
    }
}

/// An ordered batch of messages, optionally tagged with the query that produced it.
///
/// Messages are keyed by creation time and id; inserting the same message twice
/// keeps one copy.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Timeline {
    order: Order,
    query: Option<String>,
    hits: Option<u64>,
    messages: BTreeMap<(DateTime<Utc>, String), Message>,
}

impl Timeline {
    pub fn new(order: Order) -> Self {
        Self {
            order,
            ..Self::default()
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn from_messages(order: Order, messages: impl IntoIterator<Item = Message>) -> Self {
        let mut timeline = Self::new(order);
        timeline.extend(messages);
        timeline
    }

    pub fn order(&self) -> Order {
        self.order
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn set_query(&mut self, query: Option<String>) {
        self.query = query;
    }

    /// Total matches reported by the source, at least the number of messages held.
    pub fn hits(&self) -> u64 {
        self.hits.unwrap_or(0).max(self.len() as u64)
    }

    pub fn set_hits(&mut self, hits: u64) {
        self.hits = Some(hits);
    }

    pub fn push(&mut self, message: Message) {
        self.messages
            .insert((message.created_at, message.id.clone()), message);
    }

    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) {
        for message in messages {
            self.push(message);
        }
    }

    /// Moves all messages of `other` into this timeline.
    pub fn merge(&mut self, other: Timeline) {
        self.messages.extend(other.messages);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Newest message first.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.values().rev()
    }

    pub fn oldest(&self) -> Option<&Message> {
        self.messages.values().next()
    }

    /// Calendar date of the oldest message.
    pub fn oldest_date(&self) -> Option<NaiveDate> {
        self.oldest().map(|message| message.created_at.date_naive())
    }
}
