use std::time::{Duration, Instant};

use harvester_core::{Message, Timeline};
use node_logging::{node_info, node_warn};
use serde::Serialize;

use crate::config::RetryPolicy;
use crate::services::Replicator;
use crate::PushError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushReport {
    pub success: bool,
    /// Attempts made, including the first one.
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Pushes `timeline` to `peers`, retrying with linear backoff.
///
/// `sleep` performs the waits between attempts so callers can make them
/// interruptible; an interrupted wait simply moves on to the next attempt.
pub fn push_with_retry(
    replicator: &dyn Replicator,
    peers: &[String],
    timeline: &Timeline,
    policy: &RetryPolicy,
    sleep: &dyn Fn(Duration),
) -> PushReport {
    let start = Instant::now();
    if replicator.push(peers, timeline) {
        node_info!(
            "success pushing {} messages to backend {:?} in 1st attempt in {} ms",
            timeline.len(),
            peers,
            start.elapsed().as_millis()
        );
        return PushReport {
            success: true,
            attempts: 1,
            elapsed: start.elapsed(),
        };
    }

    for retry in 0..policy.max_retries {
        sleep(policy.delay(retry));
        node_info!(
            "trying to push (again) {} messages to backend {:?}, attempt #{}/{}",
            timeline.len(),
            peers,
            retry + 1,
            policy.max_retries
        );
        let attempt_start = Instant::now();
        if replicator.push(peers, timeline) {
            node_info!(
                "success pushing {} messages to backend {:?} in attempt {} in {} ms",
                timeline.len(),
                peers,
                retry + 2,
                attempt_start.elapsed().as_millis()
            );
            return PushReport {
                success: true,
                attempts: retry + 2,
                elapsed: start.elapsed(),
            };
        }
    }

    node_warn!(
        "failed pushing {} messages to backend {:?} after {} attempts",
        timeline.len(),
        peers,
        policy.max_retries + 1
    );
    PushReport {
        success: false,
        attempts: policy.max_retries + 1,
        elapsed: start.elapsed(),
    }
}

#[derive(Serialize)]
struct SearchMetadata<'a> {
    count: String,
    hits: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    query: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    peer_hash: Option<&'a str>,
}

#[derive(Serialize)]
struct PushPayload<'a> {
    search_metadata: SearchMetadata<'a>,
    statuses: Vec<&'a Message>,
}

/// Encodes a timeline as the `{search_metadata, statuses}` document peers accept.
pub fn encode_timeline(
    timeline: &Timeline,
    peer_hash: Option<&str>,
) -> Result<String, PushError> {
    let payload = PushPayload {
        search_metadata: SearchMetadata {
            count: timeline.len().to_string(),
            hits: timeline.hits(),
            query: timeline.query(),
            peer_hash,
        },
        statuses: timeline.iter().collect(),
    };
    Ok(serde_json::to_string(&payload)?)
}
