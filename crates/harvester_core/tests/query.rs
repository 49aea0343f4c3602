use chrono::{NaiveDate, TimeZone, Utc};
use harvester_core::{
    accept_for_retrieval, narrow_until, HarvestOutcome, HarvestedSet, Message, Order,
    PendingContextList, Timeline, NO_WORK,
};

#[test]
fn retrieval_predicate_follows_length_and_operator_rules() {
    assert!(accept_for_retrieval("ab"));
    assert!(!accept_for_retrieval("a"));
    assert!(!accept_for_retrieval(""));
    assert!(accept_for_retrieval("from:bob"));
    assert!(!accept_for_retrieval("x:y"));
    assert!(!accept_for_retrieval("near:berlin"));
    assert!(accept_for_retrieval("abcdefghijklmnop"));
    assert!(!accept_for_retrieval("abcdefghijklmnopq"));
}

#[test]
fn narrow_appends_until_clause() {
    let date = NaiveDate::from_ymd_opt(2016, 5, 4).unwrap();
    assert_eq!(narrow_until("fossasia", date), "fossasia until:2016-05-04");
}

#[test]
fn narrow_replaces_existing_date() {
    let date = NaiveDate::from_ymd_opt(2016, 5, 4).unwrap();
    assert_eq!(
        narrow_until("fossasia until:2016-06-01", date),
        "fossasia until:2016-05-04"
    );
}

#[test]
fn timeline_orders_by_creation_and_deduplicates() {
    let at = |day| Utc.with_ymd_and_hms(2016, 5, day, 0, 0, 0).unwrap();
    let msg = |id: &str, day| Message {
        id: id.to_string(),
        screen_name: "alice".to_string(),
        text: String::new(),
        created_at: at(day),
        favourites_count: 0,
        retweet_count: 0,
        mentions: Vec::new(),
        hashtags: Vec::new(),
        place_name: None,
        user_id: None,
    };
    let mut timeline = Timeline::new(Order::CreatedAt).with_query("q");
    timeline.push(msg("2", 3));
    timeline.push(msg("1", 1));
    timeline.push(msg("3", 7));
    timeline.push(msg("3", 7));

    assert_eq!(timeline.len(), 3);
    let ids: Vec<&str> = timeline.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["3", "2", "1"]);
    assert_eq!(timeline.oldest_date(), NaiveDate::from_ymd_opt(2016, 5, 1));
    assert_eq!(timeline.query(), Some("q"));
    assert_eq!(timeline.hits(), 3);
}

#[test]
fn message_uses_wire_field_names() {
    let json = r#"{
        "id_str": "42",
        "screen_name": "alice",
        "created_at": "2016-05-04T12:00:00Z",
        "favourites_count": 3,
        "hashtags": ["rust"]
    }"#;
    let message: Message = serde_json::from_str(json).unwrap();
    assert_eq!(message.id, "42");
    assert_eq!(message.favourites_count, 3);
    assert_eq!(message.retweet_count, 0);
    assert_eq!(message.hashtags, vec!["rust"]);
    assert_eq!(message.place(), None);
}

#[test]
fn no_work_is_negative() {
    assert_eq!(HarvestOutcome::NoWork.count(), NO_WORK);
    assert_eq!(HarvestOutcome::Harvested(12).count(), 12);
    assert_eq!(HarvestOutcome::from_count(0), HarvestOutcome::NoWork);
}

#[test]
fn harvested_set_clears_on_overflow() {
    let mut seen = HarvestedSet::new(2);
    seen.insert("a");
    seen.insert("b");
    assert!(seen.contains("a"));
    seen.insert("c");
    assert!(seen.is_empty());
}

#[test]
fn pending_context_front_insert_truncates_tail() {
    let mut pending = PendingContextList::new(3);
    assert!(pending.offer("a", false));
    assert!(pending.offer("b", false));
    assert!(pending.offer("c", false));
    assert!(!pending.offer("a", true));
    assert!(pending.offer("fresh", true));

    assert_eq!(pending.as_slice(), ["fresh", "a", "b"]);
    assert_eq!(pending.remove_at(1).as_deref(), Some("a"));
    assert!(pending.remove("b"));
    assert_eq!(pending.len(), 1);
}
