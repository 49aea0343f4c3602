mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{TimeDelta, Utc};
use harvester_core::HarvestOutcome;
use harvester_engine::{
    run_harvest_rounds, Caretaker, CaretakerServices, CaretakerSettings, Harvester,
    MemoryOutgoingBuffer, OutgoingBuffer, RetentionBucket, RetrievalSettings, SchedulerState,
    ShutdownSignal,
};
use pretty_assertions::assert_eq;

use common::{
    config, init_logging, many_messages, message, shared, timeline, FakeCrawler, FakePeers,
    FakeScraper, FakeStore, FakeUpgrader, FakeUsers, RecordingReplicator, UpgradeBehaviour,
};

/// Returns `Harvested(1)` for the first `productive` calls, then `NoWork`.
/// Panics on call number `panic_on`, if set.
struct ScriptedHarvester {
    productive: usize,
    panic_on: Option<usize>,
    calls: AtomicUsize,
}

impl ScriptedHarvester {
    fn new(productive: usize) -> Self {
        Self {
            productive,
            panic_on: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Harvester for ScriptedHarvester {
    fn harvest(&self) -> HarvestOutcome {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panic_on == Some(call) {
            panic!("worker {call} crashed");
        }
        if call < self.productive {
            HarvestOutcome::Harvested(1)
        } else {
            HarvestOutcome::NoWork
        }
    }

    fn stop(&self) {}
}

/// Records the caretaker iteration each worker thread sees.
#[derive(Default)]
struct IterationRecorder {
    seen: Mutex<Vec<u64>>,
}

impl Harvester for IterationRecorder {
    fn harvest(&self) -> HarvestOutcome {
        self.seen
            .lock()
            .unwrap()
            .push(node_logging::current_iteration());
        HarvestOutcome::NoWork
    }

    fn stop(&self) {}
}

fn rounds(concurrency: usize, loops: usize) -> RetrievalSettings {
    RetrievalSettings {
        enabled: true,
        concurrency,
        loops,
        sleep_base: Duration::ZERO,
        sleep_random_offset: Duration::ZERO,
    }
}

fn quick_settings(extra: &[(&str, &str)]) -> CaretakerSettings {
    let mut pairs = vec![
        ("backend", "http://peer.example:9000"),
        ("caretaker.pause.busy", "1"),
        ("caretaker.pause.idle", "1"),
        ("caretaker.backendpush.backoff", "1"),
        ("harvester.failure_pause", "5"),
        ("retrieval.forbackend.sleep.base", "0"),
        ("retrieval.forbackend.sleep.randomoffset", "0"),
    ];
    pairs.extend_from_slice(extra);
    CaretakerSettings::from_config(&config(&pairs))
}

fn base_services() -> (Arc<RecordingReplicator>, Arc<MemoryOutgoingBuffer>, CaretakerServices) {
    let replicator = shared(RecordingReplicator::accepting());
    let outgoing = shared(MemoryOutgoingBuffer::new());
    let services = CaretakerServices::new(replicator.clone(), outgoing.clone());
    (replicator, outgoing, services)
}

#[test]
fn round_with_no_work_ends_the_harvest_step() {
    init_logging();
    let harvester = ScriptedHarvester::new(4);
    let report = run_harvest_rounds(&harvester, &rounds(2, 10), &ShutdownSignal::new());

    assert_eq!(report.rounds, 3);
    assert_eq!(report.harvested, 4);
    assert!(report.aborted);
    assert_eq!(harvester.calls(), 6);
}

#[test]
fn productive_rounds_run_every_loop() {
    init_logging();
    let harvester = ScriptedHarvester::new(usize::MAX);
    let report = run_harvest_rounds(&harvester, &rounds(3, 4), &ShutdownSignal::new());

    assert_eq!(report.rounds, 4);
    assert_eq!(report.harvested, 12);
    assert!(!report.aborted);
}

#[test]
fn panicking_worker_does_not_abort_its_round() {
    init_logging();
    let harvester = ScriptedHarvester {
        panic_on: Some(0),
        ..ScriptedHarvester::new(usize::MAX)
    };
    let report = run_harvest_rounds(&harvester, &rounds(2, 2), &ShutdownSignal::new());

    assert_eq!(report.rounds, 2);
    assert_eq!(report.panicked, 1);
    assert_eq!(report.harvested, 3);
    assert!(!report.aborted);
}

#[test]
fn harvest_step_requires_peers_and_room_in_the_buffer() {
    init_logging();
    let harvester = shared(ScriptedHarvester::new(0));
    let (_, outgoing, services) = base_services();
    let services = services.with_harvester(harvester.clone());

    let enabled = [("retrieval.forbackend.enabled", "true")];
    let caretaker = Caretaker::new(quick_settings(&enabled), services.clone());
    let mut state = SchedulerState::new(caretaker.settings());
    assert!(caretaker.run_iteration(&mut state));
    assert_eq!(harvester.calls(), 1);
    assert!(state.busy);

    let mut no_peers = quick_settings(&enabled);
    no_peers.peers.clear();
    let caretaker = Caretaker::new(no_peers, services.clone());
    caretaker.run_iteration(&mut SchedulerState::new(caretaker.settings()));
    assert_eq!(harvester.calls(), 1);

    let mut full_buffer = quick_settings(&enabled);
    full_buffer.push_min_size = 1000;
    full_buffer.push_max_size = 10;
    outgoing.transmit(many_messages(25));
    let caretaker = Caretaker::new(full_buffer, services);
    caretaker.run_iteration(&mut SchedulerState::new(caretaker.settings()));
    assert_eq!(harvester.calls(), 1);
    assert_eq!(outgoing.len(), 25);
}

#[test]
fn due_queries_are_filtered_retrieved_and_recorded() {
    init_logging();
    let mut found = message("1", "2016-03-02T10:00:00Z");
    found.user_id = Some(42);
    let store = shared(FakeStore::with_due(&["ab", "x:y", "from:bob", "a"]));
    let users = shared(FakeUsers::default());
    let scraper = shared(FakeScraper::default().with_result("ab", timeline(vec![found])));
    let (_, _, services) = base_services();
    let services = services
        .with_store(store.clone())
        .with_scraper(scraper.clone())
        .with_users(users.clone());

    let caretaker = Caretaker::new(
        quick_settings(&[("retrieval.queries.enabled", "true")]),
        services,
    );
    let mut state = SchedulerState::new(caretaker.settings());
    assert!(caretaker.run_iteration(&mut state));

    assert_eq!(
        *store.deleted.lock().unwrap(),
        vec!["x:y".to_string(), "a".to_string()]
    );
    assert_eq!(
        *store.recorded.lock().unwrap(),
        vec![("ab".to_string(), 1), ("from:bob".to_string(), 0)]
    );
    assert_eq!(
        scraper.calls(),
        vec!["ab".to_string(), "from:bob".to_string()]
    );
    assert_eq!(*users.announced.lock().unwrap(), vec![42]);
    assert!(state.busy);
}

#[test]
fn upgrade_deadline_moves_before_the_upgrade_runs() {
    init_logging();
    for behaviour in [UpgradeBehaviour::Succeed, UpgradeBehaviour::Fail] {
        let upgrader = shared(FakeUpgrader::new(behaviour));
        let (_, _, services) = base_services();
        let caretaker = Caretaker::new(quick_settings(&[]), services.with_upgrader(upgrader.clone()));

        let mut state = SchedulerState::new(caretaker.settings());
        caretaker.run_iteration(&mut state);
        assert_eq!(upgrader.runs(), 0);

        state.upgrade_due = Utc::now() - TimeDelta::seconds(1);
        caretaker.run_iteration(&mut state);
        caretaker.run_iteration(&mut state);
        assert_eq!(upgrader.runs(), 1);
        assert!(state.upgrade_due > Utc::now() + TimeDelta::hours(23));
    }
}

#[test]
fn panicking_iteration_is_contained() {
    init_logging();
    let upgrader = shared(FakeUpgrader::new(UpgradeBehaviour::Panic));
    let peers = shared(FakePeers::default());
    let (_, _, services) = base_services();
    let caretaker = Caretaker::new(
        quick_settings(&[]),
        services
            .with_upgrader(upgrader.clone())
            .with_peers(peers.clone()),
    );

    let mut state = SchedulerState::new(caretaker.settings());
    state.upgrade_due = Utc::now() - TimeDelta::seconds(1);
    assert!(caretaker.tick(&mut state));
    assert_eq!(upgrader.runs(), 1);
    assert!(peers.heals.lock().unwrap().is_empty());

    assert!(caretaker.tick(&mut state));
    assert_eq!(state.iteration, 2);
    assert_eq!(upgrader.runs(), 1);
    assert_eq!(*peers.heals.lock().unwrap(), vec![0.95]);
}

#[test]
fn hello_is_rate_limited() {
    init_logging();
    let peers = shared(FakePeers::default());
    let (_, _, services) = base_services();
    let caretaker = Caretaker::new(quick_settings(&[]), services.with_peers(peers.clone()));

    let mut state = SchedulerState::new(caretaker.settings());
    caretaker.run_iteration(&mut state);
    caretaker.run_iteration(&mut state);
    assert_eq!(peers.announcements.load(Ordering::SeqCst), 1);
    assert_eq!(peers.heals.lock().unwrap().len(), 2);
}

#[test]
fn failed_batch_is_dropped_after_retries() {
    init_logging();
    let replicator = shared(RecordingReplicator::rejecting());
    let outgoing = shared(MemoryOutgoingBuffer::new());
    outgoing.transmit(many_messages(250));
    let services = CaretakerServices::new(replicator.clone(), outgoing.clone());
    let caretaker = Caretaker::new(
        quick_settings(&[("caretaker.backendpush.retries", "2")]),
        services,
    );

    let mut state = SchedulerState::new(caretaker.settings());
    caretaker.run_iteration(&mut state);

    assert_eq!(replicator.attempts(), 3);
    assert_eq!(replicator.pushes()[0].len(), 250);
    assert!(outgoing.is_empty());
    assert!(state.busy);
}

#[test]
fn small_backlog_waits_for_a_full_batch() {
    init_logging();
    let (replicator, outgoing, services) = base_services();
    outgoing.transmit(many_messages(150));
    let caretaker = Caretaker::new(quick_settings(&[]), services);

    let mut state = SchedulerState::new(caretaker.settings());
    caretaker.run_iteration(&mut state);
    assert_eq!(replicator.attempts(), 0);
    assert_eq!(outgoing.len(), 150);
    assert!(!state.busy);
}

#[test]
fn retention_sweeps_buckets_at_most_once_per_period() {
    init_logging();
    for (autodeletion, expected) in [
        ("false", vec![RetentionBucket::Hour, RetentionBucket::Day, RetentionBucket::Week]),
        (
            "true",
            vec![
                RetentionBucket::Hour,
                RetentionBucket::Day,
                RetentionBucket::Week,
                RetentionBucket::Month,
            ],
        ),
    ] {
        let store = shared(FakeStore::default());
        let (_, _, services) = base_services();
        let caretaker = Caretaker::new(
            quick_settings(&[("autodeletion", autodeletion)]),
            services.with_store(store.clone()),
        );

        let mut state = SchedulerState::new(caretaker.settings());
        let before = Utc::now();
        caretaker.run_iteration(&mut state);
        caretaker.run_iteration(&mut state);

        let sweeps = store.sweeps.lock().unwrap().clone();
        let buckets: Vec<RetentionBucket> = sweeps.iter().map(|(bucket, _)| *bucket).collect();
        assert_eq!(buckets, expected);
        let (_, hour_cutoff) = sweeps[0];
        assert!(hour_cutoff <= before - TimeDelta::minutes(59));
        assert!(hour_cutoff >= before - TimeDelta::minutes(61));
    }
}

#[test]
fn unresolved_users_are_pushed_back() {
    init_logging();
    let users = shared(FakeUsers {
        rate_limited: true,
        ..FakeUsers::default()
    });
    *users.pending.lock().unwrap() = Some(vec![1, 2, 3]);
    let (_, _, services) = base_services();
    let caretaker = Caretaker::new(
        quick_settings(&[("retrieval.user.enabled", "true")]),
        services.with_users(users.clone()),
    );

    let mut state = SchedulerState::new(caretaker.settings());
    let start = Instant::now();
    caretaker.run_iteration(&mut state);
    assert!(start.elapsed() >= Duration::from_millis(5));
    assert_eq!(*users.announced.lock().unwrap(), vec![1, 2, 3]);
}

#[test]
fn idle_iteration_seeds_a_crawl() {
    init_logging();
    let crawler = shared(FakeCrawler {
        seed: Some("fossasia".to_string()),
        ..FakeCrawler::default()
    });
    let (_, outgoing, services) = base_services();
    let caretaker = Caretaker::new(quick_settings(&[]), services.with_crawler(crawler.clone()));

    let mut state = SchedulerState::new(caretaker.settings());
    caretaker.run_iteration(&mut state);
    assert!(state.busy);
    assert_eq!(crawler.seeded.load(Ordering::SeqCst), 1);

    // Replicating a batch makes the iteration busy, so no crawl is seeded.
    outgoing.transmit(many_messages(250));
    caretaker.run_iteration(&mut state);
    assert!(outgoing.is_empty());
    assert_eq!(crawler.seeded.load(Ordering::SeqCst), 1);
}

#[test]
fn shutdown_interrupts_a_long_idle_pause() {
    init_logging();
    let (_, _, services) = base_services();
    let caretaker = Caretaker::new(
        quick_settings(&[("caretaker.pause.idle", "600000")]),
        services,
    );
    let handle = caretaker.spawn().unwrap();
    std::thread::sleep(Duration::from_millis(50));
    assert!(!handle.is_finished());

    let start = Instant::now();
    handle.shutdown();
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn iteration_tag_reaches_caretaker_and_harvest_workers() {
    init_logging();
    let recorder = shared(IterationRecorder::default());
    let (_, _, services) = base_services();
    let caretaker = Caretaker::new(
        quick_settings(&[
            ("retrieval.forbackend.enabled", "true"),
            ("retrieval.forbackend.concurrency", "2"),
        ]),
        services.with_harvester(recorder.clone()),
    );

    let mut state = SchedulerState::new(caretaker.settings());
    assert!(caretaker.run_iteration(&mut state));
    assert_eq!(node_logging::current_iteration(), 1);
    assert!(caretaker.run_iteration(&mut state));
    assert_eq!(node_logging::current_iteration(), 2);

    assert_eq!(*recorder.seen.lock().unwrap(), vec![1, 1, 2, 2]);
}
