use std::thread;
use std::time::Duration;

use harvester_core::HarvestOutcome;
use node_logging::{current_iteration, node_debug, node_error, set_iteration};
use rand::Rng;

use crate::config::RetrievalSettings;
use crate::harvester::Harvester;
use crate::signal::ShutdownSignal;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundReport {
    pub rounds: usize,
    pub harvested: usize,
    /// A worker reported no work, so the remaining rounds were skipped.
    pub aborted: bool,
    pub panicked: usize,
}

/// Runs up to `settings.loops` harvest rounds of `settings.concurrency`
/// concurrent `harvest()` calls each, joining every round before the next.
pub fn run_harvest_rounds(
    harvester: &dyn Harvester,
    settings: &RetrievalSettings,
    signal: &ShutdownSignal,
) -> RoundReport {
    let mut report = RoundReport::default();
    for _ in 0..settings.loops {
        if signal.is_triggered() {
            break;
        }
        let outcomes = run_round(harvester, settings, signal);
        report.rounds += 1;

        let mut no_work = false;
        for outcome in outcomes {
            match outcome {
                Some(HarvestOutcome::Harvested(count)) => report.harvested += count,
                Some(HarvestOutcome::NoWork) => no_work = true,
                None => report.panicked += 1,
            }
        }
        if no_work {
            node_debug!(
                "caretaker iteration {}: harvest round {} found no work, ending harvest step",
                current_iteration(),
                report.rounds
            );
            report.aborted = true;
            break;
        }
        signal.sleep(jitter(settings));
    }
    report
}

/// One fan-out/fan-in round; `None` marks a worker that panicked.
/// Workers carry the caller's caretaker iteration into their log lines.
fn run_round(
    harvester: &dyn Harvester,
    settings: &RetrievalSettings,
    signal: &ShutdownSignal,
) -> Vec<Option<HarvestOutcome>> {
    let iteration = current_iteration();
    thread::scope(|scope| {
        let mut workers = Vec::with_capacity(settings.concurrency);
        for index in 0..settings.concurrency {
            if index > 0 {
                signal.sleep(jitter(settings));
            }
            let spawned = thread::Builder::new()
                .name(format!("harvest-{index}"))
                .spawn_scoped(scope, move || {
                    set_iteration(iteration);
                    harvester.harvest()
                });
            match spawned {
                Ok(worker) => workers.push(worker),
                Err(err) => node_error!("could not start harvest worker {}: {}", index, err),
            }
        }
        workers
            .into_iter()
            .map(|worker| match worker.join() {
                Ok(outcome) => Some(outcome),
                Err(_) => {
                    node_error!("caretaker iteration {}: harvest worker panicked", iteration);
                    None
                }
            })
            .collect()
    })
}

/// Base pause plus a random offset, so workers do not hit the source in lockstep.
pub(crate) fn jitter(settings: &RetrievalSettings) -> Duration {
    let offset = u64::try_from(settings.sleep_random_offset.as_millis()).unwrap_or(u64::MAX);
    let extra = if offset == 0 {
        0
    } else {
        rand::rng().random_range(0..offset)
    };
    settings.sleep_base + Duration::from_millis(extra)
}
