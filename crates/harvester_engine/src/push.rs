use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use harvester_core::Timeline;
use node_logging::{node_error, node_info, node_warn};

use crate::config::RetryPolicy;
use crate::replicate::push_with_retry;
use crate::services::{OutgoingBuffer, Replicator};

enum PushCommand {
    Push(Timeline),
}

/// Where harvested timelines are delivered.
#[derive(Clone)]
pub struct PushTarget {
    pub backend: Vec<String>,
    pub replicator: Arc<dyn Replicator>,
    /// Receives timelines the backend did not take.
    pub outgoing: Arc<dyn OutgoingBuffer>,
    pub retry: RetryPolicy,
}

/// Fire-and-forget pushes from a harvester, serialized on one worker thread.
///
/// The inbox is bounded; when it is full, or the executor is stopped, the
/// timeline goes straight to the outgoing buffer instead of blocking the
/// harvest path.
pub struct PushExecutor {
    cmd_tx: Mutex<Option<SyncSender<PushCommand>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    outgoing: Arc<dyn OutgoingBuffer>,
}

impl PushExecutor {
    pub fn spawn(name: &str, target: PushTarget, inbox: usize) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::sync_channel(inbox.max(1));
        let outgoing = target.outgoing.clone();
        let worker = thread::Builder::new()
            .name(format!("{name}-push"))
            .spawn(move || run(target, cmd_rx));
        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(err) => {
                node_error!("could not start push thread for {}: {}", name, err);
                None
            }
        };
        let cmd_tx = worker.is_some().then_some(cmd_tx);
        Self {
            cmd_tx: Mutex::new(cmd_tx),
            worker: Mutex::new(worker),
            outgoing,
        }
    }

    /// Queues `timeline` for pushing. Returns `false` if it was handed to the
    /// outgoing buffer instead.
    pub fn submit(&self, timeline: Timeline) -> bool {
        let cmd_tx = self.cmd_tx.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = cmd_tx.as_ref() else {
            drop(cmd_tx);
            self.fall_back(timeline);
            return false;
        };
        match tx.try_send(PushCommand::Push(timeline)) {
            Ok(()) => true,
            Err(TrySendError::Full(PushCommand::Push(timeline)))
            | Err(TrySendError::Disconnected(PushCommand::Push(timeline))) => {
                drop(cmd_tx);
                node_warn!(
                    "push inbox unavailable, scheduling {} messages for batch push",
                    timeline.len()
                );
                self.fall_back(timeline);
                false
            }
        }
    }

    /// Closes the inbox and waits for queued pushes to finish.
    pub fn stop(&self) {
        self.cmd_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if worker.join().is_err() {
                node_error!("push thread panicked");
            }
        }
    }

    fn fall_back(&self, mut timeline: Timeline) {
        timeline.set_query(None);
        self.outgoing.transmit(timeline);
    }
}

impl Drop for PushExecutor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(target: PushTarget, cmd_rx: Receiver<PushCommand>) {
    while let Ok(command) = cmd_rx.recv() {
        match command {
            PushCommand::Push(timeline) => deliver(&target, timeline),
        }
    }
}

fn deliver(target: &PushTarget, mut timeline: Timeline) {
    let query = timeline.query().unwrap_or_default().to_string();
    let report = push_with_retry(
        target.replicator.as_ref(),
        &target.backend,
        &timeline,
        &target.retry,
        &thread::sleep,
    );
    if report.success {
        node_info!(
            "retrieval of {} new messages for q = {}, pushed to backend synchronously in {} ms",
            timeline.len(),
            query,
            report.elapsed.as_millis()
        );
        return;
    }
    timeline.set_query(None);
    node_info!(
        "retrieval of {} new messages for q = {}, scheduled push",
        timeline.len(),
        query
    );
    target.outgoing.transmit(timeline);
}
