//! Per-key dispatch workers
//!
//! Each keycode gets its own queue and task, so commands for one key are sent
//! in the order they fired while different keys dispatch concurrently.

use super::BridgeServices;
use crate::dispatch::DispatchOutcome;
use crate::mapping::Command;
use crate::telemetry::CommandEvent;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const QUEUE_DEPTH: usize = 64;

#[derive(Clone, Debug)]
pub struct KeyJob {
    pub keycode: u16,
    pub command: Command,
    pub repeat: bool,
}

pub struct KeyWorkers {
    queues: HashMap<u16, mpsc::Sender<KeyJob>>,
    tasks: JoinSet<()>,
    services: BridgeServices,
    cancel: CancellationToken,
}

impl KeyWorkers {
    pub fn new(services: BridgeServices, cancel: CancellationToken) -> Self {
        Self {
            queues: HashMap::new(),
            tasks: JoinSet::new(),
            services,
            cancel,
        }
    }

    /// Queues a job behind any earlier work for the same key
    pub fn submit(&mut self, job: KeyJob) {
        let keycode = job.keycode;
        if self.queues.get(&keycode).map_or(true, |queue| queue.is_closed()) {
            let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
            debug!("Starting dispatch worker for key {}", keycode);
            self.tasks.spawn(run_worker(
                keycode,
                rx,
                self.services.clone(),
                self.cancel.clone(),
            ));
            self.queues.insert(keycode, tx);
        }

        let Some(queue) = self.queues.get(&keycode) else {
            return;
        };
        if let Err(e) = queue.try_send(job) {
            warn!("Dispatch queue for key {} is full, dropping command: {}", keycode, e);
        }
    }

    /// Lets queued work finish, then joins every worker
    pub async fn drain(mut self) {
        self.queues.clear();
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                error!("Dispatch worker failed: {}", e);
            }
        }
    }

    /// Abandons in-flight and queued work, then joins every worker
    pub async fn cancel_and_drain(self) {
        if !self.queues.is_empty() {
            info!("Cancelling {} dispatch workers", self.queues.len());
        }
        self.cancel.cancel();
        self.drain().await;
    }
}

async fn run_worker(
    keycode: u16,
    mut jobs: mpsc::Receiver<KeyJob>,
    services: BridgeServices,
    cancel: CancellationToken,
) {
    while let Some(job) = jobs.recv().await {
        let result = services.dispatcher.dispatch(&job.command, &cancel).await;
        services.telemetry.record_dispatch(&result).await;

        match result.outcome {
            DispatchOutcome::Delivered { .. } => info!(
                "Sent {} for key {} in {}ms",
                job.command.id,
                keycode,
                result.latency.as_millis()
            ),
            DispatchOutcome::Failed(kind) => error!(
                "Giving up on {} for key {} after {} attempts: {}",
                job.command.id, keycode, result.attempts, kind
            ),
            DispatchOutcome::Cancelled => continue,
        }

        let event = CommandEvent::from_result(keycode, job.repeat, &result, &services.device_address);
        if let Err(e) = services.sink.publish_event(&event).await {
            warn!("Failed to publish command event: {}", e);
        }
    }
    debug!("Dispatch worker for key {} stopped", keycode);
}
