use crate::core::aggregator::HealthAggregator;
use crate::core::ent::ServiceTarget;
use crate::core::error::AggregatorError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use uuid::Uuid;

struct PollTask {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PollTask {
    fn cancel(&self) {
        // the receiver may already be gone if the task stopped on its own
        let _ = self.cancel.send(true);
    }
}

/// Runs one periodic polling task per registered target.
pub struct Scheduler {
    aggregator: Arc<HealthAggregator>,
    tasks: Mutex<HashMap<String, PollTask>>,
}

impl Scheduler {
    pub fn new(aggregator: Arc<HealthAggregator>) -> Scheduler {
        Scheduler {
            aggregator,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn aggregator(&self) -> &Arc<HealthAggregator> {
        &self.aggregator
    }

    /// Registers the target and (re)starts its polling task. Must be called
    /// from within a tokio runtime.
    pub fn register(&self, target: ServiceTarget) -> Result<Uuid, AggregatorError> {
        let name = target.name.clone();
        let interval = target.interval();
        // held across both steps so the task map always mirrors the aggregator
        let mut tasks = self.tasks.lock();
        let registration = self.aggregator.register_target(target)?;
        let task = spawn_poller(self.aggregator.clone(), name.clone(), interval);
        if let Some(previous) = tasks.insert(name, task) {
            previous.cancel();
        }
        Ok(registration)
    }

    /// Stops polling the target and forgets it. A poll already in flight
    /// runs to completion but its result is discarded.
    pub fn deregister(&self, name: &str) -> Result<ServiceTarget, AggregatorError> {
        let mut tasks = self.tasks.lock();
        if let Some(task) = tasks.remove(name) {
            task.cancel();
        }
        self.aggregator.deregister_target(name)
    }

    pub fn is_scheduled(&self, name: &str) -> bool {
        self.tasks.lock().contains_key(name)
    }

    pub fn scheduled(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Cancels every polling task and waits for them to stop.
    pub async fn shutdown(&self) {
        let tasks: Vec<PollTask> = self.tasks.lock().drain().map(|(_, t)| t).collect();
        tracing::info!(tasks = tasks.len(), "stopping pollers");
        for task in &tasks {
            task.cancel();
        }
        for task in tasks {
            if let Err(e) = task.handle.await {
                tracing::error!("poller terminated abnormally: {}", e);
            }
        }
    }
}

fn spawn_poller(aggregator: Arc<HealthAggregator>, name: String, period: Duration) -> PollTask {
    let (cancel, mut cancelled) = watch::channel(false);
    let handle = tokio::spawn(async move {
        tracing::debug!(%name, period = ?period, "poller started");
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancelled.changed() => break,
            }
            // not raced against cancellation: an in-flight check always completes
            match aggregator.poll(&name).await {
                Ok(observation) => {
                    tracing::trace!(%name, outcome = ?observation.outcome, latency_ms = observation.latency_ms, "polled")
                }
                Err(e) => {
                    tracing::debug!(%name, "poller stopping: {}", e);
                    break;
                }
            }
        }
        tracing::debug!(%name, "poller stopped");
    });
    PollTask { cancel, handle }
}
