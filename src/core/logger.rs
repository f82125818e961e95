use crate::core::alarm::Notifier;
use crate::core::ent::*;
use tokio::sync::mpsc;

// Logs health events and decides which of them are worth an alert.
pub struct Logger {
    notifier: Option<Box<dyn Notifier>>,
}

impl Logger {
    pub fn new(notifier: Option<Box<dyn Notifier>>) -> Logger {
        Logger { notifier }
    }

    /// Consumes events until every sender is dropped. Blocks the calling
    /// thread, run it with `spawn_blocking`.
    pub fn run(mut self, mut rx: mpsc::Receiver<Event>) {
        tracing::debug!("logger started");
        while let Some(event) = rx.blocking_recv() {
            self.log(event);
        }
        tracing::debug!("logger stopped");
    }

    pub fn log(&mut self, event: Event) {
        match event {
            Event::Transition(info) => {
                let (name, previous, status) = (info.target.clone(), info.previous, info.status);
                match status {
                    HealthStatus::Unhealthy => {
                        tracing::error!(%name, ?previous, error = ?info.health.last_error, "target unhealthy, notify now");
                        self.notify(&format!("{} is unhealthy", name), vec![info]);
                    }
                    HealthStatus::Degraded => tracing::warn!(%name, ?previous, "target degraded"),
                    HealthStatus::Healthy => tracing::info!(%name, ?previous, "target healthy"),
                    HealthStatus::Unknown => tracing::info!(%name, ?previous, "target status unknown"),
                }
            }
            Event::Offline(name) => tracing::info!(%name, "target offline"),
            Event::Report(snapshot) => self.report(&snapshot),
        };
    }

    fn report(&self, snapshot: &Snapshot) {
        let failing: Vec<HealthInfo> = snapshot
            .targets
            .iter()
            .filter(|(_, t)| matches!(t.status, HealthStatus::Degraded | HealthStatus::Unhealthy))
            .map(|(name, t)| HealthInfo {
                target: name.clone(),
                previous: t.status,
                status: t.status,
                health: t.clone(),
            })
            .collect();
        tracing::info!(
            targets = snapshot.targets.len(),
            failing = failing.len(),
            "finished check of all targets"
        );
        if !failing.is_empty() {
            self.notify(
                &format!("{} of {} property services need attention", failing.len(), snapshot.targets.len()),
                failing,
            );
        }
    }

    fn notify(&self, subject: &str, events: Vec<HealthInfo>) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(subject, events);
        }
    }
}
