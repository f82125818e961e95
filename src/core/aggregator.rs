use crate::core::doctor::*;
use crate::core::ent::*;
use crate::core::error::AggregatorError;
use arc_swap::ArcSwap;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

struct TargetState {
    target: ServiceTarget,
    // changes only when a target is registered anew after a deregistration
    registration: Uuid,
    window: VecDeque<Observation>,
}

impl TargetState {
    fn new(target: ServiceTarget) -> TargetState {
        TargetState {
            window: VecDeque::with_capacity(target.history_window),
            target,
            registration: Uuid::new_v4(),
        }
    }

    fn status(&self) -> HealthStatus {
        Doctor::diagnose(&self.window, self.target.failure_threshold)
    }

    fn push(&mut self, observation: Observation) {
        self.window.push_back(observation);
        self.trim();
    }

    fn trim(&mut self) {
        while self.window.len() > self.target.history_window {
            self.window.pop_front();
        }
    }

    fn health(&self) -> TargetHealth {
        let last = self.window.back();
        let avg_latency_ms = if self.window.is_empty() {
            None
        } else {
            let total: u128 = self.window.iter().map(|o| u128::from(o.latency_ms)).sum();
            Some((total / self.window.len() as u128) as u64)
        };
        TargetHealth {
            status: self.status(),
            last_checked_at: last.map(|o| o.at),
            latency_ms: last.map(|o| o.latency_ms),
            avg_latency_ms,
            observations: self.window.len(),
            last_error: self
                .window
                .iter()
                .rev()
                .find(|o| !o.outcome.is_success())
                .and_then(|o| o.detail.clone()),
            building: self.target.building.clone(),
            service: self.target.service.clone(),
        }
    }
}

/// Checks a target definition before it is accepted.
pub fn validate(target: &ServiceTarget) -> Result<(), AggregatorError> {
    let name = target.name.as_str();
    if name.trim().is_empty() {
        return Err(AggregatorError::invalid(name, "name must not be empty"));
    }
    match reqwest::Url::parse(&target.endpoint) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
        Ok(url) => {
            return Err(AggregatorError::invalid(
                name,
                format!("unsupported endpoint scheme `{}`", url.scheme()),
            ))
        }
        Err(e) => {
            return Err(AggregatorError::invalid(
                name,
                format!("invalid endpoint `{}`: {}", target.endpoint, e),
            ))
        }
    }
    if target.interval_seconds == 0 {
        return Err(AggregatorError::invalid(name, "interval_seconds must be positive"));
    }
    if target.timeout_seconds == 0 {
        return Err(AggregatorError::invalid(name, "timeout_seconds must be positive"));
    }
    if target.failure_threshold == 0 {
        return Err(AggregatorError::invalid(name, "failure_threshold must be at least 1"));
    }
    if target.history_window < target.failure_threshold {
        return Err(AggregatorError::invalid(
            name,
            format!(
                "history_window ({}) must be at least failure_threshold ({})",
                target.history_window, target.failure_threshold
            ),
        ));
    }
    Ok(())
}

/// Owns every target's rolling observation window and publishes an
/// immutable [`Snapshot`] after each change.
///
/// The state lock is only held to mutate a window and republish; it is never
/// held across the network call made by [`HealthAggregator::poll`]. Readers
/// of [`HealthAggregator::get_snapshot`] never take the lock at all.
pub struct HealthAggregator {
    targets: RwLock<HashMap<String, TargetState>>,
    published: ArcSwap<Snapshot>,
    doctor: Doctor,
    events: Option<mpsc::Sender<Event>>,
}

impl HealthAggregator {
    pub fn new(doctor: Doctor) -> HealthAggregator {
        HealthAggregator {
            targets: RwLock::new(HashMap::new()),
            published: ArcSwap::from_pointee(Snapshot::default()),
            doctor,
            events: None,
        }
    }

    /// Status transitions and deregistrations are sent to `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<Event>) -> HealthAggregator {
        self.events = Some(tx);
        self
    }

    /// Registers a target, or replaces the configuration of an already
    /// registered one while keeping its history. Returns the registration id.
    pub fn register_target(&self, target: ServiceTarget) -> Result<Uuid, AggregatorError> {
        validate(&target)?;
        let name = target.name.clone();
        let (registration, transition) = {
            let mut targets = self.targets.write();
            let (state, previous) = match targets.entry(name.clone()) {
                Entry::Occupied(entry) => {
                    let state = entry.into_mut();
                    let previous = state.status();
                    state.target = target;
                    state.trim();
                    (state, previous)
                }
                Entry::Vacant(entry) => (entry.insert(TargetState::new(target)), HealthStatus::Unknown),
            };
            self.publish(&name, Some(&*state));
            (state.registration, status_change(&name, previous, state))
        };
        tracing::info!(%name, %registration, "target registered");
        if let Some(info) = transition {
            self.emit(Event::Transition(info));
        }
        Ok(registration)
    }

    /// Removes a target and its history.
    pub fn deregister_target(&self, name: &str) -> Result<ServiceTarget, AggregatorError> {
        let removed = {
            let mut targets = self.targets.write();
            let removed = targets
                .remove(name)
                .ok_or_else(|| AggregatorError::UnknownTarget(name.to_string()))?;
            self.publish(name, None);
            removed
        };
        tracing::info!(%name, "target deregistered");
        self.emit(Event::Offline(name.to_string()));
        Ok(removed.target)
    }

    /// Drops a target's history; its status goes back to unknown.
    pub fn reset_target(&self, name: &str) -> Result<(), AggregatorError> {
        let transition = {
            let mut targets = self.targets.write();
            let state = targets
                .get_mut(name)
                .ok_or_else(|| AggregatorError::UnknownTarget(name.to_string()))?;
            let previous = state.status();
            state.window.clear();
            self.publish(name, Some(&*state));
            status_change(name, previous, state)
        };
        tracing::info!(%name, "target history reset");
        if let Some(info) = transition {
            self.emit(Event::Transition(info));
        }
        Ok(())
    }

    pub fn record_observation(
        &self,
        name: &str,
        outcome: Outcome,
        latency: Duration,
    ) -> Result<HealthStatus, AggregatorError> {
        self.record(name, Observation::new(outcome, latency))
    }

    /// Appends an observation and returns the recomputed status.
    pub fn record(&self, name: &str, observation: Observation) -> Result<HealthStatus, AggregatorError> {
        self.record_for(name, None, observation)?
            .ok_or_else(|| AggregatorError::UnknownTarget(name.to_string()))
    }

    // `Ok(None)` when `registration` no longer matches the live target.
    fn record_for(
        &self,
        name: &str,
        registration: Option<Uuid>,
        observation: Observation,
    ) -> Result<Option<HealthStatus>, AggregatorError> {
        let (status, transition) = {
            let mut targets = self.targets.write();
            let state = targets
                .get_mut(name)
                .ok_or_else(|| AggregatorError::UnknownTarget(name.to_string()))?;
            if registration.map_or(false, |r| r != state.registration) {
                return Ok(None);
            }
            let previous = state.status();
            state.push(observation);
            self.publish(name, Some(&*state));
            (state.status(), status_change(name, previous, state))
        };
        tracing::debug!(%name, ?status, "observation recorded");
        if let Some(info) = transition {
            self.emit(Event::Transition(info));
        }
        Ok(Some(status))
    }

    /// Performs one health check and records its result. Network failures
    /// are recorded as observations; only an unknown target is an error.
    ///
    /// If the target is deregistered while the check is in flight the
    /// result is returned but not recorded.
    pub async fn poll(&self, name: &str) -> Result<Observation, AggregatorError> {
        let (target, registration) = {
            let targets = self.targets.read();
            let state = targets
                .get(name)
                .ok_or_else(|| AggregatorError::UnknownTarget(name.to_string()))?;
            (state.target.clone(), state.registration)
        };
        let observation = self.doctor.check_service(&target).await;
        match self.record_for(name, Some(registration), observation.clone()) {
            Ok(Some(_)) => {}
            Ok(None) | Err(AggregatorError::UnknownTarget(_)) => {
                tracing::debug!(%name, "target deregistered during poll, result discarded")
            }
            Err(e) => return Err(e),
        }
        Ok(observation)
    }

    /// Current snapshot. Lock-free; never waits on polling or writers.
    pub fn get_snapshot(&self) -> Arc<Snapshot> {
        self.published.load_full()
    }

    pub fn target(&self, name: &str) -> Result<ServiceTarget, AggregatorError> {
        self.targets
            .read()
            .get(name)
            .map(|s| s.target.clone())
            .ok_or_else(|| AggregatorError::UnknownTarget(name.to_string()))
    }

    /// All registered targets ordered by name.
    pub fn targets(&self) -> Vec<ServiceTarget> {
        let mut targets: Vec<_> = self.targets.read().values().map(|s| s.target.clone()).collect();
        targets.sort_by(|a, b| a.name.cmp(&b.name));
        targets
    }

    /// The rolling window of a target, oldest first.
    pub fn history(&self, name: &str) -> Result<Vec<Observation>, AggregatorError> {
        self.targets
            .read()
            .get(name)
            .map(|s| s.window.iter().cloned().collect())
            .ok_or_else(|| AggregatorError::UnknownTarget(name.to_string()))
    }

    pub fn registration(&self, name: &str) -> Option<Uuid> {
        self.targets.read().get(name).map(|s| s.registration)
    }

    // Must be called with the state write lock held.
    fn publish(&self, name: &str, state: Option<&TargetState>) {
        let current = self.published.load();
        let mut targets = current.targets.clone();
        match state {
            Some(state) => {
                targets.insert(name.to_string(), state.health());
            }
            None => {
                targets.remove(name);
            }
        }
        self.published.store(Arc::new(Snapshot {
            taken_at: Utc::now(),
            targets,
        }));
    }

    fn emit(&self, event: Event) {
        if let Some(tx) = &self.events {
            if let Err(e) = tx.try_send(event) {
                tracing::warn!("dropping health event: {}", e);
            }
        }
    }
}

fn status_change(name: &str, previous: HealthStatus, state: &TargetState) -> Option<HealthInfo> {
    let status = state.status();
    if status == previous {
        return None;
    }
    Some(HealthInfo {
        target: name.to_string(),
        previous,
        status,
        health: state.health(),
    })
}
