use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_INTERVAL_SECONDS: u64 = 30;
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 5;
pub const DEFAULT_FAILURE_THRESHOLD: usize = 3;
pub const DEFAULT_HISTORY_WINDOW: usize = 50;

/// A property service endpoint being monitored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceTarget {
    pub name: String,
    pub endpoint: String,
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: usize,
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub building: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

fn default_interval_seconds() -> u64 {
    DEFAULT_INTERVAL_SECONDS
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

fn default_failure_threshold() -> usize {
    DEFAULT_FAILURE_THRESHOLD
}

fn default_history_window() -> usize {
    DEFAULT_HISTORY_WINDOW
}

impl ServiceTarget {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> ServiceTarget {
        ServiceTarget {
            name: name.into(),
            endpoint: endpoint.into(),
            interval_seconds: DEFAULT_INTERVAL_SECONDS,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            history_window: DEFAULT_HISTORY_WINDOW,
            building: None,
            service: None,
        }
    }
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
    Timeout,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }
}

/// One health-check result for a target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub at: DateTime<Utc>,
    pub outcome: Outcome,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Observation {
    pub fn new(outcome: Outcome, latency: Duration) -> Observation {
        Observation {
            at: Utc::now(),
            outcome,
            latency_ms: u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
            detail: None,
        }
    }
    pub fn with_detail(mut self, detail: impl Into<String>) -> Observation {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health of one target as published in a [`Snapshot`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetHealth {
    pub status: HealthStatus,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub latency_ms: Option<u64>,
    pub avg_latency_ms: Option<u64>,
    pub observations: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub building: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

/// Immutable point-in-time view of all targets' health.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    pub targets: BTreeMap<String, TargetHealth>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Snapshot {
            taken_at: Utc::now(),
            targets: BTreeMap::new(),
        }
    }
}

impl Snapshot {
    pub fn get(&self, name: &str) -> Option<&TargetHealth> {
        self.targets.get(name)
    }
    pub fn status_of(&self, name: &str) -> Option<HealthStatus> {
        self.targets.get(name).map(|t| t.status)
    }
    /// Keeps only targets whose labels match every given filter.
    pub fn filtered(&self, building: Option<&str>, service: Option<&str>) -> Snapshot {
        let label_matches = |label: &Option<String>, want: Option<&str>| match want {
            Some(want) => label.as_deref() == Some(want),
            None => true,
        };
        Snapshot {
            taken_at: self.taken_at,
            targets: self
                .targets
                .iter()
                .filter(|(_, t)| label_matches(&t.building, building) && label_matches(&t.service, service))
                .map(|(name, t)| (name.clone(), t.clone()))
                .collect(),
        }
    }
    pub fn summary(&self) -> Summary {
        let mut summary = Summary {
            taken_at: self.taken_at,
            total: self.targets.len(),
            by_status: BTreeMap::new(),
            by_building: BTreeMap::new(),
        };
        for t in self.targets.values() {
            *summary.by_status.entry(t.status).or_insert(0) += 1;
            let building = t.building.clone().unwrap_or_else(|| "unassigned".to_string());
            *summary
                .by_building
                .entry(building)
                .or_default()
                .entry(t.status)
                .or_insert(0) += 1;
        }
        summary
    }
}

/// Status counts over a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub taken_at: DateTime<Utc>,
    pub total: usize,
    pub by_status: BTreeMap<HealthStatus, usize>,
    pub by_building: BTreeMap<String, BTreeMap<HealthStatus, usize>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthInfo {
    pub target: String,
    pub previous: HealthStatus,
    pub status: HealthStatus,
    pub health: TargetHealth,
}

#[derive(Debug, Clone)]
pub enum Event {
    Transition(HealthInfo),
    Offline(String),
    Report(Arc<Snapshot>),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn health(status: HealthStatus, building: Option<&str>, service: Option<&str>) -> TargetHealth {
        TargetHealth {
            status,
            last_checked_at: None,
            latency_ms: None,
            avg_latency_ms: None,
            observations: 0,
            last_error: None,
            building: building.map(String::from),
            service: service.map(String::from),
        }
    }

    fn sample() -> Snapshot {
        let mut snapshot = Snapshot::default();
        snapshot.targets.insert(
            "nyland-heating".into(),
            health(HealthStatus::Healthy, Some("Nyland"), Some("Heating")),
        );
        snapshot.targets.insert(
            "nyland-lift".into(),
            health(HealthStatus::Unhealthy, Some("Nyland"), Some("Lift")),
        );
        snapshot.targets.insert(
            "malmo-lift".into(),
            health(HealthStatus::Unhealthy, Some("Malmo"), Some("Lift")),
        );
        snapshot
            .targets
            .insert("gateway".into(), health(HealthStatus::Unknown, None, None));
        snapshot
    }

    #[test]
    fn target_config_defaults() {
        let target: ServiceTarget =
            serde_yaml::from_str("name: a\nendpoint: http://localhost/health\n").unwrap();
        assert_eq!(target, ServiceTarget::new("a", "http://localhost/health"));
        assert_eq!(target.interval(), Duration::from_secs(30));
        assert_eq!(target.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn filter_by_labels() {
        let snapshot = sample();
        let lifts = snapshot.filtered(None, Some("Lift"));
        assert_eq!(lifts.targets.len(), 2);
        let nyland_lifts = snapshot.filtered(Some("Nyland"), Some("Lift"));
        assert_eq!(nyland_lifts.targets.keys().collect::<Vec<_>>(), vec!["nyland-lift"]);
        assert_eq!(snapshot.filtered(None, None), snapshot);
    }

    #[test]
    fn summary_counts() {
        let summary = sample().summary();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.by_status[&HealthStatus::Unhealthy], 2);
        assert_eq!(summary.by_status[&HealthStatus::Unknown], 1);
        assert_eq!(summary.by_building["Nyland"][&HealthStatus::Healthy], 1);
        assert_eq!(summary.by_building["unassigned"][&HealthStatus::Unknown], 1);
    }

    #[test]
    fn snapshot_json_shape() {
        let json = serde_json::to_value(sample()).unwrap();
        let lift = &json["targets"]["nyland-lift"];
        assert_eq!(lift["status"], "unhealthy");
        assert!(lift["lastCheckedAt"].is_null());
        assert!(lift["latencyMs"].is_null());
        assert!(json["takenAt"].is_string());
    }
}
