use crate::core::ent::*;
use std::collections::VecDeque;
use std::time::Instant;
use tokio::time;

/// Runs health checks and judges a target's health from its observations.
#[derive(Debug, Clone, Default)]
pub struct Doctor {
    client: reqwest::Client,
}

impl Doctor {
    pub fn new() -> Doctor {
        let client = reqwest::Client::builder()
            .user_agent(concat!("property-health/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Doctor { client }
    }

    /// Derives the status from the rolling window. Only the last
    /// `failure_threshold` observations count; fewer than that is unknown.
    pub fn diagnose(window: &VecDeque<Observation>, failure_threshold: usize) -> HealthStatus {
        if failure_threshold == 0 || window.len() < failure_threshold {
            return HealthStatus::Unknown;
        }
        let recent = window.iter().rev().take(failure_threshold);
        let successes = recent.filter(|o| o.outcome.is_success()).count();
        if successes == failure_threshold {
            HealthStatus::Healthy
        } else if successes == 0 {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        }
    }

    /// One GET against the target's endpoint, bounded by its timeout.
    /// Every outcome is returned as an observation, never as an error.
    pub async fn check_service(&self, target: &ServiceTarget) -> Observation {
        let started = Instant::now();
        let request = self.client.get(&target.endpoint).send();
        match time::timeout(target.timeout(), request).await {
            Ok(Ok(response)) => {
                let status = response.status();
                if status.is_success() {
                    Observation::new(Outcome::Success, started.elapsed())
                } else {
                    tracing::warn!(name = %target.name, %status, "health check failed: non-success status");
                    Observation::new(Outcome::Failure, started.elapsed())
                        .with_detail(format!("HTTP {}", status))
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(name = %target.name, error = %e, "health check failed: request error");
                Observation::new(Outcome::Failure, started.elapsed()).with_detail(e.to_string())
            }
            Err(_) => {
                tracing::warn!(name = %target.name, timeout = target.timeout_seconds, "health check failed: timeout");
                Observation::new(Outcome::Timeout, started.elapsed())
                    .with_detail(format!("no response within {}s", target.timeout_seconds))
            }
        }
    }
}
