use chrono::{DateTime, Duration, DurationRound, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use thiserror::Error;

/// Width of the rolling sum, in hours.
pub const ROLLING_WINDOW_HOURS: i64 = 12;
/// How many hourly points the rolling series cover at most.
pub const ROLLING_SPAN_HOURS: i64 = 7 * 24;
pub const ANONYMOUS: &str = "Anonymous";

// accepted clock skew for client supplied timestamps
const MAX_FUTURE_SKEW_MINUTES: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ServiceKind {
    Heating,
    #[serde(rename = "Hot Water")]
    HotWater,
    Lift,
    Doorbell,
    Other,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceKind::Heating => "Heating",
            ServiceKind::HotWater => "Hot Water",
            ServiceKind::Lift => "Lift",
            ServiceKind::Doorbell => "Doorbell",
            ServiceKind::Other => "Other",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ComplaintError {
    #[error("building_name must not be empty")]
    MissingBuilding,
    #[error("complaint timestamp {0} is in the future")]
    FutureTimestamp(DateTime<Utc>),
}

/// A resident's report as submitted.
#[derive(Debug, Clone, Deserialize)]
pub struct NewComplaint {
    pub service: ServiceKind,
    pub severity: Severity,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub resident_name: Option<String>,
    pub building_name: String,
    #[serde(default)]
    pub apartment_number: Option<String>,
    /// Defaults to the time of submission.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Complaint {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub service: ServiceKind,
    pub severity: Severity,
    pub description: String,
    pub resident_name: String,
    pub building_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apartment_number: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ComplaintFilter {
    pub building: Option<String>,
    pub service: Option<ServiceKind>,
    pub severity: Option<Severity>,
}

impl ComplaintFilter {
    fn matches(&self, c: &Complaint) -> bool {
        self.building.as_deref().map_or(true, |b| b == c.building_name)
            && self.service.map_or(true, |s| s == c.service)
            && self.severity.map_or(true, |s| s == c.severity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollingPoint {
    pub hour: DateTime<Utc>,
    pub count: usize,
}

/// Complaints per hour for one building and service, summed over the
/// preceding [`ROLLING_WINDOW_HOURS`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollingSeries {
    pub building: String,
    pub service: ServiceKind,
    pub points: Vec<RollingPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplaintSummary {
    pub total: usize,
    pub by_service: BTreeMap<ServiceKind, usize>,
    /// Always lists every severity, Low to Critical.
    pub by_severity: BTreeMap<Severity, usize>,
    pub rolling: Vec<RollingSeries>,
}

/// In-memory log of resident complaints about building services.
#[derive(Debug, Default)]
pub struct ComplaintLog {
    entries: RwLock<Vec<Complaint>>,
}

impl ComplaintLog {
    pub fn submit(&self, new: NewComplaint) -> Result<Complaint, ComplaintError> {
        let now = Utc::now();
        let building_name = new.building_name.trim().to_string();
        if building_name.is_empty() {
            return Err(ComplaintError::MissingBuilding);
        }
        let timestamp = new.timestamp.unwrap_or(now);
        if timestamp > now + Duration::minutes(MAX_FUTURE_SKEW_MINUTES) {
            return Err(ComplaintError::FutureTimestamp(timestamp));
        }
        let resident_name = new
            .resident_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| ANONYMOUS.to_string());

        let mut entries = self.entries.write();
        let complaint = Complaint {
            id: entries.len() as u64 + 1,
            timestamp,
            service: new.service,
            severity: new.severity,
            description: new.description,
            resident_name,
            building_name,
            apartment_number: new.apartment_number.filter(|a| !a.trim().is_empty()),
        };
        entries.push(complaint.clone());
        drop(entries);

        match complaint.severity {
            Severity::Critical | Severity::High => tracing::warn!(
                id = complaint.id,
                building = %complaint.building_name,
                service = %complaint.service,
                severity = ?complaint.severity,
                "complaint recorded"
            ),
            _ => tracing::info!(
                id = complaint.id,
                building = %complaint.building_name,
                service = %complaint.service,
                severity = ?complaint.severity,
                "complaint recorded"
            ),
        }
        Ok(complaint)
    }

    /// Matching complaints, oldest first.
    pub fn list(&self, filter: &ComplaintFilter) -> Vec<Complaint> {
        let mut found: Vec<Complaint> = self
            .entries
            .read()
            .iter()
            .filter(|c| filter.matches(c))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        found
    }

    pub fn summary(&self) -> ComplaintSummary {
        let entries = self.entries.read();
        let mut by_service = BTreeMap::new();
        let mut by_severity: BTreeMap<Severity, usize> =
            Severity::ALL.iter().map(|s| (*s, 0)).collect();
        for c in entries.iter() {
            *by_service.entry(c.service).or_insert(0) += 1;
            *by_severity.entry(c.severity).or_insert(0) += 1;
        }
        ComplaintSummary {
            total: entries.len(),
            by_service,
            by_severity,
            rolling: rolling_counts(&entries),
        }
    }
}

fn hour_of(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(Duration::hours(1)).unwrap_or(at)
}

/// Hourly rolling sums for every building × service pair seen in the log,
/// covering at most the last [`ROLLING_SPAN_HOURS`] up to the latest complaint.
pub fn rolling_counts(complaints: &[Complaint]) -> Vec<RollingSeries> {
    let last = match complaints.iter().map(|c| hour_of(c.timestamp)).max() {
        Some(last) => last,
        None => return Vec::new(),
    };
    let earliest = complaints
        .iter()
        .map(|c| hour_of(c.timestamp))
        .min()
        .unwrap_or(last);
    let first = earliest.max(last - Duration::hours(ROLLING_SPAN_HOURS - 1));
    // counting starts a window earlier so the first point sees a full window
    let start = first - Duration::hours(ROLLING_WINDOW_HOURS - 1);

    let mut hours = Vec::new();
    let mut hour = start;
    while hour <= last {
        hours.push(hour);
        hour = hour + Duration::hours(1);
    }
    let index: HashMap<DateTime<Utc>, usize> =
        hours.iter().enumerate().map(|(i, h)| (*h, i)).collect();

    let buildings: BTreeSet<&str> = complaints.iter().map(|c| c.building_name.as_str()).collect();
    let services: BTreeSet<ServiceKind> = complaints.iter().map(|c| c.service).collect();
    let mut per_hour: HashMap<(&str, ServiceKind), Vec<usize>> = HashMap::new();
    for c in complaints {
        if let Some(&i) = index.get(&hour_of(c.timestamp)) {
            per_hour
                .entry((c.building_name.as_str(), c.service))
                .or_insert_with(|| vec![0; hours.len()])[i] += 1;
        }
    }

    let window = ROLLING_WINDOW_HOURS as usize;
    let skip = window - 1;
    let mut series = Vec::new();
    for building in &buildings {
        for service in &services {
            let counts = per_hour.get(&(*building, *service));
            let mut sum = 0;
            let mut points = Vec::with_capacity(hours.len() - skip);
            for (i, hour) in hours.iter().enumerate() {
                if let Some(counts) = counts {
                    sum += counts[i];
                    if i >= window {
                        sum -= counts[i - window];
                    }
                }
                if i >= skip {
                    points.push(RollingPoint {
                        hour: *hour,
                        count: sum,
                    });
                }
            }
            series.push(RollingSeries {
                building: building.to_string(),
                service: *service,
                points,
            });
        }
    }
    series
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 15, 0).unwrap()
    }

    fn new(building: &str, service: ServiceKind, severity: Severity, at: DateTime<Utc>) -> NewComplaint {
        NewComplaint {
            service,
            severity,
            description: "no heat since morning".into(),
            resident_name: None,
            building_name: building.into(),
            apartment_number: Some("4B".into()),
            timestamp: Some(at),
        }
    }

    #[test]
    fn resident_defaults_to_anonymous() {
        let log = ComplaintLog::default();
        let first = log
            .submit(new("Nyland", ServiceKind::Heating, Severity::High, t0()))
            .unwrap();
        let mut named = new("Nyland", ServiceKind::Lift, Severity::Low, t0());
        named.resident_name = Some("  ".into());
        let second = log.submit(named).unwrap();
        assert_eq!(first.resident_name, ANONYMOUS);
        assert_eq!(second.resident_name, ANONYMOUS);
        assert_eq!((first.id, second.id), (1, 2));
    }

    #[test]
    fn submission_defaults_timestamp_to_now() {
        let log = ComplaintLog::default();
        let mut complaint = new("Malmo", ServiceKind::Doorbell, Severity::Low, t0());
        complaint.timestamp = None;
        let before = Utc::now();
        let stored = log.submit(complaint).unwrap();
        assert!(stored.timestamp >= before);
    }

    #[test]
    fn invalid_submissions_are_rejected() {
        let log = ComplaintLog::default();
        assert_eq!(
            log.submit(new(" ", ServiceKind::Lift, Severity::Low, t0()))
                .unwrap_err(),
            ComplaintError::MissingBuilding
        );
        let tomorrow = Utc::now() + Duration::days(1);
        assert!(matches!(
            log.submit(new("Malmo", ServiceKind::Lift, Severity::Low, tomorrow)),
            Err(ComplaintError::FutureTimestamp(_))
        ));
        assert!(log.list(&ComplaintFilter::default()).is_empty());
    }

    #[test]
    fn list_filters_and_orders_by_time() {
        let log = ComplaintLog::default();
        log.submit(new("Nyland", ServiceKind::Heating, Severity::High, t0() + Duration::hours(2)))
            .unwrap();
        log.submit(new("Malmo", ServiceKind::Heating, Severity::Low, t0()))
            .unwrap();
        log.submit(new("Nyland", ServiceKind::Lift, Severity::Critical, t0()))
            .unwrap();

        let all = log.list(&ComplaintFilter::default());
        assert_eq!(all.iter().map(|c| c.id).collect::<Vec<_>>(), vec![2, 3, 1]);

        let nyland = ComplaintFilter {
            building: Some("Nyland".into()),
            ..Default::default()
        };
        assert_eq!(log.list(&nyland).len(), 2);

        let heating_high = ComplaintFilter {
            service: Some(ServiceKind::Heating),
            severity: Some(Severity::High),
            ..Default::default()
        };
        let found = log.list(&heating_high);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].building_name, "Nyland");
    }

    #[test]
    fn summary_counts_service_and_severity() {
        let log = ComplaintLog::default();
        log.submit(new("Nyland", ServiceKind::Heating, Severity::High, t0()))
            .unwrap();
        log.submit(new("Nyland", ServiceKind::Heating, Severity::Critical, t0()))
            .unwrap();
        log.submit(new("Malmo", ServiceKind::HotWater, Severity::High, t0()))
            .unwrap();

        let summary = log.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.by_service[&ServiceKind::Heating], 2);
        assert_eq!(summary.by_service[&ServiceKind::HotWater], 1);
        assert!(!summary.by_service.contains_key(&ServiceKind::Lift));
        assert_eq!(
            summary.by_severity.iter().map(|(s, n)| (*s, *n)).collect::<Vec<_>>(),
            vec![
                (Severity::Low, 0),
                (Severity::Medium, 0),
                (Severity::High, 2),
                (Severity::Critical, 1)
            ]
        );
    }

    #[test]
    fn rolling_sum_over_twelve_hours() {
        let log = ComplaintLog::default();
        for offset in [0, 1, 13] {
            log.submit(new("Nyland", ServiceKind::Heating, Severity::Medium, t0() + Duration::hours(offset)))
                .unwrap();
        }
        log.submit(new("Malmo", ServiceKind::Lift, Severity::High, t0() + Duration::hours(2)))
            .unwrap();

        let rolling = log.summary().rolling;
        let pairs: Vec<_> = rolling
            .iter()
            .map(|s| (s.building.as_str(), s.service))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("Malmo", ServiceKind::Heating),
                ("Malmo", ServiceKind::Lift),
                ("Nyland", ServiceKind::Heating),
                ("Nyland", ServiceKind::Lift),
            ]
        );

        let counts = |i: usize| rolling[i].points.iter().map(|p| p.count).collect::<Vec<_>>();
        assert_eq!(rolling[2].points.len(), 14);
        assert_eq!(rolling[2].points[0].hour, Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap());
        assert_eq!(counts(2), vec![1, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 2, 1, 1]);
        assert_eq!(counts(1), vec![0, 0, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1]);
        assert!(counts(0).iter().all(|n| *n == 0));
    }

    #[test]
    fn rolling_series_span_is_bounded() {
        let log = ComplaintLog::default();
        log.submit(new("Nyland", ServiceKind::Lift, Severity::Low, t0() - Duration::days(30)))
            .unwrap();
        log.submit(new("Nyland", ServiceKind::Lift, Severity::Low, t0()))
            .unwrap();
        let rolling = log.summary().rolling;
        assert_eq!(rolling.len(), 1);
        assert_eq!(rolling[0].points.len(), ROLLING_SPAN_HOURS as usize);
        assert_eq!(rolling[0].points.last().unwrap().count, 1);
    }

    #[test]
    fn empty_log_summary() {
        let summary = ComplaintLog::default().summary();
        assert_eq!(summary.total, 0);
        assert_eq!(summary.by_severity.len(), 4);
        assert!(summary.rolling.is_empty());
    }

    #[test]
    fn complaint_json_uses_display_names() {
        let parsed: NewComplaint = serde_json::from_str(
            r#"{"service": "Hot Water", "severity": "Critical", "building_name": "Malmo"}"#,
        )
        .unwrap();
        assert_eq!(parsed.service, ServiceKind::HotWater);
        assert_eq!(parsed.description, "");

        let summary = {
            let log = ComplaintLog::default();
            log.submit(NewComplaint {
                timestamp: Some(t0()),
                ..parsed
            })
            .unwrap();
            log.summary()
        };
        let json = serde_json::to_value(summary).unwrap();
        assert_eq!(json["byService"]["Hot Water"], 1);
        assert_eq!(json["bySeverity"]["Low"], 0);
        assert_eq!(json["rolling"][0]["service"], "Hot Water");
    }
}
