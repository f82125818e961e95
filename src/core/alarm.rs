use super::ent;
use crate::config::model::AlarmConfig;
use chrono::Utc;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlarmError {
    #[error("smtp transport: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
    #[error("invalid mailbox: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("could not build message: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("could not encode events: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Receives alerts about target health.
pub trait Notifier: Send {
    fn notify(&self, subject: &str, events: Vec<ent::HealthInfo>);
}

#[derive(Serialize)]
struct EmailBody {
    update_time: String,
    events: Vec<ent::HealthInfo>,
}

fn render(events: Vec<ent::HealthInfo>) -> Result<String, serde_json::Error> {
    let body = EmailBody {
        update_time: Utc::now().to_rfc3339(),
        events,
    };
    serde_json::to_string_pretty(&body)
}

/// E-mail notifier.
pub struct Alarm {
    from: Mailbox,
    to: Mailbox,
    mailer: SmtpTransport,
}

impl Alarm {
    pub fn new(config: &AlarmConfig) -> Result<Alarm, AlarmError> {
        let creds = Credentials::new(config.smtp_username.clone(), config.smtp_password.clone());
        Ok(Alarm {
            from: config.from.parse()?,
            to: config.to.parse()?,
            mailer: SmtpTransport::starttls_relay(&config.domain)?
                .port(config.port)
                .credentials(creds)
                .build(),
        })
    }

    pub fn compose(&self, subject: &str, events: Vec<ent::HealthInfo>) -> Result<Message, AlarmError> {
        let body = render(events)?;
        Ok(Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)?)
    }
}

impl Notifier for Alarm {
    fn notify(&self, subject: &str, events: Vec<ent::HealthInfo>) {
        let email = match self.compose(subject, events) {
            Ok(email) => email,
            Err(e) => {
                tracing::error!("Could not compose alert: {}", e);
                return;
            }
        };
        match self.mailer.send(&email) {
            Ok(_) => tracing::info!(%subject, "Alert sent"),
            Err(e) => {
                tracing::error!("Could not send email: {e:?}");
                tracing::info!("Unsent mail: {}", String::from_utf8_lossy(&email.formatted()));
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ent::{HealthInfo, HealthStatus, TargetHealth};

    fn config() -> AlarmConfig {
        AlarmConfig {
            from: "Monitor <monitor@domain.tld>".into(),
            to: "Caretaker <caretaker@domain.tld>".into(),
            smtp_username: "smtp_username".into(),
            smtp_password: "smtp_password".into(),
            domain: "smtp.domain.tld".into(),
            port: 587,
            report_interval_seconds: 3600,
        }
    }

    fn info() -> HealthInfo {
        HealthInfo {
            target: "nyland-lift".into(),
            previous: HealthStatus::Healthy,
            status: HealthStatus::Unhealthy,
            health: TargetHealth {
                status: HealthStatus::Unhealthy,
                last_checked_at: None,
                latency_ms: Some(5000),
                avg_latency_ms: Some(2500),
                observations: 2,
                last_error: Some("no response within 5s".into()),
                building: Some("Nyland".into()),
                service: Some("Lift".into()),
            },
        }
    }

    #[test]
    fn body_lists_events() {
        let body: serde_json::Value = serde_json::from_str(&render(vec![info()]).unwrap()).unwrap();
        assert!(body["update_time"].is_string());
        assert_eq!(body["events"][0]["target"], "nyland-lift");
        assert_eq!(body["events"][0]["status"], "unhealthy");
        assert_eq!(body["events"][0]["health"]["lastError"], "no response within 5s");
    }

    #[test]
    fn compose_message() {
        let alarm = Alarm::new(&config()).unwrap();
        let email = alarm.compose("nyland-lift is unhealthy", vec![info()]).unwrap();
        let raw = String::from_utf8_lossy(&email.formatted()).to_string();
        assert!(raw.contains("Subject: nyland-lift is unhealthy"));
        assert!(raw.contains("caretaker@domain.tld"));
    }

    #[test]
    fn invalid_mailbox_rejected() {
        let mut bad = config();
        bad.to = "not an address".into();
        assert!(matches!(Alarm::new(&bad), Err(AlarmError::Address(_))));
    }
}
