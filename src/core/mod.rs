pub mod aggregator;
pub mod alarm;
pub mod api;
pub mod collector;
pub mod complaints;
pub mod doctor;
pub mod ent;
pub mod error;
pub mod logger;
pub mod scheduler;
pub use aggregator::HealthAggregator;
pub use alarm::{Alarm, Notifier};
pub use collector::{listen, router};
pub use complaints::{ComplaintLog, ComplaintError};
pub use doctor::*;
pub use ent::*;
pub use error::AggregatorError;
pub use logger::*;
pub use scheduler::Scheduler;
