// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod monitor;
pub mod notify;
pub mod report;
pub mod scheduler;
pub mod source;
pub mod store;
pub mod trends;

pub use crate::api::router;
pub use crate::config::AppConfig;
pub use crate::monitor::{CancelToken, Monitor, MonitorOptions, RunResult};
pub use crate::notify::{Notifier, NotifierMux};
pub use crate::scheduler::{Cadence, Scheduler};
pub use crate::source::{SourceAdapter, SourceRegistry};
pub use crate::store::ContentStore;
pub use crate::trends::TrendAnalyzer;
