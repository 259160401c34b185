//! Observability: structured logging and operational counters

pub mod logging;
pub mod metrics;

pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{metrics, MetricsCollector, MetricsSnapshot};

pub use logging::{ingest_span, lifecycle_span, mqtt_span};
