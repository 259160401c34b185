//! Process-wide operational counters
//!
//! Atomic counters for the transport, the ingestion pipeline and the command
//! publisher, plus a bounded window of ingestion durations. Metrics are
//! observational only; nothing reads them to make decisions.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Ingestion durations kept for percentile calculation
const MAX_DURATION_SAMPLES: usize = 1000;

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector
pub struct MetricsCollector {
    // Transport
    mqtt_connected: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    connections_lost: AtomicU64,
    connection_start_time: AtomicU64,
    messages_received: AtomicU64,
    messages_published: AtomicU64,
    publish_failures: AtomicU64,

    // Ingestion
    decode_drops: AtomicU64,
    validation_drops: AtomicU64,
    records_persisted: AtomicU64,
    persistence_failures: AtomicU64,
    image_upload_failures: AtomicU64,
    device_events_persisted: AtomicU64,
    ingest_durations: Mutex<Vec<u64>>,

    // Inference
    ml_predictions: AtomicU64,
    ml_unavailable: AtomicU64,
    dl_invocations: AtomicU64,
    dl_unavailable: AtomicU64,
    disagreements: AtomicU64,

    // Commands
    commands_sent: AtomicU64,
    commands_failed: AtomicU64,

    started_at: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            mqtt_connected: AtomicBool::new(false),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            connections_lost: AtomicU64::new(0),
            connection_start_time: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            decode_drops: AtomicU64::new(0),
            validation_drops: AtomicU64::new(0),
            records_persisted: AtomicU64::new(0),
            persistence_failures: AtomicU64::new(0),
            image_upload_failures: AtomicU64::new(0),
            device_events_persisted: AtomicU64::new(0),
            ingest_durations: Mutex::new(Vec::new()),
            ml_predictions: AtomicU64::new(0),
            ml_unavailable: AtomicU64::new(0),
            dl_invocations: AtomicU64::new(0),
            dl_unavailable: AtomicU64::new(0),
            disagreements: AtomicU64::new(0),
            commands_sent: AtomicU64::new(0),
            commands_failed: AtomicU64::new(0),
            started_at: AtomicU64::new(current_timestamp()),
        }
    }

    // Transport
    pub fn connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(true, Ordering::Relaxed);
        self.connection_start_time
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(false, Ordering::Relaxed);
    }

    pub fn connection_lost(&self) {
        self.connections_lost.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(false, Ordering::Relaxed);
    }

    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Ingestion
    pub fn payload_undecodable(&self) {
        self.decode_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reading_invalid(&self) {
        self.validation_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persisted(&self, duration: Duration) {
        self.records_persisted.fetch_add(1, Ordering::Relaxed);
        self.add_ingest_duration(duration);
    }

    pub fn persistence_failed(&self) {
        self.persistence_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn image_upload_failed(&self) {
        self.image_upload_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn device_event_persisted(&self) {
        self.device_events_persisted.fetch_add(1, Ordering::Relaxed);
    }

    // Inference
    pub fn ml_predicted(&self) {
        self.ml_predictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ml_unavailable(&self) {
        self.ml_unavailable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dl_invoked(&self) {
        self.dl_invocations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dl_unavailable(&self) {
        self.dl_unavailable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn disagreement_flagged(&self) {
        self.disagreements.fetch_add(1, Ordering::Relaxed);
    }

    // Commands
    pub fn command_sent(&self) {
        self.commands_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn command_failed(&self) {
        self.commands_failed.fetch_add(1, Ordering::Relaxed);
    }

    fn add_ingest_duration(&self, duration: Duration) {
        if let Ok(mut durations) = self.ingest_durations.lock() {
            durations.push(duration.as_millis() as u64);
            if durations.len() > MAX_DURATION_SAMPLES {
                durations.remove(0);
            }
        }
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let connected = self.mqtt_connected.load(Ordering::Relaxed);
        let start = self.connection_start_time.load(Ordering::Relaxed);
        let (avg, p50, p95) = self.ingest_duration_statistics();

        MetricsSnapshot {
            timestamp: now,
            uptime_seconds: now.saturating_sub(self.started_at.load(Ordering::Relaxed)),
            mqtt: MqttMetrics {
                connected,
                connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connection_failures: self.connection_failures.load(Ordering::Relaxed),
                connections_lost: self.connections_lost.load(Ordering::Relaxed),
                connected_seconds: if connected && start > 0 {
                    now.saturating_sub(start)
                } else {
                    0
                },
                messages_received: self.messages_received.load(Ordering::Relaxed),
                messages_published: self.messages_published.load(Ordering::Relaxed),
                publish_failures: self.publish_failures.load(Ordering::Relaxed),
            },
            ingest: IngestMetrics {
                decode_drops: self.decode_drops.load(Ordering::Relaxed),
                validation_drops: self.validation_drops.load(Ordering::Relaxed),
                records_persisted: self.records_persisted.load(Ordering::Relaxed),
                persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
                image_upload_failures: self.image_upload_failures.load(Ordering::Relaxed),
                device_events_persisted: self.device_events_persisted.load(Ordering::Relaxed),
                avg_ingest_ms: avg,
                p50_ingest_ms: p50,
                p95_ingest_ms: p95,
            },
            inference: InferenceMetrics {
                ml_predictions: self.ml_predictions.load(Ordering::Relaxed),
                ml_unavailable: self.ml_unavailable.load(Ordering::Relaxed),
                dl_invocations: self.dl_invocations.load(Ordering::Relaxed),
                dl_unavailable: self.dl_unavailable.load(Ordering::Relaxed),
                disagreements: self.disagreements.load(Ordering::Relaxed),
            },
            commands: CommandMetrics {
                sent: self.commands_sent.load(Ordering::Relaxed),
                failed: self.commands_failed.load(Ordering::Relaxed),
            },
        }
    }

    fn ingest_duration_statistics(&self) -> (f64, f64, f64) {
        let Ok(durations) = self.ingest_durations.lock() else {
            return (0.0, 0.0, 0.0);
        };
        if durations.is_empty() {
            return (0.0, 0.0, 0.0);
        }
        let mut sorted = durations.clone();
        sorted.sort_unstable();
        let avg = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
        (avg, percentile(&sorted, 50.0), percentile(&sorted, 95.0))
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: u64,
    pub uptime_seconds: u64,
    pub mqtt: MqttMetrics,
    pub ingest: IngestMetrics,
    pub inference: InferenceMetrics,
    pub commands: CommandMetrics,
}

#[derive(Debug, Clone, Serialize)]
pub struct MqttMetrics {
    pub connected: bool,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub connections_lost: u64,
    pub connected_seconds: u64,
    pub messages_received: u64,
    pub messages_published: u64,
    pub publish_failures: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestMetrics {
    pub decode_drops: u64,
    pub validation_drops: u64,
    pub records_persisted: u64,
    pub persistence_failures: u64,
    pub image_upload_failures: u64,
    pub device_events_persisted: u64,
    pub avg_ingest_ms: f64,
    pub p50_ingest_ms: f64,
    pub p95_ingest_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct InferenceMetrics {
    pub ml_predictions: u64,
    pub ml_unavailable: u64,
    pub dl_invocations: u64,
    pub dl_unavailable: u64,
    pub disagreements: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandMetrics {
    pub sent: u64,
    pub failed: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Nearest-rank percentile of an ascending slice
fn percentile(sorted: &[u64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((pct / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted[rank.min(sorted.len() - 1)] as f64
}
