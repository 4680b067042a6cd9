//! Metrics and observability utilities
//!
//! Provides Prometheus metrics for the memo pipeline with
//! standardized naming conventions.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all DealMemo metrics
pub const METRICS_PREFIX: &str = "dealmemo";

/// Buckets for section generation latency (LLM calls with tool use are slow)
pub const GENERATION_BUCKETS: &[f64] = &[
    1.0,    // 1s
    2.5,    // 2.5s
    5.0,    // 5s
    10.0,   // 10s
    20.0,   // 20s
    30.0,   // 30s
    45.0,   // 45s
    60.0,   // 1m
    90.0,   // 1.5m
    120.0,  // 2m
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Section metrics
    describe_counter!(
        format!("{}_section_generations_total", METRICS_PREFIX),
        Unit::Count,
        "Section generation attempts by section and outcome"
    );

    describe_histogram!(
        format!("{}_section_generation_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Section generation latency in seconds"
    );

    describe_counter!(
        format!("{}_section_retries_total", METRICS_PREFIX),
        Unit::Count,
        "Section generation retries"
    );

    describe_counter!(
        format!("{}_sections_reset_total", METRICS_PREFIX),
        Unit::Count,
        "Stuck sections reset to pending"
    );

    // Memo metrics
    describe_counter!(
        format!("{}_memo_runs_total", METRICS_PREFIX),
        Unit::Count,
        "Memo generation runs by outcome"
    );

    describe_histogram!(
        format!("{}_memo_document_bytes", METRICS_PREFIX),
        Unit::Bytes,
        "Size of assembled memo documents"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Record one section generation attempt
pub fn record_section_generation(section: &str, duration_secs: f64, success: bool) {
    let outcome = if success { "completed" } else { "failed" };

    counter!(
        format!("{}_section_generations_total", METRICS_PREFIX),
        "section" => section.to_string(),
        "outcome" => outcome
    )
    .increment(1);

    histogram!(
        format!("{}_section_generation_duration_seconds", METRICS_PREFIX),
        "section" => section.to_string()
    )
    .record(duration_secs);
}

/// Record a retry scheduled for a section
pub fn record_section_retry(section: &str) {
    counter!(
        format!("{}_section_retries_total", METRICS_PREFIX),
        "section" => section.to_string()
    )
    .increment(1);
}

/// Record sections reclaimed from a crashed run
pub fn record_sections_reset(count: usize) {
    counter!(format!("{}_sections_reset_total", METRICS_PREFIX)).increment(count as u64);
}

/// Record the outcome of a memo generation run
pub fn record_memo_run(outcome: &str, document_bytes: Option<usize>) {
    counter!(
        format!("{}_memo_runs_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    if let Some(bytes) = document_bytes {
        histogram!(format!("{}_memo_document_bytes", METRICS_PREFIX)).record(bytes as f64);
    }
}
