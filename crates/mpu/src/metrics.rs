//! Prometheus metrics for the merge engine.
//!
//! Counters are process-wide. Call [`register_metrics`] once before
//! [`render`]; registration is idempotent.

use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Upload lifecycle metrics
pub static UPLOADS_CREATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "splice_uploads_created_total",
        "Total number of multipart uploads created",
    )
    .expect("metric creation failed")
});

pub static UPLOADS_COMPLETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "splice_uploads_completed_total",
        "Total number of multipart uploads promoted to their destination",
    )
    .expect("metric creation failed")
});

pub static UPLOADS_ABORTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "splice_uploads_aborted_total",
        "Total number of multipart uploads aborted",
    )
    .expect("metric creation failed")
});

pub static UPLOADS_FAILED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "splice_uploads_failed_total",
            "Total number of failed completions by error kind",
        ),
        &["kind"],
    )
    .expect("metric creation failed")
});

pub static PARTS_UPLOADED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "splice_parts_uploaded_total",
        "Total number of parts stored (body or copy)",
    )
    .expect("metric creation failed")
});

// Merge metrics
pub static COMPOSE_CALLS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "splice_compose_calls_total",
        "Total number of compose calls issued, retries included",
    )
    .expect("metric creation failed")
});

pub static COMPOSE_RATE_LIMIT_RETRIES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "splice_compose_rate_limit_retries_total",
        "Total number of compose calls retried after a rate-limit response",
    )
    .expect("metric creation failed")
});

pub static COMPOSE_RATE_LIMIT_EXHAUSTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "splice_compose_rate_limit_exhausted_total",
        "Total number of compose calls that stayed rate limited after every retry",
    )
    .expect("metric creation failed")
});

pub static COPY_CALLS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "splice_copy_calls_total",
        "Total number of copy calls issued by merges and promotion",
    )
    .expect("metric creation failed")
});

// Cleanup metrics
pub static TEMP_OBJECTS_DELETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "splice_temp_objects_deleted_total",
        "Total number of temporary objects deleted",
    )
    .expect("metric creation failed")
});

pub static COMPLETION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "splice_completion_duration_seconds",
            "Time from completion request to promoted object",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0]),
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// This function is idempotent - subsequent calls after the first are no-ops.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(UPLOADS_CREATED.clone()),
            Box::new(UPLOADS_COMPLETED.clone()),
            Box::new(UPLOADS_ABORTED.clone()),
            Box::new(UPLOADS_FAILED.clone()),
            Box::new(PARTS_UPLOADED.clone()),
            Box::new(COMPOSE_CALLS.clone()),
            Box::new(COMPOSE_RATE_LIMIT_RETRIES.clone()),
            Box::new(COMPOSE_RATE_LIMIT_EXHAUSTED.clone()),
            Box::new(COPY_CALLS.clone()),
            Box::new(TEMP_OBJECTS_DELETED.clone()),
            Box::new(COMPLETION_DURATION.clone()),
        ];
        for collector in collectors {
            REGISTRY
                .register(collector)
                .expect("metric registration failed");
        }
    });
}

/// Render every registered metric in the text exposition format.
pub fn render() -> Result<String, prometheus::Error> {
    register_metrics();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

/// Helper to record failed completions by error kind.
pub fn record_failure(kind: &str) {
    UPLOADS_FAILED.with_label_values(&[kind]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_counters() {
        UPLOADS_CREATED.inc();
        record_failure("storage");
        let text = render().unwrap();
        assert!(text.contains("splice_uploads_created_total"));
        assert!(text.contains("splice_uploads_failed_total{kind=\"storage\"}"));
        // Idempotent registration.
        register_metrics();
    }
}
