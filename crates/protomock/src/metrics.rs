use crate::model::{MockResult, Protocol};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};

lazy_static! {
    /// Requests answered by the engine, by protocol, outcome and status code.
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "protomock_requests_total",
        "Total number of mock requests handled",
        &["protocol", "outcome", "code"]
    )
    .unwrap();

    /// Wall-clock time spent waiting on the sandbox, including queueing.
    pub static ref SCRIPT_DURATION_MS: HistogramVec = register_histogram_vec!(
        "protomock_script_duration_ms",
        "Duration of mock script executions in milliseconds",
        &["protocol", "outcome"],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 1000.0, 5000.0]
    )
    .unwrap();

    pub static ref RELOADS_TOTAL: CounterVec = register_counter_vec!(
        "protomock_reloads_total",
        "Total number of route table reloads",
        &["result"]  // result: success|failure
    )
    .unwrap();

    pub static ref ROUTES: GaugeVec = register_gauge_vec!(
        "protomock_routes",
        "Number of routes in the active table",
        &["protocol"]
    )
    .unwrap();
}

/// Collect and return all metrics in Prometheus text format
pub fn collect_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

pub fn record_request(protocol: Protocol, result: &MockResult) {
    REQUESTS_TOTAL
        .with_label_values(&[
            protocol.as_str(),
            result.outcome(),
            &result.status().code().to_string(),
        ])
        .inc();
}

pub fn record_script_execution(protocol: Protocol, outcome: &str, duration_ms: f64) {
    SCRIPT_DURATION_MS
        .with_label_values(&[protocol.as_str(), outcome])
        .observe(duration_ms);
}

pub fn record_reload(success: bool) {
    let result = if success { "success" } else { "failure" };
    RELOADS_TOTAL.with_label_values(&[result]).inc();
}

pub fn set_route_count(protocol: Protocol, count: usize) {
    ROUTES
        .with_label_values(&[protocol.as_str()])
        .set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{translate, FailureKind};

    #[test]
    fn test_metrics_collection() {
        record_request(
            Protocol::Grpc,
            &translate(Protocol::Grpc, FailureKind::NotFound, "no route"),
        );
        record_script_execution(Protocol::Http, "success", 1.5);
        record_reload(true);
        set_route_count(Protocol::Http, 3);

        let metrics = collect_metrics();
        assert!(metrics.contains("protomock_requests_total"));
        assert!(metrics.contains("outcome=\"not_found\""));
        assert!(metrics.contains("protomock_script_duration_ms"));
        assert!(metrics.contains("protomock_reloads_total"));
        assert!(metrics.contains("protomock_routes{protocol=\"http\"} 3"));
    }
}
