use prometheus::{
    register_histogram, register_int_counter_vec, Encoder, Histogram, IntCounterVec, TextEncoder,
};
use std::sync::LazyLock;

pub static REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "agentpay_server_requests_total",
        "Total HTTP requests to priced resources",
        &["resource", "status"]
    )
    .unwrap()
});

pub static VERIFICATIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "agentpay_server_verifications_total",
        "Payment verification outcomes",
        &["result"]
    )
    .unwrap()
});

pub static VERIFY_SECONDS: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "agentpay_server_verify_seconds",
        "Time spent verifying a presented payment proof"
    )
    .unwrap()
});

pub static SETTLEMENTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "agentpay_server_settlements_total",
        "Revenue settlement outcomes",
        &["result"]
    )
    .unwrap()
});

pub fn metrics_output() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
