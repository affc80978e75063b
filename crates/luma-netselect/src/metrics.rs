use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
};

lazy_static::lazy_static! {
    pub static ref REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "luma_netselect_requests_total",
        "Total number of internal select requests served",
        &["path"]
    ).unwrap();

    pub static ref REQUEST_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "luma_netselect_request_errors_total",
        "Internal select requests that failed, excluding client disconnects",
        &["path"]
    ).unwrap();

    pub static ref REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "luma_netselect_request_duration_seconds",
        "Internal select request latency, including failed requests",
        &["path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();

    pub static ref SHARD_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "luma_netselect_shard_requests_total",
        "Requests sent by the coordinator to storage nodes",
        &["op"]
    ).unwrap();

    pub static ref SHARD_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "luma_netselect_shard_errors_total",
        "Storage node requests that failed for reasons other than cancellation",
        &["op"]
    ).unwrap();
}

/// Renders every registered metric in the Prometheus text format.
pub fn render() -> crate::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| crate::SelectError::Io(std::io::Error::other(e)))?;
    String::from_utf8(buffer).map_err(|e| crate::SelectError::Io(std::io::Error::other(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_request_metrics() {
        REQUESTS_TOTAL.with_label_values(&["/internal/select/test"]).inc();
        let text = render().unwrap();
        assert!(text.contains("luma_netselect_requests_total"));
    }
}
