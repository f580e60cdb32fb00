use std::net::SocketAddr;

// ── Fetch path ──────────────────────────────────────────────────

/// Counter: remote fetches issued. Labels: status (ok, transport, transform).
pub const FETCHES_TOTAL: &str = "sessionpick_fetches_total";

/// Histogram: remote fetch latency in seconds, transform included.
pub const FETCH_DURATION_SECONDS: &str = "sessionpick_fetch_duration_seconds";

/// Counter: window requests answered from coverage without a fetch.
pub const COVERAGE_HITS_TOTAL: &str = "sessionpick_coverage_hits_total";

// ── Store ───────────────────────────────────────────────────────

/// Gauge: sessions held in the store.
pub const SESSIONS_STORED: &str = "sessionpick_sessions_stored";

/// Counter: fetched sessions dropped as duplicates of stored ones.
pub const DUPLICATES_DROPPED_TOTAL: &str = "sessionpick_duplicates_dropped_total";

/// Gauge: fetches currently in flight.
pub const FETCHES_IN_FLIGHT: &str = "sessionpick_fetches_in_flight";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a fetch outcome to its status label.
pub fn fetch_status_label(result: &Result<(), &crate::engine::EngineError>) -> &'static str {
    match result {
        Ok(()) => "ok",
        Err(crate::engine::EngineError::Transform { .. }) => "transform",
        Err(_) => "transport",
    }
}
