//! Metrics collection (feature-gated on `prometheus`, matching the ambient
//! observability stack; the broker has no OpenTelemetry path).

pub mod handler;

/// Installs the global Prometheus recorder and spawns its periodic upkeep
/// task. No-op when the `prometheus` feature is disabled.
pub fn init() {
    #[cfg(feature = "prometheus")]
    {
        use metrics_exporter_prometheus::PrometheusBuilder;
        use std::time::Duration;

        if let Ok(handle) = PrometheusBuilder::new().install_recorder() {
            handler::set_prom_handle(handle.clone());
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(Duration::from_secs(30));
                loop {
                    tick.tick().await;
                    handle.run_upkeep();
                }
            });
        }
    }
}

/// Records one `Vend` outcome: decision effect and total pipeline latency.
pub fn record_vend_decision(profile: &str, effect: &str, latency_ms: f64) {
    #[cfg(feature = "prometheus")]
    {
        use metrics::{counter, histogram};
        counter!(
            "sentinel_vend_decisions_total",
            "profile" => profile.to_string(),
            "effect" => effect.to_string()
        )
        .increment(1);
        histogram!(
            "sentinel_vend_latency_ms",
            "profile" => profile.to_string()
        )
        .record(latency_ms);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (profile, effect, latency_ms);
    }
}

/// Records one server-mode HTTP request.
pub fn record_http_request(path: &str, method: &str, status: u16, latency_ms: f64) {
    #[cfg(feature = "prometheus")]
    {
        use metrics::{counter, histogram};
        let status_s = status.to_string();
        counter!(
            "sentinel_http_requests_total",
            "path" => path.to_string(),
            "method" => method.to_string(),
            "status" => status_s.clone()
        )
        .increment(1);
        histogram!(
            "sentinel_http_latency_ms",
            "path" => path.to_string(),
            "method" => method.to_string(),
            "status" => status_s
        )
        .record(latency_ms);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (path, method, status, latency_ms);
    }
}

/// Records a break-glass invocation (advisory severity flag included as a
/// label so the escalation rate is visible without scraping the database).
pub fn record_breakglass_invocation(profile: &str, severity_flag: bool) {
    #[cfg(feature = "prometheus")]
    {
        use metrics::counter;
        counter!(
            "sentinel_breakglass_invocations_total",
            "profile" => profile.to_string(),
            "severity" => severity_flag.to_string()
        )
        .increment(1);
    }
    #[cfg(not(feature = "prometheus"))]
    {
        let _ = (profile, severity_flag);
    }
}
