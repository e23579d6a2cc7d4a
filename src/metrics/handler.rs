//! `GET /metrics` handler serving Prometheus text exposition format.

#[cfg(feature = "prometheus")]
static PROM_HANDLE: std::sync::OnceLock<metrics_exporter_prometheus::PrometheusHandle> =
    std::sync::OnceLock::new();

#[cfg(feature = "prometheus")]
pub(crate) fn set_prom_handle(handle: metrics_exporter_prometheus::PrometheusHandle) {
    let _ = PROM_HANDLE.set(handle);
}

/// Render current metrics, or a placeholder when the feature/recorder is
/// unavailable. Kept as a plain string rather than a framework response type
/// so it composes with whichever HTTP layer (`axum` here) wires it up.
pub fn render() -> (u16, String) {
    #[cfg(feature = "prometheus")]
    {
        match PROM_HANDLE.get() {
            Some(handle) => (200, handle.render()),
            None => (503, "prometheus recorder not initialized".to_string()),
        }
    }
    #[cfg(not(feature = "prometheus"))]
    {
        (404, "metrics disabled".to_string())
    }
}
