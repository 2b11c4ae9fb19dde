//! Prometheus counters exposed at `/metrics`. Ambient observability,
//! never mounted under the token-scoped compat surface.

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    pub requests_total: IntCounterVec,
    pub rate_limit_rejections_total: IntCounterVec,
    pub active_fallback_tasks: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("danmaku_gateway_requests_total", "Requests served, by endpoint and status"),
            &["endpoint", "status"],
        )
        .expect("metric names/labels are static and well-formed");
        registry
            .register(Box::new(requests_total.clone()))
            .expect("metric registered exactly once");

        let rate_limit_rejections_total = IntCounterVec::new(
            Opts::new("danmaku_gateway_rate_limit_rejections_total", "Requests rejected by a rate limit bucket"),
            &["bucket"],
        )
        .expect("metric names/labels are static and well-formed");
        registry
            .register(Box::new(rate_limit_rejections_total.clone()))
            .expect("metric registered exactly once");

        let active_fallback_tasks = IntGauge::new(
            "danmaku_gateway_active_fallback_tasks",
            "Search/match fallback sessions currently running",
        )
        .expect("metric name is static and well-formed");
        registry
            .register(Box::new(active_fallback_tasks.clone()))
            .expect("metric registered exactly once");

        Self {
            registry,
            requests_total,
            rate_limit_rejections_total,
            active_fallback_tasks,
        }
    }

    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .expect("text encoding of gathered metrics cannot fail");
        String::from_utf8(buffer).expect("prometheus text encoding is always valid utf-8")
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_registered_metric_names() {
        let metrics = Metrics::new();
        metrics.requests_total.with_label_values(&["/search/anime", "200"]).inc();
        let rendered = metrics.render();
        assert!(rendered.contains("danmaku_gateway_requests_total"));
    }
}
