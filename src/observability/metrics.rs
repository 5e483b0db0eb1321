use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub location_pushes_total: IntCounterVec,
    pub feed_polls_total: IntCounterVec,
    pub claims_total: IntCounterVec,
    pub rejections_total: IntCounter,
    pub visible_orders: IntGauge,
    pub push_duration_seconds: HistogramVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let location_pushes_total = IntCounterVec::new(
            Opts::new("location_pushes_total", "Location pushes by outcome"),
            &["outcome"],
        )
        .expect("valid location_pushes_total metric");

        let feed_polls_total = IntCounterVec::new(
            Opts::new("feed_polls_total", "Feed poll ticks by outcome"),
            &["outcome"],
        )
        .expect("valid feed_polls_total metric");

        let claims_total = IntCounterVec::new(
            Opts::new("claims_total", "Claim attempts by outcome"),
            &["outcome"],
        )
        .expect("valid claims_total metric");

        let rejections_total =
            IntCounter::new("rejections_total", "Orders rejected this session")
                .expect("valid rejections_total metric");

        let visible_orders =
            IntGauge::new("visible_orders", "Orders currently visible in the feed")
                .expect("valid visible_orders metric");

        let push_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "push_duration_seconds",
                "Duration of a location push including retries",
            ),
            &["outcome"],
        )
        .expect("valid push_duration_seconds metric");

        registry
            .register(Box::new(location_pushes_total.clone()))
            .expect("register location_pushes_total");
        registry
            .register(Box::new(feed_polls_total.clone()))
            .expect("register feed_polls_total");
        registry
            .register(Box::new(claims_total.clone()))
            .expect("register claims_total");
        registry
            .register(Box::new(rejections_total.clone()))
            .expect("register rejections_total");
        registry
            .register(Box::new(visible_orders.clone()))
            .expect("register visible_orders");
        registry
            .register(Box::new(push_duration_seconds.clone()))
            .expect("register push_duration_seconds");

        Self {
            registry,
            location_pushes_total,
            feed_polls_total,
            claims_total,
            rejections_total,
            visible_orders,
            push_duration_seconds,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
