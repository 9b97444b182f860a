use lazy_static::lazy_static;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ==== Face Pipeline Metrics ====
    pub static ref FACE_PIPELINE_REQUESTS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "face_pipeline_requests_total",
                "Total number of pipeline requests",
            ),
            &["operation", "status"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref FACE_PIPELINE_LATENCY: HistogramVec = {
        let metric = HistogramVec::new(
            HistogramOpts::new(
                "face_pipeline_latency_seconds",
                "End-to-end latency of pipeline requests",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["operation"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref FACE_INFERENCE_TIME: HistogramVec = {
        let metric = HistogramVec::new(
            HistogramOpts::new(
                "face_inference_time_seconds",
                "Time spent in a single model forward pass",
            ),
            &["model", "provider"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref FACE_MODELS_LOADED: IntGauge = {
        let metric = IntGauge::new(
            "face_models_loaded",
            "Number of inference graphs currently loaded",
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    // ==== Attendance Coordinator Metrics ====
    pub static ref ATTENDANCE_EVENTS: IntCounterVec = {
        let metric = IntCounterVec::new(
            Opts::new(
                "attendance_events_total",
                "Total number of attendance attempts by type and recorded status",
            ),
            &["type", "status"],
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };

    pub static ref ATTENDANCE_RECOGNITION_LATENCY: Histogram = {
        let metric = Histogram::with_opts(
            HistogramOpts::new(
                "attendance_recognition_latency_seconds",
                "Latency of the embed + gallery-search portion of an attendance request",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        )
        .expect("metric can be created");
        REGISTRY.register(Box::new(metric.clone())).ok();
        metric
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_once() {
        FACE_PIPELINE_REQUESTS
            .with_label_values(&["detect", "success"])
            .inc();
        ATTENDANCE_EVENTS
            .with_label_values(&["check_in", "on_time"])
            .inc();
        let families = REGISTRY.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "face_pipeline_requests_total"));
        assert!(families
            .iter()
            .any(|f| f.get_name() == "attendance_events_total"));
    }
}
