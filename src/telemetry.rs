use crate::readiness::ReadinessStatus;
use opentelemetry::{
    global,
    metrics::{Counter, Histogram, MeterProvider},
    KeyValue,
};
use prometheus::Registry;
use std::time::Duration;

pub struct Metrics {
    request_counter: Counter<u64>,
    outcome_counter: Counter<u64>,
    prediction_duration: Histogram<u64>,
    warmup_duration: Histogram<u64>,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("ocsr_service");
        global::set_meter_provider(provider);

        let request_counter = meter
            .u64_counter("ocsr_requests_total")
            .with_description("Total number of requests")
            .build();

        let outcome_counter = meter
            .u64_counter("ocsr_outcomes_total")
            .with_description("Recognition requests by outcome")
            .build();

        let prediction_duration = meter
            .u64_histogram("ocsr_prediction_duration_ms")
            .with_boundaries(duration_boundaries(&[
                (50, 500, 50),
                (500, 5_000, 500),
                (5_000, 60_000, 5_000),
            ]))
            .with_description("Duration of recognition calls in milliseconds")
            .build();

        let warmup_duration = meter
            .u64_histogram("ocsr_warmup_duration_ms")
            .with_boundaries(duration_boundaries(&[
                (1_000, 10_000, 1_000),
                (10_000, 900_000, 30_000),
            ]))
            .with_description("Duration of model resolution attempts in milliseconds")
            .build();

        Ok(Metrics {
            request_counter,
            outcome_counter,
            prediction_duration,
            warmup_duration,
            registry,
        })
    }

    pub fn record_request(&self, route: &str) {
        let attributes = vec![KeyValue::new("route", route.to_string())];
        self.request_counter.add(1, &attributes);
    }

    pub fn record_outcome(&self, outcome: &str) {
        let attributes = vec![KeyValue::new("outcome", outcome.to_string())];
        self.outcome_counter.add(1, &attributes);
    }

    pub fn record_prediction_duration(&self, duration: Duration) {
        self.prediction_duration
            .record(duration.as_millis() as u64, &[]);
    }

    pub fn record_warmup(&self, status: ReadinessStatus, duration: Duration) {
        let attributes = vec![KeyValue::new("status", status.as_str())];
        self.warmup_duration
            .record(duration.as_millis() as u64, &attributes);
    }
}

/// Bucket boundaries from `(start, end, step)` ranges, deduplicated where
/// ranges meet.
fn duration_boundaries(ranges: &[(u64, u64, u64)]) -> Vec<f64> {
    let mut boundaries: Vec<u64> = Vec::new();
    for &(start, end, step) in ranges {
        let mut value = start;
        while value <= end {
            if boundaries.last() != Some(&value) {
                boundaries.push(value);
            }
            value += step.max(1);
        }
    }
    boundaries.into_iter().map(|b| b as f64).collect()
}
