use std::time::{Duration, Instant};

use opentelemetry::{
    metrics::{Counter, Histogram},
    KeyValue,
};

/// Histogram boundaries suited to scheduling cycle latencies, in seconds.
pub fn cycle_latency_boundaries() -> Vec<f64> {
    vec![
        0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 25.0, 50.0,
    ]
}

pub trait TimerUpdate {
    fn add(&self, duration: Duration, labels: &[KeyValue]);
}

impl TimerUpdate for Histogram<f64> {
    fn add(&self, duration: Duration, labels: &[KeyValue]) {
        self.record(duration.as_secs_f64(), labels);
    }
}

/// Guard that times an operation and records the elapsed duration into its
/// metric when dropped.
pub struct Timer<'a, T: TimerUpdate + Sync> {
    start: Instant,
    metric: &'a T,
    labels: &'a [KeyValue],
}

impl<'a, T: TimerUpdate + Sync> Timer<'a, T> {
    pub fn start(metric: &'a T) -> Self {
        Self::start_with_labels(metric, &[])
    }

    pub fn start_with_labels(metric: &'a T, labels: &'a [KeyValue]) -> Self {
        Self {
            start: Instant::now(),
            metric,
            labels,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<'a, T: TimerUpdate + Sync> Drop for Timer<'a, T> {
    fn drop(&mut self) {
        self.metric.add(self.start.elapsed(), self.labels);
    }
}

/// Scheduler observability signals. Advisory: nothing here participates in
/// correctness.
#[derive(Debug)]
pub struct SchedulerMetrics {
    pub scheduling_cycles: Counter<u64>,
    pub scheduling_cycle_latency: Histogram<f64>,
    pub bindings_created: Counter<u64>,
    pub bindings_updated: Counter<u64>,
    pub bindings_unscheduled: Counter<u64>,
    pub cycle_retries: Counter<u64>,
    pub cycle_failures: Counter<u64>,
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        let meter = opentelemetry::global::meter("fleet-scheduler");
        Self {
            scheduling_cycles: meter
                .u64_counter("fleet.scheduler.cycles")
                .with_description("number of scheduling cycles run")
                .build(),
            scheduling_cycle_latency: meter
                .f64_histogram("fleet.scheduler.cycle_latency")
                .with_description("scheduling cycle latency in seconds")
                .with_boundaries(cycle_latency_boundaries())
                .build(),
            bindings_created: meter
                .u64_counter("fleet.scheduler.bindings_created")
                .with_description("bindings created by scheduling cycles")
                .build(),
            bindings_updated: meter
                .u64_counter("fleet.scheduler.bindings_updated")
                .with_description("bindings refreshed by scheduling cycles")
                .build(),
            bindings_unscheduled: meter
                .u64_counter("fleet.scheduler.bindings_unscheduled")
                .with_description("bindings marked unscheduled by scheduling cycles")
                .build(),
            cycle_retries: meter
                .u64_counter("fleet.scheduler.cycle_retries")
                .with_description("scheduling cycles requeued after a retryable failure")
                .build(),
            cycle_failures: meter
                .u64_counter("fleet.scheduler.cycle_failures")
                .with_description("scheduling cycles dropped after a fatal failure")
                .build(),
        }
    }
}
