use crate::{Observation, SimError};
use prometheus::{Encoder, HistogramOpts, HistogramVec, Registry, TextEncoder};
use std::sync::Arc;

/// Destination for synthetic observations.
///
/// Implementors must not block the generator and must not fail; a sink that
/// cannot keep an observation drops it.
pub trait ObservationSink: Send + Sync + 'static {
    /// Records one observation.
    fn record(&self, observation: Observation);
}

impl<S: ObservationSink> ObservationSink for Arc<S> {
    fn record(&self, observation: Observation) {
        (**self).record(observation)
    }
}

impl<A: ObservationSink, B: ObservationSink> ObservationSink for (A, B) {
    fn record(&self, observation: Observation) {
        self.0.record(observation.clone());
        self.1.record(observation);
    }
}

/// Name of the request-time histogram.
pub const REQUEST_TIME_METRIC: &str = "request_time_ms";

/// Upper bounds of the latency buckets, in milliseconds.
const LATENCY_BUCKETS_MS: [f64; 9] = [10.0, 25.0, 50.0, 75.0, 100.0, 150.0, 200.0, 250.0, 275.0];

/// Label set identifying one request-time series.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeriesKey {
    /// Node label, `node{N}`.
    pub node: String,

    /// Status code.
    pub code: u16,

    /// Whether the requests counted as errors.
    pub error: bool,
}

/// Aggregated latency for one series, as gathered from the registry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesStats {
    /// Requests observed.
    pub count: u64,

    /// Sum of their latencies in milliseconds.
    pub sum_ms: f64,
}

impl SeriesStats {
    /// Mean latency in milliseconds.
    pub fn mean_ms(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum_ms / self.count as f64
    }
}

/// Prometheus request-time histogram `request_time_ms{node, code, error}`.
///
/// Observations land in per-series atomics; generators of different nodes
/// never wait on each other.
#[derive(Clone)]
pub struct MetricsSink {
    registry: Registry,

    request_time_ms: HistogramVec,
}

impl MetricsSink {
    /// Creates the histogram on a fresh registry.
    ///
    /// # Errors
    /// Returns an error if the histogram cannot be created or registered.
    pub fn new() -> Result<Self, SimError> {
        Self::with_registry(Registry::new())
    }

    /// Creates the histogram and registers it on `registry`.
    ///
    /// # Arguments
    /// * `registry` - Registry the histogram is exposed through.
    ///
    /// # Errors
    /// Returns an error if a metric named `request_time_ms` is already registered.
    pub fn with_registry(registry: Registry) -> Result<Self, SimError> {
        let request_time_ms = HistogramVec::new(
            HistogramOpts::new(REQUEST_TIME_METRIC, "Requests to the simulated service")
                .buckets(LATENCY_BUCKETS_MS.to_vec()),
            &["node", "code", "error"],
        )?;
        registry.register(Box::new(request_time_ms.clone()))?;
        Ok(Self {
            registry,
            request_time_ms,
        })
    }

    /// Registry holding the request-time histogram.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Requests observed for one label set.
    pub fn sample_count(&self, node: &str, code: u16, error: bool) -> u64 {
        let code = code.to_string();
        self.request_time_ms
            .with_label_values(&[node, code.as_str(), bool_label(error)])
            .get_sample_count()
    }

    /// Every request-time series in the registry, sorted by labels.
    pub fn snapshot(&self) -> Vec<(SeriesKey, SeriesStats)> {
        let mut series: Vec<_> = self
            .registry
            .gather()
            .iter()
            .filter(|family| family.get_name() == REQUEST_TIME_METRIC)
            .flat_map(|family| family.get_metric())
            .filter_map(|metric| {
                let mut node = None;
                let mut code = None;
                let mut error = None;
                for label in metric.get_label() {
                    match label.get_name() {
                        "node" => node = Some(label.get_value().to_string()),
                        "code" => code = label.get_value().parse().ok(),
                        "error" => error = label.get_value().parse().ok(),
                        _ => {}
                    }
                }
                let histogram = metric.get_histogram();
                Some((
                    SeriesKey {
                        node: node?,
                        code: code?,
                        error: error?,
                    },
                    SeriesStats {
                        count: histogram.get_sample_count(),
                        sum_ms: histogram.get_sample_sum(),
                    },
                ))
            })
            .collect();
        series.sort_by(|a, b| a.0.cmp(&b.0));
        series
    }

    /// Total requests observed for `node`.
    pub fn count_for(&self, node: &str) -> u64 {
        self.snapshot()
            .iter()
            .filter(|(key, _)| key.node == node)
            .map(|(_, stats)| stats.count)
            .sum()
    }

    /// Total requests across all series.
    pub fn total(&self) -> u64 {
        self.snapshot().iter().map(|(_, stats)| stats.count).sum()
    }

    /// Registry contents in the Prometheus text exposition format.
    pub fn encode_text(&self) -> Result<String, SimError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| SimError::Metrics(prometheus::Error::Msg(e.to_string())))
    }
}

impl ObservationSink for MetricsSink {
    fn record(&self, observation: Observation) {
        let code = observation.status.to_string();
        self.request_time_ms
            .with_label_values(&[
                observation.node.as_str(),
                code.as_str(),
                bool_label(observation.is_error),
            ])
            .observe(observation.latency_ms);
    }
}

fn bool_label(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

/// Emits every observation as a `trace` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ObservationSink for TracingSink {
    fn record(&self, observation: Observation) {
        tracing::trace!(
            node = %observation.node,
            code = observation.status,
            error = observation.is_error,
            latency_ms = observation.latency_ms,
            "request"
        );
    }
}
