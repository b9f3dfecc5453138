//! Prometheus metrics for the faucet

use crate::error::FaucetError;
use prometheus::{
    histogram_opts, opts, Encoder, Histogram, IntCounterVec, IntGauge, Registry, TextEncoder,
};
use std::time::Duration;

/// Metrics collection for the faucet service
#[derive(Debug)]
pub struct FaucetMetrics {
    registry: Registry,

    /// Dispense requests by outcome (`success` or an error kind)
    pub dispense_requests_total: IntCounterVec,
    /// Time spent on requests that reached the ledger
    pub dispense_duration: Histogram,
    pub tracked_identities: IntGauge,
}

impl FaucetMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let dispense_requests_total = IntCounterVec::new(
            opts!("faucet_dispense_requests_total", "Dispense requests by outcome"),
            &["outcome"],
        )?;

        let dispense_duration = Histogram::with_opts(histogram_opts!(
            "faucet_dispense_duration_seconds",
            "Time spent resolving accounts and confirming transfers",
            vec![0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
        ))?;

        let tracked_identities = IntGauge::with_opts(opts!(
            "faucet_tracked_identities",
            "Identities currently held in the quota ledger"
        ))?;

        registry.register(Box::new(dispense_requests_total.clone()))?;
        registry.register(Box::new(dispense_duration.clone()))?;
        registry.register(Box::new(tracked_identities.clone()))?;

        Ok(Self {
            registry,
            dispense_requests_total,
            dispense_duration,
            tracked_identities,
        })
    }

    pub fn record_success(&self, elapsed: Duration) {
        self.dispense_requests_total.with_label_values(&["success"]).inc();
        self.dispense_duration.observe(elapsed.as_secs_f64());
    }

    pub fn record_failure(&self, error: &FaucetError) {
        self.dispense_requests_total
            .with_label_values(&[error.kind().as_str()])
            .inc();
    }

    pub fn observe_attempt(&self, elapsed: Duration) {
        self.dispense_duration.observe(elapsed.as_secs_f64());
    }

    pub fn set_tracked_identities(&self, count: usize) {
        self.tracked_identities.set(count as i64);
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcomes_are_labelled() {
        let metrics = FaucetMetrics::new().unwrap();
        metrics.record_success(Duration::from_millis(300));
        metrics.record_failure(&FaucetError::quota_exhausted(1, Duration::from_secs(86_400)));
        metrics.set_tracked_identities(4);

        let text = metrics.gather().unwrap();
        assert!(text.contains("faucet_dispense_requests_total{outcome=\"success\"} 1"));
        assert!(text.contains("faucet_dispense_requests_total{outcome=\"rate_limit_exceeded\"} 1"));
        assert!(text.contains("faucet_tracked_identities 4"));
        assert!(text.contains("faucet_dispense_duration_seconds_count 1"));
    }
}
