//! Metrics collection for observability

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec_with_registry, register_counter_with_registry,
    register_histogram_with_registry, Counter, CounterVec, Histogram, Opts, Registry,
};
use std::sync::Arc;

/// Global metrics registry
pub static METRICS: Lazy<Arc<Metrics>> =
    Lazy::new(|| Arc::new(Metrics::new().expect("Failed to initialize metrics")));

/// Metrics collector
pub struct Metrics {
    registry: Registry,

    // Context assembly metrics
    pub turns_assembled: Counter,
    pub prompt_tokens: Histogram,
    pub budget_exhaustions: CounterVec,
    pub extraction_fallbacks: CounterVec,

    // Streaming metrics
    pub stream_outcomes: CounterVec,
    pub citations_resolved: Counter,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let turns_assembled = register_counter_with_registry!(
            Opts::new("context_turns_assembled_total", "Total turn contexts assembled"),
            registry
        )?;

        let prompt_tokens = register_histogram_with_registry!(
            "context_prompt_tokens",
            "Prompt tokens per assembled turn",
            vec![256.0, 512.0, 1024.0, 2048.0, 4096.0, 8192.0, 16384.0, 32768.0],
            registry
        )?;

        let budget_exhaustions = register_counter_vec_with_registry!(
            Opts::new(
                "context_budget_exhaustions_total",
                "Prompt sections dropped because the budget ran out"
            ),
            &["section"],
            registry
        )?;

        let extraction_fallbacks = register_counter_vec_with_registry!(
            Opts::new(
                "context_extraction_fallbacks_total",
                "Optional extraction steps that failed and fell back to a default"
            ),
            &["operation"],
            registry
        )?;

        let stream_outcomes = register_counter_vec_with_registry!(
            Opts::new("answer_stream_outcomes_total", "Streamed answers by outcome"),
            &["outcome"],
            registry
        )?;

        let citations_resolved = register_counter_with_registry!(
            Opts::new("answer_citations_resolved_total", "Citations attached to streamed answers"),
            registry
        )?;

        Ok(Self {
            registry,
            turns_assembled,
            prompt_tokens,
            budget_exhaustions,
            extraction_fallbacks,
            stream_outcomes,
            citations_resolved,
        })
    }

    /// Get the metrics registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record an assembled turn and its prompt size
    pub fn record_turn(&self, prompt_tokens: usize) {
        self.turns_assembled.inc();
        self.prompt_tokens.observe(prompt_tokens as f64);
    }

    /// Record a prompt section left empty for lack of budget
    pub fn record_budget_exhausted(&self, section: &str) {
        self.budget_exhaustions.with_label_values(&[section]).inc();
    }

    pub fn record_extraction_fallback(&self, operation: &str) {
        self.extraction_fallbacks.with_label_values(&[operation]).inc();
    }

    pub fn record_stream_outcome(&self, outcome: &str) {
        self.stream_outcomes.with_label_values(&[outcome]).inc();
    }

    pub fn record_citations(&self, count: usize) {
        self.citations_resolved.inc_by(count as f64);
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or_default();

        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        let metrics = Metrics::new();
        assert!(metrics.is_ok());
    }

    #[test]
    fn test_record_stream_outcomes() {
        let metrics = Metrics::new().unwrap();
        metrics.record_stream_outcome("completed");
        metrics.record_stream_outcome("completed");
        metrics.record_stream_outcome("cancelled");

        assert_eq!(metrics.stream_outcomes.with_label_values(&["completed"]).get(), 2.0);
        assert_eq!(metrics.stream_outcomes.with_label_values(&["cancelled"]).get(), 1.0);
    }

    #[test]
    fn test_export_contains_registered_metrics() {
        let metrics = Metrics::new().unwrap();
        metrics.record_turn(1500);
        metrics.record_budget_exhausted("memory");
        metrics.record_extraction_fallback("audienceExtraction");

        let exported = metrics.export_prometheus();
        assert!(exported.contains("context_turns_assembled_total 1"));
        assert!(exported.contains("context_budget_exhaustions_total{section=\"memory\"} 1"));
        assert!(exported.contains("context_prompt_tokens_bucket"));
    }
}
