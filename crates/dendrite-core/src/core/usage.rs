//! Per-model token and cost accounting.
//!
//! Costs come from the static pricing table in [`crate::models`]. Totals grow
//! monotonically; the tracker also keeps a snapshot of the most recent
//! request for the `/usage` display.

use std::collections::BTreeMap;

use crate::models::{self, Pricing};

/// Per-detail breakdown reported by the engine for one request.
#[derive(Debug, Clone, Default)]
pub struct UsageDetail {
    pub cached_tokens: u64,
}

/// Raw token counts the engine reports for one completed request.
#[derive(Debug, Clone, Default)]
pub struct UsageSample {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub details: Vec<UsageDetail>,
}

impl UsageSample {
    /// Cached input tokens, summed across the sample's detail list.
    pub fn cached_tokens(&self) -> u64 {
        self.details.iter().map(|d| d.cached_tokens).sum()
    }
}

/// Running totals for one model.
#[derive(Debug, Clone, Default)]
pub struct ModelUsage {
    pub requests: u64,
    pub input_tokens: u64,
    pub cached_tokens: u64,
    pub output_tokens: u64,
    pub total_cost: f64,
}

/// Snapshot of the most recently recorded request.
#[derive(Debug, Clone)]
pub struct LastRequest {
    pub model_id: String,
    pub input_tokens: u64,
    pub cached_tokens: u64,
    pub output_tokens: u64,
    pub input_cost: f64,
    pub cached_cost: f64,
    pub output_cost: f64,
    pub request_cost: f64,
    pub running_total: f64,
}

/// Accumulates usage per model id across the session.
#[derive(Debug, Default)]
pub struct UsageTracker {
    per_model: BTreeMap<String, ModelUsage>,
    last_request: Option<LastRequest>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one request's usage against the static pricing table.
    ///
    /// Unknown model ids fall back to the table's first entry.
    pub fn record_usage(&mut self, model_id: &str, sample: &UsageSample) {
        self.record_with_pricing(model_id, sample, models::pricing_for(model_id));
    }

    /// Records one request's usage with explicit pricing.
    pub fn record_with_pricing(&mut self, model_id: &str, sample: &UsageSample, pricing: Pricing) {
        let cached = sample.cached_tokens();
        let non_cached = sample.input_tokens.saturating_sub(cached);

        let input_cost = non_cached as f64 * pricing.input / 1_000_000.0;
        let cached_cost = cached as f64 * pricing.cached_input / 1_000_000.0;
        let output_cost = sample.output_tokens as f64 * pricing.output / 1_000_000.0;
        let request_cost = input_cost + cached_cost + output_cost;

        let entry = self.per_model.entry(model_id.to_string()).or_default();
        entry.requests += 1;
        entry.input_tokens += sample.input_tokens;
        entry.cached_tokens += cached;
        entry.output_tokens += sample.output_tokens;
        entry.total_cost += request_cost;

        self.last_request = Some(LastRequest {
            model_id: model_id.to_string(),
            input_tokens: sample.input_tokens,
            cached_tokens: cached,
            output_tokens: sample.output_tokens,
            input_cost,
            cached_cost,
            output_cost,
            request_cost,
            running_total: self.total_cost(),
        });

        tracing::debug!(
            model = model_id,
            input = sample.input_tokens,
            cached,
            output = sample.output_tokens,
            cost = request_cost,
            "recorded usage"
        );
    }

    pub fn last_request(&self) -> Option<&LastRequest> {
        self.last_request.as_ref()
    }

    /// Per-model accumulators in model-id order.
    pub fn per_model(&self) -> impl Iterator<Item = (&str, &ModelUsage)> {
        self.per_model.iter().map(|(id, usage)| (id.as_str(), usage))
    }

    pub fn total_requests(&self) -> u64 {
        self.per_model.values().map(|u| u.requests).sum()
    }

    pub fn total_tokens(&self) -> u64 {
        self.per_model
            .values()
            .map(|u| u.input_tokens + u.output_tokens)
            .sum()
    }

    pub fn total_cost(&self) -> f64 {
        self.per_model.values().map(|u| u.total_cost).sum()
    }
}
