use tollgate_core::{ModelSpec, Usage};

/// Cost of a request split by direction, in micro-units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostBreakdown {
    pub input_cost: u64,
    pub output_cost: u64,
}

impl CostBreakdown {
    /// Total cost in micro-units.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.input_cost + self.output_cost
    }
}

/// Compute the cost of the given usage against a model's unit prices.
///
/// Prices are per 1 000 tokens; each direction rounds up independently so
/// the gateway never under-bills relative to the provider's invoice.
#[must_use]
pub fn cost_for(spec: &ModelSpec, usage: &Usage) -> CostBreakdown {
    CostBreakdown {
        input_cost: (usage.prompt_tokens * spec.input_price).div_ceil(1_000),
        output_cost: (usage.completion_tokens * spec.output_price).div_ceil(1_000),
    }
}
