//! Budget allocation across composition components.
//!
//! Every strategy first deducts a fixed 50-token overhead per component
//! (section headers and separators in the composed output), then splits the
//! remainder. Shares floor to whole tokens; rounding loss stays below one
//! token per component.

use crate::error::{EngramError, Result};
use crate::manifest::AllocationStrategy;

/// Tokens reserved per component for headers.
pub const COMPONENT_OVERHEAD_TOKENS: u64 = 50;

/// Inputs the allocator needs per component.
#[derive(Debug, Clone, Copy)]
pub struct ComponentWeight {
    pub original_tokens: u64,
    /// Explicit weight for the `custom` strategy.
    pub weight: Option<f64>,
}

/// Split `total_budget` across `components`, returning one allocation per
/// component in order.
pub fn allocate_budget(
    components: &[ComponentWeight],
    total_budget: u64,
    strategy: AllocationStrategy,
) -> Result<Vec<u64>> {
    let n = components.len() as u64;
    if n == 0 {
        return Ok(Vec::new());
    }
    let overhead = COMPONENT_OVERHEAD_TOKENS * n;
    if total_budget <= overhead {
        return Err(EngramError::InvalidSettings {
            reason: format!(
                "budget {total_budget} cannot cover {overhead} tokens of per-component overhead"
            ),
        });
    }
    let usable = total_budget - overhead;

    let weights: Vec<f64> = match strategy {
        AllocationStrategy::Equal => vec![1.0; components.len()],
        AllocationStrategy::Proportional => components
            .iter()
            .map(|c| (c.original_tokens.max(1)) as f64)
            .collect(),
        AllocationStrategy::Recency => (1..=components.len()).map(|i| i as f64).collect(),
        AllocationStrategy::InverseRecency => {
            (1..=components.len()).rev().map(|i| i as f64).collect()
        }
        AllocationStrategy::Custom => {
            let weights: Option<Vec<f64>> = components.iter().map(|c| c.weight).collect();
            let weights = weights.ok_or_else(|| EngramError::InvalidSettings {
                reason: "custom allocation requires a weight on every component".to_string(),
            })?;
            if weights.iter().any(|w| !w.is_finite() || *w <= 0.0) {
                return Err(EngramError::InvalidSettings {
                    reason: "custom allocation weights must be positive".to_string(),
                });
            }
            weights
        }
    };

    let total_weight: f64 = weights.iter().sum();
    Ok(weights
        .iter()
        .map(|w| ((usable as f64) * w / total_weight).floor() as u64)
        .collect())
}

/// Pick a strategy from the shape of the inputs: `proportional` when sizes
/// diverge (max/min > 3), `recency` for long component lists, else `equal`.
pub fn suggest_allocation(original_tokens: &[u64]) -> AllocationStrategy {
    if original_tokens.len() > 1 {
        let max = original_tokens.iter().copied().max().unwrap_or(0);
        let min = original_tokens.iter().copied().min().unwrap_or(0).max(1);
        if max / min > 3 {
            return AllocationStrategy::Proportional;
        }
    }
    if original_tokens.len() > 5 {
        return AllocationStrategy::Recency;
    }
    AllocationStrategy::Equal
}
