//! Pricing configuration and the cost calculator.
//!
//! Costs are computed with decimal arithmetic so that re-running the
//! calculation on an invoice's stored quantities reproduces the stored cost
//! exactly.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Decimal places kept on every cost line.
pub const COST_DECIMAL_PLACES: u32 = 6;

/// Weight applied to compute jobs that have no entry in the weight table.
pub const DEFAULT_COMPUTE_WEIGHT: f64 = 1.0;

/// Pricing configuration for all billable resources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Per-unit billing rates.
    #[serde(default)]
    pub rates: BillingRates,

    /// Compute job-type weight table.
    #[serde(default)]
    pub compute_weights: ComputeWeights,
}

/// Per-unit billing rates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingRates {
    /// Price per GB of traffic.
    pub traffic_per_gb: Decimal,
    /// Price per GB held for a whole month.
    pub storage_per_gb_month: Decimal,
    /// Price per weighted compute unit.
    pub compute_per_unit: Decimal,
}

impl Default for BillingRates {
    fn default() -> Self {
        Self {
            traffic_per_gb: Decimal::new(9, 2),         // 0.09 per GB
            storage_per_gb_month: Decimal::new(23, 3),  // 0.023 per GB-month
            compute_per_unit: Decimal::new(1, 4),       // 0.0001 per unit
        }
    }
}

/// Multipliers applied to compute base units per job type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeWeights {
    /// Weight by job type name.
    #[serde(default)]
    pub weights: HashMap<String, f64>,

    /// Weight for job types missing from the table.
    #[serde(default = "default_compute_weight")]
    pub default_weight: f64,
}

fn default_compute_weight() -> f64 {
    DEFAULT_COMPUTE_WEIGHT
}

impl Default for ComputeWeights {
    fn default() -> Self {
        let weights = HashMap::from([
            ("standard".to_string(), 1.0),
            ("gpu".to_string(), 10.0),
            ("ai_inference".to_string(), 5.0),
            ("batch".to_string(), 0.5),
        ]);

        Self {
            weights,
            default_weight: DEFAULT_COMPUTE_WEIGHT,
        }
    }
}

impl ComputeWeights {
    /// Weight for a job type.
    #[must_use]
    pub fn weight(&self, job_type: Option<&str>) -> f64 {
        job_type
            .and_then(|name| self.weights.get(name))
            .copied()
            .unwrap_or(self.default_weight)
    }

    /// Weighted units for a compute job.
    #[must_use]
    pub fn weighted_units(&self, base_units: f64, job_type: Option<&str>) -> f64 {
        base_units * self.weight(job_type)
    }
}

/// Cost of one aggregation, line by line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostBreakdown {
    /// Traffic line.
    pub traffic: Decimal,
    /// Storage line.
    pub storage: Decimal,
    /// Compute line.
    pub compute: Decimal,
    /// Sum of the three lines.
    pub total: Decimal,
}

/// Price usage quantities.
///
/// Each line is `quantity × rate`, rounded to [`COST_DECIMAL_PLACES`] with
/// banker's rounding; `total` is the sum of the rounded lines.
#[must_use]
pub fn cost(
    traffic_gb: f64,
    storage_gb_month: f64,
    compute_units: f64,
    rates: &BillingRates,
) -> CostBreakdown {
    let traffic = line(traffic_gb, rates.traffic_per_gb);
    let storage = line(storage_gb_month, rates.storage_per_gb_month);
    let compute = line(compute_units, rates.compute_per_unit);

    CostBreakdown {
        traffic,
        storage,
        compute,
        total: traffic + storage + compute,
    }
}

fn line(quantity: f64, rate: Decimal) -> Decimal {
    // Aggregation totals are always finite; anything else prices at zero.
    let quantity = Decimal::from_f64_retain(quantity).unwrap_or(Decimal::ZERO);
    quantity
        .checked_mul(rate)
        .unwrap_or(Decimal::MAX)
        .round_dp_with_strategy(COST_DECIMAL_PLACES, RoundingStrategy::MidpointNearestEven)
}
