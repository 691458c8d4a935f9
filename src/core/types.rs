use serde::{Deserialize, Serialize};

pub const DEFAULT_CAPITAL_GAINS_TAX_RATE: f64 = 0.15;
pub const DEFAULT_INFLATION_RATE: f64 = 0.0;
pub const DEFAULT_TAXABLE_FRACTION: f64 = 1.0;
/// Months of expenses kept liquid before surplus is swept into investments.
pub const DEFAULT_BUFFER_MONTHS: f64 = 6.0;
/// A surviving trial counts as growing when it ends this far above its start.
pub const GROWTH_MARGIN: f64 = 0.10;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SimulationConfig {
    pub liquid_balance: f64,
    pub invested_balance: f64,
    pub invested_cost_basis: Option<f64>,
    pub other_assets: f64,
    pub monthly_income: f64,
    pub monthly_expenses: f64,
    pub annual_return: f64,
    pub annual_volatility: f64,
    pub expense_volatility: f64,
    pub income_volatility: f64,
    pub emergency_probability_monthly: f64,
    pub emergency_mean_cost: f64,
    pub emergency_std_dev: f64,
    pub num_simulations: u32,
    pub time_horizon_months: u32,
    pub inflation_rate: f64,
    pub taxable_fraction: f64,
    pub capital_gains_tax_rate: f64,
    pub buffer_months: f64,
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            liquid_balance: 0.0,
            invested_balance: 0.0,
            invested_cost_basis: None,
            other_assets: 0.0,
            monthly_income: 0.0,
            monthly_expenses: 0.0,
            annual_return: 0.0,
            annual_volatility: 0.0,
            expense_volatility: 0.0,
            income_volatility: 0.0,
            emergency_probability_monthly: 0.0,
            emergency_mean_cost: 0.0,
            emergency_std_dev: 0.0,
            num_simulations: 1_000,
            time_horizon_months: 360,
            inflation_rate: DEFAULT_INFLATION_RATE,
            taxable_fraction: DEFAULT_TAXABLE_FRACTION,
            capital_gains_tax_rate: DEFAULT_CAPITAL_GAINS_TAX_RATE,
            buffer_months: DEFAULT_BUFFER_MONTHS,
            seed: None,
        }
    }
}

impl SimulationConfig {
    /// Liquid plus invested balance at month 0.
    pub fn starting_balance(&self) -> f64 {
        self.liquid_balance + self.invested_balance
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrialOutcome {
    Depleted,
    Success,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trial {
    pub id: u32,
    pub months_to_depletion: u32,
    pub final_balance: f64,
    /// Per-month series, all indexed from month 0 (the starting position).
    pub liquid_series: Vec<f64>,
    pub invested_series: Vec<f64>,
    /// Liquid plus invested plus non-growing assets.
    pub net_worth_series: Vec<f64>,
    pub emergency_count: u32,
    pub outcome: TrialOutcome,
}

impl Trial {
    pub fn is_depleted(&self) -> bool {
        self.outcome == TrialOutcome::Depleted
    }

    pub fn is_growing(&self, starting_balance: f64) -> bool {
        !self.is_depleted() && self.final_balance >= starting_balance * (1.0 + GROWTH_MARGIN)
    }


    /// Net worth at `month`, carrying the last recorded value past depletion.
    pub fn net_worth_at(&self, month: usize) -> f64 {
        self.net_worth_series
            .get(month)
            .or_else(|| self.net_worth_series.last())
            .copied()
            .unwrap_or(0.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Percentiles {
    pub p10_months: f64,
    pub p25_months: f64,
    pub p50_months: f64,
    pub p75_months: f64,
    pub p90_months: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistogramBucket {
    pub start_month: u32,
    pub end_month: u32,
    pub count: u32,
    pub percentage: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplePaths {
    pub worst: Vec<f64>,
    pub median: Vec<f64>,
    pub best: Vec<f64>,
    pub random: Vec<Vec<f64>>,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioSummary {
    pub average_months: f64,
    pub average_final_balance: f64,
    pub average_emergencies: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioSummaries {
    pub worst: ScenarioSummary,
    pub median: ScenarioSummary,
    pub best: ScenarioSummary,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedResult {
    pub num_simulations: u32,
    pub time_horizon_months: u32,
    pub seed: u64,
    #[serde(flatten)]
    pub percentiles: Percentiles,
    pub mean_months: f64,
    pub median_months: f64,
    pub std_dev_months: f64,
    pub probability_depleted_by_12_mo: f64,
    pub probability_depleted_by_24_mo: f64,
    pub probability_depleted_by_36_mo: f64,
    pub probability_success: f64,
    pub probability_growing: f64,
    pub mean_final_balance: f64,
    pub value_at_risk_95: f64,
    pub conditional_value_at_risk_95: f64,
    pub histogram: Vec<HistogramBucket>,
    pub sample_paths: SamplePaths,
    pub scenarios: ScenarioSummaries,
    /// Full trial list; omitted from JSON when stripped by a consumer.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trials: Vec<Trial>,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetWorthBand {
    pub month: u32,
    pub p5: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
}
