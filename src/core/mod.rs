mod aggregate;
mod engine;
mod error;
mod sampler;
mod types;

pub use aggregate::{aggregate, net_worth_bands, percentile, yearly_offsets};
pub use engine::{run_trials, simulate, simulate_trial};
pub use error::{
    ConfigError, MAX_HORIZON_MONTHS, MAX_SIMULATIONS, MAX_TRIAL_MONTHS, SimulationError,
};
pub use sampler::{TrialRng, derive_seed, entropy_seed};
pub use types::{
    AggregatedResult, DEFAULT_BUFFER_MONTHS, DEFAULT_CAPITAL_GAINS_TAX_RATE,
    DEFAULT_INFLATION_RATE, DEFAULT_TAXABLE_FRACTION, GROWTH_MARGIN, HistogramBucket,
    NetWorthBand, Percentiles, SamplePaths, ScenarioSummaries, ScenarioSummary, SimulationConfig,
    Trial, TrialOutcome,
};
