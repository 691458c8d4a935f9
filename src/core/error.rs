use thiserror::Error;

use super::types::SimulationConfig;

pub const MAX_SIMULATIONS: u32 = 1_000_000;
pub const MAX_HORIZON_MONTHS: u32 = 1_200;
/// Upper bound on recorded trial-months (trials x (horizon + 1)). Every trial
/// keeps three monthly series, so this caps a run at roughly 600 MB.
pub const MAX_TRIAL_MONTHS: u64 = 25_000_000;

#[derive(Clone, Debug, PartialEq, Error)]
pub enum ConfigError {
    #[error("numSimulations must be > 0")]
    NoSimulations,
    #[error("numSimulations must be <= {max}, got {0}", max = MAX_SIMULATIONS)]
    TooManySimulations(u32),
    #[error("timeHorizonMonths must be > 0")]
    NoHorizon,
    #[error("timeHorizonMonths must be <= {max}, got {0}", max = MAX_HORIZON_MONTHS)]
    HorizonTooLong(u32),
    #[error(
        "numSimulations x (timeHorizonMonths + 1) must be <= {max}, got {0}",
        max = MAX_TRIAL_MONTHS
    )]
    RunTooLarge(u64),
    #[error("{field} must be a finite number")]
    NonFinite { field: &'static str },
    #[error("{field} must be >= 0, got {value}")]
    Negative { field: &'static str, value: f64 },
    #[error("{field} must be between 0 and 1, got {value}")]
    OutOfUnitRange { field: &'static str, value: f64 },
    #[error("{field} must be > -1, got {value}")]
    RateBelowTotalLoss { field: &'static str, value: f64 },
}

#[derive(Clone, Debug, PartialEq, Error)]
pub enum SimulationError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("trial {trial_id} produced a non-finite balance at month {month}")]
    NonFinite { trial_id: u32, month: u32 },
    #[error("simulation cancelled")]
    Cancelled,
    #[error("simulation panicked: {0}")]
    Panicked(String),
}

fn finite(field: &'static str, value: f64) -> Result<f64, ConfigError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ConfigError::NonFinite { field })
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if finite(field, value)? < 0.0 {
        return Err(ConfigError::Negative { field, value });
    }
    Ok(())
}

fn unit_range(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&finite(field, value)?) {
        return Err(ConfigError::OutOfUnitRange { field, value });
    }
    Ok(())
}

fn above_total_loss(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if finite(field, value)? <= -1.0 {
        return Err(ConfigError::RateBelowTotalLoss { field, value });
    }
    Ok(())
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_simulations == 0 {
            return Err(ConfigError::NoSimulations);
        }
        if self.num_simulations > MAX_SIMULATIONS {
            return Err(ConfigError::TooManySimulations(self.num_simulations));
        }
        if self.time_horizon_months == 0 {
            return Err(ConfigError::NoHorizon);
        }
        if self.time_horizon_months > MAX_HORIZON_MONTHS {
            return Err(ConfigError::HorizonTooLong(self.time_horizon_months));
        }
        let trial_months = self.num_simulations as u64 * (self.time_horizon_months as u64 + 1);
        if trial_months > MAX_TRIAL_MONTHS {
            return Err(ConfigError::RunTooLarge(trial_months));
        }

        non_negative("liquidBalance", self.liquid_balance)?;
        non_negative("investedBalance", self.invested_balance)?;
        if let Some(basis) = self.invested_cost_basis {
            non_negative("investedCostBasis", basis)?;
        }
        non_negative("otherAssets", self.other_assets)?;
        non_negative("monthlyIncome", self.monthly_income)?;
        non_negative("monthlyExpenses", self.monthly_expenses)?;
        non_negative("emergencyMeanCost", self.emergency_mean_cost)?;
        non_negative("emergencyStdDev", self.emergency_std_dev)?;
        non_negative("bufferMonths", self.buffer_months)?;

        unit_range("annualVolatility", self.annual_volatility)?;
        unit_range("expenseVolatility", self.expense_volatility)?;
        unit_range("incomeVolatility", self.income_volatility)?;
        unit_range(
            "emergencyProbabilityMonthly",
            self.emergency_probability_monthly,
        )?;
        unit_range("taxableFraction", self.taxable_fraction)?;
        unit_range("capitalGainsTaxRate", self.capital_gains_tax_rate)?;

        above_total_loss("annualReturn", self.annual_return)?;
        above_total_loss("inflationRate", self.inflation_rate)?;
        Ok(())
    }
}
