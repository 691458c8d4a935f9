use std::sync::atomic::{AtomicBool, Ordering};

use super::aggregate::aggregate;
use super::error::SimulationError;
use super::sampler::{TrialRng, derive_seed, entropy_seed};
use super::types::{AggregatedResult, SimulationConfig, Trial, TrialOutcome};

/// Progress is reported roughly this many times per request.
const PROGRESS_STEPS: u32 = 20;

#[derive(Copy, Clone, Debug, PartialEq)]
struct Holdings {
    liquid: f64,
    invested: f64,
    invested_basis: f64,
}

impl Holdings {
    fn opening(config: &SimulationConfig) -> Self {
        let basis = config
            .invested_cost_basis
            .unwrap_or(config.invested_balance)
            .min(config.invested_balance);
        Self {
            liquid: config.liquid_balance,
            invested: config.invested_balance,
            invested_basis: basis,
        }
    }

    fn total(&self) -> f64 {
        self.liquid + self.invested
    }
}

#[derive(Copy, Clone, Debug)]
struct MonthDraw {
    investment_return: f64,
    income: f64,
    expenses: f64,
    emergency_cost: Option<f64>,
}

fn draw_month(config: &SimulationConfig, price_index: f64, rng: &mut TrialRng) -> MonthDraw {
    let monthly_mean = config.annual_return / 12.0;
    let monthly_vol = config.annual_volatility / 12_f64.sqrt();
    let investment_return = rng.normal(monthly_mean, monthly_vol).max(-1.0);

    let expense_noise = rng.normal(0.0, config.expense_volatility);
    let income_noise = rng.normal(0.0, config.income_volatility);
    let expenses = (config.monthly_expenses * (1.0 + expense_noise)).max(0.0) * price_index;
    let income = (config.monthly_income * (1.0 + income_noise)).max(0.0);

    let emergency_cost = rng
        .bernoulli(config.emergency_probability_monthly)
        .then(|| {
            rng.normal(config.emergency_mean_cost, config.emergency_std_dev)
                .max(0.0)
        });

    MonthDraw {
        investment_return,
        income,
        expenses,
        emergency_cost,
    }
}

fn credit_surplus(holdings: &mut Holdings, surplus: f64, buffer_target: f64) {
    holdings.liquid += surplus;
    if holdings.liquid > buffer_target {
        let excess = holdings.liquid - buffer_target.max(0.0);
        holdings.liquid -= excess;
        holdings.invested += excess;
        holdings.invested_basis += excess;
    }
}

/// Covers `deficit` from liquid first, then by selling investments. Returns the
/// part of the deficit that could not be covered.
fn cover_deficit(holdings: &mut Holdings, deficit: f64, config: &SimulationConfig) -> f64 {
    let from_liquid = deficit.min(holdings.liquid.max(0.0));
    holdings.liquid -= from_liquid;
    let remaining = deficit - from_liquid;
    if remaining <= 0.0 {
        return 0.0;
    }
    sell_invested(holdings, remaining, config)
}

/// Sells enough of the invested balance to net `amount`. Gains realised on the
/// sale are taxed and the tax is taken from the invested balance as well.
fn sell_invested(holdings: &mut Holdings, amount: f64, config: &SimulationConfig) -> f64 {
    if holdings.invested <= 0.0 {
        return amount;
    }

    let value_before = holdings.invested;
    let gain_fraction = ((value_before - holdings.invested_basis) / value_before).max(0.0);
    let tax_per_unit = gain_fraction * config.taxable_fraction * config.capital_gains_tax_rate;

    let wanted_gross = amount * (1.0 + tax_per_unit);
    let (gross, shortfall) = if wanted_gross <= value_before {
        (wanted_gross, 0.0)
    } else {
        (value_before, amount - value_before / (1.0 + tax_per_unit))
    };

    let basis_portion =
        (holdings.invested_basis * (gross / value_before)).min(holdings.invested_basis);
    holdings.invested = (value_before - gross).max(0.0);
    holdings.invested_basis = (holdings.invested_basis - basis_portion)
        .max(0.0)
        .min(holdings.invested);
    shortfall.max(0.0)
}

/// Simulates one household month by month until depletion or the horizon.
pub fn simulate_trial(
    config: &SimulationConfig,
    trial_id: u32,
    rng: &mut TrialRng,
) -> Result<Trial, SimulationError> {
    let horizon = config.time_horizon_months;
    let capacity = horizon as usize + 1;
    let monthly_inflation = (1.0 + config.inflation_rate).powf(1.0 / 12.0);

    let mut holdings = Holdings::opening(config);
    let mut liquid_series = Vec::with_capacity(capacity);
    let mut invested_series = Vec::with_capacity(capacity);
    let mut net_worth_series = Vec::with_capacity(capacity);
    let mut record = |h: &Holdings| {
        liquid_series.push(h.liquid);
        invested_series.push(h.invested);
        net_worth_series.push(h.total() + config.other_assets);
    };
    record(&holdings);

    let mut price_index = 1.0;
    let mut emergency_count = 0_u32;
    let mut depleted_at = None;

    for month in 1..=horizon {
        let draw = draw_month(config, price_index, rng);
        holdings.invested *= 1.0 + draw.investment_return;

        let emergency_cost = match draw.emergency_cost {
            Some(cost) => {
                emergency_count += 1;
                cost
            }
            None => 0.0,
        };

        let net_cash_flow = draw.income - draw.expenses - emergency_cost;
        if net_cash_flow >= 0.0 {
            let buffer_target = config.buffer_months * config.monthly_expenses * price_index;
            credit_surplus(&mut holdings, net_cash_flow, buffer_target);
        } else {
            cover_deficit(&mut holdings, -net_cash_flow, config);
        }

        if !holdings.total().is_finite() {
            return Err(SimulationError::NonFinite { trial_id, month });
        }

        if holdings.total() <= 0.0 {
            holdings.liquid = 0.0;
            holdings.invested = 0.0;
            holdings.invested_basis = 0.0;
            record(&holdings);
            depleted_at = Some(month);
            break;
        }

        record(&holdings);
        price_index *= monthly_inflation;
    }

    let (months_to_depletion, outcome) = match depleted_at {
        Some(month) => (month, TrialOutcome::Depleted),
        None => (horizon, TrialOutcome::Success),
    };

    Ok(Trial {
        id: trial_id,
        months_to_depletion,
        final_balance: holdings.total(),
        liquid_series,
        invested_series,
        net_worth_series,
        emergency_count,
        outcome,
    })
}

/// Runs `num_simulations` independent trials. `cancel` is checked before each
/// trial; `on_progress(done, total)` fires about every twentieth of the run and
/// always after the last trial.
pub fn run_trials<F>(
    config: &SimulationConfig,
    base_seed: u64,
    cancel: &AtomicBool,
    mut on_progress: F,
) -> Result<Vec<Trial>, SimulationError>
where
    F: FnMut(u32, u32),
{
    config.validate()?;

    let total = config.num_simulations;
    let report_every = (total / PROGRESS_STEPS).max(1);
    let mut trials = Vec::with_capacity(total as usize);

    for trial_id in 0..total {
        if cancel.load(Ordering::Relaxed) {
            return Err(SimulationError::Cancelled);
        }
        let mut rng = TrialRng::new(derive_seed(base_seed, trial_id));
        trials.push(simulate_trial(config, trial_id, &mut rng)?);

        let done = trial_id + 1;
        if done % report_every == 0 || done == total {
            on_progress(done, total);
        }
    }

    Ok(trials)
}

/// Runs and aggregates a full request on the calling thread.
pub fn simulate(config: &SimulationConfig) -> Result<AggregatedResult, SimulationError> {
    let seed = config.seed.unwrap_or_else(entropy_seed);
    let trials = run_trials(config, seed, &AtomicBool::new(false), |_, _| {})?;
    Ok(aggregate(config, seed, trials))
}
