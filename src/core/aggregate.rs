use rand::SeedableRng;
use rand::seq::index;
use rand_chacha::ChaCha8Rng;

use super::sampler::derive_seed;
use super::types::{
    AggregatedResult, HistogramBucket, NetWorthBand, Percentiles, SamplePaths, ScenarioSummaries,
    ScenarioSummary, SimulationConfig, Trial,
};

const HISTOGRAM_BINS: u32 = 20;
const RANDOM_SAMPLE_PATHS: usize = 20;

/// Reduces a full trial collection into the aggregate. `trials` must be
/// non-empty, which a validated config guarantees.
pub fn aggregate(config: &SimulationConfig, seed: u64, trials: Vec<Trial>) -> AggregatedResult {
    let n = trials.len();
    let total = n.max(1) as f64;

    let mut months: Vec<f64> = trials
        .iter()
        .map(|t| t.months_to_depletion as f64)
        .collect();
    months.sort_by(|a, b| a.total_cmp(b));

    let percentiles = Percentiles {
        p10_months: percentile_sorted(&months, 10.0),
        p25_months: percentile_sorted(&months, 25.0),
        p50_months: percentile_sorted(&months, 50.0),
        p75_months: percentile_sorted(&months, 75.0),
        p90_months: percentile_sorted(&months, 90.0),
    };

    let mean_months = months.iter().sum::<f64>() / total;
    let variance = months
        .iter()
        .map(|m| (m - mean_months).powi(2))
        .sum::<f64>()
        / total;

    let value_at_risk_95 = percentile_sorted(&months, 5.0);
    let tail: Vec<f64> = months
        .iter()
        .copied()
        .filter(|m| *m <= value_at_risk_95)
        .collect();
    let conditional_value_at_risk_95 = mean(&tail);

    let starting_balance = config.starting_balance();
    let survived = trials.iter().filter(|t| !t.is_depleted()).count();
    let growing = trials
        .iter()
        .filter(|t| t.is_growing(starting_balance))
        .count();
    let mean_final_balance = trials.iter().map(|t| t.final_balance).sum::<f64>() / total;

    let order = rank_trials(&trials);

    AggregatedResult {
        num_simulations: n as u32,
        time_horizon_months: config.time_horizon_months,
        seed,
        percentiles,
        mean_months,
        median_months: percentiles.p50_months,
        std_dev_months: variance.sqrt(),
        probability_depleted_by_12_mo: depleted_by(&trials, 12),
        probability_depleted_by_24_mo: depleted_by(&trials, 24),
        probability_depleted_by_36_mo: depleted_by(&trials, 36),
        probability_success: survived as f64 / total,
        probability_growing: growing as f64 / total,
        mean_final_balance,
        value_at_risk_95,
        conditional_value_at_risk_95,
        histogram: histogram(&trials, config.time_horizon_months),
        sample_paths: sample_paths(&trials, &order, seed),
        scenarios: scenario_summaries(&trials, &order),
        trials,
    }
}

pub fn percentile(values: &mut [f64], p: f64) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    percentile_sorted(values, p)
}

/// Linear interpolation between the two closest ranks of an ascending slice.
fn percentile_sorted(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn depleted_by(trials: &[Trial], month: u32) -> f64 {
    if trials.is_empty() {
        return 0.0;
    }
    let count = trials
        .iter()
        .filter(|t| t.is_depleted() && t.months_to_depletion <= month)
        .count();
    count as f64 / trials.len() as f64
}

/// Trial indices ordered worst to best: shortest runway first, ties broken by
/// final balance.
fn rank_trials(trials: &[Trial]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..trials.len()).collect();
    order.sort_by(|&a, &b| {
        let (ta, tb) = (&trials[a], &trials[b]);
        ta.months_to_depletion
            .cmp(&tb.months_to_depletion)
            .then(ta.final_balance.total_cmp(&tb.final_balance))
    });
    order
}

fn histogram(trials: &[Trial], horizon: u32) -> Vec<HistogramBucket> {
    let horizon = horizon.max(1);
    let width = horizon.div_ceil(HISTOGRAM_BINS).max(1);
    let bins = horizon.div_ceil(width);
    let mut counts = vec![0_u32; bins as usize];

    for trial in trials {
        let idx = (trial.months_to_depletion.saturating_sub(1) / width).min(bins - 1);
        counts[idx as usize] += 1;
    }

    let total = trials.len().max(1) as f64;
    counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| {
            let i = i as u32;
            HistogramBucket {
                start_month: i * width + 1,
                end_month: ((i + 1) * width).min(horizon),
                count,
                percentage: count as f64 / total * 100.0,
            }
        })
        .collect()
}

fn rank_index(n: usize, p: f64) -> usize {
    ((p / 100.0) * (n as f64 - 1.0)).round() as usize
}

fn sample_paths(trials: &[Trial], order: &[usize], seed: u64) -> SamplePaths {
    if trials.is_empty() {
        return SamplePaths::default();
    }
    let n = order.len();
    let path_at = |p: f64| trials[order[rank_index(n, p)]].net_worth_series.clone();

    let mut rng = ChaCha8Rng::seed_from_u64(derive_seed(seed, u32::MAX));
    let mut picked = index::sample(&mut rng, n, RANDOM_SAMPLE_PATHS.min(n)).into_vec();
    picked.sort_unstable();

    SamplePaths {
        worst: path_at(10.0),
        median: path_at(50.0),
        best: path_at(90.0),
        random: picked
            .into_iter()
            .map(|i| trials[i].net_worth_series.clone())
            .collect(),
    }
}

fn summarize(trials: &[Trial], indices: &[usize]) -> ScenarioSummary {
    let count = indices.len().max(1) as f64;
    let (months, balance, emergencies) =
        indices.iter().fold((0.0, 0.0, 0.0), |(m, b, e), &i| {
            let t = &trials[i];
            (
                m + t.months_to_depletion as f64,
                b + t.final_balance,
                e + t.emergency_count as f64,
            )
        });
    ScenarioSummary {
        average_months: months / count,
        average_final_balance: balance / count,
        average_emergencies: emergencies / count,
    }
}

fn scenario_summaries(trials: &[Trial], order: &[usize]) -> ScenarioSummaries {
    let n = order.len();
    let decile = (n / 10).max(1).min(n);
    let median_start = (n - decile) / 2;

    ScenarioSummaries {
        worst: summarize(trials, &order[..decile]),
        median: summarize(trials, &order[median_start..median_start + decile]),
        best: summarize(trials, &order[n - decile..]),
    }
}

/// Cross-sectional net-worth percentiles at fixed month offsets. Trials that
/// depleted before an offset contribute their last recorded net worth.
pub fn net_worth_bands(trials: &[Trial], months: &[u32]) -> Vec<NetWorthBand> {
    let mut column = Vec::with_capacity(trials.len());
    months
        .iter()
        .map(|&month| {
            column.clear();
            column.extend(trials.iter().map(|t| t.net_worth_at(month as usize)));
            column.sort_by(|a, b| a.total_cmp(b));
            NetWorthBand {
                month,
                p5: percentile_sorted(&column, 5.0),
                p25: percentile_sorted(&column, 25.0),
                p50: percentile_sorted(&column, 50.0),
                p75: percentile_sorted(&column, 75.0),
                p95: percentile_sorted(&column, 95.0),
            }
        })
        .collect()
}

/// Month 0, every twelfth month, and the final month.
pub fn yearly_offsets(horizon: u32) -> Vec<u32> {
    let mut offsets: Vec<u32> = (0..=horizon).step_by(12).collect();
    if offsets.last() != Some(&horizon) {
        offsets.push(horizon);
    }
    offsets
}
