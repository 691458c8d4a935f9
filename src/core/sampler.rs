use std::f64::consts::PI;

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Seeded uniform source for a single trial. Not cryptographically secure.
pub struct TrialRng {
    inner: ChaCha8Rng,
}

impl TrialRng {
    pub fn new(seed: u64) -> Self {
        Self {
            inner: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn uniform(&mut self) -> f64 {
        self.inner.random::<f64>()
    }

    /// Box-Muller over two uniform draws. A zero first draw is redrawn so the
    /// logarithm stays finite.
    pub fn standard_normal(&mut self) -> f64 {
        let mut u1 = self.uniform();
        while u1 <= f64::MIN_POSITIVE {
            u1 = self.uniform();
        }
        let u2 = self.uniform();
        (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
    }

    pub fn normal(&mut self, mean: f64, std_dev: f64) -> f64 {
        if std_dev == 0.0 {
            return mean;
        }
        mean + std_dev * self.standard_normal()
    }

    pub fn bernoulli(&mut self, probability: f64) -> bool {
        probability > 0.0 && self.uniform() < probability
    }
}

pub fn derive_seed(base_seed: u64, trial_id: u32) -> u64 {
    splitmix64(base_seed ^ (((trial_id as u64) << 32) | trial_id as u64))
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Fresh base seed from OS entropy, used when a config does not pin one.
pub fn entropy_seed() -> u64 {
    rand::rng().next_u64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_std_dev_returns_mean_exactly() {
        let mut rng = TrialRng::new(7);
        for _ in 0..100 {
            assert_eq!(rng.normal(1_234.5, 0.0), 1_234.5);
        }
    }

    #[test]
    fn standard_normal_is_always_finite() {
        let mut rng = TrialRng::new(11);
        for _ in 0..10_000 {
            assert!(rng.standard_normal().is_finite());
        }
    }

    #[test]
    fn normal_samples_match_requested_moments() {
        let mut rng = TrialRng::new(42);
        let n = 50_000;
        let samples: Vec<f64> = (0..n).map(|_| rng.normal(10.0, 2.0)).collect();
        let mean = samples.iter().sum::<f64>() / n as f64;
        let var = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n as f64;
        assert!((mean - 10.0).abs() < 0.05, "mean {mean}");
        assert!((var.sqrt() - 2.0).abs() < 0.05, "std dev {}", var.sqrt());
    }

    #[test]
    fn bernoulli_edges_are_exact() {
        let mut rng = TrialRng::new(3);
        for _ in 0..1_000 {
            assert!(!rng.bernoulli(0.0));
            assert!(rng.bernoulli(1.0));
        }
    }

    #[test]
    fn same_seed_replays_same_draws() {
        let mut a = TrialRng::new(99);
        let mut b = TrialRng::new(99);
        for _ in 0..32 {
            assert_eq!(a.standard_normal(), b.standard_normal());
        }
    }

    #[test]
    fn derive_seed_changes_per_trial_and_base() {
        let a = derive_seed(42, 0);
        let b = derive_seed(42, 1);
        let c = derive_seed(43, 0);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
