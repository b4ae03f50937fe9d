//! Network latency models.
//!
//! Latency shifts an order's effective creation time. The stochastic model
//! draws from a seeded RNG, so a fixed seed replays the same delays.

use crate::config::LatencyConfig;
use crate::rng::RngHierarchy;
use chrono::Duration;
use rand::rngs::StdRng;
use rand::Rng;
use std::fmt::Debug;

pub trait LatencyModel: Debug + Send {
    fn latency(&mut self) -> Duration;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoLatency;

impl LatencyModel for NoLatency {
    fn latency(&mut self) -> Duration {
        Duration::zero()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedLatency {
    pub mean: Duration,
}

impl LatencyModel for FixedLatency {
    fn latency(&mut self) -> Duration {
        self.mean
    }
}

/// Gaussian latency truncated at zero.
#[derive(Debug, Clone)]
pub struct NormalLatency {
    mean_ms: f64,
    std_dev_ms: f64,
    rng: StdRng,
}

impl NormalLatency {
    pub fn new(mean_ms: u64, std_dev_ms: u64, rng: StdRng) -> Self {
        Self {
            mean_ms: mean_ms as f64,
            std_dev_ms: std_dev_ms as f64,
            rng,
        }
    }

    /// Box-Muller standard normal draw.
    fn standard_normal(&mut self) -> f64 {
        let u1: f64 = 1.0 - self.rng.gen::<f64>();
        let u2: f64 = self.rng.gen::<f64>();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }
}

impl LatencyModel for NormalLatency {
    fn latency(&mut self) -> Duration {
        let ms = (self.mean_ms + self.standard_normal() * self.std_dev_ms).max(0.0);
        Duration::microseconds((ms * 1_000.0).round() as i64)
    }
}

pub fn latency_from_config(config: &LatencyConfig, rng: &RngHierarchy) -> Box<dyn LatencyModel> {
    match *config {
        LatencyConfig::None => Box::new(NoLatency),
        LatencyConfig::Fixed { mean_ms } => Box::new(FixedLatency {
            mean: i64::try_from(mean_ms)
                .ok()
                .and_then(Duration::try_milliseconds)
                .unwrap_or(Duration::MAX),
        }),
        LatencyConfig::Normal { mean_ms, std_dev_ms } => {
            Box::new(NormalLatency::new(mean_ms, std_dev_ms, rng.rng_for("latency", 0)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_latency_is_constant() {
        let mut model = FixedLatency {
            mean: Duration::milliseconds(50),
        };
        assert_eq!(model.latency(), Duration::milliseconds(50));
        assert_eq!(model.latency(), Duration::milliseconds(50));
    }

    #[test]
    fn normal_latency_replays_for_same_seed() {
        let config = LatencyConfig::Normal {
            mean_ms: 50,
            std_dev_ms: 20,
        };
        let mut a = latency_from_config(&config, &RngHierarchy::new(42));
        let mut b = latency_from_config(&config, &RngHierarchy::new(42));
        let xs: Vec<Duration> = (0..100).map(|_| a.latency()).collect();
        let ys: Vec<Duration> = (0..100).map(|_| b.latency()).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn normal_latency_never_negative() {
        let mut model = NormalLatency::new(1, 500, RngHierarchy::new(3).rng_for("latency", 0));
        for _ in 0..1_000 {
            assert!(model.latency() >= Duration::zero());
        }
    }

    #[test]
    fn normal_latency_centers_on_mean() {
        let mut model = NormalLatency::new(100, 10, RngHierarchy::new(9).rng_for("latency", 0));
        let n = 5_000;
        let total_ms: i64 = (0..n).map(|_| model.latency().num_milliseconds()).sum();
        let mean = total_ms as f64 / n as f64;
        assert!((mean - 100.0).abs() < 2.0, "mean latency {mean}");
    }
}
