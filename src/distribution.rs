//! Probability distributions used for inter-arrival and service durations.
//!
//! Every sampler produces independent, strictly positive draws expressed in
//! milliseconds. Draws go through [`Open01`] so the logarithms below never
//! see zero. The pseudo-random state is guarded by a mutex, making samplers
//! safe to share between server threads.

use std::sync::Mutex;

use rand::distributions::Open01;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaChaRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a distribution is constructed with invalid parameters.
#[derive(Debug, Error, PartialEq)]
pub enum DistributionError {
    /// A shape, scale, or rate parameter was zero or negative.
    #[error("distribution parameter `{name}` must be positive, got {value}")]
    NonPositive {
        /// Name of the offending parameter.
        name: &'static str,
        /// The rejected value.
        value: f64,
    },
    /// A mixture weight fell outside its allowed range.
    #[error("mixture weight `{name}` must lie within [0, 1], got {value}")]
    WeightOutOfRange {
        /// Name of the offending parameter.
        name: &'static str,
        /// The rejected value.
        value: f64,
    },
}

fn ensure_positive(name: &'static str, value: f64) -> Result<(), DistributionError> {
    if value > 0.0 {
        Ok(())
    } else {
        Err(DistributionError::NonPositive { name, value })
    }
}

/// Implementors generate positive real-valued durations from a probability
/// law. Each call is an independent draw.
pub trait Sampler: Send + Sync {
    /// Draws the next value.
    fn sample(&self) -> f64;
}

/// Exponential distribution with the given scale (mean).
pub struct Exponential {
    scale: f64,
    rng: Mutex<ChaChaRng>,
}

impl Exponential {
    /// Constructs a sampler seeded from system entropy.
    ///
    /// # Errors
    ///
    /// Fails if `scale` is not positive.
    pub fn new(scale: f64) -> Result<Self, DistributionError> {
        Self::with_rng(scale, ChaChaRng::from_entropy())
    }

    /// Constructs a sampler with a fixed seed, for reproducible runs.
    ///
    /// # Errors
    ///
    /// Fails if `scale` is not positive.
    pub fn seeded(scale: f64, seed: u64) -> Result<Self, DistributionError> {
        Self::with_rng(scale, ChaChaRng::seed_from_u64(seed))
    }

    fn with_rng(scale: f64, rng: ChaChaRng) -> Result<Self, DistributionError> {
        ensure_positive("scale", scale)?;
        Ok(Self {
            scale,
            rng: Mutex::new(rng),
        })
    }
}

impl Sampler for Exponential {
    fn sample(&self) -> f64 {
        let u: f64 = self.rng.lock().expect("sampler rng poisoned").sample(Open01);
        -self.scale * u.ln()
    }
}

/// Erlang distribution with integer shape `alpha` and rate `beta`.
///
/// Drawn as the scaled log of a product of `alpha` uniforms, so the mean of
/// the draws is `beta`.
pub struct Erlang {
    shape: u32,
    coefficient: f64,
    rng: Mutex<ChaChaRng>,
}

impl Erlang {
    /// Constructs a sampler seeded from system entropy.
    ///
    /// # Errors
    ///
    /// Fails if `shape` is zero or `rate` is not positive.
    pub fn new(shape: u32, rate: f64) -> Result<Self, DistributionError> {
        Self::with_rng(shape, rate, ChaChaRng::from_entropy())
    }

    /// Constructs a sampler with a fixed seed, for reproducible runs.
    ///
    /// # Errors
    ///
    /// Fails if `shape` is zero or `rate` is not positive.
    pub fn seeded(shape: u32, rate: f64, seed: u64) -> Result<Self, DistributionError> {
        Self::with_rng(shape, rate, ChaChaRng::seed_from_u64(seed))
    }

    fn with_rng(shape: u32, rate: f64, rng: ChaChaRng) -> Result<Self, DistributionError> {
        ensure_positive("shape", f64::from(shape))?;
        ensure_positive("rate", rate)?;
        Ok(Self {
            shape,
            coefficient: -rate / f64::from(shape),
            rng: Mutex::new(rng),
        })
    }
}

impl Sampler for Erlang {
    fn sample(&self) -> f64 {
        let mut rng = self.rng.lock().expect("sampler rng poisoned");
        let product: f64 = (0..self.shape).map(|_| rng.sample::<f64, _>(Open01)).product();
        self.coefficient * product.ln()
    }
}

/// Two-branch hyper-exponential mixture evaluated through a closed-form
/// single-uniform-draw formula rather than branching on a second random
/// choice.
pub struct HyperExponential {
    a: f64,
    b: f64,
    p: f64,
    q: f64,
    rng: Mutex<ChaChaRng>,
}

impl HyperExponential {
    /// Constructs a sampler seeded from system entropy.
    ///
    /// # Errors
    ///
    /// Fails if `a` or `b` is not positive, if `p` lies outside `[0, 1]`, or
    /// if `q` lies outside `(0, 1]` (the closed form divides by `q`).
    pub fn new(a: f64, b: f64, p: f64, q: f64) -> Result<Self, DistributionError> {
        Self::with_rng(a, b, p, q, ChaChaRng::from_entropy())
    }

    /// Constructs a sampler with a fixed seed, for reproducible runs.
    ///
    /// # Errors
    ///
    /// Same conditions as [`HyperExponential::new`].
    pub fn seeded(a: f64, b: f64, p: f64, q: f64, seed: u64) -> Result<Self, DistributionError> {
        Self::with_rng(a, b, p, q, ChaChaRng::seed_from_u64(seed))
    }

    fn with_rng(a: f64, b: f64, p: f64, q: f64, rng: ChaChaRng) -> Result<Self, DistributionError> {
        ensure_positive("a", a)?;
        ensure_positive("b", b)?;
        if !(0.0..=1.0).contains(&p) {
            return Err(DistributionError::WeightOutOfRange { name: "p", value: p });
        }
        ensure_positive("q", q)?;
        if q > 1.0 {
            return Err(DistributionError::WeightOutOfRange { name: "q", value: q });
        }
        Ok(Self {
            a,
            b,
            p,
            q,
            rng: Mutex::new(rng),
        })
    }
}

impl Sampler for HyperExponential {
    fn sample(&self) -> f64 {
        let u: f64 = self.rng.lock().expect("sampler rng poisoned").sample(Open01);
        let (au, bu) = (self.a * u, self.b * u);
        let exp_bu = bu.exp();
        ((au - bu).exp() * (self.p * exp_bu) + self.q * exp_bu - exp_bu - self.q + 1.0)
            / (self.q * (au.exp() - 1.0))
    }
}

/// Weibull-style duration distribution with shape `k` and scale `lambda`.
///
/// The `1.00001` offset keeps the logarithm away from its singularity as the
/// uniform draw approaches 1; it is an intentional numerical guard.
pub struct Weibull {
    shape: f64,
    scale: f64,
    rng: Mutex<ChaChaRng>,
}

impl Weibull {
    /// Constructs a sampler seeded from system entropy.
    ///
    /// # Errors
    ///
    /// Fails if `shape` or `scale` is not positive.
    pub fn new(shape: f64, scale: f64) -> Result<Self, DistributionError> {
        Self::with_rng(shape, scale, ChaChaRng::from_entropy())
    }

    /// Constructs a sampler with a fixed seed, for reproducible runs.
    ///
    /// # Errors
    ///
    /// Fails if `shape` or `scale` is not positive.
    pub fn seeded(shape: f64, scale: f64, seed: u64) -> Result<Self, DistributionError> {
        Self::with_rng(shape, scale, ChaChaRng::seed_from_u64(seed))
    }

    fn with_rng(shape: f64, scale: f64, rng: ChaChaRng) -> Result<Self, DistributionError> {
        ensure_positive("shape", shape)?;
        ensure_positive("scale", scale)?;
        Ok(Self {
            shape,
            scale,
            rng: Mutex::new(rng),
        })
    }
}

impl Sampler for Weibull {
    fn sample(&self) -> f64 {
        let mut rng = self.rng.lock().expect("sampler rng poisoned");
        loop {
            // Draws below the guard offset (u <= 0.00001) flip the sign of
            // the inner logarithm and would yield NaN; redraw that sliver.
            let u: f64 = rng.sample(Open01);
            let t = -(1.000_01 - u).ln();
            if t > 0.0 {
                return self.scale * t.powf(-1.0 / self.shape);
            }
        }
    }
}

/// Declarative description of a distribution, as it appears in the
/// simulation config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DistributionConfig {
    /// See [`Exponential`].
    Exponential {
        /// Scale (mean) in milliseconds.
        scale: f64,
    },
    /// See [`Erlang`].
    Erlang {
        /// Integer shape parameter.
        shape: u32,
        /// Rate parameter; equals the mean of the draws.
        rate: f64,
    },
    /// See [`HyperExponential`].
    HyperExponential {
        /// First branch rate.
        a: f64,
        /// Second branch rate.
        b: f64,
        /// First mixture weight.
        p: f64,
        /// Second mixture weight.
        q: f64,
    },
    /// See [`Weibull`].
    Weibull {
        /// Shape parameter.
        shape: f64,
        /// Scale parameter in milliseconds.
        scale: f64,
    },
}

impl DistributionConfig {
    /// Builds the described sampler, optionally with a fixed seed.
    ///
    /// # Errors
    ///
    /// Propagates the parameter validation of the individual constructors.
    pub fn build(&self, seed: Option<u64>) -> Result<Box<dyn Sampler>, DistributionError> {
        Ok(match (self, seed) {
            (Self::Exponential { scale }, None) => Box::new(Exponential::new(*scale)?),
            (Self::Exponential { scale }, Some(s)) => Box::new(Exponential::seeded(*scale, s)?),
            (Self::Erlang { shape, rate }, None) => Box::new(Erlang::new(*shape, *rate)?),
            (Self::Erlang { shape, rate }, Some(s)) => Box::new(Erlang::seeded(*shape, *rate, s)?),
            (Self::HyperExponential { a, b, p, q }, None) => {
                Box::new(HyperExponential::new(*a, *b, *p, *q)?)
            }
            (Self::HyperExponential { a, b, p, q }, Some(s)) => {
                Box::new(HyperExponential::seeded(*a, *b, *p, *q, s)?)
            }
            (Self::Weibull { shape, scale }, None) => Box::new(Weibull::new(*shape, *scale)?),
            (Self::Weibull { shape, scale }, Some(s)) => {
                Box::new(Weibull::seeded(*shape, *scale, s)?)
            }
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const DRAWS: usize = 10_000;

    fn mean_of(sampler: &dyn Sampler) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let count = DRAWS as f64;
        (0..DRAWS).map(|_| sampler.sample()).sum::<f64>() / count
    }

    fn assert_strictly_positive_finite(sampler: &dyn Sampler) {
        for _ in 0..DRAWS {
            let value = sampler.sample();
            assert!(value > 0.0, "draw must be strictly positive, got {}", value);
            assert!(value.is_finite(), "draw must be finite, got {}", value);
        }
    }

    #[test]
    fn test_all_samplers_strictly_positive_and_finite() {
        assert_strictly_positive_finite(&Exponential::seeded(50.0, 17).unwrap());
        assert_strictly_positive_finite(&Erlang::seeded(2, 20.0, 17).unwrap());
        assert_strictly_positive_finite(&HyperExponential::seeded(1.0, 1.0, 0.5, 0.5, 17).unwrap());
        assert_strictly_positive_finite(&Weibull::seeded(4.0, 50.0, 17).unwrap());
    }

    #[test]
    fn test_exponential_mean_converges_to_scale() {
        let sampler = Exponential::seeded(50.0, 42).unwrap();
        let mean = mean_of(&sampler);
        assert!(
            (mean - 50.0).abs() < 2.0,
            "mean {} too far from expected 50",
            mean
        );
    }

    #[test]
    fn test_erlang_mean_converges_to_rate() {
        let sampler = Erlang::seeded(2, 20.0, 42).unwrap();
        let mean = mean_of(&sampler);
        assert!(
            (mean - 20.0).abs() < 1.0,
            "mean {} too far from expected 20",
            mean
        );
    }

    #[test]
    fn test_rejects_non_positive_parameters() {
        assert_eq!(
            Exponential::new(0.0).err(),
            Some(DistributionError::NonPositive {
                name: "scale",
                value: 0.0
            })
        );
        assert!(Exponential::new(-1.0).is_err());
        assert!(Erlang::new(0, 20.0).is_err());
        assert!(Erlang::new(2, 0.0).is_err());
        assert!(HyperExponential::new(0.0, 1.0, 0.5, 0.5).is_err());
        assert!(HyperExponential::new(1.0, -1.0, 0.5, 0.5).is_err());
        assert!(Weibull::new(0.0, 50.0).is_err());
        assert!(Weibull::new(4.0, -50.0).is_err());
    }

    #[test]
    fn test_rejects_out_of_range_weights() {
        assert_eq!(
            HyperExponential::new(1.0, 1.0, 1.5, 0.5).err(),
            Some(DistributionError::WeightOutOfRange {
                name: "p",
                value: 1.5
            })
        );
        assert!(HyperExponential::new(1.0, 1.0, -0.1, 0.5).is_err());
        // The closed form divides by q, so q = 0 is rejected as well.
        assert!(HyperExponential::new(1.0, 1.0, 0.5, 0.0).is_err());
        assert!(HyperExponential::new(1.0, 1.0, 0.5, 1.1).is_err());
    }

    #[test]
    fn test_seeded_samplers_are_reproducible() {
        let first = Weibull::seeded(4.0, 50.0, 7).unwrap();
        let second = Weibull::seeded(4.0, 50.0, 7).unwrap();
        let lhs: Vec<f64> = (0..100).map(|_| first.sample()).collect();
        let rhs: Vec<f64> = (0..100).map(|_| second.sample()).collect();
        assert_eq!(lhs, rhs);
    }

    #[test]
    fn test_config_round_trip_and_build() {
        let config: DistributionConfig =
            serde_json::from_str(r#"{"kind": "erlang", "shape": 2, "rate": 20.0}"#).unwrap();
        assert_eq!(
            config,
            DistributionConfig::Erlang {
                shape: 2,
                rate: 20.0
            }
        );
        let sampler = config.build(Some(3)).unwrap();
        assert!(sampler.sample() > 0.0);

        let invalid = DistributionConfig::Weibull {
            shape: -1.0,
            scale: 50.0,
        };
        assert!(invalid.build(None).is_err());
    }
}
