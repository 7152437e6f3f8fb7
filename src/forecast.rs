//! Short-horizon risk forecasting by imagination rollout.
//!
//! Starting from a posterior latent state, the forecaster rolls the model
//! forward under the primary policy for a fixed horizon and sums the cost
//! head's point estimate. The total is charged to the states being left: the
//! cost of step `h` is read from the features *before* advancing to `h + 1`.
//!
//! The rollout runs under [`no_grad`]: it is inference only and must never
//! enter an optimizer's graph, whatever the caller's ambient mode.

use rand::RngCore;

use crate::grad::no_grad;
use crate::{LatentModel, LatentState, PolicySource};

/// Rollout configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ForecastConfig {
    /// Number of imagined steps.
    pub horizon: usize,
    /// Accumulated predicted cost at or above which the forecast is a violation.
    pub cost_threshold: f32,
    /// Whether the imagination transition samples its stochastic latent.
    pub imag_sample: bool,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            horizon: 15,
            cost_threshold: 1.0,
            imag_sample: true,
        }
    }
}

/// Result of forecasting one row.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ForecastOutcome {
    /// Sum of predicted cost over the horizon.
    pub total_cost: f32,
    /// `total_cost >= cost_threshold`.
    pub violated: bool,
}

/// Imagination-based violation forecaster.
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskForecaster {
    pub cfg: ForecastConfig,
}

impl RiskForecaster {
    pub fn new(cfg: ForecastConfig) -> Self {
        Self { cfg }
    }

    /// Roll out every row of `state` and report the accumulated cost per row.
    ///
    /// `deterministic` selects the policy mode instead of a sample. The model's
    /// own imagination sampling (`imag_sample`) still draws from `rng`.
    /// Non-finite cost predictions contribute nothing.
    pub fn rollout<M, P>(
        &self,
        model: &M,
        policy: &P,
        state: &LatentState,
        deterministic: bool,
        rng: &mut dyn RngCore,
    ) -> Vec<ForecastOutcome>
    where
        M: LatentModel + ?Sized,
        P: PolicySource + ?Sized,
    {
        let _guard = no_grad();

        let batch = state.batch_size();
        let mut totals = vec![0.0f32; batch];
        let mut latent = state.clone();
        for _ in 0..self.cfg.horizon {
            let feat = model.get_feat(&latent);
            let cost = model.predict_cost(&feat).mode();
            for (total, c) in totals.iter_mut().zip(cost) {
                if c.is_finite() {
                    *total += c;
                }
            }
            let actor = policy.primary_policy(&feat);
            let action = if deterministic {
                actor.mode()
            } else {
                actor.sample(rng)
            };
            latent = model.img_step(&latent, &action, self.cfg.imag_sample, rng);
        }

        totals
            .into_iter()
            .map(|total_cost| ForecastOutcome {
                total_cost,
                violated: total_cost >= self.cfg.cost_threshold,
            })
            .collect()
    }

    /// Violation verdict per row.
    pub fn forecast<M, P>(
        &self,
        model: &M,
        policy: &P,
        state: &LatentState,
        deterministic: bool,
        rng: &mut dyn RngCore,
    ) -> Vec<bool>
    where
        M: LatentModel + ?Sized,
        P: PolicySource + ?Sized,
    {
        self.rollout(model, policy, state, deterministic, rng)
            .into_iter()
            .map(|o| o.violated)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grad::is_grad_enabled;
    use crate::{ActionDist, PointMass, Rows, ScalarDist, DETER};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::cell::{Cell, RefCell};

    /// Cost at step `h` equals the imagined time index stored in `deter`.
    struct Clock {
        saw_grad: Cell<bool>,
        feats_seen: RefCell<Vec<f32>>,
    }

    impl Clock {
        fn new() -> Self {
            Self {
                saw_grad: Cell::new(false),
                feats_seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl LatentModel for Clock {
        fn initial(&self, batch_size: usize) -> LatentState {
            LatentState::new().with_field(DETER, vec![vec![0.0]; batch_size])
        }
        fn embed(&self, observations: &Rows) -> Rows {
            observations.clone()
        }
        fn obs_step(&self, s: &LatentState, _: &Rows, _: &Rows, _: bool, _: &mut dyn RngCore) -> LatentState {
            s.clone()
        }
        fn img_step(&self, s: &LatentState, _: &Rows, _: bool, _: &mut dyn RngCore) -> LatentState {
            if is_grad_enabled() {
                self.saw_grad.set(true);
            }
            let rows = s.field(DETER).cloned().unwrap_or_default();
            LatentState::new().with_field(DETER, rows.iter().map(|r| vec![r[0] + 1.0]).collect())
        }
        fn get_feat(&self, s: &LatentState) -> Rows {
            s.field(DETER).cloned().unwrap_or_default()
        }
        fn predict_cost(&self, f: &Rows) -> Box<dyn ScalarDist> {
            self.feats_seen.borrow_mut().extend(f.iter().map(|r| r[0]));
            Box::new(PointMass(f.iter().map(|r| r[0]).collect()))
        }
        fn predict_reward(&self, f: &Rows) -> Box<dyn ScalarDist> {
            Box::new(PointMass(vec![0.0; f.len()]))
        }
    }

    struct Still;
    struct StillDist(usize);
    impl ActionDist for StillDist {
        fn mode(&self) -> Rows {
            vec![vec![0.0]; self.0]
        }
        fn sample(&self, _: &mut dyn RngCore) -> Rows {
            self.mode()
        }
        fn log_prob(&self, a: &Rows) -> Vec<f32> {
            vec![0.0; a.len()]
        }
    }
    impl PolicySource for Still {
        fn primary_policy(&self, f: &Rows) -> Box<dyn ActionDist> {
            Box::new(StillDist(f.len()))
        }
        fn safety_policy(&self, f: &Rows) -> Box<dyn ActionDist> {
            Box::new(StillDist(f.len()))
        }
        fn value(&self, f: &Rows) -> Vec<f32> {
            vec![0.0; f.len()]
        }
    }

    #[test]
    fn cost_is_charged_to_the_state_being_left() {
        let model = Clock::new();
        let fc = RiskForecaster::new(ForecastConfig {
            horizon: 3,
            cost_threshold: 3.0,
            imag_sample: false,
        });
        let mut rng = StdRng::seed_from_u64(0);
        let out = fc.rollout(&model, &Still, &model.initial(1), true, &mut rng);
        // Features read at t = 0, 1, 2 (never the final entered state t = 3).
        assert_eq!(*model.feats_seen.borrow(), vec![0.0, 1.0, 2.0]);
        assert_eq!(out[0].total_cost, 3.0);
        assert!(out[0].violated, "threshold is inclusive");
    }

    #[test]
    fn rollout_runs_without_gradient_tracking() {
        let model = Clock::new();
        let fc = RiskForecaster::new(ForecastConfig::default());
        let mut rng = StdRng::seed_from_u64(0);
        assert!(is_grad_enabled());
        fc.forecast(&model, &Still, &model.initial(2), false, &mut rng);
        assert!(!model.saw_grad.get());
        assert!(is_grad_enabled(), "tracking restored after the call");
    }

    #[test]
    fn zero_horizon_never_violates_positive_threshold() {
        let model = Clock::new();
        let fc = RiskForecaster::new(ForecastConfig {
            horizon: 0,
            ..ForecastConfig::default()
        });
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(fc.forecast(&model, &Still, &model.initial(2), true, &mut rng), vec![false, false]);
    }
}
