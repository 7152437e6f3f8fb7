//! Forecast-gated switching between the primary and the safety policy.
//!
//! Production agents need to avoid "flapping" between policies: once a risk
//! forecast fires, the agent commits to the safety policy for a fixed dwell
//! (`num_safety_steps`) instead of re-deciding every step. Forecasting is also
//! expensive, so most steps skip it through a probabilistic gate.
//!
//! One transition per control step, per batch row, in this order:
//!
//! 1. mechanism disabled → no violation, state unchanged;
//! 2. `cooldown > 0` → forced violation, `cooldown -= 1`, **no forecast**;
//! 3. `switch_count > switch_budget` in training → no violation
//!    (evaluation ignores the budget and forecasts directly);
//! 4. uniform draw `u < gate_probability(step)` → no violation;
//! 5. otherwise the forecast decides; a violation sets
//!    `cooldown = num_safety_steps - 1` and bumps `switch_count`;
//! 6. `only_safe_policy` forces the verdict to violation without touching state.
//!
//! The transition is a pure function of [`SwitchState`] so tests can drive
//! arbitrary state sequences. It is split in two ([`begin_step`] /
//! [`finish_step`]) so a batch can settle rows 1–4 cheaply and roll out only
//! the rows that reach step 5, in a single forecast call.

use rand::Rng;

use crate::{DecisionNote, ForecastOutcome};

/// Training or evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Mode {
    Train,
    Eval,
}

impl Mode {
    pub fn is_training(self) -> bool {
        matches!(self, Mode::Train)
    }

    /// `"train"` / `"eval"` (used as metric prefixes).
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Train => "train",
            Mode::Eval => "eval",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Probabilistic gate schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GateConfig {
    /// Skip probability before decay starts (`p0`).
    pub base_prob: f64,
    /// Last step at which the probability is still `p0`.
    pub decay_start: u64,
    /// Steps per unit of probability decay. Non-positive or non-finite disables decay.
    pub decay_rate: f64,
    /// Lower bound on the skip probability.
    pub min_prob: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            base_prob: 0.9,
            decay_start: 0,
            decay_rate: 1e6,
            min_prob: 0.1,
        }
    }
}

/// Probability of skipping the forecast at `step`.
///
/// `p0` while `step <= decay_start`, then `p0 - (step - decay_start + 1) / decay_rate`,
/// floored at `min_prob` everywhere.
pub fn gate_probability(step: u64, cfg: &GateConfig) -> f64 {
    let p = if step <= cfg.decay_start
        || !(cfg.decay_rate.is_finite() && cfg.decay_rate > 0.0)
    {
        cfg.base_prob
    } else {
        let elapsed = (step - cfg.decay_start + 1) as f64;
        cfg.base_prob - elapsed / cfg.decay_rate
    };
    p.max(cfg.min_prob)
}

/// Switching configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SwitchConfig {
    /// Global on/off for forecast-driven switching.
    pub enabled: bool,
    /// Always use the safety policy.
    pub only_safe_policy: bool,
    /// Training stops forecasting once `switch_count` exceeds this.
    pub switch_budget: u64,
    /// Safety-policy dwell after a forecast violation (including the triggering step).
    pub num_safety_steps: u64,
    /// Forecast-skip gate.
    pub gate: GateConfig,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            only_safe_policy: false,
            switch_budget: u64::MAX,
            num_safety_steps: 10,
            gate: GateConfig::default(),
        }
    }
}

impl SwitchConfig {
    /// Mechanism off (the primary policy always acts, unless overridden).
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Set the training switch budget.
    pub fn with_budget(mut self, switch_budget: u64) -> Self {
        self.switch_budget = switch_budget;
        self
    }

    /// Set the safety dwell.
    pub fn with_safety_steps(mut self, num_safety_steps: u64) -> Self {
        self.num_safety_steps = num_safety_steps;
        self
    }

    /// Force the safety policy on every step.
    pub fn always_safe(mut self) -> Self {
        self.only_safe_policy = true;
        self
    }
}

/// Per-instance switching state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SwitchState {
    /// Remaining forced safety steps.
    pub cooldown: u64,
    /// Forecast-triggered switches since the last reset.
    pub switch_count: u64,
}

impl SwitchState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// What the caller knows about the current step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepContext {
    pub mode: Mode,
    /// Environment step (drives the gate schedule).
    pub step: u64,
}

/// Per-row outcome of one transition.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SwitchVerdict {
    /// Use the safety policy this step.
    pub violated: bool,
    /// Safety chosen for a reason other than the always-safe override.
    pub switched: bool,
    /// The override turned a no-violation into a violation.
    pub forced: bool,
    /// Rule that settled the underlying decision.
    pub note: DecisionNote,
}

impl SwitchVerdict {
    fn new(cfg: &SwitchConfig, violated: bool, note: DecisionNote) -> Self {
        Self {
            violated: violated || cfg.only_safe_policy,
            switched: violated,
            forced: cfg.only_safe_policy && !violated,
            note,
        }
    }
}

/// First half of a transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pending {
    /// Settled without a forecast.
    Settled(SwitchState, SwitchVerdict),
    /// Needs a forecast; feed it to [`finish_step`].
    NeedsForecast,
}

/// Apply rules 1–4 (and 6). `uniform` is only called when the gate is reached.
pub fn begin_step<U>(state: SwitchState, cfg: &SwitchConfig, ctx: StepContext, uniform: U) -> Pending
where
    U: FnOnce() -> f64,
{
    let settled = |next, violated, note| Pending::Settled(next, SwitchVerdict::new(cfg, violated, note));

    if !cfg.enabled {
        return settled(state, false, DecisionNote::Disabled);
    }

    if state.cooldown > 0 {
        let next = SwitchState {
            cooldown: state.cooldown - 1,
            ..state
        };
        return settled(
            next,
            true,
            DecisionNote::Cooldown {
                remaining: next.cooldown,
            },
        );
    }

    if state.switch_count > cfg.switch_budget {
        return match ctx.mode {
            Mode::Train => settled(
                state,
                false,
                DecisionNote::BudgetExhausted {
                    switch_count: state.switch_count,
                    budget: cfg.switch_budget,
                },
            ),
            // Evaluation stays fully protected.
            Mode::Eval => Pending::NeedsForecast,
        };
    }

    let gate_probability = gate_probability(ctx.step, &cfg.gate);
    let draw = uniform();
    if draw < gate_probability {
        return settled(
            state,
            false,
            DecisionNote::GateSkipped {
                draw,
                gate_probability,
            },
        );
    }

    Pending::NeedsForecast
}

/// Apply rule 5 (and 6) given a forecast for a row that [`begin_step`] left pending.
pub fn finish_step(state: SwitchState, cfg: &SwitchConfig, outcome: ForecastOutcome) -> (SwitchState, SwitchVerdict) {
    let mut next = state;
    if outcome.violated {
        // The current step already uses one safety step.
        next.cooldown = cfg.num_safety_steps.saturating_sub(1);
        next.switch_count = next.switch_count.saturating_add(1);
    }
    let note = DecisionNote::Forecast {
        total_cost: outcome.total_cost,
        violated: outcome.violated,
    };
    (next, SwitchVerdict::new(cfg, outcome.violated, note))
}

/// Full single-instance transition.
///
/// `forecast` is invoked at most once, and only when rules 1–4 do not settle the step.
pub fn transition<U, F>(
    state: SwitchState,
    cfg: &SwitchConfig,
    ctx: StepContext,
    uniform: U,
    forecast: F,
) -> (SwitchState, SwitchVerdict)
where
    U: FnOnce() -> f64,
    F: FnOnce() -> ForecastOutcome,
{
    match begin_step(state, cfg, ctx, uniform) {
        Pending::Settled(next, verdict) => (next, verdict),
        Pending::NeedsForecast => finish_step(state, cfg, forecast()),
    }
}

/// Batched switch controller.
///
/// Holds only configuration; per-row [`SwitchState`]s travel with the control
/// state so episode resets can clear them index by index.
#[derive(Debug, Clone, Copy, Default)]
pub struct SwitchController {
    pub cfg: SwitchConfig,
}

impl SwitchController {
    pub fn new(cfg: SwitchConfig) -> Self {
        Self { cfg }
    }

    /// Decide every row of `states` in place.
    ///
    /// Rows that reach the forecast are collected and handed to `forecast`
    /// together (row indices into `states`); `forecast` is not called when no
    /// row needs it. A missing outcome counts as no violation.
    pub fn decide<R, F>(
        &self,
        states: &mut [SwitchState],
        ctx: StepContext,
        rng: &mut R,
        forecast: F,
    ) -> Vec<SwitchVerdict>
    where
        R: Rng + ?Sized,
        F: FnOnce(&[usize], &mut R) -> Vec<ForecastOutcome>,
    {
        let mut verdicts: Vec<Option<SwitchVerdict>> = Vec::with_capacity(states.len());
        let mut pending: Vec<usize> = Vec::new();
        for (i, state) in states.iter_mut().enumerate() {
            match begin_step(*state, &self.cfg, ctx, || rng.random::<f64>()) {
                Pending::Settled(next, verdict) => {
                    *state = next;
                    verdicts.push(Some(verdict));
                }
                Pending::NeedsForecast => {
                    pending.push(i);
                    verdicts.push(None);
                }
            }
        }

        if !pending.is_empty() {
            let outcomes = forecast(&pending, rng);
            if outcomes.len() != pending.len() {
                log::warn!(
                    "forecast returned {} outcomes for {} rows; missing rows count as no violation",
                    outcomes.len(),
                    pending.len()
                );
            }
            for (k, &i) in pending.iter().enumerate() {
                let outcome = outcomes.get(k).copied().unwrap_or(ForecastOutcome {
                    total_cost: 0.0,
                    violated: false,
                });
                let (next, verdict) = finish_step(states[i], &self.cfg, outcome);
                if outcome.violated {
                    log::debug!(
                        "row {i}: forecast cost {:.3} violates threshold, safety policy for {} steps",
                        outcome.total_cost,
                        self.cfg.num_safety_steps
                    );
                }
                states[i] = next;
                verdicts[i] = Some(verdict);
            }
        }

        verdicts
            .into_iter()
            .map(|v| {
                v.unwrap_or(SwitchVerdict::new(
                    &self.cfg,
                    false,
                    DecisionNote::Forecast {
                        total_cost: 0.0,
                        violated: false,
                    },
                ))
            })
            .collect()
    }

    /// Reset the state of each row whose `mask` entry is `true`.
    pub fn reset_rows(states: &mut [SwitchState], mask: &[bool]) {
        for (state, &reset) in states.iter_mut().zip(mask) {
            if reset {
                state.reset();
            }
        }
    }
}
