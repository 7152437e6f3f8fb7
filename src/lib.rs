//! `safeswitch`: the decision and bookkeeping layer of a model-based safe
//! control agent.
//!
//! At every control step the agent chooses between a performance-oriented
//! *primary* policy and a *safety* override policy. The choice is driven by a
//! short imagination rollout of a learned latent model that forecasts the cost
//! the primary policy would incur over the next few steps. The learned pieces
//! (latent model, actor/critic, optimizers) are external collaborators; this
//! crate owns what sits around them:
//!
//! - [`RiskForecaster`]: rolls a [`LatentModel`] forward under the primary
//!   policy with gradient tracking disabled, summing predicted cost.
//! - [`SwitchController`]: per-instance hysteresis ([`SwitchState`]) with a
//!   safety dwell, a training-time switch budget, and a probabilistic gate
//!   that skips most forecasts. The transition is a pure function
//!   ([`transition`], or [`begin_step`] / [`finish_step`] for batches).
//! - [`BoundedEpisodeCache`]: size-capped, recency-ordered episode store with
//!   newest-first eviction, plus [`EpisodeSampler`] for training windows.
//! - [`ControlLoop`]: one synchronous step over a batch of environment
//!   instances (posterior update, switch verdicts, branch selection,
//!   exploration noise, periodic training, episode recording).
//!
//! Around that core:
//!
//! - [`DecisionNote`]: typed audit note on every switch verdict.
//! - [`Schedule`], [`Every`], [`Once`], [`Until`]: step-driven schedules.
//! - [`MetricsSink`] / [`LogSink`]: scalar reporting through the `log` facade.
//! - (feature `serde`) [`EpisodeArchive`]: JSON episodes and checkpoints on disk.
//! - [`simulate`] / [`run_training`]: environment harness.
//!
//! **Determinism:** every stochastic component draws from a seeded
//! `StdRng`, so a run with a deterministic model, policy, and environment
//! replays exactly.
//!
//! **Non-goals:** training the latent model or the actor/critic, gradient
//! flow through imagined trajectories, environment physics.
//!
//! # Example
//!
//! ```rust
//! use safeswitch::{transition, ForecastOutcome, Mode, StepContext, SwitchConfig, SwitchState};
//!
//! let cfg = SwitchConfig::default().with_safety_steps(4);
//! let ctx = StepContext { mode: Mode::Train, step: 0 };
//! // Gate not taken (draw above the skip probability); the forecast violates.
//! let (next, verdict) = transition(SwitchState::default(), &cfg, ctx, || 0.95, || ForecastOutcome {
//!     total_cost: 6.0,
//!     violated: true,
//! });
//! assert!(verdict.violated);
//! assert_eq!(next.cooldown, 3);
//! ```

#![forbid(unsafe_code)]

mod error;
pub use error::*;

pub mod grad;

mod model;
pub use model::*;

mod policy;
pub use policy::*;

mod forecast;
pub use forecast::*;

mod decision;
pub use decision::*;

mod switch;
pub use switch::*;

mod noise;
pub use noise::*;

mod schedule;
pub use schedule::*;

mod episode;
pub use episode::*;

mod cache;
pub use cache::*;

mod utils;
pub use utils::*;

mod metrics;
pub use metrics::*;

#[cfg(feature = "serde")]
mod store;
#[cfg(feature = "serde")]
pub use store::*;

mod control;
pub use control::*;

mod harness;
pub use harness::*;
