//! The control loop: one synchronous step per call over a batch of
//! environment instances.
//!
//! Per step, in order:
//!
//! 1. periodic full state reset (`reset_every`), then index-precise reset of
//!    the rows flagged by the environment batch;
//! 2. in training, a due training pass (`train_every`), pretraining once;
//! 3. posterior update from the observation, features;
//! 4. switch verdict per row (forecasting only the rows that need it);
//! 5. action from the primary or safety branch of the active behavior
//!    (mode in evaluation, sample in training), then exploration noise;
//! 6. in training, the step counter advances by the batch size.
//!
//! Finished episodes come back through [`ControlLoop::record_episode`], which
//! feeds the bounded caches, the rolling mean cost, and the metric sink.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::{
    apply_exploration_noise, gate_probability, ActionDist, ActionSpace, Batch, BoundedEpisodeCache,
    EpisodeId, EpisodeRecord, EpisodeSampler, Error, Every, Exploration, ExplorationKind,
    ForecastConfig, LatentModel, LatentState, LogSink, MetricBuffer, MetricsSink, Mode, NoiseKind,
    Once, PolicySource, Result, RiskForecaster, RollingMean, Rows, Schedule, StepContext,
    SwitchConfig, SwitchController, SwitchState, SwitchVerdict, Until,
};
#[cfg(feature = "serde")]
use crate::{Checkpoint, EpisodeArchive};

const SAMPLER_STREAM: u64 = 0xE915_0DE5;

/// Agent configuration.
///
/// Step-valued fields (`steps`, `eval_every`, `log_every`, `expl_until`) count
/// environment steps; they are divided by `action_repeat` to get agent steps.
/// `train_every`, `reset_every`, `prefill`, `pretrain`, and `train_steps` are
/// in agent steps / updates.
///
/// Switching parameters live in [`SwitchConfig`] (`enabled` is the global
/// on/off, `gate` the forecast-skip schedule) and [`ForecastConfig`] (look-ahead
/// horizon, cost threshold).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AgentConfig {
    pub action_repeat: u64,
    pub steps: u64,
    pub eval_every: u64,
    pub log_every: u64,
    /// Discard the whole control state this often (0: never).
    pub reset_every: u64,
    pub train_every: u64,
    pub train_steps: u64,
    /// Updates in the first training pass.
    pub pretrain: u64,
    /// Random-policy transitions collected before learning starts.
    pub prefill: u64,
    /// Exploration behavior is active before this env step (0: always).
    pub expl_until: u64,
    pub expl_amount: f32,
    pub eval_noise: f32,
    /// Actor output distribution; selects the exploration-noise family.
    pub actor_dist: String,
    pub exploration: ExplorationKind,
    pub action_space: ActionSpace,
    pub batch_size: usize,
    pub batch_length: usize,
    pub oversample_ends: bool,
    /// Retained training steps (0: unbounded).
    pub dataset_size: usize,
    pub collect_dyn_sample: bool,
    /// Evaluate features on the posterior mean instead of a sample.
    pub eval_state_mean: bool,
    pub actor_entropy: Schedule,
    pub actor_state_entropy: Schedule,
    pub imag_gradient_mix: Schedule,
    pub switch: SwitchConfig,
    pub forecast: ForecastConfig,
    /// Episodes in the online mean cost.
    pub mean_cost_window: usize,
    pub seed: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            action_repeat: 2,
            steps: 10_000_000,
            eval_every: 10_000,
            log_every: 10_000,
            reset_every: 0,
            train_every: 5,
            train_steps: 1,
            pretrain: 100,
            prefill: 2_500,
            expl_until: 0,
            expl_amount: 0.0,
            eval_noise: 0.0,
            actor_dist: "trunc_normal".to_string(),
            exploration: ExplorationKind::Greedy,
            action_space: ActionSpace::unit_box(1),
            batch_size: 16,
            batch_length: 50,
            oversample_ends: false,
            dataset_size: 0,
            collect_dyn_sample: true,
            eval_state_mean: false,
            actor_entropy: Schedule::Constant(3e-4),
            actor_state_entropy: Schedule::Constant(0.0),
            imag_gradient_mix: Schedule::Constant(0.0),
            switch: SwitchConfig::default(),
            forecast: ForecastConfig::default(),
            mean_cost_window: 50,
            seed: 0,
        }
    }
}

impl AgentConfig {
    pub fn with_action_space(mut self, action_space: ActionSpace) -> Self {
        self.action_space = action_space;
        self
    }

    pub fn with_actor_dist(mut self, actor_dist: impl Into<String>) -> Self {
        self.actor_dist = actor_dist.into();
        self
    }

    pub fn with_switch(mut self, switch: SwitchConfig) -> Self {
        self.switch = switch;
        self
    }

    pub fn with_forecast(mut self, forecast: ForecastConfig) -> Self {
        self.forecast = forecast;
        self
    }

    pub fn with_exploration(mut self, exploration: ExplorationKind, expl_until: u64) -> Self {
        self.exploration = exploration;
        self.expl_until = expl_until;
        self
    }

    pub fn with_dataset_size(mut self, dataset_size: usize) -> Self {
        self.dataset_size = dataset_size;
        self
    }

    pub fn with_batch(mut self, batch_size: usize, batch_length: usize) -> Self {
        self.batch_size = batch_size;
        self.batch_length = batch_length;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Reject configurations the loop cannot run; returns the resolved noise family.
    pub fn validate(&self) -> Result<NoiseKind> {
        if self.action_repeat == 0 {
            return Err(Error::config("action_repeat must be at least 1"));
        }
        if self.batch_size == 0 || self.batch_length == 0 {
            return Err(Error::config("batch_size and batch_length must be positive"));
        }
        if self.action_space.dim() == 0 {
            return Err(Error::config("action space has no dimensions"));
        }
        if let ActionSpace::Continuous { low, high } = &self.action_space {
            if low.len() != high.len() || low.iter().zip(high).any(|(l, h)| !(l <= h)) {
                return Err(Error::config("continuous action bounds must pair up with low <= high"));
            }
        }
        let noise = NoiseKind::from_actor_dist(&self.actor_dist)?;
        if matches!(noise, NoiseKind::OneHot { .. }) != self.action_space.is_discrete() {
            return Err(Error::config(format!(
                "actor distribution '{}' does not fit the action space",
                self.actor_dist
            )));
        }
        for (name, amount) in [("expl_amount", self.expl_amount), ("eval_noise", self.eval_noise)] {
            if !(amount.is_finite() && amount >= 0.0) {
                return Err(Error::config(format!("{name} must be a finite non-negative number")));
            }
        }
        if self.switch.enabled && self.forecast.horizon == 0 {
            return Err(Error::config("forecast horizon must be positive when switching is enabled"));
        }
        if !self.forecast.cost_threshold.is_finite() {
            return Err(Error::config("cost_threshold must be finite"));
        }
        for (name, schedule) in [
            ("actor_entropy", self.actor_entropy),
            ("actor_state_entropy", self.actor_state_entropy),
            ("imag_gradient_mix", self.imag_gradient_mix),
        ] {
            if !schedule.value(0).is_finite() {
                return Err(Error::config(format!("{name} schedule '{schedule}' is not finite at step 0")));
            }
        }
        let gate = &self.switch.gate;
        if !(0.0..=1.0).contains(&gate.base_prob) || !(0.0..=1.0).contains(&gate.min_prob) {
            return Err(Error::config("gate probabilities must lie in [0, 1]"));
        }
        Ok(noise)
    }
}

/// Scheduled values and statistics handed to every training update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainContext {
    /// Environment step.
    pub step: u64,
    /// Rolling mean of recent training-episode cost.
    pub mean_episode_cost: f64,
    pub actor_entropy: f64,
    pub actor_state_entropy: f64,
    pub imag_gradient_mix: f64,
}

/// Training collaborator (world model and behavior optimization).
pub trait Trainer {
    /// One update on `batch`; returns named metrics.
    fn train(&mut self, batch: &Batch, ctx: &TrainContext) -> BTreeMap<String, f32>;

    /// Opaque snapshot of parameters and optimizer state.
    fn save_state(&self) -> Vec<u8> {
        Vec::new()
    }

    fn load_state(&mut self, state: &[u8]) -> Result<()> {
        let _ = state;
        Ok(())
    }
}

/// State carried between control steps.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlState {
    pub latent: LatentState,
    /// Action taken at the previous step, one row per instance.
    pub action: Rows,
    pub switches: Vec<SwitchState>,
}

impl ControlState {
    /// Zero latent, zero previous action, fresh switch states.
    pub fn initial<M: LatentModel + ?Sized>(model: &M, batch: usize, action_dim: usize) -> Self {
        Self {
            latent: model.initial(batch),
            action: crate::zeros(batch, action_dim),
            switches: vec![SwitchState::default(); batch],
        }
    }

    /// Reset every row whose `mask` entry is `true`; other rows are untouched.
    pub fn reset_rows(&mut self, mask: &[bool]) {
        self.latent.zero_rows(mask);
        for (row, &reset) in self.action.iter_mut().zip(mask) {
            if reset {
                row.iter_mut().for_each(|x| *x = 0.0);
            }
        }
        SwitchController::reset_rows(&mut self.switches, mask);
    }
}

/// Output of one control step.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyOutput {
    pub action: Rows,
    /// Log-probability of the pre-noise action under the distribution it came from.
    pub log_prob: Vec<f32>,
    /// The safety branch acted for a reason other than the always-safe override.
    pub switched: Vec<bool>,
    /// Per-row switch verdicts (empty for agents without a switch controller).
    pub verdicts: Vec<SwitchVerdict>,
}

/// Mode or sample from `dist`, with the log-probability of the result.
fn act(dist: &dyn ActionDist, deterministic: bool, rng: &mut dyn RngCore) -> (Rows, Vec<f32>) {
    let action = if deterministic { dist.mode() } else { dist.sample(rng) };
    let log_prob = dist.log_prob(&action);
    (action, log_prob)
}

/// Row `i` from `safety` where `violated[i]`, else from `primary`.
fn blend(
    violated: &[bool],
    primary: Option<(Rows, Vec<f32>)>,
    safety: Option<(Rows, Vec<f32>)>,
) -> (Rows, Vec<f32>) {
    let (pa, pl) = primary.unwrap_or_default();
    let (sa, sl) = safety.unwrap_or_default();
    violated
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            let (a, l) = if v { (&sa, &sl) } else { (&pa, &pl) };
            (a.get(i).cloned().unwrap_or_default(), l.get(i).copied().unwrap_or(0.0))
        })
        .unzip()
}

/// The agent: switch-gated policy execution plus training and episode bookkeeping.
pub struct ControlLoop<M, P, T> {
    cfg: AgentConfig,
    model: M,
    policy: P,
    trainer: T,
    exploration: Exploration,
    forecaster: RiskForecaster,
    switch: SwitchController,
    noise: NoiseKind,
    step: u64,
    episode_seq: u64,
    last_id: Option<EpisodeId>,
    should_train: Every,
    should_pretrain: Once,
    should_log: Every,
    should_reset: Every,
    should_expl: Until,
    metrics: MetricBuffer,
    sink: Box<dyn MetricsSink>,
    rng: StdRng,
    train_eps: BoundedEpisodeCache,
    eval_eps: BoundedEpisodeCache,
    sampler: EpisodeSampler,
    mean_cost: RollingMean,
    #[cfg(feature = "serde")]
    archive: Option<EpisodeArchive>,
}

impl<M, P, T> ControlLoop<M, P, T>
where
    M: LatentModel,
    P: PolicySource,
    T: Trainer,
{
    pub fn new(cfg: AgentConfig, model: M, policy: P, trainer: T) -> Result<Self> {
        let noise = cfg.validate()?;
        let repeat = cfg.action_repeat;
        Ok(Self {
            exploration: Exploration::resolve(cfg.exploration, &cfg.action_space),
            forecaster: RiskForecaster::new(cfg.forecast),
            switch: SwitchController::new(cfg.switch),
            noise,
            step: 0,
            episode_seq: 0,
            last_id: None,
            should_train: Every::new(cfg.train_every),
            should_pretrain: Once::new(),
            should_log: Every::new(cfg.log_every / repeat),
            should_reset: Every::new(cfg.reset_every),
            should_expl: Until::new(cfg.expl_until / repeat),
            metrics: MetricBuffer::new(),
            sink: Box::new(LogSink::new()),
            rng: StdRng::seed_from_u64(cfg.seed),
            train_eps: BoundedEpisodeCache::new(),
            eval_eps: BoundedEpisodeCache::new(),
            sampler: EpisodeSampler::new(cfg.seed ^ SAMPLER_STREAM, cfg.batch_size, cfg.batch_length)
                .with_oversample_ends(cfg.oversample_ends),
            mean_cost: RollingMean::new(cfg.mean_cost_window),
            #[cfg(feature = "serde")]
            archive: None,
            cfg,
            model,
            policy,
            trainer,
        })
    }

    /// Replace the metric sink (defaults to [`LogSink`]).
    pub fn with_sink(mut self, sink: Box<dyn MetricsSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Explore with a separately trained policy instead of the configured kind.
    pub fn with_explorer(mut self, explorer: Box<dyn PolicySource>) -> Self {
        self.exploration = Exploration::Learned(explorer);
        self
    }

    /// Persist episodes under `archive`, resuming from what it already holds.
    ///
    /// The training cache is loaded newest first up to `dataset_size` steps,
    /// the evaluation cache with the latest episode, and the step counter
    /// continues from the recorded training steps. New episode identifiers
    /// sort after every archived one.
    #[cfg(feature = "serde")]
    pub fn with_archive(mut self, archive: EpisodeArchive) -> Result<Self> {
        archive.create_dirs()?;
        self.train_eps = archive.load(Mode::Train, self.cfg.dataset_size)?;
        if self.cfg.dataset_size > 0 {
            self.train_eps.evict_to_capacity(self.cfg.dataset_size);
        }
        self.eval_eps = archive.load(Mode::Eval, 1)?;
        self.step = archive.count_steps(Mode::Train)?;
        self.last_id = archive.newest_id(Mode::Train)?.max(archive.newest_id(Mode::Eval)?);
        self.episode_seq = self.last_id.as_ref().and_then(EpisodeId::seq).map_or(0, |s| s.saturating_add(1));
        log::info!(
            "resuming at step {} with {} train / {} eval episodes from {}",
            self.step,
            self.train_eps.len(),
            self.eval_eps.len(),
            archive.logdir().display()
        );
        self.archive = Some(archive);
        Ok(self)
    }

    pub fn config(&self) -> &AgentConfig {
        &self.cfg
    }

    /// Agent steps taken in training.
    pub fn step_count(&self) -> u64 {
        self.step
    }

    /// Environment steps (`action_repeat` per agent step).
    pub fn env_step(&self) -> u64 {
        self.cfg.action_repeat.saturating_mul(self.step)
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn trainer(&self) -> &T {
        &self.trainer
    }

    pub fn exploration(&self) -> &Exploration {
        &self.exploration
    }

    pub fn train_cache(&self) -> &BoundedEpisodeCache {
        &self.train_eps
    }

    pub fn eval_cache(&self) -> &BoundedEpisodeCache {
        &self.eval_eps
    }

    /// Rolling mean of recent training-episode cost.
    pub fn mean_episode_cost(&self) -> f64 {
        self.mean_cost.mean()
    }

    /// Whether the one-time pretraining pass is still pending.
    pub fn pretrain_pending(&self) -> bool {
        self.should_pretrain.is_armed()
    }

    #[cfg(feature = "serde")]
    pub fn archive(&self) -> Option<&EpisodeArchive> {
        self.archive.as_ref()
    }

    /// Run one control step for a batch of observations.
    ///
    /// `reset[i]` marks instance `i` as starting a new episode; `state` is the
    /// state returned by the previous call (`None` at the start).
    pub fn step(
        &mut self,
        obs: &Rows,
        reset: &[bool],
        state: Option<ControlState>,
        mode: Mode,
    ) -> (PolicyOutput, ControlState) {
        let mut state = state;
        if self.should_reset.check(self.step) {
            state = None;
        }
        if let Some(s) = state.as_mut() {
            if reset.iter().any(|&r| r) {
                s.reset_rows(reset);
            }
        }

        if mode.is_training() && self.should_train.check(self.step) {
            self.train_pass();
        }

        let out = self.policy_step(obs, state, mode);

        if mode.is_training() {
            self.step += reset.len() as u64;
        }
        out
    }

    fn train_context(&self) -> TrainContext {
        TrainContext {
            step: self.env_step(),
            mean_episode_cost: self.mean_cost.mean(),
            actor_entropy: self.cfg.actor_entropy.value(self.step),
            actor_state_entropy: self.cfg.actor_state_entropy.value(self.step),
            imag_gradient_mix: self.cfg.imag_gradient_mix.value(self.step),
        }
    }

    fn train_pass(&mut self) {
        match self.sampler.sample(&self.train_eps) {
            Some(first) => {
                let updates = if self.should_pretrain.check() {
                    self.cfg.pretrain
                } else {
                    self.cfg.train_steps
                };
                let ctx = self.train_context();
                let mut next = Some(first);
                for _ in 0..updates {
                    let Some(batch) = next.take().or_else(|| self.sampler.sample(&self.train_eps)) else {
                        break;
                    };
                    let metrics = self.trainer.train(&batch, &ctx);
                    self.metrics.merge(&metrics);
                }
            }
            None => log::debug!(
                "training skipped: no episode with {} steps yet",
                self.cfg.batch_length + 1
            ),
        }

        if self.should_log.check(self.step) {
            self.metrics.flush(self.sink.as_mut());
            self.sink.write(self.env_step());
        }
    }

    fn policy_step(&mut self, obs: &Rows, state: Option<ControlState>, mode: Mode) -> (PolicyOutput, ControlState) {
        let batch = obs.len();
        let ControlState {
            latent,
            action: prev_action,
            mut switches,
        } = match state {
            Some(s) => s,
            None => ControlState::initial(&self.model, batch, self.cfg.action_space.dim()),
        };
        switches.resize(batch, SwitchState::default());

        let embed = self.model.embed(obs);
        let mut latent = self
            .model
            .obs_step(&latent, &prev_action, &embed, self.cfg.collect_dyn_sample, &mut self.rng);
        if self.cfg.eval_state_mean {
            latent.use_posterior_mean();
        }
        let feat = self.model.get_feat(&latent);

        let ctx = StepContext {
            mode,
            step: self.env_step(),
        };
        if self.switch.cfg.enabled {
            self.sink
                .scalar("safe_policy_switch_prob", gate_probability(ctx.step, &self.switch.cfg.gate));
        }
        let deterministic = !mode.is_training();
        let (forecaster, model, policy) = (&self.forecaster, &self.model, &self.policy);
        let verdicts = self.switch.decide(&mut switches, ctx, &mut self.rng, |rows, rng| {
            let sub = latent.select_rows(rows);
            forecaster.rollout(model, policy, &sub, deterministic, rng)
        });
        let violated: Vec<bool> = verdicts.iter().map(|v| v.violated).collect();

        let explore = mode.is_training() && self.should_expl.check(self.step);
        let (primary_src, safety_src): (&dyn PolicySource, &dyn PolicySource) = match (&self.exploration, explore) {
            (Exploration::Random(random), true) => (random, &self.policy),
            (Exploration::Learned(explorer), true) => (explorer.as_ref(), explorer.as_ref()),
            _ => (&self.policy, &self.policy),
        };
        let primary = violated
            .iter()
            .any(|&v| !v)
            .then(|| act(primary_src.primary_policy(&feat).as_ref(), deterministic, &mut self.rng));
        let safety = violated
            .iter()
            .any(|&v| v)
            .then(|| act(safety_src.safety_policy(&feat).as_ref(), deterministic, &mut self.rng));
        let (action, log_prob) = blend(&violated, primary, safety);

        let amount = if mode.is_training() {
            self.cfg.expl_amount
        } else {
            self.cfg.eval_noise
        };
        let action = apply_exploration_noise(self.noise, action, amount, &self.cfg.action_space, &mut self.rng);

        let output = PolicyOutput {
            action: action.clone(),
            log_prob,
            switched: verdicts.iter().map(|v| v.switched).collect(),
            verdicts,
        };
        let next = ControlState {
            latent,
            action,
            switches,
        };
        (output, next)
    }

    /// Store a finished episode and report its scalars.
    ///
    /// Training episodes are evicted down to `dataset_size` and update the
    /// rolling mean cost. Evaluation keeps only the latest episode.
    pub fn record_episode(&mut self, mode: Mode, record: EpisodeRecord) -> Result<EpisodeId> {
        let id = EpisodeId::now_after(self.last_id.as_ref(), self.episode_seq, record.length());
        self.episode_seq = id.seq().unwrap_or(0).max(self.episode_seq).saturating_add(1);
        self.last_id = Some(id.clone());
        #[cfg(feature = "serde")]
        if let Some(archive) = &self.archive {
            archive.save(mode, &id, &record)?;
        }

        let summary = *record.summary();
        let cache = match mode {
            Mode::Train => {
                self.train_eps.insert(id.clone(), record);
                if self.cfg.dataset_size > 0 {
                    let evicted = self.train_eps.evict_to_capacity(self.cfg.dataset_size);
                    if !evicted.is_empty() {
                        log::debug!("evicted {} episodes from the training cache", evicted.len());
                    }
                    self.sink.scalar("dataset_size", self.train_eps.snapshot() as f64);
                }
                self.mean_cost.update(summary.total_cost);
                &self.train_eps
            }
            Mode::Eval => {
                self.sink.video("eval_policy", &record.frames());
                self.eval_eps.clear();
                self.eval_eps.insert(id.clone(), record);
                &self.eval_eps
            }
        };
        let episodes = cache.len();

        log::info!(
            "{mode} episode has {} steps, return {:.1}, cost {:.1}, {} switches to the safety policy",
            summary.length,
            summary.total_reward,
            summary.total_cost,
            summary.total_switches
        );
        self.sink.scalar("online_mean_cost", self.mean_cost.mean());
        self.sink.scalar(&format!("{mode}_cost_return"), summary.total_cost);
        self.sink
            .scalar(&format!("{mode}_num_task_switch"), summary.total_switches as f64);
        self.sink.scalar(&format!("{mode}_return"), summary.total_reward);
        self.sink.scalar(&format!("{mode}_length"), summary.length as f64);
        self.sink.scalar(&format!("{mode}_episodes"), episodes as f64);
        self.sink.write(self.env_step());
        Ok(id)
    }

    /// Snapshot for persistence.
    #[cfg(feature = "serde")]
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            step: self.step,
            pretrained: !self.should_pretrain.is_armed(),
            trainer_state: self.trainer.save_state(),
        }
    }

    /// Restore a snapshot. The one-time pretraining pass is not repeated.
    #[cfg(feature = "serde")]
    pub fn restore(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        self.trainer.load_state(&checkpoint.trainer_state)?;
        self.step = self.step.max(checkpoint.step);
        self.should_pretrain.disarm();
        Ok(())
    }

    /// Write a checkpoint to the archive; `Ok(false)` without an archive.
    #[cfg(feature = "serde")]
    pub fn save_checkpoint(&self) -> Result<bool> {
        match &self.archive {
            Some(archive) => {
                archive.save_checkpoint(&self.checkpoint())?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Restore from the archive's checkpoint; `Ok(false)` on a cold start.
    #[cfg(feature = "serde")]
    pub fn restore_checkpoint(&mut self) -> Result<bool> {
        let Some(checkpoint) = self.archive.as_ref().map(EpisodeArchive::load_checkpoint).transpose()?.flatten()
        else {
            return Ok(false);
        };
        self.restore(&checkpoint)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert_eq!(AgentConfig::default().validate().unwrap(), NoiseKind::Gaussian);
    }

    #[test]
    fn unknown_actor_distribution_is_rejected() {
        let cfg = AgentConfig::default().with_actor_dist("laplace");
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn actor_distribution_must_fit_action_space() {
        let cfg = AgentConfig::default().with_action_space(ActionSpace::Discrete { n: 4 });
        assert!(cfg.validate().is_err());
        let cfg = cfg.with_actor_dist("onehot");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_horizon_only_matters_when_switching() {
        let cfg = AgentConfig::default().with_forecast(ForecastConfig {
            horizon: 0,
            ..ForecastConfig::default()
        });
        assert!(cfg.validate().is_err());
        assert!(cfg.with_switch(SwitchConfig::disabled()).validate().is_ok());
    }

    #[test]
    fn blend_picks_rows_by_verdict() {
        let primary = Some((vec![vec![1.0], vec![1.0]], vec![-1.0, -1.0]));
        let safety = Some((vec![vec![2.0], vec![2.0]], vec![-2.0, -2.0]));
        let (a, lp) = blend(&[false, true], primary, safety);
        assert_eq!(a, vec![vec![1.0], vec![2.0]]);
        assert_eq!(lp, vec![-1.0, -2.0]);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn config_deserializes_with_defaults() {
        let cfg: AgentConfig = serde_json::from_str(r#"{"seed": 7, "dataset_size": 1000}"#).unwrap();
        assert_eq!(cfg.seed, 7);
        assert_eq!(cfg.dataset_size, 1000);
        assert_eq!(cfg.batch_length, 50);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn schedules_come_from_strings() {
        let cfg: AgentConfig = serde_json::from_str(r#"{"actor_entropy": "linear(3e-4,1e-5,1000)"}"#).unwrap();
        assert_eq!(cfg.actor_entropy.value(1000), 1e-5);
        assert!(serde_json::from_str::<AgentConfig>(r#"{"actor_entropy": "cosine(1,2)"}"#).is_err());
    }

    #[test]
    fn degenerate_schedule_is_rejected() {
        let mut cfg = AgentConfig::default();
        cfg.actor_entropy = Schedule::Warmup { steps: 0.0, value: 1.0 };
        assert!(cfg.validate().is_ok());
        cfg.actor_entropy = Schedule::Horizon {
            initial: 0.0,
            last: 10.0,
            duration: 100.0,
        };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }
}
