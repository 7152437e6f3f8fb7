//! Environment-facing glue: batched simulation, random prefill, and the
//! outer evaluate/train/checkpoint cycle.
//!
//! Environments here are plain synchronous objects. [`simulate`] advances a
//! batch of them in lock-step, assembles finished episodes, and hands them to
//! the agent for recording; it is resumable through [`SimState`].

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::{
    ActionDist, ActionSpace, ControlLoop, ControlState, EpisodeRecord, Error, LatentModel, Mode, PolicyOutput,
    PolicySource, RandomPolicy, Result, Rows, Trainer, Transition,
};

/// Result of one environment step.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnvStep {
    pub observation: Vec<f32>,
    pub reward: f32,
    pub cost: f32,
    pub done: bool,
}

/// A single environment instance.
pub trait Environment {
    fn action_space(&self) -> ActionSpace;

    /// Start a new episode; returns the first observation.
    fn reset(&mut self) -> Vec<f32>;

    fn step(&mut self, action: &[f32]) -> EnvStep;

    /// Release resources. Failures are reported but never escalated by the harness.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<E: Environment + ?Sized> Environment for Box<E> {
    fn action_space(&self) -> ActionSpace {
        (**self).action_space()
    }

    fn reset(&mut self) -> Vec<f32> {
        (**self).reset()
    }

    fn step(&mut self, action: &[f32]) -> EnvStep {
        (**self).step(action)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Something that acts on a batch and records finished episodes.
pub trait Agent {
    fn act(&mut self, obs: &Rows, reset: &[bool], state: Option<ControlState>) -> (PolicyOutput, Option<ControlState>);

    fn record_episode(&mut self, record: EpisodeRecord) -> Result<()>;
}

/// A [`ControlLoop`] bound to one mode.
pub struct LoopAgent<'a, M, P, T> {
    inner: &'a mut ControlLoop<M, P, T>,
    mode: Mode,
}

impl<M, P, T> ControlLoop<M, P, T>
where
    M: LatentModel,
    P: PolicySource,
    T: Trainer,
{
    /// View this loop as an [`Agent`] in `mode`.
    pub fn agent(&mut self, mode: Mode) -> LoopAgent<'_, M, P, T> {
        LoopAgent { inner: self, mode }
    }
}

impl<M, P, T> Agent for LoopAgent<'_, M, P, T>
where
    M: LatentModel,
    P: PolicySource,
    T: Trainer,
{
    fn act(&mut self, obs: &Rows, reset: &[bool], state: Option<ControlState>) -> (PolicyOutput, Option<ControlState>) {
        let (out, next) = self.inner.step(obs, reset, state, self.mode);
        (out, Some(next))
    }

    fn record_episode(&mut self, record: EpisodeRecord) -> Result<()> {
        self.inner.record_episode(self.mode, record).map(|_| ())
    }
}

/// Acts uniformly at random; records through the wrapped agent.
pub struct RandomAgent<A> {
    inner: A,
    policy: RandomPolicy,
    rng: StdRng,
}

impl<A: Agent> RandomAgent<A> {
    pub fn new(inner: A, space: ActionSpace, seed: u64) -> Self {
        Self {
            inner,
            policy: RandomPolicy::new(space),
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl<A: Agent> Agent for RandomAgent<A> {
    fn act(&mut self, obs: &Rows, _reset: &[bool], _state: Option<ControlState>) -> (PolicyOutput, Option<ControlState>) {
        let dist = self.policy.dist(obs.len());
        let action = dist.sample(&mut self.rng);
        let log_prob = dist.log_prob(&action);
        let out = PolicyOutput {
            action,
            log_prob,
            switched: vec![false; obs.len()],
            verdicts: Vec::new(),
        };
        (out, None)
    }

    fn record_episode(&mut self, record: EpisodeRecord) -> Result<()> {
        self.inner.record_episode(record)
    }
}

/// When [`simulate`] stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    /// At least this many transitions in finished episodes.
    Steps(u64),
    /// At least this many finished episodes.
    Episodes(u64),
}

impl Limit {
    fn pending(self, steps: u64, episodes: u64) -> bool {
        match self {
            Limit::Steps(n) => steps < n,
            Limit::Episodes(n) => episodes < n,
        }
    }
}

/// Resumable simulation state.
///
/// Counters carry the overshoot past the previous limit so consecutive calls
/// add up to the requested totals.
#[derive(Debug, Clone, PartialEq)]
pub struct SimState {
    pub steps: u64,
    pub episodes: u64,
    done: Vec<bool>,
    length: Vec<u64>,
    obs: Rows,
    buffers: Vec<Vec<Transition>>,
    agent_state: Option<ControlState>,
}

impl SimState {
    fn new(n: usize) -> Self {
        Self {
            steps: 0,
            episodes: 0,
            done: vec![true; n],
            length: vec![0; n],
            obs: vec![Vec::new(); n],
            buffers: vec![Vec::new(); n],
            agent_state: None,
        }
    }

    /// Carried control state.
    pub fn agent_state(&self) -> Option<&ControlState> {
        self.agent_state.as_ref()
    }
}

/// Run `agent` on `envs` until `limit` is reached.
///
/// Every instance whose episode ended is reset before the next step and the
/// agent sees `reset[i] = true` for it. The first transition of a recorded
/// episode is the reset observation with a zero action.
pub fn simulate<A, E>(agent: &mut A, envs: &mut [E], limit: Limit, state: Option<SimState>) -> Result<SimState>
where
    A: Agent + ?Sized,
    E: Environment,
{
    let n = envs.len();
    let mut sim = state.filter(|s| s.done.len() == n).unwrap_or_else(|| SimState::new(n));
    if n == 0 {
        return Ok(sim);
    }

    while limit.pending(sim.steps, sim.episodes) {
        let reset = sim.done.clone();
        for (i, env) in envs.iter_mut().enumerate() {
            if reset[i] {
                let obs = env.reset();
                sim.buffers[i] = vec![Transition {
                    observation: obs.clone(),
                    action: vec![0.0; env.action_space().dim()],
                    ..Transition::default()
                }];
                sim.obs[i] = obs;
                sim.length[i] = 0;
            }
        }

        let (out, agent_state) = agent.act(&sim.obs, &reset, sim.agent_state.take());
        sim.agent_state = agent_state;

        for (i, env) in envs.iter_mut().enumerate() {
            let action = out.action.get(i).cloned().unwrap_or_default();
            let result = env.step(&action);
            sim.buffers[i].push(Transition {
                observation: result.observation.clone(),
                action,
                reward: result.reward,
                cost: result.cost,
                switched: out.switched.get(i).copied().unwrap_or(false),
            });
            sim.obs[i] = result.observation;
            sim.done[i] = result.done;
            sim.length[i] += 1;
            if result.done {
                sim.episodes += 1;
                sim.steps += sim.length[i];
                let record = EpisodeRecord::new(std::mem::take(&mut sim.buffers[i]));
                agent.record_episode(record)?;
            }
        }
    }

    match limit {
        Limit::Steps(n) => sim.steps -= n.min(sim.steps),
        Limit::Episodes(n) => sim.episodes -= n.min(sim.episodes),
    }
    Ok(sim)
}

/// Close every environment, logging and discarding failures.
pub fn close_all<E: Environment>(envs: &mut [E]) {
    for env in envs.iter_mut() {
        if let Err(e) = env.close() {
            log::debug!("ignoring environment close failure: {e}");
        }
    }
}

/// Prefill, restore, then alternate one evaluation episode with `eval_every`
/// training steps (checkpointing after each cycle) until `steps` is reached.
/// Environments are closed on the way out, whatever the outcome.
pub fn run_training<M, P, T, E>(agent: &mut ControlLoop<M, P, T>, train_envs: &mut [E], eval_envs: &mut [E]) -> Result<()>
where
    M: LatentModel,
    P: PolicySource,
    T: Trainer,
    E: Environment,
{
    let result = training_cycle(agent, train_envs, eval_envs);
    close_all(train_envs);
    close_all(eval_envs);
    result
}

fn training_cycle<M, P, T, E>(agent: &mut ControlLoop<M, P, T>, train_envs: &mut [E], eval_envs: &mut [E]) -> Result<()>
where
    M: LatentModel,
    P: PolicySource,
    T: Trainer,
    E: Environment,
{
    if train_envs.is_empty() || eval_envs.is_empty() {
        return Err(Error::config("training needs at least one train and one eval environment"));
    }
    let cfg = agent.config().clone();
    let space = cfg.action_space.clone();

    let prefill = cfg.prefill.saturating_sub(agent.train_cache().snapshot() as u64);
    if prefill > 0 {
        log::info!("prefill dataset ({prefill} steps)");
        let mut random = RandomAgent::new(agent.agent(Mode::Train), space.clone(), cfg.seed ^ 0xF111);
        simulate(&mut random, train_envs, Limit::Steps(prefill), None)?;
    }
    if agent.eval_cache().is_empty() {
        let mut random = RandomAgent::new(agent.agent(Mode::Eval), space, cfg.seed ^ 0xE7A1);
        simulate(&mut random, eval_envs, Limit::Episodes(1), None)?;
    }

    #[cfg(feature = "serde")]
    if agent.restore_checkpoint()? {
        log::info!("restored checkpoint; skipping pretraining");
    }

    let total = cfg.steps / cfg.action_repeat;
    let chunk = (cfg.eval_every / cfg.action_repeat).max(1);
    let mut state: Option<SimState> = None;
    while agent.step_count() < total {
        log::info!("start evaluation at step {}", agent.env_step());
        simulate(&mut agent.agent(Mode::Eval), eval_envs, Limit::Episodes(1), None)?;
        log::info!("start training");
        state = Some(simulate(&mut agent.agent(Mode::Train), train_envs, Limit::Steps(chunk), state)?);
        #[cfg(feature = "serde")]
        agent.save_checkpoint()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Episode of fixed length; observation is the step index.
    struct Countdown {
        len: u32,
        t: u32,
        closed: bool,
    }

    impl Environment for Countdown {
        fn action_space(&self) -> ActionSpace {
            ActionSpace::unit_box(1)
        }
        fn reset(&mut self) -> Vec<f32> {
            self.t = 0;
            vec![0.0]
        }
        fn step(&mut self, _action: &[f32]) -> EnvStep {
            self.t += 1;
            EnvStep {
                observation: vec![self.t as f32],
                reward: 1.0,
                cost: 0.5,
                done: self.t >= self.len,
            }
        }
        fn close(&mut self) -> Result<()> {
            self.closed = true;
            Err(Error::EnvTeardown("already gone".into()))
        }
    }

    #[derive(Default)]
    struct Recorder {
        episodes: Vec<EpisodeRecord>,
        resets_seen: Vec<Vec<bool>>,
    }

    impl Agent for Recorder {
        fn act(&mut self, obs: &Rows, reset: &[bool], _: Option<ControlState>) -> (PolicyOutput, Option<ControlState>) {
            self.resets_seen.push(reset.to_vec());
            let out = PolicyOutput {
                action: vec![vec![0.25]; obs.len()],
                log_prob: vec![0.0; obs.len()],
                switched: vec![true; obs.len()],
                verdicts: Vec::new(),
            };
            (out, None)
        }
        fn record_episode(&mut self, record: EpisodeRecord) -> Result<()> {
            self.episodes.push(record);
            Ok(())
        }
    }

    fn envs(lens: &[u32]) -> Vec<Countdown> {
        lens.iter()
            .map(|&len| Countdown {
                len,
                t: 0,
                closed: false,
            })
            .collect()
    }

    #[test]
    fn episodes_start_with_the_reset_observation() {
        let mut agent = Recorder::default();
        let mut e = envs(&[3]);
        simulate(&mut agent, &mut e, Limit::Episodes(1), None).unwrap();
        let ep = &agent.episodes[0];
        assert_eq!(ep.length(), 3);
        assert_eq!(ep.steps()[0].action, vec![0.0]);
        assert_eq!(ep.steps()[0].reward, 0.0);
        assert_eq!(ep.steps()[1].action, vec![0.25]);
        assert_eq!(ep.summary().total_cost, 1.5);
        assert_eq!(ep.summary().total_switches, 3);
    }

    #[test]
    fn resets_are_reported_per_instance() {
        let mut agent = Recorder::default();
        let mut e = envs(&[1, 3]);
        simulate(&mut agent, &mut e, Limit::Episodes(2), None).unwrap();
        assert_eq!(agent.resets_seen[0], vec![true, true]);
        assert_eq!(agent.resets_seen[1], vec![true, false]);
    }

    #[test]
    fn step_limit_carries_overshoot() {
        let mut agent = Recorder::default();
        let mut e = envs(&[4]);
        let s = simulate(&mut agent, &mut e, Limit::Steps(6), None).unwrap();
        // Two episodes of 4 transitions: 8 - 6.
        assert_eq!(s.steps, 2);
        assert_eq!(agent.episodes.len(), 2);
    }

    #[test]
    fn close_failures_are_swallowed() {
        let mut e = envs(&[1, 1]);
        close_all(&mut e);
        assert!(e.iter().all(|env| env.closed));
    }

    #[test]
    fn random_agent_records_through_inner() {
        let mut random = RandomAgent::new(Recorder::default(), ActionSpace::unit_box(1), 0);
        let mut e = envs(&[2]);
        simulate(&mut random, &mut e, Limit::Episodes(1), None).unwrap();
        assert_eq!(random.inner.episodes.len(), 1);
        // Random actions never count as switches.
        assert_eq!(random.inner.episodes[0].summary().total_switches, 0);
    }
}
