//! Policy seam: action distributions, the primary/safety policy pair, and the
//! exploration behaviors the control loop can switch to while collecting data.
//!
//! The learned actor/critic is external. [`PolicySource`] is the small contract
//! the control loop needs from it; [`RandomPolicy`] is the one built-in source
//! (used for prefill and the `random` exploration behavior).

use rand::{Rng, RngCore};

use crate::Rows;

/// A batched distribution over actions.
pub trait ActionDist {
    /// Most likely action per row.
    fn mode(&self) -> Rows;

    /// One sampled action per row.
    fn sample(&self, rng: &mut dyn RngCore) -> Rows;

    /// Log-probability of `actions` (one value per row).
    fn log_prob(&self, actions: &Rows) -> Vec<f32>;
}

/// Contract consumed from the actor/critic collaborator.
pub trait PolicySource {
    /// Performance-oriented policy.
    fn primary_policy(&self, features: &Rows) -> Box<dyn ActionDist>;

    /// Safety-oriented override policy.
    fn safety_policy(&self, features: &Rows) -> Box<dyn ActionDist>;

    /// Value estimate per row.
    fn value(&self, features: &Rows) -> Vec<f32>;
}

/// Shape of the environment's action space.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ActionSpace {
    /// `n` mutually exclusive actions, encoded one-hot.
    Discrete { n: usize },
    /// Box space with per-dimension bounds.
    Continuous { low: Vec<f32>, high: Vec<f32> },
}

impl ActionSpace {
    /// Symmetric `[-1, 1]^dim` box (the normalized action range).
    pub fn unit_box(dim: usize) -> Self {
        Self::Continuous {
            low: vec![-1.0; dim],
            high: vec![1.0; dim],
        }
    }

    /// Width of an action vector.
    pub fn dim(&self) -> usize {
        match self {
            Self::Discrete { n } => *n,
            Self::Continuous { low, .. } => low.len(),
        }
    }

    /// Whether actions are one-hot encoded.
    pub fn is_discrete(&self) -> bool {
        matches!(self, Self::Discrete { .. })
    }
}

/// Uniform distribution over an [`ActionSpace`], repeated for every row.
#[derive(Debug, Clone)]
pub struct UniformDist {
    space: ActionSpace,
    batch: usize,
}

impl UniformDist {
    pub fn new(space: ActionSpace, batch: usize) -> Self {
        Self { space, batch }
    }
}

impl ActionDist for UniformDist {
    fn mode(&self) -> Rows {
        match &self.space {
            // All actions tie; the first index wins.
            ActionSpace::Discrete { n } => {
                let mut row = vec![0.0; *n];
                if let Some(first) = row.first_mut() {
                    *first = 1.0;
                }
                vec![row; self.batch]
            }
            ActionSpace::Continuous { low, high } => {
                let mid: Vec<f32> = low.iter().zip(high).map(|(l, h)| 0.5 * (l + h)).collect();
                vec![mid; self.batch]
            }
        }
    }

    fn sample(&self, rng: &mut dyn RngCore) -> Rows {
        (0..self.batch)
            .map(|_| match &self.space {
                ActionSpace::Discrete { n } => {
                    let mut row = vec![0.0; *n];
                    if *n > 0 {
                        row[rng.random_range(0..*n)] = 1.0;
                    }
                    row
                }
                ActionSpace::Continuous { low, high } => low
                    .iter()
                    .zip(high)
                    .map(|(&l, &h)| if h > l { rng.random_range(l..h) } else { l })
                    .collect(),
            })
            .collect()
    }

    fn log_prob(&self, actions: &Rows) -> Vec<f32> {
        let lp = match &self.space {
            ActionSpace::Discrete { n } => -((*n).max(1) as f32).ln(),
            ActionSpace::Continuous { low, high } => -low
                .iter()
                .zip(high)
                .map(|(l, h)| (h - l).max(f32::MIN_POSITIVE).ln())
                .sum::<f32>(),
        };
        vec![lp; actions.len()]
    }
}

/// Policy source that ignores features and acts uniformly at random.
#[derive(Debug, Clone)]
pub struct RandomPolicy {
    space: ActionSpace,
}

impl RandomPolicy {
    pub fn new(space: ActionSpace) -> Self {
        Self { space }
    }

    pub fn space(&self) -> &ActionSpace {
        &self.space
    }

    /// Uniform distribution for `batch` rows.
    pub fn dist(&self, batch: usize) -> UniformDist {
        UniformDist::new(self.space.clone(), batch)
    }
}

impl PolicySource for RandomPolicy {
    fn primary_policy(&self, features: &Rows) -> Box<dyn ActionDist> {
        Box::new(self.dist(features.len()))
    }

    fn safety_policy(&self, features: &Rows) -> Box<dyn ActionDist> {
        Box::new(self.dist(features.len()))
    }

    fn value(&self, features: &Rows) -> Vec<f32> {
        vec![0.0; features.len()]
    }
}

/// Configured exploration behavior (the serializable tag).
///
/// A learned exploration policy (e.g. a disagreement-driven explorer) is not a
/// config value; attach it with `ControlLoop::with_explorer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ExplorationKind {
    /// Explore with the task policy itself.
    #[default]
    Greedy,
    /// Explore with uniformly random actions.
    Random,
}

/// Exploration behavior resolved once at construction.
pub enum Exploration {
    /// Reuse the task policy.
    Greedy,
    /// Uniform actions; violated rows fall back to the task safety policy.
    Random(RandomPolicy),
    /// A separately trained exploration policy with its own safety branch.
    Learned(Box<dyn PolicySource>),
}

impl Exploration {
    /// Resolve a configured kind against the environment's action space.
    pub fn resolve(kind: ExplorationKind, space: &ActionSpace) -> Self {
        match kind {
            ExplorationKind::Greedy => Self::Greedy,
            ExplorationKind::Random => Self::Random(RandomPolicy::new(space.clone())),
        }
    }

    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Greedy => "greedy",
            Self::Random(_) => "random",
            Self::Learned(_) => "learned",
        }
    }
}

impl std::fmt::Debug for Exploration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
