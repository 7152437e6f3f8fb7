//! Post-hoc exploration noise on sampled actions.
//!
//! The noise family follows the actor's output distribution: one-hot actors
//! get an epsilon-style mixture with the uniform distribution, continuous
//! actors get Gaussian perturbation clipped to the action-space bounds.
//! The kind is resolved once from the actor-distribution name; unknown names
//! are a configuration error, never a silent fallback.

use rand::distr::weighted::WeightedIndex;
use rand::RngCore;
use rand_distr::{Distribution, Normal};

use crate::{ActionSpace, Error, Result, Rows};

/// Noise family for an actor distribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NoiseKind {
    /// One-hot actions. `straight_through` actors are snapped to their argmax first.
    OneHot { straight_through: bool },
    /// Continuous actions within a box.
    Gaussian,
}

impl NoiseKind {
    /// Resolve from an actor distribution name.
    ///
    /// Recognized: `onehot`, `onehot_gumble`, `normal`, `normal_1`,
    /// `trunc_normal`, `tanh_normal`, `tanh_normal_5`.
    pub fn from_actor_dist(name: &str) -> Result<Self> {
        match name {
            "onehot" => Ok(Self::OneHot {
                straight_through: false,
            }),
            "onehot_gumble" => Ok(Self::OneHot {
                straight_through: true,
            }),
            "normal" | "normal_1" | "trunc_normal" | "tanh_normal" | "tanh_normal_5" => Ok(Self::Gaussian),
            other => Err(Error::config(format!("unrecognized actor distribution '{other}'"))),
        }
    }
}

/// One-hot vector of width `n` at `index`.
pub fn one_hot(index: usize, n: usize) -> Vec<f32> {
    let mut row = vec![0.0; n];
    if let Some(x) = row.get_mut(index) {
        *x = 1.0;
    }
    row
}

/// Replace each row by the one-hot of its argmax (first index wins ties).
pub fn argmax_one_hot(actions: &Rows) -> Rows {
    actions
        .iter()
        .map(|row| {
            let mut best = 0;
            for (i, &x) in row.iter().enumerate() {
                if x > row[best] {
                    best = i;
                }
            }
            one_hot(best, row.len())
        })
        .collect()
}

/// Bounds of dimension `d`; `[-1, 1]` outside a continuous box.
fn bounds(space: &ActionSpace, d: usize) -> (f32, f32) {
    match space {
        ActionSpace::Continuous { low, high } => match (low.get(d), high.get(d)) {
            (Some(&lo), Some(&hi)) => (lo, hi),
            _ => (-1.0, 1.0),
        },
        ActionSpace::Discrete { .. } => (-1.0, 1.0),
    }
}

/// Apply exploration noise of the given `amount` to every row.
///
/// Gaussian noise is clipped per dimension to the bounds of `space`.
/// `amount == 0` returns the actions unchanged.
pub fn apply_exploration_noise(
    kind: NoiseKind,
    actions: Rows,
    amount: f32,
    space: &ActionSpace,
    rng: &mut dyn RngCore,
) -> Rows {
    let actions = match kind {
        NoiseKind::OneHot {
            straight_through: true,
        } => argmax_one_hot(&actions),
        _ => actions,
    };
    if amount == 0.0 || !amount.is_finite() {
        return actions;
    }
    match kind {
        NoiseKind::OneHot { .. } => actions
            .into_iter()
            .map(|row| {
                let n = row.len();
                if n == 0 {
                    return row;
                }
                let uniform = amount / n as f32;
                let probs: Vec<f32> = row.iter().map(|&a| uniform + (1.0 - amount) * a.max(0.0)).collect();
                match WeightedIndex::new(&probs) {
                    Ok(dist) => one_hot(dist.sample(rng), n),
                    Err(_) => row,
                }
            })
            .collect(),
        NoiseKind::Gaussian => {
            let Ok(normal) = Normal::new(0.0f32, amount.abs()) else {
                return actions;
            };
            actions
                .into_iter()
                .map(|row| {
                    row.into_iter()
                        .enumerate()
                        .map(|(d, a)| {
                            let (lo, hi) = bounds(space, d);
                            (a + normal.sample(rng)).max(lo).min(hi)
                        })
                        .collect()
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn unit(dim: usize) -> ActionSpace {
        ActionSpace::unit_box(dim)
    }

    #[test]
    fn unknown_actor_distribution_is_a_config_error() {
        assert!(matches!(NoiseKind::from_actor_dist("beta"), Err(Error::Config(_))));
        assert_eq!(NoiseKind::from_actor_dist("trunc_normal").unwrap(), NoiseKind::Gaussian);
    }

    #[test]
    fn zero_amount_is_a_no_op() {
        let mut rng = StdRng::seed_from_u64(0);
        let a = vec![vec![0.3, -0.2]];
        assert_eq!(apply_exploration_noise(NoiseKind::Gaussian, a.clone(), 0.0, &unit(2), &mut rng), a);
    }

    #[test]
    fn gaussian_noise_is_clipped() {
        let mut rng = StdRng::seed_from_u64(1);
        let out = apply_exploration_noise(NoiseKind::Gaussian, vec![vec![0.99; 64]], 5.0, &unit(64), &mut rng);
        assert!(out[0].iter().all(|x| (-1.0..=1.0).contains(x)));
        assert!(out[0].iter().any(|&x| x != 0.99));
    }

    #[test]
    fn gaussian_noise_respects_wide_bounds() {
        let mut rng = StdRng::seed_from_u64(4);
        let space = ActionSpace::Continuous {
            low: vec![0.0, -1.0],
            high: vec![10.0, 1.0],
        };
        let out = apply_exploration_noise(NoiseKind::Gaussian, vec![vec![5.0, 0.5]; 64], 0.01, &space, &mut rng);
        for row in &out {
            assert!((row[0] - 5.0).abs() < 0.1, "first dimension clipped: {}", row[0]);
            assert!((-1.0..=1.0).contains(&row[1]));
        }

        let out = apply_exploration_noise(NoiseKind::Gaussian, vec![vec![9.9, 0.0]; 64], 50.0, &space, &mut rng);
        assert!(out.iter().all(|r| (0.0..=10.0).contains(&r[0])));
        assert!(out.iter().any(|r| r[0] > 1.0));
    }

    #[test]
    fn one_hot_noise_keeps_one_hot_rows() {
        let mut rng = StdRng::seed_from_u64(2);
        let kind = NoiseKind::OneHot {
            straight_through: false,
        };
        let out = apply_exploration_noise(kind, vec![one_hot(1, 5); 32], 0.5, &ActionSpace::Discrete { n: 5 }, &mut rng);
        for row in &out {
            assert_eq!(row.iter().sum::<f32>(), 1.0);
        }
        // With a 50% uniform mix, some rows leave index 1.
        assert!(out.iter().any(|r| r[1] == 0.0));
    }

    #[test]
    fn full_noise_on_one_hot_is_uniform_support() {
        let mut rng = StdRng::seed_from_u64(3);
        let kind = NoiseKind::OneHot {
            straight_through: false,
        };
        let out = apply_exploration_noise(kind, vec![one_hot(0, 3); 300], 1.0, &ActionSpace::Discrete { n: 3 }, &mut rng);
        for i in 0..3 {
            assert!(out.iter().any(|r| r[i] == 1.0), "index {i} never drawn");
        }
    }

    #[test]
    fn straight_through_snaps_to_argmax_even_without_noise() {
        let mut rng = StdRng::seed_from_u64(0);
        let kind = NoiseKind::OneHot {
            straight_through: true,
        };
        let out = apply_exploration_noise(kind, vec![vec![0.2, 0.7, 0.1]], 0.0, &ActionSpace::Discrete { n: 3 }, &mut rng);
        assert_eq!(out, vec![vec![0.0, 1.0, 0.0]]);
    }
}
