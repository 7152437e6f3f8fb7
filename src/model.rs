//! Latent-state model seam.
//!
//! The predictive model itself (encoder, recurrent transition, reward/cost
//! heads) lives outside this crate. The control layer only needs the small
//! contract in [`LatentModel`].

use std::collections::BTreeMap;

use rand::RngCore;

/// Row-major batch: one inner vector per parallel environment instance.
pub type Rows = Vec<Vec<f32>>;

/// Field name of the stochastic latent part.
pub const STOCH: &str = "stoch";
/// Field name of the deterministic (recurrent) latent part.
pub const DETER: &str = "deter";
/// Field name of the posterior mean, when the model exposes it.
pub const MEAN: &str = "mean";

/// Zero-filled rows of the given shape.
pub fn zeros(batch: usize, dim: usize) -> Rows {
    vec![vec![0.0; dim]; batch]
}

/// The model's belief at one timestep, batched over environment instances.
///
/// Opaque to the control layer: a named bundle of batched tensors (typically
/// `stoch`, `deter`, and distribution parameters). Every field shares the
/// same batch size.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LatentState {
    fields: BTreeMap<String, Rows>,
}

impl LatentState {
    /// Empty state (no fields).
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field insertion.
    pub fn with_field(mut self, name: impl Into<String>, rows: Rows) -> Self {
        self.fields.insert(name.into(), rows);
        self
    }

    /// Insert or replace a field.
    pub fn insert(&mut self, name: impl Into<String>, rows: Rows) {
        self.fields.insert(name.into(), rows);
    }

    /// Borrow a field.
    pub fn field(&self, name: &str) -> Option<&Rows> {
        self.fields.get(name)
    }

    /// Iterate over `(name, rows)` pairs in name order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Rows)> + '_ {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Batch size (rows of the first field; 0 when empty).
    pub fn batch_size(&self) -> usize {
        self.fields.values().next().map(|r| r.len()).unwrap_or(0)
    }

    /// Zero every field of each row whose `mask` entry is `true`.
    ///
    /// Other rows are untouched; rows beyond `mask.len()` are untouched.
    pub fn zero_rows(&mut self, mask: &[bool]) {
        for rows in self.fields.values_mut() {
            for (row, &reset) in rows.iter_mut().zip(mask) {
                if reset {
                    row.iter_mut().for_each(|x| *x = 0.0);
                }
            }
        }
    }

    /// A sub-batch made of the given row indices, in the given order.
    ///
    /// Out-of-range indices are skipped.
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        let fields = self
            .fields
            .iter()
            .map(|(k, rows)| {
                let picked = indices.iter().filter_map(|&i| rows.get(i).cloned()).collect();
                (k.clone(), picked)
            })
            .collect();
        Self { fields }
    }

    /// Replace the stochastic part by the posterior mean (when both exist).
    ///
    /// Returns whether a substitution happened.
    pub fn use_posterior_mean(&mut self) -> bool {
        match self.fields.get(MEAN).cloned() {
            Some(mean) if self.fields.contains_key(STOCH) => {
                self.fields.insert(STOCH.to_string(), mean);
                true
            }
            _ => false,
        }
    }
}

/// A batched distribution over scalars (e.g. a reward or cost head output).
pub trait ScalarDist {
    /// Point estimate per row.
    fn mode(&self) -> Vec<f32>;

    /// Mean per row (defaults to the mode).
    fn mean(&self) -> Vec<f32> {
        self.mode()
    }
}

/// A degenerate distribution that always returns the stored values.
#[derive(Debug, Clone, PartialEq)]
pub struct PointMass(pub Vec<f32>);

impl ScalarDist for PointMass {
    fn mode(&self) -> Vec<f32> {
        self.0.clone()
    }
}

/// Contract consumed from the learned predictive model.
///
/// Methods take `&self`: the control layer never mutates model parameters.
/// `rng` drives any stochastic latent sampling so runs stay reproducible.
pub trait LatentModel {
    /// Zero/default latent state for `batch_size` instances.
    fn initial(&self, batch_size: usize) -> LatentState;

    /// Encode a batch of raw observations into embeddings.
    fn embed(&self, observations: &Rows) -> Rows;

    /// Posterior update: fold an observation embedding into the state.
    fn obs_step(
        &self,
        state: &LatentState,
        prev_action: &Rows,
        embedding: &Rows,
        sample: bool,
        rng: &mut dyn RngCore,
    ) -> LatentState;

    /// Prior (imagination) transition without an observation.
    fn img_step(
        &self,
        state: &LatentState,
        action: &Rows,
        sample: bool,
        rng: &mut dyn RngCore,
    ) -> LatentState;

    /// Feature vector per row.
    fn get_feat(&self, state: &LatentState) -> Rows;

    /// Cost head over features.
    fn predict_cost(&self, features: &Rows) -> Box<dyn ScalarDist>;

    /// Reward head over features.
    fn predict_reward(&self, features: &Rows) -> Box<dyn ScalarDist>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> LatentState {
        LatentState::new()
            .with_field(STOCH, vec![vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]])
            .with_field(DETER, vec![vec![7.0], vec![8.0], vec![9.0]])
    }

    #[test]
    fn zero_rows_is_index_precise() {
        let mut s = state();
        s.zero_rows(&[false, true, false]);
        assert_eq!(s.field(STOCH).unwrap()[0], vec![1.0, 2.0]);
        assert_eq!(s.field(STOCH).unwrap()[1], vec![0.0, 0.0]);
        assert_eq!(s.field(STOCH).unwrap()[2], vec![5.0, 6.0]);
        assert_eq!(s.field(DETER).unwrap()[1], vec![0.0]);
        assert_eq!(s.field(DETER).unwrap()[2], vec![9.0]);
    }

    #[test]
    fn select_rows_keeps_order_and_skips_out_of_range() {
        let s = state().select_rows(&[2, 0, 9]);
        assert_eq!(s.batch_size(), 2);
        assert_eq!(s.field(DETER).unwrap(), &vec![vec![9.0], vec![7.0]]);
    }

    #[test]
    fn posterior_mean_replaces_stoch_only_when_present() {
        let mut s = state();
        assert!(!s.use_posterior_mean());
        s.insert(MEAN, vec![vec![0.5, 0.5]; 3]);
        assert!(s.use_posterior_mean());
        assert_eq!(s.field(STOCH).unwrap()[0], vec![0.5, 0.5]);
    }
}
