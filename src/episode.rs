//! Completed episodes and their identifiers.

use std::fmt;

use chrono::{DateTime, Utc};

/// One environment step as recorded in an episode.
///
/// The first transition of an episode holds the reset observation with a zero
/// action, zero reward, and zero cost.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Transition {
    pub observation: Vec<f32>,
    pub action: Vec<f32>,
    pub reward: f32,
    pub cost: f32,
    /// The safety branch acted for a reason other than the always-safe override.
    pub switched: bool,
}

/// Derived per-episode scalars.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EpisodeSummary {
    /// Number of transitions after the reset step.
    pub length: usize,
    pub total_reward: f64,
    pub total_cost: f64,
    pub total_switches: u64,
}

impl EpisodeSummary {
    fn of(steps: &[Transition]) -> Self {
        Self {
            length: steps.len().saturating_sub(1),
            total_reward: steps.iter().map(|t| t.reward as f64).sum(),
            total_cost: steps.iter().map(|t| t.cost as f64).sum(),
            total_switches: steps.iter().filter(|t| t.switched).count() as u64,
        }
    }
}

/// An immutable finished episode.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(from = "Vec<Transition>", into = "Vec<Transition>")
)]
pub struct EpisodeRecord {
    steps: Vec<Transition>,
    summary: EpisodeSummary,
}

impl EpisodeRecord {
    pub fn new(steps: Vec<Transition>) -> Self {
        let summary = EpisodeSummary::of(&steps);
        Self { steps, summary }
    }

    pub fn steps(&self) -> &[Transition] {
        &self.steps
    }

    pub fn summary(&self) -> &EpisodeSummary {
        &self.summary
    }

    /// Transition count (`steps - 1`).
    pub fn length(&self) -> usize {
        self.summary.length
    }

    /// Per-step switch flags.
    pub fn switch_flags(&self) -> impl Iterator<Item = bool> + '_ {
        self.steps.iter().map(|t| t.switched)
    }

    /// Observations of every step (frames for a video artifact).
    pub fn frames(&self) -> Vec<Vec<f32>> {
        self.steps.iter().map(|t| t.observation.clone()).collect()
    }
}

impl From<Vec<Transition>> for EpisodeRecord {
    fn from(steps: Vec<Transition>) -> Self {
        Self::new(steps)
    }
}

impl From<EpisodeRecord> for Vec<Transition> {
    fn from(record: EpisodeRecord) -> Self {
        record.steps
    }
}

/// Sortable episode identifier `"<utc stamp>-<seq>-<length>"`.
///
/// Identifiers created later sort greater: the stamp has second resolution
/// and the zero-padded sequence number orders episodes within one second.
/// The trailing length doubles as the on-disk file-name suffix.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EpisodeId(String);

impl EpisodeId {
    const STAMP: &'static str = "%Y%m%dT%H%M%S";

    pub fn new(at: DateTime<Utc>, seq: u64, length: usize) -> Self {
        Self(format!("{}-{seq:06}-{length}", at.format(Self::STAMP)))
    }

    /// Identifier stamped with the current time.
    pub fn now(seq: u64, length: usize) -> Self {
        Self::new(Utc::now(), seq, length)
    }

    /// Identifier stamped `at` that sorts strictly after `prev`.
    ///
    /// When `at` does not move past `prev` (same second, or a clock that went
    /// backwards), `prev`'s stamp is reused with the next sequence number.
    pub fn after(prev: Option<&EpisodeId>, at: DateTime<Utc>, seq: u64, length: usize) -> Self {
        let id = Self::new(at, seq, length);
        let Some(prev) = prev.filter(|p| id <= **p) else {
            return id;
        };
        if let Some((stamp, prev_seq)) = prev.stamp_and_seq() {
            let next = Self(format!("{stamp}-{:06}-{length}", prev_seq.max(seq).saturating_add(1)));
            if next > *prev {
                return next;
            }
        }
        // Sequence overflowed its padding; extending the string still sorts after.
        Self(format!("{prev}-{length}"))
    }

    /// [`EpisodeId::after`] stamped with the current time.
    pub fn now_after(prev: Option<&EpisodeId>, seq: u64, length: usize) -> Self {
        Self::after(prev, Utc::now(), seq, length)
    }

    fn stamp_and_seq(&self) -> Option<(&str, u64)> {
        let mut parts = self.0.splitn(3, '-');
        let stamp = parts.next()?;
        let seq = parts.next()?.parse().ok()?;
        parts.next()?;
        Some((stamp, seq))
    }

    /// Sequence number, when the identifier has the standard layout.
    pub fn seq(&self) -> Option<u64> {
        self.stamp_and_seq().map(|(_, seq)| seq)
    }

    /// Accept a previously produced identifier (e.g. a file stem).
    ///
    /// Returns `None` unless the trailing segment is a length.
    pub fn parse(s: &str) -> Option<Self> {
        let (_, tail) = s.rsplit_once('-')?;
        tail.parse::<usize>().ok()?;
        Some(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Episode length encoded in the identifier.
    pub fn length(&self) -> usize {
        self.0
            .rsplit_once('-')
            .and_then(|(_, tail)| tail.parse().ok())
            .unwrap_or(0)
    }
}

impl fmt::Display for EpisodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn step(reward: f32, cost: f32, switched: bool) -> Transition {
        Transition {
            observation: vec![0.0],
            action: vec![0.0],
            reward,
            cost,
            switched,
        }
    }

    #[test]
    fn summary_counts_transitions_after_reset() {
        let ep = EpisodeRecord::new(vec![
            step(0.0, 0.0, false),
            step(1.0, 0.5, true),
            step(2.0, 0.0, true),
        ]);
        assert_eq!(ep.length(), 2);
        assert_eq!(ep.summary().total_reward, 3.0);
        assert_eq!(ep.summary().total_cost, 0.5);
        assert_eq!(ep.summary().total_switches, 2);
        assert_eq!(EpisodeRecord::new(Vec::new()).length(), 0);
    }

    #[test]
    fn ids_sort_by_recency_and_carry_length() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap();
        let a = EpisodeId::new(t0, 7, 500);
        let b = EpisodeId::new(t0, 8, 12);
        let c = EpisodeId::new(t1, 0, 3);
        assert!(a < b && b < c);
        assert_eq!(a.as_str(), "20240101T000000-000007-500");
        assert_eq!(a.length(), 500);
        assert_eq!(EpisodeId::parse(a.as_str()), Some(a.clone()));
        assert_eq!(EpisodeId::parse("no-length-here"), None);
        assert_eq!(a.seq(), Some(7));
    }

    #[test]
    fn successor_ids_always_sort_later() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 1).unwrap();
        let prev = EpisodeId::new(t1, 2, 40);

        // Same second, restarted sequence.
        let same = EpisodeId::after(Some(&prev), t1, 0, 40);
        assert!(same > prev);
        assert_eq!(same.as_str(), "20240101T000001-000003-40");

        // Clock behind the previous stamp.
        let lagging = EpisodeId::after(Some(&prev), t0, 9, 7);
        assert!(lagging > prev);
        assert_eq!(lagging.as_str(), "20240101T000001-000010-7");
        assert_eq!(lagging.length(), 7);

        // Clock ahead: plain stamp.
        let t5 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 5).unwrap();
        assert_eq!(EpisodeId::after(Some(&prev), t5, 0, 1), EpisodeId::new(t5, 0, 1));
        assert_eq!(EpisodeId::after(None, t0, 4, 1), EpisodeId::new(t0, 4, 1));

        let full = EpisodeId::new(t1, 999_999, 3);
        let next = EpisodeId::after(Some(&full), t1, 0, 3);
        assert!(next > full);
        assert_eq!(next.length(), 3);
    }
}
