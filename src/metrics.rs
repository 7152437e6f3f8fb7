//! Metric reporting seam.
//!
//! The control loop reports named scalars and occasional video artifacts to a
//! [`MetricsSink`] and asks it to `write` at a configured cadence. [`LogSink`]
//! is the built-in sink: it emits one `log::info!` line per write.

use std::collections::BTreeMap;

/// Consumer of named scalars and video artifacts.
pub trait MetricsSink {
    /// Record a scalar for the next write.
    fn scalar(&mut self, name: &str, value: f64);

    /// Record a video artifact (one flattened frame per row). Ignored by default.
    fn video(&mut self, name: &str, frames: &[Vec<f32>]) {
        let _ = (name, frames);
    }

    /// Flush everything recorded since the last write, tagged with `step`.
    fn write(&mut self, step: u64);
}

/// Sink that writes pending scalars through the `log` facade.
#[derive(Debug, Clone, Default)]
pub struct LogSink {
    pending: BTreeMap<String, f64>,
    videos: Vec<(String, usize)>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scalars recorded since the last write.
    pub fn pending(&self) -> &BTreeMap<String, f64> {
        &self.pending
    }
}

impl MetricsSink for LogSink {
    fn scalar(&mut self, name: &str, value: f64) {
        self.pending.insert(name.to_string(), value);
    }

    fn video(&mut self, name: &str, frames: &[Vec<f32>]) {
        self.videos.push((name.to_string(), frames.len()));
    }

    fn write(&mut self, step: u64) {
        if self.pending.is_empty() && self.videos.is_empty() {
            return;
        }
        let scalars: Vec<String> = self
            .pending
            .iter()
            .map(|(k, v)| format!("{k} {v:.4}"))
            .collect();
        log::info!("[{step}] {}", scalars.join(" / "));
        for (name, frames) in self.videos.drain(..) {
            log::debug!("[{step}] video {name}: {frames} frames");
        }
        self.pending.clear();
    }
}

/// Per-name accumulator for trainer metrics, flushed as means.
#[derive(Debug, Clone, Default)]
pub struct MetricBuffer {
    values: BTreeMap<String, Vec<f64>>,
}

impl MetricBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &str, value: f64) {
        self.values.entry(name.to_string()).or_default().push(value);
    }

    /// Push every entry of a trainer's metric map.
    pub fn merge<'a, I>(&mut self, metrics: I)
    where
        I: IntoIterator<Item = (&'a String, &'a f32)>,
    {
        for (name, &value) in metrics {
            self.push(name, value as f64);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Mean of the values accumulated under `name`.
    pub fn mean(&self, name: &str) -> Option<f64> {
        let v = self.values.get(name)?;
        if v.is_empty() {
            return None;
        }
        Some(v.iter().sum::<f64>() / v.len() as f64)
    }

    /// Report every mean to `sink` and clear.
    pub fn flush(&mut self, sink: &mut dyn MetricsSink) {
        for (name, values) in std::mem::take(&mut self.values) {
            if values.is_empty() {
                continue;
            }
            sink.scalar(&name, values.iter().sum::<f64>() / values.len() as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_flushes_means_and_clears() {
        let mut buf = MetricBuffer::new();
        buf.push("loss", 1.0);
        buf.push("loss", 3.0);
        buf.push("kl", 0.5);
        assert_eq!(buf.mean("loss"), Some(2.0));

        let mut sink = LogSink::new();
        buf.flush(&mut sink);
        assert!(buf.is_empty());
        assert_eq!(sink.pending().get("loss"), Some(&2.0));
        assert_eq!(sink.pending().get("kl"), Some(&0.5));

        sink.write(10);
        assert!(sink.pending().is_empty());
    }

    #[test]
    fn merge_takes_trainer_maps() {
        let mut m = BTreeMap::new();
        m.insert("actor_loss".to_string(), 0.25f32);
        let mut buf = MetricBuffer::new();
        buf.merge(&m);
        buf.merge(&m);
        assert_eq!(buf.mean("actor_loss"), Some(0.25));
    }
}
