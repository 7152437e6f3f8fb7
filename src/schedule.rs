//! Step-driven schedules and cadence trackers.
//!
//! [`Schedule`] values are pure functions of the step: parse once from config,
//! evaluate on demand. [`Every`], [`Once`], and [`Until`] are the small
//! counters the control loop uses to decide when to train, log, reset, and
//! explore.

use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// A scalar hyperparameter as a function of the step.
///
/// String forms: a plain number, `linear(initial,final,duration)`,
/// `warmup(steps,value)`, `exp(initial,final,halflife)`,
/// `horizon(initial,final,duration)` (returns the discount `1 - 1/h`).
///
/// Serialized as the string form.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub enum Schedule {
    Constant(f64),
    Linear { initial: f64, last: f64, duration: f64 },
    Warmup { steps: f64, value: f64 },
    Exp { initial: f64, last: f64, halflife: f64 },
    Horizon { initial: f64, last: f64, duration: f64 },
}

fn clip01(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

impl Schedule {
    /// Value at `step`.
    pub fn value(&self, step: u64) -> f64 {
        let t = step as f64;
        match *self {
            Schedule::Constant(v) => v,
            Schedule::Linear {
                initial,
                last,
                duration,
            } => {
                let mix = clip01(t / duration);
                (1.0 - mix) * initial + mix * last
            }
            Schedule::Warmup { steps, value } => clip01(t / steps) * value,
            Schedule::Exp {
                initial,
                last,
                halflife,
            } => (initial - last) * 0.5f64.powf(t / halflife) + last,
            Schedule::Horizon {
                initial,
                last,
                duration,
            } => {
                let mix = clip01(t / duration);
                let horizon = (1.0 - mix) * initial + mix * last;
                1.0 - 1.0 / horizon
            }
        }
    }
}

impl Default for Schedule {
    fn default() -> Self {
        Schedule::Constant(0.0)
    }
}

fn parse_args<const N: usize>(s: &str, name: &str) -> Option<[f64; N]> {
    let inner = s.strip_prefix(name)?.strip_prefix('(')?.strip_suffix(')')?;
    let mut out = [0.0; N];
    let mut parts = inner.split(',');
    for slot in out.iter_mut() {
        *slot = parts.next()?.trim().parse().ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(out)
}

impl FromStr for Schedule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(v) = s.parse::<f64>() {
            return Ok(Schedule::Constant(v));
        }
        if let Some([initial, last, duration]) = parse_args::<3>(s, "linear") {
            return Ok(Schedule::Linear {
                initial,
                last,
                duration,
            });
        }
        if let Some([steps, value]) = parse_args::<2>(s, "warmup") {
            return Ok(Schedule::Warmup { steps, value });
        }
        if let Some([initial, last, halflife]) = parse_args::<3>(s, "exp") {
            return Ok(Schedule::Exp {
                initial,
                last,
                halflife,
            });
        }
        if let Some([initial, last, duration]) = parse_args::<3>(s, "horizon") {
            return Ok(Schedule::Horizon {
                initial,
                last,
                duration,
            });
        }
        Err(Error::config(format!("unrecognized schedule '{s}'")))
    }
}

impl TryFrom<String> for Schedule {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Schedule> for String {
    fn from(s: Schedule) -> Self {
        s.to_string()
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Constant(v) => write!(f, "{v}"),
            Schedule::Linear {
                initial,
                last,
                duration,
            } => write!(f, "linear({initial},{last},{duration})"),
            Schedule::Warmup { steps, value } => write!(f, "warmup({steps},{value})"),
            Schedule::Exp {
                initial,
                last,
                halflife,
            } => write!(f, "exp({initial},{last},{halflife})"),
            Schedule::Horizon {
                initial,
                last,
                duration,
            } => write!(f, "horizon({initial},{last},{duration})"),
        }
    }
}

/// Fires on the first call and then once per `every` steps.
///
/// `every == 0` never fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Every {
    every: u64,
    last: Option<u64>,
}

impl Every {
    pub fn new(every: u64) -> Self {
        Self { every, last: None }
    }

    pub fn check(&mut self, step: u64) -> bool {
        if self.every == 0 {
            return false;
        }
        match self.last {
            None => {
                self.last = Some(step);
                true
            }
            Some(last) if step >= last.saturating_add(self.every) => {
                self.last = Some(last + self.every);
                true
            }
            Some(_) => false,
        }
    }
}

/// Fires exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Once {
    armed: bool,
}

impl Default for Once {
    fn default() -> Self {
        Self { armed: true }
    }
}

impl Once {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self) -> bool {
        std::mem::replace(&mut self.armed, false)
    }

    /// Whether the next [`check`](Self::check) would fire.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Consume the shot without acting on it.
    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

/// True while `step < until`; `until == 0` means forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Until {
    until: u64,
}

impl Until {
    pub fn new(until: u64) -> Self {
        Self { until }
    }

    pub fn check(&self, step: u64) -> bool {
        self.until == 0 || step < self.until
    }
}
