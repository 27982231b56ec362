//! Per-session playback context handed to generators.

use crate::timing::{SessionClock, TimeScale};
use crate::tracker::{ActiveNotes, ActivityTracker};
use std::fmt;
use std::sync::Arc;

/// Time mapping, elapsed time and the live tracker of one playback session.
///
/// A `Sequencer` builds exactly one of these and shares it by `Arc`; there
/// is no process-wide instance.
#[derive(Debug)]
pub struct Context {
    scale: TimeScale,
    clock: Arc<SessionClock>,
    tracker: Arc<ActivityTracker>,
}

impl Context {
    pub fn new(scale: TimeScale) -> Self {
        Self {
            scale,
            clock: Arc::new(SessionClock::new()),
            tracker: Arc::new(ActivityTracker::new()),
        }
    }

    pub fn time_scale(&self) -> TimeScale {
        self.scale
    }

    pub fn bpm(&self) -> f64 {
        self.scale.bpm
    }

    pub fn playback_rate(&self) -> f64 {
        self.scale.rate
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.clock.elapsed()
    }

    pub fn elapsed_beats(&self) -> f64 {
        self.scale.seconds_to_beats(self.clock.elapsed())
    }

    /// What is sounding right now, across all voices.
    pub fn active(&self) -> ActiveNotes {
        self.tracker.snapshot()
    }

    pub(crate) fn clock(&self) -> &Arc<SessionClock> {
        &self.clock
    }

    pub(crate) fn tracker(&self) -> &Arc<ActivityTracker> {
        &self.tracker
    }
}

/// A parameter that is either fixed or computed from the context when used.
pub enum Value<T> {
    Constant(T),
    Computed(Arc<dyn Fn(&Context) -> T + Send + Sync>),
}

impl<T: Clone> Value<T> {
    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(&Context) -> T + Send + Sync + 'static,
    {
        Value::Computed(Arc::new(f))
    }

    pub fn resolve(&self, ctx: &Context) -> T {
        match self {
            Value::Constant(v) => v.clone(),
            Value::Computed(f) => f(ctx),
        }
    }
}

impl<T: Clone> Clone for Value<T> {
    fn clone(&self) -> Self {
        match self {
            Value::Constant(v) => Value::Constant(v.clone()),
            Value::Computed(f) => Value::Computed(f.clone()),
        }
    }
}

impl<T> From<T> for Value<T> {
    fn from(v: T) -> Self {
        Value::Constant(v)
    }
}

impl<T: fmt::Debug> fmt::Debug for Value<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Constant(v) => f.debug_tuple("Constant").field(v).finish(),
            Value::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}
