use crate::context::{Context, Value};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

pub const DEFAULT_VELOCITY: u8 = 64;

/// Delivery override for live input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Realtime {
    /// Send the note-ons now and leave the release to a later `NoteOff` event.
    NoteOn,
    /// Send the note-offs now.
    NoteOff,
}

/// A set of simultaneous pitches held for `duration` beats. No pitches
/// means a rest.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub pitches: BTreeSet<u8>,
    pub duration: f64,
    #[serde(default)]
    pub velocity: Option<u8>,
    /// (controller, value) pairs sent when the event starts.
    #[serde(default)]
    pub cc: Vec<(u8, u8)>,
    #[serde(default)]
    pub realtime: Option<Realtime>,
    #[serde(default)]
    pub flags: BTreeMap<String, String>,
}

impl Event {
    pub fn new(pitches: impl IntoIterator<Item = u8>, duration: f64) -> Self {
        Self {
            pitches: pitches.into_iter().collect(),
            duration: duration.max(0.0),
            ..Self::default()
        }
    }

    pub fn note(pitch: u8, duration: f64) -> Self {
        Self::new([pitch], duration)
    }

    pub fn rest(duration: f64) -> Self {
        Self::new([], duration)
    }

    pub fn with_velocity(mut self, velocity: u8) -> Self {
        self.velocity = Some(velocity.min(127));
        self
    }

    pub fn with_cc(mut self, controller: u8, value: u8) -> Self {
        self.cc.push((controller, value));
        self
    }

    pub fn with_realtime(mut self, realtime: Realtime) -> Self {
        self.realtime = Some(realtime);
        self
    }

    pub fn with_flag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.flags.insert(key.into(), value.into());
        self
    }

    pub fn is_rest(&self) -> bool {
        self.pitches.is_empty()
    }

    pub fn velocity_or_default(&self) -> u8 {
        self.velocity.unwrap_or(DEFAULT_VELOCITY)
    }

    /// Duration in beats, with negative or non-finite input treated as zero.
    pub fn beats(&self) -> f64 {
        if self.duration.is_finite() {
            self.duration.max(0.0)
        } else {
            0.0
        }
    }
}

/// The events of one voice, consumed front to back.
///
/// Pulling is destructive. Once the source runs dry the stream stays
/// exhausted, even if the underlying iterator would resume.
pub struct VoiceStream {
    source: Option<Box<dyn Iterator<Item = Event> + Send>>,
    pulled: u64,
}

impl VoiceStream {
    pub fn new<I>(events: I) -> Self
    where
        I: IntoIterator<Item = Event>,
        I::IntoIter: Send + 'static,
    {
        Self {
            source: Some(Box::new(events.into_iter())),
            pulled: 0,
        }
    }

    /// A finite list, played once.
    pub fn from_events(events: Vec<Event>) -> Self {
        Self::new(events)
    }

    /// Loops over `events` forever. An empty list gives an empty stream.
    pub fn cycle(events: Vec<Event>) -> Self {
        if events.is_empty() {
            return Self::empty();
        }
        Self::new(events.into_iter().cycle())
    }

    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnMut() -> Option<Event> + Send + 'static,
    {
        Self::new(std::iter::from_fn(f))
    }

    pub fn empty() -> Self {
        Self {
            source: None,
            pulled: 0,
        }
    }

    pub fn pull_next(&mut self) -> Option<Event> {
        let event = self.source.as_mut()?.next();
        match event {
            Some(event) => {
                self.pulled += 1;
                Some(event)
            }
            None => {
                self.source = None;
                None
            }
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.source.is_none()
    }

    /// Number of events pulled so far.
    pub fn pulled(&self) -> u64 {
        self.pulled
    }

    /// Applies `f` to every event as it is pulled.
    pub fn transform<F>(self, f: F) -> Self
    where
        F: FnMut(Event) -> Event + Send + 'static,
    {
        Self::new(Iterator::map(self, f))
    }

    /// Ends the stream after at most `n` more events.
    pub fn limit(self, n: usize) -> Self {
        Self::new(Iterator::take(self, n))
    }
}

impl Iterator for VoiceStream {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        self.pull_next()
    }
}

impl FromIterator<Event> for VoiceStream {
    fn from_iter<I: IntoIterator<Item = Event>>(iter: I) -> Self {
        Self::from_events(iter.into_iter().collect())
    }
}

impl fmt::Debug for VoiceStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoiceStream")
            .field("pulled", &self.pulled)
            .field("exhausted", &self.is_exhausted())
            .finish()
    }
}

/// Builds events from parameters resolved against the live context each
/// time the next event is pulled.
#[derive(Debug, Clone)]
pub struct Generator {
    context: Arc<Context>,
    pitches: Value<Vec<u8>>,
    duration: Value<f64>,
    velocity: Value<u8>,
    remaining: Option<usize>,
}

impl Generator {
    pub fn new(context: Arc<Context>) -> Self {
        Self {
            context,
            pitches: Value::Constant(vec![60]),
            duration: Value::Constant(1.0),
            velocity: Value::Constant(DEFAULT_VELOCITY),
            remaining: None,
        }
    }

    pub fn pitches(mut self, pitches: impl Into<Value<Vec<u8>>>) -> Self {
        self.pitches = pitches.into();
        self
    }

    pub fn duration(mut self, duration: impl Into<Value<f64>>) -> Self {
        self.duration = duration.into();
        self
    }

    pub fn velocity(mut self, velocity: impl Into<Value<u8>>) -> Self {
        self.velocity = velocity.into();
        self
    }

    /// Stop after `n` events. Unlimited by default.
    pub fn limit(mut self, n: usize) -> Self {
        self.remaining = Some(n);
        self
    }

    pub fn into_stream(self) -> VoiceStream {
        VoiceStream::new(self)
    }
}

impl Iterator for Generator {
    type Item = Event;

    fn next(&mut self) -> Option<Event> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return None;
            }
            *remaining -= 1;
        }
        let ctx = &self.context;
        Some(
            Event::new(self.pitches.resolve(ctx), self.duration.resolve(ctx))
                .with_velocity(self.velocity.resolve(ctx)),
        )
    }
}
