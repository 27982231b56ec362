use crate::VoiceId;
use crate::context::Context;
use crate::events::MidiMessage;
use crate::sinks::{PlaybackSink, SinkError};
use crate::timing::SessionClock;
use crate::tracker::ActivityTracker;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Fans dispatched messages out to the tracker and every subscribed sink.
///
/// Every write goes through one lock, so sinks and tracker always agree and
/// the session timeline observed by sinks never moves backwards. Once
/// [`Dispatcher::close_all`] has run nothing more is delivered.
pub struct Dispatcher {
    sinks: Mutex<Vec<Box<dyn PlaybackSink>>>,
    closed: AtomicBool,
    tracker: Arc<ActivityTracker>,
    clock: Arc<SessionClock>,
}

impl Dispatcher {
    pub fn new(ctx: &Context) -> Self {
        Self {
            sinks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            tracker: ctx.tracker().clone(),
            clock: ctx.clock().clone(),
        }
    }

    pub fn subscribe(&self, sink: Box<dyn PlaybackSink>) {
        tracing::debug!(sink = sink.name(), "sink subscribed");
        self.sinks.lock().push(sink);
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.lock().len()
    }

    /// Delivers `message` at session time `time` and returns the time it
    /// was stamped with, which is never earlier than a previous dispatch.
    pub fn dispatch(&self, time: f64, voice: VoiceId, message: MidiMessage) -> f64 {
        let mut sinks = self.sinks.lock();
        if self.closed.load(Ordering::Acquire) {
            tracing::debug!(voice, ?message, "dispatch after close dropped");
            return self.clock.elapsed();
        }
        let stamp = self.clock.advance_to(time);

        match message {
            MidiMessage::NoteOn { pitch, velocity } => {
                self.tracker.note_on(voice, pitch, velocity);
            }
            MidiMessage::NoteOff { pitch } => {
                self.tracker.note_off(voice, pitch);
            }
            MidiMessage::ControlChange { .. } => {}
        }

        tracing::trace!(t = stamp, voice, ?message, "dispatch");
        for sink in sinks.iter_mut() {
            sink.set_time(stamp);
            match message {
                MidiMessage::NoteOn { pitch, velocity } => sink.note_on(voice, pitch, velocity),
                MidiMessage::NoteOff { pitch } => sink.note_off(voice, pitch),
                MidiMessage::ControlChange { controller, value } => {
                    sink.control_change(voice, controller, value)
                }
            }
        }
        stamp
    }

    /// Delivers `message` right away, without moving the clock forward.
    pub fn dispatch_now(&self, voice: VoiceId, message: MidiMessage) -> f64 {
        self.dispatch(0.0, voice, message)
    }

    /// Opens every sink. On failure the sinks opened so far are closed
    /// again before the error is returned.
    pub fn open_all(&self) -> Result<(), SinkError> {
        let mut sinks = self.sinks.lock();
        for idx in 0..sinks.len() {
            if let Err(e) = sinks[idx].open() {
                tracing::error!(sink = sinks[idx].name(), error = %e, "failed to open sink");
                for opened in sinks[..idx].iter_mut().rev() {
                    if let Err(e) = opened.close() {
                        tracing::warn!(sink = opened.name(), error = %e, "failed to close sink");
                    }
                }
                return Err(e);
            }
        }
        self.closed.store(false, Ordering::Release);
        tracing::debug!(count = sinks.len(), "sinks opened");
        Ok(())
    }

    pub fn close_all(&self) {
        let mut sinks = self.sinks.lock();
        self.closed.store(true, Ordering::Release);
        for sink in sinks.iter_mut() {
            if let Err(e) = sink.close() {
                tracing::warn!(sink = sink.name(), error = %e, "failed to close sink");
            }
        }
        tracing::debug!(count = sinks.len(), "sinks closed");
    }

    /// Releases everything the tracker still holds, so no note is left
    /// hanging on a sink. Returns how many notes were released.
    pub fn silence(&self) -> usize {
        let mut sinks = self.sinks.lock();
        let stamp = self.clock.elapsed();
        let hanging = self.tracker.drain();
        for &(pitch, voice) in &hanging {
            for sink in sinks.iter_mut() {
                sink.set_time(stamp);
                sink.note_off(voice, pitch);
            }
        }
        if !hanging.is_empty() {
            tracing::info!(count = hanging.len(), "released hanging notes");
        }
        hanging.len()
    }
}
