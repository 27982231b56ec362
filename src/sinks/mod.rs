//! Playback sinks: where dispatched notes end up.
//!
//! The scheduler talks to any number of [`PlaybackSink`]s. Calls arrive
//! serialized, one at a time, so implementations need no locking of their
//! own. `open` runs before the first note of a session and `close` after
//! the last one, even when playback ends in an error or an interrupt.

mod midi;
mod synth;

pub use midi::{MidiOutSink, PortSelector, encode, list_midi_outputs};
pub use synth::{SynthConfig, SynthSink};

use crate::VoiceId;
use crate::events::MidiMessage;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("no output device available")]
    NoDevice,
    #[error("audio device error: {0}")]
    Device(String),
    #[error("MIDI error: {0}")]
    Midi(String),
    #[error("no MIDI output port matching '{0}'")]
    PortNotFound(String),
    #[error("sink thread failed: {0}")]
    Thread(String),
}

pub trait PlaybackSink: Send {
    fn name(&self) -> &str {
        "sink"
    }

    fn open(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Session time, in seconds, of the calls that follow.
    fn set_time(&mut self, _seconds: f64) {}

    fn note_on(&mut self, voice: VoiceId, pitch: u8, velocity: u8);

    fn note_off(&mut self, voice: VoiceId, pitch: u8);

    fn control_change(&mut self, voice: VoiceId, controller: u8, value: u8);
}

/// One message as delivered to a sink.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dispatched {
    pub time: f64,
    pub voice: VoiceId,
    pub message: MidiMessage,
}

#[derive(Debug, Default)]
struct RecordingState {
    entries: Vec<Dispatched>,
    opened: usize,
    closed: usize,
}

/// Shared handle onto what a [`RecordingSink`] captured.
#[derive(Debug, Clone, Default)]
pub struct Recording {
    state: Arc<Mutex<RecordingState>>,
}

impl Recording {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sink(&self) -> RecordingSink {
        RecordingSink {
            recording: self.clone(),
            now: 0.0,
        }
    }

    pub fn entries(&self) -> Vec<Dispatched> {
        self.state.lock().entries.clone()
    }

    pub fn messages(&self) -> Vec<(VoiceId, MidiMessage)> {
        self.state
            .lock()
            .entries
            .iter()
            .map(|d| (d.voice, d.message))
            .collect()
    }

    pub fn for_voice(&self, voice: VoiceId) -> Vec<Dispatched> {
        self.state
            .lock()
            .entries
            .iter()
            .filter(|d| d.voice == voice)
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Times `open` / `close` were called on sinks of this recording.
    pub fn lifecycle(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.opened, state.closed)
    }

    fn push(&self, entry: Dispatched) {
        self.state.lock().entries.push(entry);
    }
}

/// Keeps every dispatched message in memory, stamped with its session time.
#[derive(Debug)]
pub struct RecordingSink {
    recording: Recording,
    now: f64,
}

impl PlaybackSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    fn open(&mut self) -> Result<(), SinkError> {
        self.recording.state.lock().opened += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.recording.state.lock().closed += 1;
        Ok(())
    }

    fn set_time(&mut self, seconds: f64) {
        self.now = seconds;
    }

    fn note_on(&mut self, voice: VoiceId, pitch: u8, velocity: u8) {
        self.recording.push(Dispatched {
            time: self.now,
            voice,
            message: MidiMessage::NoteOn { pitch, velocity },
        });
    }

    fn note_off(&mut self, voice: VoiceId, pitch: u8) {
        self.recording.push(Dispatched {
            time: self.now,
            voice,
            message: MidiMessage::NoteOff { pitch },
        });
    }

    fn control_change(&mut self, voice: VoiceId, controller: u8, value: u8) {
        self.recording.push(Dispatched {
            time: self.now,
            voice,
            message: MidiMessage::ControlChange { controller, value },
        });
    }
}

/// Writes every message to the `tracing` log.
#[derive(Debug, Default)]
pub struct LogSink {
    now: f64,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlaybackSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    fn set_time(&mut self, seconds: f64) {
        self.now = seconds;
    }

    fn note_on(&mut self, voice: VoiceId, pitch: u8, velocity: u8) {
        tracing::info!(t = self.now, voice, pitch, velocity, "note on");
    }

    fn note_off(&mut self, voice: VoiceId, pitch: u8) {
        tracing::info!(t = self.now, voice, pitch, "note off");
    }

    fn control_change(&mut self, voice: VoiceId, controller: u8, value: u8) {
        tracing::info!(t = self.now, voice, controller, value, "cc");
    }
}
