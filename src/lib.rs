//! Real-time playback of algorithmic music.
//!
//! Voices are streams of [`Event`]s. The [`Sequencer`] registers them and
//! drives a [`Scheduler`], which turns every voice into time-ordered note
//! and controller messages delivered to one or more [`PlaybackSink`]s
//! from a dedicated timing thread.
//!
//! The next event of a voice is pulled either ahead of time, handed back to
//! the thread that called [`Sequencer::playback`], or just in time on the
//! scheduler thread. Just-in-time voices see the live state of the session
//! through the [`Context`]: elapsed time and every note currently sounding.
//!
//! [`PlaybackSink`]: sinks::PlaybackSink

pub mod audio;
pub mod context;
pub mod events;
pub mod project;
pub mod sequencer;
pub mod sinks;
pub mod timing;
pub mod tracker;

/// Identifies one voice of a session.
pub type VoiceId = usize;

pub use context::{Context, Value};
pub use events::MidiMessage;
pub use project::{ProjectError, Session, SessionConfig, VoiceData};
pub use sequencer::{PlaybackReport, Sequencer, SequencerError};
pub use timing::{
    EvalMode, Event, Generator, Realtime, Reevaluation, Scheduler, SchedulerError,
    SchedulerOptions, TimeScale, VoiceStream,
};
pub use tracker::{ActiveNotes, ActivityTracker};
