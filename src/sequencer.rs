//! Voice registration and the playback driver.

use crate::VoiceId;
use crate::context::Context;
use crate::project::SessionConfig;
use crate::sinks::{PlaybackSink, SinkError};
use crate::timing::{Dispatcher, LatencyStats, Scheduler, SchedulerError, VoiceStream};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum SequencerError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error("scheduler failed: {0}")]
    SchedulerFailed(String),
    #[error("playback already ran for this sequencer")]
    AlreadyPlayed,
    #[error(transparent)]
    Sink(#[from] SinkError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackReport {
    pub interrupted: bool,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
    /// Session time of the last dispatch.
    pub session_seconds: f64,
    pub stats: LatencyStats,
    /// Notes still sounding at the end that had to be released.
    pub released: usize,
    /// Whether the scheduler thread stopped within the join timeout.
    pub joined: bool,
}

struct PendingVoice {
    stream: VoiceStream,
    offset: f64,
}

/// Keeps the sinks open for the duration of one playback.
///
/// Dropping it releases every note still sounding and closes the sinks, on
/// success as well as on error or interrupt.
struct SinkSession<'a> {
    dispatcher: &'a Dispatcher,
    closed: bool,
}

impl<'a> SinkSession<'a> {
    fn open(dispatcher: &'a Dispatcher) -> Result<Self, SinkError> {
        dispatcher.open_all()?;
        Ok(Self {
            dispatcher,
            closed: false,
        })
    }

    fn close(mut self) -> usize {
        self.release()
    }

    fn release(&mut self) -> usize {
        if self.closed {
            return 0;
        }
        self.closed = true;
        let released = self.dispatcher.silence();
        self.dispatcher.close_all();
        released
    }
}

impl Drop for SinkSession<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Stops the scheduler thread and waits for it, however playback ends.
///
/// Declared after the [`SinkSession`], so it is dropped first and the thread
/// is gone before the sinks close.
struct RunningScheduler<'a> {
    scheduler: &'a Scheduler,
    timeout: Duration,
    joined: Option<bool>,
}

impl<'a> RunningScheduler<'a> {
    fn start(scheduler: &'a Scheduler, timeout: Duration) -> Result<Self, SchedulerError> {
        scheduler.start()?;
        Ok(Self {
            scheduler,
            timeout,
            joined: None,
        })
    }

    fn finish(mut self) -> bool {
        self.shutdown()
    }

    fn shutdown(&mut self) -> bool {
        if let Some(joined) = self.joined {
            return joined;
        }
        self.scheduler.stop();
        let joined = self.scheduler.join(self.timeout);
        self.joined = Some(joined);
        joined
    }
}

impl Drop for RunningScheduler<'_> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub struct Sequencer {
    config: SessionConfig,
    context: Arc<Context>,
    scheduler: Scheduler,
    interrupt: Arc<AtomicBool>,
    voices: BTreeMap<VoiceId, PendingVoice>,
    played: bool,
}

impl Sequencer {
    pub fn new(config: SessionConfig) -> Self {
        let context = Arc::new(Context::new(config.time_scale()));
        let interrupt = Arc::new(AtomicBool::new(false));
        let scheduler = Scheduler::with_interrupt(
            context.clone(),
            config.scheduler_options(),
            interrupt.clone(),
        );
        Self {
            config,
            context,
            scheduler,
            interrupt,
            voices: BTreeMap::new(),
            played: false,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The session context, for generators that read live playback state.
    pub fn context(&self) -> Arc<Context> {
        self.context.clone()
    }

    /// Raising this flag makes a running playback wind down and return.
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    pub fn subscribe(&self, sink: Box<dyn PlaybackSink>) {
        self.scheduler.subscribe(sink);
    }

    /// Registers a voice starting `offset` seconds into the session.
    ///
    /// Without an explicit id the lowest unused one is taken. Registering
    /// an id twice replaces the earlier stream.
    pub fn add_sequence(
        &mut self,
        stream: VoiceStream,
        offset: f64,
        voice: Option<VoiceId>,
    ) -> VoiceId {
        let voice = voice.unwrap_or_else(|| {
            (0..)
                .find(|id| !self.voices.contains_key(id))
                .unwrap_or(self.voices.len())
        });
        let offset = if offset.is_finite() { offset.max(0.0) } else { 0.0 };
        if self
            .voices
            .insert(voice, PendingVoice { stream, offset })
            .is_some()
        {
            tracing::warn!(voice, "voice registered twice, replacing");
        }
        voice
    }

    /// Registered voices and their offsets in seconds, by id.
    pub fn voices(&self) -> Vec<(VoiceId, f64)> {
        self.voices
            .iter()
            .map(|(&voice, pending)| (voice, pending.offset))
            .collect()
    }

    pub fn stats(&self) -> LatencyStats {
        self.scheduler.stats()
    }

    /// Plays every registered voice to the end and blocks until done.
    pub fn playback(&mut self) -> Result<PlaybackReport, SequencerError> {
        if self.played {
            return Err(SequencerError::AlreadyPlayed);
        }
        self.played = true;

        let scheduler = self.scheduler.clone();
        let voices = std::mem::take(&mut self.voices);
        let session = SinkSession::open(scheduler.dispatcher())?;
        let started = Instant::now();
        tracing::info!(
            voices = voices.len(),
            mode = ?scheduler.mode(),
            bpm = self.context.bpm(),
            "playback started"
        );

        for (voice, pending) in voices {
            let result = scheduler.enqueue(voice, pending.stream, pending.offset);
            settle(voice, result)?;
        }
        let running = RunningScheduler::start(&scheduler, self.config.join_timeout())?;

        for reevaluation in scheduler.reevaluations() {
            let voice = reevaluation.voice;
            settle(voice, scheduler.resume(reevaluation))?;
        }

        let poll = self.config.completion_poll();
        while scheduler.has_events() {
            std::thread::sleep(poll);
        }

        let joined = running.finish();

        if let Some(reason) = scheduler.failure() {
            return Err(SequencerError::SchedulerFailed(reason));
        }

        let released = session.close();
        let report = PlaybackReport {
            interrupted: self.interrupt.load(Ordering::Acquire),
            elapsed: started.elapsed(),
            session_seconds: self.context.elapsed_seconds(),
            stats: scheduler.stats(),
            released,
            joined,
        };
        tracing::info!(
            interrupted = report.interrupted,
            seconds = report.session_seconds,
            late = report.stats.late,
            "playback finished"
        );
        Ok(report)
    }
}

/// A voice that cannot be enqueued because the queue is full ends there;
/// the rest of the session keeps playing.
fn settle(voice: VoiceId, result: Result<bool, SchedulerError>) -> Result<(), SequencerError> {
    match result {
        Ok(true) => Ok(()),
        Ok(false) => {
            tracing::debug!(voice, "voice finished");
            Ok(())
        }
        Err(SchedulerError::QueueFull { capacity }) => {
            tracing::warn!(voice, capacity, "queue full, voice dropped");
            Ok(())
        }
        Err(SchedulerError::SinkPanicked(reason)) => Err(SequencerError::SchedulerFailed(reason)),
        Err(e) => Err(e.into()),
    }
}
