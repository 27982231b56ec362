//! The playback scheduler.
//!
//! Voices are fed in one event at a time through [`Scheduler::enqueue`].
//! Each event turns into note-on, note-off and controller actions plus one
//! re-evaluation action at the event's release time, all kept in a single
//! priority queue ordered by `(time, insertion)`. A dedicated thread pops
//! due actions and dispatches them.
//!
//! Re-evaluation is what pulls the next event of a voice. In
//! [`EvalMode::AheadOfTime`] it is handed back to the caller through
//! [`Scheduler::reevaluations`] as soon as it reaches the head of the
//! queue, so the timing thread never waits on voice generation. In
//! [`EvalMode::JustInTime`] the scheduler thread waits until the action is
//! due and pulls the next event itself, so the voice sees the live state
//! of every other voice.
//!
//! A voice coming back from re-evaluation goes through
//! [`Scheduler::resume`], which queues even actions that are already due.
//! They land behind everything else due at the same time, so both modes
//! dispatch the same sequence.

use super::dispatch::Dispatcher;
use super::{LatencyStats, Realtime, VoiceStream};
use crate::VoiceId;
use crate::context::Context;
use crate::events::{Action, MidiMessage, ScheduledAction};
use crate::sinks::PlaybackSink;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EvalMode {
    #[default]
    AheadOfTime,
    JustInTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Created,
    Running,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub mode: EvalMode,
    /// Maximum number of pending actions. `None` for unbounded.
    ///
    /// This is a soft bound: it is checked once before an event is pulled,
    /// and the event's actions are then queued in full. One event adds two
    /// actions per pitch, one per controller and a re-evaluation.
    pub queue_size: Option<usize>,
    /// Longest uninterrupted wait of the scheduler thread, and the receive
    /// timeout of the re-evaluation iterator.
    pub poll_interval: Duration,
    /// Dispatches later than this are logged.
    pub latency_warn: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            mode: EvalMode::AheadOfTime,
            queue_size: None,
            poll_interval: Duration::from_millis(1),
            latency_warn: Duration::from_millis(10),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("event queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },
    #[error("scheduler was already started")]
    AlreadyStarted,
    #[error("sink panicked: {0}")]
    SinkPanicked(String),
    #[error("failed to spawn scheduler thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// A voice whose next event should now be pulled and enqueued at
/// `fire_time`.
#[derive(Debug)]
pub struct Reevaluation {
    pub voice: VoiceId,
    pub stream: VoiceStream,
    pub fire_time: f64,
}

/// What happens to actions whose time has already come.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Due {
    Dispatch,
    Queue,
}

#[derive(Default)]
struct Queue {
    heap: BinaryHeap<Reverse<ScheduledAction>>,
    next_seq: u64,
}

impl Queue {
    fn push(&mut self, time: f64, action: Action) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(ScheduledAction { time, seq, action }));
    }
}

struct Shared {
    context: Arc<Context>,
    options: SchedulerOptions,
    queue: Mutex<Queue>,
    wake: Condvar,
    dispatcher: Dispatcher,
    running: AtomicBool,
    interrupt: Arc<AtomicBool>,
    state: Mutex<SchedulerState>,
    /// Voices whose stream is held by a pending or forwarded re-evaluation.
    live_voices: AtomicUsize,
    handoff_tx: Sender<Reevaluation>,
    handoff_rx: Receiver<Reevaluation>,
    thread: Mutex<Option<JoinHandle<()>>>,
    failure: Mutex<Option<String>>,
}

impl Shared {
    fn should_run(&self) -> bool {
        self.running.load(Ordering::Acquire) && !self.interrupt.load(Ordering::Acquire)
    }

    /// Records the first failure and stops the loop.
    fn fail(&self, reason: String) {
        self.failure.lock().get_or_insert(reason);
        self.running.store(false, Ordering::Release);
        self.wake.notify_all();
    }
}

/// Cloneable handle to one scheduler.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    pub fn new(context: Arc<Context>, options: SchedulerOptions) -> Self {
        Self::with_interrupt(context, options, Arc::new(AtomicBool::new(false)))
    }

    /// Like [`Scheduler::new`], stopping cooperatively once `interrupt`
    /// becomes `true`.
    pub fn with_interrupt(
        context: Arc<Context>,
        options: SchedulerOptions,
        interrupt: Arc<AtomicBool>,
    ) -> Self {
        let (handoff_tx, handoff_rx) = channel::unbounded();
        let dispatcher = Dispatcher::new(&context);
        Self {
            shared: Arc::new(Shared {
                context,
                options,
                queue: Mutex::new(Queue::default()),
                wake: Condvar::new(),
                dispatcher,
                running: AtomicBool::new(false),
                interrupt,
                state: Mutex::new(SchedulerState::Created),
                live_voices: AtomicUsize::new(0),
                handoff_tx,
                handoff_rx,
                thread: Mutex::new(None),
                failure: Mutex::new(None),
            }),
        }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.shared.context
    }

    pub fn mode(&self) -> EvalMode {
        self.shared.options.mode
    }

    pub fn subscribe(&self, sink: Box<dyn PlaybackSink>) {
        self.shared.dispatcher.subscribe(sink);
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.shared.dispatcher
    }

    /// Pulls the next event of `voice` and schedules it to start at
    /// `offset` seconds into the session.
    ///
    /// Returns `Ok(false)` once the stream is exhausted; nothing is queued
    /// then and the voice is finished. With a bounded queue that is already
    /// full this fails before anything is pulled from `stream`.
    pub fn enqueue(
        &self,
        voice: VoiceId,
        stream: VoiceStream,
        offset: f64,
    ) -> Result<bool, SchedulerError> {
        self.schedule(voice, stream, offset, Due::Dispatch)
    }

    /// Enqueues the next event of a voice handed back by
    /// [`Scheduler::reevaluations`].
    ///
    /// Unlike [`Scheduler::enqueue`], actions that are already due are not
    /// dispatched on the calling thread. They are queued behind the actions
    /// already due at the same time.
    pub fn resume(&self, reevaluation: Reevaluation) -> Result<bool, SchedulerError> {
        let Reevaluation {
            voice,
            stream,
            fire_time,
        } = reevaluation;
        self.schedule(voice, stream, fire_time, Due::Queue)
    }

    fn schedule(
        &self,
        voice: VoiceId,
        mut stream: VoiceStream,
        offset: f64,
        policy: Due,
    ) -> Result<bool, SchedulerError> {
        let shared = &self.shared;
        if let Some(capacity) = shared.options.queue_size {
            if shared.queue.lock().heap.len() >= capacity {
                tracing::warn!(voice, capacity, "event queue full");
                return Err(SchedulerError::QueueFull { capacity });
            }
        }

        let Some(event) = stream.pull_next() else {
            tracing::debug!(voice, "voice exhausted");
            return Ok(false);
        };

        let fire = if offset.is_finite() { offset.max(0.0) } else { 0.0 };
        let release = fire + shared.context.time_scale().beats_to_seconds(event.beats());
        let velocity = event.velocity_or_default();
        let due = policy == Due::Dispatch && fire <= shared.context.elapsed_seconds();

        let mut now: Vec<MidiMessage> = Vec::new();
        let mut later: Vec<(f64, MidiMessage)> = Vec::new();

        let note_ons = event
            .pitches
            .iter()
            .map(|&pitch| MidiMessage::NoteOn { pitch, velocity });
        let note_offs = event
            .pitches
            .iter()
            .map(|&pitch| MidiMessage::NoteOff { pitch });
        let controls = event
            .cc
            .iter()
            .map(|&(controller, value)| MidiMessage::ControlChange { controller, value });

        match event.realtime {
            Some(Realtime::NoteOn) => {
                now.extend(note_ons);
                now.extend(controls);
            }
            Some(Realtime::NoteOff) => {
                now.extend(controls);
                now.extend(note_offs);
            }
            None if due => {
                now.extend(note_ons);
                now.extend(controls);
                later.extend(note_offs.map(|m| (release, m)));
            }
            None => {
                later.extend(note_ons.map(|m| (fire, m)));
                later.extend(controls.map(|m| (fire, m)));
                later.extend(note_offs.map(|m| (release, m)));
            }
        }

        tracing::debug!(
            voice,
            fire,
            release,
            pitches = ?event.pitches,
            immediate = now.len(),
            "enqueue"
        );

        if !now.is_empty() {
            let delivered = panic::catch_unwind(AssertUnwindSafe(|| {
                for message in now {
                    shared.dispatcher.dispatch_now(voice, message);
                }
            }));
            if let Err(payload) = delivered {
                let reason = panic_message(payload.as_ref());
                tracing::error!(voice, %reason, "sink panicked during immediate dispatch");
                shared.fail(reason.clone());
                return Err(SchedulerError::SinkPanicked(reason));
            }
        }

        {
            let mut queue = shared.queue.lock();
            for (time, message) in later {
                queue.push(time, Action::Dispatch { voice, message });
            }
            queue.push(release, Action::ReEvaluate { voice, stream });
            shared.live_voices.fetch_add(1, Ordering::AcqRel);
        }
        shared.wake.notify_all();
        Ok(true)
    }

    /// Voices handed back for re-enqueueing, in ahead-of-time mode.
    ///
    /// Blocks until the next re-evaluation is due for hand-off. Ends once
    /// no voice is left, or when the scheduler stops. Always empty in
    /// just-in-time mode.
    pub fn reevaluations(&self) -> Reevaluations<'_> {
        Reevaluations { scheduler: self }
    }

    /// Starts the scheduler thread.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let mut state = self.shared.state.lock();
        if *state != SchedulerState::Created {
            return Err(SchedulerError::AlreadyStarted);
        }

        self.shared.running.store(true, Ordering::Release);
        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name("tessitura-scheduler".to_string())
            .spawn(move || scheduler_thread(shared));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                *state = SchedulerState::Stopped;
                return Err(e.into());
            }
        };

        *state = SchedulerState::Running;
        *self.shared.thread.lock() = Some(handle);
        tracing::info!(mode = ?self.shared.options.mode, "scheduler started");
        Ok(())
    }

    /// Asks the scheduler thread to stop after its current step.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.wake.notify_all();
    }

    /// Waits up to `timeout` for the scheduler thread to finish. A thread
    /// that overruns is left detached and `false` is returned.
    pub fn join(&self, timeout: Duration) -> bool {
        let Some(handle) = self.shared.thread.lock().take() else {
            return true;
        };
        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                tracing::warn!(?timeout, "scheduler thread did not stop in time, detaching");
                return false;
            }
            thread::sleep(self.shared.options.poll_interval.min(Duration::from_millis(5)));
        }
        if handle.join().is_err() {
            tracing::warn!("scheduler thread panicked outside its loop");
        }
        true
    }

    pub fn is_running(&self) -> bool {
        self.shared.should_run()
    }

    /// Something is still to be played and the thread is still there to
    /// play it. A voice held for re-evaluation counts as pending.
    pub fn has_events(&self) -> bool {
        let queued = !self.shared.queue.lock().heap.is_empty();
        (queued || self.live_voices() > 0) && self.is_running()
    }

    pub fn pending(&self) -> usize {
        self.shared.queue.lock().heap.len()
    }

    pub fn live_voices(&self) -> usize {
        self.shared.live_voices.load(Ordering::Acquire)
    }

    pub fn state(&self) -> SchedulerState {
        *self.shared.state.lock()
    }

    /// Why the scheduler loop ended early, if it did.
    pub fn failure(&self) -> Option<String> {
        self.shared.failure.lock().clone()
    }

    pub fn stats(&self) -> LatencyStats {
        self.shared.context.clock().latency()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("mode", &self.shared.options.mode)
            .field("state", &self.state())
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

pub struct Reevaluations<'a> {
    scheduler: &'a Scheduler,
}

impl Iterator for Reevaluations<'_> {
    type Item = Reevaluation;

    fn next(&mut self) -> Option<Reevaluation> {
        let shared = &self.scheduler.shared;
        if shared.options.mode == EvalMode::JustInTime {
            return None;
        }
        loop {
            if let Ok(reevaluation) = shared.handoff_rx.try_recv() {
                shared.live_voices.fetch_sub(1, Ordering::AcqRel);
                return Some(reevaluation);
            }
            if shared.live_voices.load(Ordering::Acquire) == 0 || !shared.should_run() {
                return None;
            }
            match shared.handoff_rx.recv_timeout(shared.options.poll_interval) {
                Ok(reevaluation) => {
                    shared.live_voices.fetch_sub(1, Ordering::AcqRel);
                    return Some(reevaluation);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }
}

fn scheduler_thread(shared: Arc<Shared>) {
    let started = Instant::now();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| run_loop(&shared, started)));

    if let Err(payload) = outcome {
        let reason = panic_message(payload.as_ref());
        tracing::error!(
            %reason,
            pending = shared.queue.lock().heap.len(),
            elapsed = shared.context.elapsed_seconds(),
            "scheduler loop failed"
        );
        shared.fail(reason);
    }

    shared.running.store(false, Ordering::Release);
    *shared.state.lock() = SchedulerState::Stopped;
    tracing::info!(stats = ?shared.context.clock().latency(), "scheduler stopped");
}

fn run_loop(shared: &Arc<Shared>, started: Instant) {
    let poll = shared.options.poll_interval;
    let tolerance = shared.options.latency_warn.as_secs_f64();
    let mut queue = shared.queue.lock();

    while shared.should_run() {
        let Some(Reverse(head)) = queue.heap.peek() else {
            shared.wake.wait_for(&mut queue, poll);
            continue;
        };
        let time = head.time;
        let reevaluation = head.is_reevaluation();

        if reevaluation && shared.options.mode == EvalMode::AheadOfTime {
            if let Some(Reverse(action)) = queue.heap.pop() {
                forward(shared, action);
            }
            continue;
        }

        let now = started.elapsed().as_secs_f64();
        if time > now {
            let wait = Duration::try_from_secs_f64(time - now).map_or(poll, |w| w.min(poll));
            shared.wake.wait_for(&mut queue, wait);
            continue;
        }

        let Some(Reverse(action)) = queue.heap.pop() else {
            continue;
        };
        let lateness = now - time;
        shared.context.clock().record_dispatch(lateness, tolerance);
        if lateness > tolerance {
            tracing::warn!(
                scheduled = time,
                lateness_ms = lateness * 1000.0,
                "late dispatch"
            );
        }

        match action.action {
            Action::Dispatch { voice, message } => {
                MutexGuard::unlocked(&mut queue, || {
                    shared.dispatcher.dispatch(time, voice, message);
                });
            }
            Action::ReEvaluate { voice, stream } => {
                MutexGuard::unlocked(&mut queue, || reevaluate_inline(shared, voice, stream, time));
                // after the inline enqueue, so the voice never looks finished in between
                shared.live_voices.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }
}

fn forward(shared: &Shared, action: ScheduledAction) {
    let fire_time = action.time;
    if let Action::ReEvaluate { voice, stream } = action.action {
        tracing::debug!(voice, fire_time, "handing off re-evaluation");
        // `Shared` owns the receiver, so the channel cannot be disconnected
        let _ = shared.handoff_tx.send(Reevaluation {
            voice,
            stream,
            fire_time,
        });
    }
}

fn reevaluate_inline(shared: &Arc<Shared>, voice: VoiceId, stream: VoiceStream, time: f64) {
    shared.context.clock().advance_to(time);
    let scheduler = Scheduler {
        shared: shared.clone(),
    };
    let reevaluation = Reevaluation {
        voice,
        stream,
        fire_time: time,
    };
    match scheduler.resume(reevaluation) {
        Ok(true) => {}
        Ok(false) => tracing::debug!(voice, "voice finished"),
        Err(e) => tracing::error!(voice, error = %e, "re-evaluation failed, voice dropped"),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic with a non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::Recording;
    use crate::timing::{Event, TimeScale};

    fn scheduler(bpm: f64, options: SchedulerOptions) -> (Scheduler, Recording) {
        let ctx = Arc::new(Context::new(TimeScale::new(bpm, 1.0)));
        let scheduler = Scheduler::new(ctx, options);
        let recording = Recording::new();
        scheduler.subscribe(Box::new(recording.sink()));
        (scheduler, recording)
    }

    fn queued(scheduler: &Scheduler) -> Vec<(f64, Option<MidiMessage>)> {
        let queue = scheduler.shared.queue.lock();
        let mut actions: Vec<&ScheduledAction> = queue.heap.iter().map(|Reverse(a)| a).collect();
        actions.sort();
        actions
            .into_iter()
            .map(|a| match &a.action {
                Action::Dispatch { message, .. } => (a.time, Some(*message)),
                Action::ReEvaluate { .. } => (a.time, None),
            })
            .collect()
    }

    #[test]
    fn test_enqueue_schedules_release_and_reevaluation() {
        let (scheduler, recording) = scheduler(120.0, SchedulerOptions::default());
        let stream = VoiceStream::from_events(vec![Event::new([60, 64], 1.0).with_velocity(90)]);

        assert!(scheduler.enqueue(0, stream, 2.0).unwrap());
        assert!(recording.is_empty());
        assert_eq!(
            queued(&scheduler),
            vec![
                (2.0, Some(MidiMessage::NoteOn { pitch: 60, velocity: 90 })),
                (2.0, Some(MidiMessage::NoteOn { pitch: 64, velocity: 90 })),
                (2.5, Some(MidiMessage::NoteOff { pitch: 60 })),
                (2.5, Some(MidiMessage::NoteOff { pitch: 64 })),
                (2.5, None),
            ]
        );
        assert_eq!(scheduler.live_voices(), 1);
    }

    #[test]
    fn test_due_event_starts_immediately() {
        let (scheduler, recording) = scheduler(60.0, SchedulerOptions::default());
        let stream = VoiceStream::from_events(vec![Event::note(60, 1.0).with_cc(7, 100)]);

        assert!(scheduler.enqueue(3, stream, 0.0).unwrap());
        assert_eq!(
            recording.messages(),
            vec![
                (3, MidiMessage::NoteOn { pitch: 60, velocity: 64 }),
                (3, MidiMessage::ControlChange { controller: 7, value: 100 }),
            ]
        );
        assert!(scheduler.context().active().contains(60, 3));
        assert_eq!(
            queued(&scheduler),
            vec![(1.0, Some(MidiMessage::NoteOff { pitch: 60 })), (1.0, None)]
        );
    }

    #[test]
    fn test_exhausted_stream_queues_nothing() {
        let (scheduler, recording) = scheduler(60.0, SchedulerOptions::default());
        for _ in 0..3 {
            assert!(!scheduler.enqueue(0, VoiceStream::empty(), 1.0).unwrap());
        }
        assert_eq!(scheduler.pending(), 0);
        assert_eq!(scheduler.live_voices(), 0);
        assert!(recording.is_empty());
    }

    #[test]
    fn test_realtime_flags() {
        let (scheduler, recording) = scheduler(60.0, SchedulerOptions::default());

        let on = VoiceStream::from_events(vec![
            Event::note(60, 1.0).with_realtime(Realtime::NoteOn),
        ]);
        assert!(scheduler.enqueue(0, on, 5.0).unwrap());
        assert_eq!(queued(&scheduler), vec![(6.0, None)]);
        assert!(scheduler.context().active().contains(60, 0));

        let off = VoiceStream::from_events(vec![
            Event::note(60, 0.0).with_realtime(Realtime::NoteOff),
        ]);
        assert!(scheduler.enqueue(1, off, 5.0).unwrap());
        assert_eq!(
            recording.messages(),
            vec![
                (0, MidiMessage::NoteOn { pitch: 60, velocity: 64 }),
                (1, MidiMessage::NoteOff { pitch: 60 }),
            ]
        );
        assert_eq!(queued(&scheduler), vec![(5.0, None), (6.0, None)]);
    }

    #[test]
    fn test_full_queue_rejects_before_pulling() {
        let options = SchedulerOptions {
            queue_size: Some(1),
            ..SchedulerOptions::default()
        };
        let (scheduler, _recording) = scheduler(60.0, options);
        let rest = VoiceStream::from_events(vec![Event::rest(1.0)]);
        assert!(scheduler.enqueue(0, rest, 1.0).unwrap());

        let pulls = Arc::new(AtomicUsize::new(0));
        let counter = pulls.clone();
        let stream = VoiceStream::from_fn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Some(Event::note(60, 1.0))
        });
        let result = scheduler.enqueue(1, stream, 1.0);
        assert!(matches!(result, Err(SchedulerError::QueueFull { capacity: 1 })));
        assert_eq!(pulls.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.pending(), 1);
    }

    #[test]
    fn test_admitted_event_queues_all_its_actions() {
        let options = SchedulerOptions {
            queue_size: Some(1),
            ..SchedulerOptions::default()
        };
        let (scheduler, _recording) = scheduler(60.0, options);
        let chord = VoiceStream::from_events(vec![Event::new([60, 64], 1.0).with_cc(1, 10)]);
        assert!(scheduler.enqueue(0, chord, 1.0).unwrap());
        assert_eq!(scheduler.pending(), 6);

        let next = VoiceStream::from_events(vec![Event::note(67, 1.0)]);
        assert!(matches!(
            scheduler.enqueue(1, next, 1.0),
            Err(SchedulerError::QueueFull { capacity: 1 })
        ));
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let (scheduler, _recording) = scheduler(60.0, SchedulerOptions::default());
        scheduler
            .enqueue(0, VoiceStream::from_events(vec![Event::note(60, 1.0)]), 1.0)
            .unwrap();
        scheduler
            .enqueue(1, VoiceStream::from_events(vec![Event::note(62, 1.0)]), 1.0)
            .unwrap();

        let queue = scheduler.shared.queue.lock();
        let mut order: Vec<(f64, u64)> =
            queue.heap.iter().map(|Reverse(a)| (a.time, a.seq)).collect();
        order.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        assert_eq!(order.first(), Some(&(1.0, 0)));
        assert_eq!(order[1], (1.0, 3));
    }

    #[test]
    fn test_jit_has_no_handoff() {
        let options = SchedulerOptions {
            mode: EvalMode::JustInTime,
            ..SchedulerOptions::default()
        };
        let (scheduler, _recording) = scheduler(60.0, options);
        scheduler
            .enqueue(0, VoiceStream::from_events(vec![Event::note(60, 1.0)]), 1.0)
            .unwrap();
        assert!(scheduler.reevaluations().next().is_none());
    }

    #[test]
    fn test_start_twice_fails() {
        let (scheduler, _recording) = scheduler(60.0, SchedulerOptions::default());
        scheduler.start().unwrap();
        assert!(matches!(scheduler.start(), Err(SchedulerError::AlreadyStarted)));
        scheduler.stop();
        assert!(scheduler.join(Duration::from_secs(2)));
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert!(scheduler.failure().is_none());
    }

    #[test]
    fn test_thread_plays_due_actions_in_order() {
        let (scheduler, recording) = scheduler(6000.0, SchedulerOptions::default());
        let stream = VoiceStream::from_events(vec![Event::note(60, 1.0), Event::note(62, 1.0)]);
        scheduler.enqueue(0, stream, 0.01).unwrap();
        scheduler.start().unwrap();

        let mut handed_off = 0;
        while let Some(r) = scheduler.reevaluations().next() {
            handed_off += 1;
            scheduler.resume(r).unwrap();
        }
        while scheduler.has_events() {
            thread::sleep(Duration::from_millis(1));
        }
        scheduler.stop();
        assert!(scheduler.join(Duration::from_secs(2)));

        assert_eq!(handed_off, 2);
        assert_eq!(
            recording.messages(),
            vec![
                (0, MidiMessage::NoteOn { pitch: 60, velocity: 64 }),
                (0, MidiMessage::NoteOff { pitch: 60 }),
                (0, MidiMessage::NoteOn { pitch: 62, velocity: 64 }),
                (0, MidiMessage::NoteOff { pitch: 62 }),
            ]
        );
        assert!(scheduler.context().active().is_empty());
        assert_eq!(scheduler.stats().dispatched, 4);
    }

    #[test]
    fn test_resume_queues_due_actions() {
        let (scheduler, recording) = scheduler(60.0, SchedulerOptions::default());
        scheduler
            .enqueue(0, VoiceStream::from_events(vec![Event::note(60, 1.0)]), 0.0)
            .unwrap();
        assert_eq!(recording.len(), 1);

        let reevaluation = Reevaluation {
            voice: 1,
            stream: VoiceStream::from_events(vec![Event::note(64, 1.0)]),
            fire_time: 0.0,
        };
        assert!(scheduler.resume(reevaluation).unwrap());
        assert_eq!(recording.len(), 1);
        assert_eq!(
            queued(&scheduler),
            vec![
                (0.0, Some(MidiMessage::NoteOn { pitch: 64, velocity: 64 })),
                (1.0, Some(MidiMessage::NoteOff { pitch: 60 })),
                (1.0, None),
                (1.0, Some(MidiMessage::NoteOff { pitch: 64 })),
                (1.0, None),
            ]
        );
    }

    struct ExplodingSink;

    impl PlaybackSink for ExplodingSink {
        fn note_on(&mut self, _: VoiceId, _: u8, _: u8) {
            panic!("cable pulled");
        }
        fn note_off(&mut self, _: VoiceId, _: u8) {}
        fn control_change(&mut self, _: VoiceId, _: u8, _: u8) {}
    }

    #[test]
    fn test_immediate_dispatch_panic_becomes_failure() {
        let (scheduler, _recording) = scheduler(60.0, SchedulerOptions::default());
        scheduler.subscribe(Box::new(ExplodingSink));

        let stream = VoiceStream::from_events(vec![Event::note(60, 1.0)]);
        match scheduler.enqueue(0, stream, 0.0) {
            Err(SchedulerError::SinkPanicked(reason)) => assert!(reason.contains("cable pulled")),
            other => panic!("expected a sink panic, got {other:?}"),
        }
        assert_eq!(scheduler.pending(), 0);
        assert!(scheduler.failure().is_some_and(|r| r.contains("cable pulled")));
        assert!(!scheduler.has_events());
    }

    #[test]
    fn test_far_future_action_waits_without_failing() {
        let (scheduler, recording) = scheduler(60.0, SchedulerOptions::default());
        let stream = VoiceStream::from_events(vec![Event::note(60, 1.0)]);
        assert!(scheduler.enqueue(0, stream, 1e300).unwrap());
        scheduler.start().unwrap();
        thread::sleep(Duration::from_millis(20));

        assert!(scheduler.is_running());
        scheduler.stop();
        assert!(scheduler.join(Duration::from_secs(2)));
        assert!(scheduler.failure().is_none());
        assert!(recording.is_empty());
    }
}
