mod clock;
mod dispatch;
mod scheduler;
mod sequence;

pub use clock::{LatencyStats, SessionClock, TimeScale};
pub(crate) use dispatch::Dispatcher;
pub use scheduler::{
    EvalMode, Reevaluation, Reevaluations, Scheduler, SchedulerError, SchedulerOptions,
    SchedulerState,
};
pub use sequence::{DEFAULT_VELOCITY, Event, Generator, Realtime, VoiceStream};
