use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::{
    VoiceId,
    sequencer::Sequencer,
    sinks::SynthConfig,
    timing::{EvalMode, Event, SchedulerOptions, TimeScale, VoiceStream},
};

#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("failed to read or write session file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse session file: {0}")]
    Parse(#[from] ron::error::SpannedError),
    #[error("failed to serialize session: {0}")]
    Serialize(#[from] ron::Error),
}

/// Playback settings of a session. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub bpm: f64,
    pub playback_rate: f64,
    pub mode: EvalMode,
    /// Bound on pending scheduler actions. Unbounded when absent.
    pub queue_size: Option<usize>,
    pub poll_interval_ms: u64,
    pub completion_poll_ms: u64,
    pub join_timeout_ms: u64,
    pub latency_warn_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bpm: 60.0,
            playback_rate: 1.0,
            mode: EvalMode::AheadOfTime,
            queue_size: None,
            poll_interval_ms: 1,
            completion_poll_ms: 10,
            join_timeout_ms: 500,
            latency_warn_ms: 10,
        }
    }
}

impl SessionConfig {
    pub fn time_scale(&self) -> TimeScale {
        TimeScale::new(self.bpm, self.playback_rate)
    }

    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            mode: self.mode,
            queue_size: self.queue_size,
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            latency_warn: Duration::from_millis(self.latency_warn_ms),
        }
    }

    pub fn completion_poll(&self) -> Duration {
        Duration::from_millis(self.completion_poll_ms.max(1))
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceData {
    #[serde(default)]
    pub name: String,
    /// Fixed voice id. The lowest free id is used when absent.
    #[serde(default)]
    pub voice: Option<VoiceId>,
    /// Start offset, in beats.
    #[serde(default)]
    pub offset: f64,
    /// `None` plays the events once, `Some(0)` loops them forever and
    /// `Some(n)` plays them `n` times.
    #[serde(default)]
    pub repeat: Option<usize>,
    pub events: Vec<Event>,
}

impl VoiceData {
    pub fn stream(&self) -> VoiceStream {
        match self.repeat {
            None => VoiceStream::from_events(self.events.clone()),
            Some(0) => VoiceStream::cycle(self.events.clone()),
            Some(n) => {
                let total = self.events.len().saturating_mul(n);
                VoiceStream::cycle(self.events.clone()).limit(total)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub name: String,
    #[serde(default)]
    pub config: SessionConfig,
    #[serde(default)]
    pub synth: SynthConfig,
    pub voices: Vec<VoiceData>,
}

impl Session {
    pub fn parse(source: &str) -> Result<Self, ProjectError> {
        Ok(ron::from_str(source)?)
    }

    pub fn load(path: &Path) -> Result<Self, ProjectError> {
        let source = fs::read_to_string(path)?;
        let session = Self::parse(&source)?;
        tracing::info!(
            name = %session.name,
            voices = session.voices.len(),
            path = %path.display(),
            "session loaded"
        );
        Ok(session)
    }

    pub fn save(&self, path: &Path) -> Result<(), ProjectError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let source = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(path, source)?;
        Ok(())
    }

    /// A sequencer with every voice of the session registered. Sinks are
    /// left to the caller.
    pub fn sequencer(&self) -> Sequencer {
        let mut sequencer = Sequencer::new(self.config.clone());
        let scale = self.config.time_scale();
        for data in &self.voices {
            let offset = scale.beats_to_seconds(data.offset.max(0.0));
            let voice = sequencer.add_sequence(data.stream(), offset, data.voice);
            tracing::debug!(voice, name = %data.name, offset, "voice registered");
        }
        sequencer
    }
}
