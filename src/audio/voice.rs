use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdsrConfig {
    /// Seconds
    pub attack: f32,
    /// Seconds
    pub decay: f32,
    /// 0.0 -> 1.0
    pub sustain: f32,
    /// Seconds
    pub release: f32,
}

impl Default for AdsrConfig {
    fn default() -> Self {
        Self {
            attack: 0.005,
            decay: 0.1,
            sustain: 0.7,
            release: 0.15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EnvelopeStage {
    Attack { time: f32 },
    Decay { time: f32 },
    Sustain,
    Release { time: f32, from: f32 },
}

/// One sounding pitch of a channel.
#[derive(Debug, Clone)]
pub struct NoteState {
    pub velocity: u8,
    pub stage: EnvelopeStage,
    pub level: f32,
    pub phases: Vec<f32>,
}

impl NoteState {
    pub fn new(velocity: u8, num_oscillators: usize) -> Self {
        Self {
            velocity,
            stage: EnvelopeStage::Attack { time: 0.0 },
            level: 0.0,
            phases: vec![0.0; num_oscillators],
        }
    }

    pub fn release(&mut self) {
        if !matches!(self.stage, EnvelopeStage::Release { .. }) {
            self.stage = EnvelopeStage::Release {
                time: 0.0,
                from: self.level,
            };
        }
    }

    pub fn is_finished(&self, adsr: &AdsrConfig) -> bool {
        matches!(self.stage, EnvelopeStage::Release { time, .. } if time >= adsr.release)
    }

    /// Moves the envelope forward by `dt` seconds and returns its new level.
    pub fn advance(&mut self, adsr: &AdsrConfig, dt: f32) -> f32 {
        self.level = match &mut self.stage {
            EnvelopeStage::Attack { time } => {
                *time += dt;
                if *time >= adsr.attack {
                    self.stage = EnvelopeStage::Decay { time: 0.0 };
                    1.0
                } else {
                    *time / adsr.attack
                }
            }
            EnvelopeStage::Decay { time } => {
                *time += dt;
                if *time >= adsr.decay {
                    self.stage = EnvelopeStage::Sustain;
                    adsr.sustain
                } else {
                    1.0 - (1.0 - adsr.sustain) * (*time / adsr.decay)
                }
            }
            EnvelopeStage::Sustain => adsr.sustain,
            EnvelopeStage::Release { time, from } => {
                *time += dt;
                if adsr.release <= 0.0 {
                    0.0
                } else {
                    *from * (1.0 - (*time / adsr.release).min(1.0))
                }
            }
        };
        self.level
    }
}
