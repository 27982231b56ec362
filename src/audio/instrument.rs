use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Wave {
    Sine,
    Square,
    Saw,
    Triangle,
}

impl Wave {
    /// One sample at `phase` in `0.0..1.0`, in `-1.0..=1.0`.
    pub fn sample(self, phase: f32) -> f32 {
        match self {
            Wave::Sine => (phase * std::f32::consts::TAU).sin(),
            Wave::Square => {
                if phase < 0.5 {
                    -1.0
                } else {
                    1.0
                }
            }
            Wave::Saw => phase * 2.0 - 1.0,
            Wave::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OscConfig {
    pub wave: Wave,
    pub gain: f32,
    #[serde(default)]
    pub semitone: i8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub oscillators: Vec<OscConfig>,
}

impl Default for Instrument {
    fn default() -> Self {
        Self {
            oscillators: vec![
                OscConfig {
                    wave: Wave::Triangle,
                    gain: 0.6,
                    semitone: 0,
                },
                OscConfig {
                    wave: Wave::Sine,
                    gain: 0.3,
                    semitone: 12,
                },
            ],
        }
    }
}

impl Instrument {
    pub fn num_oscillators(&self) -> usize {
        self.oscillators.len()
    }
}
