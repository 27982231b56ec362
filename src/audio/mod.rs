//! A small polyphonic oscillator synth, used by the audio sink.

mod channel;
mod instrument;
mod voice;

pub use channel::{Channel, Synth};
pub use instrument::{Instrument, OscConfig, Wave};
pub use voice::{AdsrConfig, EnvelopeStage, NoteState};

pub fn midi_to_freq(note: u8) -> f32 {
    440.0 * 2.0_f32.powf((note as f32 - 69.0) / 12.0)
}

/// Constant-power pan law, `pan` in `-1.0..=1.0`.
pub fn pan_to_gains(pan: f32) -> (f32, f32) {
    let pan = pan.clamp(-1.0, 1.0);
    let angle = (pan + 1.0) * std::f32::consts::FRAC_PI_4; // 0 to PI/2
    (angle.cos(), angle.sin())
}
