use super::{AdsrConfig, Instrument, NoteState, midi_to_freq, pan_to_gains};
use crate::VoiceId;
use std::collections::HashMap;

pub const CC_VOLUME: u8 = 7;
pub const CC_PAN: u8 = 10;
pub const CC_ALL_SOUND_OFF: u8 = 120;
pub const CC_ALL_NOTES_OFF: u8 = 123;

/// The sounding notes of one voice.
#[derive(Debug, Clone)]
pub struct Channel {
    pub volume: f32,
    pub pan: f32,
    notes: HashMap<u8, NoteState>,
}

impl Default for Channel {
    fn default() -> Self {
        Self {
            volume: 1.0,
            pan: 0.0,
            notes: HashMap::new(),
        }
    }
}

impl Channel {
    pub fn note_on(&mut self, pitch: u8, velocity: u8, instrument: &Instrument) {
        self.notes
            .insert(pitch, NoteState::new(velocity, instrument.num_oscillators()));
    }

    pub fn note_off(&mut self, pitch: u8) {
        if let Some(note) = self.notes.get_mut(&pitch) {
            note.release();
        }
    }

    pub fn release_all(&mut self) {
        self.notes.values_mut().for_each(NoteState::release);
    }

    pub fn control_change(&mut self, controller: u8, value: u8) {
        match controller {
            CC_VOLUME => self.volume = value.min(127) as f32 / 127.0,
            CC_PAN => self.pan = ((value.min(127) as f32 - 64.0) / 63.0).clamp(-1.0, 1.0),
            CC_ALL_SOUND_OFF => self.notes.clear(),
            CC_ALL_NOTES_OFF => self.release_all(),
            _ => {}
        }
    }

    pub fn sounding(&self) -> usize {
        self.notes.len()
    }

    pub fn render_sample(
        &mut self,
        instrument: &Instrument,
        adsr: &AdsrConfig,
        sample_rate: f32,
    ) -> f32 {
        let dt = 1.0 / sample_rate;
        let mut out = 0.0;

        for (&pitch, note) in self.notes.iter_mut() {
            let envelope = note.advance(adsr, dt);
            let velocity_scale = note.velocity as f32 / 127.0;

            for (osc, phase) in instrument.oscillators.iter().zip(note.phases.iter_mut()) {
                let shifted = (pitch as i16 + osc.semitone as i16).clamp(0, 127) as u8;
                out += osc.wave.sample(*phase) * envelope * velocity_scale * osc.gain;

                *phase += midi_to_freq(shifted) / sample_rate;
                if *phase >= 1.0 {
                    *phase -= 1.0;
                }
            }
        }

        self.notes.retain(|_, note| !note.is_finished(adsr));
        out * self.volume
    }
}

/// Mixes one [`Channel`] per voice into an interleaved output buffer.
#[derive(Debug, Clone)]
pub struct Synth {
    pub instrument: Instrument,
    pub adsr: AdsrConfig,
    pub gain: f32,
    sample_rate: f32,
    channels: HashMap<VoiceId, Channel>,
}

impl Synth {
    pub fn new(instrument: Instrument, adsr: AdsrConfig, gain: f32, sample_rate: f32) -> Self {
        Self {
            instrument,
            adsr,
            gain,
            sample_rate: sample_rate.max(1.0),
            channels: HashMap::new(),
        }
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn note_on(&mut self, voice: VoiceId, pitch: u8, velocity: u8) {
        self.channels
            .entry(voice)
            .or_default()
            .note_on(pitch, velocity, &self.instrument);
    }

    pub fn note_off(&mut self, voice: VoiceId, pitch: u8) {
        if let Some(channel) = self.channels.get_mut(&voice) {
            channel.note_off(pitch);
        }
    }

    pub fn control_change(&mut self, voice: VoiceId, controller: u8, value: u8) {
        self.channels
            .entry(voice)
            .or_default()
            .control_change(controller, value);
    }

    pub fn release_all(&mut self) {
        self.channels.values_mut().for_each(Channel::release_all);
    }

    pub fn sounding(&self) -> usize {
        self.channels.values().map(Channel::sounding).sum()
    }

    pub fn channel(&self, voice: VoiceId) -> Option<&Channel> {
        self.channels.get(&voice)
    }

    /// Fills `data`, interleaved with `num_channels` channels per frame.
    pub fn render(&mut self, data: &mut [f32], num_channels: usize) {
        data.fill(0.0);
        if num_channels == 0 {
            return;
        }

        for frame in data.chunks_mut(num_channels) {
            for channel in self.channels.values_mut() {
                let sample = self.gain
                    * channel.render_sample(&self.instrument, &self.adsr, self.sample_rate);
                if frame.len() >= 2 {
                    let (l_gain, r_gain) = pan_to_gains(channel.pan);
                    frame[0] += sample * l_gain;
                    frame[1] += sample * r_gain;
                } else {
                    frame[0] += sample;
                }
            }
        }
    }
}
