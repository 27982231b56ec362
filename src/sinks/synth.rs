use super::{PlaybackSink, SinkError};
use crate::VoiceId;
use crate::audio::{AdsrConfig, Instrument, Synth};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam::channel::{self, Receiver, Sender};
use ringbuf::{
    HeapCons, HeapProd, HeapRb,
    traits::{Consumer, Producer, Split},
};
use serde::{Deserialize, Serialize};
use std::thread::{self, JoinHandle};

const COMMAND_CAPACITY: usize = 4096;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    pub instrument: Instrument,
    pub adsr: AdsrConfig,
    pub gain: f32,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            instrument: Instrument::default(),
            adsr: AdsrConfig::default(),
            gain: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum SynthCommand {
    NoteOn { voice: VoiceId, pitch: u8, velocity: u8 },
    NoteOff { voice: VoiceId, pitch: u8 },
    Control { voice: VoiceId, controller: u8, value: u8 },
    ReleaseAll,
}

/// Plays notes on the default audio output device.
///
/// A `cpal::Stream` cannot leave the thread that built it, so the stream
/// lives on a dedicated thread. Notes reach the audio callback through a
/// lock-free ring buffer.
pub struct SynthSink {
    config: SynthConfig,
    producer: Option<HeapProd<SynthCommand>>,
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
    dropped: u64,
}

impl SynthSink {
    pub fn new(config: SynthConfig) -> Self {
        Self {
            config,
            producer: None,
            shutdown: None,
            thread: None,
            dropped: 0,
        }
    }

    fn push(&mut self, command: SynthCommand) {
        let Some(producer) = self.producer.as_mut() else {
            return;
        };
        if producer.try_push(command).is_err() {
            self.dropped += 1;
            tracing::warn!(?command, dropped = self.dropped, "synth command buffer full");
        }
    }
}

impl PlaybackSink for SynthSink {
    fn name(&self) -> &str {
        "synth"
    }

    fn open(&mut self) -> Result<(), SinkError> {
        if self.thread.is_some() {
            return Ok(());
        }
        let (producer, consumer) = HeapRb::<SynthCommand>::new(COMMAND_CAPACITY).split();
        let (ready_tx, ready_rx) = channel::bounded(1);
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(1);
        let config = self.config.clone();

        let handle = thread::Builder::new()
            .name("tessitura-synth".to_string())
            .spawn(move || audio_thread(config, consumer, ready_tx, shutdown_rx))
            .map_err(|e| SinkError::Thread(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(SinkError::Thread("audio thread exited during setup".into()));
            }
        }

        self.producer = Some(producer);
        self.shutdown = Some(shutdown_tx);
        self.thread = Some(handle);
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.push(SynthCommand::ReleaseAll);
        self.producer = None;
        // dropping the sender wakes the audio thread
        self.shutdown = None;
        if let Some(handle) = self.thread.take() {
            handle
                .join()
                .map_err(|_| SinkError::Thread("audio thread panicked".into()))?;
        }
        Ok(())
    }

    fn note_on(&mut self, voice: VoiceId, pitch: u8, velocity: u8) {
        self.push(SynthCommand::NoteOn {
            voice,
            pitch,
            velocity,
        });
    }

    fn note_off(&mut self, voice: VoiceId, pitch: u8) {
        self.push(SynthCommand::NoteOff { voice, pitch });
    }

    fn control_change(&mut self, voice: VoiceId, controller: u8, value: u8) {
        self.push(SynthCommand::Control {
            voice,
            controller,
            value,
        });
    }
}

impl Drop for SynthSink {
    fn drop(&mut self) {
        if self.thread.is_some() {
            let _ = self.close();
        }
    }
}

fn audio_thread(
    config: SynthConfig,
    consumer: HeapCons<SynthCommand>,
    ready: Sender<Result<(), SinkError>>,
    shutdown: Receiver<()>,
) {
    let stream = match build_stream(config, consumer) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(()));

    // blocks until the sink closes
    let _ = shutdown.recv();
    drop(stream);
    tracing::debug!("audio stream closed");
}

fn build_stream(
    config: SynthConfig,
    mut consumer: HeapCons<SynthCommand>,
) -> Result<cpal::Stream, SinkError> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or(SinkError::NoDevice)?;
    let supported = device
        .default_output_config()
        .map_err(|e| SinkError::Device(e.to_string()))?;
    let stream_config: cpal::StreamConfig = supported.into();

    let num_channels = stream_config.channels as usize;
    let sample_rate = stream_config.sample_rate as f32;
    tracing::info!(channels = num_channels, sample_rate, "audio output");

    let mut synth = Synth::new(config.instrument, config.adsr, config.gain, sample_rate);

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                while let Some(command) = consumer.try_pop() {
                    apply(&mut synth, command);
                }
                synth.render(data, num_channels);
            },
            |err| tracing::error!(error = %err, "audio stream error"),
            None,
        )
        .map_err(|e| SinkError::Device(e.to_string()))?;

    stream.play().map_err(|e| SinkError::Device(e.to_string()))?;
    Ok(stream)
}

fn apply(synth: &mut Synth, command: SynthCommand) {
    match command {
        SynthCommand::NoteOn {
            voice,
            pitch,
            velocity,
        } => synth.note_on(voice, pitch, velocity),
        SynthCommand::NoteOff { voice, pitch } => synth.note_off(voice, pitch),
        SynthCommand::Control {
            voice,
            controller,
            value,
        } => synth.control_change(voice, controller, value),
        SynthCommand::ReleaseAll => synth.release_all(),
    }
}
