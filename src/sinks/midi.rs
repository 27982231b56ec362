use super::{PlaybackSink, SinkError};
use crate::VoiceId;
use crate::events::MidiMessage;
use crossbeam::channel::{self, Receiver, Sender};
use midir::{MidiOutput, MidiOutputPort};
use std::thread::{self, JoinHandle};

const CLIENT_NAME: &str = "tessitura";

/// Which output port a [`MidiOutSink`] connects to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PortSelector {
    #[default]
    First,
    Index(usize),
    /// First port whose name contains this text.
    Name(String),
}

impl PortSelector {
    /// A number selects by index, anything else by name.
    pub fn parse(s: &str) -> Self {
        match s.parse::<usize>() {
            Ok(index) => Self::Index(index),
            Err(_) => Self::Name(s.to_string()),
        }
    }
}

/// Encodes `message` for `voice`, which plays on MIDI channel `voice % 16`.
pub fn encode(voice: VoiceId, message: MidiMessage) -> [u8; 3] {
    let channel = (voice % 16) as u8;
    match message {
        MidiMessage::NoteOn { pitch, velocity } => [0x90 | channel, pitch & 0x7F, velocity & 0x7F],
        MidiMessage::NoteOff { pitch } => [0x80 | channel, pitch & 0x7F, 0],
        MidiMessage::ControlChange { controller, value } => {
            [0xB0 | channel, controller & 0x7F, value & 0x7F]
        }
    }
}

pub fn list_midi_outputs() -> Result<Vec<String>, SinkError> {
    let midi_out = MidiOutput::new(CLIENT_NAME).map_err(|e| SinkError::Midi(e.to_string()))?;
    Ok(midi_out
        .ports()
        .iter()
        .map(|port| midi_out.port_name(port).unwrap_or_default())
        .collect())
}

fn find_port(midi_out: &MidiOutput, selector: &PortSelector) -> Result<MidiOutputPort, SinkError> {
    let ports = midi_out.ports();
    let found = match selector {
        PortSelector::First => ports.first(),
        PortSelector::Index(index) => ports.get(*index),
        PortSelector::Name(name) => ports.iter().find(|port| {
            midi_out
                .port_name(port)
                .is_ok_and(|port_name| port_name.contains(name.as_str()))
        }),
    };
    match (found, selector) {
        (Some(port), _) => Ok(port.clone()),
        (None, PortSelector::Name(name)) => Err(SinkError::PortNotFound(name.clone())),
        (None, PortSelector::Index(index)) => Err(SinkError::PortNotFound(index.to_string())),
        (None, PortSelector::First) => Err(SinkError::NoDevice),
    }
}

/// Sends every message to a MIDI output port.
///
/// The port connection is owned by a writer thread fed through a channel,
/// so dispatch never blocks on the MIDI backend.
pub struct MidiOutSink {
    selector: PortSelector,
    port_name: Option<String>,
    tx: Option<Sender<[u8; 3]>>,
    thread: Option<JoinHandle<()>>,
}

impl MidiOutSink {
    pub fn new(selector: PortSelector) -> Self {
        Self {
            selector,
            port_name: None,
            tx: None,
            thread: None,
        }
    }

    /// Name of the connected port, once open.
    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    fn send(&self, voice: VoiceId, message: MidiMessage) {
        if let Some(tx) = &self.tx {
            if tx.send(encode(voice, message)).is_err() {
                tracing::warn!(voice, ?message, "MIDI writer is gone");
            }
        }
    }
}

impl PlaybackSink for MidiOutSink {
    fn name(&self) -> &str {
        "midi"
    }

    fn open(&mut self) -> Result<(), SinkError> {
        if self.thread.is_some() {
            return Ok(());
        }
        let (ready_tx, ready_rx) = channel::bounded(1);
        let (tx, rx) = channel::unbounded();
        let selector = self.selector.clone();

        let handle = thread::Builder::new()
            .name("tessitura-midi".to_string())
            .spawn(move || writer_thread(selector, rx, ready_tx))
            .map_err(|e| SinkError::Thread(e.to_string()))?;

        let port_name = match ready_rx.recv() {
            Ok(Ok(port_name)) => port_name,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(SinkError::Thread("MIDI thread exited during setup".into()));
            }
        };

        tracing::info!(port = %port_name, "MIDI output connected");
        self.port_name = Some(port_name);
        self.tx = Some(tx);
        self.thread = Some(handle);
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.tx = None;
        if let Some(handle) = self.thread.take() {
            handle
                .join()
                .map_err(|_| SinkError::Thread("MIDI thread panicked".into()))?;
        }
        Ok(())
    }

    fn note_on(&mut self, voice: VoiceId, pitch: u8, velocity: u8) {
        self.send(voice, MidiMessage::NoteOn { pitch, velocity });
    }

    fn note_off(&mut self, voice: VoiceId, pitch: u8) {
        self.send(voice, MidiMessage::NoteOff { pitch });
    }

    fn control_change(&mut self, voice: VoiceId, controller: u8, value: u8) {
        self.send(voice, MidiMessage::ControlChange { controller, value });
    }
}

impl Drop for MidiOutSink {
    fn drop(&mut self) {
        if self.thread.is_some() {
            let _ = self.close();
        }
    }
}

fn writer_thread(
    selector: PortSelector,
    rx: Receiver<[u8; 3]>,
    ready: Sender<Result<String, SinkError>>,
) {
    let connected = MidiOutput::new(CLIENT_NAME)
        .map_err(|e| SinkError::Midi(e.to_string()))
        .and_then(|midi_out| {
            let port = find_port(&midi_out, &selector)?;
            let port_name = midi_out.port_name(&port).unwrap_or_default();
            let conn = midi_out
                .connect(&port, "tessitura-out")
                .map_err(|e| SinkError::Midi(e.to_string()))?;
            Ok((conn, port_name))
        });

    let mut conn = match connected {
        Ok((conn, port_name)) => {
            let _ = ready.send(Ok(port_name));
            conn
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    for bytes in rx.iter() {
        if let Err(e) = conn.send(&bytes) {
            tracing::warn!(error = %e, ?bytes, "MIDI send failed");
        }
    }
    conn.close();
}
