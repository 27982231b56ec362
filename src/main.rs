use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tessitura::sinks::{self, LogSink, MidiOutSink, PortSelector, SynthSink};
use tessitura::{EvalMode, Session};
use tracing_subscriber::EnvFilter;

/// Plays algorithmic music sessions in real time.
#[derive(Parser, Debug)]
#[command(name = "tessitura")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play a session file
    Play {
        #[arg(value_name = "SESSION")]
        file: PathBuf,

        /// Where notes go. May be given more than once.
        #[arg(short, long = "sink", value_enum, default_value = "log")]
        sinks: Vec<SinkKind>,

        /// MIDI output port, by index or part of its name
        #[arg(long, value_name = "PORT")]
        midi_port: Option<String>,

        /// Pull each voice's next event just in time, on the scheduler thread
        #[arg(long)]
        jit: bool,

        #[arg(long)]
        bpm: Option<f64>,

        #[arg(long)]
        rate: Option<f64>,
    },

    /// List MIDI output ports
    ListMidi,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum SinkKind {
    Log,
    Midi,
    Synth,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match Args::parse().command {
        Commands::Play {
            file,
            sinks,
            midi_port,
            jit,
            bpm,
            rate,
        } => {
            let mut session = Session::load(&file)?;
            if jit {
                session.config.mode = EvalMode::JustInTime;
            }
            if let Some(bpm) = bpm {
                session.config.bpm = bpm;
            }
            if let Some(rate) = rate {
                session.config.playback_rate = rate;
            }

            let mut sequencer = session.sequencer();
            for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
                signal_hook::flag::register(signal, sequencer.interrupt_handle())?;
            }

            for kind in sinks {
                match kind {
                    SinkKind::Log => sequencer.subscribe(Box::new(LogSink::new())),
                    SinkKind::Midi => {
                        let selector = midi_port
                            .as_deref()
                            .map(PortSelector::parse)
                            .unwrap_or_default();
                        sequencer.subscribe(Box::new(MidiOutSink::new(selector)));
                    }
                    SinkKind::Synth => {
                        sequencer.subscribe(Box::new(SynthSink::new(session.synth.clone())))
                    }
                }
            }

            let report = sequencer.playback()?;
            println!(
                "{}: {:.2}s played, {} dispatches, {} late (max {:.1} ms){}",
                session.name,
                report.session_seconds,
                report.stats.dispatched,
                report.stats.late,
                report.stats.max_lateness * 1000.0,
                if report.interrupted { ", interrupted" } else { "" }
            );
        }
        Commands::ListMidi => {
            let ports = sinks::list_midi_outputs()?;
            if ports.is_empty() {
                println!("No MIDI outputs found");
            }
            for (i, name) in ports.iter().enumerate() {
                println!("  {i}: {name}");
            }
        }
    }
    Ok(())
}
