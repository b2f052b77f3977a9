// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
//! CLI entry point (§6): `regroove <directory|file> [-m <midi_port>] [-c
//! <config.ini>] [--dump-config]`. Wires the on-disk config, the decoder,
//! the audio device and the optional MIDI port together and hands control
//! to the keyboard/MIDI controllers.

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;

use regroove::audio::{self, MixGraph};
use regroove::config::{Ini, Rgx};
use regroove::controller::{self, Controller};
use regroove::decoder::mock::MockDecoder;
use regroove::decoder::{Decoder, SharedDecoder};
use regroove::dispatch::State;
use regroove::midi::{self, clock::ClockConfig};
use regroove::playsync::CancelHandle;

const DEFAULT_INI_PATH: &str = "regroove.ini";

#[derive(Parser)]
#[clap(author = "Michael Wilson", version = "0.1.0", about = "A live-performance groovebox.")]
struct Cli {
    /// The path to the tracker module directory or file to play.
    path: Option<String>,

    /// The MIDI port to open for clock/transport/note I/O.
    #[arg(short = 'm', long = "midi-port")]
    midi_port: Option<String>,

    /// The path to the INI config file.
    #[arg(short = 'c', long = "config", default_value = DEFAULT_INI_PATH)]
    config: String,

    /// Writes a default INI to --config and exits.
    #[arg(long)]
    dump_config: bool,
}

/// Returns the sidecar RGX path for a module path: same directory and stem,
/// `.rgx` extension (§4.J — RGX travels alongside the module it annotates).
fn rgx_path_for(module_path: &Path) -> PathBuf {
    module_path.with_extension("rgx")
}

fn run() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    if cli.dump_config {
        let mut ini = Ini::default_config();
        ini.save(Path::new(&cli.config))?;
        println!("Wrote default config to {}.", cli.config);
        return Ok(());
    }

    let Some(path) = cli.path else {
        eprintln!("Usage: regroove <directory|file> [-m <midi_port>] [-c <config.ini>] [--dump-config]");
        std::process::exit(1);
    };
    let module_path = PathBuf::from(&path);

    let ini = Ini::load_or_default(Path::new(&cli.config))?;
    let rgx = Rgx::load_or_default(&rgx_path_for(&module_path))?;

    // The real tracker decoder is an external collaborator (§6) this crate
    // only codes against; the mock stands in for it at runtime.
    let decoder: SharedDecoder = Arc::new(std::sync::Mutex::new(Box::new(MockDecoder::new(8, 64, 8)) as Box<dyn Decoder>));

    let mix = Arc::new(MixGraph::new(48_000, 200));
    mix.set_decoder(Some(Arc::clone(&decoder)));
    ini.apply_effects(&mut mix.chain().lock());

    let midi_port = cli.midi_port.clone().or_else(|| ini.devices.midi_out.clone());
    let midi_handle = match midi_port {
        Some(name) => match midi::get_device(&name) {
            Ok(device) => Some(Arc::new(midi::Handle::new(device, ClockConfig::default()))),
            Err(e) => {
                eprintln!("MIDI port {name} unavailable ({e}); continuing without MIDI.");
                None
            }
        },
        None => None,
    };

    let state = State::new(decoder, Arc::clone(&mix), midi_handle.clone(), rgx.phrases());
    *state.mapping().lock() = ini.mapping;
    for pad in rgx.pads {
        state.mapping().lock().load_song_pad(pad);
    }
    state.performance().lock().load_events(rgx.events);

    let stop = CancelHandle::new();

    let audio_device_name = ini.devices.audio_out.clone().unwrap_or_else(|| "mock".to_string());
    let audio_device = audio::get_device(&audio_device_name)?;
    let audio_mix = Arc::clone(&mix);
    let audio_stop = stop.clone();
    let audio_thread = std::thread::spawn(move || {
        if let Err(e) = audio_device.run(audio_mix, audio_stop) {
            eprintln!("Audio stream error: {e}");
        }
    });

    let clock_thread = midi_handle.as_ref().map(|handle| {
        handle.spawn_clock_thread(mix.bpm_publisher(), mix.position_publisher(), stop.clone())
    });

    let keyboard_driver: Arc<dyn controller::Driver> = Arc::new(controller::keyboard::Driver::new());
    let keyboard_controller = Controller::new(Arc::clone(&state), keyboard_driver);

    let midi_controller = midi_handle.as_ref().map(|handle| {
        let driver: Arc<dyn controller::Driver> = Arc::new(controller::midi::Driver::new(Arc::clone(handle.device()), 0));
        Controller::new(Arc::clone(&state), driver)
    });

    let _ = keyboard_controller.join();
    stop.cancel();

    if let Some(midi_controller) = midi_controller {
        let _ = midi_controller.join();
    }
    if let Some(clock_thread) = clock_thread {
        let _ = clock_thread.join();
    }
    let _ = audio_thread.join();

    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
