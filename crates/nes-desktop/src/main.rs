//! NES Desktop - Desktop NES emulator with minifb rendering
//!
//! Frames from the core are converted to minifb's 0RGB pixels and shown in a
//! fixed-size window. The keyboard drives controller port 1.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use minifb::{Key, Window, WindowOptions};
use nes_core::cartridge::Cartridge;
use nes_core::controller::{
    BUTTON_A, BUTTON_B, BUTTON_DOWN, BUTTON_LEFT, BUTTON_RIGHT, BUTTON_SELECT, BUTTON_START,
    BUTTON_UP,
};
use nes_core::system::{NesSystem, SystemError, VideoSink};
use nes_core::{FRAME_HEIGHT, FRAME_WIDTH};
use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const TARGET_FPS: usize = 60;

const KEY_MAP: [(Key, u8); 8] = [
    (Key::Slash, BUTTON_A),
    (Key::Period, BUTTON_B),
    (Key::RightShift, BUTTON_SELECT),
    (Key::Enter, BUTTON_START),
    (Key::Up, BUTTON_UP),
    (Key::Down, BUTTON_DOWN),
    (Key::Left, BUTTON_LEFT),
    (Key::Right, BUTTON_RIGHT),
];

/// NES Emulator Desktop App
#[derive(Parser, Debug)]
#[command(name = "nes-desktop")]
#[command(about = "A NES emulator desktop app", long_about = None)]
struct Args {
    /// Path to the iNES ROM file
    #[arg(short, long)]
    rom: PathBuf,

    /// Screen scale factor (1-4)
    #[arg(short, long, default_value = "2")]
    scale: usize,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Error)]
enum DesktopError {
    #[error(transparent)]
    System(#[from] SystemError),

    #[error("window: {0}")]
    Window(#[from] minifb::Error),
}

/// RGB frame converted to minifb's 0RGB layout
struct WindowBuffer {
    pixels: Vec<u32>,
}

impl WindowBuffer {
    fn new() -> Self {
        Self {
            pixels: vec![0; FRAME_WIDTH * FRAME_HEIGHT],
        }
    }
}

impl VideoSink for WindowBuffer {
    fn present(&mut self, frame: &[u8]) {
        for (pixel, rgb) in self.pixels.iter_mut().zip(frame.chunks_exact(3)) {
            *pixel = (u32::from(rgb[0]) << 16) | (u32::from(rgb[1]) << 8) | u32::from(rgb[2]);
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), DesktopError> {
    let cartridge = Cartridge::load(&args.rom).map_err(SystemError::from)?;

    let mut system = NesSystem::new();
    system.load_cartridge(&cartridge);
    system.reset();

    let scale = args.scale.clamp(1, 4);
    let mut window = Window::new(
        "NES Emulator",
        FRAME_WIDTH * scale,
        FRAME_HEIGHT * scale,
        WindowOptions {
            resize: false,
            ..WindowOptions::default()
        },
    )?;
    window.set_target_fps(TARGET_FPS);

    let mut buffer = WindowBuffer::new();

    info!(scale, "starting emulation, press ESC or close the window to exit");

    while window.is_open() && !window.is_key_down(Key::Escape) {
        system.controller_mut().set_buttons(sample_buttons(&window));
        system.run_frame(&mut buffer)?;
        window.update_with_buffer(&buffer.pixels, FRAME_WIDTH, FRAME_HEIGHT)?;
    }

    info!(frames = system.frame_count(), "emulator closed");
    Ok(())
}

fn sample_buttons(window: &Window) -> u8 {
    KEY_MAP
        .iter()
        .filter(|(key, _)| window.is_key_down(*key))
        .fold(0, |state, (_, button)| state | button)
}
