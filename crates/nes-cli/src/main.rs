//! NES CLI - Headless runner for the NES emulator core

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use nes_core::cartridge::Cartridge;
use nes_core::system::{NesSystem, SystemError, VideoSink};
use nes_core::{FRAME_HEIGHT, FRAME_WIDTH};
use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// NES Emulator CLI
#[derive(Parser, Debug)]
#[command(name = "nes-cli")]
#[command(about = "A headless NES emulator runner", long_about = None)]
struct Args {
    /// Path to the iNES ROM file
    #[arg(short, long)]
    rom: PathBuf,

    /// Number of frames to run
    #[arg(short, long, default_value = "60")]
    frames: u64,

    /// Dump CPU state after execution
    #[arg(short = 'c', long)]
    dump_cpu: bool,

    /// Dump PPU state after execution
    #[arg(short = 'p', long)]
    dump_ppu: bool,

    /// Write the last frame as a binary PPM image
    #[arg(short, long)]
    screenshot: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Keeps a copy of the most recent frame
#[derive(Default)]
struct LastFrame {
    pixels: Vec<u8>,
    presented: u64,
}

impl VideoSink for LastFrame {
    fn present(&mut self, frame: &[u8]) {
        self.pixels.clear();
        self.pixels.extend_from_slice(frame);
        self.presented += 1;
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run(args: &Args) -> Result<(), CliError> {
    let cartridge = Cartridge::load(&args.rom).map_err(SystemError::from)?;

    println!("Loaded cartridge:");
    println!("  PRG ROM:   {} bytes", cartridge.prg_rom().len());
    println!("  CHR ROM:   {} bytes", cartridge.chr_rom().len());
    println!("  Mirroring: {:?}", cartridge.mirroring());

    let mut system = NesSystem::new();
    system.load_cartridge(&cartridge);
    system.reset();

    info!(frames = args.frames, "running");
    let mut sink = LastFrame::default();
    system.run_frames(args.frames, &mut sink)?;

    println!("Completed {} frames.", system.frame_count());

    if args.dump_cpu {
        dump_cpu_state(&system);
    }

    if args.dump_ppu {
        dump_ppu_state(&system);
    }

    if let Some(path) = &args.screenshot {
        if sink.presented == 0 {
            info!("no frame presented, skipping screenshot");
        } else {
            write_ppm(path, &sink.pixels).map_err(|source| CliError::Screenshot {
                path: path.clone(),
                source,
            })?;
            info!(path = %path.display(), "screenshot written");
        }
    }

    Ok(())
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    System(#[from] SystemError),

    #[error("failed to write {}: {source}", path.display())]
    Screenshot { path: PathBuf, source: io::Error },
}

/// Binary PPM (P6): header then packed RGB rows
fn write_ppm(path: &Path, pixels: &[u8]) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    write!(out, "P6\n{FRAME_WIDTH} {FRAME_HEIGHT}\n255\n")?;
    out.write_all(pixels)?;
    out.flush()
}

fn dump_cpu_state(system: &NesSystem) {
    let cpu = system.cpu();
    let regs = cpu.registers();

    println!("\nCPU State:");
    println!("  A:    ${:02X}", regs.a);
    println!("  X:    ${:02X}", regs.x);
    println!("  Y:    ${:02X}", regs.y);
    println!("  PC:   ${:04X}", regs.pc);
    println!("  SP:   ${:02X}", regs.sp);
    println!("  P:    ${:02X} ({})", cpu.p_register(), cpu.status());
    println!("  Cycles: {}", cpu.total_cycles());
}

fn dump_ppu_state(system: &NesSystem) {
    let ppu = system.ppu();
    let status = system.bus().status();

    println!("\nPPU State:");
    println!("  Scanline: {}", ppu.scanline());
    println!("  Dot:      {}", ppu.dot());
    println!("  Frame:    {}", ppu.frame_count());
    println!("  VBLANK:   {}", status.vblank());
    println!("  Sprite 0: {}", status.sprite_zero_hit());
}
