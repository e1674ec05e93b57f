//! NES Core - Pure Rust NES emulator library
//!
//! This crate provides the core emulation logic for a Nintendo Entertainment System (NES):
//! the 2A03 processor, the bus that couples it to the PPU, the per-dot PPU pipeline and the
//! master clock that drives them. It performs no I/O beyond reading a cartridge file.

#![forbid(unsafe_code)]

/// Memory bus and mapping
pub mod bus;
/// Cartridge loading (iNES)
pub mod cartridge;
/// Standard controller
pub mod controller;
/// CPU module containing the 2A03 (6502 variant) implementation
pub mod cpu;
/// PPU (Picture Processing Unit) implementation
pub mod ppu;
/// Integration module for complete NES system
pub mod system;

pub use cartridge::{Cartridge, CartridgeError, Mirroring};
pub use controller::Controller;
pub use cpu::{Cpu, CpuError};
pub use ppu::{Ppu, FRAME_HEIGHT, FRAME_SIZE, FRAME_WIDTH};
pub use system::{NesSystem, SystemError, VideoSink};
