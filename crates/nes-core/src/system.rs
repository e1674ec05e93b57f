//! NES System Integration
//!
//! The master clock: every tick advances the PPU three dots, hands a pending
//! NMI to the CPU, then gives the CPU one tick. Completed frames are passed
//! to a [`VideoSink`].

use thiserror::Error;
use tracing::error;

use crate::bus::Bus;
use crate::cartridge::{Cartridge, CartridgeError};
use crate::controller::Controller;
use crate::cpu::{Cpu, CpuError};
use crate::ppu::Ppu;

/// PPU dots per CPU tick
pub const PPU_TICKS_PER_CPU_TICK: usize = 3;

/// Receives each completed frame (256x240, 3 bytes per pixel, row-major)
pub trait VideoSink {
    fn present(&mut self, frame: &[u8]);
}

impl<F: FnMut(&[u8])> VideoSink for F {
    fn present(&mut self, frame: &[u8]) {
        self(frame)
    }
}

/// System error types
#[derive(Debug, Error)]
pub enum SystemError {
    #[error(transparent)]
    Cpu(#[from] CpuError),

    #[error(transparent)]
    Cartridge(#[from] CartridgeError),
}

/// NES System - integrates all components
#[derive(Debug, Clone)]
pub struct NesSystem {
    cpu: Cpu,
    ppu: Ppu,
    bus: Bus,
}

impl NesSystem {
    /// Create a new NES system with no cartridge
    pub fn new() -> Self {
        Self {
            cpu: Cpu::new(),
            ppu: Ppu::new(),
            bus: Bus::new(),
        }
    }

    /// Copy a cartridge onto the bus; call [`NesSystem::reset`] afterwards
    pub fn load_cartridge(&mut self, cartridge: &Cartridge) {
        self.bus.load_cartridge(cartridge);
    }

    /// Load an iNES ROM image into the system
    pub fn load_rom(&mut self, rom_data: &[u8]) -> Result<(), SystemError> {
        let cartridge = Cartridge::from_rom(rom_data)?;
        self.load_cartridge(&cartridge);
        Ok(())
    }

    /// Reset the NES system
    pub fn reset(&mut self) {
        self.cpu.reset(&mut self.bus);
        self.ppu.reset(&mut self.bus);
    }

    /// One master-clock tick
    pub fn clock(&mut self) -> Result<(), CpuError> {
        for _ in 0..PPU_TICKS_PER_CPU_TICK {
            self.ppu.step(&mut self.bus);
        }

        if self.ppu.take_nmi() {
            self.cpu.nmi(&mut self.bus);
        }

        if let Err(err) = self.cpu.step(&mut self.bus) {
            error!(%err, "processor halted");
            return Err(err);
        }
        Ok(())
    }

    /// Clock until the CPU is ready to fetch its next instruction
    pub fn step_instruction(&mut self) -> Result<(), CpuError> {
        self.clock()?;
        while !self.cpu.ready() {
            self.clock()?;
        }
        Ok(())
    }

    /// Run until the PPU completes a frame, then present it
    pub fn run_frame(&mut self, sink: &mut dyn VideoSink) -> Result<(), SystemError> {
        loop {
            self.clock()?;
            if self.ppu.take_frame_ready() {
                sink.present(self.ppu.frame());
                return Ok(());
            }
        }
    }

    /// Run for N frames
    pub fn run_frames(&mut self, frames: u64, sink: &mut dyn VideoSink) -> Result<(), SystemError> {
        for _ in 0..frames {
            self.run_frame(sink)?;
        }
        Ok(())
    }

    /// Get frame count
    pub fn frame_count(&self) -> u64 {
        self.ppu.frame_count()
    }

    /// Controller on port 1
    pub fn controller_mut(&mut self) -> &mut Controller {
        self.bus.controller_mut()
    }

    /// Get CPU reference
    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    /// Get mutable CPU reference
    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    /// Get PPU reference
    pub fn ppu(&self) -> &Ppu {
        &self.ppu
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut Bus {
        &mut self.bus
    }
}

impl Default for NesSystem {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::Mirroring;

    /// 16KB program: JMP $8000 at $8000, reset vector at $8000
    fn idle_cartridge() -> Cartridge {
        let mut prg = vec![0xEA; 0x4000];
        prg[0..3].copy_from_slice(&[0x4C, 0x00, 0x80]);
        prg[0x3FFC] = 0x00;
        prg[0x3FFD] = 0x80;
        Cartridge::new(prg, vec![0; 0x2000], Mirroring::Horizontal)
    }

    #[test]
    fn test_system_reset() {
        let mut system = NesSystem::new();
        system.load_cartridge(&idle_cartridge());
        system.reset();
        assert_eq!(system.cpu().registers().pc, 0x8000);
        assert_eq!(system.ppu().scanline(), 0);
    }

    #[test]
    fn test_three_dots_per_tick() {
        let mut system = NesSystem::new();
        system.load_cartridge(&idle_cartridge());
        system.reset();
        system.clock().unwrap();
        assert_eq!(system.ppu().dot(), 3);
        assert_eq!(system.cpu().total_cycles(), 1);
    }

    #[test]
    fn test_step_instruction_skips_idle() {
        let mut system = NesSystem::new();
        system.load_cartridge(&idle_cartridge());
        system.reset();
        // Reset idle, then JMP
        system.step_instruction().unwrap();
        system.step_instruction().unwrap();
        assert_eq!(system.cpu().total_cycles(), 8 + 3);
        assert_eq!(system.cpu().registers().pc, 0x8000);
    }

    #[test]
    fn test_run_frame_presents() {
        let mut system = NesSystem::new();
        system.load_cartridge(&idle_cartridge());
        system.reset();

        let mut presented = 0;
        let mut sink = |frame: &[u8]| {
            assert_eq!(frame.len(), crate::ppu::FRAME_SIZE);
            presented += 1;
        };
        system.run_frames(2, &mut sink).unwrap();
        assert_eq!(presented, 2);
        assert_eq!(system.frame_count(), 2);
    }

    #[test]
    fn test_invalid_opcode_surfaces() {
        let mut prg = vec![0x02; 0x4000];
        prg[0x3FFC] = 0x00;
        prg[0x3FFD] = 0x80;
        let mut system = NesSystem::new();
        system.load_cartridge(&Cartridge::new(prg, Vec::new(), Mirroring::Vertical));
        system.reset();

        let err = system.run_frame(&mut |_: &[u8]| {}).unwrap_err();
        assert!(matches!(
            err,
            SystemError::Cpu(CpuError::InvalidOpcode { opcode: 0x02, .. })
        ));
    }
}
