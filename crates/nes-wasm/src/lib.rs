//! NES WASM - WASM wrapper for NES emulator

use nes_core::system::NesSystem;
use nes_core::FRAME_SIZE;
use wasm_bindgen::prelude::wasm_bindgen;
use wasm_bindgen::JsError;

/// NES Emulator wrapper for WASM
#[wasm_bindgen]
pub struct NesEmulator {
    system: NesSystem,
    framebuffer: Vec<u8>,
}

#[wasm_bindgen]
impl NesEmulator {
    /// Create a new NES emulator
    #[wasm_bindgen(constructor)]
    pub fn new() -> NesEmulator {
        Self {
            system: NesSystem::new(),
            framebuffer: vec![0; FRAME_SIZE],
        }
    }

    /// Load an iNES image and reset
    pub fn load_rom(&mut self, rom_data: &[u8]) -> Result<(), JsError> {
        self.system
            .load_rom(rom_data)
            .map_err(|e| JsError::new(&e.to_string()))?;
        self.system.reset();
        Ok(())
    }

    /// Reset the emulator
    pub fn reset(&mut self) {
        self.system.reset();
    }

    /// Run until the next frame is complete and keep a copy of it
    pub fn run_frame(&mut self) -> Result<(), JsError> {
        let framebuffer = &mut self.framebuffer;
        self.system
            .run_frame(&mut |frame: &[u8]| framebuffer.copy_from_slice(frame))
            .map_err(|e| JsError::new(&e.to_string()))
    }

    /// Controller 1 state, one bit per button (A, B, Select, Start, Up, Down, Left, Right)
    pub fn set_buttons(&mut self, buttons: u8) {
        self.system.controller_mut().set_buttons(buttons);
    }

    /// Get the current frame count
    pub fn frame_count(&self) -> u32 {
        self.system.frame_count() as u32
    }

    /// Last completed frame (256x240 RGB pixels)
    /// Returns raw RGB data (184320 bytes: 256 * 240 * 3)
    #[wasm_bindgen(getter)]
    pub fn framebuffer_rgb(&self) -> Vec<u8> {
        self.framebuffer.clone()
    }

    /// Get current PPU scanline
    pub fn scanline(&self) -> u32 {
        u32::from(self.system.ppu().scanline())
    }

    /// Get current PPU dot
    pub fn dot(&self) -> u32 {
        u32::from(self.system.ppu().dot())
    }

    /// Check if VBLANK is active
    pub fn vblank(&self) -> bool {
        self.system.bus().status().vblank()
    }

    /// Get CPU cycles
    pub fn cpu_cycles(&self) -> u32 {
        self.system.cpu().total_cycles() as u32
    }
}

impl Default for NesEmulator {
    fn default() -> Self {
        Self::new()
    }
}

#[wasm_bindgen]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Background enabled, palette entry 0 set to white, idle loop at $8000
    fn demo_rom() -> Vec<u8> {
        let program = [
            0xA9, 0x3F, 0x8D, 0x06, 0x20, 0xA9, 0x00, 0x8D, 0x06, 0x20, 0xA9, 0x30, 0x8D, 0x07,
            0x20, 0xA9, 0x08, 0x8D, 0x01, 0x20, 0x4C, 0x14, 0x80,
        ];
        let mut prg = vec![0xEA; 0x4000];
        prg[..program.len()].copy_from_slice(&program);
        prg[0x3FFC] = 0x00;
        prg[0x3FFD] = 0x80;

        let mut rom = vec![b'N', b'E', b'S', 0x1A, 1, 0, 0, 0];
        rom.extend_from_slice(&[0; 8]);
        rom.extend_from_slice(&prg);
        rom
    }

    #[test]
    fn test_run_frame_copies_framebuffer() {
        let mut emulator = NesEmulator::new();
        assert!(emulator.load_rom(&demo_rom()).is_ok());
        assert!(emulator.run_frame().is_ok());
        assert!(emulator.run_frame().is_ok());

        let frame = emulator.framebuffer_rgb();
        assert_eq!(frame.len(), FRAME_SIZE);
        assert_eq!(&frame[..3], &[0xFC, 0xFC, 0xFC]);
        assert_eq!(emulator.frame_count(), 2);
    }

    #[test]
    fn test_reset_restarts_processor() {
        let mut emulator = NesEmulator::new();
        assert!(emulator.load_rom(&demo_rom()).is_ok());
        assert_eq!(emulator.scanline(), 0);
        assert!(!emulator.vblank());
        emulator.set_buttons(0x01);
        assert!(emulator.run_frame().is_ok());
        assert!(emulator.cpu_cycles() > 0);
    }
}
