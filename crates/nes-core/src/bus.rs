//! Memory bus and mapping
//!
//! The bus owns every piece of addressable storage and decodes both address
//! spaces. The CPU reaches it through [`crate::cpu::Bus`]; the PPU pipeline
//! uses [`Bus::ppu_read`], [`Bus::ppu_write`] and the register helpers.
//!
//! CPU memory map:
//! $0000-$07FF - 2KB Internal RAM
//! $0800-$1FFF - RAM mirroring (repeats every $0800 bytes)
//! $2000-$2007 - PPU registers
//! $2008-$3FFF - PPU register mirroring (every 8 bytes)
//! $4014       - OAM DMA
//! $4016       - Controller port 1
//! $6000-$7FFF - Cartridge work RAM
//! $8000-$FFFF - Cartridge PRG ROM
//!
//! PPU memory map:
//! $0000-$1FFF - Pattern tables
//! $2000-$2FFF - Nametables (2KB physical, mirrored by cartridge)
//! $3000-$3EFF - Nametable mirroring
//! $3F00-$3FFF - Palette RAM (32 bytes, mirrored)

use tracing::warn;

use crate::cartridge::{Cartridge, Mirroring};
use crate::controller::Controller;
use crate::cpu::Bus as CpuBus;
use crate::ppu::{OamEntry, PpuCtrl, PpuMask, PpuRegister, PpuStatus, VramRegisters};

/// RAM size in bytes
pub const RAM_SIZE: usize = 2048;

/// Cartridge work RAM at $6000-$7FFF
pub const PRG_RAM_SIZE: usize = 8192;

/// CPU window onto PRG ROM ($8000-$FFFF)
pub const PRG_WINDOW_SIZE: usize = 0x8000;

/// Pattern table storage
pub const PATTERN_SIZE: usize = 0x2000;

/// Physical nametable RAM
pub const VRAM_SIZE: usize = 0x0800;

/// Palette RAM
pub const PALETTE_SIZE: usize = 32;

/// Primary OAM (64 sprites x 4 bytes)
pub const OAM_SIZE: usize = 256;

/// PPU register count
pub const PPU_REGISTER_COUNT: usize = 8;

const NAMETABLE_SIZE: usize = 0x0400;

/// Memory bus structure
#[derive(Debug, Clone)]
pub struct Bus {
    /// 2KB internal RAM (with mirroring)
    ram: [u8; RAM_SIZE],
    /// Cartridge work RAM
    prg_ram: Vec<u8>,
    /// PRG ROM as seen from $8000
    prg_rom: Vec<u8>,
    /// Pattern tables ($0000-$1FFF on the PPU bus)
    pattern: Vec<u8>,
    /// Two physical nametables
    vram: [u8; VRAM_SIZE],
    /// Palette RAM
    palette: [u8; PALETTE_SIZE],
    /// Primary OAM
    oam: [u8; OAM_SIZE],
    /// Raw bytes behind $2000-$2007
    ppu_registers: [u8; PPU_REGISTER_COUNT],
    /// Internal v/t/x/w latches
    vram_registers: VramRegisters,
    /// One-read-behind buffer for $2007
    read_buffer: u8,
    mirroring: Mirroring,
    controller: Controller,
}

impl Bus {
    /// Create a new bus with no cartridge
    pub fn new() -> Self {
        Self {
            ram: [0; RAM_SIZE],
            prg_ram: vec![0; PRG_RAM_SIZE],
            prg_rom: vec![0; PRG_WINDOW_SIZE],
            pattern: vec![0; PATTERN_SIZE],
            vram: [0; VRAM_SIZE],
            palette: [0; PALETTE_SIZE],
            oam: [0xFF; OAM_SIZE],
            ppu_registers: [0; PPU_REGISTER_COUNT],
            vram_registers: VramRegisters::default(),
            read_buffer: 0,
            mirroring: Mirroring::default(),
            controller: Controller::new(),
        }
    }

    /// Copy a cartridge's images onto the bus
    ///
    /// The program image is laid out so that it ends at $FFFF and repeats
    /// downwards, so a single 16KB bank appears in both halves of the window.
    pub fn load_cartridge(&mut self, cartridge: &Cartridge) {
        let prg = cartridge.prg_rom();
        if prg.len() > PRG_WINDOW_SIZE {
            warn!(
                size = prg.len(),
                "program image exceeds the 32KB window; keeping the last 32KB"
            );
        }

        if prg.is_empty() {
            self.prg_rom.fill(0);
        } else {
            let len = prg.len();
            for (index, byte) in self.prg_rom.iter_mut().enumerate() {
                let distance_from_end = PRG_WINDOW_SIZE - index;
                *byte = prg[len - 1 - (distance_from_end - 1) % len];
            }
        }

        let chr = cartridge.chr_rom();
        let copied = chr.len().min(PATTERN_SIZE);
        self.pattern.fill(0);
        self.pattern[..copied].copy_from_slice(&chr[..copied]);

        self.mirroring = cartridge.mirroring();
    }

    /// Nametable mirroring in effect
    pub fn mirroring(&self) -> Mirroring {
        self.mirroring
    }

    /// Controller on port 1
    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Mutable controller on port 1
    pub fn controller_mut(&mut self) -> &mut Controller {
        &mut self.controller
    }

    /// Read a byte from the PPU address space
    pub fn ppu_read(&self, address: u16) -> u8 {
        let address = address & 0x3FFF;
        match address {
            0x0000..=0x1FFF => self.pattern[address as usize],
            0x2000..=0x3EFF => self.vram[self.nametable_index(address)],
            _ => self.palette[palette_index(address)],
        }
    }

    /// Write a byte to the PPU address space
    pub fn ppu_write(&mut self, address: u16, value: u8) {
        let address = address & 0x3FFF;
        match address {
            0x0000..=0x1FFF => self.pattern[address as usize] = value,
            0x2000..=0x3EFF => {
                let index = self.nametable_index(address);
                self.vram[index] = value;
            }
            _ => self.palette[palette_index(address)] = value,
        }
    }

    /// Resolve a nametable address to one of the two physical 1KB banks
    fn nametable_index(&self, address: u16) -> usize {
        let offset = (address as usize - 0x2000) & 0x0FFF;
        let quadrant = offset / NAMETABLE_SIZE;
        let bank = match self.mirroring {
            Mirroring::Horizontal => quadrant >> 1,
            Mirroring::Vertical => quadrant & 1,
        };
        bank * NAMETABLE_SIZE + (offset % NAMETABLE_SIZE)
    }

    /// Raw byte stored behind a PPU register
    pub fn register(&self, register: PpuRegister) -> u8 {
        self.ppu_registers[register as usize]
    }

    /// Test a flag within a PPU register byte
    pub fn is_flag_set(&self, register: PpuRegister, flag: u8) -> bool {
        self.register(register) & flag != 0
    }

    /// Set or clear a flag within a PPU register byte
    pub fn set_flag(&mut self, register: PpuRegister, flag: u8, condition: bool) {
        let value = &mut self.ppu_registers[register as usize];
        if condition {
            *value |= flag;
        } else {
            *value &= !flag;
        }
    }

    /// $2000 as a typed view
    pub fn control(&self) -> PpuCtrl {
        PpuCtrl::new(self.register(PpuRegister::PpuCtrl))
    }

    /// $2001 as a typed view
    pub fn mask(&self) -> PpuMask {
        PpuMask::new(self.register(PpuRegister::PpuMask))
    }

    /// $2002 as a typed view (without the read side effects)
    pub fn status(&self) -> PpuStatus {
        PpuStatus::new(self.register(PpuRegister::PpuStatus))
    }

    /// Internal v/t/x/w latches
    pub fn vram_registers(&self) -> &VramRegisters {
        &self.vram_registers
    }

    /// Mutable internal v/t/x/w latches
    pub fn vram_registers_mut(&mut self) -> &mut VramRegisters {
        &mut self.vram_registers
    }

    /// Sprite `index` from primary OAM, wrapping modulo 64
    pub fn oam_entry(&self, index: usize) -> OamEntry {
        let base = (index & 0x3F) * 4;
        OamEntry::from_bytes(&self.oam[base..base + 4])
    }

    /// Primary OAM contents
    pub fn oam(&self) -> &[u8; OAM_SIZE] {
        &self.oam
    }

    fn increment_vram_address(&mut self) {
        let step = self.control().vram_increment();
        self.vram_registers.v.increment(step);
    }

    fn read_ppu_register(&mut self, register: PpuRegister) -> u8 {
        match register {
            PpuRegister::PpuStatus => {
                let data = (self.register(PpuRegister::PpuStatus) & 0xE0) | (self.read_buffer & 0x1F);
                self.vram_registers.write_toggle = false;
                self.set_flag(PpuRegister::PpuStatus, PpuStatus::VBLANK, false);
                data
            }
            PpuRegister::OamData => self.oam[self.register(PpuRegister::OamAddr) as usize],
            PpuRegister::PpuData => {
                let address = self.vram_registers.v.get() & 0x3FFF;
                let data = if address <= 0x3EFF {
                    let buffered = self.read_buffer;
                    self.read_buffer = self.ppu_read(address);
                    buffered
                } else {
                    self.ppu_read(address)
                };
                self.increment_vram_address();
                data
            }
            // Write-only registers
            _ => 0,
        }
    }

    fn write_ppu_register(&mut self, register: PpuRegister, value: u8) {
        match register {
            PpuRegister::PpuCtrl => {
                self.vram_registers.t.set_nametable(value & 0x03);
                self.ppu_registers[PpuRegister::PpuCtrl as usize] = value;
            }
            PpuRegister::PpuMask => {
                self.ppu_registers[PpuRegister::PpuMask as usize] = value;
            }
            PpuRegister::PpuStatus => {
                let status = &mut self.ppu_registers[PpuRegister::PpuStatus as usize];
                *status = (*status & 0xC0) | (value & 0x3F);
            }
            PpuRegister::OamAddr => {
                self.ppu_registers[PpuRegister::OamAddr as usize] = value;
            }
            PpuRegister::OamData => {
                let oam_addr = &mut self.ppu_registers[PpuRegister::OamAddr as usize];
                self.oam[*oam_addr as usize] = value;
                *oam_addr = oam_addr.wrapping_add(1);
            }
            PpuRegister::PpuScroll => {
                let regs = &mut self.vram_registers;
                if !regs.write_toggle {
                    regs.fine_x = value & 0x07;
                    regs.t.set_coarse_x(value >> 3);
                } else {
                    regs.t.set_fine_y(value & 0x07);
                    regs.t.set_coarse_y(value >> 3);
                }
                regs.write_toggle = !regs.write_toggle;
            }
            PpuRegister::PpuAddr => {
                let regs = &mut self.vram_registers;
                if !regs.write_toggle {
                    // Bit 14 is cleared along with the high byte
                    let t = (regs.t.get() & 0x00FF) | (((value & 0x3F) as u16) << 8);
                    regs.t.set(t);
                } else {
                    let t = (regs.t.get() & 0xFF00) | value as u16;
                    regs.t.set(t);
                    regs.v = regs.t;
                }
                regs.write_toggle = !regs.write_toggle;
            }
            PpuRegister::PpuData => {
                let address = self.vram_registers.v.get();
                self.ppu_write(address, value);
                self.increment_vram_address();
            }
        }
    }

    /// Copy 256 bytes into primary OAM
    ///
    /// The source page combines the written value with the current OAM
    /// address, both shifted into the high byte.
    fn oam_dma(&mut self, page: u8) {
        let oam_addr = self.register(PpuRegister::OamAddr);
        let base = ((page as u16) << 8) | ((oam_addr as u16) << 8);
        for offset in 0..OAM_SIZE {
            self.oam[offset] = self.read(base.wrapping_add(offset as u16));
        }
    }
}

/// Apply the four palette aliases ($3F10/$3F14/$3F18/$3F1C)
fn palette_index(address: u16) -> usize {
    let index = (address & 0x1F) as usize;
    match index {
        0x10 | 0x14 | 0x18 | 0x1C => index - 0x10,
        _ => index,
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuBus for Bus {
    /// Read a byte from the given address
    fn read(&mut self, address: u16) -> u8 {
        match address {
            0x0000..=0x1FFF => self.ram[(address & 0x07FF) as usize],
            0x2000..=0x3FFF => self.read_ppu_register(PpuRegister::from_address(address)),
            0x4016 => self.controller.read(),
            0x6000..=0x7FFF => self.prg_ram[(address - 0x6000) as usize],
            0x8000..=0xFFFF => self.prg_rom[(address - 0x8000) as usize],
            // APU, second controller and expansion space are not mapped
            _ => 0,
        }
    }

    /// Write a byte to the given address
    fn write(&mut self, address: u16, value: u8) {
        match address {
            0x0000..=0x1FFF => self.ram[(address & 0x07FF) as usize] = value,
            0x2000..=0x3FFF => self.write_ppu_register(PpuRegister::from_address(address), value),
            0x4014 => self.oam_dma(value),
            0x4016 => self.controller.write(value),
            0x6000..=0x7FFF => self.prg_ram[(address - 0x6000) as usize] = value,
            // PRG ROM is write-protected
            _ => {}
        }
    }
}
