//! PPU (Picture Processing Unit) implementation
//!
//! The pipeline advances one dot per [`Ppu::step`]. A frame is 262 scanlines
//! of 341 dots: lines 0-239 are visible, 241 raises vblank, 261 is the
//! pre-render line. On odd frames with background rendering enabled the
//! pre-render line is one dot shorter.
//!
//! Register state (control, mask, status, OAM, the v/t/x/w latches) lives on
//! the [`Bus`]; this module keeps only what the pipeline itself latches:
//! background and sprite shifters, secondary OAM and the frame buffers.

use tracing::trace;

use crate::bus::Bus;

/// Visible frame width in pixels
pub const FRAME_WIDTH: usize = 256;
/// Visible frame height in pixels
pub const FRAME_HEIGHT: usize = 240;
/// RGB
pub const BYTES_PER_PIXEL: usize = 3;
/// Size of one frame buffer in bytes
pub const FRAME_SIZE: usize = FRAME_WIDTH * FRAME_HEIGHT * BYTES_PER_PIXEL;

/// Last visible scanline
pub const LAST_VISIBLE_SCANLINE: u16 = 239;
/// Scanline on which vblank starts
pub const VBLANK_SCANLINE: u16 = 241;
/// Pre-render scanline
pub const PRE_RENDER_SCANLINE: u16 = 261;
/// Last dot of a scanline
pub const LAST_DOT: u16 = 340;

/// Sprites kept per scanline
pub const MAX_SPRITES_PER_LINE: usize = 8;

const OAM_ENTRIES: usize = 64;

/// NES master palette, indexed by the 6-bit value stored in palette RAM
pub const SYSTEM_PALETTE: [(u8, u8, u8); 64] = [
    (0x7C, 0x7C, 0x7C), (0x00, 0x00, 0xFC), (0x00, 0x00, 0xBC), (0x44, 0x28, 0xBC), (0x94, 0x00, 0x84), (0xA8, 0x00, 0x20), (0xA8, 0x10, 0x00), (0x88, 0x14, 0x00),
    (0x50, 0x30, 0x00), (0x00, 0x78, 0x00), (0x00, 0x68, 0x00), (0x00, 0x58, 0x00), (0x00, 0x40, 0x58), (0x00, 0x00, 0x00), (0x00, 0x00, 0x00), (0x00, 0x00, 0x00),
    (0xBC, 0xBC, 0xBC), (0x00, 0x78, 0xF8), (0x00, 0x58, 0xF8), (0x68, 0x44, 0xFC), (0xD8, 0x00, 0xCC), (0xE4, 0x00, 0x58), (0xF8, 0x38, 0x00), (0xE4, 0x5C, 0x10),
    (0xAC, 0x7C, 0x00), (0x00, 0xB8, 0x00), (0x00, 0xA8, 0x00), (0x00, 0xA8, 0x44), (0x00, 0x88, 0x88), (0x00, 0x00, 0x00), (0x00, 0x00, 0x00), (0x00, 0x00, 0x00),
    (0xF8, 0xF8, 0xF8), (0x3C, 0xBC, 0xFC), (0x68, 0x88, 0xFC), (0x98, 0x78, 0xF8), (0xF8, 0x78, 0xF8), (0xF8, 0x58, 0x98), (0xF8, 0x78, 0x58), (0xFC, 0xA0, 0x44),
    (0xF8, 0xB8, 0x00), (0xB8, 0xF8, 0x18), (0x58, 0xD8, 0x54), (0x58, 0xF8, 0x98), (0x00, 0xE8, 0xD8), (0x78, 0x78, 0x78), (0x00, 0x00, 0x00), (0x00, 0x00, 0x00),
    (0xFC, 0xFC, 0xFC), (0xA4, 0xE4, 0xFC), (0xB8, 0xB8, 0xF8), (0xD8, 0xB8, 0xF8), (0xF8, 0xB8, 0xF8), (0xF8, 0xA4, 0xC0), (0xF0, 0xD0, 0xB0), (0xFC, 0xE0, 0xA8),
    (0xF8, 0xD8, 0x78), (0xD8, 0xF8, 0x78), (0xB8, 0xF8, 0xB8), (0xB8, 0xF8, 0xD8), (0x00, 0xFC, 0xFC), (0xF8, 0xD8, 0xF8), (0x00, 0x00, 0x00), (0x00, 0x00, 0x00),
];

/// Byte-wise bit reversal, used for horizontally flipped sprites
const REVERSE_BITS: [u8; 256] = build_reverse_table();

const fn build_reverse_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = (i as u8).reverse_bits();
        i += 1;
    }
    table
}

/// PPU registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PpuRegister {
    /// $2000 - PPUCTRL (Control)
    PpuCtrl = 0,
    /// $2001 - PPUMASK (Mask)
    PpuMask = 1,
    /// $2002 - PPUSTATUS (Status)
    PpuStatus = 2,
    /// $2003 - OAMADDR (Sprite Address)
    OamAddr = 3,
    /// $2004 - OAMDATA (Sprite Data)
    OamData = 4,
    /// $2005 - PPUSCROLL (Scroll)
    PpuScroll = 5,
    /// $2006 - PPUADDR (Address)
    PpuAddr = 6,
    /// $2007 - PPUDATA (Data)
    PpuData = 7,
}

impl PpuRegister {
    /// Decode a CPU address in $2000-$3FFF (mirrored every 8 bytes)
    pub fn from_address(address: u16) -> Self {
        match address & 0x0007 {
            0 => PpuRegister::PpuCtrl,
            1 => PpuRegister::PpuMask,
            2 => PpuRegister::PpuStatus,
            3 => PpuRegister::OamAddr,
            4 => PpuRegister::OamData,
            5 => PpuRegister::PpuScroll,
            6 => PpuRegister::PpuAddr,
            _ => PpuRegister::PpuData,
        }
    }
}

/// PPU control flags
#[derive(Debug, Clone, Copy)]
pub struct PpuCtrl(u8);

impl PpuCtrl {
    pub const NMI_ENABLE: u8 = 0b10000000;
    pub const SPRITE_SIZE: u8 = 0b00100000;
    pub const BG_PATTERN_TABLE: u8 = 0b00010000;
    pub const SPR_PATTERN_TABLE: u8 = 0b00001000;
    pub const VRAM_INC: u8 = 0b00000100;
    pub const NAMETABLE: u8 = 0b00000011;

    pub fn new(val: u8) -> Self {
        Self(val)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn nmi_enable(&self) -> bool {
        (self.0 & Self::NMI_ENABLE) != 0
    }

    /// 8 or 16
    pub fn sprite_height(&self) -> u16 {
        if (self.0 & Self::SPRITE_SIZE) != 0 {
            16
        } else {
            8
        }
    }

    pub fn background_table(&self) -> u16 {
        if (self.0 & Self::BG_PATTERN_TABLE) != 0 {
            0x1000
        } else {
            0x0000
        }
    }

    /// Pattern table for 8x8 sprites
    pub fn sprite_table(&self) -> u16 {
        if (self.0 & Self::SPR_PATTERN_TABLE) != 0 {
            0x1000
        } else {
            0x0000
        }
    }

    /// $2007 address step
    pub fn vram_increment(&self) -> u16 {
        if (self.0 & Self::VRAM_INC) != 0 {
            32
        } else {
            1
        }
    }

    pub fn nametable(&self) -> u8 {
        self.0 & Self::NAMETABLE
    }
}

/// PPU status flags
#[derive(Debug, Clone, Copy)]
pub struct PpuStatus(u8);

impl PpuStatus {
    pub const VBLANK: u8 = 0b10000000;
    pub const SPRITE_ZERO_HIT: u8 = 0b01000000;
    pub const SPRITE_OVERFLOW: u8 = 0b00100000;

    pub fn new(val: u8) -> Self {
        Self(val)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn vblank(&self) -> bool {
        (self.0 & Self::VBLANK) != 0
    }

    pub fn sprite_zero_hit(&self) -> bool {
        (self.0 & Self::SPRITE_ZERO_HIT) != 0
    }

    pub fn sprite_overflow(&self) -> bool {
        (self.0 & Self::SPRITE_OVERFLOW) != 0
    }
}

/// PPU render mask flags
#[derive(Debug, Clone, Copy)]
pub struct PpuMask(u8);

impl PpuMask {
    pub const GRAYSCALE: u8 = 0b00000001;
    pub const RENDER_BG_LEFT: u8 = 0b00000010;
    pub const RENDER_SPR_LEFT: u8 = 0b00000100;
    pub const RENDER_BG: u8 = 0b00001000;
    pub const RENDER_SPR: u8 = 0b00010000;

    pub fn new(val: u8) -> Self {
        Self(val)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn render_background(&self) -> bool {
        (self.0 & Self::RENDER_BG) != 0
    }

    pub fn render_sprites(&self) -> bool {
        (self.0 & Self::RENDER_SPR) != 0
    }

    pub fn rendering_enabled(&self) -> bool {
        self.render_background() || self.render_sprites()
    }
}

/// 15-bit VRAM address: `yyy NN YYYYY XXXXX`
///
/// fine Y (12-14), nametable select (10-11), coarse Y (5-9), coarse X (0-4)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VramAddr(u16);

impl VramAddr {
    const COARSE_X: u16 = 0x001F;
    const COARSE_Y: u16 = 0x03E0;
    const NAMETABLE: u16 = 0x0C00;
    const NAMETABLE_X: u16 = 0x0400;
    const NAMETABLE_Y: u16 = 0x0800;
    const FINE_Y: u16 = 0x7000;
    const HORIZONTAL: u16 = Self::COARSE_X | Self::NAMETABLE_X;
    const VERTICAL: u16 = Self::FINE_Y | Self::NAMETABLE_Y | Self::COARSE_Y;

    pub fn new(value: u16) -> Self {
        Self(value & 0x7FFF)
    }

    pub fn get(&self) -> u16 {
        self.0
    }

    pub fn set(&mut self, value: u16) {
        self.0 = value & 0x7FFF;
    }

    pub fn coarse_x(&self) -> u8 {
        (self.0 & Self::COARSE_X) as u8
    }

    pub fn set_coarse_x(&mut self, value: u8) {
        self.0 = (self.0 & !Self::COARSE_X) | (value as u16 & 0x1F);
    }

    pub fn coarse_y(&self) -> u8 {
        ((self.0 & Self::COARSE_Y) >> 5) as u8
    }

    pub fn set_coarse_y(&mut self, value: u8) {
        self.0 = (self.0 & !Self::COARSE_Y) | ((value as u16 & 0x1F) << 5);
    }

    pub fn nametable(&self) -> u8 {
        ((self.0 & Self::NAMETABLE) >> 10) as u8
    }

    pub fn set_nametable(&mut self, value: u8) {
        self.0 = (self.0 & !Self::NAMETABLE) | ((value as u16 & 0x03) << 10);
    }

    pub fn fine_y(&self) -> u8 {
        ((self.0 & Self::FINE_Y) >> 12) as u8
    }

    pub fn set_fine_y(&mut self, value: u8) {
        self.0 = (self.0 & !Self::FINE_Y) | ((value as u16 & 0x07) << 12);
    }

    /// Advance by the $2007 step, wrapping at 15 bits
    pub fn increment(&mut self, step: u16) {
        self.0 = self.0.wrapping_add(step) & 0x7FFF;
    }

    /// Coarse X + 1, switching horizontal nametable on wrap
    pub fn increment_coarse_x(&mut self) {
        if self.coarse_x() == 31 {
            self.0 &= !Self::COARSE_X;
            self.0 ^= Self::NAMETABLE_X;
        } else {
            self.0 += 1;
        }
    }

    /// Fine Y + 1, carrying into coarse Y
    ///
    /// Row 29 wraps to 0 and switches vertical nametable; rows 30/31 (attribute
    /// memory) wrap from 31 to 0 without switching.
    pub fn increment_y(&mut self) {
        if self.fine_y() < 7 {
            self.0 += 0x1000;
            return;
        }

        self.0 &= !Self::FINE_Y;
        let coarse_y = match self.coarse_y() {
            29 => {
                self.0 ^= Self::NAMETABLE_Y;
                0
            }
            31 => 0,
            y => y + 1,
        };
        self.set_coarse_y(coarse_y);
    }

    /// Copy coarse X and the horizontal nametable bit from `t`
    pub fn copy_horizontal(&mut self, t: VramAddr) {
        self.0 = (self.0 & !Self::HORIZONTAL) | (t.0 & Self::HORIZONTAL);
    }

    /// Copy fine Y, coarse Y and the vertical nametable bit from `t`
    pub fn copy_vertical(&mut self, t: VramAddr) {
        self.0 = (self.0 & !Self::VERTICAL) | (t.0 & Self::VERTICAL);
    }

    /// Nametable byte for the current tile
    pub fn tile_address(&self) -> u16 {
        0x2000 | (self.0 & 0x0FFF)
    }

    /// Attribute byte covering the current tile
    pub fn attribute_address(&self) -> u16 {
        0x23C0 | (self.0 & Self::NAMETABLE) | ((self.0 >> 4) & 0x38) | ((self.0 >> 2) & 0x07)
    }
}

/// Internal scroll latches shared by $2005/$2006 and the pipeline
#[derive(Debug, Clone, Copy, Default)]
pub struct VramRegisters {
    /// Current VRAM address
    pub v: VramAddr,
    /// Temporary VRAM address
    pub t: VramAddr,
    /// Fine X scroll (3 bits)
    pub fine_x: u8,
    /// First/second write toggle
    pub write_toggle: bool,
}

impl VramRegisters {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// One sprite as stored in OAM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OamEntry {
    pub y: u8,
    pub tile: u8,
    pub attribute: u8,
    pub x: u8,
}

impl OamEntry {
    pub const FLIP_VERTICAL: u8 = 0x80;
    pub const FLIP_HORIZONTAL: u8 = 0x40;
    pub const PALETTE: u8 = 0x03;

    /// Unused secondary OAM slot
    pub const EMPTY: OamEntry = OamEntry {
        y: 0xFF,
        tile: 0xFF,
        attribute: 0xFF,
        x: 0xFF,
    };

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            y: bytes[0],
            tile: bytes[1],
            attribute: bytes[2],
            x: bytes[3],
        }
    }

    /// True when screen column `x` falls inside this sprite
    fn covers(&self, x: u16) -> bool {
        let left = self.x as u16;
        x >= left && x <= left + 7
    }
}

/// Opaque sprite pixel chosen for one dot
#[derive(Debug, Clone, Copy)]
struct SpritePixel {
    slot: usize,
    pixel: u8,
    palette: u8,
}

/// PPU pipeline state
#[derive(Debug, Clone)]
pub struct Ppu {
    /// Scanline position (0-261)
    scanline: u16,
    /// Dot position (0-340)
    dot: u16,
    /// Completed frames
    frame: u64,
    even_frame: bool,

    /// Fetch latches
    nametable_latch: u8,
    attribute_latch: u8,
    pattern_lo_latch: u8,
    pattern_hi_latch: u8,

    /// Background shifters
    bg_shifter_lo: u16,
    bg_shifter_hi: u16,
    attr_shifter_lo: u16,
    attr_shifter_hi: u16,

    /// Sprites selected for the next line
    secondary_oam: [OamEntry; MAX_SPRITES_PER_LINE],
    sprite_count: usize,
    sprite_shifter_lo: [u8; MAX_SPRITES_PER_LINE],
    sprite_shifter_hi: [u8; MAX_SPRITES_PER_LINE],
    /// OAM entry 0 is in slot 0 for the next line
    sprite_zero_eligible: bool,

    nmi_requested: bool,

    /// Frame being drawn
    back_buffer: Vec<u8>,
    /// Last completed frame
    front_buffer: Vec<u8>,
    frame_ready: bool,
}

impl Ppu {
    /// Create a new PPU instance
    pub fn new() -> Self {
        Self {
            scanline: 0,
            dot: 0,
            frame: 0,
            even_frame: true,
            nametable_latch: 0,
            attribute_latch: 0,
            pattern_lo_latch: 0,
            pattern_hi_latch: 0,
            bg_shifter_lo: 0,
            bg_shifter_hi: 0,
            attr_shifter_lo: 0,
            attr_shifter_hi: 0,
            secondary_oam: [OamEntry::EMPTY; MAX_SPRITES_PER_LINE],
            sprite_count: 0,
            sprite_shifter_lo: [0; MAX_SPRITES_PER_LINE],
            sprite_shifter_hi: [0; MAX_SPRITES_PER_LINE],
            sprite_zero_eligible: false,
            nmi_requested: false,
            back_buffer: vec![0; FRAME_SIZE],
            front_buffer: vec![0; FRAME_SIZE],
            frame_ready: false,
        }
    }

    /// Reset the pipeline and the scroll latches on the bus
    pub fn reset(&mut self, bus: &mut Bus) {
        *self = Self::new();
        bus.vram_registers_mut().reset();
    }

    /// Step the PPU by one dot
    pub fn step(&mut self, bus: &mut Bus) {
        if self.scanline == VBLANK_SCANLINE && self.dot == 1 {
            bus.set_flag(PpuRegister::PpuStatus, PpuStatus::VBLANK, true);
            if bus.control().nmi_enable() {
                self.nmi_requested = true;
            }
        }

        if self.scanline == PRE_RENDER_SCANLINE && self.dot == 1 {
            bus.set_flag(
                PpuRegister::PpuStatus,
                PpuStatus::VBLANK | PpuStatus::SPRITE_ZERO_HIT | PpuStatus::SPRITE_OVERFLOW,
                false,
            );
        }

        let mask = bus.mask();
        let render_line =
            self.scanline <= LAST_VISIBLE_SCANLINE || self.scanline == PRE_RENDER_SCANLINE;
        if mask.rendering_enabled() && render_line {
            self.render_dot(bus, mask);
        }

        self.advance(bus.mask().render_background());
    }

    fn render_dot(&mut self, bus: &mut Bus, mask: PpuMask) {
        let dot = self.dot;

        if self.scanline <= LAST_VISIBLE_SCANLINE && (1..=256).contains(&dot) {
            self.emit_pixel(bus, mask);
        }

        match dot {
            1..=256 => {
                self.shift_sprites(mask);
                self.shift_background(mask);
            }
            321..=336 => self.shift_background(mask),
            _ => {}
        }

        if matches!(dot, 1..=256 | 321..=336) {
            self.fetch_background(bus);
        }

        if dot == 256 {
            bus.vram_registers_mut().v.increment_y();
        }

        if dot == 257 {
            let regs = bus.vram_registers_mut();
            let t = regs.t;
            regs.v.copy_horizontal(t);
            self.evaluate_sprites(bus);
        }

        // Dummy nametable fetches; the byte is discarded
        if dot == 337 || dot == 339 {
            let _ = bus.ppu_read(bus.vram_registers().v.tile_address());
        }

        if self.scanline == PRE_RENDER_SCANLINE && (280..=304).contains(&dot) {
            let regs = bus.vram_registers_mut();
            let t = regs.t;
            regs.v.copy_vertical(t);
        }
    }

    /// One step of the 8-dot nametable/attribute/pattern fetch cycle
    fn fetch_background(&mut self, bus: &mut Bus) {
        let v = bus.vram_registers().v;
        match self.dot % 8 {
            1 => self.nametable_latch = bus.ppu_read(v.tile_address()),
            3 => {
                let attribute = bus.ppu_read(v.attribute_address());
                let shift = ((v.coarse_y() & 0x02) << 1) | (v.coarse_x() & 0x02);
                self.attribute_latch = (attribute >> shift) & 0x03;
            }
            5 => self.pattern_lo_latch = bus.ppu_read(self.background_pattern_address(bus, v)),
            7 => {
                self.pattern_hi_latch = bus.ppu_read(self.background_pattern_address(bus, v) + 8)
            }
            0 => {
                self.reload_background_shifters();
                bus.vram_registers_mut().v.increment_coarse_x();
            }
            _ => {}
        }
    }

    fn background_pattern_address(&self, bus: &Bus, v: VramAddr) -> u16 {
        bus.control().background_table() + ((self.nametable_latch as u16) << 4) + v.fine_y() as u16
    }

    fn reload_background_shifters(&mut self) {
        self.bg_shifter_lo |= self.pattern_lo_latch as u16;
        self.bg_shifter_hi |= self.pattern_hi_latch as u16;
        self.attr_shifter_lo |= if self.attribute_latch & 0x01 != 0 { 0x00FF } else { 0 };
        self.attr_shifter_hi |= if self.attribute_latch & 0x02 != 0 { 0x00FF } else { 0 };
    }

    fn shift_background(&mut self, mask: PpuMask) {
        if mask.render_background() {
            self.bg_shifter_lo <<= 1;
            self.bg_shifter_hi <<= 1;
            self.attr_shifter_lo <<= 1;
            self.attr_shifter_hi <<= 1;
        }
    }

    fn shift_sprites(&mut self, mask: PpuMask) {
        if !mask.render_sprites() {
            return;
        }
        let x = self.dot - 1;
        for slot in 0..self.sprite_count {
            if self.secondary_oam[slot].covers(x) {
                self.sprite_shifter_lo[slot] <<= 1;
                self.sprite_shifter_hi[slot] <<= 1;
            }
        }
    }

    fn background_pixel(&self, bus: &Bus) -> (u8, u8) {
        let bit = 15 - bus.vram_registers().fine_x as u16;
        let p0 = ((self.bg_shifter_lo >> bit) & 1) as u8;
        let p1 = ((self.bg_shifter_hi >> bit) & 1) as u8;
        let a0 = ((self.attr_shifter_lo >> bit) & 1) as u8;
        let a1 = ((self.attr_shifter_hi >> bit) & 1) as u8;
        ((p1 << 1) | p0, (a1 << 1) | a0)
    }

    fn sprite_pixel(&self, x: u16) -> Option<SpritePixel> {
        (0..self.sprite_count).find_map(|slot| {
            let entry = &self.secondary_oam[slot];
            if !entry.covers(x) {
                return None;
            }
            let p0 = (self.sprite_shifter_lo[slot] >> 7) & 1;
            let p1 = (self.sprite_shifter_hi[slot] >> 7) & 1;
            let pixel = (p1 << 1) | p0;
            (pixel != 0).then_some(SpritePixel {
                slot,
                pixel,
                palette: (entry.attribute & OamEntry::PALETTE) + 4,
            })
        })
    }

    fn emit_pixel(&mut self, bus: &mut Bus, mask: PpuMask) {
        let x = self.dot - 1;

        let (bg_pixel, bg_palette) = if mask.render_background() {
            self.background_pixel(bus)
        } else {
            (0, 0)
        };
        let sprite = if mask.render_sprites() {
            self.sprite_pixel(x)
        } else {
            None
        };

        let (pixel, palette) = match sprite {
            None if bg_pixel == 0 => (0, 0),
            None => (bg_pixel, bg_palette),
            Some(sprite) => {
                if bg_pixel != 0 && sprite.slot == 0 && self.sprite_zero_eligible {
                    bus.set_flag(PpuRegister::PpuStatus, PpuStatus::SPRITE_ZERO_HIT, true);
                }
                (sprite.pixel, sprite.palette)
            }
        };

        let color = bus.ppu_read(0x3F00 + palette as u16 * 4 + pixel as u16) & 0x3F;
        let (r, g, b) = SYSTEM_PALETTE[color as usize];
        let offset = (self.scanline as usize * FRAME_WIDTH + x as usize) * BYTES_PER_PIXEL;
        self.back_buffer[offset] = r;
        self.back_buffer[offset + 1] = g;
        self.back_buffer[offset + 2] = b;
    }

    /// Select up to eight sprites for the next line and load their patterns
    fn evaluate_sprites(&mut self, bus: &mut Bus) {
        self.secondary_oam = [OamEntry::EMPTY; MAX_SPRITES_PER_LINE];
        self.sprite_count = 0;
        self.sprite_zero_eligible = false;

        let control = bus.control();
        let height = control.sprite_height();

        for index in 0..OAM_ENTRIES {
            let entry = bus.oam_entry(index);
            let top = entry.y as u16;
            if self.scanline < top || self.scanline >= top + height {
                continue;
            }

            if self.sprite_count == MAX_SPRITES_PER_LINE {
                bus.set_flag(PpuRegister::PpuStatus, PpuStatus::SPRITE_OVERFLOW, true);
                break;
            }

            if index == 0 {
                self.sprite_zero_eligible = true;
            }

            let row = self.scanline - top;
            let address = sprite_row_address(control, &entry, row);
            let mut lo = bus.ppu_read(address);
            let mut hi = bus.ppu_read(address + 8);
            if entry.attribute & OamEntry::FLIP_HORIZONTAL != 0 {
                lo = REVERSE_BITS[lo as usize];
                hi = REVERSE_BITS[hi as usize];
            }

            let slot = self.sprite_count;
            self.secondary_oam[slot] = entry;
            self.sprite_shifter_lo[slot] = lo;
            self.sprite_shifter_hi[slot] = hi;
            self.sprite_count += 1;
        }
    }

    fn advance(&mut self, background_enabled: bool) {
        let short_frame = !self.even_frame && background_enabled;
        let end_of_frame = self.scanline == PRE_RENDER_SCANLINE
            && (self.dot == LAST_DOT || (self.dot == LAST_DOT - 1 && short_frame));

        if end_of_frame {
            self.finish_frame();
        } else if self.dot == LAST_DOT {
            self.dot = 0;
            self.scanline += 1;
        } else {
            self.dot += 1;
        }
    }

    fn finish_frame(&mut self) {
        self.dot = 0;
        self.scanline = 0;
        self.frame += 1;
        self.even_frame = !self.even_frame;

        self.front_buffer.copy_from_slice(&self.back_buffer);
        self.back_buffer.fill(0);
        self.frame_ready = true;
        trace!(frame = self.frame, "frame complete");
    }

    /// Consume a pending NMI request
    pub fn take_nmi(&mut self) -> bool {
        std::mem::take(&mut self.nmi_requested)
    }

    /// NMI raised and not yet delivered
    pub fn nmi_pending(&self) -> bool {
        self.nmi_requested
    }

    /// Consume the frame-ready signal
    pub fn take_frame_ready(&mut self) -> bool {
        std::mem::take(&mut self.frame_ready)
    }

    /// Last completed frame, 256x240 RGB row-major
    pub fn frame(&self) -> &[u8] {
        &self.front_buffer
    }

    /// Get current scanline
    pub fn scanline(&self) -> u16 {
        self.scanline
    }

    /// Get current dot
    pub fn dot(&self) -> u16 {
        self.dot
    }

    /// Completed frames since reset
    pub fn frame_count(&self) -> u64 {
        self.frame
    }

    pub fn is_odd_frame(&self) -> bool {
        !self.even_frame
    }

    /// Sprites selected for the next line
    pub fn secondary_oam(&self) -> &[OamEntry] {
        &self.secondary_oam[..self.sprite_count]
    }

    pub fn sprite_count(&self) -> usize {
        self.sprite_count
    }
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new()
    }
}

/// Pattern address of the sprite row that `row` (0-based from the top) selects
fn sprite_row_address(control: PpuCtrl, entry: &OamEntry, row: u16) -> u16 {
    let flip = entry.attribute & OamEntry::FLIP_VERTICAL != 0;

    if control.sprite_height() == 16 {
        let row = if flip { 15 - row } else { row };
        let table = (entry.tile as u16 & 0x01) * 0x1000;
        let tile = (entry.tile as u16 & 0xFE) + row / 8;
        table + (tile << 4) + row % 8
    } else {
        let row = if flip { 7 - row } else { row };
        control.sprite_table() + ((entry.tile as u16) << 4) + row
    }
}
