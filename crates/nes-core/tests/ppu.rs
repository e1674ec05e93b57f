//! PPU tests for the NES emulator

use nes_core::bus::Bus;
use nes_core::cartridge::{Cartridge, Mirroring};
use nes_core::cpu::Bus as _;
use nes_core::ppu::{
    Ppu, PpuCtrl, PpuMask, FRAME_SIZE, FRAME_WIDTH, LAST_DOT, PRE_RENDER_SCANLINE,
    VBLANK_SCANLINE,
};

const DOTS_PER_FRAME: u32 = 262 * 341;

fn bus_with(mirroring: Mirroring) -> Bus {
    let mut bus = Bus::new();
    bus.load_cartridge(&Cartridge::new(vec![0; 0x4000], Vec::new(), mirroring));
    bus
}

fn run_until(ppu: &mut Ppu, bus: &mut Bus, scanline: u16, dot: u16) {
    while !(ppu.scanline() == scanline && ppu.dot() == dot) {
        ppu.step(bus);
    }
}

/// Dots stepped until the next frame completes
fn dots_in_frame(ppu: &mut Ppu, bus: &mut Bus) -> u32 {
    let mut dots = 0;
    loop {
        ppu.step(bus);
        dots += 1;
        if ppu.take_frame_ready() {
            return dots;
        }
    }
}

fn set_vram_address(bus: &mut Bus, address: u16) {
    bus.write(0x2006, (address >> 8) as u8);
    bus.write(0x2006, address as u8);
}

/// Solid tile 1 in pattern table 0 and a nametable full of it
fn fill_background(bus: &mut Bus) {
    for row in 0..8 {
        bus.ppu_write(0x0010 + row, 0xFF);
    }
    for address in 0x2000..0x23C0 {
        bus.ppu_write(address, 0x01);
    }
}

fn write_sprite(bus: &mut Bus, index: u8, y: u8, tile: u8, attribute: u8, x: u8) {
    bus.write(0x2003, index * 4);
    for byte in [y, tile, attribute, x] {
        bus.write(0x2004, byte);
    }
}

fn pixel(frame: &[u8], x: usize, y: usize) -> (u8, u8, u8) {
    let offset = (y * FRAME_WIDTH + x) * 3;
    (frame[offset], frame[offset + 1], frame[offset + 2])
}

#[test]
fn test_vblank_window() {
    let mut bus = Bus::new();
    let mut ppu = Ppu::new();

    run_until(&mut ppu, &mut bus, VBLANK_SCANLINE, 1);
    assert!(!bus.status().vblank());
    ppu.step(&mut bus);
    assert!(bus.status().vblank());

    run_until(&mut ppu, &mut bus, PRE_RENDER_SCANLINE, 1);
    assert!(bus.status().vblank());
    ppu.step(&mut bus);
    assert!(!bus.status().vblank());
}

#[test]
fn test_nmi_requested_when_enabled_at_vblank() {
    let mut bus = Bus::new();
    let mut ppu = Ppu::new();
    bus.write(0x2000, PpuCtrl::NMI_ENABLE);

    run_until(&mut ppu, &mut bus, VBLANK_SCANLINE, 1);
    assert!(!ppu.nmi_pending());
    ppu.step(&mut bus);
    assert!(ppu.take_nmi());
}

#[test]
fn test_no_nmi_when_enabled_after_vblank_start() {
    let mut bus = Bus::new();
    let mut ppu = Ppu::new();

    run_until(&mut ppu, &mut bus, VBLANK_SCANLINE, 2);
    bus.write(0x2000, PpuCtrl::NMI_ENABLE);
    run_until(&mut ppu, &mut bus, PRE_RENDER_SCANLINE, 0);
    assert!(bus.status().vblank());
    assert!(!ppu.take_nmi());
}

#[test]
fn test_status_read_acknowledges_vblank() {
    let mut bus = Bus::new();
    let mut ppu = Ppu::new();

    run_until(&mut ppu, &mut bus, VBLANK_SCANLINE, 2);
    assert_eq!(bus.read(0x2002) & 0x80, 0x80);
    assert_eq!(bus.read(0x2002) & 0x80, 0x00);
}

#[test]
fn test_horizontal_mirroring_through_data_port() {
    let mut bus = bus_with(Mirroring::Horizontal);
    set_vram_address(&mut bus, 0x2005);
    bus.write(0x2007, 0x42);

    assert_eq!(bus.ppu_read(0x2405), 0x42);
    assert_eq!(bus.ppu_read(0x2805), 0x00);
}

#[test]
fn test_vertical_mirroring_through_data_port() {
    let mut bus = bus_with(Mirroring::Vertical);
    set_vram_address(&mut bus, 0x2005);
    bus.write(0x2007, 0x42);

    assert_eq!(bus.ppu_read(0x2805), 0x42);
    assert_eq!(bus.ppu_read(0x2405), 0x00);
}

#[test]
fn test_sprite_overflow_with_nine_sprites() {
    let mut bus = Bus::new();
    let mut ppu = Ppu::new();
    bus.write(0x2001, PpuMask::RENDER_SPR);
    for index in 0..9 {
        write_sprite(&mut bus, index, 50, 0, 0, index * 8);
    }

    run_until(&mut ppu, &mut bus, 50, 257);
    assert!(!bus.status().sprite_overflow());
    ppu.step(&mut bus);

    assert_eq!(ppu.sprite_count(), 8);
    assert_eq!(ppu.secondary_oam().len(), 8);
    assert_eq!(ppu.secondary_oam()[7].x, 56);
    assert!(bus.status().sprite_overflow());

    // Cleared on the pre-render line
    run_until(&mut ppu, &mut bus, PRE_RENDER_SCANLINE, 2);
    assert!(!bus.status().sprite_overflow());
}

#[test]
fn test_eight_sprites_do_not_overflow() {
    let mut bus = Bus::new();
    let mut ppu = Ppu::new();
    bus.write(0x2001, PpuMask::RENDER_SPR);
    for index in 0..8 {
        write_sprite(&mut bus, index, 50, 0, 0, index * 8);
    }

    run_until(&mut ppu, &mut bus, 50, 258);
    assert_eq!(ppu.sprite_count(), 8);
    assert!(!bus.status().sprite_overflow());
}

#[test]
fn test_tall_sprites_cover_sixteen_lines() {
    let mut bus = Bus::new();
    let mut ppu = Ppu::new();
    bus.write(0x2000, PpuCtrl::SPRITE_SIZE);
    bus.write(0x2001, PpuMask::RENDER_SPR);
    write_sprite(&mut bus, 0, 20, 0, 0, 0);

    run_until(&mut ppu, &mut bus, 35, 258);
    assert_eq!(ppu.sprite_count(), 1);
    run_until(&mut ppu, &mut bus, 36, 258);
    assert_eq!(ppu.sprite_count(), 0);
}

#[test]
fn test_odd_frame_is_one_dot_shorter_with_background() {
    let mut bus = Bus::new();
    let mut ppu = Ppu::new();
    bus.write(0x2001, PpuMask::RENDER_BG);

    assert_eq!(dots_in_frame(&mut ppu, &mut bus), DOTS_PER_FRAME);
    assert!(ppu.is_odd_frame());
    assert_eq!(dots_in_frame(&mut ppu, &mut bus), DOTS_PER_FRAME - 1);
    assert_eq!(dots_in_frame(&mut ppu, &mut bus), DOTS_PER_FRAME);
    assert_eq!(ppu.frame_count(), 3);
}

#[test]
fn test_odd_frame_full_length_when_rendering_off() {
    let mut bus = Bus::new();
    let mut ppu = Ppu::new();

    assert_eq!(dots_in_frame(&mut ppu, &mut bus), DOTS_PER_FRAME);
    assert_eq!(dots_in_frame(&mut ppu, &mut bus), DOTS_PER_FRAME);
}

#[test]
fn test_odd_frame_wraps_from_dot_339() {
    let mut bus = Bus::new();
    let mut ppu = Ppu::new();
    bus.write(0x2001, PpuMask::RENDER_BG);

    dots_in_frame(&mut ppu, &mut bus);
    run_until(&mut ppu, &mut bus, PRE_RENDER_SCANLINE, LAST_DOT - 1);
    ppu.step(&mut bus);
    assert_eq!((ppu.scanline(), ppu.dot()), (0, 0));
}

#[test]
fn test_background_pixels_reach_frame() {
    let mut bus = Bus::new();
    let mut ppu = Ppu::new();
    fill_background(&mut bus);
    bus.ppu_write(0x3F00, 0x21);
    bus.ppu_write(0x3F01, 0x30);
    bus.write(0x2001, PpuMask::RENDER_BG);

    dots_in_frame(&mut ppu, &mut bus);
    let frame = ppu.frame();
    assert_eq!(frame.len(), FRAME_SIZE);
    assert_eq!(pixel(frame, 50, 10), (0xFC, 0xFC, 0xFC));
    assert_eq!(pixel(frame, 255, 239), (0xFC, 0xFC, 0xFC));
    // No prefetch precedes the first line after power-on, so it starts on the backdrop
    assert_eq!(pixel(frame, 0, 0), (0x3C, 0xBC, 0xFC));
}

#[test]
fn test_frame_buffer_cleared_after_handoff() {
    let mut bus = Bus::new();
    let mut ppu = Ppu::new();
    fill_background(&mut bus);
    bus.ppu_write(0x3F01, 0x30);
    bus.write(0x2001, PpuMask::RENDER_BG);
    dots_in_frame(&mut ppu, &mut bus);
    assert!(ppu.frame().iter().any(|&b| b != 0));

    bus.write(0x2001, 0);
    dots_in_frame(&mut ppu, &mut bus);
    assert!(ppu.frame().iter().all(|&b| b == 0));
}

#[test]
fn test_sprite_over_background_sets_sprite_zero_hit() {
    let mut bus = Bus::new();
    let mut ppu = Ppu::new();
    fill_background(&mut bus);
    bus.ppu_write(0x3F11, 0x16);
    write_sprite(&mut bus, 0, 30, 1, 0, 100);
    bus.write(0x2001, PpuMask::RENDER_BG | PpuMask::RENDER_SPR);

    run_until(&mut ppu, &mut bus, 31, 100);
    assert!(!bus.status().sprite_zero_hit());
    run_until(&mut ppu, &mut bus, 31, 102);
    assert!(bus.status().sprite_zero_hit());

    // Sprite palette 4, color 1
    dots_in_frame(&mut ppu, &mut bus);
    assert_eq!(pixel(ppu.frame(), 100, 31), (0xF8, 0x38, 0x00));
    assert!(!bus.status().sprite_zero_hit());
}

#[test]
fn test_no_sprite_zero_hit_without_background() {
    let mut bus = Bus::new();
    let mut ppu = Ppu::new();
    fill_background(&mut bus);
    write_sprite(&mut bus, 0, 30, 1, 0, 100);
    bus.write(0x2001, PpuMask::RENDER_SPR);

    run_until(&mut ppu, &mut bus, 40, 0);
    assert!(!bus.status().sprite_zero_hit());
}

#[test]
fn test_horizontal_flip_mirrors_sprite_pixels() {
    let mut bus = Bus::new();
    let mut ppu = Ppu::new();
    // Tile 2: leftmost column only
    for row in 0..8 {
        bus.ppu_write(0x0020 + row, 0x80);
    }
    bus.ppu_write(0x3F00, 0x0F);
    bus.ppu_write(0x3F11, 0x30);
    write_sprite(&mut bus, 0, 10, 2, 0, 16);
    write_sprite(&mut bus, 1, 10, 2, 0x40, 40);
    bus.write(0x2001, PpuMask::RENDER_SPR);

    dots_in_frame(&mut ppu, &mut bus);
    let frame = ppu.frame();
    assert_eq!(pixel(frame, 16, 12), (0xFC, 0xFC, 0xFC));
    assert_eq!(pixel(frame, 17, 12), (0x00, 0x00, 0x00));
    assert_eq!(pixel(frame, 47, 12), (0xFC, 0xFC, 0xFC));
    assert_eq!(pixel(frame, 40, 12), (0x00, 0x00, 0x00));
}

#[test]
fn test_attribute_byte_selects_quadrant_palettes() {
    let mut bus = Bus::new();
    let mut ppu = Ppu::new();
    fill_background(&mut bus);
    bus.ppu_write(0x23C0, 0b11_10_01_00);
    bus.ppu_write(0x3F00, 0x0F);
    for (palette, color) in [0x30, 0x16, 0x2A, 0x12].into_iter().enumerate() {
        bus.ppu_write(0x3F01 + palette as u16 * 4, color);
    }
    bus.write(0x2001, PpuMask::RENDER_BG);

    dots_in_frame(&mut ppu, &mut bus);
    dots_in_frame(&mut ppu, &mut bus);
    let frame = ppu.frame();
    assert_eq!(pixel(frame, 0, 4), (0xFC, 0xFC, 0xFC));
    assert_eq!(pixel(frame, 16, 4), (0xF8, 0x38, 0x00));
    assert_eq!(pixel(frame, 0, 20), (0x58, 0xD8, 0x54));
    assert_eq!(pixel(frame, 16, 20), (0x00, 0x58, 0xF8));
    // Next attribute byte is zero
    assert_eq!(pixel(frame, 32, 4), (0xFC, 0xFC, 0xFC));
}

#[test]
fn test_fine_x_scroll_shifts_background() {
    let mut bus = Bus::new();
    let mut ppu = Ppu::new();
    // Tile 2: leftmost column only
    for row in 0..8 {
        bus.ppu_write(0x0020 + row, 0x80);
    }
    for address in 0x2000..0x23C0 {
        bus.ppu_write(address, 0x02);
    }
    bus.ppu_write(0x3F00, 0x0F);
    bus.ppu_write(0x3F01, 0x30);
    bus.write(0x2005, 0x03);
    bus.write(0x2005, 0x00);
    bus.write(0x2001, PpuMask::RENDER_BG);

    dots_in_frame(&mut ppu, &mut bus);
    dots_in_frame(&mut ppu, &mut bus);
    let frame = ppu.frame();
    assert_eq!(pixel(frame, 5, 4), (0xFC, 0xFC, 0xFC));
    assert_eq!(pixel(frame, 13, 4), (0xFC, 0xFC, 0xFC));
    assert_eq!(pixel(frame, 0, 4), (0x00, 0x00, 0x00));
    assert_eq!(pixel(frame, 4, 4), (0x00, 0x00, 0x00));
    assert_eq!(pixel(frame, 6, 4), (0x00, 0x00, 0x00));
}

#[test]
fn test_vertical_scroll_reloaded_on_pre_render_line() {
    let mut bus = Bus::new();
    let mut ppu = Ppu::new();
    for row in 0..8 {
        bus.ppu_write(0x0010 + row, 0xFF);
    }
    // Only nametable row 1 holds the solid tile
    for address in 0x2020..0x2040 {
        bus.ppu_write(address, 0x01);
    }
    bus.ppu_write(0x3F00, 0x0F);
    bus.ppu_write(0x3F01, 0x30);
    bus.write(0x2005, 0x00);
    bus.write(0x2005, 0x08);
    bus.write(0x2001, PpuMask::RENDER_BG);

    // The first frame starts before any reload
    dots_in_frame(&mut ppu, &mut bus);
    assert_eq!(pixel(ppu.frame(), 40, 0), (0x00, 0x00, 0x00));
    assert_eq!(pixel(ppu.frame(), 40, 8), (0xFC, 0xFC, 0xFC));

    dots_in_frame(&mut ppu, &mut bus);
    let frame = ppu.frame();
    assert_eq!(pixel(frame, 40, 0), (0xFC, 0xFC, 0xFC));
    assert_eq!(pixel(frame, 40, 7), (0xFC, 0xFC, 0xFC));
    assert_eq!(pixel(frame, 40, 8), (0x00, 0x00, 0x00));
}

#[test]
fn test_sprite_zero_hit_ignores_other_slots() {
    let mut bus = Bus::new();
    let mut ppu = Ppu::new();
    fill_background(&mut bus);
    bus.ppu_write(0x3F11, 0x16);
    write_sprite(&mut bus, 0, 0xFF, 0, 0, 0);
    write_sprite(&mut bus, 1, 30, 1, 0, 100);
    bus.write(0x2001, PpuMask::RENDER_BG | PpuMask::RENDER_SPR);

    run_until(&mut ppu, &mut bus, 40, 0);
    assert!(!bus.status().sprite_zero_hit());

    dots_in_frame(&mut ppu, &mut bus);
    assert_eq!(pixel(ppu.frame(), 100, 31), (0xF8, 0x38, 0x00));
}

#[test]
fn test_first_opaque_sprite_wins_overlap() {
    let mut bus = Bus::new();
    let mut ppu = Ppu::new();
    for row in 0..8 {
        bus.ppu_write(0x0010 + row, 0xFF);
    }
    bus.ppu_write(0x3F00, 0x0F);
    bus.ppu_write(0x3F11, 0x30);
    // Slot 0 uses the blank tile 0, slot 1 the solid tile 1
    write_sprite(&mut bus, 0, 10, 0, 0, 100);
    write_sprite(&mut bus, 1, 10, 1, 0, 100);
    bus.write(0x2001, PpuMask::RENDER_SPR);

    dots_in_frame(&mut ppu, &mut bus);
    assert_eq!(pixel(ppu.frame(), 100, 12), (0xFC, 0xFC, 0xFC));
    assert_eq!(pixel(ppu.frame(), 108, 12), (0x00, 0x00, 0x00));
}
