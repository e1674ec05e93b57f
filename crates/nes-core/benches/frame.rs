use criterion::{black_box, criterion_group, criterion_main, Criterion};

use nes_core::cartridge::{Cartridge, Mirroring};
use nes_core::system::NesSystem;

/// Background enabled, NMI enabled, idle loop
fn demo_system() -> NesSystem {
    // LDA #$80; STA $2000; LDA #$1E; STA $2001; loop: JMP loop
    let program = [
        0xA9, 0x80, 0x8D, 0x00, 0x20, 0xA9, 0x1E, 0x8D, 0x01, 0x20, 0x4C, 0x0A, 0x80,
    ];
    let mut prg = vec![0xEA; 0x4000];
    prg[..program.len()].copy_from_slice(&program);
    // NMI handler: RTI
    prg[0x1000] = 0x40;
    prg[0x3FFA..0x4000].copy_from_slice(&[0x00, 0x90, 0x00, 0x80, 0x00, 0x80]);

    let chr: Vec<u8> = (0..0x2000).map(|i| (i * 7) as u8).collect();

    let mut system = NesSystem::new();
    system.load_cartridge(&Cartridge::new(prg, chr, Mirroring::Vertical));
    system.reset();
    system
}

fn bench_frame(c: &mut Criterion) {
    let mut system = demo_system();
    let mut checksum = 0u8;
    let mut sink = |frame: &[u8]| checksum = checksum.wrapping_add(frame[1000]);

    c.bench_function("run_frame", |b| {
        b.iter(|| system.run_frame(&mut sink).expect("demo program is valid"))
    });
    black_box(checksum);
}

fn bench_clock(c: &mut Criterion) {
    let mut system = demo_system();
    c.bench_function("clock_1000", |b| {
        b.iter(|| {
            for _ in 0..1000 {
                system.clock().expect("demo program is valid");
            }
            black_box(system.ppu().dot())
        })
    });
}

criterion_group!(benches, bench_frame, bench_clock);
criterion_main!(benches);
