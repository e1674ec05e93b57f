//! CPU module - 2A03 (6502 variant) implementation
//!
//! The NES uses a modified 6502 CPU without decimal mode. Each instruction
//! takes effect in a single tick; the rest of its cycle count is spent idling,
//! so an instruction of N cycles occupies exactly N calls to [`Cpu::step`].

use std::fmt;

use thiserror::Error;
use tracing::debug;

/// NMI vector location
pub const NMI_VECTOR: u16 = 0xFFFA;
/// Reset vector location
pub const RESET_VECTOR: u16 = 0xFFFC;
/// IRQ/BRK vector location
pub const IRQ_VECTOR: u16 = 0xFFFE;

/// Stack page
const STACK_BASE: u16 = 0x0100;

/// Idle cycles after reset and interrupt entry
const INTERRUPT_CYCLES: u8 = 8;

/// Base cycle count per opcode
#[rustfmt::skip]
const CYCLES: [u8; 256] = [
    0, 6, 2, 8, 3, 3, 5, 5, 3, 2, 2, 2, 4, 4, 6, 6,
    2, 5, 2, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7,
    6, 6, 2, 8, 3, 3, 5, 5, 4, 2, 2, 2, 4, 4, 6, 6,
    2, 5, 2, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7,
    6, 6, 2, 8, 3, 3, 5, 5, 3, 2, 2, 2, 3, 4, 6, 6,
    2, 5, 2, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7,
    6, 6, 2, 8, 3, 3, 5, 5, 4, 2, 2, 2, 5, 4, 6, 6,
    2, 5, 2, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7,
    2, 6, 2, 6, 3, 3, 3, 3, 2, 2, 2, 2, 4, 4, 4, 4,
    2, 6, 2, 6, 4, 4, 4, 4, 2, 5, 2, 5, 5, 5, 5, 5,
    2, 6, 2, 6, 3, 3, 3, 3, 2, 2, 2, 2, 4, 4, 4, 4,
    2, 5, 2, 5, 4, 4, 4, 4, 2, 4, 2, 4, 4, 4, 4, 4,
    2, 6, 2, 8, 3, 3, 5, 5, 2, 2, 2, 2, 4, 4, 6, 6,
    2, 5, 2, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7,
    2, 6, 2, 8, 3, 3, 5, 5, 2, 2, 2, 2, 4, 4, 6, 6,
    2, 5, 2, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7,
];

/// Opcodes that take an extra cycle when their address crosses a page
#[rustfmt::skip]
const PAGE_PENALTY: [u8; 256] = [
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 1, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 1, 1, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 1, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 1, 1, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0,
    0, 1, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 1, 1, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 1, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 1, 1, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 1, 0, 1, 0, 0, 0, 0, 0, 1, 0, 0, 1, 1, 1, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 1, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 1, 1, 0, 0,
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 1, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 1, 1, 0, 0,
];

/// Bus trait for memory and I/O access
pub trait Bus {
    /// Read a byte from the given address
    fn read(&mut self, address: u16) -> u8;
    /// Write a byte to the given address
    fn write(&mut self, address: u16, value: u8);
}

/// 2A03 CPU registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuRegisters {
    pub a: u8,   // Accumulator
    pub x: u8,   // X index register
    pub y: u8,   // Y index register
    pub sp: u8,  // Stack pointer
    pub pc: u16, // Program counter
}

impl Default for CpuRegisters {
    fn default() -> Self {
        Self {
            a: 0,
            x: 0,
            y: 0,
            sp: 0xFD, // Stack starts at $01FD
            pc: 0,    // Will be set by reset vector
        }
    }
}

/// CPU status flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusFlags(u8);

impl StatusFlags {
    pub const CARRY: u8 = 0b00000001;
    pub const ZERO: u8 = 0b00000010;
    pub const INTERRUPT: u8 = 0b00000100;
    pub const DECIMAL: u8 = 0b00001000;
    pub const BREAK: u8 = 0b00010000;
    pub const UNUSED: u8 = 0b00100000;
    pub const OVERFLOW: u8 = 0b01000000;
    pub const NEGATIVE: u8 = 0b10000000;

    pub fn new(flags: u8) -> Self {
        Self(flags)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    pub fn carry(&self) -> bool {
        (self.0 & Self::CARRY) != 0
    }

    pub fn zero(&self) -> bool {
        (self.0 & Self::ZERO) != 0
    }

    pub fn interrupt(&self) -> bool {
        (self.0 & Self::INTERRUPT) != 0
    }

    pub fn decimal(&self) -> bool {
        (self.0 & Self::DECIMAL) != 0
    }

    pub fn break_flag(&self) -> bool {
        (self.0 & Self::BREAK) != 0
    }

    pub fn unused(&self) -> bool {
        (self.0 & Self::UNUSED) != 0
    }

    pub fn overflow(&self) -> bool {
        (self.0 & Self::OVERFLOW) != 0
    }

    pub fn negative(&self) -> bool {
        (self.0 & Self::NEGATIVE) != 0
    }

    fn set(&mut self, flag: u8, val: bool) {
        self.0 = if val { self.0 | flag } else { self.0 & !flag };
    }

    pub fn set_carry(&mut self, val: bool) {
        self.set(Self::CARRY, val);
    }

    pub fn set_zero(&mut self, val: bool) {
        self.set(Self::ZERO, val);
    }

    pub fn set_interrupt(&mut self, val: bool) {
        self.set(Self::INTERRUPT, val);
    }

    pub fn set_decimal(&mut self, val: bool) {
        self.set(Self::DECIMAL, val);
    }

    pub fn set_break(&mut self, val: bool) {
        self.set(Self::BREAK, val);
    }

    pub fn set_unused(&mut self, val: bool) {
        self.set(Self::UNUSED, val);
    }

    pub fn set_overflow(&mut self, val: bool) {
        self.set(Self::OVERFLOW, val);
    }

    pub fn set_negative(&mut self, val: bool) {
        self.set(Self::NEGATIVE, val);
    }

    /// Set Zero and Negative from a result byte
    pub fn set_zn(&mut self, value: u8) {
        self.set_zero(value == 0);
        self.set_negative(value & 0x80 != 0);
    }
}

impl fmt::Display for StatusFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = ['N', 'V', 'U', 'B', 'D', 'I', 'Z', 'C'];
        for (bit, name) in names.iter().enumerate() {
            let set = self.0 & (0x80 >> bit) != 0;
            write!(f, "{}", if set { *name } else { '-' })?;
        }
        Ok(())
    }
}

/// Operation performed by an opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Adc, And, Asl, Bcc, Bcs, Beq, Bit, Bmi, Bne, Bpl, Brk, Bvc, Bvs, Clc,
    Cld, Cli, Clv, Cmp, Cpx, Cpy, Dec, Dex, Dey, Eor, Inc, Inx, Iny, Jmp,
    Jsr, Lda, Ldx, Ldy, Lsr, Nop, Ora, Pha, Php, Pla, Plp, Rol, Ror, Rti,
    Rts, Sbc, Sec, Sed, Sei, Sta, Stx, Sty, Tax, Tay, Tsx, Txa, Txs, Tya,
}

/// Addressing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingMode {
    Implied,
    Accumulator,
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    Indirect,
    IndirectX,
    IndirectY,
    Relative,
}

/// CPU instruction info
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstructionInfo {
    pub opcode: Opcode,
    pub mode: AddressingMode,
    pub cycles: u8,
    pub page_cycle: bool, // Extra cycle if page crossed
}

/// CPU error types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CpuError {
    #[error("invalid opcode 0x{opcode:02X} at 0x{pc:04X}")]
    InvalidOpcode { opcode: u8, pc: u16 },
}

/// CPU emulator state
#[derive(Debug, Clone)]
pub struct Cpu {
    registers: CpuRegisters,
    status: StatusFlags,
    /// Remaining cycles for current instruction
    remaining_cycles: u8,
    /// Total cycles executed
    total_cycles: u64,
    /// Set by indexed addressing, consumed by the cycle count
    page_crossed: bool,
}

impl Cpu {
    /// Create a new CPU instance
    pub fn new() -> Self {
        Self {
            registers: CpuRegisters::default(),
            status: StatusFlags::new(StatusFlags::UNUSED | StatusFlags::INTERRUPT),
            remaining_cycles: 0,
            total_cycles: 0,
            page_crossed: false,
        }
    }

    /// Reset the CPU and load PC from the reset vector
    pub fn reset(&mut self, bus: &mut impl Bus) {
        self.registers = CpuRegisters::default();
        self.status = StatusFlags::new(StatusFlags::UNUSED | StatusFlags::INTERRUPT);
        self.registers.pc = read_word(bus, RESET_VECTOR);
        self.remaining_cycles = INTERRUPT_CYCLES;
        self.total_cycles = 0;
        self.page_crossed = false;
        debug!(pc = format_args!("{:#06X}", self.registers.pc), "cpu reset");
    }

    /// Get CPU registers
    pub fn registers(&self) -> &CpuRegisters {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut CpuRegisters {
        &mut self.registers
    }

    /// Get CPU status flags
    pub fn status(&self) -> &StatusFlags {
        &self.status
    }

    pub fn status_mut(&mut self) -> &mut StatusFlags {
        &mut self.status
    }

    /// Raw processor status byte
    pub fn p_register(&self) -> u8 {
        self.status.bits()
    }

    /// Idle ticks left before the next fetch
    pub fn remaining_cycles(&self) -> u8 {
        self.remaining_cycles
    }

    /// True when the next tick fetches an instruction
    pub fn ready(&self) -> bool {
        self.remaining_cycles == 0
    }

    /// Get total cycles executed
    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    /// One processor tick
    ///
    /// Executes the next instruction when the previous one has used up its
    /// cycles, otherwise idles. An unknown opcode leaves the CPU untouched.
    pub fn step(&mut self, bus: &mut impl Bus) -> Result<(), CpuError> {
        if self.remaining_cycles == 0 {
            let pc = self.registers.pc;
            let opcode = bus.read(pc);
            let info = Self::decode(opcode).ok_or(CpuError::InvalidOpcode { opcode, pc })?;

            self.registers.pc = pc.wrapping_add(1);
            self.page_crossed = false;
            self.execute(bus, info);

            let penalty = u8::from(self.page_crossed && info.page_cycle);
            self.page_crossed = false;
            self.remaining_cycles = info.cycles + penalty;
        }

        self.remaining_cycles = self.remaining_cycles.saturating_sub(1);
        self.total_cycles += 1;
        Ok(())
    }

    /// Non-maskable interrupt entry
    pub fn nmi(&mut self, bus: &mut impl Bus) {
        self.interrupt(bus, NMI_VECTOR);
    }

    /// Maskable interrupt entry, ignored while I is set
    pub fn irq(&mut self, bus: &mut impl Bus) {
        if !self.status.interrupt() {
            self.interrupt(bus, IRQ_VECTOR);
        }
    }

    fn interrupt(&mut self, bus: &mut impl Bus, vector: u16) {
        self.push_word(bus, self.registers.pc);
        let pushed = (self.status.bits() & !StatusFlags::BREAK) | StatusFlags::UNUSED;
        self.push(bus, pushed);
        self.status.set_interrupt(true);
        self.registers.pc = read_word(bus, vector);
        self.remaining_cycles = INTERRUPT_CYCLES;
    }

    /// Decode an opcode to its instruction info
    pub fn decode(opcode: u8) -> Option<InstructionInfo> {
        use AddressingMode::*;
        use Opcode::*;

        let (op, mode) = match opcode {
            0x69 => (Adc, Immediate), 0x65 => (Adc, ZeroPage), 0x75 => (Adc, ZeroPageX), 0x6D => (Adc, Absolute),
            0x7D => (Adc, AbsoluteX), 0x79 => (Adc, AbsoluteY), 0x61 => (Adc, IndirectX), 0x71 => (Adc, IndirectY),

            0x29 => (And, Immediate), 0x25 => (And, ZeroPage), 0x35 => (And, ZeroPageX), 0x2D => (And, Absolute),
            0x3D => (And, AbsoluteX), 0x39 => (And, AbsoluteY), 0x21 => (And, IndirectX), 0x31 => (And, IndirectY),

            0x0A => (Asl, Accumulator), 0x06 => (Asl, ZeroPage), 0x16 => (Asl, ZeroPageX), 0x0E => (Asl, Absolute),
            0x1E => (Asl, AbsoluteX),

            0x90 => (Bcc, Relative), 0xB0 => (Bcs, Relative), 0xF0 => (Beq, Relative), 0x30 => (Bmi, Relative),
            0xD0 => (Bne, Relative), 0x10 => (Bpl, Relative), 0x50 => (Bvc, Relative), 0x70 => (Bvs, Relative),

            0x24 => (Bit, ZeroPage), 0x2C => (Bit, Absolute),
            0x00 => (Brk, Implied),

            0x18 => (Clc, Implied), 0xD8 => (Cld, Implied), 0x58 => (Cli, Implied), 0xB8 => (Clv, Implied),

            0xC9 => (Cmp, Immediate), 0xC5 => (Cmp, ZeroPage), 0xD5 => (Cmp, ZeroPageX), 0xCD => (Cmp, Absolute),
            0xDD => (Cmp, AbsoluteX), 0xD9 => (Cmp, AbsoluteY), 0xC1 => (Cmp, IndirectX), 0xD1 => (Cmp, IndirectY),
            0xE0 => (Cpx, Immediate), 0xE4 => (Cpx, ZeroPage), 0xEC => (Cpx, Absolute),
            0xC0 => (Cpy, Immediate), 0xC4 => (Cpy, ZeroPage), 0xCC => (Cpy, Absolute),

            0xC6 => (Dec, ZeroPage), 0xD6 => (Dec, ZeroPageX), 0xCE => (Dec, Absolute), 0xDE => (Dec, AbsoluteX),
            0xCA => (Dex, Implied), 0x88 => (Dey, Implied),

            0x49 => (Eor, Immediate), 0x45 => (Eor, ZeroPage), 0x55 => (Eor, ZeroPageX), 0x4D => (Eor, Absolute),
            0x5D => (Eor, AbsoluteX), 0x59 => (Eor, AbsoluteY), 0x41 => (Eor, IndirectX), 0x51 => (Eor, IndirectY),

            0xE6 => (Inc, ZeroPage), 0xF6 => (Inc, ZeroPageX), 0xEE => (Inc, Absolute), 0xFE => (Inc, AbsoluteX),
            0xE8 => (Inx, Implied), 0xC8 => (Iny, Implied),

            0x4C => (Jmp, Absolute), 0x6C => (Jmp, Indirect), 0x20 => (Jsr, Absolute),

            0xA9 => (Lda, Immediate), 0xA5 => (Lda, ZeroPage), 0xB5 => (Lda, ZeroPageX), 0xAD => (Lda, Absolute),
            0xBD => (Lda, AbsoluteX), 0xB9 => (Lda, AbsoluteY), 0xA1 => (Lda, IndirectX), 0xB1 => (Lda, IndirectY),
            0xA2 => (Ldx, Immediate), 0xA6 => (Ldx, ZeroPage), 0xB6 => (Ldx, ZeroPageY), 0xAE => (Ldx, Absolute),
            0xBE => (Ldx, AbsoluteY),
            0xA0 => (Ldy, Immediate), 0xA4 => (Ldy, ZeroPage), 0xB4 => (Ldy, ZeroPageX), 0xAC => (Ldy, Absolute),
            0xBC => (Ldy, AbsoluteX),

            0x4A => (Lsr, Accumulator), 0x46 => (Lsr, ZeroPage), 0x56 => (Lsr, ZeroPageX), 0x4E => (Lsr, Absolute),
            0x5E => (Lsr, AbsoluteX),

            0xEA => (Nop, Implied),
            // Unofficial NOPs that still consume their operands
            0x1A | 0x3A | 0x5A | 0x7A | 0xDA | 0xFA => (Nop, Implied),
            0x80 => (Nop, Immediate),
            0x04 | 0x44 | 0x64 => (Nop, ZeroPage),
            0x0C => (Nop, Absolute),
            0x14 | 0x34 | 0x54 | 0x74 | 0xD4 | 0xF4 => (Nop, ZeroPageX),
            0x1C | 0x3C | 0x5C | 0x7C | 0xDC | 0xFC => (Nop, AbsoluteX),

            0x09 => (Ora, Immediate), 0x05 => (Ora, ZeroPage), 0x15 => (Ora, ZeroPageX), 0x0D => (Ora, Absolute),
            0x1D => (Ora, AbsoluteX), 0x19 => (Ora, AbsoluteY), 0x01 => (Ora, IndirectX), 0x11 => (Ora, IndirectY),

            0x48 => (Pha, Implied), 0x08 => (Php, Implied), 0x68 => (Pla, Implied), 0x28 => (Plp, Implied),

            0x2A => (Rol, Accumulator), 0x26 => (Rol, ZeroPage), 0x36 => (Rol, ZeroPageX), 0x2E => (Rol, Absolute),
            0x3E => (Rol, AbsoluteX),
            0x6A => (Ror, Accumulator), 0x66 => (Ror, ZeroPage), 0x76 => (Ror, ZeroPageX), 0x6E => (Ror, Absolute),
            0x7E => (Ror, AbsoluteX),

            0x40 => (Rti, Implied), 0x60 => (Rts, Implied),

            0xE9 => (Sbc, Immediate), 0xE5 => (Sbc, ZeroPage), 0xF5 => (Sbc, ZeroPageX), 0xED => (Sbc, Absolute),
            0xFD => (Sbc, AbsoluteX), 0xF9 => (Sbc, AbsoluteY), 0xE1 => (Sbc, IndirectX), 0xF1 => (Sbc, IndirectY),

            0x38 => (Sec, Implied), 0xF8 => (Sed, Implied), 0x78 => (Sei, Implied),

            0x85 => (Sta, ZeroPage), 0x95 => (Sta, ZeroPageX), 0x8D => (Sta, Absolute), 0x9D => (Sta, AbsoluteX),
            0x99 => (Sta, AbsoluteY), 0x81 => (Sta, IndirectX), 0x91 => (Sta, IndirectY),
            0x86 => (Stx, ZeroPage), 0x96 => (Stx, ZeroPageY), 0x8E => (Stx, Absolute),
            0x84 => (Sty, ZeroPage), 0x94 => (Sty, ZeroPageX), 0x8C => (Sty, Absolute),

            0xAA => (Tax, Implied), 0xA8 => (Tay, Implied), 0xBA => (Tsx, Implied),
            0x8A => (Txa, Implied), 0x9A => (Txs, Implied), 0x98 => (Tya, Implied),

            _ => return None,
        };

        Some(InstructionInfo {
            opcode: op,
            mode,
            cycles: CYCLES[opcode as usize],
            page_cycle: PAGE_PENALTY[opcode as usize] != 0,
        })
    }

    fn fetch_byte(&mut self, bus: &mut impl Bus) -> u8 {
        let value = bus.read(self.registers.pc);
        self.registers.pc = self.registers.pc.wrapping_add(1);
        value
    }

    fn fetch_word(&mut self, bus: &mut impl Bus) -> u16 {
        let lo = self.fetch_byte(bus) as u16;
        let hi = self.fetch_byte(bus) as u16;
        (hi << 8) | lo
    }

    fn indexed(&mut self, base: u16, index: u8) -> u16 {
        let address = base.wrapping_add(index as u16);
        self.page_crossed = (base & 0xFF00) != (address & 0xFF00);
        address
    }

    /// Resolve the operand address, advancing PC past the operand bytes
    fn resolve_address(&mut self, bus: &mut impl Bus, mode: AddressingMode) -> u16 {
        match mode {
            AddressingMode::Implied | AddressingMode::Accumulator => 0,
            AddressingMode::Immediate => {
                let address = self.registers.pc;
                self.registers.pc = address.wrapping_add(1);
                address
            }
            AddressingMode::ZeroPage => self.fetch_byte(bus) as u16,
            AddressingMode::ZeroPageX => self.fetch_byte(bus).wrapping_add(self.registers.x) as u16,
            AddressingMode::ZeroPageY => self.fetch_byte(bus).wrapping_add(self.registers.y) as u16,
            AddressingMode::Absolute => self.fetch_word(bus),
            AddressingMode::AbsoluteX => {
                let base = self.fetch_word(bus);
                self.indexed(base, self.registers.x)
            }
            AddressingMode::AbsoluteY => {
                let base = self.fetch_word(bus);
                self.indexed(base, self.registers.y)
            }
            AddressingMode::Indirect => {
                // The high byte never carries into the next page
                let pointer = self.fetch_word(bus);
                let lo = bus.read(pointer) as u16;
                let hi = bus.read((pointer & 0xFF00) | (pointer.wrapping_add(1) & 0x00FF)) as u16;
                (hi << 8) | lo
            }
            AddressingMode::IndirectX => {
                let pointer = self.fetch_byte(bus).wrapping_add(self.registers.x);
                read_zero_page_word(bus, pointer)
            }
            AddressingMode::IndirectY => {
                let pointer = self.fetch_byte(bus);
                let base = read_zero_page_word(bus, pointer);
                self.indexed(base, self.registers.y)
            }
            AddressingMode::Relative => {
                let offset = self.fetch_byte(bus) as i8;
                self.registers.pc.wrapping_add_signed(offset as i16)
            }
        }
    }

    fn execute(&mut self, bus: &mut impl Bus, info: InstructionInfo) {
        let mode = info.mode;
        let address = self.resolve_address(bus, mode);

        match info.opcode {
            Opcode::Lda => {
                self.registers.a = bus.read(address);
                self.status.set_zn(self.registers.a);
            }
            Opcode::Ldx => {
                self.registers.x = bus.read(address);
                self.status.set_zn(self.registers.x);
            }
            Opcode::Ldy => {
                self.registers.y = bus.read(address);
                self.status.set_zn(self.registers.y);
            }
            Opcode::Sta => bus.write(address, self.registers.a),
            Opcode::Stx => bus.write(address, self.registers.x),
            Opcode::Sty => bus.write(address, self.registers.y),

            Opcode::Adc => {
                let value = bus.read(address);
                self.add_with_carry(value);
            }
            Opcode::Sbc => {
                let value = bus.read(address);
                self.add_with_carry(value ^ 0xFF);
            }
            Opcode::And => {
                self.registers.a &= bus.read(address);
                self.status.set_zn(self.registers.a);
            }
            Opcode::Ora => {
                self.registers.a |= bus.read(address);
                self.status.set_zn(self.registers.a);
            }
            Opcode::Eor => {
                self.registers.a ^= bus.read(address);
                self.status.set_zn(self.registers.a);
            }
            Opcode::Bit => {
                let value = bus.read(address);
                self.status.set_zero(self.registers.a & value == 0);
                self.status.set_overflow(value & 0x40 != 0);
                self.status.set_negative(value & 0x80 != 0);
            }
            Opcode::Cmp => self.compare(self.registers.a, bus.read(address)),
            Opcode::Cpx => self.compare(self.registers.x, bus.read(address)),
            Opcode::Cpy => self.compare(self.registers.y, bus.read(address)),

            Opcode::Asl => self.read_modify_write(bus, mode, address, |status, value| {
                status.set_carry(value & 0x80 != 0);
                value << 1
            }),
            Opcode::Lsr => self.read_modify_write(bus, mode, address, |status, value| {
                status.set_carry(value & 0x01 != 0);
                value >> 1
            }),
            Opcode::Rol => self.read_modify_write(bus, mode, address, |status, value| {
                let carry_in = u8::from(status.carry());
                status.set_carry(value & 0x80 != 0);
                (value << 1) | carry_in
            }),
            Opcode::Ror => self.read_modify_write(bus, mode, address, |status, value| {
                let carry_in = u8::from(status.carry()) << 7;
                status.set_carry(value & 0x01 != 0);
                (value >> 1) | carry_in
            }),
            Opcode::Inc => self.read_modify_write(bus, mode, address, |_, value| value.wrapping_add(1)),
            Opcode::Dec => self.read_modify_write(bus, mode, address, |_, value| value.wrapping_sub(1)),

            Opcode::Inx => {
                self.registers.x = self.registers.x.wrapping_add(1);
                self.status.set_zn(self.registers.x);
            }
            Opcode::Iny => {
                self.registers.y = self.registers.y.wrapping_add(1);
                self.status.set_zn(self.registers.y);
            }
            Opcode::Dex => {
                self.registers.x = self.registers.x.wrapping_sub(1);
                self.status.set_zn(self.registers.x);
            }
            Opcode::Dey => {
                self.registers.y = self.registers.y.wrapping_sub(1);
                self.status.set_zn(self.registers.y);
            }

            Opcode::Bcc => self.branch(address, !self.status.carry()),
            Opcode::Bcs => self.branch(address, self.status.carry()),
            Opcode::Beq => self.branch(address, self.status.zero()),
            Opcode::Bne => self.branch(address, !self.status.zero()),
            Opcode::Bmi => self.branch(address, self.status.negative()),
            Opcode::Bpl => self.branch(address, !self.status.negative()),
            Opcode::Bvs => self.branch(address, self.status.overflow()),
            Opcode::Bvc => self.branch(address, !self.status.overflow()),

            Opcode::Jmp => self.registers.pc = address,
            Opcode::Jsr => {
                self.push_word(bus, self.registers.pc.wrapping_sub(1));
                self.registers.pc = address;
            }
            Opcode::Rts => {
                self.registers.pc = self.pull_word(bus).wrapping_add(1);
            }
            Opcode::Brk => {
                // Skip the padding byte
                self.registers.pc = self.registers.pc.wrapping_add(1);
                self.push_word(bus, self.registers.pc);
                self.status.set_break(true);
                self.status.set_unused(true);
                self.push(bus, self.status.bits());
                self.status.set_interrupt(true);
                self.registers.pc = read_word(bus, IRQ_VECTOR);
            }
            Opcode::Rti => {
                let flags = self.pull(bus) & !(StatusFlags::BREAK | StatusFlags::UNUSED);
                self.status = StatusFlags::new(flags);
                self.registers.pc = self.pull_word(bus);
            }

            Opcode::Pha => self.push(bus, self.registers.a),
            Opcode::Php => {
                // B and U stay set in P afterwards
                self.status.set_break(true);
                self.status.set_unused(true);
                self.push(bus, self.status.bits());
            }
            Opcode::Pla => {
                self.registers.a = self.pull(bus);
                self.status.set_zn(self.registers.a);
            }
            Opcode::Plp => self.status = StatusFlags::new(self.pull(bus)),

            Opcode::Clc => self.status.set_carry(false),
            Opcode::Cld => self.status.set_decimal(false),
            Opcode::Cli => self.status.set_interrupt(false),
            Opcode::Clv => self.status.set_overflow(false),
            Opcode::Sec => self.status.set_carry(true),
            Opcode::Sed => self.status.set_decimal(true),
            Opcode::Sei => self.status.set_interrupt(true),

            Opcode::Tax => {
                self.registers.x = self.registers.a;
                self.status.set_zn(self.registers.x);
            }
            Opcode::Tay => {
                self.registers.y = self.registers.a;
                self.status.set_zn(self.registers.y);
            }
            Opcode::Txa => {
                self.registers.a = self.registers.x;
                self.status.set_zn(self.registers.a);
            }
            Opcode::Tya => {
                self.registers.a = self.registers.y;
                self.status.set_zn(self.registers.a);
            }
            Opcode::Tsx => {
                self.registers.x = self.registers.sp;
                self.status.set_zn(self.registers.x);
            }
            Opcode::Txs => self.registers.sp = self.registers.x,

            Opcode::Nop => {}
        }
    }

    /// A + M + C through a 9-bit sum
    fn add_with_carry(&mut self, value: u8) {
        let a = self.registers.a;
        let sum = a as u16 + value as u16 + u16::from(self.status.carry());
        let result = sum as u8;

        self.status.set_carry(sum > 0xFF);
        self.status.set_overflow((!(a ^ value) & (a ^ result)) & 0x80 != 0);
        self.registers.a = result;
        self.status.set_zn(result);
    }

    fn compare(&mut self, register: u8, value: u8) {
        self.status.set_carry(register >= value);
        self.status.set_zn(register.wrapping_sub(value));
    }

    fn read_modify_write(
        &mut self,
        bus: &mut impl Bus,
        mode: AddressingMode,
        address: u16,
        operation: fn(&mut StatusFlags, u8) -> u8,
    ) {
        if mode == AddressingMode::Accumulator {
            let result = operation(&mut self.status, self.registers.a);
            self.registers.a = result;
            self.status.set_zn(result);
        } else {
            let value = bus.read(address);
            let result = operation(&mut self.status, value);
            bus.write(address, result);
            self.status.set_zn(result);
        }
    }

    fn branch(&mut self, target: u16, condition: bool) {
        if condition {
            self.page_crossed = (self.registers.pc & 0xFF00) != (target & 0xFF00);
            self.registers.pc = target;
        }
    }

    fn push(&mut self, bus: &mut impl Bus, value: u8) {
        bus.write(STACK_BASE | self.registers.sp as u16, value);
        self.registers.sp = self.registers.sp.wrapping_sub(1);
    }

    fn pull(&mut self, bus: &mut impl Bus) -> u8 {
        self.registers.sp = self.registers.sp.wrapping_add(1);
        bus.read(STACK_BASE | self.registers.sp as u16)
    }

    fn push_word(&mut self, bus: &mut impl Bus, value: u16) {
        self.push(bus, (value >> 8) as u8);
        self.push(bus, value as u8);
    }

    fn pull_word(&mut self, bus: &mut impl Bus) -> u16 {
        let lo = self.pull(bus) as u16;
        let hi = self.pull(bus) as u16;
        (hi << 8) | lo
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

fn read_word(bus: &mut impl Bus, address: u16) -> u16 {
    let lo = bus.read(address) as u16;
    let hi = bus.read(address.wrapping_add(1)) as u16;
    (hi << 8) | lo
}

fn read_zero_page_word(bus: &mut impl Bus, pointer: u8) -> u16 {
    let lo = bus.read(pointer as u16) as u16;
    let hi = bus.read(pointer.wrapping_add(1) as u16) as u16;
    (hi << 8) | lo
}
