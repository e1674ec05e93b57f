//! Standard controller on port 1 ($4016)
//!
//! Protocol: while the strobe bit is held high every read returns the live A
//! button. When the strobe falls, the live state is latched into a shift
//! register; each read then returns the next button (A, B, Select, Start, Up,
//! Down, Left, Right) and shifts a 1 into the vacated high bit, so reads past
//! the eighth return 1.

/// Button masks for [`Controller::set_buttons`]
pub const BUTTON_A: u8 = 1 << 0;
pub const BUTTON_B: u8 = 1 << 1;
pub const BUTTON_SELECT: u8 = 1 << 2;
pub const BUTTON_START: u8 = 1 << 3;
pub const BUTTON_UP: u8 = 1 << 4;
pub const BUTTON_DOWN: u8 = 1 << 5;
pub const BUTTON_LEFT: u8 = 1 << 6;
pub const BUTTON_RIGHT: u8 = 1 << 7;

/// Bit 0 of a $4016 write
const STROBE: u8 = 0x01;

/// Upper bits of the data bus as seen by a $4016 read
const OPEN_BUS: u8 = 0x40;

/// Standard NES controller
#[derive(Debug, Clone, Default)]
pub struct Controller {
    /// Live button state, one bit per button
    state: u8,
    /// Latched copy shifted out LSB-first
    shift: u8,
    /// Last value written to $4016
    strobe: u8,
}

impl Controller {
    /// Create a controller with no buttons pressed
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the live button state
    pub fn set_buttons(&mut self, state: u8) {
        self.state = state;
    }

    /// Live button state
    pub fn buttons(&self) -> u8 {
        self.state
    }

    /// Read $4016
    pub fn read(&mut self) -> u8 {
        if self.strobe & STROBE != 0 {
            return (self.state & 0x01) | OPEN_BUS;
        }

        let data = (self.shift & 0x01) | OPEN_BUS;
        self.shift = (self.shift >> 1) | 0x80;
        data
    }

    /// Write $4016; latches the live state on the falling edge of the strobe
    pub fn write(&mut self, data: u8) {
        if self.strobe & STROBE != 0 && data & STROBE == 0 {
            self.shift = self.state;
        }
        self.strobe = data;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn latch(controller: &mut Controller) {
        controller.write(1);
        controller.write(0);
    }

    #[test]
    fn test_shift_out_order() {
        let mut controller = Controller::new();
        controller.set_buttons(BUTTON_A | BUTTON_START | BUTTON_RIGHT);
        latch(&mut controller);

        let bits: Vec<u8> = (0..8).map(|_| controller.read() & 1).collect();
        assert_eq!(bits, vec![1, 0, 0, 1, 0, 0, 0, 1]);
    }

    #[test]
    fn test_reads_past_eighth_return_one() {
        let mut controller = Controller::new();
        latch(&mut controller);
        for _ in 0..8 {
            assert_eq!(controller.read(), 0x40);
        }
        assert_eq!(controller.read(), 0x41);
    }

    #[test]
    fn test_strobe_high_returns_live_a() {
        let mut controller = Controller::new();
        controller.write(1);
        controller.set_buttons(BUTTON_A);
        assert_eq!(controller.read(), 0x41);
        assert_eq!(controller.read(), 0x41);
        controller.set_buttons(BUTTON_B);
        assert_eq!(controller.read(), 0x40);
    }

    #[test]
    fn test_no_latch_without_falling_edge() {
        let mut controller = Controller::new();
        controller.set_buttons(BUTTON_A);
        controller.write(0);
        assert_eq!(controller.read() & 1, 0);
    }
}
