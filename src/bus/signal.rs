//! Bus signal state.
//!
//! Models the physical lines of the synchronous system bus: 64 address
//! lines, 64 data lines, and a one-hot control word. Only the current
//! master drives the address/data/request lines; only the active slave
//! drives Wait; only the bus itself drives Error.

use crate::core::{Address, BitOps, Data};

/// One-hot control signals on the bus control word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlLine {
    /// Master requests a read.
    Read = 0,
    /// Master requests a write.
    Write = 1,
    /// Slave holds the transaction (wait state).
    Wait = 2,
    /// Slave is ready to transfer.
    Ready = 3,
    /// Interrupt request pending at the interrupt controller.
    Irq = 4,
    /// Address decode failure (no device claims the address).
    Error = 5,
}

impl ControlLine {
    #[inline]
    fn bit(self) -> u32 {
        self as u32
    }
}

/// Snapshot of the bus lines at a point in time.
#[derive(Debug, Default, Clone, Copy)]
pub struct BusState {
    /// Address lines.
    pub address: Address,
    /// Data lines.
    pub data: Data,
    /// Control word (bitmask of [`ControlLine`]).
    pub control: u8,
}

impl BusState {
    /// Check whether a control line is asserted.
    #[inline]
    pub fn is_set(&self, line: ControlLine) -> bool {
        self.control.test_bit(line.bit())
    }

    /// Assert or de-assert a control line.
    #[inline]
    pub fn set(&mut self, line: ControlLine, active: bool) {
        self.control = if active {
            self.control.set_bit(line.bit())
        } else {
            self.control.clear_bit(line.bit())
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_lines_are_independent() {
        let mut state = BusState::default();
        state.set(ControlLine::Read, true);
        state.set(ControlLine::Wait, true);
        assert!(state.is_set(ControlLine::Read));
        assert!(state.is_set(ControlLine::Wait));
        assert!(!state.is_set(ControlLine::Write));

        state.set(ControlLine::Read, false);
        assert!(!state.is_set(ControlLine::Read));
        assert!(state.is_set(ControlLine::Wait));
    }
}
