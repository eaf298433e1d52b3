//! Programmable interval timer.
//!
//! A 64-bit counter that increments once per tick while enabled. When the
//! counter reaches the compare value it can raise an interrupt and
//! optionally reset to zero (auto-reset mode).
//!
//! Registers: COUNTER (0x0, read-only over the bus), COMPARE (0x8),
//! CONTROL (0x10, bits {0: enable, 1: IRQ enable, 2: auto-reset}).

use crate::core::{Address, BitOps, Data, Word};

const COUNTER_OFFSET: Address = 0x00;
const COMPARE_OFFSET: Address = 0x08;
const CONTROL_OFFSET: Address = 0x10;

const CONTROL_ENABLE: u32 = 0;
const CONTROL_IRQ_EN: u32 = 1;
const CONTROL_AUTO_RESET: u32 = 2;

pub struct TimerDevice {
    base: Address,
    counter: Word,
    compare: Word,
    control: Word,
    irq_pending: bool,
}

impl TimerDevice {
    pub fn new(base: Address) -> Self {
        Self {
            base,
            counter: 0,
            compare: 0,
            control: 0,
            irq_pending: false,
        }
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.base && addr < self.base + 0x1000
    }

    pub fn read(&mut self, addr: Address, out: &mut Data) -> bool {
        *out = match addr - self.base {
            COUNTER_OFFSET => self.counter,
            COMPARE_OFFSET => self.compare,
            CONTROL_OFFSET => self.control,
            _ => 0,
        };
        true
    }

    pub fn write(&mut self, addr: Address, data: Data) -> bool {
        match addr - self.base {
            COMPARE_OFFSET => self.compare = data,
            CONTROL_OFFSET => self.control = data,
            // COUNTER is read-only over the bus.
            _ => {}
        }
        true
    }

    pub fn tick(&mut self) {
        if !self.control.test_bit(CONTROL_ENABLE) {
            return;
        }
        self.counter = self.counter.wrapping_add(1);

        if self.counter == self.compare {
            if self.control.test_bit(CONTROL_IRQ_EN) {
                self.irq_pending = true;
            }
            if self.control.test_bit(CONTROL_AUTO_RESET) {
                self.counter = 0;
            }
        }
        // A counter already past compare free-runs until it wraps.
    }

    pub(crate) fn take_irq(&mut self) -> bool {
        std::mem::take(&mut self.irq_pending)
    }
}
