//! Keyboard device.
//!
//! A 16-entry scan-code FIFO with pop-on-read semantics. The host injects
//! key bytes with [`KeyboardDevice::enqueue_key`]; enqueuing into a full
//! FIFO drops the byte and sets the overrun flag, which clears on the next
//! successful data read.
//!
//! Registers: STATUS (0x0: bit0 RxReady, bit2 FifoFull, bit3 Overrun),
//! DATA (0x4, pop-on-read, 0 when empty), CONTROL (0x8: bit0 IRQ enable).

use crate::core::{Address, Data};

const STATUS_OFFSET: Address = 0x0;
const DATA_OFFSET: Address = 0x4;
const CONTROL_OFFSET: Address = 0x8;

const STATUS_RX_READY: Data = 1 << 0;
const STATUS_FIFO_FULL: Data = 1 << 2;
const STATUS_OVERRUN: Data = 1 << 3;

const CONTROL_IRQ_EN: u32 = 1 << 0;

const FIFO_SIZE: usize = 16;

pub struct KeyboardDevice {
    base: Address,
    buffer: [u8; FIFO_SIZE],
    read_head: usize,
    write_head: usize,
    count: usize,
    overrun: bool,
    control: u32,
    irq_pending: bool,
}

impl KeyboardDevice {
    pub fn new(base: Address) -> Self {
        Self {
            base,
            buffer: [0; FIFO_SIZE],
            read_head: 0,
            write_head: 0,
            count: 0,
            overrun: false,
            control: 0,
            irq_pending: false,
        }
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.base && addr < self.base + 0x1000
    }

    pub fn read(&mut self, addr: Address, out: &mut Data) -> bool {
        match addr - self.base {
            STATUS_OFFSET => {
                let mut status = 0;
                if self.count > 0 {
                    status |= STATUS_RX_READY;
                }
                if self.count == FIFO_SIZE {
                    status |= STATUS_FIFO_FULL;
                }
                if self.overrun {
                    status |= STATUS_OVERRUN;
                }
                *out = status;
            }
            DATA_OFFSET => {
                if self.count == 0 {
                    *out = 0;
                } else {
                    *out = Data::from(self.buffer[self.read_head]);
                    self.read_head = (self.read_head + 1) % FIFO_SIZE;
                    self.count -= 1;
                    // A successful pop clears the overrun condition.
                    self.overrun = false;
                }
            }
            CONTROL_OFFSET => *out = Data::from(self.control),
            _ => *out = 0,
        }
        true
    }

    pub fn write(&mut self, addr: Address, data: Data) -> bool {
        if addr - self.base == CONTROL_OFFSET {
            self.control = data as u32;
        }
        true
    }

    pub fn tick(&mut self) {}

    /// Host side: push a scan code into the FIFO. Returns `false` (and sets
    /// the overrun flag) when the FIFO is full.
    pub fn enqueue_key(&mut self, key: u8) -> bool {
        if self.count == FIFO_SIZE {
            self.overrun = true;
            return false;
        }
        self.buffer[self.write_head] = key;
        self.write_head = (self.write_head + 1) % FIFO_SIZE;
        self.count += 1;
        if self.control & CONTROL_IRQ_EN != 0 {
            self.irq_pending = true;
        }
        true
    }

    pub(crate) fn take_irq(&mut self) -> bool {
        std::mem::take(&mut self.irq_pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Address = 0xE000_4000;

    #[test]
    fn test_fifo_order_is_preserved() {
        let mut kbd = KeyboardDevice::new(BASE);
        for key in [0x1C, 0x32, 0x21] {
            assert!(kbd.enqueue_key(key));
        }
        let mut data = 0;
        for expected in [0x1C, 0x32, 0x21] {
            kbd.read(BASE + DATA_OFFSET, &mut data);
            assert_eq!(data, expected);
        }
    }

    #[test]
    fn test_empty_fifo_reads_zero() {
        let mut kbd = KeyboardDevice::new(BASE);
        let mut data = 5;
        kbd.read(BASE + DATA_OFFSET, &mut data);
        assert_eq!(data, 0);
        kbd.read(BASE + STATUS_OFFSET, &mut data);
        assert_eq!(data & STATUS_RX_READY, 0);
    }

    #[test]
    fn test_overrun_on_full_fifo() {
        let mut kbd = KeyboardDevice::new(BASE);
        for key in 0..FIFO_SIZE as u8 {
            assert!(kbd.enqueue_key(key));
        }
        // 17th key is dropped.
        assert!(!kbd.enqueue_key(0xFF));

        let mut status = 0;
        kbd.read(BASE + STATUS_OFFSET, &mut status);
        assert_eq!(
            status & (STATUS_FIFO_FULL | STATUS_OVERRUN),
            STATUS_FIFO_FULL | STATUS_OVERRUN
        );

        // Popping one byte clears overrun, and the dropped byte is gone.
        let mut data = 0;
        kbd.read(BASE + DATA_OFFSET, &mut data);
        assert_eq!(data, 0);
        kbd.read(BASE + STATUS_OFFSET, &mut status);
        assert_eq!(status & STATUS_OVERRUN, 0);
    }

    #[test]
    fn test_irq_requires_control_enable() {
        let mut kbd = KeyboardDevice::new(BASE);
        kbd.enqueue_key(1);
        assert!(!kbd.take_irq());

        kbd.write(BASE + CONTROL_OFFSET, Data::from(CONTROL_IRQ_EN));
        kbd.enqueue_key(2);
        assert!(kbd.take_irq());
    }

    #[test]
    fn test_ring_wraps_around() {
        let mut kbd = KeyboardDevice::new(BASE);
        let mut data = 0;
        // Cycle more bytes than the FIFO holds to exercise wraparound.
        for round in 0..40u8 {
            assert!(kbd.enqueue_key(round));
            kbd.read(BASE + DATA_OFFSET, &mut data);
            assert_eq!(data, Data::from(round));
        }
    }
}
