//! Bus device contract.
//!
//! A device answers an address-range predicate, services reads and writes,
//! and advances one tick of its own internal time. That contract is the only
//! coupling between the bus and the devices; everything else is
//! device-private.
//!
//! The device set is closed, so dispatch is by enum variant rather than
//! through a trait object. Tests that need a scriptable device use the
//! [`ProbeDevice`] variant, which carries boxed handler closures instead of
//! a concrete register file.

use crate::core::{Address, Data};
use crate::memory::RamDevice;
use crate::peripherals::{
    pic, KeyboardDevice, MouseDevice, PicDevice, TimerDevice, UartDevice,
};
use crate::storage::StorageController;

use super::DmaPort;

/// A scriptable device for test harnesses.
///
/// Carries handler closures so unit tests can stand in arbitrary slaves
/// (instant memory, always-waiting memory, fault injectors) without wiring
/// test types into the production device set.
pub struct ProbeDevice {
    /// Address-range predicate.
    pub contains: Box<dyn Fn(Address) -> bool>,
    /// Read handler. Returns `true` when the transfer is complete.
    pub on_read: Box<dyn FnMut(Address, &mut Data) -> bool>,
    /// Write handler. Returns `true` when the transfer is complete.
    pub on_write: Box<dyn FnMut(Address, Data) -> bool>,
}

/// Any component attached to the system bus.
pub enum Device {
    Ram(RamDevice),
    Uart(UartDevice),
    Pic(PicDevice),
    Timer(TimerDevice),
    Keyboard(KeyboardDevice),
    Mouse(MouseDevice),
    Storage(StorageController),
    Probe(ProbeDevice),
}

impl Device {
    /// Does `addr` fall within this device's window?
    pub fn contains(&self, addr: Address) -> bool {
        match self {
            Device::Ram(ram) => ram.contains(addr),
            Device::Uart(uart) => uart.contains(addr),
            Device::Pic(pic) => pic.contains(addr),
            Device::Timer(timer) => timer.contains(addr),
            Device::Keyboard(kbd) => kbd.contains(addr),
            Device::Mouse(mouse) => mouse.contains(addr),
            Device::Storage(ctrl) => ctrl.contains(addr),
            Device::Probe(probe) => (probe.contains)(addr),
        }
    }

    /// Service a read request. Returns `true` when the transfer completed;
    /// `false` asks the bus to assert Wait and retry next cycle.
    pub fn read(&mut self, addr: Address, out: &mut Data) -> bool {
        match self {
            Device::Ram(ram) => ram.read(addr, out),
            Device::Uart(uart) => uart.read(addr, out),
            Device::Pic(pic) => pic.read(addr, out),
            Device::Timer(timer) => timer.read(addr, out),
            Device::Keyboard(kbd) => kbd.read(addr, out),
            Device::Mouse(mouse) => mouse.read(addr, out),
            Device::Storage(ctrl) => ctrl.read(addr, out),
            Device::Probe(probe) => (probe.on_read)(addr, out),
        }
    }

    /// Service a write request. Same completion contract as [`read`].
    ///
    /// [`read`]: Device::read
    pub fn write(&mut self, addr: Address, data: Data) -> bool {
        match self {
            Device::Ram(ram) => ram.write(addr, data),
            Device::Uart(uart) => uart.write(addr, data),
            Device::Pic(pic) => pic.write(addr, data),
            Device::Timer(timer) => timer.write(addr, data),
            Device::Keyboard(kbd) => kbd.write(addr, data),
            Device::Mouse(mouse) => mouse.write(addr, data),
            Device::Storage(ctrl) => ctrl.write(addr, data),
            Device::Probe(probe) => (probe.on_write)(addr, data),
        }
    }

    /// Synchronous read for the bypass path: one handler invocation, outside
    /// the cycle-accurate protocol. RAM answers directly, skipping its
    /// latency model.
    pub fn bypass_read(&mut self, addr: Address, out: &mut Data) -> bool {
        match self {
            Device::Ram(ram) => {
                ram.read_direct(addr, out);
                true
            }
            other => other.read(addr, out),
        }
    }

    /// Synchronous write for the bypass path. See [`bypass_read`].
    ///
    /// [`bypass_read`]: Device::bypass_read
    pub fn bypass_write(&mut self, addr: Address, data: Data) -> bool {
        match self {
            Device::Ram(ram) => {
                ram.write_direct(addr, data);
                true
            }
            other => other.write(addr, data),
        }
    }

    /// Advance one cycle of device-internal time. The storage controller
    /// uses `dma` to master the bus for queue fetches and data transfers.
    pub fn tick(&mut self, dma: &mut DmaPort<'_>) {
        match self {
            Device::Ram(ram) => ram.tick(),
            Device::Uart(uart) => uart.tick(),
            Device::Pic(pic) => pic.tick(),
            Device::Timer(timer) => timer.tick(),
            Device::Keyboard(kbd) => kbd.tick(),
            Device::Mouse(mouse) => mouse.tick(),
            Device::Storage(ctrl) => ctrl.tick(dma),
            Device::Probe(_) => {}
        }
    }

    /// Drain this device's pending interrupt, if any, returning the PIC
    /// line it belongs on. The bus forwards drained interrupts to the PIC
    /// at the end of each tick.
    pub(super) fn take_irq(&mut self) -> Option<u8> {
        match self {
            Device::Uart(uart) => uart.take_irq().then_some(pic::IRQ_UART_RX),
            Device::Timer(timer) => timer.take_irq().then_some(pic::IRQ_TIMER),
            Device::Keyboard(kbd) => kbd.take_irq().then_some(pic::IRQ_KEYBOARD),
            Device::Mouse(mouse) => mouse.take_irq().then_some(pic::IRQ_MOUSE),
            _ => None,
        }
    }
}
