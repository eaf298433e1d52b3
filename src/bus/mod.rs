//! Synchronous system bus.
//!
//! The central interconnect of the machine. The bus owns the signal state
//! and the ordered device list, decodes addresses to the first device whose
//! range predicate matches, and propagates wait states from multi-cycle
//! slaves back to the master.
//!
//! Two access paths exist:
//!
//! - The **cycle-accurate path**: a master drives the address/data/control
//!   lines, and [`Bus::tick`] services the request, asserting `Wait` while
//!   the slave holds the transaction and `Error` when no device decodes the
//!   address.
//! - The **bypass path** ([`Bus::read`] / [`Bus::write`]): a synchronous
//!   single-call transfer used by the program loader, DMA masters, and test
//!   harnesses. Unmapped addresses report failure to the caller instead of
//!   latching `Error`.
//!
//! Both paths feed the read/write counters used for bus-traffic telemetry.

pub mod device;
pub mod signal;

pub use device::{Device, ProbeDevice};
pub use signal::{BusState, ControlLine};

use log::trace;

use crate::core::{Address, Data};
use crate::peripherals::{KeyboardDevice, MouseDevice, PicDevice, UartDevice};
use crate::storage::StorageController;

/// The system bus: signal state plus the attached device list.
#[derive(Default)]
pub struct Bus {
    state: BusState,
    devices: Vec<Device>,
    reads: u64,
    writes: u64,
}

/// A window onto the bus for a device that masters transfers during its own
/// tick (the storage controller's DMA engine). The port sees every device
/// except the one currently ticking, so a DMA master can never alias itself.
pub struct DmaPort<'a> {
    lower: &'a mut [Device],
    upper: &'a mut [Device],
    reads: &'a mut u64,
    writes: &'a mut u64,
}

impl DmaPort<'_> {
    /// Synchronous bypass read. Returns `None` for unmapped addresses or a
    /// slave that is not ready.
    pub fn read(&mut self, addr: Address) -> Option<Data> {
        let dev = self
            .lower
            .iter_mut()
            .chain(self.upper.iter_mut())
            .find(|dev| dev.contains(addr))?;
        let mut data = 0;
        if !dev.bypass_read(addr, &mut data) {
            return None;
        }
        *self.reads += 1;
        Some(data)
    }

    /// Synchronous bypass write. Returns `false` for unmapped addresses or
    /// a slave that is not ready.
    pub fn write(&mut self, addr: Address, data: Data) -> bool {
        let Some(dev) = self
            .lower
            .iter_mut()
            .chain(self.upper.iter_mut())
            .find(|dev| dev.contains(addr))
        else {
            return false;
        };
        if !dev.bypass_write(addr, data) {
            return false;
        }
        *self.writes += 1;
        true
    }
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a device. Decode order follows attachment order: the first
    /// device whose range predicate matches an address wins.
    pub fn attach(&mut self, device: Device) {
        self.devices.push(device);
    }

    // ---------------------------------------------------------------------
    // Master interface
    // ---------------------------------------------------------------------

    pub fn set_address(&mut self, addr: Address) {
        self.state.address = addr;
    }

    pub fn set_data(&mut self, data: Data) {
        self.state.data = data;
    }

    pub fn set_control(&mut self, line: ControlLine, active: bool) {
        self.state.set(line, active);
    }

    /// Snapshot of the current bus lines.
    pub fn state(&self) -> &BusState {
        &self.state
    }

    /// Is the current transaction being held by the slave?
    pub fn is_busy(&self) -> bool {
        self.state.is_set(ControlLine::Wait)
    }

    /// Completed read transfers (both access paths).
    pub fn read_count(&self) -> u64 {
        self.reads
    }

    /// Completed write transfers (both access paths).
    pub fn write_count(&self) -> u64 {
        self.writes
    }

    // ---------------------------------------------------------------------
    // Bypass interface
    // ---------------------------------------------------------------------

    /// Synchronous read outside the cycle-accurate protocol. Used by the
    /// loader and by test harnesses. `None` means no device decoded the
    /// address (or the slave was not ready).
    pub fn read(&mut self, addr: Address) -> Option<Data> {
        let dev = self.devices.iter_mut().find(|dev| dev.contains(addr))?;
        let mut data = 0;
        if !dev.bypass_read(addr, &mut data) {
            return None;
        }
        self.reads += 1;
        Some(data)
    }

    /// Synchronous write outside the cycle-accurate protocol.
    pub fn write(&mut self, addr: Address, data: Data) -> bool {
        let Some(dev) = self.devices.iter_mut().find(|dev| dev.contains(addr)) else {
            return false;
        };
        if !dev.bypass_write(addr, data) {
            return false;
        }
        self.writes += 1;
        true
    }

    // ---------------------------------------------------------------------
    // System interface
    // ---------------------------------------------------------------------

    /// Advance the bus one cycle: service the pending transaction (if any),
    /// tick every device, then fold device interrupts into the PIC.
    pub fn tick(&mut self) {
        self.service_transaction();
        self.tick_devices();
        self.aggregate_irqs();
    }

    fn service_transaction(&mut self) {
        let is_read = self.state.is_set(ControlLine::Read);
        let is_write = self.state.is_set(ControlLine::Write);

        if !is_read && !is_write {
            // Bus idle.
            return;
        }

        let addr = self.state.address;
        let Some(target) = self.devices.iter_mut().find(|dev| dev.contains(addr)) else {
            // Decode failure: no device claims the address. Latch Error and
            // make no further progress; the master is expected to notice.
            trace!("bus: decode failure at {addr:#018x}");
            self.state.set(ControlLine::Error, true);
            return;
        };
        self.state.set(ControlLine::Error, false);

        let done = if is_read {
            target.read(addr, &mut self.state.data)
        } else {
            target.write(addr, self.state.data)
        };

        if done {
            if is_read {
                self.reads += 1;
            } else {
                self.writes += 1;
            }
        }

        // A slave that is not done holds the transaction with a wait state.
        self.state.set(ControlLine::Wait, !done);
    }

    fn tick_devices(&mut self) {
        for index in 0..self.devices.len() {
            let (lower, rest) = self.devices.split_at_mut(index);
            let (dev, upper) = rest
                .split_first_mut()
                .expect("device index in range");
            let mut port = DmaPort {
                lower,
                upper,
                reads: &mut self.reads,
                writes: &mut self.writes,
            };
            dev.tick(&mut port);
        }
    }

    fn aggregate_irqs(&mut self) {
        let mut lines: u16 = 0;
        for dev in &mut self.devices {
            if let Some(line) = dev.take_irq() {
                lines |= 1 << line;
            }
        }
        let pending = {
            let Some(pic) = self.pic_mut() else {
                return;
            };
            for line in 0..PicDevice::IRQ_LINES {
                if lines & (1 << line) != 0 {
                    pic.raise(line);
                }
            }
            pic.pending()
        };
        self.state.set(ControlLine::Irq, pending);
    }

    // ---------------------------------------------------------------------
    // Device accessors
    // ---------------------------------------------------------------------

    /// The interrupt controller, if one is attached.
    pub fn pic_mut(&mut self) -> Option<&mut PicDevice> {
        self.devices.iter_mut().find_map(|dev| match dev {
            Device::Pic(pic) => Some(pic),
            _ => None,
        })
    }

    /// The UART, if one is attached.
    pub fn uart_mut(&mut self) -> Option<&mut UartDevice> {
        self.devices.iter_mut().find_map(|dev| match dev {
            Device::Uart(uart) => Some(uart),
            _ => None,
        })
    }

    /// The keyboard, if one is attached.
    pub fn keyboard_mut(&mut self) -> Option<&mut KeyboardDevice> {
        self.devices.iter_mut().find_map(|dev| match dev {
            Device::Keyboard(kbd) => Some(kbd),
            _ => None,
        })
    }

    /// The mouse, if one is attached.
    pub fn mouse_mut(&mut self) -> Option<&mut MouseDevice> {
        self.devices.iter_mut().find_map(|dev| match dev {
            Device::Mouse(mouse) => Some(mouse),
            _ => None,
        })
    }

    /// The storage controller, if one is attached.
    pub fn storage_mut(&mut self) -> Option<&mut StorageController> {
        self.devices.iter_mut().find_map(|dev| match dev {
            Device::Storage(ctrl) => Some(ctrl),
            _ => None,
        })
    }
}
