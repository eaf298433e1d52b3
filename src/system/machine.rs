//! Machine assembly and the run loop.
//!
//! A [`Machine`] is the complete system as a value: CPU, bus, and every
//! device, built from a [`MachineConfig`] and wired to the address map.
//! Its lifecycle is construct → load → reset → run-until-halt. Each
//! simulated cycle advances the clock, then the CPU, then the bus (which
//! ticks every device and folds interrupts into the PIC) — in that order,
//! so the CPU always observes bus state as of the start of the cycle.

use log::debug;

use crate::bus::{Bus, Device};
use crate::config::MachineConfig;
use crate::core::{Address, Clock};
use crate::cpu::Cpu;
use crate::memory::RamDevice;
use crate::peripherals::{
    KeyboardDevice, MouseDevice, PicDevice, TimerDevice, UartDevice,
};
use crate::storage::{Ftl, NandChip, StorageController};

use super::loader::{self, LoadError};
use super::memory_map;

/// Why [`Machine::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The CPU executed HALT (or faulted).
    Halted,
    /// The cycle cap was reached first.
    CycleLimit,
}

/// The assembled system.
pub struct Machine {
    cpu: Cpu,
    bus: Bus,
    clock: Clock,
}

impl Machine {
    /// Build a machine from `config`: RAM at the bottom of the address
    /// space, the peripheral block, and the storage stack (NAND under FTL
    /// under controller) at the configured base.
    pub fn new(config: &MachineConfig) -> Self {
        let mut bus = Bus::new();
        bus.attach(Device::Ram(RamDevice::new(
            config.ram_size,
            memory_map::RAM_BASE,
            config.ram_latency,
        )));
        bus.attach(Device::Uart(UartDevice::new(memory_map::UART_BASE)));
        bus.attach(Device::Pic(PicDevice::new(memory_map::PIC_BASE)));
        bus.attach(Device::Timer(TimerDevice::new(memory_map::TIMER_BASE)));
        bus.attach(Device::Keyboard(KeyboardDevice::new(
            memory_map::KEYBOARD_BASE,
        )));
        bus.attach(Device::Mouse(MouseDevice::new(memory_map::MOUSE_BASE)));

        let ftl = Ftl::mount(NandChip::new(config.nand_blocks));
        bus.attach(Device::Storage(StorageController::new(
            config.storage_base,
            ftl,
        )));

        debug!(
            "machine: {} MiB RAM (latency {}), {} NAND blocks, storage at {:#x}",
            config.ram_size / (1024 * 1024),
            config.ram_latency,
            config.nand_blocks,
            config.storage_base
        );

        Self {
            cpu: Cpu::new(),
            bus,
            clock: Clock::new(),
        }
    }

    /// Load a flat binary image into RAM.
    pub fn load_image(&mut self, image: &[u8], load_address: Address) -> Result<(), LoadError> {
        loader::load_image(&mut self.bus, image, load_address)
    }

    /// Reset the CPU to an entry point.
    pub fn reset(&mut self, entry: Address) {
        self.cpu.reset(entry);
    }

    /// Advance one cycle.
    pub fn tick(&mut self) {
        self.clock.tick();
        self.cpu.tick(&mut self.bus);
        self.bus.tick();
    }

    /// Run until the CPU halts or `max_cycles` elapse. The cap is a
    /// host-side safety net, not an architectural timeout.
    pub fn run(&mut self, max_cycles: u64) -> StopReason {
        for _ in 0..max_cycles {
            if self.cpu.is_halted() {
                return StopReason::Halted;
            }
            self.tick();
        }
        if self.cpu.is_halted() {
            StopReason::Halted
        } else {
            StopReason::CycleLimit
        }
    }

    // ---------------------------------------------------------------------
    // Host access
    // ---------------------------------------------------------------------

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut Bus {
        &mut self.bus
    }

    pub fn total_ticks(&self) -> u64 {
        self.clock.total_ticks()
    }

    /// Inject a key into the keyboard FIFO.
    pub fn enqueue_key(&mut self, key: u8) -> bool {
        self.bus
            .keyboard_mut()
            .map(|kbd| kbd.enqueue_key(key))
            .unwrap_or(false)
    }

    /// Inject a mouse motion/button packet.
    pub fn update_mouse(&mut self, dx: i32, dy: i32, buttons: u8) {
        if let Some(mouse) = self.bus.mouse_mut() {
            mouse.update(dx, dy, buttons);
        }
    }

    /// Inject a byte into the UART receive queue.
    pub fn uart_push_rx(&mut self, byte: u8) {
        if let Some(uart) = self.bus.uart_mut() {
            uart.push_rx(byte);
        }
    }

    /// Drain everything the guest wrote to the UART.
    pub fn uart_take_tx(&mut self) -> Vec<u8> {
        self.bus
            .uart_mut()
            .map(UartDevice::take_tx)
            .unwrap_or_default()
    }

    /// Highest-priority pending interrupt line, for the outer driver.
    pub fn pending_irq(&mut self) -> Option<u8> {
        self.bus.pic_mut().and_then(|pic| pic.lowest_pending())
    }
}
