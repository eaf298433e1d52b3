//! NVMe-like storage controller.
//!
//! A bus device occupying an 8 KB window: the low 4 KB is the register
//! file, the high 4 KB the doorbell region. The host publishes queue tails
//! and heads by writing doorbells; the controller fetches 64-byte commands
//! from the submission queue in guest RAM over the bus bypass path, executes
//! them against the FTL, DMAs page data to or from the PRP1 buffer, and
//! posts 16-byte completions to the completion queue.
//!
//! At most one command is in flight. A doorbell that moves the tail past
//! the controller's head makes it fetch on a subsequent tick, model a fixed
//! command access time with a busy counter, then execute.

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use crate::bus::DmaPort;
use crate::core::{Address, Data};

use super::ftl::{Ftl, Lba};
use super::nand::PAGE_DATA_SIZE;

/// Register byte offsets within the window.
mod regs {
    use crate::core::Address;

    pub const CAP_LO: Address = 0x00;
    pub const CAP_HI: Address = 0x04;
    pub const VS: Address = 0x08;
    pub const INTMS: Address = 0x0C;
    pub const INTMC: Address = 0x10;
    pub const CC: Address = 0x14;
    pub const CSTS: Address = 0x1C;
    pub const AQA: Address = 0x24;
    pub const ASQ_LO: Address = 0x28;
    pub const ASQ_HI: Address = 0x2C;
    pub const ACQ_LO: Address = 0x30;
    pub const ACQ_HI: Address = 0x34;

    /// Submission queue 0 tail doorbell (host-written).
    pub const SQ0TDBL: Address = 0x1000;
    /// Completion queue 0 head doorbell (host-written).
    pub const CQ0HDBL: Address = 0x1004;
}

/// Controller version register value (1.0.0).
const VERSION: Data = 0x0001_0000;
/// CSTS bit 0: controller ready.
const CSTS_READY: Data = 1 << 0;
/// CC bit 0: enable.
const CC_ENABLE: Data = 1 << 0;

/// Submission queue entry stride.
const SQ_ENTRY_SIZE: Address = 64;
/// Completion queue entry stride.
const CQ_ENTRY_SIZE: Address = 16;
/// Modeled command access time, in ticks, between fetch and execution.
const COMMAND_ACCESS_TICKS: u64 = 5;

/// NVMe I/O opcodes the controller understands.
const OPCODE_WRITE: u8 = 0x01;
const OPCODE_READ: u8 = 0x02;

/// Completion status codes (status field, before phase packing).
const STATUS_SUCCESS: u16 = 0x0000;
const STATUS_INTERNAL_ERROR: u16 = 0x0001;
const STATUS_UNRECOVERED_READ: u16 = 0x0281;

/// A latched submission queue entry, reduced to the fields the controller
/// uses.
#[derive(Debug, Clone, Copy)]
struct PendingCommand {
    opcode: u8,
    prp1: Address,
    lba: Lba,
}

/// The storage controller device. Owns the FTL (and through it the NAND).
pub struct StorageController {
    base: Address,
    ftl: Ftl,

    cc: Data,
    csts: Data,
    intms: Data,
    aqa: Data,
    asq: Address,
    acq: Address,

    /// Host-written SQ tail.
    sq_tail: u16,
    /// Controller-held SQ head.
    sq_head: u16,
    /// Host-written CQ head.
    cq_head: u16,
    /// Controller-held CQ tail.
    cq_tail: u16,

    busy_ticks: u64,
    pending: Option<PendingCommand>,
}

impl StorageController {
    pub fn new(base: Address, ftl: Ftl) -> Self {
        Self {
            base,
            ftl,
            cc: 0,
            csts: 0,
            intms: 0,
            aqa: 0,
            asq: 0,
            acq: 0,
            sq_tail: 0,
            sq_head: 0,
            cq_head: 0,
            cq_tail: 0,
            busy_ticks: 0,
            pending: None,
        }
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.base && addr < self.base + 0x2000
    }

    pub fn ftl(&self) -> &Ftl {
        &self.ftl
    }

    pub fn ftl_mut(&mut self) -> &mut Ftl {
        &mut self.ftl
    }

    fn enabled(&self) -> bool {
        self.cc & CC_ENABLE != 0
    }

    /// Controller-owned queue pointers `(SQ head, CQ tail)`.
    pub fn controller_pointers(&self) -> (u16, u16) {
        (self.sq_head, self.cq_tail)
    }

    /// Host-published queue pointers `(SQ tail, CQ head)`, as last written
    /// through the doorbells.
    pub fn host_pointers(&self) -> (u16, u16) {
        (self.sq_tail, self.cq_head)
    }

    // ---------------------------------------------------------------------
    // Register file
    // ---------------------------------------------------------------------

    pub fn read(&mut self, addr: Address, out: &mut Data) -> bool {
        let offset = addr - self.base;
        *out = match offset {
            regs::CAP_LO | regs::CAP_HI => 0,
            regs::VS => VERSION,
            regs::INTMS => self.intms,
            regs::CC => self.cc,
            regs::CSTS => self.csts,
            regs::AQA => self.aqa,
            regs::ASQ_LO => self.asq & 0xFFFF_FFFF,
            regs::ASQ_HI => self.asq >> 32,
            regs::ACQ_LO => self.acq & 0xFFFF_FFFF,
            regs::ACQ_HI => self.acq >> 32,
            // Doorbells and reserved space read as zero.
            _ => 0,
        };
        true
    }

    pub fn write(&mut self, addr: Address, data: Data) -> bool {
        let offset = addr - self.base;
        match offset {
            regs::CC => {
                self.cc = data;
                if self.enabled() {
                    self.csts |= CSTS_READY;
                } else {
                    // Disable: drop readiness and reset the controller-owned
                    // pointers. The host-published doorbell values are the
                    // host's to manage and stay untouched. A latched but
                    // unexecuted command is abandoned.
                    self.csts &= !CSTS_READY;
                    self.sq_head = 0;
                    self.cq_tail = 0;
                    self.pending = None;
                    self.busy_ticks = 0;
                }
            }
            regs::INTMS => self.intms |= data,
            regs::INTMC => self.intms &= !data,
            regs::AQA => self.aqa = data,
            regs::ASQ_LO => {
                self.asq = (self.asq & 0xFFFF_FFFF_0000_0000) | (data & 0xFFFF_FFFF);
            }
            regs::ASQ_HI => {
                self.asq = (self.asq & 0xFFFF_FFFF) | ((data & 0xFFFF_FFFF) << 32);
            }
            regs::ACQ_LO => {
                self.acq = (self.acq & 0xFFFF_FFFF_0000_0000) | (data & 0xFFFF_FFFF);
            }
            regs::ACQ_HI => {
                self.acq = (self.acq & 0xFFFF_FFFF) | ((data & 0xFFFF_FFFF) << 32);
            }
            regs::SQ0TDBL => {
                self.sq_tail = (data & 0xFFFF) as u16;
            }
            regs::CQ0HDBL => {
                self.cq_head = (data & 0xFFFF) as u16;
            }
            // CAP, VS, CSTS and reserved space ignore writes.
            _ => {}
        }
        true
    }

    // ---------------------------------------------------------------------
    // Command engine
    // ---------------------------------------------------------------------

    /// Advance the controller one tick, mastering the bus through `dma` for
    /// queue fetches, data transfers, and completion posting.
    pub fn tick(&mut self, dma: &mut DmaPort<'_>) {
        if self.busy_ticks > 0 {
            self.busy_ticks -= 1;
            if self.busy_ticks == 0 {
                if let Some(cmd) = self.pending.take() {
                    self.execute(cmd, dma);
                }
            }
            return;
        }

        if self.pending.is_none() && self.enabled() && self.sq_head != self.sq_tail {
            self.fetch(dma);
        }
    }

    /// Fetch the command at the SQ head into the pending latch and start
    /// the access-time countdown.
    fn fetch(&mut self, dma: &mut DmaPort<'_>) {
        let entry = self.asq + Address::from(self.sq_head) * SQ_ENTRY_SIZE;

        // Dword 0 low byte: opcode. Bytes 24..31: PRP1. Bytes 40..43:
        // Dword10 (LBA). The length field (Dword12) is implied: transfers
        // are a single 4096-byte block.
        let w0 = dma.read(entry).unwrap_or(0);
        let prp1 = dma.read(entry + 24).unwrap_or(0);
        let w10 = dma.read(entry + 40).unwrap_or(0);

        self.pending = Some(PendingCommand {
            opcode: (w0 & 0xFF) as u8,
            prp1,
            lba: (w10 & 0xFFFF_FFFF) as Lba,
        });
        self.sq_head = self.sq_head.wrapping_add(1);
        self.busy_ticks = COMMAND_ACCESS_TICKS;
        debug!(
            "storage: fetched sq entry at {entry:#x}, head now {}",
            self.sq_head
        );
    }

    fn execute(&mut self, cmd: PendingCommand, dma: &mut DmaPort<'_>) {
        let status = match cmd.opcode {
            OPCODE_WRITE => {
                let mut buffer = vec![0u8; PAGE_DATA_SIZE];
                for i in (0..PAGE_DATA_SIZE).step_by(8) {
                    let word = dma.read(cmd.prp1 + i as Address).unwrap_or(0);
                    LittleEndian::write_u64(&mut buffer[i..i + 8], word);
                }
                match self.ftl.write(cmd.lba, &buffer) {
                    Ok(()) => STATUS_SUCCESS,
                    Err(_) => STATUS_INTERNAL_ERROR,
                }
            }
            OPCODE_READ => {
                let mut buffer = vec![0u8; PAGE_DATA_SIZE];
                let status = match self.ftl.read(cmd.lba, &mut buffer) {
                    Ok(()) => STATUS_SUCCESS,
                    Err(_) => STATUS_UNRECOVERED_READ,
                };
                for i in (0..PAGE_DATA_SIZE).step_by(8) {
                    let word = LittleEndian::read_u64(&buffer[i..i + 8]);
                    dma.write(cmd.prp1 + i as Address, word);
                }
                status
            }
            _ => STATUS_INTERNAL_ERROR,
        };

        debug!(
            "storage: op {:#04x} lba {} -> status {:#06x}",
            cmd.opcode, cmd.lba, status
        );
        self.post_completion(status, dma);
    }

    /// Post a completion entry: the status dword (status field in the upper
    /// bits, phase bit 0 set) lives in bytes 12..15 of the entry. The write
    /// is a read-modify-write of the entry's upper word so neighbouring
    /// entries stay untouched.
    fn post_completion(&mut self, status: u16, dma: &mut DmaPort<'_>) {
        let entry = self.acq + Address::from(self.cq_tail) * CQ_ENTRY_SIZE;
        let status_dword = (Data::from(status) << 16) | 1;

        let upper = dma.read(entry + 8).unwrap_or(0);
        let merged = (upper & 0xFFFF_FFFF) | (status_dword << 32);
        dma.write(entry + 8, merged);

        self.cq_tail = self.cq_tail.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Bus, ControlLine, Device};
    use crate::memory::RamDevice;
    use crate::storage::NandChip;

    const CTRL_BASE: Address = 0xF000_0000;

    fn storage_bus() -> Bus {
        let mut bus = Bus::new();
        bus.attach(Device::Ram(RamDevice::new(0x10000, 0x0, 0)));
        let ftl = Ftl::mount(NandChip::new(64));
        bus.attach(Device::Storage(StorageController::new(CTRL_BASE, ftl)));
        bus
    }

    fn enable_controller(bus: &mut Bus, asq: Address, acq: Address) {
        assert!(bus.write(CTRL_BASE + regs::ASQ_LO, asq & 0xFFFF_FFFF));
        assert!(bus.write(CTRL_BASE + regs::ACQ_LO, acq & 0xFFFF_FFFF));
        assert!(bus.write(CTRL_BASE + regs::CC, CC_ENABLE));
        assert_eq!(
            bus.read(CTRL_BASE + regs::CSTS).unwrap() & CSTS_READY,
            CSTS_READY
        );
    }

    fn write_sq_entry(bus: &mut Bus, asq: Address, slot: u16, opcode: u8, prp1: Address, lba: u32) {
        let entry = asq + Address::from(slot) * SQ_ENTRY_SIZE;
        assert!(bus.write(entry, Data::from(opcode)));
        assert!(bus.write(entry + 24, prp1));
        assert!(bus.write(entry + 40, Data::from(lba)));
        assert!(bus.write(entry + 48, 1)); // One block.
    }

    #[test]
    fn test_version_register() {
        let mut bus = storage_bus();
        assert_eq!(bus.read(CTRL_BASE + regs::VS), Some(VERSION));
    }

    #[test]
    fn test_enable_disable_sequence() {
        let mut bus = storage_bus();
        enable_controller(&mut bus, 0x4000, 0x5000);

        // Disabling clears readiness.
        assert!(bus.write(CTRL_BASE + regs::CC, 0));
        assert_eq!(bus.read(CTRL_BASE + regs::CSTS).unwrap() & CSTS_READY, 0);
    }

    #[test]
    fn test_disable_resets_only_controller_pointers() {
        let mut bus = storage_bus();
        let (asq, acq) = (0x4000, 0x5000);
        enable_controller(&mut bus, asq, acq);

        assert!(bus.write(0x1000, 1));
        write_sq_entry(&mut bus, asq, 0, OPCODE_WRITE, 0x1000, 0);
        assert!(bus.write(CTRL_BASE + regs::SQ0TDBL, 1));
        for _ in 0..50 {
            bus.tick();
        }
        assert!(bus.write(CTRL_BASE + regs::CQ0HDBL, 1));

        // Disable: the controller-owned head/tail go back to zero, the
        // host-published doorbell values stay as written.
        assert!(bus.write(CTRL_BASE + regs::CC, 0));
        let ctrl = bus.storage_mut().unwrap();
        assert_eq!(ctrl.controller_pointers(), (0, 0));
        assert_eq!(ctrl.host_pointers(), (1, 1));
    }

    #[test]
    fn test_doorbell_without_enable_is_ignored() {
        let mut bus = storage_bus();
        assert!(bus.write(CTRL_BASE + regs::SQ0TDBL, 1));
        for _ in 0..20 {
            bus.tick();
        }
        // Nothing fetched, nothing completed; CSTS still not ready.
        assert_eq!(bus.read(CTRL_BASE + regs::CSTS), Some(0));
    }

    #[test]
    fn test_write_then_read_command_roundtrip() {
        let mut bus = storage_bus();
        let (asq, acq) = (0x4000, 0x5000);
        enable_controller(&mut bus, asq, acq);

        // Source buffer at 0x1000, destination buffer at 0x2000.
        assert!(bus.write(0x1000, 0xDEAD_BEEF));
        write_sq_entry(&mut bus, asq, 0, OPCODE_WRITE, 0x1000, 5);
        assert!(bus.write(CTRL_BASE + regs::SQ0TDBL, 1));

        write_sq_entry(&mut bus, asq, 1, OPCODE_READ, 0x2000, 5);
        assert!(bus.write(CTRL_BASE + regs::SQ0TDBL, 2));

        for _ in 0..100 {
            bus.tick();
        }

        assert_eq!(bus.read(0x2000), Some(0xDEAD_BEEF));

        // Both completions posted with phase bit set and success status.
        for slot in 0..2u64 {
            let upper = bus.read(acq + slot * 16 + 8).unwrap();
            let status_dword = (upper >> 32) as u32;
            assert_eq!(status_dword & 1, 1, "phase bit, slot {slot}");
            assert_eq!(status_dword >> 16, 0, "status field, slot {slot}");
        }
    }

    #[test]
    fn test_read_of_unwritten_lba_returns_erased() {
        let mut bus = storage_bus();
        let (asq, acq) = (0x4000, 0x5000);
        enable_controller(&mut bus, asq, acq);

        write_sq_entry(&mut bus, asq, 0, OPCODE_READ, 0x3000, 42);
        assert!(bus.write(CTRL_BASE + regs::SQ0TDBL, 1));
        for _ in 0..50 {
            bus.tick();
        }
        assert_eq!(bus.read(0x3000), Some(Data::MAX));
    }

    #[test]
    fn test_unknown_opcode_completes_with_error() {
        let mut bus = storage_bus();
        let (asq, acq) = (0x4000, 0x5000);
        enable_controller(&mut bus, asq, acq);

        write_sq_entry(&mut bus, asq, 0, 0x7F, 0x1000, 0);
        assert!(bus.write(CTRL_BASE + regs::SQ0TDBL, 1));
        for _ in 0..50 {
            bus.tick();
        }

        let upper = bus.read(acq + 8).unwrap();
        let status_dword = (upper >> 32) as u32;
        assert_eq!(status_dword & 1, 1);
        assert_ne!(status_dword >> 16, 0);
    }

    #[test]
    fn test_commands_are_serialized() {
        // Two doorbells rung back to back: the controller must retire the
        // first command before fetching the second, and both must land.
        let mut bus = storage_bus();
        let (asq, acq) = (0x4000, 0x5000);
        enable_controller(&mut bus, asq, acq);

        assert!(bus.write(0x1000, 0x1111));
        assert!(bus.write(0x1800, 0x2222));
        write_sq_entry(&mut bus, asq, 0, OPCODE_WRITE, 0x1000, 1);
        write_sq_entry(&mut bus, asq, 1, OPCODE_WRITE, 0x1800, 2);
        assert!(bus.write(CTRL_BASE + regs::SQ0TDBL, 2));

        for _ in 0..100 {
            bus.tick();
        }

        write_sq_entry(&mut bus, asq, 2, OPCODE_READ, 0x2000, 1);
        write_sq_entry(&mut bus, asq, 3, OPCODE_READ, 0x2800, 2);
        assert!(bus.write(CTRL_BASE + regs::SQ0TDBL, 4));
        for _ in 0..100 {
            bus.tick();
        }

        assert_eq!(bus.read(0x2000), Some(0x1111));
        assert_eq!(bus.read(0x2800), Some(0x2222));
    }

    #[test]
    fn test_queue_pointers_track_doorbells() {
        let mut bus = storage_bus();
        let (asq, acq) = (0x4000, 0x5000);
        enable_controller(&mut bus, asq, acq);

        assert!(bus.write(0x1000, 1));
        write_sq_entry(&mut bus, asq, 0, OPCODE_WRITE, 0x1000, 0);
        assert!(bus.write(CTRL_BASE + regs::SQ0TDBL, 1));
        for _ in 0..50 {
            bus.tick();
        }
        assert!(bus.write(CTRL_BASE + regs::CQ0HDBL, 1));

        let ctrl = bus.storage_mut().unwrap();
        assert_eq!(ctrl.controller_pointers(), (1, 1));
        assert_eq!(ctrl.host_pointers(), (1, 1));
    }

    #[test]
    fn test_bus_error_signal_not_disturbed() {
        // Controller activity must not assert bus master lines; the cycle
        // path stays free for the CPU.
        let mut bus = storage_bus();
        enable_controller(&mut bus, 0x4000, 0x5000);
        for _ in 0..10 {
            bus.tick();
        }
        assert!(!bus.state().is_set(ControlLine::Read));
        assert!(!bus.state().is_set(ControlLine::Write));
    }
}
