//! CPU pipeline state machine.
//!
//! Five stages — Fetch, Decode, Execute, Memory, WriteBack — advancing one
//! state transition per tick. Fetch and Memory are multi-cycle: they drive a
//! bus transaction on their first micro-op and then spin on the bus Wait
//! signal until the slave completes. All other stages take exactly one
//! cycle, which yields the canonical timings (ADD retires in 5 ticks, a
//! taken branch in 4, LDR in 7 with zero-latency memory).
//!
//! Instructions retire in program order; there is no speculation and no
//! exception path. A bus error leaves the pipeline parked in its waiting
//! micro-op; an undecodable instruction word halts the core with the fault
//! flag set rather than corrupting architectural state.

use log::trace;

use crate::bus::{Bus, ControlLine};
use crate::core::{Address, Data, Word};

use super::alu::{self, AluOp, Flags};
use super::isa::{self, Instruction, Opcode, Shape, GPR_COUNT};

/// Pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Decode,
    Execute,
    Memory,
    WriteBack,
}

/// The Aurelia CPU core. Masters the bus during Fetch and Memory.
pub struct Cpu {
    // Architectural state
    gpr: [Word; GPR_COUNT],
    pc: Address,
    flags: Flags,

    // Pipeline state
    stage: Stage,
    micro_op: u8,
    halted: bool,
    faulted: bool,

    // Inter-stage latches
    instr: Instruction,
    op_a: Word,
    op_b: Word,
    alu_result: Word,
    mem_data: Data,
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpu {
    pub fn new() -> Self {
        Self {
            gpr: [0; GPR_COUNT],
            pc: 0,
            flags: Flags::default(),
            stage: Stage::Fetch,
            micro_op: 0,
            halted: false,
            faulted: false,
            instr: Instruction::nop(),
            op_a: 0,
            op_b: 0,
            alu_result: 0,
            mem_data: 0,
        }
    }

    /// Reset to the supplied entry point: PC loaded, flags cleared, register
    /// file zeroed, pipeline back at Fetch.
    pub fn reset(&mut self, entry: Address) {
        self.pc = entry;
        self.flags = Flags::default();
        self.gpr = [0; GPR_COUNT];
        self.stage = Stage::Fetch;
        self.micro_op = 0;
        self.halted = false;
        self.faulted = false;
    }

    // ---------------------------------------------------------------------
    // Inspection
    // ---------------------------------------------------------------------

    pub fn register(&self, index: u8) -> Word {
        self.gpr[index as usize]
    }

    pub fn set_register(&mut self, index: u8, value: Word) {
        self.gpr[index as usize] = value;
    }

    pub fn pc(&self) -> Address {
        self.pc
    }

    pub fn set_pc(&mut self, value: Address) {
        self.pc = value;
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Set when the core stopped on an undecodable instruction word.
    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    // ---------------------------------------------------------------------
    // Pipeline
    // ---------------------------------------------------------------------

    /// Advance one cycle. Bus state observed here is the state as of the
    /// start of the cycle; signals asserted here take effect when the bus
    /// ticks next.
    pub fn tick(&mut self, bus: &mut Bus) {
        if self.halted {
            return;
        }

        match self.stage {
            Stage::Fetch => self.stage_fetch(bus),
            Stage::Decode => self.stage_decode(),
            Stage::Execute => self.stage_execute(),
            Stage::Memory => self.stage_memory(bus),
            Stage::WriteBack => self.stage_writeback(),
        }
    }

    fn stage_fetch(&mut self, bus: &mut Bus) {
        if self.micro_op == 0 {
            bus.set_address(self.pc);
            bus.set_control(ControlLine::Read, true);
            bus.set_control(ControlLine::Write, false);
            self.micro_op = 1;
        } else if bus.state().is_set(ControlLine::Error) {
            // Decode failure on the fetch address: stay parked in the
            // waiting micro-op.
        } else if !bus.is_busy() {
            // Memory ready: latch the low half of the data lines as the
            // instruction word.
            let raw = bus.state().data as u32;
            bus.set_control(ControlLine::Read, false);

            match isa::decode(raw) {
                Ok(instr) => {
                    trace!("cpu: fetched {instr:?} at {:#010x}", self.pc);
                    self.instr = instr;
                    self.stage = Stage::Decode;
                    self.micro_op = 0;
                }
                Err(err) => {
                    // Fatal fault: stop without touching the register file.
                    trace!("cpu: {err} at {:#010x}", self.pc);
                    self.halted = true;
                    self.faulted = true;
                }
            }
        }
    }

    fn stage_decode(&mut self) {
        match self.instr.shape {
            Shape::Register => {
                self.op_a = self.gpr[self.instr.rn as usize];
                self.op_b = self.gpr[self.instr.rm as usize];
            }
            Shape::Immediate => {
                // Base register for LDR/STR; MOV forces OpA to zero in
                // Execute.
                self.op_a = self.gpr[self.instr.rn as usize];
                self.op_b = self.instr.imm;
            }
            Shape::Branch => {
                self.op_b = self.instr.imm;
            }
        }
        self.stage = Stage::Execute;
    }

    fn stage_execute(&mut self) {
        let op = self.instr.op;

        if op == Opcode::Halt {
            // HALT retires here: the sequential PC advance still happens,
            // then the core stops until the next reset.
            self.pc = self.pc.wrapping_add(4);
            self.halted = true;
            return;
        }

        if self.instr.shape == Shape::Branch {
            let taken = match op {
                Opcode::B => true,
                Opcode::Beq => self.flags.z,
                Opcode::Bne => !self.flags.z,
                _ => false,
            };
            if taken {
                // Relative branch from the branch's own PC; skip WriteBack
                // so the sequential PC advance does not fire.
                self.pc = self.pc.wrapping_add(self.op_b);
                self.stage = Stage::Fetch;
                self.micro_op = 0;
                return;
            }
            self.stage = Stage::WriteBack;
            return;
        }

        match op {
            Opcode::Ldr | Opcode::Str => {
                // Effective address: base plus widened offset.
                self.alu_result = self.op_a.wrapping_add(self.op_b);
                self.stage = Stage::Memory;
                self.micro_op = 0;
                return;
            }
            Opcode::Nop => {}
            _ => {
                let alu_op = match op {
                    Opcode::Add => AluOp::Add,
                    Opcode::Sub | Opcode::Cmp => AluOp::Sub,
                    Opcode::And => AluOp::And,
                    Opcode::Or => AluOp::Or,
                    Opcode::Xor => AluOp::Xor,
                    Opcode::Lsl => AluOp::Lsl,
                    Opcode::Lsr => AluOp::Lsr,
                    Opcode::Asr => AluOp::Asr,
                    // MOV is OpA=0 plus ADD, so the result is the source.
                    Opcode::Mov => {
                        self.op_a = 0;
                        AluOp::Add
                    }
                    _ => AluOp::Add,
                };
                let result = alu::execute(alu_op, self.op_a, self.op_b, self.flags);
                self.alu_result = result.value;
                self.flags = result.flags;
            }
        }

        self.stage = Stage::WriteBack;
    }

    fn stage_memory(&mut self, bus: &mut Bus) {
        if self.micro_op == 0 {
            bus.set_address(self.alu_result);
            match self.instr.op {
                Opcode::Ldr => {
                    bus.set_control(ControlLine::Read, true);
                    bus.set_control(ControlLine::Write, false);
                }
                Opcode::Str => {
                    bus.set_data(self.gpr[self.instr.rd as usize]);
                    bus.set_control(ControlLine::Write, true);
                    bus.set_control(ControlLine::Read, false);
                }
                _ => {}
            }
            self.micro_op = 1;
        } else if bus.state().is_set(ControlLine::Error) {
            // Unmapped effective address: hold in the waiting micro-op.
        } else if !bus.is_busy() {
            if self.instr.op == Opcode::Ldr {
                self.mem_data = bus.state().data;
                bus.set_control(ControlLine::Read, false);
            } else {
                bus.set_control(ControlLine::Write, false);
            }
            self.stage = Stage::WriteBack;
            self.micro_op = 0;
        }
    }

    fn stage_writeback(&mut self) {
        match self.instr.op {
            Opcode::Ldr => {
                self.gpr[self.instr.rd as usize] = self.mem_data;
            }
            // STR wrote during Memory; CMP and untaken branches write
            // nothing.
            Opcode::Str | Opcode::Cmp => {}
            op if op.is_branch() => {}
            _ => {
                self.gpr[self.instr.rd as usize] = self.alu_result;
            }
        }

        self.pc = self.pc.wrapping_add(4);
        self.stage = Stage::Fetch;
        self.micro_op = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Device, ProbeDevice};
    use crate::memory::RamDevice;

    /// Bus with zero-latency RAM at address zero.
    fn test_bus() -> Bus {
        let mut bus = Bus::new();
        bus.attach(Device::Ram(RamDevice::new(0x1000, 0x0, 0)));
        bus
    }

    fn load_words(bus: &mut Bus, words: &[u32]) {
        for (i, word) in words.iter().enumerate() {
            for (j, byte) in word.to_le_bytes().iter().enumerate() {
                assert!(bus.write((i * 4 + j) as Address, Data::from(*byte)));
            }
        }
    }

    fn step(cpu: &mut Cpu, bus: &mut Bus, cycles: usize) {
        for _ in 0..cycles {
            cpu.tick(bus);
            bus.tick();
        }
    }

    #[test]
    fn test_add_retires_in_five_ticks() {
        let mut bus = test_bus();
        load_words(&mut bus, &[isa::pack(Opcode::Add, 1, 2, 3, 0)]);

        let mut cpu = Cpu::new();
        cpu.reset(0);
        cpu.set_register(2, 40);
        cpu.set_register(3, 2);

        step(&mut cpu, &mut bus, 4);
        // Still mid-instruction after four ticks.
        assert_eq!(cpu.pc(), 0);

        step(&mut cpu, &mut bus, 1);
        assert_eq!(cpu.pc(), 4);
        assert_eq!(cpu.register(1), 42);
        assert_eq!(cpu.stage(), Stage::Fetch);
    }

    #[test]
    fn test_taken_branch_retires_in_four_ticks() {
        let mut bus = test_bus();
        load_words(&mut bus, &[isa::pack(Opcode::B, 0, 0, 0, 16)]);

        let mut cpu = Cpu::new();
        cpu.reset(0);

        step(&mut cpu, &mut bus, 4);
        assert_eq!(cpu.pc(), 16);
        assert_eq!(cpu.stage(), Stage::Fetch);
    }

    #[test]
    fn test_untaken_branch_advances_pc() {
        let mut bus = test_bus();
        // BEQ with Z clear is not taken and falls through WriteBack.
        load_words(&mut bus, &[isa::pack(Opcode::Beq, 0, 0, 0, 16)]);

        let mut cpu = Cpu::new();
        cpu.reset(0);

        step(&mut cpu, &mut bus, 5);
        assert_eq!(cpu.pc(), 4);
    }

    #[test]
    fn test_backward_branch() {
        let mut bus = test_bus();
        let mut cpu = Cpu::new();
        // Branch at 8 jumping back 8 bytes: offset -8 = 0x7F8.
        load_words(
            &mut bus,
            &[
                isa::pack(Opcode::Nop, 0, 0, 0, 0),
                isa::pack(Opcode::Nop, 0, 0, 0, 0),
                isa::pack(Opcode::B, 0, 0, 0, 0x7F8),
            ],
        );
        cpu.reset(8);
        step(&mut cpu, &mut bus, 4);
        assert_eq!(cpu.pc(), 0);
    }

    #[test]
    fn test_ldr_retires_in_seven_ticks() {
        let mut bus = test_bus();
        load_words(&mut bus, &[isa::pack(Opcode::Ldr, 4, 0, 0, 0x100)]);
        // Place the loaded value at the effective address.
        assert!(bus.write(0x100, 0x1122_3344_5566_7788));

        let mut cpu = Cpu::new();
        cpu.reset(0);

        step(&mut cpu, &mut bus, 6);
        assert_eq!(cpu.register(4), 0);

        step(&mut cpu, &mut bus, 1);
        assert_eq!(cpu.register(4), 0x1122_3344_5566_7788);
        assert_eq!(cpu.pc(), 4);
    }

    #[test]
    fn test_str_writes_through_bus() {
        let mut bus = test_bus();
        load_words(&mut bus, &[isa::pack(Opcode::Str, 7, 0, 0, 0x200)]);

        let mut cpu = Cpu::new();
        cpu.reset(0);
        cpu.set_register(7, 0xABCD);

        step(&mut cpu, &mut bus, 7);
        assert_eq!(bus.read(0x200), Some(0xABCD));
        // STR must not write back to the register file.
        assert_eq!(cpu.register(7), 0xABCD);
    }

    #[test]
    fn test_cmp_updates_flags_without_writeback() {
        let mut bus = test_bus();
        load_words(&mut bus, &[isa::pack(Opcode::Cmp, 0, 1, 2, 0)]);

        let mut cpu = Cpu::new();
        cpu.reset(0);
        cpu.set_register(1, 5);
        cpu.set_register(2, 5);
        let r0_before = cpu.register(0);

        step(&mut cpu, &mut bus, 5);
        assert!(cpu.flags().z);
        assert_eq!(cpu.register(0), r0_before);
    }

    #[test]
    fn test_mov_ignores_base_register() {
        let mut bus = test_bus();
        load_words(&mut bus, &[isa::pack(Opcode::Mov, 3, 9, 0, 77)]);

        let mut cpu = Cpu::new();
        cpu.reset(0);
        cpu.set_register(9, 0xFFFF);

        step(&mut cpu, &mut bus, 5);
        assert_eq!(cpu.register(3), 77);
    }

    #[test]
    fn test_halt_stops_the_core() {
        let mut bus = test_bus();
        load_words(&mut bus, &[isa::pack(Opcode::Halt, 0, 0, 0, 0)]);

        let mut cpu = Cpu::new();
        cpu.reset(0);

        step(&mut cpu, &mut bus, 4);
        assert!(cpu.is_halted());
        assert!(!cpu.is_faulted());
        // HALT retired: the PC advanced past it.
        assert_eq!(cpu.pc(), 4);

        // Further ticks are no-ops.
        step(&mut cpu, &mut bus, 10);
        assert_eq!(cpu.pc(), 4);
    }

    #[test]
    fn test_fetch_spins_on_wait_states() {
        let mut bus = Bus::new();
        bus.attach(Device::Ram(RamDevice::new(0x1000, 0x0, 3)));
        // Preload through the direct path (bypass skips the latency model).
        for (j, byte) in isa::pack(Opcode::Mov, 1, 0, 0, 9)
            .to_le_bytes()
            .iter()
            .enumerate()
        {
            assert!(bus.write(j as Address, Data::from(*byte)));
        }

        let mut cpu = Cpu::new();
        cpu.reset(0);

        // With latency 3 the fetch data arrives several cycles late; the
        // instruction still completes correctly afterwards.
        step(&mut cpu, &mut bus, 12);
        assert_eq!(cpu.register(1), 9);
    }

    #[test]
    fn test_undecodable_instruction_faults() {
        let mut bus = test_bus();
        load_words(&mut bus, &[0x0A << 26]);

        let mut cpu = Cpu::new();
        cpu.reset(0);
        step(&mut cpu, &mut bus, 3);

        assert!(cpu.is_halted());
        assert!(cpu.is_faulted());
        assert_eq!(cpu.register(0), 0);
    }

    #[test]
    fn test_bus_error_parks_the_pipeline() {
        let mut bus = Bus::new();
        // Only a narrow probe window is mapped; the fetch address is not.
        bus.attach(Device::Probe(ProbeDevice {
            contains: Box::new(|addr| addr < 0x10),
            on_read: Box::new(|_, out| {
                *out = 0;
                true
            }),
            on_write: Box::new(|_, _| true),
        }));

        let mut cpu = Cpu::new();
        cpu.reset(0x8000);
        step(&mut cpu, &mut bus, 5);

        assert!(bus.state().is_set(ControlLine::Error));
        assert_eq!(cpu.stage(), Stage::Fetch);
        assert_eq!(cpu.pc(), 0x8000);
        assert!(!cpu.is_halted());
    }
}
