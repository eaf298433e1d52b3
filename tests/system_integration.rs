//! End-to-end scenarios: assemble a program, load it over the bus, run the
//! machine to completion, and inspect architectural state.

use aurelia::asm;
use aurelia::config::MachineConfig;
use aurelia::system::{memory_map, Machine, StopReason};

fn test_machine() -> Machine {
    let config = MachineConfig {
        ram_size: 0x100000,
        ram_latency: 0,
        nand_blocks: 16,
        ..MachineConfig::default()
    };
    Machine::new(&config)
}

fn run_program(source: &str, max_cycles: u64) -> Machine {
    let image = asm::assemble(source).unwrap();
    let mut machine = test_machine();
    machine
        .load_image(&image.image(), memory_map::RESET_VECTOR)
        .unwrap();
    machine.reset(memory_map::RESET_VECTOR);
    machine.run(max_cycles);
    machine
}

#[test]
fn mov_halt_program_halts_with_value() {
    // The canonical smoke test: the image is exactly the two expected
    // little-endian words.
    let image = asm::assemble("MOV R0, #42\nHALT\n").unwrap();
    assert_eq!(
        image.image(),
        vec![0x2A, 0x00, 0x00, 0x80, 0x00, 0x00, 0x00, 0xFC]
    );

    let mut machine = test_machine();
    machine.load_image(&image.image(), 0).unwrap();
    machine.reset(0);

    assert_eq!(machine.run(50), StopReason::Halted);
    assert!(machine.cpu().pc() >= 8);
    assert_eq!(machine.cpu().register(0), 42);
}

#[test]
fn arithmetic_program_computes_sum() {
    // Sum 1..=10 by counted loop: R1 counter, R2 accumulator.
    let machine = run_program(
        "\
  MOV R1, #10
  MOV R2, #0
loop:
  ADD R2, R2, R1
  SUB R1, R1, #1
  CMP R1, #0
  BNE loop
  HALT
",
        2000,
    );
    assert!(machine.cpu().is_halted());
    assert_eq!(machine.cpu().register(2), 55);
    assert_eq!(machine.cpu().register(1), 0);
}

#[test]
fn forward_branch_skips_instructions() {
    let machine = run_program(
        "\
  MOV R0, #1
  B done
  MOV R0, #2
done:
  HALT
",
        100,
    );
    assert_eq!(machine.cpu().register(0), 1);
}

#[test]
fn conditional_branch_on_equality() {
    let machine = run_program(
        "\
  MOV R1, #7
  CMP R1, #7
  BEQ equal
  MOV R2, #0
  HALT
equal:
  MOV R2, #1
  HALT
",
        200,
    );
    assert_eq!(machine.cpu().register(2), 1);
}

#[test]
fn load_store_roundtrip_through_ram() {
    // Store a computed value, clear the register, load it back.
    let machine = run_program(
        "\
  MOV R1, #100
  MOV R3, #77
  STR R3, [R1, #0]
  MOV R3, #0
  LDR R4, [R1, #0]
  HALT
",
        200,
    );
    assert_eq!(machine.cpu().register(4), 77);
    assert_eq!(machine.cpu().register(3), 0);
}

#[test]
fn shifts_and_bitwise_ops() {
    let machine = run_program(
        "\
  MOV R1, #1
  LSL R2, R1, #8
  LSR R3, R2, #4
  OR  R4, R2, R3
  AND R5, R4, R3
  XOR R6, R4, R4
  HALT
",
        300,
    );
    assert_eq!(machine.cpu().register(2), 0x100);
    assert_eq!(machine.cpu().register(3), 0x10);
    assert_eq!(machine.cpu().register(4), 0x110);
    assert_eq!(machine.cpu().register(5), 0x10);
    assert_eq!(machine.cpu().register(6), 0);
}

#[test]
fn pipeline_timing_five_ticks_per_alu_instruction() {
    let image = asm::assemble("ADD R1, R2, R3\nHALT\n").unwrap();
    let mut machine = test_machine();
    machine.load_image(&image.image(), 0).unwrap();
    machine.reset(0);

    for _ in 0..5 {
        machine.tick();
    }
    // First instruction retired exactly now.
    assert_eq!(machine.cpu().pc(), 4);
}

#[test]
fn data_segment_follows_text_in_memory() {
    let source = "\
  HALT
.string \"Hi!\"
";
    let image = asm::assemble(source).unwrap();
    let mut machine = test_machine();
    machine.load_image(&image.image(), 0).unwrap();

    // Text is one word; the string starts at byte 4.
    let word = machine.bus_mut().read(4).unwrap();
    let bytes = word.to_le_bytes();
    assert_eq!(&bytes[..4], b"Hi!\0");
}

#[test]
fn guest_program_drives_uart() {
    // Build the UART base (0xE000_1000) with shifts, then STR 'O' and 'K'
    // into the data register.
    let source = "\
  MOV R1, #0xE
  LSL R1, R1, #28
  MOV R3, #1
  LSL R3, R3, #12
  ADD R1, R1, R3
  MOV R2, #79
  STR R2, [R1, #0]
  MOV R2, #75
  STR R2, [R1, #0]
  HALT
";
    let image = asm::assemble(source).unwrap();
    let mut machine = test_machine();
    machine.load_image(&image.image(), 0).unwrap();
    machine.reset(0);
    machine.run(500);

    assert!(machine.cpu().is_halted());
    assert_eq!(machine.uart_take_tx(), b"OK");
}

#[test]
fn faulting_image_stops_without_register_damage() {
    // An image of undecodable words.
    let mut machine = test_machine();
    machine.load_image(&[0xFF, 0xFF, 0xFF, 0x2B], 0).unwrap();
    machine.reset(0);
    machine.run(50);

    assert!(machine.cpu().is_halted());
    assert!(machine.cpu().is_faulted());
    for reg in 0..32 {
        assert_eq!(machine.cpu().register(reg), 0);
    }
}
