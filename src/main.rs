//! aurelia: virtual machine driver.
//!
//! Loads a flat binary image into RAM, resets the CPU to the entry point,
//! and drives the global tick until the program halts or the cycle cap is
//! reached.

use std::env;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};

use aurelia::config::MachineConfig;
use aurelia::system::{memory_map, Machine, StopReason};

const DEFAULT_MAX_CYCLES: u64 = 10_000_000;

fn print_usage(program: &str) {
    println!("Aurelia Virtual Machine");
    println!("Usage: {program} [options] <image.bin>");
    println!();
    println!("Options:");
    println!("  --max-cycles <n>   Stop after n cycles (default {DEFAULT_MAX_CYCLES})");
    println!("  --load-addr <hex>  Load/entry address (default {:#x})", memory_map::RESET_VECTOR);
    println!("  --dump-regs        Print the register file after the run");
    println!("  -h, --help         Show this help");
}

struct Args {
    image_path: String,
    max_cycles: u64,
    load_addr: u64,
    dump_regs: bool,
}

fn parse_args() -> Result<Option<Args>> {
    let argv: Vec<String> = env::args().collect();
    let program = argv.first().map(String::as_str).unwrap_or("aurelia");

    let mut image_path = None;
    let mut max_cycles = DEFAULT_MAX_CYCLES;
    let mut load_addr = memory_map::RESET_VECTOR;
    let mut dump_regs = false;

    let mut iter = argv[1..].iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_usage(program);
                return Ok(None);
            }
            "--dump-regs" => dump_regs = true,
            "--max-cycles" => {
                let value = iter.next().context("--max-cycles requires a value")?;
                max_cycles = value.parse().context("--max-cycles must be a number")?;
            }
            "--load-addr" => {
                let value = iter.next().context("--load-addr requires a value")?;
                let digits = value.trim_start_matches("0x");
                load_addr = u64::from_str_radix(digits, 16)
                    .context("--load-addr must be a hex address")?;
            }
            other if other.starts_with('-') => bail!("unknown option: {other}"),
            other => {
                if image_path.is_some() {
                    bail!("multiple input files specified");
                }
                image_path = Some(other.to_string());
            }
        }
    }

    let Some(image_path) = image_path else {
        print_usage(program);
        bail!("no input file specified");
    };

    Ok(Some(Args {
        image_path,
        max_cycles,
        load_addr,
        dump_regs,
    }))
}

fn main() -> Result<ExitCode> {
    env_logger::init();

    let Some(args) = parse_args()? else {
        return Ok(ExitCode::SUCCESS);
    };

    let image = std::fs::read(&args.image_path)
        .with_context(|| format!("cannot read image: {}", args.image_path))?;

    let config = MachineConfig::load();
    let mut machine = Machine::new(&config);
    machine
        .load_image(&image, args.load_addr)
        .context("failed to load image into RAM")?;
    machine.reset(args.load_addr);

    println!("Loaded {} bytes at {:#x}", image.len(), args.load_addr);

    let reason = machine.run(args.max_cycles);

    let console = machine.uart_take_tx();
    if !console.is_empty() {
        print!("{}", String::from_utf8_lossy(&console));
    }

    match reason {
        StopReason::Halted if machine.cpu().is_faulted() => {
            println!(
                "CPU fault at PC {:#x} after {} cycles",
                machine.cpu().pc(),
                machine.total_ticks()
            );
        }
        StopReason::Halted => {
            println!("Halted after {} cycles", machine.total_ticks());
        }
        StopReason::CycleLimit => {
            println!(
                "Cycle limit ({}) reached at PC {:#x}",
                args.max_cycles,
                machine.cpu().pc()
            );
        }
    }

    if args.dump_regs {
        for row in 0..8u8 {
            let line: Vec<String> = (0..4u8)
                .map(|col| {
                    let reg = row * 4 + col;
                    format!("R{reg:02}={:016x}", machine.cpu().register(reg))
                })
                .collect();
            println!("{}", line.join("  "));
        }
        let flags = machine.cpu().flags();
        println!(
            "PC={:016x}  Z={} N={} C={} V={}",
            machine.cpu().pc(),
            u8::from(flags.z),
            u8::from(flags.n),
            u8::from(flags.c),
            u8::from(flags.v)
        );
    }

    Ok(if matches!(reason, StopReason::Halted) && !machine.cpu().is_faulted() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
