//! Loads a raw 6502 test image, clocks the CPU with a `trap_pc` harness, and
//! reports pass/fail. This is the shape spec.md §8's scenario S4 (the Klaus
//! 6502 functional test suite) describes running under.
//!
//! Grounded on `task/src/main.rs`'s `clap`-derive CLI shape.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use vic20_core::bus::Bus;
use vic20_core::cpu::Cpu;
use vic20_core::rom::MemoryModel;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a flat binary 6502 image.
    image: PathBuf,

    /// Address the image is loaded at.
    #[arg(long, value_parser = parse_hex_u16, default_value = "0x0000")]
    load_address: u16,

    /// Address execution starts at. Defaults to `load_address`.
    #[arg(long, value_parser = parse_hex_u16)]
    start: Option<u16>,

    /// Address the suite is expected to self-loop at on success.
    #[arg(long, value_parser = parse_hex_u16)]
    trap_pc: u16,

    /// Upper bound on cycles run before declaring a timeout failure.
    #[arg(long, default_value_t = 200_000_000)]
    max_cycles: u64,
}

fn parse_hex_u16(s: &str) -> Result<u16, String> {
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(s, 16).map_err(|e| e.to_string())
}

fn main() -> ExitCode {
    let _ = env_logger::try_init();
    let cli = Cli::parse();

    let image = match fs::read(&cli.image) {
        Ok(bytes) => bytes,
        Err(err) => {
            eprintln!("failed to read {}: {err}", cli.image.display());
            return ExitCode::FAILURE;
        }
    };

    let bus = Bus::new(MemoryModel::Test);
    bus.borrow_mut().load_block(cli.load_address, &image);

    let start = cli.start.unwrap_or(cli.load_address);
    let mut cpu = Cpu::new(bus);
    cpu.reset(Some(start), Some(cli.trap_pc));

    let mut cycles: u64 = 0;
    loop {
        if let Err(fault) = cpu.cycle() {
            eprintln!("FAIL: {fault} after {cycles} cycles");
            return ExitCode::FAILURE;
        }
        cycles += 1;

        if cpu.instruction_complete() && cpu.pc == cli.trap_pc {
            println!("PASS: reached trap address {:#06x} after {cycles} cycles", cli.trap_pc);
            return ExitCode::SUCCESS;
        }

        if cycles >= cli.max_cycles {
            eprintln!(
                "FAIL: did not reach trap address {:#06x} within {} cycles (stuck at {:#06x})",
                cli.trap_pc, cli.max_cycles, cpu.pc
            );
            return ExitCode::FAILURE;
        }
    }
}
