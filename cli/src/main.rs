use std::fs;
use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};
use tracing::{event, Level};
use tracing_subscriber::prelude::*;

use base::registers;
use cpu::{Bus, Cpu, MemoryConfiguration, RamSize};

/// Emulate the AT&T 3B2/400 system board: a WE32100 processor, its
/// WE32101 memory management unit, ROM and main memory.
#[derive(Debug, Parser)]
#[command(about, author)]
struct Args {
    /// File containing the boot ROM image
    rom: PathBuf,

    /// Installed main memory (512K, 1M, 2M or 4M)
    #[arg(long, default_value_t = RamSize::default())]
    ram_size: RamSize,

    /// Stop executing after this many instructions
    #[arg(long, default_value_t = 100_000_000)]
    limit: u64,

    /// Number of executed instructions to retain for the trail dump
    #[arg(long, default_value_t = 100)]
    history: usize,

    /// Print the execution trail leading up to the stop
    #[arg(long)]
    show_history: bool,

    /// Stop on the first exception or trap instead of gating to the
    /// handler the ROM installed
    #[arg(long)]
    halt_on_exception: bool,
}

fn get_colour_choice() -> ColorChoice {
    if atty::is(atty::Stream::Stdout) {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    }
}

/// Prints the register file, one line per register, with the
/// role-bearing registers highlighted.
fn dump_registers(cpu: &Cpu) -> Result<(), std::io::Error> {
    let mut stream = StandardStream::stdout(get_colour_choice());
    let mut special = ColorSpec::new();
    special.set_fg(Some(Color::Cyan));

    for (index, value) in cpu.registers().iter().enumerate() {
        if index >= registers::FP {
            stream.set_color(&special)?;
        }
        writeln!(stream, "{:>5} {value:08x}", registers::name(index))?;
    }
    stream.reset()
}

fn run_simulator() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // See
    // https://docs.rs/tracing-subscriber/latest/tracing_subscriber/fmt/index.html#filtering-events-with-environment-variables
    // for instructions on how to select which trace messages get
    // printed.
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))?;

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    let image = fs::read(&args.rom)?;
    let mut bus = Bus::new(&MemoryConfiguration {
        ram_size: args.ram_size,
    });
    let mut cpu = Cpu::with_history_capacity(args.history);
    cpu.set_halt_on_exception(args.halt_on_exception);
    cpu.boot(&mut bus, &image)?;

    match cpu.run(&mut bus, args.limit) {
        Some(reason) => event!(Level::INFO, %reason, "execution stopped"),
        None => event!(
            Level::INFO,
            limit = args.limit,
            "instruction limit reached"
        ),
    }

    if args.show_history {
        print!("{}", cpu.history());
    }
    dump_registers(&cpu)?;
    Ok(())
}

fn main() {
    match run_simulator() {
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
        Ok(()) => {
            std::process::exit(0);
        }
    }
}
