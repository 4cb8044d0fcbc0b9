//! A thin headless CLI driver: assemble or load a program and run it to
//! completion, reporting the pipeline and cache counters an interactive
//! visualiser would otherwise display. The visualiser itself is out of
//! scope for this crate; this binary satisfies the "benchmark runner"
//! contract alone.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use cyclesim::{Machine, MachineConfig};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Pipelined,
    Sequential,
}

/// Assemble or load a program for the cyclesim machine and run it to the
/// §6.3 halt sentinel, printing final register, pipeline, and cache state.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to a `.asm` source file or a raw little-endian `.bin` word file.
    program: PathBuf,

    /// Execution mode.
    #[arg(long, value_enum, default_value_t = Mode::Pipelined)]
    mode: Mode,

    /// Disable the L1/L2 cache hierarchy (every access costs the main
    /// memory access time).
    #[arg(long)]
    no_cache: bool,

    /// Upper bound on the number of cycles to run before giving up.
    #[arg(long, default_value_t = 1_000_000)]
    max_steps: u64,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let words = if cli.program.extension().is_some_and(|ext| ext == "bin") {
        cyclesim::io::read_binary(&cli.program)?
    } else {
        cyclesim::io::assemble_file_strict(&cli.program)?
    };

    let mut machine = Machine::new(MachineConfig::default());
    machine.set_pipelined(matches!(cli.mode, Mode::Pipelined));
    machine.set_cache_enabled(!cli.no_cache);
    machine.load_program(&words)?;

    let steps = machine.run_until_halt(Some(cli.max_steps))?;

    let stats = machine.stats();
    println!("ran {steps} step(s)");
    println!(
        "cycles={} instructions={} stalls={} flushes={}",
        stats.cycles, stats.instructions, stats.stall_count, stats.flush_count
    );
    println!(
        "l1 hits={} misses={} hit_rate={:.3}",
        machine.memory().l1().hits(),
        machine.memory().l1().misses(),
        machine.memory().l1().hit_rate()
    );
    println!(
        "l2 hits={} misses={} hit_rate={:.3}",
        machine.memory().l2().hits(),
        machine.memory().l2().misses(),
        machine.memory().l2().hit_rate()
    );
    for i in 1..32 {
        let value = machine.registers().get(i);
        if value != 0 {
            println!("r{i} = {value} (0x{value:08x})");
        }
    }

    Ok(())
}
