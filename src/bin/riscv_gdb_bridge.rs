//! CLI entry point for the RISC-V GDB remote debug bridge.
//!
//! A `#[derive(Parser)]` CLI accepting numeric flags in either base via
//! `clap_num::maybe_hex`, with a `ctrlc`-installed handler that requests
//! graceful shutdown of the session driver's stop channel.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use clap_num::maybe_hex;
use log::{error, info};

use riscv_gdb_bridge::dm::{DmBackend, DmSimulator, Xlen};
use riscv_gdb_bridge::session::SessionDriver;

/// Starts the GDB remote debug bridge: terminates RSP on a TCP socket
/// and drives a RISC-V Debug Module over DMI.
#[derive(Parser, Debug)]
#[command(
    about = "RISC-V GDB remote debug bridge (RSP <-> Debug Module v0.13)",
    long_about = None,
    after_help = "Example usage: riscv-gdb-bridge --sim --port 3333 --elf a.out"
)]
struct Cli {
    /// TCP port to listen on; 0 picks an ephemeral port.
    #[arg(short = 'p', long, default_value_t = 0)]
    port: u16,

    /// ELF image to preload into target memory before GDB attaches.
    #[arg(long)]
    elf: Option<PathBuf>,

    /// Default XLEN until overridden by an ELF load or `monitor xlen`.
    #[arg(long, value_enum, default_value = "64")]
    xlen: XlenArg,

    /// Entry point to set the PC to after preload (hex with `0x` or decimal).
    #[arg(long, value_parser = maybe_hex::<u64>)]
    entry: Option<u64>,

    /// Use the built-in in-memory Debug Module simulator instead of real
    /// hardware. A concrete hardware DMI transport is not wired into this
    /// binary; this is the only transport it ships with.
    #[arg(long, default_value_t = true)]
    sim: bool,

    /// Raise log verbosity; repeatable (-v, -vv, -vvv).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum XlenArg {
    #[value(name = "32")]
    Bits32,
    #[value(name = "64")]
    Bits64,
}

impl From<XlenArg> for Xlen {
    fn from(x: XlenArg) -> Xlen {
        match x {
            XlenArg::Bits32 => Xlen::Bits32,
            XlenArg::Bits64 => Xlen::Bits64,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if !cli.sim {
        error!("no real DMI transport is wired into this binary; pass --sim");
        std::process::exit(1);
    }

    let mut backend = DmBackend::new(DmSimulator::new(cli.xlen.into()), true);
    backend.set_xlen(cli.xlen.into());

    if let Some(path) = &cli.elf {
        match backend.elf_load(path) {
            Ok(image) => info!(
                "loaded {} [0x{:x}, 0x{:x})",
                path.display(),
                image.min_addr,
                image.max_addr
            ),
            Err(e) => {
                error!("failed to load {}: {e}", path.display());
                std::process::exit(1);
            }
        }
    }

    if let Some(entry) = cli.entry {
        if let Err(e) = backend.pc_write(entry) {
            error!("failed to set entry point: {e}");
            std::process::exit(1);
        }
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let mut driver = match SessionDriver::start_tcp(backend, cli.port) {
        Ok(d) => d,
        Err(e) => {
            error!("failed to start session driver: {e}");
            std::process::exit(1);
        }
    };
    info!("listening on 127.0.0.1:{}", driver.port());

    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            info!("ctrl-c received, shutting down");
            shutdown.store(true, Ordering::SeqCst);
        })
        .expect("failed to install ctrl-c handler");
    }

    while !shutdown.load(Ordering::SeqCst) {
        std::thread::sleep(std::time::Duration::from_millis(50));
    }
    driver.stop();
    driver.join();
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}
