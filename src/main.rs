//! Mic-1 Emulator - CLI Entry Point
//!
//! Commands:
//! - `mic1-emu run --mc <file> [--m <file>]` - Run headless, serial on stdin/stdout
//! - `mic1-emu debug --mcs <file> [--ms <file>]` - Interactive dashboard
//! - `mic1-emu disasm --mc <file>` - Disassemble a control store

use clap::{Args, Parser, Subcommand};
use mic1::cpu::registers::REGISTER_NAMES;
use mic1::{disassemble, ImageFile, Machine, RunState, Snapshot};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::thread;

#[derive(Parser)]
#[command(name = "mic1-emu")]
#[command(author = "Yigit")]
#[command(version = "0.1.0")]
#[command(about = "A cycle-accurate emulator of the Mic-1 microprogrammed processor")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run until a breakpoint or bus conflict, with the serial port on stdin/stdout
    Run {
        #[command(flatten)]
        microcode: MicrocodeArgs,
        #[command(flatten)]
        memory: MemoryArgs,
        /// Stop after this many micro-cycles
        #[arg(long)]
        max_cycles: Option<u64>,
        /// Print the final machine state as JSON
        #[arg(long)]
        json: bool,
    },
    /// Interactive terminal dashboard
    Debug {
        #[command(flatten)]
        microcode: MicrocodeArgs,
        #[command(flatten)]
        memory: MemoryArgs,
    },
    /// Print the control-store listing
    Disasm {
        #[command(flatten)]
        microcode: MicrocodeArgs,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct MicrocodeArgs {
    /// Binary control-store image (4 bytes per word, big-endian)
    #[arg(long = "mc")]
    mc: Option<PathBuf>,
    /// Text control-store image (one binary string per line)
    #[arg(long = "mcs")]
    mcs: Option<PathBuf>,
}

impl MicrocodeArgs {
    fn image(&self) -> ImageFile {
        // the argument group guarantees exactly one of the two
        match &self.mc {
            Some(path) => ImageFile::binary(path),
            None => ImageFile::text(self.mcs.clone().unwrap_or_default()),
        }
    }
}

#[derive(Args)]
#[group(required = false, multiple = false)]
struct MemoryArgs {
    /// Binary memory image (2 bytes per word, big-endian)
    #[arg(long = "m")]
    m: Option<PathBuf>,
    /// Text memory image (binary strings and `#name: address` symbols)
    #[arg(long = "ms")]
    ms: Option<PathBuf>,
}

impl MemoryArgs {
    fn image(&self) -> Option<ImageFile> {
        match (&self.m, &self.ms) {
            (Some(path), _) => Some(ImageFile::binary(path)),
            (None, Some(path)) => Some(ImageFile::text(path)),
            (None, None) => None,
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { microcode, memory, max_cycles, json } => {
            run_headless(microcode.image(), memory.image(), max_cycles, json);
        }
        Commands::Debug { microcode, memory } => {
            debug(microcode.image(), memory.image());
        }
        Commands::Disasm { microcode } => {
            disassemble_file(&microcode.image());
        }
    }
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("❌ {}", message);
    process::exit(1);
}

/// Build a machine from the given images, exiting on any load error.
fn load_machine(microcode: &ImageFile, memory: Option<&ImageFile>) -> Machine {
    let machine = Machine::new();

    let words = microcode.load_control_store().unwrap_or_else(|e| fail(e));
    if let Err(e) = machine.load_control_store(&words) {
        fail(format!("{}: {}", microcode.path.display(), e));
    }

    if let Some(file) = memory {
        let image = file.load_memory().unwrap_or_else(|e| fail(e));
        if let Err(e) = machine.load_memory(&image.words, image.symbols) {
            fail(format!("{}: {}", file.path.display(), e));
        }
    }

    machine
}

fn run_headless(microcode: ImageFile, memory: Option<ImageFile>, max_cycles: Option<u64>, json: bool) {
    let machine = Arc::new(load_machine(&microcode, memory.as_ref()));

    // Stdin feeds the receiver; a full queue blocks this thread, not the machine.
    let feeder = Arc::clone(&machine);
    thread::spawn(move || {
        for byte in io::stdin().lock().bytes() {
            match byte {
                Ok(b) if feeder.send_input(b).is_ok() => {}
                _ => break,
            }
        }
    });

    let stdout = io::stdout();
    let mut out = stdout.lock();

    // Each cycle emits at most one byte and the queue is drained every
    // cycle, so the transmitter never waits here.
    machine.set_desired_state(RunState::Run);
    let mut executed = 0u64;
    while machine.desired_state() == RunState::Run {
        if max_cycles.is_some_and(|max| executed >= max) {
            log::warn!("stopping after {} micro-cycles", executed);
            break;
        }
        if let Err(e) = machine.step() {
            if let Err(io) = out.flush() {
                log::error!("stdout: {}", io);
            }
            fail(e);
        }
        executed += 1;
        if let Err(e) = forward_output(&machine, &mut out) {
            fail(format!("serial output lost after {} cycles: {}", executed, e));
        }
    }
    machine.halt();
    if let Err(e) = forward_output(&machine, &mut out).and_then(|()| out.flush()) {
        fail(format!("serial output lost: {}", e));
    }

    let snap = machine.snapshot();
    if json {
        match serde_json::to_string_pretty(&snap) {
            Ok(text) => eprintln!("{}", text),
            Err(e) => fail(e),
        }
    } else {
        print_report(&snap);
    }
}

/// Copy every transmitted byte to `out`, stopping at the first write error.
fn forward_output(machine: &Machine, out: &mut impl Write) -> io::Result<()> {
    while let Some(byte) = machine.try_recv_output() {
        out.write_all(&[byte])?;
    }
    Ok(())
}

fn print_report(snap: &Snapshot) {
    eprintln!();
    eprintln!("━━━ Result ━━━");
    eprintln!("Cycles: {}   MPC: {}", snap.cycles, snap.mpc);
    for (name, value) in REGISTER_NAMES.iter().zip(snap.registers.iter()) {
        eprintln!("{:>6}: {:016b} {:5} {:6}", name, value, value, *value as i16);
    }
    eprintln!("   MAR: {:5}   MBR: {:016b}", snap.mar, snap.mbr);
    eprintln!("     N: {}   Z: {}", u8::from(snap.negative), u8::from(snap.zero));
}

#[cfg(feature = "tui")]
fn debug(microcode: ImageFile, memory: Option<ImageFile>) {
    let machine = Arc::new(load_machine(&microcode, memory.as_ref()));

    if let Err(e) = mic1::run_dashboard(machine, Some(microcode), memory) {
        fail(format!("Dashboard error: {}", e));
    }
}

#[cfg(not(feature = "tui"))]
fn debug(_microcode: ImageFile, _memory: Option<ImageFile>) {
    fail("built without the `tui` feature");
}

fn disassemble_file(microcode: &ImageFile) {
    let words = microcode.load_control_store().unwrap_or_else(|e| fail(e));
    println!("{}", disassemble(&words));
}

#[cfg(test)]
mod tests {
    use super::*;
    use mic1::cpu::alu::{AluFunction, Shift};
    use mic1::cpu::registers::{REG_A, REG_AMASK, REG_NEG_ONE, REG_ONE};
    use mic1::{decode, encode, MicroInstruction};

    const A: u8 = REG_A as u8;
    const B: u8 = A + 1;

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// A machine that has transmitted the byte 8 twice.
    fn transmitting_machine() -> Machine {
        let nop = decode(0);
        let program = [
            MicroInstruction { enc: true, c: A, a: REG_ONE as u8, alu: AluFunction::PassA, shift: Shift::Left, ..nop },
            MicroInstruction { enc: true, c: A, a: A, alu: AluFunction::PassA, shift: Shift::Left, ..nop },
            MicroInstruction { enc: true, c: A, a: A, alu: AluFunction::PassA, shift: Shift::Left, ..nop },
            MicroInstruction { mar: true, b: REG_AMASK as u8, mbr: true, a: A, alu: AluFunction::PassA, wr: true, ..nop },
            MicroInstruction { wr: true, ..nop },
            MicroInstruction { enc: true, c: B, a: REG_AMASK as u8, b: REG_NEG_ONE as u8, ..nop },
            MicroInstruction { mar: true, b: B, mbr: true, a: A, alu: AluFunction::PassA, wr: true, ..nop },
            MicroInstruction { wr: true, ..nop },
            MicroInstruction { mar: true, b: B, mbr: true, a: A, alu: AluFunction::PassA, wr: true, ..nop },
            MicroInstruction { wr: true, ..nop },
        ];
        let machine = Machine::new();
        let words: Vec<u32> = program.iter().map(encode).collect();
        machine.load_control_store(&words).unwrap();
        for _ in 0..program.len() {
            machine.step().unwrap();
        }
        machine
    }

    #[test]
    fn test_forward_output_copies_bytes() {
        let machine = transmitting_machine();
        let mut out = Vec::new();
        forward_output(&machine, &mut out).unwrap();
        assert_eq!(out, vec![8, 8]);
        assert!(machine.drain_output().is_empty());
    }

    #[test]
    fn test_forward_output_reports_closed_stdout() {
        let machine = transmitting_machine();
        let err = forward_output(&machine, &mut ClosedPipe).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        // the failed write stops forwarding
        assert_eq!(machine.drain_output(), vec![8]);
    }
}
