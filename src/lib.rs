//! # Mic-1 Emulator
//!
//! A cycle-accurate emulator of the Mic-1, the microprogrammed teaching
//! processor: a 256-word control store drives a 16-register datapath, a
//! 4096-word memory and a memory-mapped serial port, one micro-cycle at a
//! time.
//!
//! The engine is [`Cpu`]; [`Machine`] shares it between a run loop and any
//! number of observers (the terminal dashboard, the headless runner, the
//! WebAssembly bindings).

pub mod cpu;
pub mod asm;
pub mod machine;

#[cfg(feature = "tui")]
pub mod tui;

#[cfg(feature = "wasm")]
pub mod wasm;

// Re-export commonly used types
pub use cpu::{Cpu, CpuError, Memory, MicroInstruction, Registers, StepEvent};
pub use cpu::decode::{decode, encode};
pub use asm::{disassemble, disassemble_instruction, ImageError, ImageFile, MemoryImage, Symbol};
pub use machine::{Machine, RunState, Snapshot, StateEvent};

#[cfg(feature = "tui")]
pub use tui::run_dashboard;
