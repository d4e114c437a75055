//! CPU emulation for the Mic-1.
//!
//! This module implements the complete Mic-1 microarchitecture:
//! - 256-slot control store of 32-bit micro-instructions
//! - 16 sixteen-bit registers, 4096 words of memory
//! - two-cycle memory bus with a memory-mapped serial device

pub mod alu;
pub mod decode;
pub mod execute;
pub mod memory;
pub mod registers;
pub mod serial;

pub use alu::{AluFunction, AluOutput, Shift};
pub use decode::{ABus, Condition, MicroInstruction};
pub use execute::{Cpu, CpuError, StepEvent};
pub use memory::Memory;
pub use registers::Registers;
pub use serial::{SerialHost, SerialPort};
