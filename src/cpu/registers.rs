//! Mic-1 register file.
//!
//! Sixteen 16-bit registers with fixed roles:
//! - PC, AC, SP: macro-level program counter, accumulator and stack pointer
//! - IR, TIR: instruction register and its decoding scratch copy
//! - 0, +1, -1, AMASK, SMASK: constants the microprogram reads as operands
//! - A-F: scratch

use serde::{Serialize, Deserialize};

pub const REG_PC: usize = 0;
pub const REG_AC: usize = 1;
pub const REG_SP: usize = 2;
pub const REG_IR: usize = 3;
pub const REG_TIR: usize = 4;
pub const REG_ZERO: usize = 5;
pub const REG_ONE: usize = 6;
pub const REG_NEG_ONE: usize = 7;
pub const REG_AMASK: usize = 8;
pub const REG_SMASK: usize = 9;
pub const REG_A: usize = 10;
pub const REG_F: usize = 15;

/// Number of registers.
pub const REGISTER_COUNT: usize = 16;

/// Stack pointer after reset: just below the device registers.
pub const SP_RESET: u16 = 4091;

/// Display names, indexed by register number.
pub const REGISTER_NAMES: [&str; REGISTER_COUNT] = [
    "PC", "AC", "SP", "IR", "TIR", "0", "+1", "-1", "AMASK", "SMASK", "A", "B", "C", "D", "E", "F",
];

/// Name of a register by its 4-bit index.
pub fn register_name(index: u8) -> &'static str {
    REGISTER_NAMES[usize::from(index & 0xF)]
}

/// The Mic-1 register file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers {
    values: [u16; REGISTER_COUNT],
}

impl Registers {
    /// Create a register file in its power-on state.
    pub fn new() -> Self {
        let mut regs = Self { values: [0; REGISTER_COUNT] };
        regs.reset();
        regs
    }

    /// Restore architectural defaults: PC and scratch cleared, SP at the top
    /// of plain memory, constants reasserted.
    pub fn reset(&mut self) {
        self.values = [0; REGISTER_COUNT];
        self.values[REG_SP] = SP_RESET;
        self.values[REG_ZERO] = 0;
        self.values[REG_ONE] = 1;
        self.values[REG_NEG_ONE] = 0xFFFF;
        self.values[REG_AMASK] = 0x0FFF;
        self.values[REG_SMASK] = 0x00FF;
    }

    /// Read a register by its 4-bit index.
    #[inline]
    pub fn get(&self, index: u8) -> u16 {
        self.values[usize::from(index & 0xF)]
    }

    /// Latch a value into a register by its 4-bit index.
    #[inline]
    pub fn set(&mut self, index: u8, value: u16) {
        self.values[usize::from(index & 0xF)] = value;
    }

    /// All sixteen values in index order.
    pub fn values(&self) -> &[u16; REGISTER_COUNT] {
        &self.values
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}
