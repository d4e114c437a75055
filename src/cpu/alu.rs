//! The Mic-1 arithmetic logic unit and shifter.
//!
//! The ALU is purely combinational: two 16-bit inputs, a function select and
//! a shifter select go in, a result and the N/Z flags come out. The flags are
//! taken from the ALU output *before* the shifter touches it, exactly as the
//! hardware wires them.

use serde::{Serialize, Deserialize};

/// ALU function select (bits 28-27 of the control word).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AluFunction {
    /// A + B, wrapping at 16 bits
    Add,
    /// A AND B
    And,
    /// A passed through unchanged
    PassA,
    /// NOT A (B ignored)
    NotA,
}

impl AluFunction {
    /// Build from the two-bit field.
    pub fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            0 => AluFunction::Add,
            1 => AluFunction::And,
            2 => AluFunction::PassA,
            _ => AluFunction::NotA,
        }
    }

    /// The two-bit field value.
    pub fn bits(self) -> u32 {
        match self {
            AluFunction::Add => 0,
            AluFunction::And => 1,
            AluFunction::PassA => 2,
            AluFunction::NotA => 3,
        }
    }
}

/// Shifter select (bits 26-25 of the control word).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Shift {
    /// Output passes through
    None,
    /// Logical shift right by one, zero fill
    Right,
    /// Shift left by one
    Left,
}

impl Shift {
    /// Build from the two-bit field. The unused encoding 3 behaves as no shift.
    pub fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            1 => Shift::Right,
            2 => Shift::Left,
            _ => Shift::None,
        }
    }

    /// The two-bit field value.
    pub fn bits(self) -> u32 {
        match self {
            Shift::None => 0,
            Shift::Right => 1,
            Shift::Left => 2,
        }
    }
}

/// Output of one ALU evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AluOutput {
    /// Shifter output
    pub result: u16,
    /// Z: ALU output (pre-shift) was zero
    pub zero: bool,
    /// N: ALU output (pre-shift) had bit 15 set
    pub negative: bool,
}

/// Evaluate the ALU and shifter.
pub fn compute(a: u16, b: u16, function: AluFunction, shift: Shift) -> AluOutput {
    let raw = match function {
        AluFunction::Add => a.wrapping_add(b),
        AluFunction::And => a & b,
        AluFunction::PassA => a,
        AluFunction::NotA => !a,
    };

    let zero = raw == 0;
    let negative = raw & 0x8000 != 0;

    let result = match shift {
        Shift::None => raw,
        Shift::Right => raw >> 1,
        Shift::Left => raw << 1,
    };

    AluOutput { result, zero, negative }
}
