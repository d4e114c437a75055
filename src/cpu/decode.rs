//! Micro-instruction decoder for the Mic-1.
//!
//! Every control-store word is 32 bits wide and drives the datapath directly:
//!
//! ```text
//!  31  30-29 28-27 26-25 24  23  22 21  20  19-16 15-12 11-8  7-0
//! AMUX COND   ALU   SH   MBR MAR RD WR ENC   C     B     A   ADDR
//! ```

use crate::cpu::alu::{AluFunction, Shift};
use serde::{Serialize, Deserialize};

/// Source of the ALU's A input (AMUX, bit 31).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ABus {
    /// A comes from the register file, selected by the A field
    Registers,
    /// A comes from the memory buffer register
    Mbr,
}

/// Micro-branch condition (COND, bits 30-29).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Condition {
    /// Fall through to MPC + 1
    None,
    /// Jump when the ALU N flag is set
    IfNegative,
    /// Jump when the ALU Z flag is set
    IfZero,
    /// Always jump
    Always,
}

impl Condition {
    /// Build from the two-bit field.
    pub fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            0 => Condition::None,
            1 => Condition::IfNegative,
            2 => Condition::IfZero,
            _ => Condition::Always,
        }
    }

    /// The two-bit field value.
    pub fn bits(self) -> u32 {
        match self {
            Condition::None => 0,
            Condition::IfNegative => 1,
            Condition::IfZero => 2,
            Condition::Always => 3,
        }
    }
}

/// A decoded control-store word.
///
/// Fields are fixed once decoded; only `breakpoint` changes afterwards, and
/// only under the machine lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MicroInstruction {
    pub a_bus: ABus,
    pub cond: Condition,
    pub alu: AluFunction,
    pub shift: Shift,
    /// Latch the shifter output into MBR
    pub mbr: bool,
    /// Latch R[B] into MAR
    pub mar: bool,
    /// Memory read request
    pub rd: bool,
    /// Memory write request
    pub wr: bool,
    /// Latch the shifter output into R[C]
    pub enc: bool,
    pub c: u8,
    pub b: u8,
    pub a: u8,
    /// Micro-branch target
    pub addr: u8,
    /// Halt before this instruction executes
    pub breakpoint: bool,
}

impl MicroInstruction {
    /// True when the ALU result is consumed by a latch or a flag test.
    pub fn uses_alu(&self) -> bool {
        self.mbr
            || self.enc
            || matches!(self.cond, Condition::IfNegative | Condition::IfZero)
    }
}

fn bit(word: u32, n: u32) -> bool {
    (word >> n) & 1 == 1
}

/// Unpack a 32-bit control word. Every word decodes.
pub fn decode(word: u32) -> MicroInstruction {
    MicroInstruction {
        a_bus: if bit(word, 31) { ABus::Mbr } else { ABus::Registers },
        cond: Condition::from_bits(word >> 29),
        alu: AluFunction::from_bits(word >> 27),
        shift: Shift::from_bits(word >> 25),
        mbr: bit(word, 24),
        mar: bit(word, 23),
        rd: bit(word, 22),
        wr: bit(word, 21),
        enc: bit(word, 20),
        c: ((word >> 16) & 0xF) as u8,
        b: ((word >> 12) & 0xF) as u8,
        a: ((word >> 8) & 0xF) as u8,
        addr: (word & 0xFF) as u8,
        breakpoint: false,
    }
}

/// Pack a micro-instruction back into its control word.
///
/// The breakpoint flag is debugger state and is not encoded.
pub fn encode(ins: &MicroInstruction) -> u32 {
    let mut word = 0u32;
    if ins.a_bus == ABus::Mbr {
        word |= 1 << 31;
    }
    word |= ins.cond.bits() << 29;
    word |= ins.alu.bits() << 27;
    word |= ins.shift.bits() << 25;
    word |= u32::from(ins.mbr) << 24;
    word |= u32::from(ins.mar) << 23;
    word |= u32::from(ins.rd) << 22;
    word |= u32::from(ins.wr) << 21;
    word |= u32::from(ins.enc) << 20;
    word |= u32::from(ins.c & 0xF) << 16;
    word |= u32::from(ins.b & 0xF) << 12;
    word |= u32::from(ins.a & 0xF) << 8;
    word |= u32::from(ins.addr);
    word
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_decode_rd_and_mar() {
        let word = u32::from_str_radix("00000000110000000000000000000000", 2).unwrap();
        let ins = decode(word);
        assert!(ins.rd);
        assert!(ins.mar);
        assert!(!ins.wr);
        assert!(!ins.mbr);
        assert_eq!(ins.cond, Condition::None);
    }

    #[test]
    fn test_decode_fields() {
        // amux=1 cond=3 alu=2 sh=1 mbr enc c=10 b=6 a=1 addr=0x42
        let word = 0x8000_0000 | (3 << 29) | (2 << 27) | (1 << 25) | (1 << 24) | (1 << 20)
            | (10 << 16) | (6 << 12) | (1 << 8) | 0x42;
        let ins = decode(word);
        assert_eq!(ins.a_bus, ABus::Mbr);
        assert_eq!(ins.cond, Condition::Always);
        assert_eq!(ins.alu, AluFunction::PassA);
        assert_eq!(ins.shift, Shift::Right);
        assert!(ins.mbr);
        assert!(ins.enc);
        assert!(!ins.mar);
        assert_eq!(ins.c, 10);
        assert_eq!(ins.b, 6);
        assert_eq!(ins.a, 1);
        assert_eq!(ins.addr, 0x42);
        assert!(!ins.breakpoint);
    }

    #[test]
    fn test_uses_alu() {
        assert!(!decode(0).uses_alu());
        assert!(decode(1 << 29).uses_alu());
        assert!(!decode(3 << 29).uses_alu());
        assert!(decode(1 << 20).uses_alu());
    }

    proptest! {
        #[test]
        fn prop_decode_is_pure(word in any::<u32>()) {
            prop_assert_eq!(decode(word), decode(word));
        }

        #[test]
        fn prop_encode_inverts_decode(word in any::<u32>()) {
            // shifter encoding 3 is folded into "no shift"
            let canonical = if (word >> 25) & 0b11 == 0b11 {
                word & !(0b11 << 25)
            } else {
                word
            };
            prop_assert_eq!(encode(&decode(word)), canonical);
        }
    }
}
