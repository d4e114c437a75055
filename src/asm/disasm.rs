//! Disassembler for Mic-1 microcode.
//!
//! Renders micro-instructions in MAL-like notation, for example
//! `mar := SP; MBR := AC; wr; goto 10; `. The output is for display only.

use crate::cpu::alu::{AluFunction, Shift};
use crate::cpu::decode::{decode, ABus, Condition, MicroInstruction};
use crate::cpu::registers::register_name;

/// Disassemble a decoded micro-instruction.
pub fn disassemble_instruction(ins: &MicroInstruction) -> String {
    let mut out = String::new();

    if ins.mar {
        out.push_str(&format!("mar := {}; ", register_name(ins.b)));
    }

    if ins.uses_alu() {
        let expr = format_shift(ins.shift, &format_alu(ins));
        if ins.mbr {
            out.push_str(&format!("MBR := {}; ", expr));
        }
        if ins.enc {
            out.push_str(&format!("{} := {}; ", register_name(ins.c), expr));
        }
        if !ins.mbr && !ins.enc {
            out.push_str(&format!("ALU := {}; ", expr));
        }
    }

    if ins.rd {
        out.push_str("rd; ");
    }
    if ins.wr {
        out.push_str("wr; ");
    }

    match ins.cond {
        Condition::None => {}
        Condition::IfNegative => out.push_str(&format!("if n goto {}; ", ins.addr)),
        Condition::IfZero => out.push_str(&format!("if z goto {}; ", ins.addr)),
        Condition::Always => out.push_str(&format!("goto {}; ", ins.addr)),
    }

    out
}

/// Disassemble a raw control word.
pub fn disassemble_word(word: u32) -> String {
    disassemble_instruction(&decode(word))
}

/// Disassemble a whole control-store image, one line per slot.
pub fn disassemble(words: &[u32]) -> String {
    let mut output = String::new();
    output.push_str("; Mic-1 Microcode Disassembly\n");
    output.push_str("; ---------------------------\n\n");

    for (addr, &word) in words.iter().enumerate() {
        output.push_str(&format!("{:03}: {:032b}  {}\n", addr, word, disassemble_word(word).trim_end()));
    }

    output
}

fn format_alu(ins: &MicroInstruction) -> String {
    let a = match ins.a_bus {
        ABus::Mbr => "MBR",
        ABus::Registers => register_name(ins.a),
    };
    let b = register_name(ins.b);
    match ins.alu {
        AluFunction::Add => format!("{} + {}", a, b),
        AluFunction::And => format!("band({}, {})", a, b),
        AluFunction::PassA => a.to_string(),
        AluFunction::NotA => format!("not({})", a),
    }
}

fn format_shift(shift: Shift, expr: &str) -> String {
    match shift {
        Shift::None => expr.to_string(),
        Shift::Right => format!("rshift({})", expr),
        Shift::Left => format!("lshift({})", expr),
    }
}
