//! Microcode and memory image tooling.
//!
//! This module provides:
//! - Loaders for binary and text control-store/memory images
//! - A disassembler (control words → MAL-like text)

pub mod disasm;
pub mod image;

pub use disasm::{disassemble, disassemble_instruction};
pub use image::{ImageError, ImageFile, MemoryImage, Symbol};
