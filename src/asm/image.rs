//! Control-store and memory image files.
//!
//! Two encodings exist for each image:
//! - binary: big-endian words, 4 bytes per control word, 2 per memory word
//! - text: one binary-digit string per line (up to 32 or 16 digits)
//!
//! Memory text files may also carry symbol lines of the form
//! `#name: 1234`, which attach a display name to an address. Other lines
//! starting with `#` are comments. Blank lines are ignored in both text
//! forms.

use crate::cpu::execute::CONTROL_STORE_SIZE;
use crate::cpu::memory::MEMORY_SIZE;
use serde::{Serialize, Deserialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A named memory address, for display only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub address: u16,
}

/// A parsed memory image and its symbol table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryImage {
    /// Words to place from address 0.
    pub words: Vec<u16>,
    /// Symbols declared in the file.
    pub symbols: Vec<Symbol>,
}

/// On-disk encoding of an image file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
    Binary,
    Text,
}

/// An image file on disk, kept so it can be reloaded after a reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFile {
    pub path: PathBuf,
    pub encoding: Encoding,
}

impl ImageFile {
    pub fn binary(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), encoding: Encoding::Binary }
    }

    pub fn text(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), encoding: Encoding::Text }
    }

    /// Read this file as a control-store image.
    pub fn load_control_store(&self) -> Result<Vec<u32>, ImageError> {
        match self.encoding {
            Encoding::Binary => load_control_store_binary(&self.path),
            Encoding::Text => load_control_store_text(&self.path),
        }
    }

    /// Read this file as a memory image.
    pub fn load_memory(&self) -> Result<MemoryImage, ImageError> {
        match self.encoding {
            Encoding::Binary => load_memory_binary(&self.path),
            Encoding::Text => load_memory_text(&self.path),
        }
    }
}

/// Load a binary control-store file.
pub fn load_control_store_binary<P: AsRef<Path>>(path: P) -> Result<Vec<u32>, ImageError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|e| io_error(path, &e))?;
    let words = parse_control_store_binary(&display(path), &bytes)?;
    log::info!("loaded {} bytes ({} micro-instructions) from {}", bytes.len(), words.len(), path.display());
    Ok(words)
}

/// Load a text control-store file.
pub fn load_control_store_text<P: AsRef<Path>>(path: P) -> Result<Vec<u32>, ImageError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| io_error(path, &e))?;
    let words = parse_control_store_text(&display(path), &text)?;
    log::info!("loaded {} micro-instructions from {}", words.len(), path.display());
    Ok(words)
}

/// Load a binary memory file. Binary images carry no symbols.
pub fn load_memory_binary<P: AsRef<Path>>(path: P) -> Result<MemoryImage, ImageError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|e| io_error(path, &e))?;
    let image = parse_memory_binary(&display(path), &bytes)?;
    log::info!("loaded {} memory words from {}", image.words.len(), path.display());
    Ok(image)
}

/// Load a text memory file with its symbols.
pub fn load_memory_text<P: AsRef<Path>>(path: P) -> Result<MemoryImage, ImageError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| io_error(path, &e))?;
    let image = parse_memory_text(&display(path), &text)?;
    log::info!(
        "loaded {} memory words and {} symbols from {}",
        image.words.len(),
        image.symbols.len(),
        path.display()
    );
    Ok(image)
}

/// Parse big-endian 32-bit control words. `name` labels errors.
pub fn parse_control_store_binary(name: &str, bytes: &[u8]) -> Result<Vec<u32>, ImageError> {
    if bytes.len() % 4 != 0 {
        return Err(ImageError::Truncated {
            path: name.to_string(),
            kind: "microcode",
            len: bytes.len(),
            word_size: 4,
        });
    }
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    check_capacity(name, words.len(), CONTROL_STORE_SIZE)?;
    Ok(words)
}

/// Parse one 32-digit binary string per line. `name` labels errors.
pub fn parse_control_store_text(name: &str, text: &str) -> Result<Vec<u32>, ImageError> {
    let mut words = Vec::with_capacity(CONTROL_STORE_SIZE);
    for (line_num, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let digits = parse_digits(name, line_num + 1, trimmed, 32)?;
        words.push(digits as u32);
    }
    check_capacity(name, words.len(), CONTROL_STORE_SIZE)?;
    Ok(words)
}

/// Parse big-endian 16-bit memory words. `name` labels errors.
pub fn parse_memory_binary(name: &str, bytes: &[u8]) -> Result<MemoryImage, ImageError> {
    if bytes.len() % 2 != 0 {
        return Err(ImageError::Truncated {
            path: name.to_string(),
            kind: "memory",
            len: bytes.len(),
            word_size: 2,
        });
    }
    let words: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect();
    check_capacity(name, words.len(), MEMORY_SIZE)?;
    Ok(MemoryImage { words, symbols: Vec::new() })
}

/// Parse one 16-digit binary string per line plus `#name: value` symbols.
pub fn parse_memory_text(name: &str, text: &str) -> Result<MemoryImage, ImageError> {
    let mut image = MemoryImage::default();
    for (line_num, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(comment) = trimmed.strip_prefix('#') {
            match parse_symbol(comment) {
                Some(symbol) => image.symbols.push(symbol),
                None => log::debug!("{}:{}: skipping comment", name, line_num + 1),
            }
            continue;
        }
        let digits = parse_digits(name, line_num + 1, trimmed, 16)?;
        image.words.push(digits as u16);
    }
    check_capacity(name, image.words.len(), MEMORY_SIZE)?;
    Ok(image)
}

fn parse_symbol(comment: &str) -> Option<Symbol> {
    let (name, value) = comment.split_once(':')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let address = value.trim().parse::<u16>().ok()?;
    Some(Symbol { name: name.to_string(), address })
}

fn parse_digits(name: &str, line: usize, digits: &str, width: usize) -> Result<u64, ImageError> {
    if let Some(bad) = digits.chars().find(|c| !matches!(c, '0' | '1')) {
        return Err(ImageError::Parse {
            path: name.to_string(),
            line,
            message: format!("unexpected character {:?} in binary word", bad),
        });
    }
    if digits.len() > width {
        return Err(ImageError::Parse {
            path: name.to_string(),
            line,
            message: format!("expected at most {} digits, found {}", width, digits.len()),
        });
    }
    u64::from_str_radix(digits, 2).map_err(|e| ImageError::Parse {
        path: name.to_string(),
        line,
        message: e.to_string(),
    })
}

fn check_capacity(name: &str, words: usize, capacity: usize) -> Result<(), ImageError> {
    if words > capacity {
        return Err(ImageError::TooLarge {
            path: name.to_string(),
            words,
            capacity,
        });
    }
    Ok(())
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

fn io_error(path: &Path, err: &std::io::Error) -> ImageError {
    ImageError::Io {
        path: display(path),
        message: err.to_string(),
    }
}

/// Errors that can occur while reading image files.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error("cannot read \"{path}\": {message}")]
    Io { path: String, message: String },

    #[error("binary {kind} file \"{path}\" is {len} bytes, not a multiple of {word_size}")]
    Truncated {
        path: String,
        kind: &'static str,
        len: usize,
        word_size: usize,
    },

    #[error("parse error in \"{path}\" on line {line}: {message}")]
    Parse {
        path: String,
        line: usize,
        message: String,
    },

    #[error("\"{path}\" holds {words} words, capacity is {capacity}")]
    TooLarge {
        path: String,
        words: usize,
        capacity: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_control_store_binary_is_big_endian() {
        let words = parse_control_store_binary("mc.bin", &[0x12, 0x34, 0x56, 0x78, 0, 0, 0, 1]).unwrap();
        assert_eq!(words, vec![0x1234_5678, 1]);
    }

    #[test]
    fn test_control_store_binary_bad_length() {
        let err = parse_control_store_binary("mc.bin", &[0; 6]).unwrap_err();
        assert_eq!(
            err,
            ImageError::Truncated {
                path: "mc.bin".into(),
                kind: "microcode",
                len: 6,
                word_size: 4
            }
        );
        assert!(err.to_string().contains("mc.bin"));
        assert!(err.to_string().contains("6 bytes"));
    }

    #[test]
    fn test_control_store_too_large() {
        let err = parse_control_store_binary("big.bin", &[0; 4 * 257]).unwrap_err();
        assert!(matches!(err, ImageError::TooLarge { words: 257, capacity: 256, .. }));
    }

    #[test]
    fn test_control_store_text() {
        let text = "00000000110000000000000000000000\n\n11111111111111111111111111111111\n";
        let words = parse_control_store_text("mc.txt", text).unwrap();
        assert_eq!(words, vec![0x00C0_0000, 0xFFFF_FFFF]);
    }

    #[test]
    fn test_text_rejects_bad_digits() {
        let err = parse_control_store_text("mc.txt", "0101\n0102\n").unwrap_err();
        assert!(matches!(err, ImageError::Parse { line: 2, .. }));

        let long = "1".repeat(17);
        let err = parse_memory_text("mem.txt", &long).unwrap_err();
        assert!(matches!(err, ImageError::Parse { line: 1, .. }));
    }

    #[test]
    fn test_memory_binary() {
        let image = parse_memory_binary("m.bin", &[0xBE, 0xEF, 0x00, 0x2A]).unwrap();
        assert_eq!(image.words, vec![0xBEEF, 42]);
        assert!(image.symbols.is_empty());

        assert!(matches!(
            parse_memory_binary("m.bin", &[1, 2, 3]),
            Err(ImageError::Truncated { len: 3, word_size: 2, .. })
        ));
    }

    #[test]
    fn test_memory_text_with_symbols() {
        let text = "\
# main program
0000000000000101
#counter: 12
#  loop :7
1111111111111111
";
        let image = parse_memory_text("m.txt", text).unwrap();
        assert_eq!(image.words, vec![5, 0xFFFF]);
        assert_eq!(
            image.symbols,
            vec![
                Symbol { name: "counter".into(), address: 12 },
                Symbol { name: "loop".into(), address: 7 },
            ]
        );
    }

    #[test]
    fn test_load_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0x80, 0x00, 0x00, 0x01]).unwrap();
        let words = ImageFile::binary(file.path()).load_control_store().unwrap();
        assert_eq!(words, vec![0x8000_0001]);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "#x: 3").unwrap();
        writeln!(file, "1").unwrap();
        let image = ImageFile::text(file.path()).load_memory().unwrap();
        assert_eq!(image.words, vec![1]);
        assert_eq!(image.symbols.len(), 1);
    }

    #[test]
    fn test_missing_file_names_path() {
        let err = load_memory_binary("/nonexistent/mic1/image.bin").unwrap_err();
        match err {
            ImageError::Io { path, .. } => assert!(path.contains("image.bin")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
