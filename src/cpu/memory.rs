//! Mic-1 main memory.
//!
//! 4096 sixteen-bit words. The top four addresses are the serial device
//! registers; the device semantics live in [`crate::cpu::serial`], this type
//! only holds the backing cells.

use serde::{Serialize, Deserialize};

/// Number of memory words.
pub const MEMORY_SIZE: usize = 4096;

/// Address bits decoded by the memory (MAR's top four bits are ignored).
pub const ADDRESS_MASK: u16 = 0x0FFF;

/// Receiver data register.
pub const RX_DATA: u16 = 4092;
/// Receiver status register.
pub const RX_STATUS: u16 = 4093;
/// Transmitter data register.
pub const TX_DATA: u16 = 4094;
/// Transmitter status register.
pub const TX_STATUS: u16 = 4095;

/// True for the four memory-mapped device addresses.
pub fn is_device_address(addr: u16) -> bool {
    (RX_DATA..=TX_STATUS).contains(&addr)
}

/// Word-addressed main memory.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memory {
    cells: Vec<u16>,
}

impl Memory {
    /// Create a new memory with all cells zeroed.
    pub fn new() -> Self {
        Self {
            cells: vec![0; MEMORY_SIZE],
        }
    }

    /// Read a word. Only the low 12 bits of the address are decoded.
    #[inline]
    pub fn read(&self, addr: u16) -> u16 {
        self.cells[usize::from(addr & ADDRESS_MASK)]
    }

    /// Write a word. Only the low 12 bits of the address are decoded.
    #[inline]
    pub fn write(&mut self, addr: u16, value: u16) {
        self.cells[usize::from(addr & ADDRESS_MASK)] = value;
    }

    /// Clear all memory to zeros.
    pub fn clear(&mut self) {
        self.cells.fill(0);
    }

    /// Copy an image in from address 0. Callers check the length first.
    pub(crate) fn load_image(&mut self, image: &[u16]) {
        self.cells[..image.len()].copy_from_slice(image);
    }

    /// A contiguous range of words, clamped to the end of memory.
    pub fn dump(&self, start: usize, count: usize) -> Vec<(usize, u16)> {
        let start = start.min(MEMORY_SIZE);
        let end = start.saturating_add(count).min(MEMORY_SIZE);
        (start..end).map(|i| (i, self.cells[i])).collect()
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let non_zero = self.cells.iter().filter(|&&w| w != 0).count();

        f.debug_struct("Memory")
            .field("non_zero_cells", &non_zero)
            .field("total_cells", &MEMORY_SIZE)
            .finish()
    }
}
