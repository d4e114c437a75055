//! WebAssembly bindings for the Mic-1 emulator.
//!
//! This module provides JavaScript-friendly wrappers around the core emulator.
//! Browsers have no blocking run loop, so `run` executes a bounded number of
//! cycles per call. Transmitted bytes are moved out of the machine's queue
//! after every cycle and collected until `take_output`, so a long run on the
//! page's only thread never waits for a reader.

use wasm_bindgen::prelude::*;
use crate::{Machine, RunState, StepEvent};
use crate::asm::image::{parse_control_store_text, parse_memory_text, MemoryImage};

/// Initialize panic hook for better error messages in console.
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// WebAssembly-friendly machine wrapper.
#[wasm_bindgen]
pub struct WasmMic1 {
    machine: Machine,
    microcode: Vec<u32>,
    memory: MemoryImage,
    output: Vec<u8>,
}

#[wasm_bindgen]
impl WasmMic1 {
    /// Create a new machine instance.
    #[wasm_bindgen(constructor)]
    pub fn new() -> Self {
        Self {
            machine: Machine::new(),
            microcode: Vec::new(),
            memory: MemoryImage::default(),
            output: Vec::new(),
        }
    }

    /// Load a control store from its text form. Returns the word count.
    #[wasm_bindgen]
    pub fn load_microcode(&mut self, source: &str) -> Result<usize, JsError> {
        let words = parse_control_store_text("microcode", source)
            .map_err(|e| JsError::new(&e.to_string()))?;
        self.machine.load_control_store(&words)
            .map_err(|e| JsError::new(&e.to_string()))?;
        let len = words.len();
        self.microcode = words;
        Ok(len)
    }

    /// Load memory from its text form. Returns the word count.
    #[wasm_bindgen]
    pub fn load_memory(&mut self, source: &str) -> Result<usize, JsError> {
        let image = parse_memory_text("memory", source)
            .map_err(|e| JsError::new(&e.to_string()))?;
        self.machine.load_memory(&image.words, image.symbols.clone())
            .map_err(|e| JsError::new(&e.to_string()))?;
        let len = image.words.len();
        self.memory = image;
        Ok(len)
    }

    /// Execute one micro-cycle. Returns true if the cycle asked to halt.
    #[wasm_bindgen]
    pub fn step(&mut self) -> Result<bool, JsError> {
        let event = self.cycle()?;
        Ok(event.halts())
    }

    /// Run until a breakpoint, a bus conflict or `max_cycles`. Returns the
    /// number of cycles executed.
    #[wasm_bindgen]
    pub fn run(&mut self, max_cycles: u32) -> Result<u32, JsError> {
        self.machine.set_desired_state(RunState::Run);
        let mut executed = 0;
        while executed < max_cycles && self.machine.desired_state() == RunState::Run {
            self.cycle()?;
            executed += 1;
        }
        self.machine.halt();
        Ok(executed)
    }

    /// Reset and reload the last images.
    #[wasm_bindgen]
    pub fn reset(&mut self) -> Result<(), JsError> {
        self.machine.reset();
        self.machine.zero_memory();
        self.machine.zero_control_store();
        self.machine.load_control_store(&self.microcode)
            .map_err(|e| JsError::new(&e.to_string()))?;
        self.machine.load_memory(&self.memory.words, self.memory.symbols.clone())
            .map_err(|e| JsError::new(&e.to_string()))?;
        Ok(())
    }

    /// Toggle a breakpoint. Returns the new flag (false for empty slots).
    #[wasm_bindgen]
    pub fn toggle_breakpoint(&mut self, addr: u8) -> bool {
        self.machine.toggle_breakpoint(addr).unwrap_or(false)
    }

    /// Get cycle count.
    #[wasm_bindgen]
    pub fn cycles(&self) -> u64 {
        self.machine.snapshot().cycles
    }

    /// Get the micro-program counter.
    #[wasm_bindgen]
    pub fn mpc(&self) -> u8 {
        self.machine.snapshot().mpc
    }

    /// Get a register by index (0-15).
    #[wasm_bindgen]
    pub fn register(&self, index: u8) -> u16 {
        self.machine.with_cpu(|cpu| cpu.regs.get(index))
    }

    /// Get a memory word.
    #[wasm_bindgen]
    pub fn memory_at(&self, addr: u16) -> u16 {
        self.machine.with_cpu(|cpu| cpu.mem.read(addr))
    }

    /// Get the control-store listing, one line per occupied slot.
    #[wasm_bindgen]
    pub fn microcode_listing(&self) -> Vec<String> {
        self.machine
            .control_store_listing()
            .into_iter()
            .map(|(addr, text, bp)| format!("{}{:03}: {}", if bp { "*" } else { " " }, addr, text))
            .collect()
    }

    /// Get the full machine state as a JSON string.
    #[wasm_bindgen]
    pub fn snapshot_json(&self) -> Result<String, JsError> {
        serde_json::to_string(&self.machine.snapshot())
            .map_err(|e| JsError::new(&e.to_string()))
    }

    /// Queue text for the serial receiver. Returns false if the queue was
    /// full.
    #[wasm_bindgen]
    pub fn send_input(&mut self, text: &str) -> bool {
        let sender = self.machine.input_sender();
        text.bytes().all(|b| sender.try_send(b).is_ok())
    }

    /// Take everything the transmitter has sent.
    #[wasm_bindgen]
    pub fn take_output(&mut self) -> String {
        self.output.extend(self.machine.drain_output());
        let text = String::from_utf8_lossy(&self.output).into_owned();
        self.output.clear();
        text
    }
}

impl WasmMic1 {
    fn cycle(&mut self) -> Result<StepEvent, JsError> {
        let event = self.machine.step()
            .map_err(|e| JsError::new(&e.to_string()))?;
        self.output.extend(self.machine.drain_output());
        Ok(event)
    }
}

impl Default for WasmMic1 {
    fn default() -> Self {
        Self::new()
    }
}

/// Disassemble a single control word.
#[wasm_bindgen]
pub fn wasm_disassemble(word: u32) -> String {
    crate::asm::disasm::disassemble_word(word)
}
