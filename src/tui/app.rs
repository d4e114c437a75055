//! Dashboard application state and logic.

use crate::asm::ImageFile;
use crate::cpu::execute::CONTROL_STORE_SIZE;
use crate::cpu::memory::MEMORY_SIZE;
use crate::{CpuError, Machine, RunState, StateEvent};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Words shown per memory row.
pub const MEMORY_ROW: usize = 8;

/// Longest serial transcript kept on screen.
const OUTPUT_LIMIT: usize = 4096;

/// Which pane receives scroll keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pane {
    Microcode,
    Memory,
    Symbols,
}

impl Pane {
    fn next(self) -> Self {
        match self {
            Pane::Microcode => Pane::Memory,
            Pane::Memory => Pane::Symbols,
            Pane::Symbols => Pane::Microcode,
        }
    }

    fn prev(self) -> Self {
        match self {
            Pane::Microcode => Pane::Symbols,
            Pane::Memory => Pane::Microcode,
            Pane::Symbols => Pane::Memory,
        }
    }
}

/// Dashboard application state.
pub struct DashboardApp {
    /// The machine being driven.
    pub machine: Arc<Machine>,
    /// Disassembly and breakpoint flag per control-store slot.
    pub slots: Vec<Option<(String, bool)>>,
    /// Pane with keyboard focus.
    pub focus: Pane,
    /// Selected control-store address.
    pub mc_cursor: usize,
    /// First address of the top memory row.
    pub mem_addr: usize,
    /// Show memory in hex rather than decimal.
    pub mem_hex: bool,
    /// Selected symbol.
    pub sym_cursor: usize,
    /// Serial transmitter transcript.
    pub output: String,
    /// Typed characters go to the serial receiver.
    pub input_mode: bool,
    /// Should we quit?
    pub should_quit: bool,
    /// Status message to display.
    pub status: String,
    microcode: Option<ImageFile>,
    memory: Option<ImageFile>,
    events: Receiver<StateEvent>,
    run_handle: Option<JoinHandle<Result<(), CpuError>>>,
}

impl DashboardApp {
    /// Create a dashboard for a loaded machine. The image files are
    /// re-read on reset.
    pub fn new(machine: Arc<Machine>, microcode: Option<ImageFile>, memory: Option<ImageFile>) -> Self {
        let events = machine.subscribe();
        let mut app = Self {
            machine,
            slots: vec![None; CONTROL_STORE_SIZE],
            focus: Pane::Microcode,
            mc_cursor: 0,
            mem_addr: 0,
            mem_hex: true,
            sym_cursor: 0,
            output: String::new(),
            input_mode: false,
            should_quit: false,
            status: "Ready. s: step  r: run  h: halt  l: reset  q: quit".into(),
            microcode,
            memory,
            events,
            run_handle: None,
        };
        app.refresh_listing();
        app
    }

    /// Re-read disassembly and breakpoint flags from the control store.
    pub fn refresh_listing(&mut self) {
        self.slots = vec![None; CONTROL_STORE_SIZE];
        for (addr, text, bp) in self.machine.control_store_listing() {
            self.slots[usize::from(addr)] = Some((text, bp));
        }
    }

    /// True while the background run loop is alive.
    pub fn is_running(&self) -> bool {
        self.run_handle.is_some()
    }

    /// Execute one micro-cycle.
    pub fn step(&mut self) {
        if self.is_running() {
            self.status = "Halt the machine before stepping.".into();
            return;
        }
        let mpc = self.machine.snapshot().mpc;
        match self.machine.step() {
            Ok(event) => {
                let text = self.slots[usize::from(mpc)]
                    .as_ref()
                    .map(|(text, _)| text.clone())
                    .unwrap_or_default();
                self.status = format!("MPC={:03}: {} [{:?}]", mpc, text, event);
            }
            Err(e) => self.status = format!("Error: {}", e),
        }
        self.collect_output();
    }

    /// Start the run loop in the background.
    pub fn run(&mut self) {
        if self.is_running() {
            return;
        }
        self.run_handle = Some(self.machine.spawn_run());
        self.status = "Running...".into();
    }

    /// Ask the run loop to stop.
    pub fn halt(&mut self) {
        self.machine.halt();
    }

    /// Halt, reset and reload the image files.
    pub fn reset(&mut self) {
        self.machine.halt();
        self.join_run_loop();
        self.machine.reset();
        self.machine.zero_memory();
        self.machine.zero_control_store();

        self.status = match self.reload() {
            Ok(()) => "Reset. Ready.".into(),
            Err(e) => format!("Reload failed: {}", e),
        };
        self.refresh_listing();
        self.output.clear();
        self.machine.drain_output();
    }

    fn reload(&self) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(file) = &self.microcode {
            let words = file.load_control_store()?;
            self.machine.load_control_store(&words)?;
        }
        if let Some(file) = &self.memory {
            let image = file.load_memory()?;
            self.machine.load_memory(&image.words, image.symbols)?;
        }
        Ok(())
    }

    fn join_run_loop(&mut self) {
        if let Some(handle) = self.run_handle.take() {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => self.status = format!("Error: {}", e),
                Err(_) => self.status = "Run loop panicked".into(),
            }
        }
    }

    /// Flip the breakpoint under the microcode cursor.
    pub fn toggle_breakpoint(&mut self) {
        let addr = self.mc_cursor as u8;
        match self.machine.toggle_breakpoint(addr) {
            Some(true) => self.status = format!("Set breakpoint at MPC={}", addr),
            Some(false) => self.status = format!("Removed breakpoint at MPC={}", addr),
            None => self.status = format!("No micro-instruction at {}", addr),
        }
        self.refresh_listing();
    }

    /// Per-frame housekeeping: collect output and run-loop notifications.
    pub fn tick(&mut self) {
        self.collect_output();
        while let Ok(event) = self.events.try_recv() {
            match event {
                StateEvent::Running => {}
                StateEvent::Halted => {
                    self.join_run_loop();
                    let snap = self.machine.snapshot();
                    self.status = format!("Halted at MPC={} after {} cycles", snap.mpc, snap.cycles);
                }
                StateEvent::Fault { mpc } => {
                    self.join_run_loop();
                    self.status = format!("Fault: undefined micro-instruction at {}", mpc);
                }
            }
        }
        // a missed notification must not leave a dead handle behind
        if self.run_handle.as_ref().is_some_and(JoinHandle::is_finished) {
            self.join_run_loop();
        }
    }

    fn collect_output(&mut self) {
        for byte in self.machine.drain_output() {
            self.output.push(char::from(byte));
        }
        if self.output.len() > OUTPUT_LIMIT {
            let cut = self.output.len() - OUTPUT_LIMIT;
            let cut = (cut..self.output.len())
                .find(|&i| self.output.is_char_boundary(i))
                .unwrap_or(self.output.len());
            self.output.drain(..cut);
        }
    }

    /// Feed a typed character to the serial receiver. Drops it if the
    /// queue is full.
    pub fn send_char(&mut self, c: char) {
        let mut buf = [0u8; 4];
        let sender = self.machine.input_sender();
        for &byte in c.encode_utf8(&mut buf).as_bytes() {
            if sender.try_send(byte).is_err() {
                self.status = "Serial input queue full".into();
                return;
            }
        }
    }

    pub fn cycle_focus(&mut self) {
        self.focus = self.focus.next();
    }

    pub fn reverse_cycle_focus(&mut self) {
        self.focus = self.focus.prev();
    }

    pub fn scroll_down(&mut self) {
        match self.focus {
            Pane::Microcode => self.mc_cursor = (self.mc_cursor + 1).min(CONTROL_STORE_SIZE - 1),
            Pane::Memory => self.mem_addr = (self.mem_addr + MEMORY_ROW).min(MEMORY_SIZE - MEMORY_ROW),
            Pane::Symbols => {
                let count = self.machine.symbols().len();
                if self.sym_cursor + 1 < count {
                    self.sym_cursor += 1;
                }
            }
        }
    }

    pub fn scroll_up(&mut self) {
        match self.focus {
            Pane::Microcode => self.mc_cursor = self.mc_cursor.saturating_sub(1),
            Pane::Memory => self.mem_addr = self.mem_addr.saturating_sub(MEMORY_ROW),
            Pane::Symbols => self.sym_cursor = self.sym_cursor.saturating_sub(1),
        }
    }

    /// Scroll memory to the row holding the selected symbol.
    pub fn goto_symbol(&mut self) {
        let symbols = self.machine.symbols();
        if let Some(sym) = symbols.get(self.sym_cursor) {
            let addr = usize::from(sym.address).min(MEMORY_SIZE - 1);
            self.mem_addr = addr - addr % MEMORY_ROW;
            self.status = format!("{} = {}", sym.name, sym.address);
        }
    }

    pub fn toggle_hex(&mut self) {
        self.mem_hex = !self.mem_hex;
    }

    /// Run state as shown in the registers pane.
    pub fn run_state(&self) -> RunState {
        self.machine.state()
    }
}

impl Drop for DashboardApp {
    fn drop(&mut self) {
        self.machine.halt();
        self.join_run_loop();
    }
}

/// Run the interactive dashboard until the user quits.
pub fn run_dashboard(
    machine: Arc<Machine>,
    microcode: Option<ImageFile>,
    memory: Option<ImageFile>,
) -> std::io::Result<()> {
    use crossterm::{
        event::{self, Event, KeyCode, KeyEventKind},
        terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
        ExecutableCommand,
    };
    use ratatui::prelude::*;
    use std::io::stdout;
    use std::time::Duration;

    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let mut app = DashboardApp::new(machine, microcode, memory);

    let result = loop {
        if let Err(e) = terminal.draw(|frame| super::ui::draw(frame, &app)) {
            break Err(e);
        }

        match event::poll(Duration::from_millis(50)) {
            Ok(true) => match event::read() {
                Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                    if app.input_mode {
                        match key.code {
                            KeyCode::Esc => {
                                app.input_mode = false;
                                app.status = "Input mode off.".into();
                            }
                            KeyCode::Enter => app.send_char('\n'),
                            KeyCode::Char(c) => app.send_char(c),
                            _ => {}
                        }
                    } else {
                        match key.code {
                            KeyCode::Char('q') => app.should_quit = true,
                            KeyCode::Char('s') => app.step(),
                            KeyCode::Char('r') => app.run(),
                            KeyCode::Char('h') => app.halt(),
                            KeyCode::Char('l') => app.reset(),
                            KeyCode::Char('b') => app.toggle_breakpoint(),
                            KeyCode::Char('m') => app.toggle_hex(),
                            KeyCode::Char('i') => {
                                app.input_mode = true;
                                app.status = "Input mode: typing feeds the serial port, Esc leaves.".into();
                            }
                            KeyCode::Char('g') | KeyCode::Enter => app.goto_symbol(),
                            KeyCode::Tab => app.cycle_focus(),
                            KeyCode::BackTab => app.reverse_cycle_focus(),
                            KeyCode::Char('j') | KeyCode::Down => app.scroll_down(),
                            KeyCode::Char('k') | KeyCode::Up => app.scroll_up(),
                            _ => {}
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => break Err(e),
            },
            Ok(false) => {}
            Err(e) => break Err(e),
        }

        app.tick();

        if app.should_quit {
            break Ok(());
        }
    };

    drop(app);

    // Restore terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    result
}
