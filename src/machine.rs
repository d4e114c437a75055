//! Shared run/halt control of a Mic-1.
//!
//! [`Machine`] wraps a [`Cpu`] behind one mutex so that a single run loop
//! and any number of inspectors can share it. The run loop polls a desired
//! state flag between cycles, which gives cooperative halting with at most
//! one micro-cycle of latency. Front ends learn about state changes through
//! [`Machine::subscribe`]; delivery is best-effort and never blocks the loop.

use crate::asm::disasm::disassemble_instruction;
use crate::asm::image::Symbol;
use crate::cpu::execute::{CpuError, StepEvent};
use crate::cpu::registers::REGISTER_COUNT;
use crate::cpu::serial::{self, SerialHost, QUEUE_DEPTH};
use crate::cpu::Cpu;
use serde::{Serialize, Deserialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{self, Receiver, SendError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

/// Run state of the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Halt,
    Run,
}

/// A [`RunState`] that can be shared between threads.
#[derive(Debug)]
struct AtomicRunState(AtomicU8);

impl AtomicRunState {
    fn new(state: RunState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn load(&self) -> RunState {
        if self.0.load(Ordering::Acquire) == RunState::Run as u8 {
            RunState::Run
        } else {
            RunState::Halt
        }
    }

    fn store(&self, state: RunState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Notification sent to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateEvent {
    /// The run loop started.
    Running,
    /// The run loop stopped normally.
    Halted,
    /// The run loop aborted on an undefined micro-instruction.
    Fault { mpc: u8 },
}

/// Depth of each subscriber's notification queue.
const EVENT_DEPTH: usize = 16;

/// Point-in-time copy of the architectural state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub registers: [u16; REGISTER_COUNT],
    pub mar: u16,
    pub mbr: u16,
    pub mars: u16,
    pub mbrs: u16,
    pub mpc: u8,
    pub cycles: u64,
    pub negative: bool,
    pub zero: bool,
    pub rx_status: u16,
    pub tx_status: u16,
    pub state: RunState,
    pub desired_state: RunState,
}

/// A Mic-1 shared between a run loop and its observers.
#[derive(Debug)]
pub struct Machine {
    cpu: Mutex<Cpu>,
    symbols: RwLock<Vec<Symbol>>,
    state: AtomicRunState,
    desired: AtomicRunState,
    listeners: Mutex<Vec<SyncSender<StateEvent>>>,
    serial: SerialHost,
}

impl Machine {
    /// Create a halted machine with empty control store and memory.
    pub fn new() -> Self {
        let (port, host) = serial::channel(QUEUE_DEPTH);
        Self {
            cpu: Mutex::new(Cpu::new(port)),
            symbols: RwLock::new(Vec::new()),
            state: AtomicRunState::new(RunState::Halt),
            desired: AtomicRunState::new(RunState::Halt),
            listeners: Mutex::new(Vec::new()),
            serial: host,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Cpu> {
        self.cpu.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with the CPU locked.
    pub fn with_cpu<R>(&self, f: impl FnOnce(&Cpu) -> R) -> R {
        f(&self.lock())
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Decode `words` into control-store slots `0..words.len()`.
    pub fn load_control_store(&self, words: &[u32]) -> Result<(), CpuError> {
        self.lock().load_control_store(words)
    }

    /// Install a memory image from address 0 and attach its symbols.
    pub fn load_memory(&self, words: &[u16], symbols: Vec<Symbol>) -> Result<(), CpuError> {
        self.lock().load_memory(words)?;
        *self.symbols.write().unwrap_or_else(PoisonError::into_inner) = symbols;
        Ok(())
    }

    /// Clear main memory and the symbol table.
    pub fn zero_memory(&self) {
        self.lock().zero_memory();
        self.symbols.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Clear every control-store slot.
    pub fn zero_control_store(&self) {
        self.lock().zero_control_store();
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Execute one micro-cycle. Breakpoints and bus conflicts request a
    /// halt.
    ///
    /// Transmitted bytes are queued after the CPU lock is released. While
    /// RUN is requested a full output queue holds the cycle until a reader
    /// makes room; once a halt is requested the bytes wait in the backlog.
    pub fn step(&self) -> Result<StepEvent, CpuError> {
        let (event, transmitted) = {
            let mut cpu = self.lock();
            let event = cpu.step()?;
            (event, cpu.take_transmitted())
        };
        if event.halts() {
            self.desired.store(RunState::Halt);
        }
        self.serial.transmit(transmitted, || self.desired_state() == RunState::Run);
        Ok(event)
    }

    /// Step while the desired state is [`RunState::Run`].
    ///
    /// Returns once something sets the desired state to halt. A fault
    /// aborts the loop with the error after emitting
    /// [`StateEvent::Fault`].
    pub fn run(&self) -> Result<(), CpuError> {
        if self.desired_state() == RunState::Run {
            self.state.store(RunState::Run);
            self.notify(StateEvent::Running);
            log::debug!("run loop started");
        }

        while self.desired_state() == RunState::Run {
            if let Err(err) = self.step() {
                self.desired.store(RunState::Halt);
                self.state.store(RunState::Halt);
                log::error!("run loop aborted: {}", err);
                if let CpuError::UndefinedMicroInstruction { mpc } = err {
                    self.notify(StateEvent::Fault { mpc });
                }
                return Err(err);
            }
        }

        self.state.store(RunState::Halt);
        self.notify(StateEvent::Halted);
        log::debug!("run loop halted after {} cycles", self.lock().cycles);
        Ok(())
    }

    /// Request RUN and start the run loop on a new thread.
    pub fn spawn_run(self: &Arc<Self>) -> JoinHandle<Result<(), CpuError>> {
        self.set_desired_state(RunState::Run);
        let machine = Arc::clone(self);
        std::thread::spawn(move || machine.run())
    }

    /// Set the state the run loop should be in.
    pub fn set_desired_state(&self, state: RunState) {
        self.desired.store(state);
    }

    /// Ask the run loop to stop after the current cycle.
    pub fn halt(&self) {
        self.set_desired_state(RunState::Halt);
    }

    /// Actual run state, maintained by the run loop.
    pub fn state(&self) -> RunState {
        self.state.load()
    }

    /// Requested run state.
    pub fn desired_state(&self) -> RunState {
        self.desired.load()
    }

    /// Request a halt and restore power-on register and bus state.
    pub fn reset(&self) {
        self.halt();
        self.lock().reset();
    }

    /// Flip the breakpoint at `addr`. Returns the new flag, or `None` for an
    /// empty slot.
    pub fn toggle_breakpoint(&self, addr: u8) -> Option<bool> {
        self.lock().toggle_breakpoint(addr)
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    /// Copy the architectural state.
    pub fn snapshot(&self) -> Snapshot {
        let cpu = self.lock();
        Snapshot {
            registers: *cpu.regs.values(),
            mar: cpu.mar,
            mbr: cpu.mbr,
            mars: cpu.mars(),
            mbrs: cpu.mbrs(),
            mpc: cpu.mpc,
            cycles: cpu.cycles,
            negative: cpu.alu.negative,
            zero: cpu.alu.zero,
            rx_status: cpu.serial().rx_status(),
            tx_status: cpu.serial().tx_status(),
            state: self.state(),
            desired_state: self.desired_state(),
        }
    }

    /// Up to `count` words starting at `start`.
    pub fn read_memory(&self, start: usize, count: usize) -> Vec<(usize, u16)> {
        self.lock().mem.dump(start, count)
    }

    /// The symbol table attached by the last memory load.
    pub fn symbols(&self) -> Vec<Symbol> {
        self.symbols.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Every occupied control-store slot as `(address, text, breakpoint)`.
    pub fn control_store_listing(&self) -> Vec<(u8, String, bool)> {
        let instructions: Vec<(u8, _)> = {
            let cpu = self.lock();
            (0..=u8::MAX)
                .filter_map(|addr| cpu.micro_instruction(addr).map(|ins| (addr, *ins)))
                .collect()
        };
        instructions
            .into_iter()
            .map(|(addr, ins)| (addr, disassemble_instruction(&ins), ins.breakpoint))
            .collect()
    }

    /// Receive state-change notifications. A subscriber that falls behind
    /// misses events.
    pub fn subscribe(&self) -> Receiver<StateEvent> {
        let (tx, rx) = mpsc::sync_channel(EVENT_DEPTH);
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner).push(tx);
        rx
    }

    fn notify(&self, event: StateEvent) {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        listeners.retain(|tx| match tx.try_send(event) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    // ------------------------------------------------------------------
    // Serial link
    // ------------------------------------------------------------------

    /// Queue a byte for the receiver. Blocks while the queue is full.
    pub fn send_input(&self, byte: u8) -> Result<(), SendError<u8>> {
        self.serial.send(byte)
    }

    /// A producer handle for the receiver queue.
    pub fn input_sender(&self) -> SyncSender<u8> {
        self.serial.sender()
    }

    /// Take one transmitted byte if any is waiting.
    pub fn try_recv_output(&self) -> Option<u8> {
        self.serial.try_recv()
    }

    /// Wait up to `timeout` for a transmitted byte.
    pub fn recv_output_timeout(&self, timeout: Duration) -> Option<u8> {
        self.serial.recv_timeout(timeout)
    }

    /// Take every transmitted byte currently queued.
    pub fn drain_output(&self) -> Vec<u8> {
        self.serial.drain()
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}
