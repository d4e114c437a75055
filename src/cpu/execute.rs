//! Micro-cycle execution engine for the Mic-1.
//!
//! One call to [`Cpu::step`] is one clock of the microarchitecture: fetch the
//! micro-instruction at MPC, drive the ALU, latch results, pick the next MPC
//! and advance the two-cycle memory bus.

use crate::cpu::alu::{self, AluOutput};
use crate::cpu::decode::{self, ABus, Condition, MicroInstruction};
use crate::cpu::memory::{ADDRESS_MASK, MEMORY_SIZE};
use crate::cpu::serial::SerialPort;
use crate::cpu::{Memory, Registers};
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Number of control-store slots.
pub const CONTROL_STORE_SIZE: usize = 256;

/// MARS value meaning "no memory transaction in flight".
pub const STAGING_IDLE: u16 = 0xFFFF;

/// Why a cycle asks the run loop to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepEvent {
    /// Nothing special happened.
    Continue,
    /// The next micro-instruction carries a breakpoint.
    Breakpoint,
    /// RD and WR were both asserted; the bus did nothing this cycle.
    BusConflict,
}

impl StepEvent {
    /// True when the run loop should halt after this cycle.
    pub fn halts(self) -> bool {
        self != StepEvent::Continue
    }
}

/// The Mic-1 datapath and control store.
pub struct Cpu {
    /// Register file.
    pub regs: Registers,
    /// Main memory.
    pub mem: Memory,
    /// Memory address register.
    pub mar: u16,
    /// Memory buffer register.
    pub mbr: u16,
    /// Micro-program counter.
    pub mpc: u8,
    /// Micro-cycles executed since reset.
    pub cycles: u64,
    /// Output of the most recent ALU evaluation.
    pub alu: AluOutput,
    mars: u16,
    mbrs: u16,
    control_store: Vec<Option<MicroInstruction>>,
    serial: SerialPort,
}

impl Cpu {
    /// Create a CPU with empty control store and zeroed memory, attached to
    /// the device side of a serial link.
    pub fn new(serial: SerialPort) -> Self {
        Self {
            regs: Registers::new(),
            mem: Memory::new(),
            mar: 0,
            mbr: 0,
            mpc: 0,
            cycles: 0,
            alu: AluOutput::default(),
            mars: STAGING_IDLE,
            mbrs: 0,
            control_store: vec![None; CONTROL_STORE_SIZE],
            serial,
        }
    }

    /// Restore power-on register and bus state.
    ///
    /// Memory, the control store and device status are left alone.
    pub fn reset(&mut self) {
        self.regs.reset();
        self.mar = 0;
        self.mbr = 0;
        self.mpc = 0;
        self.cycles = 0;
        self.alu = AluOutput::default();
        self.mars = STAGING_IDLE;
        self.mbrs = 0;
    }

    /// Decode and install control words into slots `0..words.len()`.
    ///
    /// Nothing is installed if the image does not fit.
    pub fn load_control_store(&mut self, words: &[u32]) -> Result<(), CpuError> {
        if words.len() > CONTROL_STORE_SIZE {
            return Err(CpuError::ControlStoreOverflow { words: words.len() });
        }
        for (slot, &word) in self.control_store.iter_mut().zip(words) {
            *slot = Some(decode::decode(word));
        }
        Ok(())
    }

    /// Copy a memory image in from address 0.
    ///
    /// Nothing is written if the image does not fit.
    pub fn load_memory(&mut self, words: &[u16]) -> Result<(), CpuError> {
        if words.len() > MEMORY_SIZE {
            return Err(CpuError::MemoryOverflow { words: words.len() });
        }
        self.mem.load_image(words);
        Ok(())
    }

    /// Clear every control-store slot.
    pub fn zero_control_store(&mut self) {
        self.control_store.fill(None);
    }

    /// Clear main memory.
    pub fn zero_memory(&mut self) {
        self.mem.clear();
    }

    /// The micro-instruction installed at `addr`, if any.
    pub fn micro_instruction(&self, addr: u8) -> Option<&MicroInstruction> {
        self.control_store[usize::from(addr)].as_ref()
    }

    /// All control-store slots in address order.
    pub fn control_store(&self) -> &[Option<MicroInstruction>] {
        &self.control_store
    }

    /// Flip the breakpoint flag at `addr`.
    ///
    /// Returns the new flag, or `None` when the slot is empty.
    pub fn toggle_breakpoint(&mut self, addr: u8) -> Option<bool> {
        let ins = self.control_store[usize::from(addr)].as_mut()?;
        ins.breakpoint = !ins.breakpoint;
        Some(ins.breakpoint)
    }

    /// Address staged for the in-flight transaction, or [`STAGING_IDLE`].
    pub fn mars(&self) -> u16 {
        self.mars
    }

    /// Buffer value staged by the first cycle of a write.
    pub fn mbrs(&self) -> u16 {
        self.mbrs
    }

    /// The serial device.
    pub fn serial(&self) -> &SerialPort {
        &self.serial
    }

    /// Bytes the transmitter accepted since the last call. The caller
    /// forwards them to the output queue.
    pub fn take_transmitted(&mut self) -> Vec<u8> {
        self.serial.take_transmitted()
    }

    /// Execute one micro-cycle.
    ///
    /// An empty slot at MPC is fatal and is reported before anything
    /// changes.
    pub fn step(&mut self) -> Result<StepEvent, CpuError> {
        let ins = self.control_store[usize::from(self.mpc)]
            .ok_or(CpuError::UndefinedMicroInstruction { mpc: self.mpc })?;

        let b = self.regs.get(ins.b);
        let a = match ins.a_bus {
            ABus::Mbr => self.mbr,
            ABus::Registers => self.regs.get(ins.a),
        };

        if ins.mar {
            self.mar = b;
        }

        let out = alu::compute(a, b, ins.alu, ins.shift);
        self.alu = out;

        if ins.mbr {
            self.mbr = out.result;
        }
        if ins.enc {
            self.regs.set(ins.c, out.result);
        }

        self.mpc = self.mpc.wrapping_add(1);
        let taken = match ins.cond {
            Condition::None => false,
            Condition::IfNegative => out.negative,
            Condition::IfZero => out.zero,
            Condition::Always => true,
        };
        if taken {
            self.mpc = ins.addr;
        }

        let mut event = StepEvent::Continue;
        match (ins.rd, ins.wr) {
            (true, true) => {
                log::debug!("rd and wr both asserted at cycle {}, halting", self.cycles);
                event = StepEvent::BusConflict;
            }
            (true, false) => self.bus_read(),
            (false, true) => self.bus_write(),
            (false, false) => {}
        }

        self.cycles += 1;

        if event == StepEvent::Continue && self.breakpoint_at(self.mpc) {
            event = StepEvent::Breakpoint;
        }

        self.serial.poll(&mut self.mem);

        Ok(event)
    }

    fn breakpoint_at(&self, addr: u8) -> bool {
        self.micro_instruction(addr).is_some_and(|ins| ins.breakpoint)
    }

    fn bus_read(&mut self) {
        if self.mars == STAGING_IDLE {
            self.mars = self.mar & ADDRESS_MASK;
        } else {
            self.mbr = self.serial.load(&self.mem, self.mars);
            self.mars = STAGING_IDLE;
        }
    }

    fn bus_write(&mut self) {
        if self.mars == STAGING_IDLE {
            self.mbrs = self.mbr;
            self.mars = self.mar & ADDRESS_MASK;
        } else {
            self.serial.store(&mut self.mem, self.mars, self.mbrs);
            self.mars = STAGING_IDLE;
        }
    }
}

impl std::fmt::Debug for Cpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cpu")
            .field("mpc", &self.mpc)
            .field("cycles", &self.cycles)
            .field("mar", &self.mar)
            .field("mbr", &self.mbr)
            .field("mars", &self.mars)
            .field("regs", &self.regs)
            .finish()
    }
}

/// Errors that can occur while loading or executing microcode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CpuError {
    #[error("undefined microcode instruction at address {mpc}")]
    UndefinedMicroInstruction { mpc: u8 },

    #[error("control store image has {words} words, capacity is 256")]
    ControlStoreOverflow { words: usize },

    #[error("memory image has {words} words, capacity is 4096")]
    MemoryOverflow { words: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::alu::AluFunction;
    use crate::cpu::decode::encode;
    use crate::cpu::memory::{RX_DATA, RX_STATUS, TX_DATA, TX_STATUS};
    use crate::cpu::registers::{REG_A, REG_AC, REG_ONE};
    use crate::cpu::serial::{self, SerialHost, ENABLE, READY};

    const A: u8 = REG_A as u8;
    const B: u8 = A + 1;
    const C: u8 = A + 2;
    const D: u8 = A + 3;

    fn nop() -> MicroInstruction {
        decode::decode(0)
    }

    fn spin(addr: u8) -> MicroInstruction {
        MicroInstruction { cond: Condition::Always, addr, ..nop() }
    }

    /// `mar := addr_reg; MBR := value_reg; wr;`
    fn start_write(addr_reg: u8, value_reg: u8) -> MicroInstruction {
        MicroInstruction {
            mar: true,
            b: addr_reg,
            mbr: true,
            a: value_reg,
            alu: AluFunction::PassA,
            wr: true,
            ..nop()
        }
    }

    fn make_cpu(program: &[MicroInstruction]) -> (Cpu, SerialHost) {
        let (port, host) = serial::channel(8);
        let mut cpu = Cpu::new(port);
        let words: Vec<u32> = program.iter().map(encode).collect();
        cpu.load_control_store(&words).unwrap();
        (cpu, host)
    }

    #[test]
    fn test_undefined_slot_is_fatal() {
        let (mut cpu, _host) = make_cpu(&[nop()]);
        assert_eq!(cpu.step(), Ok(StepEvent::Continue));
        assert_eq!(cpu.step(), Err(CpuError::UndefinedMicroInstruction { mpc: 1 }));
        assert_eq!(cpu.mpc, 1);
        assert_eq!(cpu.cycles, 1);
    }

    #[test]
    fn test_register_transfer_and_jump() {
        // AC := AC + 1; goto 0
        let inc = MicroInstruction {
            enc: true,
            c: REG_AC as u8,
            a: REG_AC as u8,
            b: REG_ONE as u8,
            cond: Condition::Always,
            addr: 0,
            ..nop()
        };
        let (mut cpu, _host) = make_cpu(&[inc]);
        for _ in 0..5 {
            cpu.step().unwrap();
        }
        assert_eq!(cpu.regs.get(REG_AC as u8), 5);
        assert_eq!(cpu.mpc, 0);
        assert_eq!(cpu.cycles, 5);
    }

    #[test]
    fn test_conditional_branch_uses_flags() {
        // ALU := A; if n goto 5
        let test_neg = MicroInstruction {
            a: A,
            alu: AluFunction::PassA,
            cond: Condition::IfNegative,
            addr: 5,
            ..nop()
        };
        let (mut cpu, _host) = make_cpu(&[test_neg, test_neg]);
        cpu.step().unwrap();
        assert_eq!(cpu.mpc, 1);

        cpu.regs.set(A, 0x8001);
        cpu.step().unwrap();
        assert_eq!(cpu.mpc, 5);
    }

    #[test]
    fn test_mar_latches_b_before_alu() {
        // mar := A; A := A + 1
        let ins = MicroInstruction { mar: true, b: A, a: A, enc: true, c: A, ..nop() };
        let (mut cpu, _host) = make_cpu(&[ins]);
        cpu.regs.set(A, 41);
        cpu.step().unwrap();
        assert_eq!(cpu.mar, 41);
        assert_eq!(cpu.regs.get(A), 82);
    }

    #[test]
    fn test_two_phase_read() {
        let read_start = MicroInstruction { mar: true, b: A, rd: true, ..nop() };
        let read_finish = MicroInstruction { rd: true, ..nop() };
        let (mut cpu, _host) = make_cpu(&[read_start, read_finish, spin(2)]);
        cpu.regs.set(A, 0xF064); // top bits ignored → 100
        cpu.mem.write(100, 0xBEEF);

        cpu.step().unwrap();
        assert_eq!(cpu.mbr, 0);
        assert_eq!(cpu.mars(), 100);

        cpu.step().unwrap();
        assert_eq!(cpu.mbr, 0xBEEF);
        assert_eq!(cpu.mars(), STAGING_IDLE);
    }

    #[test]
    fn test_two_phase_write_uses_staged_buffer() {
        let finish = MicroInstruction {
            mbr: true,
            a: C,
            alu: AluFunction::PassA,
            wr: true,
            ..nop()
        };
        let (mut cpu, _host) = make_cpu(&[start_write(A, B), finish, spin(2)]);
        cpu.regs.set(A, 200);
        cpu.regs.set(B, 0x1234);
        cpu.regs.set(C, 0x5678);

        cpu.step().unwrap();
        assert_eq!(cpu.mem.read(200), 0);
        assert_eq!(cpu.mbrs(), 0x1234);

        cpu.step().unwrap();
        assert_eq!(cpu.mbr, 0x5678);
        assert_eq!(cpu.mem.read(200), 0x1234);
        assert_eq!(cpu.mars(), STAGING_IDLE);
    }

    #[test]
    fn test_bus_conflict_has_no_side_effects() {
        let both = MicroInstruction { mar: true, b: A, rd: true, wr: true, ..nop() };
        let (mut cpu, _host) = make_cpu(&[both]);
        cpu.regs.set(A, 300);
        cpu.mem.write(300, 9);
        let before = cpu.mem.clone();

        assert_eq!(cpu.step(), Ok(StepEvent::BusConflict));
        assert_eq!(cpu.mem, before);
        assert_eq!(cpu.mars(), STAGING_IDLE);
        assert_eq!(cpu.mbr, 0);
        assert_eq!(cpu.cycles, 1);
    }

    #[test]
    fn test_breakpoint_fires_one_cycle_ahead() {
        let inc = MicroInstruction {
            enc: true,
            c: REG_AC as u8,
            a: REG_AC as u8,
            b: REG_ONE as u8,
            ..nop()
        };
        let copy = MicroInstruction {
            enc: true,
            c: A,
            a: REG_AC as u8,
            alu: AluFunction::PassA,
            ..nop()
        };
        let (mut cpu, _host) = make_cpu(&[inc, inc, copy, spin(3)]);
        assert_eq!(cpu.toggle_breakpoint(2), Some(true));
        assert_eq!(cpu.toggle_breakpoint(200), None);

        assert_eq!(cpu.step(), Ok(StepEvent::Continue));
        assert_eq!(cpu.step(), Ok(StepEvent::Breakpoint));
        assert_eq!(cpu.mpc, 2);
        assert_eq!(cpu.cycles, 2);
        assert_eq!(cpu.regs.get(A), 0);

        assert_eq!(cpu.toggle_breakpoint(2), Some(false));
        assert_eq!(cpu.step(), Ok(StepEvent::Continue));
        assert_eq!(cpu.regs.get(A), 2);
    }

    #[test]
    fn test_serial_transmit_through_microcode() {
        let program = [
            start_write(A, B),
            MicroInstruction { wr: true, ..nop() },
            start_write(C, D),
            MicroInstruction { wr: true, ..nop() },
            spin(4),
        ];
        let (mut cpu, host) = make_cpu(&program);
        cpu.regs.set(A, TX_STATUS);
        cpu.regs.set(B, ENABLE);
        cpu.regs.set(C, TX_DATA);
        cpu.regs.set(D, u16::from(b'h'));

        for _ in 0..4 {
            cpu.step().unwrap();
        }
        assert_eq!(cpu.take_transmitted(), vec![b'h']);
        assert!(host.drain().is_empty());
        assert_eq!(cpu.serial().tx_status(), READY);
        assert_eq!(cpu.mem.read(TX_DATA), u16::from(b'h'));
    }

    #[test]
    fn test_serial_receive_through_microcode() {
        let program = [
            start_write(A, B),
            MicroInstruction { wr: true, ..nop() },
            nop(),
            MicroInstruction { mar: true, b: C, rd: true, ..nop() },
            MicroInstruction { rd: true, ..nop() },
            spin(5),
        ];
        let (mut cpu, host) = make_cpu(&program);
        cpu.regs.set(A, RX_STATUS);
        cpu.regs.set(B, ENABLE);
        cpu.regs.set(C, RX_STATUS);

        cpu.step().unwrap();
        cpu.step().unwrap();
        host.send(b'k').unwrap();
        cpu.step().unwrap();
        assert_eq!(cpu.mem.read(RX_DATA), u16::from(b'k'));

        cpu.step().unwrap();
        cpu.step().unwrap();
        assert_eq!(cpu.mbr, READY);
    }

    #[test]
    fn test_reset_is_idempotent() {
        let inc = MicroInstruction { enc: true, c: A, a: A, b: REG_ONE as u8, ..nop() };
        let (mut cpu, _host) = make_cpu(&[inc, inc, inc]);
        cpu.mem.write(7, 7);
        cpu.step().unwrap();
        cpu.step().unwrap();

        cpu.reset();
        let regs = cpu.regs.clone();
        let cycles = cpu.cycles;
        cpu.reset();
        assert_eq!(cpu.regs, regs);
        assert_eq!(cpu.cycles, cycles);
        assert_eq!(cpu.cycles, 0);
        assert_eq!(cpu.mpc, 0);
        assert_eq!(cpu.mars(), STAGING_IDLE);
        // memory and control store survive
        assert_eq!(cpu.mem.read(7), 7);
        assert!(cpu.micro_instruction(0).is_some());
    }

    #[test]
    fn test_load_limits() {
        let (port, _host) = serial::channel(1);
        let mut cpu = Cpu::new(port);
        assert_eq!(
            cpu.load_control_store(&[0; 257]),
            Err(CpuError::ControlStoreOverflow { words: 257 })
        );
        assert!(cpu.control_store().iter().all(Option::is_none));
        assert_eq!(
            cpu.load_memory(&[1; 4097]),
            Err(CpuError::MemoryOverflow { words: 4097 })
        );
        cpu.load_memory(&[1; 4096]).unwrap();
        assert_eq!(cpu.mem.read(4095), 1);

        cpu.zero_memory();
        cpu.load_control_store(&[0; 256]).unwrap();
        cpu.zero_control_store();
        assert!(cpu.micro_instruction(255).is_none());
        assert_eq!(cpu.mem.read(4095), 0);
    }
}
