//! Memory-mapped serial device.
//!
//! A polled UART with four registers at the top of memory:
//!
//! | address | register            |
//! |---------|---------------------|
//! | 4092    | receiver data       |
//! | 4093    | receiver status     |
//! | 4094    | transmitter data    |
//! | 4095    | transmitter status  |
//!
//! Writing [`ENABLE`] to a status register switches that half on. There are
//! no interrupts: the microprogram polls the status registers, and the
//! machine copies externally supplied bytes into the receiver between cycles.
//!
//! Bytes cross the device boundary through two bounded queues. The port only
//! records transmitted bytes; the host side ([`SerialHost`]) moves them into
//! the output queue once the CPU is no longer locked, so a slow reader never
//! stalls anyone inspecting the machine. The host also hands out extra
//! senders for additional input producers.

use crate::cpu::memory::{Memory, RX_DATA, RX_STATUS, TX_DATA, TX_STATUS};
use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, SendError, SyncSender, TryRecvError, TrySendError};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Control code that enables either half of the device.
pub const ENABLE: u16 = 8;
/// Receiver enabled and waiting for a byte.
pub const RX_WAITING: u16 = 9;
/// Receiver holding a byte / transmitter ready for the next byte.
pub const READY: u16 = 10;

/// Queue depth used by [`crate::Machine`].
pub const QUEUE_DEPTH: usize = 100;

/// How long a waiting transmitter sleeps before retrying a full queue.
const RETRY_INTERVAL: Duration = Duration::from_millis(1);

/// Device side of the serial link, owned by the CPU.
#[derive(Debug)]
pub struct SerialPort {
    rx_status: u16,
    tx_status: u16,
    input: Receiver<u8>,
    transmitted: Vec<u8>,
}

/// Host side of the serial link, used by front ends.
#[derive(Debug)]
pub struct SerialHost {
    input: SyncSender<u8>,
    outgoing: SyncSender<u8>,
    // Bytes that did not fit in the output queue. Always newer than
    // anything queued; lock it before the receiver to keep that order.
    backlog: Mutex<VecDeque<u8>>,
    output: Mutex<Receiver<u8>>,
}

/// Create a connected port/host pair with queues of `depth` bytes each.
pub fn channel(depth: usize) -> (SerialPort, SerialHost) {
    let (in_tx, in_rx) = mpsc::sync_channel(depth);
    let (out_tx, out_rx) = mpsc::sync_channel(depth);
    let port = SerialPort {
        rx_status: 0,
        tx_status: 0,
        input: in_rx,
        transmitted: Vec::new(),
    };
    let host = SerialHost {
        input: in_tx,
        outgoing: out_tx,
        backlog: Mutex::new(VecDeque::new()),
        output: Mutex::new(out_rx),
    };
    (port, host)
}

impl SerialPort {
    /// Receiver status register.
    pub fn rx_status(&self) -> u16 {
        self.rx_status
    }

    /// Transmitter status register.
    pub fn tx_status(&self) -> u16 {
        self.tx_status
    }

    /// Bytes written to the enabled transmitter since the last call.
    pub fn take_transmitted(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.transmitted)
    }

    /// Second cycle of a bus read: fetch the word at `addr`, applying
    /// device semantics for the mapped registers.
    pub fn load(&mut self, mem: &Memory, addr: u16) -> u16 {
        match addr {
            RX_DATA => {
                // reading the data acknowledges it
                if self.rx_status & READY == READY {
                    self.rx_status = RX_WAITING;
                }
                mem.read(RX_DATA)
            }
            RX_STATUS => self.rx_status,
            TX_STATUS => self.tx_status,
            _ => mem.read(addr),
        }
    }

    /// Second cycle of a bus write: store `value` at `addr`, applying device
    /// semantics for the mapped registers.
    pub fn store(&mut self, mem: &mut Memory, addr: u16, value: u16) {
        match addr {
            RX_STATUS => {
                if value == ENABLE {
                    self.rx_status = RX_WAITING;
                }
            }
            TX_DATA => {
                let byte = (value & 0xFF) as u8;
                mem.write(TX_DATA, u16::from(byte));
                if self.tx_status & ENABLE != 0 {
                    self.transmitted.push(byte);
                    self.tx_status = READY;
                }
            }
            TX_STATUS => {
                if value == ENABLE {
                    self.tx_status = READY;
                }
            }
            _ => mem.write(addr, value),
        }
    }

    /// End-of-cycle receive poll. Never blocks.
    pub fn poll(&mut self, mem: &mut Memory) {
        if self.rx_status & RX_WAITING != RX_WAITING {
            return;
        }
        match self.input.try_recv() {
            Ok(byte) => {
                mem.write(RX_DATA, u16::from(byte));
                self.rx_status = READY;
            }
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => {}
        }
    }
}

impl SerialHost {
    /// Queue a byte for the receiver. Blocks while the input queue is full.
    pub fn send(&self, byte: u8) -> Result<(), SendError<u8>> {
        self.input.send(byte)
    }

    /// A cloneable handle for additional input producers.
    pub fn sender(&self) -> SyncSender<u8> {
        self.input.clone()
    }

    fn backlog(&self) -> MutexGuard<'_, VecDeque<u8>> {
        self.backlog.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn output(&self) -> MutexGuard<'_, Receiver<u8>> {
        self.output.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move transmitted bytes into the output queue.
    ///
    /// While the queue is full this waits for a reader as long as
    /// `keep_waiting` says so; whatever still does not fit stays in the
    /// backlog and goes out, in order, ahead of the next transmission.
    pub fn transmit(&self, bytes: Vec<u8>, keep_waiting: impl Fn() -> bool) {
        let mut backlog = self.backlog();
        backlog.extend(bytes);
        loop {
            while let Some(&byte) = backlog.front() {
                match self.outgoing.try_send(byte) {
                    Ok(()) => {
                        backlog.pop_front();
                    }
                    Err(TrySendError::Full(_)) => break,
                    Err(TrySendError::Disconnected(_)) => {
                        log::warn!("serial output disconnected, dropping {} bytes", backlog.len());
                        backlog.clear();
                    }
                }
            }
            if backlog.is_empty() || !keep_waiting() {
                return;
            }
            drop(backlog);
            std::thread::sleep(RETRY_INTERVAL);
            backlog = self.backlog();
        }
    }

    /// Take one transmitted byte if any is waiting.
    pub fn try_recv(&self) -> Option<u8> {
        let mut backlog = self.backlog();
        match self.output().try_recv() {
            Ok(byte) => Some(byte),
            Err(_) => backlog.pop_front(),
        }
    }

    /// Wait up to `timeout` for a transmitted byte.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<u8> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(byte) = self.try_recv() {
                return Some(byte);
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(RETRY_INTERVAL);
        }
    }

    /// Take every transmitted byte currently queued.
    pub fn drain(&self) -> Vec<u8> {
        let mut backlog = self.backlog();
        let mut bytes: Vec<u8> = self.output().try_iter().collect();
        bytes.extend(backlog.drain(..));
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transmitter_disabled_keeps_byte_local() {
        let (mut port, host) = channel(4);
        let mut mem = Memory::new();
        port.store(&mut mem, TX_DATA, 0x1241);
        assert_eq!(mem.read(TX_DATA), 0x41);
        host.transmit(port.take_transmitted(), || false);
        assert_eq!(host.try_recv(), None);
    }

    #[test]
    fn test_transmit_when_enabled() {
        let (mut port, host) = channel(4);
        let mut mem = Memory::new();
        port.store(&mut mem, TX_STATUS, ENABLE);
        assert_eq!(port.tx_status(), READY);
        port.store(&mut mem, TX_DATA, u16::from(b'h'));
        assert_eq!(host.try_recv(), None);
        host.transmit(port.take_transmitted(), || false);
        assert_eq!(host.drain(), vec![b'h']);
        assert!(port.take_transmitted().is_empty());
        assert_eq!(port.load(&mem, TX_STATUS), READY);
    }

    #[test]
    fn test_enable_requires_exact_code() {
        let (mut port, _host) = channel(4);
        let mut mem = Memory::new();
        port.store(&mut mem, RX_STATUS, 9);
        assert_eq!(port.rx_status(), 0);
        port.store(&mut mem, RX_STATUS, ENABLE);
        assert_eq!(port.rx_status(), RX_WAITING);
    }

    #[test]
    fn test_receive_cycle() {
        let (mut port, host) = channel(4);
        let mut mem = Memory::new();

        // disabled receiver ignores input
        host.send(b'x').unwrap();
        port.poll(&mut mem);
        assert_eq!(mem.read(RX_DATA), 0);

        port.store(&mut mem, RX_STATUS, ENABLE);
        port.poll(&mut mem);
        assert_eq!(mem.read(RX_DATA), u16::from(b'x'));
        assert_eq!(port.load(&mem, RX_STATUS), READY);

        // a second byte waits until the first is read
        host.send(b'y').unwrap();
        port.poll(&mut mem);
        assert_eq!(mem.read(RX_DATA), u16::from(b'x'));

        assert_eq!(port.load(&mem, RX_DATA), u16::from(b'x'));
        assert_eq!(port.rx_status(), RX_WAITING);
        port.poll(&mut mem);
        assert_eq!(mem.read(RX_DATA), u16::from(b'y'));
    }

    #[test]
    fn test_plain_addresses_pass_through() {
        let (mut port, _host) = channel(4);
        let mut mem = Memory::new();
        port.store(&mut mem, 100, 0xBEEF);
        assert_eq!(port.load(&mem, 100), 0xBEEF);
        port.store(&mut mem, RX_DATA, 0x55);
        assert_eq!(mem.read(RX_DATA), 0x55);
    }

    #[test]
    fn test_full_queue_keeps_order_in_backlog() {
        let (_port, host) = channel(2);
        host.transmit(vec![1, 2, 3], || false);
        assert_eq!(host.try_recv(), Some(1));

        // 3 moves into the freed slot ahead of 4
        host.transmit(vec![4], || false);
        assert_eq!(host.drain(), vec![2, 3, 4]);
        assert_eq!(host.try_recv(), None);
    }

    #[test]
    fn test_transmit_waits_for_reader() {
        let (_port, host) = channel(1);
        let host = std::sync::Arc::new(host);
        host.transmit(vec![b'a'], || false);

        let reader = {
            let host = std::sync::Arc::clone(&host);
            std::thread::spawn(move || host.recv_timeout(Duration::from_secs(5)))
        };
        // blocks until the reader frees the slot
        host.transmit(vec![b'b'], || true);
        assert_eq!(reader.join().unwrap(), Some(b'a'));
        assert_eq!(host.drain(), vec![b'b']);
    }
}
