//! Simulated EEPROM programmer speaking the serial ACK protocol.
//!
//! The simulator lives behind an `Rc<RefCell<_>>` so tests can inspect the
//! bytes the host wrote and the device memory while a `Programmer` owns the
//! port.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial::{Read, Write};

use eeprom_programmer::{Options, Programmer, SerialPort, Transport};

pub type SimTransport = Transport<SimPort, NoDelay, SimError>;
pub type SimProgrammer = Programmer<SimPort, NoDelay, SimError>;

#[derive(Clone, Copy, PartialEq, Debug)]
pub struct SimError;

#[derive(Default)]
pub struct Faults {
    /// Raw bytes sent in place of each `ACK\r\n` after a command
    pub ack_reply: Option<Vec<u8>>,
    /// Raw bytes sent in place of the Nth command ACK only, counting from 1
    pub nth_ack_reply: Option<(usize, Vec<u8>)>,
    /// Send the read-byte data before the first ACK
    pub data_before_ack: bool,
    /// Number of data bytes actually sent in reply to a dump
    pub truncate_dump: Option<usize>,
    /// Cell left unchanged by an erase, with the value it holds
    pub stuck_cell: Option<(usize, u8)>,
    /// Reject every byte written by the host
    pub fail_writes: bool,
}

#[derive(Default)]
pub struct SimState {
    pub memory: Vec<u8>,
    /// Bytes queued for the host
    pub rx: VecDeque<u8>,
    /// Every byte written by the host
    pub written: Vec<u8>,
    /// Number of ports released
    pub closed: usize,
    pub faults: Faults,
    /// Number of command ACKs sent
    pub acks: usize,
    pending: Vec<u8>,
    file_offset: usize,
    file_remaining: usize,
}

impl SimState {
    fn send(&mut self, data: &[u8]) {
        self.rx.extend(data.iter().copied());
    }

    fn ack(&mut self) {
        self.acks += 1;

        let reply = match (&self.faults.nth_ack_reply, &self.faults.ack_reply) {
            (Some((n, r)), _) if *n == self.acks => r.clone(),
            (_, Some(r)) => r.clone(),
            _ => b"ACK\r\n".to_vec(),
        };
        self.send(&reply);
    }

    fn receive(&mut self, v: u8) {
        self.written.push(v);

        if self.file_remaining > 0 {
            self.memory[self.file_offset] = v;
            self.file_offset += 1;
            self.file_remaining -= 1;
            if self.file_remaining == 0 {
                self.ack();
            }
            return;
        }

        self.pending.push(v);
        if self.pending.len() == 4 {
            let cmd: Vec<u8> = self.pending.drain(..).collect();
            self.execute(&cmd);
        }
    }

    fn execute(&mut self, cmd: &[u8]) {
        let word = usize::from(u16::from_le_bytes([cmd[1], cmd[2]]));

        match cmd[0] {
            0x01 => {
                self.ack();
                let n = self.faults.truncate_dump.unwrap_or(self.memory.len());
                let data = self.memory[..n].to_vec();
                self.send(&data);
                self.ack();
            }
            0x02 => {
                for v in self.memory.iter_mut() {
                    *v = cmd[1];
                }
                if let Some((offset, value)) = self.faults.stuck_cell {
                    self.memory[offset] = value;
                }
                self.ack();
            }
            0x03 => {
                self.memory[word] = cmd[3];
                self.ack();
            }
            0x04 => {
                let v = self.memory[word];
                if self.faults.data_before_ack {
                    self.send(&[v]);
                    self.ack();
                } else {
                    self.ack();
                    self.send(&[v]);
                    self.ack();
                }
            }
            0x05 => {
                self.ack();
                self.file_offset = 0;
                self.file_remaining = word;
                if word == 0 {
                    self.ack();
                }
            }
            other => panic!("simulator received unknown opcode 0x{:02x}", other),
        }
    }
}

#[derive(Clone)]
pub struct Sim {
    pub state: Rc<RefCell<SimState>>,
}

impl Sim {
    /// Create a device with `capacity` bytes of zeroed memory
    pub fn new(capacity: usize) -> Self {
        let state = SimState {
            memory: vec![0; capacity],
            ..Default::default()
        };
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    /// Open a port, the device announces itself with the usual handshake
    pub fn transport(&self) -> SimTransport {
        let capacity = self.state.borrow().memory.len();
        self.transport_raw(format!("ACK\r\n{}\r\n", capacity).as_bytes())
    }

    /// Open a port with `handshake` queued in place of the usual handshake
    pub fn transport_raw(&self, handshake: &[u8]) -> SimTransport {
        self.state.borrow_mut().send(handshake);

        let port = SimPort {
            state: self.state.clone(),
        };
        Transport::open(port, NoDelay, options())
    }

    pub fn connect(&self) -> SimProgrammer {
        Programmer::connect(self.transport()).expect("handshake failed")
    }

    pub fn written(&self) -> Vec<u8> {
        self.state.borrow().written.clone()
    }

    pub fn clear_written(&self) {
        self.state.borrow_mut().written.clear();
    }

    pub fn closed(&self) -> usize {
        self.state.borrow().closed
    }

    pub fn memory(&self) -> Vec<u8> {
        self.state.borrow().memory.clone()
    }

    pub fn faults(&self) -> std::cell::RefMut<'_, Faults> {
        std::cell::RefMut::map(self.state.borrow_mut(), |s| &mut s.faults)
    }
}

/// Short timeouts, the simulator replies synchronously
pub fn options() -> Options {
    Options {
        reset: false,
        response_timeout_ms: 5,
        poll_delay_ms: 1,
        init_delay_ms: 0,
    }
}

pub struct SimPort {
    state: Rc<RefCell<SimState>>,
}

impl Drop for SimPort {
    fn drop(&mut self) {
        self.state.borrow_mut().closed += 1;
    }
}

impl Read<u8> for SimPort {
    type Error = SimError;

    fn read(&mut self) -> nb::Result<u8, SimError> {
        self.state
            .borrow_mut()
            .rx
            .pop_front()
            .ok_or(nb::Error::WouldBlock)
    }
}

impl Write<u8> for SimPort {
    type Error = SimError;

    fn write(&mut self, v: u8) -> nb::Result<(), SimError> {
        let mut s = self.state.borrow_mut();
        if s.faults.fail_writes {
            return Err(nb::Error::Other(SimError));
        }
        s.receive(v);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), SimError> {
        Ok(())
    }
}

impl SerialPort<SimError> for SimPort {
    fn set_rts(&mut self, _level: bool) -> Result<(), SimError> {
        Ok(())
    }
    fn set_dtr(&mut self, _level: bool) -> Result<(), SimError> {
        Ok(())
    }
}

pub struct NoDelay;

impl DelayMs<u32> for NoDelay {
    fn delay_ms(&mut self, _ms: u32) {}
}
