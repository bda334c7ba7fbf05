//! Command protocol state machine.
//!
//! The machine is a pure transition function over a [`Session`]: each input byte
//! yields a [`Step`] describing the hardware work to perform and the reply to
//! send once that work is done. Executing the step is the caller's job.

use core::convert::TryFrom;
use core::mem;

/// Acknowledge, the command completed
pub const ACK: u8 = 0x06;
/// Not acknowledged, the command was not understood
pub const NAK: u8 = 0x15;

/// Liveness probe, answered with ACK
pub const CMD_HANDSHAKE: u8 = 0xAA;
/// No-op at instruction level, stream terminator escape within WRITE_STREAM
pub const CMD_CANCEL: u8 = 0xFF;

/// Default page capacity of the stream write buffer (AT28C256)
pub const DEFAULT_PAGE_SIZE: usize = 64;

/// Instructions that take an address
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Instruction {
    /// Write one byte, replies ACK after the write cycle
    WriteByte = 0x01,

    /// Write a stream of bytes to sequential addresses, terminated by CANCEL
    /// followed by any byte other than CANCEL
    WriteStream = 0x02,

    /// Read one byte
    ReadByte = 0x03,

    /// Read an inclusive address range, given as two addresses
    ReadStream = 0x04,
}

impl TryFrom<u8> for Instruction {
    type Error = u8;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0x01 => Ok(Instruction::WriteByte),
            0x02 => Ok(Instruction::WriteStream),
            0x03 => Ok(Instruction::ReadByte),
            0x04 => Ok(Instruction::ReadStream),
            _ => Err(v),
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum State {
    WaitInstruction,
    WaitAddrHigh,
    WaitAddrLow,
    WaitData,
    ReadData,
}

/// Hardware work requested by a transition
#[derive(Clone, PartialEq, Debug)]
pub enum Effect {
    /// Program a single byte, then wait out the write cycle
    Program { addr: u16, data: u8 },

    /// Program `data` at sequential addresses from `start`, then wait out one
    /// write cycle
    Flush { start: u16, data: Vec<u8> },

    /// Read a single byte, which becomes the reply
    ReadByte(u16),

    /// Read the inclusive range, streaming each byte back as it is read
    ReadRange { start: u16, end: u16 },
}

/// Outcome of a single transition
#[derive(Clone, PartialEq, Debug, Default)]
pub struct Step {
    /// Executed first
    pub effect: Option<Effect>,
    /// Sent once the effect has completed
    pub reply: Option<u8>,
}

impl Step {
    fn none() -> Self {
        Self::default()
    }

    fn reply(v: u8) -> Self {
        Self { effect: None, reply: Some(v) }
    }

    fn effect(e: Effect) -> Self {
        Self { effect: Some(e), reply: None }
    }

    fn effect_then(e: Effect, v: u8) -> Self {
        Self { effect: Some(e), reply: Some(v) }
    }
}

/// Protocol session, mutated by exactly one byte per transition
#[derive(Clone, PartialEq, Debug)]
pub struct Session {
    state: State,
    instruction: Option<Instruction>,
    addr: u16,
    buffer: Vec<u8>,
    capacity: usize,
    read_start: Option<u16>,
    escape: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl Session {
    /// Create a session whose stream buffer holds `page_size` bytes
    pub fn new(page_size: usize) -> Self {
        let capacity = page_size.max(1);

        Self {
            state: State::WaitInstruction,
            instruction: None,
            addr: 0,
            buffer: Vec::with_capacity(capacity),
            capacity,
            read_start: None,
            escape: false,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn instruction(&self) -> Option<Instruction> {
        self.instruction
    }

    /// Address assembled so far
    pub fn addr(&self) -> u16 {
        self.addr
    }

    /// Bytes held for the current stream write
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Start address of a READ_STREAM awaiting its end address
    pub fn read_start(&self) -> Option<u16> {
        self.read_start
    }

    /// Drop any in-progress instruction and wait for the next one
    pub fn reset(&mut self) {
        self.state = State::WaitInstruction;
        self.instruction = None;
        self.addr = 0;
        self.buffer.clear();
        self.read_start = None;
        self.escape = false;
    }

    /// Consume one input byte
    pub fn feed(&mut self, byte: u8) -> Step {
        trace!("{:?} <- 0x{:02x}", self.state, byte);

        match self.state {
            State::WaitInstruction => self.on_instruction(byte),
            State::WaitAddrHigh => {
                self.addr = (byte as u16) << 8;
                self.state = State::WaitAddrLow;
                Step::none()
            }
            State::WaitAddrLow => {
                self.addr |= byte as u16;
                self.on_address()
            }
            State::WaitData => self.on_data(byte),
            // The triggering byte carries no meaning here
            State::ReadData => self.read_data(),
        }
    }

    /// Perform a transition that needs no input, if the current state has one
    pub fn resume(&mut self) -> Option<Step> {
        match self.state {
            State::ReadData => Some(self.read_data()),
            _ => None,
        }
    }

    fn on_instruction(&mut self, byte: u8) -> Step {
        match Instruction::try_from(byte) {
            Ok(i) => {
                debug!("Instruction: {:?}", i);
                self.instruction = Some(i);
                self.state = State::WaitAddrHigh;
                Step::none()
            }
            Err(CMD_HANDSHAKE) | Err(CMD_CANCEL) => Step::reply(ACK),
            Err(v) => {
                debug!("Unknown instruction: 0x{:02x}", v);
                Step::reply(NAK)
            }
        }
    }

    fn on_address(&mut self) -> Step {
        match self.instruction {
            Some(Instruction::WriteByte) | Some(Instruction::WriteStream) => {
                self.buffer.clear();
                self.escape = false;
                self.state = State::WaitData;
                Step::none()
            }
            Some(Instruction::ReadByte) => {
                self.state = State::ReadData;
                Step::none()
            }
            Some(Instruction::ReadStream) => match self.read_start.take() {
                None => {
                    self.read_start = Some(self.addr);
                    self.state = State::WaitAddrHigh;
                    Step::none()
                }
                Some(start) => {
                    self.finish();
                    Step::effect(Effect::ReadRange { start, end: self.addr })
                }
            },
            None => {
                warn!("Address received without an instruction, resetting");
                self.finish();
                Step::none()
            }
        }
    }

    fn on_data(&mut self, byte: u8) -> Step {
        match self.instruction {
            Some(Instruction::WriteByte) => {
                self.finish();
                Step::effect_then(Effect::Program { addr: self.addr, data: byte }, ACK)
            }
            Some(Instruction::WriteStream) => self.on_stream(byte),
            other => {
                warn!("Data received for {:?}, resetting", other);
                self.finish();
                Step::none()
            }
        }
    }

    fn on_stream(&mut self, byte: u8) -> Step {
        if self.escape {
            self.escape = false;

            if byte != CMD_CANCEL {
                // Stream terminated, the disambiguating byte is discarded
                let data = mem::replace(&mut self.buffer, Vec::with_capacity(self.capacity));
                debug!("Stream terminated, flushing {} bytes", data.len());
                self.finish();
                return Step::effect_then(Effect::Flush { start: self.addr, data }, ACK);
            }
        } else if byte == CMD_CANCEL {
            self.escape = true;
            return Step::none();
        }

        self.push(byte)
    }

    fn push(&mut self, byte: u8) -> Step {
        if self.buffer.len() < self.capacity {
            self.buffer.push(byte);
            return Step::none();
        }

        // Page full: write it out and carry on with the next page
        let start = self.addr;
        let data = mem::replace(&mut self.buffer, Vec::with_capacity(self.capacity));
        self.addr = start.wrapping_add(data.len() as u16);
        self.buffer.push(byte);

        debug!("Page full, flushing {} bytes at 0x{:04x}", data.len(), start);
        Step::effect(Effect::Flush { start, data })
    }

    fn read_data(&mut self) -> Step {
        self.finish();
        Step::effect(Effect::ReadByte(self.addr))
    }

    // Back to idle, keeping `addr` for the effect being emitted
    fn finish(&mut self) {
        self.state = State::WaitInstruction;
        self.instruction = None;
        self.escape = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(s: &mut Session, bytes: &[u8]) -> Vec<Step> {
        let mut steps = vec![];
        for b in bytes {
            steps.push(s.feed(*b));
            if let Some(r) = s.resume() {
                steps.push(r);
            }
        }
        steps
            .into_iter()
            .filter(|s| s.effect.is_some() || s.reply.is_some())
            .collect()
    }

    #[test]
    fn handshake_acks_without_state_change() {
        let mut s = Session::default();
        let before = s.clone();

        for _ in 0..3 {
            assert_eq!(s.feed(CMD_HANDSHAKE), Step::reply(ACK));
            assert_eq!(s, before);
        }
    }

    #[test]
    fn cancel_at_instruction_is_acked() {
        let mut s = Session::default();
        assert_eq!(s.feed(CMD_CANCEL), Step::reply(ACK));
        assert_eq!(s.state(), State::WaitInstruction);
    }

    #[test]
    fn unknown_instruction_naks() {
        let mut s = Session::default();
        for b in &[0x00, 0x05, 0x06, 0x41, 0xFE] {
            assert_eq!(s.feed(*b), Step::reply(NAK));
            assert_eq!(s.state(), State::WaitInstruction);
            assert_eq!(s.instruction(), None);
        }
    }

    #[test]
    fn write_byte() {
        let mut s = Session::default();
        let steps = feed_all(&mut s, &[0x01, 0x7f, 0xfd, 0xaa]);

        assert_eq!(
            steps,
            vec![Step::effect_then(Effect::Program { addr: 0x7ffd, data: 0xaa }, ACK)]
        );
        assert_eq!(s.state(), State::WaitInstruction);
    }

    #[test]
    fn handshake_byte_is_plain_data_mid_command() {
        let mut s = Session::default();
        let steps = feed_all(&mut s, &[0x01, CMD_HANDSHAKE, CMD_HANDSHAKE, CMD_HANDSHAKE]);

        assert_eq!(
            steps,
            vec![Step::effect_then(Effect::Program { addr: 0xaaaa, data: 0xaa }, ACK)]
        );
    }

    #[test]
    fn address_is_big_endian_and_unmasked() {
        let mut s = Session::default();
        s.feed(0x01);
        s.feed(0xff);
        assert_eq!(s.state(), State::WaitAddrLow);
        s.feed(0x01);
        assert_eq!(s.addr(), 0xff01);
        assert_eq!(s.state(), State::WaitData);
    }

    #[test]
    fn write_stream_with_escaped_cancel() {
        let mut s = Session::default();
        let steps = feed_all(
            &mut s,
            &[0x02, 0x00, 0x10, 0x41, 0x42, 0xff, 0xff, 0x43, 0xff, 0x00],
        );

        assert_eq!(
            steps,
            vec![Step::effect_then(
                Effect::Flush { start: 0x0010, data: vec![0x41, 0x42, 0xff, 0x43] },
                ACK
            )]
        );
        assert_eq!(s.state(), State::WaitInstruction);
        assert!(s.buffered().is_empty());
    }

    #[test]
    fn write_stream_stays_open_without_terminating_cancel() {
        let mut s = Session::default();
        let steps = feed_all(&mut s, &[0x02, 0x00, 0x10, 0x41, 0x42, 0xff, 0xff, 0x43, 0x00]);

        assert!(steps.is_empty());
        assert_eq!(s.state(), State::WaitData);
        assert_eq!(s.buffered(), &[0x41, 0x42, 0xff, 0x43, 0x00]);
    }

    #[test]
    fn empty_write_stream() {
        let mut s = Session::default();
        let steps = feed_all(&mut s, &[0x02, 0x12, 0x34, 0xff, 0x01]);

        assert_eq!(
            steps,
            vec![Step::effect_then(Effect::Flush { start: 0x1234, data: vec![] }, ACK)]
        );
    }

    #[test]
    fn write_stream_flushes_full_pages() {
        let mut s = Session::new(4);
        let steps = feed_all(
            &mut s,
            &[0x02, 0x00, 0x00, 1, 2, 3, 4, 5, 6, 7, 8, 9, 0xff, 0xaa],
        );

        assert_eq!(
            steps,
            vec![
                Step::effect(Effect::Flush { start: 0, data: vec![1, 2, 3, 4] }),
                Step::effect(Effect::Flush { start: 4, data: vec![5, 6, 7, 8] }),
                Step::effect_then(Effect::Flush { start: 8, data: vec![9] }, ACK),
            ]
        );
    }

    #[test]
    fn read_byte_needs_no_data_byte() {
        let mut s = Session::default();
        assert_eq!(s.feed(0x03), Step::none());
        assert_eq!(s.feed(0x01), Step::none());
        assert_eq!(s.feed(0x23), Step::none());
        assert_eq!(s.state(), State::ReadData);

        assert_eq!(s.resume(), Some(Step::effect(Effect::ReadByte(0x0123))));
        assert_eq!(s.state(), State::WaitInstruction);
        assert_eq!(s.resume(), None);
    }

    #[test]
    fn read_data_ignores_fed_byte() {
        let mut s = Session::default();
        feed_all(&mut s, &[0x03]);
        s.feed(0x00);
        s.feed(0x05);

        assert_eq!(s.feed(0x99), Step::effect(Effect::ReadByte(0x0005)));
        assert_eq!(s.state(), State::WaitInstruction);
    }

    #[test]
    fn read_stream_collects_two_addresses() {
        let mut s = Session::default();
        s.feed(0x04);
        s.feed(0x00);
        s.feed(0x00);
        assert_eq!(s.read_start(), Some(0));
        assert_eq!(s.state(), State::WaitAddrHigh);

        s.feed(0x00);
        let step = s.feed(0x04);
        assert_eq!(step, Step::effect(Effect::ReadRange { start: 0, end: 4 }));
        assert_eq!(s.read_start(), None);
        assert_eq!(s.state(), State::WaitInstruction);
    }

    #[test]
    fn read_stream_accepts_ffff_start() {
        let mut s = Session::default();
        let steps = feed_all(&mut s, &[0x04, 0xff, 0xff, 0xff, 0xff]);

        assert_eq!(
            steps,
            vec![Step::effect(Effect::ReadRange { start: 0xffff, end: 0xffff })]
        );
    }

    #[test]
    fn inconsistent_instruction_recovers() {
        let mut s = Session::default();
        s.state = State::WaitData;
        s.instruction = Some(Instruction::ReadStream);

        assert_eq!(s.feed(0x42), Step::none());
        assert_eq!(s.state(), State::WaitInstruction);

        s.state = State::WaitAddrLow;
        s.instruction = None;
        assert_eq!(s.feed(0x42), Step::none());
        assert_eq!(s.state(), State::WaitInstruction);
    }

    #[test]
    fn reset_clears_everything() {
        let mut s = Session::default();
        feed_all(&mut s, &[0x02, 0x00, 0x10, 0x41, 0xff]);
        s.reset();
        assert_eq!(s, Session::default());
    }
}
