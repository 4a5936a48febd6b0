// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use std::marker::PhantomData;
use std::time::Duration;
use tracing::{debug, trace, warn};
use crate::abort::AbortSignal;
use crate::chunk::ChunkSink;
use crate::error::XmodemError;
use crate::packet::{self, Verdict};
use crate::protocol::*;
use crate::serial::SerialPort;

// ============================================================================
// Options
// ============================================================================

#[derive(Debug, Clone)]
pub struct ReceiveOptions {
    /// Checksum mode to ask for first; falls back G -> C -> NAK
    pub mode: ChecksumMode,
    /// Maximum number of payload bytes to deliver to the sink
    pub limit: Option<usize>,
    /// Receive a single YMODEM control block (sequence 0) and stop
    pub control: bool,
    pub config: SessionConfig,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        ReceiveOptions {
            mode: ChecksumMode::Crc16,
            limit: None,
            control: false,
            config: SessionConfig::default(),
        }
    }
}

// ============================================================================
// States
// ============================================================================

pub struct Negotiate;
pub struct AwaitPacket;
pub struct ReceivePacket;
pub struct VerifyPacket;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct ReceiverFsm<'a, State> {
    state: PhantomData<State>,
    serial: &'a mut dyn SerialPort,
    sink: &'a mut dyn ChunkSink,
    abort: &'a dyn AbortSignal,
    config: SessionConfig,
    mode: ChecksumMode,
    control: bool,
    limit: Option<usize>,
    expected: u8,
    block: BlockSize,
    packet: Vec<u8>,
    bytes_received: usize,
    attempts: u32,
    retries_left: u32,
}

// ============================================================================
// Trait
// ============================================================================

pub enum ReceiverStep<'a> {
    Next(Box<dyn ReceiverState<'a> + 'a>),
    /// Transfer finished; total payload bytes delivered to the sink
    Done(usize),
}

pub trait ReceiverState<'a> {
    fn step(self: Box<Self>) -> Result<ReceiverStep<'a>, XmodemError>;
}

enum Header {
    Block(BlockSize),
    EndOfTransmission,
}

// ============================================================================
// Helpers shared by all states
// ============================================================================

impl<'a, S: 'static> ReceiverFsm<'a, S> {
    fn transition<T>(self) -> Box<ReceiverFsm<'a, T>> {
        Box::new(ReceiverFsm {
            state: PhantomData,
            serial: self.serial,
            sink: self.sink,
            abort: self.abort,
            config: self.config,
            mode: self.mode,
            control: self.control,
            limit: self.limit,
            expected: self.expected,
            block: self.block,
            packet: self.packet,
            bytes_received: self.bytes_received,
            attempts: self.attempts,
            retries_left: self.retries_left,
        })
    }

    fn io_error(&self, e: std::io::Error) -> XmodemError {
        let type_name = std::any::type_name::<S>();
        let state_name = type_name.split("::").last().unwrap_or(type_name);
        XmodemError::Io(std::io::Error::new(
            e.kind(),
            format!("{} (in state: {})", e, state_name)
        ))
    }

    fn check_abort(&self) -> Result<(), XmodemError> {
        if self.abort.abort_requested() {
            debug!("Abort requested by user");
            return Err(XmodemError::UserAborted);
        }
        Ok(())
    }

    fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>, XmodemError> {
        self.check_abort()?;
        let byte = match self.serial.read_byte(timeout) {
            Ok(byte) => byte,
            Err(e) => return Err(self.io_error(e)),
        };
        self.check_abort()?;
        Ok(byte)
    }

    fn send(&mut self, byte: u8) -> Result<(), XmodemError> {
        match self.serial.write_byte(byte) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    /// Discard input until the line goes quiet
    fn flush_input(&mut self) -> Result<(), XmodemError> {
        trace!("Flushing input");
        for _ in 0..FLUSH_LIMIT {
            if self.read_byte(self.config.flush_timeout)?.is_none() {
                return Ok(());
            }
        }
        warn!("Line still busy after discarding {} bytes", FLUSH_LIMIT);
        Ok(())
    }

    fn send_cancel(&mut self) -> Result<(), XmodemError> {
        self.flush_input()?;
        for _ in 0..ABORT_CAN_COUNT {
            self.send(CAN)?;
        }
        debug!("Sent: CAN CAN CAN");
        Ok(())
    }

    /// Wait for the start of the next packet. `None` means the attempt
    /// produced nothing usable (timeout, noise, or a lone CAN).
    fn read_header(&mut self, timeout: Duration) -> Result<Option<Header>, XmodemError> {
        let Some(byte) = self.read_byte(timeout)? else {
            trace!("Timeout waiting for header");
            return Ok(None);
        };

        if let Some(block) = BlockSize::from_header(byte) {
            trace!("Received: header 0x{:02X} ({} byte block)", byte, block.len());
            return Ok(Some(Header::Block(block)));
        }

        match byte {
            EOT => {
                debug!("Received: EOT");
                self.send(ACK)?;
                Ok(Some(Header::EndOfTransmission))
            }
            CAN => {
                if self.read_byte(self.config.packet_timeout)? == Some(CAN) {
                    warn!("Transfer cancelled by remote");
                    self.flush_input()?;
                    self.send(ACK)?;
                    return Err(XmodemError::Cancelled);
                }
                debug!("Received: lone CAN, ignored");
                Ok(None)
            }
            other => {
                trace!("Ignoring 0x{:02X}", other);
                Ok(None)
            }
        }
    }

    fn begin_packet(&mut self, block: BlockSize) {
        self.block = block;
        self.packet.clear();
        self.packet.push(block.header());
    }

    /// Count one more packet that did not advance the transfer
    fn consume_retry(&mut self) -> Result<(), XmodemError> {
        self.retries_left = self.retries_left.saturating_sub(1);
        if self.retries_left == 0 {
            warn!("Too many retries, cancelling transfer");
            self.send_cancel()?;
            return Err(XmodemError::RetryExceeded);
        }
        Ok(())
    }

    fn await_next(mut self) -> Result<ReceiverStep<'a>, XmodemError> {
        self.attempts = 0;
        let next = self.transition::<AwaitPacket>();
        Ok(ReceiverStep::Next(next))
    }

    fn header_step(mut self, header: Option<Header>) -> Result<ReceiverStep<'a>, XmodemError>
    where
        ReceiverFsm<'a, S>: ReceiverState<'a>,
    {
        match header {
            Some(Header::Block(block)) => {
                self.begin_packet(block);
                let next = self.transition::<ReceivePacket>();
                Ok(ReceiverStep::Next(next))
            }
            Some(Header::EndOfTransmission) => {
                debug!("Transfer complete, {} bytes received", self.bytes_received);
                Ok(ReceiverStep::Done(self.bytes_received))
            }
            None => Ok(ReceiverStep::Next(Box::new(self))),
        }
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl<'a> ReceiverState<'a> for ReceiverFsm<'a, Negotiate> {
    fn step(self: Box<Self>) -> Result<ReceiverStep<'a>, XmodemError> {
        let mut fsm = *self;
        fsm.check_abort()?;

        if fsm.attempts >= fsm.config.negotiation_attempts {
            match fsm.mode.downgrade() {
                Some(mode) => {
                    debug!("No response, falling back from {:?} to {:?}", fsm.mode, mode);
                    fsm.mode = mode;
                    fsm.attempts = 0;
                }
                None => {
                    warn!("Sender never started, giving up");
                    fsm.send_cancel()?;
                    return Err(XmodemError::SyncError);
                }
            }
        }

        fsm.attempts += 1;
        let request = fsm.mode.request_byte();
        fsm.send(request)?;
        debug!("Sent: negotiation byte 0x{:02X} (attempt {})", request, fsm.attempts);

        let header = fsm.read_header(fsm.config.negotiation_timeout)?;
        if header.is_some() {
            debug!("Negotiated {:?}", fsm.mode);
        }
        fsm.header_step(header)
    }
}

impl<'a> ReceiverState<'a> for ReceiverFsm<'a, AwaitPacket> {
    fn step(self: Box<Self>) -> Result<ReceiverStep<'a>, XmodemError> {
        let mut fsm = *self;
        fsm.check_abort()?;

        if fsm.attempts >= fsm.config.negotiation_attempts {
            warn!("Sender went silent, giving up");
            fsm.send_cancel()?;
            return Err(XmodemError::SyncError);
        }
        fsm.attempts += 1;

        let header = fsm.read_header(fsm.config.negotiation_timeout)?;
        fsm.header_step(header)
    }
}

impl<'a> ReceiverState<'a> for ReceiverFsm<'a, ReceivePacket> {
    fn step(self: Box<Self>) -> Result<ReceiverStep<'a>, XmodemError> {
        let mut fsm = *self;
        let total = packet::packet_len(fsm.block, fsm.mode);

        while fsm.packet.len() < total {
            match fsm.read_byte(fsm.config.packet_timeout)? {
                Some(byte) => fsm.packet.push(byte),
                None => {
                    debug!("Timeout inside packet after {} bytes, sending NAK", fsm.packet.len());
                    fsm.flush_input()?;
                    fsm.send(NAK)?;
                    return fsm.await_next();
                }
            }
        }

        trace!("Received: {} byte packet", total);
        let next = fsm.transition::<VerifyPacket>();
        Ok(ReceiverStep::Next(next))
    }
}

impl<'a> ReceiverState<'a> for ReceiverFsm<'a, VerifyPacket> {
    fn step(self: Box<Self>) -> Result<ReceiverStep<'a>, XmodemError> {
        let mut fsm = *self;

        match packet::validate(&fsm.packet, fsm.mode, fsm.expected) {
            Verdict::Accepted(seq) => {
                let payload = packet::payload(&fsm.packet).unwrap_or_default();
                let count = match fsm.limit {
                    Some(limit) => payload.len().min(limit.saturating_sub(fsm.bytes_received)),
                    None => payload.len(),
                };
                if count > 0 {
                    if let Err(e) = fsm.sink.store(&payload[..count]) {
                        return Err(fsm.io_error(e));
                    }
                    fsm.bytes_received += count;
                }
                debug!("Block {} accepted ({} bytes stored, {} total)", seq, count, fsm.bytes_received);

                fsm.expected = fsm.expected.wrapping_add(1);
                fsm.retries_left = fsm.config.max_retries;
                if fsm.mode.acknowledges() {
                    fsm.send(ACK)?;
                }

                if fsm.control {
                    debug!("Control block received");
                    return Ok(ReceiverStep::Done(fsm.bytes_received));
                }
                fsm.await_next()
            }
            Verdict::Duplicate => {
                debug!("Duplicate of block {}, not stored", fsm.expected.wrapping_sub(1));
                fsm.consume_retry()?;
                if fsm.mode.acknowledges() {
                    fsm.send(ACK)?;
                }
                fsm.await_next()
            }
            Verdict::Malformed => {
                debug!("Rejected packet (expected block {}), sending NAK", fsm.expected);
                fsm.consume_retry()?;
                fsm.flush_input()?;
                fsm.send(NAK)?;
                fsm.await_next()
            }
        }
    }
}

// ============================================================================
// Constructor
// ============================================================================

impl<'a> ReceiverFsm<'a, Negotiate> {
    pub fn new(
        serial: &'a mut dyn SerialPort,
        sink: &'a mut dyn ChunkSink,
        abort: &'a dyn AbortSignal,
        options: ReceiveOptions,
    ) -> Box<dyn ReceiverState<'a> + 'a> {
        let max_block = BlockSize::OneK.len();
        Box::new(ReceiverFsm {
            state: PhantomData::<Negotiate>,
            serial,
            sink,
            abort,
            retries_left: options.config.max_retries,
            config: options.config,
            mode: options.mode,
            control: options.control,
            limit: options.limit,
            expected: if options.control { 0 } else { 1 },
            block: BlockSize::Standard,
            packet: Vec::with_capacity(PACKET_HEADER_LEN + max_block + 2),
            bytes_received: 0,
            attempts: 0,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
