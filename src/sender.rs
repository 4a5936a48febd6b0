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
use crate::chunk::ChunkSource;
use crate::error::XmodemError;
use crate::packet;
use crate::protocol::*;
use crate::serial::SerialPort;

// ============================================================================
// Options
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct TransmitOptions {
    /// Use 1024-byte blocks while more than 128 bytes remain (XMODEM-1K)
    pub use_1k: bool,
    /// Send a single YMODEM control block (sequence 0) and stop without EOT
    pub control: bool,
    pub config: SessionConfig,
}

// ============================================================================
// States
// ============================================================================

pub struct Negotiate;
pub struct PreparePacket;
pub struct SendPacket;
pub struct EndOfTransmission;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct SenderFsm<'a, State> {
    state: PhantomData<State>,
    serial: &'a mut dyn SerialPort,
    source: &'a mut dyn ChunkSource,
    abort: &'a dyn AbortSignal,
    config: SessionConfig,
    mode: ChecksumMode,
    use_1k: bool,
    control: bool,
    total: usize,
    bytes_sent: usize,
    source_exhausted: bool,
    seq: u8,
    packet: Vec<u8>,
    chunk_len: usize,
    attempts: u32,
}

// ============================================================================
// Trait
// ============================================================================

pub enum SenderStep<'a> {
    Next(Box<dyn SenderState<'a> + 'a>),
    /// Transfer finished; payload bytes acknowledged by the receiver
    Done(usize),
}

pub trait SenderState<'a> {
    fn step(self: Box<Self>) -> Result<SenderStep<'a>, XmodemError>;
}

// ============================================================================
// Helpers shared by all states
// ============================================================================

impl<'a, S: 'static> SenderFsm<'a, S> {
    fn transition<T>(self) -> Box<SenderFsm<'a, T>> {
        Box::new(SenderFsm {
            state: PhantomData,
            serial: self.serial,
            source: self.source,
            abort: self.abort,
            config: self.config,
            mode: self.mode,
            use_1k: self.use_1k,
            control: self.control,
            total: self.total,
            bytes_sent: self.bytes_sent,
            source_exhausted: self.source_exhausted,
            seq: self.seq,
            packet: self.packet,
            chunk_len: self.chunk_len,
            attempts: self.attempts,
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

    fn send(&mut self, buf: &[u8]) -> Result<(), XmodemError> {
        match self.serial.write_all(buf) {
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
        self.send(&[CAN; ABORT_CAN_COUNT])?;
        debug!("Sent: CAN CAN CAN");
        self.flush_input()
    }

    /// Called after a CAN; a second CAN cancels the transfer
    fn check_remote_cancel(&mut self) -> Result<(), XmodemError> {
        if self.read_byte(self.config.packet_timeout)? == Some(CAN) {
            warn!("Transfer cancelled by remote");
            self.send(&[ACK])?;
            self.flush_input()?;
            return Err(XmodemError::Cancelled);
        }
        debug!("Received: lone CAN, ignored");
        Ok(())
    }

    /// No data left: stop here for a control block, otherwise send EOT
    fn finish(mut self) -> Result<SenderStep<'a>, XmodemError> {
        if self.control {
            return Ok(SenderStep::Done(self.bytes_sent));
        }
        self.attempts = 0;
        let next = self.transition::<EndOfTransmission>();
        Ok(SenderStep::Next(next))
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl<'a> SenderState<'a> for SenderFsm<'a, Negotiate> {
    fn step(self: Box<Self>) -> Result<SenderStep<'a>, XmodemError> {
        let mut fsm = *self;
        fsm.check_abort()?;

        if fsm.attempts >= fsm.config.negotiation_attempts {
            warn!("Receiver never asked for data, giving up");
            fsm.send_cancel()?;
            return Err(XmodemError::SyncError);
        }
        fsm.attempts += 1;

        match fsm.read_byte(fsm.config.packet_timeout)? {
            Some(CAN) => {
                fsm.check_remote_cancel()?;
                Ok(SenderStep::Next(Box::new(fsm)))
            }
            Some(byte) => match ChecksumMode::from_request_byte(byte) {
                Some(mode) => {
                    debug!("Received: 0x{:02X}, using {:?}", byte, mode);
                    fsm.mode = mode;
                    let next = fsm.transition::<PreparePacket>();
                    Ok(SenderStep::Next(next))
                }
                None => {
                    trace!("Ignoring 0x{:02X}", byte);
                    Ok(SenderStep::Next(Box::new(fsm)))
                }
            },
            None => {
                trace!("Timeout waiting for negotiation byte");
                Ok(SenderStep::Next(Box::new(fsm)))
            }
        }
    }
}

impl<'a> SenderState<'a> for SenderFsm<'a, PreparePacket> {
    fn step(self: Box<Self>) -> Result<SenderStep<'a>, XmodemError> {
        let mut fsm = *self;

        let remaining = if fsm.source_exhausted {
            0
        } else {
            fsm.total.saturating_sub(fsm.bytes_sent)
        };
        if remaining == 0 {
            return fsm.finish();
        }

        let block = BlockSize::for_remaining(remaining, fsm.use_1k);
        let mut payload = vec![0u8; remaining.min(block.len())];
        let fetched = match fsm.source.fetch(&mut payload) {
            Ok(n) => n.min(payload.len()),
            Err(e) => return Err(fsm.io_error(e)),
        };
        if fetched < payload.len() {
            debug!("Source ended early ({} of {} bytes)", fetched, payload.len());
            fsm.source_exhausted = true;
        }
        if fetched == 0 {
            return fsm.finish();
        }

        let fill = if fsm.control { CONTROL_FILL } else { CTRLZ };
        fsm.packet = packet::frame(block, fsm.seq, &payload[..fetched], fill, fsm.mode);
        fsm.chunk_len = fetched;
        fsm.attempts = 0;
        trace!("Prepared block {} ({} bytes in {} byte block)", fsm.seq, fetched, block.len());

        let next = fsm.transition::<SendPacket>();
        Ok(SenderStep::Next(next))
    }
}

impl<'a> SenderState<'a> for SenderFsm<'a, SendPacket> {
    fn step(self: Box<Self>) -> Result<SenderStep<'a>, XmodemError> {
        let mut fsm = *self;
        fsm.check_abort()?;

        if fsm.attempts >= fsm.config.max_retries {
            warn!("Block {} not acknowledged, giving up", fsm.seq);
            fsm.send_cancel()?;
            return Err(XmodemError::TransmitError);
        }
        fsm.attempts += 1;

        let packet = std::mem::take(&mut fsm.packet);
        let sent = fsm.send(&packet);
        fsm.packet = packet;
        sent?;
        debug!("Sent: block {} (attempt {})", fsm.seq, fsm.attempts);

        let response = if fsm.mode.acknowledges() {
            fsm.read_byte(fsm.config.packet_timeout)?
        } else {
            Some(ACK)
        };

        match response {
            Some(ACK) => {
                fsm.seq = fsm.seq.wrapping_add(1);
                fsm.bytes_sent += fsm.chunk_len;
                debug!("Block acknowledged, {} bytes sent", fsm.bytes_sent);

                if fsm.control {
                    return Ok(SenderStep::Done(fsm.bytes_sent));
                }
                let next = fsm.transition::<PreparePacket>();
                Ok(SenderStep::Next(next))
            }
            Some(CAN) => {
                fsm.check_remote_cancel()?;
                Ok(SenderStep::Next(Box::new(fsm)))
            }
            Some(NAK) => {
                debug!("Received: NAK, retransmitting");
                Ok(SenderStep::Next(Box::new(fsm)))
            }
            Some(other) => {
                debug!("Received: 0x{:02X}, retransmitting", other);
                Ok(SenderStep::Next(Box::new(fsm)))
            }
            None => {
                debug!("Timeout waiting for ACK, retransmitting");
                Ok(SenderStep::Next(Box::new(fsm)))
            }
        }
    }
}

impl<'a> SenderState<'a> for SenderFsm<'a, EndOfTransmission> {
    fn step(self: Box<Self>) -> Result<SenderStep<'a>, XmodemError> {
        let mut fsm = *self;
        fsm.check_abort()?;

        if fsm.attempts >= fsm.config.eot_attempts {
            warn!("No ACK after EOT");
            fsm.flush_input()?;
            return Err(XmodemError::NoFinalAck);
        }
        fsm.attempts += 1;

        fsm.send(&[EOT])?;
        debug!("Sent: EOT (attempt {})", fsm.attempts);

        if fsm.read_byte(fsm.config.eot_timeout)? == Some(ACK) {
            debug!("Transfer complete, {} bytes sent", fsm.bytes_sent);
            return Ok(SenderStep::Done(fsm.bytes_sent));
        }
        Ok(SenderStep::Next(Box::new(fsm)))
    }
}

// ============================================================================
// Constructor
// ============================================================================

impl<'a> SenderFsm<'a, Negotiate> {
    pub fn new(
        serial: &'a mut dyn SerialPort,
        source: &'a mut dyn ChunkSource,
        abort: &'a dyn AbortSignal,
        total: usize,
        options: TransmitOptions,
    ) -> Box<dyn SenderState<'a> + 'a> {
        Box::new(SenderFsm {
            state: PhantomData::<Negotiate>,
            serial,
            source,
            abort,
            config: options.config,
            mode: ChecksumMode::Crc16,
            use_1k: options.use_1k,
            control: options.control,
            total,
            bytes_sent: 0,
            source_exhausted: false,
            seq: if options.control { 0 } else { 1 },
            packet: Vec::new(),
            chunk_len: 0,
            attempts: 0,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use crate::abort::NeverAbort;
    use crate::checksum;
    use crate::chunk::SliceSource;
    use crate::serial::{MockSerialPort, NoisyPort};

    fn run_sender<'a>(mut fsm: Box<dyn SenderState<'a> + 'a>) -> Result<usize, XmodemError> {
        loop {
            match fsm.step()? {
                SenderStep::Next(next) => fsm = next,
                SenderStep::Done(n) => return Ok(n),
            }
        }
    }

    fn options(use_1k: bool) -> TransmitOptions {
        TransmitOptions { use_1k, ..TransmitOptions::default() }
    }

    fn block(seq: u8, data: &[u8], mode: ChecksumMode) -> Vec<u8> {
        packet::frame(BlockSize::Standard, seq, data, CTRLZ, mode)
    }

    #[test]
    fn test_sender_crc_nak_then_ack() {
        let data = b"Test data";
        let packet = block(1, data, ChecksumMode::Crc16);
        let crc = checksum::crc16(&packet[3..131]);
        assert_eq!(&packet[131..], &crc.to_be_bytes());

        let responses = vec![Some(CRC_REQUEST), Some(NAK), Some(ACK), Some(ACK)];
        let mut expected_writes = packet.clone();
        expected_writes.extend_from_slice(&packet);
        expected_writes.push(EOT);

        let mut serial = MockSerialPort::new(responses, expected_writes);
        let mut source = SliceSource::new(data);
        let fsm = SenderFsm::new(&mut serial, &mut source, &NeverAbort, data.len(), options(false));

        assert_eq!(run_sender(fsm).expect("Transfer failed"), data.len());
    }

    #[test]
    fn test_sender_arithmetic_mode() {
        let data = b"sum";
        let packet = block(1, data, ChecksumMode::Arithmetic);
        assert_eq!(packet.len(), 132);

        let responses = vec![Some(NAK), Some(ACK), Some(ACK)];
        let mut expected_writes = packet;
        expected_writes.push(EOT);

        let mut serial = MockSerialPort::new(responses, expected_writes);
        let mut source = SliceSource::new(data);
        let fsm = SenderFsm::new(&mut serial, &mut source, &NeverAbort, data.len(), options(false));

        assert_eq!(run_sender(fsm).unwrap(), 3);
    }

    #[test]
    fn test_sender_multiple_blocks() {
        let data: Vec<u8> = (0..300).map(|i| (i % 256) as u8).collect();

        let mut responses = vec![Some(CRC_REQUEST)];
        responses.extend([Some(ACK); 4]);

        let mut expected_writes = Vec::new();
        for (i, chunk) in data.chunks(128).enumerate() {
            expected_writes.extend(block(i as u8 + 1, chunk, ChecksumMode::Crc16));
        }
        expected_writes.push(EOT);
        // 128 + 128 + 44 padded
        assert_eq!(expected_writes.len(), 3 * 133 + 1);

        let mut serial = MockSerialPort::new(responses, expected_writes);
        let mut source = SliceSource::new(&data);
        let fsm = SenderFsm::new(&mut serial, &mut source, &NeverAbort, data.len(), options(false));

        assert_eq!(run_sender(fsm).unwrap(), 300);
    }

    #[test]
    fn test_sender_1k_blocks() {
        let data: Vec<u8> = (0..1200).map(|i| (i * 3 % 256) as u8).collect();

        let responses = vec![Some(CRC_REQUEST), Some(ACK), Some(ACK), Some(ACK)];

        // 1200 bytes: a full 1K block, then 176 > 128 so another 1K block
        let mut expected_writes = packet::frame(BlockSize::OneK, 1, &data[..1024], CTRLZ, ChecksumMode::Crc16);
        expected_writes.extend(packet::frame(BlockSize::OneK, 2, &data[1024..], CTRLZ, ChecksumMode::Crc16));
        expected_writes.push(EOT);

        let mut serial = MockSerialPort::new(responses, expected_writes);
        let mut source = SliceSource::new(&data);
        let fsm = SenderFsm::new(&mut serial, &mut source, &NeverAbort, data.len(), options(true));

        assert_eq!(run_sender(fsm).unwrap(), 1200);
    }

    #[test]
    fn test_sender_1k_short_tail_uses_128() {
        let data = vec![0x11u8; 1024 + 100];

        let responses = vec![Some(CRC_REQUEST), Some(ACK), Some(ACK), Some(ACK)];
        let mut expected_writes = packet::frame(BlockSize::OneK, 1, &data[..1024], CTRLZ, ChecksumMode::Crc16);
        expected_writes.extend(block(2, &data[1024..], ChecksumMode::Crc16));
        expected_writes.push(EOT);

        let mut serial = MockSerialPort::new(responses, expected_writes);
        let mut source = SliceSource::new(&data);
        let fsm = SenderFsm::new(&mut serial, &mut source, &NeverAbort, data.len(), options(true));

        assert_eq!(run_sender(fsm).unwrap(), 1124);
    }

    #[test]
    fn test_sender_sequence_wraps() {
        let blocks = 257;
        let data: Vec<u8> = (0..blocks * 128).map(|i| (i / 128) as u8).collect();

        let mut responses = vec![Some(CRC_REQUEST)];
        responses.extend(std::iter::repeat_n(Some(ACK), blocks + 1));

        let mut expected_writes = Vec::new();
        for (i, chunk) in data.chunks(128).enumerate() {
            let seq = (i + 1) as u8;
            expected_writes.extend(block(seq, chunk, ChecksumMode::Crc16));
        }
        expected_writes.push(EOT);

        // Block 256 goes out with sequence number 0
        let wrapped = &expected_writes[255 * 133..256 * 133];
        assert_eq!(&wrapped[..3], &[SOH, 0x00, 0xFF]);

        let mut serial = MockSerialPort::new(responses, expected_writes);
        let mut source = SliceSource::new(&data);
        let fsm = SenderFsm::new(&mut serial, &mut source, &NeverAbort, data.len(), options(false));

        assert_eq!(run_sender(fsm).unwrap(), blocks * 128);
    }

    #[test]
    fn test_sender_g_mode_streams() {
        let data = vec![0x5Au8; 200];
        let responses = vec![Some(CRC_NO_ACK_REQUEST), Some(ACK)];

        let mut expected_writes = block(1, &data[..128], ChecksumMode::Crc16NoAck);
        expected_writes.extend(block(2, &data[128..], ChecksumMode::Crc16NoAck));
        expected_writes.push(EOT);

        let mut serial = MockSerialPort::new(responses, expected_writes);
        let mut source = SliceSource::new(&data);
        let fsm = SenderFsm::new(&mut serial, &mut source, &NeverAbort, data.len(), options(false));

        assert_eq!(run_sender(fsm).unwrap(), 200);
    }

    #[test]
    fn test_sender_ignores_noise_before_negotiation() {
        let data = b"x";
        let responses = vec![None, Some(b'?'), Some(CAN), Some(b'q'), Some(CRC_REQUEST), Some(ACK), Some(ACK)];
        let mut expected_writes = block(1, data, ChecksumMode::Crc16);
        expected_writes.push(EOT);

        let mut serial = MockSerialPort::new(responses, expected_writes);
        let mut source = SliceSource::new(data);
        let fsm = SenderFsm::new(&mut serial, &mut source, &NeverAbort, 1, options(false));

        assert_eq!(run_sender(fsm).unwrap(), 1);
    }

    #[test]
    fn test_sender_sync_error() {
        let responses = vec![None; 17];
        let mut serial = MockSerialPort::new(responses, vec![CAN, CAN, CAN]);
        let mut source = SliceSource::new(b"never sent");
        let fsm = SenderFsm::new(&mut serial, &mut source, &NeverAbort, 10, options(false));

        assert!(matches!(run_sender(fsm), Err(XmodemError::SyncError)));
    }

    #[test]
    fn test_sender_remote_cancel_during_negotiation() {
        let responses = vec![Some(CAN), Some(CAN), None];
        let mut serial = MockSerialPort::new(responses, vec![ACK]);
        let mut source = SliceSource::new(b"data");
        let fsm = SenderFsm::new(&mut serial, &mut source, &NeverAbort, 4, options(false));

        assert!(matches!(run_sender(fsm), Err(XmodemError::Cancelled)));
    }

    #[test]
    fn test_sender_remote_cancel_after_block() {
        let data = vec![0x33u8; 256];
        let responses = vec![Some(CRC_REQUEST), Some(ACK), Some(CAN), Some(CAN), None];

        let mut expected_writes = block(1, &data[..128], ChecksumMode::Crc16);
        expected_writes.extend(block(2, &data[128..], ChecksumMode::Crc16));
        expected_writes.push(ACK);

        let mut serial = MockSerialPort::new(responses, expected_writes);
        let mut source = SliceSource::new(&data);
        let fsm = SenderFsm::new(&mut serial, &mut source, &NeverAbort, data.len(), options(false));

        assert!(matches!(run_sender(fsm), Err(XmodemError::Cancelled)));
    }

    #[test]
    fn test_sender_lone_can_retransmits() {
        let data = b"lone";
        let packet = block(1, data, ChecksumMode::Crc16);
        let responses = vec![Some(CRC_REQUEST), Some(CAN), Some(b'z'), None, Some(ACK), Some(ACK)];

        // CAN + noise, then a timeout, then ACK: three transmissions
        let mut expected_writes = Vec::new();
        for _ in 0..3 {
            expected_writes.extend_from_slice(&packet);
        }
        expected_writes.push(EOT);

        let mut serial = MockSerialPort::new(responses, expected_writes);
        let mut source = SliceSource::new(data);
        let fsm = SenderFsm::new(&mut serial, &mut source, &NeverAbort, data.len(), options(false));

        assert_eq!(run_sender(fsm).unwrap(), 4);
    }

    #[test]
    fn test_sender_transmit_error() {
        let data = b"unlucky";
        let packet = block(1, data, ChecksumMode::Crc16);

        let mut responses = vec![Some(CRC_REQUEST)];
        responses.extend([Some(NAK); 25]);
        responses.push(None); // end of flush

        let mut expected_writes = Vec::new();
        for _ in 0..25 {
            expected_writes.extend_from_slice(&packet);
        }
        expected_writes.extend([CAN, CAN, CAN]);

        let mut serial = MockSerialPort::new(responses, expected_writes);
        let mut source = SliceSource::new(data);
        let fsm = SenderFsm::new(&mut serial, &mut source, &NeverAbort, data.len(), options(false));

        assert!(matches!(run_sender(fsm), Err(XmodemError::TransmitError)));
    }

    #[test]
    fn test_sender_no_final_ack() {
        let data = b"end";
        let mut responses = vec![Some(CRC_REQUEST), Some(ACK)];
        for i in 0..10 {
            responses.push(if i % 2 == 0 { None } else { Some(NAK) });
        }
        responses.push(None); // end of flush

        let mut expected_writes = block(1, data, ChecksumMode::Crc16);
        expected_writes.extend([EOT; 10]);

        let mut serial = MockSerialPort::new(responses, expected_writes);
        let mut source = SliceSource::new(data);
        let fsm = SenderFsm::new(&mut serial, &mut source, &NeverAbort, data.len(), options(false));

        assert!(matches!(run_sender(fsm), Err(XmodemError::NoFinalAck)));
    }

    #[test]
    fn test_sender_control_block() {
        let mut header = b"file.txt\0300".to_vec();
        let len = header.len();
        let responses = vec![Some(CRC_REQUEST), Some(ACK)];

        let expected_writes = packet::frame(BlockSize::Standard, 0, &header, CONTROL_FILL, ChecksumMode::Crc16);
        header.resize(128, CONTROL_FILL);
        assert_eq!(&expected_writes[3..131], &header[..]);

        let mut serial = MockSerialPort::new(responses, expected_writes);
        let mut source = SliceSource::new(&header[..len]);
        let opts = TransmitOptions { control: true, ..options(false) };
        let fsm = SenderFsm::new(&mut serial, &mut source, &NeverAbort, len, opts);

        assert_eq!(run_sender(fsm).unwrap(), len);
    }

    #[test]
    fn test_sender_source_ends_early() {
        let data = vec![0x77u8; 100];
        let responses = vec![Some(CRC_REQUEST), Some(ACK), Some(ACK)];

        let mut expected_writes = block(1, &data, ChecksumMode::Crc16);
        expected_writes.push(EOT);

        let mut serial = MockSerialPort::new(responses, expected_writes);
        let mut source = SliceSource::new(&data);
        let fsm = SenderFsm::new(&mut serial, &mut source, &NeverAbort, 300, options(false));

        assert_eq!(run_sender(fsm).unwrap(), 100);
    }

    #[test]
    fn test_sender_flush_honors_user_abort() {
        let script = vec![Some(CRC_REQUEST), Some(CAN), Some(CAN)];
        let flag = Arc::new(AtomicBool::new(false));
        let mut serial = NoisyPort::new(script, 0x55).raise_on_noise(flag.clone());
        let mut source = SliceSource::new(b"data");
        let fsm = SenderFsm::new(&mut serial, &mut source, &flag, 4, options(false));

        assert!(matches!(run_sender(fsm), Err(XmodemError::UserAborted)));
        assert_eq!(serial.noise_reads, 1);
        let mut expected = block(1, b"data", ChecksumMode::Crc16);
        expected.push(ACK);
        assert_eq!(serial.write_log, expected);
    }

    #[test]
    fn test_sender_flush_is_bounded() {
        let mut serial = NoisyPort::new(vec![], 0x55);
        let mut source = SliceSource::new(b"data");
        let fsm = SenderFsm::new(&mut serial, &mut source, &NeverAbort, 4, options(false));

        assert!(matches!(run_sender(fsm), Err(XmodemError::SyncError)));
        assert_eq!(serial.noise_reads, 16 + FLUSH_LIMIT);
        assert_eq!(serial.write_log, vec![CAN, CAN, CAN]);
    }

    #[test]
    fn test_sender_user_abort() {
        let flag = Arc::new(AtomicBool::new(true));
        let mut serial = MockSerialPort::new(vec![], vec![]);
        let mut source = SliceSource::new(b"data");
        let fsm = SenderFsm::new(&mut serial, &mut source, &flag, 4, options(false));

        assert!(matches!(run_sender(fsm), Err(XmodemError::UserAborted)));
    }

    #[test]
    fn test_sender_handshake_retry() {
        let responses = vec![None, Some(CRC_REQUEST)];
        let mut serial = MockSerialPort::new(responses, vec![]);
        let mut source = SliceSource::new(b"data");
        let mut fsm = SenderFsm::new(&mut serial, &mut source, &NeverAbort, 4, options(false));

        for _ in 0..2 {
            fsm = match fsm.step().expect("Should succeed") {
                SenderStep::Next(next) => next,
                SenderStep::Done(_) => panic!("Finished too early"),
            };
        }
    }
}
