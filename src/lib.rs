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

//! XMODEM / XMODEM-CRC / XMODEM-1K / YMODEM-G file transfer over a serial line
//!
//! One side calls [`receive`], the other [`transmit`]. Both drive a typestate
//! machine over a [`SerialPort`] until the transfer ends, returning the
//! number of payload bytes moved or an [`XmodemError`].

pub mod abort;
pub mod checksum;
pub mod chunk;
pub mod error;
pub mod packet;
pub mod protocol;
pub mod receiver;
pub mod sender;
pub mod serial;

pub use abort::{AbortSignal, NeverAbort};
pub use chunk::{ChunkSink, ChunkSource, ReadSource, SliceSource, WriteSink};
pub use error::XmodemError;
pub use protocol::{ChecksumMode, SessionConfig};
pub use receiver::ReceiveOptions;
pub use sender::TransmitOptions;
pub use serial::{RealSerialPort, SerialPort};

use receiver::{ReceiverFsm, ReceiverStep};
use sender::{SenderFsm, SenderStep};

/// Receive one file (or one control block) into `sink`
pub fn receive<'a>(
    serial: &'a mut dyn SerialPort,
    sink: &'a mut dyn ChunkSink,
    abort: &'a dyn AbortSignal,
    options: ReceiveOptions,
) -> Result<usize, XmodemError> {
    let mut state = ReceiverFsm::new(serial, sink, abort, options);

    loop {
        match state.step()? {
            ReceiverStep::Next(next_state) => state = next_state,
            ReceiverStep::Done(bytes) => return Ok(bytes),
        }
    }
}

/// Transmit `total` bytes (or one control block) read from `source`
pub fn transmit<'a>(
    serial: &'a mut dyn SerialPort,
    source: &'a mut dyn ChunkSource,
    abort: &'a dyn AbortSignal,
    total: usize,
    options: TransmitOptions,
) -> Result<usize, XmodemError> {
    let mut state = SenderFsm::new(serial, source, abort, total, options);

    loop {
        match state.step()? {
            SenderStep::Next(next_state) => state = next_state,
            SenderStep::Done(bytes) => return Ok(bytes),
        }
    }
}

// ============================================================================
// End-to-End Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::protocol::{CAN, ChecksumMode};
    use crate::serial::LoopbackPort;

    fn fast_config() -> SessionConfig {
        SessionConfig {
            negotiation_timeout: Duration::from_millis(500),
            packet_timeout: Duration::from_millis(500),
            flush_timeout: Duration::from_millis(50),
            eot_timeout: Duration::from_millis(500),
            ..SessionConfig::default()
        }
    }

    fn run_pair(
        data: &[u8],
        mode: ChecksumMode,
        use_1k: bool,
        limit: Option<usize>,
    ) -> (Result<usize, XmodemError>, Result<usize, XmodemError>, Vec<u8>) {
        let (mut tx_port, mut rx_port) = LoopbackPort::pair();
        let mut received = Vec::new();

        let (sent, got) = std::thread::scope(|s| {
            let sender = s.spawn(|| {
                let mut source = SliceSource::new(data);
                let options = TransmitOptions { use_1k, config: fast_config(), ..TransmitOptions::default() };
                transmit(&mut tx_port, &mut source, &NeverAbort, data.len(), options)
            });
            let options = ReceiveOptions { mode, limit, config: fast_config(), ..ReceiveOptions::default() };
            let got = receive(&mut rx_port, &mut received, &NeverAbort, options);
            (sender.join().expect("sender thread panicked"), got)
        });

        (sent, got, received)
    }

    #[test]
    fn test_end_to_end_300_bytes() {
        let data: Vec<u8> = (0..300).map(|i| (i * 13 % 251) as u8).collect();
        let (sent, got, received) = run_pair(&data, ChecksumMode::Crc16, false, Some(300));

        assert_eq!(sent.unwrap(), 300);
        assert_eq!(got.unwrap(), 300);
        assert_eq!(received, data);
    }

    #[test]
    fn test_end_to_end_without_limit_keeps_padding() {
        let data = vec![0x42u8; 300];
        let (sent, got, received) = run_pair(&data, ChecksumMode::Arithmetic, false, None);

        assert_eq!(sent.unwrap(), 300);
        assert_eq!(got.unwrap(), 384);
        assert_eq!(&received[..300], &data[..]);
        assert!(received[300..].iter().all(|&b| b == protocol::CTRLZ));
    }

    #[test]
    fn test_end_to_end_1k_g_mode() {
        let data: Vec<u8> = (0..5000).map(|i| (i % 256) as u8).collect();
        let (sent, got, received) = run_pair(&data, ChecksumMode::Crc16NoAck, true, Some(data.len()));

        assert_eq!(sent.unwrap(), 5000);
        assert_eq!(got.unwrap(), 5000);
        assert_eq!(received, data);
    }

    #[test]
    fn test_end_to_end_control_block() {
        let (mut tx_port, mut rx_port) = LoopbackPort::pair();
        let header = b"report.txt\x00300";
        let mut received = Vec::new();

        let (sent, got) = std::thread::scope(|s| {
            let sender = s.spawn(|| {
                let mut source = SliceSource::new(header);
                let options = TransmitOptions { control: true, config: fast_config(), ..TransmitOptions::default() };
                transmit(&mut tx_port, &mut source, &NeverAbort, 128, options)
            });
            let options = ReceiveOptions { control: true, config: fast_config(), ..ReceiveOptions::default() };
            let got = receive(&mut rx_port, &mut received, &NeverAbort, options);
            (sender.join().expect("sender thread panicked"), got)
        });

        assert_eq!(sent.unwrap(), header.len());
        assert_eq!(got.unwrap(), 128);
        assert_eq!(&received[..header.len()], header);
        assert!(received[header.len()..].iter().all(|&b| b == protocol::CONTROL_FILL));
    }

    #[test]
    fn test_end_to_end_receiver_sees_cancel() {
        let (mut tx_port, mut rx_port) = LoopbackPort::pair();
        let mut received = Vec::new();

        let got = std::thread::scope(|s| {
            s.spawn(move || {
                // Wait for the negotiation byte, then hang up
                let _ = tx_port.read_byte(Duration::from_secs(2));
                tx_port.write_all(&[CAN, CAN]).unwrap();
                let _ = tx_port.read_byte(Duration::from_secs(2));
            });
            let options = ReceiveOptions { config: fast_config(), ..ReceiveOptions::default() };
            receive(&mut rx_port, &mut received, &NeverAbort, options)
        });

        assert!(matches!(got, Err(XmodemError::Cancelled)));
        assert!(received.is_empty());
    }
}
