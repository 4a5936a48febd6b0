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

use std::time::Duration;
use serialport::{SerialPort as SerialPortTrait, DataBits, Parity, StopBits};

// ============================================================================
// SerialPort Trait
// ============================================================================

/// Byte transport used by the XMODEM state machines
pub trait SerialPort: Send {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;

    /// Read up to `buf.len()` bytes, failing with `ErrorKind::TimedOut` if
    /// nothing arrives within `timeout`
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize>;

    fn write_byte(&mut self, byte: u8) -> std::io::Result<()> {
        self.write_all(&[byte])
    }

    /// Read one byte; `Ok(None)` on timeout
    fn read_byte(&mut self, timeout: Duration) -> std::io::Result<Option<u8>> {
        let mut buf = [0u8; 1];
        match self.read_timeout(&mut buf, timeout) {
            Ok(1) => Ok(Some(buf[0])),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e),
        }
    }
}

// ============================================================================
// Real Serial Port Implementation
// ============================================================================

/// Real serial port implementation that wraps the serialport crate
pub struct RealSerialPort {
    port: Box<dyn SerialPortTrait>,
}

impl RealSerialPort {
    pub fn open(
        port_name: &str,
        baud_rate: u32,
        data_bits: DataBits,
        parity: Parity,
        stop_bits: StopBits,
    ) -> Result<Self, serialport::Error> {
        let port = serialport::new(port_name, baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(Duration::from_millis(100))
            .open()?;

        Ok(RealSerialPort { port })
    }
}

impl SerialPort for RealSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.port.write_all(buf)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
        self.port.set_timeout(timeout)
            .map_err(std::io::Error::other)?;
        self.port.read(buf)
    }
}

// ============================================================================
// Mock Serial Port for Testing
// ============================================================================

#[cfg(test)]
pub struct MockSerialPort {
    // Data to return on reads (None = timeout)
    read_buffer: Vec<Option<u8>>,
    read_pos: usize,
    // Track what was written
    write_log: Vec<u8>,
    // Expected writes for verification
    expected_writes: Vec<u8>,
}

#[cfg(test)]
impl MockSerialPort {
    pub fn new(responses: Vec<Option<u8>>, expected_writes: Vec<u8>) -> Self {
        MockSerialPort {
            read_buffer: responses,
            read_pos: 0,
            write_log: Vec::new(),
            expected_writes,
        }
    }
}

#[cfg(test)]
impl SerialPort for MockSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.write_log.extend_from_slice(buf);
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], _timeout: Duration) -> std::io::Result<usize> {
        // Out of responses = timeout
        if self.read_pos >= self.read_buffer.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Mock timeout"
            ));
        }

        // If current response is None = timeout
        if self.read_buffer[self.read_pos].is_none() {
            self.read_pos += 1;
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Mock timeout"
            ));
        }

        let mut bytes_read = 0;
        while bytes_read < buf.len() && self.read_pos < self.read_buffer.len() {
            match self.read_buffer[self.read_pos] {
                Some(byte) => {
                    buf[bytes_read] = byte;
                    bytes_read += 1;
                    self.read_pos += 1;
                }
                None => break,  // Stop at timeout marker
            }
        }

        Ok(bytes_read)
    }
}

#[cfg(test)]
impl Drop for MockSerialPort {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        assert_eq!(
            self.read_pos,
            self.read_buffer.len(),
            "MockSerialPort dropped with {} unconsumed responses (read {} of {} bytes)",
            self.read_buffer.len() - self.read_pos,
            self.read_pos,
            self.read_buffer.len()
        );

        assert_eq!(
            &self.write_log,
            &self.expected_writes,
            "MockSerialPort write log mismatch!\nExpected {} bytes:\n{:02X?}\nGot {} bytes:\n{:02X?}",
            self.expected_writes.len(),
            self.expected_writes,
            self.write_log.len(),
            self.write_log
        );
    }
}

// ============================================================================
// Noisy Line for Flush Tests
// ============================================================================

/// Plays a script, then returns `noise` forever. Raises `on_noise` (if set)
/// on the first noise byte.
#[cfg(test)]
pub struct NoisyPort {
    script: std::collections::VecDeque<Option<u8>>,
    noise: u8,
    on_noise: Option<std::sync::Arc<std::sync::atomic::AtomicBool>>,
    pub noise_reads: usize,
    pub write_log: Vec<u8>,
}

#[cfg(test)]
impl NoisyPort {
    pub fn new(script: Vec<Option<u8>>, noise: u8) -> Self {
        NoisyPort {
            script: script.into(),
            noise,
            on_noise: None,
            noise_reads: 0,
            write_log: Vec::new(),
        }
    }

    pub fn raise_on_noise(mut self, flag: std::sync::Arc<std::sync::atomic::AtomicBool>) -> Self {
        self.on_noise = Some(flag);
        self
    }
}

#[cfg(test)]
impl SerialPort for NoisyPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.write_log.extend_from_slice(buf);
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], _timeout: Duration) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.script.pop_front() {
            Some(Some(byte)) => buf[0] = byte,
            Some(None) => {
                return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "Mock timeout"));
            }
            None => {
                self.noise_reads += 1;
                if let Some(flag) = &self.on_noise {
                    flag.store(true, std::sync::atomic::Ordering::SeqCst);
                }
                buf[0] = self.noise;
            }
        }
        Ok(1)
    }
}

// ============================================================================
// Loopback Port Pair for End-to-End Tests
// ============================================================================

/// One end of an in-memory null-modem cable
#[cfg(test)]
pub struct LoopbackPort {
    tx: std::sync::mpsc::Sender<u8>,
    rx: std::sync::mpsc::Receiver<u8>,
}

#[cfg(test)]
impl LoopbackPort {
    pub fn pair() -> (LoopbackPort, LoopbackPort) {
        let (a_tx, b_rx) = std::sync::mpsc::channel();
        let (b_tx, a_rx) = std::sync::mpsc::channel();
        (
            LoopbackPort { tx: a_tx, rx: a_rx },
            LoopbackPort { tx: b_tx, rx: b_rx },
        )
    }
}

#[cfg(test)]
impl SerialPort for LoopbackPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        for &byte in buf {
            // The peer may already be gone; the line just drops the byte
            let _ = self.tx.send(byte);
        }
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.rx.recv_timeout(timeout) {
            Ok(byte) => {
                buf[0] = byte;
                Ok(1)
            }
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Loopback timeout"
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_byte_maps_timeout() {
        let mut port = MockSerialPort::new(vec![Some(0x43), None], vec![0x15]);
        assert_eq!(port.read_byte(Duration::from_secs(1)).unwrap(), Some(0x43));
        assert_eq!(port.read_byte(Duration::from_secs(1)).unwrap(), None);
        port.write_byte(0x15).unwrap();
    }

    #[test]
    fn test_loopback_pair() {
        let (mut a, mut b) = LoopbackPort::pair();
        a.write_all(b"hi").unwrap();
        assert_eq!(b.read_byte(Duration::from_millis(100)).unwrap(), Some(b'h'));
        assert_eq!(b.read_byte(Duration::from_millis(100)).unwrap(), Some(b'i'));
        assert_eq!(b.read_byte(Duration::from_millis(10)).unwrap(), None);
        assert_eq!(a.read_byte(Duration::from_millis(10)).unwrap(), None);
    }
}
