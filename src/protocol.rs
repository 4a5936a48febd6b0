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

//! XMODEM/YMODEM protocol constants and session settings

use std::time::Duration;

/// Start of header - begins a 128-byte block
pub const SOH: u8 = 0x01;

/// Start of text - begins a 1024-byte block
pub const STX: u8 = 0x02;

/// End of transmission - sender has no more blocks
pub const EOT: u8 = 0x04;

/// Acknowledge - block (or EOT) received intact
pub const ACK: u8 = 0x06;

/// Negative acknowledge - retransmit, or request arithmetic checksum mode
pub const NAK: u8 = 0x15;

/// Cancel - two in a row abort the transfer
pub const CAN: u8 = 0x18;

/// Ctrl-Z - fill byte for a short final data block
pub const CTRLZ: u8 = 0x1A;

/// Fill byte for a short YMODEM control block
pub const CONTROL_FILL: u8 = 0x00;

/// Receiver requests CRC-16 mode
pub const CRC_REQUEST: u8 = b'C';

/// Receiver requests CRC-16 streaming mode without per-block ACK
pub const CRC_NO_ACK_REQUEST: u8 = b'G';

/// Header, sequence number and its complement
pub const PACKET_HEADER_LEN: usize = 3;

/// Number of CAN bytes sent when aborting
pub const ABORT_CAN_COUNT: usize = 3;

/// Most bytes one input flush discards before giving up on a quiet line
pub const FLUSH_LIMIT: usize = 8 * 1024;

// ============================================================================
// Checksum Mode
// ============================================================================

/// How the trailer of every block is computed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumMode {
    /// 8-bit additive checksum, one trailer byte
    Arithmetic,
    /// CRC-16/CCITT, two trailer bytes (big-endian)
    Crc16,
    /// CRC-16 with the sender streaming blocks without waiting for ACK
    Crc16NoAck,
}

impl ChecksumMode {
    /// Byte the receiver sends to ask for this mode
    pub fn request_byte(self) -> u8 {
        match self {
            ChecksumMode::Arithmetic => NAK,
            ChecksumMode::Crc16 => CRC_REQUEST,
            ChecksumMode::Crc16NoAck => CRC_NO_ACK_REQUEST,
        }
    }

    /// Mode selected by a negotiation byte, if it is one
    pub fn from_request_byte(byte: u8) -> Option<Self> {
        match byte {
            NAK => Some(ChecksumMode::Arithmetic),
            CRC_REQUEST => Some(ChecksumMode::Crc16),
            CRC_NO_ACK_REQUEST => Some(ChecksumMode::Crc16NoAck),
            _ => None,
        }
    }

    pub fn uses_crc(self) -> bool {
        !matches!(self, ChecksumMode::Arithmetic)
    }

    pub fn trailer_len(self) -> usize {
        if self.uses_crc() { 2 } else { 1 }
    }

    /// Whether blocks are individually acknowledged
    pub fn acknowledges(self) -> bool {
        !matches!(self, ChecksumMode::Crc16NoAck)
    }

    /// Next mode to try when the sender does not answer: G -> C -> NAK
    pub fn downgrade(self) -> Option<Self> {
        match self {
            ChecksumMode::Crc16NoAck => Some(ChecksumMode::Crc16),
            ChecksumMode::Crc16 => Some(ChecksumMode::Arithmetic),
            ChecksumMode::Arithmetic => None,
        }
    }
}

// ============================================================================
// Block Size
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSize {
    /// 128-byte block, SOH header
    Standard,
    /// 1024-byte block, STX header (XMODEM-1K)
    OneK,
}

impl BlockSize {
    pub fn len(self) -> usize {
        match self {
            BlockSize::Standard => 128,
            BlockSize::OneK => 1024,
        }
    }

    pub fn header(self) -> u8 {
        match self {
            BlockSize::Standard => SOH,
            BlockSize::OneK => STX,
        }
    }

    pub fn from_header(byte: u8) -> Option<Self> {
        match byte {
            SOH => Some(BlockSize::Standard),
            STX => Some(BlockSize::OneK),
            _ => None,
        }
    }

    /// Block size for the next block when `remaining` bytes are left.
    /// 1K blocks are only used while more than one standard block remains.
    pub fn for_remaining(remaining: usize, use_1k: bool) -> Self {
        if use_1k && remaining > BlockSize::Standard.len() {
            BlockSize::OneK
        } else {
            BlockSize::Standard
        }
    }
}

// ============================================================================
// Session Settings
// ============================================================================

/// Timing and retry limits shared by both directions
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Receiver wait for a header after each negotiation byte
    pub negotiation_timeout: Duration,
    /// Wait for each byte inside a packet, and for the sender's responses
    pub packet_timeout: Duration,
    /// Quiet period that ends an input flush
    pub flush_timeout: Duration,
    /// Wait for the ACK of each EOT
    pub eot_timeout: Duration,
    /// Header waits per checksum mode before giving up or downgrading
    pub negotiation_attempts: u32,
    /// EOT sends before reporting a missing final ACK
    pub eot_attempts: u32,
    /// Retry cap for rejected blocks (receiver) and retransmissions (sender)
    pub max_retries: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let packet_timeout = Duration::from_millis(4000);
        SessionConfig {
            negotiation_timeout: Duration::from_secs(10),
            packet_timeout,
            flush_timeout: packet_timeout * 3 / 2,
            eot_timeout: packet_timeout * 2,
            negotiation_attempts: 16,
            eot_attempts: 10,
            max_retries: 25,
        }
    }
}
