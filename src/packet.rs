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

//! Packet framing and validation
//!
//! On the wire a packet is
//! `header | seq | !seq | payload (128 or 1024) | trailer (1 or 2)`.

use crate::checksum;
use crate::protocol::{BlockSize, ChecksumMode, PACKET_HEADER_LEN};

/// Outcome of checking a received packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Next block in sequence, carrying its sequence number
    Accepted(u8),
    /// Repeat of the last accepted block (our ACK was lost)
    Duplicate,
    /// Corrupt or out-of-window; NAK it
    Malformed,
}

/// Total packet length on the wire
pub fn packet_len(block: BlockSize, mode: ChecksumMode) -> usize {
    PACKET_HEADER_LEN + block.len() + mode.trailer_len()
}

/// Frame one block. A payload shorter than the block is padded with `fill`.
pub fn frame(block: BlockSize, seq: u8, payload: &[u8], fill: u8, mode: ChecksumMode) -> Vec<u8> {
    debug_assert!(payload.len() <= block.len());

    let mut packet = Vec::with_capacity(packet_len(block, mode));
    packet.push(block.header());
    packet.push(seq);
    packet.push(!seq);
    packet.extend_from_slice(payload);
    packet.resize(PACKET_HEADER_LEN + block.len(), fill);

    let trailer = checksum::trailer(mode, &packet[PACKET_HEADER_LEN..]);
    packet.extend_from_slice(&trailer);
    packet
}

/// Classify a fully read packet (header byte included) against the expected
/// sequence number. Only the immediately preceding sequence number counts as
/// a duplicate; anything further behind is treated like corruption.
pub fn validate(raw: &[u8], mode: ChecksumMode, expected: u8) -> Verdict {
    let Some(block) = raw.first().copied().and_then(BlockSize::from_header) else {
        return Verdict::Malformed;
    };
    if raw.len() != packet_len(block, mode) {
        return Verdict::Malformed;
    }

    let seq = raw[1];
    if raw[2] != !seq {
        return Verdict::Malformed;
    }

    let (payload, trailer) = raw[PACKET_HEADER_LEN..].split_at(block.len());
    if !checksum::verify(mode, payload, trailer) {
        return Verdict::Malformed;
    }

    if seq == expected {
        Verdict::Accepted(seq)
    } else if seq == expected.wrapping_sub(1) {
        Verdict::Duplicate
    } else {
        Verdict::Malformed
    }
}

/// Payload slice of a packet; `None` if the header byte is unknown or the
/// buffer is too short to hold the block
pub fn payload(raw: &[u8]) -> Option<&[u8]> {
    let block = raw.first().copied().and_then(BlockSize::from_header)?;
    raw.get(PACKET_HEADER_LEN..PACKET_HEADER_LEN + block.len())
}
