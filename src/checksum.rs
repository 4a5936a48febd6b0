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

//! Block trailers: 8-bit additive checksum and CRC-16/CCITT

use crate::protocol::ChecksumMode;

/// Sum of all bytes, truncated to 8 bits
pub fn additive_checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// CRC-16/CCITT (XMODEM variant, initial value 0), byte at a time without a table
pub fn crc16(payload: &[u8]) -> u16 {
    payload.iter().fold(0u16, |crc, &b| {
        let mut crc = crc.swap_bytes();
        crc ^= b as u16;
        crc ^= (crc & 0xFF) >> 4;
        crc ^= (crc << 8) << 4;
        crc ^= ((crc & 0xFF) << 4) << 1;
        crc
    })
}

/// Trailer bytes for `payload` in the given mode
pub fn trailer(mode: ChecksumMode, payload: &[u8]) -> Vec<u8> {
    if mode.uses_crc() {
        crc16(payload).to_be_bytes().to_vec()
    } else {
        vec![additive_checksum(payload)]
    }
}

/// Check a received trailer against the payload
pub fn verify(mode: ChecksumMode, payload: &[u8], trailer: &[u8]) -> bool {
    if mode.uses_crc() {
        match trailer {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]) == crc16(payload),
            _ => false,
        }
    } else {
        match trailer {
            [sum] => *sum == additive_checksum(payload),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Shift-register form of the same polynomial (0x1021)
    fn crc16_bitwise(data: &[u8]) -> u16 {
        let mut crc: u16 = 0;
        for &byte in data {
            crc ^= (byte as u16) << 8;
            for _ in 0..8 {
                if crc & 0x8000 != 0 {
                    crc = (crc << 1) ^ 0x1021;
                } else {
                    crc <<= 1;
                }
            }
        }
        crc
    }

    #[test]
    fn test_crc16_known_vectors() {
        assert_eq!(crc16(b""), 0);
        assert_eq!(crc16(b"123456789"), 0x31C3);
        assert_eq!(crc16(b"A"), 0x58E5);
    }

    #[test]
    fn test_crc16_matches_shift_register() {
        let data: Vec<u8> = (0..1024).map(|i| (i * 7 + 13) as u8).collect();
        assert_eq!(crc16(&data), crc16_bitwise(&data));
        assert_eq!(crc16(&data[..128]), crc16_bitwise(&data[..128]));
        assert_eq!(crc16(&[0xFF; 128]), crc16_bitwise(&[0xFF; 128]));
    }

    #[test]
    fn test_crc16_single_bit_flip() {
        let mut data = [0x1Au8; 128];
        let reference = crc16(&data);
        for bit in 0..8 {
            data[64] ^= 1 << bit;
            assert_ne!(crc16(&data), reference);
            data[64] ^= 1 << bit;
        }
    }

    #[test]
    fn test_additive_checksum_wraps() {
        assert_eq!(additive_checksum(b""), 0);
        assert_eq!(additive_checksum(&[0x80, 0x80, 0x01]), 0x01);
        assert_eq!(additive_checksum(&[0xFF; 128]), 0x80);
    }

    #[test]
    fn test_trailer_sizes() {
        let payload = [0x55u8; 1024];
        assert_eq!(trailer(ChecksumMode::Arithmetic, &payload).len(), 1);
        assert_eq!(trailer(ChecksumMode::Crc16, &payload).len(), 2);
        assert_eq!(trailer(ChecksumMode::Crc16NoAck, &payload[..128]).len(), 2);
    }

    #[test]
    fn test_crc_trailer_is_big_endian() {
        assert_eq!(trailer(ChecksumMode::Crc16, b"123456789"), vec![0x31, 0xC3]);
    }

    #[test]
    fn test_verify_accepts_own_trailer() {
        let payloads: [&[u8]; 3] = [b"", b"Test data", &[0xA5; 1024]];
        for mode in [ChecksumMode::Arithmetic, ChecksumMode::Crc16, ChecksumMode::Crc16NoAck] {
            for payload in payloads {
                assert!(verify(mode, payload, &trailer(mode, payload)));
            }
        }
    }

    #[test]
    fn test_verify_rejects_mismatch() {
        let payload = b"Test data";
        let mut crc = trailer(ChecksumMode::Crc16, payload);
        crc[1] ^= 0x01;
        assert!(!verify(ChecksumMode::Crc16, payload, &crc));

        let sum = additive_checksum(payload).wrapping_add(1);
        assert!(!verify(ChecksumMode::Arithmetic, payload, &[sum]));

        // Wrong trailer length for the mode
        assert!(!verify(ChecksumMode::Arithmetic, payload, &trailer(ChecksumMode::Crc16, payload)));
        assert!(!verify(ChecksumMode::Crc16, payload, &trailer(ChecksumMode::Arithmetic, payload)));
    }
}
