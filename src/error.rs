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

/// Ways a transfer can end other than success
#[derive(Debug, thiserror::Error)]
pub enum XmodemError {
    /// Local abort request; nothing is sent to the peer
    #[error("Transfer aborted by user")]
    UserAborted,

    /// Peer sent CAN CAN
    #[error("Transfer cancelled by remote")]
    Cancelled,

    /// Negotiation (or the wait for the next packet) never completed
    #[error("Synchronization error")]
    SyncError,

    /// Too many rejected or duplicate packets
    #[error("Too many retries")]
    RetryExceeded,

    /// Block was not acknowledged within the retransmit cap
    #[error("Transmit error: block not acknowledged")]
    TransmitError,

    #[error("No ACK after EOT")]
    NoFinalAck,

    /// Transport or storage failure other than a timeout
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl XmodemError {
    /// Negative status code, distinct per outcome
    pub fn status_code(&self) -> i32 {
        match self {
            XmodemError::Cancelled => -1,
            XmodemError::SyncError => -2,
            XmodemError::RetryExceeded => -3,
            XmodemError::TransmitError => -4,
            XmodemError::NoFinalAck => -5,
            XmodemError::UserAborted => -6,
            XmodemError::Io(_) => -7,
        }
    }
}
