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

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Non-blocking poll for a local abort request
pub trait AbortSignal {
    fn abort_requested(&self) -> bool;
}

/// Never requests an abort
pub struct NeverAbort;

impl AbortSignal for NeverAbort {
    fn abort_requested(&self) -> bool {
        false
    }
}

impl AbortSignal for AtomicBool {
    fn abort_requested(&self) -> bool {
        self.load(Ordering::SeqCst)
    }
}

impl AbortSignal for Arc<AtomicBool> {
    fn abort_requested(&self) -> bool {
        self.load(Ordering::SeqCst)
    }
}
