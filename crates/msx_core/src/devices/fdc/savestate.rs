/*
    MartyPC
    https://github.com/dbalsom/martypc

    Copyright 2022-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    devices::fdc::savestate.rs

    Serializable snapshot of a WD2793 and the errors that can occur when
    restoring one.
*/

use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    device_types::disk::RAWTRACK_SIZE,
    devices::fdc::{
        command::CommandReg,
        wd2793::{FsmState, DRQ_FREQ},
    },
    emu_time::{Clock, EmuTime},
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SaveStateError {
    #[error("Data buffer has {0} bytes, expected {expected}", expected = RAWTRACK_SIZE)]
    BufferSize(usize),
    #[error("Transfer cursor {current} + {available} exceeds the data buffer")]
    CursorOutOfRange { current: usize, available: usize },
    #[error("Transfer in progress with no bytes remaining")]
    EmptyTransfer,
    #[error("FSM state {0} requires a pending sync point")]
    MissingSyncPoint(FsmState),
    #[error("FSM state {0} has a pending sync point")]
    UnexpectedSyncPoint(FsmState),
}

/// Everything needed to resume a WD2793 exactly where it left off, including the times of its
/// pending sync points.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Wd2793State {
    pub command_start: EmuTime,
    pub drq_timer: Clock<DRQ_FREQ>,
    pub fsm_state: FsmState,
    pub fsm_sync: Option<EmuTime>,
    pub idx_sync: Option<EmuTime>,

    pub status: u8,
    pub command: CommandReg,
    pub sector: u8,
    pub track: u8,
    pub data: u8,

    pub direction_in: bool,
    pub intrq: bool,
    pub immediate_irq: bool,
    pub drq: bool,
    pub transferring: bool,
    pub formatting: bool,

    pub data_buffer: Vec<u8>,
    pub data_current: usize,
    pub data_available: usize,
}

impl Wd2793State {
    pub fn validate(&self) -> Result<(), SaveStateError> {
        if self.data_buffer.len() != RAWTRACK_SIZE {
            return Err(SaveStateError::BufferSize(self.data_buffer.len()));
        }
        let end = self.data_current.checked_add(self.data_available);
        if end.map_or(true, |end| end > RAWTRACK_SIZE) {
            return Err(SaveStateError::CursorOutOfRange {
                current:   self.data_current,
                available: self.data_available,
            });
        }
        if self.transferring && self.data_available == 0 {
            return Err(SaveStateError::EmptyTransfer);
        }
        match (self.fsm_state, self.fsm_sync) {
            (FsmState::Idle, Some(_)) => Err(SaveStateError::UnexpectedSyncPoint(self.fsm_state)),
            (FsmState::Idle, None) => Ok(()),
            (_, None) => Err(SaveStateError::MissingSyncPoint(self.fsm_state)),
            (_, Some(_)) => Ok(()),
        }
    }
}
