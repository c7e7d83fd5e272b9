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

    devices::fdc::command.rs

    Decoding of the WD279x command register.

    The top nibble of the command byte selects the command. The low nibble
    holds flags whose meaning depends on the command type:

    Type I   (0xxx xxxx)  r1 r0: step rate, V: verify, h: head load,
                          u: update track register (step commands)
    Type II  (10xx xxxx)  a0: data mark, C: side compare enable,
                          E: 30ms settle delay, S: side compare, m: multi sector
    Type III (11xx xxxx)  E: 30ms settle delay
    Type IV  (1101 xxxx)  I0..I3: interrupt conditions
*/

use modular_bitfield::{bitfield, prelude::*};
use serde_derive::{Deserialize, Serialize};
use strum_macros::Display;

use crate::emu_time::EmuDuration;

/// Step rates selectable by r1 r0, in milliseconds, for the 1MHz clock used in MSX interfaces.
pub const STEP_RATES_MS: [u64; 4] = [6, 12, 20, 30];
/// Delay applied when the E flag is set on a type II or III command.
pub const SETTLE_DELAY_MS: u64 = 30;

#[bitfield]
#[derive(Copy, Clone)]
pub struct Type1Flags {
    pub step_rate: B2,
    pub verify: bool,
    pub head_load: bool,
    pub update_track: bool,
    #[skip]
    opcode: B3,
}

#[bitfield]
#[derive(Copy, Clone)]
pub struct Type2Flags {
    pub data_mark: bool,
    pub side_compare_enable: bool,
    pub settle_delay: bool,
    pub side_compare: bool,
    pub multi: bool,
    #[skip]
    opcode: B3,
}

#[bitfield]
#[derive(Copy, Clone)]
pub struct Type4Flags {
    pub not_ready_to_ready: bool,
    pub ready_to_not_ready: bool,
    pub index_pulse: bool,
    pub immediate: bool,
    #[skip]
    opcode: B4,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum CommandType {
    #[strum(serialize = "Type I")]
    TypeI,
    #[strum(serialize = "Type II")]
    TypeII,
    #[strum(serialize = "Type III")]
    TypeIII,
    #[strum(serialize = "Type IV")]
    TypeIV,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum Command {
    Restore,
    Seek,
    Step,
    StepIn,
    StepOut,
    ReadSector,
    WriteSector,
    ReadAddress,
    ReadTrack,
    WriteTrack,
    ForceInterrupt,
}

impl Command {
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::Restore | Command::Seek | Command::Step | Command::StepIn | Command::StepOut => CommandType::TypeI,
            Command::ReadSector | Command::WriteSector => CommandType::TypeII,
            Command::ReadAddress | Command::ReadTrack | Command::WriteTrack => CommandType::TypeIII,
            Command::ForceInterrupt => CommandType::TypeIV,
        }
    }
}

/// The raw command register.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandReg(pub u8);

impl CommandReg {
    pub fn command(&self) -> Command {
        match self.0 >> 4 {
            0x0 => Command::Restore,
            0x1 => Command::Seek,
            0x2 | 0x3 => Command::Step,
            0x4 | 0x5 => Command::StepIn,
            0x6 | 0x7 => Command::StepOut,
            0x8 | 0x9 => Command::ReadSector,
            0xA | 0xB => Command::WriteSector,
            0xC => Command::ReadAddress,
            0xD => Command::ForceInterrupt,
            0xE => Command::ReadTrack,
            _ => Command::WriteTrack,
        }
    }

    pub fn command_type(&self) -> CommandType {
        self.command().command_type()
    }

    pub fn is(&self, command_type: CommandType) -> bool {
        self.command_type() == command_type
    }

    pub fn type1(&self) -> Type1Flags {
        Type1Flags::from_bytes([self.0])
    }

    pub fn type2(&self) -> Type2Flags {
        Type2Flags::from_bytes([self.0])
    }

    pub fn type4(&self) -> Type4Flags {
        Type4Flags::from_bytes([self.0])
    }

    /// Does a step of this command update the track register? Restore and Seek always do.
    pub fn updates_track(&self) -> bool {
        matches!(self.command(), Command::Restore | Command::Seek) || self.type1().update_track()
    }

    pub fn step_time(&self) -> EmuDuration {
        EmuDuration::from_millis(STEP_RATES_MS[self.type1().step_rate() as usize])
    }

    /// Is the E flag set? Only meaningful for type II and III commands.
    pub fn settle_delay(&self) -> bool {
        self.type2().settle_delay()
    }
}
