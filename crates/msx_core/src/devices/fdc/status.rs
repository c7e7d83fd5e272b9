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

    devices::fdc::status.rs

    The WD279x status register. Bits 1, 2, 4 and 5 change meaning with the
    type of the last command, so the register is described by two layout
    tables: one for type I and IV commands, one for type II and III commands.

    Some bits reflect drive or transfer state at the moment the register is
    read; the rest are latched by the command in progress.
*/

use strum_macros::Display;

use crate::devices::fdc::command::{CommandReg, CommandType};

pub const ST_BUSY: u8 = 0x01;
pub const ST_INDEX: u8 = 0x02;
pub const ST_DRQ: u8 = 0x02;
pub const ST_TRACK00: u8 = 0x04;
pub const ST_LOST_DATA: u8 = 0x04;
pub const ST_CRC_ERROR: u8 = 0x08;
pub const ST_SEEK_ERROR: u8 = 0x10;
pub const ST_RECORD_NOT_FOUND: u8 = 0x10;
pub const ST_HEAD_LOADED: u8 = 0x20;
pub const ST_RECORD_TYPE: u8 = 0x20;
pub const ST_WRITE_PROTECTED: u8 = 0x40;
pub const ST_NOT_READY: u8 = 0x80;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
pub enum StatusBit {
    Busy,
    Index,
    Track00,
    CrcError,
    SeekError,
    HeadLoaded,
    WriteProtected,
    NotReady,
    Drq,
    LostData,
    RecordNotFound,
    RecordType,
}

/// Drive and transfer state sampled when the status register is read.
#[derive(Copy, Clone, Debug, Default)]
pub struct LiveStatus {
    pub index: bool,
    pub track00: bool,
    pub head_loaded: bool,
    pub write_protected: bool,
    pub not_ready: bool,
    pub drq: bool,
}

pub struct StatusLayout {
    /// Meaning of each bit, from bit 0 to bit 7.
    pub bits: [StatusBit; 8],
    /// Bits sampled from LiveStatus rather than latched.
    pub live_mask: u8,
}

pub static TYPE1_LAYOUT: StatusLayout = StatusLayout {
    bits: [
        StatusBit::Busy,
        StatusBit::Index,
        StatusBit::Track00,
        StatusBit::CrcError,
        StatusBit::SeekError,
        StatusBit::HeadLoaded,
        StatusBit::WriteProtected,
        StatusBit::NotReady,
    ],
    live_mask: ST_INDEX | ST_TRACK00 | ST_HEAD_LOADED | ST_WRITE_PROTECTED | ST_NOT_READY,
};

pub static TYPE2_LAYOUT: StatusLayout = StatusLayout {
    bits: [
        StatusBit::Busy,
        StatusBit::Drq,
        StatusBit::LostData,
        StatusBit::CrcError,
        StatusBit::RecordNotFound,
        StatusBit::RecordType,
        StatusBit::WriteProtected,
        StatusBit::NotReady,
    ],
    live_mask: ST_DRQ | ST_NOT_READY,
};

impl StatusLayout {
    /// Select the layout in effect after `command`.
    pub fn for_command(command: CommandReg) -> &'static StatusLayout {
        match command.command_type() {
            CommandType::TypeI | CommandType::TypeIV => &TYPE1_LAYOUT,
            CommandType::TypeII | CommandType::TypeIII => &TYPE2_LAYOUT,
        }
    }

    /// Return the mask of `bit` in this layout, or 0 if the layout has no such bit.
    pub fn mask(&self, bit: StatusBit) -> u8 {
        self.bits
            .iter()
            .position(|&b| b == bit)
            .map(|pos| 1 << pos)
            .unwrap_or(0)
    }

    /// Combine latched status bits with live state.
    pub fn compose(&self, latched: u8, live: &LiveStatus) -> u8 {
        let mut value = latched & !self.live_mask;
        for (pos, bit) in self.bits.iter().enumerate() {
            let mask = 1u8 << pos;
            if self.live_mask & mask == 0 {
                continue;
            }
            let set = match bit {
                StatusBit::Index => live.index,
                StatusBit::Track00 => live.track00,
                StatusBit::HeadLoaded => live.head_loaded,
                StatusBit::WriteProtected => live.write_protected,
                StatusBit::NotReady => live.not_ready,
                StatusBit::Drq => live.drq,
                _ => latched & mask != 0,
            };
            if set {
                value |= mask;
            }
        }
        value
    }

    /// Return the names of the bits set in `value`, for debug display.
    pub fn describe(&self, value: u8) -> Vec<String> {
        self.bits
            .iter()
            .enumerate()
            .filter(|(pos, _)| value & (1 << *pos) != 0)
            .map(|(_, bit)| bit.to_string())
            .collect()
    }
}
