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

    device_traits::disk_controller.rs

    Defines the DiskController trait, the interface between a disk interface
    and the floppy controller chip behind it.
*/

use strum_macros::{Display, EnumIter};

use crate::{emu_time::EmuTime, scheduler::Scheduler};

/// The four CPU-visible registers of a WD279x-style controller.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display, EnumIter)]
pub enum FdcRegister {
    /// Status on read, command on write.
    StatusCommand,
    Track,
    Sector,
    Data,
}

impl FdcRegister {
    /// Decode a register index from the two low address lines.
    pub fn from_index(index: u8) -> FdcRegister {
        match index & 0x03 {
            0 => FdcRegister::StatusCommand,
            1 => FdcRegister::Track,
            2 => FdcRegister::Sector,
            _ => FdcRegister::Data,
        }
    }
}

/// A time-driven, register-mapped disk controller.
///
/// Reads may have side effects (reading status acknowledges the interrupt, reading data
/// advances the transfer); the peek variants never do.
pub trait DiskController {
    fn reset(&mut self, time: EmuTime, scheduler: &mut Scheduler);

    fn read_reg(&mut self, reg: FdcRegister, time: EmuTime, scheduler: &mut Scheduler) -> u8;
    fn peek_reg(&self, reg: FdcRegister, time: EmuTime) -> u8;
    fn write_reg(&mut self, reg: FdcRegister, value: u8, time: EmuTime, scheduler: &mut Scheduler);

    /// State of the interrupt request line.
    fn irq(&self, time: EmuTime) -> bool;
    fn peek_irq(&self, time: EmuTime) -> bool;

    /// State of the data request line. Sampling DRQ may complete a format command.
    fn dtrq(&mut self, time: EmuTime) -> bool;
    fn peek_dtrq(&self, time: EmuTime) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn register_index_decode() {
        for (i, reg) in FdcRegister::iter().enumerate() {
            assert_eq!(FdcRegister::from_index(i as u8), reg);
            assert_eq!(FdcRegister::from_index(i as u8 | 0xF8), reg);
        }
    }
}
