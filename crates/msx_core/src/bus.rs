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

    core::bus.rs

    Interfaces for devices mapped into the Z80 address space.

    MSX cartridges and disk interfaces decode addresses within the 64K page
    space of the slot they occupy. Accesses carry the current virtual time so
    a time-driven device can bring itself up to date before responding.
*/

use crate::{emu_time::EmuTime, scheduler::Scheduler};

/// Value returned for reads of unmapped addresses.
pub const NO_MEM_BYTE: u8 = 0xFF;

pub trait MemoryMappedDevice {
    fn mmio_read_u8(&mut self, address: u16, time: EmuTime, scheduler: &mut Scheduler) -> u8;
    /// Read without side effects, for debuggers.
    fn mmio_peek_u8(&self, address: u16, time: EmuTime) -> u8;
    fn mmio_write_u8(&mut self, address: u16, data: u8, time: EmuTime, scheduler: &mut Scheduler);
}
