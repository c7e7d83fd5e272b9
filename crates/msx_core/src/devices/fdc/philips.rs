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

    devices::fdc::philips.rs

    Implements the Philips style MSX disk interface: a WD2793 with up to two
    drives, mapped at the top of page 1 (mirrored in page 0) of its slot.

    Register map (offset from 0x7FF8):
      0  status (read) / command (write)
      1  track
      2  sector
      3  data
      4  side select, bit 0
      5  drive select (bits 0-1: 0,2 = A, 1 = B, 3 = none), motor (bit 7)
      7  read only: bit 6 = !INTRQ, bit 7 = !DRQ
*/

use std::{cell::RefCell, rc::Rc};

use crate::{
    bus::{MemoryMappedDevice, NO_MEM_BYTE},
    device_traits::disk_controller::{DiskController, FdcRegister},
    devices::{disk_drive::DiskDrive, drive_multiplexer::DriveMultiplexer, fdc::wd2793::Wd2793},
    emu_time::EmuTime,
    scheduler::Scheduler,
};

pub const PHILIPS_ROM_BASE: usize = 0x4000;
pub const PHILIPS_ROM_SIZE: usize = 0x4000;
pub const PHILIPS_REG_BASE: u16 = 0x7FF8;

pub const REG_SIDE: u8 = 4;
pub const REG_DRIVE: u8 = 5;
pub const REG_LINES: u8 = 7;

pub const DRIVE_MOTOR: u8 = 0x80;
pub const LINE_NOT_INTRQ: u8 = 0x40;
pub const LINE_NOT_DRQ: u8 = 0x80;

pub struct PhilipsFdc {
    controller: Rc<RefCell<Wd2793>>,
    multiplexer: Rc<RefCell<DriveMultiplexer>>,
    rom: Vec<u8>,
    side_reg: u8,
    drive_reg: u8,
}

impl PhilipsFdc {
    pub fn new(
        scheduler: &mut Scheduler,
        drives: Vec<Box<dyn DiskDrive>>,
        rom: Option<Vec<u8>>,
        time: EmuTime,
    ) -> Self {
        let multiplexer = Rc::new(RefCell::new(DriveMultiplexer::new(drives)));
        let drive = multiplexer.clone();
        let controller = scheduler.register("wd2793", |sync| Wd2793::new(sync, drive, time));

        let mut rom = rom.unwrap_or_default();
        if !rom.is_empty() && rom.len() != PHILIPS_ROM_SIZE {
            log::warn!("PhilipsFdc: disk ROM is {} bytes, expected {}", rom.len(), PHILIPS_ROM_SIZE);
            rom.resize(PHILIPS_ROM_SIZE, NO_MEM_BYTE);
        }

        let mut fdc = Self {
            controller,
            multiplexer,
            rom,
            side_reg: 0,
            drive_reg: 0x03,
        };
        fdc.reset(time, scheduler);
        fdc
    }

    pub fn controller(&self) -> &Rc<RefCell<Wd2793>> {
        &self.controller
    }

    pub fn multiplexer(&self) -> &Rc<RefCell<DriveMultiplexer>> {
        &self.multiplexer
    }

    /// Deselect all drives, stop the motor and reset the controller.
    pub fn reset(&mut self, time: EmuTime, scheduler: &mut Scheduler) {
        self.write_reg(REG_SIDE, 0, time, scheduler);
        self.write_reg(REG_DRIVE, 0x03, time, scheduler);
        self.controller.borrow_mut().reset(time, scheduler);
    }

    /// Return the register offset of `address`, if it falls in the register window of page 0
    /// or page 1.
    fn reg_offset(address: u16) -> Option<u8> {
        let a = address & 0x3FFF;
        if a >= (PHILIPS_REG_BASE & 0x3FFF) && address < 0x8000 {
            Some((a & 0x07) as u8)
        }
        else {
            None
        }
    }

    fn rom_byte(&self, address: u16) -> u8 {
        let a = address as usize;
        if (PHILIPS_ROM_BASE..PHILIPS_ROM_BASE + PHILIPS_ROM_SIZE).contains(&a) && !self.rom.is_empty() {
            self.rom[a - PHILIPS_ROM_BASE]
        }
        else {
            NO_MEM_BYTE
        }
    }

    fn read_reg(&mut self, offset: u8, time: EmuTime, scheduler: &mut Scheduler) -> u8 {
        match offset {
            0..=3 => self
                .controller
                .borrow_mut()
                .read_reg(FdcRegister::from_index(offset), time, scheduler),
            REG_SIDE => 0xFE | self.side_reg,
            REG_DRIVE => (self.drive_reg & 0x83) | 0x7C,
            REG_LINES => {
                let mut fdc = self.controller.borrow_mut();
                let mut value = NO_MEM_BYTE;
                // Sampling DRQ may end a write track, which raises INTRQ.
                if fdc.dtrq(time) {
                    value &= !LINE_NOT_DRQ;
                }
                if fdc.irq(time) {
                    value &= !LINE_NOT_INTRQ;
                }
                value
            }
            _ => NO_MEM_BYTE,
        }
    }

    fn peek_reg(&self, offset: u8, time: EmuTime) -> u8 {
        match offset {
            0..=3 => self.controller.borrow().peek_reg(FdcRegister::from_index(offset), time),
            REG_SIDE => 0xFE | self.side_reg,
            REG_DRIVE => (self.drive_reg & 0x83) | 0x7C,
            REG_LINES => {
                let fdc = self.controller.borrow();
                let mut value = NO_MEM_BYTE;
                if DiskController::peek_irq(&*fdc, time) {
                    value &= !LINE_NOT_INTRQ;
                }
                if DiskController::peek_dtrq(&*fdc, time) {
                    value &= !LINE_NOT_DRQ;
                }
                value
            }
            _ => NO_MEM_BYTE,
        }
    }

    fn write_reg(&mut self, offset: u8, data: u8, time: EmuTime, scheduler: &mut Scheduler) {
        match offset {
            0..=3 => self
                .controller
                .borrow_mut()
                .write_reg(FdcRegister::from_index(offset), data, time, scheduler),
            REG_SIDE => {
                self.side_reg = data & 0x01;
                self.multiplexer.borrow_mut().set_side(self.side_reg);
            }
            REG_DRIVE => {
                self.drive_reg = data;
                let drive = match data & 0x03 {
                    0 | 2 => Some(0),
                    1 => Some(1),
                    _ => None,
                };
                let mut mux = self.multiplexer.borrow_mut();
                mux.select_drive(drive, time);
                mux.set_motor(data & DRIVE_MOTOR != 0, time);
            }
            _ => {}
        }
    }
}

impl MemoryMappedDevice for PhilipsFdc {
    fn mmio_read_u8(&mut self, address: u16, time: EmuTime, scheduler: &mut Scheduler) -> u8 {
        match Self::reg_offset(address) {
            Some(offset) => self.read_reg(offset, time, scheduler),
            None => self.rom_byte(address),
        }
    }

    fn mmio_peek_u8(&self, address: u16, time: EmuTime) -> u8 {
        match Self::reg_offset(address) {
            Some(offset) => self.peek_reg(offset, time),
            None => self.rom_byte(address),
        }
    }

    fn mmio_write_u8(&mut self, address: u16, data: u8, time: EmuTime, scheduler: &mut Scheduler) {
        if let Some(offset) = Self::reg_offset(address) {
            self.write_reg(offset, data, time, scheduler);
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        device_types::disk::DiskGeometry,
        devices::real_drive::RealDrive,
        disk::sector_image::SectorImage,
        emu_time::EmuDuration,
    };

    fn interface(s: &mut Scheduler) -> PhilipsFdc {
        let mut a = RealDrive::default();
        a.insert_disk(Box::new(SectorImage::blank(DiskGeometry::new(80, 2, 9), 0)))
            .unwrap();
        let mut rom = vec![0u8; PHILIPS_ROM_SIZE];
        rom[0] = b'A';
        rom[1] = b'B';
        PhilipsFdc::new(s, vec![Box::new(a), Box::new(RealDrive::default())], Some(rom), EmuTime::ZERO)
    }

    #[test]
    fn register_window_and_rom() {
        assert_eq!(PhilipsFdc::reg_offset(0x7FF8), Some(0));
        assert_eq!(PhilipsFdc::reg_offset(0x7FFF), Some(7));
        assert_eq!(PhilipsFdc::reg_offset(0x3FFB), Some(3));
        assert_eq!(PhilipsFdc::reg_offset(0x7FF7), None);
        assert_eq!(PhilipsFdc::reg_offset(0xBFF8), None);

        let mut s = Scheduler::new();
        let fdc = interface(&mut s);
        assert_eq!(fdc.mmio_peek_u8(0x4000, EmuTime::ZERO), b'A');
        assert_eq!(fdc.mmio_peek_u8(0x4001, EmuTime::ZERO), b'B');
        assert_eq!(fdc.mmio_peek_u8(0x8000, EmuTime::ZERO), NO_MEM_BYTE);
    }

    #[test]
    fn drive_select_and_lines() {
        let mut s = Scheduler::new();
        let mut fdc = interface(&mut s);
        let t = EmuTime::ZERO;

        // Reset leaves the restore's completion interrupt pending.
        assert_eq!(fdc.mmio_peek_u8(0x7FFF, t) & LINE_NOT_INTRQ, 0);
        fdc.mmio_read_u8(0x7FF8, t, &mut s);
        assert_eq!(fdc.mmio_peek_u8(0x7FFF, t), 0xFF);

        fdc.mmio_write_u8(0x7FFD, DRIVE_MOTOR | 0x01, t, &mut s);
        assert_eq!(fdc.multiplexer().borrow().selected(), Some(1));
        assert!(fdc.multiplexer().borrow().motor());
        assert_eq!(fdc.mmio_peek_u8(0x7FFD, t), 0xFD);

        fdc.mmio_write_u8(0x7FFD, 0x03, t, &mut s);
        assert_eq!(fdc.multiplexer().borrow().selected(), None);

        fdc.mmio_write_u8(0x7FFC, 0xFF, t, &mut s);
        assert_eq!(fdc.multiplexer().borrow().side(), 1);
        assert_eq!(fdc.mmio_peek_u8(0x7FFC, t), 0xFF);

        fdc.mmio_write_u8(0x7FF9, 0x12, t, &mut s);
        fdc.mmio_write_u8(0x7FFA, 0x05, t, &mut s);
        assert_eq!(fdc.mmio_read_u8(0x7FF9, t, &mut s), 0x12);
        assert_eq!(fdc.mmio_read_u8(0x3FFA, t, &mut s), 0x05);

        // Force interrupt, immediate.
        fdc.mmio_write_u8(0x7FF8, 0xD8, t + EmuDuration::from_millis(1), &mut s);
        assert_eq!(fdc.mmio_peek_u8(0x7FFF, t) & LINE_NOT_INTRQ, 0);
    }

    #[test]
    fn reset_deselects_drives() {
        let mut s = Scheduler::new();
        let mut fdc = interface(&mut s);
        assert_eq!(fdc.multiplexer().borrow().selected(), None);
        assert!(!fdc.multiplexer().borrow().motor());

        let t = EmuTime::ZERO + EmuDuration::from_millis(5);
        fdc.mmio_write_u8(0x7FFD, DRIVE_MOTOR, t, &mut s);
        fdc.mmio_write_u8(0x7FFC, 0x01, t, &mut s);
        assert_eq!(fdc.multiplexer().borrow().selected(), Some(0));

        fdc.reset(t, &mut s);
        assert_eq!(fdc.multiplexer().borrow().selected(), None);
        assert!(!fdc.multiplexer().borrow().motor());
        assert_eq!(fdc.multiplexer().borrow().side(), 0);
        assert_eq!(fdc.mmio_peek_u8(0x7FFD, t), 0x7F);
        assert_eq!(fdc.mmio_peek_u8(0x7FFC, t), 0xFE);
    }

    #[test]
    fn lines_read_ending_write_track_reports_intrq() {
        let mut s = Scheduler::new();
        let mut fdc = interface(&mut s);
        let ms = |n: u64| EmuTime::ZERO + EmuDuration::from_millis(n);

        fdc.mmio_write_u8(0x7FFD, DRIVE_MOTOR, EmuTime::ZERO, &mut s);
        fdc.mmio_write_u8(0x7FF8, 0xF0, ms(1), &mut s);
        s.run_until(ms(10));
        let lines = fdc.mmio_read_u8(0x7FFF, ms(10), &mut s);
        assert_eq!(lines & LINE_NOT_DRQ, 0);
        assert_eq!(lines & LINE_NOT_INTRQ, LINE_NOT_INTRQ);

        // Index pulses at 200 ms and 400 ms; the second one ends the command.
        s.run_until(ms(450));
        let lines = fdc.mmio_read_u8(0x7FFF, ms(450), &mut s);
        assert_eq!(lines & LINE_NOT_INTRQ, 0);
        assert_eq!(lines & LINE_NOT_DRQ, LINE_NOT_DRQ);
    }
}
