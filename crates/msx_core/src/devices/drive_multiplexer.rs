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

    devices::drive_multiplexer.rs

    Implements the drive select logic of a disk interface. A controller is
    connected to a single DiskDrive; the multiplexer forwards every call to the
    selected drive, or to an empty slot when no drive is selected.
*/

use crate::{
    device_types::disk::{DriveError, SectorHeader},
    devices::disk_drive::{DiskDrive, DummyDrive},
    disk::Disk,
    emu_time::EmuTime,
};

pub const MAX_DRIVES: usize = 4;

pub struct DriveMultiplexer {
    drives: Vec<Box<dyn DiskDrive>>,
    no_drive: DummyDrive,
    selected: Option<usize>,
    side: u8,
    motor: bool,
}

impl DriveMultiplexer {
    /// Create a multiplexer for the given drives. Drives beyond MAX_DRIVES are ignored.
    pub fn new(mut drives: Vec<Box<dyn DiskDrive>>) -> Self {
        if drives.len() > MAX_DRIVES {
            log::warn!("DriveMultiplexer: {} drives configured, using the first {}", drives.len(), MAX_DRIVES);
            drives.truncate(MAX_DRIVES);
        }
        Self {
            drives,
            no_drive: DummyDrive,
            selected: None,
            side: 0,
            motor: false,
        }
    }

    pub fn drive_ct(&self) -> usize {
        self.drives.len()
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    pub fn motor(&self) -> bool {
        self.motor
    }

    pub fn side(&self) -> u8 {
        self.side
    }

    /// Select a drive, or deselect all drives with None. The previously selected drive's motor
    /// is switched off and the new drive inherits the current side and motor state.
    pub fn select_drive(&mut self, drive: Option<usize>, time: EmuTime) {
        let drive = drive.filter(|&n| n < self.drives.len());
        if drive == self.selected {
            return;
        }
        self.active_mut().set_motor(false, time);
        self.selected = drive;
        let (side, motor) = (self.side, self.motor);
        let active = self.active_mut();
        active.set_side(side);
        active.set_motor(motor, time);
        log::trace!("DriveMultiplexer: selected drive {:?}", drive);
    }

    pub fn drive(&self, n: usize) -> Option<&dyn DiskDrive> {
        self.drives.get(n).map(|d| d.as_ref())
    }

    pub fn drive_mut(&mut self, n: usize) -> Option<&mut (dyn DiskDrive + 'static)> {
        self.drives.get_mut(n).map(|d| d.as_mut())
    }

    fn active(&self) -> &dyn DiskDrive {
        match self.selected.and_then(|n| self.drives.get(n)) {
            Some(drive) => drive.as_ref(),
            None => &self.no_drive,
        }
    }

    fn active_mut(&mut self) -> &mut (dyn DiskDrive + 'static) {
        match self.selected {
            Some(n) if n < self.drives.len() => self.drives[n].as_mut(),
            _ => &mut self.no_drive,
        }
    }
}

impl DiskDrive for DriveMultiplexer {
    fn is_disk_inserted(&self) -> bool {
        self.active().is_disk_inserted()
    }
    fn is_write_protected(&self) -> bool {
        self.active().is_write_protected()
    }
    fn is_double_sided(&self) -> bool {
        self.active().is_double_sided()
    }
    fn is_track00(&self) -> bool {
        self.active().is_track00()
    }
    fn set_side(&mut self, side: u8) {
        self.side = side;
        self.active_mut().set_side(side);
    }
    fn step(&mut self, direction_in: bool, time: EmuTime) {
        self.active_mut().step(direction_in, time);
    }
    fn set_motor(&mut self, on: bool, time: EmuTime) {
        self.motor = on;
        self.active_mut().set_motor(on, time);
    }
    fn index_pulse(&self, time: EmuTime) -> bool {
        self.active().index_pulse(time)
    }
    fn index_pulse_count(&self, begin: EmuTime, end: EmuTime) -> u32 {
        self.active().index_pulse_count(begin, end)
    }
    fn time_till_index_pulse(&self, time: EmuTime) -> EmuTime {
        self.active().time_till_index_pulse(time)
    }
    fn time_till_sector(&self, sector: u8, time: EmuTime) -> EmuTime {
        self.active().time_till_sector(sector, time)
    }
    fn set_head_loaded(&mut self, loaded: bool, time: EmuTime) {
        self.active_mut().set_head_loaded(loaded, time);
    }
    fn head_loaded(&self, time: EmuTime) -> bool {
        self.active().head_loaded(time)
    }
    fn read(&mut self, sector: u8, buf: &mut [u8]) -> Result<SectorHeader, DriveError> {
        self.active_mut().read(sector, buf)
    }
    fn write(&mut self, sector: u8, buf: &[u8]) -> Result<SectorHeader, DriveError> {
        self.active_mut().write(sector, buf)
    }
    fn write_track_data(&mut self, raw: &[u8]) -> Result<(), DriveError> {
        self.active_mut().write_track_data(raw)
    }
    fn read_sector_header(&mut self, time: EmuTime) -> Result<SectorHeader, DriveError> {
        self.active_mut().read_sector_header(time)
    }
    fn read_track_data(&mut self, buf: &mut [u8]) -> Result<usize, DriveError> {
        self.active_mut().read_track_data(buf)
    }
    fn disk_changed(&mut self) -> bool {
        self.active_mut().disk_changed()
    }
    fn peek_disk_changed(&self) -> bool {
        self.active().peek_disk_changed()
    }
    fn insert_disk(&mut self, disk: Box<dyn Disk>) -> Result<(), DriveError> {
        self.active_mut().insert_disk(disk)
    }
    fn eject_disk(&mut self) -> Option<Box<dyn Disk>> {
        self.active_mut().eject_disk()
    }
    fn disk(&self) -> Option<&dyn Disk> {
        self.active().disk()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        device_types::disk::{DiskGeometry, SECTOR_SIZE},
        devices::real_drive::RealDrive,
        disk::sector_image::SectorImage,
    };

    fn mux() -> DriveMultiplexer {
        let mut a = RealDrive::default();
        a.insert_disk(Box::new(SectorImage::blank(DiskGeometry::new(80, 2, 9), 0xAA)))
            .unwrap();
        let mut b = RealDrive::default();
        b.insert_disk(Box::new(SectorImage::blank(DiskGeometry::new(80, 2, 9), 0xBB)))
            .unwrap();
        DriveMultiplexer::new(vec![Box::new(a), Box::new(b)])
    }

    #[test]
    fn no_selection_behaves_as_empty_slot() {
        let mut m = mux();
        assert!(!m.is_disk_inserted());
        assert!(m.is_track00());
        let mut buf = [0; SECTOR_SIZE];
        assert_eq!(m.read(1, &mut buf), Err(DriveError::NoDisk));
    }

    #[test]
    fn forwards_to_selected_drive() {
        let mut m = mux();
        let mut buf = [0; SECTOR_SIZE];
        m.select_drive(Some(1), EmuTime::ZERO);
        m.read(1, &mut buf).unwrap();
        assert_eq!(buf[0], 0xBB);
        m.step(true, EmuTime::ZERO);

        m.select_drive(Some(0), EmuTime::ZERO);
        m.read(1, &mut buf).unwrap();
        assert_eq!(buf[0], 0xAA);
        assert!(m.is_track00());
        assert!(!m.drive(1).unwrap().is_track00());

        // Out of range selections deselect.
        m.select_drive(Some(3), EmuTime::ZERO);
        assert_eq!(m.selected(), None);
    }

    #[test]
    fn motor_and_side_follow_selection() {
        let mut m = mux();
        m.set_motor(true, EmuTime::ZERO);
        m.set_side(1);
        m.select_drive(Some(0), EmuTime::ZERO);
        assert!(m.time_till_index_pulse(EmuTime::ZERO) != EmuTime::INFINITY);
        assert_eq!(m.write(2, &[1; SECTOR_SIZE]).unwrap().side, 1);

        m.select_drive(Some(1), EmuTime::ZERO);
        m.select_drive(Some(0), EmuTime::ZERO);
        assert!(m.motor());
    }
}
