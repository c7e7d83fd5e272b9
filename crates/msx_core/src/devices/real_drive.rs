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

    devices::real_drive.rs

    Implements a mechanical floppy drive: head positioning, spindle rotation
    with an index pulse and angular sector positions, and head load timing.
    Sector and track access is delegated to the inserted Disk.
*/

use crate::{
    device_types::disk::{DriveError, DriveType, SectorHeader, MAX_DRIVE_TRACK},
    devices::disk_drive::DiskDrive,
    disk::Disk,
    emu_time::{EmuDuration, EmuTime},
};

pub const DEFAULT_RPM: u32 = 300;
/// Time after loading before the head is considered settled on the media.
pub const DEFAULT_HEAD_LOAD_MS: u64 = 10;
/// The index pulse lasts this fraction of a revolution.
const INDEX_WINDOW_DIVISOR: i64 = 50;

pub struct RealDrive {
    drive_type: DriveType,
    disk: Option<Box<dyn Disk>>,
    head_pos: u8,
    side: u8,
    motor_on: bool,
    motor_start: EmuTime,
    head_loaded: bool,
    head_load_start: EmuTime,
    head_load_delay: EmuDuration,
    rotation: EmuDuration,
    disk_changed: bool,
}

impl Default for RealDrive {
    fn default() -> Self {
        Self::new(DriveType::DoubleSided, DEFAULT_RPM, EmuDuration::from_millis(DEFAULT_HEAD_LOAD_MS))
    }
}

impl RealDrive {
    pub fn new(drive_type: DriveType, rpm: u32, head_load_delay: EmuDuration) -> Self {
        let rpm = if rpm == 0 {
            log::warn!("RealDrive: invalid rotation speed 0, using {} rpm", DEFAULT_RPM);
            DEFAULT_RPM
        }
        else {
            rpm
        };
        Self {
            drive_type,
            disk: None,
            head_pos: 0,
            side: 0,
            motor_on: false,
            motor_start: EmuTime::ZERO,
            head_loaded: false,
            head_load_start: EmuTime::ZERO,
            head_load_delay,
            rotation: EmuDuration::from_units(60, rpm as u64),
            disk_changed: false,
        }
    }

    pub fn drive_type(&self) -> DriveType {
        self.drive_type
    }

    pub fn head_position(&self) -> u8 {
        self.head_pos
    }

    pub fn side(&self) -> u8 {
        self.side
    }

    pub fn motor_on(&self) -> bool {
        self.motor_on
    }

    pub fn rotation(&self) -> EmuDuration {
        self.rotation
    }

    pub fn disk_mut(&mut self) -> Option<&mut (dyn Disk + 'static)> {
        self.disk.as_deref_mut()
    }

    fn spinning(&self) -> bool {
        self.motor_on && self.disk.is_some()
    }

    /// Ticks since the last index pulse.
    fn angle(&self, time: EmuTime) -> i64 {
        let elapsed = (time - self.motor_start).ticks().max(0);
        elapsed % self.rotation.ticks()
    }

    fn revolutions(&self, time: EmuTime) -> i64 {
        let elapsed = (time - self.motor_start).ticks().max(0);
        elapsed / self.rotation.ticks()
    }

    fn sectors_per_track(&self) -> i64 {
        self.disk
            .as_ref()
            .map(|d| d.geometry().sectors_per_track.max(1) as i64)
            .unwrap_or(1)
    }

    /// Angular position of the n'th sector of a track, counted from the index pulse.
    fn sector_angle(&self, n: i64) -> i64 {
        let window = self.rotation.ticks() / INDEX_WINDOW_DIVISOR;
        let spt = self.sectors_per_track();
        window + ((self.rotation.ticks() - window) * (n % spt)) / spt
    }

    fn active_side(&self) -> u8 {
        match self.drive_type {
            DriveType::SingleSided => 0,
            DriveType::DoubleSided => self.side,
        }
    }

    fn disk_or_err(&self) -> Result<&dyn Disk, DriveError> {
        self.disk.as_deref().ok_or(DriveError::NoDisk)
    }
}

impl DiskDrive for RealDrive {
    fn is_disk_inserted(&self) -> bool {
        self.disk.is_some()
    }

    fn is_write_protected(&self) -> bool {
        self.disk.as_ref().map(|d| d.is_write_protected()).unwrap_or(true)
    }

    fn is_double_sided(&self) -> bool {
        matches!(self.drive_type, DriveType::DoubleSided)
    }

    fn is_track00(&self) -> bool {
        self.head_pos == 0
    }

    fn set_side(&mut self, side: u8) {
        self.side = side & 0x01;
    }

    fn step(&mut self, direction_in: bool, _time: EmuTime) {
        if direction_in {
            if self.head_pos < MAX_DRIVE_TRACK {
                self.head_pos += 1;
            }
        }
        else if self.head_pos > 0 {
            self.head_pos -= 1;
        }
        log::trace!("RealDrive: step {} to track {}", if direction_in { "in" } else { "out" }, self.head_pos);
    }

    fn set_motor(&mut self, on: bool, time: EmuTime) {
        if on && !self.motor_on {
            self.motor_start = time;
        }
        self.motor_on = on;
    }

    fn index_pulse(&self, time: EmuTime) -> bool {
        self.spinning() && self.angle(time) < self.rotation.ticks() / INDEX_WINDOW_DIVISOR
    }

    fn index_pulse_count(&self, begin: EmuTime, end: EmuTime) -> u32 {
        if !self.spinning() || end <= begin {
            return 0;
        }
        (self.revolutions(end) - self.revolutions(begin)) as u32
    }

    fn time_till_index_pulse(&self, time: EmuTime) -> EmuTime {
        if !self.spinning() {
            return EmuTime::INFINITY;
        }
        let base = self.motor_start.max(time);
        base + EmuDuration::from_ticks(self.rotation.ticks() - self.angle(base))
    }

    fn time_till_sector(&self, sector: u8, time: EmuTime) -> EmuTime {
        if !self.spinning() {
            return time;
        }
        let target = self.sector_angle(sector.saturating_sub(1) as i64);
        let mut delta = target - self.angle(time);
        if delta < 0 {
            delta += self.rotation.ticks();
        }
        time + EmuDuration::from_ticks(delta)
    }

    fn set_head_loaded(&mut self, loaded: bool, time: EmuTime) {
        if loaded && !self.head_loaded {
            self.head_load_start = time;
        }
        self.head_loaded = loaded;
    }

    fn head_loaded(&self, time: EmuTime) -> bool {
        self.head_loaded && (time - self.head_load_start) >= self.head_load_delay
    }

    fn read(&mut self, sector: u8, buf: &mut [u8]) -> Result<SectorHeader, DriveError> {
        let side = self.active_side();
        self.disk_or_err()?.read_sector(self.head_pos, side, sector, buf)
    }

    fn write(&mut self, sector: u8, buf: &[u8]) -> Result<SectorHeader, DriveError> {
        let (track, side) = (self.head_pos, self.active_side());
        let disk = self.disk.as_deref_mut().ok_or(DriveError::NoDisk)?;
        if disk.is_write_protected() {
            return Err(DriveError::WriteProtected);
        }
        disk.write_sector(track, side, sector, buf)
    }

    fn write_track_data(&mut self, raw: &[u8]) -> Result<(), DriveError> {
        let (track, side) = (self.head_pos, self.active_side());
        let disk = self.disk.as_deref_mut().ok_or(DriveError::NoDisk)?;
        let written = disk.write_track(track, side, raw)?;
        log::debug!("RealDrive: formatted track {} side {}: {} sectors", track, side, written);
        Ok(())
    }

    fn read_sector_header(&mut self, time: EmuTime) -> Result<SectorHeader, DriveError> {
        let (track, side) = (self.head_pos, self.active_side());
        let disk = self.disk_or_err()?;
        let spt = self.sectors_per_track();
        let n = if self.motor_on {
            let angle = self.angle(time);
            (0..spt).find(|&n| self.sector_angle(n) >= angle).unwrap_or(0)
        }
        else {
            0
        };
        disk.sector_header(track, side, n as usize)
            .ok_or(DriveError::SectorNotFound { track, side, sector: 0 })
    }

    fn read_track_data(&mut self, buf: &mut [u8]) -> Result<usize, DriveError> {
        let side = self.active_side();
        self.disk_or_err()?.read_track(self.head_pos, side, buf)
    }

    fn disk_changed(&mut self) -> bool {
        std::mem::replace(&mut self.disk_changed, false)
    }

    fn peek_disk_changed(&self) -> bool {
        self.disk_changed
    }

    fn insert_disk(&mut self, disk: Box<dyn Disk>) -> Result<(), DriveError> {
        let g = disk.geometry();
        if g.sides > 1 && !self.is_double_sided() {
            log::warn!("RealDrive: double sided disk in single sided drive; only side 0 is accessible");
        }
        self.disk = Some(disk);
        self.disk_changed = true;
        Ok(())
    }

    fn eject_disk(&mut self) -> Option<Box<dyn Disk>> {
        let disk = self.disk.take();
        if disk.is_some() {
            self.disk_changed = true;
        }
        disk
    }

    fn disk(&self) -> Option<&dyn Disk> {
        self.disk.as_deref()
    }
}
