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

    devices::disk_drive.rs

    Defines the DiskDrive trait, the interface a disk controller uses to
    operate a drive mechanism, and DummyDrive, an empty drive slot.
*/

use std::{cell::RefCell, rc::Rc};

use crate::{
    device_types::disk::{DriveError, SectorHeader},
    disk::Disk,
    emu_time::EmuTime,
};

/// A drive as seen by a controller. Sector and track operations act on the current head
/// position and side.
pub trait DiskDrive {
    fn is_disk_inserted(&self) -> bool;
    fn is_write_protected(&self) -> bool;
    fn is_double_sided(&self) -> bool;
    fn is_track00(&self) -> bool;

    fn set_side(&mut self, side: u8);
    fn step(&mut self, direction_in: bool, time: EmuTime);
    fn set_motor(&mut self, on: bool, time: EmuTime);

    /// Is the index hole under the sensor at `time`?
    fn index_pulse(&self, time: EmuTime) -> bool;
    /// Return the number of index pulses that begin after `begin` and no later than `end`.
    fn index_pulse_count(&self, begin: EmuTime, end: EmuTime) -> u32;
    /// Return the time of the next index pulse after `time`, or EmuTime::INFINITY if the disk
    /// is not rotating.
    fn time_till_index_pulse(&self, time: EmuTime) -> EmuTime;
    /// Return the time at which `sector` next arrives under the head.
    fn time_till_sector(&self, sector: u8, time: EmuTime) -> EmuTime;

    fn set_head_loaded(&mut self, loaded: bool, time: EmuTime);
    fn head_loaded(&self, time: EmuTime) -> bool;

    fn read(&mut self, sector: u8, buf: &mut [u8]) -> Result<SectorHeader, DriveError>;
    fn write(&mut self, sector: u8, buf: &[u8]) -> Result<SectorHeader, DriveError>;
    fn write_track_data(&mut self, raw: &[u8]) -> Result<(), DriveError>;

    /// Return the next ID field to pass under the head after `time`.
    fn read_sector_header(&mut self, time: EmuTime) -> Result<SectorHeader, DriveError>;
    /// Read the raw contents of the current track into `buf`.
    fn read_track_data(&mut self, buf: &mut [u8]) -> Result<usize, DriveError>;

    /// Return whether the disk was changed since the last call, and clear the flag.
    fn disk_changed(&mut self) -> bool;
    fn peek_disk_changed(&self) -> bool;

    fn insert_disk(&mut self, _disk: Box<dyn Disk>) -> Result<(), DriveError> {
        Err(DriveError::Io("no drive connected".to_string()))
    }

    fn eject_disk(&mut self) -> Option<Box<dyn Disk>> {
        None
    }

    fn disk(&self) -> Option<&dyn Disk> {
        None
    }
}

pub type SharedDrive = Rc<RefCell<dyn DiskDrive>>;

/// An empty drive slot. There is never a disk and every access fails.
#[derive(Default)]
pub struct DummyDrive;

impl DiskDrive for DummyDrive {
    fn is_disk_inserted(&self) -> bool {
        false
    }
    fn is_write_protected(&self) -> bool {
        true
    }
    fn is_double_sided(&self) -> bool {
        false
    }
    fn is_track00(&self) -> bool {
        // Restore must terminate even with no drive attached.
        true
    }
    fn set_side(&mut self, _side: u8) {}
    fn step(&mut self, _direction_in: bool, _time: EmuTime) {}
    fn set_motor(&mut self, _on: bool, _time: EmuTime) {}
    fn index_pulse(&self, _time: EmuTime) -> bool {
        false
    }
    fn index_pulse_count(&self, _begin: EmuTime, _end: EmuTime) -> u32 {
        0
    }
    fn time_till_index_pulse(&self, _time: EmuTime) -> EmuTime {
        EmuTime::INFINITY
    }
    fn time_till_sector(&self, _sector: u8, time: EmuTime) -> EmuTime {
        time
    }
    fn set_head_loaded(&mut self, _loaded: bool, _time: EmuTime) {}
    fn head_loaded(&self, _time: EmuTime) -> bool {
        false
    }
    fn read(&mut self, _sector: u8, _buf: &mut [u8]) -> Result<SectorHeader, DriveError> {
        Err(DriveError::NoDisk)
    }
    fn write(&mut self, _sector: u8, _buf: &[u8]) -> Result<SectorHeader, DriveError> {
        Err(DriveError::NoDisk)
    }
    fn write_track_data(&mut self, _raw: &[u8]) -> Result<(), DriveError> {
        Err(DriveError::NoDisk)
    }
    fn read_sector_header(&mut self, _time: EmuTime) -> Result<SectorHeader, DriveError> {
        Err(DriveError::NoDisk)
    }
    fn read_track_data(&mut self, _buf: &mut [u8]) -> Result<usize, DriveError> {
        Err(DriveError::NoDisk)
    }
    fn disk_changed(&mut self) -> bool {
        false
    }
    fn peek_disk_changed(&self) -> bool {
        false
    }
}

/// A scriptable drive that records what the controller asks of it.
#[cfg(test)]
pub mod mock {
    use super::*;
    use crate::{device_types::disk::SECTOR_SIZE, emu_time::EmuDuration};

    #[derive(Clone, Debug, PartialEq)]
    pub enum MockCall {
        Step(bool),
        HeadLoaded(bool),
        Read(u8),
        Write(u8, Vec<u8>),
        WriteTrack(Vec<u8>),
    }

    pub struct MockDrive {
        pub disk_inserted: bool,
        pub write_protected: bool,
        pub track: u8,
        pub side: u8,
        /// Track number reported in ID fields, if different from the head position.
        pub id_track: Option<u8>,
        pub sectors_per_track: u8,
        pub fail_io: bool,
        pub head_loaded: bool,
        pub rotation: EmuDuration,
        pub calls: Vec<MockCall>,
    }

    impl Default for MockDrive {
        fn default() -> Self {
            Self {
                disk_inserted: true,
                write_protected: false,
                track: 0,
                side: 0,
                id_track: None,
                sectors_per_track: 9,
                fail_io: false,
                head_loaded: false,
                rotation: EmuDuration::from_millis(200),
                calls: Vec::new(),
            }
        }
    }

    impl MockDrive {
        pub fn shared(self) -> Rc<RefCell<MockDrive>> {
            Rc::new(RefCell::new(self))
        }

        /// The byte pattern returned for a sector read.
        pub fn sector_pattern(sector: u8) -> Vec<u8> {
            (0..SECTOR_SIZE).map(|i| (i as u8).wrapping_add(sector)).collect()
        }

        pub fn steps(&self) -> usize {
            self.calls.iter().filter(|c| matches!(c, MockCall::Step(_))).count()
        }

        fn rev(&self, time: EmuTime) -> u64 {
            time.ticks() / self.rotation.ticks() as u64
        }

        fn header(&self, sector: u8) -> SectorHeader {
            SectorHeader::new(self.id_track.unwrap_or(self.track), self.side, sector, 2)
        }

        fn check(&self, sector: u8) -> Result<(), DriveError> {
            if !self.disk_inserted {
                return Err(DriveError::NoDisk);
            }
            if self.fail_io || sector == 0 || sector > self.sectors_per_track {
                return Err(DriveError::SectorNotFound {
                    track: self.track,
                    side: self.side,
                    sector,
                });
            }
            Ok(())
        }
    }

    impl DiskDrive for MockDrive {
        fn is_disk_inserted(&self) -> bool {
            self.disk_inserted
        }
        fn is_write_protected(&self) -> bool {
            self.write_protected
        }
        fn is_double_sided(&self) -> bool {
            true
        }
        fn is_track00(&self) -> bool {
            self.track == 0
        }
        fn set_side(&mut self, side: u8) {
            self.side = side;
        }
        fn step(&mut self, direction_in: bool, _time: EmuTime) {
            self.calls.push(MockCall::Step(direction_in));
            if direction_in {
                self.track = self.track.saturating_add(1);
            }
            else {
                self.track = self.track.saturating_sub(1);
            }
        }
        fn set_motor(&mut self, _on: bool, _time: EmuTime) {}
        fn index_pulse(&self, time: EmuTime) -> bool {
            self.disk_inserted && (time.ticks() % self.rotation.ticks() as u64) < self.rotation.ticks() as u64 / 50
        }
        fn index_pulse_count(&self, begin: EmuTime, end: EmuTime) -> u32 {
            if !self.disk_inserted || end <= begin {
                return 0;
            }
            (self.rev(end) - self.rev(begin)) as u32
        }
        fn time_till_index_pulse(&self, time: EmuTime) -> EmuTime {
            if !self.disk_inserted {
                return EmuTime::INFINITY;
            }
            EmuTime::from_ticks((self.rev(time) + 1) * self.rotation.ticks() as u64)
        }
        fn time_till_sector(&self, sector: u8, time: EmuTime) -> EmuTime {
            time + EmuDuration::from_millis(sector as u64)
        }
        fn set_head_loaded(&mut self, loaded: bool, _time: EmuTime) {
            self.calls.push(MockCall::HeadLoaded(loaded));
            self.head_loaded = loaded;
        }
        fn head_loaded(&self, _time: EmuTime) -> bool {
            self.head_loaded
        }
        fn read(&mut self, sector: u8, buf: &mut [u8]) -> Result<SectorHeader, DriveError> {
            self.calls.push(MockCall::Read(sector));
            self.check(sector)?;
            buf[..SECTOR_SIZE].copy_from_slice(&Self::sector_pattern(sector));
            Ok(self.header(sector))
        }
        fn write(&mut self, sector: u8, buf: &[u8]) -> Result<SectorHeader, DriveError> {
            self.calls.push(MockCall::Write(sector, buf.to_vec()));
            self.check(sector)?;
            if self.write_protected {
                return Err(DriveError::WriteProtected);
            }
            Ok(self.header(sector))
        }
        fn write_track_data(&mut self, raw: &[u8]) -> Result<(), DriveError> {
            self.calls.push(MockCall::WriteTrack(raw.to_vec()));
            if self.fail_io {
                return Err(DriveError::Io("format failed".to_string()));
            }
            Ok(())
        }
        fn read_sector_header(&mut self, _time: EmuTime) -> Result<SectorHeader, DriveError> {
            self.check(1)?;
            Ok(self.header(1))
        }
        fn read_track_data(&mut self, buf: &mut [u8]) -> Result<usize, DriveError> {
            self.check(1)?;
            for (i, b) in buf.iter_mut().enumerate() {
                *b = i as u8;
            }
            Ok(buf.len())
        }
        fn disk_changed(&mut self) -> bool {
            false
        }
        fn peek_disk_changed(&self) -> bool {
            false
        }
    }
}
