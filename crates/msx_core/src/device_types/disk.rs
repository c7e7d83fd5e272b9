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

    device_types::disk.rs

    Defines types common to floppy drives, disk images and disk controllers.
*/

use std::{collections::HashMap, fmt};

use lazy_static::lazy_static;
use serde_derive::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};
use thiserror::Error;

/// Size of a standard MSX sector. This is the only sector size the controller transfers.
pub const SECTOR_SIZE: usize = 512;
/// Size of one raw MFM track at 250kbps and 300rpm.
pub const RAWTRACK_SIZE: usize = 6250;
/// Highest head position a drive mechanism can reach.
pub const MAX_DRIVE_TRACK: u8 = 85;

/// A sector ID field as recorded on disk.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorHeader {
    pub track:  u8,
    pub side:   u8,
    pub sector: u8,
    /// Size code N; the sector is 128 << N bytes long.
    pub size:   u8,
}

impl SectorHeader {
    pub fn new(track: u8, side: u8, sector: u8, size: u8) -> Self {
        Self {
            track,
            side,
            sector,
            size,
        }
    }

    pub fn size_bytes(&self) -> usize {
        128 << (self.size & 0x07)
    }

    pub fn as_bytes(&self) -> [u8; 4] {
        [self.track, self.side, self.sector, self.size]
    }
}

impl fmt::Display for SectorHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[c:{} h:{} s:{} n:{}]", self.track, self.side, self.sector, self.size)
    }
}

/// Failures reported by drives and disk images. The controller maps every one of these onto
/// status register bits.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DriveError {
    #[error("No disk in drive")]
    NoDisk,
    #[error("Disk is write protected")]
    WriteProtected,
    #[error("Sector not found: c:{track} h:{side} s:{sector}")]
    SectorNotFound { track: u8, side: u8, sector: u8 },
    #[error("Unsupported disk geometry")]
    BadGeometry,
    #[error("Disk I/O error: {0}")]
    Io(String),
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter)]
pub enum DriveType {
    SingleSided,
    #[default]
    DoubleSided,
}

/// The physical layout of a sector-based disk.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DiskGeometry {
    pub tracks: u8,
    pub sides:  u8,
    pub sectors_per_track: u8,
}

impl DiskGeometry {
    pub const fn new(tracks: u8, sides: u8, sectors_per_track: u8) -> Self {
        Self {
            tracks,
            sides,
            sectors_per_track,
        }
    }

    pub fn total_sectors(&self) -> usize {
        self.tracks as usize * self.sides as usize * self.sectors_per_track as usize
    }

    pub fn size_bytes(&self) -> usize {
        self.total_sectors() * SECTOR_SIZE
    }

    /// Return the logical sector number of the specified physical sector, or None if it is
    /// outside this geometry. Physical sector numbers start at 1.
    pub fn logical_sector(&self, track: u8, side: u8, sector: u8) -> Option<usize> {
        if track >= self.tracks || side >= self.sides || sector == 0 || sector > self.sectors_per_track {
            return None;
        }
        let spt = self.sectors_per_track as usize;
        Some((track as usize * self.sides as usize + side as usize) * spt + (sector as usize - 1))
    }
}

lazy_static! {
    /// Disk geometries recognized from the size of a raw sector image.
    pub static ref DISK_FORMATS: HashMap<usize, DiskGeometry> = HashMap::from([
        (163_840, DiskGeometry::new(40, 1, 8)),
        (184_320, DiskGeometry::new(40, 1, 9)),
        (327_680, DiskGeometry::new(80, 1, 8)),
        (368_640, DiskGeometry::new(80, 1, 9)),
        (655_360, DiskGeometry::new(80, 2, 8)),
        (737_280, DiskGeometry::new(80, 2, 9)),
    ]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logical_sector_numbering() {
        let g = DISK_FORMATS[&737_280];
        assert_eq!(g.size_bytes(), 737_280);
        assert_eq!(g.logical_sector(0, 0, 1), Some(0));
        assert_eq!(g.logical_sector(0, 1, 1), Some(9));
        assert_eq!(g.logical_sector(1, 0, 9), Some(26));
        assert_eq!(g.logical_sector(0, 0, 0), None);
        assert_eq!(g.logical_sector(0, 0, 10), None);
        assert_eq!(g.logical_sector(80, 0, 1), None);
        assert_eq!(DISK_FORMATS[&368_640].logical_sector(0, 1, 1), None);
    }

    #[test]
    fn header_size_code() {
        assert_eq!(SectorHeader::new(0, 0, 1, 2).size_bytes(), 512);
        assert_eq!(SectorHeader::new(0, 0, 1, 0).size_bytes(), 128);
    }
}
