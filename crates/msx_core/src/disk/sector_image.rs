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

    disk::sector_image.rs

    Implements a raw sector image (.dsk) held in memory.
*/

use std::{fs, path::Path};

use anyhow::{anyhow, Error};

use crate::{
    device_types::disk::{DiskGeometry, DriveError, SectorHeader, DISK_FORMATS, SECTOR_SIZE},
    disk::Disk,
};

pub struct SectorImage {
    geometry: DiskGeometry,
    data: Vec<u8>,
    write_protected: bool,
}

impl SectorImage {
    /// Create a blank image filled with `fill`.
    pub fn blank(geometry: DiskGeometry, fill: u8) -> Self {
        Self {
            geometry,
            data: vec![fill; geometry.size_bytes()],
            write_protected: false,
        }
    }

    /// Create an image from raw sector data. The geometry is determined from the size of the data.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, DriveError> {
        let geometry = *DISK_FORMATS.get(&data.len()).ok_or(DriveError::BadGeometry)?;
        log::debug!(
            "SectorImage: {} bytes, {} tracks, {} sides, {} sectors per track",
            data.len(),
            geometry.tracks,
            geometry.sides,
            geometry.sectors_per_track
        );
        Ok(Self {
            geometry,
            data,
            write_protected: false,
        })
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let data = fs::read(path).map_err(|e| anyhow!("Couldn't read image {}: {}", path.display(), e))?;
        let image = Self::from_bytes(data).map_err(|e| anyhow!("Couldn't load image {}: {}", path.display(), e))?;
        Ok(image)
    }

    pub fn save(&self, path: &Path) -> Result<(), Error> {
        fs::write(path, &self.data).map_err(|e| anyhow!("Couldn't write image {}: {}", path.display(), e))?;
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    fn offset(&self, track: u8, side: u8, sector: u8) -> Result<usize, DriveError> {
        self.geometry
            .logical_sector(track, side, sector)
            .map(|ls| ls * SECTOR_SIZE)
            .ok_or(DriveError::SectorNotFound { track, side, sector })
    }
}

impl Disk for SectorImage {
    fn geometry(&self) -> DiskGeometry {
        self.geometry
    }

    fn is_write_protected(&self) -> bool {
        self.write_protected
    }

    fn set_write_protected(&mut self, protect: bool) {
        self.write_protected = protect;
    }

    fn image_data(&self) -> Option<&[u8]> {
        Some(&self.data)
    }

    fn read_sector(&self, track: u8, side: u8, sector: u8, buf: &mut [u8]) -> Result<SectorHeader, DriveError> {
        let offset = self.offset(track, side, sector)?;
        let len = buf.len().min(SECTOR_SIZE);
        buf[..len].copy_from_slice(&self.data[offset..offset + len]);
        Ok(SectorHeader::new(track, side, sector, 2))
    }

    fn write_sector(&mut self, track: u8, side: u8, sector: u8, buf: &[u8]) -> Result<SectorHeader, DriveError> {
        if self.write_protected {
            return Err(DriveError::WriteProtected);
        }
        let offset = self.offset(track, side, sector)?;
        if buf.len() != SECTOR_SIZE {
            return Err(DriveError::Io(format!("bad sector length {}", buf.len())));
        }
        self.data[offset..offset + SECTOR_SIZE].copy_from_slice(buf);
        Ok(SectorHeader::new(track, side, sector, 2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{device_types::disk::RAWTRACK_SIZE, disk::raw_track};

    #[test]
    fn geometry_from_size() {
        assert!(matches!(SectorImage::from_bytes(vec![0; 1234]), Err(DriveError::BadGeometry)));
        let img = SectorImage::from_bytes(vec![0; 368_640]).unwrap();
        assert_eq!(img.geometry(), DiskGeometry::new(80, 1, 9));
    }

    #[test]
    fn sector_read_write() {
        let mut img = SectorImage::blank(DiskGeometry::new(80, 2, 9), 0xE5);
        let buf = [0x5A; SECTOR_SIZE];
        let header = img.write_sector(2, 1, 4, &buf).unwrap();
        assert_eq!(header, SectorHeader::new(2, 1, 4, 2));

        let mut out = [0; SECTOR_SIZE];
        img.read_sector(2, 1, 4, &mut out).unwrap();
        assert_eq!(out, buf);
        img.read_sector(2, 1, 5, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0xE5));

        let offset = ((2 * 2 + 1) * 9 + 3) * SECTOR_SIZE;
        assert_eq!(img.as_bytes()[offset], 0x5A);

        assert_eq!(
            img.read_sector(2, 1, 10, &mut out),
            Err(DriveError::SectorNotFound {
                track:  2,
                side:   1,
                sector: 10,
            })
        );
    }

    #[test]
    fn write_protect() {
        let mut img = SectorImage::blank(DiskGeometry::new(80, 1, 9), 0);
        img.set_write_protected(true);
        assert_eq!(img.write_sector(0, 0, 1, &[0; SECTOR_SIZE]), Err(DriveError::WriteProtected));
        assert_eq!(img.write_track(0, 0, &[]), Err(DriveError::WriteProtected));
    }

    #[test]
    fn format_then_read_track() {
        let mut img = SectorImage::blank(DiskGeometry::new(80, 2, 9), 0x00);
        let written = img.write_track(5, 1, &raw_track::format_stream(5, 1, 9, 0xE5)).unwrap();
        assert_eq!(written, 9);

        let mut out = [0; SECTOR_SIZE];
        img.read_sector(5, 1, 9, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0xE5));
        img.read_sector(5, 0, 9, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0x00));

        let mut raw = vec![0; RAWTRACK_SIZE];
        assert_eq!(img.read_track(5, 1, &mut raw).unwrap(), RAWTRACK_SIZE);
        let ids = raw.windows(5).filter(|w| w[..4] == [0xA1, 0xA1, 0xA1, 0xFE]).count();
        assert_eq!(ids, 9);
    }
}
