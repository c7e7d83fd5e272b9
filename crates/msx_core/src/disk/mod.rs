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

    disk::mod.rs

    Defines the Disk trait implemented by disk image backends, and the
    modules implementing them.
*/

pub mod raw_track;
pub mod sector_image;

use crate::device_types::disk::{DiskGeometry, DriveError, SectorHeader, RAWTRACK_SIZE};

/// Sector-addressed disk media.
///
/// Tracks and sides are physical positions. Sector numbers are the values recorded in each
/// sector's ID field, starting at 1.
pub trait Disk {
    fn geometry(&self) -> DiskGeometry;
    fn is_write_protected(&self) -> bool;
    fn set_write_protected(&mut self, protect: bool);

    /// Return the backing image bytes, for backends that keep a flat image in memory.
    fn image_data(&self) -> Option<&[u8]> {
        None
    }

    /// Read the specified sector into `buf`, returning its ID field.
    fn read_sector(&self, track: u8, side: u8, sector: u8, buf: &mut [u8]) -> Result<SectorHeader, DriveError>;

    /// Write `buf` to the specified sector, returning its ID field.
    fn write_sector(&mut self, track: u8, side: u8, sector: u8, buf: &[u8]) -> Result<SectorHeader, DriveError>;

    /// Return the ID field of the `n`th sector of a track in rotational order.
    fn sector_header(&self, track: u8, side: u8, n: usize) -> Option<SectorHeader> {
        let g = self.geometry();
        if track >= g.tracks || side >= g.sides || n >= g.sectors_per_track as usize {
            return None;
        }
        Some(SectorHeader::new(track, side, n as u8 + 1, 2))
    }

    /// Write a track from a raw WD279x format stream. Every well-formed sector found in the
    /// stream is stored at the specified physical track and side.
    fn write_track(&mut self, track: u8, side: u8, raw: &[u8]) -> Result<usize, DriveError> {
        if self.is_write_protected() {
            return Err(DriveError::WriteProtected);
        }
        let mut written = 0;
        for (header, data) in raw_track::parse_format_stream(raw) {
            match self.write_sector(track, side, header.sector, &data) {
                Ok(_) => written += 1,
                Err(e) => log::warn!("write_track(): skipping sector {}: {}", header, e),
            }
        }
        Ok(written)
    }

    /// Synthesize the raw contents of a track into `buf`, returning the number of bytes
    /// produced.
    fn read_track(&self, track: u8, side: u8, buf: &mut [u8]) -> Result<usize, DriveError> {
        let g = self.geometry();
        if track >= g.tracks || side >= g.sides {
            return Err(DriveError::SectorNotFound { track, side, sector: 0 });
        }
        let mut sectors = Vec::with_capacity(g.sectors_per_track as usize);
        let mut n = 0;
        while let Some(header) = self.sector_header(track, side, n) {
            let mut data = vec![0; header.size_bytes()];
            self.read_sector(track, side, header.sector, &mut data)?;
            sectors.push((header, data));
            n += 1;
        }
        let raw = raw_track::synthesize_track(&sectors);
        let len = buf.len().min(RAWTRACK_SIZE);
        buf[..len].copy_from_slice(&raw[..len]);
        Ok(len)
    }
}
