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

    disk_routines.rs

    Host side disk routines. Each routine programs the WD2793 through the
    Philips register window and polls the INTRQ and DRQ lines while running
    the machine, the way a disk BIOS does.
*/

use anyhow::{bail, Error};

use msx_core::{
    device_types::disk::SECTOR_SIZE,
    devices::fdc::philips::{DRIVE_MOTOR, LINE_NOT_DRQ, LINE_NOT_INTRQ, PHILIPS_REG_BASE},
    disk::raw_track,
    machine::DiskMachine,
};

const REG_STATUS: u16 = PHILIPS_REG_BASE;
const REG_TRACK: u16 = PHILIPS_REG_BASE + 1;
const REG_SECTOR: u16 = PHILIPS_REG_BASE + 2;
const REG_DATA: u16 = PHILIPS_REG_BASE + 3;
const REG_SIDE: u16 = PHILIPS_REG_BASE + 4;
const REG_DRIVE: u16 = PHILIPS_REG_BASE + 5;
const REG_LINES: u16 = PHILIPS_REG_BASE + 7;

const ST_SEEK_ERROR: u8 = 0x10;
const ST_RECORD_NOT_FOUND: u8 = 0x10;
const ST_WRITE_PROTECTED: u8 = 0x40;
const ST_NOT_READY: u8 = 0x80;

/// Z80 cycles between polls of the controller.
const POLL_CYCLES: u64 = 16;
/// Z80 cycles between bytes of a track write.
const FORMAT_BYTE_CYCLES: u64 = 64;
/// Give up on a command after this many polls, about 10 seconds of emulated time.
const MAX_POLLS: usize = 2_500_000;

pub struct DiskHost<'a> {
    machine: &'a mut DiskMachine,
    drive: usize,
}

impl<'a> DiskHost<'a> {
    /// Select `drive` and start its motor.
    pub fn new(machine: &'a mut DiskMachine, drive: usize) -> Self {
        machine.write(REG_DRIVE, DRIVE_MOTOR | (drive as u8 & 0x03));
        Self { machine, drive }
    }

    pub fn drive(&self) -> usize {
        self.drive
    }

    fn wait_intrq(&mut self) -> Result<u8, Error> {
        for _ in 0..MAX_POLLS {
            if self.machine.read(REG_LINES) & LINE_NOT_INTRQ == 0 {
                return Ok(self.machine.read(REG_STATUS));
            }
            self.machine.run_cycles(POLL_CYCLES);
        }
        bail!("Timed out waiting for the controller at {}", self.machine.time())
    }

    fn command(&mut self, command: u8) -> Result<u8, Error> {
        log::debug!("DiskHost: command {:02X}", command);
        self.machine.write(REG_STATUS, command);
        self.wait_intrq()
    }

    fn check_ready(status: u8) -> Result<(), Error> {
        if status & ST_NOT_READY != 0 {
            bail!("Drive not ready");
        }
        Ok(())
    }

    pub fn restore(&mut self) -> Result<(), Error> {
        let status = self.command(0x08)?;
        Self::check_ready(status)?;
        if self.machine.read(REG_TRACK) != 0 {
            bail!("Restore did not reach track 0");
        }
        Ok(())
    }

    /// Seek to `track` and verify the ID fields found there.
    pub fn seek(&mut self, track: u8) -> Result<(), Error> {
        if self.machine.read(REG_TRACK) == track {
            return Ok(());
        }
        self.machine.write(REG_DATA, track);
        let status = self.command(0x1C)?;
        Self::check_ready(status)?;
        if status & ST_SEEK_ERROR != 0 {
            bail!("Seek error at track {}", track);
        }
        Ok(())
    }

    fn setup_sector(&mut self, track: u8, side: u8, sector: u8) -> Result<(), Error> {
        self.seek(track)?;
        self.machine.write(REG_SIDE, side);
        self.machine.write(REG_SECTOR, sector);
        Ok(())
    }

    fn check_transfer(status: u8, what: &str) -> Result<(), Error> {
        Self::check_ready(status)?;
        if status & ST_WRITE_PROTECTED != 0 {
            bail!("{}: disk is write protected", what);
        }
        if status & ST_RECORD_NOT_FOUND != 0 {
            bail!("{}: record not found", what);
        }
        Ok(())
    }

    pub fn read_sector(&mut self, track: u8, side: u8, sector: u8) -> Result<Vec<u8>, Error> {
        self.setup_sector(track, side, sector)?;
        self.machine.write(REG_STATUS, 0x80);

        let mut data = Vec::with_capacity(SECTOR_SIZE);
        for _ in 0..MAX_POLLS {
            let lines = self.machine.read(REG_LINES);
            if lines & LINE_NOT_DRQ == 0 {
                data.push(self.machine.read(REG_DATA));
            }
            else if lines & LINE_NOT_INTRQ == 0 {
                break;
            }
            self.machine.run_cycles(POLL_CYCLES);
        }

        let status = self.wait_intrq()?;
        Self::check_transfer(status, &format!("Reading T:{} H:{} S:{}", track, side, sector))?;
        if data.len() != SECTOR_SIZE {
            bail!("Short read: {} bytes", data.len());
        }
        Ok(data)
    }

    pub fn write_sector(&mut self, track: u8, side: u8, sector: u8, data: &[u8]) -> Result<(), Error> {
        if data.len() != SECTOR_SIZE {
            bail!("Sector data must be {} bytes, got {}", SECTOR_SIZE, data.len());
        }
        self.setup_sector(track, side, sector)?;
        self.machine.write(REG_STATUS, 0xA0);

        let mut bytes = data.iter();
        for _ in 0..MAX_POLLS {
            let lines = self.machine.read(REG_LINES);
            if lines & LINE_NOT_DRQ == 0 {
                match bytes.next() {
                    Some(&b) => self.machine.write(REG_DATA, b),
                    None => break,
                }
            }
            else if lines & LINE_NOT_INTRQ == 0 {
                break;
            }
            self.machine.run_cycles(POLL_CYCLES);
        }

        let status = self.wait_intrq()?;
        Self::check_transfer(status, &format!("Writing T:{} H:{} S:{}", track, side, sector))
    }

    /// Poll until DRQ is raised. Returns false if the command ended first.
    fn wait_drq(&mut self) -> Result<bool, Error> {
        for _ in 0..MAX_POLLS {
            let lines = self.machine.read(REG_LINES);
            if lines & LINE_NOT_DRQ == 0 {
                return Ok(true);
            }
            if lines & LINE_NOT_INTRQ == 0 {
                return Ok(false);
            }
            self.machine.run_cycles(POLL_CYCLES);
        }
        bail!("Timed out waiting for a data request at {}", self.machine.time())
    }

    /// Format a track with `sectors` sectors of `fill` bytes.
    pub fn format_track(&mut self, track: u8, side: u8, sectors: u8, fill: u8) -> Result<(), Error> {
        self.seek(track)?;
        self.machine.write(REG_SIDE, side);
        self.machine.write(REG_STATUS, 0xF0);

        // The first request comes when the head is loaded but that byte is discarded. The next
        // one comes after the index pulse, when the track write begins.
        for _ in 0..2 {
            if !self.wait_drq()? {
                let status = self.wait_intrq()?;
                Self::check_transfer(status, &format!("Formatting T:{} H:{}", track, side))?;
                bail!("Formatting T:{} H:{}: command ended early", track, side);
            }
            self.machine.write(REG_DATA, 0x4E);
        }

        for b in raw_track::format_stream(track, side, sectors, fill) {
            self.machine.write(REG_DATA, b);
            self.machine.run_cycles(FORMAT_BYTE_CYCLES);
        }

        let status = self.wait_intrq()?;
        Self::check_transfer(status, &format!("Formatting T:{} H:{}", track, side))?;
        log::info!("Formatted track {} side {} with {} sectors", track, side, sectors);
        Ok(())
    }
}

/// Format `data` as a hex dump, 16 bytes per line.
pub fn hex_dump(data: &[u8]) -> String {
    let mut out = String::new();
    for (i, chunk) in data.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{:02X}", b)).collect();
        let ascii: String = chunk
            .iter()
            .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
            .collect();
        out.push_str(&format!("{:04X}: {:<47}  {}\n", i * 16, hex.join(" "), ascii));
    }
    out
}
