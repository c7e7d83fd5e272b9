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

    machine.rs

    A minimal MSX host for the disk subsystem. DiskMachine owns the scheduler
    and a disk interface, and keeps virtual time in Z80 clock cycles. The
    frontend plays the role of the CPU: it runs cycles and accesses the disk
    interface's address window.
*/

use std::{fs, path::Path};

use anyhow::{anyhow, Error};

use crate::{
    bus::MemoryMappedDevice,
    devices::{
        disk_drive::DiskDrive,
        fdc::{philips::PhilipsFdc, savestate::Wd2793State},
        real_drive::RealDrive,
    },
    disk::{sector_image::SectorImage, Disk},
    emu_time::{Clock, EmuDuration, EmuTime, Z80_FREQ},
    machine_config::{FdcConfig, MachineConfig},
    scheduler::Scheduler,
};

pub struct DiskMachine {
    name: String,
    scheduler: Scheduler,
    cpu_clock: Clock<Z80_FREQ>,
    fdc: PhilipsFdc,
}

impl DiskMachine {
    pub fn new(config: &MachineConfig) -> Result<Self, Error> {
        config.validate()?;
        let time = EmuTime::ZERO;
        let mut scheduler = Scheduler::new();
        let fdc_config = config.fdc.clone().unwrap_or_default();

        let mut drives: Vec<Box<dyn DiskDrive>> = Vec::new();
        for (n, dc) in fdc_config.drive.iter().enumerate() {
            let mut drive = RealDrive::new(dc.drive_type, dc.rpm(), EmuDuration::from_millis(dc.head_load_ms()));
            if let Some(image) = &dc.image {
                let mut disk = SectorImage::load(Path::new(image))?;
                disk.set_write_protected(dc.write_protect);
                drive
                    .insert_disk(Box::new(disk))
                    .map_err(|e| anyhow!("Couldn't insert {} into drive {}: {}", image, n, e))?;
                log::info!("Drive {}: mounted {}", n, image);
            }
            drives.push(Box::new(drive));
        }

        let rom = Self::load_rom(&fdc_config)?;
        let fdc = PhilipsFdc::new(&mut scheduler, drives, rom, time);
        if let Some(ms) = fdc_config.head_load_wait_ms {
            fdc.controller().borrow_mut().set_head_load_wait(EmuDuration::from_millis(ms));
        }

        log::debug!(
            "DiskMachine: created {} with {} drive(s)",
            config.name,
            fdc_config.drive.len()
        );
        Ok(Self {
            name: config.name.clone(),
            scheduler,
            cpu_clock: Clock::new(time),
            fdc,
        })
    }

    fn load_rom(config: &FdcConfig) -> Result<Option<Vec<u8>>, Error> {
        match &config.rom {
            Some(path) => {
                let rom = fs::read(path).map_err(|e| anyhow!("Couldn't read disk ROM {}: {}", path, e))?;
                Ok(Some(rom))
            }
            None => Ok(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn time(&self) -> EmuTime {
        self.cpu_clock.time()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn fdc(&self) -> &PhilipsFdc {
        &self.fdc
    }

    /// Advance virtual time by `cycles` Z80 clock cycles, dispatching every sync point reached.
    pub fn run_cycles(&mut self, cycles: u64) {
        self.cpu_clock += cycles;
        self.scheduler.run_until(self.cpu_clock.time());
    }

    /// Advance virtual time by at least `duration`, rounded up to a whole Z80 cycle.
    pub fn run_for(&mut self, duration: EmuDuration) {
        if duration.is_negative() {
            log::warn!("DiskMachine: ignoring negative run duration {:?}", duration);
            return;
        }
        let step = Clock::<Z80_FREQ>::duration(1).ticks();
        let cycles = (duration.ticks() + step - 1) / step;
        self.run_cycles(cycles as u64);
    }

    pub fn read(&mut self, address: u16) -> u8 {
        let now = self.time();
        self.scheduler.run_until(now);
        self.fdc.mmio_read_u8(address, now, &mut self.scheduler)
    }

    pub fn peek(&self, address: u16) -> u8 {
        self.fdc.mmio_peek_u8(address, self.time())
    }

    pub fn write(&mut self, address: u16, data: u8) {
        let now = self.time();
        self.scheduler.run_until(now);
        self.fdc.mmio_write_u8(address, data, now, &mut self.scheduler);
    }

    pub fn mount(&mut self, drive: usize, disk: Box<dyn Disk>) -> Result<(), Error> {
        let mut mux = self.fdc.multiplexer().borrow_mut();
        let d = mux
            .drive_mut(drive)
            .ok_or_else(|| anyhow!("No drive {} configured", drive))?;
        d.insert_disk(disk).map_err(|e| anyhow!("Couldn't insert disk into drive {}: {}", drive, e))
    }

    pub fn mount_image(&mut self, drive: usize, path: &Path, write_protect: bool) -> Result<(), Error> {
        let mut disk = SectorImage::load(path)?;
        disk.set_write_protected(write_protect);
        self.mount(drive, Box::new(disk))?;
        log::info!("Drive {}: mounted {}", drive, path.display());
        Ok(())
    }

    pub fn eject(&mut self, drive: usize) -> Option<Box<dyn Disk>> {
        self.fdc.multiplexer().borrow_mut().drive_mut(drive)?.eject_disk()
    }

    /// Write the image in `drive` to `path`.
    pub fn save_image(&self, drive: usize, path: &Path) -> Result<(), Error> {
        let mux = self.fdc.multiplexer().borrow();
        let disk = mux
            .drive(drive)
            .and_then(|d| d.disk())
            .ok_or_else(|| anyhow!("No disk in drive {}", drive))?;
        let data = disk
            .image_data()
            .ok_or_else(|| anyhow!("Disk in drive {} has no flat image", drive))?;
        fs::write(path, data).map_err(|e| anyhow!("Couldn't write {}: {}", path.display(), e))?;
        Ok(())
    }

    pub fn save_state(&self) -> Wd2793State {
        self.fdc.controller().borrow().save_state(&self.scheduler)
    }

    pub fn restore_state(&mut self, state: Wd2793State) -> Result<(), Error> {
        self.fdc
            .controller()
            .borrow_mut()
            .load_state(state, &mut self.scheduler)?;
        Ok(())
    }

    pub fn cmd_log(&self) -> Vec<String> {
        self.fdc.controller().borrow().cmd_log()
    }
}
