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
*/

//! MartyMSX headless front-end main library component.

#![forbid(unsafe_code)]

pub mod cmdline;
pub mod disk_routines;

use anyhow::{anyhow, Error};

use msx_core::{
    device_types::disk::SECTOR_SIZE,
    machine::DiskMachine,
    machine_config::{DriveConfig, MachineConfig, PHILIPS_MAX_DRIVES},
};

use crate::{
    cmdline::{cli_args, CmdLineArgs},
    disk_routines::{hex_dump, DiskHost},
};

pub fn run() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = cli_args().run();
    if let Err(e) = run_with(args) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Resolve the machine configuration by reading the configuration file, if any, and overlaying
/// the command line on top of it.
pub fn resolve_config(args: &CmdLineArgs) -> Result<MachineConfig, Error> {
    let mut config = match &args.config_file {
        Some(path) => MachineConfig::from_file(path)?,
        None => MachineConfig::default(),
    };
    overlay(&mut config, args)?;
    config.validate()?;
    Ok(config)
}

/// Apply command line arguments to `config`. Command line arguments take priority.
pub fn overlay(config: &mut MachineConfig, args: &CmdLineArgs) -> Result<(), Error> {
    let fdc = config.fdc.get_or_insert_with(Default::default);

    let needed = args
        .mount
        .iter()
        .map(|m| m.drive + 1)
        .chain(args.drive.map(|d| d + 1))
        .max()
        .unwrap_or(1);
    if needed > PHILIPS_MAX_DRIVES {
        return Err(anyhow!("Drive {} is out of range", needed - 1));
    }
    if fdc.drive.len() < needed {
        fdc.drive.resize(needed, DriveConfig::default());
    }

    for mount in &args.mount {
        let drive = &mut fdc.drive[mount.drive];
        drive.image = Some(mount.path.to_string_lossy().to_string());
        drive.write_protect = mount.write_protect;
    }
    if let Some(rpm) = args.rpm {
        for drive in fdc.drive.iter_mut() {
            drive.rpm = Some(rpm);
        }
    }
    if let Some(ms) = args.head_load_wait_ms {
        fdc.head_load_wait_ms = Some(ms);
    }
    Ok(())
}

pub fn run_with(args: CmdLineArgs) -> Result<(), Error> {
    let config = resolve_config(&args)?;
    let mut machine = DiskMachine::new(&config)?;
    log::info!("Created machine: {}", machine.name());

    let drive = args.drive.unwrap_or(0);
    let have_routines = !(args.format.is_empty() && args.fill.is_empty() && args.dump.is_empty());
    if have_routines {
        let mut host = DiskHost::new(&mut machine, drive);
        host.restore()?;

        let sectors = format_sectors_per_track(&config, drive);
        for t in &args.format {
            host.format_track(t.track, t.side, sectors, 0xE5)?;
        }
        for f in &args.fill {
            host.write_sector(f.addr.track, f.addr.side, f.addr.sector, &[f.value; SECTOR_SIZE])?;
        }
        for d in &args.dump {
            let data = host.read_sector(d.track, d.side, d.sector)?;
            println!("{}", d);
            print!("{}", hex_dump(&data));
        }
    }

    if args.cmd_log {
        for entry in machine.cmd_log() {
            println!("{}", entry);
        }
    }

    if let Some(path) = &args.save {
        machine.save_image(drive, path)?;
        log::info!("Saved drive {} to {}", drive, path.display());
    }
    log::info!("Finished at {}", machine.time());
    Ok(())
}

/// Sectors per track to use when formatting. MSX disks are formatted with 9 sectors unless the
/// mounted image says otherwise.
fn format_sectors_per_track(config: &MachineConfig, drive: usize) -> u8 {
    config
        .fdc
        .as_ref()
        .and_then(|fdc| fdc.drive.get(drive))
        .and_then(|d| d.image.as_ref())
        .and_then(|path| std::fs::metadata(path).ok())
        .and_then(|meta| msx_core::device_types::disk::DISK_FORMATS.get(&(meta.len() as usize)).copied())
        .map(|g| g.sectors_per_track)
        .unwrap_or(9)
}
