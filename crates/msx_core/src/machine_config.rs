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

    machine_config.rs

    This module manages machine configuration definitions.

    A configuration is read from TOML:

        name = "Philips NMS 8250"

        [fdc]
        type = "Philips"
        rom = "roms/disk.rom"

        [[fdc.drive]]
        type = "DoubleSided"
        image = "disks/msxdos.dsk"
        write_protect = false
*/

use std::{fs, path::Path};

use anyhow::{anyhow, Error};
use serde_derive::{Deserialize, Serialize};
use strum_macros::Display;

use crate::{
    device_types::disk::DriveType,
    devices::real_drive::{DEFAULT_HEAD_LOAD_MS, DEFAULT_RPM},
};

/// Drives supported by the Philips interface.
pub const PHILIPS_MAX_DRIVES: usize = 2;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
pub enum FdcType {
    #[default]
    Philips,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MachineConfig {
    #[serde(default = "default_name")]
    pub name: String,
    pub fdc:  Option<FdcConfig>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FdcConfig {
    #[serde(rename = "type", default)]
    pub fdc_type: FdcType,
    /// Disk ROM to map at 0x4000.
    pub rom: Option<String>,
    /// Override of the controller's wait after head load, in milliseconds.
    pub head_load_wait_ms: Option<u64>,
    #[serde(default)]
    pub drive: Vec<DriveConfig>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DriveConfig {
    #[serde(rename = "type", default)]
    pub drive_type: DriveType,
    pub image: Option<String>,
    #[serde(default)]
    pub write_protect: bool,
    pub rpm: Option<u32>,
    /// Override of the drive's head load time, in milliseconds.
    pub head_load_ms: Option<u64>,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            drive_type: DriveType::DoubleSided,
            image: None,
            write_protect: false,
            rpm: None,
            head_load_ms: None,
        }
    }
}

impl DriveConfig {
    pub fn rpm(&self) -> u32 {
        self.rpm.unwrap_or(DEFAULT_RPM)
    }

    pub fn head_load_ms(&self) -> u64 {
        self.head_load_ms.unwrap_or(DEFAULT_HEAD_LOAD_MS)
    }
}

fn default_name() -> String {
    "MSX".to_string()
}

impl MachineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, Error> {
        let config: MachineConfig = toml::from_str(s).map_err(|e| anyhow!("Error parsing machine configuration: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let s = fs::read_to_string(path).map_err(|e| anyhow!("Couldn't read {}: {}", path.display(), e))?;
        Self::from_toml_str(&s)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if let Some(fdc) = &self.fdc {
            let max = match fdc.fdc_type {
                FdcType::Philips => PHILIPS_MAX_DRIVES,
            };
            if fdc.drive.len() > max {
                return Err(anyhow!(
                    "{} disk interface supports {} drives, {} configured",
                    fdc.fdc_type,
                    max,
                    fdc.drive.len()
                ));
            }
            if let Some(d) = fdc.drive.iter().find(|d| d.rpm == Some(0)) {
                return Err(anyhow!("Invalid drive rotation speed: {:?}", d.rpm));
            }
        }
        Ok(())
    }
}
