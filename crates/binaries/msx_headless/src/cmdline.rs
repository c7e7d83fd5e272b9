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

    cmdline.rs

    Command line arguments for the headless frontend.
*/

use std::{fmt, path::PathBuf, str::FromStr};

use bpaf::{Bpaf, Parser};

#[derive(Debug, PartialEq)]
pub struct MountSpec {
    pub drive: usize,
    pub path: PathBuf,
    pub write_protect: bool,
}

impl FromStr for MountSpec {
    type Err = String;

    /// Parse `fd:<drive>:<path>[?wp]`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (main, opt_str) = match s.split_once('?') {
            Some((left, right)) => (left, Some(right)),
            None => (s, None),
        };

        let mut parts = main.splitn(3, ':');
        let device_str = parts.next().ok_or("Missing device type")?;
        let index_str = parts.next().ok_or("Missing drive number")?;
        let path_str = parts.next().ok_or("Missing file path")?;

        if device_str != "fd" {
            return Err(format!("Unknown device type: {device_str}"));
        }
        let drive: usize = index_str
            .parse()
            .map_err(|_| format!("Invalid drive number: {index_str}"))?;

        let mut write_protect = false;
        if let Some(opts) = opt_str {
            for entry in opts.split('&') {
                match entry {
                    "wp" | "write_protect" => write_protect = true,
                    other => return Err(format!("Unknown mount option: {other}")),
                }
            }
        }

        Ok(MountSpec {
            drive,
            path: PathBuf::from(path_str),
            write_protect,
        })
    }
}

fn parse_u8(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse::<u8>(),
    };
    parsed.map_err(|_| format!("Invalid byte value: {s}"))
}

fn split_fields<const N: usize>(s: &str) -> Result<[u8; N], String> {
    let fields: Vec<&str> = s.split(':').collect();
    if fields.len() != N {
        return Err(format!("Expected {} ':' separated fields in '{}'", N, s));
    }
    let mut out = [0; N];
    for (o, f) in out.iter_mut().zip(fields) {
        *o = parse_u8(f)?;
    }
    Ok(out)
}

/// A physical sector address, written `track:side:sector`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SectorAddr {
    pub track:  u8,
    pub side:   u8,
    pub sector: u8,
}

impl FromStr for SectorAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let [track, side, sector] = split_fields::<3>(s)?;
        Ok(SectorAddr { track, side, sector })
    }
}

impl fmt::Display for SectorAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T:{} H:{} S:{}", self.track, self.side, self.sector)
    }
}

/// A track to format, written `track:side`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TrackAddr {
    pub track: u8,
    pub side:  u8,
}

impl FromStr for TrackAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let [track, side] = split_fields::<2>(s)?;
        Ok(TrackAddr { track, side })
    }
}

/// A sector to overwrite with a fill byte, written `track:side:sector=byte`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FillSpec {
    pub addr:  SectorAddr,
    pub value: u8,
}

impl FromStr for FillSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, value) = s.split_once('=').ok_or("Missing '=<byte>'")?;
        Ok(FillSpec {
            addr:  addr.parse()?,
            value: parse_u8(value)?,
        })
    }
}

fn mount_arg() -> impl Parser<Vec<MountSpec>> {
    bpaf::short('m')
        .long("mount")
        .help("Mount a disk image with syntax: fd:0:disk.dsk[?wp]")
        .argument::<String>("mountspec")
        .parse(|s| s.parse::<MountSpec>())
        .many()
}

fn dump_arg() -> impl Parser<Vec<SectorAddr>> {
    bpaf::long("dump")
        .help("Read a sector and print a hex dump: track:side:sector")
        .argument::<String>("sector")
        .parse(|s| s.parse::<SectorAddr>())
        .many()
}

fn fill_arg() -> impl Parser<Vec<FillSpec>> {
    bpaf::long("fill")
        .help("Write a sector filled with a byte: track:side:sector=byte")
        .argument::<String>("fillspec")
        .parse(|s| s.parse::<FillSpec>())
        .many()
}

fn format_arg() -> impl Parser<Vec<TrackAddr>> {
    bpaf::long("format")
        .help("Format a track: track:side")
        .argument::<String>("track")
        .parse(|s| s.parse::<TrackAddr>())
        .many()
}

#[derive(Debug, Default, Bpaf)]
#[bpaf(options, version, generate(cli_args))]
pub struct CmdLineArgs {
    #[bpaf(long("config_file"), long("configfile"))]
    pub config_file: Option<PathBuf>,

    #[bpaf(external(mount_arg))]
    pub mount: Vec<MountSpec>,

    /// Drive to run disk routines on
    #[bpaf(long)]
    pub drive: Option<usize>,

    /// Override the rotation speed of every drive
    #[bpaf(long)]
    pub rpm: Option<u32>,

    #[bpaf(long("head_load_wait"))]
    pub head_load_wait_ms: Option<u64>,

    #[bpaf(external(format_arg))]
    pub format: Vec<TrackAddr>,

    #[bpaf(external(fill_arg))]
    pub fill: Vec<FillSpec>,

    #[bpaf(external(dump_arg))]
    pub dump: Vec<SectorAddr>,

    /// Write the drive's disk image to this path when done
    #[bpaf(long)]
    pub save: Option<PathBuf>,

    /// Print the controller's command log when done
    #[bpaf(long("cmd_log"), switch)]
    pub cmd_log: bool,
}
