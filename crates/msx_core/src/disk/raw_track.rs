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

    disk::raw_track.rs

    Conversion between sectors and raw MFM track streams.

    A WD279x formats a track from a byte stream written by the host, where a
    few byte values are control codes rather than data:

        F5  write an A1 sync byte with missing clock, preset the CRC
        F6  write a C2 sync byte with missing clock
        F7  write the two CRC bytes
        FE  ID address mark, followed by C H R N
        FB  data address mark, followed by 128 << N data bytes (F8: deleted data)

    READ TRACK returns the raw track as the controller sees it, which we
    synthesize in IBM System 34 layout.
*/

use crate::device_types::disk::{SectorHeader, RAWTRACK_SIZE};

pub const SYNC_MARK: u8 = 0xF5;
pub const INDEX_SYNC_MARK: u8 = 0xF6;
pub const CRC_MARK: u8 = 0xF7;
pub const ID_ADDRESS_MARK: u8 = 0xFE;
pub const DATA_ADDRESS_MARK: u8 = 0xFB;
pub const DELETED_DATA_ADDRESS_MARK: u8 = 0xF8;
pub const INDEX_ADDRESS_MARK: u8 = 0xFC;

const GAP_BYTE: u8 = 0x4E;
const GAP4A_LEN: usize = 80;
const GAP1_LEN: usize = 50;
const GAP2_LEN: usize = 22;
const GAP3_LEN: usize = 54;
const SYNC_LEN: usize = 12;

/// CRC-16/CCITT as computed by the WD279x, continuing from `crc`.
pub fn crc16(mut crc: u16, bytes: &[u8]) -> u16 {
    for &b in bytes {
        crc ^= (b as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 { (crc << 1) ^ 0x1021 } else { crc << 1 };
        }
    }
    crc
}

/// Return the CRC of a sector's ID field, including the three A1 sync bytes and the address mark.
pub fn id_field_crc(header: &SectorHeader) -> u16 {
    let crc = crc16(0xFFFF, &[0xA1, 0xA1, 0xA1, ID_ADDRESS_MARK]);
    crc16(crc, &header.as_bytes())
}

/// Parse a host format stream into the sectors it would produce on disk.
pub fn parse_format_stream(raw: &[u8]) -> Vec<(SectorHeader, Vec<u8>)> {
    let mut sectors = Vec::new();
    let mut pending: Option<SectorHeader> = None;
    let mut sync = false;
    let mut i = 0;

    while i < raw.len() {
        match raw[i] {
            SYNC_MARK => {
                sync = true;
                i += 1;
            }
            ID_ADDRESS_MARK if sync => {
                sync = false;
                if i + 4 >= raw.len() {
                    break;
                }
                let header = SectorHeader::new(raw[i + 1], raw[i + 2], raw[i + 3], raw[i + 4]);
                log::trace!("parse_format_stream(): ID field {} at offset {}", header, i);
                pending = Some(header);
                i += 5;
            }
            DATA_ADDRESS_MARK | DELETED_DATA_ADDRESS_MARK if sync => {
                sync = false;
                i += 1;
                if let Some(header) = pending.take() {
                    let size = header.size_bytes();
                    if i + size > raw.len() {
                        log::warn!("parse_format_stream(): data field for {} truncated", header);
                        break;
                    }
                    sectors.push((header, raw[i..i + size].to_vec()));
                    i += size;
                }
            }
            _ => {
                sync = false;
                i += 1;
            }
        }
    }
    sectors
}

/// Build the raw image of a track holding `sectors`, padded with gap bytes to RAWTRACK_SIZE.
pub fn synthesize_track(sectors: &[(SectorHeader, Vec<u8>)]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(RAWTRACK_SIZE);

    raw.extend_from_slice(&[GAP_BYTE; GAP4A_LEN]);
    raw.extend_from_slice(&[0x00; SYNC_LEN]);
    raw.extend_from_slice(&[0xC2, 0xC2, 0xC2, INDEX_ADDRESS_MARK]);
    raw.extend_from_slice(&[GAP_BYTE; GAP1_LEN]);

    for (header, data) in sectors {
        raw.extend_from_slice(&[0x00; SYNC_LEN]);
        raw.extend_from_slice(&[0xA1, 0xA1, 0xA1, ID_ADDRESS_MARK]);
        raw.extend_from_slice(&header.as_bytes());
        raw.extend_from_slice(&id_field_crc(header).to_be_bytes());
        raw.extend_from_slice(&[GAP_BYTE; GAP2_LEN]);

        raw.extend_from_slice(&[0x00; SYNC_LEN]);
        raw.extend_from_slice(&[0xA1, 0xA1, 0xA1, DATA_ADDRESS_MARK]);
        raw.extend_from_slice(data);
        let crc = crc16(crc16(0xFFFF, &[0xA1, 0xA1, 0xA1, DATA_ADDRESS_MARK]), data);
        raw.extend_from_slice(&crc.to_be_bytes());
        raw.extend_from_slice(&[GAP_BYTE; GAP3_LEN]);
    }

    raw.resize(RAWTRACK_SIZE, GAP_BYTE);
    raw
}

/// Build a host format stream for a track of 512 byte sectors numbered from 1, filled with `fill`.
pub fn format_stream(track: u8, side: u8, sectors: u8, fill: u8) -> Vec<u8> {
    let mut s = Vec::with_capacity(RAWTRACK_SIZE);
    s.extend_from_slice(&[GAP_BYTE; GAP4A_LEN]);
    s.extend_from_slice(&[0x00; SYNC_LEN]);
    s.extend_from_slice(&[INDEX_SYNC_MARK; 3]);
    s.push(INDEX_ADDRESS_MARK);
    s.extend_from_slice(&[GAP_BYTE; GAP1_LEN]);
    for sector in 1..=sectors {
        s.extend_from_slice(&[0x00; SYNC_LEN]);
        s.extend_from_slice(&[SYNC_MARK; 3]);
        s.push(ID_ADDRESS_MARK);
        s.extend_from_slice(&[track, side, sector, 2]);
        s.push(CRC_MARK);
        s.extend_from_slice(&[GAP_BYTE; GAP2_LEN]);
        s.extend_from_slice(&[0x00; SYNC_LEN]);
        s.extend_from_slice(&[SYNC_MARK; 3]);
        s.push(DATA_ADDRESS_MARK);
        s.extend_from_slice(&[fill; 512]);
        s.push(CRC_MARK);
        s.extend_from_slice(&[GAP_BYTE; GAP3_LEN]);
    }
    s
}
