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

    devices::fdc::wd2793.rs

    Implements the Western Digital WD2793 Floppy Disk Controller.

    Commands run as a state machine driven by the scheduler. Each state
    performs one phase of a command and either completes the command or arms
    the next phase at a later time. Host register accesses run synchronously
    and may start, advance or abort a command.

    A second, independent sync point raises the interrupt on index pulses
    when requested by a Force Interrupt command.
*/

use std::{cell::RefCell, rc::Rc};

use serde_derive::{Deserialize, Serialize};
use strum_macros::Display;

use crate::{
    device_traits::disk_controller::{DiskController, FdcRegister},
    device_types::disk::{DriveError, RAWTRACK_SIZE, SECTOR_SIZE},
    devices::{
        disk_drive::SharedDrive,
        fdc::{
            command::{Command, CommandReg, CommandType, SETTLE_DELAY_MS},
            savestate::{SaveStateError, Wd2793State},
            status::*,
        },
    },
    disk::raw_track,
    emu_time::{Clock, EmuDuration, EmuTime},
    history_buffer::HistoryBuffer,
    scheduler::{Schedulable, Scheduler, SyncHandle, SyncTag},
};

pub const FDC_LOG_LEN: usize = 1000;

/// The data request timer runs at the raw byte rate of a 300rpm disk: 6250 bytes per revolution.
pub const DRQ_FREQ: u64 = 6250 * 5;
/// Byte times between data requests during a sector or type III read transfer.
pub const DRQ_TICKS: u64 = 15;
/// Byte times between data requests during a track write.
pub const WRITE_TRACK_DRQ_TICKS: u64 = 16;
/// Delay between the head load and the start of a type II or III command.
pub const HEAD_LOAD_WAIT_MS: u64 = 1;

pub const SYNC_FSM: SyncTag = 0;
pub const SYNC_IDX_IRQ: SyncTag = 1;

/// Size of the ID field transferred by Read Address.
const ID_FIELD_LEN: usize = 6;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FsmState {
    #[default]
    Idle,
    Seek,
    Type2WaitHeadSettle,
    Type2HeadLoaded,
    Type2RotatedToSector,
    Type3WaitHeadSettle,
    Type3HeadLoaded,
}

pub struct Wd2793 {
    sync: SyncHandle,
    drive: SharedDrive,

    command_start: EmuTime,
    drq_timer: Clock<DRQ_FREQ>,
    fsm_state: FsmState,

    status: u8,
    command: CommandReg,
    sector: u8,
    track: u8,
    data: u8,

    direction_in: bool,
    intrq: bool,
    immediate_irq: bool,
    drq: bool,
    transferring: bool,
    formatting: bool,

    data_buffer: Vec<u8>,
    data_current: usize,
    data_available: usize,

    head_load_wait: EmuDuration,
    cmd_log: HistoryBuffer<String>,
}

impl Wd2793 {
    /// Create a WD2793 connected to `drive`. The controller must be reset before use.
    pub fn new(sync: SyncHandle, drive: SharedDrive, time: EmuTime) -> Self {
        Self {
            sync,
            drive,
            command_start: time,
            drq_timer: Clock::new(time),
            fsm_state: FsmState::Idle,
            status: 0,
            command: CommandReg::default(),
            sector: 0,
            track: 0,
            data: 0,
            direction_in: true,
            intrq: false,
            immediate_irq: false,
            drq: false,
            transferring: false,
            formatting: false,
            data_buffer: vec![0; RAWTRACK_SIZE],
            data_current: 0,
            data_available: 0,
            head_load_wait: EmuDuration::from_millis(HEAD_LOAD_WAIT_MS),
            cmd_log: HistoryBuffer::new(FDC_LOG_LEN),
        }
    }

    /// Create a WD2793, register it with the scheduler and reset it.
    pub fn create(scheduler: &mut Scheduler, name: &str, drive: SharedDrive, time: EmuTime) -> Rc<RefCell<Wd2793>> {
        let fdc = scheduler.register(name, |sync| Wd2793::new(sync, drive, time));
        fdc.borrow_mut().reset(time, scheduler);
        fdc
    }

    pub fn set_head_load_wait(&mut self, wait: EmuDuration) {
        self.head_load_wait = wait;
    }

    pub fn sync_handle(&self) -> SyncHandle {
        self.sync
    }

    pub fn fsm_state(&self) -> FsmState {
        self.fsm_state
    }

    pub fn command_reg(&self) -> CommandReg {
        self.command
    }

    pub fn drive(&self) -> &SharedDrive {
        &self.drive
    }

    pub fn cmd_log(&self) -> Vec<String> {
        self.cmd_log.as_vec()
    }

    pub fn reset(&mut self, time: EmuTime, scheduler: &mut Scheduler) {
        self.sync.cancel(scheduler, SYNC_FSM);
        self.sync.cancel(scheduler, SYNC_IDX_IRQ);
        self.fsm_state = FsmState::Idle;

        self.status = 0;
        self.track = 0;
        self.data = 0;
        self.direction_in = true;

        self.set_drq(false, time);
        self.intrq = false;
        self.immediate_irq = false;

        self.formatting = false;
        self.transferring = false;
        self.cmd_log.clear();

        // Reset performs a Restore.
        self.sector = 0x01;
        self.set_command_reg(0x03, time, scheduler);
    }

    // ---------------------------------------------------------------------------------------
    // Interrupt and data request lines
    // ---------------------------------------------------------------------------------------

    pub fn get_irq(&self, _time: EmuTime) -> bool {
        self.intrq || self.immediate_irq
    }

    pub fn peek_irq(&self, time: EmuTime) -> bool {
        self.get_irq(time)
    }

    /// Sample the data request line. A track write ends here once the second index pulse has
    /// passed.
    pub fn get_dtrq(&mut self, time: EmuTime) -> bool {
        let (drq, write_track_done) = self.sample_dtrq(time);
        if write_track_done {
            self.end_write_track_cmd();
        }
        else {
            self.drq = drq;
        }
        self.drq
    }

    pub fn peek_dtrq(&self, time: EmuTime) -> bool {
        let (drq, write_track_done) = self.sample_dtrq(time);
        drq && !write_track_done
    }

    /// Return the data request state at `time`, and whether a track write in progress is over.
    fn sample_dtrq(&self, time: EmuTime) -> (bool, bool) {
        if !self.busy() {
            return (self.drq, false);
        }
        match self.command.command() {
            Command::ReadSector | Command::WriteSector | Command::ReadAddress | Command::ReadTrack
                if self.transferring =>
            {
                (self.drq || self.drq_timer.ticks_till(time) >= DRQ_TICKS, false)
            }
            Command::WriteTrack if self.formatting => {
                match self.drive.borrow().index_pulse_count(self.command_start, time) {
                    0 => (self.drq, false),
                    1 => (self.drq || self.drq_timer.ticks_till(time) >= WRITE_TRACK_DRQ_TICKS, false),
                    _ => (false, true),
                }
            }
            _ => (self.drq, false),
        }
    }

    fn set_drq(&mut self, drq: bool, time: EmuTime) {
        self.drq = drq;
        self.drq_timer.advance(time);
    }

    fn busy(&self) -> bool {
        self.status & ST_BUSY != 0
    }

    // ---------------------------------------------------------------------------------------
    // Registers
    // ---------------------------------------------------------------------------------------

    pub fn set_command_reg(&mut self, value: u8, time: EmuTime, scheduler: &mut Scheduler) {
        self.sync.cancel(scheduler, SYNC_FSM);
        self.sync.cancel(scheduler, SYNC_IDX_IRQ);
        self.fsm_state = FsmState::Idle;

        self.command = CommandReg(value);
        self.intrq = false;
        self.transferring = false;
        self.formatting = false;

        let command = self.command.command();
        log::trace!(
            "WD2793: command {:02X} {} at {} (track:{} sector:{} data:{})",
            value,
            command,
            time,
            self.track,
            self.sector,
            self.data
        );
        self.cmd_log.push(format!(
            "{}: {:02X} {} t:{} s:{} d:{}",
            time, value, command, self.track, self.sector, self.data
        ));

        match command.command_type() {
            CommandType::TypeI => self.start_type1_cmd(time, scheduler),
            CommandType::TypeII => self.start_type2_cmd(time, scheduler),
            CommandType::TypeIII => self.start_type3_cmd(time, scheduler),
            CommandType::TypeIV => self.start_type4_cmd(time, scheduler),
        }
    }

    /// Read the status register. Acknowledges the command completion interrupt.
    pub fn get_status_reg(&mut self, time: EmuTime) -> u8 {
        let drq = match self.command.command_type() {
            CommandType::TypeII | CommandType::TypeIII => self.get_dtrq(time),
            _ => self.drq,
        };
        self.status = self.compose_status(time, drq);
        self.intrq = false;
        self.status
    }

    pub fn peek_status_reg(&self, time: EmuTime) -> u8 {
        self.compose_status(time, self.peek_dtrq(time))
    }

    fn compose_status(&self, time: EmuTime, drq: bool) -> u8 {
        let drive = self.drive.borrow();
        let live = LiveStatus {
            index: drive.index_pulse(time),
            track00: drive.is_track00(),
            head_loaded: drive.head_loaded(time),
            write_protected: drive.is_write_protected(),
            not_ready: !drive.is_disk_inserted(),
            drq,
        };
        StatusLayout::for_command(self.command).compose(self.status, &live)
    }

    pub fn get_track_reg(&self) -> u8 {
        self.track
    }

    pub fn set_track_reg(&mut self, value: u8) {
        self.track = value;
    }

    pub fn get_sector_reg(&self) -> u8 {
        self.sector
    }

    pub fn set_sector_reg(&mut self, value: u8) {
        self.sector = value;
    }

    /// Write the data register. While a write command is transferring, the byte goes to the
    /// data buffer.
    pub fn set_data_reg(&mut self, value: u8, time: EmuTime, scheduler: &mut Scheduler) {
        self.data = value;
        if !self.busy() {
            return;
        }

        match self.command.command() {
            Command::WriteSector if self.transferring => {
                self.data_buffer[self.data_current] = value;
                self.data_current += 1;
                self.data_available -= 1;
                self.set_drq(false, time);
                if self.data_available == 0 {
                    self.transferring = false;
                    self.data_current = 0;
                    self.write_sector(time, scheduler);
                }
            }
            Command::WriteTrack if self.formatting => {
                self.set_drq(false, time);
                let pulses = self.drive.borrow().index_pulse_count(self.command_start, time);
                match pulses {
                    0 => {}
                    1 => {
                        if self.data_current < RAWTRACK_SIZE {
                            self.data_buffer[self.data_current] = value;
                            self.data_current += 1;
                        }
                        else {
                            log::warn!("WD2793: write track overflow, byte {:02X} dropped", value);
                        }
                    }
                    _ => self.end_write_track_cmd(),
                }
            }
            _ => {}
        }
    }

    /// Read the data register. While a read command is transferring, this consumes the next
    /// byte of the data buffer.
    pub fn get_data_reg(&mut self, time: EmuTime, scheduler: &mut Scheduler) -> u8 {
        if !(self.busy() && self.transferring && self.is_read_transfer()) {
            return self.data;
        }

        self.data = self.data_buffer[self.data_current];
        self.data_current += 1;
        self.data_available -= 1;
        self.set_drq(false, time);

        if self.data_available == 0 {
            self.transferring = false;
            match self.command.command() {
                Command::ReadSector if self.command.type2().multi() => {
                    self.sector = self.sector.wrapping_add(1);
                    let next = self.drive.borrow().time_till_sector(self.sector, time);
                    self.schedule(FsmState::Type2RotatedToSector, next, scheduler);
                }
                Command::ReadAddress => {
                    // The track address of the ID field is copied to the sector register.
                    self.sector = self.data_buffer[0];
                    self.end_cmd();
                }
                _ => self.end_cmd(),
            }
        }
        self.data
    }

    pub fn peek_data_reg(&self) -> u8 {
        if self.busy() && self.transferring && self.is_read_transfer() {
            self.data_buffer[self.data_current]
        }
        else {
            self.data
        }
    }

    fn is_read_transfer(&self) -> bool {
        matches!(
            self.command.command(),
            Command::ReadSector | Command::ReadAddress | Command::ReadTrack
        )
    }

    // ---------------------------------------------------------------------------------------
    // State machine
    // ---------------------------------------------------------------------------------------

    fn schedule(&mut self, state: FsmState, time: EmuTime, scheduler: &mut Scheduler) {
        self.fsm_state = state;
        self.sync.arm(scheduler, time, SYNC_FSM);
    }

    fn end_cmd(&mut self) {
        self.intrq = true;
        self.status &= !ST_BUSY;
    }

    /// Map a drive failure onto the status register and end the command.
    fn fail_cmd(&mut self, err: DriveError) {
        log::warn!("WD2793: {} failed: {}", self.command.command(), err);
        self.status |= ST_RECORD_NOT_FOUND;
        self.end_cmd();
    }

    fn start_type1_cmd(&mut self, time: EmuTime, scheduler: &mut Scheduler) {
        self.status &= !(ST_SEEK_ERROR | ST_CRC_ERROR);
        self.status |= ST_BUSY;
        self.set_drq(false, time);

        let head_load = self.command.type1().head_load();
        self.drive.borrow_mut().set_head_loaded(head_load, time);

        match self.command.command() {
            Command::Restore => {
                self.track = 0xFF;
                self.data = 0x00;
                self.seek(time, scheduler);
            }
            Command::Seek => self.seek(time, scheduler),
            Command::Step => self.step(time, scheduler),
            Command::StepIn => {
                self.direction_in = true;
                self.step(time, scheduler);
            }
            Command::StepOut => {
                self.direction_in = false;
                self.step(time, scheduler);
            }
            _ => unreachable!("type I dispatch of non type I command"),
        }
    }

    fn seek(&mut self, time: EmuTime, scheduler: &mut Scheduler) {
        if self.track == self.data {
            self.end_type1_cmd(time);
        }
        else {
            self.direction_in = self.data > self.track;
            self.step(time, scheduler);
        }
    }

    fn step(&mut self, time: EmuTime, scheduler: &mut Scheduler) {
        if self.command.updates_track() {
            self.track = if self.direction_in {
                self.track.wrapping_add(1)
            }
            else {
                self.track.wrapping_sub(1)
            };
        }

        if !self.direction_in && self.drive.borrow().is_track00() {
            self.track = 0;
            self.end_type1_cmd(time);
        }
        else {
            self.drive.borrow_mut().step(self.direction_in, time);
            let next = time + self.command.step_time();
            self.schedule(FsmState::Seek, next, scheduler);
        }
    }

    fn seek_next(&mut self, time: EmuTime, scheduler: &mut Scheduler) {
        match self.command.command() {
            Command::Restore | Command::Seek => self.seek(time, scheduler),
            _ => self.end_type1_cmd(time),
        }
    }

    fn end_type1_cmd(&mut self, time: EmuTime) {
        if self.command.type1().verify() {
            let mut drive = self.drive.borrow_mut();
            drive.set_head_loaded(true, time);
            match drive.read_sector_header(time) {
                Ok(header) if header.track == self.track => {}
                Ok(header) => {
                    log::debug!("WD2793: verify found track {} expected {}", header.track, self.track);
                    self.status |= ST_SEEK_ERROR;
                }
                Err(e) => {
                    log::debug!("WD2793: verify failed: {}", e);
                    self.status |= ST_SEEK_ERROR;
                }
            }
        }
        self.end_cmd();
    }

    fn start_type2_cmd(&mut self, time: EmuTime, scheduler: &mut Scheduler) {
        self.status &= !(ST_LOST_DATA | ST_RECORD_NOT_FOUND | ST_RECORD_TYPE | ST_WRITE_PROTECTED);
        self.status |= ST_BUSY;
        self.set_drq(false, time);

        if !self.drive.borrow().is_disk_inserted() {
            self.end_cmd();
            return;
        }

        self.drive.borrow_mut().set_head_loaded(true, time);
        if self.command.settle_delay() {
            let next = time + EmuDuration::from_millis(SETTLE_DELAY_MS);
            self.schedule(FsmState::Type2WaitHeadSettle, next, scheduler);
        }
        else {
            self.type2_wait_load(time, scheduler);
        }
    }

    fn type2_wait_load(&mut self, time: EmuTime, scheduler: &mut Scheduler) {
        let next = time + self.head_load_wait;
        self.schedule(FsmState::Type2HeadLoaded, next, scheduler);
    }

    fn type2_loaded(&mut self, time: EmuTime, scheduler: &mut Scheduler) {
        if self.command.command() == Command::WriteSector && self.drive.borrow().is_write_protected() {
            log::debug!("WD2793: write sector on write protected disk");
            self.status |= ST_WRITE_PROTECTED;
            self.end_cmd();
            return;
        }
        let next = self.drive.borrow().time_till_sector(self.sector, time);
        self.schedule(FsmState::Type2RotatedToSector, next, scheduler);
    }

    fn type2_rotated(&mut self, _time: EmuTime) {
        match self.command.command() {
            Command::ReadSector => self.try_to_read_sector(),
            Command::WriteSector => {
                self.data_current = 0;
                self.data_available = SECTOR_SIZE;
                self.drq = true;
                self.transferring = true;
            }
            _ => unreachable!("type II phase of non type II command"),
        }
    }

    fn try_to_read_sector(&mut self) {
        let result = self
            .drive
            .borrow_mut()
            .read(self.sector, &mut self.data_buffer[..SECTOR_SIZE]);

        match result {
            Ok(header) if header.track != self.track => {
                log::debug!("WD2793: read found {} with track register {}", header, self.track);
                self.status |= ST_RECORD_NOT_FOUND;
                self.end_cmd();
            }
            Ok(header) => {
                self.assert_sector_size(header.size_bytes());
                self.data_current = 0;
                self.data_available = SECTOR_SIZE;
                self.drq = false;
                self.transferring = true;
            }
            Err(e) => self.fail_cmd(e),
        }
    }

    /// Hand the filled data buffer to the drive.
    fn write_sector(&mut self, time: EmuTime, scheduler: &mut Scheduler) {
        let result = self.drive.borrow_mut().write(self.sector, &self.data_buffer[..SECTOR_SIZE]);

        match result {
            Ok(header) if header.track != self.track => {
                log::debug!("WD2793: wrote {} with track register {}", header, self.track);
                self.status |= ST_RECORD_NOT_FOUND;
                self.end_cmd();
            }
            Ok(header) => {
                self.assert_sector_size(header.size_bytes());
                if self.command.type2().multi() {
                    self.sector = self.sector.wrapping_add(1);
                    let next = self.drive.borrow().time_till_sector(self.sector, time);
                    self.schedule(FsmState::Type2RotatedToSector, next, scheduler);
                }
                else {
                    self.end_cmd();
                }
            }
            Err(e) => self.fail_cmd(e),
        }
    }

    fn assert_sector_size(&self, size: usize) {
        if size != SECTOR_SIZE {
            log::error!("WD2793: drive reported a {} byte sector", size);
        }
        assert_eq!(size, SECTOR_SIZE, "unsupported sector size");
    }

    fn start_type3_cmd(&mut self, time: EmuTime, scheduler: &mut Scheduler) {
        self.status &= !(ST_LOST_DATA | ST_RECORD_NOT_FOUND | ST_RECORD_TYPE);
        self.status |= ST_BUSY;
        self.set_drq(false, time);
        self.command_start = time;

        if !self.drive.borrow().is_disk_inserted() {
            self.end_cmd();
            return;
        }

        self.drive.borrow_mut().set_head_loaded(true, time);
        if self.command.settle_delay() {
            let next = time + EmuDuration::from_millis(SETTLE_DELAY_MS);
            self.schedule(FsmState::Type3WaitHeadSettle, next, scheduler);
        }
        else {
            self.type3_wait_load(time, scheduler);
        }
    }

    fn type3_wait_load(&mut self, time: EmuTime, scheduler: &mut Scheduler) {
        let next = time + self.head_load_wait;
        self.schedule(FsmState::Type3HeadLoaded, next, scheduler);
    }

    fn type3_loaded(&mut self, time: EmuTime) {
        self.command_start = time;
        match self.command.command() {
            Command::ReadAddress => self.read_address_cmd(time),
            Command::ReadTrack => self.read_track_cmd(),
            Command::WriteTrack => self.write_track_cmd(time),
            _ => unreachable!("type III phase of non type III command"),
        }
    }

    fn read_address_cmd(&mut self, time: EmuTime) {
        let result = self.drive.borrow_mut().read_sector_header(time);
        match result {
            Ok(header) => {
                let crc = raw_track::id_field_crc(&header).to_be_bytes();
                self.data_buffer[..4].copy_from_slice(&header.as_bytes());
                self.data_buffer[4..ID_FIELD_LEN].copy_from_slice(&crc);
                self.data_current = 0;
                self.data_available = ID_FIELD_LEN;
                self.drq = false;
                self.transferring = true;
            }
            Err(e) => self.fail_cmd(e),
        }
    }

    fn read_track_cmd(&mut self) {
        let result = self.drive.borrow_mut().read_track_data(&mut self.data_buffer[..]);
        match result {
            Ok(0) => self.end_cmd(),
            Ok(len) => {
                self.data_current = 0;
                self.data_available = len;
                self.drq = false;
                self.transferring = true;
            }
            Err(e) => self.fail_cmd(e),
        }
    }

    fn write_track_cmd(&mut self, time: EmuTime) {
        if self.drive.borrow().is_write_protected() {
            log::debug!("WD2793: write track on write protected disk");
            self.status |= ST_WRITE_PROTECTED;
            self.end_cmd();
            return;
        }
        self.formatting = true;
        self.data_current = 0;
        self.data_buffer.fill(0);
        self.set_drq(true, time);
    }

    fn end_write_track_cmd(&mut self) {
        let result = self.drive.borrow_mut().write_track_data(&self.data_buffer[..]);
        self.data_available = 0;
        self.data_current = 0;
        self.drq = false;
        self.formatting = false;
        match result {
            Ok(()) => self.end_cmd(),
            Err(e) => self.fail_cmd(e),
        }
    }

    fn start_type4_cmd(&mut self, time: EmuTime, scheduler: &mut Scheduler) {
        let flags = self.command.type4();
        if flags.not_ready_to_ready() || flags.ready_to_not_ready() {
            log::debug!("WD2793: unsupported force interrupt conditions {:02X}", self.command.0 & 0x03);
        }

        if self.command.0 & 0x0F == 0 {
            self.immediate_irq = false;
        }
        if flags.index_pulse() {
            self.arm_index_irq(time, scheduler);
        }
        if flags.immediate() {
            self.immediate_irq = true;
        }

        self.set_drq(false, time);
        self.status &= !ST_BUSY;
    }

    fn arm_index_irq(&mut self, time: EmuTime, scheduler: &mut Scheduler) {
        let drive = self.drive.borrow();
        if !drive.is_disk_inserted() {
            return;
        }
        let next = drive.time_till_index_pulse(time);
        if !next.is_infinity() {
            self.sync.arm(scheduler, next, SYNC_IDX_IRQ);
        }
    }

    // ---------------------------------------------------------------------------------------
    // Save state
    // ---------------------------------------------------------------------------------------

    pub fn save_state(&self, scheduler: &Scheduler) -> Wd2793State {
        Wd2793State {
            command_start: self.command_start,
            drq_timer: self.drq_timer,
            fsm_state: self.fsm_state,
            fsm_sync: self.sync.pending_time(scheduler, SYNC_FSM),
            idx_sync: self.sync.pending_time(scheduler, SYNC_IDX_IRQ),
            status: self.status,
            command: self.command,
            sector: self.sector,
            track: self.track,
            data: self.data,
            direction_in: self.direction_in,
            intrq: self.intrq,
            immediate_irq: self.immediate_irq,
            drq: self.drq,
            transferring: self.transferring,
            formatting: self.formatting,
            data_buffer: self.data_buffer.clone(),
            data_current: self.data_current,
            data_available: self.data_available,
        }
    }

    /// Restore a snapshot taken with save_state() and re-arm its pending sync points. The
    /// controller is left unchanged if the snapshot is inconsistent.
    pub fn load_state(&mut self, state: Wd2793State, scheduler: &mut Scheduler) -> Result<(), SaveStateError> {
        state.validate()?;

        self.sync.cancel(scheduler, SYNC_FSM);
        self.sync.cancel(scheduler, SYNC_IDX_IRQ);

        self.command_start = state.command_start;
        self.drq_timer = state.drq_timer;
        self.fsm_state = state.fsm_state;
        self.status = state.status;
        self.command = state.command;
        self.sector = state.sector;
        self.track = state.track;
        self.data = state.data;
        self.direction_in = state.direction_in;
        self.intrq = state.intrq;
        self.immediate_irq = state.immediate_irq;
        self.drq = state.drq;
        self.transferring = state.transferring;
        self.formatting = state.formatting;
        self.data_buffer = state.data_buffer;
        self.data_current = state.data_current;
        self.data_available = state.data_available;

        if let Some(t) = state.fsm_sync {
            self.sync.arm(scheduler, t, SYNC_FSM);
        }
        if let Some(t) = state.idx_sync {
            self.sync.arm(scheduler, t, SYNC_IDX_IRQ);
        }
        log::debug!("WD2793: restored state {} command {:02X}", self.fsm_state, self.command.0);
        Ok(())
    }
}

impl Schedulable for Wd2793 {
    fn execute_until(&mut self, time: EmuTime, tag: SyncTag, scheduler: &mut Scheduler) {
        if tag == SYNC_IDX_IRQ {
            self.intrq = true;
            if self.command.command() == Command::ForceInterrupt && self.command.type4().index_pulse() {
                self.arm_index_irq(time, scheduler);
            }
            return;
        }

        if tag != SYNC_FSM {
            log::error!("WD2793: dispatched with unknown tag {}", tag);
            panic!("WD2793 dispatched with unknown tag {}", tag);
        }

        // A phase only runs if the command that scheduled it is still current.
        let state = std::mem::take(&mut self.fsm_state);
        let command = self.command;
        match state {
            FsmState::Seek => {
                if command.is(CommandType::TypeI) {
                    self.seek_next(time, scheduler);
                }
            }
            FsmState::Type2WaitHeadSettle => {
                if command.is(CommandType::TypeII) {
                    self.type2_wait_load(time, scheduler);
                }
            }
            FsmState::Type2HeadLoaded => {
                if command.is(CommandType::TypeII) {
                    self.type2_loaded(time, scheduler);
                }
            }
            FsmState::Type2RotatedToSector => {
                if command.is(CommandType::TypeII) {
                    self.type2_rotated(time);
                }
            }
            FsmState::Type3WaitHeadSettle => {
                if command.is(CommandType::TypeIII) {
                    self.type3_wait_load(time, scheduler);
                }
            }
            FsmState::Type3HeadLoaded => {
                if command.is(CommandType::TypeIII) {
                    self.type3_loaded(time);
                }
            }
            FsmState::Idle => {
                log::error!("WD2793: FSM dispatched while idle");
                unreachable!("WD2793 FSM dispatched while idle");
            }
        }
    }
}

impl DiskController for Wd2793 {
    fn reset(&mut self, time: EmuTime, scheduler: &mut Scheduler) {
        Wd2793::reset(self, time, scheduler);
    }

    fn read_reg(&mut self, reg: FdcRegister, time: EmuTime, scheduler: &mut Scheduler) -> u8 {
        match reg {
            FdcRegister::StatusCommand => self.get_status_reg(time),
            FdcRegister::Track => self.get_track_reg(),
            FdcRegister::Sector => self.get_sector_reg(),
            FdcRegister::Data => self.get_data_reg(time, scheduler),
        }
    }

    fn peek_reg(&self, reg: FdcRegister, time: EmuTime) -> u8 {
        match reg {
            FdcRegister::StatusCommand => self.peek_status_reg(time),
            FdcRegister::Track => self.track,
            FdcRegister::Sector => self.sector,
            FdcRegister::Data => self.peek_data_reg(),
        }
    }

    fn write_reg(&mut self, reg: FdcRegister, value: u8, time: EmuTime, scheduler: &mut Scheduler) {
        match reg {
            FdcRegister::StatusCommand => self.set_command_reg(value, time, scheduler),
            FdcRegister::Track => self.set_track_reg(value),
            FdcRegister::Sector => self.set_sector_reg(value),
            FdcRegister::Data => self.set_data_reg(value, time, scheduler),
        }
    }

    fn irq(&self, time: EmuTime) -> bool {
        self.get_irq(time)
    }

    fn peek_irq(&self, time: EmuTime) -> bool {
        Wd2793::peek_irq(self, time)
    }

    fn dtrq(&mut self, time: EmuTime) -> bool {
        self.get_dtrq(time)
    }

    fn peek_dtrq(&self, time: EmuTime) -> bool {
        Wd2793::peek_dtrq(self, time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        device_types::disk::SectorHeader,
        devices::disk_drive::mock::{MockCall, MockDrive},
    };

    type Fdc = Rc<RefCell<Wd2793>>;
    type Mock = Rc<RefCell<MockDrive>>;

    fn setup(drive: MockDrive) -> (Scheduler, Fdc, Mock) {
        let mut s = Scheduler::new();
        let mock = drive.shared();
        let fdc = Wd2793::create(&mut s, "wd2793", mock.clone(), EmuTime::ZERO);
        (s, fdc, mock)
    }

    fn ms(n: u64) -> EmuTime {
        EmuTime::ZERO + EmuDuration::from_millis(n)
    }

    fn byte_time() -> EmuDuration {
        EmuDuration::from_micros(500)
    }

    fn command(s: &mut Scheduler, fdc: &Fdc, value: u8, time: EmuTime) {
        s.run_until(time);
        fdc.borrow_mut().set_command_reg(value, time, s);
    }

    fn fsm_pending(s: &Scheduler, fdc: &Fdc) -> Option<EmuTime> {
        fdc.borrow().sync_handle().pending_time(s, SYNC_FSM)
    }

    /// Read `n` bytes through the data register, one per DRQ. Returns the bytes and the time of
    /// the last read.
    fn read_bytes(s: &mut Scheduler, fdc: &Fdc, mut t: EmuTime, n: usize) -> (Vec<u8>, EmuTime) {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            t += byte_time();
            s.run_until(t);
            assert!(fdc.borrow_mut().get_dtrq(t), "DRQ not asserted at byte {}", out.len());
            out.push(fdc.borrow_mut().get_data_reg(t, s));
        }
        (out, t)
    }

    fn write_bytes(s: &mut Scheduler, fdc: &Fdc, mut t: EmuTime, data: &[u8]) -> EmuTime {
        for &b in data {
            t += byte_time();
            s.run_until(t);
            assert!(fdc.borrow_mut().get_dtrq(t));
            fdc.borrow_mut().set_data_reg(b, t, s);
        }
        t
    }

    #[test]
    fn reset_performs_restore() {
        let (_s, fdc, _mock) = setup(MockDrive::default());
        let mut fdc = fdc.borrow_mut();
        assert_eq!(fdc.get_track_reg(), 0);
        assert_eq!(fdc.get_sector_reg(), 1);
        assert!(fdc.get_irq(EmuTime::ZERO));

        let status = fdc.get_status_reg(EmuTime::ZERO);
        assert_eq!(status & ST_BUSY, 0);
        assert_ne!(status & ST_TRACK00, 0);
        assert!(!fdc.get_irq(EmuTime::ZERO));
    }

    #[test]
    fn restore_steps_out_to_track_zero() {
        let (mut s, fdc, mock) = setup(MockDrive {
            track: 5,
            ..Default::default()
        });

        // Reset issues restore with the slowest step rate.
        assert_eq!(fsm_pending(&s, &fdc), Some(ms(30)));
        assert_ne!(fdc.borrow().peek_status_reg(ms(0)) & ST_BUSY, 0);

        s.run_until(ms(1000));
        assert_eq!(mock.borrow().steps(), 5);
        assert!(mock.borrow().calls.iter().all(|c| !matches!(c, MockCall::Step(true))));

        let mut fdc = fdc.borrow_mut();
        assert_eq!(fdc.get_track_reg(), 0);
        assert!(fdc.get_irq(ms(1000)));
        assert_eq!(fdc.get_status_reg(ms(1000)) & ST_BUSY, 0);
    }

    #[test]
    fn seek_steps_at_step_rate() {
        let (mut s, fdc, mock) = setup(MockDrive::default());
        let t0 = ms(10);
        fdc.borrow_mut().set_track_reg(2);
        fdc.borrow_mut().set_data_reg(7, t0, &mut s);
        command(&mut s, &fdc, 0x10, t0);

        let mut callbacks = 0;
        let mut prev = t0;
        while let Some(t) = fsm_pending(&s, &fdc) {
            assert_eq!(t - prev, EmuDuration::from_millis(6));
            s.run_until(t);
            prev = t;
            callbacks += 1;
        }
        assert_eq!(callbacks, 5);
        assert_eq!(mock.borrow().steps(), 5);
        assert_eq!(mock.borrow().track, 5);
        assert_eq!(fdc.borrow().get_track_reg(), 7);
        assert!(fdc.borrow().get_irq(prev));
    }

    #[test]
    fn step_commands() {
        let (mut s, fdc, mock) = setup(MockDrive::default());
        // Step in without track update, then with.
        command(&mut s, &fdc, 0x40, ms(10));
        s.run_until(ms(100));
        assert_eq!(fdc.borrow().get_track_reg(), 0);
        command(&mut s, &fdc, 0x50, ms(100));
        s.run_until(ms(200));
        assert_eq!(fdc.borrow().get_track_reg(), 1);
        // Step repeats the last direction.
        command(&mut s, &fdc, 0x30, ms(200));
        s.run_until(ms(300));
        assert_eq!(fdc.borrow().get_track_reg(), 2);
        assert_eq!(mock.borrow().track, 3);

        // Step out stops at track 0.
        mock.borrow_mut().track = 0;
        command(&mut s, &fdc, 0x70, ms(300));
        assert_eq!(fdc.borrow().get_track_reg(), 0);
        assert_eq!(fsm_pending(&s, &fdc), None);
        assert!(fdc.borrow().get_irq(ms(300)));
    }

    #[test]
    fn verify_reports_track_mismatch() {
        let (mut s, fdc, mock) = setup(MockDrive::default());
        command(&mut s, &fdc, 0x04, ms(10));
        s.run_until(ms(1000));
        assert_eq!(fdc.borrow_mut().get_status_reg(ms(1000)) & ST_SEEK_ERROR, 0);

        mock.borrow_mut().id_track = Some(9);
        command(&mut s, &fdc, 0x04, ms(1000));
        s.run_until(ms(2000));
        assert_ne!(fdc.borrow_mut().get_status_reg(ms(2000)) & ST_SEEK_ERROR, 0);

        // The error is cleared by the next type I command.
        mock.borrow_mut().id_track = None;
        command(&mut s, &fdc, 0x00, ms(2000));
        assert_eq!(fdc.borrow_mut().get_status_reg(ms(2000)) & ST_SEEK_ERROR, 0);
    }

    #[test]
    fn read_sector() {
        let (mut s, fdc, mock) = setup(MockDrive::default());
        fdc.borrow_mut().set_sector_reg(3);
        command(&mut s, &fdc, 0x80, ms(10));

        // Head load wait, then the rotational wait for sector 3.
        assert_eq!(fsm_pending(&s, &fdc), Some(ms(11)));
        s.run_until(ms(11));
        assert_eq!(fdc.borrow().fsm_state(), FsmState::Type2RotatedToSector);
        assert_eq!(fsm_pending(&s, &fdc), Some(ms(14)));
        s.run_until(ms(14));
        assert_eq!(mock.borrow().calls.last(), Some(&MockCall::Read(3)));

        let status = fdc.borrow_mut().get_status_reg(ms(14));
        assert_ne!(status & ST_BUSY, 0);
        assert_ne!(status & ST_DRQ, 0);

        let (data, t) = read_bytes(&mut s, &fdc, ms(14), SECTOR_SIZE);
        assert_eq!(data, MockDrive::sector_pattern(3));
        assert!(fdc.borrow().get_irq(t));
        let status = fdc.borrow_mut().get_status_reg(t);
        assert_eq!(status & (ST_BUSY | ST_DRQ | ST_RECORD_NOT_FOUND), 0);
    }

    #[test]
    fn read_sector_with_settle_delay() {
        let (mut s, fdc, _mock) = setup(MockDrive::default());
        command(&mut s, &fdc, 0x84, ms(10));
        assert_eq!(fsm_pending(&s, &fdc), Some(ms(40)));
        assert_eq!(fdc.borrow().fsm_state(), FsmState::Type2WaitHeadSettle);
        s.run_until(ms(40));
        assert_eq!(fsm_pending(&s, &fdc), Some(ms(41)));
    }

    #[test]
    fn read_sector_errors_end_with_record_not_found() {
        // Track register does not match the ID field.
        let (mut s, fdc, _mock) = setup(MockDrive {
            id_track: Some(5),
            ..Default::default()
        });
        command(&mut s, &fdc, 0x80, ms(10));
        s.run_until(ms(100));
        assert!(fdc.borrow().get_irq(ms(100)));
        let status = fdc.borrow_mut().get_status_reg(ms(100));
        assert_ne!(status & ST_RECORD_NOT_FOUND, 0);
        assert_eq!(status & (ST_BUSY | ST_DRQ), 0);

        // The drive fails the read.
        let (mut s, fdc, _mock) = setup(MockDrive::default());
        fdc.borrow_mut().set_sector_reg(12);
        command(&mut s, &fdc, 0x80, ms(10));
        s.run_until(ms(100));
        assert_ne!(fdc.borrow_mut().get_status_reg(ms(100)) & ST_RECORD_NOT_FOUND, 0);
    }

    #[test]
    fn multi_sector_read_continues_until_not_found() {
        let (mut s, fdc, mock) = setup(MockDrive::default());
        fdc.borrow_mut().set_sector_reg(8);
        command(&mut s, &fdc, 0x90, ms(10));
        s.run_until(ms(30));

        let (data, t) = read_bytes(&mut s, &fdc, ms(30), SECTOR_SIZE);
        assert_eq!(data, MockDrive::sector_pattern(8));
        assert_eq!(fdc.borrow().get_sector_reg(), 9);
        assert!(!fdc.borrow().get_irq(t));
        assert_eq!(fdc.borrow().fsm_state(), FsmState::Type2RotatedToSector);

        let t = t + EmuDuration::from_millis(20);
        s.run_until(t);
        let (data, t) = read_bytes(&mut s, &fdc, t, SECTOR_SIZE);
        assert_eq!(data, MockDrive::sector_pattern(9));

        s.run_until(t + EmuDuration::from_millis(20));
        assert_eq!(
            mock.borrow().calls.iter().filter(|c| matches!(c, MockCall::Read(_))).count(),
            3
        );
        assert_eq!(fdc.borrow().get_sector_reg(), 10);
        assert_ne!(fdc.borrow_mut().get_status_reg(t) & ST_RECORD_NOT_FOUND, 0);
    }

    #[test]
    fn write_sector_hands_off_after_512_bytes() {
        let (mut s, fdc, mock) = setup(MockDrive::default());
        fdc.borrow_mut().set_sector_reg(2);
        command(&mut s, &fdc, 0xA0, ms(10));
        s.run_until(ms(20));
        assert!(fdc.borrow().peek_dtrq(ms(20)));

        let data: Vec<u8> = (0..SECTOR_SIZE).map(|i| (i * 7) as u8).collect();
        let t = write_bytes(&mut s, &fdc, ms(20), &data[..SECTOR_SIZE - 1]);
        assert!(mock.borrow().calls.iter().all(|c| !matches!(c, MockCall::Write(..))));
        assert!(!fdc.borrow().get_irq(t));

        let t = write_bytes(&mut s, &fdc, t, &data[SECTOR_SIZE - 1..]);
        let writes: Vec<_> = mock
            .borrow()
            .calls
            .iter()
            .filter(|c| matches!(c, MockCall::Write(..)))
            .cloned()
            .collect();
        assert_eq!(writes, vec![MockCall::Write(2, data)]);
        assert!(fdc.borrow().get_irq(t));
        assert_eq!(fdc.borrow_mut().get_status_reg(t) & ST_BUSY, 0);

        // Further data writes only reach the data register.
        fdc.borrow_mut().set_data_reg(0x55, t, &mut s);
        assert_eq!(fdc.borrow().peek_data_reg(), 0x55);
        assert_eq!(mock.borrow().calls.iter().filter(|c| matches!(c, MockCall::Write(..))).count(), 1);
    }

    #[test]
    fn multi_sector_write_continues_with_next_sector() {
        let (mut s, fdc, mock) = setup(MockDrive::default());
        fdc.borrow_mut().set_sector_reg(1);
        command(&mut s, &fdc, 0xB0, ms(10));
        s.run_until(ms(20));

        let t = write_bytes(&mut s, &fdc, ms(20), &[0x11; SECTOR_SIZE]);
        assert_eq!(fdc.borrow().get_sector_reg(), 2);
        assert!(!fdc.borrow().get_irq(t));
        assert!(fsm_pending(&s, &fdc).is_some());

        let t = t + EmuDuration::from_millis(10);
        s.run_until(t);
        let t = write_bytes(&mut s, &fdc, t, &[0x22; SECTOR_SIZE]);
        assert_eq!(fdc.borrow().get_sector_reg(), 3);

        // Force interrupt without conditions ends the command without an interrupt.
        command(&mut s, &fdc, 0xD0, t);
        assert_eq!(fsm_pending(&s, &fdc), None);
        assert!(!fdc.borrow().get_irq(t));
        assert_eq!(fdc.borrow_mut().get_status_reg(t) & ST_BUSY, 0);

        let sectors: Vec<u8> = mock
            .borrow()
            .calls
            .iter()
            .filter_map(|c| match c {
                MockCall::Write(n, _) => Some(*n),
                _ => None,
            })
            .collect();
        assert_eq!(sectors, vec![1, 2]);
    }

    #[test]
    fn write_to_protected_disk() {
        let (mut s, fdc, mock) = setup(MockDrive {
            write_protected: true,
            ..Default::default()
        });
        command(&mut s, &fdc, 0xA0, ms(10));
        s.run_until(ms(100));
        let status = fdc.borrow_mut().get_status_reg(ms(100));
        assert_ne!(status & ST_WRITE_PROTECTED, 0);
        assert_eq!(status & ST_BUSY, 0);

        command(&mut s, &fdc, 0xF0, ms(100));
        s.run_until(ms(200));
        assert_ne!(fdc.borrow_mut().get_status_reg(ms(200)) & ST_WRITE_PROTECTED, 0);
        assert!(mock.borrow().calls.iter().all(|c| !matches!(c, MockCall::Write(..) | MockCall::WriteTrack(_))));
    }

    #[test]
    fn no_disk_reports_not_ready() {
        let (mut s, fdc, _mock) = setup(MockDrive {
            disk_inserted: false,
            ..Default::default()
        });
        command(&mut s, &fdc, 0x80, ms(10));
        assert_eq!(fsm_pending(&s, &fdc), None);
        assert!(fdc.borrow().get_irq(ms(10)));
        let status = fdc.borrow_mut().get_status_reg(ms(10));
        assert_ne!(status & ST_NOT_READY, 0);
        assert_eq!(status & ST_BUSY, 0);
    }

    #[test]
    fn write_track_accepts_bytes_between_index_pulses() {
        let (mut s, fdc, mock) = setup(MockDrive::default());
        command(&mut s, &fdc, 0xF0, ms(10));
        s.run_until(ms(11));
        assert!(fdc.borrow().formatting);

        // Before the first index pulse bytes are dropped.
        fdc.borrow_mut().set_data_reg(0xAA, ms(100), &mut s);
        assert!(!fdc.borrow_mut().get_dtrq(ms(150)));

        let mut t = ms(250);
        for b in [1, 2, 3] {
            assert!(fdc.borrow_mut().get_dtrq(t));
            fdc.borrow_mut().set_data_reg(b, t, &mut s);
            t += EmuDuration::from_millis(1);
        }
        assert!(!fdc.borrow().get_irq(t));

        // The second index pulse ends the command when DRQ is next sampled.
        assert!(!fdc.borrow_mut().get_dtrq(ms(401)));
        assert!(fdc.borrow().get_irq(ms(401)));
        assert_eq!(fdc.borrow_mut().get_status_reg(ms(401)) & (ST_BUSY | ST_RECORD_NOT_FOUND), 0);

        let tracks: Vec<Vec<u8>> = mock
            .borrow()
            .calls
            .iter()
            .filter_map(|c| match c {
                MockCall::WriteTrack(raw) => Some(raw.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].len(), RAWTRACK_SIZE);
        assert_eq!(&tracks[0][..4], &[1, 2, 3, 0]);
    }

    #[test]
    fn write_track_ends_on_data_write_after_second_index() {
        let (mut s, fdc, mock) = setup(MockDrive {
            fail_io: true,
            ..Default::default()
        });
        command(&mut s, &fdc, 0xF4, ms(10));
        assert_eq!(fdc.borrow().fsm_state(), FsmState::Type3WaitHeadSettle);
        s.run_until(ms(41));
        fdc.borrow_mut().set_data_reg(0x4E, ms(450), &mut s);
        assert_eq!(mock.borrow().calls.iter().filter(|c| matches!(c, MockCall::WriteTrack(_))).count(), 1);
        // Format failures are reported like any other drive failure.
        assert_ne!(fdc.borrow_mut().get_status_reg(ms(450)) & ST_RECORD_NOT_FOUND, 0);
    }

    #[test]
    fn read_address_transfers_id_field() {
        let (mut s, fdc, _mock) = setup(MockDrive {
            id_track: Some(4),
            ..Default::default()
        });
        command(&mut s, &fdc, 0xC0, ms(10));
        s.run_until(ms(11));
        let (data, t) = read_bytes(&mut s, &fdc, ms(11), ID_FIELD_LEN);
        let crc = raw_track::id_field_crc(&SectorHeader::new(4, 0, 1, 2)).to_be_bytes();
        assert_eq!(data, vec![4, 0, 1, 2, crc[0], crc[1]]);
        assert_eq!(fdc.borrow().get_sector_reg(), 4);
        assert!(fdc.borrow().get_irq(t));
    }

    #[test]
    fn read_track_transfers_raw_track() {
        let (mut s, fdc, _mock) = setup(MockDrive::default());
        command(&mut s, &fdc, 0xE0, ms(10));
        s.run_until(ms(11));
        let (data, t) = read_bytes(&mut s, &fdc, ms(11), RAWTRACK_SIZE);
        assert_eq!(data[..4], [0, 1, 2, 3]);
        assert_eq!(data[300], (300 % 256) as u8);
        assert!(fdc.borrow().get_irq(t));
    }

    #[test]
    fn force_interrupt_aborts_command() {
        let (mut s, fdc, mock) = setup(MockDrive::default());
        fdc.borrow_mut().set_data_reg(40, ms(10), &mut s);
        command(&mut s, &fdc, 0x13, ms(10));
        s.run_until(ms(50));
        assert_eq!(mock.borrow().steps(), 2);

        command(&mut s, &fdc, 0xD0, ms(50));
        assert_eq!(fsm_pending(&s, &fdc), None);
        s.run_until(ms(2000));
        assert_eq!(mock.borrow().steps(), 2);
        assert_eq!(fdc.borrow_mut().get_status_reg(ms(2000)) & ST_BUSY, 0);
    }

    #[test]
    fn stale_phase_is_ignored() {
        let (mut s, fdc, mock) = setup(MockDrive::default());
        command(&mut s, &fdc, 0xD0, ms(10));
        let mut f = fdc.borrow_mut();
        for state in [FsmState::Seek, FsmState::Type2HeadLoaded, FsmState::Type3HeadLoaded] {
            f.fsm_state = state;
            f.execute_until(ms(20), SYNC_FSM, &mut s);
            assert_eq!(f.fsm_state(), FsmState::Idle);
        }
        assert_eq!(mock.borrow().steps(), 0);
        assert_eq!(s.pending_count(), 0);
    }

    #[test]
    fn index_pulse_interrupt() {
        let (mut s, fdc, _mock) = setup(MockDrive::default());
        fdc.borrow_mut().get_status_reg(ms(0));
        command(&mut s, &fdc, 0xD4, ms(10));
        assert!(!fdc.borrow().get_irq(ms(10)));
        assert_eq!(fdc.borrow().sync_handle().pending_time(&s, SYNC_IDX_IRQ), Some(ms(200)));

        s.run_until(ms(200));
        assert!(fdc.borrow().get_irq(ms(200)));
        fdc.borrow_mut().get_status_reg(ms(200));
        assert!(!fdc.borrow().get_irq(ms(200)));

        // Re-armed for every revolution.
        s.run_until(ms(400));
        assert!(fdc.borrow().get_irq(ms(400)));

        // Any new command stops index interrupts.
        command(&mut s, &fdc, 0x00, ms(410));
        assert_eq!(fdc.borrow().sync_handle().pending_time(&s, SYNC_IDX_IRQ), None);
    }

    #[test]
    fn immediate_interrupt_persists() {
        let (mut s, fdc, _mock) = setup(MockDrive::default());
        command(&mut s, &fdc, 0xD8, ms(10));
        fdc.borrow_mut().get_status_reg(ms(10));
        assert!(fdc.borrow().get_irq(ms(10)));
        command(&mut s, &fdc, 0xD0, ms(20));
        assert!(!fdc.borrow().get_irq(ms(20)));
    }

    #[test]
    fn status_meaning_follows_command_type() {
        let (mut s, fdc, _mock) = setup(MockDrive::default());
        // Type I: bit 2 is track 0, bit 5 head loaded.
        command(&mut s, &fdc, 0x08, ms(10));
        let status = fdc.borrow().peek_status_reg(ms(10));
        assert_ne!(status & ST_TRACK00, 0);
        assert_ne!(status & ST_HEAD_LOADED, 0);

        // Type II: bit 2 is lost data, bit 1 is DRQ.
        command(&mut s, &fdc, 0x80, ms(20));
        s.run_until(ms(30));
        let status = fdc.borrow().peek_status_reg(ms(30));
        assert_eq!(status & ST_LOST_DATA, 0);
        assert_ne!(status & ST_DRQ, 0);
        assert_eq!(status & ST_RECORD_TYPE, 0);
    }

    #[test]
    fn peeks_have_no_side_effects() {
        let (mut s, fdc, _mock) = setup(MockDrive::default());
        command(&mut s, &fdc, 0x80, ms(10));
        s.run_until(ms(30));
        let f = fdc.borrow();
        let status = f.peek_status_reg(ms(30));
        assert_eq!(f.peek_status_reg(ms(30)), status);
        assert_eq!(f.peek_data_reg(), MockDrive::sector_pattern(1)[0]);
        assert_eq!(f.peek_data_reg(), MockDrive::sector_pattern(1)[0]);
        assert_eq!(f.data_available, SECTOR_SIZE);
        drop(f);

        s.run_until(ms(10_000));
        let mut f = fdc.borrow_mut();
        f.end_cmd();
        assert!(f.peek_irq(ms(10_000)));
        f.peek_status_reg(ms(10_000));
        assert!(f.peek_irq(ms(10_000)));
        f.get_status_reg(ms(10_000));
        assert!(!f.peek_irq(ms(10_000)));
    }

    #[test]
    fn save_state_round_trip_mid_command() {
        let (mut s1, fdc1, _m1) = setup(MockDrive::default());
        fdc1.borrow_mut().set_sector_reg(5);
        command(&mut s1, &fdc1, 0x80, ms(10));
        s1.run_until(ms(12));
        assert_eq!(fdc1.borrow().fsm_state(), FsmState::Type2RotatedToSector);

        let state = fdc1.borrow().save_state(&s1);
        let json = serde_json::to_string(&state).unwrap();
        let restored: Wd2793State = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, state);

        let (mut s2, fdc2, _m2) = setup(MockDrive::default());
        s2.run_until(ms(12));
        fdc2.borrow_mut().load_state(restored, &mut s2).unwrap();
        assert_eq!(fsm_pending(&s2, &fdc2), fsm_pending(&s1, &fdc1));

        let mut t = ms(12);
        for _ in 0..4 {
            t += EmuDuration::from_millis(1);
            s1.run_until(t);
            s2.run_until(t);
            assert_eq!(
                fdc1.borrow_mut().get_status_reg(t),
                fdc2.borrow_mut().get_status_reg(t)
            );
        }
        let (d1, _) = read_bytes(&mut s1, &fdc1, t, SECTOR_SIZE);
        let (d2, _) = read_bytes(&mut s2, &fdc2, t, SECTOR_SIZE);
        assert_eq!(d1, d2);
        assert_eq!(d1, MockDrive::sector_pattern(5));
    }

    #[test]
    fn load_state_rejects_inconsistent_snapshot() {
        let (mut s, fdc, _mock) = setup(MockDrive::default());
        let good = fdc.borrow().save_state(&s);

        let mut state = good.clone();
        state.fsm_state = FsmState::Seek;
        assert_eq!(
            fdc.borrow_mut().load_state(state, &mut s),
            Err(SaveStateError::MissingSyncPoint(FsmState::Seek))
        );

        let mut state = good.clone();
        state.data_buffer.truncate(512);
        assert_eq!(fdc.borrow_mut().load_state(state, &mut s), Err(SaveStateError::BufferSize(512)));
        assert_eq!(
            SaveStateError::BufferSize(512).to_string(),
            format!("Data buffer has 512 bytes, expected {}", RAWTRACK_SIZE)
        );

        let mut state = good.clone();
        state.data_current = RAWTRACK_SIZE;
        state.data_available = 1;
        assert!(fdc.borrow_mut().load_state(state, &mut s).is_err());

        let mut state = good.clone();
        state.data_current = 1;
        state.data_available = usize::MAX;
        assert_eq!(
            fdc.borrow_mut().load_state(state, &mut s),
            Err(SaveStateError::CursorOutOfRange {
                current:   1,
                available: usize::MAX,
            })
        );

        let mut state = good.clone();
        state.formatting = true;
        state.data_current = RAWTRACK_SIZE + 1;
        assert!(fdc.borrow_mut().load_state(state, &mut s).is_err());

        // A read sector in progress with nothing left to transfer.
        let mut state = good;
        state.command = CommandReg(0x80);
        state.status = ST_BUSY;
        state.transferring = true;
        state.data_available = 0;
        assert_eq!(fdc.borrow_mut().load_state(state, &mut s), Err(SaveStateError::EmptyTransfer));

        // Rejected snapshots leave the controller usable.
        let expected = fdc.borrow().peek_data_reg();
        assert_eq!(fdc.borrow_mut().get_data_reg(ms(20), &mut s), expected);
    }

    #[test]
    fn command_log_records_commands() {
        let (mut s, fdc, _mock) = setup(MockDrive::default());
        command(&mut s, &fdc, 0xD0, ms(10));
        let log = fdc.borrow().cmd_log();
        assert_eq!(log.len(), 2);
        assert!(log[0].contains("03 Restore"));
        assert!(log[1].contains("D0 ForceInterrupt"));
    }
}
