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

    core::scheduler.rs

    Implements the virtual time scheduler.

    Devices that need to be woken at a point in virtual time register with the
    Scheduler and receive a SyncHandle. A device arms sync points through its
    handle; each sync point is identified by the (device, tag) pair, and at most
    one may be pending per pair.

    Sync points are dispatched in time order. Sync points armed for the same
    time are dispatched in the order they were armed. A dispatch pass only
    considers sync points that were armed before the pass began; anything a
    callback arms is left for the next pass.
*/

use std::{
    cell::RefCell,
    collections::BTreeMap,
    fmt,
    rc::{Rc, Weak},
};

use fxhash::FxHashMap;

use crate::emu_time::EmuTime;

/// An opaque per-device tag distinguishing independent timers of one device.
pub type SyncTag = u32;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchedulableId(u32);

impl fmt::Display for SchedulableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The capability implemented by every time-driven device.
pub trait Schedulable {
    /// Called by the scheduler when a sync point armed with `tag` is reached. `time` is the
    /// time the sync point was armed for. The device may arm further sync points through
    /// `scheduler`.
    fn execute_until(&mut self, time: EmuTime, tag: SyncTag, scheduler: &mut Scheduler);
}

/// A device's binding to the scheduler. Provides the arm/cancel/query helpers bound to the
/// owning device.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SyncHandle {
    id: SchedulableId,
}

impl SyncHandle {
    pub fn id(&self) -> SchedulableId {
        self.id
    }

    pub fn arm(&self, scheduler: &mut Scheduler, time: EmuTime, tag: SyncTag) {
        scheduler.arm(self.id, time, tag);
    }

    pub fn cancel(&self, scheduler: &mut Scheduler, tag: SyncTag) {
        scheduler.cancel(self.id, tag);
    }

    pub fn is_pending(&self, scheduler: &Scheduler, tag: SyncTag) -> bool {
        scheduler.is_pending(self.id, tag)
    }

    pub fn pending_time(&self, scheduler: &Scheduler, tag: SyncTag) -> Option<EmuTime> {
        scheduler.pending_time(self.id, tag)
    }
}

struct DeviceEntry {
    name: String,
    device: Weak<RefCell<dyn Schedulable>>,
}

#[derive(Copy, Clone, Debug)]
struct SyncPoint {
    id:  SchedulableId,
    tag: SyncTag,
}

type QueueKey = (EmuTime, u64);

#[derive(Default)]
pub struct Scheduler {
    current_time: EmuTime,
    next_id: u32,
    next_seq: u64,
    queue: BTreeMap<QueueKey, SyncPoint>,
    index: FxHashMap<(SchedulableId, SyncTag), QueueKey>,
    devices: FxHashMap<SchedulableId, DeviceEntry>,
}

impl Scheduler {
    pub fn new() -> Self {
        Default::default()
    }

    /// Construct a device and register it. The constructor receives the device's SyncHandle.
    pub fn register<S, F>(&mut self, name: &str, ctor: F) -> Rc<RefCell<S>>
    where
        S: Schedulable + 'static,
        F: FnOnce(SyncHandle) -> S,
    {
        let id = SchedulableId(self.next_id);
        self.next_id += 1;

        let device = Rc::new(RefCell::new(ctor(SyncHandle { id })));
        let dyn_device: Rc<RefCell<dyn Schedulable>> = device.clone();
        self.devices.insert(
            id,
            DeviceEntry {
                name:   name.to_string(),
                device: Rc::downgrade(&dyn_device),
            },
        );
        log::debug!("Scheduler: registered device {} as {}", name, id);
        device
    }

    /// Remove a device and cancel all of its pending sync points.
    pub fn unregister(&mut self, id: SchedulableId) {
        self.purge(id);
        if let Some(entry) = self.devices.remove(&id) {
            log::debug!("Scheduler: unregistered device {} ({})", entry.name, id);
        }
    }

    pub fn current_time(&self) -> EmuTime {
        self.current_time
    }

    pub fn device_name(&self, id: SchedulableId) -> Option<&str> {
        self.devices.get(&id).map(|e| e.name.as_str())
    }

    /// Arm a sync point for `(id, tag)` at `time`.
    ///
    /// Panics if a sync point for `(id, tag)` is already pending.
    pub fn arm(&mut self, id: SchedulableId, time: EmuTime, tag: SyncTag) {
        if let Some(key) = self.index.get(&(id, tag)) {
            log::error!(
                "Scheduler: device {} armed tag {} at {} while already pending at {}",
                self.device_name(id).unwrap_or("?"),
                tag,
                time,
                key.0
            );
            panic!("sync point for device {} tag {} armed twice", id, tag);
        }

        let mut time = time;
        if time < self.current_time {
            log::warn!(
                "Scheduler: device {} armed tag {} in the past ({} < {})",
                self.device_name(id).unwrap_or("?"),
                tag,
                time,
                self.current_time
            );
            time = self.current_time;
        }

        let key = (time, self.next_seq);
        self.next_seq += 1;
        self.queue.insert(key, SyncPoint { id, tag });
        self.index.insert((id, tag), key);
    }

    pub fn cancel(&mut self, id: SchedulableId, tag: SyncTag) {
        if let Some(key) = self.index.remove(&(id, tag)) {
            self.queue.remove(&key);
        }
    }

    pub fn is_pending(&self, id: SchedulableId, tag: SyncTag) -> bool {
        self.pending_time(id, tag).is_some()
    }

    pub fn pending_time(&self, id: SchedulableId, tag: SyncTag) -> Option<EmuTime> {
        if !self.is_live(id) {
            return None;
        }
        self.index.get(&(id, tag)).map(|key| key.0)
    }

    /// Return the number of pending sync points. Sync points of dropped devices are not counted.
    pub fn pending_count(&self) -> usize {
        self.queue.values().filter(|sp| self.is_live(sp.id)).count()
    }

    /// Return the time of the earliest pending sync point, if any.
    pub fn next_sync_time(&self) -> Option<EmuTime> {
        self.queue
            .iter()
            .find(|(_, sp)| self.is_live(sp.id))
            .map(|(key, _)| key.0)
    }

    fn is_live(&self, id: SchedulableId) -> bool {
        self.devices
            .get(&id)
            .is_some_and(|entry| entry.device.strong_count() > 0)
    }

    /// Drop the registry entries and sync points of every device that no longer exists.
    pub fn purge_dropped(&mut self) {
        let dead: Vec<SchedulableId> = self
            .devices
            .iter()
            .filter(|(_, entry)| entry.device.strong_count() == 0)
            .map(|(id, _)| *id)
            .collect();
        for id in dead {
            log::debug!("Scheduler: device {} is gone; dropping its pending sync points", id);
            self.unregister(id);
        }
    }

    /// Perform one dispatch pass up to and including `time`.
    ///
    /// Only sync points armed before the pass began are dispatched. If a sync point armed
    /// during the pass becomes the earliest due entry, the pass stops there so that dispatch
    /// stays in time order, and the current time is left at that entry's time.
    ///
    /// Returns true if no sync point at or before `time` remains pending.
    pub fn advance_to(&mut self, time: EmuTime) -> bool {
        self.purge_dropped();
        let horizon = self.next_seq;

        while let Some((&key, &sp)) = self.queue.first_key_value() {
            let (sp_time, seq) = key;
            if sp_time > time {
                break;
            }
            if seq >= horizon {
                // Armed during this pass.
                self.current_time = self.current_time.max(sp_time);
                return false;
            }

            self.queue.remove(&key);
            self.index.remove(&(sp.id, sp.tag));
            self.current_time = self.current_time.max(sp_time);
            self.dispatch(sp, sp_time);
        }

        self.current_time = self.current_time.max(time);
        true
    }

    /// Repeat dispatch passes until nothing at or before `time` remains pending.
    pub fn run_until(&mut self, time: EmuTime) {
        while !self.advance_to(time) {}
    }

    fn dispatch(&mut self, sp: SyncPoint, time: EmuTime) {
        let device = match self.devices.get(&sp.id) {
            Some(entry) => entry.device.upgrade(),
            None => None,
        };

        match device {
            Some(device) => {
                log::trace!("Scheduler: dispatch {} tag {} at {}", sp.id, sp.tag, time);
                device.borrow_mut().execute_until(time, sp.tag, self);
            }
            None => {
                log::warn!(
                    "Scheduler: device {} is gone; dropping its pending sync points",
                    sp.id
                );
                self.purge(sp.id);
                self.devices.remove(&sp.id);
            }
        }
    }

    fn purge(&mut self, id: SchedulableId) {
        let keys: Vec<(SchedulableId, SyncTag)> = self.index.keys().filter(|(i, _)| *i == id).copied().collect();
        for k in keys {
            if let Some(qk) = self.index.remove(&k) {
                self.queue.remove(&qk);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emu_time::EmuDuration;

    type Log = Rc<RefCell<Vec<(&'static str, EmuTime, SyncTag)>>>;

    struct Recorder {
        name: &'static str,
        handle: SyncHandle,
        log: Log,
        // When dispatched with tag 0, re-arm tag 0 at this offset.
        rearm: Option<EmuDuration>,
    }

    impl Schedulable for Recorder {
        fn execute_until(&mut self, time: EmuTime, tag: SyncTag, scheduler: &mut Scheduler) {
            self.log.borrow_mut().push((self.name, time, tag));
            if let (0, Some(d)) = (tag, self.rearm) {
                self.handle.arm(scheduler, time + d, 0);
            }
        }
    }

    fn recorder(s: &mut Scheduler, name: &'static str, log: &Log, rearm: Option<EmuDuration>) -> Rc<RefCell<Recorder>> {
        s.register(name, |handle| Recorder {
            name,
            handle,
            log: log.clone(),
            rearm,
        })
    }

    fn t(us: u64) -> EmuTime {
        EmuTime::ZERO + EmuDuration::from_micros(us)
    }

    #[test]
    fn dispatches_in_time_order() {
        let mut s = Scheduler::new();
        let log: Log = Default::default();
        let a = recorder(&mut s, "a", &log, None);
        let b = recorder(&mut s, "b", &log, None);

        let ha = a.borrow().handle;
        let hb = b.borrow().handle;
        ha.arm(&mut s, t(30), 0);
        hb.arm(&mut s, t(10), 0);
        ha.arm(&mut s, t(20), 1);

        assert_eq!(s.pending_count(), 3);
        assert_eq!(s.next_sync_time(), Some(t(10)));
        assert!(s.advance_to(t(25)));
        assert_eq!(*log.borrow(), vec![("b", t(10), 0), ("a", t(20), 1)]);
        assert_eq!(s.current_time(), t(25));
        assert!(ha.is_pending(&s, 0));
        assert!(!ha.is_pending(&s, 1));
        assert_eq!(ha.pending_time(&s, 0), Some(t(30)));
    }

    #[test]
    fn coincident_sync_points_dispatch_in_arm_order() {
        let mut s = Scheduler::new();
        let log: Log = Default::default();
        let a = recorder(&mut s, "a", &log, None);
        let b = recorder(&mut s, "b", &log, None);
        let c = recorder(&mut s, "c", &log, None);

        c.borrow().handle.arm(&mut s, t(5), 0);
        a.borrow().handle.arm(&mut s, t(5), 0);
        b.borrow().handle.arm(&mut s, t(5), 0);

        s.advance_to(t(5));
        let names: Vec<_> = log.borrow().iter().map(|e| e.0).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    #[should_panic(expected = "armed twice")]
    fn double_arm_panics() {
        let mut s = Scheduler::new();
        let log: Log = Default::default();
        let a = recorder(&mut s, "a", &log, None);
        let h = a.borrow().handle;
        h.arm(&mut s, t(1), 3);
        h.arm(&mut s, t(2), 3);
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut s = Scheduler::new();
        let log: Log = Default::default();
        let a = recorder(&mut s, "a", &log, None);
        let h = a.borrow().handle;
        h.cancel(&mut s, 0);
        h.arm(&mut s, t(1), 0);
        h.cancel(&mut s, 0);
        h.cancel(&mut s, 0);
        assert_eq!(s.pending_count(), 0);
        s.advance_to(t(10));
        assert!(log.borrow().is_empty());
        // The tag may be armed again once cancelled.
        h.arm(&mut s, t(12), 0);
        assert!(h.is_pending(&s, 0));
    }

    #[test]
    fn rearm_during_pass_waits_for_next_pass() {
        let mut s = Scheduler::new();
        let log: Log = Default::default();
        let a = recorder(&mut s, "a", &log, Some(EmuDuration::from_micros(1)));
        a.borrow().handle.arm(&mut s, t(1), 0);

        assert!(!s.advance_to(t(10)));
        assert_eq!(log.borrow().len(), 1);
        assert_eq!(s.current_time(), t(2));

        s.run_until(t(10));
        let times: Vec<_> = log.borrow().iter().map(|e| e.1).collect();
        assert_eq!(times, (1..=10).map(t).collect::<Vec<_>>());
        assert_eq!(s.current_time(), t(10));
        assert_eq!(s.next_sync_time(), Some(t(11)));
    }

    #[test]
    fn dropped_device_is_never_dispatched() {
        let mut s = Scheduler::new();
        let log: Log = Default::default();
        let a = recorder(&mut s, "a", &log, None);
        let b = recorder(&mut s, "b", &log, None);
        a.borrow().handle.arm(&mut s, t(1), 0);
        a.borrow().handle.arm(&mut s, t(2), 1);
        b.borrow().handle.arm(&mut s, t(3), 0);
        let ha = a.borrow().handle;
        drop(a);

        assert_eq!(s.pending_count(), 1);
        assert!(!ha.is_pending(&s, 0));
        assert_eq!(ha.pending_time(&s, 1), None);
        assert_eq!(s.next_sync_time(), Some(t(3)));

        s.purge_dropped();
        assert_eq!(s.device_name(ha.id()), None);
        assert_eq!(s.pending_count(), 1);

        s.run_until(t(5));
        assert_eq!(*log.borrow(), vec![("b", t(3), 0)]);
        assert_eq!(s.pending_count(), 0);
    }

    #[test]
    fn dropped_device_leaves_nothing_pending() {
        let mut s = Scheduler::new();
        let log: Log = Default::default();
        let d = recorder(&mut s, "d", &log, None);
        d.borrow().handle.arm(&mut s, t(5000), 0);
        let h = d.borrow().handle;
        drop(d);

        assert_eq!(s.pending_count(), 0);
        assert!(!h.is_pending(&s, 0));
        assert_eq!(s.next_sync_time(), None);
    }

    #[test]
    fn unregister_cancels_pending() {
        let mut s = Scheduler::new();
        let log: Log = Default::default();
        let a = recorder(&mut s, "a", &log, None);
        let h = a.borrow().handle;
        h.arm(&mut s, t(1), 0);
        h.arm(&mut s, t(1), 1);
        assert_eq!(s.device_name(h.id()), Some("a"));
        s.unregister(h.id());
        assert_eq!(s.pending_count(), 0);
        assert_eq!(s.device_name(h.id()), None);
    }
}
