//! One-shot alarm scheduling for the sensor drivers.
//!
//! The drivers never wait on the bus. Instead they arm an alarm through a
//! [`Scheduler`] and finish the operation from the alarm context in
//! [`Sensor::on_alarm`](crate::sensors::Sensor::on_alarm), whose [`Rearm`]
//! return value asks for the same alarm to fire again later.
//!
//! [`AlarmQueue`] is a software implementation backed by a fixed-capacity
//! queue. On hardware it is serviced from a timer interrupt via [`dispatch`];
//! in the simulator a timer thread plays that role.

use core::cell::RefCell;
use core::num::NonZeroU32;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Duration, Instant};
use log::debug;
use thiserror_no_std::Error;

/// Identifies one armed alarm. Handles are never reused while armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlarmHandle(pub(crate) NonZeroU32);

impl AlarmHandle {
    pub const fn id(self) -> u32 {
        self.0.get()
    }
}

/// What an alarm callback wants to happen next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rearm {
    /// The alarm is finished and its handle released
    Done,
    /// Fire the same alarm again after the given delay
    After(Duration),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("alarm queue is full")]
    Full,
}

/// Timer services consumed by the drivers.
pub trait Scheduler {
    /// Current time on the scheduler's clock.
    fn now(&self) -> Instant;

    /// Arm an alarm firing at `deadline`. A deadline in the past fires as
    /// soon as the scheduler is next serviced.
    fn schedule_at(&mut self, deadline: Instant) -> Result<AlarmHandle, ScheduleError>;

    /// Arm an alarm firing `delay` from now.
    fn schedule_after(&mut self, delay: Duration) -> Result<AlarmHandle, ScheduleError> {
        let deadline = self.now() + delay;
        self.schedule_at(deadline)
    }

    /// Disarm an alarm. Returns `false` if it already finished or was never
    /// armed, which is not an error.
    fn cancel(&mut self, handle: AlarmHandle) -> bool;
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    handle: AlarmHandle,
    owner: u8,
    deadline: Instant,
    /// Handed to the dispatcher; its callback has not reported back yet
    firing: bool,
}

/// Fixed-capacity set of armed alarms.
///
/// Each alarm records an `owner` id so the dispatcher knows which driver's
/// callback to run when it expires. An expired alarm stays queued while its
/// callback runs, so cancelling it in that window still takes effect.
pub struct AlarmQueue<const N: usize> {
    entries: heapless::Vec<Entry, N>,
    last_id: u32,
}

impl<const N: usize> AlarmQueue<N> {
    pub const fn new() -> Self {
        Self {
            entries: heapless::Vec::new(),
            last_id: 0,
        }
    }

    fn next_handle(&mut self) -> AlarmHandle {
        loop {
            self.last_id = self.last_id.wrapping_add(1);
            let Some(id) = NonZeroU32::new(self.last_id) else {
                continue;
            };
            let handle = AlarmHandle(id);
            if !self.contains(handle) {
                return handle;
            }
        }
    }

    pub fn insert(&mut self, owner: u8, deadline: Instant) -> Result<AlarmHandle, ScheduleError> {
        if self.entries.is_full() {
            return Err(ScheduleError::Full);
        }
        let handle = self.next_handle();
        self.entries
            .push(Entry {
                handle,
                owner,
                deadline,
                firing: false,
            })
            .map_err(|_| ScheduleError::Full)?;
        Ok(handle)
    }

    /// Remove an alarm, including one whose callback is running.
    pub fn cancel(&mut self, handle: AlarmHandle) -> bool {
        match self.entries.iter().position(|e| e.handle == handle) {
            Some(index) => {
                self.entries.swap_remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, handle: AlarmHandle) -> bool {
        self.entries.iter().any(|e| e.handle == handle)
    }

    /// Earliest deadline among alarms not currently firing, for programming
    /// a hardware compare register.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries
            .iter()
            .filter(|e| !e.firing)
            .map(|e| e.deadline)
            .min()
    }

    /// Mark the earliest alarm due at `now` as firing and return it.
    ///
    /// The alarm stays queued until [`finish`](Self::finish) is called.
    pub fn claim_due(&mut self, now: Instant) -> Option<(AlarmHandle, u8)> {
        let entry = self
            .entries
            .iter_mut()
            .filter(|e| !e.firing && e.deadline <= now)
            .min_by_key(|e| e.deadline)?;
        entry.firing = true;
        Some((entry.handle, entry.owner))
    }

    /// Settle a claimed alarm: rearm it at `next` under the same handle, or
    /// release it when `next` is `None`.
    ///
    /// Returns `false` if the alarm was cancelled while its callback ran, in
    /// which case nothing is rearmed.
    pub fn finish(&mut self, handle: AlarmHandle, next: Option<Instant>) -> bool {
        let Some(index) = self.entries.iter().position(|e| e.handle == handle) else {
            return false;
        };
        match next {
            Some(deadline) => {
                let entry = &mut self.entries[index];
                entry.deadline = deadline;
                entry.firing = false;
            }
            None => {
                self.entries.swap_remove(index);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<const N: usize> Default for AlarmQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Alarm queue shared between the foreground and the timer interrupt.
pub type SharedAlarms<const N: usize> = Mutex<CriticalSectionRawMutex, RefCell<AlarmQueue<N>>>;

/// A driver's view of a [`SharedAlarms`] queue.
///
/// Every alarm armed through a slot carries the slot's owner id, which
/// [`dispatch`] hands back when the alarm expires.
pub struct AlarmSlot<'a, const N: usize> {
    queue: &'a SharedAlarms<N>,
    owner: u8,
    clock: fn() -> Instant,
}

impl<'a, const N: usize> AlarmSlot<'a, N> {
    pub const fn new(queue: &'a SharedAlarms<N>, owner: u8, clock: fn() -> Instant) -> Self {
        Self {
            queue,
            owner,
            clock,
        }
    }
}

impl<const N: usize> Scheduler for AlarmSlot<'_, N> {
    fn now(&self) -> Instant {
        (self.clock)()
    }

    fn schedule_at(&mut self, deadline: Instant) -> Result<AlarmHandle, ScheduleError> {
        self.queue
            .lock(|queue| queue.borrow_mut().insert(self.owner, deadline))
    }

    fn cancel(&mut self, handle: AlarmHandle) -> bool {
        self.queue.lock(|queue| queue.borrow_mut().cancel(handle))
    }
}

/// Run every alarm that is due at `now`.
///
/// `fire` receives the owner id of the expired alarm and runs that driver's
/// callback. The queue is not locked while `fire` runs, so the callback may
/// use its own [`AlarmSlot`]. An alarm cancelled before its callback's
/// [`Rearm`] is applied stays cancelled. At most `N` alarms are run per call
/// so a callback rearming with a zero delay cannot spin forever.
///
/// Returns the number of callbacks run.
pub fn dispatch<const N: usize>(
    queue: &SharedAlarms<N>,
    now: Instant,
    mut fire: impl FnMut(u8) -> Rearm,
) -> usize {
    let mut fired = 0;
    while fired < N {
        let Some((handle, owner)) = queue.lock(|q| q.borrow_mut().claim_due(now)) else {
            break;
        };
        fired += 1;

        let next = match fire(owner) {
            Rearm::Done => None,
            Rearm::After(delay) => Some(now + delay),
        };
        if !queue.lock(|q| q.borrow_mut().finish(handle, next)) {
            debug!("Alarm {} for owner {} cancelled while firing", handle.id(), owner);
        }
    }
    fired
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    #[test]
    fn test_claim_due_returns_earliest_first() {
        let mut queue = AlarmQueue::<4>::new();
        let late = queue.insert(1, at(30)).unwrap();
        let early = queue.insert(2, at(10)).unwrap();

        assert_eq!(queue.next_deadline(), Some(at(10)));
        assert_eq!(queue.claim_due(at(5)), None);
        assert_eq!(queue.claim_due(at(40)), Some((early, 2)));
        assert_eq!(queue.claim_due(at(40)), Some((late, 1)));
        assert_eq!(queue.claim_due(at(40)), None);

        assert!(queue.finish(early, None));
        assert!(queue.finish(late, None));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_firing_alarm_is_not_claimed_twice() {
        let mut queue = AlarmQueue::<2>::new();
        let handle = queue.insert(0, at(10)).unwrap();

        assert_eq!(queue.claim_due(at(10)), Some((handle, 0)));
        assert_eq!(queue.claim_due(at(10)), None);
        assert_eq!(queue.next_deadline(), None);
        assert_eq!(queue.len(), 1);

        assert!(queue.finish(handle, Some(at(20))));
        assert_eq!(queue.next_deadline(), Some(at(20)));
    }

    #[test]
    fn test_handles_are_unique() {
        let mut queue = AlarmQueue::<4>::new();
        let a = queue.insert(0, at(1)).unwrap();
        let b = queue.insert(0, at(1)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_full_queue_rejects_insert() {
        let mut queue = AlarmQueue::<1>::new();
        queue.insert(0, at(1)).unwrap();
        assert_eq!(queue.insert(0, at(2)), Err(ScheduleError::Full));
    }

    #[test]
    fn test_cancel_after_finish_is_noop() {
        let mut queue = AlarmQueue::<2>::new();
        let handle = queue.insert(0, at(1)).unwrap();
        assert!(queue.claim_due(at(1)).is_some());
        assert!(queue.finish(handle, None));
        assert!(!queue.cancel(handle));
    }

    #[test]
    fn test_dispatch_rearms_same_handle() {
        let queue: SharedAlarms<2> = Mutex::new(RefCell::new(AlarmQueue::new()));
        let handle = queue.lock(|q| q.borrow_mut().insert(7, at(10))).unwrap();

        let mut owners = [0u8; 2];
        let mut calls = 0;
        let fired = dispatch(&queue, at(10), |owner| {
            owners[calls] = owner;
            calls += 1;
            Rearm::After(Duration::from_millis(5))
        });
        assert_eq!(fired, 1);
        assert_eq!(owners[0], 7);

        queue.lock(|q| {
            let q = q.borrow();
            assert!(q.contains(handle));
            assert_eq!(q.next_deadline(), Some(at(15)));
        });

        let fired = dispatch(&queue, at(15), |_| Rearm::Done);
        assert_eq!(fired, 1);
        queue.lock(|q| assert!(q.borrow().is_empty()));
    }

    #[test]
    fn test_dispatch_skips_rearm_of_alarm_cancelled_while_firing() {
        let queue: SharedAlarms<2> = Mutex::new(RefCell::new(AlarmQueue::new()));
        let handle = queue.lock(|q| q.borrow_mut().insert(0, at(10))).unwrap();

        let fired = dispatch(&queue, at(10), |_| {
            // The foreground disarms the alarm after the callback asked for more time
            assert!(queue.lock(|q| q.borrow_mut().cancel(handle)));
            Rearm::After(Duration::from_millis(5))
        });

        assert_eq!(fired, 1);
        queue.lock(|q| assert!(q.borrow().is_empty()));
    }

    #[test]
    fn test_dispatch_bounds_zero_delay_rearm() {
        let queue: SharedAlarms<2> = Mutex::new(RefCell::new(AlarmQueue::new()));
        queue.lock(|q| q.borrow_mut().insert(0, at(0))).unwrap();

        let fired = dispatch(&queue, at(0), |_| Rearm::After(Duration::from_ticks(0)));
        assert_eq!(fired, 2);
    }

    #[test]
    fn test_slot_tags_alarms_with_owner() {
        fn clock() -> Instant {
            Instant::from_millis(100)
        }

        let queue: SharedAlarms<2> = Mutex::new(RefCell::new(AlarmQueue::new()));
        let mut slot = AlarmSlot::new(&queue, 3, clock);

        let handle = slot.schedule_after(Duration::from_millis(20)).unwrap();
        let due = queue.lock(|q| q.borrow_mut().claim_due(at(120)));
        assert_eq!(due, Some((handle, 3)));

        // Still cancellable until the dispatcher settles it
        assert!(slot.cancel(handle));
        assert!(!slot.cancel(handle));
    }
}
