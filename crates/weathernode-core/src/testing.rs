//! Test doubles shared by the driver tests

use std::cell::RefCell;
use std::num::NonZeroU32;
use std::rc::Rc;
use std::vec::Vec;

use embassy_time::{Duration, Instant};

use crate::scheduler::{AlarmHandle, ScheduleError, Scheduler};

struct Inner {
    now: Instant,
    last_id: u32,
    armed: Vec<(AlarmHandle, Instant)>,
    cancelled: Vec<AlarmHandle>,
    refuse: bool,
}

/// Scheduler with a hand-cranked clock.
///
/// Clones share state, so a test keeps one clone while the driver owns the
/// other. Alarms never fire on their own: the test takes them with
/// [`ManualScheduler::take_due`] and calls the driver's callback itself.
#[derive(Clone)]
pub struct ManualScheduler {
    inner: Rc<RefCell<Inner>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                now: Instant::from_millis(0),
                last_id: 0,
                armed: Vec::new(),
                cancelled: Vec::new(),
                refuse: false,
            })),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut inner = self.inner.borrow_mut();
        inner.now += by;
    }

    pub fn armed(&self) -> Vec<(AlarmHandle, Instant)> {
        self.inner.borrow().armed.clone()
    }

    pub fn cancelled(&self) -> Vec<AlarmHandle> {
        self.inner.borrow().cancelled.clone()
    }

    /// Make every further `schedule_*` call fail.
    pub fn refuse_alarms(&self) {
        self.inner.borrow_mut().refuse = true;
    }

    /// Remove the earliest alarm due at the current time, as delivery would.
    pub fn take_due(&self) -> Option<AlarmHandle> {
        let mut inner = self.inner.borrow_mut();
        let now = inner.now;
        let index = inner
            .armed
            .iter()
            .enumerate()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .min_by_key(|(_, (_, deadline))| *deadline)
            .map(|(i, _)| i)?;
        Some(inner.armed.remove(index).0)
    }
}

impl Scheduler for ManualScheduler {
    fn now(&self) -> Instant {
        self.inner.borrow().now
    }

    fn schedule_at(&mut self, deadline: Instant) -> Result<AlarmHandle, ScheduleError> {
        let mut inner = self.inner.borrow_mut();
        if inner.refuse {
            return Err(ScheduleError::Full);
        }
        inner.last_id += 1;
        let id = NonZeroU32::new(inner.last_id).ok_or(ScheduleError::Full)?;
        let handle = AlarmHandle(id);
        inner.armed.push((handle, deadline));
        Ok(handle)
    }

    fn cancel(&mut self, handle: AlarmHandle) -> bool {
        let mut inner = self.inner.borrow_mut();
        inner.cancelled.push(handle);
        match inner.armed.iter().position(|(h, _)| *h == handle) {
            Some(index) => {
                inner.armed.remove(index);
                true
            }
            None => false,
        }
    }
}
