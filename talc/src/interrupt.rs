//! Preemption requests from the timer unit to the interpreter.
//!
//! The interpreter polls `pending` between instructions without taking the
//! lock. Everything else goes through `latch`: the timer unit holds it while
//! it sleeps, so a stop request and the enable/disable latch never race with
//! a tick.
use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
struct Latch {
    enabled: bool,
    stop: bool,
}

#[derive(Debug)]
pub struct Interrupts {
    pending: AtomicBool,
    /// A request that arrived while interrupts were disabled.
    deferred: AtomicBool,
    latch: Mutex<Latch>,
    wake: Condvar,
}

impl Default for Interrupts {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupts {
    pub fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
            deferred: AtomicBool::new(false),
            latch: Mutex::new(Latch {
                enabled: true,
                stop: false,
            }),
            wake: Condvar::new(),
        }
    }

    pub fn request_preempt(&self) {
        let latch = self.latch.lock();
        self.request_locked(&latch);
    }

    fn request_locked(&self, latch: &Latch) {
        if latch.enabled {
            self.pending.store(true, Ordering::Release);
        } else {
            self.deferred.store(true, Ordering::Release);
        }
    }

    /// Consumes a pending request.
    #[inline]
    pub fn poll(&self) -> bool {
        self.pending.load(Ordering::Relaxed) && self.pending.swap(false, Ordering::AcqRel)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    pub fn is_deferred(&self) -> bool {
        self.deferred.load(Ordering::Acquire)
    }

    pub fn is_enabled(&self) -> bool {
        self.latch.lock().enabled
    }

    pub fn disable(&self) {
        let mut latch = self.latch.lock();
        latch.enabled = false;
        if self.pending.swap(false, Ordering::AcqRel) {
            self.deferred.store(true, Ordering::Release);
        }
    }

    pub fn enable(&self) {
        let mut latch = self.latch.lock();
        latch.enabled = true;
        if self.deferred.swap(false, Ordering::AcqRel) {
            self.pending.store(true, Ordering::Release);
        }
    }

    /// Drops pending and deferred requests and re-enables interrupts.
    pub fn reset(&self) {
        let mut latch = self.latch.lock();
        latch.enabled = true;
        self.pending.store(false, Ordering::Release);
        self.deferred.store(false, Ordering::Release);
    }
}

/// The timer execution unit. Requests a preemption once per time slice until
/// stopped or dropped.
pub struct TimerUnit {
    interrupts: Arc<Interrupts>,
    handle: Option<JoinHandle<()>>,
}

impl TimerUnit {
    pub fn start(interrupts: Arc<Interrupts>, slice: Duration) -> io::Result<Self> {
        interrupts.latch.lock().stop = false;
        let shared = Arc::clone(&interrupts);
        let handle = thread::Builder::new()
            .name("talc-timer".into())
            .spawn(move || timer_loop(&shared, slice))?;
        log::debug!("timer unit started with a {slice:?} slice");
        Ok(Self {
            interrupts,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        {
            let mut latch = self.interrupts.latch.lock();
            latch.stop = true;
            self.interrupts.wake.notify_all();
        }
        if handle.join().is_err() {
            log::error!("timer unit panicked");
        }
        log::debug!("timer unit stopped");
    }
}

impl Drop for TimerUnit {
    fn drop(&mut self) {
        self.stop();
    }
}

fn timer_loop(interrupts: &Interrupts, slice: Duration) {
    let mut latch = interrupts.latch.lock();
    while !latch.stop {
        let timed_out = interrupts.wake.wait_for(&mut latch, slice).timed_out();
        if latch.stop {
            break;
        }
        if timed_out {
            interrupts.request_locked(&latch);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn poll_consumes_the_request() {
        let interrupts = Interrupts::new();
        assert!(!interrupts.poll());
        interrupts.request_preempt();
        assert!(interrupts.poll());
        assert!(!interrupts.poll());
    }

    #[test]
    fn disabled_requests_are_deferred_until_enabled() {
        let interrupts = Interrupts::new();
        interrupts.disable();
        interrupts.request_preempt();
        assert!(!interrupts.is_pending());
        assert!(interrupts.is_deferred());
        assert!(!interrupts.poll());
        interrupts.enable();
        assert!(!interrupts.is_deferred());
        assert!(interrupts.poll());
    }

    #[test]
    fn disabling_moves_a_pending_request_aside() {
        let interrupts = Interrupts::new();
        interrupts.request_preempt();
        interrupts.disable();
        assert!(!interrupts.poll());
        interrupts.enable();
        assert!(interrupts.poll());
    }

    #[test]
    fn timer_ticks_and_stops_promptly() {
        let interrupts = Arc::new(Interrupts::new());
        let mut timer = TimerUnit::start(Arc::clone(&interrupts), Duration::from_millis(2)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !interrupts.is_pending() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(interrupts.poll(), "timer never requested a preemption");

        // a long slice still stops immediately
        let started = Instant::now();
        timer.stop();
        let mut slow = TimerUnit::start(Arc::clone(&interrupts), Duration::from_secs(60)).unwrap();
        slow.stop();
        assert!(started.elapsed() < Duration::from_secs(30));
    }
}
