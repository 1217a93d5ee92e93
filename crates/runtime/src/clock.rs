use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

use foundation::time::Time;

/// Source of "now" for anything scheduled against wall or simulated time.
pub trait Clock {
    fn now(&self) -> Time;
}

/// Monotonic wall clock, in seconds since construction.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Time {
        Time(self.origin.elapsed().as_secs_f64())
    }
}

/// Explicitly advanced clock. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_s: Rc<Cell<f64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, t: Time) {
        self.now_s.set(t.0);
    }

    pub fn advance(&self, dt_s: f64) {
        self.now_s.set(self.now_s.get() + dt_s);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Time {
        Time(self.now_s.get())
    }
}

/// Deterministic frame timebase: time is always `index * dt_s`.
///
/// Hosts that drive the session from a fixed-step render loop call
/// [`FrameClock::next_frame`] once per tick so replays see identical timing.
#[derive(Debug, Clone)]
pub struct FrameClock {
    index: Rc<Cell<u64>>,
    dt_s: f64,
}

impl FrameClock {
    pub fn new(dt_s: f64) -> Self {
        Self {
            index: Rc::new(Cell::new(0)),
            dt_s,
        }
    }

    pub fn frame_index(&self) -> u64 {
        self.index.get()
    }

    pub fn next_frame(&self) -> u64 {
        let next = self.index.get() + 1;
        self.index.set(next);
        next
    }
}

impl Clock for FrameClock {
    fn now(&self) -> Time {
        Time(self.index.get() as f64 * self.dt_s)
    }
}

#[cfg(test)]
mod tests {
    use super::{Clock, FrameClock, ManualClock};
    use foundation::time::Time;

    #[test]
    fn manual_clock_clones_share_time() {
        let a = ManualClock::new();
        let b = a.clone();
        a.advance(2.5);
        assert_eq!(b.now(), Time(2.5));
        b.set(Time(10.0));
        assert_eq!(a.now(), Time(10.0));
    }

    #[test]
    fn frame_time_is_deterministic() {
        let clock = FrameClock::new(0.5);
        assert_eq!(clock.now(), Time(0.0));
        assert_eq!(clock.next_frame(), 1);
        clock.next_frame();
        assert_eq!(clock.frame_index(), 2);
        assert_eq!(clock.now(), Time(1.0));
    }
}
