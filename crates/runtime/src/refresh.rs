use std::rc::Rc;

use foundation::time::Time;

use crate::clock::Clock;

/// Why a refresh was scheduled.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum RefreshKind {
    /// Periodic reload (`refreshMode` = `onInterval`).
    Interval,
    /// Reload when cached content expires (`refreshMode` = `onExpire`).
    Expire,
    /// Reload after the view has been still for a while (`viewRefreshMode` = `onStop`).
    ViewStop,
    /// Host-requested reload.
    Manual,
}

/// A delayed refresh: becomes active `delay_s` seconds after it is added.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshEvent<P> {
    pub kind: RefreshKind,
    pub payload: P,
    pub delay_s: f64,
}

impl<P> RefreshEvent<P> {
    pub fn new(kind: RefreshKind, payload: P, delay_s: f64) -> Self {
        Self {
            kind,
            payload,
            delay_s,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RefreshId(pub u64);

#[derive(Debug)]
struct Scheduled<P> {
    id: RefreshId,
    fire_at: Time,
    event: RefreshEvent<P>,
}

/// Pull-based refresh queue.
///
/// Events become eligible once their fire time has passed on the listener's
/// clock, but are only handed out by [`RefreshListener::get_active_events`].
/// Nothing is ever invoked from a timer, so consumers stay on the thread that
/// drives rendering. Each event is delivered exactly once.
pub struct RefreshListener<P> {
    clock: Rc<dyn Clock>,
    next_id: u64,
    pending: Vec<Scheduled<P>>,
}

impl<P> RefreshListener<P> {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            clock,
            next_id: 0,
            pending: Vec::new(),
        }
    }

    pub fn now(&self) -> Time {
        self.clock.now()
    }

    pub fn add_event(&mut self, event: RefreshEvent<P>) -> RefreshId {
        let id = RefreshId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        let delay = if event.delay_s.is_finite() {
            event.delay_s.max(0.0)
        } else {
            0.0
        };
        let fire_at = Time(self.clock.now().0 + delay);
        self.pending.push(Scheduled { id, fire_at, event });
        id
    }

    /// Removes and returns every event whose fire time has elapsed, ordered by
    /// fire time and then by insertion.
    pub fn get_active_events(&mut self) -> Vec<RefreshEvent<P>> {
        let now = self.clock.now();
        let (mut due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|s| s.fire_at.0 <= now.0);
        self.pending = waiting;

        due.sort_by(|a, b| a.fire_at.0.total_cmp(&b.fire_at.0).then_with(|| a.id.cmp(&b.id)));
        due.into_iter().map(|s| s.event).collect()
    }

    pub fn cancel(&mut self, id: RefreshId) -> bool {
        let before = self.pending.len();
        self.pending.retain(|s| s.id != id);
        self.pending.len() != before
    }

    /// Drops pending events whose payload matches `pred`.
    pub fn cancel_where(&mut self, mut pred: impl FnMut(&RefreshEvent<P>) -> bool) -> usize {
        let before = self.pending.len();
        self.pending.retain(|s| !pred(&s.event));
        before - self.pending.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn next_fire_time(&self) -> Option<Time> {
        self.pending
            .iter()
            .map(|s| s.fire_at)
            .min_by(|a, b| a.0.total_cmp(&b.0))
    }
}

impl<P> std::fmt::Debug for RefreshListener<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshListener")
            .field("pending", &self.pending.len())
            .field("next_id", &self.next_id)
            .finish()
    }
}
