use std::fmt;

/// What happened when a resource was requested from a cache.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CacheEvent {
    /// No usable entry; a new fetch was issued.
    Started,
    /// A pending fetch was joined.
    Joined,
    /// A completed value was returned.
    Hit,
    /// A failed entry was replaced by a new fetch.
    Retried,
    Evicted,
}

impl CacheEvent {
    pub const ALL: [CacheEvent; 5] = [
        CacheEvent::Started,
        CacheEvent::Joined,
        CacheEvent::Hit,
        CacheEvent::Retried,
        CacheEvent::Evicted,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CacheEvent::Started => "started",
            CacheEvent::Joined => "joined",
            CacheEvent::Hit => "hit",
            CacheEvent::Retried => "retried",
            CacheEvent::Evicted => "evicted",
        }
    }
}

impl fmt::Display for CacheEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-event tallies for a resource cache. Iteration follows [`CacheEvent::ALL`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheMetrics {
    counts: [u64; CacheEvent::ALL.len()],
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, event: CacheEvent) {
        self.counts[event as usize] += 1;
    }

    pub fn get(&self, event: CacheEvent) -> u64 {
        self.counts[event as usize]
    }

    /// Requests served without issuing a fetch.
    pub fn deduplicated(&self) -> u64 {
        self.get(CacheEvent::Joined) + self.get(CacheEvent::Hit)
    }

    pub fn iter(&self) -> impl Iterator<Item = (CacheEvent, u64)> + '_ {
        CacheEvent::ALL.into_iter().map(|e| (e, self.get(e)))
    }

    pub fn reset(&mut self) {
        self.counts = Default::default();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{CacheEvent, CacheMetrics};

    #[test]
    fn records_per_event() {
        let mut m = CacheMetrics::new();
        m.record(CacheEvent::Started);
        m.record(CacheEvent::Joined);
        m.record(CacheEvent::Joined);
        m.record(CacheEvent::Hit);
        assert_eq!(m.get(CacheEvent::Joined), 2);
        assert_eq!(m.get(CacheEvent::Retried), 0);
        assert_eq!(m.deduplicated(), 3);

        m.reset();
        assert_eq!(m.get(CacheEvent::Started), 0);
    }

    #[test]
    fn iterates_in_declaration_order() {
        let mut m = CacheMetrics::new();
        m.record(CacheEvent::Evicted);
        let names: Vec<String> = m.iter().map(|(e, n)| format!("{e}={n}")).collect();
        assert_eq!(
            names,
            vec!["started=0", "joined=0", "hit=0", "retried=0", "evicted=1"]
        );
    }
}
