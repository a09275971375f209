/// Per-agent Lamport clock.
///
/// Starts at 0, advances on every local protocol event and on receipt of any
/// timestamped message. The value never decreases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LamportClock {
    time: u64,
}

impl LamportClock {
    pub fn new() -> Self {
        Self { time: 0 }
    }

    pub fn now(&self) -> u64 {
        self.time
    }

    /// Local event: advance and return the new value.
    pub fn tick(&mut self) -> u64 {
        self.time += 1;
        self.time
    }

    /// Receipt of a message stamped `remote`: `max(local, remote) + 1`.
    pub fn observe(&mut self, remote: u64) -> u64 {
        self.time = self.time.max(remote) + 1;
        self.time
    }
}
