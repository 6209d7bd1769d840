//! Tick-driven countdown timers.
//!
//! A [`LacTimer`] only counts; it never calls anything. Per-port protocol
//! timers (current_while, periodic, wait_while, ntt_delay) are ticked by
//! their own machines. Two timers per port are also *registered* in the
//! [`TimerRegistry`], and the engine's global walk ticks those and
//! dispatches their expiry.

/// Countdown timer advanced by explicit ticks.
///
/// `tick` disarms the timer once the elapsed count reaches the target;
/// callers detect expiry by checking [`is_active`](Self::is_active) after
/// ticking.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LacTimer {
    active: bool,
    ticks: u32,
    expire: u32,
}

impl LacTimer {
    pub const fn new() -> Self {
        LacTimer {
            active: false,
            ticks: 0,
            expire: 0,
        }
    }

    /// Arms the timer for `ticks` ticks, discarding any previous count.
    pub fn start(&mut self, ticks: u32) {
        self.ticks = 0;
        self.expire = ticks;
        self.active = true;
    }

    pub fn stop(&mut self) {
        self.active = false;
    }

    pub fn tick(&mut self) {
        if !self.active {
            return;
        }
        self.ticks += 1;
        if self.ticks >= self.expire {
            self.ticks = 0;
            self.active = false;
        }
    }

    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Ticks left before expiry, zero when disarmed.
    pub fn remaining(&self) -> u32 {
        if self.active {
            self.expire.saturating_sub(self.ticks)
        } else {
            0
        }
    }
}

/// Which per-port timer a registry entry refers to; also selects the
/// callback run on expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Drives the per-port machine tick.
    PortTick,
    /// Transmission opportunity for the transmit machine.
    TxScheduler,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    pub port_no: u16,
    pub kind: TimerKind,
}

/// Ordered chain of registered timers.
///
/// The registry is owned by the engine, so registration, removal and the
/// walk are serialized by `&mut` access. The walk iterates a snapshot and
/// re-validates each handle, so a callback may unregister ports mid-walk.
#[derive(Debug, Default)]
pub struct TimerRegistry {
    chain: Vec<TimerHandle>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a timer at the head of the chain, as the walk visits newest
    /// registrations first.
    pub fn register(&mut self, handle: TimerHandle) {
        if !self.chain.contains(&handle) {
            self.chain.insert(0, handle);
        }
    }

    /// Removes every timer belonging to `port_no`.
    pub fn unregister_port(&mut self, port_no: u16) {
        self.chain.retain(|h| h.port_no != port_no);
    }

    pub fn contains(&self, handle: &TimerHandle) -> bool {
        self.chain.contains(handle)
    }

    pub fn snapshot(&self) -> Vec<TimerHandle> {
        self.chain.clone()
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_expires_after_duration() {
        let mut timer = LacTimer::new();
        timer.start(3);
        timer.tick();
        timer.tick();
        assert!(timer.is_active());
        assert_eq!(timer.remaining(), 1);
        timer.tick();
        assert!(!timer.is_active());
        assert_eq!(timer.remaining(), 0);
    }

    #[test]
    fn test_zero_duration_expires_on_first_tick() {
        let mut timer = LacTimer::new();
        timer.start(0);
        assert!(timer.is_active());
        timer.tick();
        assert!(!timer.is_active());
    }

    #[test]
    fn test_restart_resets_count() {
        let mut timer = LacTimer::new();
        timer.start(2);
        timer.tick();
        timer.start(2);
        timer.tick();
        assert!(timer.is_active());
    }

    #[test]
    fn test_stopped_timer_ignores_ticks() {
        let mut timer = LacTimer::new();
        timer.start(1);
        timer.stop();
        timer.tick();
        assert!(!timer.is_active());
    }

    #[test]
    fn test_registry_order_and_unregister() {
        let mut registry = TimerRegistry::new();
        for port_no in [1, 2] {
            registry.register(TimerHandle {
                port_no,
                kind: TimerKind::PortTick,
            });
            registry.register(TimerHandle {
                port_no,
                kind: TimerKind::TxScheduler,
            });
        }
        registry.register(TimerHandle {
            port_no: 1,
            kind: TimerKind::PortTick,
        });
        assert_eq!(registry.len(), 4);
        assert_eq!(registry.snapshot()[0].port_no, 2);

        registry.unregister_port(2);
        assert_eq!(registry.len(), 2);
        assert!(registry.snapshot().iter().all(|h| h.port_no == 1));
    }
}
