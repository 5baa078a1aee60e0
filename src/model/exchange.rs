/// Cadence rules for sending advertisements, counted in clock ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangePolicy {
    pub periodic_interval_ticks: u64,
    pub min_trigger_spacing_ticks: u64,
}

impl ExchangePolicy {
    pub fn periodic(interval_ticks: u64) -> Self {
        Self {
            periodic_interval_ticks: interval_ticks.max(1),
            min_trigger_spacing_ticks: 0,
        }
    }

    pub fn hybrid(interval_ticks: u64, min_trigger_spacing_ticks: u64) -> Self {
        Self {
            periodic_interval_ticks: interval_ticks.max(1),
            min_trigger_spacing_ticks,
        }
    }
}

/// Mutable gating state: remembers when the last periodic and triggered
/// advertisements went out so callers can ask "is one due now?".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExchangeState {
    last_periodic: Option<u64>,
    last_triggered: Option<u64>,
}

impl ExchangeState {
    pub fn periodic_due(&mut self, tick: u64, policy: ExchangePolicy) -> bool {
        let due = match self.last_periodic {
            None => true,
            Some(last) => tick.saturating_sub(last) >= policy.periodic_interval_ticks,
        };
        if due {
            self.last_periodic = Some(tick);
        }
        due
    }

    pub fn trigger_due(&mut self, tick: u64, policy: ExchangePolicy) -> bool {
        let due = match self.last_triggered {
            None => true,
            Some(last) => tick.saturating_sub(last) >= policy.min_trigger_spacing_ticks,
        };
        if due {
            self.last_triggered = Some(tick);
        }
        due
    }

    /// A periodic advertisement carries everything a triggered one would, so
    /// the periodic send also restarts the trigger spacing window.
    pub fn mark_sent(&mut self, tick: u64) {
        self.last_periodic = Some(tick);
        self.last_triggered = Some(tick);
    }
}
