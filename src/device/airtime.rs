//! Duty cycle and fair-use accounting
//!
//! Neither limit is enforced by the engine; the application decides when to
//! transmit next.

use core::time::Duration;

/// TTN fair-use budget per device and day
pub const FAIR_USE_DAILY_AIRTIME: Duration = Duration::from_secs(30);

/// Mandatory silence after a transmission of `airtime` on a channel limited
/// to `duty_cycle` percent
pub fn duty_cycle_wait(duty_cycle: f32, airtime: Duration) -> Duration {
    let factor = (100.0 - duty_cycle as f64).max(0.0);
    airtime.mul_f64(factor)
}

/// Cumulative airtime against a daily budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AirtimeLedger {
    budget: Duration,
    used: Duration,
}

impl Default for AirtimeLedger {
    fn default() -> Self {
        Self::new(FAIR_USE_DAILY_AIRTIME)
    }
}

impl AirtimeLedger {
    /// Ledger with a daily budget
    pub const fn new(budget: Duration) -> Self {
        Self {
            budget,
            used: Duration::ZERO,
        }
    }

    /// Add the airtime of one transmission
    pub fn record(&mut self, airtime: Duration) {
        self.used = self.used.saturating_add(airtime);
    }

    /// Airtime used since the last reset
    pub fn used(&self) -> Duration {
        self.used
    }

    /// Airtime left today
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.used)
    }

    /// Whether the budget is spent
    pub fn exhausted(&self) -> bool {
        self.used >= self.budget
    }

    /// Start a new day
    pub fn reset(&mut self) {
        self.used = Duration::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_percent_wait() {
        let wait = duty_cycle_wait(1.0, Duration::from_millis(500));
        assert_eq!(wait.as_millis(), 49_500);
    }

    #[test]
    fn ten_percent_wait() {
        let wait = duty_cycle_wait(10.0, Duration::from_millis(100));
        assert_eq!(wait.as_millis(), 9_000);
    }

    #[test]
    fn ledger_budget() {
        let mut ledger = AirtimeLedger::default();
        ledger.record(Duration::from_secs(20));
        assert_eq!(ledger.remaining(), Duration::from_secs(10));
        assert!(!ledger.exhausted());
        ledger.record(Duration::from_secs(15));
        assert_eq!(ledger.remaining(), Duration::ZERO);
        assert!(ledger.exhausted());
        ledger.reset();
        assert_eq!(ledger.used(), Duration::ZERO);
    }
}
