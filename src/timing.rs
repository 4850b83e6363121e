//! Rolling-average timing model backing the blind detection technique
//! (§4.A). Each plugin instance owns one `TimingModel`, fed by every
//! non-blind `render()` call and consulted by every blind primitive to
//! decide how long a response must take before it counts as "delayed".

use std::collections::VecDeque;

const SAMPLE_CAPACITY: usize = 5;
const SEED_SECONDS: f64 = 0.5;

/// Default delay added on top of the rolling average for an ordinary blind
/// probe (§4.A).
pub const DEFAULT_BLIND_DELAY_SECS: u64 = 4;

/// Default delay added on top of the rolling average while re-verifying a
/// possible blind injection (§4.D step 3).
pub const DEFAULT_VERIFY_DELAY_SECS: u64 = 30;

/// Bounded FIFO of recent non-blind render round-trip times, plus the two
/// delay budgets and the one-shot variance warning flag.
#[derive(Debug, Clone)]
pub struct TimingModel {
    samples: VecDeque<f64>,
    blind_delay_secs: u64,
    verify_delay_secs: u64,
    variance_warned: bool,
}

impl TimingModel {
    /// Build a new model seeded with one 0.5s sample, using the given delay
    /// budgets (from the channel's user arguments, §4.G).
    pub fn new(blind_delay_secs: u64, verify_delay_secs: u64) -> Self {
        let mut samples = VecDeque::with_capacity(SAMPLE_CAPACITY);
        samples.push_back(SEED_SECONDS);
        Self {
            samples,
            blind_delay_secs,
            verify_delay_secs,
            variance_warned: false,
        }
    }

    /// Record a newly observed non-blind render duration, evicting the
    /// oldest sample once the buffer is full.
    pub fn append(&mut self, duration_secs: f64) {
        if self.samples.len() == SAMPLE_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back(duration_secs);
    }

    /// Floor of the arithmetic mean of the current sample buffer, in
    /// seconds.
    pub fn average(&self) -> u64 {
        let sum: f64 = self.samples.iter().sum();
        (sum / self.samples.len() as f64).floor() as u64
    }

    /// Expected delay threshold for a blind decision: `average + D`, where
    /// `D` is the verify delay while re-confirming a possible injection, or
    /// the ordinary blind delay otherwise (§4.A, property 7 of §8).
    pub fn expected_delay(&self, blind_test: bool) -> u64 {
        let d = if blind_test {
            self.verify_delay_secs
        } else {
            self.blind_delay_secs
        };
        self.average() + d
    }

    /// Emit a one-shot "timing varies too much" warning the first time the
    /// sample spread exceeds the active delay budget. Returns `true` only
    /// on the call that first crosses the threshold.
    pub fn check_variance(&mut self, blind_test: bool) -> bool {
        if self.variance_warned {
            return false;
        }
        let max = self.samples.iter().cloned().fold(f64::MIN, f64::max);
        let min = self.samples.iter().cloned().fold(f64::MAX, f64::min);
        let d = if blind_test {
            self.verify_delay_secs
        } else {
            self.blind_delay_secs
        } as f64;
        if max - min > d {
            self.variance_warned = true;
            true
        } else {
            false
        }
    }
}

impl Default for TimingModel {
    fn default() -> Self {
        Self::new(DEFAULT_BLIND_DELAY_SECS, DEFAULT_VERIFY_DELAY_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_with_half_second_average() {
        let tm = TimingModel::default();
        assert_eq!(tm.average(), 0);
        assert_eq!(tm.expected_delay(false), DEFAULT_BLIND_DELAY_SECS);
    }

    #[test]
    fn expected_delay_switches_to_verify_budget_during_blind_test() {
        let mut tm = TimingModel::new(4, 30);
        for _ in 0..5 {
            tm.append(2.0);
        }
        assert_eq!(tm.average(), 2);
        assert_eq!(tm.expected_delay(false), 6);
        assert_eq!(tm.expected_delay(true), 32);
    }

    #[test]
    fn capacity_is_bounded_to_five_most_recent_samples() {
        let mut tm = TimingModel::new(4, 30);
        for i in 1..=10 {
            tm.append(i as f64);
        }
        // only the last five (6,7,8,9,10) remain, average floor((6+7+8+9+10)/5)=8
        assert_eq!(tm.average(), 8);
    }

    #[test]
    fn variance_warning_is_one_shot() {
        let mut tm = TimingModel::new(4, 30);
        tm.append(0.5);
        tm.append(10.0); // spread 9.5 > 4
        assert!(tm.check_variance(false));
        assert!(!tm.check_variance(false));
    }

    #[test]
    fn monotone_blind_decision_given_same_average_and_delay() {
        let tm = TimingModel::new(4, 30);
        let threshold = tm.expected_delay(false);
        let decide = |delta: u64| delta >= threshold;
        // property 5 of TESTABLE PROPERTIES: monotone in duration
        assert!(decide(threshold) >= decide(threshold - 1));
        assert!(decide(threshold + 1) >= decide(threshold));
    }
}
