//! Per-cycle bookkeeping.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

/// Monotonic token identifying one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CycleId(u64);

impl CycleId {
    pub fn first() -> Self {
        CycleId(1)
    }

    pub fn next(self) -> Self {
        CycleId(self.0 + 1)
    }
}

impl fmt::Display for CycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Completion barrier for one fan-out of requests.
///
/// `total` is fixed when the cycle is issued; resizing the pool afterwards
/// only affects the next cycle.
#[derive(Debug, Clone)]
pub struct Cycle {
    id: CycleId,
    total: usize,
    settled: usize,
    succeeded: usize,
    failed: usize,
    discarded: usize,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl Cycle {
    pub fn new(id: CycleId, total: usize) -> Self {
        Self {
            id,
            total,
            settled: 0,
            succeeded: 0,
            failed: 0,
            discarded: 0,
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn id(&self) -> CycleId {
        self.id
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn settled(&self) -> usize {
        self.settled
    }

    pub fn is_complete(&self) -> bool {
        self.settled == self.total
    }

    pub(crate) fn record_success(&mut self) {
        self.succeeded += 1;
        self.settle();
    }

    pub(crate) fn record_failure(&mut self) {
        self.failed += 1;
        self.settle();
    }

    pub(crate) fn record_discard(&mut self) {
        self.discarded += 1;
        self.settle();
    }

    fn settle(&mut self) {
        debug_assert!(self.settled < self.total, "cycle {} over-settled", self.id);
        self.settled = (self.settled + 1).min(self.total);
    }

    /// Summary of the cycle so far.
    pub fn report(&self) -> CycleReport {
        CycleReport {
            cycle: self.id,
            total: self.total,
            succeeded: self.succeeded,
            failed: self.failed,
            discarded: self.discarded,
            started_at: self.started_at,
            elapsed: self.started.elapsed(),
        }
    }
}

/// Outcome summary logged when a cycle settles.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle: CycleId,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub discarded: usize,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycle {} started {} settled {}/{} ok, {} failed, {} discarded in {:.2}s",
            self.cycle,
            self.started_at.format("%H:%M:%S"),
            self.succeeded,
            self.total,
            self.failed,
            self.discarded,
            self.elapsed.as_secs_f64()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_completes_only_after_all_settle() {
        let mut cycle = Cycle::new(CycleId::first(), 3);
        assert!(!cycle.is_complete());

        cycle.record_success();
        cycle.record_failure();
        assert!(!cycle.is_complete());
        assert_eq!(cycle.settled(), 2);

        cycle.record_discard();
        assert!(cycle.is_complete());

        let report = cycle.report();
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.discarded, 1);
    }

    #[test]
    fn test_empty_cycle_is_complete() {
        let cycle = Cycle::new(CycleId::first(), 0);
        assert!(cycle.is_complete());
    }

    #[test]
    fn test_cycle_ids_are_monotonic() {
        let a = CycleId::first();
        let b = a.next();
        assert!(b > a);
        assert_eq!(b.to_string(), "2");
    }
}
