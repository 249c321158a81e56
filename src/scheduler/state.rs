//! Poll cycle state machine.
//!
//! [`PollScheduler`] owns the slot pool and the active [`Cycle`]. It does no
//! I/O: [`PollScheduler::start`] hands back one [`FetchTicket`] per slot and
//! the caller feeds each outcome to [`PollScheduler::complete`]. Timers live
//! in the run loop; the scheduler only reports that it is [`State::Armed`].
//!
//! ```text
//!   Idle ──start──▶ CycleInFlight ──settled == total──▶ Armed
//!                        ▲                                │
//!                        └────────────start───────────────┘
//!   restart: any state ──▶ CycleInFlight (or Armed when the pool is empty)
//! ```

use super::cycle::{Cycle, CycleId, CycleReport};
use crate::aggregate::AggregateView;
use crate::error::{FetchError, MonitorError};
use crate::pool::{SlotKey, SlotPool};
use crate::sink::{PresentationSink, RenderInstruction};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum State {
    /// Nothing running and nothing scheduled.
    Idle,
    /// Requests issued, not all settled.
    CycleInFlight,
    /// Cycle settled; the next one is waiting on the timer.
    Armed,
}

/// One outstanding request: which cycle issued it and for which slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    pub cycle: CycleId,
    pub slot: SlotKey,
}

/// Why a completion was thrown away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// The slot was removed (or replaced) after the request was issued.
    SlotRemoved,
    /// The issuing cycle was superseded and the result was a failure.
    StaleCycle,
    /// The issuing cycle was superseded and a newer cycle already updated
    /// this slot.
    SupersededByNewerCycle,
}

/// What happened to a completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Disposition {
    /// Folded into the slot and counted toward the active cycle.
    Applied(AggregateView),
    /// Folded into the slot, but it came from a superseded cycle and is not
    /// counted.
    AppliedLate(AggregateView),
    /// Fetch failed; counted, slot left as it was.
    Failed,
    Discarded(DiscardReason),
}

/// Result of [`PollScheduler::complete`].
#[derive(Debug, Clone)]
pub struct Completion {
    pub disposition: Disposition,
    /// Set when this completion settled the active cycle.
    pub settled_cycle: Option<CycleReport>,
}

/// Owns the pool and drives the fan-out / fan-in of each cycle.
#[derive(Debug)]
pub struct PollScheduler {
    pool: SlotPool,
    state: State,
    next_cycle: CycleId,
    active: Option<Cycle>,
    cycles_completed: u64,
}

impl PollScheduler {
    pub fn new(pool: SlotPool) -> Self {
        Self {
            pool,
            state: State::Idle,
            next_cycle: CycleId::first(),
            active: None,
            cycles_completed: 0,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn pool(&self) -> &SlotPool {
        &self.pool
    }

    /// The cycle currently settling (or the last one, once armed).
    pub fn active_cycle(&self) -> Option<&Cycle> {
        self.active.as_ref()
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed
    }

    /// Begin a new cycle from `Idle` or `Armed`.
    pub fn start(&mut self) -> Result<Vec<FetchTicket>, MonitorError> {
        if self.state == State::CycleInFlight {
            return Err(MonitorError::CycleInFlight);
        }
        Ok(self.begin_cycle())
    }

    /// Supersede whatever is running and begin a new cycle immediately.
    ///
    /// Requests from the superseded cycle are not cancelled; their results
    /// are handled by the stale-cycle rules in [`complete`](Self::complete).
    pub fn restart(&mut self) -> Vec<FetchTicket> {
        if let Some(cycle) = self.active.as_ref().filter(|c| !c.is_complete()) {
            info!(
                "Superseding cycle {} with {}/{} settled",
                cycle.id(),
                cycle.settled(),
                cycle.total()
            );
        }
        self.begin_cycle()
    }

    /// Resize the pool to `count` slots and restart.
    ///
    /// Negative counts, and counts the pool cannot allocate, are rejected
    /// without touching the pool or the cycle.
    pub fn set_slot_count(&mut self, count: i64) -> Result<Vec<FetchTicket>, MonitorError> {
        if count < 0 {
            return Err(MonitorError::NegativeSlotCount(count));
        }
        let size = usize::try_from(count).map_err(|_| MonitorError::SlotCountTooLarge(count))?;

        info!("Setting slot count to {}", size);
        self.pool.resize(size).map_err(|e| {
            warn!("Cannot resize slot pool to {}: {}", size, e);
            MonitorError::SlotCountTooLarge(count)
        })?;
        Ok(self.restart())
    }

    fn begin_cycle(&mut self) -> Vec<FetchTicket> {
        let id = self.next_cycle;
        self.next_cycle = id.next();

        let slots = self.pool.current_slots();
        let cycle = Cycle::new(id, slots.len());

        let tickets: Vec<FetchTicket> = slots
            .into_iter()
            .map(|slot| FetchTicket { cycle: id, slot })
            .collect();

        for ticket in &tickets {
            if let Some(slot) = self.pool.get_mut(ticket.slot) {
                slot.mark_pending(id);
            }
            debug!("Request issued for slot {} (cycle {})", ticket.slot.index, id);
        }

        self.active = Some(cycle);

        if tickets.is_empty() {
            debug!("Cycle {} has no slots; settling immediately", id);
            self.settle_active();
        } else {
            info!("Cycle {} issued {} requests", id, tickets.len());
            self.state = State::CycleInFlight;
        }

        tickets
    }

    /// Record the outcome of one request.
    pub fn complete<P: PresentationSink + ?Sized>(
        &mut self,
        ticket: FetchTicket,
        result: Result<f64, FetchError>,
        sink: &mut P,
    ) -> Completion {
        let active_id = self.active.as_ref().map(Cycle::id);
        let is_active = active_id == Some(ticket.cycle) && self.state == State::CycleInFlight;

        let disposition = if is_active {
            self.complete_active(ticket, result, sink)
        } else {
            self.complete_stale(ticket, result, active_id, sink)
        };

        let settled_cycle = if is_active {
            if let Some(cycle) = self.active.as_mut() {
                match disposition {
                    Disposition::Applied(_) => cycle.record_success(),
                    Disposition::Failed => cycle.record_failure(),
                    _ => cycle.record_discard(),
                }
            }
            let complete = self.active.as_ref().is_some_and(Cycle::is_complete);
            if complete {
                self.settle_active()
            } else {
                None
            }
        } else {
            None
        };

        Completion {
            disposition,
            settled_cycle,
        }
    }

    fn complete_active<P: PresentationSink + ?Sized>(
        &mut self,
        ticket: FetchTicket,
        result: Result<f64, FetchError>,
        sink: &mut P,
    ) -> Disposition {
        let Some(slot) = self.pool.get_mut(ticket.slot) else {
            debug!(
                "Discarding result for removed slot {} (cycle {})",
                ticket.slot.index, ticket.cycle
            );
            return Disposition::Discarded(DiscardReason::SlotRemoved);
        };
        slot.clear_pending(ticket.cycle);

        match result {
            Ok(sample) => {
                let view = slot.fold(ticket.cycle, sample);
                debug!(
                    "Request received for slot {} with value {}",
                    ticket.slot.index, sample
                );
                sink.render(RenderInstruction::new(ticket.slot.index, view));
                Disposition::Applied(view)
            }
            Err(e) => {
                warn!("Fetch failed for slot {}: {}", ticket.slot.index, e);
                Disposition::Failed
            }
        }
    }

    fn complete_stale<P: PresentationSink + ?Sized>(
        &mut self,
        ticket: FetchTicket,
        result: Result<f64, FetchError>,
        active_id: Option<CycleId>,
        sink: &mut P,
    ) -> Disposition {
        let Some(slot) = self.pool.get_mut(ticket.slot) else {
            debug!(
                "Discarding stale result for removed slot {} (cycle {})",
                ticket.slot.index, ticket.cycle
            );
            return Disposition::Discarded(DiscardReason::SlotRemoved);
        };
        slot.clear_pending(ticket.cycle);

        let sample = match result {
            Ok(sample) => sample,
            Err(e) => {
                debug!(
                    "Dropping stale failure for slot {} (cycle {}): {}",
                    ticket.slot.index, ticket.cycle, e
                );
                return Disposition::Discarded(DiscardReason::StaleCycle);
            }
        };

        // Any cycle newer than the ticket's that already folded this slot wins.
        if slot.touched_by() > Some(ticket.cycle) {
            debug!(
                "Dropping stale result for slot {} from cycle {}; cycle {:?} already updated it (active {:?})",
                ticket.slot.index,
                ticket.cycle,
                slot.touched_by(),
                active_id
            );
            return Disposition::Discarded(DiscardReason::SupersededByNewerCycle);
        }

        let view = slot.fold(ticket.cycle, sample);
        debug!(
            "Applied late result for slot {} from cycle {}",
            ticket.slot.index, ticket.cycle
        );
        sink.render(RenderInstruction::new(ticket.slot.index, view));
        Disposition::AppliedLate(view)
    }

    fn settle_active(&mut self) -> Option<CycleReport> {
        let report = self.active.as_ref()?.report();

        self.state = State::Armed;
        self.cycles_completed += 1;
        info!("{}", report);
        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Comparison;
    use crate::sink::testing::RecordingSink;
    use tokio_test::assert_err;

    fn scheduler(size: usize) -> PollScheduler {
        PollScheduler::new(SlotPool::with_size(size))
    }

    fn fail() -> Result<f64, FetchError> {
        Err(FetchError::Status(reqwest::StatusCode::BAD_GATEWAY))
    }

    #[test]
    fn test_start_issues_one_ticket_per_slot() {
        let mut sched = scheduler(3);
        let tickets = sched.start().unwrap();

        assert_eq!(tickets.len(), 3);
        assert_eq!(sched.state(), State::CycleInFlight);
        assert!(sched.pool().slots().iter().all(|s| s.is_pending()));
        let indices: Vec<usize> = tickets.iter().map(|t| t.slot.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_empty_pool_arms_immediately() {
        let mut sched = scheduler(0);
        let tickets = sched.start().unwrap();

        assert!(tickets.is_empty());
        assert_eq!(sched.state(), State::Armed);
        assert_eq!(sched.cycles_completed(), 1);
    }

    #[test]
    fn test_start_while_in_flight_is_rejected() {
        let mut sched = scheduler(1);
        sched.start().unwrap();
        assert_eq!(assert_err!(sched.start()), MonitorError::CycleInFlight);
    }

    #[test]
    fn test_cycle_arms_only_after_all_settle_in_any_order() {
        let mut sched = scheduler(5);
        let mut sink = RecordingSink::default();
        let tickets = sched.start().unwrap();

        let order = [3, 0, 4, 1, 2];
        for (n, &i) in order.iter().enumerate() {
            let result = if i % 2 == 0 { Ok(i as f64) } else { fail() };
            let completion = sched.complete(tickets[i], result, &mut sink);

            if n < order.len() - 1 {
                assert!(completion.settled_cycle.is_none());
                assert_eq!(sched.state(), State::CycleInFlight);
            } else {
                let report = completion.settled_cycle.expect("cycle should settle");
                assert_eq!(report.total, 5);
                assert_eq!(report.succeeded, 3);
                assert_eq!(report.failed, 2);
            }
        }

        assert_eq!(sched.state(), State::Armed);
        assert_eq!(sched.active_cycle().unwrap().settled(), 5);
        assert_eq!(sink.rendered().len(), 3);
    }

    #[test]
    fn test_failure_leaves_slot_untouched() {
        let mut sched = scheduler(1);
        let mut sink = RecordingSink::default();

        let t = sched.start().unwrap();
        sched.complete(t[0], Ok(10.0), &mut sink);
        let t = sched.start().unwrap();
        let completion = sched.complete(t[0], fail(), &mut sink);

        assert_eq!(completion.disposition, Disposition::Failed);
        assert_eq!(sched.pool().slots()[0].aggregate().value(), Some(10.0));
        assert_eq!(sink.rendered().len(), 1);
        assert_eq!(sched.state(), State::Armed);
    }

    #[test]
    fn test_two_cycles_end_to_end() {
        let mut sched = scheduler(2);
        let mut sink = RecordingSink::default();

        let t = sched.start().unwrap();
        sched.complete(t[0], Ok(10.0), &mut sink);
        sched.complete(t[1], Ok(10.0), &mut sink);
        for r in sink.rendered() {
            assert_eq!(r.value, 10.0);
            assert_eq!(r.sign, None);
            assert!(r.is_first_sample);
        }

        sink.clear();
        let t = sched.start().unwrap();
        sched.complete(t[1], Ok(20.0), &mut sink);
        sched.complete(t[0], Ok(5.0), &mut sink);

        let slot0 = sink.for_slot(0);
        assert_eq!(slot0.len(), 1);
        assert_eq!(slot0[0].value, 7.5);
        assert_eq!(slot0[0].sign, Some(Comparison::Below));

        let slot1 = sink.for_slot(1);
        assert_eq!(slot1[0].value, 15.0);
        assert_eq!(slot1[0].sign, Some(Comparison::Above));
        assert_eq!(sched.cycles_completed(), 2);
    }

    #[test]
    fn test_negative_slot_count_rejected_without_restart() {
        let mut sched = scheduler(2);
        let tickets = sched.start().unwrap();
        let cycle = sched.active_cycle().unwrap().id();

        assert_eq!(
            assert_err!(sched.set_slot_count(-1)),
            MonitorError::NegativeSlotCount(-1)
        );
        assert_eq!(sched.pool().len(), 2);
        assert_eq!(sched.state(), State::CycleInFlight);
        assert_eq!(sched.active_cycle().unwrap().id(), cycle);
        assert_eq!(tickets[0].cycle, cycle);
    }

    #[test]
    fn test_shrink_in_flight_discards_removed_slots() {
        let mut sched = scheduler(4);
        let mut sink = RecordingSink::default();
        let old = sched.start().unwrap();

        let new = sched.set_slot_count(2).unwrap();
        assert_eq!(new.len(), 2);
        let new_cycle = sched.active_cycle().unwrap().id();

        for ticket in &old[2..] {
            let completion = sched.complete(*ticket, Ok(99.0), &mut sink);
            assert_eq!(
                completion.disposition,
                Disposition::Discarded(DiscardReason::SlotRemoved)
            );
        }

        let cycle = sched.active_cycle().unwrap();
        assert_eq!(cycle.id(), new_cycle);
        assert_eq!(cycle.settled(), 0);
        assert!(sink.for_slot(2).is_empty());
        assert!(sink.for_slot(3).is_empty());
        assert_eq!(sched.state(), State::CycleInFlight);
    }

    #[test]
    fn test_stale_result_dropped_once_new_cycle_touched_slot() {
        let mut sched = scheduler(1);
        let mut sink = RecordingSink::default();
        let old = sched.start().unwrap();
        let new = sched.restart();

        let completion = sched.complete(new[0], Ok(10.0), &mut sink);
        assert!(matches!(completion.disposition, Disposition::Applied(_)));
        assert!(completion.settled_cycle.is_some());

        let late = sched.complete(old[0], Ok(50.0), &mut sink);
        assert_eq!(
            late.disposition,
            Disposition::Discarded(DiscardReason::SupersededByNewerCycle)
        );
        assert!(late.settled_cycle.is_none());
        assert_eq!(sched.pool().slots()[0].aggregate().value(), Some(10.0));
        assert_eq!(sink.rendered().len(), 1);
    }

    #[test]
    fn test_stale_result_dropped_after_newer_cycle_settled() {
        let mut sched = scheduler(1);
        let mut sink = RecordingSink::default();
        let first = sched.start().unwrap();
        let second = sched.restart();

        sched.complete(second[0], Ok(10.0), &mut sink);
        assert_eq!(sched.state(), State::Armed);
        let third = sched.start().unwrap();

        let late = sched.complete(first[0], Ok(1000.0), &mut sink);
        assert_eq!(
            late.disposition,
            Disposition::Discarded(DiscardReason::SupersededByNewerCycle)
        );
        assert_eq!(sched.pool().slots()[0].aggregate().value(), Some(10.0));
        assert_eq!(sink.rendered().len(), 1);

        // The timer-driven cycle still counts its own result.
        let completion = sched.complete(third[0], Ok(20.0), &mut sink);
        match completion.disposition {
            Disposition::Applied(view) => assert_eq!(view.value, 15.0),
            other => panic!("unexpected disposition {:?}", other),
        }
        assert!(completion.settled_cycle.is_some());
    }

    #[test]
    fn test_older_stale_result_loses_to_newer_stale_result() {
        let mut sched = scheduler(1);
        let mut sink = RecordingSink::default();
        let first = sched.start().unwrap();
        let second = sched.restart();
        sched.restart();

        let newer = sched.complete(second[0], Ok(10.0), &mut sink);
        assert!(matches!(newer.disposition, Disposition::AppliedLate(_)));

        let older = sched.complete(first[0], Ok(1000.0), &mut sink);
        assert_eq!(
            older.disposition,
            Disposition::Discarded(DiscardReason::SupersededByNewerCycle)
        );
        assert_eq!(sched.pool().slots()[0].aggregate().value(), Some(10.0));
        assert_eq!(sched.active_cycle().unwrap().settled(), 0);
        assert_eq!(sched.state(), State::CycleInFlight);
    }

    #[test]
    fn test_oversized_slot_count_rejected_without_restart() {
        let mut sched = scheduler(2);
        sched.start().unwrap();
        let cycle = sched.active_cycle().unwrap().id();

        assert_eq!(
            assert_err!(sched.set_slot_count(i64::MAX)),
            MonitorError::SlotCountTooLarge(i64::MAX)
        );
        assert_eq!(sched.pool().len(), 2);
        assert_eq!(sched.active_cycle().unwrap().id(), cycle);
        assert_eq!(sched.state(), State::CycleInFlight);
    }

    #[test]
    fn test_stale_result_applied_but_not_counted() {
        let mut sched = scheduler(2);
        let mut sink = RecordingSink::default();
        let old = sched.start().unwrap();
        let new = sched.restart();

        let late = sched.complete(old[0], Ok(8.0), &mut sink);
        assert!(matches!(late.disposition, Disposition::AppliedLate(_)));
        assert_eq!(sched.active_cycle().unwrap().settled(), 0);
        assert_eq!(sink.for_slot(0).len(), 1);

        // The new cycle's own result still lands on top of the late one.
        let completion = sched.complete(new[0], Ok(4.0), &mut sink);
        match completion.disposition {
            Disposition::Applied(view) => assert_eq!(view.value, 6.0),
            other => panic!("unexpected disposition {:?}", other),
        }
        assert!(!sched.pool().slots()[0].is_pending());
        assert!(sched.pool().slots()[1].is_pending());

        sched.complete(new[1], Ok(1.0), &mut sink);
        assert_eq!(sched.state(), State::Armed);
    }

    #[test]
    fn test_stale_failure_is_dropped() {
        let mut sched = scheduler(1);
        let mut sink = RecordingSink::default();
        let old = sched.start().unwrap();
        sched.restart();

        let late = sched.complete(old[0], fail(), &mut sink);
        assert_eq!(
            late.disposition,
            Disposition::Discarded(DiscardReason::StaleCycle)
        );
        assert_eq!(sched.active_cycle().unwrap().settled(), 0);
        assert!(sched.pool().slots()[0].is_pending());
    }

    #[test]
    fn test_restart_from_armed_with_empty_pool() {
        let mut sched = scheduler(2);
        let mut sink = RecordingSink::default();
        let t = sched.start().unwrap();
        sched.complete(t[0], Ok(1.0), &mut sink);
        sched.complete(t[1], Ok(1.0), &mut sink);
        assert_eq!(sched.state(), State::Armed);

        let tickets = sched.set_slot_count(0).unwrap();
        assert!(tickets.is_empty());
        assert_eq!(sched.state(), State::Armed);
        assert!(sched.pool().is_empty());
    }

    #[test]
    fn test_regrown_slot_ignores_predecessor_results() {
        let mut sched = scheduler(2);
        let mut sink = RecordingSink::default();
        let old = sched.start().unwrap();

        sched.set_slot_count(0).unwrap();
        let new = sched.set_slot_count(2).unwrap();

        let late = sched.complete(old[1], Ok(77.0), &mut sink);
        assert_eq!(
            late.disposition,
            Disposition::Discarded(DiscardReason::SlotRemoved)
        );
        assert_eq!(sched.pool().slots()[1].aggregate().value(), None);
        assert_ne!(old[1].slot.id, new[1].slot.id);
    }
}
