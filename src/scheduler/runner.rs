//! Async run loop for the poll scheduler.
//!
//! [`Monitor::run`] is the single task that owns the [`PollScheduler`]. It
//! multiplexes three event sources with `tokio::select!`:
//!
//! 1. Commands from [`MonitorHandle`]s (resize, snapshot, shutdown)
//! 2. Completions of in-flight fetches
//! 3. The one-shot re-arm timer
//!
//! Fetch futures are polled from a `FuturesUnordered` inside the same task,
//! so every fold, settle and resize happens sequentially on one logical
//! thread and no locks are needed around scheduler state.

use super::cycle::CycleId;
use super::state::{FetchTicket, PollScheduler, State};
use crate::error::{FetchError, MonitorError};
use crate::pool::SlotPool;
use crate::sink::PresentationSink;
use crate::source::SampleSource;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::Serialize;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Sleep;
use tracing::{debug, info};

/// Default delay between a settled cycle and the next one.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(5000);

/// Capacity of the command channel.
const COMMAND_BUFFER: usize = 32;

type InFlight = FuturesUnordered<BoxFuture<'static, (FetchTicket, Result<f64, FetchError>)>>;

/// Requests sent from handles to the run loop.
#[derive(Debug)]
enum Command {
    SetSlotCount {
        count: i64,
        reply: oneshot::Sender<Result<(), MonitorError>>,
    },
    Snapshot {
        reply: oneshot::Sender<MonitorSnapshot>,
    },
    Shutdown,
}

/// Point-in-time view of one slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotSnapshot {
    pub index: usize,
    pub value: Option<f64>,
    pub pending: bool,
}

/// Point-in-time view of the monitor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorSnapshot {
    pub state: State,
    pub cycle: Option<CycleId>,
    pub settled: usize,
    pub total: usize,
    pub cycles_completed: u64,
    /// Requests still outstanding, including those of superseded cycles.
    pub in_flight: usize,
    pub slots: Vec<SlotSnapshot>,
}

/// Cloneable handle used to control a running [`Monitor`].
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    commands: mpsc::Sender<Command>,
}

impl MonitorHandle {
    /// Resize the slot set and restart polling immediately.
    ///
    /// A negative count is rejected and nothing changes.
    pub async fn set_slot_count(&self, count: i64) -> Result<(), MonitorError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::SetSlotCount { count, reply })
            .await
            .map_err(|_| MonitorError::Stopped)?;
        rx.await.map_err(|_| MonitorError::Stopped)?
    }

    pub async fn snapshot(&self) -> Result<MonitorSnapshot, MonitorError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Snapshot { reply })
            .await
            .map_err(|_| MonitorError::Stopped)?;
        rx.await.map_err(|_| MonitorError::Stopped)
    }

    /// Ask the run loop to exit. In-flight fetches are dropped.
    pub async fn shutdown(&self) -> Result<(), MonitorError> {
        self.commands
            .send(Command::Shutdown)
            .await
            .map_err(|_| MonitorError::Stopped)
    }
}

/// The polling monitor: a scheduler bound to a source and a sink.
pub struct Monitor<S, P> {
    scheduler: PollScheduler,
    source: S,
    sink: P,
    interval: Duration,
    commands: mpsc::Receiver<Command>,
}

impl<S, P> Monitor<S, P>
where
    S: SampleSource,
    P: PresentationSink,
{
    /// Create a monitor with `slots` initial slots and its control handle.
    pub fn new(source: S, sink: P, slots: usize) -> (Self, MonitorHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);

        let monitor = Self {
            scheduler: PollScheduler::new(SlotPool::with_size(slots)),
            source,
            sink,
            interval: DEFAULT_INTERVAL,
            commands: rx,
        };

        (monitor, MonitorHandle { commands: tx })
    }

    /// Sets the delay between a settled cycle and the next.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run until shutdown is requested or every handle is dropped.
    pub async fn run(mut self) {
        info!(
            "Monitor started with {} slots, interval {}ms",
            self.scheduler.pool().len(),
            self.interval.as_millis()
        );

        let mut in_flight: InFlight = FuturesUnordered::new();
        let mut timer: Option<Pin<Box<Sleep>>> = None;

        self.sink.resized(self.scheduler.pool().len());
        // Fresh scheduler is Idle, so start cannot fail here.
        if let Ok(tickets) = self.scheduler.start() {
            self.issue(tickets, &mut in_flight, &mut timer);
        }

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => {
                    match command {
                        Some(Command::SetSlotCount { count, reply }) => {
                            let result = self.set_slot_count(count, &mut in_flight, &mut timer);
                            let _ = reply.send(result);
                        }
                        Some(Command::Snapshot { reply }) => {
                            let _ = reply.send(self.snapshot(in_flight.len()));
                        }
                        Some(Command::Shutdown) | None => break,
                    }
                }

                Some((ticket, result)) = in_flight.next(), if !in_flight.is_empty() => {
                    let completion = self.scheduler.complete(ticket, result, &mut self.sink);
                    debug!("Slot {} settled: {:?}", ticket.slot.index, completion.disposition);

                    if completion.settled_cycle.is_some() {
                        timer = Some(Box::pin(tokio::time::sleep(self.interval)));
                    }
                }

                _ = async {
                    match timer.as_mut() {
                        Some(sleep) => sleep.await,
                        None => std::future::pending().await,
                    }
                }, if timer.is_some() => {
                    timer = None;
                    match self.scheduler.start() {
                        Ok(tickets) => self.issue(tickets, &mut in_flight, &mut timer),
                        Err(e) => debug!("Timer fired but cycle not started: {}", e),
                    }
                }
            }
        }

        info!(
            "Monitor stopped after {} cycles ({} requests abandoned)",
            self.scheduler.cycles_completed(),
            in_flight.len()
        );
    }

    fn set_slot_count(
        &mut self,
        count: i64,
        in_flight: &mut InFlight,
        timer: &mut Option<Pin<Box<Sleep>>>,
    ) -> Result<(), MonitorError> {
        let tickets = self.scheduler.set_slot_count(count)?;

        // The old cycle can no longer re-arm; the new one decides.
        *timer = None;
        self.sink.resized(self.scheduler.pool().len());
        self.issue(tickets, in_flight, timer);
        Ok(())
    }

    /// Push one fetch per ticket, or arm the timer when the cycle is already
    /// settled (empty pool).
    fn issue(
        &mut self,
        tickets: Vec<FetchTicket>,
        in_flight: &mut InFlight,
        timer: &mut Option<Pin<Box<Sleep>>>,
    ) {
        for ticket in tickets {
            let fetch = self.source.fetch_sample();
            in_flight.push(async move { (ticket, fetch.await) }.boxed());
        }

        if self.scheduler.state() == State::Armed {
            *timer = Some(Box::pin(tokio::time::sleep(self.interval)));
        }
    }

    fn snapshot(&self, in_flight: usize) -> MonitorSnapshot {
        let cycle = self.scheduler.active_cycle();
        MonitorSnapshot {
            state: self.scheduler.state(),
            cycle: cycle.map(|c| c.id()),
            settled: cycle.map_or(0, |c| c.settled()),
            total: cycle.map_or(0, |c| c.total()),
            cycles_completed: self.scheduler.cycles_completed(),
            in_flight,
            slots: self
                .scheduler
                .pool()
                .slots()
                .iter()
                .enumerate()
                .map(|(index, slot)| SlotSnapshot {
                    index,
                    value: slot.aggregate().value(),
                    pending: slot.is_pending(),
                })
                .collect(),
        }
    }
}
