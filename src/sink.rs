//! Presentation side of the monitor.
//!
//! The core never draws anything itself; it hands a [`RenderInstruction`] to
//! a [`PresentationSink`] whenever a slot's aggregate changes.

use crate::aggregate::{AggregateView, Comparison};
use serde::Serialize;
use tracing::info;

/// What a sink needs to redraw one slot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RenderInstruction {
    pub slot_index: usize,
    pub value: f64,
    pub sign: Option<Comparison>,
    pub is_first_sample: bool,
}

impl RenderInstruction {
    pub fn new(slot_index: usize, view: AggregateView) -> Self {
        Self {
            slot_index,
            value: view.value,
            sign: view.sign,
            is_first_sample: view.is_first_sample(),
        }
    }

    pub fn view(&self) -> AggregateView {
        AggregateView {
            value: self.value,
            sign: self.sign,
        }
    }
}

/// Receiver of render instructions.
///
/// Implementations must treat repeated calls for the same index as updates of
/// the same element, and must tolerate an index that has just been removed.
pub trait PresentationSink: Send {
    fn render(&mut self, instruction: RenderInstruction);

    /// Called after the slot set has been resized to `len` slots.
    fn resized(&mut self, _len: usize) {}
}

/// Sink that writes each slot label to the log.
#[derive(Debug, Default)]
pub struct LogSink {
    len: usize,
}

impl LogSink {
    pub fn new(len: usize) -> Self {
        Self { len }
    }

    /// Log line for `instruction`, or `None` when its slot is no longer shown.
    fn line(&self, instruction: &RenderInstruction) -> Option<String> {
        (instruction.slot_index < self.len).then(|| {
            format!(
                "slot {:>3} | {}",
                instruction.slot_index,
                instruction.view().label()
            )
        })
    }
}

impl PresentationSink for LogSink {
    fn render(&mut self, instruction: RenderInstruction) {
        if let Some(line) = self.line(&instruction) {
            info!("{}", line);
        }
    }

    fn resized(&mut self, len: usize) {
        self.len = len;
        info!("Displaying {} slots", len);
    }
}
