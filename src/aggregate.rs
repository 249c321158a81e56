//! Rolling per-slot aggregate.
//!
//! Each slot keeps a single running value. Every new sample is averaged with
//! the previous value, so the most recent sample always carries half of the
//! weight. This is deliberately not a cumulative mean of all samples.

use serde::Serialize;
use std::fmt;

/// How the latest sample compares to the aggregate it produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Comparison {
    /// The sample was above the new aggregate.
    #[serde(rename = ">")]
    Above,
    /// The sample was at or below the new aggregate.
    #[serde(rename = "<")]
    Below,
}

impl Comparison {
    /// Returns the sign character shown next to the value.
    pub fn symbol(&self) -> &'static str {
        match self {
            Comparison::Above => ">",
            Comparison::Below => "<",
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Result of folding one sample into an aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AggregateView {
    /// Aggregate value after the fold.
    pub value: f64,
    /// Comparison of the sample against `value`. `None` on the first fold.
    pub sign: Option<Comparison>,
}

impl AggregateView {
    /// True when this view came from the very first sample of the slot.
    pub fn is_first_sample(&self) -> bool {
        self.sign.is_none()
    }

    /// Text label for the slot: the bare value on the first sample, then the
    /// comparison sign followed by the value with two decimals.
    pub fn label(&self) -> String {
        match self.sign {
            None => format!("{}", self.value),
            Some(sign) => format!("{} {:.2}", sign, self.value),
        }
    }
}

/// Running aggregate for a single slot.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SlotAggregate {
    value: Option<f64>,
}

impl SlotAggregate {
    /// Creates an aggregate with no samples folded yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value, or `None` if nothing has been folded.
    pub fn value(&self) -> Option<f64> {
        self.value
    }

    /// Folds one sample and returns the resulting view.
    pub fn fold(&mut self, sample: f64) -> AggregateView {
        let view = match self.value {
            None => AggregateView {
                value: sample,
                sign: None,
            },
            Some(old) => {
                let value = (old + sample) / 2.0;
                let sign = if sample > value {
                    Comparison::Above
                } else {
                    Comparison::Below
                };
                AggregateView {
                    value,
                    sign: Some(sign),
                }
            }
        };

        self.value = Some(view.value);
        view
    }
}
