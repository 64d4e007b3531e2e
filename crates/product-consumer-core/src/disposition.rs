//! # Disposition Policy
//!
//! Maps the result of decoding and processing a delivery to what the broker
//! should do with it.
//!
//! | Input            | Disposition        |
//! |------------------|--------------------|
//! | `DecodeError`    | `RejectAndDiscard` |
//! | `Success`        | `Acknowledge`      |
//! | `RetryableFailure` | `RejectAndRequeue` |
//! | `PermanentFailure` | `RejectAndDiscard` |
//!
//! A payload that failed to decode can never succeed, so it is never
//! requeued.

use crate::decoder::DecodeError;
use crate::processor::Outcome;
use std::fmt;

/// What to tell the broker about a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    Acknowledge,
    RejectAndRequeue,
    RejectAndDiscard,
}

impl Disposition {
    /// Requeue flag for a `nack`, or `None` when the delivery is acknowledged
    pub fn requeue(&self) -> Option<bool> {
        match self {
            Self::Acknowledge => None,
            Self::RejectAndRequeue => Some(true),
            Self::RejectAndDiscard => Some(false),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acknowledge => "acknowledge",
            Self::RejectAndRequeue => "reject_and_requeue",
            Self::RejectAndDiscard => "reject_and_discard",
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&Outcome> for Disposition {
    fn from(outcome: &Outcome) -> Self {
        match outcome {
            Outcome::Success => Self::Acknowledge,
            Outcome::RetryableFailure { .. } => Self::RejectAndRequeue,
            Outcome::PermanentFailure { .. } => Self::RejectAndDiscard,
        }
    }
}

impl From<&DecodeError> for Disposition {
    fn from(_: &DecodeError) -> Self {
        Self::RejectAndDiscard
    }
}

/// Decide the disposition for a decode-then-process result
pub fn decide(result: &Result<Outcome, DecodeError>) -> Disposition {
    match result {
        Ok(outcome) => Disposition::from(outcome),
        Err(error) => Disposition::from(error),
    }
}

#[cfg(test)]
#[path = "disposition_tests.rs"]
mod tests;
