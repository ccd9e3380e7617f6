//! # Follow-Up Campaign Orchestration
//!
//! Maps a finished call's outcome to a multi-step outreach sequence and
//! materializes every step as a scheduled queue task up front. The sequence
//! state machine lives entirely in the queue: pending tasks are the remaining
//! steps, cancellation is a bulk status transition, and per-step guard
//! re-checks happen in the dispatcher right before execution.

pub mod orchestrator;
pub mod sequences;

pub use orchestrator::{FollowUpGuard, FollowUpOrchestrator, LeadContext};
pub use sequences::{sequence_for, FollowUpSequence, SequenceStep};

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Outcome of an AI call attempt. Anything unrecognized maps to `NoAnswer`,
/// which has the most conservative sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    NoAnswer,
    Voicemail,
    NotInterested,
    CallbackRequested,
    InterestedNoBooking,
    TechnicalIssues,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoAnswer => "no_answer",
            Self::Voicemail => "voicemail",
            Self::NotInterested => "not_interested",
            Self::CallbackRequested => "callback_requested",
            Self::InterestedNoBooking => "interested_no_booking",
            Self::TechnicalIssues => "technical_issues",
        }
    }
}

impl FromStr for CallOutcome {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "voicemail" => Self::Voicemail,
            "not_interested" => Self::NotInterested,
            "callback_requested" => Self::CallbackRequested,
            "interested_no_booking" => Self::InterestedNoBooking,
            "technical_issues" => Self::TechnicalIssues,
            _ => Self::NoAnswer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_outcomes_fall_back_to_no_answer() {
        assert_eq!(
            "call_dropped".parse::<CallOutcome>().unwrap(),
            CallOutcome::NoAnswer
        );
        assert_eq!(
            "voicemail".parse::<CallOutcome>().unwrap(),
            CallOutcome::Voicemail
        );
    }
}
