//! Built-in follow-up sequence catalog.
//!
//! Each outcome owns an ordered list of steps. Delays are cumulative from the
//! sequence start, so reordering a step means adjusting its delay, not its
//! position. Templates use `{placeholder}` variables resolved at
//! materialization time.

use super::CallOutcome;
use crate::models::TaskType;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct SequenceStep {
    /// Offset from the sequence start, not from the previous step.
    pub delay: Duration,
    pub channel: TaskType,
    pub template: &'static str,
    /// Short operator-facing hint about what this step tries to achieve.
    pub next_action: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct FollowUpSequence {
    pub name: &'static str,
    pub steps: &'static [SequenceStep],
}

const MINUTE: u64 = 60;
const HOUR: u64 = 3_600;
const DAY: u64 = 86_400;

static NO_ANSWER: &[SequenceStep] = &[
    SequenceStep {
        delay: Duration::from_secs(5 * MINUTE),
        channel: TaskType::Sms,
        template: "Hi {name}, this is {businessName}. We just tried to reach you about {service}. You can book a time that works for you here: {bookingLink}",
        next_action: "nudge toward self-serve booking",
    },
    SequenceStep {
        delay: Duration::from_secs(HOUR),
        channel: TaskType::Sms,
        template: "{name}, quick reminder from {businessName}. {benefit1}. Grab a slot anytime: {bookingLink}",
        next_action: "reinforce primary benefit",
    },
    SequenceStep {
        delay: Duration::from_secs(DAY),
        channel: TaskType::Email,
        template: "Hi {name},\n\nWe tried calling about {service} and couldn't reach you. A few reasons our customers choose {businessName}: {benefit1}, {benefit2}, and {benefit3}.\n\nBook here: {bookingLink}\nOr call us: {businessPhone}",
        next_action: "longer-form pitch with booking link",
    },
    SequenceStep {
        delay: Duration::from_secs(3 * DAY),
        channel: TaskType::Call,
        template: "Final follow-up call for {name} regarding {service}.",
        next_action: "last call attempt before closing the sequence",
    },
];

static VOICEMAIL: &[SequenceStep] = &[
    SequenceStep {
        delay: Duration::from_secs(HOUR),
        channel: TaskType::Sms,
        template: "Hi {name}, we left you a voicemail from {businessName} about {service}. Easiest next step is booking online: {bookingLink}",
        next_action: "convert the voicemail into a booking",
    },
    SequenceStep {
        delay: Duration::from_secs(DAY),
        channel: TaskType::Email,
        template: "Hi {name},\n\nFollowing up on our voicemail about {service}. {benefit1}, and you can pick any time here: {bookingLink}\n\n{businessName} · {businessPhone}",
        next_action: "email recap with booking link",
    },
];

static NOT_INTERESTED: &[SequenceStep] = &[SequenceStep {
    delay: Duration::from_secs(7 * DAY),
    channel: TaskType::Email,
    template: "Hi {name},\n\nNo pressure at all. If {service} becomes relevant again, {businessName} is here. {benefit1}.\n\n{bookingLink}",
    next_action: "single soft nurture touch, then stop",
}];

static CALLBACK_REQUESTED: &[SequenceStep] = &[
    SequenceStep {
        delay: Duration::from_secs(2 * HOUR),
        channel: TaskType::Call,
        template: "Callback requested by {name} about {service}.",
        next_action: "honor the requested callback",
    },
    SequenceStep {
        delay: Duration::from_secs(DAY),
        channel: TaskType::Sms,
        template: "Hi {name}, sorry we missed each other again. Book directly and skip the phone tag: {bookingLink}",
        next_action: "offer self-serve booking as the fallback",
    },
];

static INTERESTED_NO_BOOKING: &[SequenceStep] = &[
    SequenceStep {
        delay: Duration::from_secs(15 * MINUTE),
        channel: TaskType::Sms,
        template: "Great talking with you, {name}! Here's the booking link for {service} while it's fresh: {bookingLink}",
        next_action: "capture intent immediately after the call",
    },
    SequenceStep {
        delay: Duration::from_secs(DAY),
        channel: TaskType::Email,
        template: "Hi {name},\n\nGlad you're interested in {service}. To recap what {businessName} offers: {benefit1}, {benefit2}, {benefit3}.\n\nReserve your spot: {bookingLink}",
        next_action: "recap benefits and re-send the link",
    },
    SequenceStep {
        delay: Duration::from_secs(3 * DAY),
        channel: TaskType::Sms,
        template: "{name}, spots for {service} fill up quickly, here's that link one more time: {bookingLink}",
        next_action: "final scarcity nudge",
    },
];

static TECHNICAL_ISSUES: &[SequenceStep] = &[
    SequenceStep {
        delay: Duration::from_secs(5 * MINUTE),
        channel: TaskType::Call,
        template: "Retry call for {name} after a technical issue on the previous attempt.",
        next_action: "retry the call promptly",
    },
    SequenceStep {
        delay: Duration::from_secs(HOUR),
        channel: TaskType::Sms,
        template: "Hi {name}, we had trouble connecting earlier. You can reach {businessName} at {businessPhone} or book online: {bookingLink}",
        next_action: "give the lead a direct path in",
    },
];

/// Sequence for a call outcome. Total and infallible; every outcome has one.
pub fn sequence_for(outcome: CallOutcome) -> FollowUpSequence {
    match outcome {
        CallOutcome::NoAnswer => FollowUpSequence {
            name: "no_answer",
            steps: NO_ANSWER,
        },
        CallOutcome::Voicemail => FollowUpSequence {
            name: "voicemail",
            steps: VOICEMAIL,
        },
        CallOutcome::NotInterested => FollowUpSequence {
            name: "not_interested",
            steps: NOT_INTERESTED,
        },
        CallOutcome::CallbackRequested => FollowUpSequence {
            name: "callback_requested",
            steps: CALLBACK_REQUESTED,
        },
        CallOutcome::InterestedNoBooking => FollowUpSequence {
            name: "interested_no_booking",
            steps: INTERESTED_NO_BOOKING,
        },
        CallOutcome::TechnicalIssues => FollowUpSequence {
            name: "technical_issues",
            steps: TECHNICAL_ISSUES,
        },
    }
}
