//! Decides whether a candidate message event is new, a duplicate, or the
//! authoritative replacement for an optimistic placeholder.
//!
//! Upstream delivery is at-least-once and multi-channel (webhook push plus
//! periodic poll), and the send path inserts speculative entries before the
//! gateway round-trip completes, so no single identifier is reliable across
//! all three producers. Strong identity (gateway id, temp id) is checked
//! first, then a content+time heuristic catches events arriving twice with
//! no shared identifier at all.

use crate::domain::message::{Candidate, Message};
use uuid::Uuid;

/// Clock skew tolerated between two observations of the same event, in
/// seconds. The webhook and poll channels timestamp independently.
const FINGERPRINT_SKEW_SECS: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The candidate is a new message.
    Insert,
    /// The candidate supersedes an optimistic placeholder; the placeholder
    /// keeps its row but adopts the candidate's identity, status and time.
    Replace { existing: Uuid },
    /// The candidate was already seen.
    Ignore(IgnoreReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    DuplicateId,
    DuplicateContent,
}

impl IgnoreReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DuplicateId => "duplicate-id",
            Self::DuplicateContent => "duplicate-content",
        }
    }
}

/// Reconciles a candidate against the known messages of one conversation.
///
/// Pure; callers are responsible for holding the conversation's critical
/// section across this decision and the subsequent store write. `known` must
/// only contain messages of the candidate's own conversation.
#[must_use]
pub fn reconcile(candidate: &Candidate, known: &[Message]) -> MergeOutcome {
    if let Some(gateway_id) = candidate.gateway_id.as_deref()
        && known.iter().any(|m| m.gateway_id.as_deref() == Some(gateway_id))
    {
        return MergeOutcome::Ignore(IgnoreReason::DuplicateId);
    }

    if let Some(temp_id) = candidate.temp_id.as_deref()
        && let Some(placeholder) = known.iter().find(|m| m.temp_id.as_deref() == Some(temp_id))
    {
        return MergeOutcome::Replace { existing: placeholder.id };
    }

    if known.iter().any(|m| is_same_event(candidate, m)) {
        return MergeOutcome::Ignore(IgnoreReason::DuplicateContent);
    }

    MergeOutcome::Insert
}

fn is_same_event(candidate: &Candidate, known: &Message) -> bool {
    candidate.direction == known.direction
        && candidate.counterparty == known.counterparty
        && candidate.body == known.body
        && (candidate.occurred_at.unix_timestamp() - known.occurred_at.unix_timestamp()).abs()
            <= FINGERPRINT_SKEW_SECS
}
