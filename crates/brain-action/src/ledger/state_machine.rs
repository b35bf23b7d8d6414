//! Intent status state machine with validated transitions.
//!
//! Detected -> Queued -> Executing -> Completed
//! Detected/Queued -> Blocked/Skipped/Failed/Cancelled
//! Executing -> Failed/Cancelled

use crate::error::LedgerError;
use crate::types::IntentStatus;

/// Validate that an intent status transition is allowed.
///
/// Terminal statuses and `Blocked` have no outgoing transitions.
pub fn validate_transition(from: IntentStatus, to: IntentStatus) -> Result<(), LedgerError> {
    use IntentStatus::*;

    let valid = matches!(
        (from, to),
        (Detected, Queued)
            | (Detected, Blocked)
            | (Detected, Skipped)
            | (Detected, Failed)
            | (Detected, Cancelled)
            | (Queued, Executing)
            | (Queued, Blocked)
            | (Queued, Skipped)
            | (Queued, Failed)
            | (Queued, Cancelled)
            | (Executing, Completed)
            | (Executing, Failed)
            | (Executing, Cancelled)
    );

    if valid {
        Ok(())
    } else {
        Err(LedgerError::InvalidTransition(from, to))
    }
}
