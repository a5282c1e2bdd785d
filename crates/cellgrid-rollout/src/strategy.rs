//! Failure policies — what a wave's partial failure means for the run.

use serde::{Deserialize, Serialize};

pub use cell_core::FailurePolicy;

/// Per-wave deployment counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveTally {
    pub succeeded: u32,
    pub failed: u32,
}

impl WaveTally {
    pub fn total(&self) -> u32 {
        self.succeeded + self.failed
    }
}

/// Whether a finished wave lets the run continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveVerdict {
    /// Continue; the next wave still waits for approval.
    Proceed,
    /// Fail the run.
    Abort,
}

/// Judge a finished wave under the given policy.
///
/// `PauseForApproval` never aborts: failures are recorded and the
/// approver decides at the gate.
pub fn evaluate(policy: &FailurePolicy, tally: WaveTally) -> WaveVerdict {
    match policy {
        FailurePolicy::PauseForApproval => WaveVerdict::Proceed,
        FailurePolicy::AbortOnFailure => {
            if tally.failed > 0 {
                WaveVerdict::Abort
            } else {
                WaveVerdict::Proceed
            }
        }
        FailurePolicy::Threshold {
            min_success_percent,
        } => {
            let total = tally.total();
            if total == 0
                || u64::from(tally.succeeded) * 100 >= u64::from(*min_success_percent) * u64::from(total)
            {
                WaveVerdict::Proceed
            } else {
                WaveVerdict::Abort
            }
        }
    }
}
